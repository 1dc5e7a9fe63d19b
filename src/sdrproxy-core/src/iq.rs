use num_complex::Complex;

/// Decodes one interleaved (I, Q) byte pair into a baseband sample.
pub fn decode_sample(i_byte: u8, q_byte: u8) -> Complex<f32> {
    Complex::new(
        (i_byte as f32 - 127.0) / 128.0,
        (q_byte as f32 - 127.0) / 128.0,
    )
}

/// Quantises one baseband sample to an interleaved (I, Q) byte pair.
pub fn encode_sample(sample: Complex<f32>) -> (u8, u8) {
    let enc = |v: f32| ((v * 128.0 + 127.0).round().clamp(0.0, 255.0)) as u8;
    (enc(sample.re), enc(sample.im))
}

/// Decodes a byte buffer of length `2*N` into N complex samples. Trailing
/// bytes that do not form a whole sample pair are ignored by the caller
/// (batch framing discards a short tail itself, see [`decode_batch_exact`]).
pub fn decode_batch(bytes: &[u8]) -> Vec<Complex<f32>> {
    bytes
        .chunks_exact(2)
        .map(|pair| decode_sample(pair[0], pair[1]))
        .collect()
}

/// Encodes a batch of complex samples into its interleaved byte-pair form.
pub fn encode_batch(samples: &[Complex<f32>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let (i, q) = encode_sample(sample);
        out.push(i);
        out.push(q);
    }
    out
}

/// Decodes a buffer known to hold exactly `N` whole samples.
pub fn decode_batch_exact(bytes: &[u8]) -> Vec<Complex<f32>> {
    debug_assert_eq!(bytes.len() % 2, 0);
    decode_batch(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_literal_triple() {
        let samples = [
            Complex::new(0.5, -0.5),
            Complex::new(0.0, 0.0),
            Complex::new(-1.0, 1.0),
        ];
        let bytes = encode_batch(&samples);
        assert_eq!(bytes, vec![0xBF, 0x3F, 0x7F, 0x7F, 0x00, 0xFF]);

        let decoded = decode_batch(&bytes);
        for (orig, back) in samples.iter().zip(decoded.iter()) {
            assert!((orig.re - back.re).abs() <= 1.0 / 128.0);
            assert!((orig.im - back.im).abs() <= 1.0 / 128.0);
        }
    }

    #[test]
    fn decode_encode_round_trip_is_exact_on_bytes() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        let padded = if bytes.len() % 2 == 1 {
            let mut b = bytes.clone();
            b.push(0);
            b
        } else {
            bytes.clone()
        };
        let decoded = decode_batch(&padded);
        let reencoded = encode_batch(&decoded);
        assert_eq!(reencoded, padded);
    }
}
