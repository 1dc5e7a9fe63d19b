use sdrproxy_core::{ProxyError, ProxyResult};

pub const DONGLE_MAGIC: [u8; 4] = *b"RTL0";

/// Opcodes for the 5-byte `{u8, u32 BE}` rtl_tcp control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    CenterFreq = 1,
    SampleRate = 2,
    GainMode = 3,
    Gain = 4,
    FreqCorrection = 5,
    IfGain = 6,
    TestMode = 7,
    AgcMode = 8,
    DirectSampling = 9,
    OffsetTuning = 10,
    RtlXtalFreq = 11,
    TunerXtalFreq = 12,
    GainByIndex = 13,
}

/// Encodes a control command as the fixed 5-byte wire form.
pub fn encode_command(opcode: Opcode, value: u32) -> [u8; 5] {
    let mut buf = [0u8; 5];
    buf[0] = opcode as u8;
    buf[1..5].copy_from_slice(&value.to_be_bytes());
    buf
}

/// The 12-byte handshake header sent by the device on connect.
#[derive(Debug, Clone, Copy)]
pub struct DongleInfo {
    pub tuner: u32,
    pub gain_count: u32,
}

pub fn decode_dongle_header(bytes: &[u8; 12]) -> ProxyResult<DongleInfo> {
    let magic = &bytes[0..4];
    if magic != DONGLE_MAGIC {
        return Err(ProxyError::BadFormat(format!(
            "bad dongle magic: {:?}",
            magic
        )));
    }
    let tuner = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
    let gain_count = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
    Ok(DongleInfo { tuner, gain_count })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_center_freq_command() {
        let buf = encode_command(Opcode::CenterFreq, 100_000_000);
        assert_eq!(buf[0], 1);
        assert_eq!(u32::from_be_bytes(buf[1..5].try_into().unwrap()), 100_000_000);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(b"XXXX");
        assert!(decode_dongle_header(&bytes).is_err());
    }

    #[test]
    fn decodes_valid_header() {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&DONGLE_MAGIC);
        bytes[4..8].copy_from_slice(&7u32.to_be_bytes());
        bytes[8..12].copy_from_slice(&29u32.to_be_bytes());
        let info = decode_dongle_header(&bytes).unwrap();
        assert_eq!(info.tuner, 7);
        assert_eq!(info.gain_count, 29);
    }
}
