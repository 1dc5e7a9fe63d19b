use num_complex::Complex;

/// Rational resampler via linear interpolation, with the fractional input
/// position carried across batch boundaries so retuning never introduces a
/// phase discontinuity at a batch edge.
pub struct Resampler {
    ratio: f64,
    /// Position of the next output sample, in input-sample units, relative
    /// to the start of the *next* call's input (can be negative, meaning
    /// "still inside the previous batch's tail").
    pos: f64,
    prev_tail: Option<Complex<f32>>,
}

impl Resampler {
    pub fn new(ratio: f64) -> Self {
        assert!(ratio > 0.0);
        Self {
            ratio,
            pos: 0.0,
            prev_tail: None,
        }
    }

    /// Reports the actual number of samples the next call would produce for
    /// a batch of the given length, without consuming input.
    pub fn output_len_for(&self, input_len: usize) -> usize {
        let step = 1.0 / self.ratio;
        let mut pos = self.pos;
        let mut n = 0;
        while pos < input_len as f64 {
            n += 1;
            pos += step;
        }
        n
    }

    pub fn process(&mut self, input: &[Complex<f32>]) -> Vec<Complex<f32>> {
        if input.is_empty() {
            return Vec::new();
        }
        let step = 1.0 / self.ratio;
        let mut out = Vec::with_capacity(self.output_len_for(input.len()));
        let mut pos = self.pos;

        while pos < input.len() as f64 {
            let i0 = pos.floor() as isize;
            let frac = (pos - i0 as f64) as f32;

            let s0 = self.sample_at(input, i0);
            let s1 = self.sample_at(input, i0 + 1);
            out.push(s0 + (s1 - s0) * frac);

            pos += step;
        }

        self.pos = pos - input.len() as f64;
        self.prev_tail = input.last().copied();
        out
    }

    fn sample_at(&self, input: &[Complex<f32>], idx: isize) -> Complex<f32> {
        if idx < 0 {
            self.prev_tail.unwrap_or(input[0])
        } else if (idx as usize) < input.len() {
            input[idx as usize]
        } else {
            *input.last().unwrap()
        }
    }
}
