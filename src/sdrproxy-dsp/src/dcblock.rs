use num_complex::Complex;

/// Single-pole IIR DC blocker: `y[n] = x[n] - x[n-1] + pole * y[n-1]`.
pub struct DcBlocker {
    pole: f32,
    prev_x: Complex<f32>,
    prev_y: Complex<f32>,
}

impl DcBlocker {
    pub fn new() -> Self {
        Self::with_pole(0.9)
    }

    pub fn with_pole(pole: f32) -> Self {
        Self {
            pole,
            prev_x: Complex::new(0.0, 0.0),
            prev_y: Complex::new(0.0, 0.0),
        }
    }

    pub fn process(&mut self, input: &[Complex<f32>]) -> Vec<Complex<f32>> {
        let mut out = Vec::with_capacity(input.len());
        for &x in input {
            let y = x - self.prev_x + self.pole * self.prev_y;
            out.push(y);
            self.prev_x = x;
            self.prev_y = y;
        }
        out
    }
}

impl Default for DcBlocker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_constant_dc_offset() {
        let mut blocker = DcBlocker::new();
        let input = vec![Complex::new(1.0, 0.5); 200];
        let mut last = Complex::new(0.0, 0.0);
        for &x in &input {
            last = blocker.process(&[x])[0];
        }
        assert!(last.norm() < 0.05);
    }

    #[test]
    fn passes_ac_component() {
        let mut blocker = DcBlocker::new();
        let input: Vec<Complex<f32>> = (0..64)
            .map(|n| Complex::new(if n % 2 == 0 { 1.0 } else { -1.0 }, 0.0))
            .collect();
        let out = blocker.process(&input);
        assert!(out.last().unwrap().re.abs() > 0.5);
    }
}
