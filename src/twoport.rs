//! 2×2 complex matrices for two-port wave and scattering parameters.
//!
//! Trace data comes off the instrument as four receiver/source combinations
//! per wave kind; [`TwoPort`] holds one frequency point of those as a matrix
//! indexed `(receiver, source port)`. Switch-term corrected S-parameters are
//! `S = B · A⁻¹` per frequency point.

use num_complex::Complex64;

/// A 2×2 complex matrix, indexed `(rx, tx)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TwoPort([[Complex64; 2]; 2]);

impl TwoPort {
    /// Build from rows: `m[rx][tx]`.
    pub fn new(m: [[Complex64; 2]; 2]) -> Self {
        Self(m)
    }

    /// The all-zero matrix.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Element at `(rx, tx)`; both indices must be 0 or 1.
    pub fn get(&self, rx: usize, tx: usize) -> Complex64 {
        self.0[rx][tx]
    }

    pub fn determinant(&self) -> Complex64 {
        self.0[0][0] * self.0[1][1] - self.0[0][1] * self.0[1][0]
    }

    /// Matrix inverse, or `None` when the determinant is zero.
    pub fn inverse(&self) -> Option<TwoPort> {
        let det = self.determinant();
        if det.norm_sqr() == 0.0 {
            return None;
        }
        Some(Self([
            [self.0[1][1] / det, -self.0[0][1] / det],
            [-self.0[1][0] / det, self.0[0][0] / det],
        ]))
    }

    /// Matrix product `self · rhs`.
    pub fn mul(&self, rhs: &TwoPort) -> TwoPort {
        let mut out = [[Complex64::default(); 2]; 2];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = self.0[i][0] * rhs.0[0][j] + self.0[i][1] * rhs.0[1][j];
            }
        }
        Self(out)
    }

    /// Element-wise mean over a set of matrices, `None` for an empty set.
    pub fn mean(items: &[TwoPort]) -> Option<TwoPort> {
        if items.is_empty() {
            return None;
        }
        let mut sum = [[Complex64::default(); 2]; 2];
        for m in items {
            for (i, row) in sum.iter_mut().enumerate() {
                for (j, cell) in row.iter_mut().enumerate() {
                    *cell += m.0[i][j];
                }
            }
        }
        let n = items.len() as f64;
        for row in sum.iter_mut() {
            for cell in row.iter_mut() {
                *cell /= n;
            }
        }
        Some(Self(sum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn identity_inverse_is_identity() {
        let eye = TwoPort::new([[c(1.0, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(1.0, 0.0)]]);
        let inv = eye.inverse().unwrap();
        assert_eq!(inv, eye);
    }

    #[test]
    fn inverse_times_matrix_is_identity() {
        let m = TwoPort::new([[c(1.0, 2.0), c(0.5, -0.25)], [c(-1.0, 0.0), c(3.0, 1.0)]]);
        let prod = m.mul(&m.inverse().unwrap());
        for rx in 0..2 {
            for tx in 0..2 {
                let expected = if rx == tx { 1.0 } else { 0.0 };
                let v = prod.get(rx, tx);
                assert!((v.re - expected).abs() < 1e-12, "({rx},{tx}) re = {}", v.re);
                assert!(v.im.abs() < 1e-12, "({rx},{tx}) im = {}", v.im);
            }
        }
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        let m = TwoPort::new([[c(1.0, 0.0), c(2.0, 0.0)], [c(2.0, 0.0), c(4.0, 0.0)]]);
        assert!(m.inverse().is_none());
    }

    #[test]
    fn mean_averages_elementwise() {
        let a = TwoPort::new([[c(1.0, 0.0), c(0.0, 2.0)], [c(3.0, 0.0), c(0.0, 0.0)]]);
        let b = TwoPort::new([[c(3.0, 0.0), c(0.0, 4.0)], [c(5.0, 0.0), c(0.0, 0.0)]]);
        let mean = TwoPort::mean(&[a, b]).unwrap();
        assert_eq!(mean.get(0, 0), c(2.0, 0.0));
        assert_eq!(mean.get(0, 1), c(0.0, 3.0));
        assert_eq!(mean.get(1, 0), c(4.0, 0.0));
    }

    #[test]
    fn mean_of_empty_set_is_none() {
        assert!(TwoPort::mean(&[]).is_none());
    }
}
