// src/detection/savgol.rs - Savitzky-Golay smoothing
use nalgebra::{DMatrix, RowDVector};

use crate::error::DetectionError;

/// Least-squares polynomial smoother over a sliding window.
///
/// Interior frames are fitted with the window centred on them (for even
/// windows the extra frame falls after the centre). The first and last
/// `window / 2` frames reuse the fit of the first/last full window, evaluated
/// at their own position, so the output always has the input's length.
pub struct SavitzkyGolay {
    window: usize,
    order: usize,
    // weights[t] evaluates the window's fitted polynomial at offset t
    weights: Vec<RowDVector<f64>>,
}

impl SavitzkyGolay {
    pub fn new(window: usize, order: usize) -> Result<Self, DetectionError> {
        if window <= order {
            return Err(DetectionError::InvalidSmoothing { window, order });
        }

        // Centre and scale positions to [-1, 1] to keep the Vandermonde matrix conditioned
        let centre = (window - 1) as f64 / 2.0;
        let scale = centre.max(1.0);
        let position = |j: usize| (j as f64 - centre) / scale;

        let design = DMatrix::from_fn(window, order + 1, |j, k| position(j).powi(k as i32));
        let pinv = design
            .pseudo_inverse(1e-12)
            .map_err(|_| DetectionError::InvalidSmoothing { window, order })?;

        let weights = (0..window)
            .map(|t| {
                let x = position(t);
                let basis = RowDVector::from_fn(order + 1, |_, k| x.powi(k as i32));
                basis * &pinv
            })
            .collect();

        Ok(Self {
            window,
            order,
            weights,
        })
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Smoothed copy of `values`, or `None` when the series is not longer than the window.
    pub fn smooth(&self, values: &[f64]) -> Option<Vec<f64>> {
        let n = values.len();
        if n <= self.window {
            return None;
        }

        let half = (self.window - 1) / 2;
        let smoothed: Vec<f64> = (0..n)
            .map(|i| {
                let start = i.saturating_sub(half).min(n - self.window);
                let w = &self.weights[i - start];
                values[start..start + self.window]
                    .iter()
                    .zip(w.iter())
                    .map(|(v, c)| v * c)
                    .sum::<f64>()
            })
            .collect();
        Some(smoothed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, eps: f64) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_polynomial_is_preserved() {
        let filter = SavitzkyGolay::new(7, 2).unwrap();
        let values: Vec<f64> = (0..30).map(|i| {
            let x = i as f64;
            0.5 * x * x - 3.0 * x + 2.0
        }).collect();
        let smoothed = filter.smooth(&values).unwrap();
        assert_eq!(smoothed.len(), values.len());
        for (s, v) in smoothed.iter().zip(values.iter()) {
            assert!(approx_eq(*s, *v, 1e-6), "{} vs {}", s, v);
        }
    }

    #[test]
    fn test_even_window_high_order_preserves_line() {
        let filter = SavitzkyGolay::new(24, 8).unwrap();
        let values: Vec<f64> = (0..100).map(|i| 40.0 + 0.25 * i as f64).collect();
        let smoothed = filter.smooth(&values).unwrap();
        for (s, v) in smoothed.iter().zip(values.iter()) {
            assert!(approx_eq(*s, *v, 1e-6), "{} vs {}", s, v);
        }
    }

    #[test]
    fn test_spike_is_flattened() {
        let filter = SavitzkyGolay::new(11, 2).unwrap();
        let mut values = vec![10.0; 60];
        values[30] = 90.0;
        let smoothed = filter.smooth(&values).unwrap();
        assert!((values[30] - smoothed[30]).abs() > 40.0);
        assert!(approx_eq(smoothed[5], 10.0, 1e-9));
    }

    #[test]
    fn test_short_series_is_rejected() {
        let filter = SavitzkyGolay::new(24, 8).unwrap();
        assert!(filter.smooth(&[1.0; 24]).is_none());
        assert!(filter.smooth(&[]).is_none());
    }

    #[test]
    fn test_order_must_be_below_window() {
        assert!(SavitzkyGolay::new(3, 3).is_err());
        assert!(SavitzkyGolay::new(4, 3).is_ok());
    }
}
