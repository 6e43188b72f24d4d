//! Ordinary least-squares line fit.

use crate::error::{AppResult, DaqError};

/// Fitted line `y = intercept + slope · x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    /// Value at `x = 0`
    pub intercept: f64,
    /// Change in `y` per unit `x`
    pub slope: f64,
}

impl LinearFit {
    /// Fit `ys` against their 0-based indices.
    pub fn fit_indexed(ys: &[f64]) -> AppResult<Self> {
        let xs: Vec<f64> = (0..ys.len()).map(|i| i as f64).collect();
        Self::fit(&xs, ys)
    }

    /// Least-squares fit through `(xs[i], ys[i])`.
    ///
    /// Needs at least two points and two distinct `x` values.
    pub fn fit(xs: &[f64], ys: &[f64]) -> AppResult<Self> {
        if xs.len() != ys.len() {
            return Err(input_error(format!(
                "{} x values for {} y values",
                xs.len(),
                ys.len()
            )));
        }
        if xs.len() < 2 {
            return Err(input_error(format!(
                "need at least 2 points, got {}",
                xs.len()
            )));
        }

        let n = xs.len() as f64;
        let mean_x = xs.iter().sum::<f64>() / n;
        let mean_y = ys.iter().sum::<f64>() / n;

        let (sxx, sxy) = xs
            .iter()
            .zip(ys)
            .fold((0.0, 0.0), |(sxx, sxy), (x, y)| {
                let dx = x - mean_x;
                (sxx + dx * dx, sxy + dx * (y - mean_y))
            });

        if sxx == 0.0 {
            return Err(input_error("all x values are equal".to_string()));
        }

        let slope = sxy / sxx;
        Ok(Self {
            intercept: mean_y - slope * mean_x,
            slope,
        })
    }

    /// Value of the line at `x`.
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

fn input_error(reason: String) -> DaqError {
    DaqError::PipelineInput {
        stage: "regression",
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_exact_line() {
        let ys: Vec<f64> = (0..20).map(|i| 3.0 + 2.0 * i as f64).collect();
        let fit = LinearFit::fit_indexed(&ys).unwrap();
        assert!((fit.intercept - 3.0).abs() < 1e-9);
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.predict(19.0) - 41.0).abs() < 1e-9);
    }

    #[test]
    fn constant_series_has_zero_slope() {
        let fit = LinearFit::fit_indexed(&[4.0; 20]).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.intercept, 4.0);
    }

    #[test]
    fn alternating_noise_fit() {
        // 1, 0, 3, 2
        let ys: Vec<f64> = (0..4)
            .map(|i| i as f64 + if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        let fit = LinearFit::fit_indexed(&ys).unwrap();
        assert!((fit.slope - 0.6).abs() < 1e-12);
        assert!((fit.intercept - 0.6).abs() < 1e-12);
    }

    #[test]
    fn too_few_points_rejected() {
        assert!(matches!(
            LinearFit::fit_indexed(&[1.0]),
            Err(DaqError::PipelineInput { stage: "regression", .. })
        ));
        assert!(LinearFit::fit(&[2.0, 2.0], &[1.0, 3.0]).is_err());
        assert!(LinearFit::fit(&[1.0, 2.0], &[1.0]).is_err());
    }
}
