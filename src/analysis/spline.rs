//! Natural cubic spline interpolation.
//!
//! Second derivatives are zero at both end knots. Two knots degenerate to a straight
//! line.

use super::Point;
use crate::error::{AppResult, DaqError};

/// Piecewise cubic through a set of knots with strictly increasing `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct CubicSpline {
    knots: Vec<f64>,
    segments: Vec<[f64; 4]>,
}

impl CubicSpline {
    /// Fit a natural cubic spline through `points`.
    pub fn natural(points: &[Point]) -> AppResult<Self> {
        if points.len() < 2 {
            return Err(input_error(format!(
                "need at least 2 knots, got {}",
                points.len()
            )));
        }
        if let Some(pair) = points.windows(2).find(|w| !(w[1].x > w[0].x)) {
            return Err(input_error(format!(
                "x values must be strictly increasing ({} then {})",
                pair[0].x, pair[1].x
            )));
        }

        let x: Vec<f64> = points.iter().map(|p| p.x).collect();
        let y: Vec<f64> = points.iter().map(|p| p.y).collect();
        let n = x.len() - 1;

        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();

        // Forward sweep of the tridiagonal system for the quadratic coefficients
        let mut mu = vec![0.0; n + 1];
        let mut z = vec![0.0; n + 1];
        for i in 1..n {
            let g = 2.0 * (x[i + 1] - x[i - 1]) - h[i - 1] * mu[i - 1];
            mu[i] = h[i] / g;
            z[i] = (3.0
                * (y[i + 1] * h[i - 1] - y[i] * (x[i + 1] - x[i - 1]) + y[i - 1] * h[i])
                / (h[i - 1] * h[i])
                - h[i - 1] * z[i - 1])
                / g;
        }

        let mut c = vec![0.0; n + 1];
        let mut segments = vec![[0.0; 4]; n];
        for j in (0..n).rev() {
            c[j] = z[j] - mu[j] * c[j + 1];
            let b = (y[j + 1] - y[j]) / h[j] - h[j] * (c[j + 1] + 2.0 * c[j]) / 3.0;
            let d = (c[j + 1] - c[j]) / (3.0 * h[j]);
            segments[j] = [y[j], b, c[j], d];
        }

        Ok(Self { knots: x, segments })
    }

    /// First and last knot.
    pub fn domain(&self) -> (f64, f64) {
        let first = self.knots.first().copied().unwrap_or_default();
        let last = self.knots.last().copied().unwrap_or_default();
        (first, last)
    }

    /// Value at `x`. Outside the knot range the end segments are extended.
    pub fn evaluate(&self, x: f64) -> f64 {
        let segment = self
            .knots
            .partition_point(|k| *k <= x)
            .saturating_sub(1)
            .min(self.segments.len() - 1);
        let [a, b, c, d] = self.segments[segment];
        let t = x - self.knots[segment];
        a + t * (b + t * (c + t * d))
    }

    /// Sample from the first to the last knot inclusive at `step`.
    ///
    /// Sample `i` sits at `first + i · step`. The last knot is always the final sample,
    /// clamped onto it or appended when `step` does not divide the span.
    pub fn sample(&self, step: f64) -> AppResult<Vec<Point>> {
        if !step.is_finite() || step <= 0.0 {
            return Err(input_error(format!("invalid sampling step {step}")));
        }
        let (first, last) = self.domain();
        let intervals = ((last - first) / step + 1e-9).floor() as usize;

        let mut samples: Vec<Point> = (0..=intervals)
            .map(|i| {
                let x = (first + i as f64 * step).min(last);
                Point::new(x, self.evaluate(x))
            })
            .collect();

        // Step does not divide the span
        if samples.last().is_some_and(|p| p.x < last - 1e-9) {
            samples.push(Point::new(last, self.evaluate(last)));
        }
        Ok(samples)
    }
}

fn input_error(reason: String) -> DaqError {
    DaqError::PipelineInput {
        stage: "spline",
        reason,
    }
}
