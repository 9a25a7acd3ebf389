//! Forecast metrics
//!
//! Predictions and ground truth are `(samples, nodes, horizon)` arrays in raw
//! sensor units.

use ndarray::{s, ArrayView3, Zip};
use std::fmt;

/// Mean Absolute Error
pub fn mae(y_true: &ArrayView3<f32>, y_pred: &ArrayView3<f32>) -> f64 {
    let n = y_true.len();
    if n == 0 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    Zip::from(y_true).and(y_pred).for_each(|&t, &p| {
        sum += (t as f64 - p as f64).abs();
    });
    sum / n as f64
}

/// Root Mean Squared Error
pub fn rmse(y_true: &ArrayView3<f32>, y_pred: &ArrayView3<f32>) -> f64 {
    let n = y_true.len();
    if n == 0 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    Zip::from(y_true).and(y_pred).for_each(|&t, &p| {
        let d = t as f64 - p as f64;
        sum += d * d;
    });
    (sum / n as f64).sqrt()
}

/// Mean Absolute Percentage Error over non-zero targets, in percent
///
/// Sensors report zero while offline, so those readings are masked out.
pub fn masked_mape(y_true: &ArrayView3<f32>, y_pred: &ArrayView3<f32>) -> f64 {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    Zip::from(y_true).and(y_pred).for_each(|&t, &p| {
        if t != 0.0 {
            sum += ((t as f64 - p as f64) / t as f64).abs();
            count += 1;
        }
    });
    if count == 0 {
        0.0
    } else {
        sum / count as f64 * 100.0
    }
}

/// MAE / RMSE / MAPE triple
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ForecastMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub mape: f64,
}

impl ForecastMetrics {
    /// Metrics over every node and horizon step
    pub fn compute(y_true: &ArrayView3<f32>, y_pred: &ArrayView3<f32>) -> Self {
        Self {
            mae: mae(y_true, y_pred),
            rmse: rmse(y_true, y_pred),
            mape: masked_mape(y_true, y_pred),
        }
    }

    /// Metrics for the first `1..=horizon` prediction steps
    ///
    /// Entry `i` covers steps `0..=i`, so the last entry equals
    /// [`ForecastMetrics::compute`].
    pub fn per_horizon(y_true: &ArrayView3<f32>, y_pred: &ArrayView3<f32>) -> Vec<Self> {
        let horizon = y_true.dim().2;
        (0..horizon)
            .map(|i| {
                let t = y_true.slice(s![.., .., 0..=i]);
                let p = y_pred.slice(s![.., .., 0..=i]);
                Self::compute(&t, &p)
            })
            .collect()
    }
}

impl fmt::Display for ForecastMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MAE: {:.4} | RMSE: {:.4} | MAPE: {:.4}%",
            self.mae, self.rmse, self.mape
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    fn pair() -> (Array3<f32>, Array3<f32>) {
        let t = Array3::from_shape_vec((1, 2, 2), vec![10.0, 20.0, 0.0, 40.0]).unwrap();
        let p = Array3::from_shape_vec((1, 2, 2), vec![12.0, 18.0, 5.0, 40.0]).unwrap();
        (t, p)
    }

    #[test]
    fn test_mae_rmse() {
        let (t, p) = pair();
        assert_abs_diff_eq!(mae(&t.view(), &p.view()), 9.0 / 4.0, epsilon = 1e-9);
        assert_abs_diff_eq!(
            rmse(&t.view(), &p.view()),
            (33.0f64 / 4.0).sqrt(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_mape_ignores_zero_targets() {
        let (t, p) = pair();
        // |2/10| + |2/20| + 0 over three non-zero targets
        assert_abs_diff_eq!(masked_mape(&t.view(), &p.view()), 10.0, epsilon = 1e-6);
    }

    #[test]
    fn test_per_horizon_last_equals_overall() {
        let (t, p) = pair();
        let steps = ForecastMetrics::per_horizon(&t.view(), &p.view());
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1], ForecastMetrics::compute(&t.view(), &p.view()));
        assert_abs_diff_eq!(steps[0].mae, 3.5, epsilon = 1e-9);
    }

    #[test]
    fn test_empty_input() {
        let t = Array3::<f32>::zeros((0, 3, 2));
        assert_eq!(mae(&t.view(), &t.view()), 0.0);
        assert_eq!(masked_mape(&t.view(), &t.view()), 0.0);
    }
}
