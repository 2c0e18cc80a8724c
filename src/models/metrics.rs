// Regression metrics shared by the built-in strategies

use ndarray::{Array1, ArrayView1};

use crate::jobs::Metrics;

/// mse, rmse, mae and r2 for one split, keys prefixed with `prefix_`
pub fn regression_metrics(prefix: &str, y_true: ArrayView1<f64>, y_pred: &Array1<f64>) -> Metrics {
    let n = y_true.len().max(1) as f64;
    let residuals = &y_true - y_pred;

    let mse = residuals.mapv(|r| r * r).sum() / n;
    let mae = residuals.mapv(f64::abs).sum() / n;

    let mean = y_true.mean().unwrap_or(0.0);
    let total: f64 = y_true.iter().map(|y| (y - mean).powi(2)).sum();
    let r2 = if total > 0.0 {
        1.0 - residuals.mapv(|r| r * r).sum() / total
    } else {
        0.0
    };

    Metrics::from([
        (format!("{prefix}_mse"), mse),
        (format!("{prefix}_rmse"), mse.sqrt()),
        (format!("{prefix}_mae"), mae),
        (format!("{prefix}_r2"), r2),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_perfect_prediction() {
        let y = array![1.0, 2.0, 3.0];
        let m = regression_metrics("val", y.view(), &y.clone());
        assert_eq!(m["val_mse"], 0.0);
        assert_eq!(m["val_mae"], 0.0);
        assert!((m["val_r2"] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_known_errors() {
        let y = array![0.0, 0.0, 0.0, 0.0];
        let pred = array![1.0, -1.0, 1.0, -1.0];
        let m = regression_metrics("train", y.view(), &pred);
        assert_eq!(m["train_mse"], 1.0);
        assert_eq!(m["train_rmse"], 1.0);
        assert_eq!(m["train_mae"], 1.0);
        // constant target has no variance
        assert_eq!(m["train_r2"], 0.0);
    }
}
