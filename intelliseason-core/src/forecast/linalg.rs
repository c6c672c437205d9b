//! Small dense least-squares helpers.

use crate::error::{PipelineError, Result};

/// Solve `(XᵀX + diag(penalty)) β = Xᵀy` by Gaussian elimination with
/// partial pivoting.
pub fn ridge_least_squares(x: &[Vec<f64>], y: &[f64], penalty: &[f64]) -> Result<Vec<f64>> {
    let n = x.len();
    if n != y.len() {
        return Err(PipelineError::Numerical(format!(
            "design matrix has {n} rows but target has {}",
            y.len()
        )));
    }
    let p = penalty.len();
    if p == 0 {
        return Ok(Vec::new());
    }

    let mut a = vec![vec![0.0; p]; p];
    let mut b = vec![0.0; p];
    for (row, &target) in x.iter().zip(y) {
        if row.len() != p {
            return Err(PipelineError::Numerical(format!(
                "design row has {} columns, expected {p}",
                row.len()
            )));
        }
        for i in 0..p {
            let xi = row[i];
            if xi == 0.0 {
                continue;
            }
            b[i] += xi * target;
            for j in i..p {
                a[i][j] += xi * row[j];
            }
        }
    }
    for i in 0..p {
        for j in 0..i {
            a[i][j] = a[j][i];
        }
        a[i][i] += penalty[i];
    }

    for col in 0..p {
        let pivot_row = (col..p)
            .max_by(|&r, &s| a[r][col].abs().total_cmp(&a[s][col].abs()))
            .unwrap_or(col);
        if a[pivot_row][col].abs() < 1e-12 {
            return Err(PipelineError::Numerical(
                "normal equations are singular".to_string(),
            ));
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for r in (col + 1)..p {
            let factor = a[r][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for c in col..p {
                a[r][c] -= factor * a[col][c];
            }
            b[r] -= factor * b[col];
        }
    }

    let mut beta = vec![0.0; p];
    for i in (0..p).rev() {
        let tail: f64 = ((i + 1)..p).map(|j| a[i][j] * beta[j]).sum();
        beta[i] = (b[i] - tail) / a[i][i];
    }

    if beta.iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::Numerical(
            "least-squares solution is not finite".to_string(),
        ));
    }
    Ok(beta)
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Root mean square.
pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
    }
}

/// Standard normal quantile for a central interval of the given width,
/// e.g. 0.95 → 1.96.
pub fn z_for_interval(width: f64) -> f64 {
    let width = width.clamp(0.0, 1.0 - 1e-12);
    distrs::Normal::ppf(0.5 + width / 2.0, 0.0, 1.0).max(0.0)
}
