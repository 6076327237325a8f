//! L2-regularized logistic regression.
//!
//! Minimizes  ½‖w‖² + C · Σ logloss(y, σ(w·x + b))  with damped Newton
//! steps. The intercept is not penalized.

use crate::{
    error::{RiskError, RiskResult},
    types::{Label, Matrix},
};
use serde::{Deserialize, Serialize};

const MAX_ITER: usize = 100;
const TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticParams {
    /// Inverse regularization strength.
    pub c: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub coefficients: Vec<f64>,
    pub intercept:    f64,
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// log(1 + e^z) without overflow.
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

/// Parameter layout: [w_0 .. w_{d-1}, b].
fn objective(theta: &[f64], x: &Matrix, y: &[Label], c: f64) -> f64 {
    let d = theta.len() - 1;
    let penalty: f64 = theta[..d].iter().map(|w| w * w).sum::<f64>() * 0.5;
    let loss: f64 = x
        .iter()
        .zip(y)
        .map(|(row, &label)| {
            let z = linear(theta, row);
            // -[y log σ(z) + (1-y) log(1-σ(z))] = softplus(z) - y z
            softplus(z) - f64::from(label) * z
        })
        .sum();
    penalty + c * loss
}

fn linear(theta: &[f64], row: &[f64]) -> f64 {
    let d = theta.len() - 1;
    row.iter().zip(&theta[..d]).map(|(x, w)| x * w).sum::<f64>() + theta[d]
}

/// Solve A·v = b by Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut v = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * v[k]).sum();
        v[row] = (b[row] - tail) / a[row][row];
    }
    Some(v)
}

impl LogisticRegression {
    pub fn fit(params: &LogisticParams, x: &Matrix, y: &[Label]) -> RiskResult<Self> {
        let d = x.first().map(Vec::len).ok_or_else(|| RiskError::training("empty training matrix"))?;
        let c = params.c;
        let p = d + 1;
        let mut theta = vec![0.0; p];
        let mut current = objective(&theta, x, y, c);

        for iter in 0..MAX_ITER {
            // Gradient and Hessian of the objective.
            let mut grad = vec![0.0; p];
            let mut hess = vec![vec![0.0; p]; p];
            for j in 0..d {
                grad[j] = theta[j];
                hess[j][j] = 1.0;
            }
            for (row, &label) in x.iter().zip(y) {
                let mu = sigmoid(linear(&theta, row));
                let r = c * (mu - f64::from(label));
                let s = c * mu * (1.0 - mu);
                for a in 0..p {
                    let xa = if a < d { row[a] } else { 1.0 };
                    grad[a] += r * xa;
                    for b in 0..=a {
                        let xb = if b < d { row[b] } else { 1.0 };
                        hess[a][b] += s * xa * xb;
                    }
                }
            }
            for a in 0..p {
                for b in 0..a {
                    hess[b][a] = hess[a][b];
                }
            }
            // Keep the intercept block invertible when every μ saturates.
            hess[d][d] += 1e-10;

            let step = solve(hess, grad.clone()).ok_or_else(|| {
                RiskError::training("logistic regression: singular Hessian")
            })?;

            // Backtracking keeps every accepted step a descent step.
            let mut t = 1.0;
            let mut accepted = false;
            for _ in 0..30 {
                let candidate: Vec<f64> = theta.iter().zip(&step).map(|(th, s)| th - t * s).collect();
                let value = objective(&candidate, x, y, c);
                if value <= current {
                    theta = candidate;
                    current = value;
                    accepted = true;
                    break;
                }
                t *= 0.5;
            }

            let max_step = step.iter().map(|s| (t * s).abs()).fold(0.0, f64::max);
            if !accepted || max_step < TOLERANCE {
                log::debug!("logistic regression converged after {} iterations", iter + 1);
                break;
            }
        }

        if theta.iter().any(|v| !v.is_finite()) {
            return Err(RiskError::training("logistic regression diverged"));
        }
        Ok(Self {
            coefficients: theta[..d].to_vec(),
            intercept: theta[d],
        })
    }

    pub fn predict_proba_row(&self, row: &[f64]) -> f64 {
        let z: f64 = row.iter().zip(&self.coefficients).map(|(x, w)| x * w).sum::<f64>()
            + self.intercept;
        sigmoid(z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solve_recovers_known_system() {
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let v = solve(a, vec![3.0, 5.0]).unwrap();
        assert!((v[0] - 0.8).abs() < 1e-12);
        assert!((v[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn learns_a_positive_slope() {
        let x: Matrix = (0..20).map(|i| vec![i as f64 / 10.0 - 1.0]).collect();
        let y: Vec<Label> = (0..20).map(|i| u8::from(i >= 10)).collect();
        let model = LogisticRegression::fit(&LogisticParams { c: 1.0 }, &x, &y).unwrap();
        assert!(model.coefficients[0] > 0.0);
        assert!(model.predict_proba_row(&[0.9]) > 0.5);
        assert!(model.predict_proba_row(&[-0.9]) < 0.5);
    }

    #[test]
    fn stronger_regularization_shrinks_weights() {
        let x: Matrix = (0..20).map(|i| vec![i as f64 / 10.0 - 1.0]).collect();
        let y: Vec<Label> = (0..20).map(|i| u8::from(i >= 8)).collect();
        let weak = LogisticRegression::fit(&LogisticParams { c: 10.0 }, &x, &y).unwrap();
        let strong = LogisticRegression::fit(&LogisticParams { c: 0.01 }, &x, &y).unwrap();
        assert!(strong.coefficients[0].abs() < weak.coefficients[0].abs());
    }

    #[test]
    fn gradient_vanishes_at_the_optimum() {
        let x: Matrix = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0], vec![1.5]];
        let y: Vec<Label> = vec![0, 0, 1, 1, 0];
        let c = 1.0;
        let m = LogisticRegression::fit(&LogisticParams { c }, &x, &y).unwrap();
        let mut g_w = m.coefficients[0];
        let mut g_b = 0.0;
        for (row, &label) in x.iter().zip(&y) {
            let r = c * (m.predict_proba_row(row) - f64::from(label));
            g_w += r * row[0];
            g_b += r;
        }
        assert!(g_w.abs() < 1e-6, "g_w={g_w}");
        assert!(g_b.abs() < 1e-6, "g_b={g_b}");
    }
}
