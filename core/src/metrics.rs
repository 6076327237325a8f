//! Binary classification metrics.

use crate::{
    error::{RiskError, RiskResult},
    types::Label,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub accuracy:  f64,
    pub precision: f64,
    pub recall:    f64,
    pub f1:        f64,
    pub roc_auc:   f64,
}

impl EvaluationMetrics {
    pub fn compute(y_true: &[Label], y_pred: &[Label], y_score: &[f64]) -> RiskResult<Self> {
        if y_true.len() != y_pred.len() || y_true.len() != y_score.len() {
            return Err(RiskError::training("metric inputs differ in length"));
        }
        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut fn_ = 0usize;
        let mut correct = 0usize;
        for (&t, &p) in y_true.iter().zip(y_pred) {
            match (t, p) {
                (1, 1) => tp += 1,
                (0, 1) => fp += 1,
                (1, 0) => fn_ += 1,
                _ => {}
            }
            if t == p {
                correct += 1;
            }
        }

        // Undefined ratios score 0, matching the usual zero_division convention.
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };

        Ok(Self {
            accuracy: ratio(correct, y_true.len()),
            precision,
            recall,
            f1,
            roc_auc: roc_auc(y_true, y_score)?,
        })
    }
}

impl std::fmt::Display for EvaluationMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "accuracy={:.4} precision={:.4} recall={:.4} f1={:.4} roc_auc={:.4}",
            self.accuracy, self.precision, self.recall, self.f1, self.roc_auc
        )
    }
}

/// Area under the ROC curve via the rank-sum statistic (ties averaged).
/// Undefined, and an error, when only one class is present.
pub fn roc_auc(y_true: &[Label], y_score: &[f64]) -> RiskResult<f64> {
    let n = y_true.len();
    let positives = y_true.iter().filter(|&&v| v == 1).count();
    let negatives = n - positives;
    if positives == 0 || negatives == 0 {
        return Err(RiskError::training("ROC-AUC is undefined with a single class"));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| y_score[a].total_cmp(&y_score[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && y_score[order[j + 1]] == y_score[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; tied block i..=j shares the mean rank.
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            if y_true[k] == 1 {
                rank_sum += mean_rank;
            }
        }
        i = j + 1;
    }

    let p = positives as f64;
    Ok((rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_ranking_scores_one() {
        let auc = roc_auc(&[0, 0, 1, 1], &[0.1, 0.2, 0.8, 0.9]).unwrap();
        assert_eq!(auc, 1.0);
    }

    #[test]
    fn ties_count_half() {
        let auc = roc_auc(&[0, 1], &[0.5, 0.5]).unwrap();
        assert_eq!(auc, 0.5);
    }

    #[test]
    fn known_auc() {
        // Pairs (pos, neg): (0.35 vs 0.1 ✓, 0.35 vs 0.4 ✗, 0.8 ✓ ✓) → 3/4
        let auc = roc_auc(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]).unwrap();
        assert!((auc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn single_class_is_an_error() {
        assert!(roc_auc(&[1, 1], &[0.2, 0.3]).is_err());
    }

    #[test]
    fn zero_division_scores_zero() {
        let m = EvaluationMetrics::compute(&[0, 1, 0], &[0, 0, 0], &[0.1, 0.4, 0.2]).unwrap();
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.f1, 0.0);
        assert!((m.accuracy - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(m.roc_auc, 1.0);
    }
}
