//! Classifier pipelines: standard scaler followed by one of the two
//! supported model families.

use crate::{
    error::{RiskError, RiskResult},
    forest::{ForestParams, RandomForest},
    logistic::{LogisticParams, LogisticRegression},
    rng::StageRng,
    types::{Label, Matrix},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    LogisticRegression,
    RandomForest,
}

impl ModelFamily {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LogisticRegression => "logistic_regression",
            Self::RandomForest       => "random_forest",
        }
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One point of a hyperparameter grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Hyperparams {
    LogisticRegression(LogisticParams),
    RandomForest(ForestParams),
}

impl Hyperparams {
    pub fn family(&self) -> ModelFamily {
        match self {
            Self::LogisticRegression(_) => ModelFamily::LogisticRegression,
            Self::RandomForest(_)       => ModelFamily::RandomForest,
        }
    }
}

impl std::fmt::Display for Hyperparams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LogisticRegression(p) => write!(f, "C={}", p.c),
            Self::RandomForest(p) => write!(
                f,
                "n_estimators={} max_depth={} min_samples_split={}",
                p.n_estimators,
                p.max_depth.map_or("none".to_string(), |d| d.to_string()),
                p.min_samples_split,
            ),
        }
    }
}

// ── Scaler ───────────────────────────────────────────────────────────────────

/// Per-column standardization (population variance). Zero-variance
/// columns keep scale 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean:  Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(x: &Matrix) -> RiskResult<Self> {
        let n = x.len();
        let d = x.first().map(Vec::len).ok_or_else(|| RiskError::training("empty training matrix"))?;
        let mut mean = vec![0.0; d];
        let mut scale = vec![1.0; d];
        for j in 0..d {
            mean[j] = x.iter().map(|r| r[j]).sum::<f64>() / n as f64;
            let var = x.iter().map(|r| (r[j] - mean[j]).powi(2)).sum::<f64>() / n as f64;
            if var > 0.0 {
                scale[j] = var.sqrt();
            }
        }
        Ok(Self { mean, scale })
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }

    pub fn transform(&self, x: &Matrix) -> Matrix {
        x.iter().map(|r| self.transform_row(r)).collect()
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Classifier {
    LogisticRegression(LogisticRegression),
    RandomForest(RandomForest),
}

impl Classifier {
    fn predict_proba_row(&self, row: &[f64]) -> f64 {
        match self {
            Self::LogisticRegression(m) => m.predict_proba_row(row),
            Self::RandomForest(m)       => m.predict_proba_row(row),
        }
    }
}

/// Fitted scaler + classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPipeline {
    pub params:     Hyperparams,
    pub n_features: usize,
    pub scaler:     StandardScaler,
    pub classifier: Classifier,
}

impl FittedPipeline {
    pub fn fit(
        params: &Hyperparams,
        x: &Matrix,
        y: &[Label],
        rng: &mut StageRng,
    ) -> RiskResult<Self> {
        if x.len() != y.len() {
            return Err(RiskError::training(format!(
                "{} rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        let scaler = StandardScaler::fit(x)?;
        let xs = scaler.transform(x);
        let classifier = match params {
            Hyperparams::LogisticRegression(p) => {
                Classifier::LogisticRegression(LogisticRegression::fit(p, &xs, y)?)
            }
            Hyperparams::RandomForest(p) => {
                Classifier::RandomForest(RandomForest::fit(p, &xs, y, rng)?)
            }
        };
        Ok(Self {
            params: params.clone(),
            n_features: scaler.mean.len(),
            scaler,
            classifier,
        })
    }

    pub fn family(&self) -> ModelFamily {
        self.params.family()
    }

    /// Probability of class 1 for one raw (unscaled) row.
    pub fn predict_proba_row(&self, row: &[f64]) -> RiskResult<f64> {
        if row.len() != self.n_features {
            return Err(RiskError::Prediction(format!(
                "expected {} features, got {}",
                self.n_features,
                row.len()
            )));
        }
        let p = self.classifier.predict_proba_row(&self.scaler.transform_row(row));
        if p.is_finite() {
            Ok(p.clamp(0.0, 1.0))
        } else {
            Err(RiskError::Prediction(format!("non-finite probability {p}")))
        }
    }

    pub fn predict_proba(&self, x: &Matrix) -> RiskResult<Vec<f64>> {
        x.iter().map(|r| self.predict_proba_row(r)).collect()
    }

    pub fn predict(&self, x: &Matrix) -> RiskResult<Vec<Label>> {
        Ok(self.predict_proba(x)?.into_iter().map(class_of).collect())
    }
}

/// Decision rule shared by training-time evaluation and the scorer.
pub fn class_of(probability: f64) -> Label {
    Label::from(probability > 0.5)
}
