use crate::{classifier::ModelFamily, risk_labeler::CLUSTER_COUNT};
use serde::{Deserialize, Serialize};

// ── Stage configs ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelingConfig {
    #[serde(default = "default_clusters")]
    pub n_clusters: usize,
    /// k-means restarts; the run with the lowest inertia wins.
    #[serde(default = "default_n_init")]
    pub n_init: usize,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// Convergence threshold on the total centroid shift.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            n_clusters: default_clusters(),
            n_init:     default_n_init(),
            max_iter:   default_max_iter(),
            tolerance:  default_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WoeConfig {
    #[serde(default = "default_max_prebins")]
    pub max_prebins: usize,
}

impl Default for WoeConfig {
    fn default() -> Self {
        Self { max_prebins: default_max_prebins() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticGrid {
    pub c: Vec<f64>,
}

impl Default for LogisticGrid {
    fn default() -> Self {
        Self { c: vec![0.01, 0.1, 1.0, 10.0] }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestGrid {
    pub n_estimators: Vec<usize>,
    /// `None` grows trees until leaves are pure.
    pub max_depth: Vec<Option<usize>>,
    pub min_samples_split: Vec<usize>,
}

impl Default for ForestGrid {
    fn default() -> Self {
        Self {
            n_estimators:      vec![50, 100, 200],
            max_depth:         vec![None, Some(5), Some(10)],
            min_samples_split: vec![2, 5],
        }
    }
}

/// How the champion is picked from the hold-out evaluation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ChampionPolicy {
    HighestRocAuc,
    Fixed { family: ModelFamily },
}

impl Default for ChampionPolicy {
    fn default() -> Self {
        Self::HighestRocAuc
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
    #[serde(default)]
    pub logistic_grid: LogisticGrid,
    #[serde(default)]
    pub forest_grid: ForestGrid,
    #[serde(default)]
    pub champion: ChampionPolicy,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_fraction: default_test_fraction(),
            cv_folds:      default_cv_folds(),
            logistic_grid: LogisticGrid::default(),
            forest_grid:   ForestGrid::default(),
            champion:      ChampionPolicy::default(),
        }
    }
}

/// What the label join does with customers that have no cluster label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingLabelPolicy {
    /// Drop the row and record the count.
    Exclude,
    /// Abort with a data error.
    Fail,
}

impl Default for MissingLabelPolicy {
    fn default() -> Self {
        Self::Exclude
    }
}

// ── Pipeline config ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Raw transactions CSV.
    pub input_path: String,
    /// Directory receiving the intermediate CSV artifacts.
    pub output_dir: String,
    /// SQLite file backing the model registry.
    pub registry_path: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub labeling: LabelingConfig,
    #[serde(default)]
    pub woe: WoeConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub missing_labels: MissingLabelPolicy,
}

impl PipelineConfig {
    /// Load from a JSON file.
    /// In tests, use PipelineConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.labeling.n_clusters != CLUSTER_COUNT {
            anyhow::bail!("labeling.n_clusters must be {CLUSTER_COUNT}");
        }
        if self.labeling.n_init == 0 {
            anyhow::bail!("labeling.n_init must be >= 1");
        }
        if !(self.training.test_fraction > 0.0 && self.training.test_fraction < 1.0) {
            anyhow::bail!("training.test_fraction must be in (0, 1)");
        }
        if self.training.cv_folds < 2 {
            anyhow::bail!("training.cv_folds must be >= 2");
        }
        if self.training.logistic_grid.c.iter().any(|c| *c <= 0.0) {
            anyhow::bail!("training.logistic_grid.c values must be > 0");
        }
        if self.woe.max_prebins < 2 {
            anyhow::bail!("woe.max_prebins must be >= 2");
        }
        Ok(())
    }

    /// Small, fast configuration for tests. Paths point nowhere until
    /// the test fills them in.
    pub fn default_test() -> Self {
        Self {
            input_path:     String::new(),
            output_dir:     String::new(),
            registry_path:  ":memory:".into(),
            model_name:     "CreditRiskModel-test".into(),
            seed:           42,
            labeling:       LabelingConfig { n_init: 4, ..LabelingConfig::default() },
            woe:            WoeConfig { max_prebins: 10 },
            training: TrainingConfig {
                logistic_grid: LogisticGrid { c: vec![0.1, 1.0] },
                forest_grid: ForestGrid {
                    n_estimators:      vec![10, 25],
                    max_depth:         vec![None, Some(3)],
                    min_samples_split: vec![2],
                },
                ..TrainingConfig::default()
            },
            missing_labels: MissingLabelPolicy::Exclude,
        }
    }
}

fn default_clusters() -> usize { CLUSTER_COUNT }
fn default_n_init() -> usize { 10 }
fn default_max_iter() -> usize { 300 }
fn default_tolerance() -> f64 { 1e-4 }
fn default_max_prebins() -> usize { 20 }
fn default_test_fraction() -> f64 { 0.2 }
fn default_cv_folds() -> usize { 3 }
fn default_model_name() -> String { "CreditRiskModel".into() }
fn default_seed() -> u64 { 42 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_fills_defaults() {
        let json = r#"{
            "input_path": "data/data.csv",
            "output_dir": "data/processed",
            "registry_path": "registry.db"
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.model_name, "CreditRiskModel");
        assert_eq!(config.labeling.n_clusters, 3);
        assert_eq!(config.training.cv_folds, 3);
        assert_eq!(config.training.forest_grid.n_estimators, vec![50, 100, 200]);
        assert_eq!(config.training.champion, ChampionPolicy::HighestRocAuc);
        assert_eq!(config.missing_labels, MissingLabelPolicy::Exclude);
        config.validate().unwrap();
    }

    #[test]
    fn cluster_count_other_than_three_is_rejected() {
        let mut config = PipelineConfig::default_test();
        config.labeling.n_clusters = 4;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("n_clusters"), "{err}");

        config.labeling.n_clusters = 3;
        config.training.cv_folds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn paths_have_no_defaults() {
        let json = r#"{ "output_dir": "out", "registry_path": "r.db" }"#;
        assert!(serde_json::from_str::<PipelineConfig>(json).is_err());
    }

    #[test]
    fn fixed_champion_policy_parses() {
        let json = r#"{ "policy": "fixed", "family": "random_forest" }"#;
        let policy: ChampionPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy, ChampionPolicy::Fixed { family: ModelFamily::RandomForest });
    }
}
