//! Model training: stratified split, per-family grid search with
//! stratified k-fold CV on ROC-AUC, hold-out evaluation, champion pick.
//!
//! RULE: every fold must see both classes on both sides. A fold that
//! does not is a TrainingError, never a silently skipped score.

use crate::{
    classifier::{FittedPipeline, Hyperparams, ModelFamily},
    config::{ChampionPolicy, TrainingConfig},
    error::{RiskError, RiskResult},
    forest::ForestParams,
    logistic::LogisticParams,
    metrics::{roc_auc, EvaluationMetrics},
    registry::{ModelArtifact, ModelRegistry},
    rng::{RngBank, StageRng, StageSlot},
    types::{Label, Matrix, RunId},
    woe_transformer::{WoeEncoder, WoeTable},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TrainingData {
    pub feature_names: Vec<String>,
    pub x:             Matrix,
    pub y:             Vec<Label>,
}

impl TrainingData {
    pub fn from_woe(table: &WoeTable, y: &[Label]) -> RiskResult<Self> {
        if table.n_rows() != y.len() {
            return Err(RiskError::data(format!(
                "WOE table has {} rows but label has {}",
                table.n_rows(),
                y.len()
            )));
        }
        Ok(Self {
            feature_names: table.names.clone(),
            x: table.to_matrix(),
            y: y.to_vec(),
        })
    }

    fn subset(&self, idx: &[usize]) -> (Matrix, Vec<Label>) {
        (
            idx.iter().map(|&i| self.x[i].clone()).collect(),
            idx.iter().map(|&i| self.y[i]).collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub test:  Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub params:      Hyperparams,
    pub fold_scores: Vec<f64>,
    pub mean_score:  f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyEvaluation {
    pub family:      ModelFamily,
    pub best_params: Hyperparams,
    /// Mean CV ROC-AUC of the best candidate.
    pub cv_roc_auc:  f64,
    /// Hold-out metrics of the refit best candidate.
    pub metrics:     EvaluationMetrics,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub run_id:      RunId,
    pub split:       TrainTestSplit,
    pub cv_results:  BTreeMap<ModelFamily, Vec<CandidateScore>>,
    pub evaluations: Vec<FamilyEvaluation>,
    pub estimators:  BTreeMap<ModelFamily, FittedPipeline>,
    pub champion:    ModelFamily,
}

impl TrainingOutcome {
    pub fn champion_estimator(&self) -> RiskResult<&FittedPipeline> {
        self.estimators
            .get(&self.champion)
            .ok_or_else(|| RiskError::training(format!("no estimator for {}", self.champion)))
    }

    pub fn champion_evaluation(&self) -> Option<&FamilyEvaluation> {
        self.evaluations.iter().find(|e| e.family == self.champion)
    }
}

// ── Splitting ────────────────────────────────────────────────────────────────

/// Labels must be 0 or 1.
fn check_binary(y: &[Label]) -> RiskResult<()> {
    match y.iter().find(|&&l| l > 1) {
        Some(bad) => Err(RiskError::training(format!("label value {bad} is not binary"))),
        None => Ok(()),
    }
}

fn class_indices(
    y: &[Label],
    positions: impl Iterator<Item = usize>,
) -> RiskResult<[Vec<usize>; 2]> {
    let mut by_class = [Vec::new(), Vec::new()];
    for i in positions {
        match by_class.get_mut(usize::from(y[i])) {
            Some(members) => members.push(i),
            None => {
                return Err(RiskError::training(format!("label value {} is not binary", y[i])))
            }
        }
    }
    Ok(by_class)
}

/// Stratified train/test split. Indices come back sorted.
pub fn stratified_split(
    y: &[Label],
    test_fraction: f64,
    rng: &mut StageRng,
) -> RiskResult<TrainTestSplit> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(RiskError::training(format!("test fraction {test_fraction} is outside (0, 1)")));
    }
    let mut train = Vec::new();
    let mut test = Vec::new();
    for (class, mut members) in class_indices(y, 0..y.len())?.into_iter().enumerate() {
        let n = members.len();
        let n_test = (n as f64 * test_fraction).round() as usize;
        if n_test == 0 || n_test >= n {
            return Err(RiskError::training(format!(
                "class {class} has {n} members; cannot stratify a {test_fraction} test split"
            )));
        }
        rng.shuffle(&mut members);
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok(TrainTestSplit { train, test })
}

/// Stratified k-fold over `rows`: returns the validation rows of each fold.
pub fn stratified_folds(
    y: &[Label],
    rows: &[usize],
    k: usize,
    rng: &mut StageRng,
) -> RiskResult<Vec<Vec<usize>>> {
    if k < 2 {
        return Err(RiskError::training(format!("{k}-fold CV needs at least 2 folds")));
    }
    let mut folds = vec![Vec::new(); k];
    for (class, mut members) in class_indices(y, rows.iter().copied())?.into_iter().enumerate() {
        if members.len() < k {
            return Err(RiskError::training(format!(
                "class {class} has {} training members; {k}-fold CV needs at least {k}",
                members.len()
            )));
        }
        rng.shuffle(&mut members);
        for (pos, row) in members.into_iter().enumerate() {
            folds[pos % k].push(row);
        }
    }

    for (f, fold) in folds.iter_mut().enumerate() {
        fold.sort_unstable();
        let val_pos = fold.iter().filter(|&&i| y[i] == 1).count();
        let train_pos = rows.iter().filter(|&&i| y[i] == 1).count() - val_pos;
        let train_len = rows.len() - fold.len();
        let single_val = val_pos == 0 || val_pos == fold.len();
        let single_train = train_pos == 0 || train_pos == train_len;
        if single_val || single_train {
            return Err(RiskError::training(format!("fold {f} contains a single class")));
        }
    }
    Ok(folds)
}

// ── Grids ────────────────────────────────────────────────────────────────────

pub fn parameter_grid(config: &TrainingConfig, family: ModelFamily) -> Vec<Hyperparams> {
    match family {
        ModelFamily::LogisticRegression => config
            .logistic_grid
            .c
            .iter()
            .map(|&c| Hyperparams::LogisticRegression(LogisticParams { c }))
            .collect(),
        ModelFamily::RandomForest => {
            let g = &config.forest_grid;
            let mut out = Vec::new();
            for &n_estimators in &g.n_estimators {
                for &max_depth in &g.max_depth {
                    for &min_samples_split in &g.min_samples_split {
                        out.push(Hyperparams::RandomForest(ForestParams {
                            n_estimators,
                            max_depth,
                            min_samples_split,
                        }));
                    }
                }
            }
            out
        }
    }
}

// ── Champion policy ──────────────────────────────────────────────────────────

/// Pick the champion family from the evaluation table.
pub fn select_champion(
    policy: &ChampionPolicy,
    evaluations: &[FamilyEvaluation],
) -> RiskResult<ModelFamily> {
    match policy {
        ChampionPolicy::HighestRocAuc => evaluations
            .iter()
            .fold(None::<&FamilyEvaluation>, |best, e| match best {
                Some(b) if b.metrics.roc_auc >= e.metrics.roc_auc => Some(b),
                _ => Some(e),
            })
            .map(|e| e.family)
            .ok_or_else(|| RiskError::training("no evaluated model families")),
        ChampionPolicy::Fixed { family } => {
            if evaluations.iter().any(|e| e.family == *family) {
                Ok(*family)
            } else {
                Err(RiskError::training(format!("fixed champion {family} was not trained")))
            }
        }
    }
}

// ── Trainer ──────────────────────────────────────────────────────────────────

pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    /// Run the full training procedure for both families.
    pub fn train(&self, data: &TrainingData, bank: &RngBank) -> RiskResult<TrainingOutcome> {
        if data.x.is_empty() || data.x.len() != data.y.len() {
            return Err(RiskError::training(format!(
                "{} rows but {} labels",
                data.x.len(),
                data.y.len()
            )));
        }
        check_binary(&data.y)?;
        let run_id = uuid::Uuid::new_v4().to_string();

        let mut split_rng = bank.for_stage(StageSlot::Split);
        let split = stratified_split(&data.y, self.config.test_fraction, &mut split_rng)?;

        let mut cv_rng = bank.for_stage(StageSlot::CrossValidation);
        let folds = stratified_folds(&data.y, &split.train, self.config.cv_folds, &mut cv_rng)?;

        let (x_train, y_train) = data.subset(&split.train);
        let (x_test, y_test) = data.subset(&split.test);
        log::info!(
            "training run {run_id}: {} train / {} test rows, {} folds",
            split.train.len(),
            split.test.len(),
            folds.len()
        );

        let mut fit_rng = bank.for_stage(StageSlot::Forest);
        let mut cv_results = BTreeMap::new();
        let mut evaluations = Vec::new();
        let mut estimators = BTreeMap::new();

        for family in [ModelFamily::LogisticRegression, ModelFamily::RandomForest] {
            let grid = parameter_grid(&self.config, family);
            if grid.is_empty() {
                return Err(RiskError::training(format!("empty parameter grid for {family}")));
            }

            let scores = grid
                .iter()
                .map(|params| self.cross_validate(params, data, &split.train, &folds, &mut fit_rng))
                .collect::<RiskResult<Vec<_>>>()?;

            // First candidate wins ties.
            let mut best = &scores[0];
            for s in &scores[1..] {
                if s.mean_score > best.mean_score {
                    best = s;
                }
            }
            log::info!("{family}: best CV roc_auc={:.4} with {}", best.mean_score, best.params);

            let mut refit_rng = fit_rng.fork("refit");
            let estimator = FittedPipeline::fit(&best.params, &x_train, &y_train, &mut refit_rng)?;
            let proba = estimator.predict_proba(&x_test)?;
            let pred = estimator.predict(&x_test)?;
            let metrics = EvaluationMetrics::compute(&y_test, &pred, &proba)?;
            log::info!("{family} hold-out: {metrics}");

            evaluations.push(FamilyEvaluation {
                family,
                best_params: best.params.clone(),
                cv_roc_auc: best.mean_score,
                metrics,
            });
            estimators.insert(family, estimator);
            cv_results.insert(family, scores);
        }

        let champion = select_champion(&self.config.champion, &evaluations)?;
        log::info!("champion: {champion} (policy {:?})", self.config.champion);

        Ok(TrainingOutcome { run_id, split, cv_results, evaluations, estimators, champion })
    }

    fn cross_validate(
        &self,
        params: &Hyperparams,
        data: &TrainingData,
        train_rows: &[usize],
        folds: &[Vec<usize>],
        rng: &mut StageRng,
    ) -> RiskResult<CandidateScore> {
        let mut fold_scores = Vec::with_capacity(folds.len());
        for validation in folds {
            let fit_rows: Vec<usize> = train_rows
                .iter()
                .copied()
                .filter(|i| validation.binary_search(i).is_err())
                .collect();
            let (x_fit, y_fit) = data.subset(&fit_rows);
            let (x_val, y_val) = data.subset(validation);

            let mut fold_rng = rng.fork("fold");
            let model = FittedPipeline::fit(params, &x_fit, &y_fit, &mut fold_rng)?;
            fold_scores.push(roc_auc(&y_val, &model.predict_proba(&x_val)?)?);
        }
        let mean_score = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
        log::debug!("cv {params}: roc_auc={mean_score:.4} folds={fold_scores:?}");
        Ok(CandidateScore { params: params.clone(), fold_scores, mean_score })
    }

    /// Bundle the champion with its WOE encoder and log it to the registry.
    /// Returns the new version number, which becomes "latest".
    pub fn register_champion(
        &self,
        outcome: &TrainingOutcome,
        encoder: &WoeEncoder,
        registry: &ModelRegistry,
        model_name: &str,
    ) -> RiskResult<u32> {
        let artifact = ModelArtifact {
            family:        outcome.champion,
            feature_names: encoder.feature_names(),
            encoder:       encoder.clone(),
            estimator:     outcome.champion_estimator()?.clone(),
        };
        let metrics = outcome.champion_evaluation().map(|e| e.metrics.clone());
        let version = registry.log_model(&artifact, model_name, &outcome.run_id, metrics.as_ref())?;
        log::info!("registered {model_name} v{version} ({})", outcome.champion);
        Ok(version)
    }
}
