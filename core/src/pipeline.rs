//! The batch pipeline: raw transactions in, registered model out.
//!
//! STAGE ORDER (fixed, never reordered):
//!   1. Load       transactions CSV
//!   2. Aggregate  per-customer amount statistics
//!   3. Label      RFM clustering → high-risk proxy target
//!   4. Join       labels onto aggregates (MissingLabelPolicy)
//!   5. WOE        binning, transform, IV table
//!   6. Train      grid search, hold-out evaluation, champion
//!   7. Register   champion + encoder → model registry
//!
//! RULES:
//!   - Every stage consumes its full input before the next one starts.
//!   - All randomness flows through the RngBank.
//!   - A failed run persists nothing. run() stages the artifact files
//!     under temporary names, moves them into place, and only then
//!     registers the model. If registration fails the previous files
//!     are restored.

use crate::{
    aggregator::{self, CustomerAggregate, FEATURE_NAMES},
    config::PipelineConfig,
    dataset::{self, LabeledAggregates},
    error::RiskResult,
    registry::ModelRegistry,
    risk_labeler::{LabelingOutcome, RiskLabeler},
    rng::{RngBank, StageSlot},
    trainer::{Trainer, TrainingData, TrainingOutcome},
    transaction,
    woe_transformer::{WoeOutput, WoeTransformer},
};
use std::path::{Path, PathBuf};

pub const FEATURES_FILE: &str = "features.csv";
pub const LABELS_FILE: &str = "labels.csv";
pub const FEATURES_WOE_FILE: &str = "features_woe.csv";
pub const FEATURES_WOE_TARGET_FILE: &str = "features_woe_with_target.csv";
pub const IV_VALUES_FILE: &str = "iv_values.csv";

/// Everything produced by stages 1–5.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub transaction_count: usize,
    pub aggregates:        Vec<CustomerAggregate>,
    pub labeling:          LabelingOutcome,
    pub labeled:           LabeledAggregates,
    pub woe:               WoeOutput,
}

/// Summary of a complete run, printed by risk-runner.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub prepared:  PreparedData,
    pub training:  TrainingOutcome,
    pub version:   u32,
    pub artifacts: Vec<PathBuf>,
}

pub struct Pipeline {
    pub config: PipelineConfig,
    rng_bank:   RngBank,
}

impl Pipeline {
    /// Rejects an invalid config up front, however it was built.
    pub fn new(config: PipelineConfig) -> RiskResult<Self> {
        config.validate()?;
        let rng_bank = RngBank::new(config.seed);
        Ok(Self { config, rng_bank })
    }

    /// Stages 1–5, in memory.
    pub fn prepare(&self) -> RiskResult<PreparedData> {
        let transactions = transaction::load_transactions(&self.config.input_path)?;
        self.prepare_from(&transactions)
    }

    /// Stages 2–5 on already-loaded transactions.
    pub fn prepare_from(
        &self,
        transactions: &[transaction::Transaction],
    ) -> RiskResult<PreparedData> {
        let aggregates = aggregator::aggregate(transactions)?;

        let mut rng = self.rng_bank.for_stage(StageSlot::Clustering);
        let labeling = RiskLabeler::new(self.config.labeling.clone()).label(transactions, &mut rng)?;

        let labeled =
            dataset::join_labels(&aggregates, &labeling.assignments, self.config.missing_labels)?;

        let table = aggregator::to_feature_table(&labeled.aggregates);
        let woe = WoeTransformer::new(self.config.woe.clone()).fit_transform(&table, &labeled.labels)?;
        for row in &woe.iv_table {
            log::info!("IV {:<18} {:.4} ({})", row.feature, row.iv, row.strength);
        }

        Ok(PreparedData {
            transaction_count: transactions.len(),
            aggregates,
            labeling,
            labeled,
            woe,
        })
    }

    /// Stage 6 only. Nothing is persisted.
    pub fn fit(&self, prepared: &PreparedData) -> RiskResult<TrainingOutcome> {
        let data = TrainingData::from_woe(&prepared.woe.table, &prepared.labeled.labels)?;
        Trainer::new(self.config.training.clone()).train(&data, &self.rng_bank)
    }

    /// Stage 7: log the champion with its encoder. Returns the new version.
    pub fn register(
        &self,
        outcome: &TrainingOutcome,
        prepared: &PreparedData,
        registry: &ModelRegistry,
    ) -> RiskResult<u32> {
        Trainer::new(self.config.training.clone()).register_champion(
            outcome,
            &prepared.woe.encoder,
            registry,
            &self.config.model_name,
        )
    }

    /// Stages 6–7. Returns the outcome and the registered version.
    pub fn train(
        &self,
        prepared: &PreparedData,
        registry: &ModelRegistry,
    ) -> RiskResult<(TrainingOutcome, u32)> {
        let outcome = self.fit(prepared)?;
        let version = self.register(&outcome, prepared, registry)?;
        Ok((outcome, version))
    }

    /// All stages plus the artifact files, all or nothing.
    pub fn run(&self) -> RiskResult<RunReport> {
        let prepared = self.prepare()?;
        let registry = ModelRegistry::open(&self.config.registry_path)?;
        let training = self.fit(&prepared)?;

        let committed =
            stage_artifacts(Path::new(&self.config.output_dir), &prepared)?.commit()?;
        let version = match self.register(&training, &prepared, &registry) {
            Ok(version) => version,
            Err(e) => {
                log::error!("registration failed, restoring previous artifacts: {e}");
                committed.roll_back();
                return Err(e);
            }
        };
        let artifacts = committed.finish();

        Ok(RunReport { prepared, training, version, artifacts })
    }
}

// ── Artifacts ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct ArtifactPaths {
    tmp:    PathBuf,
    backup: PathBuf,
    target: PathBuf,
}

impl ArtifactPaths {
    fn new(dir: &Path, name: &str) -> Self {
        Self {
            tmp:    dir.join(format!(".{name}.tmp")),
            backup: dir.join(format!(".{name}.bak")),
            target: dir.join(name),
        }
    }
}

/// Artifact files fully written under temporary names.
#[derive(Debug)]
pub struct StagedArtifacts {
    files: Vec<ArtifactPaths>,
}

/// Artifact files in place, with any files they replaced kept aside
/// until finish() or roll_back().
#[derive(Debug)]
pub struct CommittedArtifacts {
    placed:   Vec<PathBuf>,
    replaced: Vec<(PathBuf, PathBuf)>,
}

/// Write the five CSV files into `dir` under temporary names. On error
/// every temporary file is removed and no target is touched.
pub fn stage_artifacts(dir: &Path, prepared: &PreparedData) -> RiskResult<StagedArtifacts> {
    std::fs::create_dir_all(dir)?;

    let writers: [(&str, fn(&Path, &PreparedData) -> RiskResult<()>); 5] = [
        (FEATURES_FILE, write_features),
        (LABELS_FILE, write_labels),
        (FEATURES_WOE_FILE, write_woe),
        (FEATURES_WOE_TARGET_FILE, write_woe_with_target),
        (IV_VALUES_FILE, write_iv),
    ];

    let mut staged = StagedArtifacts { files: Vec::with_capacity(writers.len()) };
    for (name, write) in writers {
        let paths = ArtifactPaths::new(dir, name);
        if let Err(e) = write(&paths.tmp, prepared) {
            let _ = std::fs::remove_file(&paths.tmp);
            staged.discard();
            return Err(e);
        }
        staged.files.push(paths);
    }
    Ok(staged)
}

impl StagedArtifacts {
    /// Move every staged file into place. A failed move undoes the moves
    /// already made and removes the remaining temporary files.
    pub fn commit(self) -> RiskResult<CommittedArtifacts> {
        let mut committed = CommittedArtifacts { placed: Vec::new(), replaced: Vec::new() };
        let mut pending = self.files.into_iter();
        while let Some(paths) = pending.next() {
            if let Err(e) = committed.place(&paths) {
                let _ = std::fs::remove_file(&paths.tmp);
                for rest in pending.by_ref() {
                    let _ = std::fs::remove_file(&rest.tmp);
                }
                committed.roll_back();
                return Err(e);
            }
        }
        Ok(committed)
    }

    /// Remove every temporary file.
    pub fn discard(self) {
        for paths in &self.files {
            let _ = std::fs::remove_file(&paths.tmp);
        }
    }
}

impl CommittedArtifacts {
    fn place(&mut self, paths: &ArtifactPaths) -> RiskResult<()> {
        if paths.target.exists() {
            std::fs::rename(&paths.target, &paths.backup)?;
            self.replaced.push((paths.backup.clone(), paths.target.clone()));
        }
        std::fs::rename(&paths.tmp, &paths.target)?;
        self.placed.push(paths.target.clone());
        Ok(())
    }

    /// Keep the new files and drop the replaced ones.
    pub fn finish(self) -> Vec<PathBuf> {
        for (backup, _) in &self.replaced {
            if let Err(e) = std::fs::remove_file(backup) {
                log::warn!("could not remove {}: {e}", backup.display());
            }
        }
        for target in &self.placed {
            log::debug!("wrote {}", target.display());
        }
        log::info!("wrote {} artifacts", self.placed.len());
        self.placed
    }

    /// Remove the new files and put the replaced ones back.
    pub fn roll_back(self) {
        for target in &self.placed {
            let _ = std::fs::remove_file(target);
        }
        for (backup, target) in &self.replaced {
            if let Err(e) = std::fs::rename(backup, target) {
                log::error!("could not restore {}: {e}", target.display());
            }
        }
    }
}

/// Stage and commit the five CSV files in one step.
pub fn write_artifacts(dir: &Path, prepared: &PreparedData) -> RiskResult<Vec<PathBuf>> {
    Ok(stage_artifacts(dir, prepared)?.commit()?.finish())
}

fn write_features(path: &Path, prepared: &PreparedData) -> RiskResult<()> {
    let mut w = csv::Writer::from_path(path)?;
    let mut header = vec!["CustomerId"];
    header.extend(FEATURE_NAMES);
    w.write_record(&header)?;
    for agg in &prepared.aggregates {
        let mut record = vec![agg.customer_id.clone()];
        record.extend(agg.features().iter().map(|v| v.to_string()));
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}

fn write_labels(path: &Path, prepared: &PreparedData) -> RiskResult<()> {
    let mut w = csv::Writer::from_path(path)?;
    w.write_record(["CustomerId", "cluster", "is_high_risk"])?;
    for a in &prepared.labeling.assignments {
        w.write_record([
            a.customer_id.clone(),
            a.cluster_id.to_string(),
            a.is_high_risk.to_string(),
        ])?;
    }
    w.flush()?;
    Ok(())
}

fn write_woe(path: &Path, prepared: &PreparedData) -> RiskResult<()> {
    write_woe_table(path, prepared, false)
}

fn write_woe_with_target(path: &Path, prepared: &PreparedData) -> RiskResult<()> {
    write_woe_table(path, prepared, true)
}

fn write_woe_table(path: &Path, prepared: &PreparedData, with_target: bool) -> RiskResult<()> {
    let table = &prepared.woe.table;
    let mut w = csv::Writer::from_path(path)?;
    let mut header = vec!["CustomerId".to_string()];
    header.extend(table.names.iter().cloned());
    if with_target {
        header.push("is_high_risk".into());
    }
    w.write_record(&header)?;
    for (i, agg) in prepared.labeled.aggregates.iter().enumerate() {
        let mut record = vec![agg.customer_id.clone()];
        record.extend(table.row(i).iter().map(|v| v.to_string()));
        if with_target {
            record.push(prepared.labeled.labels[i].to_string());
        }
        w.write_record(&record)?;
    }
    w.flush()?;
    Ok(())
}

fn write_iv(path: &Path, prepared: &PreparedData) -> RiskResult<()> {
    let mut w = csv::Writer::from_path(path)?;
    w.write_record(["feature", "iv", "strength"])?;
    for row in &prepared.woe.iv_table {
        w.write_record([row.feature.clone(), row.iv.to_string(), row.strength.to_string()])?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("artifacts-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn staged(dir: &Path, files: &[(&str, &str)]) -> StagedArtifacts {
        let mut out = StagedArtifacts { files: Vec::new() };
        for (name, body) in files {
            let paths = ArtifactPaths::new(dir, name);
            std::fs::write(&paths.tmp, body).unwrap();
            out.files.push(paths);
        }
        out
    }

    fn read(dir: &Path, name: &str) -> String {
        std::fs::read_to_string(dir.join(name)).unwrap()
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('.'))
            .collect()
    }

    #[test]
    fn roll_back_restores_previous_files() {
        let dir = temp_dir();
        std::fs::write(dir.join("a.csv"), "old a").unwrap();

        let committed = staged(&dir, &[("a.csv", "new a"), ("b.csv", "new b")]).commit().unwrap();
        assert_eq!(read(&dir, "a.csv"), "new a");
        committed.roll_back();

        assert_eq!(read(&dir, "a.csv"), "old a");
        assert!(!dir.join("b.csv").exists());
        assert!(leftovers(&dir).is_empty(), "{:?}", leftovers(&dir));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn finish_keeps_new_files_and_drops_backups() {
        let dir = temp_dir();
        std::fs::write(dir.join("a.csv"), "old a").unwrap();

        let written = staged(&dir, &[("a.csv", "new a")]).commit().unwrap().finish();

        assert_eq!(written, vec![dir.join("a.csv")]);
        assert_eq!(read(&dir, "a.csv"), "new a");
        assert!(leftovers(&dir).is_empty(), "{:?}", leftovers(&dir));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn failed_move_undoes_earlier_moves() {
        let dir = temp_dir();
        std::fs::write(dir.join("a.csv"), "old a").unwrap();
        let mut pending = staged(&dir, &[("a.csv", "new a"), ("b.csv", "new b")]);
        // The second temp file is gone, so its move fails.
        std::fs::remove_file(&pending.files[1].tmp).unwrap();
        pending.files[1].tmp = dir.join("missing").join(".b.csv.tmp");

        assert!(pending.commit().is_err());

        assert_eq!(read(&dir, "a.csv"), "old a");
        assert!(!dir.join("b.csv").exists());
        assert!(leftovers(&dir).is_empty(), "{:?}", leftovers(&dir));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
