//! SQLite-backed model registry.
//!
//! RULE: Only registry.rs talks to the database.
//! Writers call log_model(); readers call load_model() with a selector.

use crate::{
    classifier::{FittedPipeline, ModelFamily},
    error::{RiskError, RiskResult},
    metrics::EvaluationMetrics,
    woe_transformer::WoeEncoder,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Everything needed to score a raw aggregate record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub family:        ModelFamily,
    pub feature_names: Vec<String>,
    pub encoder:       WoeEncoder,
    pub estimator:     FittedPipeline,
}

impl ModelArtifact {
    /// Probability of class 1 for raw features in `feature_names` order.
    pub fn predict_proba_raw(&self, row: &[f64]) -> RiskResult<f64> {
        let woe = self.encoder.transform_row(row)?;
        self.estimator.predict_proba_row(&woe)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    Latest,
    Exact(u32),
}

impl FromStr for VersionSelector {
    type Err = RiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "latest" => Ok(Self::Latest),
            other => other.parse().map(Self::Exact).map_err(|_| RiskError::Validation {
                field:  "version".into(),
                reason: format!("must be 'latest' or a version number, got '{other}'"),
            }),
        }
    }
}

impl std::fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest   => f.write_str("latest"),
            Self::Exact(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisteredModel {
    pub name:       String,
    pub version:    u32,
    pub run_id:     String,
    pub created_at: String,
    pub artifact:   ModelArtifact,
    pub metrics:    Option<EvaluationMetrics>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VersionInfo {
    pub version:    u32,
    pub run_id:     String,
    pub family:     String,
    pub created_at: String,
}

pub struct ModelRegistry {
    conn: Connection,
}

impl ModelRegistry {
    /// Open (or create) the registry database at `path` and migrate it.
    pub fn open(path: &str) -> RiskResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode only matters for real files; in-memory ignores it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let registry = Self { conn };
        registry.migrate()?;
        Ok(registry)
    }

    /// Open an in-memory registry (used in tests).
    pub fn in_memory() -> RiskResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let registry = Self { conn };
        registry.migrate()?;
        Ok(registry)
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> RiskResult<()> {
        self.conn
            .execute_batch(include_str!("../../migrations/001_model_registry.sql"))?;
        Ok(())
    }

    // ── Write ──────────────────────────────────────────────────

    /// Store `artifact` as the next version of `name`.
    pub fn log_model(
        &self,
        artifact: &ModelArtifact,
        name: &str,
        run_id: &str,
        metrics: Option<&EvaluationMetrics>,
    ) -> RiskResult<u32> {
        let artifact_json = serde_json::to_string(artifact)?;
        let metrics_json = metrics.map(serde_json::to_string).transpose()?;
        let now = chrono::Utc::now().to_rfc3339();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO registered_model (name, created_at) VALUES (?1, ?2)",
            params![name, now],
        )?;
        let version: u32 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM model_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO model_version
                (name, version, run_id, family, artifact_json, metrics_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                name,
                version,
                run_id,
                artifact.family.name(),
                artifact_json,
                metrics_json,
                now,
            ],
        )?;
        tx.commit()?;
        Ok(version)
    }

    // ── Read ───────────────────────────────────────────────────

    pub fn load_model(&self, name: &str, selector: VersionSelector) -> RiskResult<RegisteredModel> {
        let sql_latest = "SELECT version, run_id, created_at, artifact_json, metrics_json
                          FROM model_version WHERE name = ?1
                          ORDER BY version DESC LIMIT 1";
        let sql_exact = "SELECT version, run_id, created_at, artifact_json, metrics_json
                         FROM model_version WHERE name = ?1 AND version = ?2";

        let map_row = |row: &rusqlite::Row<'_>| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        };
        let found = match selector {
            VersionSelector::Latest => {
                self.conn.query_row(sql_latest, params![name], map_row).optional()?
            }
            VersionSelector::Exact(v) => {
                self.conn.query_row(sql_exact, params![name, v], map_row).optional()?
            }
        };

        let (version, run_id, created_at, artifact_json, metrics_json) = found.ok_or_else(|| {
            RiskError::ModelUnavailable(format!("no version '{selector}' of model '{name}'"))
        })?;
        let artifact: ModelArtifact = serde_json::from_str(&artifact_json)?;
        let metrics = metrics_json
            .map(|m| serde_json::from_str::<EvaluationMetrics>(&m))
            .transpose()?;

        Ok(RegisteredModel {
            name: name.to_string(),
            version,
            run_id,
            created_at,
            artifact,
            metrics,
        })
    }

    pub fn list_versions(&self, name: &str) -> RiskResult<Vec<VersionInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT version, run_id, family, created_at
             FROM model_version WHERE name = ?1
             ORDER BY version ASC",
        )?;
        let rows = stmt
            .query_map(params![name], |row| {
                Ok(VersionInfo {
                    version:    row.get(0)?,
                    run_id:     row.get(1)?,
                    family:     row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
