//! Online scoring of single customer aggregate records.
//!
//! RULE: the model is loaded once, at construction. A failed load leaves
//! the service unhealthy and every request fails fast; nothing reloads
//! implicitly. reload() is the explicit administrative path.

use crate::{
    aggregator::FEATURE_NAMES,
    classifier::class_of,
    error::{RiskError, RiskResult},
    registry::{ModelArtifact, ModelRegistry, VersionSelector},
    types::Label,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub total_amount:      f64,
    pub avg_amount:        f64,
    pub transaction_count: f64,
    pub std_amount:        f64,
}

impl ScoreRequest {
    /// Schema validation: every field present, non-null, a finite number.
    pub fn from_json(value: &serde_json::Value) -> RiskResult<Self> {
        let obj = value.as_object().ok_or_else(|| RiskError::Validation {
            field:  "body".into(),
            reason: "must be a JSON object".into(),
        })?;
        let field = |name: &str| -> RiskResult<f64> {
            match obj.get(name) {
                None | Some(serde_json::Value::Null) => Err(RiskError::Validation {
                    field:  name.into(),
                    reason: "is required".into(),
                }),
                Some(v) => v.as_f64().filter(|x| x.is_finite()).ok_or_else(|| {
                    RiskError::Validation {
                        field:  name.into(),
                        reason: format!("must be a number, got {v}"),
                    }
                }),
            }
        };
        Ok(Self {
            total_amount:      field(FEATURE_NAMES[0])?,
            avg_amount:        field(FEATURE_NAMES[1])?,
            transaction_count: field(FEATURE_NAMES[2])?,
            std_amount:        field(FEATURE_NAMES[3])?,
        })
    }

    /// Values in FEATURE_NAMES order.
    pub fn features(&self) -> [f64; 4] {
        [self.total_amount, self.avg_amount, self.transaction_count, self.std_amount]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub probability: f64,
    pub prediction:  Label,
}

/// Immutable handle to a loaded model version.
#[derive(Debug)]
pub struct LoadedModel {
    pub name:     String,
    pub version:  u32,
    pub artifact: ModelArtifact,
}

#[derive(Debug, Clone)]
enum ModelState {
    Ready(Arc<LoadedModel>),
    Unavailable { reason: String },
}

#[derive(Debug, Clone)]
pub struct ScoringService {
    model_name: String,
    state:      ModelState,
}

impl ScoringService {
    /// Load `model_name` at "latest". Never fails: a load error is kept
    /// and reported by health() and by every predict().
    pub fn start(registry: &ModelRegistry, model_name: &str) -> Self {
        let state = Self::load(registry, model_name);
        Self { model_name: model_name.to_string(), state }
    }

    /// A service with no model, e.g. when the registry itself could not
    /// be opened.
    pub fn unavailable(model_name: &str, reason: impl Into<String>) -> Self {
        Self {
            model_name: model_name.to_string(),
            state:      ModelState::Unavailable { reason: reason.into() },
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Wrap an already-loaded model.
    pub fn with_model(model: Arc<LoadedModel>) -> Self {
        Self { model_name: model.name.clone(), state: ModelState::Ready(model) }
    }

    fn load(registry: &ModelRegistry, model_name: &str) -> ModelState {
        match registry.load_model(model_name, VersionSelector::Latest) {
            Ok(found) => {
                if let Err(e) = check_schema(&found.artifact) {
                    log::error!("model {model_name} v{} rejected: {e}", found.version);
                    return ModelState::Unavailable { reason: e.to_string() };
                }
                log::info!("model {model_name} v{} loaded ({})", found.version, found.artifact.family);
                ModelState::Ready(Arc::new(LoadedModel {
                    name:     found.name,
                    version:  found.version,
                    artifact: found.artifact,
                }))
            }
            Err(e) => {
                log::error!("error loading model {model_name}: {e}");
                ModelState::Unavailable { reason: e.to_string() }
            }
        }
    }

    /// Administrative reload of "latest".
    pub fn reload(&mut self, registry: &ModelRegistry) -> bool {
        self.state = Self::load(registry, &self.model_name);
        self.is_healthy()
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.state, ModelState::Ready(_))
    }

    pub fn model(&self) -> Option<Arc<LoadedModel>> {
        match &self.state {
            ModelState::Ready(m) => Some(Arc::clone(m)),
            ModelState::Unavailable { .. } => None,
        }
    }

    pub fn health(&self) -> serde_json::Value {
        match &self.state {
            ModelState::Ready(m) => serde_json::json!({
                "status": "ok",
                "model": m.name,
                "version": m.version,
                "family": m.artifact.family,
            }),
            ModelState::Unavailable { reason } => serde_json::json!({
                "status": "unavailable",
                "model": self.model_name,
                "reason": reason,
            }),
        }
    }

    pub fn predict(&self, request: &ScoreRequest) -> RiskResult<ScoreResponse> {
        let model = match &self.state {
            ModelState::Ready(m) => m,
            ModelState::Unavailable { reason } => {
                return Err(RiskError::ModelUnavailable(reason.clone()));
            }
        };
        let probability = model.artifact.predict_proba_raw(&request.features())?;
        Ok(ScoreResponse { probability, prediction: class_of(probability) })
    }

    /// Validate a raw JSON body and score it.
    pub fn predict_json(&self, body: &serde_json::Value) -> RiskResult<ScoreResponse> {
        if let ModelState::Unavailable { reason } = &self.state {
            return Err(RiskError::ModelUnavailable(reason.clone()));
        }
        self.predict(&ScoreRequest::from_json(body)?)
    }
}

/// The scoring contract only works for models trained on the four
/// aggregate features, in order.
fn check_schema(artifact: &ModelArtifact) -> RiskResult<()> {
    let expected: Vec<&str> = FEATURE_NAMES.to_vec();
    let actual: Vec<&str> = artifact.feature_names.iter().map(String::as_str).collect();
    if actual != expected {
        return Err(RiskError::ModelUnavailable(format!(
            "model features {actual:?} do not match request schema {expected:?}"
        )));
    }
    Ok(())
}
