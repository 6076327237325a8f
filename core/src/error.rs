use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Insufficient data: need at least {required} distinct customers, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Training error: {0}")]
    Training(String),

    #[error("Model not loaded: {0}")]
    ModelUnavailable(String),

    #[error("Validation error: field '{field}' {reason}")]
    Validation { field: String, reason: String },

    #[error("Prediction error: {0}")]
    Prediction(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RiskError {
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    /// HTTP-equivalent status for errors surfaced by the scoring loop.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 422,
            _ => 500,
        }
    }
}

pub type RiskResult<T> = Result<T, RiskError>;
