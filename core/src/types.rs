//! Shared primitive types used across the pipeline.

/// Customer key as it appears in the raw transaction log.
pub type CustomerId = String;

/// Binary risk label: 1 = high risk, 0 = not.
pub type Label = u8;

/// A training run identifier (uuid v4), stamped on every registered version.
pub type RunId = String;

/// Row-major feature matrix.
pub type Matrix = Vec<Vec<f64>>;
