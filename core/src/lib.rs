pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod dataset;
pub mod error;
pub mod forest;
pub mod logistic;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod risk_labeler;
pub mod rng;
pub mod scorer;
pub mod trainer;
pub mod transaction;
pub mod types;
pub mod woe_transformer;
