//! Per-customer aggregation of raw transactions.
//!
//! Produces one CustomerAggregate per distinct customer, ordered by
//! customer id so downstream tables are reproducible.

use crate::{
    error::{RiskError, RiskResult},
    transaction::Transaction,
    types::CustomerId,
    woe_transformer::{FeatureColumn, FeatureTable},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Names of the four aggregate features, in scoring-request order.
pub const FEATURE_NAMES: [&str; 4] = [
    "total_amount",
    "avg_amount",
    "transaction_count",
    "std_amount",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerAggregate {
    pub customer_id:       CustomerId,
    pub total_amount:      f64,
    pub avg_amount:        f64,
    pub transaction_count: u64,
    /// Sample standard deviation (n − 1); 0 for a single transaction.
    pub std_amount:        f64,
}

impl CustomerAggregate {
    /// Feature vector in FEATURE_NAMES order.
    pub fn features(&self) -> [f64; 4] {
        [
            self.total_amount,
            self.avg_amount,
            self.transaction_count as f64,
            self.std_amount,
        ]
    }
}

/// Group transactions by customer and compute amount statistics.
pub fn aggregate(transactions: &[Transaction]) -> RiskResult<Vec<CustomerAggregate>> {
    if transactions.is_empty() {
        return Err(RiskError::data("no transactions to aggregate"));
    }

    let mut amounts: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for txn in transactions {
        txn.validate()?;
        amounts.entry(txn.customer_id.as_str()).or_default().push(txn.amount);
    }

    let out: Vec<CustomerAggregate> = amounts
        .into_iter()
        .map(|(customer_id, values)| {
            let n = values.len();
            let total: f64 = values.iter().sum();
            let mean = total / n as f64;
            let std = if n > 1 {
                let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
                (ss / (n - 1) as f64).sqrt()
            } else {
                0.0
            };
            CustomerAggregate {
                customer_id:       customer_id.to_string(),
                total_amount:      total,
                avg_amount:        mean,
                transaction_count: n as u64,
                std_amount:        std,
            }
        })
        .collect();

    log::info!(
        "aggregated {} transactions into {} customers",
        transactions.len(),
        out.len()
    );
    Ok(out)
}

/// Column view of the aggregates, ready for the WOE transformer.
pub fn to_feature_table(aggregates: &[CustomerAggregate]) -> FeatureTable {
    let columns = FEATURE_NAMES
        .iter()
        .enumerate()
        .map(|(j, name)| {
            FeatureColumn::numeric(*name, aggregates.iter().map(|a| a.features()[j]).collect())
        })
        .collect();
    FeatureTable::new(columns)
}
