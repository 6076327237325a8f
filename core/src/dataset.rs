//! Joining cluster labels onto the per-customer feature table.
//!
//! The join is a left join keyed by customer id. Rows without a label
//! are never coerced to a class: MissingLabelPolicy decides whether they
//! are dropped (and counted) or abort the stage.

use crate::{
    aggregator::CustomerAggregate,
    config::MissingLabelPolicy,
    error::{RiskError, RiskResult},
    risk_labeler::ClusterAssignment,
    types::{CustomerId, Label},
};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct LabeledAggregates {
    /// Aggregates that received a label, in their original order.
    pub aggregates: Vec<CustomerAggregate>,
    pub labels:     Vec<Label>,
    /// Customers dropped for lack of a label.
    pub excluded:   Vec<CustomerId>,
}

impl LabeledAggregates {
    pub fn customer_ids(&self) -> Vec<CustomerId> {
        self.aggregates.iter().map(|a| a.customer_id.clone()).collect()
    }
}

pub fn join_labels(
    aggregates: &[CustomerAggregate],
    assignments: &[ClusterAssignment],
    policy: MissingLabelPolicy,
) -> RiskResult<LabeledAggregates> {
    let by_customer: HashMap<&str, Label> = assignments
        .iter()
        .map(|a| (a.customer_id.as_str(), a.is_high_risk))
        .collect();

    let mut kept = Vec::with_capacity(aggregates.len());
    let mut labels = Vec::with_capacity(aggregates.len());
    let mut excluded = Vec::new();

    for agg in aggregates {
        match by_customer.get(agg.customer_id.as_str()) {
            Some(&label) => {
                kept.push(agg.clone());
                labels.push(label);
            }
            None => match policy {
                MissingLabelPolicy::Fail => {
                    return Err(RiskError::data(format!(
                        "customer {} has no risk label",
                        agg.customer_id
                    )));
                }
                MissingLabelPolicy::Exclude => excluded.push(agg.customer_id.clone()),
            },
        }
    }

    if !excluded.is_empty() {
        log::warn!(
            "label join: excluded {} of {} customers without a label",
            excluded.len(),
            aggregates.len()
        );
    }
    if kept.is_empty() {
        return Err(RiskError::data("no labeled customers after join"));
    }

    Ok(LabeledAggregates { aggregates: kept, labels, excluded })
}
