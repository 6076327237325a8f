//! Weight-of-evidence transform with information-value scoring.
//!
//! Each feature column is binned independently against the binary label:
//!   1. Prebin (numeric: quantile split points, categorical: one bin per
//!      category ordered by event rate)
//!   2. Merge adjacent bins until the event rate is monotonic
//!   3. Merge away pure bins (no events or no non-events)
//!   4. WOE_b = ln(P(b | y=1) / P(b | y=0)),  IV = Σ (P(b|1) − P(b|0)) · WOE_b
//!
//! RULE: a column that cannot be fitted never aborts the table. It becomes
//! a ColumnFit::Failed, transforms to all zeros and scores IV = 0.

use crate::{
    config::WoeConfig,
    error::{RiskError, RiskResult},
    types::{Label, Matrix},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ── Feature table ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Numeric(Vec<f64>),
    Categorical(Vec<String>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(v)     => v.len(),
            Self::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numerical,
    Categorical,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureColumn {
    pub name:   String,
    pub values: ColumnValues,
}

impl FeatureColumn {
    pub fn numeric(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self { name: name.into(), values: ColumnValues::Numeric(values) }
    }

    pub fn categorical(name: impl Into<String>, values: Vec<String>) -> Self {
        Self { name: name.into(), values: ColumnValues::Categorical(values) }
    }

    /// Dtype inspection: the column variant decides the binning strategy.
    pub fn kind(&self) -> ColumnKind {
        match self.values {
            ColumnValues::Numeric(_)     => ColumnKind::Numerical,
            ColumnValues::Categorical(_) => ColumnKind::Categorical,
        }
    }
}

/// Named, row-aligned feature columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    columns: Vec<FeatureColumn>,
}

impl FeatureTable {
    pub fn new(columns: Vec<FeatureColumn>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&FeatureColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Row count of the first column (0 for an empty table).
    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }
}

// ── Binning results ──────────────────────────────────────────────────────────

/// Fitted bin layout for one column. `woe[i]` belongs to bin `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Binning {
    /// Bin i covers [splits[i-1], splits[i]); the outer bins are open-ended.
    Numeric { splits: Vec<f64>, woe: Vec<f64> },
    Categorical { groups: Vec<Vec<String>>, woe: Vec<f64> },
}

impl Binning {
    pub fn n_bins(&self) -> usize {
        match self {
            Self::Numeric { woe, .. } | Self::Categorical { woe, .. } => woe.len(),
        }
    }

    fn woe_numeric(&self, x: f64) -> f64 {
        match self {
            Self::Numeric { splits, woe } if x.is_finite() => {
                woe[splits.partition_point(|s| *s <= x)]
            }
            Self::Categorical { .. } => self.woe_category(&x.to_string()),
            _ => 0.0,
        }
    }

    fn woe_category(&self, value: &str) -> f64 {
        match self {
            Self::Categorical { groups, woe } => groups
                .iter()
                .position(|g| g.iter().any(|c| c == value))
                .map_or(0.0, |i| woe[i]),
            Self::Numeric { .. } => value.parse::<f64>().map_or(0.0, |x| self.woe_numeric(x)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinStat {
    pub bin:        String,
    pub count:      u64,
    pub events:     u64,
    pub non_events: u64,
    pub event_rate: f64,
    pub woe:        f64,
    pub iv:         f64,
}

/// Outcome of fitting one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ColumnFit {
    Fitted { binning: Binning, bins: Vec<BinStat>, iv: f64 },
    Failed { reason: String },
}

impl ColumnFit {
    pub fn iv(&self) -> f64 {
        match self {
            Self::Fitted { iv, .. } => *iv,
            Self::Failed { .. }     => 0.0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnEncoder {
    pub name: String,
    pub kind: ColumnKind,
    pub fit:  ColumnFit,
}

impl ColumnEncoder {
    fn transform(&self, values: &ColumnValues) -> Vec<f64> {
        match (&self.fit, values) {
            (ColumnFit::Failed { .. }, v) => vec![0.0; v.len()],
            (ColumnFit::Fitted { binning, .. }, ColumnValues::Numeric(v)) => {
                v.iter().map(|x| binning.woe_numeric(*x)).collect()
            }
            (ColumnFit::Fitted { binning, .. }, ColumnValues::Categorical(v)) => {
                v.iter().map(|x| binning.woe_category(x)).collect()
            }
        }
    }
}

/// IV strength bands used in credit scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IvStrength {
    Useless,
    Weak,
    Medium,
    Strong,
    Suspicious,
}

impl IvStrength {
    pub fn classify(iv: f64) -> Self {
        if iv < 0.02 {
            Self::Useless
        } else if iv < 0.1 {
            Self::Weak
        } else if iv < 0.3 {
            Self::Medium
        } else if iv < 0.5 {
            Self::Strong
        } else {
            Self::Suspicious
        }
    }
}

impl std::fmt::Display for IvStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Useless    => "useless",
            Self::Weak       => "weak",
            Self::Medium     => "medium",
            Self::Strong     => "strong",
            Self::Suspicious => "suspicious",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationValue {
    pub feature:  String,
    pub iv:       f64,
    pub strength: IvStrength,
}

// ── Encoder ──────────────────────────────────────────────────────────────────

/// Fitted per-column binnings. Persisted with the model so the scorer
/// applies exactly the transform the classifier was trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WoeEncoder {
    pub columns: Vec<ColumnEncoder>,
}

impl WoeEncoder {
    pub fn feature_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// IV per feature, sorted descending (stable on ties).
    pub fn iv_table(&self) -> Vec<InformationValue> {
        let mut table: Vec<InformationValue> = self
            .columns
            .iter()
            .map(|c| InformationValue {
                feature:  c.name.clone(),
                iv:       c.fit.iv(),
                strength: IvStrength::classify(c.fit.iv()),
            })
            .collect();
        table.sort_by(|a, b| b.iv.total_cmp(&a.iv));
        table
    }

    /// Transform a table whose columns match the fitted ones by name.
    pub fn transform(&self, x: &FeatureTable) -> RiskResult<WoeTable> {
        let mut columns = Vec::with_capacity(self.columns.len());
        for enc in &self.columns {
            let col = x.column(&enc.name).ok_or_else(|| {
                RiskError::data(format!("feature '{}' missing from input table", enc.name))
            })?;
            columns.push(enc.transform(&col.values));
        }
        Ok(WoeTable {
            names: self.columns.iter().map(|c| format!("woe_{}", c.name)).collect(),
            columns,
        })
    }

    /// Transform a single record given in fitted column order.
    pub fn transform_row(&self, row: &[f64]) -> RiskResult<Vec<f64>> {
        if row.len() != self.columns.len() {
            return Err(RiskError::Prediction(format!(
                "expected {} features, got {}",
                self.columns.len(),
                row.len()
            )));
        }
        Ok(self
            .columns
            .iter()
            .zip(row)
            .map(|(enc, x)| match &enc.fit {
                ColumnFit::Fitted { binning, .. } => binning.woe_numeric(*x),
                ColumnFit::Failed { .. } => 0.0,
            })
            .collect())
    }
}

/// WOE-valued columns named `woe_<feature>`, row-aligned with the input.
#[derive(Debug, Clone, PartialEq)]
pub struct WoeTable {
    pub names:   Vec<String>,
    pub columns: Vec<Vec<f64>>,
}

impl WoeTable {
    pub fn n_rows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    pub fn row(&self, i: usize) -> Vec<f64> {
        self.columns.iter().map(|c| c[i]).collect()
    }

    pub fn to_matrix(&self) -> Matrix {
        (0..self.n_rows()).map(|i| self.row(i)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct WoeOutput {
    pub encoder:  WoeEncoder,
    pub table:    WoeTable,
    /// Sorted descending by IV. Advisory: nothing filters on it.
    pub iv_table: Vec<InformationValue>,
}

// ── Transformer ──────────────────────────────────────────────────────────────

pub struct WoeTransformer {
    config: WoeConfig,
}

impl WoeTransformer {
    pub fn new(config: WoeConfig) -> Self {
        Self { config }
    }

    /// Fit every column against `y` and transform the table.
    ///
    /// Whole-table contract violations (row count mismatch, labels outside
    /// {0, 1}) are DataErrors; anything column-specific is recovered.
    pub fn fit_transform(&self, x: &FeatureTable, y: &[Label]) -> RiskResult<WoeOutput> {
        if x.n_rows() != y.len() {
            return Err(RiskError::data(format!(
                "feature table has {} rows but label has {}",
                x.n_rows(),
                y.len()
            )));
        }
        if let Some(bad) = y.iter().find(|&&v| v > 1) {
            return Err(RiskError::data(format!("label value {bad} is not binary")));
        }

        let columns: Vec<ColumnEncoder> = x
            .columns()
            .iter()
            .map(|col| {
                let fit = self.fit_column(col, y);
                match &fit {
                    ColumnFit::Fitted { binning, iv, .. } => log::debug!(
                        "woe: {} fitted {} bins, iv={iv:.4}",
                        col.name,
                        binning.n_bins()
                    ),
                    ColumnFit::Failed { reason } => log::warn!(
                        "woe: skipping column {} ({reason}); using WOE=0, IV=0",
                        col.name
                    ),
                }
                ColumnEncoder { name: col.name.clone(), kind: col.kind(), fit }
            })
            .collect();

        let encoder = WoeEncoder { columns };
        let table = encoder.transform(x)?;
        let iv_table = encoder.iv_table();

        let failed = encoder.columns.iter().filter(|c| c.fit.is_failed()).count();
        log::info!(
            "woe: transformed {} columns ({failed} failed) over {} rows",
            encoder.columns.len(),
            table.n_rows()
        );
        Ok(WoeOutput { encoder, table, iv_table })
    }

    fn fit_column(&self, col: &FeatureColumn, y: &[Label]) -> ColumnFit {
        let result = match &col.values {
            ColumnValues::Numeric(v)     => fit_numeric(v, y, self.config.max_prebins),
            ColumnValues::Categorical(v) => fit_categorical(v, y),
        };
        match result {
            Ok(fit) => fit,
            Err(reason) => ColumnFit::Failed { reason },
        }
    }
}

// ── Binning kernels ──────────────────────────────────────────────────────────

/// A run of adjacent prebins. `upper` is the split that closes the block
/// (numeric) and `members` the categories it holds (categorical).
#[derive(Debug, Clone)]
struct Block {
    events:     u64,
    non_events: u64,
    upper:      Option<f64>,
    members:    Vec<String>,
}

impl Block {
    fn count(&self) -> u64 {
        self.events + self.non_events
    }

    fn event_rate(&self) -> f64 {
        self.events as f64 / self.count().max(1) as f64
    }

    fn is_pure(&self) -> bool {
        self.events == 0 || self.non_events == 0
    }

    fn absorb(&mut self, next: Block) {
        self.events += next.events;
        self.non_events += next.non_events;
        self.upper = next.upper;
        self.members.extend(next.members);
    }
}

fn check_inputs(len: usize, y: &[Label]) -> Result<(u64, u64), String> {
    if len == 0 {
        return Err("empty column".into());
    }
    if len != y.len() {
        return Err(format!("column has {len} rows but label has {}", y.len()));
    }
    let events = y.iter().filter(|&&v| v == 1).count() as u64;
    let non_events = y.len() as u64 - events;
    if events == 0 || non_events == 0 {
        return Err("label has a single class".into());
    }
    Ok((events, non_events))
}

/// Pool adjacent violators until event rates are monotonic.
fn enforce_monotonic(blocks: Vec<Block>, ascending: bool) -> Vec<Block> {
    let mut stack: Vec<Block> = Vec::with_capacity(blocks.len());
    for block in blocks {
        stack.push(block);
        while stack.len() >= 2 {
            let n = stack.len();
            let (prev, last) = (stack[n - 2].event_rate(), stack[n - 1].event_rate());
            let violates = if ascending { prev > last } else { prev < last };
            if !violates {
                break;
            }
            if let Some(last) = stack.pop() {
                stack[n - 2].absorb(last);
            }
        }
    }
    stack
}

/// Merge every pure block into the neighbour with the closer event rate.
fn merge_pure(mut blocks: Vec<Block>) -> Vec<Block> {
    while blocks.len() > 1 {
        let Some(i) = blocks.iter().position(Block::is_pure) else {
            break;
        };
        let left = if i == 0 {
            0
        } else if i == blocks.len() - 1 {
            i - 1
        } else {
            let rate = blocks[i].event_rate();
            let d_prev = (rate - blocks[i - 1].event_rate()).abs();
            let d_next = (rate - blocks[i + 1].event_rate()).abs();
            if d_prev <= d_next { i - 1 } else { i }
        };
        let right = blocks.remove(left + 1);
        blocks[left].absorb(right);
    }
    blocks
}

fn bin_stats(blocks: &[Block], labels: Vec<String>, total_events: u64, total_non_events: u64) -> (Vec<BinStat>, f64) {
    let mut iv_total = 0.0;
    let stats = blocks
        .iter()
        .zip(labels)
        .map(|(b, bin)| {
            let p1 = b.events as f64 / total_events as f64;
            let p0 = b.non_events as f64 / total_non_events as f64;
            let woe = (p1 / p0).ln();
            let iv = (p1 - p0) * woe;
            iv_total += iv;
            BinStat {
                bin,
                count: b.count(),
                events: b.events,
                non_events: b.non_events,
                event_rate: b.event_rate(),
                woe,
                iv,
            }
        })
        .collect();
    (stats, iv_total)
}

/// Quantile split points strictly above the minimum, deduplicated.
fn prebin_splits(sorted: &[f64], max_prebins: usize) -> Vec<f64> {
    let mut unique: Vec<f64> = sorted.to_vec();
    unique.dedup();
    if unique.len() <= max_prebins {
        return unique.into_iter().skip(1).collect();
    }
    let n = sorted.len();
    let mut splits: Vec<f64> = Vec::with_capacity(max_prebins);
    for q in 1..max_prebins {
        let s = sorted[q * n / max_prebins];
        if s > sorted[0] && splits.last().map_or(true, |last| s > *last) {
            splits.push(s);
        }
    }
    splits
}

fn numeric_bin_label(lower: Option<f64>, upper: Option<f64>) -> String {
    match (lower, upper) {
        (None, Some(u))    => format!("(-inf, {u})"),
        (Some(l), Some(u)) => format!("[{l}, {u})"),
        (Some(l), None)    => format!("[{l}, inf)"),
        (None, None)       => "(-inf, inf)".into(),
    }
}

fn fit_numeric(values: &[f64], y: &[Label], max_prebins: usize) -> Result<ColumnFit, String> {
    let (total_events, total_non_events) = check_inputs(values.len(), y)?;
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(format!("non-finite value {bad}"));
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let splits = prebin_splits(&sorted, max_prebins);

    let mut prebins: Vec<Block> = (0..=splits.len())
        .map(|i| Block {
            events: 0,
            non_events: 0,
            upper: splits.get(i).copied(),
            members: Vec::new(),
        })
        .collect();
    for (x, label) in values.iter().zip(y) {
        let b = &mut prebins[splits.partition_point(|s| *s <= *x)];
        if *label == 1 { b.events += 1 } else { b.non_events += 1 }
    }

    // Both trends are tried; the one that keeps more information wins.
    let candidates = [true, false].map(|ascending| {
        let blocks = merge_pure(enforce_monotonic(prebins.clone(), ascending));
        let labels = vec![String::new(); blocks.len()];
        let (_, iv) = bin_stats(&blocks, labels, total_events, total_non_events);
        (blocks, iv)
    });
    let [(asc, asc_iv), (desc, desc_iv)] = candidates;
    let blocks = if desc_iv > asc_iv { desc } else { asc };

    let final_splits: Vec<f64> = blocks.iter().filter_map(|b| b.upper).collect();
    let labels = (0..blocks.len())
        .map(|i| {
            let lower = if i == 0 { None } else { final_splits.get(i - 1).copied() };
            numeric_bin_label(lower, final_splits.get(i).copied())
        })
        .collect();
    let (bins, iv) = bin_stats(&blocks, labels, total_events, total_non_events);
    let woe = bins.iter().map(|b| b.woe).collect();

    Ok(ColumnFit::Fitted {
        binning: Binning::Numeric { splits: final_splits, woe },
        bins,
        iv,
    })
}

fn fit_categorical(values: &[String], y: &[Label]) -> Result<ColumnFit, String> {
    let (total_events, total_non_events) = check_inputs(values.len(), y)?;

    let mut counts: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    for (v, label) in values.iter().zip(y) {
        let entry = counts.entry(v.as_str()).or_default();
        if *label == 1 { entry.0 += 1 } else { entry.1 += 1 }
    }

    // Ordering by event rate makes the sequence monotonic by construction.
    let mut blocks: Vec<Block> = counts
        .into_iter()
        .map(|(category, (events, non_events))| Block {
            events,
            non_events,
            upper: None,
            members: vec![category.to_string()],
        })
        .collect();
    blocks.sort_by(|a, b| a.event_rate().total_cmp(&b.event_rate()));
    let blocks = merge_pure(blocks);

    let labels = blocks.iter().map(|b| b.members.join("|")).collect();
    let (bins, iv) = bin_stats(&blocks, labels, total_events, total_non_events);
    let woe = bins.iter().map(|b| b.woe).collect();
    let groups = blocks.into_iter().map(|b| b.members).collect();

    Ok(ColumnFit::Fitted {
        binning: Binning::Categorical { groups, woe },
        bins,
        iv,
    })
}

/// Category → WOE lookup for callers that transform many values.
pub fn category_lookup(binning: &Binning) -> HashMap<String, f64> {
    match binning {
        Binning::Categorical { groups, woe } => groups
            .iter()
            .zip(woe)
            .flat_map(|(g, w)| g.iter().map(move |c| (c.clone(), *w)))
            .collect(),
        Binning::Numeric { .. } => HashMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(v: &[u8]) -> Vec<Label> {
        v.to_vec()
    }

    #[test]
    fn woe_and_iv_follow_the_classic_formula() {
        // Two clean groups: x < 5 mostly events, x ≥ 5 mostly non-events.
        let x = vec![1.0, 2.0, 3.0, 4.0, 6.0, 7.0, 8.0, 9.0];
        let y = labels(&[1, 1, 1, 0, 1, 0, 0, 0]);
        let fit = fit_numeric(&x, &y, 2).unwrap();
        let ColumnFit::Fitted { bins, iv, .. } = fit else { panic!("expected fit") };

        let expected: f64 = bins
            .iter()
            .map(|b| {
                let p1 = b.events as f64 / 4.0;
                let p0 = b.non_events as f64 / 4.0;
                (p1 - p0) * (p1 / p0).ln()
            })
            .sum();
        assert!((iv - expected).abs() < 1e-12);
        assert_eq!(bins.len(), 2);
        assert!((bins[0].woe - 3f64.ln()).abs() < 1e-12);
        assert!((bins[1].woe + 3f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn numeric_bins_are_monotonic_and_never_pure() {
        let x: Vec<f64> = (0..40).map(f64::from).collect();
        let y: Vec<Label> = (0..40).map(|i| u8::from(i % 3 == 0 || i > 30)).collect();
        let ColumnFit::Fitted { bins, .. } = fit_numeric(&x, &y, 20).unwrap() else {
            panic!("expected fit")
        };
        assert!(bins.iter().all(|b| b.events > 0 && b.non_events > 0));
        let rates: Vec<f64> = bins.iter().map(|b| b.event_rate).collect();
        let up = rates.windows(2).all(|w| w[0] <= w[1]);
        let down = rates.windows(2).all(|w| w[0] >= w[1]);
        assert!(up || down, "rates not monotonic: {rates:?}");
    }

    #[test]
    fn constant_column_is_one_bin_with_zero_iv() {
        let x = vec![5.0; 6];
        let y = labels(&[0, 1, 0, 1, 0, 1]);
        let ColumnFit::Fitted { binning, iv, .. } = fit_numeric(&x, &y, 20).unwrap() else {
            panic!("expected fit")
        };
        assert_eq!(binning.n_bins(), 1);
        assert_eq!(iv, 0.0);
    }

    #[test]
    fn single_class_label_fails_the_column() {
        let x = vec![1.0, 2.0, 3.0];
        assert!(fit_numeric(&x, &labels(&[1, 1, 1]), 20).is_err());
    }

    #[test]
    fn categorical_groups_cover_all_categories() {
        let x: Vec<String> = ["a", "a", "b", "b", "c", "c", "d"].iter().map(|s| s.to_string()).collect();
        let y = labels(&[1, 0, 1, 1, 0, 0, 1]);
        let ColumnFit::Fitted { binning, .. } = fit_categorical(&x, &y).unwrap() else {
            panic!("expected fit")
        };
        let lookup = category_lookup(&binning);
        for c in ["a", "b", "c", "d"] {
            assert!(lookup.contains_key(c), "category {c} lost");
        }
        assert_eq!(binning.woe_category("unseen"), 0.0);
    }

    #[test]
    fn transform_maps_values_to_their_bin() {
        let binning = Binning::Numeric { splits: vec![10.0, 20.0], woe: vec![-1.0, 0.5, 2.0] };
        assert_eq!(binning.woe_numeric(-3.0), -1.0);
        assert_eq!(binning.woe_numeric(10.0), 0.5);
        assert_eq!(binning.woe_numeric(19.9), 0.5);
        assert_eq!(binning.woe_numeric(25.0), 2.0);
        assert_eq!(binning.woe_numeric(f64::NAN), 0.0);
    }
}
