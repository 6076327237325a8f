//! RFM proxy-target labeling.
//!
//! Steps:
//!   1. Compute recency / frequency / monetary per customer from the raw log
//!   2. Standardize the three metrics over the whole population
//!   3. Partition customers with seeded k-means (k-means++ init, best of n_init)
//!   4. Rank clusters by (recency desc, frequency asc, monetary asc)
//!   5. Label every member of the top-ranked cluster as high risk
//!
//! Same input + same seed ⇒ bit-identical assignments.

use crate::{
    config::LabelingConfig,
    error::{RiskError, RiskResult},
    rng::StageRng,
    transaction::Transaction,
    types::{CustomerId, Label},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Customers are always split into three risk tiers.
pub const CLUSTER_COUNT: usize = 3;

// ── Public types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RfmRecord {
    pub customer_id: CustomerId,
    /// Whole days between the snapshot date and the last transaction.
    pub recency:     i64,
    pub frequency:   u64,
    pub monetary:    f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub customer_id:  CustomerId,
    pub cluster_id:   usize,
    pub is_high_risk: Label,
}

/// Mean raw RFM profile of one cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterProfile {
    pub cluster_id:     usize,
    pub size:           usize,
    pub mean_recency:   f64,
    pub mean_frequency: f64,
    pub mean_monetary:  f64,
}

#[derive(Debug, Clone)]
pub struct LabelingOutcome {
    pub snapshot_date:     DateTime<Utc>,
    pub rfm:               Vec<RfmRecord>,
    pub assignments:       Vec<ClusterAssignment>,
    /// Non-empty clusters, best-to-worst risk rank first.
    pub profiles:          Vec<ClusterProfile>,
    pub high_risk_cluster: usize,
    pub inertia:           f64,
}

// ── RFM ──────────────────────────────────────────────────────────────────────

/// One day past the latest transaction.
pub fn snapshot_date(transactions: &[Transaction]) -> RiskResult<DateTime<Utc>> {
    transactions
        .iter()
        .map(|t| t.timestamp)
        .max()
        .map(|latest| latest + Duration::days(1))
        .ok_or_else(|| RiskError::data("no transactions to compute a snapshot date"))
}

/// RFM metrics per customer, ordered by customer id.
pub fn compute_rfm(transactions: &[Transaction]) -> RiskResult<Vec<RfmRecord>> {
    let snapshot = snapshot_date(transactions)?;

    let mut acc: BTreeMap<&str, (DateTime<Utc>, u64, f64)> = BTreeMap::new();
    for txn in transactions {
        txn.validate()?;
        let entry = acc
            .entry(txn.customer_id.as_str())
            .or_insert((txn.timestamp, 0, 0.0));
        entry.0 = entry.0.max(txn.timestamp);
        entry.1 += 1;
        entry.2 += txn.amount;
    }

    Ok(acc
        .into_iter()
        .map(|(customer_id, (last, frequency, monetary))| RfmRecord {
            customer_id: customer_id.to_string(),
            recency: (snapshot - last).num_days(),
            frequency,
            monetary,
        })
        .collect())
}

// ── Standardization ──────────────────────────────────────────────────────────

/// Zero-mean / unit-variance per column over all rows (population variance).
/// A constant column keeps scale 1, so it maps to all zeros.
pub fn standardize(rows: &[[f64; 3]]) -> Vec<[f64; 3]> {
    let n = rows.len() as f64;
    let mut mean = [0.0; 3];
    let mut scale = [1.0; 3];
    for j in 0..3 {
        mean[j] = rows.iter().map(|r| r[j]).sum::<f64>() / n;
        let var = rows.iter().map(|r| (r[j] - mean[j]).powi(2)).sum::<f64>() / n;
        if var > 0.0 {
            scale[j] = var.sqrt();
        }
    }
    rows.iter()
        .map(|r| {
            let mut z = [0.0; 3];
            for j in 0..3 {
                z[j] = (r[j] - mean[j]) / scale[j];
            }
            z
        })
        .collect()
}

// ── k-means ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct KMeansFit {
    pub centroids: Vec<[f64; 3]>,
    pub labels:    Vec<usize>,
    pub inertia:   f64,
}

fn sq_dist(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    (0..3).map(|j| (a[j] - b[j]).powi(2)).sum()
}

fn nearest(point: &[f64; 3], centroids: &[[f64; 3]]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, centroid) in centroids.iter().enumerate() {
        let d = sq_dist(point, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

/// k-means++ seeding.
fn init_centroids(points: &[[f64; 3]], k: usize, rng: &mut StageRng) -> Vec<[f64; 3]> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.next_index(points.len())]);

    while centroids.len() < k {
        let dists: Vec<f64> = points.iter().map(|p| nearest(p, &centroids).1).collect();
        let total: f64 = dists.iter().sum();
        if total <= 0.0 {
            // Every point coincides with a centroid; any pick is as good.
            centroids.push(points[rng.next_index(points.len())]);
            continue;
        }
        let target = rng.next_f64() * total;
        let mut cumulative = 0.0;
        let mut chosen = points.len() - 1;
        for (i, d) in dists.iter().enumerate() {
            cumulative += d;
            if cumulative > target {
                chosen = i;
                break;
            }
        }
        centroids.push(points[chosen]);
    }
    centroids
}

fn lloyd(
    points: &[[f64; 3]],
    mut centroids: Vec<[f64; 3]>,
    config: &LabelingConfig,
) -> KMeansFit {
    let k = centroids.len();
    let mut labels = vec![0usize; points.len()];

    for _ in 0..config.max_iter {
        for (i, p) in points.iter().enumerate() {
            labels[i] = nearest(p, &centroids).0;
        }

        let mut sums = vec![[0.0; 3]; k];
        let mut counts = vec![0usize; k];
        for (p, &c) in points.iter().zip(&labels) {
            for j in 0..3 {
                sums[c][j] += p[j];
            }
            counts[c] += 1;
        }

        let mut next = centroids.clone();
        for c in 0..k {
            if counts[c] > 0 {
                for j in 0..3 {
                    next[c][j] = sums[c][j] / counts[c] as f64;
                }
            } else {
                // Empty cluster: re-seed at the point worst served by its centroid.
                let far = points
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (i, sq_dist(p, &centroids[labels[i]])))
                    .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                next[c] = points[far];
            }
        }

        let shift: f64 = centroids.iter().zip(&next).map(|(a, b)| sq_dist(a, b)).sum();
        centroids = next;
        if shift <= config.tolerance * config.tolerance {
            break;
        }
    }

    let mut inertia = 0.0;
    for (i, p) in points.iter().enumerate() {
        let (c, d) = nearest(p, &centroids);
        labels[i] = c;
        inertia += d;
    }
    KMeansFit { centroids, labels, inertia }
}

/// Best of `n_init` seeded k-means runs by inertia (first wins ties).
pub fn kmeans(points: &[[f64; 3]], config: &LabelingConfig, rng: &mut StageRng) -> KMeansFit {
    let mut best: Option<KMeansFit> = None;
    for _ in 0..config.n_init {
        let init = init_centroids(points, config.n_clusters, rng);
        let fit = lloyd(points, init, config);
        if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
            best = Some(fit);
        }
    }
    // n_init ≥ 1 is checked by RiskLabeler::label_rfm.
    best.unwrap_or_else(|| lloyd(points, init_centroids(points, config.n_clusters, rng), config))
}

// ── Ranking ──────────────────────────────────────────────────────────────────

fn cluster_profiles(rfm: &[RfmRecord], labels: &[usize], k: usize) -> Vec<ClusterProfile> {
    let mut profiles: Vec<ClusterProfile> = (0..k)
        .map(|cluster_id| ClusterProfile {
            cluster_id,
            size: 0,
            mean_recency: 0.0,
            mean_frequency: 0.0,
            mean_monetary: 0.0,
        })
        .collect();
    for (r, &c) in rfm.iter().zip(labels) {
        let p = &mut profiles[c];
        p.size += 1;
        p.mean_recency += r.recency as f64;
        p.mean_frequency += r.frequency as f64;
        p.mean_monetary += r.monetary;
    }
    profiles.retain(|p| p.size > 0);
    for p in &mut profiles {
        let n = p.size as f64;
        p.mean_recency /= n;
        p.mean_frequency /= n;
        p.mean_monetary /= n;
    }
    profiles
}

/// Riskiest first: stale, infrequent, low-spend.
fn risk_order(a: &ClusterProfile, b: &ClusterProfile) -> Ordering {
    b.mean_recency
        .total_cmp(&a.mean_recency)
        .then(a.mean_frequency.total_cmp(&b.mean_frequency))
        .then(a.mean_monetary.total_cmp(&b.mean_monetary))
        .then(a.cluster_id.cmp(&b.cluster_id))
}

// ── Labeler ──────────────────────────────────────────────────────────────────

pub struct RiskLabeler {
    config: LabelingConfig,
}

impl RiskLabeler {
    pub fn new(config: LabelingConfig) -> Self {
        Self { config }
    }

    /// Compute RFM from the raw log and label each customer.
    pub fn label(
        &self,
        transactions: &[Transaction],
        rng: &mut StageRng,
    ) -> RiskResult<LabelingOutcome> {
        let snapshot = snapshot_date(transactions)?;
        let rfm = compute_rfm(transactions)?;
        self.label_rfm(snapshot, rfm, rng)
    }

    /// Label precomputed RFM records.
    pub fn label_rfm(
        &self,
        snapshot_date: DateTime<Utc>,
        rfm: Vec<RfmRecord>,
        rng: &mut StageRng,
    ) -> RiskResult<LabelingOutcome> {
        let k = self.config.n_clusters;
        if k != CLUSTER_COUNT {
            return Err(RiskError::data(format!(
                "labeling needs {CLUSTER_COUNT} clusters, configured {k}"
            )));
        }
        if self.config.n_init == 0 {
            return Err(RiskError::data("labeling needs at least one k-means restart"));
        }
        if rfm.len() < k {
            return Err(RiskError::InsufficientData { required: k, actual: rfm.len() });
        }

        let raw: Vec<[f64; 3]> = rfm
            .iter()
            .map(|r| [r.recency as f64, r.frequency as f64, r.monetary])
            .collect();
        let scaled = standardize(&raw);
        let fit = kmeans(&scaled, &self.config, rng);

        let mut profiles = cluster_profiles(&rfm, &fit.labels, k);
        profiles.sort_by(risk_order);
        let high_risk_cluster = profiles[0].cluster_id;

        let assignments: Vec<ClusterAssignment> = rfm
            .iter()
            .zip(&fit.labels)
            .map(|(r, &cluster_id)| ClusterAssignment {
                customer_id: r.customer_id.clone(),
                cluster_id,
                is_high_risk: Label::from(cluster_id == high_risk_cluster),
            })
            .collect();

        let high_risk_count = assignments.iter().filter(|a| a.is_high_risk == 1).count();
        log::info!(
            "labeled {} customers into {} clusters: high-risk cluster={high_risk_cluster} ({high_risk_count} customers, inertia={:.4})",
            assignments.len(),
            profiles.len(),
            fit.inertia,
        );
        for p in &profiles {
            log::debug!(
                "cluster {}: size={} recency={:.2} frequency={:.2} monetary={:.2}",
                p.cluster_id, p.size, p.mean_recency, p.mean_frequency, p.mean_monetary,
            );
        }

        Ok(LabelingOutcome {
            snapshot_date,
            rfm,
            assignments,
            profiles,
            high_risk_cluster,
            inertia: fit.inertia,
        })
    }
}
