use chrono::{Duration, TimeZone, Utc};
use credit_risk_core::{
    config::LabelingConfig,
    error::RiskError,
    risk_labeler::{compute_rfm, snapshot_date, RiskLabeler},
    rng::{RngBank, StageSlot},
    transaction::Transaction,
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn txn(id: usize, customer: usize, amount: f64, day: i64) -> Transaction {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 8, 30, 0).unwrap();
    Transaction::new(format!("T{id}"), format!("C{customer:03}"), amount, base + Duration::days(day))
}

/// Three behavioural groups: dormant single-purchase customers last seen
/// early, regulars in the middle, frequent buyers near the end.
fn synthetic_transactions(n_customers: usize) -> Vec<Transaction> {
    let mut out = Vec::new();
    let mut id = 0;
    for c in 0..n_customers {
        let (first_day, count) = match c % 3 {
            0 => ((c % 4) as i64, 1),
            1 => (45 + (c % 4) as i64, 3),
            _ => (85 + (c % 4) as i64, 5),
        };
        for j in 0..count {
            let amount = 50.0 + ((c * 37 + j * 11) % 40) as f64;
            out.push(txn(id, c, amount, first_day + j as i64));
            id += 1;
        }
    }
    out
}

fn label(txns: &[Transaction], seed: u64) -> credit_risk_core::risk_labeler::LabelingOutcome {
    let mut rng = RngBank::new(seed).for_stage(StageSlot::Clustering);
    RiskLabeler::new(LabelingConfig::default()).label(txns, &mut rng).unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// Same input and seed produce identical cluster ids and labels.
#[test]
fn labeling_is_deterministic_for_a_seed() {
    let txns = synthetic_transactions(30);

    let a = label(&txns, 42);
    let b = label(&txns, 42);

    assert_eq!(a.assignments, b.assignments);
    assert_eq!(a.high_risk_cluster, b.high_risk_cluster);
    assert_eq!(a.inertia.to_bits(), b.inertia.to_bits());
}

/// Exactly one cluster id carries is_high_risk = 1, and every member of
/// it is labeled.
#[test]
fn exactly_one_cluster_is_high_risk() {
    let txns = synthetic_transactions(30);

    let outcome = label(&txns, 7);

    let mut high: Vec<usize> = outcome
        .assignments
        .iter()
        .filter(|a| a.is_high_risk == 1)
        .map(|a| a.cluster_id)
        .collect();
    high.dedup();
    assert_eq!(high, vec![outcome.high_risk_cluster]);
    for a in &outcome.assignments {
        assert_eq!(a.is_high_risk == 1, a.cluster_id == outcome.high_risk_cluster);
        assert!(a.cluster_id < 3);
    }
}

/// The dormant group (largest recency) becomes the high-risk cluster.
#[test]
fn dormant_customers_are_high_risk() {
    let txns = synthetic_transactions(30);

    let outcome = label(&txns, 42);

    for a in &outcome.assignments {
        let customer: usize = a.customer_id[1..].parse().unwrap();
        assert_eq!(a.is_high_risk == 1, customer % 3 == 0, "{a:?}");
    }
    let top = &outcome.profiles[0];
    assert!(outcome.profiles[1..].iter().all(|p| p.mean_recency <= top.mean_recency));
}

/// Snapshot is one day past the last transaction; recency is floored days.
#[test]
fn rfm_uses_snapshot_one_day_after_last_transaction() {
    let txns = vec![txn(1, 1, 100.0, 0), txn(2, 1, 300.0, 1), txn(3, 2, 20.0, 10)];

    let snapshot = snapshot_date(&txns).unwrap();
    let rfm = compute_rfm(&txns).unwrap();

    assert_eq!(snapshot, txns[2].timestamp + Duration::days(1));
    let c1 = rfm.iter().find(|r| r.customer_id == "C001").unwrap();
    assert_eq!((c1.recency, c1.frequency, c1.monetary), (10, 2, 400.0));
    let c2 = rfm.iter().find(|r| r.customer_id == "C002").unwrap();
    assert_eq!((c2.recency, c2.frequency), (1, 1));
}

/// Fewer distinct customers than clusters cannot be labeled.
#[test]
fn fewer_customers_than_clusters_is_insufficient_data() {
    let txns = vec![txn(1, 1, 10.0, 0), txn(2, 2, 20.0, 1), txn(3, 2, 5.0, 2)];
    let mut rng = RngBank::new(42).for_stage(StageSlot::Clustering);

    let err = RiskLabeler::new(LabelingConfig::default())
        .label(&txns, &mut rng)
        .unwrap_err();

    assert!(
        matches!(err, RiskError::InsufficientData { required: 3, actual: 2 }),
        "{err}"
    );
}

/// The risk tiers are fixed at three; any other cluster count is refused
/// before clustering starts.
#[test]
fn cluster_count_other_than_three_is_rejected() {
    let txns = synthetic_transactions(12);
    let mut rng = RngBank::new(42).for_stage(StageSlot::Clustering);

    for n_clusters in [0, 2, 4] {
        let config = LabelingConfig { n_clusters, ..LabelingConfig::default() };
        let err = RiskLabeler::new(config).label(&txns, &mut rng).unwrap_err();
        assert!(matches!(err, RiskError::Data(_)), "n_clusters={n_clusters}: {err}");
    }
}

/// Zero k-means restarts is a configuration error, not a panic.
#[test]
fn zero_restarts_is_rejected() {
    let txns = synthetic_transactions(12);
    let mut rng = RngBank::new(42).for_stage(StageSlot::Clustering);

    let config = LabelingConfig { n_init: 0, ..LabelingConfig::default() };
    let err = RiskLabeler::new(config).label(&txns, &mut rng).unwrap_err();
    assert!(matches!(err, RiskError::Data(_)), "{err}");
}
