use chrono::{Duration, TimeZone, Utc};
use credit_risk_core::{
    aggregator::{aggregate, to_feature_table, FEATURE_NAMES},
    error::RiskError,
    transaction::{read_transactions, Transaction},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn txn(id: &str, customer: &str, amount: f64, day: i64) -> Transaction {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    Transaction::new(id, customer, amount, base + Duration::days(day))
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// C1 = [(100, day 1), (300, day 2)] → total 400, mean 200, count 2,
/// sample std ≈ 141.42.
#[test]
fn two_transaction_customer_has_sample_statistics() {
    let txns = vec![txn("T1", "C1", 100.0, 1), txn("T2", "C1", 300.0, 2)];

    let aggs = aggregate(&txns).unwrap();

    assert_eq!(aggs.len(), 1);
    let c1 = &aggs[0];
    assert_eq!(c1.customer_id, "C1");
    assert_eq!(c1.total_amount, 400.0);
    assert_eq!(c1.avg_amount, 200.0);
    assert_eq!(c1.transaction_count, 2);
    assert!((c1.std_amount - 141.42).abs() < 0.01, "std_amount={}", c1.std_amount);
}

/// A customer with one transaction has std_amount exactly 0, never NaN.
#[test]
fn single_transaction_customer_has_zero_std() {
    let txns = vec![txn("T1", "C9", 42.5, 3)];

    let aggs = aggregate(&txns).unwrap();

    assert_eq!(aggs[0].std_amount, 0.0);
    assert_eq!(aggs[0].avg_amount, 42.5);
}

/// Every customer has count ≥ 1 and the counts sum to the input length.
/// Output is ordered by customer id regardless of input order.
#[test]
fn counts_cover_every_transaction() {
    let txns = vec![
        txn("T1", "C3", 10.0, 1),
        txn("T2", "C1", 20.0, 2),
        txn("T3", "C3", -5.0, 3),
        txn("T4", "C2", 7.0, 4),
        txn("T5", "C3", 1.0, 5),
    ];

    let aggs = aggregate(&txns).unwrap();

    let ids: Vec<&str> = aggs.iter().map(|a| a.customer_id.as_str()).collect();
    assert_eq!(ids, vec!["C1", "C2", "C3"]);
    assert!(aggs.iter().all(|a| a.transaction_count >= 1));
    let total: u64 = aggs.iter().map(|a| a.transaction_count).sum();
    assert_eq!(total as usize, txns.len());
}

#[test]
fn empty_input_is_a_data_error() {
    assert!(matches!(aggregate(&[]), Err(RiskError::Data(_))));
}

/// Non-finite amounts are rejected, not averaged into the result.
#[test]
fn non_finite_amount_is_a_data_error() {
    let txns = vec![txn("T1", "C1", 10.0, 1), txn("T2", "C1", f64::NAN, 2)];
    assert!(matches!(aggregate(&txns), Err(RiskError::Data(_))));
}

/// The feature table exposes the four aggregates as named numeric columns.
#[test]
fn feature_table_follows_feature_names() {
    let csv = "TransactionId,CustomerId,Amount,TransactionStartTime\n\
               T1,C1,100,2024-01-02\n\
               T2,C1,300,2024-01-03\n\
               T3,C2,50,2024-01-03 12:00:00\n";
    let txns = read_transactions(csv.as_bytes()).unwrap();
    let aggs = aggregate(&txns).unwrap();

    let table = to_feature_table(&aggs);

    assert_eq!(table.n_rows(), 2);
    let names: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, FEATURE_NAMES.to_vec());
    assert_eq!(aggs[1].features(), [50.0, 50.0, 1.0, 0.0]);
}
