use credit_risk_core::{
    config::WoeConfig,
    error::RiskError,
    woe_transformer::{ColumnFit, FeatureColumn, FeatureTable, IvStrength, WoeTransformer},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Events concentrate above 12, with one event below and one non-event
/// above so neither side is pure.
fn labels() -> Vec<u8> {
    (0..20u8)
        .map(|i| u8::from((i >= 12 && i != 17) || i == 5))
        .collect()
}

fn signal_column() -> FeatureColumn {
    FeatureColumn::numeric("signal", (0..20).map(f64::from).collect())
}

fn noise_column() -> FeatureColumn {
    FeatureColumn::numeric("noise", (0..20).map(|i| f64::from((i * 7) % 20)).collect())
}

fn channel_column() -> FeatureColumn {
    let values = (0..20)
        .map(|i| match i % 3 {
            0 => "web",
            1 => "app",
            _ => "branch",
        })
        .map(String::from)
        .collect();
    FeatureColumn::categorical("channel", values)
}

fn transformer() -> WoeTransformer {
    WoeTransformer::new(WoeConfig::default())
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// A monotonic signal is binned into at least two bins with positive IV,
/// and higher values map to higher WOE.
#[test]
fn monotonic_signal_is_binned_with_positive_iv() {
    let table = FeatureTable::new(vec![signal_column()]);

    let out = transformer().fit_transform(&table, &labels()).unwrap();

    let ColumnFit::Fitted { binning, bins, iv } = &out.encoder.columns[0].fit else {
        panic!("signal column failed to fit");
    };
    assert!(binning.n_bins() >= 2, "bins: {bins:?}");
    assert!(*iv > 0.0);
    assert!(bins.iter().all(|b| b.events > 0 && b.non_events > 0), "pure bin left: {bins:?}");
    let woe = &out.table.columns[0];
    assert!(woe[19] > woe[0]);
    assert_eq!(out.table.names, vec!["woe_signal".to_string()]);
}

/// A column that cannot be fitted becomes all-zero WOE with IV 0, and the
/// other columns come out exactly as if it were absent.
#[test]
fn failed_column_is_zeroed_without_affecting_others() {
    let mut broken_values: Vec<f64> = (0..20).map(f64::from).collect();
    broken_values[4] = f64::NAN;
    let broken = FeatureColumn::numeric("broken", broken_values);

    let with_broken = FeatureTable::new(vec![signal_column(), broken, noise_column()]);
    let without = FeatureTable::new(vec![signal_column(), noise_column()]);

    let out = transformer().fit_transform(&with_broken, &labels()).unwrap();
    let reference = transformer().fit_transform(&without, &labels()).unwrap();

    let broken_fit = &out.encoder.columns[1].fit;
    assert!(broken_fit.is_failed());
    assert_eq!(broken_fit.iv(), 0.0);
    assert!(out.table.columns[1].iter().all(|&w| w == 0.0));

    assert_eq!(out.table.columns[0], reference.table.columns[0]);
    assert_eq!(out.table.columns[2], reference.table.columns[1]);
    assert_eq!(out.encoder.columns[0].fit, reference.encoder.columns[0].fit);
}

/// The IV table has one row per feature, sorted by IV descending.
#[test]
fn iv_table_covers_every_feature_sorted_descending() {
    let table = FeatureTable::new(vec![noise_column(), channel_column(), signal_column()]);

    let out = transformer().fit_transform(&table, &labels()).unwrap();

    assert_eq!(out.iv_table.len(), 3);
    for pair in out.iv_table.windows(2) {
        assert!(pair[0].iv >= pair[1].iv, "{:?}", out.iv_table);
    }
    for row in &out.iv_table {
        assert_eq!(row.strength, IvStrength::classify(row.iv));
    }
    assert_eq!(out.iv_table[0].feature, "signal");
}

/// Categories never seen during fitting transform to WOE 0.
#[test]
fn unseen_category_maps_to_zero() {
    let table = FeatureTable::new(vec![channel_column()]);
    let out = transformer().fit_transform(&table, &labels()).unwrap();

    let fresh = FeatureTable::new(vec![FeatureColumn::categorical(
        "channel",
        vec!["kiosk".to_string(), "web".to_string()],
    )]);
    let woe = out.encoder.transform(&fresh).unwrap();

    assert_eq!(woe.columns[0][0], 0.0);
    assert_eq!(woe.columns[0][1], out.table.columns[0][0]);
}

/// A single-class label fails every column instead of aborting the table.
#[test]
fn single_class_label_fails_every_column() {
    let table = FeatureTable::new(vec![signal_column(), channel_column()]);

    let out = transformer().fit_transform(&table, &[1; 20]).unwrap();

    assert!(out.encoder.columns.iter().all(|c| c.fit.is_failed()));
    assert!(out.iv_table.iter().all(|r| r.iv == 0.0));
    assert_eq!(out.table.n_rows(), 20);
}

/// Row-count disagreement between features and labels is a data error.
#[test]
fn label_length_mismatch_is_a_data_error() {
    let table = FeatureTable::new(vec![signal_column()]);

    let err = transformer().fit_transform(&table, &labels()[..10]).unwrap_err();

    assert!(matches!(err, RiskError::Data(_)), "{err}");
}

#[test]
fn iv_strength_bands() {
    assert_eq!(IvStrength::classify(0.01), IvStrength::Useless);
    assert_eq!(IvStrength::classify(0.05), IvStrength::Weak);
    assert_eq!(IvStrength::classify(0.2), IvStrength::Medium);
    assert_eq!(IvStrength::classify(0.4), IvStrength::Strong);
    assert_eq!(IvStrength::classify(0.9), IvStrength::Suspicious);
}
