//! Raw transaction records and the CSV loader.
//!
//! The loader reads only the four columns the pipeline needs and
//! ignores the rest. Every malformed field is a DataError naming the
//! row and column, never a silent default.

use crate::{
    error::{RiskError, RiskResult},
    types::CustomerId,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::io::Read;

pub const COL_TRANSACTION_ID: &str = "TransactionId";
pub const COL_CUSTOMER_ID:    &str = "CustomerId";
pub const COL_AMOUNT:         &str = "Amount";
pub const COL_TIMESTAMP:      &str = "TransactionStartTime";

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub transaction_id: String,
    pub customer_id:    CustomerId,
    pub amount:         f64,
    pub timestamp:      DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        transaction_id: impl Into<String>,
        customer_id: impl Into<String>,
        amount: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            customer_id:    customer_id.into(),
            amount,
            timestamp,
        }
    }

    /// Check the invariants the aggregation stages rely on.
    pub fn validate(&self) -> RiskResult<()> {
        if self.customer_id.trim().is_empty() {
            return Err(RiskError::data(format!(
                "transaction {}: missing {COL_CUSTOMER_ID}",
                self.transaction_id
            )));
        }
        if !self.amount.is_finite() {
            return Err(RiskError::data(format!(
                "transaction {}: non-finite {COL_AMOUNT} ({})",
                self.transaction_id, self.amount
            )));
        }
        Ok(())
    }
}

/// Parse a timestamp in any of the layouts seen in transaction exports.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Load transactions from a CSV file.
pub fn load_transactions(path: &str) -> RiskResult<Vec<Transaction>> {
    let file = std::fs::File::open(path)
        .map_err(|e| RiskError::data(format!("cannot open {path}: {e}")))?;
    let transactions = read_transactions(file)?;
    log::info!("loaded {} transactions from {path}", transactions.len());
    Ok(transactions)
}

/// Read transactions from any CSV source with a header row.
pub fn read_transactions<R: Read>(source: R) -> RiskResult<Vec<Transaction>> {
    let mut rdr = csv::Reader::from_reader(source);
    let headers = rdr.headers()?.clone();

    let column = |name: &str| -> RiskResult<usize> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| RiskError::data(format!("missing required column '{name}'")))
    };
    let id_col       = column(COL_TRANSACTION_ID)?;
    let customer_col = column(COL_CUSTOMER_ID)?;
    let amount_col   = column(COL_AMOUNT)?;
    let time_col     = column(COL_TIMESTAMP)?;

    let mut out = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        // Header is line 1.
        let line = i + 2;
        let field = |idx: usize, name: &str| -> RiskResult<String> {
            match record.get(idx).map(str::trim) {
                Some(v) if !v.is_empty() => Ok(v.to_string()),
                _ => Err(RiskError::data(format!("line {line}: missing {name}"))),
            }
        };

        let transaction_id = field(id_col, COL_TRANSACTION_ID)?;
        let customer_id = field(customer_col, COL_CUSTOMER_ID)?;

        let raw_amount = field(amount_col, COL_AMOUNT)?;
        let amount: f64 = raw_amount.parse().map_err(|_| {
            RiskError::data(format!("line {line}: non-numeric {COL_AMOUNT} '{raw_amount}'"))
        })?;

        let raw_time = field(time_col, COL_TIMESTAMP)?;
        let timestamp = parse_timestamp(&raw_time).ok_or_else(|| {
            RiskError::data(format!("line {line}: unparseable {COL_TIMESTAMP} '{raw_time}'"))
        })?;

        let txn = Transaction { transaction_id, customer_id, amount, timestamp };
        txn.validate()?;
        out.push(txn);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    const HEADER: &str = "TransactionId,BatchId,CustomerId,Amount,TransactionStartTime\n";

    #[test]
    fn reads_required_columns_and_ignores_extras() {
        let csv = format!(
            "{HEADER}T1,B1,C1,100.0,2018-11-15T02:18:49Z\nT2,B1,C2,-50,2018-11-16 10:00:00\n"
        );
        let txns = read_transactions(csv.as_bytes()).unwrap();
        assert_eq!(txns.len(), 2);
        assert_eq!(txns[0].customer_id, "C1");
        assert_eq!(txns[0].timestamp.hour(), 2);
        assert_eq!(txns[1].amount, -50.0);
        assert_eq!(txns[1].timestamp.day(), 16);
    }

    #[test]
    fn non_numeric_amount_is_a_data_error() {
        let csv = format!("{HEADER}T1,B1,C1,abc,2018-11-15\n");
        let err = read_transactions(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, RiskError::Data(ref m) if m.contains("line 2")), "{err}");
    }

    #[test]
    fn missing_customer_is_a_data_error() {
        let csv = format!("{HEADER}T1,B1,,10,2018-11-15\n");
        assert!(matches!(read_transactions(csv.as_bytes()), Err(RiskError::Data(_))));
    }

    #[test]
    fn missing_column_is_a_data_error() {
        let csv = "TransactionId,CustomerId,Amount\nT1,C1,10\n";
        let err = read_transactions(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains(COL_TIMESTAMP));
    }

    #[test]
    fn date_only_timestamps_parse_to_midnight() {
        let ts = parse_timestamp("2019-02-13").unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day(), ts.hour()), (2019, 2, 13, 0));
        assert!(parse_timestamp("13/02/2019").is_none());
    }
}
