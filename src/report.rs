//! Statement summaries and CSV export.

use std::path::Path;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::ExtractError;
use crate::model::{Transaction, TxnKind};

/// Aggregate figures for a set of transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementSummary {
    pub count: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub credit_total: Decimal,
    pub debit_total: Decimal,
}

/// Summarize transactions: count, date range, credit/debit totals.
pub fn summarize(txns: &[Transaction]) -> StatementSummary {
    let dates: Vec<NaiveDate> = txns.iter().filter_map(|t| t.occurred_on).collect();
    let credit_total = txns
        .iter()
        .filter(|t| t.kind == TxnKind::Credit)
        .map(|t| t.amount)
        .sum();
    let debit_total = txns
        .iter()
        .filter(|t| t.kind == TxnKind::Debit)
        .map(|t| t.amount)
        .sum();

    StatementSummary {
        count: txns.len(),
        first_date: dates.iter().min().copied(),
        last_date: dates.iter().max().copied(),
        credit_total,
        debit_total,
    }
}

impl std::fmt::Display for StatementSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Total transactions found: {}", self.count)?;
        if let (Some(first), Some(last)) = (self.first_date, self.last_date) {
            writeln!(f, "Date range: {first} to {last}")?;
        }
        writeln!(f, "Total credits: {:.2}", self.credit_total)?;
        write!(f, "Total debits: {:.2}", self.debit_total)
    }
}

/// Write transactions to a CSV file for verification.
pub fn export_csv(txns: &[Transaction], path: &Path) -> Result<(), ExtractError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["date", "description", "amount", "type", "source_file"])?;

    for txn in txns {
        writer.write_record([
            txn.occurred_on
                .map(|d| d.to_string())
                .unwrap_or_default(),
            txn.description.clone(),
            txn.amount.to_string(),
            txn.kind.to_string(),
            txn.source_file.clone().unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample() -> Vec<Transaction> {
        vec![
            Transaction::new(
                NaiveDate::from_ymd_opt(2024, 3, 1),
                "DEPOSITO",
                dec!(300.00),
                TxnKind::Credit,
            ),
            Transaction::new(
                NaiveDate::from_ymd_opt(2024, 3, 5),
                "COMPRA A",
                dec!(-45.90),
                TxnKind::Debit,
            ),
            Transaction::new(
                NaiveDate::from_ymd_opt(2024, 3, 9),
                "COMPRA B",
                dec!(-4.10),
                TxnKind::Debit,
            ),
        ]
    }

    #[test]
    fn summary_totals_and_range() {
        let summary = summarize(&sample());
        assert_eq!(summary.count, 3);
        assert_eq!(summary.first_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(summary.last_date, NaiveDate::from_ymd_opt(2024, 3, 9));
        assert_eq!(summary.credit_total, dec!(300.00));
        assert_eq!(summary.debit_total, dec!(-50.00));
    }

    #[test]
    fn summary_of_empty_set() {
        let summary = summarize(&[]);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.first_date, None);
        assert_eq!(summary.credit_total, Decimal::ZERO);
    }

    #[test]
    fn csv_export_roundtrips_through_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        export_csv(&sample(), &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some("date,description,amount,type,source_file")
        );
        assert!(content.contains("2024-03-05,COMPRA A,-45.90,DEBIT,"));
    }
}
