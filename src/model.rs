//! Core domain types shared across extraction, matching, and storage.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Transactions ────────────────────────────────────────────────────

/// Direction of a bank-statement transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxnKind {
    Credit,
    Debit,
    Unknown,
}

impl std::fmt::Display for TxnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Credit => "CREDIT",
            Self::Debit => "DEBIT",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TxnKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CREDIT" => Self::Credit,
            "DEBIT" => Self::Debit,
            _ => Self::Unknown,
        })
    }
}

/// A single bank-statement transaction.
///
/// `occurred_on` is `None` when the source carried a date the parser could
/// not interpret — the row is kept but sorts last.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub occurred_on: Option<NaiveDate>,
    pub description: String,
    pub amount: Decimal,
    pub kind: TxnKind,
    /// File name of the statement this row came from (set during batch scans).
    pub source_file: Option<String>,
}

impl Transaction {
    pub fn new(
        occurred_on: Option<NaiveDate>,
        description: impl Into<String>,
        amount: Decimal,
        kind: TxnKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_on,
            description: description.into(),
            amount,
            kind,
            source_file: None,
        }
    }

    /// Dedup key: one logical row per (source, date, description, amount).
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.source_file.as_deref().unwrap_or(""),
            self.occurred_on
                .map(|d| d.to_string())
                .unwrap_or_default(),
            self.description,
            self.amount,
        )
    }
}

/// Sort transactions by date ascending, rows with unknown dates last.
pub fn sort_by_date(txns: &mut [Transaction]) {
    txns.sort_by(|a, b| match (a.occurred_on, b.occurred_on) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

// ── Invoices ────────────────────────────────────────────────────────

/// Structured fields extracted from an invoice document.
///
/// All scalar fields are optional — extraction is heuristic and partial
/// results are still useful for matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub source_file: String,
    pub vendor: Option<String>,
    pub invoice_no: Option<String>,
    pub issued_on: Option<NaiveDate>,
    pub currency: Option<String>,
    pub total: Option<Decimal>,
    pub imported_at: DateTime<Utc>,
}

impl Invoice {
    pub fn new(source_file: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_file: source_file.into(),
            vendor: None,
            invoice_no: None,
            issued_on: None,
            currency: None,
            total: None,
            imported_at: Utc::now(),
        }
    }

    /// How many scalar fields were successfully extracted.
    pub fn coverage(&self) -> (usize, usize) {
        let filled = [
            self.vendor.is_some(),
            self.invoice_no.is_some(),
            self.issued_on.is_some(),
            self.currency.is_some(),
            self.total.is_some(),
        ]
        .iter()
        .filter(|&&v| v)
        .count();
        (filled, 5)
    }
}

// ── Matching ────────────────────────────────────────────────────────

/// Outcome of matching one invoice against the transaction ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Exactly one best candidate transaction.
    Matched,
    /// Multiple candidates at the same date distance — needs human review.
    Ambiguous,
    /// No candidate transaction.
    Unmatched,
}

impl MatchStatus {
    /// Short label for logging and DB storage.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Ambiguous => "ambiguous",
            Self::Unmatched => "unmatched",
        }
    }
}

impl std::str::FromStr for MatchStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "matched" => Self::Matched,
            "ambiguous" => Self::Ambiguous,
            _ => Self::Unmatched,
        })
    }
}

/// One invoice's reconciliation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub id: Uuid,
    pub invoice_id: Uuid,
    /// Set only for `Matched`.
    pub transaction_id: Option<Uuid>,
    pub status: MatchStatus,
    /// Days between invoice date and transaction date, when both are known.
    pub date_delta_days: Option<i64>,
    pub score: f32,
    pub matched_at: DateTime<Utc>,
}

/// Aggregate reconciliation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub results: Vec<MatchResult>,
    pub matched: usize,
    pub ambiguous: usize,
    pub unmatched: usize,
}

impl ReconcileReport {
    pub fn from_results(results: Vec<MatchResult>) -> Self {
        let matched = results
            .iter()
            .filter(|r| r.status == MatchStatus::Matched)
            .count();
        let ambiguous = results
            .iter()
            .filter(|r| r.status == MatchStatus::Ambiguous)
            .count();
        let unmatched = results
            .iter()
            .filter(|r| r.status == MatchStatus::Unmatched)
            .count();
        Self {
            results,
            matched,
            ambiguous,
            unmatched,
        }
    }
}

// ── Fetched documents ───────────────────────────────────────────────

/// A document retrieved from a mailbox and saved to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedDocument {
    pub id: Uuid,
    /// Mailbox-native identifier (Message-ID header or Graph message id).
    pub external_id: String,
    /// Retrieval source: "imap" or "graph".
    pub source: String,
    pub sender: String,
    pub subject: Option<String>,
    pub received_at: DateTime<Utc>,
    /// Where the attachment was written.
    pub attachment_path: String,
    pub fetched_at: DateTime<Utc>,
}

// ── Stored configuration ────────────────────────────────────────────

/// Mailbox credentials persisted in the `email_config` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEmailConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Working directories persisted in the `path_config` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPathConfig {
    pub statements_path: String,
    pub invoices_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn txn_kind_roundtrip() {
        assert_eq!(TxnKind::Credit.to_string(), "CREDIT");
        assert_eq!("DEBIT".parse::<TxnKind>().unwrap(), TxnKind::Debit);
        assert_eq!("whatever".parse::<TxnKind>().unwrap(), TxnKind::Unknown);
    }

    #[test]
    fn sort_puts_unknown_dates_last() {
        let mut txns = vec![
            Transaction::new(None, "no date", dec!(1.00), TxnKind::Unknown),
            Transaction::new(
                NaiveDate::from_ymd_opt(2024, 3, 2),
                "second",
                dec!(2.00),
                TxnKind::Credit,
            ),
            Transaction::new(
                NaiveDate::from_ymd_opt(2024, 3, 1),
                "first",
                dec!(3.00),
                TxnKind::Debit,
            ),
        ];
        sort_by_date(&mut txns);
        assert_eq!(txns[0].description, "first");
        assert_eq!(txns[1].description, "second");
        assert_eq!(txns[2].description, "no date");
    }

    #[test]
    fn fingerprint_ignores_id() {
        let a = Transaction::new(
            NaiveDate::from_ymd_opt(2024, 1, 5),
            "COMPRA LOJA",
            dec!(-12.50),
            TxnKind::Debit,
        );
        let b = Transaction::new(
            NaiveDate::from_ymd_opt(2024, 1, 5),
            "COMPRA LOJA",
            dec!(-12.50),
            TxnKind::Debit,
        );
        assert_ne!(a.id, b.id);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn invoice_coverage_counts_filled_fields() {
        let mut inv = Invoice::new("fatura_001.pdf");
        assert_eq!(inv.coverage(), (0, 5));
        inv.total = Some(dec!(150.00));
        inv.invoice_no = Some("2024/007".into());
        assert_eq!(inv.coverage(), (2, 5));
    }

    #[test]
    fn report_tallies_statuses() {
        let mk = |status| MatchResult {
            id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            transaction_id: None,
            status,
            date_delta_days: None,
            score: 0.0,
            matched_at: Utc::now(),
        };
        let report = ReconcileReport::from_results(vec![
            mk(MatchStatus::Matched),
            mk(MatchStatus::Matched),
            mk(MatchStatus::Ambiguous),
            mk(MatchStatus::Unmatched),
        ]);
        assert_eq!(report.matched, 2);
        assert_eq!(report.ambiguous, 1);
        assert_eq!(report.unmatched, 1);
    }
}
