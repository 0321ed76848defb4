//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Amounts are stored as
//! text (Decimal round-trips exactly), dates as ISO 8601, timestamps as
//! RFC 3339.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::model::{
    FetchedDocument, Invoice, MatchResult, MatchStatus, StoredEmailConfig, StoredPathConfig,
    Transaction, TxnKind,
};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn parse_decimal(s: &str) -> Decimal {
    s.parse().unwrap_or_default()
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Convert `Option<String>` to a libsql Value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

const TRANSACTION_COLUMNS: &str = "id, occurred_on, description, amount, kind, source_file";

const INVOICE_COLUMNS: &str =
    "id, source_file, vendor, invoice_no, issued_on, currency, total, imported_at";

const MATCH_COLUMNS: &str =
    "id, invoice_id, transaction_id, status, date_delta_days, score, matched_at";

/// Map a libsql Row to a Transaction. Column order matches TRANSACTION_COLUMNS.
fn row_to_transaction(row: &libsql::Row) -> Result<Transaction, libsql::Error> {
    let id_str: String = row.get(0)?;
    let occurred: Option<String> = row.get(1).ok();
    let description: String = row.get(2)?;
    let amount_str: String = row.get(3)?;
    let kind_str: String = row.get(4)?;
    let source_file: Option<String> = row.get(5).ok();

    Ok(Transaction {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        occurred_on: occurred.as_deref().and_then(parse_date),
        description,
        amount: parse_decimal(&amount_str),
        kind: kind_str.parse().unwrap_or(TxnKind::Unknown),
        source_file,
    })
}

/// Map a libsql Row to an Invoice. Column order matches INVOICE_COLUMNS.
fn row_to_invoice(row: &libsql::Row) -> Result<Invoice, libsql::Error> {
    let id_str: String = row.get(0)?;
    let source_file: String = row.get(1)?;
    let vendor: Option<String> = row.get(2).ok();
    let invoice_no: Option<String> = row.get(3).ok();
    let issued: Option<String> = row.get(4).ok();
    let currency: Option<String> = row.get(5).ok();
    let total: Option<String> = row.get(6).ok();
    let imported_str: String = row.get(7)?;

    Ok(Invoice {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        source_file,
        vendor,
        invoice_no,
        issued_on: issued.as_deref().and_then(parse_date),
        currency,
        total: total.as_deref().map(parse_decimal),
        imported_at: parse_datetime(&imported_str),
    })
}

/// Map a libsql Row to a MatchResult. Column order matches MATCH_COLUMNS.
fn row_to_match(row: &libsql::Row) -> Result<MatchResult, libsql::Error> {
    let id_str: String = row.get(0)?;
    let invoice_str: String = row.get(1)?;
    let txn_str: Option<String> = row.get(2).ok();
    let status_str: String = row.get(3)?;
    let delta: Option<i64> = row.get(4).ok();
    let score: f64 = row.get(5)?;
    let matched_str: String = row.get(6)?;

    Ok(MatchResult {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        invoice_id: Uuid::parse_str(&invoice_str).unwrap_or_else(|_| Uuid::nil()),
        transaction_id: txn_str.as_deref().and_then(|s| Uuid::parse_str(s).ok()),
        status: status_str.parse().unwrap_or(MatchStatus::Unmatched),
        date_delta_days: delta,
        score: score as f32,
        matched_at: parse_datetime(&matched_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::init_schema(self.conn()).await
    }

    // ── Transactions ────────────────────────────────────────────────

    async fn insert_transactions(&self, txns: &[Transaction]) -> Result<usize, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let mut inserted = 0usize;

        for txn in txns {
            let count = conn
                .execute(
                    "INSERT OR IGNORE INTO transactions
                        (id, fingerprint, occurred_on, description, amount, kind, source_file, imported_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        txn.id.to_string(),
                        txn.fingerprint(),
                        opt_text_owned(txn.occurred_on.map(|d| d.to_string())),
                        txn.description.clone(),
                        txn.amount.to_string(),
                        txn.kind.to_string(),
                        opt_text(txn.source_file.as_deref()),
                        now.clone(),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("insert_transactions: {e}")))?;
            inserted += count as usize;
        }

        debug!(
            offered = txns.len(),
            inserted, "Transactions inserted into DB"
        );
        Ok(inserted)
    }

    async fn list_transactions(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>, DatabaseError> {
        let conn = self.conn();
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions
                     ORDER BY occurred_on IS NULL, occurred_on ASC LIMIT ?1"
                ),
                params![limit],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_transactions: {e}")))?;

        let mut txns = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_transaction(&row) {
                Ok(txn) => txns.push(txn),
                Err(e) => {
                    tracing::warn!("Skipping transaction row: {e}");
                }
            }
        }
        Ok(txns)
    }

    // ── Invoices ────────────────────────────────────────────────────

    async fn upsert_invoice(&self, invoice: &Invoice) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO invoices
                (id, source_file, vendor, invoice_no, issued_on, currency, total, imported_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (source_file) DO UPDATE SET
                vendor = excluded.vendor,
                invoice_no = excluded.invoice_no,
                issued_on = excluded.issued_on,
                currency = excluded.currency,
                total = excluded.total,
                imported_at = excluded.imported_at",
            params![
                invoice.id.to_string(),
                invoice.source_file.clone(),
                opt_text(invoice.vendor.as_deref()),
                opt_text(invoice.invoice_no.as_deref()),
                opt_text_owned(invoice.issued_on.map(|d| d.to_string())),
                opt_text(invoice.currency.as_deref()),
                opt_text_owned(invoice.total.map(|t| t.to_string())),
                invoice.imported_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_invoice: {e}")))?;

        debug!(invoice_id = %invoice.id, source = %invoice.source_file, "Invoice upserted");
        Ok(())
    }

    async fn list_invoices(&self) -> Result<Vec<Invoice>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {INVOICE_COLUMNS} FROM invoices ORDER BY imported_at DESC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_invoices: {e}")))?;

        let mut invoices = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_invoice(&row) {
                Ok(invoice) => invoices.push(invoice),
                Err(e) => {
                    tracing::warn!("Skipping invoice row: {e}");
                }
            }
        }
        Ok(invoices)
    }

    // ── Matches ─────────────────────────────────────────────────────

    async fn replace_matches(&self, results: &[MatchResult]) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute("DELETE FROM matches", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("clear matches: {e}")))?;

        for result in results {
            conn.execute(
                "INSERT INTO matches
                    (id, invoice_id, transaction_id, status, date_delta_days, score, matched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    result.id.to_string(),
                    result.invoice_id.to_string(),
                    opt_text_owned(result.transaction_id.map(|id| id.to_string())),
                    result.status.label(),
                    opt_int(result.date_delta_days),
                    result.score as f64,
                    result.matched_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert match: {e}")))?;
        }

        debug!(count = results.len(), "Match results replaced in DB");
        Ok(())
    }

    async fn list_matches(&self) -> Result<Vec<MatchResult>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {MATCH_COLUMNS} FROM matches ORDER BY matched_at DESC, id"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_matches: {e}")))?;

        let mut matches = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_match(&row) {
                Ok(m) => matches.push(m),
                Err(e) => {
                    tracing::warn!("Skipping match row: {e}");
                }
            }
        }
        Ok(matches)
    }

    // ── Fetched documents ───────────────────────────────────────────

    async fn has_document(&self, external_id: &str) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM documents WHERE external_id = ?1",
                params![external_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_document: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(count > 0)
            }
            _ => Ok(false),
        }
    }

    async fn record_document(&self, doc: &FetchedDocument) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO documents
                (id, external_id, source, sender, subject, received_at, attachment_path, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                doc.id.to_string(),
                doc.external_id.clone(),
                doc.source.clone(),
                doc.sender.clone(),
                opt_text(doc.subject.as_deref()),
                doc.received_at.to_rfc3339(),
                doc.attachment_path.clone(),
                doc.fetched_at.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("record_document: {e}")))?;

        debug!(external_id = %doc.external_id, "Document recorded");
        Ok(())
    }

    // ── Configuration ───────────────────────────────────────────────

    async fn get_email_config(&self) -> Result<Option<StoredEmailConfig>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT host, port, username, password FROM email_config WHERE id = 1",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_email_config: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let port: i64 = row.get(1).unwrap_or(993);
                Ok(Some(StoredEmailConfig {
                    host: row.get(0).unwrap_or_default(),
                    port: port as u16,
                    username: row.get(2).unwrap_or_default(),
                    password: row.get(3).unwrap_or_default(),
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_email_config: {e}"))),
        }
    }

    async fn set_email_config(&self, config: &StoredEmailConfig) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO email_config (id, host, port, username, password)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO UPDATE SET
                host = excluded.host,
                port = excluded.port,
                username = excluded.username,
                password = excluded.password",
            params![
                config.host.clone(),
                config.port as i64,
                config.username.clone(),
                config.password.clone(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_email_config: {e}")))?;
        Ok(())
    }

    async fn get_path_config(&self) -> Result<Option<StoredPathConfig>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT statements_path, invoices_path FROM path_config WHERE id = 1",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_path_config: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(StoredPathConfig {
                statements_path: row.get(0).unwrap_or_default(),
                invoices_path: row.get(1).unwrap_or_default(),
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_path_config: {e}"))),
        }
    }

    async fn set_path_config(&self, config: &StoredPathConfig) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO path_config (id, statements_path, invoices_path)
             VALUES (1, ?1, ?2)
             ON CONFLICT (id) DO UPDATE SET
                statements_path = excluded.statements_path,
                invoices_path = excluded.invoices_path",
            params![config.statements_path.clone(), config.invoices_path.clone()],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("set_path_config: {e}")))?;
        Ok(())
    }
}
