//! Unified `Database` trait — single async interface for all persistence.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::model::{
    FetchedDocument, Invoice, MatchResult, StoredEmailConfig, StoredPathConfig, Transaction,
};

/// Backend-agnostic database trait covering transactions, invoices,
/// matches, fetched documents, and the configuration tables.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Transactions ────────────────────────────────────────────────

    /// Insert transactions, skipping rows already present (fingerprint
    /// dedup). Returns the number actually inserted.
    async fn insert_transactions(&self, txns: &[Transaction]) -> Result<usize, DatabaseError>;

    /// List transactions ordered by date (unknown dates last).
    /// `limit` of `None` returns everything.
    async fn list_transactions(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>, DatabaseError>;

    // ── Invoices ────────────────────────────────────────────────────

    /// Insert or update an invoice, keyed by source file. A re-import of
    /// the same file refreshes the extracted fields but keeps the row id.
    async fn upsert_invoice(&self, invoice: &Invoice) -> Result<(), DatabaseError>;

    /// List all invoices, most recently imported first.
    async fn list_invoices(&self) -> Result<Vec<Invoice>, DatabaseError>;

    // ── Matches ─────────────────────────────────────────────────────

    /// Replace all match results with a fresh reconciliation run.
    async fn replace_matches(&self, results: &[MatchResult]) -> Result<(), DatabaseError>;

    /// List current match results.
    async fn list_matches(&self) -> Result<Vec<MatchResult>, DatabaseError>;

    // ── Fetched documents ───────────────────────────────────────────

    /// Check whether a mailbox document was already fetched.
    async fn has_document(&self, external_id: &str) -> Result<bool, DatabaseError>;

    /// Record a fetched document.
    async fn record_document(&self, doc: &FetchedDocument) -> Result<(), DatabaseError>;

    // ── Configuration ───────────────────────────────────────────────

    async fn get_email_config(&self) -> Result<Option<StoredEmailConfig>, DatabaseError>;

    async fn set_email_config(&self, config: &StoredEmailConfig) -> Result<(), DatabaseError>;

    async fn get_path_config(&self) -> Result<Option<StoredPathConfig>, DatabaseError>;

    async fn set_path_config(&self, config: &StoredPathConfig) -> Result<(), DatabaseError>;
}
