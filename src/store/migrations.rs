//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `init_schema()` checks the
//! current version and applies only the new ones sequentially.

use libsql::{Connection, params};

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL UNIQUE,
            occurred_on TEXT,
            description TEXT NOT NULL,
            amount TEXT NOT NULL,
            kind TEXT NOT NULL,
            source_file TEXT,
            imported_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_transactions_occurred ON transactions(occurred_on);

        CREATE TABLE IF NOT EXISTS invoices (
            id TEXT PRIMARY KEY,
            source_file TEXT NOT NULL UNIQUE,
            vendor TEXT,
            invoice_no TEXT,
            issued_on TEXT,
            currency TEXT,
            total TEXT,
            imported_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS matches (
            id TEXT PRIMARY KEY,
            invoice_id TEXT NOT NULL REFERENCES invoices(id) ON DELETE CASCADE,
            transaction_id TEXT REFERENCES transactions(id),
            status TEXT NOT NULL,
            date_delta_days INTEGER,
            score REAL NOT NULL,
            matched_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_status ON matches(status);

        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            source TEXT NOT NULL,
            sender TEXT NOT NULL,
            subject TEXT,
            received_at TEXT NOT NULL,
            attachment_path TEXT NOT NULL,
            fetched_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_documents_external ON documents(external_id);

        CREATE TABLE IF NOT EXISTS email_config (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            username TEXT NOT NULL,
            password TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS path_config (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            statements_path TEXT NOT NULL,
            invoices_path TEXT NOT NULL
        );
    "#,
}];

/// Create the tracking table, then apply any unapplied migrations.
pub async fn init_schema(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("create _migrations: {e}")))?;

    let current = current_version(conn).await?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.sql)
            .await
            .map_err(|e| {
                DatabaseError::Migration(format!(
                    "v{} ({}): {e}",
                    migration.version, migration.name
                ))
            })?;
        conn.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            params![migration.version, migration.name],
        )
        .await
        .map_err(|e| DatabaseError::Migration(format!("record v{}: {e}", migration.version)))?;

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applied migration"
        );
    }

    Ok(())
}

/// Highest applied migration version (0 on a fresh database).
async fn current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("read version: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0)),
        _ => Ok(0),
    }
}
