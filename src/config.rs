//! Application configuration, built from environment variables.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Top-level configuration.
///
/// Every field has a default so the binary runs with zero setup; the
/// `INVOICE_MATCH_*` variables override individual pieces. A variable
/// that is set but unparseable is an error, not a silent default.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root data directory (database + default working dirs live here).
    pub data_dir: PathBuf,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Directory scanned for bank statements.
    pub statements_dir: PathBuf,
    /// Directory scanned for invoice documents (email attachments land here).
    pub invoices_dir: PathBuf,
    /// Matching window in days around the invoice date.
    pub match_window_days: i64,
    /// HTTP API port for `serve`.
    pub api_port: u16,
}

/// Parse an env var, falling back to `default` when unset.
fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        }),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Build config from environment variables, with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = std::env::var("INVOICE_MATCH_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let db_path = std::env::var("INVOICE_MATCH_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("invoice_match.db"));

        let statements_dir = std::env::var("INVOICE_MATCH_STATEMENTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("statements"));

        let invoices_dir = std::env::var("INVOICE_MATCH_INVOICES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("invoices"));

        let match_window_days = env_parse("INVOICE_MATCH_WINDOW_DAYS", 30)?;
        let api_port = env_parse("INVOICE_MATCH_API_PORT", 8080)?;

        Ok(Self {
            data_dir,
            db_path,
            statements_dir,
            invoices_dir,
            match_window_days,
            api_port,
        })
    }

    /// Create the working directories if they don't exist.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.statements_dir)?;
        std::fs::create_dir_all(&self.invoices_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_derive_from_data_dir() {
        // Constructed directly: env mutation races between parallel tests.
        let cfg = AppConfig {
            data_dir: PathBuf::from("./data"),
            db_path: PathBuf::from("./data/invoice_match.db"),
            statements_dir: PathBuf::from("./data/statements"),
            invoices_dir: PathBuf::from("./data/invoices"),
            match_window_days: 30,
            api_port: 8080,
        };
        assert!(cfg.db_path.starts_with(&cfg.data_dir));
        assert!(cfg.statements_dir.starts_with(&cfg.data_dir));
    }

    #[test]
    fn env_parse_rejects_garbage() {
        // A key no other test touches.
        unsafe { std::env::set_var("INVOICE_MATCH_TEST_PARSE_KEY", "not-a-number") };
        let result: Result<i64, _> = env_parse("INVOICE_MATCH_TEST_PARSE_KEY", 5);
        assert!(result.is_err());
        unsafe { std::env::remove_var("INVOICE_MATCH_TEST_PARSE_KEY") };
    }

    #[test]
    fn env_parse_defaults_when_unset() {
        let result: i64 = env_parse("INVOICE_MATCH_DEFINITELY_UNSET", 7).unwrap();
        assert_eq!(result, 7);
    }
}
