//! Statement processor — per-file dispatch and directory batch runs.

use std::path::Path;

use tracing::{error, info};

use crate::error::ExtractError;
use crate::extract::{StatementFormat, pdf, tabular, text};
use crate::model::{Transaction, sort_by_date};

/// Process a single bank statement into transactions.
///
/// Dispatches on the file extension: PDF goes through text-layer/OCR
/// extraction and line parsing, CSV and Excel through the tabular readers.
pub async fn process_statement(path: &Path) -> Result<Vec<Transaction>, ExtractError> {
    if !path.exists() {
        return Err(ExtractError::NotFound(path.to_path_buf()));
    }

    let format = StatementFormat::from_path(path).ok_or_else(|| {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_else(|| "(none)".into());
        ExtractError::UnsupportedFormat(ext)
    })?;

    let txns = match format {
        StatementFormat::Pdf => {
            info!(path = %path.display(), "Processing PDF statement");
            let raw = pdf::extract_pdf_text(path).await?;
            text::parse_statement_text(&raw)
        }
        StatementFormat::Csv => {
            let bytes = tokio::fs::read(path).await?;
            tabular::parse_csv_bytes(&bytes, path)?
        }
        StatementFormat::Excel => {
            let owned = path.to_path_buf();
            tokio::task::spawn_blocking(move || tabular::parse_excel(&owned))
                .await
                .map_err(|e| ExtractError::Excel(format!("reader task panicked: {e}")))??
        }
    };

    info!(
        path = %path.display(),
        transactions = txns.len(),
        "Statement processed"
    );
    Ok(txns)
}

/// Process every supported statement in a directory (non-recursive).
///
/// Individual file failures are logged and skipped. Each transaction is
/// tagged with its source file name; the combined result is date-sorted.
pub async fn process_statement_dir(dir: &Path) -> Result<Vec<Transaction>, ExtractError> {
    if !dir.is_dir() {
        return Err(ExtractError::NotFound(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && StatementFormat::from_path(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();

    let mut all = Vec::new();
    for file in &files {
        match process_statement(file).await {
            Ok(mut txns) => {
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                for txn in &mut txns {
                    txn.source_file = Some(name.clone());
                }
                all.extend(txns);
            }
            Err(e) => {
                error!(path = %file.display(), error = %e, "Failed to process statement");
            }
        }
    }

    sort_by_date(&mut all);
    info!(
        dir = %dir.display(),
        files = files.len(),
        transactions = all.len(),
        "Directory scan complete"
    );
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = process_statement(Path::new("/nonexistent/extrato.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::NotFound(_)));
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "not a statement").unwrap();

        let err = process_statement(&path).await.unwrap_err();
        match err {
            ExtractError::UnsupportedFormat(ext) => assert_eq!(ext, ".txt"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn directory_scan_tags_source_files_and_skips_failures() {
        let dir = tempfile::tempdir().unwrap();

        let good = dir.path().join("a_janeiro.csv");
        let mut f = std::fs::File::create(&good).unwrap();
        writeln!(f, "Date,Desc,Amount").unwrap();
        writeln!(f, "01/01/2024,COMPRA LOJA,-10.00").unwrap();

        // Broken file: supported extension, unusable headers.
        let bad = dir.path().join("b_broken.csv");
        std::fs::write(&bad, "x,y\n1,2\n").unwrap();

        // Unsupported extension: not even attempted.
        std::fs::write(dir.path().join("readme.md"), "hi").unwrap();

        let txns = process_statement_dir(dir.path()).await.unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].source_file.as_deref(), Some("a_janeiro.csv"));
    }

    #[tokio::test]
    async fn empty_directory_yields_no_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let txns = process_statement_dir(dir.path()).await.unwrap();
        assert!(txns.is_empty());
    }
}
