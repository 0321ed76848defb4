//! PDF text extraction — text layer first, OCR fallback.
//!
//! Searchable PDFs are read with `pdftotext -layout` (poppler). Scanned
//! statements have no text layer, so pages are rasterized with `pdftoppm`
//! and run through `tesseract` with Portuguese language data.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::ExtractError;

/// OCR language passed to tesseract.
const OCR_LANG: &str = "por";

/// Rasterization DPI for OCR. 300 is the tesseract sweet spot.
const OCR_DPI: &str = "300";

/// Extract all text from a PDF, falling back to OCR when the text layer
/// is empty or unreadable.
pub async fn extract_pdf_text(path: &Path) -> Result<String, ExtractError> {
    if !path.exists() {
        return Err(ExtractError::NotFound(path.to_path_buf()));
    }

    match text_layer(path).await {
        Ok(text) if !text.trim().is_empty() => return Ok(text),
        Ok(_) => info!(path = %path.display(), "Empty text layer, attempting OCR"),
        Err(e) => warn!(path = %path.display(), error = %e, "pdftotext failed, attempting OCR"),
    }

    ocr(path).await
}

/// Read the PDF text layer via `pdftotext -layout <file> -`.
async fn text_layer(path: &Path) -> Result<String, ExtractError> {
    let output = Command::new("pdftotext")
        .arg("-layout")
        .arg(path)
        .arg("-")
        .output()
        .await
        .map_err(|e| ExtractError::Tool {
            tool: "pdftotext".into(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ExtractError::Tool {
            tool: "pdftotext".into(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Rasterize and OCR every page, concatenating the per-page text.
async fn ocr(path: &Path) -> Result<String, ExtractError> {
    let scratch = std::env::temp_dir().join(format!("invoice-match-ocr-{}", uuid::Uuid::new_v4()));
    tokio::fs::create_dir_all(&scratch).await?;

    let result = ocr_pages(path, &scratch).await;

    // Scratch pages can be large at 300 DPI; always clean up.
    let _ = tokio::fs::remove_dir_all(&scratch).await;
    result
}

async fn ocr_pages(path: &Path, scratch: &Path) -> Result<String, ExtractError> {
    let prefix = scratch.join("page");
    let output = Command::new("pdftoppm")
        .arg("-r")
        .arg(OCR_DPI)
        .arg("-png")
        .arg(path)
        .arg(&prefix)
        .output()
        .await
        .map_err(|e| ExtractError::Tool {
            tool: "pdftoppm".into(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ExtractError::Tool {
            tool: "pdftoppm".into(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let mut pages: Vec<PathBuf> = Vec::new();
    let mut entries = tokio::fs::read_dir(scratch).await?;
    while let Some(entry) = entries.next_entry().await? {
        let p = entry.path();
        if p.extension().is_some_and(|e| e == "png") {
            pages.push(p);
        }
    }
    pages.sort();

    if pages.is_empty() {
        return Err(ExtractError::NoText(path.to_path_buf()));
    }

    let mut text = String::new();
    for page in &pages {
        let output = Command::new("tesseract")
            .arg(page)
            .arg("stdout")
            .arg("-l")
            .arg(OCR_LANG)
            .output()
            .await
            .map_err(|e| ExtractError::Tool {
                tool: "tesseract".into(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ExtractError::Tool {
                tool: "tesseract".into(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        text.push_str(&String::from_utf8_lossy(&output.stdout));
        text.push('\n');
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = extract_pdf_text(Path::new("/nonexistent/statement.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::NotFound(_)));
    }
}
