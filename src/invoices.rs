//! Invoice document extraction — heuristic field recovery from PDF text.
//!
//! Invoices are far less regular than statements, so every field is
//! optional: a labeled match wins, otherwise the field stays empty and
//! `Invoice::coverage()` reports how much was recovered. Amount matching
//! deliberately requires a label ("Total", "Total a pagar", "Amount due")
//! so line-item prices don't masquerade as the document total.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{error, info};

use crate::error::ExtractError;
use crate::extract::pdf::extract_pdf_text;
use crate::extract::text::{normalize_amount, parse_statement_date};
use crate::model::Invoice;

static INVOICE_NO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:invoice|fatura|factura)\s*(?:number|no\.?|n[ºo°]?\.?|#)?\s*[:#]?\s*([A-Za-z0-9][A-Za-z0-9/._-]*)",
    )
    .unwrap()
});

static DATE_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:invoice\s+date|data(?:\s+de)?\s+emiss[ãa]o|date|data)\s*:?\s*(\d{2}[/-]\d{2}[/-]\d{4}|\d{4}-\d{2}-\d{2})",
    )
    .unwrap()
});

static ANY_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{2}[/-]\d{2}[/-]\d{4}|\d{4}-\d{2}-\d{2}").unwrap()
});

static TOTAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:total\s+a\s+pagar|valor\s+total|amount\s+due|total)\s*:?\s*(?:€|eur|usd|gbp|\$|£)?\s*(-?\d{1,3}(?:\.\d{3})*,\d{2}|-?\d+[.,]\d{2})",
    )
    .unwrap()
});

/// Extract structured invoice fields from raw document text.
pub fn extract_invoice_fields(text: &str, source_file: impl Into<String>) -> Invoice {
    let mut invoice = Invoice::new(source_file);

    // Vendor: first non-empty line that isn't a bare document heading.
    invoice.vendor = text
        .lines()
        .map(str::trim)
        .find(|l| {
            !l.is_empty() && {
                let lower = l.to_lowercase();
                lower != "invoice" && lower != "fatura" && lower != "factura"
            }
        })
        .map(|l| l.chars().take(80).collect());

    // Invoice number: labeled token that contains at least one digit
    // (rejects matches like "Invoice Date").
    invoice.invoice_no = INVOICE_NO_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .find(|tok| tok.chars().any(|ch| ch.is_ascii_digit()));

    // Date: labeled first, any date token as fallback.
    invoice.issued_on = DATE_LABEL_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_statement_date(m.as_str()))
        .or_else(|| {
            ANY_DATE_RE
                .find_iter(text)
                .find_map(|m| parse_statement_date(m.as_str()))
        });

    // Total: the largest labeled amount in the document.
    invoice.total = TOTAL_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| normalize_amount(m.as_str()))
        .max();

    invoice.currency = detect_currency(text);

    invoice
}

/// Currency from symbol or ISO code.
fn detect_currency(text: &str) -> Option<String> {
    let upper = text.to_uppercase();
    if text.contains('€') || upper.contains("EUR") {
        Some("EUR".into())
    } else if text.contains('$') || upper.contains("USD") {
        Some("USD".into())
    } else if text.contains('£') || upper.contains("GBP") {
        Some("GBP".into())
    } else {
        None
    }
}

/// Import one invoice PDF: extract text, recover fields.
pub async fn import_invoice(path: &Path) -> Result<Invoice, ExtractError> {
    let text = extract_pdf_text(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let invoice = extract_invoice_fields(&text, name);

    let (filled, total) = invoice.coverage();
    info!(
        path = %path.display(),
        coverage = %format!("{filled}/{total}"),
        total_amount = ?invoice.total,
        "Invoice imported"
    );
    Ok(invoice)
}

/// Import every PDF invoice in a directory (non-recursive).
/// Individual failures are logged and skipped.
pub async fn import_invoice_dir(dir: &Path) -> Result<Vec<Invoice>, ExtractError> {
    if !dir.is_dir() {
        return Err(ExtractError::NotFound(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if path.is_file() && is_pdf {
            files.push(path);
        }
    }
    files.sort();

    let mut invoices = Vec::new();
    for file in &files {
        match import_invoice(file).await {
            Ok(invoice) => invoices.push(invoice),
            Err(e) => {
                error!(path = %file.display(), error = %e, "Failed to import invoice");
            }
        }
    }
    Ok(invoices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = "\
ACME Fornecimentos Lda
Rua das Flores 12, Lisboa

FATURA Nº 2024/0137
Data de emissão: 07/03/2024

Descrição                Qtd    Valor
Widget A                  2     40,00
Widget B                  1     110,56

Total a pagar: € 1.150,56
";

    #[test]
    fn extracts_labeled_fields() {
        let inv = extract_invoice_fields(SAMPLE, "fatura_0137.pdf");
        assert_eq!(inv.vendor.as_deref(), Some("ACME Fornecimentos Lda"));
        assert_eq!(inv.invoice_no.as_deref(), Some("2024/0137"));
        assert_eq!(
            inv.issued_on,
            NaiveDate::from_ymd_opt(2024, 3, 7)
        );
        assert_eq!(inv.total, Some(dec!(1150.56)));
        assert_eq!(inv.currency.as_deref(), Some("EUR"));
        assert_eq!(inv.coverage(), (5, 5));
    }

    #[test]
    fn line_item_amounts_do_not_become_the_total() {
        let text = "Vendor X\nItem 999,99\nTotal: 10,00\n";
        let inv = extract_invoice_fields(text, "x.pdf");
        assert_eq!(inv.total, Some(dec!(10.00)));
    }

    #[test]
    fn largest_labeled_amount_wins() {
        let text = "Vendor X\nSubtotal: 90,00\nTotal: 110,70\n";
        let inv = extract_invoice_fields(text, "x.pdf");
        // "Subtotal:" also matches the total label; the larger figure is
        // the document total.
        assert_eq!(inv.total, Some(dec!(110.70)));
    }

    #[test]
    fn invoice_number_requires_a_digit() {
        let text = "Company\nInvoice Date: 01/02/2024\n";
        let inv = extract_invoice_fields(text, "x.pdf");
        assert_eq!(inv.invoice_no, None);
        assert_eq!(
            inv.issued_on,
            NaiveDate::from_ymd_opt(2024, 2, 1)
        );
    }

    #[test]
    fn empty_text_yields_empty_invoice() {
        let inv = extract_invoice_fields("", "empty.pdf");
        assert_eq!(inv.coverage(), (0, 5));
    }

    #[test]
    fn detects_usd() {
        let text = "Invoice 12\nTotal: $99.50\n";
        let inv = extract_invoice_fields(text, "x.pdf");
        assert_eq!(inv.currency.as_deref(), Some("USD"));
        assert_eq!(inv.total, Some(dec!(99.50)));
    }
}
