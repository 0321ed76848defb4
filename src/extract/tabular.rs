//! Tabular statement ingestion — CSV and Excel.
//!
//! Bank exports name their columns inconsistently (and in two languages),
//! so both readers funnel through the same header-based column mapping:
//! a date column, an amount column, and a description column are located
//! by case-insensitive substring match, everything else is ignored.

use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::warn;

use crate::error::ExtractError;
use crate::extract::text::{normalize_amount, parse_statement_date};
use crate::model::{Transaction, TxnKind, sort_by_date};

/// Header substrings identifying the date column.
const DATE_HEADERS: &[&str] = &["date", "data", "dia"];

/// Header substrings identifying the amount column.
const AMOUNT_HEADERS: &[&str] = &["amount", "valor", "montante", "quantia"];

/// Header substrings identifying the description column.
const DESC_HEADERS: &[&str] = &["desc", "texto", "detalhe"];

/// Resolved column indexes for one file.
struct ColumnMap {
    date: usize,
    amount: usize,
    desc: usize,
}

/// Locate the three required columns, or report which are missing.
fn map_columns(headers: &[String], path: &Path) -> Result<ColumnMap, ExtractError> {
    let find = |names: &[&str]| {
        headers.iter().position(|h| {
            let h = h.to_lowercase();
            names.iter().any(|n| h.contains(n))
        })
    };

    let date = find(DATE_HEADERS);
    let amount = find(AMOUNT_HEADERS);
    let desc = find(DESC_HEADERS);

    match (date, amount, desc) {
        (Some(date), Some(amount), Some(desc)) => Ok(ColumnMap { date, amount, desc }),
        _ => {
            let mut missing = Vec::new();
            if date.is_none() {
                missing.push("date");
            }
            if amount.is_none() {
                missing.push("amount");
            }
            if desc.is_none() {
                missing.push("description");
            }
            Err(ExtractError::MissingColumns {
                path: path.to_path_buf(),
                missing: missing.join(", "),
            })
        }
    }
}

/// Build a transaction from standardized cells. Rows with an unparseable
/// amount are dropped (logged by the caller); unparseable dates are kept
/// as `None`.
fn build_row(date: Option<NaiveDate>, description: &str, amount: Option<Decimal>) -> Option<Transaction> {
    let amount = amount?;
    let kind = if amount > Decimal::ZERO {
        TxnKind::Credit
    } else {
        TxnKind::Debit
    };
    Some(Transaction::new(date, description.trim(), amount, kind))
}

// ── CSV ─────────────────────────────────────────────────────────────

/// Decode CSV bytes: strict UTF-8 first, then Windows-1252 (the WHATWG
/// superset of latin1, covering the usual bank-export encodings).
fn decode_bytes(bytes: &[u8], path: &Path) -> Result<String, ExtractError> {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return Ok(s.to_string());
    }
    let (decoded, _, had_errors) = encoding_rs::WINDOWS_1252.decode(bytes);
    if had_errors {
        return Err(ExtractError::Encoding(path.to_path_buf()));
    }
    Ok(decoded.into_owned())
}

/// Parse CSV statement bytes into transactions, sorted by date.
pub fn parse_csv_bytes(bytes: &[u8], path: &Path) -> Result<Vec<Transaction>, ExtractError> {
    let text = decode_bytes(bytes, path)?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let cols = map_columns(&headers, path)?;

    let mut txns = Vec::new();
    let mut dropped = 0usize;
    for record in reader.records() {
        let record = record?;
        let date = record
            .get(cols.date)
            .and_then(|s| parse_statement_date(s.trim()));
        let amount = record.get(cols.amount).and_then(|s| normalize_amount(s.trim()));
        let desc = record.get(cols.desc).unwrap_or("");

        match build_row(date, desc, amount) {
            Some(txn) => txns.push(txn),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        warn!(path = %path.display(), dropped, "Dropped rows with unparseable amounts");
    }

    sort_by_date(&mut txns);
    Ok(txns)
}

// ── Excel ───────────────────────────────────────────────────────────

fn cell_date(cell: &Data) -> Option<NaiveDate> {
    match cell {
        Data::DateTime(dt) => dt.as_datetime().map(|n| n.date()),
        Data::DateTimeIso(s) => parse_statement_date(s.get(..10).unwrap_or(s)),
        Data::String(s) => parse_statement_date(s.trim()),
        _ => None,
    }
}

fn cell_amount(cell: &Data) -> Option<Decimal> {
    match cell {
        Data::Float(f) => Decimal::try_from(*f).ok(),
        Data::Int(i) => Some(Decimal::from(*i)),
        Data::String(s) => normalize_amount(s.trim()),
        _ => None,
    }
}

/// Read an Excel statement (first worksheet) into transactions.
///
/// Blocking — call from `spawn_blocking`.
pub fn parse_excel(path: &Path) -> Result<Vec<Transaction>, ExtractError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| ExtractError::Excel(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ExtractError::Excel("workbook has no sheets".into()))?
        .map_err(|e| ExtractError::Excel(e.to_string()))?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| ExtractError::Excel("sheet is empty".into()))?
        .iter()
        .map(|c| c.to_string().trim().to_string())
        .collect();
    let cols = map_columns(&headers, path)?;

    let mut txns = Vec::new();
    let mut dropped = 0usize;
    for row in rows {
        let date = row.get(cols.date).and_then(cell_date);
        let amount = row.get(cols.amount).and_then(cell_amount);
        let desc = row
            .get(cols.desc)
            .map(|c| c.to_string())
            .unwrap_or_default();

        match build_row(date, &desc, amount) {
            Some(txn) => txns.push(txn),
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        warn!(path = %path.display(), dropped, "Dropped rows with unparseable amounts");
    }

    sort_by_date(&mut txns);
    Ok(txns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn p() -> &'static Path {
        Path::new("test.csv")
    }

    #[test]
    fn parses_utf8_csv_with_english_headers() {
        let csv = "Date,Description,Amount\n01/03/2024,COMPRA LOJA,-45.90\n02/03/2024,SALARY,1200.00\n";
        let txns = parse_csv_bytes(csv.as_bytes(), p()).unwrap();
        assert_eq!(txns.len(), 2);
        assert_eq!(txns[0].amount, dec!(-45.90));
        assert_eq!(txns[0].kind, TxnKind::Debit);
        assert_eq!(txns[1].kind, TxnKind::Credit);
    }

    #[test]
    fn parses_portuguese_headers_and_decimal_commas() {
        let csv = "Data,Detalhe do Movimento,Montante\n05/03/2024,PAGAMENTO AGUA,\"-15,50\"\n";
        let txns = parse_csv_bytes(csv.as_bytes(), p()).unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].amount, dec!(-15.50));
        assert_eq!(txns[0].description, "PAGAMENTO AGUA");
    }

    #[test]
    fn decodes_windows_1252_descriptions() {
        // "CARTÃO" with 0xC3 in Windows-1252 (Ã), invalid as UTF-8 here.
        let mut bytes = b"Data,Descricao,Valor\n01/03/2024,CART".to_vec();
        bytes.push(0xC3);
        bytes.extend_from_slice(b"O,-10.00\n");
        let txns = parse_csv_bytes(&bytes, p()).unwrap();
        assert_eq!(txns.len(), 1);
        assert!(txns[0].description.starts_with("CART"));
    }

    #[test]
    fn missing_columns_are_reported() {
        let csv = "Data,Montante\n01/03/2024,-5.00\n";
        let err = parse_csv_bytes(csv.as_bytes(), p()).unwrap_err();
        match err {
            ExtractError::MissingColumns { missing, .. } => {
                assert_eq!(missing, "description");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rows_with_bad_amounts_are_dropped() {
        let csv = "Date,Desc,Amount\n01/03/2024,OK,-5.00\n02/03/2024,BAD,n/a\n";
        let txns = parse_csv_bytes(csv.as_bytes(), p()).unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].description, "OK");
    }

    #[test]
    fn unparseable_dates_are_kept_as_none() {
        let csv = "Date,Desc,Amount\nsoon,PENDING,-5.00\n";
        let txns = parse_csv_bytes(csv.as_bytes(), p()).unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].occurred_on, None);
    }

    #[test]
    fn excel_cells_convert() {
        assert_eq!(
            cell_amount(&Data::String("1.234,56".into())),
            Some(dec!(1234.56))
        );
        assert_eq!(cell_amount(&Data::Int(42)), Some(dec!(42)));
        assert_eq!(cell_amount(&Data::Empty), None);
        assert_eq!(
            cell_date(&Data::String("07/03/2024".into())),
            NaiveDate::from_ymd_opt(2024, 3, 7)
        );
        assert_eq!(cell_date(&Data::Empty), None);
    }
}
