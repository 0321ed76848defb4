//! Statement text parser — turns raw extracted text into transactions.
//!
//! Bank statements arrive as loosely formatted lines: a date, a free-text
//! description, and an amount in European notation (`1.234,56`), often with
//! a currency symbol. Lines without a date inherit the last seen date
//! (multi-line entries under one date header).

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;

use crate::model::{Transaction, TxnKind, sort_by_date};

/// Date token patterns, tried in order.
static DATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\d{2}/\d{2}/\d{4}").unwrap(),
        Regex::new(r"\d{2}-\d{2}-\d{4}").unwrap(),
        Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap(),
    ]
});

/// Amount token patterns, most specific first so the European
/// thousands format wins over a partial plain-number match.
static AMOUNT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"-?\d{1,3}(?:\.\d{3})*,\d{2}").unwrap(),
        Regex::new(r"-?€\s*\d+[.,]\d{2}").unwrap(),
        Regex::new(r"-?\d+[.,]\d{2}").unwrap(),
    ]
});

/// Description keywords marking a debit entry (statement locale is
/// Portuguese; bare "DB"/"CR" column markers included).
const DEBIT_INDICATORS: &[&str] = &[
    "DB",
    "DÉBITO",
    "DEBITO",
    "PAGAMENTO",
    "COMPRA",
    "LEVANTAMENTO",
];

/// Description keywords marking a credit entry.
const CREDIT_INDICATORS: &[&str] = &[
    "CR",
    "CRÉDITO",
    "CREDITO",
    "DEPÓSITO",
    "DEPOSITO",
    "TRANSFERÊNCIA RECEBIDA",
];

/// Normalize an amount token into a `Decimal`.
///
/// Strips currency symbols and spaces. A comma marks the decimal separator
/// (dots are thousands separators and dropped); with no comma present the
/// dot is taken as the decimal separator.
pub fn normalize_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw.chars().filter(|c| *c != '€' && *c != ' ').collect();
    let cleaned = if cleaned.contains(',') {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned
    };
    cleaned.parse::<Decimal>().ok()
}

/// Parse a date token in any of the supported layouts.
pub fn parse_statement_date(token: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(token, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(token, "%d-%m-%Y"))
        .or_else(|_| NaiveDate::parse_from_str(token, "%Y-%m-%d"))
        .ok()
}

/// Parse extracted statement text into transactions, sorted by date.
pub fn parse_statement_text(text: &str) -> Vec<Transaction> {
    let mut txns = Vec::new();
    let mut current_date: Option<String> = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }

        // Date on this line, or carried forward from a previous one.
        let line_date = DATE_PATTERNS
            .iter()
            .find_map(|re| re.find(line).map(|m| m.as_str().to_string()));
        if let Some(ref d) = line_date {
            current_date = Some(d.clone());
        }
        let Some(date_token) = line_date.or_else(|| current_date.clone()) else {
            continue;
        };

        let mut amount: Option<Decimal> = None;
        'patterns: for re in AMOUNT_PATTERNS.iter() {
            for m in re.find_iter(line) {
                if let Some(a) = normalize_amount(m.as_str()) {
                    amount = Some(a);
                    break 'patterns;
                }
            }
        }
        let Some(mut amount) = amount else {
            continue;
        };

        // Description is the line minus date and amount tokens.
        let mut description = line.to_string();
        for re in DATE_PATTERNS.iter().chain(AMOUNT_PATTERNS.iter()) {
            description = re.replace_all(&description, "").into_owned();
        }
        let description = description
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        let upper = description.to_uppercase();
        let mut kind = TxnKind::Unknown;
        if DEBIT_INDICATORS.iter().any(|k| upper.contains(k)) {
            kind = TxnKind::Debit;
            if amount > Decimal::ZERO {
                amount = -amount;
            }
        } else if CREDIT_INDICATORS.iter().any(|k| upper.contains(k)) {
            kind = TxnKind::Credit;
            amount = amount.abs();
        }

        txns.push(Transaction::new(
            parse_statement_date(&date_token),
            description,
            amount,
            kind,
        ));
    }

    sort_by_date(&mut txns);
    txns
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn normalizes_european_amounts() {
        assert_eq!(normalize_amount("1.234,56"), Some(dec!(1234.56)));
        assert_eq!(normalize_amount("-1.234,56"), Some(dec!(-1234.56)));
        assert_eq!(normalize_amount("€ 12,34"), Some(dec!(12.34)));
        assert_eq!(normalize_amount("12,34"), Some(dec!(12.34)));
    }

    #[test]
    fn normalizes_dot_decimal_amounts() {
        assert_eq!(normalize_amount("123.45"), Some(dec!(123.45)));
        assert_eq!(normalize_amount("-99.10"), Some(dec!(-99.10)));
    }

    #[test]
    fn rejects_garbage_amounts() {
        assert_eq!(normalize_amount("abc"), None);
        assert_eq!(normalize_amount(""), None);
    }

    #[test]
    fn parses_supported_date_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(parse_statement_date("07/03/2024"), Some(expected));
        assert_eq!(parse_statement_date("07-03-2024"), Some(expected));
        assert_eq!(parse_statement_date("2024-03-07"), Some(expected));
        assert_eq!(parse_statement_date("99/99/2024"), None);
    }

    #[test]
    fn parses_basic_statement_lines() {
        let text = "\
01/03/2024 COMPRA SUPERMERCADO LX 45,90
02/03/2024 TRANSFERÊNCIA RECEBIDA JOAO 1.200,00
03/03/2024 LEVANTAMENTO ATM 50,00
";
        let txns = parse_statement_text(text);
        assert_eq!(txns.len(), 3);

        assert_eq!(txns[0].kind, TxnKind::Debit);
        assert_eq!(txns[0].amount, dec!(-45.90));
        assert_eq!(txns[0].description, "COMPRA SUPERMERCADO LX");

        assert_eq!(txns[1].kind, TxnKind::Credit);
        assert_eq!(txns[1].amount, dec!(1200.00));

        assert_eq!(txns[2].kind, TxnKind::Debit);
        assert_eq!(txns[2].amount, dec!(-50.00));
    }

    #[test]
    fn carries_date_forward_to_undated_lines() {
        let text = "\
05/03/2024 PAGAMENTO SERVICOS 20,00
PAGAMENTO AGUA 15,50
";
        let txns = parse_statement_text(text);
        assert_eq!(txns.len(), 2);
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5);
        assert_eq!(txns[0].occurred_on, expected);
        assert_eq!(txns[1].occurred_on, expected);
        assert_eq!(txns[1].amount, dec!(-15.50));
    }

    #[test]
    fn skips_lines_without_amount_or_date() {
        let text = "\
SALDO ANTERIOR
EXTRATO DE CONTA
01/03/2024 DEPOSITO BALCAO 300,00
RODAPE SEM VALOR
";
        let txns = parse_statement_text(text);
        // "RODAPE SEM VALOR" has a carried date but no amount; headers have
        // neither. Only the deposit survives.
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].kind, TxnKind::Credit);
    }

    #[test]
    fn output_is_date_sorted() {
        let text = "\
10/03/2024 COMPRA B 10,00
01/03/2024 COMPRA A 5,00
";
        let txns = parse_statement_text(text);
        assert_eq!(txns[0].description, "COMPRA A");
        assert_eq!(txns[1].description, "COMPRA B");
    }

    #[test]
    fn unknown_kind_keeps_amount_sign() {
        let txns = parse_statement_text("04/03/2024 ANUIDADE CARTAO -12,00\n");
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].kind, TxnKind::Unknown);
        assert_eq!(txns[0].amount, dec!(-12.00));
    }
}
