//! End-to-end flow over the in-memory store: parse a statement, import an
//! invoice, reconcile, persist, and read everything back through the API.

use std::sync::Arc;

use invoice_match::api::{ApiState, api_routes};
use invoice_match::extract::text::parse_statement_text;
use invoice_match::invoices::extract_invoice_fields;
use invoice_match::matching::reconcile;
use invoice_match::model::{MatchStatus, TxnKind};
use invoice_match::store::{Database, LibSqlBackend};
use rust_decimal_macros::dec;

const STATEMENT: &str = "\
01/03/2024 DEPOSITO INICIAL 2.500,00
07/03/2024 PAGAMENTO ACME FORNECIMENTOS 1.150,56
09/03/2024 COMPRA PAPELARIA 23,40
";

const INVOICE_TEXT: &str = "\
ACME Fornecimentos Lda

FATURA Nº 2024/0137
Data de emissão: 07/03/2024

Total a pagar: € 1.150,56
";

async fn seeded_db() -> Arc<dyn Database> {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());

    let txns = parse_statement_text(STATEMENT);
    assert_eq!(txns.len(), 3);
    assert_eq!(db.insert_transactions(&txns).await.unwrap(), 3);

    let invoice = extract_invoice_fields(INVOICE_TEXT, "fatura_0137.pdf");
    assert_eq!(invoice.total, Some(dec!(1150.56)));
    db.upsert_invoice(&invoice).await.unwrap();

    db
}

#[tokio::test]
async fn statement_to_match_pipeline() {
    let db = seeded_db().await;

    let transactions = db.list_transactions(None).await.unwrap();
    assert_eq!(transactions.len(), 3);
    // The payment round-tripped with its parsed sign and kind.
    let payment = transactions
        .iter()
        .find(|t| t.amount == dec!(-1150.56))
        .unwrap();
    assert_eq!(payment.kind, TxnKind::Debit);

    let invoices = db.list_invoices().await.unwrap();
    assert_eq!(invoices.len(), 1);

    let report = reconcile(&invoices, &transactions, 30);
    assert_eq!(report.matched, 1);
    assert_eq!(report.unmatched, 0);

    db.replace_matches(&report.results).await.unwrap();

    let matches = db.list_matches().await.unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].status, MatchStatus::Matched);
    assert_eq!(matches[0].transaction_id, Some(payment.id));
    assert_eq!(matches[0].date_delta_days, Some(0));
}

#[tokio::test]
async fn api_serves_store_contents() {
    let db = seeded_db().await;

    let app = api_routes(ApiState {
        db: Arc::clone(&db),
        window_days: 30,
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("{base}/api/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let transactions: serde_json::Value = client
        .get(format!("{base}/api/transactions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(transactions["count"], 3);

    // Reconcile over HTTP, then the persisted matches are visible.
    let report: serde_json::Value = client
        .post(format!("{base}/api/reconcile"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["matched"], 1);
    assert_eq!(report["unmatched"], 0);

    let matches: serde_json::Value = client
        .get(format!("{base}/api/matches"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(matches["count"], 1);
    assert_eq!(matches["matches"][0]["status"], "matched");
}

#[tokio::test]
async fn rescan_does_not_duplicate_transactions() {
    let db = seeded_db().await;

    // A second scan of the same statement inserts nothing new.
    let again = parse_statement_text(STATEMENT);
    assert_eq!(db.insert_transactions(&again).await.unwrap(), 0);
    assert_eq!(db.list_transactions(None).await.unwrap().len(), 3);
}
