//! Reconciliation — match invoices against statement transactions.
//!
//! Matching is deterministic and auditable rather than fuzzy: a candidate
//! must carry the invoice's exact amount (absolute value, Decimal
//! equality), and when the invoice is dated, fall within the configured
//! day window. The nearest-dated candidate wins; equal distances on
//! distinct transactions are surfaced as `Ambiguous` for human review
//! instead of being guessed at. Each transaction settles at most one
//! invoice.

use std::collections::HashSet;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::{Invoice, MatchResult, MatchStatus, ReconcileReport, Transaction};

/// Default matching window around the invoice date, in days.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Score for an amount-only match (invoice has no usable date).
const UNDATED_SCORE: f32 = 0.5;

/// Reconcile invoices against the transaction ledger.
///
/// Invoices are processed in order; a transaction consumed by an earlier
/// invoice is not offered to later ones.
pub fn reconcile(
    invoices: &[Invoice],
    transactions: &[Transaction],
    window_days: i64,
) -> ReconcileReport {
    let mut consumed: HashSet<Uuid> = HashSet::new();
    let mut results = Vec::with_capacity(invoices.len());

    for invoice in invoices {
        let result = match_one(invoice, transactions, &consumed, window_days);
        if let Some(txn_id) = result.transaction_id {
            consumed.insert(txn_id);
        }
        debug!(
            invoice = %invoice.id,
            status = result.status.label(),
            score = result.score,
            "Invoice matched"
        );
        results.push(result);
    }

    let report = ReconcileReport::from_results(results);
    info!(
        invoices = invoices.len(),
        matched = report.matched,
        ambiguous = report.ambiguous,
        unmatched = report.unmatched,
        "Reconciliation complete"
    );
    report
}

fn match_one(
    invoice: &Invoice,
    transactions: &[Transaction],
    consumed: &HashSet<Uuid>,
    window_days: i64,
) -> MatchResult {
    let Some(total) = invoice.total else {
        return no_match(invoice);
    };

    let candidates: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| !consumed.contains(&t.id))
        .filter(|t| t.amount.abs() == total.abs())
        .collect();

    if candidates.is_empty() {
        return no_match(invoice);
    }

    match invoice.issued_on {
        Some(invoice_date) => {
            // Only dated candidates inside the window are eligible.
            let mut dated: Vec<(&Transaction, i64)> = candidates
                .iter()
                .filter_map(|t| {
                    t.occurred_on
                        .map(|d| (*t, (d - invoice_date).num_days().abs()))
                })
                .filter(|(_, delta)| *delta <= window_days)
                .collect();

            if dated.is_empty() {
                return no_match(invoice);
            }

            dated.sort_by_key(|(_, delta)| *delta);
            let best_delta = dated[0].1;
            let ties = dated.iter().filter(|(_, d)| *d == best_delta).count();

            if ties > 1 {
                return MatchResult {
                    id: Uuid::new_v4(),
                    invoice_id: invoice.id,
                    transaction_id: None,
                    status: MatchStatus::Ambiguous,
                    date_delta_days: Some(best_delta),
                    score: 0.0,
                    matched_at: Utc::now(),
                };
            }

            let score = date_score(best_delta, window_days);
            MatchResult {
                id: Uuid::new_v4(),
                invoice_id: invoice.id,
                transaction_id: Some(dated[0].0.id),
                status: MatchStatus::Matched,
                date_delta_days: Some(best_delta),
                score,
                matched_at: Utc::now(),
            }
        }
        None => {
            // Undated invoice: a unique amount hit still matches, more
            // than one is ambiguous.
            if candidates.len() == 1 {
                MatchResult {
                    id: Uuid::new_v4(),
                    invoice_id: invoice.id,
                    transaction_id: Some(candidates[0].id),
                    status: MatchStatus::Matched,
                    date_delta_days: None,
                    score: UNDATED_SCORE,
                    matched_at: Utc::now(),
                }
            } else {
                MatchResult {
                    id: Uuid::new_v4(),
                    invoice_id: invoice.id,
                    transaction_id: None,
                    status: MatchStatus::Ambiguous,
                    date_delta_days: None,
                    score: 0.0,
                    matched_at: Utc::now(),
                }
            }
        }
    }
}

/// Same-day match scores 1.0, decaying linearly to 0.5 at the window edge.
fn date_score(delta_days: i64, window_days: i64) -> f32 {
    if window_days <= 0 {
        return 1.0;
    }
    1.0 - 0.5 * (delta_days as f32 / window_days as f32)
}

fn no_match(invoice: &Invoice) -> MatchResult {
    MatchResult {
        id: Uuid::new_v4(),
        invoice_id: invoice.id,
        transaction_id: None,
        status: MatchStatus::Unmatched,
        date_delta_days: None,
        score: 0.0,
        matched_at: Utc::now(),
    }
}
