//! IMAP poller — fetches invoice attachments and persists document rows.
//!
//! One poll cycle:
//! 1. Fetch unseen messages via IMAP
//! 2. Filter: self-sent, allowlist, already-fetched Message-IDs
//! 3. Save PDF attachments into the invoices directory
//! 4. Record `documents` rows and mark the messages `\Seen`

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::email::{EmailConfig, fetch_unseen_imap, is_sender_allowed, mark_seen_imap};
use crate::channels::save_attachment;
use crate::model::FetchedDocument;
use crate::store::Database;

/// Spawn a background task that polls IMAP on the configured interval.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
pub fn spawn_email_poller(
    config: EmailConfig,
    db: Arc<dyn Database>,
    invoices_dir: PathBuf,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(
            "Email poller started, polling every {}s on {}",
            config.poll_interval_secs, config.imap_host
        );

        let mut tick = tokio::time::interval(Duration::from_secs(config.poll_interval_secs));

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Email poller shutting down");
                return;
            }

            poll_once(&config, &db, &invoices_dir).await;
        }
    });

    (handle, shutdown_flag)
}

/// Run a single poll cycle. Returns the number of attachments saved;
/// failures are logged, never propagated, so the loop keeps running.
pub async fn poll_once(
    config: &EmailConfig,
    db: &Arc<dyn Database>,
    invoices_dir: &Path,
) -> usize {
    let cfg = config.clone();
    let fetch_result = tokio::task::spawn_blocking(move || fetch_unseen_imap(&cfg)).await;

    let messages = match fetch_result {
        Ok(Ok(msgs)) => msgs,
        Ok(Err(e)) => {
            error!("Email poll failed: {e}");
            return 0;
        }
        Err(e) => {
            error!("Email poll task panicked: {e}");
            return 0;
        }
    };

    if messages.is_empty() {
        return 0;
    }

    debug!("Fetched {} unseen messages", messages.len());

    let mut uids_to_mark: Vec<String> = Vec::new();
    let mut saved = 0usize;

    for mail in &messages {
        // Self-loop prevention
        if mail.sender.eq_ignore_ascii_case(&config.username) {
            debug!(sender = %mail.sender, "Skipping self-sent message");
            uids_to_mark.push(mail.uid.clone());
            continue;
        }

        if !is_sender_allowed(&config.allowed_senders, &mail.sender) {
            warn!("Blocked message from {}", mail.sender);
            uids_to_mark.push(mail.uid.clone());
            continue;
        }

        // Dedup: skip if this message was already fetched
        if db.has_document(&mail.message_id).await.unwrap_or(false) {
            uids_to_mark.push(mail.uid.clone());
            continue;
        }

        if mail.pdf_attachments.is_empty() {
            debug!(message_id = %mail.message_id, "No PDF attachments, skipping");
            uids_to_mark.push(mail.uid.clone());
            continue;
        }

        for (idx, attachment) in mail.pdf_attachments.iter().enumerate() {
            let path = match save_attachment(invoices_dir, &attachment.name, &attachment.bytes)
                .await
            {
                Ok(path) => path,
                Err(e) => {
                    error!(name = %attachment.name, "Failed to save attachment: {e}");
                    continue;
                }
            };

            // First attachment keeps the bare Message-ID so the dedup
            // check above finds it; extras get a suffix.
            let external_id = if idx == 0 {
                mail.message_id.clone()
            } else {
                format!("{}#{idx}", mail.message_id)
            };

            let doc = FetchedDocument {
                id: Uuid::new_v4(),
                external_id,
                source: "imap".into(),
                sender: mail.sender.clone(),
                subject: mail.subject.clone(),
                received_at: mail.received_at,
                attachment_path: path.to_string_lossy().into_owned(),
                fetched_at: Utc::now(),
            };

            if let Err(e) = db.record_document(&doc).await {
                error!("Failed to record document: {e}");
                continue;
            }

            info!(
                sender = %mail.sender,
                path = %path.display(),
                "Invoice attachment saved"
            );
            saved += 1;
        }

        uids_to_mark.push(mail.uid.clone());
    }

    if !uids_to_mark.is_empty() {
        let cfg = config.clone();
        let uids = uids_to_mark;
        match tokio::task::spawn_blocking(move || mark_seen_imap(&cfg, &uids)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to mark messages as seen: {e}"),
            Err(e) => warn!("Mark-seen task panicked: {e}"),
        }
    }

    saved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;
    use chrono::Utc;

    // Attachment routing logic is exercised through the store; the IMAP
    // socket path needs a live server and is covered by manual testing.
    #[tokio::test]
    async fn dedup_check_sees_recorded_documents() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let doc = FetchedDocument {
            id: Uuid::new_v4(),
            external_id: "<m1@x>".into(),
            source: "imap".into(),
            sender: "a@b.c".into(),
            subject: None,
            received_at: Utc::now(),
            attachment_path: "/tmp/f.pdf".into(),
            fetched_at: Utc::now(),
        };
        db.record_document(&doc).await.unwrap();
        assert!(db.has_document("<m1@x>").await.unwrap());
        assert!(!db.has_document("<m2@x>").await.unwrap());
    }
}
