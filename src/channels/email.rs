//! IMAP retrieval — fetches unseen messages and their PDF attachments.
//!
//! Raw IMAP over rustls: LOGIN, SELECT INBOX, SEARCH UNSEEN, FETCH RFC822,
//! with MIME parsing by mail-parser. Blocking socket I/O throughout —
//! callers run these functions inside `spawn_blocking`.

use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::error::EmailError;

// ── Configuration ───────────────────────────────────────────────────

/// IMAP mailbox configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: SecretString,
    pub poll_interval_secs: u64,
    pub allowed_senders: Vec<String>,
}

impl EmailConfig {
    /// Build config from environment variables.
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set (retrieval disabled).
    pub fn from_env() -> Option<Self> {
        let imap_host = std::env::var("EMAIL_IMAP_HOST").ok()?;

        let imap_port: u16 = std::env::var("EMAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());

        let poll_interval_secs: u64 = std::env::var("EMAIL_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        let allowed_senders: Vec<String> = std::env::var("EMAIL_ALLOWED_SENDERS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Some(Self {
            imap_host,
            imap_port,
            username,
            password,
            poll_interval_secs,
            allowed_senders,
        })
    }
}

/// Check if a sender email is in the allowlist.
///
/// - Empty list → deny all
/// - `*` in list → allow all
/// - `@domain.com` or `domain.com` → domain match
/// - `user@domain.com` → exact email match
pub fn is_sender_allowed(allowed: &[String], email: &str) -> bool {
    if allowed.is_empty() {
        return false;
    }
    if allowed.iter().any(|a| a == "*") {
        return true;
    }
    let email_lower = email.to_lowercase();
    allowed.iter().any(|a| {
        if a.starts_with('@') {
            email_lower.ends_with(&a.to_lowercase())
        } else if a.contains('@') {
            a.eq_ignore_ascii_case(email)
        } else {
            email_lower.ends_with(&format!("@{}", a.to_lowercase()))
        }
    })
}

// ── Fetched message types ───────────────────────────────────────────

/// A PDF attachment pulled out of a message.
#[derive(Debug, Clone)]
pub struct PdfAttachment {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// An unseen message with its invoice attachments.
#[derive(Debug, Clone)]
pub struct FetchedMail {
    /// IMAP sequence number, used for the later \Seen store.
    pub uid: String,
    /// Message-ID header (generated when absent).
    pub message_id: String,
    pub sender: String,
    pub subject: Option<String>,
    pub received_at: DateTime<Utc>,
    pub pdf_attachments: Vec<PdfAttachment>,
}

/// Extract the sender address from a parsed email.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// Pull PDF attachments out of a parsed message.
fn extract_pdf_attachments(parsed: &mail_parser::Message) -> Vec<PdfAttachment> {
    let mut out = Vec::new();
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        let name = MimeHeaders::attachment_name(part)
            .unwrap_or("attachment.pdf")
            .to_string();
        let by_type = MimeHeaders::content_type(part).is_some_and(|ct| {
            ct.ctype().eq_ignore_ascii_case("application")
                && ct.subtype().is_some_and(|s| s.eq_ignore_ascii_case("pdf"))
        });
        let by_name = name.to_lowercase().ends_with(".pdf");
        if by_type || by_name {
            out.push(PdfAttachment {
                name,
                bytes: part.contents().to_vec(),
            });
        }
    }
    out
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Open a TLS connection to the IMAP server and read the greeting.
fn connect(config: &EmailConfig) -> Result<TlsStream, EmailError> {
    let tcp = TcpStream::connect((&*config.imap_host, config.imap_port)).map_err(|e| {
        EmailError::Connect {
            host: config.imap_host.clone(),
            reason: e.to_string(),
        }
    })?;
    tcp.set_read_timeout(Some(Duration::from_secs(30)))
        .map_err(|e| EmailError::Connect {
            host: config.imap_host.clone(),
            reason: e.to_string(),
        })?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name: rustls::pki_types::ServerName<'_> =
        rustls::pki_types::ServerName::try_from(config.imap_host.clone()).map_err(|e| {
            EmailError::Connect {
                host: config.imap_host.clone(),
                reason: e.to_string(),
            }
        })?;
    let conn = rustls::ClientConnection::new(tls_config, server_name).map_err(|e| {
        EmailError::Connect {
            host: config.imap_host.clone(),
            reason: e.to_string(),
        }
    })?;
    let mut tls = rustls::StreamOwned::new(conn, tcp);

    let _greeting = read_line(&mut tls)?;
    Ok(tls)
}

/// Read a single CRLF-terminated line.
fn read_line(tls: &mut TlsStream) -> Result<String, EmailError> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match std::io::Read::read(tls, &mut byte) {
            Ok(0) => return Err(EmailError::Protocol("IMAP connection closed".into())),
            Ok(_) => {
                buf.push(byte[0]);
                if buf.ends_with(b"\r\n") {
                    return Ok(String::from_utf8_lossy(&buf).to_string());
                }
            }
            Err(e) => return Err(EmailError::Protocol(e.to_string())),
        }
    }
}

/// Send a tagged command and collect response lines up to the tagged reply.
fn send_cmd(tls: &mut TlsStream, tag: &str, cmd: &str) -> Result<Vec<String>, EmailError> {
    let full = format!("{tag} {cmd}\r\n");
    std::io::Write::write_all(tls, full.as_bytes()).map_err(|e| EmailError::Protocol(e.to_string()))?;
    std::io::Write::flush(tls).map_err(|e| EmailError::Protocol(e.to_string()))?;

    let mut lines = Vec::new();
    loop {
        let line = read_line(tls)?;
        let done = line.starts_with(tag);
        lines.push(line);
        if done {
            break;
        }
    }
    Ok(lines)
}

/// Fetch unseen messages and their PDF attachments.
/// Blocking — run in `spawn_blocking`.
pub fn fetch_unseen_imap(config: &EmailConfig) -> Result<Vec<FetchedMail>, EmailError> {
    let mut tls = connect(config)?;

    let login_resp = send_cmd(
        &mut tls,
        "A1",
        &format!(
            "LOGIN \"{}\" \"{}\"",
            config.username,
            config.password.expose_secret()
        ),
    )?;
    if !login_resp.last().is_some_and(|l| l.contains("OK")) {
        return Err(EmailError::Auth("IMAP login rejected".into()));
    }

    let _select = send_cmd(&mut tls, "A2", "SELECT \"INBOX\"")?;

    let search_resp = send_cmd(&mut tls, "A3", "SEARCH UNSEEN")?;
    let mut uids: Vec<String> = Vec::new();
    for line in &search_resp {
        if line.starts_with("* SEARCH") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() > 2 {
                uids.extend(parts[2..].iter().map(|s| s.to_string()));
            }
        }
    }

    let mut results = Vec::new();
    let mut tag_counter = 4_u32;

    for uid in &uids {
        let fetch_tag = format!("A{tag_counter}");
        tag_counter += 1;
        let fetch_resp = send_cmd(&mut tls, &fetch_tag, &format!("FETCH {uid} RFC822"))?;

        // First line is the untagged FETCH header, last is the tagged OK;
        // everything between is the raw message.
        let raw: String = fetch_resp
            .iter()
            .skip(1)
            .take(fetch_resp.len().saturating_sub(2))
            .cloned()
            .collect();

        let Some(parsed) = MessageParser::default().parse(raw.as_bytes()) else {
            tracing::warn!(uid = %uid, "Unparseable message, skipping");
            continue;
        };

        let sender = extract_sender(&parsed);
        let subject = parsed.subject().map(|s| s.to_string());
        let message_id = parsed
            .message_id()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("gen-{}", Uuid::new_v4()));
        let received_at = parsed
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
            .unwrap_or_else(Utc::now);
        let pdf_attachments = extract_pdf_attachments(&parsed);

        results.push(FetchedMail {
            uid: uid.clone(),
            message_id,
            sender,
            subject,
            received_at,
            pdf_attachments,
        });
    }

    let _ = send_cmd(&mut tls, &format!("A{tag_counter}"), "LOGOUT");
    Ok(results)
}

/// Mark messages as `\Seen` so the next poll skips them.
/// Blocking — run in `spawn_blocking`.
pub fn mark_seen_imap(config: &EmailConfig, uids: &[String]) -> Result<(), EmailError> {
    if uids.is_empty() {
        return Ok(());
    }

    let mut tls = connect(config)?;

    let login_resp = send_cmd(
        &mut tls,
        "B1",
        &format!(
            "LOGIN \"{}\" \"{}\"",
            config.username,
            config.password.expose_secret()
        ),
    )?;
    if !login_resp.last().is_some_and(|l| l.contains("OK")) {
        return Err(EmailError::Auth("IMAP login rejected".into()));
    }

    let _select = send_cmd(&mut tls, "B2", "SELECT \"INBOX\"")?;

    let mut tag_counter = 3_u32;
    for uid in uids {
        let tag = format!("B{tag_counter}");
        tag_counter += 1;
        send_cmd(&mut tls, &tag, &format!("STORE {uid} +FLAGS (\\Seen)"))?;
    }

    let _ = send_cmd(&mut tls, &format!("B{tag_counter}"), "LOGOUT");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_empty_denies_all() {
        assert!(!is_sender_allowed(&[], "anyone@example.com"));
    }

    #[test]
    fn allowlist_wildcard_allows_all() {
        let allowed = vec!["*".to_string()];
        assert!(is_sender_allowed(&allowed, "anyone@example.com"));
    }

    #[test]
    fn allowlist_domain_match() {
        let allowed = vec!["@fornecedor.pt".to_string()];
        assert!(is_sender_allowed(&allowed, "faturas@fornecedor.pt"));
        assert!(is_sender_allowed(&allowed, "FATURAS@FORNECEDOR.PT"));
        assert!(!is_sender_allowed(&allowed, "faturas@outro.pt"));
    }

    #[test]
    fn allowlist_bare_domain_match() {
        let allowed = vec!["fornecedor.pt".to_string()];
        assert!(is_sender_allowed(&allowed, "billing@fornecedor.pt"));
        assert!(!is_sender_allowed(&allowed, "billing@notfornecedor.other"));
    }

    #[test]
    fn allowlist_exact_email_match() {
        let allowed = vec!["faturas@fornecedor.pt".to_string()];
        assert!(is_sender_allowed(&allowed, "faturas@fornecedor.pt"));
        assert!(!is_sender_allowed(&allowed, "outro@fornecedor.pt"));
    }

    #[test]
    fn pdf_attachments_extracted_from_mime() {
        let raw = concat!(
            "From: Faturas <faturas@fornecedor.pt>\r\n",
            "To: financeiro@empresa.pt\r\n",
            "Subject: Fatura 2024/007\r\n",
            "Message-ID: <abc@fornecedor.pt>\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/mixed; boundary=\"b1\"\r\n",
            "\r\n",
            "--b1\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "Segue em anexo.\r\n",
            "--b1\r\n",
            "Content-Type: application/pdf; name=\"fatura_007.pdf\"\r\n",
            "Content-Disposition: attachment; filename=\"fatura_007.pdf\"\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "JVBERi0xLjQK\r\n",
            "--b1--\r\n",
        );
        let parsed = MessageParser::default().parse(raw.as_bytes()).unwrap();
        let attachments = extract_pdf_attachments(&parsed);
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].name, "fatura_007.pdf");
        // "JVBERi0xLjQK" is base64 for "%PDF-1.4\n"
        assert!(attachments[0].bytes.starts_with(b"%PDF"));
        assert_eq!(extract_sender(&parsed), "faturas@fornecedor.pt");
    }

    #[test]
    fn non_pdf_attachments_ignored() {
        let raw = concat!(
            "From: a@b.c\r\n",
            "Subject: x\r\n",
            "Content-Type: multipart/mixed; boundary=\"b1\"\r\n",
            "\r\n",
            "--b1\r\n",
            "Content-Type: image/png; name=\"logo.png\"\r\n",
            "Content-Disposition: attachment; filename=\"logo.png\"\r\n",
            "\r\n",
            "notapng\r\n",
            "--b1--\r\n",
        );
        let parsed = MessageParser::default().parse(raw.as_bytes()).unwrap();
        assert!(extract_pdf_attachments(&parsed).is_empty());
    }
}
