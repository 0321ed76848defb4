//! Mailbox retrieval channels — IMAP and Microsoft Graph.

pub mod email;
pub mod email_poller;
pub mod graph;

pub use email::EmailConfig;
pub use email_poller::spawn_email_poller;
pub use graph::{GraphClient, GraphConfig};

use std::path::{Path, PathBuf};

/// Strip path components and shell-hostile characters from an attachment
/// name, forcing a `.pdf` suffix.
pub(crate) fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let mut clean: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if clean.trim_matches(['.', '_']).is_empty() {
        clean = "attachment".into();
    }
    if !clean.to_lowercase().ends_with(".pdf") {
        clean.push_str(".pdf");
    }
    clean
}

/// Write attachment bytes into `dir`, uniquifying the name on collision.
pub(crate) async fn save_attachment(
    dir: &Path,
    name: &str,
    bytes: &[u8],
) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let clean = sanitize_filename(name);
    let stem = clean.strip_suffix(".pdf").unwrap_or(&clean);

    let mut target = dir.join(&clean);
    let mut attempt = 1u32;
    while tokio::fs::try_exists(&target).await? {
        target = dir.join(format!("{stem}-{attempt}.pdf"));
        attempt += 1;
    }

    tokio::fs::write(&target, bytes).await?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_hostile_names() {
        assert_eq!(sanitize_filename("fatura 007.pdf"), "fatura_007.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd.pdf");
        assert_eq!(sanitize_filename("doc"), "doc.pdf");
        assert_eq!(sanitize_filename("///"), "attachment.pdf");
        assert_eq!(sanitize_filename("Fatura.PDF"), "Fatura.PDF");
    }

    #[tokio::test]
    async fn collisions_get_numbered_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let a = save_attachment(dir.path(), "fatura.pdf", b"one")
            .await
            .unwrap();
        let b = save_attachment(dir.path(), "fatura.pdf", b"two")
            .await
            .unwrap();
        assert_ne!(a, b);
        assert!(b.to_string_lossy().ends_with("fatura-1.pdf"));
        assert_eq!(std::fs::read(&a).unwrap(), b"one");
        assert_eq!(std::fs::read(&b).unwrap(), b"two");
    }
}
