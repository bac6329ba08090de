use crate::error::{ArchiveError, Result};
use reqwest::Client;
use std::path::Path;

/// Derives a deterministic local filename for the `index`-th media reference:
/// the URL's last path segment, sanitized, behind a stable numeric prefix.
pub fn filename_for(index: usize, url: &str) -> String {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    let segment = trimmed.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    let sanitized: String = segment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    if sanitized.is_empty() {
        format!("{index:02}-media")
    } else {
        format!("{index:02}-{sanitized}")
    }
}

/// Downloads one media file. Non-success statuses and transport failures map
/// to `MediaDownload`, which the serializer demotes to an unresolved entry.
pub async fn download(client: &Client, url: &str, dest: &Path) -> Result<()> {
    let failed = |reason: String| ArchiveError::MediaDownload {
        url: url.to_string(),
        reason,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| failed(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(failed(format!("HTTP {status}")));
    }
    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    std::fs::write(dest, &bytes)?;
    tracing::debug!(url, dest = %dest.display(), bytes = bytes.len(), "media saved");
    Ok(())
}
