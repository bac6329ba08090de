use crate::error::Result;
use crate::fetch::Fetched;
use crate::media;
use crate::models::{CommentNode, Submission};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One media reference in a record. `resolved` is true only when the file
/// was actually downloaded; `path` is relative to the output directory.
#[derive(Debug, Clone, Serialize)]
pub struct MediaEntry {
    pub url: String,
    pub path: Option<String>,
    pub resolved: bool,
}

#[derive(Serialize)]
struct ArchiverInfo {
    name: &'static str,
    version: &'static str,
}

/// The on-disk shape of one archived submission. Field order is declaration
/// order, so identical input serializes to identical bytes.
#[derive(Serialize)]
struct ArchiveRecord<'a> {
    archiver: ArchiverInfo,
    submission: &'a Submission,
    media: &'a [MediaEntry],
    comments: &'a [CommentNode],
}

/// Writes archive records under the output directory: `<id>.json` for the
/// structured record, `<id>/` for downloaded media.
pub struct Serializer {
    output_dir: PathBuf,
    media_enabled: bool,
    http: reqwest::Client,
}

impl Serializer {
    pub fn new(output_dir: impl Into<PathBuf>, media_enabled: bool) -> Self {
        Serializer {
            output_dir: output_dir.into(),
            media_enabled,
            http: reqwest::Client::new(),
        }
    }

    pub fn record_path(&self, id: &str) -> PathBuf {
        self.output_dir.join(format!("{id}.json"))
    }

    /// Serializes one fetched submission. Re-running against the same ID
    /// overwrites the previous record wholesale; a failed media download
    /// leaves its entry unresolved without failing the record.
    pub async fn serialize(&self, fetched: &Fetched) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        let id = &fetched.submission.id;

        let mut entries = Vec::with_capacity(fetched.media.len());
        if self.media_enabled && !fetched.media.is_empty() {
            let media_dir = self.output_dir.join(id.as_str());
            std::fs::create_dir_all(&media_dir)?;
            for (index, url) in fetched.media.iter().enumerate() {
                entries.push(self.fetch_media(id, index, url, &media_dir).await);
            }
        } else {
            entries.extend(fetched.media.iter().map(|url| MediaEntry {
                url: url.clone(),
                path: None,
                resolved: false,
            }));
        }

        let record = ArchiveRecord {
            archiver: ArchiverInfo {
                name: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
            },
            submission: &fetched.submission,
            media: &entries,
            comments: &fetched.comments,
        };
        let mut body = serde_json::to_string_pretty(&record)
            .expect("archive record is always serializable");
        body.push('\n');

        let path = self.record_path(id);
        std::fs::write(&path, body)?;
        Ok(path)
    }

    async fn fetch_media(&self, id: &str, index: usize, url: &str, media_dir: &Path) -> MediaEntry {
        let filename = media::filename_for(index, url);
        let dest = media_dir.join(&filename);
        match media::download(&self.http, url, &dest).await {
            Ok(()) => MediaEntry {
                url: url.to_string(),
                path: Some(format!("{id}/{filename}")),
                resolved: true,
            },
            Err(e) => {
                tracing::warn!(url, "media download failed: {e}");
                MediaEntry {
                    url: url.to_string(),
                    path: None,
                    resolved: false,
                }
            }
        }
    }
}
