use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Error taxonomy for one archive run.
///
/// `Config` and `Auth` are fatal and abort the run; everything else is
/// per-item (or per-media) and is collected into the run report instead of
/// propagating past the archiver.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("submission {0} not found")]
    NotFound(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("media download failed for {url}: {reason}")]
    MediaDownload { url: String, reason: String },

    #[error("unexpected API payload: {0}")]
    Payload(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Fatal errors terminate the whole run; everything else skips one item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ArchiveError::Config(_) | ArchiveError::Auth(_))
    }
}
