use crate::error::{ArchiveError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Contents of `config.yml`:
///
/// ```yaml
/// reddit:
///   client_id: "..."
///   client_secret: "..."
///   refresh_token: "..."
/// defaults:
///   output_dir: "./archive"
///   limit: 0
///   media: true
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub reddit: RedditAuth,
    #[serde(default)]
    pub defaults: Defaults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditAuth {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Per-listing cap for saved/upvoted/submitted selection; 0 = unbounded.
    #[serde(default)]
    pub limit: u32,
    #[serde(default = "default_media")]
    pub media: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            output_dir: default_output_dir(),
            limit: 0,
            media: default_media(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_media() -> bool {
    true
}

/// Loads and validates the config file. Runs before any network call, so a
/// bad file fails the invocation with `Config` and nothing else.
pub fn load(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ArchiveError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let config: Config = serde_yaml_ng::from_str(&contents).map_err(|e| {
        ArchiveError::Config(format!("cannot parse {}: {e}", path.display()))
    })?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let auth = &config.reddit;
    for (key, value) in [
        ("reddit.client_id", &auth.client_id),
        ("reddit.client_secret", &auth.client_secret),
        ("reddit.refresh_token", &auth.refresh_token),
    ] {
        if value.trim().is_empty() {
            return Err(ArchiveError::Config(format!("{key} is empty")));
        }
    }
    Ok(())
}
