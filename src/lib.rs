//! Archives Reddit submissions to local storage: post metadata, the fully
//! expanded comment tree, and any attached media, one JSON record per
//! submission.

pub mod archive;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod fetch;
pub mod media;
pub mod models;
pub mod record;
pub mod select;

pub use archive::{Archiver, RunOutcome, RunReport};
pub use client::{RedditApi, RedditClient};
pub use error::{ArchiveError, Result};
pub use fetch::{Fetch, Fetched, Fetcher};
pub use record::Serializer;
pub use select::{canonical_id, Selection, SelectionCriterion, Selector};
