use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Wire model: Reddit's "Thing" envelope as returned by the JSON API.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum Thing {
    #[serde(rename = "Listing")]
    Listing(Listing),
    #[serde(rename = "t1")]
    Comment(CommentData),
    #[serde(rename = "t3")]
    Link(LinkData),
    #[serde(rename = "more")]
    More(MoreData),
    #[serde(other, deserialize_with = "ignore_contents")]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Listing {
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub children: Vec<Thing>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentData {
    pub id: String,
    pub parent_id: String,
    /// Fullname of the owning submission ("t3_..."); present in user
    /// listings, absent inside a comment page.
    #[serde(default)]
    pub link_id: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub distinguished: Option<String>,
    #[serde(default, deserialize_with = "edited_field")]
    pub edited: bool,
    #[serde(default)]
    pub is_submitter: bool,
    /// The API sends an empty string instead of a listing when a comment has
    /// no replies; normalize both shapes to a plain vec.
    #[serde(default, deserialize_with = "replies_field")]
    pub replies: Vec<Thing>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkData {
    pub id: String,
    pub subreddit: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub selftext: Option<String>,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub upvote_ratio: f64,
    #[serde(default)]
    pub link_flair_text: Option<String>,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub stickied: bool,
    #[serde(default)]
    pub spoiler: bool,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub is_original_content: bool,
    #[serde(default, deserialize_with = "edited_field")]
    pub edited: bool,
    #[serde(default)]
    pub media_metadata: Option<Value>,
    #[serde(default)]
    pub preview: Option<Value>,
}

/// An unexpanded "load more comments" stub.
#[derive(Debug, Clone, Deserialize)]
pub struct MoreData {
    pub parent_id: String,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub children: Vec<String>,
}

fn ignore_contents<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: Deserializer<'de>,
{
    serde::de::IgnoredAny::deserialize(deserializer)?;
    Ok(())
}

fn replies_field<'de, D>(deserializer: D) -> Result<Vec<Thing>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null | Value::String(_) => Ok(Vec::new()),
        other => {
            let thing: Thing = serde_json::from_value(other).map_err(serde::de::Error::custom)?;
            match thing {
                Thing::Listing(listing) => Ok(listing.children),
                _ => Ok(Vec::new()),
            }
        }
    }
}

/// `edited` is `false` for pristine content and an epoch timestamp otherwise.
fn edited_field<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_f64().is_some() || value.as_bool().unwrap_or(false))
}

/// One entry of a user listing (saved/upvoted/submitted), reduced to what the
/// selector needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listed {
    /// A submission, by bare ID.
    Submission { id: String },
    /// A comment; `link_id` is the fullname of its parent submission.
    Comment { link_id: Option<String> },
}

// ---------------------------------------------------------------------------
// Domain model: what ends up in an archive record.
// ---------------------------------------------------------------------------

pub const DELETED: &str = "[deleted]";

#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub id: String,
    pub subreddit: String,
    pub title: String,
    pub author: String,
    pub created_utc: i64,
    /// When this snapshot was fetched; part of the fetched data so that
    /// re-serializing it stays byte-identical.
    pub retrieved_utc: i64,
    pub permalink: String,
    pub url: Option<String>,
    pub selftext: Option<String>,
    pub score: i64,
    pub num_comments: i64,
    pub upvote_ratio: f64,
    pub flair: Option<String>,
    pub stickied: bool,
    pub spoiler: bool,
    pub over_18: bool,
    pub locked: bool,
    pub original_content: bool,
    pub edited: bool,
}

impl Submission {
    pub fn from_link(link: &LinkData, retrieved_utc: i64) -> Self {
        Submission {
            id: link.id.clone(),
            subreddit: link.subreddit.clone(),
            title: link.title.clone(),
            author: link.author.clone().unwrap_or_else(|| DELETED.to_string()),
            created_utc: link.created_utc as i64,
            retrieved_utc,
            permalink: link.permalink.clone(),
            url: link.url.clone(),
            selftext: link.selftext.clone().filter(|s| !s.is_empty()),
            score: link.score,
            num_comments: link.num_comments,
            upvote_ratio: link.upvote_ratio,
            flair: link.link_flair_text.clone(),
            stickied: link.stickied,
            spoiler: link.spoiler,
            over_18: link.over_18,
            locked: link.locked,
            original_content: link.is_original_content,
            edited: link.edited,
        }
    }
}

/// One comment and its replies, in the order the API returned them.
///
/// A comment without replies carries an empty vec, never an absent field.
#[derive(Debug, Clone, Serialize)]
pub struct CommentNode {
    pub id: String,
    pub author: String,
    pub body: String,
    pub score: i64,
    pub created_utc: i64,
    pub permalink: Option<String>,
    pub distinguished: Option<String>,
    pub edited: bool,
    pub is_submitter: bool,
    pub replies: Vec<CommentNode>,
}

// Reply chains are as deep as the thread itself; the derived drop would
// recurse once per level, so tear the subtree down with an explicit stack.
impl Drop for CommentNode {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.replies);
        while let Some(mut node) = stack.pop() {
            stack.append(&mut node.replies);
        }
    }
}

impl CommentNode {
    pub fn from_data(data: &CommentData) -> Self {
        CommentNode {
            id: data.id.clone(),
            author: data.author.clone().unwrap_or_else(|| DELETED.to_string()),
            body: data.body.clone().unwrap_or_else(|| DELETED.to_string()),
            score: data.score,
            created_utc: data.created_utc as i64,
            permalink: data.permalink.clone(),
            distinguished: data.distinguished.clone(),
            edited: data.edited,
            is_submitter: data.is_submitter,
            replies: Vec::new(),
        }
    }
}
