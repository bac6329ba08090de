use crate::config::RedditAuth;
use crate::error::{ArchiveError, Result};
use crate::models::{Listed, LinkData, Thing};
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const API_ROOT: &str = "https://oauth.reddit.com";
const PAGE_SIZE: u32 = 100;
const RETRY_ATTEMPTS: u32 = 3;
const BACKOFF_INITIAL_MS: u64 = 800;
const BACKOFF_MAX_MS: u64 = 5000;

/// Which user listing to page through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListingKind {
    Saved,
    Upvoted,
    Submitted,
}

impl ListingKind {
    fn path_segment(self) -> &'static str {
        match self {
            ListingKind::Saved => "saved",
            ListingKind::Upvoted => "upvoted",
            ListingKind::Submitted => "submitted",
        }
    }
}

/// The slice of the Reddit API the selector and fetcher consume. Kept as a
/// trait so tests can drive them with canned listings.
#[async_trait]
pub trait RedditApi: Sync {
    /// Username of the authenticated account.
    async fn identity(&self) -> Result<String>;

    /// Whether a submission with this ID exists (and is visible to us).
    async fn submission_exists(&self, id: &str) -> Result<bool>;

    /// Pages through a user listing, newest first. `limit` of 0 means
    /// unbounded (up to the API's own pagination ceiling).
    async fn listing(&self, kind: ListingKind, user: &str, limit: u32) -> Result<Vec<Listed>>;

    /// The submission plus its top-level comment things (t1/more).
    async fn comments(&self, id: &str) -> Result<(LinkData, Vec<Thing>)>;

    /// Expands a "load more comments" stub; returned things are flat, each
    /// carrying its `parent_id`.
    async fn more_children(&self, link_fullname: &str, children: &[String]) -> Result<Vec<Thing>>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// One authenticated API session, opened at startup and reused for the whole
/// run. Every request passes through a shared rate limiter, plus a cooldown
/// that 429 responses push forward.
pub struct RedditClient {
    http: reqwest::Client,
    token: String,
    limiter: DefaultDirectRateLimiter,
    cooldown_until: AtomicU64,
}

impl RedditClient {
    /// Exchanges the stored refresh token for an access token.
    pub async fn connect(auth: &RedditAuth, requests_per_minute: u32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("reddit-archiver/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        let response = http
            .post(TOKEN_URL)
            .basic_auth(&auth.client_id, Some(&auth.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", auth.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ArchiveError::Auth(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArchiveError::Auth(format!(
                "token exchange rejected with HTTP {status}; check your credentials"
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ArchiveError::Auth(format!("malformed token response: {e}")))?;

        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute.max(1)).unwrap());
        Ok(RedditClient {
            http,
            token: token.access_token,
            limiter: RateLimiter::direct(quota),
            cooldown_until: AtomicU64::new(0),
        })
    }

    async fn gate(&self) {
        let now = now_secs();
        let until = self.cooldown_until.load(Ordering::Relaxed);
        if until > now {
            tokio::time::sleep(Duration::from_secs(until - now)).await;
        }
        self.limiter.until_ready().await;
    }

    fn set_cooldown(&self, secs: u64) {
        let until = now_secs() + secs;
        let prev = self.cooldown_until.load(Ordering::Relaxed);
        if until > prev {
            self.cooldown_until.store(until, Ordering::Relaxed);
        }
    }

    /// Authenticated GET with bounded retry on transient failures (429, 5xx,
    /// timeouts). Auth rejections and 404s return immediately.
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let mut eb = ExponentialBackoff {
            current_interval: Duration::from_millis(BACKOFF_INITIAL_MS),
            initial_interval: Duration::from_millis(BACKOFF_INITIAL_MS),
            max_interval: Duration::from_millis(BACKOFF_MAX_MS),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        let mut last_failure = String::new();
        for attempt in 1..=RETRY_ATTEMPTS {
            self.gate().await;
            let sent = self
                .http
                .get(format!("{API_ROOT}{path}"))
                .bearer_auth(&self.token)
                .query(query)
                .send()
                .await;

            match sent {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json().await?);
                    }
                    if status == reqwest::StatusCode::UNAUTHORIZED
                        || status == reqwest::StatusCode::FORBIDDEN
                    {
                        return Err(ArchiveError::Auth(format!("{path} returned HTTP {status}")));
                    }
                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(ArchiveError::NotFound(path.to_string()));
                    }
                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        self.set_cooldown(20 + (attempt as u64) * 10);
                    } else if !status.is_server_error() {
                        return Err(ArchiveError::Fetch(format!("{path} returned HTTP {status}")));
                    }
                    last_failure = format!("HTTP {status}");
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_failure = e.to_string();
                }
                Err(e) => return Err(e.into()),
            }

            if attempt < RETRY_ATTEMPTS {
                let sleep = eb
                    .next_backoff()
                    .unwrap_or(Duration::from_millis(BACKOFF_MAX_MS));
                tracing::debug!(path, attempt, "transient failure ({last_failure}), backing off {}ms", sleep.as_millis());
                tokio::time::sleep(sleep).await;
            }
        }

        Err(ArchiveError::Fetch(format!(
            "{path} still failing after {RETRY_ATTEMPTS} attempts: {last_failure}"
        )))
    }
}

#[async_trait]
impl RedditApi for RedditClient {
    async fn identity(&self) -> Result<String> {
        let me = self.get_json("/api/v1/me", &[]).await?;
        me.get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ArchiveError::Payload("/api/v1/me has no name".into()))
    }

    async fn submission_exists(&self, id: &str) -> Result<bool> {
        let value = self
            .get_json("/api/info", &[("id", format!("t3_{id}")), raw_json()])
            .await?;
        let listing: Thing = serde_json::from_value(value)
            .map_err(|e| ArchiveError::Payload(format!("/api/info: {e}")))?;
        match listing {
            Thing::Listing(l) => Ok(!l.children.is_empty()),
            _ => Err(ArchiveError::Payload("/api/info did not return a listing".into())),
        }
    }

    async fn listing(&self, kind: ListingKind, user: &str, limit: u32) -> Result<Vec<Listed>> {
        let path = format!("/user/{user}/{}", kind.path_segment());
        let mut out = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut query = vec![
                ("limit", PAGE_SIZE.to_string()),
                raw_json(),
            ];
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }
            let value = self.get_json(&path, &query).await?;
            let page: Thing = serde_json::from_value(value)
                .map_err(|e| ArchiveError::Payload(format!("{path}: {e}")))?;
            let Thing::Listing(page) = page else {
                return Err(ArchiveError::Payload(format!("{path} did not return a listing")));
            };

            let empty = page.children.is_empty();
            for thing in page.children {
                match thing {
                    Thing::Link(link) => out.push(Listed::Submission { id: link.id }),
                    Thing::Comment(comment) => {
                        out.push(Listed::Comment { link_id: comment.link_id })
                    }
                    _ => {}
                }
                if limit > 0 && out.len() as u32 >= limit {
                    return Ok(out);
                }
            }

            after = page.after;
            if after.is_none() || empty {
                return Ok(out);
            }
        }
    }

    async fn comments(&self, id: &str) -> Result<(LinkData, Vec<Thing>)> {
        let value = self
            .get_json(&format!("/comments/{id}"), &[("limit", "500".to_string()), raw_json()])
            .await?;
        let pair: Vec<Thing> = serde_json::from_value(value)
            .map_err(|e| ArchiveError::Payload(format!("/comments/{id}: {e}")))?;

        let mut iter = pair.into_iter();
        let link = match iter.next() {
            Some(Thing::Listing(l)) => l.children.into_iter().find_map(|t| match t {
                Thing::Link(link) => Some(link),
                _ => None,
            }),
            _ => None,
        };
        let link = link.ok_or_else(|| ArchiveError::NotFound(id.to_string()))?;

        let forest = match iter.next() {
            Some(Thing::Listing(l)) => l.children,
            _ => Vec::new(),
        };
        Ok((link, forest))
    }

    async fn more_children(&self, link_fullname: &str, children: &[String]) -> Result<Vec<Thing>> {
        let value = self
            .get_json(
                "/api/morechildren",
                &[
                    ("api_type", "json".to_string()),
                    ("link_id", link_fullname.to_string()),
                    ("children", children.join(",")),
                    ("limit_children", "false".to_string()),
                    raw_json(),
                ],
            )
            .await?;
        let things = value
            .pointer("/json/data/things")
            .cloned()
            .ok_or_else(|| ArchiveError::Payload("/api/morechildren has no things".into()))?;
        serde_json::from_value(things)
            .map_err(|e| ArchiveError::Payload(format!("/api/morechildren: {e}")))
    }
}

fn raw_json() -> (&'static str, String) {
    ("raw_json", "1".to_string())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
