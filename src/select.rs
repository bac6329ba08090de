use crate::client::{ListingKind, RedditApi};
use crate::error::{ArchiveError, Result};
use crate::models::Listed;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// One way of picking submissions to archive. Multiple criteria combine by
/// union; an ID seen under several criteria is archived once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionCriterion {
    /// A submission ID or URL given on the command line.
    ExplicitId(String),
    SavedByMe,
    /// Saved items, also resolving saved comments to their parent submission.
    SavedByMeIncludingComments,
    UpvotedByMe,
    /// Submissions authored by a user ("me" for the authenticated account).
    PostedBy(String),
    PostedByIncludingComments(String),
}

/// What a selection pass produced: the IDs to archive, in first-seen order,
/// plus explicit refs that could not be resolved (reported, not fatal).
#[derive(Debug, Default)]
pub struct Selection {
    pub ids: Vec<String>,
    pub not_found: Vec<String>,
}

/// Reduces a submission reference (bare ID, short URL, or permalink) to its
/// canonical ID. Deterministic and idempotent: a canonical ID maps to itself.
pub fn canonical_id(input: &str) -> Option<String> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            r"^([a-z0-9]+)/?$",
            r"^https?://(?:old\.|www\.)?reddit\.com/([a-z0-9]+)/?$",
            r"^https?://(?:old\.|www\.)?reddit\.com/r/[a-zA-Z0-9_-]+/comments/([a-z0-9]+)(?:/|$)",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    });
    let input = input.trim();
    patterns
        .iter()
        .find_map(|re| re.captures(input))
        .map(|caps| caps[1].to_string())
}

/// Maps selection criteria onto API queries and unions the results.
pub struct Selector<'a, A: RedditApi> {
    api: &'a A,
}

impl<'a, A: RedditApi> Selector<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Selector { api }
    }

    /// `limit` caps each listing-based criterion; explicit IDs are never
    /// limited. 0 means unbounded.
    pub async fn select(&self, criteria: &[SelectionCriterion], limit: u32) -> Result<Selection> {
        let mut selection = Selection::default();
        let mut seen: HashSet<String> = HashSet::new();
        // Resolved lazily, only when a criterion actually needs the account name.
        let mut me: Option<String> = None;

        for criterion in criteria {
            match criterion {
                SelectionCriterion::ExplicitId(reference) => {
                    self.push_explicit(reference, &mut selection, &mut seen).await?;
                }
                SelectionCriterion::SavedByMe => {
                    let user = self.resolve_me(&mut me).await?;
                    let items = self.api.listing(ListingKind::Saved, &user, limit).await?;
                    push_listed(&items, false, limit, &mut selection, &mut seen);
                }
                SelectionCriterion::SavedByMeIncludingComments => {
                    let user = self.resolve_me(&mut me).await?;
                    let items = self.api.listing(ListingKind::Saved, &user, limit).await?;
                    push_listed(&items, true, limit, &mut selection, &mut seen);
                }
                SelectionCriterion::UpvotedByMe => {
                    let user = self.resolve_me(&mut me).await?;
                    let items = self.api.listing(ListingKind::Upvoted, &user, limit).await?;
                    push_listed(&items, false, limit, &mut selection, &mut seen);
                }
                SelectionCriterion::PostedBy(user) => {
                    let user = self.resolve_user(user, &mut me).await?;
                    let items = self.api.listing(ListingKind::Submitted, &user, limit).await?;
                    push_listed(&items, false, limit, &mut selection, &mut seen);
                }
                SelectionCriterion::PostedByIncludingComments(user) => {
                    let user = self.resolve_user(user, &mut me).await?;
                    let items = self.api.listing(ListingKind::Submitted, &user, limit).await?;
                    push_listed(&items, true, limit, &mut selection, &mut seen);
                }
            }
        }
        Ok(selection)
    }

    async fn push_explicit(
        &self,
        reference: &str,
        selection: &mut Selection,
        seen: &mut HashSet<String>,
    ) -> Result<()> {
        let Some(id) = canonical_id(reference) else {
            tracing::warn!(reference, "does not look like a submission ID or URL");
            selection.not_found.push(reference.to_string());
            return Ok(());
        };
        match self.api.submission_exists(&id).await {
            Ok(true) => {
                if seen.insert(id.clone()) {
                    selection.ids.push(id);
                }
            }
            Ok(false) => {
                tracing::warn!(%id, "submission not found, skipping");
                selection.not_found.push(id);
            }
            Err(ArchiveError::NotFound(_)) => {
                tracing::warn!(%id, "submission not found, skipping");
                selection.not_found.push(id);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn resolve_me(&self, me: &mut Option<String>) -> Result<String> {
        if let Some(name) = me {
            return Ok(name.clone());
        }
        let name = self.api.identity().await?;
        *me = Some(name.clone());
        Ok(name)
    }

    async fn resolve_user(&self, user: &str, me: &mut Option<String>) -> Result<String> {
        if user == "me" {
            self.resolve_me(me).await
        } else {
            Ok(user.to_string())
        }
    }
}

/// Folds one listing into the selection: submissions directly, comments via
/// their parent submission when `include_comments` is set. The cap applies to
/// listing items consumed, so one criterion never contributes more than
/// `limit` identifiers.
fn push_listed(
    items: &[Listed],
    include_comments: bool,
    limit: u32,
    selection: &mut Selection,
    seen: &mut HashSet<String>,
) {
    let mut taken = 0u32;
    for item in items {
        if limit > 0 && taken >= limit {
            break;
        }
        let id = match item {
            Listed::Submission { id } => Some(id.clone()),
            Listed::Comment { link_id } if include_comments => link_id
                .as_deref()
                .map(|full| full.strip_prefix("t3_").unwrap_or(full).to_string()),
            Listed::Comment { .. } => None,
        };
        if let Some(id) = id {
            taken += 1;
            if seen.insert(id.clone()) {
                selection.ids.push(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ListingKind;
    use crate::models::{LinkData, Thing};
    use async_trait::async_trait;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeApi {
        known: HashSet<String>,
        me: String,
        listings: HashMap<(ListingKind, String), Vec<Listed>>,
    }

    impl FakeApi {
        fn submissions(ids: &[&str]) -> Vec<Listed> {
            ids.iter()
                .map(|id| Listed::Submission { id: id.to_string() })
                .collect()
        }
    }

    #[async_trait]
    impl RedditApi for FakeApi {
        async fn identity(&self) -> crate::error::Result<String> {
            Ok(self.me.clone())
        }

        async fn submission_exists(&self, id: &str) -> crate::error::Result<bool> {
            Ok(self.known.contains(id))
        }

        async fn listing(
            &self,
            kind: ListingKind,
            user: &str,
            _limit: u32,
        ) -> crate::error::Result<Vec<Listed>> {
            Ok(self
                .listings
                .get(&(kind, user.to_string()))
                .cloned()
                .unwrap_or_default())
        }

        async fn comments(&self, _id: &str) -> crate::error::Result<(LinkData, Vec<Thing>)> {
            unreachable!("selector never fetches comments")
        }

        async fn more_children(
            &self,
            _link: &str,
            _children: &[String],
        ) -> crate::error::Result<Vec<Thing>> {
            unreachable!("selector never expands comments")
        }
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let url = "https://www.reddit.com/r/Superbowl/comments/14hczkk/elf_owl_enjoying_our_pond/";
        let once = canonical_id(url).unwrap();
        assert_eq!(once, "14hczkk");
        assert_eq!(canonical_id(&once).unwrap(), once);
        assert_eq!(canonical_id("14hczkk").unwrap(), "14hczkk");
    }

    #[test]
    fn canonicalization_accepts_short_and_old_urls() {
        assert_eq!(
            canonical_id("https://old.reddit.com/14iard6").as_deref(),
            Some("14iard6")
        );
        assert_eq!(
            canonical_id("http://reddit.com/r/rust/comments/abc123").as_deref(),
            Some("abc123")
        );
        assert_eq!(canonical_id("not a url at all"), None);
    }

    #[tokio::test]
    async fn single_explicit_id_selects_exactly_itself() {
        let mut api = FakeApi::default();
        api.known.insert("14iard6".to_string());
        let selector = Selector::new(&api);

        let sel = selector
            .select(&[SelectionCriterion::ExplicitId("14iard6".into())], 0)
            .await
            .unwrap();
        assert_eq!(sel.ids, vec!["14iard6"]);
        assert!(sel.not_found.is_empty());
    }

    #[tokio::test]
    async fn unresolvable_explicit_id_is_skipped_not_fatal() {
        let api = FakeApi::default();
        let selector = Selector::new(&api);

        let sel = selector
            .select(
                &[
                    SelectionCriterion::ExplicitId("zzzzzz".into()),
                    SelectionCriterion::ExplicitId("%%%".into()),
                ],
                0,
            )
            .await
            .unwrap();
        assert!(sel.ids.is_empty());
        assert_eq!(sel.not_found.len(), 2);
    }

    #[tokio::test]
    async fn union_preserves_first_seen_order() {
        let mut api = FakeApi::default();
        api.me = "archivist".to_string();
        api.listings.insert(
            (ListingKind::Submitted, "archivist".to_string()),
            FakeApi::submissions(&["aaa", "bbb"]),
        );
        api.listings.insert(
            (ListingKind::Submitted, "iamthatis".to_string()),
            FakeApi::submissions(&["bbb", "ccc"]),
        );
        let selector = Selector::new(&api);

        let sel = selector
            .select(
                &[
                    SelectionCriterion::PostedBy("me".into()),
                    SelectionCriterion::PostedBy("iamthatis".into()),
                ],
                10,
            )
            .await
            .unwrap();
        assert_eq!(sel.ids, vec!["aaa", "bbb", "ccc"]);
    }

    #[tokio::test]
    async fn limit_caps_each_listing_criterion() {
        let mut api = FakeApi::default();
        api.me = "archivist".to_string();
        let many: Vec<String> = (0..30).map(|i| format!("id{i:02}")).collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        api.listings.insert(
            (ListingKind::Submitted, "archivist".to_string()),
            FakeApi::submissions(&refs),
        );
        api.listings.insert(
            (ListingKind::Submitted, "iamthatis".to_string()),
            FakeApi::submissions(&refs[15..]),
        );
        let selector = Selector::new(&api);

        let sel = selector
            .select(
                &[
                    SelectionCriterion::PostedBy("me".into()),
                    SelectionCriterion::PostedBy("iamthatis".into()),
                ],
                10,
            )
            .await
            .unwrap();
        // At most 10 per criterion, deduplicated across the union.
        assert!(sel.ids.len() <= 20);
        assert_eq!(sel.ids.len(), 20);
        let unique: HashSet<_> = sel.ids.iter().collect();
        assert_eq!(unique.len(), sel.ids.len());
    }

    #[tokio::test]
    async fn explicit_ids_are_never_truncated_by_limit() {
        let mut api = FakeApi::default();
        for i in 0..5 {
            api.known.insert(format!("post{i}"));
        }
        let criteria: Vec<SelectionCriterion> = (0..5)
            .map(|i| SelectionCriterion::ExplicitId(format!("post{i}")))
            .collect();
        let selector = Selector::new(&api);

        let sel = selector.select(&criteria, 2).await.unwrap();
        assert_eq!(sel.ids.len(), 5);
    }

    #[tokio::test]
    async fn saved_comments_resolve_to_parent_submissions() {
        let mut api = FakeApi::default();
        api.me = "archivist".to_string();
        api.listings.insert(
            (ListingKind::Saved, "archivist".to_string()),
            vec![
                Listed::Submission { id: "aaa".into() },
                Listed::Comment { link_id: Some("t3_bbb".into()) },
                Listed::Comment { link_id: Some("t3_aaa".into()) },
            ],
        );
        let selector = Selector::new(&api);

        let without = selector
            .select(&[SelectionCriterion::SavedByMe], 0)
            .await
            .unwrap();
        assert_eq!(without.ids, vec!["aaa"]);

        let with = selector
            .select(&[SelectionCriterion::SavedByMeIncludingComments], 0)
            .await
            .unwrap();
        assert_eq!(with.ids, vec!["aaa", "bbb"]);
    }
}
