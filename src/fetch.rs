use crate::client::RedditApi;
use crate::error::{ArchiveError, Result};
use crate::models::{CommentNode, LinkData, MoreData, Submission, Thing};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

/// `morechildren` accepts at most 100 child IDs per call.
const MORE_BATCH: usize = 100;

/// Everything fetched for one submission: metadata, the complete comment
/// forest, and the media references spotted in the submission.
#[derive(Debug)]
pub struct Fetched {
    pub submission: Submission,
    pub comments: Vec<CommentNode>,
    pub media: Vec<String>,
}

/// Seam between the archiver and the network; tests substitute canned data.
#[async_trait]
pub trait Fetch: Sync {
    async fn fetch(&self, id: &str) -> Result<Fetched>;
}

pub struct Fetcher<'a, A: RedditApi> {
    api: &'a A,
}

impl<'a, A: RedditApi> Fetcher<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Fetcher { api }
    }
}

#[async_trait]
impl<A: RedditApi> Fetch for Fetcher<'_, A> {
    async fn fetch(&self, id: &str) -> Result<Fetched> {
        let retrieved_utc = now_secs();
        let (link, top_level) = self.api.comments(id).await.map_err(|e| wrap(id, e))?;
        let link_fullname = format!("t3_{}", link.id);

        let mut builder = TreeBuilder::default();
        for thing in top_level {
            builder.ingest(thing);
        }

        // Drain "load more comments" stubs until the forest is complete. New
        // stubs returned by an expansion go back on the queue; `requested`
        // guarantees progress when the API re-delivers a stub it already
        // answered, otherwise the drain would spin on it forever.
        let mut requested: HashSet<String> = HashSet::new();
        while let Some(more) = builder.pending.pop_front() {
            let children = if more.children.is_empty() {
                // A "continue this thread" stub names no children; asking for
                // its parent comment re-yields that subtree.
                match more.parent_id.strip_prefix("t1_") {
                    Some(parent) => vec![parent.to_string()],
                    None => continue,
                }
            } else {
                more.children
            };
            let fresh: Vec<String> = children
                .into_iter()
                .filter(|child| requested.insert(child.clone()))
                .collect();
            if fresh.is_empty() {
                tracing::debug!(id, parent = %more.parent_id, "stub names no new comments, dropping");
                continue;
            }
            for chunk in fresh.chunks(MORE_BATCH) {
                let things = self
                    .api
                    .more_children(&link_fullname, chunk)
                    .await
                    .map_err(|e| wrap(id, e))?;
                for thing in things {
                    builder.ingest(thing);
                }
            }
        }

        let comments = builder.assemble(&link_fullname);
        let media = media_refs(&link);
        tracing::debug!(id, comments = count_nodes(&comments), media = media.len(), "fetched");
        Ok(Fetched {
            submission: Submission::from_link(&link, retrieved_utc),
            comments,
            media,
        })
    }
}

/// Auth stays fatal and not-found stays per-item; everything else during a
/// fetch is a per-item fetch failure.
fn wrap(id: &str, e: ArchiveError) -> ArchiveError {
    match e {
        ArchiveError::Auth(_) | ArchiveError::NotFound(_) | ArchiveError::Fetch(_) => e,
        other => ArchiveError::Fetch(format!("{id}: {other}")),
    }
}

/// Accumulates comments keyed by fullname, then realizes the owned tree once
/// every continuation has been expanded. Child order is insertion order,
/// which is the API's reply order.
#[derive(Default)]
struct TreeBuilder {
    nodes: HashMap<String, CommentNode>,
    children: HashMap<String, Vec<String>>,
    pending: VecDeque<MoreData>,
}

impl TreeBuilder {
    fn ingest(&mut self, thing: Thing) {
        match thing {
            Thing::Comment(comment) => {
                let fullname = format!("t1_{}", comment.id);
                if !self.nodes.contains_key(&fullname) {
                    self.children
                        .entry(comment.parent_id.clone())
                        .or_default()
                        .push(fullname.clone());
                    self.nodes.insert(fullname, CommentNode::from_data(&comment));
                }
                for reply in comment.replies {
                    self.ingest(reply);
                }
            }
            Thing::More(more) => self.pending.push_back(more),
            Thing::Listing(listing) => {
                for child in listing.children {
                    self.ingest(child);
                }
            }
            _ => {}
        }
    }

    /// Realizes the owned forest under `root_fullname`. Walks with an
    /// explicit stack; reply chains can be as deep as the thread itself, so
    /// recursing here would tie stack usage to thread depth.
    fn assemble(&mut self, root_fullname: &str) -> Vec<CommentNode> {
        enum Walk {
            Enter { fullname: String, parent: String },
            Exit { fullname: String, parent: String },
        }

        let mut assembled: HashMap<String, Vec<CommentNode>> = HashMap::new();
        let mut stack: Vec<Walk> = Vec::new();
        for child in self
            .children
            .remove(root_fullname)
            .unwrap_or_default()
            .into_iter()
            .rev()
        {
            stack.push(Walk::Enter {
                fullname: child,
                parent: root_fullname.to_string(),
            });
        }

        while let Some(step) = stack.pop() {
            match step {
                Walk::Enter { fullname, parent } => {
                    let kids = self.children.remove(&fullname).unwrap_or_default();
                    stack.push(Walk::Exit {
                        fullname: fullname.clone(),
                        parent,
                    });
                    for kid in kids.into_iter().rev() {
                        stack.push(Walk::Enter {
                            parent: fullname.clone(),
                            fullname: kid,
                        });
                    }
                }
                // Children finished first, so the node's reply list is ready
                // by the time its Exit pops.
                Walk::Exit { fullname, parent } => {
                    if let Some(mut node) = self.nodes.remove(&fullname) {
                        node.replies = assembled.remove(&fullname).unwrap_or_default();
                        assembled.entry(parent).or_default().push(node);
                    }
                }
            }
        }
        assembled.remove(root_fullname).unwrap_or_default()
    }
}

/// Media attached to a submission: the link target (for non-self posts),
/// preview images, and gallery items. Order is deterministic.
pub fn media_refs(link: &LinkData) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    let mut push = |url: String| {
        if !url.is_empty() && !refs.contains(&url) {
            refs.push(url);
        }
    };

    if !link.is_self {
        if let Some(url) = &link.url {
            push(url.clone());
        }
    }
    if let Some(preview) = &link.preview {
        if let Some(images) = preview.get("images").and_then(Value::as_array) {
            for image in images {
                if let Some(url) = image.pointer("/source/url").and_then(Value::as_str) {
                    push(url.replace("&amp;", "&"));
                }
            }
        }
    }
    if let Some(Value::Object(gallery)) = &link.media_metadata {
        for item in gallery.values() {
            let best = item
                .pointer("/s/u")
                .or_else(|| item.pointer("/s/gif"))
                .and_then(Value::as_str);
            if let Some(url) = best {
                push(url.replace("&amp;", "&"));
            }
        }
    }
    refs
}

fn count_nodes(forest: &[CommentNode]) -> usize {
    let mut count = 0;
    let mut stack: Vec<&CommentNode> = forest.iter().collect();
    while let Some(node) = stack.pop() {
        count += 1;
        stack.extend(node.replies.iter());
    }
    count
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ListingKind;
    use crate::models::Listed;
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::time::timeout;

    fn comment(id: &str, parent: &str, body: &str, replies: Vec<Value>) -> Value {
        let replies = if replies.is_empty() {
            json!("")
        } else {
            json!({"kind": "Listing", "data": {"after": null, "children": replies}})
        };
        json!({
            "kind": "t1",
            "data": {
                "id": id,
                "parent_id": parent,
                "author": "someone",
                "body": body,
                "score": 1,
                "created_utc": 1687000000.0,
                "replies": replies
            }
        })
    }

    fn more(parent: &str, children: &[&str]) -> Value {
        json!({
            "kind": "more",
            "data": {"parent_id": parent, "count": children.len(), "children": children}
        })
    }

    fn link(id: &str) -> LinkData {
        serde_json::from_value(json!({
            "id": id,
            "subreddit": "rust",
            "title": "a post",
            "author": "op",
            "score": 10,
            "created_utc": 1687000000.0,
            "permalink": format!("/r/rust/comments/{id}/a_post/"),
            "is_self": true,
            "num_comments": 3
        }))
        .unwrap()
    }

    struct FakeApi {
        link: LinkData,
        top_level: Vec<Value>,
        // child-keyed answers for morechildren calls; answers repeat on
        // every request, like the live API does
        more_answers: HashMap<String, Vec<Value>>,
    }

    #[async_trait]
    impl RedditApi for FakeApi {
        async fn identity(&self) -> Result<String> {
            unreachable!()
        }

        async fn submission_exists(&self, _id: &str) -> Result<bool> {
            unreachable!()
        }

        async fn listing(&self, _k: ListingKind, _u: &str, _l: u32) -> Result<Vec<Listed>> {
            unreachable!()
        }

        async fn comments(&self, _id: &str) -> Result<(LinkData, Vec<Thing>)> {
            let things = self
                .top_level
                .iter()
                .map(|v| serde_json::from_value(v.clone()).unwrap())
                .collect();
            Ok((self.link.clone(), things))
        }

        async fn more_children(&self, _link: &str, children: &[String]) -> Result<Vec<Thing>> {
            let mut out = Vec::new();
            for child in children {
                for v in self.more_answers.get(child).cloned().unwrap_or_default() {
                    out.push(serde_json::from_value(v).unwrap());
                }
            }
            Ok(out)
        }
    }

    #[tokio::test]
    async fn builds_nested_tree_in_reply_order() {
        let api = FakeApi {
            link: link("abc"),
            top_level: vec![
                comment("c1", "t3_abc", "first", vec![
                    comment("c2", "t1_c1", "nested", vec![]),
                    comment("c3", "t1_c1", "nested-sibling", vec![]),
                ]),
                comment("c4", "t3_abc", "second", vec![]),
            ],
            more_answers: HashMap::new(),
        };
        let fetched = Fetcher::new(&api).fetch("abc").await.unwrap();

        assert_eq!(fetched.submission.id, "abc");
        assert_eq!(fetched.comments.len(), 2);
        assert_eq!(fetched.comments[0].id, "c1");
        assert_eq!(fetched.comments[0].replies.len(), 2);
        assert_eq!(fetched.comments[0].replies[0].id, "c2");
        assert_eq!(fetched.comments[0].replies[1].id, "c3");
        // leaf nodes carry an empty vec, never an absent field
        assert!(fetched.comments[0].replies[0].replies.is_empty());
        assert!(fetched.comments[1].replies.is_empty());
    }

    #[tokio::test]
    async fn expands_more_stubs_into_the_right_branch() {
        let mut answers = HashMap::new();
        answers.insert(
            "c9".to_string(),
            vec![comment("c9", "t1_c1", "late reply", vec![])],
        );
        let api = FakeApi {
            link: link("abc"),
            top_level: vec![
                comment("c1", "t3_abc", "first", vec![more("t1_c1", &["c9"])]),
            ],
            more_answers: answers,
        };
        let fetched = Fetcher::new(&api).fetch("abc").await.unwrap();

        assert_eq!(fetched.comments.len(), 1);
        assert_eq!(fetched.comments[0].replies.len(), 1);
        assert_eq!(fetched.comments[0].replies[0].id, "c9");
    }

    #[tokio::test]
    async fn chained_more_stubs_are_drained() {
        let mut answers = HashMap::new();
        answers.insert(
            "c5".to_string(),
            vec![
                comment("c5", "t3_abc", "from more", vec![]),
                more("t1_c5", &["c6"]),
            ],
        );
        answers.insert(
            "c6".to_string(),
            vec![comment("c6", "t1_c5", "deeper", vec![])],
        );
        let api = FakeApi {
            link: link("abc"),
            top_level: vec![more("t3_abc", &["c5"])],
            more_answers: answers,
        };
        let fetched = Fetcher::new(&api).fetch("abc").await.unwrap();

        assert_eq!(fetched.comments.len(), 1);
        assert_eq!(fetched.comments[0].id, "c5");
        assert_eq!(fetched.comments[0].replies[0].id, "c6");
    }

    // A "continue this thread" stub is expanded by re-requesting its parent
    // comment, and the API hands the same exhausted stub back alongside it.
    // The drain must notice it already asked for that parent and stop.
    #[tokio::test]
    async fn exhausted_continue_stub_terminates_the_drain() {
        let mut answers = HashMap::new();
        answers.insert(
            "c1".to_string(),
            vec![
                comment("c1", "t3_abc", "root", vec![]),
                more("t1_c1", &[]),
            ],
        );
        let api = FakeApi {
            link: link("abc"),
            top_level: vec![comment("c1", "t3_abc", "root", vec![more("t1_c1", &[])])],
            more_answers: answers,
        };

        let fetched = timeout(Duration::from_secs(5), Fetcher::new(&api).fetch("abc"))
            .await
            .expect("stub expansion must terminate")
            .unwrap();

        assert_eq!(fetched.comments.len(), 1);
        assert_eq!(fetched.comments[0].id, "c1");
        assert!(fetched.comments[0].replies.is_empty());
    }

    // Same guard for stubs that do name children: re-delivering a stub whose
    // children were all requested already must not re-request them.
    #[tokio::test]
    async fn re_delivered_stub_with_known_children_is_dropped() {
        let mut answers = HashMap::new();
        answers.insert(
            "c2".to_string(),
            vec![
                comment("c2", "t1_c1", "reply", vec![]),
                more("t1_c1", &["c2"]),
            ],
        );
        let api = FakeApi {
            link: link("abc"),
            top_level: vec![comment("c1", "t3_abc", "root", vec![more("t1_c1", &["c2"])])],
            more_answers: answers,
        };

        let fetched = timeout(Duration::from_secs(5), Fetcher::new(&api).fetch("abc"))
            .await
            .expect("stub expansion must terminate")
            .unwrap();

        assert_eq!(fetched.comments.len(), 1);
        assert_eq!(fetched.comments[0].replies.len(), 1);
        assert_eq!(fetched.comments[0].replies[0].id, "c2");
    }

    #[tokio::test]
    async fn very_deep_reply_chains_assemble_without_recursion() {
        let depth = 4000;
        let ids: Vec<String> = (0..depth).map(|i| format!("d{i:04}")).collect();
        let mut answers = HashMap::new();
        for (i, id) in ids.iter().enumerate() {
            let parent = if i == 0 {
                "t3_abc".to_string()
            } else {
                format!("t1_{}", ids[i - 1])
            };
            answers.insert(id.clone(), vec![comment(id, &parent, "deep", vec![])]);
        }
        let api = FakeApi {
            link: link("abc"),
            top_level: vec![json!({
                "kind": "more",
                "data": {"parent_id": "t3_abc", "count": ids.len(), "children": ids}
            })],
            more_answers: answers,
        };

        let fetched = Fetcher::new(&api).fetch("abc").await.unwrap();

        assert_eq!(fetched.comments.len(), 1);
        let mut walked = 1;
        let mut node = &fetched.comments[0];
        while let [reply] = node.replies.as_slice() {
            node = reply;
            walked += 1;
        }
        assert_eq!(walked, depth);
    }

    #[test]
    fn media_refs_cover_link_preview_and_gallery() {
        let link: LinkData = serde_json::from_value(json!({
            "id": "abc",
            "subreddit": "pics",
            "title": "photo",
            "is_self": false,
            "url": "https://i.redd.it/direct.jpg",
            "preview": {"images": [
                {"source": {"url": "https://preview.redd.it/p.jpg?width=640&amp;s=sig"}}
            ]},
            "media_metadata": {
                "g1": {"s": {"u": "https://preview.redd.it/g1.jpg?s=x&amp;y=z"}}
            }
        }))
        .unwrap();
        let refs = media_refs(&link);
        assert_eq!(
            refs,
            vec![
                "https://i.redd.it/direct.jpg",
                "https://preview.redd.it/p.jpg?width=640&s=sig",
                "https://preview.redd.it/g1.jpg?s=x&y=z",
            ]
        );
    }

    #[test]
    fn self_post_without_media_has_no_refs() {
        assert!(media_refs(&link("abc")).is_empty());
    }
}
