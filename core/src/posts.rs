//! Posts and the listings built on the term index.
//!
//! Every post is indexed in `posts_by` under its author (`u:<id>`), creation
//! year (`y:<yyyy>`), month (`m:<yyyy.mm>`) and hashtags (`t:<tag>`). A reply
//! is also indexed in `posts_replies` under every one of its ancestors, so
//! one scan of an ancestor's term yields its whole subtree.

use crate::config::ForumConfig;
use crate::error::{IndexError, Result};
use crate::hashtag::extract_tags;
use crate::store::{Bucket, Direction, Txn};
use crate::term_index::{Page, TermIndex, Window};
use crate::users::{self, User};
use crate::{PostId, Priority, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub user_id: UserId,
    pub parent_id: Option<PostId>,
    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    pub content: String,
}

pub const POSTS: Bucket<PostId, Post> = Bucket::new("posts");

/// term: `u:`/`y:`/`m:`/`t:` string, priority: creation second, target: post id
pub const POSTS_BY: TermIndex<String> =
    TermIndex::new("posts_by", "posts_by.targets", "posts_by.counts");

/// term: ancestor post id, priority: creation second, target: post id
pub const POST_REPLIES: TermIndex<PostId> =
    TermIndex::new("posts_replies", "posts_replies.targets", "posts_replies.counts");

pub fn user_term(user_id: UserId) -> String {
    format!("u:{user_id}")
}

pub fn tag_term(tag: &str) -> String {
    format!("t:{tag}")
}

pub fn year_term(at: OffsetDateTime) -> String {
    format!("y:{}", at.year())
}

pub fn month_term(at: OffsetDateTime) -> String {
    format!("m:{}.{:02}", at.year(), u8::from(at.month()))
}

/// Terms `post` is listed under in `posts_by`.
pub fn post_terms(post: &Post) -> Vec<String> {
    let mut terms = vec![user_term(post.user_id), year_term(post.created_at), month_term(post.created_at)];
    terms.extend(extract_tags(&post.content).iter().map(|tag| tag_term(tag)));
    terms
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatePostReq {
    pub user_id: UserId,
    #[serde(default)]
    pub parent_id: Option<PostId>,
    pub content: String,
}

fn truncate_on_char_boundary(content: &mut String, max: usize) {
    if content.len() <= max {
        return;
    }
    let mut cut = max;
    while !content.is_char_boundary(cut) {
        cut -= 1;
    }
    content.truncate(cut);
}

pub fn create_post(tx: &mut Txn<'_>, req: CreatePostReq, config: &ForumConfig) -> Result<Post> {
    let now = OffsetDateTime::now_utc();
    create_post_at(tx, req, now.replace_nanosecond(0).unwrap_or(now), config)
}

/// Creates a post stamped `created_at`, as importers replaying history do.
pub fn create_post_at(
    tx: &mut Txn<'_>,
    req: CreatePostReq,
    created_at: OffsetDateTime,
    config: &ForumConfig,
) -> Result<Post> {
    tx.require_write()?;
    if let Some(parent) = req.parent_id {
        if !POSTS.contains(tx, &parent)? {
            return Err(IndexError::NotFound { kind: "post", id: parent });
        }
    }
    let mut content = req.content;
    truncate_on_char_boundary(&mut content, config.max_post_size);

    let post = Post {
        id: tx.next_id(POSTS.name())?,
        user_id: req.user_id,
        parent_id: req.parent_id,
        created_at,
        content,
    };
    save_post(tx, &post)?;
    Ok(post)
}

pub fn save_post(tx: &mut Txn<'_>, post: &Post) -> Result<()> {
    POSTS.put(tx, &post.id, post)?;
    update_post_index(tx, post)
}

pub fn update_post_index(tx: &mut Txn<'_>, post: &Post) -> Result<()> {
    let priority = Priority::from(post.created_at);
    POSTS_BY.set_terms(tx, post.id, &post_terms(post), priority)?;

    let ancestors = match post.parent_id {
        Some(parent) => ancestor_chain(tx, post.id, parent)?,
        None => Vec::new(),
    };
    POST_REPLIES.set_terms(tx, post.id, &ancestors, priority)?;
    Ok(())
}

/// Re-reads a stored post and rebuilds its index entries.
pub fn reindex_post(tx: &mut Txn<'_>, id: PostId) -> Result<()> {
    let post = POSTS.get(tx, &id)?.ok_or(IndexError::NotFound { kind: "post", id })?;
    update_post_index(tx, &post)
}

/// `parent` followed by every ancestor of `parent`. Ids are allocated in
/// increasing order and a parent is always committed before its replies, so
/// any link that does not point to a smaller id is corrupt data.
fn ancestor_chain(tx: &Txn<'_>, id: PostId, parent: PostId) -> Result<Vec<PostId>> {
    if parent >= id {
        return Err(IndexError::consistency(format!("post {id} has parent {parent}, not an older post")));
    }
    let mut chain = vec![parent];
    for ancestor in POST_REPLIES.terms_of(tx, parent)? {
        if ancestor >= parent {
            return Err(IndexError::consistency(format!(
                "post {parent} lists {ancestor} as an ancestor"
            )));
        }
        chain.push(ancestor);
    }
    debug!(post = id, depth = chain.len(), "resolved ancestor chain");
    Ok(chain)
}

/// Ancestors of `id`, thread root first.
pub fn ancestors_of(tx: &Txn<'_>, id: PostId) -> Result<Vec<PostId>> {
    POST_REPLIES.terms_of(tx, id)
}

/// Every descendant of `id`, oldest first.
pub fn replies_of(tx: &Txn<'_>, id: PostId) -> Result<Vec<PostId>> {
    Ok(replies_page(tx, id, &Window::forward(0))?.targets())
}

pub fn replies_page(tx: &Txn<'_>, id: PostId, window: &Window) -> Result<Page> {
    POST_REPLIES.scan(tx, &id, window)
}

/// Loads `ids` in order. A missing post means an index entry outlived it.
pub fn read_posts(tx: &Txn<'_>, ids: &[PostId]) -> Result<Vec<Post>> {
    ids.iter()
        .map(|&id| POSTS.get(tx, &id)?.ok_or(IndexError::NotFound { kind: "post", id }))
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostsQuery {
    pub query: String,
    #[serde(default)]
    pub cursor: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PostsResponse {
    pub posts: Vec<Post>,
    /// Request for the following page; its cursor is empty on the last page.
    pub next_params: PostsQuery,
}

/// Newest-first page of the posts listed under `req.query`.
pub fn query_posts(tx: &Txn<'_>, req: PostsQuery, limit: usize) -> Result<PostsResponse> {
    let (ids, next_cursor) = POSTS_BY.query(tx, &req.query, &req.cursor, limit, Direction::Reverse)?;
    let posts = read_posts(tx, &ids)?;
    Ok(PostsResponse { posts, next_params: PostsQuery { query: req.query, cursor: next_cursor } })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PostThread {
    /// Ancestors root first, then the post, then its descendants oldest first.
    pub post_ids: Vec<PostId>,
    pub posts: BTreeMap<PostId, Post>,
    /// Number of descendants of each post in `post_ids`.
    pub replies: BTreeMap<PostId, u64>,
    pub users: BTreeMap<UserId, User>,
}

pub fn get_post(tx: &Txn<'_>, id: PostId) -> Result<PostThread> {
    if !POSTS.contains(tx, &id)? {
        return Err(IndexError::NotFound { kind: "post", id });
    }
    let mut thread = PostThread::default();
    thread.post_ids.extend(ancestors_of(tx, id)?);
    thread.post_ids.push(id);
    thread.post_ids.extend(replies_of(tx, id)?);

    for post in read_posts(tx, &thread.post_ids)? {
        thread.replies.insert(post.id, POST_REPLIES.count(tx, &post.id)?);
        if !thread.users.contains_key(&post.user_id) {
            if let Some(user) = users::get_user(tx, post.user_id)? {
                thread.users.insert(user.id, user);
            }
        }
        thread.posts.insert(post.id, post);
    }
    Ok(thread)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn post(content: &str) -> Post {
        Post {
            id: 1,
            user_id: 7,
            parent_id: None,
            created_at: datetime!(2024-03-05 10:00 UTC),
            content: content.into(),
        }
    }

    #[test]
    fn terms_cover_user_year_month_and_tags() {
        let terms = post_terms(&post("hi #rust #db #rust"));
        assert_eq!(terms, vec!["u:7", "y:2024", "m:2024.03", "t:rust", "t:db", "t:rust"]);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut s = "aé".to_string();
        truncate_on_char_boundary(&mut s, 2);
        assert_eq!(s, "a");
        let mut s = "abc".to_string();
        truncate_on_char_boundary(&mut s, 10);
        assert_eq!(s, "abc");
    }

    #[test]
    fn forward_parent_link_is_rejected() {
        let store = crate::Store::temporary().unwrap();
        let tx = store.read_tx();
        let err = ancestor_chain(&tx, 3, 3).unwrap_err();
        assert!(matches!(err, IndexError::ConsistencyViolation(_)));
    }

    #[test]
    fn newer_stored_ancestor_is_rejected() {
        let store = crate::Store::temporary().unwrap();
        let mut tx = store.write_tx();
        // post 5 claims post 9 as its ancestor
        POST_REPLIES.set_terms(&mut tx, 5, &[9], Priority(0)).unwrap();
        let err = ancestor_chain(&tx, 8, 5).unwrap_err();
        assert!(matches!(err, IndexError::ConsistencyViolation(_)));
    }
}
