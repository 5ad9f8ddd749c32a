use forum_core::posts::{self, CreatePostReq, PostsQuery};
use forum_core::{ForumConfig, IndexError, Store};
use std::collections::HashMap;
use time::macros::datetime;

fn seed(store: &Store, config: &ForumConfig) {
    let reqs = [
        (1, "Hello #World #T1"),
        (1, "Hello #World #T2"),
        (1, "#Hello World #T3"),
        (2, "Hello #World #T1"),
        (2, "#Hello World #T2"),
        (3, "#Hello #World #T1"),
    ];
    for (user_id, content) in reqs {
        let mut tx = store.write_tx();
        let req = CreatePostReq { user_id, parent_id: None, content: content.into() };
        posts::create_post(&mut tx, req, config).unwrap();
        tx.commit().unwrap();
    }
}

#[test]
fn it_counts_posts_per_tag_and_user() {
    let store = Store::temporary().unwrap();
    let config = ForumConfig::default();
    seed(&store, &config);

    let expected: HashMap<&str, usize> = [
        ("t:T1", 3),
        ("t:T2", 2),
        ("t:T3", 1),
        ("t:World", 4),
        ("t:Hello", 3),
        ("u:1", 3),
        ("u:2", 2),
        ("u:3", 1),
    ]
    .into_iter()
    .collect();

    let tx = store.read_tx();
    for (term, count) in expected {
        let resp = posts::query_posts(&tx, PostsQuery { query: term.into(), cursor: Vec::new() }, 0).unwrap();
        assert_eq!(resp.posts.len(), count, "term {term}");
        assert!(resp.next_params.cursor.is_empty());
        assert_eq!(posts::POSTS_BY.count(&tx, &term.to_string()).unwrap(), count as u64);
    }
}

#[test]
fn it_pages_newest_first() {
    let store = Store::temporary().unwrap();
    let config = ForumConfig::default();
    seed(&store, &config);

    let tx = store.read_tx();
    let mut req = PostsQuery { query: "t:World".into(), cursor: Vec::new() };
    let mut ids = Vec::new();
    loop {
        let resp = posts::query_posts(&tx, req, 1).unwrap();
        ids.extend(resp.posts.iter().map(|p| p.id));
        if resp.next_params.cursor.is_empty() {
            break;
        }
        req = resp.next_params;
    }
    // all six share at most a couple of seconds, so order falls back to id
    let mut sorted = ids.clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(ids, sorted);
    assert_eq!(ids.len(), 4);
}

#[test]
fn it_indexes_year_and_month() {
    let store = Store::temporary().unwrap();
    let config = ForumConfig::default();
    let mut tx = store.write_tx();
    let at = datetime!(2023-11-30 23:59:59 UTC);
    let req = CreatePostReq { user_id: 1, parent_id: None, content: "old".into() };
    let post = posts::create_post_at(&mut tx, req, at, &config).unwrap();
    tx.commit().unwrap();

    let tx = store.read_tx();
    for term in ["y:2023", "m:2023.11"] {
        let resp = posts::query_posts(&tx, PostsQuery { query: term.into(), cursor: Vec::new() }, 10).unwrap();
        assert_eq!(resp.posts, vec![post.clone()]);
    }
}

#[test]
fn it_truncates_content() {
    let store = Store::temporary().unwrap();
    let config = ForumConfig { max_post_size: 5, ..ForumConfig::default() };
    let mut tx = store.write_tx();
    let req = CreatePostReq { user_id: 1, parent_id: None, content: "#abcdefgh".into() };
    let post = posts::create_post(&mut tx, req, &config).unwrap();
    assert_eq!(post.content, "#abcd");
    let resp = posts::query_posts(&tx, PostsQuery { query: "t:abcd".into(), cursor: Vec::new() }, 0).unwrap();
    assert_eq!(resp.posts.len(), 1);
}

#[test]
fn it_rejects_bad_cursors_from_callers() {
    let store = Store::temporary().unwrap();
    seed(&store, &ForumConfig::default());
    let tx = store.read_tx();
    let req = PostsQuery { query: "u:1".into(), cursor: vec![0xde, 0xad] };
    assert!(matches!(posts::query_posts(&tx, req, 2), Err(IndexError::InvalidCursor(_))));
}

#[test]
fn it_hides_uncommitted_posts_from_readers() {
    let store = Store::temporary().unwrap();
    let config = ForumConfig::default();
    let mut writer = store.write_tx();
    let req = CreatePostReq { user_id: 4, parent_id: None, content: "#pending".into() };
    posts::create_post(&mut writer, req, &config).unwrap();

    let reader = store.read_tx();
    let resp = posts::query_posts(&reader, PostsQuery { query: "t:pending".into(), cursor: Vec::new() }, 0).unwrap();
    assert!(resp.posts.is_empty());
    drop(reader);

    writer.commit().unwrap();
    let reader = store.read_tx();
    let resp = posts::query_posts(&reader, PostsQuery { query: "t:pending".into(), cursor: Vec::new() }, 0).unwrap();
    assert_eq!(resp.posts.len(), 1);
}
