use forum_core::posts::{self, CreatePostReq, Post};
use forum_core::users::{self, AddUserRequest};
use forum_core::{ForumConfig, IndexError, Store, Txn, Window};

fn reply(tx: &mut Txn<'_>, parent_id: Option<u64>, content: &str) -> Post {
    let req = CreatePostReq { user_id: 1, parent_id, content: content.into() };
    posts::create_post(tx, req, &ForumConfig::default()).unwrap()
}

#[test]
fn it_fans_replies_out_to_every_ancestor() {
    let store = Store::temporary().unwrap();
    let mut tx = store.write_tx();
    let a = reply(&mut tx, None, "root");
    let b = reply(&mut tx, Some(a.id), "child");
    let p = reply(&mut tx, Some(b.id), "grandchild");
    tx.commit().unwrap();

    let mut tx = store.write_tx();
    let r = reply(&mut tx, Some(p.id), "great-grandchild");
    tx.commit().unwrap();

    let tx = store.read_tx();
    assert_eq!(posts::ancestors_of(&tx, p.id).unwrap(), vec![a.id, b.id]);
    assert_eq!(posts::ancestors_of(&tx, r.id).unwrap(), vec![a.id, b.id, p.id]);
    assert!(posts::replies_of(&tx, a.id).unwrap().contains(&r.id));
    assert!(posts::replies_of(&tx, b.id).unwrap().contains(&r.id));
    assert_eq!(posts::replies_of(&tx, p.id).unwrap(), vec![r.id]);
    assert_eq!(posts::replies_of(&tx, a.id).unwrap(), vec![b.id, p.id, r.id]);
    assert!(posts::replies_of(&tx, r.id).unwrap().is_empty());
}

#[test]
fn it_builds_thread_views() {
    let store = Store::temporary().unwrap();
    let mut tx = store.write_tx();
    users::add_user(&mut tx, AddUserRequest { username: "alice".into(), email: String::new() }).unwrap();
    let a = reply(&mut tx, None, "root");
    let b = reply(&mut tx, Some(a.id), "one");
    let c = reply(&mut tx, Some(a.id), "two");
    let d = reply(&mut tx, Some(b.id), "deeper");
    tx.commit().unwrap();

    let tx = store.read_tx();
    let thread = posts::get_post(&tx, b.id).unwrap();
    assert_eq!(thread.post_ids, vec![a.id, b.id, d.id]);
    assert_eq!(thread.replies[&a.id], 3);
    assert_eq!(thread.replies[&b.id], 1);
    assert_eq!(thread.replies[&d.id], 0);
    assert_eq!(thread.users[&1].username, "alice");
    assert!(!thread.posts.contains_key(&c.id));

    assert!(matches!(posts::get_post(&tx, 99), Err(IndexError::NotFound { id: 99, .. })));
}

#[test]
fn it_pages_replies() {
    let store = Store::temporary().unwrap();
    let mut tx = store.write_tx();
    let root = reply(&mut tx, None, "root");
    let kids: Vec<u64> = (0..5).map(|i| reply(&mut tx, Some(root.id), &format!("r{i}")).id).collect();
    tx.commit().unwrap();

    let tx = store.read_tx();
    let first = posts::replies_page(&tx, root.id, &Window::forward(3)).unwrap();
    assert_eq!(first.targets(), kids[..3].to_vec());
    let rest = posts::replies_page(&tx, root.id, &Window::forward(3).with_cursor(first.next_cursor)).unwrap();
    assert_eq!(rest.targets(), kids[3..].to_vec());
    assert!(rest.is_last());
}

#[test]
fn it_refuses_missing_parents() {
    let store = Store::temporary().unwrap();
    let mut tx = store.write_tx();
    let req = CreatePostReq { user_id: 1, parent_id: Some(42), content: "orphan".into() };
    let err = posts::create_post(&mut tx, req, &ForumConfig::default()).unwrap_err();
    assert!(matches!(err, IndexError::NotFound { kind: "post", id: 42 }));
}

#[test]
fn it_reindexes_idempotently() {
    let store = Store::temporary().unwrap();
    let mut tx = store.write_tx();
    let a = reply(&mut tx, None, "#x root");
    let b = reply(&mut tx, Some(a.id), "#x child");
    tx.commit().unwrap();

    let mut tx = store.write_tx();
    posts::reindex_post(&mut tx, b.id).unwrap();
    posts::reindex_post(&mut tx, b.id).unwrap();
    tx.commit().unwrap();

    let tx = store.read_tx();
    assert_eq!(posts::POSTS_BY.count(&tx, &"t:x".to_string()).unwrap(), 2);
    assert_eq!(posts::replies_of(&tx, a.id).unwrap(), vec![b.id]);
    posts::POSTS_BY.verify_target(&tx, b.id).unwrap();
    posts::POST_REPLIES.verify_target(&tx, b.id).unwrap();
}
