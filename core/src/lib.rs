//! Secondary indexing and windowed queries for the forum store.
//!
//! The [`term_index`] maps a term to targets ordered by priority, keeps a
//! reverse mapping so a target's term set can be replaced atomically, and
//! pages through a term with opaque [`cursor`]s. [`posts`] builds the forum's
//! listings (by user, by hashtag, by month, reply threads) on top of it.

pub mod config;
pub mod cursor;
pub mod error;
pub mod hashtag;
pub mod keys;
pub mod posts;
pub mod store;
pub mod term_index;
pub mod users;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub use config::{ForumConfig, StoreConfig};
pub use error::{IndexError, Result};
pub use store::{Bucket, Direction, Store, Txn};
pub use term_index::{Page, TermIndex, Window};

/// Id of an indexed entity.
pub type Target = u64;
pub type PostId = u64;
pub type UserId = u64;

/// Ordering key inside a term: unix time in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub i64);

impl From<OffsetDateTime> for Priority {
    fn from(t: OffsetDateTime) -> Self {
        Priority(t.unix_timestamp())
    }
}
