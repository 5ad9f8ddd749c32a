//! Error type shared by every layer of the index engine.
//!
//! `InvalidCursor`, `NotFound` and the user validation errors are ordinary
//! outcomes a caller is expected to handle. `ConsistencyViolation` and
//! `TransactionMisuse` mean the data or the calling code is broken; the
//! transaction they occur in must be dropped without committing.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    /// A resume token could not be decoded, or belongs to another scan.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// A referenced entity is missing from its primary bucket.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    /// Forward entries, reverse entries and counts disagree, or a parent
    /// chain points forward in id order.
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),

    /// A write on a read transaction, or any use of a finished transaction.
    #[error("transaction misuse: {0}")]
    TransactionMisuse(&'static str),

    #[error("username is invalid")]
    UsernameInvalid,

    #[error("username is already taken")]
    UsernameTaken,

    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl IndexError {
    pub fn consistency(msg: impl Into<String>) -> Self {
        IndexError::ConsistencyViolation(msg.into())
    }

    pub fn invalid_cursor(msg: impl Into<String>) -> Self {
        IndexError::InvalidCursor(msg.into())
    }

    /// True for errors that must abort the surrounding write transaction.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IndexError::ConsistencyViolation(_)
                | IndexError::TransactionMisuse(_)
                | IndexError::Store(_)
                | IndexError::Codec(_)
        )
    }
}

impl From<sled::transaction::TransactionError<()>> for IndexError {
    fn from(err: sled::transaction::TransactionError<()>) -> Self {
        match err {
            sled::transaction::TransactionError::Storage(e) => IndexError::Store(e),
            sled::transaction::TransactionError::Abort(()) => {
                IndexError::consistency("commit aborted by the store")
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
