//! Opaque resume tokens for windowed scans.
//!
//! A cursor names a position, the last `(priority, target)` returned under a
//! term, not a stored entry. Resuming seeks to the first entry strictly past
//! that position, so it keeps working after the entry itself is gone.

use crate::error::{IndexError, Result};
use crate::keys::KeyCodec;
use crate::store::Direction;
use crate::{Priority, Target};
use bincode::Options;
use serde::{Deserialize, Serialize};

const CURSOR_VERSION: u8 = 1;
const MAX_CURSOR_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    /// Encoded term key the scan runs over.
    pub term: Vec<u8>,
    pub priority: Priority,
    pub target: Target,
    pub direction: Direction,
}

impl CursorPosition {
    /// Forward-index key of the position.
    pub(crate) fn entry_key(&self) -> Vec<u8> {
        let mut key = self.term.clone();
        self.priority.encode_key(&mut key);
        self.target.encode_key(&mut key);
        key
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u8,
    position: CursorPosition,
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
        .with_limit(MAX_CURSOR_BYTES)
        .reject_trailing_bytes()
}

pub fn encode(position: &CursorPosition) -> Result<Vec<u8>> {
    let envelope = Envelope { version: CURSOR_VERSION, position: position.clone() };
    Ok(options().serialize(&envelope)?)
}

/// Decodes a resume token. The empty token means "start of scan".
pub fn decode(bytes: &[u8]) -> Result<Option<CursorPosition>> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let envelope: Envelope = options()
        .deserialize(bytes)
        .map_err(|e| IndexError::invalid_cursor(e.to_string()))?;
    if envelope.version != CURSOR_VERSION {
        return Err(IndexError::invalid_cursor(format!(
            "unsupported cursor version {}",
            envelope.version
        )));
    }
    Ok(Some(envelope.position))
}
