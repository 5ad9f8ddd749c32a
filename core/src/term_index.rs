//! Term → priority → target secondary index.
//!
//! Three trees back one index:
//! - forward: `term ‖ priority ‖ target` → `()`, so a prefix scan over a term
//!   yields its targets ordered by `(priority, target)`;
//! - targets: `target` → the `(term, priority)` pairs currently indexing it;
//! - counts: `term` → number of forward entries under it.
//!
//! All three are only ever mutated together inside one write transaction.

use crate::cursor::{self, CursorPosition};
use crate::error::{IndexError, Result};
use crate::keys::KeyCodec;
use crate::store::{prefix_range, Direction, Txn};
use crate::{Priority, Target};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::ops::Bound;
use tracing::debug;

/// One page request: at most `limit` entries (`0` = no limit), walking in
/// `direction`, resuming after `cursor` (empty = from the oldest or newest end).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Window {
    pub limit: usize,
    pub direction: Direction,
    pub cursor: Vec<u8>,
}

impl Window {
    pub fn forward(limit: usize) -> Self {
        Self { limit, direction: Direction::Forward, cursor: Vec::new() }
    }

    pub fn reverse(limit: usize) -> Self {
        Self { limit, direction: Direction::Reverse, cursor: Vec::new() }
    }

    pub fn with_cursor(mut self, cursor: Vec<u8>) -> Self {
        self.cursor = cursor;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub priority: Priority,
    pub target: Target,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub entries: Vec<IndexEntry>,
    /// Empty once the scan is exhausted.
    pub next_cursor: Vec<u8>,
}

impl Page {
    pub fn targets(&self) -> Vec<Target> {
        self.entries.iter().map(|e| e.target).collect()
    }

    pub fn is_last(&self) -> bool {
        self.next_cursor.is_empty()
    }
}

/// Changes needed to move a target from its current term set to a new one.
/// Terms are encoded term keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermDiff {
    /// Forward entries to delete, with the priority they were stored under.
    pub remove: Vec<(Vec<u8>, Priority)>,
    pub add: Vec<Vec<u8>>,
    pub keep: Vec<Vec<u8>>,
}

impl TermDiff {
    pub fn is_noop(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}

/// Pure diff between a target's stored `(term, priority)` pairs and the
/// term set it should end up with, all at `priority`. A term whose priority
/// changes is removed and re-added.
pub fn diff_terms(
    current: &[(Vec<u8>, Priority)],
    next: &BTreeSet<Vec<u8>>,
    priority: Priority,
) -> TermDiff {
    let mut diff = TermDiff::default();
    for (term, old) in current {
        if next.contains(term) && *old == priority {
            diff.keep.push(term.clone());
        } else {
            diff.remove.push((term.clone(), *old));
        }
    }
    for term in next {
        if !diff.keep.contains(term) {
            diff.add.push(term.clone());
        }
    }
    diff
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TargetTerms {
    // sorted by term key
    terms: Vec<(Vec<u8>, Priority)>,
}

pub struct TermIndex<T> {
    forward: &'static str,
    targets: &'static str,
    counts: &'static str,
    _term: PhantomData<fn() -> T>,
}

impl<T: KeyCodec> TermIndex<T> {
    pub const fn new(forward: &'static str, targets: &'static str, counts: &'static str) -> Self {
        Self { forward, targets, counts, _term: PhantomData }
    }

    fn entry_key(term_key: &[u8], priority: Priority, target: Target) -> Vec<u8> {
        let mut key = Vec::with_capacity(term_key.len() + 16);
        key.extend_from_slice(term_key);
        priority.encode_key(&mut key);
        target.encode_key(&mut key);
        key
    }

    fn split_entry(suffix: &[u8]) -> Result<IndexEntry> {
        let (priority, used) = Priority::decode_key(suffix)?;
        let target = Target::from_key(&suffix[used..])?;
        Ok(IndexEntry { priority, target })
    }

    fn load_target(&self, tx: &Txn<'_>, target: Target) -> Result<TargetTerms> {
        match tx.get_raw(self.targets, &target.to_key())? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(TargetTerms::default()),
        }
    }

    fn store_target(&self, tx: &mut Txn<'_>, target: Target, entry: &TargetTerms) -> Result<()> {
        if entry.terms.is_empty() {
            tx.remove_raw(self.targets, target.to_key())
        } else {
            tx.put_raw(self.targets, target.to_key(), bincode::serialize(entry)?)
        }
    }

    fn adjust_count(&self, tx: &mut Txn<'_>, term_key: &[u8], delta: i64) -> Result<()> {
        let current = match tx.get_raw(self.counts, term_key)? {
            Some(bytes) => u64::from_key(&bytes)?,
            None => 0,
        };
        let updated = current as i64 + delta;
        if updated < 0 {
            return Err(IndexError::consistency(format!(
                "{}: count for a term would drop below zero",
                self.forward
            )));
        }
        if updated == 0 {
            tx.remove_raw(self.counts, term_key.to_vec())
        } else {
            tx.put_raw(self.counts, term_key.to_vec(), (updated as u64).to_key())
        }
    }

    fn insert_forward(&self, tx: &mut Txn<'_>, term_key: &[u8], priority: Priority, target: Target) -> Result<()> {
        tx.put_raw(self.forward, Self::entry_key(term_key, priority, target), Vec::new())?;
        self.adjust_count(tx, term_key, 1)
    }

    fn delete_forward(&self, tx: &mut Txn<'_>, term_key: &[u8], priority: Priority, target: Target) -> Result<()> {
        let key = Self::entry_key(term_key, priority, target);
        if tx.get_raw(self.forward, &key)?.is_none() {
            return Err(IndexError::consistency(format!(
                "{}: target {target} is mapped to a term with no forward entry",
                self.forward
            )));
        }
        tx.remove_raw(self.forward, key)?;
        self.adjust_count(tx, term_key, -1)
    }

    /// Inserts `(term, priority, target)`, replacing any entry `target`
    /// already has under `term`.
    pub fn put(&self, tx: &mut Txn<'_>, term: &T, priority: Priority, target: Target) -> Result<()> {
        tx.require_write()?;
        let term_key = term.to_key();
        let mut mapped = self.load_target(tx, target)?;
        match mapped.terms.binary_search_by(|(t, _)| t.as_slice().cmp(term_key.as_slice())) {
            Ok(i) => {
                let old = mapped.terms[i].1;
                if old == priority {
                    return Ok(());
                }
                self.delete_forward(tx, &term_key, old, target)?;
                mapped.terms[i].1 = priority;
            }
            Err(i) => mapped.terms.insert(i, (term_key.clone(), priority)),
        }
        self.insert_forward(tx, &term_key, priority, target)?;
        self.store_target(tx, target, &mapped)
    }

    /// Removes `target` from `term`. Returns whether an entry existed.
    pub fn remove(&self, tx: &mut Txn<'_>, term: &T, target: Target) -> Result<bool> {
        tx.require_write()?;
        let term_key = term.to_key();
        let mut mapped = self.load_target(tx, target)?;
        let Ok(i) = mapped.terms.binary_search_by(|(t, _)| t.as_slice().cmp(term_key.as_slice())) else {
            return Ok(false);
        };
        let (_, priority) = mapped.terms.remove(i);
        self.delete_forward(tx, &term_key, priority, target)?;
        self.store_target(tx, target, &mapped)?;
        Ok(true)
    }

    /// Drops every entry of `target`, for when the entity itself is deleted.
    pub fn remove_target(&self, tx: &mut Txn<'_>, target: Target) -> Result<usize> {
        Ok(self.set_terms(tx, target, &[], Priority(0))?.remove.len())
    }

    /// Makes the terms indexing `target` exactly `terms`, all at `priority`.
    /// Duplicate terms collapse to one entry.
    pub fn set_terms(&self, tx: &mut Txn<'_>, target: Target, terms: &[T], priority: Priority) -> Result<TermDiff> {
        tx.require_write()?;
        let next: BTreeSet<Vec<u8>> = terms.iter().map(|t| t.to_key()).collect();
        let current = self.load_target(tx, target)?;
        let diff = diff_terms(&current.terms, &next, priority);
        if diff.is_noop() {
            return Ok(diff);
        }

        for (term_key, old) in &diff.remove {
            self.delete_forward(tx, term_key, *old, target)?;
        }
        for term_key in &diff.add {
            self.insert_forward(tx, term_key, priority, target)?;
        }
        let updated = TargetTerms { terms: next.into_iter().map(|t| (t, priority)).collect() };
        self.store_target(tx, target, &updated)?;

        debug!(
            index = self.forward,
            target,
            removed = diff.remove.len(),
            added = diff.add.len(),
            kept = diff.keep.len(),
            "re-indexed target"
        );
        Ok(diff)
    }

    /// `set_terms` for targets classified by exactly one term.
    pub fn set_single_term(&self, tx: &mut Txn<'_>, target: Target, term: T, priority: Priority) -> Result<TermDiff> {
        self.set_terms(tx, target, std::slice::from_ref(&term), priority)
    }

    /// Terms currently indexing `target`, in term order.
    pub fn terms_of(&self, tx: &Txn<'_>, target: Target) -> Result<Vec<T>> {
        self.load_target(tx, target)?
            .terms
            .iter()
            .map(|(t, _)| T::from_key(t))
            .collect()
    }

    pub fn count(&self, tx: &Txn<'_>, term: &T) -> Result<u64> {
        match tx.get_raw(self.counts, &term.to_key())? {
            Some(bytes) => u64::from_key(&bytes),
            None => Ok(0),
        }
    }

    /// One window of `term`'s entries, ordered by `(priority, target)`
    /// ascending for forward scans and the exact reverse otherwise.
    pub fn scan(&self, tx: &Txn<'_>, term: &T, window: &Window) -> Result<Page> {
        let term_key = term.to_key();
        let (start, end) = prefix_range(&term_key);
        let range = match cursor::decode(&window.cursor)? {
            None => (start, end),
            Some(position) => {
                if position.term != term_key {
                    return Err(IndexError::invalid_cursor("cursor belongs to another term"));
                }
                if position.direction != window.direction {
                    return Err(IndexError::invalid_cursor("cursor direction does not match the window"));
                }
                let resume = Bound::Excluded(position.entry_key());
                match window.direction {
                    Direction::Forward => (resume, end),
                    Direction::Reverse => (start, resume),
                }
            }
        };

        let limit = if window.limit == 0 { usize::MAX } else { window.limit };
        let mut entries = Vec::new();
        let mut more = false;
        tx.visit_range(self.forward, range, window.direction, |key, _| {
            if entries.len() == limit {
                more = true;
                return Ok(false);
            }
            entries.push(Self::split_entry(&key[term_key.len()..])?);
            Ok(true)
        })?;

        let next_cursor = match (more, entries.last()) {
            (true, Some(last)) => cursor::encode(&CursorPosition {
                term: term_key,
                priority: last.priority,
                target: last.target,
                direction: window.direction,
            })?,
            _ => Vec::new(),
        };
        Ok(Page { entries, next_cursor })
    }

    /// `scan` in the flat `(targets, next cursor)` shape handed to callers.
    pub fn query(
        &self,
        tx: &Txn<'_>,
        term: &T,
        cursor: &[u8],
        limit: usize,
        direction: Direction,
    ) -> Result<(Vec<Target>, Vec<u8>)> {
        let window = Window { limit, direction, cursor: cursor.to_vec() };
        let page = self.scan(tx, term, &window)?;
        Ok((page.targets(), page.next_cursor))
    }

    /// Checks that every term mapped to `target` has its forward entry.
    pub fn verify_target(&self, tx: &Txn<'_>, target: Target) -> Result<()> {
        for (term_key, priority) in self.load_target(tx, target)?.terms {
            if tx.get_raw(self.forward, &Self::entry_key(&term_key, priority, target))?.is_none() {
                return Err(IndexError::consistency(format!(
                    "{}: reverse mapping of target {target} has no forward entry",
                    self.forward
                )));
            }
        }
        Ok(())
    }
}
