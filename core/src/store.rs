//! Transactional bucket store over sled.
//!
//! One sled `Tree` backs each bucket (or index sub-structure). A write
//! transaction owns the store's writer lock for its whole life and buffers
//! every mutation in an ordered overlay; reads through it see its own writes.
//! `commit` applies the overlay to every touched tree in one sled multi-tree
//! transaction. Dropping an uncommitted write transaction discards it.

use crate::config::StoreConfig;
use crate::error::{IndexError, Result};
use crate::keys::KeyCodec;
use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::TransactionResult;
use sled::{IVec, Transactional};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::ops::Bound;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const SEQUENCE_TREE: &str = "__sequences";

// how long `open` waits for a handle that is still shutting down to release the lock
const LOCK_WAIT: Duration = Duration::from_secs(5);
const LOCK_RETRY: Duration = Duration::from_millis(50);

/// Scan direction. Forward walks keys in ascending byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

pub struct Store {
    db: sled::Db,
    writer: Mutex<()>,
    // held exclusively only while a commit is being applied
    commit_gate: RwLock<()>,
    flush_on_commit: bool,
}

impl Store {
    /// Opens the database at `config.path`, or a fresh throwaway one when
    /// `config.temporary` is set. The configured path is never touched by a
    /// temporary store.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let mut sled_config = sled::Config::new().cache_capacity(config.cache_capacity);
        sled_config = if config.temporary {
            // sled only picks a unique directory while the path is left at its default
            sled_config.temporary(true)
        } else {
            sled_config.path(&config.path)
        };
        if config.flush_on_commit {
            sled_config = sled_config.flush_every_ms(None);
        }
        let db = open_db(&sled_config)?;
        if config.temporary {
            info!("opened temporary store");
        } else {
            info!(path = %config.path.display(), "opened store");
        }
        Ok(Self {
            db,
            writer: Mutex::new(()),
            commit_gate: RwLock::new(()),
            flush_on_commit: config.flush_on_commit,
        })
    }

    pub fn temporary() -> Result<Self> {
        Self::open(&StoreConfig::temporary())
    }

    /// Each read through the returned transaction (one get, one windowed
    /// scan, one count) sees the store entirely before or entirely after any
    /// commit. Separate reads are not a snapshot: two reads on the same read
    /// transaction may observe different commits.
    pub fn read_tx(&self) -> Txn<'_> {
        Txn { store: self, mode: Mode::Read, overlay: BTreeMap::new() }
    }

    /// Blocks until no other write transaction is open.
    pub fn write_tx(&self) -> Txn<'_> {
        let guard = self.writer.lock();
        Txn { store: self, mode: Mode::Write(guard), overlay: BTreeMap::new() }
    }

    /// Flushes everything to disk and releases the database.
    pub fn close(self) -> Result<()> {
        let _writer = self.writer.lock();
        self.db.flush()?;
        info!("closed store");
        Ok(())
    }

    fn tree(&self, name: &str) -> Result<sled::Tree> {
        Ok(self.db.open_tree(name)?)
    }
}

enum Mode<'s> {
    Read,
    Write(MutexGuard<'s, ()>),
    Finished,
}

type Overlay = BTreeMap<&'static str, BTreeMap<Vec<u8>, Option<Vec<u8>>>>;

pub struct Txn<'s> {
    store: &'s Store,
    mode: Mode<'s>,
    overlay: Overlay,
}

impl<'s> Txn<'s> {
    pub fn is_write(&self) -> bool {
        matches!(self.mode, Mode::Write(_))
    }

    fn ensure_open(&self) -> Result<()> {
        match self.mode {
            Mode::Finished => Err(IndexError::TransactionMisuse("transaction already committed")),
            _ => Ok(()),
        }
    }

    pub(crate) fn require_write(&self) -> Result<()> {
        match self.mode {
            Mode::Write(_) => Ok(()),
            Mode::Read => Err(IndexError::TransactionMisuse("mutation inside a read transaction")),
            Mode::Finished => Err(IndexError::TransactionMisuse("transaction already committed")),
        }
    }

    pub(crate) fn get_raw(&self, tree: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        if let Some(pending) = self.overlay.get(tree).and_then(|w| w.get(key)) {
            return Ok(pending.clone());
        }
        let _gate = self.store.commit_gate.read_recursive();
        Ok(self.store.tree(tree)?.get(key)?.map(|v| v.to_vec()))
    }

    pub(crate) fn put_raw(&mut self, tree: &'static str, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.require_write()?;
        self.overlay.entry(tree).or_default().insert(key, Some(value));
        Ok(())
    }

    pub(crate) fn remove_raw(&mut self, tree: &'static str, key: Vec<u8>) -> Result<()> {
        self.require_write()?;
        self.overlay.entry(tree).or_default().insert(key, None);
        Ok(())
    }

    /// Visits `(key, value)` pairs of `tree` inside `range` in `direction`
    /// order until `visit` returns `false`. Pending writes of this
    /// transaction shadow committed data.
    pub(crate) fn visit_range<F>(
        &self,
        tree: &'static str,
        range: (Bound<Vec<u8>>, Bound<Vec<u8>>),
        direction: Direction,
        mut visit: F,
    ) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        self.ensure_open()?;
        let reverse = direction == Direction::Reverse;
        let _gate = self.store.commit_gate.read_recursive();

        let sled_tree = self.store.tree(tree)?;
        let mut committed: Box<dyn Iterator<Item = sled::Result<(IVec, IVec)>>> = if reverse {
            Box::new(sled_tree.range(range.clone()).rev())
        } else {
            Box::new(sled_tree.range(range.clone()))
        };
        let empty = BTreeMap::new();
        let writes = self.overlay.get(tree).unwrap_or(&empty);
        let mut pending: Box<dyn Iterator<Item = (&Vec<u8>, &Option<Vec<u8>>)> + '_> = if reverse {
            Box::new(writes.range(range).rev())
        } else {
            Box::new(writes.range(range))
        };

        let mut c_head = next_committed(committed.as_mut())?;
        let mut p_head = pending.next();
        loop {
            let order = match (&c_head, &p_head) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((ck, _)), Some((pk, _))) => {
                    let ord = ck.as_slice().cmp(pk.as_slice());
                    if reverse {
                        ord.reverse()
                    } else {
                        ord
                    }
                }
            };
            let item = match order {
                Ordering::Less => {
                    let item = c_head.take();
                    c_head = next_committed(committed.as_mut())?;
                    item
                }
                Ordering::Greater | Ordering::Equal => {
                    if order == Ordering::Equal {
                        c_head = next_committed(committed.as_mut())?;
                    }
                    let item = p_head
                        .take()
                        .and_then(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())));
                    p_head = pending.next();
                    item
                }
            };
            if let Some((k, v)) = item {
                if !visit(&k, &v)? {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Visits every entry whose key starts with `prefix`.
    pub(crate) fn visit_prefix<F>(
        &self,
        tree: &'static str,
        prefix: &[u8],
        direction: Direction,
        visit: F,
    ) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool>,
    {
        self.visit_range(tree, prefix_range(prefix), direction, visit)
    }

    /// Next value of the per-bucket id sequence. Ids start at 1.
    pub fn next_id(&mut self, bucket: &'static str) -> Result<u64> {
        self.require_write()?;
        let key = bucket.to_string().to_key();
        let current = match self.get_raw(SEQUENCE_TREE, &key)? {
            Some(bytes) => u64::from_key(&bytes)?,
            None => 0,
        };
        let next = current + 1;
        self.put_raw(SEQUENCE_TREE, key, next.to_key())?;
        Ok(next)
    }

    /// Atomically applies every buffered mutation. The transaction cannot be
    /// used afterwards.
    pub fn commit(&mut self) -> Result<()> {
        let writer = match std::mem::replace(&mut self.mode, Mode::Finished) {
            Mode::Write(guard) => guard,
            Mode::Read => {
                self.mode = Mode::Read;
                return Err(IndexError::TransactionMisuse("commit on a read transaction"));
            }
            Mode::Finished => {
                return Err(IndexError::TransactionMisuse("transaction already committed"))
            }
        };
        let overlay = std::mem::take(&mut self.overlay);
        if overlay.is_empty() {
            return Ok(());
        }

        let mut trees = Vec::with_capacity(overlay.len());
        let mut batches = Vec::with_capacity(overlay.len());
        let mut writes = 0usize;
        for (name, entries) in overlay {
            trees.push(self.store.tree(name)?);
            let mut batch = sled::Batch::default();
            for (key, value) in entries {
                writes += 1;
                match value {
                    Some(value) => batch.insert(key, value),
                    None => batch.remove(key),
                }
            }
            batches.push(batch);
        }

        {
            let _gate = self.store.commit_gate.write();
            let applied: TransactionResult<(), ()> = trees.as_slice().transaction(|views| {
                for (view, batch) in views.iter().zip(&batches) {
                    view.apply_batch(batch)?;
                }
                Ok(())
            });
            applied?;
        }
        if self.store.flush_on_commit {
            self.store.db.flush()?;
        }
        debug!(trees = trees.len(), writes, "committed write transaction");
        Ok(())
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        if matches!(self.mode, Mode::Write(_)) && !self.overlay.is_empty() {
            debug!(trees = self.overlay.len(), "discarding uncommitted write transaction");
        }
    }
}

/// Opens `config`, waiting up to `LOCK_WAIT` while a previous handle on the
/// same path still holds the file lock.
fn open_db(config: &sled::Config) -> Result<sled::Db> {
    let started = Instant::now();
    loop {
        match config.open() {
            Err(sled::Error::Io(e)) if is_lock_contention(&e) && started.elapsed() < LOCK_WAIT => {
                debug!(error = %e, "store is locked, retrying");
                thread::sleep(LOCK_RETRY);
            }
            opened => return Ok(opened?),
        }
    }
}

fn is_lock_contention(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::WouldBlock || e.to_string().contains("could not acquire lock")
}

fn next_committed(
    iter: &mut dyn Iterator<Item = sled::Result<(IVec, IVec)>>,
) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    match iter.next() {
        Some(Ok((k, v))) => Ok(Some((k.to_vec(), v.to_vec()))),
        Some(Err(e)) => Err(e.into()),
        None => Ok(None),
    }
}

/// Range covering exactly the keys that start with `prefix`.
pub(crate) fn prefix_range(prefix: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let start = Bound::Included(prefix.to_vec());
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return (start, Bound::Excluded(end));
        }
    }
    (start, Bound::Unbounded)
}

/// Typed key/value bucket. Keys use the order-preserving key codec, values
/// are bincode.
pub struct Bucket<K, V> {
    name: &'static str,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Bucket<K, V>
where
    K: KeyCodec,
    V: Serialize + DeserializeOwned,
{
    pub const fn new(name: &'static str) -> Self {
        Self { name, _marker: PhantomData }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, tx: &Txn<'_>, key: &K) -> Result<Option<V>> {
        match tx.get_raw(self.name, &key.to_key())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, tx: &Txn<'_>, key: &K) -> Result<bool> {
        Ok(tx.get_raw(self.name, &key.to_key())?.is_some())
    }

    pub fn put(&self, tx: &mut Txn<'_>, key: &K, value: &V) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        tx.put_raw(self.name, key.to_key(), bytes)
    }

    pub fn remove(&self, tx: &mut Txn<'_>, key: &K) -> Result<()> {
        tx.remove_raw(self.name, key.to_key())
    }

    /// Visits every entry in key order until `visit` returns `false`.
    pub fn iterate_all<F>(&self, tx: &Txn<'_>, mut visit: F) -> Result<()>
    where
        F: FnMut(K, V) -> bool,
    {
        tx.visit_range(self.name, (Bound::Unbounded, Bound::Unbounded), Direction::Forward, |k, v| {
            Ok(visit(K::from_key(k)?, bincode::deserialize(v)?))
        })
    }
}
