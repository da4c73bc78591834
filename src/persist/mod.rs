/// Shared in-process key-value store.
pub mod memory;
/// SQLite key-value store.
pub mod sqlite;

use std::collections::BTreeSet;

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    core::store::{CartSnapshot, CartStore},
    op::{CartOp, SLICE_FORMAT_VERSION, Slice, SliceEnvelope},
};

/// Errors from the persistence boundary and slice codec.
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite operation failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// JSON encode or decode failure.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// Stored envelope carries an unknown format version.
    #[error("unsupported {slice:?} format version {version}")]
    UnsupportedFormat {
        /// Slice being decoded.
        slice: Slice,
        /// Version found in the envelope.
        version: u16,
    },
    /// Any other backend failure.
    #[error("{0}")]
    Message(String),
}

/// Convenience result alias for persistence APIs.
pub type PersistResult<T> = Result<T, PersistError>;

/// Key-value boundary that outlives a session.
pub trait KvStore: Send {
    /// Reads the value under `key`, `None` when absent.
    fn get(&self, key: &str) -> PersistResult<Option<Vec<u8>>>;
    /// Overwrites the value under `key`.
    fn set(&mut self, key: &str, value: &[u8]) -> PersistResult<()>;
    /// Removes `key`. Deleting a missing key succeeds.
    fn delete(&mut self, key: &str) -> PersistResult<()>;
}

/// Serialized form of one slice: bytes to store, or `None` to delete the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceWrite {
    /// Slice this write belongs to.
    pub slice: Slice,
    /// Encoded envelope, or `None` to delete the key.
    pub payload: Option<Vec<u8>>,
}

/// Dirty slices named by a batch of changes, each listed once.
pub fn dirty_slices(ops: &[CartOp]) -> BTreeSet<Slice> {
    ops.iter().filter_map(CartOp::slice).collect()
}

/// Serializes the current value of `slice` from `store`.
pub fn encode_slice(store: &CartStore, slice: Slice) -> PersistResult<SliceWrite> {
    let payload = match slice {
        Slice::Lines => Some(encode(store.lines())?),
        Slice::Favorites => Some(encode(store.favorites())?),
        Slice::Discount => store.discount().map(encode).transpose()?,
    };
    Ok(SliceWrite { slice, payload })
}

/// Applies one serialized slice to the boundary.
pub fn write_slice(kv: &mut dyn KvStore, write: &SliceWrite) -> PersistResult<()> {
    let key = write.slice.key();
    match &write.payload {
        Some(bytes) => kv.set(key, bytes),
        None => kv.delete(key),
    }
}

/// Listens to store changes and rewrites each touched slice in full.
///
/// Failures are logged and returned; store state is never rolled back.
pub struct CartPersister {
    kv: Box<dyn KvStore>,
}

impl std::fmt::Debug for CartPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartPersister").finish_non_exhaustive()
    }
}

impl CartPersister {
    /// Wraps a boundary.
    pub fn new(kv: Box<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Writes every slice touched by `ops`. Returns the slices that failed.
    pub fn on_changes(&mut self, store: &CartStore, ops: &[CartOp]) -> Vec<(Slice, PersistError)> {
        let mut failed = Vec::new();
        for slice in dirty_slices(ops) {
            if let Err(err) = self.save_slice(store, slice) {
                warn!(?slice, error = %err, "failed to persist cart slice");
                failed.push((slice, err));
            }
        }
        failed
    }

    /// Encodes and writes one slice.
    pub fn save_slice(&mut self, store: &CartStore, slice: Slice) -> PersistResult<()> {
        let write = encode_slice(store, slice)?;
        write_slice(self.kv.as_mut(), &write)
    }

    /// Loads a store from the wrapped boundary; see [`load_store`].
    pub fn load_store(&self) -> CartStore {
        load_store(self.kv.as_ref())
    }

    /// Returns the wrapped boundary.
    pub fn into_inner(self) -> Box<dyn KvStore> {
        self.kv
    }
}

/// Loads all slices, falling back to empty for any that cannot be read.
pub fn load_store(kv: &dyn KvStore) -> CartStore {
    let snapshot = CartSnapshot {
        lines: load_or_default(kv, Slice::Lines).unwrap_or_default(),
        favorites: load_or_default(kv, Slice::Favorites).unwrap_or_default(),
        discount: load_or_default(kv, Slice::Discount),
    };
    debug!(
        lines = snapshot.lines.len(),
        favorites = snapshot.favorites.len(),
        discount = snapshot.discount.is_some(),
        "loaded cart state"
    );
    CartStore::from_snapshot(snapshot)
}

/// Reads and decodes one slice.
pub fn load_slice<T: DeserializeOwned>(kv: &dyn KvStore, slice: Slice) -> PersistResult<Option<T>> {
    let Some(bytes) = kv.get(slice.key())? else {
        return Ok(None);
    };
    decode(slice, &bytes).map(Some)
}

fn load_or_default<T: DeserializeOwned>(kv: &dyn KvStore, slice: Slice) -> Option<T> {
    match load_slice(kv, slice) {
        Ok(value) => value,
        Err(err) => {
            warn!(?slice, error = %err, "discarding unreadable cart slice");
            None
        }
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> PersistResult<Vec<u8>> {
    Ok(serde_json::to_vec(&SliceEnvelope::new(value))?)
}

fn decode<T: DeserializeOwned>(slice: Slice, bytes: &[u8]) -> PersistResult<T> {
    let env: SliceEnvelope<T> = serde_json::from_slice(bytes)?;
    if env.format_version != SLICE_FORMAT_VERSION {
        return Err(PersistError::UnsupportedFormat {
            slice,
            version: env.format_version,
        });
    }
    Ok(env.value)
}
