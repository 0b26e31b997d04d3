//! In-memory mutable tails and their checkpoints.
//!
//! A tail is the mutable roaring bitmap holding a stream's values that are
//! not yet sealed into a chunk. Appends are set-inserts and therefore
//! idempotent across crash replays. Checkpoints are CAS writes; a lost CAS
//! means a concurrent writer slipped past the fence and is fatal.

use crate::{
    codec::{decode_tail, encode_tail},
    error::{Error, Result},
    keys::{tail_key, StreamKey},
    store::{FenceToken, MetaStore, PutCond, PutOutcome},
};
use roaring::RoaringBitmap;
use std::collections::HashMap;

/// One stream's in-memory tail.
#[derive(Debug, Default)]
pub(crate) struct TailState {
    /// The unsealed values.
    pub bitmap: RoaringBitmap,
    /// MetaStore version of the last persisted checkpoint.
    pub version: Option<u64>,
    /// Whether the bitmap has diverged from the persisted checkpoint.
    pub dirty: bool,
}

impl TailState {
    /// Insert a value; marks the tail dirty only on change.
    pub(crate) fn insert(&mut self, local: u32) {
        if self.bitmap.insert(local) {
            self.dirty = true;
        }
    }

    /// The serialized checkpoint size, for the byte-based seal trigger.
    pub(crate) fn serialized_len(&self) -> usize {
        self.bitmap.serialized_size()
    }
}

/// The writer's set of loaded tails.
#[derive(Debug, Default)]
pub(crate) struct TailSet {
    streams: HashMap<StreamKey, TailState>,
}

impl TailSet {
    /// Load a stream's tail from its checkpoint on first touch.
    pub(crate) async fn load<M: MetaStore + ?Sized>(
        &mut self,
        meta: &M,
        stream: &StreamKey,
    ) -> Result<&mut TailState> {
        if !self.streams.contains_key(stream) {
            let state = match meta.get(&tail_key(stream)).await? {
                Some(record) => TailState {
                    bitmap: decode_tail(&record.value)?,
                    version: Some(record.version),
                    dirty: false,
                },
                None => TailState::default(),
            };
            self.streams.insert(*stream, state);
        }
        Ok(self.streams.get_mut(stream).expect("inserted above"))
    }

    /// The loaded tail for a stream, if any.
    pub(crate) fn get_mut(&mut self, stream: &StreamKey) -> Option<&mut TailState> {
        self.streams.get_mut(stream)
    }

    /// Streams whose tails have unpersisted changes.
    pub(crate) fn dirty_streams(&self) -> Vec<StreamKey> {
        let mut streams: Vec<_> = self
            .streams
            .iter()
            .filter_map(|(stream, state)| state.dirty.then_some(*stream))
            .collect();
        streams.sort();
        streams
    }

    /// Persist a stream's checkpoint if dirty.
    ///
    /// The write is conditioned on the version this writer last observed;
    /// a lost CAS can only mean another writer got past the fence.
    pub(crate) async fn checkpoint<M: MetaStore + ?Sized>(
        &mut self,
        meta: &M,
        stream: &StreamKey,
        epoch: u64,
    ) -> Result<bool> {
        let state = self
            .streams
            .get_mut(stream)
            .ok_or_else(|| Error::Internal("checkpoint of unloaded tail".to_owned()))?;
        if !state.dirty {
            return Ok(false);
        }
        let cond = state.version.map_or(PutCond::IfAbsent, PutCond::IfVersion);
        let outcome = meta
            .put(&tail_key(stream), encode_tail(&state.bitmap)?, cond, FenceToken(epoch))
            .await?;
        match outcome {
            PutOutcome::Applied { version } => {
                state.version = Some(version);
                state.dirty = false;
                Ok(true)
            }
            PutOutcome::NotApplied { .. } => Err(Error::Internal(format!(
                "tail checkpoint CAS lost for {} stream (concurrent writer)",
                stream.kind.as_str()
            ))),
        }
    }
}
