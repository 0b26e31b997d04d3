//! Chunk sealing and manifest publication.
//!
//! Sealing turns the current tail into an immutable chunk blob and
//! publishes it through the manifest CAS. The publish order is fixed:
//! blob put (idempotent), manifest CAS, then tail clear + checkpoint.
//! Readers only observe a chunk once the manifest CAS lands; until then
//! its values remain visible through the tail.

use crate::{
    codec::{
        decode_manifest, decode_segment, encode_chunk, encode_manifest, encode_segment, ChunkBlob,
        ChunkRef, Manifest, ManifestRefs,
    },
    config::{ChunkConfig, ManifestConfig},
    error::{Error, Result},
    ingest::tails::TailState,
    keys::{chunk_key, manifest_key, manifest_segment_key, StreamKey},
    metrics::Counters,
    store::{BlobStore, FenceToken, MetaStore, PutCond, PutOutcome},
};
use roaring::RoaringBitmap;
use std::collections::HashMap;
use tracing::debug;

/// Defensive retry budget for the manifest header CAS. Under the
/// single-writer contract the CAS cannot race, so repeated losses indicate
/// a fence breach.
const MANIFEST_CAS_RETRIES: u32 = 3;

/// Whether a tail should be sealed after a block's appends.
pub(crate) fn should_seal(
    config: &ChunkConfig,
    tail: &TailState,
    manifest: &Manifest,
    now_unix: u64,
) -> bool {
    if tail.bitmap.is_empty() {
        return false;
    }
    tail.bitmap.len() >= config.target_entries
        || tail.serialized_len() >= config.target_bytes
        || now_unix.saturating_sub(manifest.last_seal_unix_sec)
            >= config.maintenance_seal_interval.as_secs()
}

/// A stream's manifest as held by the writer.
#[derive(Debug)]
pub(crate) struct ManifestState {
    /// The decoded header.
    pub manifest: Manifest,
    /// All chunk refs, resolved.
    pub refs: Vec<ChunkRef>,
    /// MetaStore version of the header record.
    pub version: u64,
    /// MetaStore versions of resolved segments.
    segment_versions: HashMap<u64, u64>,
}

/// The writer's set of loaded manifests.
#[derive(Debug)]
pub(crate) struct ManifestSet {
    config: ManifestConfig,
    streams: HashMap<StreamKey, ManifestState>,
}

impl ManifestSet {
    pub(crate) fn new(config: ManifestConfig) -> Self {
        Self { config, streams: HashMap::new() }
    }

    /// Load a stream's manifest, creating an empty header on first touch.
    ///
    /// The header is created before any tail checkpoint for the stream can
    /// exist, which is what makes a tail without a manifest header safe for
    /// GC to reclaim.
    pub(crate) async fn ensure<M: MetaStore + ?Sized>(
        &mut self,
        meta: &M,
        stream: &StreamKey,
        epoch: u64,
        now_unix: u64,
    ) -> Result<&mut ManifestState> {
        if !self.streams.contains_key(stream) {
            let state = match meta.get(&manifest_key(stream)).await? {
                Some(record) => Self::resolve(meta, stream, &record.value, record.version).await?,
                None => {
                    let manifest = Manifest::empty(now_unix);
                    let outcome = meta
                        .put(
                            &manifest_key(stream),
                            encode_manifest(&manifest),
                            PutCond::IfAbsent,
                            FenceToken(epoch),
                        )
                        .await?;
                    match outcome {
                        PutOutcome::Applied { version } => ManifestState {
                            manifest,
                            refs: Vec::new(),
                            version,
                            segment_versions: HashMap::new(),
                        },
                        // A crashed predecessor already created it.
                        PutOutcome::NotApplied { .. } => {
                            let record = meta
                                .get(&manifest_key(stream))
                                .await?
                                .ok_or_else(|| Error::Internal("manifest vanished".to_owned()))?;
                            Self::resolve(meta, stream, &record.value, record.version).await?
                        }
                    }
                }
            };
            self.streams.insert(*stream, state);
        }
        Ok(self.streams.get_mut(stream).expect("inserted above"))
    }

    async fn resolve<M: MetaStore + ?Sized>(
        meta: &M,
        stream: &StreamKey,
        bytes: &[u8],
        version: u64,
    ) -> Result<ManifestState> {
        let manifest = decode_manifest(bytes)?;
        let mut segment_versions = HashMap::new();
        let refs = match &manifest.refs {
            ManifestRefs::Inline(refs) => refs.clone(),
            ManifestRefs::Segmented { segment_count, ref_count } => {
                let mut refs = Vec::with_capacity(*ref_count as usize);
                for segment_id in 0..*segment_count {
                    let record = meta
                        .get(&manifest_segment_key(stream, segment_id))
                        .await?
                        .ok_or_else(|| {
                            Error::Corruption(format!(
                                "manifest for {} missing segment {segment_id}",
                                stream.kind.as_str()
                            ))
                        })?;
                    segment_versions.insert(segment_id, record.version);
                    refs.extend(decode_segment(&record.value)?);
                }
                refs
            }
        };
        Ok(ManifestState { manifest, refs, version, segment_versions })
    }

    /// The loaded manifest for a stream, if any.
    pub(crate) fn get_mut(&mut self, stream: &StreamKey) -> Option<&mut ManifestState> {
        self.streams.get_mut(stream)
    }

    /// Streams with loaded manifests, for maintenance passes.
    pub(crate) fn loaded_streams(&self) -> Vec<StreamKey> {
        let mut streams: Vec<_> = self.streams.keys().copied().collect();
        streams.sort();
        streams
    }

    /// Seal the tail into the next chunk and publish it.
    pub(crate) async fn publish_chunk<M: MetaStore + ?Sized, B: BlobStore + ?Sized>(
        &mut self,
        meta: &M,
        blob: &B,
        stream: &StreamKey,
        tail: &mut TailState,
        epoch: u64,
        now_unix: u64,
        counters: &Counters,
    ) -> Result<()> {
        let inline_max = self.config.inline_refs_max;
        let segment_refs = self.config.segment_refs;
        let state = self
            .streams
            .get_mut(stream)
            .ok_or_else(|| Error::Internal("seal of unloaded manifest".to_owned()))?;

        let chunk_seq = state.manifest.last_chunk_seq + 1;
        let chunk = ChunkBlob::from_bitmap(tail.bitmap.clone())?;
        let new_ref = ChunkRef {
            chunk_seq,
            min_local: chunk.min_local,
            max_local: chunk.max_local,
            count: chunk.count,
        };
        blob.put(&chunk_key(stream, chunk_seq), encode_chunk(&chunk)?).await?;

        let was_inline = matches!(state.manifest.refs, ManifestRefs::Inline(_));
        state.refs.push(new_ref);

        if state.refs.len() <= inline_max {
            state.manifest.refs = ManifestRefs::Inline(state.refs.clone());
        } else {
            let total = state.refs.len();
            let segment_count = total.div_ceil(segment_refs);
            // Only the segments affected by this publish are rewritten: all
            // of them when migrating from the inline form, otherwise just
            // the trailing (possibly new) one.
            let first_dirty = if was_inline { 0 } else { (total - 1) / segment_refs };
            for segment_id in first_dirty..segment_count {
                let start = segment_id * segment_refs;
                let end = (start + segment_refs).min(total);
                Self::write_segment(
                    meta,
                    stream,
                    segment_id as u64,
                    &state.refs[start..end],
                    &mut state.segment_versions,
                    epoch,
                )
                .await?;
            }
            state.manifest.refs = ManifestRefs::Segmented {
                segment_count: segment_count as u64,
                ref_count: total as u64,
            };
        }

        state.manifest.last_chunk_seq = chunk_seq;
        state.manifest.approx_count += new_ref.count as u64;
        state.manifest.last_seal_unix_sec = now_unix;
        state.manifest.tail_version = tail.version;

        let mut attempts = 0u32;
        loop {
            let outcome = meta
                .put(
                    &manifest_key(stream),
                    encode_manifest(&state.manifest),
                    PutCond::IfVersion(state.version),
                    FenceToken(epoch),
                )
                .await?;
            match outcome {
                PutOutcome::Applied { version } => {
                    state.version = version;
                    break;
                }
                PutOutcome::NotApplied { current } => {
                    attempts += 1;
                    Counters::bump(&counters.manifest_cas_retries);
                    if attempts >= MANIFEST_CAS_RETRIES {
                        return Err(Error::Internal(format!(
                            "manifest CAS lost {attempts} times for {} stream",
                            stream.kind.as_str()
                        )));
                    }
                    state.version = match current {
                        Some(version) => version,
                        None => {
                            let record = meta.get(&manifest_key(stream)).await?.ok_or_else(
                                || Error::Internal("manifest vanished during CAS".to_owned()),
                            )?;
                            record.version
                        }
                    };
                }
            }
        }

        debug!(
            target: "log_index::ingest",
            kind = stream.kind.as_str(),
            shard = stream.shard,
            chunk_seq,
            entries = new_ref.count,
            "sealed chunk"
        );

        // Step 4 of the publish sequence: clear the sealed values. The
        // caller persists the emptied tail checkpoint.
        tail.bitmap = RoaringBitmap::new();
        tail.dirty = true;
        Counters::bump(&counters.chunks_sealed);
        Ok(())
    }

    async fn write_segment<M: MetaStore + ?Sized>(
        meta: &M,
        stream: &StreamKey,
        segment_id: u64,
        refs: &[ChunkRef],
        segment_versions: &mut HashMap<u64, u64>,
        epoch: u64,
    ) -> Result<()> {
        let key = manifest_segment_key(stream, segment_id);
        let mut cond = match segment_versions.get(&segment_id) {
            Some(version) => PutCond::IfVersion(*version),
            None => PutCond::IfAbsent,
        };
        for _ in 0..2 {
            let outcome = meta.put(&key, encode_segment(refs), cond, FenceToken(epoch)).await?;
            match outcome {
                PutOutcome::Applied { version } => {
                    segment_versions.insert(segment_id, version);
                    return Ok(());
                }
                // A crashed predecessor left this segment behind; adopt its
                // version and overwrite with identical content.
                PutOutcome::NotApplied { current: Some(version) } => {
                    cond = PutCond::IfVersion(version);
                }
                PutOutcome::NotApplied { current: None } => {
                    cond = PutCond::IfAbsent;
                }
            }
        }
        Err(Error::Internal(format!(
            "manifest segment {segment_id} CAS lost for {} stream",
            stream.kind.as_str()
        )))
    }
}
