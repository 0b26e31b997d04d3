//! Read-path LRU caches for manifests, tails and chunk payloads.
//!
//! Mutable records (manifests, tails) are cached against their MetaStore
//! version: every access re-reads the record header cheaply and reuses the
//! decoded value only when the version matches, so readers always observe
//! the latest CAS result. Chunk payloads are immutable and cached by key.

use crate::{
    codec::{
        decode_chunk, decode_manifest, decode_segment, decode_tail, ChunkRef, Manifest,
        ManifestRefs,
    },
    config::CacheConfig,
    error::{Error, Result},
    keys::{chunk_key, manifest_key, manifest_segment_key, tail_key, StreamKey},
    store::{BlobStore, MetaStore},
};
use lru::LruCache;
use parking_lot::Mutex;
use roaring::RoaringBitmap;
use std::{num::NonZeroUsize, sync::Arc};

/// A stream's manifest together with its fully resolved chunk refs.
#[derive(Debug, Clone)]
pub struct StreamManifest {
    /// MetaStore version of the header record.
    pub version: u64,
    /// The decoded header.
    pub manifest: Arc<Manifest>,
    /// All chunk refs, assembled from the header or its segments.
    pub refs: Arc<Vec<ChunkRef>>,
}

/// A stream's tail checkpoint.
#[derive(Debug, Clone)]
pub struct StreamTail {
    /// MetaStore version of the tail record.
    pub version: u64,
    /// The decoded tail bitmap.
    pub bitmap: Arc<RoaringBitmap>,
}

struct CacheInner {
    manifests: LruCache<Vec<u8>, StreamManifest>,
    tails: LruCache<Vec<u8>, StreamTail>,
    chunks: LruCache<Vec<u8>, Arc<RoaringBitmap>>,
}

/// Shared LRU caches over stream state.
pub struct StreamCache {
    inner: Mutex<CacheInner>,
}

impl std::fmt::Debug for StreamCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StreamCache")
            .field("manifests", &inner.manifests.len())
            .field("tails", &inner.tails.len())
            .field("chunks", &inner.chunks.len())
            .finish()
    }
}

fn capacity(entries: usize) -> NonZeroUsize {
    NonZeroUsize::new(entries.max(1)).expect("nonzero")
}

impl StreamCache {
    /// Create caches with the configured capacities.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                manifests: LruCache::new(capacity(config.manifest_entries)),
                tails: LruCache::new(capacity(config.tail_entries)),
                chunks: LruCache::new(capacity(config.chunk_entries)),
            }),
        }
    }

    /// Load a stream's manifest (and resolve its segments), reusing the
    /// cached decode when the stored version is unchanged.
    pub async fn manifest<M: MetaStore + ?Sized>(
        &self,
        meta: &M,
        stream: &StreamKey,
    ) -> Result<Option<StreamManifest>> {
        let key = manifest_key(stream);
        let Some(record) = meta.get(&key).await? else {
            return Ok(None);
        };

        if let Some(cached) = self.inner.lock().manifests.get(&key) {
            if cached.version == record.version {
                return Ok(Some(cached.clone()));
            }
        }

        let manifest = decode_manifest(&record.value)?;
        let refs = match &manifest.refs {
            ManifestRefs::Inline(refs) => refs.clone(),
            ManifestRefs::Segmented { segment_count, ref_count } => {
                let mut refs = Vec::with_capacity(*ref_count as usize);
                for segment_id in 0..*segment_count {
                    let segment_key = manifest_segment_key(stream, segment_id);
                    let Some(segment) = meta.get(&segment_key).await? else {
                        return Err(Error::Corruption(format!(
                            "manifest for {} references missing segment {segment_id}",
                            stream.kind.as_str()
                        )));
                    };
                    refs.extend(decode_segment(&segment.value)?);
                }
                if refs.len() as u64 != *ref_count {
                    return Err(Error::Corruption(format!(
                        "manifest for {} resolves {} refs, header claims {ref_count}",
                        stream.kind.as_str(),
                        refs.len()
                    )));
                }
                refs
            }
        };

        let entry = StreamManifest {
            version: record.version,
            manifest: Arc::new(manifest),
            refs: Arc::new(refs),
        };
        self.inner.lock().manifests.put(key, entry.clone());
        Ok(Some(entry))
    }

    /// Load a stream's tail checkpoint, reusing the cached decode when the
    /// stored version is unchanged.
    pub async fn tail<M: MetaStore + ?Sized>(
        &self,
        meta: &M,
        stream: &StreamKey,
    ) -> Result<Option<StreamTail>> {
        let key = tail_key(stream);
        let Some(record) = meta.get(&key).await? else {
            return Ok(None);
        };

        if let Some(cached) = self.inner.lock().tails.get(&key) {
            if cached.version == record.version {
                return Ok(Some(cached.clone()));
            }
        }

        let entry =
            StreamTail { version: record.version, bitmap: Arc::new(decode_tail(&record.value)?) };
        self.inner.lock().tails.put(key, entry.clone());
        Ok(Some(entry))
    }

    /// Load a chunk payload referenced by a manifest.
    ///
    /// A missing blob or a metadata mismatch against the referencing
    /// `ChunkRef` breaks manifest–chunk closure and is corruption.
    pub async fn chunk<B: BlobStore + ?Sized>(
        &self,
        blob: &B,
        stream: &StreamKey,
        chunk_ref: &ChunkRef,
    ) -> Result<Arc<RoaringBitmap>> {
        let key = chunk_key(stream, chunk_ref.chunk_seq);
        if let Some(cached) = self.inner.lock().chunks.get(&key) {
            return Ok(Arc::clone(cached));
        }

        let Some(bytes) = blob.get(&key).await? else {
            return Err(Error::Corruption(format!(
                "manifest references missing chunk {} seq {}",
                stream.kind.as_str(),
                chunk_ref.chunk_seq
            )));
        };
        let chunk = decode_chunk(&bytes)?;
        if chunk.min_local != chunk_ref.min_local
            || chunk.max_local != chunk_ref.max_local
            || chunk.count != chunk_ref.count
        {
            return Err(Error::Corruption(format!(
                "chunk {} seq {} does not match its manifest ref",
                stream.kind.as_str(),
                chunk_ref.chunk_seq
            )));
        }
        let bitmap = Arc::new(chunk.bitmap);
        self.inner.lock().chunks.put(key, Arc::clone(&bitmap));
        Ok(bitmap)
    }
}
