//! Manifest header and segment codecs.
//!
//! A manifest defines which chunks (and which tail checkpoint version) are
//! currently visible for a stream. Small manifests carry their chunk refs
//! inline; past a threshold the refs move into `manifest_segments/` records
//! and the header keeps only the segment count. The `ChunkRef` metadata
//! (`min_local`/`max_local`/`count`) is everything the planner needs to
//! estimate overlap without touching blob storage.

use super::{Reader, CODEC_V1};
use crate::{
    error::{Error, Result},
    keys::StreamKey,
};
use bytes::Bytes;

const CHUNK_REF_LEN: usize = 20;
const REPR_INLINE: u8 = 0;
const REPR_SEGMENTED: u8 = 1;

/// Reference to one immutable chunk blob, carried by manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRef {
    /// The chunk's sequence number within its stream.
    pub chunk_seq: u64,
    /// Smallest local value covered by the chunk.
    pub min_local: u32,
    /// Largest local value covered by the chunk.
    pub max_local: u32,
    /// Number of values in the chunk.
    pub count: u32,
}

impl ChunkRef {
    /// Whether the chunk's local range intersects `[lo, hi]`.
    pub const fn overlaps(&self, lo: u32, hi: u32) -> bool {
        self.max_local >= lo && self.min_local <= hi
    }
}

/// How a manifest stores its chunk refs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestRefs {
    /// Refs embedded in the header.
    Inline(Vec<ChunkRef>),
    /// Refs spilled into `manifest_segments/` records.
    Segmented {
        /// Number of segment records.
        segment_count: u64,
        /// Total refs across all segments.
        ref_count: u64,
    },
}

/// A stream's manifest header (`manifests/{stream_id}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Sequence number of the newest chunk; 0 when no chunk exists yet.
    pub last_chunk_seq: u64,
    /// Approximate total entries across sealed chunks.
    pub approx_count: u64,
    /// Unix seconds of the last seal (or manifest creation).
    pub last_seal_unix_sec: u64,
    /// MetaStore version of the newest tail checkpoint, as a cache hint.
    pub tail_version: Option<u64>,
    /// The chunk refs.
    pub refs: ManifestRefs,
}

impl Manifest {
    /// A fresh manifest for a stream with no sealed chunks.
    pub const fn empty(now_unix: u64) -> Self {
        Self {
            last_chunk_seq: 0,
            approx_count: 0,
            last_seal_unix_sec: now_unix,
            tail_version: None,
            refs: ManifestRefs::Inline(Vec::new()),
        }
    }

    /// Total chunk refs reachable from this header.
    pub fn ref_count(&self) -> u64 {
        match &self.refs {
            ManifestRefs::Inline(refs) => refs.len() as u64,
            ManifestRefs::Segmented { ref_count, .. } => *ref_count,
        }
    }
}

fn push_ref(out: &mut Vec<u8>, chunk_ref: &ChunkRef) {
    out.extend_from_slice(&chunk_ref.chunk_seq.to_be_bytes());
    out.extend_from_slice(&chunk_ref.min_local.to_be_bytes());
    out.extend_from_slice(&chunk_ref.max_local.to_be_bytes());
    out.extend_from_slice(&chunk_ref.count.to_be_bytes());
}

fn read_ref(reader: &mut Reader<'_>) -> Result<ChunkRef> {
    Ok(ChunkRef {
        chunk_seq: reader.u64()?,
        min_local: reader.u32()?,
        max_local: reader.u32()?,
        count: reader.u32()?,
    })
}

/// Encode a manifest header.
pub fn encode_manifest(manifest: &Manifest) -> Bytes {
    let refs_len = match &manifest.refs {
        ManifestRefs::Inline(refs) => 5 + refs.len() * CHUNK_REF_LEN,
        ManifestRefs::Segmented { .. } => 17,
    };
    let mut out = Vec::with_capacity(33 + refs_len);
    out.push(CODEC_V1);
    out.extend_from_slice(&manifest.last_chunk_seq.to_be_bytes());
    out.extend_from_slice(&manifest.approx_count.to_be_bytes());
    out.extend_from_slice(&manifest.last_seal_unix_sec.to_be_bytes());
    out.extend_from_slice(&manifest.tail_version.unwrap_or(0).to_be_bytes());
    match &manifest.refs {
        ManifestRefs::Inline(refs) => {
            out.push(REPR_INLINE);
            out.extend_from_slice(&(refs.len() as u32).to_be_bytes());
            for chunk_ref in refs {
                push_ref(&mut out, chunk_ref);
            }
        }
        ManifestRefs::Segmented { segment_count, ref_count } => {
            out.push(REPR_SEGMENTED);
            out.extend_from_slice(&segment_count.to_be_bytes());
            out.extend_from_slice(&ref_count.to_be_bytes());
        }
    }
    Bytes::from(out)
}

/// Decode a manifest header.
pub fn decode_manifest(bytes: &[u8]) -> Result<Manifest> {
    let mut reader = Reader::versioned(bytes, "manifest")?;
    let last_chunk_seq = reader.u64()?;
    let approx_count = reader.u64()?;
    let last_seal_unix_sec = reader.u64()?;
    let tail_version = match reader.u64()? {
        0 => None,
        version => Some(version),
    };
    let refs = match reader.u8()? {
        REPR_INLINE => {
            let count = reader.u32()? as usize;
            let mut refs = Vec::with_capacity(count);
            for _ in 0..count {
                refs.push(read_ref(&mut reader)?);
            }
            ManifestRefs::Inline(refs)
        }
        REPR_SEGMENTED => {
            ManifestRefs::Segmented { segment_count: reader.u64()?, ref_count: reader.u64()? }
        }
        _ => return Err(Error::Decode("unknown manifest repr")),
    };
    reader.finish()?;
    Ok(Manifest { last_chunk_seq, approx_count, last_seal_unix_sec, tail_version, refs })
}

/// Encode one manifest segment (a slice of chunk refs).
pub fn encode_segment(refs: &[ChunkRef]) -> Bytes {
    let mut out = Vec::with_capacity(5 + refs.len() * CHUNK_REF_LEN);
    out.push(CODEC_V1);
    out.extend_from_slice(&(refs.len() as u32).to_be_bytes());
    for chunk_ref in refs {
        push_ref(&mut out, chunk_ref);
    }
    Bytes::from(out)
}

/// Decode one manifest segment.
pub fn decode_segment(bytes: &[u8]) -> Result<Vec<ChunkRef>> {
    let mut reader = Reader::versioned(bytes, "manifest_segment")?;
    let count = reader.u32()? as usize;
    let mut refs = Vec::with_capacity(count);
    for _ in 0..count {
        refs.push(read_ref(&mut reader)?);
    }
    reader.finish()?;
    Ok(refs)
}

/// Encode a list of stream ids (the persisted warm-stream list).
pub fn encode_stream_list(streams: &[StreamKey]) -> Bytes {
    let mut out = Vec::with_capacity(5 + streams.len() * 37);
    out.push(CODEC_V1);
    out.extend_from_slice(&(streams.len() as u32).to_be_bytes());
    for stream in streams {
        out.extend_from_slice(&stream.encoded());
    }
    Bytes::from(out)
}

/// Decode a list of stream ids.
pub fn decode_stream_list(bytes: &[u8]) -> Result<Vec<StreamKey>> {
    let mut reader = Reader::versioned(bytes, "stream_list")?;
    let count = reader.u32()? as usize;
    let mut streams = Vec::with_capacity(count);
    for _ in 0..count {
        let kind_byte = reader.u8()?;
        let kind = crate::keys::IndexKind::from_byte(kind_byte)
            .ok_or(Error::Decode("unknown stream kind in list"))?;
        let mut encoded = Vec::with_capacity(1 + kind.value_len() + 4);
        encoded.push(kind_byte);
        encoded.extend_from_slice(reader.take(kind.value_len() + 4)?);
        streams.push(StreamKey::decode(&encoded)?);
    }
    reader.finish()?;
    Ok(streams)
}
