//! Codecs for the roaring bitmap payloads: immutable chunk blobs and
//! mutable tail checkpoints.
//!
//! Chunk blobs are CRC32-tailed; a checksum or metadata mismatch is
//! corruption. Tail checkpoints live in the MetaStore and rely on its
//! integrity guarantees instead.

use super::{Reader, CODEC_V1};
use crate::error::{Error, Result};
use bytes::Bytes;
use roaring::RoaringBitmap;

/// A decoded chunk blob: an immutable slice of a stream's values.
#[derive(Debug, Clone)]
pub struct ChunkBlob {
    /// Smallest local value in the chunk.
    pub min_local: u32,
    /// Largest local value in the chunk.
    pub max_local: u32,
    /// Number of values in the chunk.
    pub count: u32,
    /// The values.
    pub bitmap: RoaringBitmap,
}

impl ChunkBlob {
    /// Build a chunk from a non-empty bitmap, deriving the metadata fields.
    pub fn from_bitmap(bitmap: RoaringBitmap) -> Result<Self> {
        let (Some(min_local), Some(max_local)) = (bitmap.min(), bitmap.max()) else {
            return Err(Error::Internal("attempted to seal an empty chunk".to_owned()));
        };
        Ok(Self { min_local, max_local, count: bitmap.len() as u32, bitmap })
    }
}

/// Encode a chunk blob with its trailing CRC32.
pub fn encode_chunk(chunk: &ChunkBlob) -> Result<Bytes> {
    let bitmap_len = chunk.bitmap.serialized_size();
    let mut out = Vec::with_capacity(1 + 12 + 4 + bitmap_len + 4);
    out.push(CODEC_V1);
    out.extend_from_slice(&chunk.min_local.to_be_bytes());
    out.extend_from_slice(&chunk.max_local.to_be_bytes());
    out.extend_from_slice(&chunk.count.to_be_bytes());
    out.extend_from_slice(&(bitmap_len as u32).to_be_bytes());
    chunk
        .bitmap
        .serialize_into(&mut out)
        .map_err(|e| Error::Internal(format!("serialize chunk bitmap: {e}")))?;
    out.extend_from_slice(&crc32fast::hash(&out).to_be_bytes());
    Ok(Bytes::from(out))
}

/// Decode and validate a chunk blob.
///
/// Validates the CRC32, the codec version and that the embedded metadata
/// matches the decoded bitmap. Callers additionally compare against the
/// referencing `ChunkRef`.
pub fn decode_chunk(bytes: &[u8]) -> Result<ChunkBlob> {
    if bytes.len() < 4 {
        return Err(Error::Decode("chunk too short"));
    }
    let (payload, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let stored_crc = u32::from_be_bytes(crc_bytes.try_into().expect("4 bytes"));
    if crc32fast::hash(payload) != stored_crc {
        return Err(Error::Corruption("chunk crc32 mismatch".to_owned()));
    }

    let mut reader = Reader::versioned(payload, "chunk")?;
    let min_local = reader.u32()?;
    let max_local = reader.u32()?;
    let count = reader.u32()?;
    let bitmap_len = reader.u32()? as usize;
    let bitmap_bytes = reader.take(bitmap_len)?;
    reader.finish()?;

    let bitmap = RoaringBitmap::deserialize_from(bitmap_bytes)
        .map_err(|_| Error::Corruption("chunk bitmap malformed".to_owned()))?;
    if bitmap.min() != Some(min_local)
        || bitmap.max() != Some(max_local)
        || bitmap.len() != count as u64
    {
        return Err(Error::Corruption("chunk metadata does not match bitmap".to_owned()));
    }
    Ok(ChunkBlob { min_local, max_local, count, bitmap })
}

/// Encode a tail checkpoint.
pub fn encode_tail(tail: &RoaringBitmap) -> Result<Bytes> {
    let mut out = Vec::with_capacity(1 + 4 + tail.serialized_size());
    out.push(CODEC_V1);
    out.extend_from_slice(&(tail.len() as u32).to_be_bytes());
    tail.serialize_into(&mut out)
        .map_err(|e| Error::Internal(format!("serialize tail bitmap: {e}")))?;
    Ok(Bytes::from(out))
}

/// Decode a tail checkpoint.
pub fn decode_tail(bytes: &[u8]) -> Result<RoaringBitmap> {
    let mut reader = Reader::versioned(bytes, "tail")?;
    let count = reader.u32()?;
    let bitmap = RoaringBitmap::deserialize_from(reader.remaining())
        .map_err(|_| Error::Corruption("tail bitmap malformed".to_owned()))?;
    if bitmap.len() != count as u64 {
        return Err(Error::Corruption("tail count does not match bitmap".to_owned()));
    }
    Ok(bitmap)
}
