//! Versioned binary codecs for every persisted record type.
//!
//! Every serialized value begins with a version byte. Chunk blobs
//! additionally carry a trailing CRC32 over the payload. Numeric fields are
//! big-endian. Decoding validates versions, lengths and checksums; a
//! mismatch is a hard error, which callers escalate to degraded mode when
//! it is reached through a manifest reference.

mod canonical;
mod chunk;
mod manifest;
mod topic0;

pub use canonical::{
    decode_block_meta, decode_block_num, decode_log, decode_meta_state, encode_block_meta,
    encode_block_num, encode_log, encode_meta_state,
};
pub use chunk::{decode_chunk, decode_tail, encode_chunk, encode_tail, ChunkBlob};
pub use manifest::{
    decode_manifest, decode_segment, decode_stream_list, encode_manifest, encode_segment,
    encode_stream_list, ChunkRef, Manifest, ManifestRefs,
};
pub use topic0::{
    decode_topic0_mode, decode_topic0_stats, encode_topic0_mode, encode_topic0_stats, Topic0Mode,
    Topic0Stats,
};

use crate::error::{Error, Result};

/// Current codec version for all record types.
pub(crate) const CODEC_V1: u8 = 1;

/// A bounds-checked reader over an encoded value.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    what: &'static str,
}

impl<'a> Reader<'a> {
    /// Wrap `bytes`, validating the leading version byte.
    pub(crate) fn versioned(bytes: &'a [u8], what: &'static str) -> Result<Self> {
        let (&version, rest) = bytes.split_first().ok_or(Error::Decode(what))?;
        if version != CODEC_V1 {
            return Err(Error::Corruption(format!(
                "unsupported {what} codec version {version}"
            )));
        }
        Ok(Self { bytes: rest, what })
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < len {
            return Err(Error::Decode(self.what));
        }
        let (head, rest) = self.bytes.split_at(len);
        self.bytes = rest;
        Ok(head)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        self.bytes
    }

    /// Assert the value was consumed exactly.
    pub(crate) fn finish(self) -> Result<()> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(Error::Decode(self.what))
        }
    }
}
