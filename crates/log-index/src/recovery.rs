//! Lazy startup: no table scan, just the barrier snapshot, the small
//! topic0 catalogs and an optional warm list of streams to pre-load.

use crate::{
    cache::StreamCache,
    codec::{decode_stream_list, decode_topic0_mode, Topic0Mode},
    error::Result,
    ingest::read_meta_state,
    keys::{StreamKey, TOPIC0_MODE_PREFIX, WARM_STREAMS_KEY},
    store::MetaStore,
    types::MetaState,
};
use alloy_primitives::B256;
use std::collections::HashMap;
use tracing::info;

const CATALOG_PAGE: usize = 1024;

/// What startup recovered.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    /// The barrier snapshot; `None` for an empty index.
    pub state: Option<MetaState>,
    /// The topic0 mode catalog, for planner coverage decisions.
    pub topic0_modes: HashMap<B256, Topic0Mode>,
    /// Streams whose manifests were pre-loaded into the cache.
    pub warmed_streams: Vec<StreamKey>,
}

/// Bootstrap the engine: snapshot `meta/state`, page in the topic0 mode
/// catalog and warm up to `warm_limit` streams from the persisted warm
/// list. Never scans `logs/` or the stream keyspace.
pub async fn bootstrap<M: MetaStore + ?Sized>(
    meta: &M,
    cache: &StreamCache,
    warm_limit: usize,
) -> Result<Bootstrap> {
    let state = read_meta_state(meta).await?.map(|(state, _)| state);

    let mut topic0_modes = HashMap::new();
    let mut cursor = None;
    loop {
        let page = meta.list_prefix(TOPIC0_MODE_PREFIX, cursor.take(), CATALOG_PAGE).await?;
        for key in &page.keys {
            let Some(signature) = key.strip_prefix(TOPIC0_MODE_PREFIX) else { continue };
            if signature.len() != 32 {
                continue;
            }
            if let Some(record) = meta.get(key).await? {
                topic0_modes
                    .insert(B256::from_slice(signature), decode_topic0_mode(&record.value)?);
            }
        }
        cursor = page.next_cursor;
        if cursor.is_none() {
            break;
        }
    }

    let mut warmed_streams = Vec::new();
    if warm_limit > 0 {
        if let Some(record) = meta.get(WARM_STREAMS_KEY).await? {
            for stream in decode_stream_list(&record.value)?.into_iter().take(warm_limit) {
                if cache.manifest(meta, &stream).await?.is_some() {
                    warmed_streams.push(stream);
                }
            }
        }
    }

    info!(
        target: "log_index::recovery",
        head = state.map(|s| s.indexed_finalized_head),
        topic0_modes = topic0_modes.len(),
        warmed = warmed_streams.len(),
        "bootstrap complete"
    );
    Ok(Bootstrap { state, topic0_modes, warmed_streams })
}
