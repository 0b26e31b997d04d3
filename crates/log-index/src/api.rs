//! The embedding surface: one service object wiring the ingest engine,
//! query engine, GC worker and health reporting over a shared store pair.

use crate::{
    cache::StreamCache,
    config::Config,
    error::{Error, Result},
    filter::{LogFilter, QueryOptions},
    gc::{GcStats, GcWorker},
    ingest::{read_meta_state, unix_now, IngestEngine, MaintenanceStats},
    lease::LeaseManager,
    metrics::{Counters, GcBacklog, HealthReport},
    query::QueryEngine,
    recovery::{self, Bootstrap},
    state::ServiceState,
    store::{BlobStore, MetaStore},
    types::{Block, IngestOutcome, Log},
};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// The `eth_getLogs`-equivalent finalized index, as consumed by the
/// embedding service.
#[async_trait::async_trait]
pub trait FinalizedLogIndex: Send + Sync {
    /// Ingest the next finalized block.
    async fn ingest_finalized_block(&self, block: Block) -> Result<IngestOutcome>;

    /// Query finalized logs.
    async fn query_finalized(&self, filter: LogFilter, options: QueryOptions)
        -> Result<Vec<Log>>;

    /// The highest finalized block visible to queries.
    async fn indexed_finalized_head(&self) -> Result<u64>;

    /// The service health report.
    async fn health(&self) -> HealthReport;
}

/// The assembled index service over a MetaStore/BlobStore pair.
#[derive(Debug)]
pub struct LogIndexService<M, B> {
    config: Config,
    meta: Arc<M>,
    blob: Arc<B>,
    ingest: IngestEngine<M, B>,
    query: QueryEngine<M, B>,
    gc: GcWorker<M, B>,
    cache: Arc<StreamCache>,
    service: Arc<ServiceState>,
    counters: Arc<Counters>,
    backlog: Arc<GcBacklog>,
    writer_epoch: AtomicU64,
    lease: Option<Arc<LeaseManager<M>>>,
}

impl<M: MetaStore, B: BlobStore> LogIndexService<M, B> {
    /// Assemble a service with a fixed writer epoch (no lease manager).
    pub fn new(config: Config, meta: M, blob: B, writer_epoch: u64) -> Self {
        let meta = Arc::new(meta);
        let blob = Arc::new(blob);
        let service = Arc::new(ServiceState::default());
        let counters = Arc::new(Counters::default());
        let backlog = Arc::new(GcBacklog::default());
        let cache = Arc::new(StreamCache::new(&config.cache));

        let ingest = IngestEngine::new(
            config.clone(),
            Arc::clone(&meta),
            Arc::clone(&blob),
            Arc::clone(&service),
            Arc::clone(&counters),
        );
        let query = QueryEngine::new(
            config.clone(),
            Arc::clone(&meta),
            Arc::clone(&blob),
            Arc::clone(&cache),
            Arc::clone(&service),
            Arc::clone(&counters),
        );
        let gc = GcWorker::new(
            config.clone(),
            Arc::clone(&meta),
            Arc::clone(&blob),
            Arc::clone(&service),
            Arc::clone(&counters),
            Arc::clone(&backlog),
        );

        Self {
            config,
            meta,
            blob,
            ingest,
            query,
            gc,
            cache,
            service,
            counters,
            backlog,
            writer_epoch: AtomicU64::new(writer_epoch),
            lease: None,
        }
    }

    /// Drive the writer epoch from a lease manager instead of a fixed
    /// value. The lease must be acquired before ingesting.
    pub fn with_lease(mut self, lease: Arc<LeaseManager<M>>) -> Self {
        self.lease = Some(lease);
        self
    }

    /// The writer epoch for the next mutation.
    fn current_epoch(&self) -> Result<u64> {
        match &self.lease {
            Some(lease) => lease.epoch().ok_or(Error::LeaseLost),
            None => Ok(self.writer_epoch.load(Ordering::Acquire)),
        }
    }

    /// Lazy startup recovery: snapshot, topic0 catalogs, warm streams.
    pub async fn bootstrap(&self) -> Result<Bootstrap> {
        recovery::bootstrap(&*self.meta, &self.cache, self.config.recovery.warm_streams).await
    }

    /// Flush dirty tails, seal aged streams and refresh the warm list.
    pub async fn run_periodic_maintenance(&self, now_unix: u64) -> Result<MaintenanceStats> {
        let epoch = self.current_epoch()?;
        self.ingest.run_periodic_maintenance(now_unix, epoch).await
    }

    /// Run one GC pass.
    pub async fn run_gc_once(&self) -> Result<GcStats> {
        let epoch = self.current_epoch()?;
        self.gc.run_once(epoch).await
    }

    /// Drive maintenance on the configured tail flush cadence until an
    /// error (or degraded mode) stops it. The core spawns no tasks; the
    /// embedder owns this future's lifetime.
    pub async fn run_maintenance_loop(&self) -> Result<()> {
        loop {
            tokio::time::sleep(self.config.tail.flush_interval).await;
            self.run_periodic_maintenance(unix_now()).await?;
        }
    }

    /// Shared runtime state, for embedders wiring their own probes.
    pub fn service_state(&self) -> Arc<ServiceState> {
        Arc::clone(&self.service)
    }

    /// The underlying MetaStore handle.
    pub fn meta_store(&self) -> Arc<M> {
        Arc::clone(&self.meta)
    }

    /// The underlying BlobStore handle.
    pub fn blob_store(&self) -> Arc<B> {
        Arc::clone(&self.blob)
    }

    /// Shared operation counters.
    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }
}

#[async_trait::async_trait]
impl<M: MetaStore, B: BlobStore> FinalizedLogIndex for LogIndexService<M, B> {
    async fn ingest_finalized_block(&self, block: Block) -> Result<IngestOutcome> {
        let epoch = self.current_epoch()?;
        if let Some(lease) = &self.lease {
            if !lease.is_held(unix_now()) {
                self.service.set_degraded("writer lease expired");
                return Err(Error::LeaseLost);
            }
        }
        self.ingest.ingest_finalized_block(&block, epoch).await
    }

    async fn query_finalized(
        &self,
        filter: LogFilter,
        options: QueryOptions,
    ) -> Result<Vec<Log>> {
        self.query.query_finalized(filter, options).await
    }

    async fn indexed_finalized_head(&self) -> Result<u64> {
        Ok(read_meta_state(&*self.meta)
            .await?
            .map_or(0, |(state, _)| state.indexed_finalized_head))
    }

    async fn health(&self) -> HealthReport {
        let lease_held = match &self.lease {
            Some(lease) => lease.is_held(unix_now()),
            None => true,
        };
        HealthReport {
            mode: self.service.mode(),
            reason: self.service.reason(),
            lease_held,
            gc_backlog: self.backlog.snapshot(),
            last_ingest_unix: self.service.last_ingest_unix(),
            counters: self.counters.snapshot(),
        }
    }
}
