//! Error taxonomy for the finalized log index.
//!
//! Errors split into three families: caller mistakes (`InvalidParams`,
//! `QueryTooBroad`, `BlockNotFound`), backend conditions (`BackendTransient`
//! is retryable, `Backend` is not), and non-recoverable invariant violations
//! (`Corruption`, `FenceRejected`, lost CAS) that move the service into the
//! fail-closed degraded mode.

/// Errors that can occur while ingesting into or querying the log index.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request is malformed, e.g. `blockHash` combined with a block range.
    #[error("invalid params: {0}")]
    InvalidParams(&'static str),

    /// The block referenced by `blockHash` is not part of the finalized index.
    #[error("block not found")]
    BlockNotFound,

    /// An OR-list exceeded the planner guardrail and the configured action is
    /// to reject the query.
    #[error("query too broad: clause has {actual} OR terms, max allowed is {max}")]
    QueryTooBroad {
        /// The number of OR terms in the widest clause.
        actual: usize,
        /// The configured guardrail.
        max: usize,
    },

    /// The query deadline elapsed before execution finished. Partial results
    /// are discarded.
    #[error("query deadline exceeded")]
    DeadlineExceeded,

    /// A block arrived out of order: not the immediate successor of the
    /// indexed head, or with a parent that does not link to it.
    ///
    /// The ingest path reports this condition as
    /// [`IngestOutcome::Rejected`](crate::types::IngestOutcome::Rejected);
    /// the variant exists for callers that surface it as an error.
    #[error("ordering violation: expected block {expected}, got {got}")]
    OrderingViolation {
        /// The block number the index expects next.
        expected: u64,
        /// The block number that was submitted.
        got: u64,
    },

    /// A block with a different hash appeared at an already-finalized
    /// height.
    ///
    /// The ingest path reports this condition as
    /// [`IngestOutcome::FinalityViolation`](crate::types::IngestOutcome::FinalityViolation)
    /// and latches degraded mode; the variant exists for callers that
    /// surface it as an error.
    #[error("finality violation at block {block_num}")]
    FinalityViolation {
        /// The already-finalized height the conflicting block arrived at.
        block_num: u64,
    },

    /// A mutating operation carried a writer epoch that is no longer current.
    #[error("stale fence: epoch {epoch} is not the current writer epoch")]
    FenceRejected {
        /// The stale epoch the operation carried.
        epoch: u64,
    },

    /// The writer lease could not be acquired because another holder owns it.
    #[error("writer lease held by {holder} until {expires_unix}")]
    LeaseHeld {
        /// Identity of the current holder.
        holder: String,
        /// Unix seconds at which the current lease expires.
        expires_unix: u64,
    },

    /// The writer lease was lost; the current block is aborted.
    #[error("writer lease lost")]
    LeaseLost,

    /// Persisted data failed validation: checksum mismatch, unsupported codec
    /// version, or a manifest referencing a missing chunk.
    #[error("corrupt index data: {0}")]
    Corruption(String),

    /// A value failed to decode.
    #[error("decode error: {0}")]
    Decode(&'static str),

    /// The backend reported a retryable failure.
    #[error("transient backend error: {0}")]
    BackendTransient(String),

    /// The backend reported a permanent failure (or exhausted the retry
    /// budget for a transient one).
    #[error("backend error: {0}")]
    Backend(String),

    /// A GC backlog cap was exceeded. Depending on the configured guardrail
    /// action the service throttles or fails closed.
    #[error("gc guardrail exceeded: {0}")]
    GuardrailExceeded(&'static str),

    /// The service is in fail-closed degraded mode.
    #[error("service degraded: {0}")]
    Degraded(String),

    /// The service is throttled by a GC guardrail.
    #[error("service throttled: {0}")]
    Throttled(String),

    /// An internal invariant was violated. Under the single-writer contract
    /// these indicate a misconfigured deployment (two writers) or a bug.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the operation may be retried with backoff.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendTransient(_))
    }

    /// Whether this error indicates corrupt persisted state. Corruption
    /// encountered through a manifest reference degrades the service.
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_) | Self::Decode(_))
    }
}

/// Result type for log index operations.
pub type Result<T> = std::result::Result<T, Error>;
