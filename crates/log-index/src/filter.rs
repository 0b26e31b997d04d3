//! Filter criteria for `eth_getLogs`-equivalent queries.

use crate::types::Log;
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// A single filter clause over one value position.
///
/// `Any` is a wildcard, `One` an equality match and `Or` matches any value
/// in the list. An absent clause (`None` in [`LogFilter`]) is also a
/// wildcard; `Any` exists so callers can express it explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Clause<T> {
    /// Matches every value at this position.
    Any,
    /// Matches exactly one value.
    One(T),
    /// Matches any value in the list.
    Or(Vec<T>),
}

impl<T: Clone + PartialEq> Clause<T> {
    /// The number of OR terms this clause contributes to the planner
    /// guardrail. Wildcards contribute none.
    pub fn or_terms(&self) -> usize {
        match self {
            Self::Any => 0,
            Self::One(_) => 1,
            Self::Or(values) => values.len(),
        }
    }

    /// The concrete values this clause constrains to. Empty for wildcards.
    pub fn values(&self) -> Vec<T> {
        match self {
            Self::Any => Vec::new(),
            Self::One(value) => vec![value.clone()],
            Self::Or(values) => values.clone(),
        }
    }

    /// Whether the given value satisfies the clause.
    pub fn matches(&self, value: Option<&T>) -> bool {
        match self {
            Self::Any => true,
            Self::One(want) => value == Some(want),
            Self::Or(wants) => value.is_some_and(|v| wants.contains(v)),
        }
    }
}

/// Filter criteria for a finalized log query.
///
/// `block_hash` is mutually exclusive with `from_block`/`to_block`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    /// First block of the queried range (inclusive). Defaults to 0.
    pub from_block: Option<u64>,
    /// Last block of the queried range (inclusive). Defaults to the
    /// indexed finalized head.
    pub to_block: Option<u64>,
    /// Restrict the query to a single block identified by hash.
    pub block_hash: Option<B256>,
    /// Address clause.
    pub address: Option<Clause<Address>>,
    /// Event signature (`topics[0]`) clause.
    pub topic0: Option<Clause<B256>>,
    /// `topics[1]` clause.
    pub topic1: Option<Clause<B256>>,
    /// `topics[2]` clause.
    pub topic2: Option<Clause<B256>>,
    /// `topics[3]` clause.
    pub topic3: Option<Clause<B256>>,
}

impl LogFilter {
    /// The widest OR-list across all clauses, for the planner guardrail.
    pub fn max_or_terms(&self) -> usize {
        let mut max_terms = self.address.as_ref().map_or(0, Clause::or_terms);
        for clause in [&self.topic0, &self.topic1, &self.topic2, &self.topic3]
            .into_iter()
            .flatten()
        {
            max_terms = max_terms.max(clause.or_terms());
        }
        max_terms
    }

    /// Exact, per-log filter evaluation. This is the final arbiter applied
    /// after index candidates are materialized; the index may only ever
    /// over-approximate it.
    pub fn matches_log(&self, log: &Log) -> bool {
        if let Some(clause) = &self.address {
            if !clause.matches(Some(&log.address)) {
                return false;
            }
        }
        let topic_clauses = [&self.topic0, &self.topic1, &self.topic2, &self.topic3];
        topic_clauses
            .into_iter()
            .enumerate()
            .all(|(position, clause)| match clause {
                None => true,
                Some(clause) => clause.matches(log.topic(position)),
            })
    }
}

/// Execution options accompanying a query.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Emit at most this many results. The emitted results are the smallest
    /// by `(block_num, tx_idx, log_idx)` within the matching set.
    pub max_results: Option<usize>,
    /// Best-effort execution deadline, checked between bitmap operations
    /// and point reads.
    pub deadline: Option<Instant>,
}
