//! Writer lease management.
//!
//! Exactly one writer may ingest at a time. The lease is a CAS-updated
//! record in the MetaStore; acquiring it bumps the writer epoch, and every
//! subsequent mutation carries that epoch as its fence. The lease manager
//! is the fencing authority: construct it over the raw backend, not over a
//! [`FencedMetaStore`](crate::store::FencedMetaStore) (whose epoch cell it
//! feeds).

use crate::{
    codec::Reader,
    config::LeaseConfig,
    error::{Error, Result},
    keys::LEASE_KEY,
    store::{EpochCell, FenceToken, MetaStore, PutCond, PutOutcome},
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// A held (or observed) lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    /// The writer epoch this lease grants.
    pub epoch: u64,
    /// Unix seconds at which the lease lapses unless renewed.
    pub expires_unix: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LeaseRecord {
    epoch: u64,
    expires_unix: u64,
    holder: String,
}

fn encode_lease(record: &LeaseRecord) -> Bytes {
    let holder = record.holder.as_bytes();
    let mut out = Vec::with_capacity(18 + holder.len());
    out.push(crate::codec::CODEC_V1);
    out.extend_from_slice(&record.epoch.to_be_bytes());
    out.extend_from_slice(&record.expires_unix.to_be_bytes());
    out.push(holder.len() as u8);
    out.extend_from_slice(holder);
    Bytes::from(out)
}

fn decode_lease(bytes: &[u8]) -> Result<LeaseRecord> {
    let mut reader = Reader::versioned(bytes, "lease")?;
    let epoch = reader.u64()?;
    let expires_unix = reader.u64()?;
    let holder_len = reader.u8()? as usize;
    let holder = String::from_utf8(reader.take(holder_len)?.to_vec())
        .map_err(|_| Error::Decode("lease holder not utf8"))?;
    reader.finish()?;
    Ok(LeaseRecord { epoch, expires_unix, holder })
}

#[derive(Debug)]
struct Held {
    epoch: u64,
    expires_unix: u64,
    version: u64,
}

/// Acquires and renews the writer lease, bumping the epoch on takeover.
#[derive(Debug)]
pub struct LeaseManager<M> {
    meta: Arc<M>,
    config: LeaseConfig,
    holder: String,
    epoch_cell: Arc<EpochCell>,
    held: Mutex<Option<Held>>,
}

impl<M: MetaStore> LeaseManager<M> {
    /// Create a manager for the given holder identity.
    pub fn new(meta: Arc<M>, config: LeaseConfig, holder: impl Into<String>) -> Self {
        Self {
            meta,
            config,
            holder: holder.into(),
            epoch_cell: Arc::new(EpochCell::default()),
            held: Mutex::new(None),
        }
    }

    /// The epoch cell to share with fencing gateways.
    pub fn epoch_cell(&self) -> Arc<EpochCell> {
        Arc::clone(&self.epoch_cell)
    }

    /// The epoch currently held, if any.
    pub fn epoch(&self) -> Option<u64> {
        self.held.lock().as_ref().map(|held| held.epoch)
    }

    /// Whether the lease is held and unexpired at `now_unix`.
    pub fn is_held(&self, now_unix: u64) -> bool {
        self.held.lock().as_ref().is_some_and(|held| held.expires_unix > now_unix)
    }

    /// Acquire the lease, bumping the writer epoch.
    ///
    /// Fails with [`Error::LeaseHeld`] while another holder's lease is
    /// unexpired, and with [`Error::LeaseLost`] if the CAS races another
    /// acquirer.
    pub async fn acquire(&self, now_unix: u64) -> Result<Lease> {
        let current = self.meta.get(LEASE_KEY).await?;
        let (cond, next_epoch) = match &current {
            None => (PutCond::IfAbsent, 1),
            Some(record) => {
                let lease = decode_lease(&record.value)?;
                if lease.holder != self.holder && lease.expires_unix > now_unix {
                    return Err(Error::LeaseHeld {
                        holder: lease.holder,
                        expires_unix: lease.expires_unix,
                    });
                }
                (PutCond::IfVersion(record.version), lease.epoch + 1)
            }
        };

        let expires_unix = now_unix + self.config.ttl.as_secs();
        let record =
            LeaseRecord { epoch: next_epoch, expires_unix, holder: self.holder.clone() };
        let outcome = self
            .meta
            .put(LEASE_KEY, encode_lease(&record), cond, FenceToken(next_epoch))
            .await?;
        let PutOutcome::Applied { version } = outcome else {
            return Err(Error::LeaseLost);
        };

        info!(
            target: "log_index::lease",
            epoch = next_epoch,
            holder = %self.holder,
            expires_unix,
            "acquired writer lease"
        );
        self.epoch_cell.raise(next_epoch);
        *self.held.lock() = Some(Held { epoch: next_epoch, expires_unix, version });
        Ok(Lease { epoch: next_epoch, expires_unix })
    }

    /// Renew the held lease, extending its expiry.
    ///
    /// Fails with [`Error::LeaseLost`] if the lease record moved underneath
    /// (another writer took over) or nothing is held.
    pub async fn renew(&self, now_unix: u64) -> Result<Lease> {
        let (epoch, version) = {
            let held = self.held.lock();
            let held = held.as_ref().ok_or(Error::LeaseLost)?;
            (held.epoch, held.version)
        };

        let expires_unix = now_unix + self.config.ttl.as_secs();
        let record = LeaseRecord { epoch, expires_unix, holder: self.holder.clone() };
        let outcome = self
            .meta
            .put(LEASE_KEY, encode_lease(&record), PutCond::IfVersion(version), FenceToken(epoch))
            .await?;
        match outcome {
            PutOutcome::Applied { version } => {
                *self.held.lock() = Some(Held { epoch, expires_unix, version });
                Ok(Lease { epoch, expires_unix })
            }
            PutOutcome::NotApplied { .. } => {
                warn!(target: "log_index::lease", epoch, "lease renewal lost the CAS");
                *self.held.lock() = None;
                Err(Error::LeaseLost)
            }
        }
    }

    /// Drop the held lease without touching the record; a successor will
    /// take over once it expires.
    pub fn abandon(&self) {
        *self.held.lock() = None;
    }
}
