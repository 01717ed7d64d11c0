//! Per-stage lock registry.

use dashmap::DashMap;
use metrics::histogram;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Lock scope: one stage of one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageKey {
    pub order_id: Uuid,
    pub stage_number: u32,
}

impl StageKey {
    pub fn new(order_id: Uuid, stage_number: u32) -> Self {
        Self {
            order_id,
            stage_number,
        }
    }
}

/// Per-stage mutual exclusion for transitions.
///
/// Acquisition waits at most `timeout`. Entries nobody holds or waits on are
/// dropped once the registry grows past `prune_threshold`.
#[derive(Debug)]
pub struct StageLocks {
    locks: DashMap<StageKey, Arc<Mutex<()>>>,
    timeout: Duration,
    prune_threshold: usize,
}

/// Held for the duration of one stage transition.
#[derive(Debug)]
pub struct StageLockGuard {
    key: StageKey,
    acquired_at: Instant,
    _guard: OwnedMutexGuard<()>,
}

impl StageLockGuard {
    pub fn key(&self) -> StageKey {
        self.key
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }
}

impl StageLocks {
    pub fn new(timeout: Duration, prune_threshold: usize) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
            prune_threshold,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub async fn acquire(
        &self,
        order_id: Uuid,
        stage_number: u32,
    ) -> Result<StageLockGuard, ServiceError> {
        let key = StageKey::new(order_id, stage_number);
        let lock = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        if self.locks.len() > self.prune_threshold {
            self.prune_idle();
        }

        let started = Instant::now();
        match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
            Ok(guard) => {
                histogram!(
                    "production.stage.lock_wait_ms",
                    started.elapsed().as_secs_f64() * 1000.0
                );
                Ok(StageLockGuard {
                    key,
                    acquired_at: Instant::now(),
                    _guard: guard,
                })
            }
            Err(_) => {
                debug!(%order_id, stage_number, "stage lock wait timed out");
                Err(ServiceError::ConcurrencyTimeout {
                    order_id,
                    stage_number,
                })
            }
        }
    }

    /// Removes entries that no caller holds or is waiting on.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let removed = before.saturating_sub(self.locks.len());
        if removed > 0 {
            debug!(removed, "pruned idle stage locks");
        }
        removed
    }
}
