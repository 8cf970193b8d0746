//! Bounded background warm-up of upcoming segments.
//!
//! The streamer hands segments it expects to need soon to [`Prefetcher::submit`]. Submission
//! never waits: when every slot of the gate is taken the segment is dropped and the foreground
//! path carries on. Accepted segments are fetched on a detached task that:
//! - has its own cancellation token and a bounded lifetime (`prefetch_timeout`), so it neither
//!   follows nor blocks the request that triggered it;
//! - holds its gate permit for its whole life and releases it however it ends.
//!
//! Background fetches go through [`SegmentCache::ensure`], so they share the single-flight with
//! foreground reads of the same segment.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::cache::SegmentCache;
use crate::model::SegmentLocator;
use crate::settings::StreamerSettings;

/// Outcome of [`Prefetcher::submit`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A slot was free; the segment is being fetched in the background.
    Accepted,
    /// Every slot was busy; nothing was started.
    Dropped,
}

/// Fixed-capacity gate in front of background segment fetches.
#[derive(Clone)]
pub struct Prefetcher {
    cache: Arc<SegmentCache>,
    gate: Arc<Semaphore>,
    capacity: usize,
    timeout: Duration,
}

impl Prefetcher {
    pub fn new(cache: Arc<SegmentCache>, settings: &StreamerSettings) -> Self {
        Self {
            cache,
            gate: Arc::new(Semaphore::new(settings.prefetch_capacity)),
            capacity: settings.prefetch_capacity,
            timeout: settings.prefetch_timeout,
        }
    }

    /// Start a background fetch of `seg` if a slot is free.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, seg: SegmentLocator) -> Submission {
        let permit = match self.gate.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(
                    file_id = %seg.file.file_id,
                    file_index = seg.file.file_index,
                    seg = seg.number,
                    "prefetch dropped: no free slot"
                );
                return Submission::Dropped;
            }
        };

        let cache = self.cache.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let _permit = permit;
            let cancel = CancellationToken::new();
            match tokio::time::timeout(timeout, cache.ensure(&seg, &cancel)).await {
                Ok(Ok(_)) => trace!("prefetch: done file='{}' seg={}", seg.file, seg.number),
                Ok(Err(e)) => debug!(
                    file_id = %seg.file.file_id,
                    seg = seg.number,
                    error = %e,
                    "prefetch failed"
                ),
                Err(_) => debug!(
                    file_id = %seg.file.file_id,
                    seg = seg.number,
                    timeout_ms = timeout.as_millis() as u64,
                    "prefetch timed out"
                ),
            }
        });
        Submission::Accepted
    }

    /// Slots currently free.
    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for Prefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefetcher")
            .field("capacity", &self.capacity)
            .field("available", &self.available_slots())
            .field("timeout", &self.timeout)
            .finish()
    }
}
