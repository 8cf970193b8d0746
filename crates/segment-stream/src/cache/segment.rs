//! On-disk cache of decoded segments.
//!
//! [`SegmentCache::ensure`] guarantees that a complete, decoded copy of a segment exists under
//! its deterministic path (see [`super::keys`]) and returns that path.
//!
//! Protocol:
//! - A non-empty file under the final name is a complete entry. So is an empty one with an
//!   `.empty` marker next to it (a segment that decoded to zero bytes). Complete entries are
//!   returned without locking.
//! - Otherwise the caller joins the single-flight for that path. The winner re-checks the entry,
//!   checks a session out of the pool, fetches the article body, decodes it and writes the
//!   payload to `<entry>.part`, then renames it into place. Waiters find the entry on their
//!   re-check and return without touching the network.
//! - The eviction hook runs after every new entry; its errors are only logged.
//!
//! Any failure leaves no entry under the final name. Waiting for the flight, the pool and the
//! network all race the caller's [`CancellationToken`].

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::keys::{empty_marker_path, part_path, segment_entry_path};
use super::locks::LockTable;
use super::sweep::{SweepReport, sweep_orphaned_parts};
use crate::error::{FetchError, StreamError, StreamResult};
use crate::model::SegmentLocator;
use crate::settings::StreamerSettings;
use crate::traits::{ArticleDecoder, ArticleSession, CacheEvictor, SessionPool};

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    /// `ensure` calls answered by an existing entry (including after waiting on a flight).
    pub hits: u64,
    /// Completed fetch + decode + write cycles.
    pub fetches: u64,
    /// Fetch attempts that failed (cancellations excluded).
    pub failures: u64,
}

#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    fetches: AtomicU64,
    failures: AtomicU64,
}

/// Single-flight, write-then-rename cache of decoded segments.
pub struct SegmentCache {
    segment_root: PathBuf,
    max_cache_bytes: u64,
    orphan_part_min_age: Duration,
    pool: Arc<dyn SessionPool>,
    decoder: Arc<dyn ArticleDecoder>,
    evictor: Arc<dyn CacheEvictor>,
    locks: LockTable<PathBuf>,
    stats: CacheStats,
}

impl SegmentCache {
    /// Open the cache described by `settings`.
    ///
    /// Creates the segment root if needed and sweeps `.part` files left behind by earlier runs.
    pub fn open(
        settings: &StreamerSettings,
        pool: Arc<dyn SessionPool>,
        decoder: Arc<dyn ArticleDecoder>,
        evictor: Arc<dyn CacheEvictor>,
    ) -> StreamResult<Self> {
        let segment_root = settings.segment_root();
        std::fs::create_dir_all(&segment_root)
            .map_err(|e| StreamError::from(e).with_context("creating segment cache root"))?;

        let cache = Self {
            segment_root,
            max_cache_bytes: settings.max_cache_bytes,
            orphan_part_min_age: settings.orphan_part_min_age,
            pool,
            decoder,
            evictor,
            locks: LockTable::new(),
            stats: CacheStats::default(),
        };
        cache.sweep_orphans();
        Ok(cache)
    }

    /// Directory holding all segment entries.
    pub fn segment_root(&self) -> &Path {
        &self.segment_root
    }

    /// Final path of the entry for `seg` (whether or not it exists yet).
    pub fn entry_path(&self, seg: &SegmentLocator) -> PathBuf {
        segment_entry_path(&self.segment_root, seg)
    }

    /// Size of the complete entry for `seg`, or `None` when there is no complete entry.
    ///
    /// `Some(0)` is a segment known to decode to nothing.
    pub async fn cached_len(&self, seg: &SegmentLocator) -> Option<u64> {
        complete_len(&self.entry_path(seg)).await
    }

    /// [`Self::cached_len`] for every segment of `segs`, in order, checked on one blocking task.
    pub async fn cached_sizes(&self, segs: &[SegmentLocator]) -> StreamResult<Vec<Option<u64>>> {
        let paths: Vec<PathBuf> = segs.iter().map(|seg| self.entry_path(seg)).collect();
        tokio::task::spawn_blocking(move || paths.iter().map(|p| entry_len(p)).collect())
            .await
            .map_err(|e| {
                StreamError::from(io::Error::other(e)).with_context("checking cached segment sizes")
            })
    }

    /// Remove stale `.part` files under the segment root.
    pub fn sweep_orphans(&self) -> SweepReport {
        sweep_orphaned_parts(&self.segment_root, self.orphan_part_min_age)
    }

    /// Number of cache paths with an active or pending flight.
    pub fn flights_in_progress(&self) -> usize {
        self.locks.len()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            fetches: self.stats.fetches.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }

    /// Make sure a complete entry for `seg` exists on disk and return its path.
    pub async fn ensure(
        &self,
        seg: &SegmentLocator,
        cancel: &CancellationToken,
    ) -> StreamResult<PathBuf> {
        let path = self.entry_path(seg);
        if complete_len(&path).await.is_some() {
            trace!("cache: HIT file='{}' seg={}", seg.file, seg.number);
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let _flight = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            guard = self.locks.acquire(path.clone()) => guard,
        };

        // Another flight may have finished while we were waiting.
        if complete_len(&path).await.is_some() {
            trace!(
                "cache: HIT after wait file='{}' seg={}",
                seg.file, seg.number
            );
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(path);
        }

        trace!("cache: MISS file='{}' seg={}", seg.file, seg.number);
        match self.fill(seg, &path, cancel).await {
            Ok(()) => {
                self.stats.fetches.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self
                    .evictor
                    .enforce_limit(&self.segment_root, self.max_cache_bytes)
                {
                    debug!(error = %e, "cache size enforcement failed (ignored)");
                }
                Ok(path)
            }
            Err(e) => {
                if !e.is_cancelled() {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                }
                Err(e)
            }
        }
    }

    async fn fill(
        &self,
        seg: &SegmentLocator,
        path: &Path,
        cancel: &CancellationToken,
    ) -> StreamResult<()> {
        let payload = self.fetch_and_decode(seg, cancel).await?;
        persist_atomically(path, &payload).await?;
        if payload.is_empty() {
            debug!(
                file_id = %seg.file.file_id,
                seg = seg.number,
                "segment decoded to zero bytes, recording empty entry"
            );
            // Without the marker the entry only costs a refetch next time.
            if let Err(e) = tokio::fs::write(empty_marker_path(path), b"").await {
                debug!(error = %e, "writing empty entry marker failed (ignored)");
            }
        }
        Ok(())
    }

    async fn fetch_and_decode(
        &self,
        seg: &SegmentLocator,
        cancel: &CancellationToken,
    ) -> StreamResult<Bytes> {
        let session = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            res = self.pool.acquire() => res?,
        };
        let mut session = PooledSession::new(self.pool.as_ref(), session);

        debug!(
            file_id = %seg.file.file_id,
            file_index = seg.file.file_index,
            seg = seg.number,
            "fetching segment"
        );
        let lines = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            res = session.fetch_body(&seg.message_id) => res?,
        };
        drop(session);

        let data = self.decoder.decode(&lines)?;
        debug!(
            file_id = %seg.file.file_id,
            file_index = seg.file.file_index,
            seg = seg.number,
            decoded = data.len(),
            declared = seg.declared_size,
            "segment decoded"
        );
        Ok(data)
    }
}

/// Write `data` to `<path>.part` and rename it to `path`.
///
/// On failure the temporary file is removed (best-effort) and nothing appears under `path`.
async fn persist_atomically(path: &Path, data: &[u8]) -> io::Result<()> {
    let part = part_path(path);
    let res = async {
        let mut file = tokio::fs::File::create(&part).await?;
        file.write_all(data).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&part, path).await
    }
    .await;

    if let Err(e) = res {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(e);
    }
    Ok(())
}

async fn complete_len(path: &Path) -> Option<u64> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || entry_len(&path))
        .await
        .ok()
        .flatten()
}

fn entry_len(path: &Path) -> Option<u64> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Some(meta.len()),
        Ok(meta) if meta.is_file() && empty_marker_path(path).is_file() => Some(0),
        _ => None,
    }
}

/// A checked-out session that goes back to its pool when dropped.
struct PooledSession<'a> {
    pool: &'a dyn SessionPool,
    session: Option<Box<dyn ArticleSession>>,
}

impl<'a> PooledSession<'a> {
    fn new(pool: &'a dyn SessionPool, session: Box<dyn ArticleSession>) -> Self {
        Self {
            pool,
            session: Some(session),
        }
    }

    async fn fetch_body(&mut self, message_id: &str) -> Result<Vec<Bytes>, FetchError> {
        match self.session.as_mut() {
            Some(session) => session.fetch_body(message_id).await,
            // Only `Drop` takes the session out.
            None => Err(FetchError::PoolExhausted),
        }
    }
}

impl Drop for PooledSession<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.release(session);
        }
    }
}
