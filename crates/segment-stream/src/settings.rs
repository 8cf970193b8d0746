//! Unified configuration for the `segment-stream` crate.
//!
//! A single flat structure covers every tunable of the engine:
//! - Cache placement and size limit (handed to the eviction hook)
//! - Background prefetch (gate capacity, per-task timeout, default fan-out)
//! - Range resolution (manifest timeout, backtrack windows for both drift modes)
//! - Housekeeping (age after which leftover `.part` files are considered orphaned)
//!
//! Construct with [`StreamerSettings::default`] and adjust with the consuming setters.

use std::path::PathBuf;
use std::time::Duration;

/// Unified settings for segment caching and range streaming.
#[derive(Debug, Clone)]
pub struct StreamerSettings {
    // ----------------------------
    // Cache
    // ----------------------------
    /// Root directory of the on-disk cache. Segment entries live under `<cache_dir>/rawseg`.
    /// Default: `<system temp>/segment-stream`.
    pub cache_dir: PathBuf,

    /// Size limit passed to the eviction hook after every newly written segment.
    /// Default: 20 GiB.
    pub max_cache_bytes: u64,

    /// `.part` files older than this are deleted by the orphan sweep.
    /// Default: 10 minutes.
    pub orphan_part_min_age: Duration,

    // ----------------------------
    // Prefetch
    // ----------------------------
    /// Number of background fetches that may run at once, process-wide.
    /// Default: 8.
    pub prefetch_capacity: usize,

    /// Upper bound for a single background fetch.
    /// Default: 20 seconds.
    pub prefetch_timeout: Duration,

    /// Segments to warm up after each delivered segment for requests built with
    /// [`crate::RangeRequest::with_defaults`]. [`crate::RangeRequest::new`] does not prefetch.
    /// Default: 8.
    pub default_prefetch_count: usize,

    // ----------------------------
    // Range resolution
    // ----------------------------
    /// Upper bound for loading a manifest.
    /// Default: 5 seconds.
    pub manifest_timeout: Duration,

    /// Segments to rewind from the hinted start in [`crate::DriftMode::Normal`].
    /// Default: 2.
    pub normal_backtrack: usize,

    /// Segments to rewind from the hinted start in [`crate::DriftMode::Wide`].
    /// Default: 24.
    pub wide_backtrack: usize,
}

impl Default for StreamerSettings {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("segment-stream"),
            max_cache_bytes: 20 * 1024 * 1024 * 1024,
            orphan_part_min_age: Duration::from_secs(10 * 60),

            prefetch_capacity: 8,
            prefetch_timeout: Duration::from_secs(20),
            default_prefetch_count: 8,

            manifest_timeout: Duration::from_secs(5),
            normal_backtrack: 2,
            wide_backtrack: 24,
        }
    }
}

impl StreamerSettings {
    /// Create default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings tuned for first-byte latency.
    /// - Less background work competing with the foreground fetch
    /// - Shorter bounds on background and manifest work
    pub fn low_latency(mut self) -> Self {
        self.prefetch_capacity = 4;
        self.default_prefetch_count = 2;
        self.prefetch_timeout = Duration::from_secs(10);
        self.manifest_timeout = Duration::from_secs(2);
        self
    }

    /// Directory that holds segment entries (`<cache_dir>/rawseg`).
    pub fn segment_root(&self) -> PathBuf {
        self.cache_dir.join("rawseg")
    }

    // -------------------------
    // Cache setters
    // -------------------------

    pub fn cache_dir(mut self, v: impl Into<PathBuf>) -> Self {
        self.cache_dir = v.into();
        self
    }

    pub fn max_cache_bytes(mut self, v: u64) -> Self {
        self.max_cache_bytes = v;
        self
    }

    pub fn orphan_part_min_age(mut self, v: Duration) -> Self {
        self.orphan_part_min_age = v;
        self
    }

    // -------------------------
    // Prefetch setters
    // -------------------------

    pub fn prefetch_capacity(mut self, v: usize) -> Self {
        self.prefetch_capacity = v;
        self
    }

    pub fn prefetch_timeout(mut self, v: Duration) -> Self {
        self.prefetch_timeout = v;
        self
    }

    pub fn default_prefetch_count(mut self, v: usize) -> Self {
        self.default_prefetch_count = v;
        self
    }

    // -------------------------
    // Range resolution setters
    // -------------------------

    pub fn manifest_timeout(mut self, v: Duration) -> Self {
        self.manifest_timeout = v;
        self
    }

    pub fn normal_backtrack(mut self, v: usize) -> Self {
        self.normal_backtrack = v;
        self
    }

    pub fn wide_backtrack(mut self, v: usize) -> Self {
        self.wide_backtrack = v;
        self
    }
}
