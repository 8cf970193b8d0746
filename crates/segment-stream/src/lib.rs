//! Segment cache and range streaming for media files spread across protocol articles.
//!
//! A logical file is the concatenation, in segment-number order, of the decoded payloads of
//! many small articles. Clients ask for byte ranges of that file; this crate turns a range into
//! a bounded set of article fetches, keeps every decoded segment in a persistent on-disk cache,
//! and writes exactly the requested bytes, in order, to an async sink.
//!
//! Guarantees:
//! - At most one fetch per segment is in flight at any time, no matter how many readers ask.
//! - Readers never observe half-written cache entries (write to `.part`, then rename).
//! - Declared segment sizes are only a search hint; offsets are computed from real decoded sizes.
//! - Speculative prefetch is bounded and never makes the foreground wait.
//! - A range past the end of the decoded file is an empty, successful stream.
//!
//! The crate is composed of several modules:
//! - `error`: Unified error types.
//! - `settings`: `StreamerSettings`, every tunable of the engine.
//! - `model`: File keys, manifest rows, segment locators, byte ranges, requests.
//! - `traits`: Manifest source, session pool, codec and eviction interfaces.
//! - `layout`: Declared-size offset index of one file.
//! - `cache`: Entry paths, single-flight locks, orphan sweep and `SegmentCache`.
//! - `prefetch`: Bounded background warm-up.
//! - `streamer`: `RangeStreamer`, the two-phase seek and copy.
//! - `range`: HTTP `Range` header helpers for callers.
//!
//! This file (`lib.rs`) acts as a facade: it re-exports the public API of the crate.

mod cache;
mod error;
mod layout;
mod model;
mod prefetch;
mod range;
mod settings;
mod streamer;
mod traits;

pub use crate::error::{DecodeError, FetchError, StreamError, StreamResult};
pub use crate::model::{ByteRange, DriftMode, FileKey, ManifestRow, RangeRequest, SegmentLocator};
pub use crate::settings::StreamerSettings;
pub use crate::traits::{
    ArticleDecoder, ArticleSession, CacheEvictor, ManifestSource, NoopEvictor, SessionPool,
};

pub use crate::layout::{FileLayout, WalkOrigin};

// Deterministic cache layout helpers
pub use crate::cache::keys::{
    empty_marker_path, file_dir_name, message_hash, part_path, segment_entry_path,
};
pub use crate::cache::locks::{FlightGuard, LockTable};
pub use crate::cache::sweep::sweep_orphaned_parts;
pub use crate::cache::{CacheStatsSnapshot, SegmentCache, SweepReport};

pub use crate::prefetch::{Prefetcher, Submission};
pub use crate::range::{RangeHeaderError, content_range, parse_range_header};
pub use crate::streamer::RangeStreamer;
