//! Persistent segment cache.
//!
//! - [`keys`]: deterministic entry paths (no IO).
//! - [`locks`]: per-path single-flight table.
//! - [`sweep`]: removal of `.part` files left by interrupted writes.
//! - [`segment`]: [`SegmentCache`], which ties the above to the session pool and decoder.

pub mod keys;
pub mod locks;
pub mod segment;
pub mod sweep;

pub use segment::{CacheStatsSnapshot, SegmentCache};
pub use sweep::SweepReport;
