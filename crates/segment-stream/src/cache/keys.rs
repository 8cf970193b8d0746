//! Segment cache key utilities.
//!
//! Every segment maps to one deterministic path under the segment root:
//!
//! `<segment_root>/<file_dir>/<file_index>/<number:06>_<message_hash>.bin`
//!
//! - `file_dir` is the sanitized `file_id` followed by a short hash of the raw identifier, so it
//!   is always a single, harmless path component and distinct ids never share a directory.
//! - `message_hash` is the first 6 bytes of SHA-256 over the message identifier, hex encoded.
//!   Re-imports that renumber segments or swap articles therefore never hit a stale entry.
//! - While a fetch is in flight the payload lives next to the entry with a `.part` suffix.
//! - A segment that decoded to zero bytes is recorded by an `.empty` marker next to its (empty)
//!   entry.
//!
//! This module does **not** perform any IO.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::trace;

use crate::model::SegmentLocator;

/// Extension of complete cache entries.
pub const ENTRY_EXTENSION: &str = "bin";

/// Extension of in-flight temporary files.
pub const PART_EXTENSION: &str = "part";

/// Suffix of the marker recording a zero-length decoded segment.
pub const EMPTY_EXTENSION: &str = "empty";

const MESSAGE_HASH_BYTES: usize = 6;
const FILE_HASH_BYTES: usize = 4;

fn short_hash(s: &str, bytes: usize) -> String {
    let digest = Sha256::digest(s.as_bytes());
    digest[..bytes].iter().map(|b| format!("{b:02x}")).collect()
}

/// Short hex digest of a message identifier.
pub fn message_hash(message_id: &str) -> String {
    short_hash(message_id, MESSAGE_HASH_BYTES)
}

/// Directory name for all entries of `file_id`: `<sanitized>-<hash of the raw id>`.
pub fn file_dir_name(file_id: &str) -> String {
    format!(
        "{}-{}",
        sanitize_component(file_id),
        short_hash(file_id, FILE_HASH_BYTES)
    )
}

/// Final on-disk path of the cache entry for `seg`.
pub fn segment_entry_path(segment_root: &Path, seg: &SegmentLocator) -> PathBuf {
    let name = format!(
        "{:06}_{}.{}",
        seg.number,
        message_hash(&seg.message_id),
        ENTRY_EXTENSION
    );
    let path = segment_root
        .join(file_dir_name(&seg.file.file_id))
        .join(seg.file.file_index.to_string())
        .join(name);
    trace!(
        "cache_key: entry path derived file='{}' seg={} path='{}'",
        seg.file,
        seg.number,
        path.display()
    );
    path
}

/// Temporary path used while the entry at `entry` is being written.
pub fn part_path(entry: &Path) -> PathBuf {
    with_suffix(entry, PART_EXTENSION)
}

/// Marker written once the entry at `entry` is known to be a zero-length segment.
pub fn empty_marker_path(entry: &Path) -> PathBuf {
    with_suffix(entry, EMPTY_EXTENSION)
}

fn with_suffix(entry: &Path, ext: &str) -> PathBuf {
    let mut os = entry.as_os_str().to_owned();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

/// Map an arbitrary identifier to a single safe path component.
fn sanitize_component(s: &str) -> String {
    let clean: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    // `.` and `..` survive the character filter but must never be used as a component.
    if clean.is_empty() || clean.chars().all(|c| c == '.') {
        return "_".repeat(clean.len().max(1));
    }
    clean
}
