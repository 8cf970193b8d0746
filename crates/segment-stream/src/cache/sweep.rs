//! Orphaned temporary file sweep.
//!
//! A fetch that is interrupted between writing `<entry>.part` and renaming it (process crash,
//! cancellation while writing, full disk) leaves the `.part` file behind. Nothing else ever
//! looks at those files again, so they are collected here:
//! - once when the segment cache is opened,
//! - and on demand by whoever owns the cache (e.g. a periodic housekeeping task).
//!
//! Only `.part` files older than a minimum age are removed so that a sweep running next to live
//! fetches does not pull a file out from under an in-flight write.
//!
//! Best-effort: unreadable directories and files are skipped and counted.

use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::{debug, trace};

use super::keys::PART_EXTENSION;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale `.part` files deleted.
    pub removed: usize,
    /// `.part` files younger than the minimum age (left alone).
    pub kept_fresh: usize,
    /// Directory entries or files that could not be inspected or removed.
    pub errors: usize,
}

/// Delete `.part` files under `root` whose modification time is older than `min_age`.
///
/// A missing `root` is not an error (nothing has been cached yet).
pub fn sweep_orphaned_parts(root: &Path, min_age: Duration) -> SweepReport {
    let mut report = SweepReport::default();
    let now = SystemTime::now();
    sweep_dir(root, min_age, now, &mut report);

    if report.removed > 0 || report.errors > 0 {
        debug!(
            root = %root.display(),
            removed = report.removed,
            kept_fresh = report.kept_fresh,
            errors = report.errors,
            "orphan sweep finished"
        );
    }
    report
}

fn sweep_dir(dir: &Path, min_age: Duration, now: SystemTime, report: &mut SweepReport) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            trace!("sweep: read_dir FAIL dir='{}' err='{}'", dir.display(), e);
            report.errors += 1;
            return;
        }
    };

    for entry in entries {
        let Ok(entry) = entry else {
            report.errors += 1;
            continue;
        };
        let path = entry.path();
        let Ok(ft) = entry.file_type() else {
            report.errors += 1;
            continue;
        };

        if ft.is_dir() {
            sweep_dir(&path, min_age, now, report);
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(PART_EXTENSION) {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        match age {
            Some(age) if age >= min_age => match fs::remove_file(&path) {
                Ok(()) => {
                    trace!("sweep: removed orphan path='{}'", path.display());
                    report.removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    trace!("sweep: remove FAIL path='{}' err='{}'", path.display(), e);
                    report.errors += 1;
                }
            },
            // Fresh, or mtime in the future / unreadable: leave it to a later sweep.
            _ => report.kept_fresh += 1,
        }
    }
}
