//! File layout: segments in number order plus a declared-size offset index.
//!
//! Declared sizes frequently describe the *encoded* article rather than the decoded payload, so
//! the cumulative offsets built here are only a search hint. The streamer uses them to pick a
//! starting segment and then walks real on-disk sizes from there.

use std::sync::Arc;

use crate::error::{StreamError, StreamResult};
use crate::model::{FileKey, ManifestRow, SegmentLocator};

/// Where a verified walk starts: a segment index and the hinted offset of that segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOrigin {
    pub index: usize,
    pub offset: u64,
}

impl WalkOrigin {
    /// The first segment at real offset zero.
    pub const START: WalkOrigin = WalkOrigin {
        index: 0,
        offset: 0,
    };
}

/// Segments of one logical file sorted by number, with declared-size offsets.
#[derive(Debug, Clone)]
pub struct FileLayout {
    file: FileKey,
    segments: Vec<SegmentLocator>,
    offsets: Vec<u64>,
    declared_total: u64,
}

impl FileLayout {
    /// Sort `rows` by segment number and build the cumulative declared-size index.
    ///
    /// Duplicate numbers are kept in manifest order. Negative declared sizes are rejected.
    pub fn build(file: &FileKey, mut rows: Vec<ManifestRow>) -> StreamResult<Self> {
        rows.sort_by_key(|r| r.number);

        let mut segments = Vec::with_capacity(rows.len());
        let mut offsets = Vec::with_capacity(rows.len());
        let mut off: u64 = 0;

        for row in rows {
            let declared_size = u64::try_from(row.declared_size).map_err(|_| {
                StreamError::InvalidManifest(format!(
                    "segment {} of {} declares negative size {}",
                    row.number, file, row.declared_size
                ))
            })?;

            offsets.push(off);
            off = off.checked_add(declared_size).ok_or_else(|| {
                StreamError::InvalidManifest(format!("declared sizes of {file} overflow u64"))
            })?;

            segments.push(SegmentLocator {
                file: file.clone(),
                number: row.number,
                declared_size,
                message_id: Arc::from(row.message_id.trim()),
            });
        }

        Ok(Self {
            file: file.clone(),
            segments,
            offsets,
            declared_total: off,
        })
    }

    pub fn file(&self) -> &FileKey {
        &self.file
    }

    pub fn segments(&self) -> &[SegmentLocator] {
        &self.segments
    }

    /// Declared start offset of every segment (same indices as [`FileLayout::segments`]).
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// Sum of declared sizes. Not the decoded length of the file.
    pub fn declared_total(&self) -> u64 {
        self.declared_total
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Index of the first segment whose declared span ends after `start`.
    ///
    /// Returns `len()` when `start` is at or beyond the declared total.
    pub fn hint_index(&self, start: u64) -> usize {
        let n = self.segments.len();
        if n == 0 {
            return 0;
        }
        // offsets[i + 1] is the declared end of segment i; the last one ends at the total.
        let p = self.offsets[1..].partition_point(|&next| next <= start);
        if p + 1 == n && self.declared_total <= start {
            n
        } else {
            p
        }
    }

    /// Hinted index for `start`, rewound by `backtrack` segments and clamped at zero.
    pub fn walk_origin(&self, start: u64, backtrack: usize) -> WalkOrigin {
        let index = self
            .hint_index(start)
            .min(self.segments.len())
            .saturating_sub(backtrack);
        let offset = self
            .offsets
            .get(index)
            .copied()
            .unwrap_or(self.declared_total);
        WalkOrigin { index, offset }
    }
}
