//! Plain data types shared across the crate.

use std::fmt;
use std::sync::Arc;

use crate::error::{StreamError, StreamResult};
use crate::settings::StreamerSettings;

/// Identifies one logical file: a file inside an import.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileKey {
    /// Identifier of the import the file belongs to.
    pub file_id: Arc<str>,
    /// Position of the file inside its import.
    pub file_index: u32,
}

impl FileKey {
    pub fn new(file_id: impl Into<Arc<str>>, file_index: u32) -> Self {
        Self {
            file_id: file_id.into(),
            file_index,
        }
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.file_id, self.file_index)
    }
}

/// One manifest row as returned by a [`crate::ManifestSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    /// Segment number; determines the segment's position in the file.
    pub number: u32,
    /// Size announced by the manifest. Often the *encoded* size, so only a hint.
    pub declared_size: i64,
    /// Protocol message identifier of the article.
    pub message_id: String,
}

impl ManifestRow {
    pub fn new(number: u32, declared_size: i64, message_id: impl Into<String>) -> Self {
        Self {
            number,
            declared_size,
            message_id: message_id.into(),
        }
    }
}

/// Identifies one protocol article contributing a contiguous decoded span to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentLocator {
    pub file: FileKey,
    pub number: u32,
    pub declared_size: u64,
    pub message_id: Arc<str>,
}

/// Inclusive byte range `[start, end]` of the logical file view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    /// Create a range, rejecting `end < start` with [`StreamError::InvalidRange`].
    pub fn new(start: u64, end: u64) -> StreamResult<Self> {
        if end < start {
            return Err(StreamError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes covered by the range.
    ///
    /// `[0, u64::MAX]` covers 2^64 bytes, one more than `u64` holds; it reports `u64::MAX`.
    pub fn len(&self) -> u64 {
        (self.end - self.start).saturating_add(1)
    }

    /// Never true; a valid range covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// How far the streamer rewinds from the hinted start segment.
///
/// Declared sizes drift from decoded sizes; some posting tools drift much more than others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriftMode {
    /// Small rewind. Segments before the origin that are not cached yet count with their
    /// declared sizes, so the start offset is only an estimate until that prefix is cached.
    #[default]
    Normal,
    /// Large rewind. When any segment before the origin is not cached, the walk starts at the
    /// first uncached one instead, so every offset is a real one.
    Wide,
}

impl DriftMode {
    /// Backtrack window (in segments) configured for this mode.
    pub fn backtrack(self, settings: &StreamerSettings) -> usize {
        match self {
            DriftMode::Normal => settings.normal_backtrack,
            DriftMode::Wide => settings.wide_backtrack,
        }
    }

    /// Whether the walk must fetch uncached segments before the origin rather than trust their
    /// declared sizes.
    pub fn requires_exact_origin(self) -> bool {
        matches!(self, DriftMode::Wide)
    }
}

/// A single contiguous range request against one logical file.
#[derive(Debug, Clone)]
pub struct RangeRequest {
    pub file: FileKey,
    pub range: ByteRange,
    /// Number of segments after each delivered one to warm up in the background.
    pub prefetch_count: usize,
    pub drift: DriftMode,
}

impl RangeRequest {
    /// Request without prefetch in [`DriftMode::Normal`].
    pub fn new(file: FileKey, range: ByteRange) -> Self {
        Self {
            file,
            range,
            prefetch_count: 0,
            drift: DriftMode::Normal,
        }
    }

    /// Request that prefetches [`StreamerSettings::default_prefetch_count`] segments.
    pub fn with_defaults(file: FileKey, range: ByteRange, settings: &StreamerSettings) -> Self {
        Self::new(file, range).prefetch_count(settings.default_prefetch_count)
    }

    pub fn prefetch_count(mut self, v: usize) -> Self {
        self.prefetch_count = v;
        self
    }

    pub fn drift(mut self, v: DriftMode) -> Self {
        self.drift = v;
        self
    }
}
