//! Range streaming over cached segments.
//!
//! [`RangeStreamer::stream`] delivers the decoded bytes `[start, end]` of a logical file to any
//! `AsyncWrite` sink.
//!
//! Declared segment sizes are unreliable (they often describe the encoded article), so the
//! start segment is found in two phases:
//! 1. A coarse search over declared-size offsets picks a hinted segment, which is then rewound
//!    by the backtrack window of the request's [`DriftMode`] ([`FileLayout::walk_origin`]).
//! 2. The origin offset is rebuilt from the segments before it: cached ones count with their
//!    real sizes. In [`DriftMode::Wide`] the origin moves back to the first uncached segment,
//!    so the offset is exact; in [`DriftMode::Normal`] uncached ones count with their declared
//!    sizes. A verified walk then goes forward from the origin, fetching segments through the
//!    cache and accumulating their real on-disk sizes.
//!
//! A range that produces nothing lies past the end of the decoded file: that is a normal end
//! of stream (`Ok(0)`), not an error.
//!
//! While copying, upcoming segments are handed to the [`Prefetcher`].

use std::io::{self, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use crate::cache::SegmentCache;
use crate::error::{StreamError, StreamResult};
use crate::layout::{FileLayout, WalkOrigin};
use crate::model::{DriftMode, FileKey, RangeRequest};
use crate::prefetch::{Prefetcher, Submission};
use crate::settings::StreamerSettings;
use crate::traits::{ArticleDecoder, CacheEvictor, ManifestSource, SessionPool};

/// Delivers byte ranges of logical files from the segment cache.
pub struct RangeStreamer {
    settings: StreamerSettings,
    manifests: Arc<dyn ManifestSource>,
    cache: Arc<SegmentCache>,
    prefetcher: Prefetcher,
}

impl RangeStreamer {
    pub fn new(
        settings: StreamerSettings,
        manifests: Arc<dyn ManifestSource>,
        cache: Arc<SegmentCache>,
    ) -> Self {
        let prefetcher = Prefetcher::new(cache.clone(), &settings);
        Self {
            settings,
            manifests,
            cache,
            prefetcher,
        }
    }

    /// Open the segment cache described by `settings` and build a streamer on top of it.
    pub fn open(
        settings: StreamerSettings,
        manifests: Arc<dyn ManifestSource>,
        pool: Arc<dyn SessionPool>,
        decoder: Arc<dyn ArticleDecoder>,
        evictor: Arc<dyn CacheEvictor>,
    ) -> StreamResult<Self> {
        let cache = Arc::new(SegmentCache::open(&settings, pool, decoder, evictor)?);
        Ok(Self::new(settings, manifests, cache))
    }

    pub fn settings(&self) -> &StreamerSettings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<SegmentCache> {
        &self.cache
    }

    pub fn prefetcher(&self) -> &Prefetcher {
        &self.prefetcher
    }

    /// Write the decoded bytes of `request.range` to `sink` and return how many were written.
    ///
    /// Fewer bytes than requested (down to zero) means the file ended early. On error the sink
    /// may already hold a prefix of the range.
    #[instrument(skip_all, fields(file = %request.file, range = %request.range, drift = ?request.drift))]
    pub async fn stream<W>(
        &self,
        request: &RangeRequest,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> StreamResult<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let layout = self.load_layout(&request.file, cancel).await?;
        let start = request.range.start();

        let hinted = layout.walk_origin(start, request.drift.backtrack(&self.settings));
        let origin = self.anchor(&layout, hinted, start, request.drift).await?;
        debug!(
            segments = layout.len(),
            declared_total = layout.declared_total(),
            hinted_index = hinted.index,
            origin_index = origin.index,
            origin_offset = origin.offset,
            "range resolved to walk origin"
        );
        info!("range start");

        let written = self
            .locate_and_copy(&layout, origin, request, sink, cancel)
            .await?;

        sink.flush().await?;
        if written == 0 {
            info!("range lies past the end of the decoded file");
        } else {
            info!(written, "range finished");
        }
        Ok(written)
    }

    async fn load_layout(
        &self,
        file: &FileKey,
        cancel: &CancellationToken,
    ) -> StreamResult<FileLayout> {
        let rows = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            res = tokio::time::timeout(self.settings.manifest_timeout, self.manifests.load(file)) => {
                match res {
                    Ok(rows) => rows?,
                    Err(_) => return Err(StreamError::Timeout("loading manifest")),
                }
            }
        };
        if rows.is_empty() {
            return Err(StreamError::ManifestEmpty { file: file.clone() });
        }
        FileLayout::build(file, rows)
    }

    /// Rebuild the offset of `hinted` from the segments before it.
    ///
    /// Returns the last origin at or before `hinted.index` whose offset does not pass `start`.
    /// Only cached sizes are trusted in wide mode; normal mode falls back to declared sizes.
    async fn anchor(
        &self,
        layout: &FileLayout,
        hinted: WalkOrigin,
        start: u64,
        drift: DriftMode,
    ) -> StreamResult<WalkOrigin> {
        if hinted.index == 0 {
            return Ok(WalkOrigin::START);
        }
        let prefix = &layout.segments()[..hinted.index];
        let sizes = self.cache.cached_sizes(prefix).await?;
        let usable = if drift.requires_exact_origin() {
            sizes.iter().take_while(|s| s.is_some()).count()
        } else {
            prefix.len()
        };
        let estimated = sizes[..usable].iter().filter(|s| s.is_none()).count();

        let mut origin = WalkOrigin::START;
        let mut offset: u64 = 0;
        for (idx, (seg, real)) in prefix.iter().zip(&sizes).take(usable).enumerate() {
            offset = offset.saturating_add(real.unwrap_or(seg.declared_size));
            if offset > start {
                break;
            }
            origin = WalkOrigin {
                index: idx + 1,
                offset,
            };
        }

        if usable < prefix.len() {
            info!(
                hinted_index = hinted.index,
                uncached_from = usable,
                "segments before the hint are not cached, walking from the first uncached one"
            );
        } else if estimated > 0 {
            debug!(estimated, "origin offset counts declared sizes of uncached segments");
        }
        Ok(origin)
    }

    /// Verified walk: fetch segments from `origin` on, track real offsets, copy the overlap.
    async fn locate_and_copy<W>(
        &self,
        layout: &FileLayout,
        origin: WalkOrigin,
        request: &RangeRequest,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> StreamResult<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let (start, end) = (request.range.start(), request.range.end());
        let segments = layout.segments();
        let mut seg_start = origin.offset;
        let mut written: u64 = 0;

        for (idx, seg) in segments.iter().enumerate().skip(origin.index) {
            if seg_start > end {
                break;
            }

            let path = self.cache.ensure(seg, cancel).await?;
            let size = tokio::fs::metadata(&path).await?.len();
            if size == 0 {
                trace!("walk: skipping empty segment seg={}", seg.number);
                continue;
            }

            let seg_end = seg_start + size - 1;
            if seg_end < start {
                seg_start += size;
                continue;
            }

            let slice_start = start.max(seg_start);
            let slice_end = end.min(seg_end);
            trace!(
                "walk: seg={} real=[{}, {}] copy=[{}, {}]",
                seg.number, seg_start, seg_end, slice_start, slice_end
            );
            written += copy_slice(
                &path,
                slice_start - seg_start,
                slice_end - slice_start + 1,
                sink,
                cancel,
            )
            .await?;

            self.prefetch_after(layout, idx, request.prefetch_count).await;

            if slice_end == end {
                break;
            }
            seg_start += size;
        }

        Ok(written)
    }

    /// Submit up to `count` segments following `idx` that are not cached yet.
    async fn prefetch_after(&self, layout: &FileLayout, idx: usize, count: usize) {
        if count == 0 {
            return;
        }
        for next in layout.segments().iter().skip(idx + 1).take(count) {
            if self.cache.cached_len(next).await.is_some() {
                continue;
            }
            if self.prefetcher.submit(next.clone()) == Submission::Dropped {
                // Gate is full; later segments would be dropped too.
                break;
            }
        }
    }
}

/// Copy `len` bytes starting at `offset` of the cached entry at `path` into `sink`.
async fn copy_slice<W>(
    path: &Path,
    offset: u64,
    len: u64,
    sink: &mut W,
    cancel: &CancellationToken,
) -> StreamResult<u64>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| StreamError::from(e).with_context("opening cached segment"))?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut slice = file.take(len);

    let copied = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(StreamError::Cancelled),
        res = tokio::io::copy(&mut slice, sink) => res?,
    };
    if copied < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "cached segment '{}' ended after {copied} of {len} bytes",
                path.display()
            ),
        )
        .into());
    }
    Ok(copied)
}

impl std::fmt::Debug for RangeStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeStreamer")
            .field("settings", &self.settings)
            .field("prefetcher", &self.prefetcher)
            .finish_non_exhaustive()
    }
}
