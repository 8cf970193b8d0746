//! Interfaces of the external collaborators the engine is built on.
//!
//! The engine owns caching and range resolution. Everything else is plugged in through the
//! traits below:
//! - [`ManifestSource`]: the ordered segment list of a logical file.
//! - [`SessionPool`] / [`ArticleSession`]: bounded protocol sessions that fetch article bodies.
//! - [`ArticleDecoder`]: turns a raw article body into payload bytes.
//! - [`CacheEvictor`]: size enforcement for the cache directory, invoked best-effort.
//!
//! Connection lifecycle, retries, codec internals and eviction policy all live behind these
//! traits and are not this crate's concern.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{DecodeError, FetchError, StreamResult};
use crate::model::{FileKey, ManifestRow};

/// Source of per-file segment manifests.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    /// Return every manifest row for `file`, in any order.
    ///
    /// An empty vector is a valid answer; the streamer turns it into
    /// [`crate::StreamError::ManifestEmpty`].
    async fn load(&self, file: &FileKey) -> StreamResult<Vec<ManifestRow>>;
}

/// One checked-out protocol session.
#[async_trait]
pub trait ArticleSession: Send {
    /// Fetch the raw body lines of the article identified by `message_id`.
    async fn fetch_body(&mut self, message_id: &str) -> Result<Vec<Bytes>, FetchError>;
}

/// Bounded pool of protocol sessions.
///
/// `acquire` may wait for a free session. The caller races it against its own cancellation
/// token, so implementations only need to be cancel-safe (dropping the future must not leak a
/// session).
#[async_trait]
pub trait SessionPool: Send + Sync {
    /// Check a session out of the pool.
    async fn acquire(&self) -> Result<Box<dyn ArticleSession>, FetchError>;

    /// Return a session previously handed out by [`SessionPool::acquire`].
    fn release(&self, session: Box<dyn ArticleSession>);
}

/// Article body codec.
pub trait ArticleDecoder: Send + Sync {
    /// Decode raw body lines into the payload bytes of the segment.
    fn decode(&self, lines: &[Bytes]) -> Result<Bytes, DecodeError>;
}

/// Size enforcement for the segment cache directory.
///
/// Called after every newly written segment. Errors are logged and otherwise ignored.
pub trait CacheEvictor: Send + Sync {
    fn enforce_limit(&self, dir: &Path, max_bytes: u64) -> io::Result<()>;
}

/// Evictor that never removes anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvictor;

impl CacheEvictor for NoopEvictor {
    fn enforce_limit(&self, _dir: &Path, _max_bytes: u64) -> io::Result<()> {
        Ok(())
    }
}
