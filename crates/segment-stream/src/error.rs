//! Unified crate-level error types.
//!
//! [`StreamError`] is returned by every fallible operation in the crate; [`StreamResult`] is the
//! matching alias. Collaborator-facing errors ([`FetchError`] for the session pool / article
//! sessions, [`DecodeError`] for the codec) are separate small enums so that implementors of the
//! traits in [`crate::traits`] do not need to know about the full streaming taxonomy.
//!
//! Nothing in this crate retries. Every error aborts the current streaming call and is surfaced
//! to the caller as-is; the sink may already hold a byte prefix at that point.

use std::io;

use crate::model::FileKey;

/// Result type used by this crate.
pub type StreamResult<T> = Result<T, StreamError>;

/// Failures reported by the protocol session pool or an article session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The server does not have the requested article.
    #[error("article not found: {0}")]
    NotFound(String),

    /// The connection failed while talking to the server.
    #[error("connection error: {0}")]
    Connection(String),

    /// No session could be checked out of the pool.
    #[error("session pool exhausted")]
    PoolExhausted,
}

/// Failures reported by the article codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The raw article body could not be decoded into payload bytes.
    #[error("malformed article: {0}")]
    MalformedArticle(String),
}

/// Unified error type for the `segment-stream` crate.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The manifest for a file has no segments.
    #[error("manifest for {file} has no segments")]
    ManifestEmpty {
        /// File whose manifest was empty.
        file: FileKey,
    },

    /// The requested range ends before it starts.
    #[error("invalid range: end {end} < start {start}")]
    InvalidRange {
        /// Requested first byte.
        start: u64,
        /// Requested last byte (inclusive).
        end: u64,
    },

    /// The manifest rows cannot form a layout (e.g. a negative declared size).
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// The manifest source could not be queried.
    #[error("manifest unavailable: {0}")]
    Manifest(String),

    /// Session pool or network failure.
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Article payload could not be decoded.
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Cache read or write failure.
    ///
    /// Uses the concrete `std::io::Error` to preserve error kinds and sources.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// A bounded operation ran out of time.
    #[error("timed out while {0}")]
    Timeout(&'static str),

    /// Extra context around a lower-level error.
    #[error("{context}: {source}")]
    Context {
        /// What we were doing when the error occurred.
        context: &'static str,
        /// The underlying error.
        #[source]
        source: Box<StreamError>,
    },
}

impl StreamError {
    /// Attach static context to an existing error.
    pub fn with_context(self, context: &'static str) -> Self {
        StreamError::Context {
            context,
            source: Box::new(self),
        }
    }

    /// Returns true if this error (or the error it wraps) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            StreamError::Cancelled => true,
            StreamError::Context { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Strip any [`StreamError::Context`] layers and return the innermost error.
    pub fn root(&self) -> &StreamError {
        match self {
            StreamError::Context { source, .. } => source.root(),
            other => other,
        }
    }
}
