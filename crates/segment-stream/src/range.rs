//! HTTP `Range` header helpers for callers that serve files over HTTP.
//!
//! The streamer accepts exactly one contiguous range. [`parse_range_header`] turns a request
//! header into that range or tells the caller why it cannot: multi-range requests are rejected
//! outright (answer `416`), never split.

use crate::model::ByteRange;

/// Why a `Range` header could not be turned into a single [`ByteRange`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RangeHeaderError {
    /// More than one range was requested.
    #[error("multiple ranges are not supported")]
    MultiRange,

    /// The range does not overlap a file of `size` bytes.
    #[error("range not satisfiable for size {size}")]
    Unsatisfiable { size: u64 },

    /// The header is not a valid `bytes=` range.
    #[error("malformed range header: {0}")]
    Malformed(String),
}

/// Parse a `Range` header against a file of `size` bytes.
///
/// - no header or an empty one: `Ok(None)`, serve the whole file;
/// - `bytes=a-b`: `[a, min(b, size - 1)]`;
/// - `bytes=a-`: `[a, size - 1]`;
/// - `bytes=-n`: the last `n` bytes.
pub fn parse_range_header(
    header: Option<&str>,
    size: u64,
) -> Result<Option<ByteRange>, RangeHeaderError> {
    let Some(header) = header.map(str::trim).filter(|h| !h.is_empty()) else {
        return Ok(None);
    };

    let set = header
        .strip_prefix("bytes=")
        .ok_or_else(|| RangeHeaderError::Malformed(header.to_string()))?
        .trim();
    if set.contains(',') {
        return Err(RangeHeaderError::MultiRange);
    }
    let (first, last) = set
        .split_once('-')
        .ok_or_else(|| RangeHeaderError::Malformed(header.to_string()))?;
    let (first, last) = (first.trim(), last.trim());

    if size == 0 {
        return Err(RangeHeaderError::Unsatisfiable { size });
    }
    let last_byte = size - 1;
    let parse = |s: &str| {
        s.parse::<u64>()
            .map_err(|_| RangeHeaderError::Malformed(header.to_string()))
    };

    let (start, end) = match (first.is_empty(), last.is_empty()) {
        (true, true) => return Err(RangeHeaderError::Malformed(header.to_string())),
        (true, false) => {
            let suffix = parse(last)?;
            if suffix == 0 {
                return Err(RangeHeaderError::Unsatisfiable { size });
            }
            (size.saturating_sub(suffix), last_byte)
        }
        (false, true) => (parse(first)?, last_byte),
        (false, false) => {
            let (a, b) = (parse(first)?, parse(last)?);
            if b < a {
                return Err(RangeHeaderError::Malformed(header.to_string()));
            }
            (a, b.min(last_byte))
        }
    };

    if start > last_byte {
        return Err(RangeHeaderError::Unsatisfiable { size });
    }
    ByteRange::new(start, end)
        .map(Some)
        .map_err(|_| RangeHeaderError::Unsatisfiable { size })
}

/// `Content-Range` value for a partial response, e.g. `bytes 0-99/1000`.
pub fn content_range(range: &ByteRange, size: u64) -> String {
    format!("bytes {}-{}/{}", range.start(), range.end(), size)
}
