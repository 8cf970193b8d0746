//! Runnable demos for `segment-stream`; see `examples/`.
