//! In-memory collaborators for integration tests.
//!
//! - [`MemoryManifests`]: manifest rows per file, with an optional artificial delay.
//! - [`FakePool`]: session pool serving article bodies from memory. Counts every acquire,
//!   release and fetch, can fail chosen articles and can hold chosen fetches until
//!   [`FakePool::open_gate`] is called.
//! - [`PassthroughDecoder`]: concatenates body lines; bodies starting with `CORRUPT` fail.
//! - [`Fixture`]: ties them to a temporary cache directory.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use segment_stream::{
    ArticleDecoder, ArticleSession, CacheEvictor, DecodeError, FetchError, FileKey, FileLayout,
    ManifestRow, ManifestSource, NoopEvictor, RangeRequest, RangeStreamer, SegmentCache,
    SegmentLocator, SessionPool, StreamResult, StreamerSettings,
};

const LINE_LEN: usize = 128;

pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Deterministic payload for segment `seed` of some file.
///
/// Every byte is hashed from `(seed, position)`, so no window of one segment reappears at
/// another offset or in another segment.
pub fn payload(seed: u32, len: usize) -> Bytes {
    (0..len as u64)
        .map(|i| mix((u64::from(seed) << 32) | i) as u8)
        .collect::<Vec<u8>>()
        .into()
}

// splitmix64 finalizer
fn mix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

pub fn message_id(file: &FileKey, number: u32) -> String {
    format!("<{}-{}-{}@fixture>", file.file_id, file.file_index, number)
}

/// Poll `cond` until it holds; panics after a few seconds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until `seg` has a complete cache entry.
pub async fn wait_for_entry(cache: &SegmentCache, seg: &SegmentLocator) -> u64 {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(len) = cache.cached_len(seg).await {
            return len;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for segment {}",
            seg.number
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ----------------------------
// Manifest source
// ----------------------------

#[derive(Default)]
pub struct MemoryManifests {
    rows: Mutex<HashMap<FileKey, Vec<ManifestRow>>>,
    delay: Mutex<Option<Duration>>,
    loads: AtomicUsize,
}

impl MemoryManifests {
    pub fn insert(&self, file: &FileKey, rows: Vec<ManifestRow>) {
        self.rows.lock().insert(file.clone(), rows);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn rows(&self, file: &FileKey) -> Vec<ManifestRow> {
        self.rows.lock().get(file).cloned().unwrap_or_default()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManifestSource for MemoryManifests {
    async fn load(&self, file: &FileKey) -> StreamResult<Vec<ManifestRow>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.rows(file))
    }
}

// ----------------------------
// Session pool
// ----------------------------

struct PoolInner {
    articles: Mutex<HashMap<String, Bytes>>,
    missing: Mutex<HashSet<String>>,
    held: Mutex<HashSet<String>>,
    fetched: Mutex<Vec<String>>,
    gate_tx: watch::Sender<bool>,
    gate_rx: watch::Receiver<bool>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    started: AtomicUsize,
}

pub struct FakePool {
    inner: Arc<PoolInner>,
}

impl Default for FakePool {
    fn default() -> Self {
        let (gate_tx, gate_rx) = watch::channel(false);
        Self {
            inner: Arc::new(PoolInner {
                articles: Mutex::new(HashMap::new()),
                missing: Mutex::new(HashSet::new()),
                held: Mutex::new(HashSet::new()),
                fetched: Mutex::new(Vec::new()),
                gate_tx,
                gate_rx,
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
                started: AtomicUsize::new(0),
            }),
        }
    }
}

impl FakePool {
    pub fn put_article(&self, message_id: &str, body: Bytes) {
        self.inner
            .articles
            .lock()
            .insert(message_id.to_string(), body);
    }

    /// Make fetches of `message_id` fail with `NotFound`.
    pub fn mark_missing(&self, message_id: &str) {
        self.inner.missing.lock().insert(message_id.to_string());
    }

    /// Make fetches of `message_id` wait until [`FakePool::open_gate`].
    pub fn hold(&self, message_id: &str) {
        self.inner.held.lock().insert(message_id.to_string());
    }

    pub fn open_gate(&self) {
        self.inner.gate_tx.send_replace(true);
    }

    /// Completed and in-progress fetches, in start order.
    pub fn fetched(&self) -> Vec<String> {
        self.inner.fetched.lock().clone()
    }

    pub fn fetch_count(&self, message_id: &str) -> usize {
        self.inner
            .fetched
            .lock()
            .iter()
            .filter(|id| id.as_str() == message_id)
            .count()
    }

    pub fn started(&self) -> usize {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> usize {
        self.inner.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.inner.released.load(Ordering::SeqCst)
    }
}

struct FakeSession {
    inner: Arc<PoolInner>,
}

#[async_trait]
impl ArticleSession for FakeSession {
    async fn fetch_body(&mut self, message_id: &str) -> Result<Vec<Bytes>, FetchError> {
        self.inner.started.fetch_add(1, Ordering::SeqCst);
        self.inner.fetched.lock().push(message_id.to_string());

        let held = self.inner.held.lock().contains(message_id);
        if held {
            let mut rx = self.inner.gate_rx.clone();
            rx.wait_for(|open| *open)
                .await
                .map_err(|_| FetchError::Connection("gate closed".into()))?;
        }

        if self.inner.missing.lock().contains(message_id) {
            return Err(FetchError::NotFound(message_id.to_string()));
        }
        let body = self
            .inner
            .articles
            .lock()
            .get(message_id)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(message_id.to_string()))?;

        let mut lines = Vec::new();
        let mut rest = body;
        while !rest.is_empty() {
            let n = rest.len().min(LINE_LEN);
            lines.push(rest.split_to(n));
        }
        Ok(lines)
    }
}

#[async_trait]
impl SessionPool for FakePool {
    async fn acquire(&self) -> Result<Box<dyn ArticleSession>, FetchError> {
        self.inner.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            inner: self.inner.clone(),
        }))
    }

    fn release(&self, _session: Box<dyn ArticleSession>) {
        self.inner.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ----------------------------
// Codec and evictor
// ----------------------------

pub struct PassthroughDecoder;

impl ArticleDecoder for PassthroughDecoder {
    fn decode(&self, lines: &[Bytes]) -> Result<Bytes, DecodeError> {
        if lines.first().is_some_and(|l| l.starts_with(b"CORRUPT")) {
            return Err(DecodeError::MalformedArticle("bad checksum".into()));
        }
        Ok(lines.concat().into())
    }
}

/// Records every call and always fails.
#[derive(Default)]
pub struct FailingEvictor {
    pub calls: Mutex<Vec<(PathBuf, u64)>>,
}

impl CacheEvictor for FailingEvictor {
    fn enforce_limit(&self, dir: &Path, max_bytes: u64) -> io::Result<()> {
        self.calls.lock().push((dir.to_path_buf(), max_bytes));
        Err(io::Error::other("disk quota service unavailable"))
    }
}

// ----------------------------
// Fixture
// ----------------------------

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub settings: StreamerSettings,
    pub manifests: Arc<MemoryManifests>,
    pub pool: Arc<FakePool>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(|s| s)
    }

    pub fn with_settings(adjust: impl FnOnce(StreamerSettings) -> StreamerSettings) -> Self {
        setup_tracing();
        let dir = tempfile::tempdir().expect("create temp cache dir");
        let settings = adjust(StreamerSettings::default().cache_dir(dir.path()));
        Self {
            dir,
            settings,
            manifests: Arc::new(MemoryManifests::default()),
            pool: Arc::new(FakePool::default()),
        }
    }

    /// Register a file whose declared sizes match the decoded ones.
    pub fn add_file(&self, file: &FileKey, decoded: &[usize]) -> Vec<u8> {
        let declared: Vec<i64> = decoded.iter().map(|&d| d as i64).collect();
        self.add_file_with_declared(file, decoded, &declared)
    }

    /// Register a file segment by segment and return its decoded concatenation.
    ///
    /// Segments are numbered from 1 and inserted into the manifest in reverse order.
    pub fn add_file_with_declared(
        &self,
        file: &FileKey,
        decoded: &[usize],
        declared: &[i64],
    ) -> Vec<u8> {
        assert_eq!(decoded.len(), declared.len());
        let mut expected = Vec::new();
        let mut rows = Vec::new();
        for (i, (&len, &decl)) in decoded.iter().zip(declared).enumerate() {
            let number = i as u32 + 1;
            let id = message_id(file, number);
            let body = payload(number, len);
            expected.extend_from_slice(&body);
            self.pool.put_article(&id, body);
            rows.push(ManifestRow::new(number, decl, format!(" {id}\t")));
        }
        rows.reverse();
        self.manifests.insert(file, rows);
        tracing::debug!(file = %file, segments = decoded.len(), "fixture file registered");
        expected
    }

    pub fn layout(&self, file: &FileKey) -> FileLayout {
        FileLayout::build(file, self.manifests.rows(file)).expect("valid fixture manifest")
    }

    /// Locator of segment `number` (1-based) of `file`.
    pub fn segment(&self, file: &FileKey, number: u32) -> SegmentLocator {
        self.layout(file)
            .segments()
            .iter()
            .find(|s| s.number == number)
            .cloned()
            .expect("segment registered")
    }

    pub fn cache(&self) -> Arc<SegmentCache> {
        self.cache_with_evictor(Arc::new(NoopEvictor))
    }

    pub fn cache_with_evictor(&self, evictor: Arc<dyn CacheEvictor>) -> Arc<SegmentCache> {
        Arc::new(
            SegmentCache::open(
                &self.settings,
                self.pool.clone(),
                Arc::new(PassthroughDecoder),
                evictor,
            )
            .expect("open cache"),
        )
    }

    pub fn streamer(&self) -> RangeStreamer {
        RangeStreamer::new(self.settings.clone(), self.manifests.clone(), self.cache())
    }
}

/// Stream `request` into memory.
pub async fn read_range(streamer: &RangeStreamer, request: &RangeRequest) -> StreamResult<Vec<u8>> {
    let mut out = Vec::new();
    let written = streamer
        .stream(request, &mut out, &CancellationToken::new())
        .await?;
    assert_eq!(written, out.len() as u64);
    Ok(out)
}
