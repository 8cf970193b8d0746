//! Serve one `Range` request from a synthetic multi-article file.
//!
//! Articles live in memory and the "codec" strips a one-line header, so the declared sizes in
//! the manifest (which count the header) drift from the decoded sizes, as they do with real
//! posts. Wide drift mode walks every segment it cannot size from the cache, so every range
//! resolves exactly. The requested bytes are written to stdout.
//!
//! ```text
//! RUST_LOG=segment_stream=trace cargo run -p segment-stream-demos --example local_range -- "bytes=1500-1999"
//! ```

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use segment_stream::{
    ArticleDecoder, ArticleSession, ByteRange, DecodeError, DriftMode, FetchError, FileKey,
    ManifestRow, ManifestSource, NoopEvictor, RangeRequest, RangeStreamer, SessionPool,
    StreamResult, StreamerSettings, content_range, parse_range_header,
};
use tokio_util::sync::CancellationToken;
use tracing::metadata::LevelFilter;
use tracing_subscriber::EnvFilter;

const SEGMENTS: u32 = 12;
const SEGMENT_LEN: usize = 1000;
const HEADER: &[u8] = b"=ybegin demo\n";

struct Articles(HashMap<String, Bytes>);

struct Session(Arc<Articles>);

#[async_trait]
impl ArticleSession for Session {
    async fn fetch_body(&mut self, message_id: &str) -> Result<Vec<Bytes>, FetchError> {
        let body = self
            .0
            .0
            .get(message_id)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(message_id.to_string()))?;
        Ok(vec![body.slice(..HEADER.len()), body.slice(HEADER.len()..)])
    }
}

struct Pool(Arc<Articles>);

#[async_trait]
impl SessionPool for Pool {
    async fn acquire(&self) -> Result<Box<dyn ArticleSession>, FetchError> {
        Ok(Box::new(Session(self.0.clone())))
    }

    fn release(&self, _session: Box<dyn ArticleSession>) {}
}

struct StripHeader;

impl ArticleDecoder for StripHeader {
    fn decode(&self, lines: &[Bytes]) -> Result<Bytes, DecodeError> {
        match lines.split_first() {
            Some((header, rest)) if &header[..] == HEADER => Ok(rest.concat().into()),
            _ => Err(DecodeError::MalformedArticle("missing header line".into())),
        }
    }
}

struct Manifests(Vec<ManifestRow>);

#[async_trait]
impl ManifestSource for Manifests {
    async fn load(&self, _file: &FileKey) -> StreamResult<Vec<ManifestRow>> {
        Ok(self.0.clone())
    }
}

fn build_articles() -> (Articles, Vec<ManifestRow>) {
    let mut articles = HashMap::new();
    let mut rows = Vec::new();
    for number in 1..=SEGMENTS {
        let id = format!("<part{number}@demo>");
        let mut body = HEADER.to_vec();
        body.extend((0..SEGMENT_LEN).map(|i| b'a' + ((i as u32 + number) % 26) as u8));
        rows.push(ManifestRow::new(number, body.len() as i64, id.clone()));
        articles.insert(id, Bytes::from(body));
    }
    (Articles(articles), rows)
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::default()
                .add_directive("segment_stream=debug".parse()?)
                .add_directive(LevelFilter::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_line_number(false)
        .with_file(false)
        .init();

    let header = std::env::args().nth(1);
    let (articles, rows) = build_articles();
    let articles = Arc::new(articles);
    let decoded_size = u64::from(SEGMENTS) * SEGMENT_LEN as u64;

    let cache_dir = std::env::temp_dir().join("segment-stream-demo");
    let settings = StreamerSettings::default()
        .cache_dir(&cache_dir)
        .low_latency();
    let streamer = RangeStreamer::open(
        settings.clone(),
        Arc::new(Manifests(rows)),
        Arc::new(Pool(articles)),
        Arc::new(StripHeader),
        Arc::new(NoopEvictor),
    )?;

    let range = match parse_range_header(header.as_deref(), decoded_size)? {
        Some(range) => range,
        None => ByteRange::new(0, decoded_size - 1)?,
    };
    tracing::info!(
        content_range = %content_range(&range, decoded_size),
        cache_dir = %cache_dir.display(),
        "serving"
    );

    let request = RangeRequest::with_defaults(FileKey::new("demo-import", 0), range, &settings)
        .drift(DriftMode::Wide);
    let mut stdout = tokio::io::stdout();
    let written = streamer
        .stream(&request, &mut stdout, &CancellationToken::new())
        .await?;

    tracing::info!(written, stats = ?streamer.cache().stats(), "done");
    Ok(())
}
