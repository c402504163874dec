//! Remote seekable stream backed by ranged HTTP reads
//!
//! This module provides:
//! - `RangeFetcher`: "give me the resource starting at byte N" capability
//! - `HttpRangeFetcher`: `reqwest` implementation sending `Range: bytes=N-`
//! - `RemoteStream`: Read+Seek cursor over a fetcher, handed to the decoder
//!
//! Seeking only moves the cursor. The next read reuses the open connection if
//! it already sits at the cursor, otherwise it issues a new range request.
//! A failed request or read is retried once on a fresh connection.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, HeaderName, RANGE};
use symphonia::core::io::MediaSource;
use tracing::{debug, info, warn};

use crate::error::{PlayerError, Result};
use crate::features::settings::NetworkSettings;

// ============ Constants ============

/// Valid audio extensions for URL parsing
const VALID_AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "m4a", "aac", "ogg", "wav"];

// ============ Format Detection Helpers ============

/// Extract audio file extension from URL path
///
/// ```text
/// extract_extension_from_url("http://example.com/song.flac?token=xxx") == Some("flac")
/// ```
pub fn extract_extension_from_url(url: &str) -> Option<String> {
    let url_parsed = reqwest::Url::parse(url).ok()?;
    let filename = url_parsed.path().rsplit('/').next()?;
    let (_, ext) = filename.rsplit_once('.')?;
    let ext = ext.to_lowercase();

    if VALID_AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(ext)
    } else {
        None
    }
}

/// Map Content-Type header to file extension
pub fn content_type_to_extension(content_type: &str) -> Option<String> {
    // Ignore parameters like charset
    let mime = content_type.split(';').next()?.trim().to_lowercase();

    match mime.as_str() {
        "audio/mpeg" | "audio/mp3" => Some("mp3".to_string()),
        "audio/flac" | "audio/x-flac" => Some("flac".to_string()),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "audio/aac" => Some("m4a".to_string()),
        "audio/ogg" | "audio/vorbis" => Some("ogg".to_string()),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav".to_string()),
        _ => None,
    }
}

/// Parse `bytes START-END/TOTAL` (TOTAL may be `*`)
fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    Some((start, total.trim().parse().ok()))
}

// ============ Range Fetching ============

/// Response to a range request
pub struct RangeResponse {
    /// Body positioned at `start`
    pub body: Box<dyn Read + Send>,
    /// Absolute offset of the first body byte (0 if the server ignored the range)
    pub start: u64,
    /// Total resource length, if the server reported it
    pub total_len: Option<u64>,
    pub content_type: Option<String>,
}

/// Capability to open the remote resource at a byte offset
pub trait RangeFetcher: Send + Sync {
    fn fetch(&self, offset: u64) -> Result<RangeResponse>;
}

/// Range fetcher over HTTP(S)
pub struct HttpRangeFetcher {
    client: Client,
    url: String,
}

impl HttpRangeFetcher {
    pub fn new(url: impl Into<String>, network: &NetworkSettings) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(network.timeout_secs))
            .connect_timeout(Duration::from_secs(network.connect_timeout_secs))
            .user_agent(network.user_agent.clone());

        if let Some(proxy_url) = network.proxy_url() {
            let proxy = reqwest::Proxy::all(&proxy_url)
                .map_err(|e| PlayerError::Transport(format!("invalid proxy {proxy_url}: {e}")))?;
            builder = builder.proxy(proxy);
            info!(proxy_type = %network.proxy_type, "Using proxy");
        }

        let client = builder
            .build()
            .map_err(|e| PlayerError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl RangeFetcher for HttpRangeFetcher {
    fn fetch(&self, offset: u64) -> Result<RangeResponse> {
        debug!(offset, url = %self.url, "Range request");

        let response = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={offset}-"))
            .send()
            .map_err(|e| PlayerError::Transport(e.to_string()))?;

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE);
        let content_range = header(CONTENT_RANGE);

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                let (start, total) = content_range
                    .as_deref()
                    .and_then(parse_content_range)
                    .unwrap_or((offset, None));
                let total_len = total.or_else(|| response.content_length().map(|len| start + len));
                Ok(RangeResponse {
                    body: Box::new(response),
                    start,
                    total_len,
                    content_type,
                })
            }
            StatusCode::OK => {
                if offset > 0 {
                    debug!(offset, "Server ignored range request");
                }
                let total_len = response.content_length();
                Ok(RangeResponse {
                    body: Box::new(response),
                    start: 0,
                    total_len,
                    content_type,
                })
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                let length = content_range
                    .as_deref()
                    .and_then(|v| v.rsplit_once('/'))
                    .and_then(|(_, total)| total.trim().parse().ok())
                    .unwrap_or(offset);
                Err(PlayerError::OutOfRange { offset, length })
            }
            status => Err(PlayerError::Transport(format!(
                "HTTP {status} from {}",
                self.url
            ))),
        }
    }
}

// ============ Remote Stream ============

/// An open response body and the absolute offset of its next byte
struct Connection {
    // Only touched through `get_mut`; the lock just makes the stream `Sync`
    body: Mutex<Box<dyn Read + Send>>,
    position: u64,
}

impl Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.body.get_mut().read(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    /// Discard bytes until `offset` (servers that ignore ranges)
    fn skip_to(&mut self, offset: u64) -> Result<()> {
        let wanted = offset - self.position;
        let body = self.body.get_mut();
        let skipped = io::copy(&mut body.by_ref().take(wanted), &mut io::sink())
            .map_err(|e| PlayerError::Transport(e.to_string()))?;
        self.position += skipped;
        if skipped < wanted {
            return Err(PlayerError::Transport(format!(
                "connection closed at byte {} while skipping to {offset}",
                self.position
            )));
        }
        Ok(())
    }
}

/// Seekable byte stream over a remote resource
pub struct RemoteStream {
    fetcher: Arc<dyn RangeFetcher>,
    length: Option<u64>,
    cursor: u64,
    connection: Option<Connection>,
    content_type: Option<String>,
}

impl RemoteStream {
    /// Open the resource, learning its length from the first response
    pub fn open(fetcher: Arc<dyn RangeFetcher>) -> Result<Self> {
        let mut stream = Self {
            fetcher,
            length: None,
            cursor: 0,
            connection: None,
            content_type: None,
        };

        match stream.connect(0) {
            Ok(()) => {}
            Err(err @ PlayerError::Transport(_)) => {
                warn!(error = %err, "Initial request failed, retrying with a fresh connection");
                stream.connect(0)?;
            }
            Err(err) => return Err(err),
        }

        info!(
            length = ?stream.length,
            content_type = ?stream.content_type,
            "Remote stream opened"
        );
        Ok(stream)
    }

    /// Total length in bytes, once known
    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Content-Type of the first response
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Fill `buf` from absolute byte `offset`
    ///
    /// Returns the number of bytes read, which may be less than `buf.len()`.
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if let Some(length) = self.length.filter(|&len| offset >= len) {
            return Err(PlayerError::OutOfRange { offset, length });
        }
        if buf.is_empty() {
            return Ok(0);
        }

        match self.try_read_at(buf, offset) {
            Ok(n) => Ok(n),
            Err(err @ PlayerError::Transport(_)) => {
                warn!(offset, error = %err, "Remote read failed, retrying with a fresh connection");
                self.connection = None;
                self.try_read_at(buf, offset).inspect_err(|_| {
                    self.connection = None;
                })
            }
            Err(err) => Err(err),
        }
    }

    fn try_read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let reusable = matches!(&self.connection, Some(c) if c.position == offset);
        if !reusable {
            self.connect(offset)?;
        }

        let Some(connection) = self.connection.as_mut() else {
            return Err(PlayerError::Transport("no open connection".to_string()));
        };

        let n = match connection.read(buf) {
            Ok(n) => n,
            Err(e) => {
                self.connection = None;
                return Err(PlayerError::Transport(e.to_string()));
            }
        };

        if n == 0 && self.length.is_some() {
            // Body ended before the advertised length
            self.connection = None;
            return Err(PlayerError::Transport(format!(
                "connection closed early at byte {offset}"
            )));
        }
        Ok(n)
    }

    fn connect(&mut self, offset: u64) -> Result<()> {
        self.connection = None;

        let response = self.fetcher.fetch(offset)?;
        if self.length.is_none() {
            self.length = response.total_len;
        }
        if self.content_type.is_none() {
            self.content_type = response.content_type;
        }

        let mut connection = Connection {
            body: Mutex::new(response.body),
            position: response.start,
        };

        if connection.position > offset {
            return Err(PlayerError::Transport(format!(
                "server answered from byte {} for a request at {offset}",
                connection.position
            )));
        }
        if connection.position < offset {
            debug!(
                from = connection.position,
                to = offset,
                "Skipping forward on a full-body response"
            );
            connection.skip_to(offset)?;
        }

        self.connection = Some(connection);
        Ok(())
    }
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("length", &self.length)
            .field("cursor", &self.cursor)
            .field(
                "connection_at",
                &self.connection.as_ref().map(|c| c.position),
            )
            .finish()
    }
}

impl Read for RemoteStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.length.is_some_and(|len| self.cursor >= len) {
            return Ok(0);
        }
        let n = self
            .read_at(buf, self.cursor)
            .map_err(PlayerError::into_io)?;
        self.cursor += n as u64;
        Ok(n)
    }
}

impl Seek for RemoteStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => {
                let Some(length) = self.length else {
                    return Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "cannot seek from end: unknown length",
                    ));
                };
                length.checked_add_signed(delta)
            }
            SeekFrom::Current(delta) => self.cursor.checked_add_signed(delta),
        };

        let Some(new_pos) = new_pos else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            ));
        };

        debug!(from = self.cursor, to = new_pos, "Remote stream seek");
        self.cursor = new_pos;
        Ok(new_pos)
    }
}

impl MediaSource for RemoteStream {
    fn is_seekable(&self) -> bool {
        self.length.is_some()
    }

    fn byte_len(&self) -> Option<u64> {
        self.length
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory resource with failure injection
    pub(crate) struct FakeFetcher {
        data: Vec<u8>,
        honor_ranges: bool,
        failures: AtomicUsize,
        truncate_first_body: Mutex<Option<usize>>,
        fetches: AtomicUsize,
    }

    impl FakeFetcher {
        pub(crate) fn new(data: Vec<u8>) -> Self {
            Self {
                data,
                honor_ranges: true,
                failures: AtomicUsize::new(0),
                truncate_first_body: Mutex::new(None),
                fetches: AtomicUsize::new(0),
            }
        }

        fn ignoring_ranges(mut self) -> Self {
            self.honor_ranges = false;
            self
        }

        pub(crate) fn failing(self, count: usize) -> Self {
            self.failures.store(count, Ordering::SeqCst);
            self
        }

        fn truncating_first_body(self, len: usize) -> Self {
            *self.truncate_first_body.lock() = Some(len);
            self
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl RangeFetcher for FakeFetcher {
        fn fetch(&self, offset: u64) -> Result<RangeResponse> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(PlayerError::Transport("connection refused".to_string()));
            }

            let start = if self.honor_ranges { offset } else { 0 };
            let mut body = self.data[start as usize..].to_vec();
            if let Some(len) = self.truncate_first_body.lock().take() {
                body.truncate(len);
            }

            Ok(RangeResponse {
                body: Box::new(Cursor::new(body)),
                start,
                total_len: Some(self.data.len() as u64),
                content_type: Some("audio/mpeg".to_string()),
            })
        }
    }

    fn sample_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_open_learns_length() {
        let fake = Arc::new(FakeFetcher::new(sample_data(1000)));
        let stream = RemoteStream::open(fake.clone()).unwrap();

        assert_eq!(stream.length(), Some(1000));
        assert_eq!(stream.content_type(), Some("audio/mpeg"));
        assert_eq!(fake.fetches(), 1);
    }

    #[test]
    fn test_contiguous_reads_reuse_connection() {
        let data = sample_data(1000);
        let fake = Arc::new(FakeFetcher::new(data.clone()));
        let mut stream = RemoteStream::open(fake.clone()).unwrap();

        let mut buf = [0u8; 10];
        assert_eq!(stream.read_at(&mut buf, 0).unwrap(), 10);
        assert_eq!(&buf[..], &data[0..10]);
        assert_eq!(stream.read_at(&mut buf, 10).unwrap(), 10);
        assert_eq!(&buf[..], &data[10..20]);

        assert_eq!(fake.fetches(), 1);
    }

    #[test]
    fn test_non_contiguous_read_issues_range_request() {
        let data = sample_data(1000);
        let fake = Arc::new(FakeFetcher::new(data.clone()));
        let mut stream = RemoteStream::open(fake.clone()).unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(stream.read_at(&mut buf, 500).unwrap(), 16);
        assert_eq!(&buf[..], &data[500..516]);
        assert_eq!(fake.fetches(), 2);
    }

    #[test]
    fn test_seek_is_lazy() {
        let data = sample_data(1000);
        let fake = Arc::new(FakeFetcher::new(data.clone()));
        let mut stream = RemoteStream::open(fake.clone()).unwrap();

        assert_eq!(stream.seek(SeekFrom::Start(700)).unwrap(), 700);
        assert_eq!(stream.seek(SeekFrom::Current(-100)).unwrap(), 600);
        assert_eq!(stream.seek(SeekFrom::End(-10)).unwrap(), 990);
        assert_eq!(fake.fetches(), 1);

        let mut buf = [0u8; 10];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[990..1000]);
        assert_eq!(fake.fetches(), 2);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_seek_to_negative_position_fails() {
        let fake = Arc::new(FakeFetcher::new(sample_data(100)));
        let mut stream = RemoteStream::open(fake).unwrap();

        let err = stream.seek(SeekFrom::Current(-1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_read_past_length_is_out_of_range() {
        let fake = Arc::new(FakeFetcher::new(sample_data(100)));
        let mut stream = RemoteStream::open(fake).unwrap();

        let mut buf = [0u8; 4];
        let err = stream.read_at(&mut buf, 100).unwrap_err();
        assert!(matches!(
            err,
            PlayerError::OutOfRange {
                offset: 100,
                length: 100
            }
        ));
    }

    #[test]
    fn test_single_failure_is_retried() {
        let data = sample_data(256);
        let fake = Arc::new(FakeFetcher::new(data.clone()).failing(1));
        let mut stream = RemoteStream::open(fake.clone()).unwrap();

        let mut buf = vec![0u8; 256];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, data);
        assert_eq!(fake.fetches(), 2);
    }

    #[test]
    fn test_two_consecutive_failures_are_transport_error() {
        let fake = Arc::new(FakeFetcher::new(sample_data(256)).failing(2));
        let err = RemoteStream::open(fake.clone()).unwrap_err();

        assert!(matches!(err, PlayerError::Transport(_)));
        assert_eq!(fake.fetches(), 2);
    }

    #[test]
    fn test_early_close_reconnects_at_offset() {
        let data = sample_data(300);
        let fake = Arc::new(FakeFetcher::new(data.clone()).truncating_first_body(100));
        let mut stream = RemoteStream::open(fake.clone()).unwrap();

        let mut buf = vec![0u8; 300];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, data);
        assert_eq!(fake.fetches(), 2);
    }

    #[test]
    fn test_server_ignoring_ranges_falls_back_to_skipping() {
        let data = sample_data(1000);
        let fake = Arc::new(FakeFetcher::new(data.clone()).ignoring_ranges());
        let mut stream = RemoteStream::open(fake).unwrap();

        let mut buf = [0u8; 8];
        stream.seek(SeekFrom::Start(400)).unwrap();
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &data[400..408]);
    }

    #[test]
    fn test_media_source_reports_length() {
        let fake = Arc::new(FakeFetcher::new(sample_data(42)));
        let stream = RemoteStream::open(fake).unwrap();

        assert!(stream.is_seekable());
        assert_eq!(stream.byte_len(), Some(42));
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(
            parse_content_range("bytes 100-999/1000"),
            Some((100, Some(1000)))
        );
        assert_eq!(parse_content_range("bytes 0-99/*"), Some((0, None)));
        assert_eq!(parse_content_range("items 0-1/2"), None);
    }

    #[test]
    fn test_extract_extension_from_url() {
        assert_eq!(
            extract_extension_from_url("http://example.com/song.mp3"),
            Some("mp3".to_string())
        );
        assert_eq!(
            extract_extension_from_url("http://example.com/song.flac?token=xxx"),
            Some("flac".to_string())
        );
        assert_eq!(
            extract_extension_from_url("http://example.com/song.txt"),
            None
        );
        assert_eq!(extract_extension_from_url("http://example.com/song"), None);
    }

    #[test]
    fn test_content_type_to_extension() {
        assert_eq!(
            content_type_to_extension("audio/mpeg"),
            Some("mp3".to_string())
        );
        assert_eq!(
            content_type_to_extension("audio/x-wav; charset=binary"),
            Some("wav".to_string())
        );
        assert_eq!(content_type_to_extension("text/html"), None);
    }
}
