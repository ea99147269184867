//! HTTP camera frame source.
//!
//! `HttpSource` reads frames from phone or IP cameras (DroidCam, ESP32-CAM
//! and the like) that serve either a `multipart/x-mixed-replace` MJPEG
//! stream or a single JPEG snapshot per request.
//!
//! The HTTP source MUST NOT:
//! - Store decoded frames to disk
//! - Forward frames anywhere but the caller

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use url::Url;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_GRACE: Duration = Duration::from_secs(5);
const STALL_GRACE: Duration = Duration::from_secs(2);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpSource {
    url: String,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    /// Snapshot body fetched by `connect`, served as the first frame.
    pending: Option<Vec<u8>>,
    connected_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    frame_count: u64,
    last_error: Option<String>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl HttpSource {
    pub fn new(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).context("parse camera url")?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported camera scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        Ok(Self {
            url: url.to_string(),
            agent: build_agent(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT),
            stream: None,
            pending: None,
            connected_at: None,
            last_frame_at: None,
            frame_count: 0,
            last_error: None,
        })
    }

    /// Replace the connect and per-read socket timeouts.
    ///
    /// A read that stalls past `read` fails instead of blocking, so a frozen
    /// camera surfaces as a retryable error.
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.agent = build_agent(connect, read);
        self
    }

    fn read_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(bytes) = self.pending.take() {
            return Ok(Some(bytes));
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("http source not connected; call connect() first"))?;
        match stream {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg(),
            HttpStream::SingleJpeg => fetch_single_jpeg(&self.agent, &self.url).map(Some),
        }
    }
}

impl FrameSource for HttpSource {
    fn connect(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("connect to camera at {}", self.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            let reader = response.into_reader();
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(reader)));
            log::info!("HttpSource: streaming mjpeg from {}", self.url);
        } else {
            self.pending = Some(read_snapshot_body(response)?);
            self.stream = Some(HttpStream::SingleJpeg);
            log::info!("HttpSource: polling jpeg snapshots from {}", self.url);
        }
        self.connected_at = Some(Instant::now());
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let result = self.read_jpeg().and_then(|bytes| match bytes {
            Some(bytes) => decode_jpeg(&bytes).map(Some),
            None => Ok(None),
        });
        match result {
            Ok(Some(frame)) => {
                self.frame_count += 1;
                self.last_frame_at = Some(Instant::now());
                self.last_error = None;
                Ok(Some(frame))
            }
            Ok(None) => {
                log::info!("HttpSource: stream from {} ended", self.url);
                Ok(None)
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= CONNECT_GRACE;
        };
        last_frame_at.elapsed() <= STALL_GRACE
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.url.clone(),
        }
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            log::info!("HttpSource: released {}", self.url);
        }
        self.pending = None;
        self.connected_at = None;
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG in the stream, or `None` once the server closes it.
    fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                trim_to_last_soi(&mut self.buffer, MAX_JPEG_BYTES);
            }
        }
    }
}

/// Drop bytes that cannot belong to a frame, keeping the tail from the last
/// SOI marker when that tail still fits in `max_frame`.
fn trim_to_last_soi(buffer: &mut Vec<u8>, max_frame: usize) {
    if buffer.is_empty() {
        return;
    }
    let keep_from = match buffer.windows(2).rposition(|w| w == [0xFF, 0xD8]) {
        Some(start) if buffer.len() - start <= max_frame => start,
        // a trailing 0xFF may be the first half of the next SOI
        _ => buffer.len() - 1,
    };
    buffer.drain(..keep_from);
}

fn build_agent(connect: Duration, read: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(connect)
        .timeout_read(read)
        .build()
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    read_snapshot_body(response)
}

fn read_snapshot_body(response: ureq::Response) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<Frame> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    Ok(Frame::from_rgb(image.into_rgb8()))
}

/// Byte range of the first SOI..EOI pair in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
