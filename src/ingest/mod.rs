//! Frame ingestion sources.
//!
//! This module provides the sources a session can read frames from:
//! - `stub://name` synthetic grain scenes (demos, tests)
//! - HTTP MJPEG / JPEG snapshot cameras such as DroidCam (feature: ingest-http)
//! - Local image files or directories of images
//!
//! Every source yields `Frame`s already normalized to 640x480. The pipeline
//! only sees the `FrameSource` trait: a lazy, possibly failing sequence of
//! frames that ends with `Ok(None)`.
//!
//! Sources MUST NOT:
//! - Buffer more than the frame being handed over
//! - Write frames to disk

mod capture;
pub mod file;
#[cfg(feature = "ingest-http")]
pub mod mjpeg;
mod retry;
pub mod synthetic;

pub use capture::ThreadedCapture;
pub use file::FileSource;
#[cfg(feature = "ingest-http")]
pub use mjpeg::HttpSource;
pub use retry::{is_exhausted, ReadOutcome, RetryPolicy, SourceExhausted};
pub use synthetic::SyntheticSource;

use anyhow::Result;
use std::time::Duration;

use crate::frame::Frame;

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// A lazy, possibly failing sequence of frames.
pub trait FrameSource: Send {
    /// Open the underlying device or stream. Failure here is fatal.
    fn connect(&mut self) -> Result<()>;

    /// Next frame. `Ok(None)` means the stream has ended; `Err` is a
    /// transient read failure the caller may retry.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;

    /// Release the device or stream handle. Idempotent.
    fn release(&mut self) {}
}

/// Options applied when resolving a source URL.
#[derive(Clone, Debug, Default)]
pub struct SourceOptions {
    /// Restart file sources at the first image when they run out.
    pub loop_files: bool,
    /// Pace synthetic sources to this interval.
    pub synthetic_interval: Option<Duration>,
}

/// Source selected by URL scheme.
pub struct VideoSource {
    backend: Backend,
}

enum Backend {
    Synthetic(SyntheticSource),
    File(FileSource),
    #[cfg(feature = "ingest-http")]
    Http(HttpSource),
}

impl VideoSource {
    pub fn open(url: &str, options: &SourceOptions) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            anyhow::bail!("source url must not be empty");
        }
        let backend = if let Some(name) = url.strip_prefix("stub://") {
            Backend::Synthetic(SyntheticSource::new(name, options.synthetic_interval))
        } else if url.starts_with("http://") || url.starts_with("https://") {
            #[cfg(feature = "ingest-http")]
            {
                Backend::Http(HttpSource::new(url)?)
            }
            #[cfg(not(feature = "ingest-http"))]
            {
                anyhow::bail!("http sources require the ingest-http feature")
            }
        } else if url.contains("://") {
            anyhow::bail!(
                "unsupported source '{}'; expected stub://, http(s):// or a local path",
                url
            );
        } else {
            Backend::File(FileSource::new(url, options.loop_files))
        };
        Ok(Self { backend })
    }

    fn inner(&self) -> &dyn FrameSource {
        match &self.backend {
            Backend::Synthetic(source) => source,
            Backend::File(source) => source,
            #[cfg(feature = "ingest-http")]
            Backend::Http(source) => source,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn FrameSource {
        match &mut self.backend {
            Backend::Synthetic(source) => source,
            Backend::File(source) => source,
            #[cfg(feature = "ingest-http")]
            Backend::Http(source) => source,
        }
    }
}

impl FrameSource for VideoSource {
    fn connect(&mut self) -> Result<()> {
        self.inner_mut().connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.inner_mut().next_frame()
    }

    fn is_healthy(&self) -> bool {
        self.inner().is_healthy()
    }

    fn stats(&self) -> SourceStats {
        self.inner().stats()
    }

    fn release(&mut self) {
        self.inner_mut().release()
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_backends_by_scheme() {
        let options = SourceOptions::default();
        let stub = VideoSource::open("stub://line", &options).unwrap();
        assert!(matches!(&stub.backend, Backend::Synthetic(_)));
        let local = VideoSource::open("/var/lib/frames", &options).unwrap();
        assert!(matches!(&local.backend, Backend::File(_)));
        assert!(VideoSource::open("rtsp://camera/stream", &options).is_err());
        assert!(VideoSource::open("   ", &options).is_err());
    }

    #[test]
    fn stub_source_streams_frames() {
        let mut source = VideoSource::open("stub://line", &SourceOptions::default()).unwrap();
        source.connect().unwrap();
        let frame = source.next_frame().unwrap().expect("frame");
        assert_eq!((frame.width(), frame.height()), (640, 480));
        assert_eq!(source.stats().source, "stub://line");
    }
}
