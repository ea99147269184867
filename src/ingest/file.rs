//! Local image frame source.
//!
//! `FileSource` reads a single still image or every `.jpg`/`.jpeg`/`.png`
//! in a directory, in file-name order. Each image is decoded in memory and
//! normalized to the working resolution.
//!
//! The file source MUST NOT:
//! - Fetch remote URLs
//! - Write anything back to the source directory

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Local still-image frame source.
pub struct FileSource {
    path: String,
    loop_files: bool,
    files: Vec<PathBuf>,
    position: usize,
    frame_count: u64,
    connected: bool,
    last_error: Option<String>,
}

impl FileSource {
    /// `loop_files` restarts at the first image instead of ending the stream.
    pub fn new(path: &str, loop_files: bool) -> Self {
        Self {
            path: path.to_string(),
            loop_files,
            files: Vec::new(),
            position: 0,
            frame_count: 0,
            connected: false,
            last_error: None,
        }
    }

    /// Images this source will play, in order. Empty before `connect`.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl FrameSource for FileSource {
    fn connect(&mut self) -> Result<()> {
        let path = Path::new(&self.path);
        let files = if path.is_dir() {
            list_images(path)?
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(anyhow!("image source {} does not exist", self.path));
        };
        if files.is_empty() {
            return Err(anyhow!("no .jpg/.jpeg/.png images under {}", self.path));
        }
        log::info!(
            "FileSource: connected to {} ({} image(s))",
            self.path,
            files.len()
        );
        self.files = files;
        self.position = 0;
        self.connected = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("file source not connected; call connect() first"));
        }
        if self.position >= self.files.len() {
            if !self.loop_files {
                return Ok(None);
            }
            self.position = 0;
        }
        let file = &self.files[self.position];
        self.position += 1;

        match image::open(file).with_context(|| format!("decode image {}", file.display())) {
            Ok(decoded) => {
                self.frame_count += 1;
                self.last_error = None;
                Ok(Some(Frame::from_rgb(decoded.into_rgb8())))
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.connected && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.path.clone(),
        }
    }

    fn release(&mut self) {
        self.connected = false;
        self.files.clear();
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && has_image_extension(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}
