//! Encodes composed rasters and writes them into an [`OutputSink`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageError, Rgb, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{OutputSink, SinkError, SinkHandle};

pub const DEFAULT_OUTPUT_SUBDIR: &str = "ImageStitcher";
const FILE_NAME_PREFIX: &str = "stitched_";
const JPEG_QUALITY: u8 = 100;
/// Name collisions tolerated before creating the entry gives up.
const MAX_NAME_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Png,
    Jpeg,
}

impl ExportFormat {
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to create output entry: {0}")]
    Create(#[source] SinkError),
    #[error("failed to encode {format:?} output: {source}")]
    Encode {
        format: ExportFormat,
        #[source]
        source: ImageError,
    },
    #[error("failed to write output entry {location}: {source}")]
    Write {
        location: PathBuf,
        #[source]
        source: SinkError,
    },
    #[error("export cancelled")]
    Cancelled,
}

pub type WriteResult<T> = std::result::Result<T, WriteError>;

/// Encodes PNG at best compression or JPEG at quality 100. JPEG drops alpha;
/// transparent margins become black.
pub fn encode(raster: &RgbaImage, format: ExportFormat) -> Result<Vec<u8>, ImageError> {
    let mut bytes = Vec::new();
    let (width, height) = raster.dimensions();
    match format {
        ExportFormat::Png => {
            PngEncoder::new_with_quality(&mut bytes, CompressionType::Best, FilterType::Adaptive)
                .write_image(raster.as_raw(), width, height, ExtendedColorType::Rgba8)?;
        }
        ExportFormat::Jpeg => {
            let rgb = RgbImage::from_fn(width, height, |x, y| {
                let [r, g, b, _] = raster.get_pixel(x, y).0;
                Rgb([r, g, b])
            });
            JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
    }
    Ok(bytes)
}

/// Millisecond stamps that strictly increase across calls.
#[derive(Debug, Default)]
pub struct FileNameClock {
    last: AtomicU64,
}

impl FileNameClock {
    pub fn next_stamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0);
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(previous.saturating_add(1))
    }
}

pub struct Exporter {
    sink: Arc<dyn OutputSink>,
    relative_path: String,
    clock: FileNameClock,
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("relative_path", &self.relative_path)
            .finish_non_exhaustive()
    }
}

impl Exporter {
    pub fn new(sink: Arc<dyn OutputSink>, relative_path: impl Into<String>) -> Self {
        Self {
            sink,
            relative_path: relative_path.into(),
            clock: FileNameClock::default(),
        }
    }

    pub fn file_name(&self, format: ExportFormat) -> String {
        format!(
            "{FILE_NAME_PREFIX}{}.{}",
            self.clock.next_stamp(),
            format.extension()
        )
    }

    /// Creates a pending entry, moving to the next stamp when another writer
    /// already took the name.
    fn create_entry(&self, format: ExportFormat) -> WriteResult<SinkHandle> {
        let mut attempt = 1;
        loop {
            let name = self.file_name(format);
            match self
                .sink
                .create_pending(&name, format.mime(), &self.relative_path)
            {
                Err(SinkError::AlreadyExists { path }) if attempt < MAX_NAME_ATTEMPTS => {
                    tracing::debug!(path = %path.display(), attempt, "output name taken; retrying");
                    attempt += 1;
                }
                result => return result.map_err(WriteError::Create),
            }
        }
    }

    pub fn export(&self, raster: &RgbaImage, format: ExportFormat) -> WriteResult<SinkHandle> {
        self.export_until(raster, format, || false)
    }

    /// Creates a pending entry, encodes and writes. Any failure after the
    /// entry exists discards it before the error is returned. `should_stop`
    /// is checked once encoding finished.
    pub fn export_until(
        &self,
        raster: &RgbaImage,
        format: ExportFormat,
        should_stop: impl Fn() -> bool,
    ) -> WriteResult<SinkHandle> {
        let entry = self.create_entry(format)?;

        let written = encode(raster, format)
            .map_err(|source| WriteError::Encode { format, source })
            .and_then(|bytes| {
                if should_stop() {
                    return Err(WriteError::Cancelled);
                }
                self.sink
                    .write(&entry, &bytes)
                    .map_err(|source| WriteError::Write {
                        location: entry.location.clone(),
                        source,
                    })
            });

        match written {
            Ok(()) => {
                tracing::info!(
                    location = %entry.location.display(),
                    mime = format.mime(),
                    width = raster.width(),
                    height = raster.height(),
                    "exported stitched image"
                );
                Ok(entry)
            }
            Err(err) => {
                if let Err(discard_err) = self.sink.discard(&entry) {
                    tracing::warn!(
                        location = %entry.location.display(),
                        ?discard_err,
                        "failed to discard pending output entry"
                    );
                }
                tracing::warn!(%err, "export failed");
                Err(err)
            }
        }
    }
}
