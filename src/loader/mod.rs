//! Decodes gallery references into RGBA rasters with bounded dimensions.

use std::fs;
use std::io::{self, Cursor};
use std::sync::Arc;

use image::{imageops, DynamicImage, ImageError, ImageFormat, ImageReader, Limits};
use thiserror::Error;

use crate::editor::SourceImage;
use crate::gallery::{GalleryImage, SourceRef};
use crate::geometry::ImageSize;

pub const MAX_DECODE_DIMENSION: u32 = 4096;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to read {reference}: {source}")]
    Read {
        reference: SourceRef,
        #[source]
        source: io::Error,
    },
    #[error("source {reference} is empty")]
    Empty { reference: SourceRef },
    #[error("unsupported image format: {reference}")]
    UnsupportedFormat { reference: SourceRef },
    #[error("{reference} exceeds the decode memory budget: {source}")]
    TooLarge {
        reference: SourceRef,
        #[source]
        source: ImageError,
    },
    #[error("failed to decode {reference}: {source}")]
    Corrupt {
        reference: SourceRef,
        #[source]
        source: ImageError,
    },
}

impl DecodeError {
    pub fn reference(&self) -> &SourceRef {
        match self {
            Self::Read { reference, .. }
            | Self::Empty { reference }
            | Self::UnsupportedFormat { reference }
            | Self::TooLarge { reference, .. }
            | Self::Corrupt { reference, .. } => reference,
        }
    }

    fn from_image(reference: &SourceRef, err: ImageError) -> Self {
        match err {
            ImageError::Unsupported(_) => Self::UnsupportedFormat {
                reference: reference.clone(),
            },
            source @ ImageError::Limits(_) => Self::TooLarge {
                reference: reference.clone(),
                source,
            },
            source => Self::Corrupt {
                reference: reference.clone(),
                source,
            },
        }
    }
}

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Byte access to the storage behind a [`SourceRef`].
pub trait ImageSource: Send + Sync {
    fn read(&self, reference: &SourceRef) -> io::Result<Vec<u8>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FileSystemSource;

impl ImageSource for FileSystemSource {
    fn read(&self, reference: &SourceRef) -> io::Result<Vec<u8>> {
        fs::read(reference.path())
    }
}

/// Smallest power of two that brings both sides within `max_dimension`.
pub fn downsample_factor(width: u32, height: u32, max_dimension: u32) -> u32 {
    let max_dimension = max_dimension.max(1);
    let mut scale = 1_u32;
    while (width / scale > max_dimension || height / scale > max_dimension) && scale < 1 << 31 {
        scale *= 2;
    }
    scale
}

/// Outcome of loading several references. Failures never abort the batch.
#[derive(Debug, Default)]
pub struct BatchLoad {
    pub requested: usize,
    pub loaded: Vec<SourceImage>,
    pub failures: Vec<DecodeError>,
    pub cancelled: bool,
}

impl BatchLoad {
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct ImageLoader {
    source: Arc<dyn ImageSource>,
    max_dimension: u32,
    /// Upper bound on decoder allocations. `None` lets any image that passes
    /// the header check decode at full size before it is downsampled.
    max_alloc: Option<u64>,
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("max_dimension", &self.max_dimension)
            .field("max_alloc", &self.max_alloc)
            .finish_non_exhaustive()
    }
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new(Arc::new(FileSystemSource), MAX_DECODE_DIMENSION)
    }
}

impl ImageLoader {
    pub fn new(source: Arc<dyn ImageSource>, max_dimension: u32) -> Self {
        Self {
            source,
            max_dimension: max_dimension.max(1),
            max_alloc: None,
        }
    }

    pub fn with_max_alloc(mut self, max_alloc: Option<u64>) -> Self {
        self.max_alloc = max_alloc;
        self
    }

    fn decode_limits(&self) -> Limits {
        let mut limits = Limits::no_limits();
        limits.max_alloc = self.max_alloc;
        limits
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    /// Reads the header for dimensions, then decodes and subsamples by the
    /// power-of-two factor that fits `max_dimension`.
    pub fn load(&self, image: &GalleryImage) -> DecodeResult<SourceImage> {
        let reference = &image.reference;
        let bytes = self
            .source
            .read(reference)
            .map_err(|source| DecodeError::Read {
                reference: reference.clone(),
                source,
            })?;
        if bytes.is_empty() {
            return Err(DecodeError::Empty {
                reference: reference.clone(),
            });
        }

        let format = guess_format(reference, &bytes)?;
        let (width, height) = ImageReader::with_format(Cursor::new(&bytes), format)
            .into_dimensions()
            .map_err(|err| DecodeError::from_image(reference, err))?;
        let scale = downsample_factor(width, height, self.max_dimension);

        let mut reader = ImageReader::with_format(Cursor::new(&bytes), format);
        reader.limits(self.decode_limits());
        let decoded = reader
            .decode()
            .map_err(|err| DecodeError::from_image(reference, err))?;
        drop(bytes);

        let raster = downsample(decoded, width, height, scale).into_rgba8();

        tracing::debug!(
            reference = %reference,
            ?format,
            width,
            height,
            scale,
            "decoded source image"
        );
        Ok(SourceImage::new(
            image.id,
            reference.clone(),
            ImageSize::new(width, height),
            raster,
        ))
    }

    pub fn load_batch(&self, images: &[GalleryImage]) -> BatchLoad {
        self.load_batch_until(images, || false)
    }

    /// Loads in order, isolating per-image failures. `should_stop` is checked
    /// before each decode.
    pub fn load_batch_until(
        &self,
        images: &[GalleryImage],
        should_stop: impl Fn() -> bool,
    ) -> BatchLoad {
        let mut batch = BatchLoad {
            requested: images.len(),
            ..BatchLoad::default()
        };

        for image in images {
            if should_stop() {
                batch.cancelled = true;
                break;
            }
            match self.load(image) {
                Ok(source) => batch.loaded.push(source),
                Err(err) => {
                    tracing::warn!(reference = %image.reference, %err, "skipping image that failed to load");
                    batch.failures.push(err);
                }
            }
        }

        tracing::info!(
            loaded = batch.loaded.len(),
            requested = batch.requested,
            cancelled = batch.cancelled,
            "batch load finished"
        );
        batch
    }
}

/// Resizes in the decoded colour type so no full-size RGBA copy is made.
fn downsample(decoded: DynamicImage, width: u32, height: u32, scale: u32) -> DynamicImage {
    if scale <= 1 {
        return decoded;
    }
    decoded.resize_exact(
        (width / scale).max(1),
        (height / scale).max(1),
        imageops::FilterType::Triangle,
    )
}

fn guess_format(reference: &SourceRef, bytes: &[u8]) -> DecodeResult<ImageFormat> {
    image::guess_format(bytes)
        .ok()
        .or_else(|| ImageFormat::from_path(reference.path()).ok())
        .ok_or_else(|| DecodeError::UnsupportedFormat {
            reference: reference.clone(),
        })
}
