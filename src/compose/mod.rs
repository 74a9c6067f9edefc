//! Stacks cropped slices of an edit sequence into a single raster.
//!
//! Composition runs in two phases: [`plan`] computes the canvas and where each
//! slice lands, [`render`] copies pixels. Slices are never scaled; narrower
//! slices are centred across the axis over a transparent background.

use image::RgbaImage;

use crate::editor::{CropWindow, EditSequence};
use crate::geometry::{Axis, ImageSize, PixelSpan};

/// Where one slice of the sequence lands on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlicePlacement {
    /// Index of the image in the sequence.
    pub index: usize,
    /// Source pixel range along the axis.
    pub span: PixelSpan,
    /// Slice dimensions on the canvas.
    pub size: ImageSize,
    /// Top-left corner on the canvas.
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionPlan {
    pub axis: Axis,
    pub canvas: ImageSize,
    pub slices: Vec<SlicePlacement>,
    /// Sequence indices whose crop rounded down to zero pixels.
    pub dropped: Vec<usize>,
}

/// Pixel range covered by `crop` on an axis of `dim` pixels. The product is
/// taken in `f32` so `0.7` of 10 rows is 7 rows, not 6.
pub fn crop_span(dim: u32, crop: CropWindow) -> PixelSpan {
    let to_px = |fraction: f32| {
        let px = (dim as f32 * fraction).floor();
        (px.max(0.0) as u32).min(dim)
    };
    PixelSpan::new(to_px(crop.start()), to_px(crop.end()))
}

/// Lays out the sequence. `None` when no slice keeps at least one pixel.
pub fn plan(sequence: &EditSequence) -> Option<CompositionPlan> {
    let axis = sequence.axis();
    let mut kept = Vec::with_capacity(sequence.len());
    let mut dropped = Vec::new();

    for (index, image) in sequence.images().iter().enumerate() {
        let size = image.source().size();
        let span = crop_span(axis.along(size), image.crop());
        let across = axis.across(size);
        if span.is_empty() || across == 0 {
            dropped.push(index);
            continue;
        }
        kept.push((index, span, across));
    }

    if kept.is_empty() {
        tracing::debug!(images = sequence.len(), "nothing to compose");
        return None;
    }

    let canvas_across = kept.iter().map(|(_, _, across)| *across).max().unwrap_or(0);
    let mut offset = 0_u32;
    let slices = kept
        .into_iter()
        .map(|(index, span, across)| {
            let cross_offset = (canvas_across - across) / 2;
            let (x, y) = axis.point_from(offset, cross_offset);
            offset = offset.saturating_add(span.len());
            SlicePlacement {
                index,
                span,
                size: axis.size_from(span.len(), across),
                x,
                y,
            }
        })
        .collect::<Vec<_>>();

    Some(CompositionPlan {
        axis,
        canvas: axis.size_from(offset, canvas_across),
        slices,
        dropped,
    })
}

/// Renders a plan produced from the same `sequence`.
pub fn render(plan: &CompositionPlan, sequence: &EditSequence) -> RgbaImage {
    let mut canvas = RgbaImage::new(plan.canvas.width, plan.canvas.height);

    for slice in &plan.slices {
        let Some(image) = sequence.get(slice.index) else {
            tracing::warn!(index = slice.index, "planned slice missing from sequence");
            continue;
        };
        let (source_x, source_y) = plan.axis.point_from(slice.span.start, 0);
        copy_rows(
            &mut canvas,
            image.source().raster(),
            (source_x, source_y),
            slice.size,
            (slice.x, slice.y),
        );
    }

    canvas
}

fn copy_rows(
    canvas: &mut RgbaImage,
    source: &RgbaImage,
    (source_x, source_y): (u32, u32),
    size: ImageSize,
    (dest_x, dest_y): (u32, u32),
) {
    let row_len = size.width as usize * 4;
    let source_stride = source.width() as usize * 4;
    let canvas_stride = canvas.width() as usize * 4;
    let source_bytes = source.as_raw();
    let canvas_bytes: &mut [u8] = canvas;

    for row in 0..size.height as usize {
        let from = (source_y as usize + row) * source_stride + source_x as usize * 4;
        let to = (dest_y as usize + row) * canvas_stride + dest_x as usize * 4;
        let (Some(src_row), Some(dst_row)) = (
            source_bytes.get(from..from + row_len),
            canvas_bytes.get_mut(to..to + row_len),
        ) else {
            tracing::warn!(row, "slice row outside raster bounds");
            return;
        };
        dst_row.copy_from_slice(src_row);
    }
}

/// Plans and renders in one step.
pub fn compose(sequence: &EditSequence) -> Option<RgbaImage> {
    let plan = plan(sequence)?;
    let canvas = render(&plan, sequence);
    tracing::debug!(
        axis = plan.axis.label(),
        width = plan.canvas.width,
        height = plan.canvas.height,
        slices = plan.slices.len(),
        dropped = plan.dropped.len(),
        "composed sequence"
    );
    Some(canvas)
}
