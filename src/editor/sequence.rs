use std::fmt;
use std::sync::Arc;

use image::RgbaImage;
use thiserror::Error;

use super::crop::{CropHandle, CropWindow};
use crate::gallery::SourceRef;
use crate::geometry::{Axis, ImageSize};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    #[error("sequence index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

pub type SequenceResult<T> = std::result::Result<T, SequenceError>;

/// A decoded source. Pixels are never mutated after loading.
pub struct SourceImage {
    pub id: u64,
    pub reference: SourceRef,
    /// Dimensions of the encoded source before any downsampling.
    pub intrinsic: ImageSize,
    raster: RgbaImage,
}

impl SourceImage {
    pub fn new(id: u64, reference: SourceRef, intrinsic: ImageSize, raster: RgbaImage) -> Self {
        Self {
            id,
            reference,
            intrinsic,
            raster,
        }
    }

    pub fn raster(&self) -> &RgbaImage {
        &self.raster
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.raster.width(), self.raster.height())
    }

    pub fn byte_len(&self) -> usize {
        self.raster.as_raw().len()
    }
}

impl fmt::Debug for SourceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceImage")
            .field("id", &self.id)
            .field("reference", &self.reference)
            .field("intrinsic", &self.intrinsic)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

/// A source placed in the sequence with its crop window.
///
/// Cloning copies the crop window and shares the source through `Arc`; the
/// raster is freed when the last sequence or history snapshot holding it
/// drops.
#[derive(Debug, Clone)]
pub struct EditableImage {
    key: u64,
    source: Arc<SourceImage>,
    crop: CropWindow,
}

impl EditableImage {
    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn source(&self) -> &SourceImage {
        &self.source
    }

    pub fn shared_source(&self) -> &Arc<SourceImage> {
        &self.source
    }

    pub fn crop(&self) -> CropWindow {
        self.crop
    }

    pub fn crop_mut(&mut self) -> &mut CropWindow {
        &mut self.crop
    }

    /// Number of live holders of this image's raster (sequence, snapshots and
    /// in-flight jobs).
    pub fn raster_holders(&self) -> usize {
        Arc::strong_count(&self.source)
    }
}

/// Ordered images plus the session axis. First image is drawn first.
#[derive(Debug, Clone)]
pub struct EditSequence {
    images: Vec<EditableImage>,
    axis: Axis,
    next_key: u64,
}

impl Default for EditSequence {
    fn default() -> Self {
        Self::new(Axis::default())
    }
}

impl EditSequence {
    pub fn new(axis: Axis) -> Self {
        Self {
            images: Vec::new(),
            axis,
            next_key: 1,
        }
    }

    fn allocate_key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key = self.next_key.saturating_add(1);
        key
    }

    fn check_index(&self, index: usize) -> SequenceResult<()> {
        if index >= self.images.len() {
            return Err(SequenceError::IndexOutOfRange {
                index,
                len: self.images.len(),
            });
        }
        Ok(())
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn set_axis(&mut self, axis: Axis) -> bool {
        let changed = self.axis != axis;
        self.axis = axis;
        changed
    }

    pub fn toggle_axis(&mut self) -> Axis {
        self.axis = self.axis.toggled();
        self.axis
    }

    pub fn images(&self) -> &[EditableImage] {
        &self.images
    }

    pub fn get(&self, index: usize) -> Option<&EditableImage> {
        self.images.get(index)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn position(&self, key: u64) -> Option<usize> {
        self.images.iter().position(|image| image.key == key)
    }

    pub fn push(&mut self, source: SourceImage) -> u64 {
        self.push_shared(Arc::new(source))
    }

    pub fn push_shared(&mut self, source: Arc<SourceImage>) -> u64 {
        let key = self.allocate_key();
        self.images.push(EditableImage {
            key,
            source,
            crop: CropWindow::FULL,
        });
        key
    }

    /// Removes and returns the image; dropping it releases the raster unless
    /// history snapshots still hold it.
    pub fn remove(&mut self, index: usize) -> SequenceResult<EditableImage> {
        self.check_index(index)?;
        Ok(self.images.remove(index))
    }

    /// Swaps the image with its predecessor. Returns `false` at the front.
    pub fn move_backward(&mut self, index: usize) -> SequenceResult<bool> {
        self.check_index(index)?;
        if index == 0 {
            return Ok(false);
        }
        self.images.swap(index, index - 1);
        Ok(true)
    }

    /// Swaps the image with its successor. Returns `false` at the back.
    pub fn move_forward(&mut self, index: usize) -> SequenceResult<bool> {
        self.check_index(index)?;
        if index + 1 >= self.images.len() {
            return Ok(false);
        }
        self.images.swap(index, index + 1);
        Ok(true)
    }

    pub fn set_crop(&mut self, index: usize, handle: CropHandle, value: f32) -> SequenceResult<bool> {
        self.check_index(index)?;
        Ok(self.images[index].crop.set(handle, value))
    }

    pub fn set_crop_start(&mut self, index: usize, value: f32) -> SequenceResult<bool> {
        self.set_crop(index, CropHandle::Start, value)
    }

    pub fn set_crop_end(&mut self, index: usize, value: f32) -> SequenceResult<bool> {
        self.set_crop(index, CropHandle::End, value)
    }

    /// Replaces the whole crop window. Returns `false` when it is unchanged.
    pub fn set_crop_window(&mut self, index: usize, window: CropWindow) -> SequenceResult<bool> {
        self.check_index(index)?;
        let crop = &mut self.images[index].crop;
        let changed = *crop != window;
        *crop = window;
        Ok(changed)
    }

    pub fn crop_mut(&mut self, index: usize) -> SequenceResult<&mut CropWindow> {
        self.check_index(index)?;
        Ok(self.images[index].crop_mut())
    }

    /// Drops every image. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.images.len();
        self.images.clear();
        removed
    }

    pub fn raster_bytes(&self) -> usize {
        self.images
            .iter()
            .map(|image| image.source.byte_len())
            .sum()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn solid_source(id: u64, width: u32, height: u32, rgba: [u8; 4]) -> SourceImage {
        let raster = RgbaImage::from_pixel(width, height, image::Rgba(rgba));
        SourceImage::new(
            id,
            SourceRef::new(format!("/sources/{id}.png")),
            ImageSize::new(width, height),
            raster,
        )
    }

    fn three_image_sequence() -> EditSequence {
        let mut sequence = EditSequence::new(Axis::Vertical);
        sequence.push(solid_source(1, 4, 4, [255, 0, 0, 255]));
        sequence.push(solid_source(2, 4, 4, [0, 255, 0, 255]));
        sequence.push(solid_source(3, 4, 4, [0, 0, 255, 255]));
        sequence
    }

    fn ids(sequence: &EditSequence) -> Vec<u64> {
        sequence
            .images()
            .iter()
            .map(|image| image.source().id)
            .collect()
    }

    #[test]
    fn push_allocates_unique_keys_in_order() {
        let sequence = three_image_sequence();
        let keys = sequence
            .images()
            .iter()
            .map(EditableImage::key)
            .collect::<Vec<_>>();
        assert_eq!(keys, [1, 2, 3]);
        assert_eq!(sequence.position(2), Some(1));
    }

    #[test]
    fn move_backward_and_forward_swap_neighbours() {
        let mut sequence = three_image_sequence();
        assert!(sequence.move_backward(2).unwrap());
        assert_eq!(ids(&sequence), [1, 3, 2]);
        assert!(sequence.move_forward(0).unwrap());
        assert_eq!(ids(&sequence), [3, 1, 2]);
        assert!(!sequence.move_backward(0).unwrap());
        assert!(!sequence.move_forward(2).unwrap());
        assert_eq!(ids(&sequence), [3, 1, 2]);
    }

    #[test]
    fn out_of_range_edits_return_errors() {
        let mut sequence = three_image_sequence();
        let expected = SequenceError::IndexOutOfRange { index: 5, len: 3 };
        assert_eq!(sequence.remove(5).unwrap_err(), expected);
        assert_eq!(sequence.move_forward(5).unwrap_err(), expected);
        assert_eq!(sequence.set_crop_start(5, 0.2).unwrap_err(), expected);
    }

    #[test]
    fn remove_releases_raster_when_no_snapshot_holds_it() {
        let mut sequence = three_image_sequence();
        let weak = Arc::downgrade(sequence.images()[1].shared_source());
        let removed = sequence.remove(1).unwrap();
        assert_eq!(removed.source().id, 2);
        drop(removed);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn clone_shares_raster_but_not_crop_values() {
        let mut sequence = three_image_sequence();
        let snapshot = sequence.clone();
        assert_eq!(sequence.images()[0].raster_holders(), 2);

        sequence.set_crop_start(0, 0.5).unwrap();
        assert_eq!(snapshot.images()[0].crop(), CropWindow::FULL);
        assert_eq!(sequence.images()[0].crop().start(), 0.5);

        let weak = Arc::downgrade(sequence.images()[0].shared_source());
        sequence.clear();
        assert!(weak.upgrade().is_some(), "snapshot still holds the raster");
        drop(snapshot);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn set_axis_reports_changes() {
        let mut sequence = EditSequence::new(Axis::Vertical);
        assert!(!sequence.set_axis(Axis::Vertical));
        assert!(sequence.set_axis(Axis::Horizontal));
        assert_eq!(sequence.toggle_axis(), Axis::Vertical);
    }
}
