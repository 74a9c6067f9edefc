//! Edit model: crop windows, the ordered image sequence and its undo history.

pub mod crop;
pub mod history;
pub mod sequence;

pub use crop::{CropDrag, CropError, CropHandle, CropWindow, CROP_HANDLE_TOLERANCE, CROP_MIN_SPAN};
pub use history::{EditHistory, HistoryAction, HistoryEntry, DEFAULT_HISTORY_CAPACITY};
pub use sequence::{EditSequence, EditableImage, SequenceError, SequenceResult, SourceImage};
