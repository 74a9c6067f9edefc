use thiserror::Error;

use crate::editor::{CropError, SequenceError};
use crate::export::WriteError;
use crate::gallery::SelectionError;
use crate::loader::DecodeError;
use crate::session::{SessionError, WorkerError};
use crate::storage::SinkError;

pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Crop(#[from] CropError),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Session(#[from] SessionError),
}
