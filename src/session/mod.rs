//! Foreground edit session.
//!
//! Every mutation happens here, on the caller's thread, and is serialized with
//! respect to the background worker: jobs receive a snapshot clone of the
//! sequence (crop values copied, rasters shared) and their results are only
//! applied when drained through [`EditSession::poll_events`] or
//! [`EditSession::wait_for_jobs`].
//!
//! A raster stays alive while any of these hold it: the live sequence, a
//! history snapshot, or a job snapshot still in flight. [`EditSession::close`]
//! drops all three.

pub mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::RgbaImage;
use thiserror::Error;

use crate::compose;
use crate::config::{AppConfig, ImportOrder};
use crate::editor::{
    CropDrag, CropError, CropHandle, CropWindow, EditHistory, EditSequence, SequenceError,
    CROP_HANDLE_TOLERANCE,
};
use crate::export::{ExportFormat, Exporter, WriteError};
use crate::gallery::{GalleryImage, GallerySelection, SourceRef};
use crate::geometry::Axis;
use crate::loader::{BatchLoad, DecodeError, ImageLoader};
use crate::storage::{DeletionOutcome, OutputSink, SinkHandle, SourceDeleter};

pub use worker::{CancelToken, Job, Worker, WorkerError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Crop(#[from] CropError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error("session is closed")]
    Closed,
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[derive(Debug)]
pub struct ImportReport {
    pub requested: usize,
    pub loaded: usize,
    pub failures: Vec<DecodeError>,
}

impl ImportReport {
    pub fn is_complete(&self) -> bool {
        self.loaded == self.requested
    }
}

#[derive(Debug)]
pub enum ExportOutcome {
    Saved {
        handle: SinkHandle,
        /// Present when source deletion was requested.
        deletion: Option<DeletionOutcome>,
    },
    /// Every slice was empty after cropping, or the sequence had no images.
    NothingToExport,
    Failed(WriteError),
}

#[derive(Debug)]
pub enum SessionEvent {
    Imported(ImportReport),
    /// Latest requested preview; `None` when there is nothing to compose.
    PreviewReady(Option<RgbaImage>),
    Exported(ExportOutcome),
}

enum JobOutput {
    Loaded(BatchLoad),
    Preview {
        generation: u64,
        raster: Option<RgbaImage>,
    },
    Exported(ExportOutcome),
}

struct ActiveDrag {
    key: u64,
    drag: CropDrag,
    before: CropWindow,
}

pub struct EditSession {
    config: AppConfig,
    sequence: EditSequence,
    history: EditHistory,
    worker: Worker<JobOutput>,
    loader: ImageLoader,
    exporter: Arc<Exporter>,
    deleter: Arc<dyn SourceDeleter>,
    preview_generation: Arc<AtomicU64>,
    drag: Option<ActiveDrag>,
    closed: bool,
}

impl std::fmt::Debug for EditSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditSession")
            .field("images", &self.sequence.len())
            .field("axis", &self.sequence.axis())
            .field("history", &self.history.len())
            .field("pending_jobs", &self.worker.pending())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl EditSession {
    pub fn new(
        config: AppConfig,
        loader: ImageLoader,
        sink: Arc<dyn OutputSink>,
        deleter: Arc<dyn SourceDeleter>,
    ) -> Self {
        let exporter = Arc::new(Exporter::new(sink, config.output_subdir.clone()));
        Self {
            sequence: EditSequence::new(config.axis),
            history: EditHistory::new(config.history_capacity),
            worker: Worker::new(),
            loader,
            exporter,
            deleter,
            preview_generation: Arc::new(AtomicU64::new(0)),
            drag: None,
            closed: false,
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn sequence(&self) -> &EditSequence {
        &self.sequence
    }

    pub fn history(&self) -> &EditHistory {
        &self.history
    }

    pub fn axis(&self) -> Axis {
        self.sequence.axis()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn pending_jobs(&self) -> usize {
        self.worker.pending()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        Ok(())
    }

    fn record(&mut self) {
        self.history.record(&self.sequence);
    }

    /// Queues a batch load; the images are appended once the job is drained.
    pub fn import(&mut self, images: Vec<GalleryImage>) -> SessionResult<()> {
        self.ensure_open()?;
        let images = self.config.import_order.arrange(images);
        tracing::debug!(
            requested = images.len(),
            reversed = self.config.import_order == ImportOrder::Reversed,
            "queueing import"
        );
        let loader = self.loader.clone();
        self.worker.submit(Box::new(move |token: &CancelToken| {
            let batch = loader.load_batch_until(&images, || token.is_cancelled());
            (!batch.cancelled).then_some(JobOutput::Loaded(batch))
        }))?;
        Ok(())
    }

    /// Gallery selection over `images` using the configured policy.
    pub fn selection(&self, images: Vec<GalleryImage>) -> GallerySelection {
        GallerySelection::new(images, self.config.selection_policy)
    }

    pub fn import_selection(&mut self, selection: GallerySelection) -> SessionResult<()> {
        self.import(selection.into_ordered())
    }

    pub fn remove(&mut self, index: usize) -> SessionResult<()> {
        self.ensure_open()?;
        let removed = self.sequence.remove(index)?;
        self.drag = None;
        self.record();
        tracing::debug!(
            index,
            key = removed.key(),
            holders = removed.raster_holders(),
            "image removed"
        );
        Ok(())
    }

    pub fn move_backward(&mut self, index: usize) -> SessionResult<bool> {
        self.ensure_open()?;
        let moved = self.sequence.move_backward(index)?;
        if moved {
            self.record();
        }
        Ok(moved)
    }

    pub fn move_forward(&mut self, index: usize) -> SessionResult<bool> {
        self.ensure_open()?;
        let moved = self.sequence.move_forward(index)?;
        if moved {
            self.record();
        }
        Ok(moved)
    }

    pub fn set_axis(&mut self, axis: Axis) -> SessionResult<bool> {
        self.ensure_open()?;
        let changed = self.sequence.set_axis(axis);
        if changed {
            self.axis_changed();
        }
        Ok(changed)
    }

    pub fn toggle_axis(&mut self) -> SessionResult<Axis> {
        self.ensure_open()?;
        let axis = self.sequence.toggle_axis();
        self.axis_changed();
        Ok(axis)
    }

    /// An empty sequence has nothing to undo back to, so only the axis moves.
    fn axis_changed(&mut self) {
        self.drag = None;
        if !self.sequence.is_empty() {
            self.record();
        }
    }

    pub fn set_crop_start(&mut self, index: usize, value: f32) -> SessionResult<bool> {
        self.set_crop(index, CropHandle::Start, value)
    }

    pub fn set_crop_end(&mut self, index: usize, value: f32) -> SessionResult<bool> {
        self.set_crop(index, CropHandle::End, value)
    }

    /// Sets both bounds at once. The pair must already be a valid window.
    pub fn apply_crop(&mut self, index: usize, start: f32, end: f32) -> SessionResult<bool> {
        self.ensure_open()?;
        let window = CropWindow::try_new(start, end)?;
        let changed = self.sequence.set_crop_window(index, window)?;
        if changed {
            self.drag = None;
            self.record();
        }
        Ok(changed)
    }

    fn set_crop(&mut self, index: usize, handle: CropHandle, value: f32) -> SessionResult<bool> {
        self.ensure_open()?;
        let changed = self.sequence.set_crop(index, handle, value)?;
        if changed {
            self.record();
        }
        Ok(changed)
    }

    /// Grabs the crop handle of image `index` nearest to `position`, if any
    /// lies within the default tolerance.
    pub fn begin_crop_drag(
        &mut self,
        index: usize,
        position: f32,
    ) -> SessionResult<Option<CropHandle>> {
        self.ensure_open()?;
        let image = self.sequence.get(index).ok_or(SequenceError::IndexOutOfRange {
            index,
            len: self.sequence.len(),
        })?;
        let before = image.crop();
        let mut drag = CropDrag::default();
        let grabbed = drag.begin(&before, position, CROP_HANDLE_TOLERANCE);
        self.drag = grabbed.map(|_| ActiveDrag {
            key: image.key(),
            drag,
            before,
        });
        Ok(grabbed)
    }

    pub fn drag_crop(&mut self, position: f32) -> SessionResult<bool> {
        self.ensure_open()?;
        let Some(active) = self.drag.as_ref() else {
            return Ok(false);
        };
        let Some(index) = self.sequence.position(active.key) else {
            self.drag = None;
            return Ok(false);
        };
        let window = self.sequence.crop_mut(index)?;
        Ok(active.drag.drag_to(window, position))
    }

    /// Releases the handle; records one history entry if the window moved.
    pub fn end_crop_drag(&mut self) -> SessionResult<bool> {
        self.ensure_open()?;
        let Some(active) = self.drag.take() else {
            return Ok(false);
        };
        let changed = self
            .sequence
            .position(active.key)
            .and_then(|index| self.sequence.get(index))
            .is_some_and(|image| image.crop() != active.before);
        if changed {
            self.record();
        }
        Ok(changed)
    }

    pub fn undo(&mut self) -> SessionResult<bool> {
        self.ensure_open()?;
        let snapshot = self.history.undo();
        Ok(self.restore(snapshot))
    }

    pub fn redo(&mut self) -> SessionResult<bool> {
        self.ensure_open()?;
        let snapshot = self.history.redo();
        Ok(self.restore(snapshot))
    }

    fn restore(&mut self, snapshot: Option<EditSequence>) -> bool {
        let Some(snapshot) = snapshot else {
            return false;
        };
        self.drag = None;
        self.sequence = snapshot;
        true
    }

    /// Queues a preview compose. Only the most recent request is delivered.
    pub fn request_preview(&mut self) -> SessionResult<u64> {
        self.ensure_open()?;
        let generation = self.preview_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let latest = self.preview_generation.clone();
        let snapshot = self.sequence.clone();
        self.worker.submit(Box::new(move |token: &CancelToken| {
            let superseded = || token.is_cancelled() || latest.load(Ordering::SeqCst) != generation;
            if superseded() {
                tracing::debug!(generation, "skipping superseded preview");
                return None;
            }
            let raster = compose::compose(&snapshot);
            drop(snapshot);
            (!superseded()).then_some(JobOutput::Preview { generation, raster })
        }))?;
        Ok(generation)
    }

    /// Exports with the configured format and deletion preference.
    pub fn save(&mut self) -> SessionResult<()> {
        self.export(
            self.config.export_format,
            self.config.delete_sources_after_export,
        )
    }

    /// Queues compose and export of the current sequence. With
    /// `delete_sources`, a successful save requests deletion of the source
    /// references and the session is cleared once the result is drained.
    pub fn export(&mut self, format: ExportFormat, delete_sources: bool) -> SessionResult<()> {
        self.ensure_open()?;
        let snapshot = self.sequence.clone();
        let exporter = self.exporter.clone();
        let deleter = self.deleter.clone();
        self.worker.submit(Box::new(move |token: &CancelToken| {
            let Some(raster) = compose::compose(&snapshot) else {
                return Some(JobOutput::Exported(ExportOutcome::NothingToExport));
            };
            let handle = match exporter.export_until(&raster, format, || token.is_cancelled()) {
                Ok(handle) => handle,
                Err(WriteError::Cancelled) => return None,
                Err(err) => return Some(JobOutput::Exported(ExportOutcome::Failed(err))),
            };
            drop(raster);
            let deletion = delete_sources.then(|| {
                let sources = unique_sources(&snapshot);
                deleter.request_deletion(&sources)
            });
            Some(JobOutput::Exported(ExportOutcome::Saved { handle, deletion }))
        }))?;
        Ok(())
    }

    /// Applies finished jobs without blocking.
    pub fn poll_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(output) = self.worker.try_next() {
            events.extend(self.apply(output));
        }
        events
    }

    /// Blocks until every queued job has finished and applies the results.
    pub fn wait_for_jobs(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(output) = self.worker.wait_next() {
            events.extend(self.apply(output));
        }
        events
    }

    fn apply(&mut self, output: JobOutput) -> Option<SessionEvent> {
        if self.closed {
            return None;
        }
        match output {
            JobOutput::Loaded(batch) => {
                let loaded = batch.loaded.len();
                for source in batch.loaded {
                    self.sequence.push(source);
                }
                if loaded > 0 {
                    self.record();
                }
                tracing::debug!(
                    loaded,
                    images = self.sequence.len(),
                    raster_bytes = self.sequence.raster_bytes(),
                    "import applied"
                );
                Some(SessionEvent::Imported(ImportReport {
                    requested: batch.requested,
                    loaded,
                    failures: batch.failures,
                }))
            }
            JobOutput::Preview { generation, raster } => {
                if generation != self.preview_generation.load(Ordering::SeqCst) {
                    tracing::debug!(generation, "dropping stale preview");
                    return None;
                }
                Some(SessionEvent::PreviewReady(raster))
            }
            JobOutput::Exported(outcome) => {
                if let ExportOutcome::Saved {
                    deletion: Some(deletion),
                    ..
                } = &outcome
                {
                    if let DeletionOutcome::Completed(report) = deletion {
                        if report.failed_count() > 0 {
                            tracing::warn!(
                                deleted = report.deleted_count(),
                                failed = report.failed_count(),
                                "some source images were not deleted"
                            );
                        }
                    }
                    self.clear();
                }
                Some(SessionEvent::Exported(outcome))
            }
        }
    }

    fn clear(&mut self) {
        self.drag = None;
        let raster_bytes = self.sequence.raster_bytes();
        let released = self.sequence.clear();
        self.history.clear();
        tracing::info!(released, raster_bytes, "session cleared");
    }

    /// Cancels in-flight work, discards its results and releases every
    /// raster the session holds. Further calls return [`SessionError::Closed`].
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.worker.shutdown();
        self.clear();
        self.closed = true;
    }
}

impl Drop for EditSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn unique_sources(sequence: &EditSequence) -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = Vec::with_capacity(sequence.len());
    for image in sequence.images() {
        let reference = &image.source().reference;
        if !sources.contains(reference) {
            sources.push(reference.clone());
        }
    }
    sources
}
