pub mod compose;
pub mod config;
pub mod editor;
pub mod error;
pub mod export;
pub mod gallery;
pub mod geometry;
pub mod loader;
pub mod logging;
pub mod session;
pub mod storage;
pub use error::{AppError, AppResult};

use std::sync::Arc;

use loader::{FileSystemSource, ImageLoader};
use session::EditSession;
use storage::{DirectorySink, FileSourceDeleter};

/// Entrypoint used by higher-level integrations and CLI bindings.
pub fn start_session() -> AppResult<EditSession> {
    logging::init();
    tracing::info!("starting stitcher session");

    let config = config::load_app_config();
    let loader = ImageLoader::new(Arc::new(FileSystemSource), config.max_decode_dimension);
    let sink = DirectorySink::with_default_paths()?;
    tracing::info!(
        root = %sink.root().display(),
        subdir = %config.output_subdir,
        axis = config.axis.label(),
        "session ready"
    );

    Ok(EditSession::new(
        config,
        loader,
        Arc::new(sink),
        Arc::new(FileSourceDeleter),
    ))
}
