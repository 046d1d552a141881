//! Extraction stages that turn a task's copied document into image files.
//!
//! Each submodule implements exactly one stage and is independently
//! testable against a fake [`crate::document::DocumentSource`].
//!
//! ## Data Flow
//!
//! ```text
//!                 ┌──▶ text      ──▶ contents.txt
//! Book.pdf ──────┼──▶ rasterize ──▶ images/page_<n>.png
//!                 └──▶ extract   ──▶ images/page<p>_img<i>.<ext> + images.json
//! ```
//!
//! 1. [`text`]      — concatenate the text layer of every page
//! 2. [`rasterize`] — render every page; a single failed page aborts the stage
//! 3. [`extract`]   — pull native image streams, assign ids, publish the manifest
//!
//! All three open the document through `spawn_blocking` because pdfium and
//! lopdf are synchronous and CPU-bound.

pub mod extract;
pub mod rasterize;
pub mod text;

use crate::error::PipelineError;
use std::path::Path;

/// Write `bytes` to `path` via a sibling temp file and a rename, so readers
/// never observe a partially written file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let write_err = |e| PipelineError::ArtifactWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

/// Map a `spawn_blocking` join failure onto the crate error type.
pub(crate) fn join_error(stage: &str, e: tokio::task::JoinError) -> PipelineError {
    PipelineError::Internal(format!("{stage} task panicked: {e}"))
}
