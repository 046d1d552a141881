//! Task workspace: identity allocation and the on-disk layout of one run.
//!
//! Every submitted document gets a fresh UUID v4 and its own directory under
//! the tasks root. The source is copied in under a fixed name so later stages
//! address one well-known path instead of the caller's (possibly relative or
//! temporary) original:
//!
//! ```text
//! tasks/<task-id>/
//!   Book.pdf               copied source
//!   contents.txt           text layer
//!   images/page_<n>.png    rasterised pages (1-based)
//!   images/page<p>_img<i>.<ext>  embedded images
//!   images.json            embedded-image manifest
//!   structure_json/<stem>.json   structure backend output
//!   ocr.txt                OCR backend output
//!   analysis.json          per-item analysis report
//! ```

use crate::error::PipelineError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Canonical filename of the copied source document.
pub const SOURCE_FILENAME: &str = "Book.pdf";
pub const IMAGES_DIR: &str = "images";
pub const MANIFEST_FILENAME: &str = "images.json";
pub const STRUCTURE_DIR: &str = "structure_json";
pub const OCR_LOG_FILENAME: &str = "ocr.txt";
pub const CONTENTS_FILENAME: &str = "contents.txt";
pub const REPORT_FILENAME: &str = "analysis.json";

/// One isolated workspace for processing a single document.
///
/// Never mutated after creation; stages only write files beneath `root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    /// Globally unique task identity.
    pub id: Uuid,
    /// `<tasks_root>/<id>`.
    pub root: PathBuf,
    /// The path the caller originally submitted.
    pub source_document: PathBuf,
}

impl Task {
    /// The copied source every stage reads from.
    pub fn document_path(&self) -> PathBuf {
        self.root.join(SOURCE_FILENAME)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join(IMAGES_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILENAME)
    }

    pub fn structure_dir(&self) -> PathBuf {
        self.root.join(STRUCTURE_DIR)
    }

    pub fn ocr_log_path(&self) -> PathBuf {
        self.root.join(OCR_LOG_FILENAME)
    }

    pub fn contents_path(&self) -> PathBuf {
        self.root.join(CONTENTS_FILENAME)
    }

    pub fn report_path(&self) -> PathBuf {
        self.root.join(REPORT_FILENAME)
    }
}

/// Allocate a new task for `source` under `tasks_root`.
///
/// Each call yields a new, independent task, even for the same source.
///
/// # Errors
/// - [`PipelineError::SourceNotFound`] if `source` is missing or not a file.
///   Nothing is created on disk in that case.
/// - [`PipelineError::WorkspaceCreateFailed`] on any I/O failure while
///   creating the directory or copying the source. A half-created task
///   directory is removed before returning.
pub async fn create_task(tasks_root: &Path, source: &Path) -> Result<Task, PipelineError> {
    match tokio::fs::metadata(source).await {
        Ok(meta) if meta.is_file() => {}
        _ => {
            return Err(PipelineError::SourceNotFound {
                path: source.to_path_buf(),
            })
        }
    }

    tokio::fs::create_dir_all(tasks_root)
        .await
        .map_err(|e| PipelineError::WorkspaceCreateFailed {
            path: tasks_root.to_path_buf(),
            source: e,
        })?;

    let id = Uuid::new_v4();
    let root = tasks_root.join(id.to_string());

    // create_dir, not create_dir_all: an existing directory would mean an id
    // collision and must not be silently shared.
    tokio::fs::create_dir(&root)
        .await
        .map_err(|e| PipelineError::WorkspaceCreateFailed {
            path: root.clone(),
            source: e,
        })?;

    let task = Task {
        id,
        root,
        source_document: source.to_path_buf(),
    };

    let target = task.document_path();
    if let Err(e) = tokio::fs::copy(source, &target).await {
        let _ = tokio::fs::remove_dir_all(&task.root).await;
        return Err(PipelineError::WorkspaceCreateFailed {
            path: target,
            source: e,
        });
    }
    debug!("Copied {} → {}", source.display(), target.display());

    info!("Task created: {}", task.root.display());
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_directory_and_copies_source() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("input.pdf");
        std::fs::write(&source, b"%PDF-1.7 test").unwrap();
        let tasks_root = dir.path().join("tasks");

        let task = create_task(&tasks_root, &source).await.unwrap();

        assert!(task.root.starts_with(&tasks_root));
        assert_eq!(task.root.file_name().unwrap(), task.id.to_string().as_str());
        assert_eq!(task.document_path(), task.root.join("Book.pdf"));
        assert_eq!(std::fs::read(task.document_path()).unwrap(), b"%PDF-1.7 test");
        assert_eq!(task.source_document, source);
    }

    #[tokio::test]
    async fn same_source_twice_gives_independent_tasks() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("input.pdf");
        std::fs::write(&source, b"%PDF").unwrap();
        let tasks_root = dir.path().join("tasks");

        let a = create_task(&tasks_root, &source).await.unwrap();
        let b = create_task(&tasks_root, &source).await.unwrap();

        assert_ne!(a.id, b.id);
        assert_ne!(a.root, b.root);
        std::fs::write(a.root.join("marker"), b"a").unwrap();
        assert!(!b.root.join("marker").exists());
    }

    #[tokio::test]
    async fn missing_source_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let tasks_root = dir.path().join("tasks");

        let err = create_task(&tasks_root, &dir.path().join("nope.pdf"))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::SourceNotFound { .. }));
        assert!(!tasks_root.exists());
    }

    #[tokio::test]
    async fn directory_as_source_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = create_task(&dir.path().join("tasks"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::SourceNotFound { .. }));
    }

    #[test]
    fn layout_paths() {
        let task = Task {
            id: Uuid::nil(),
            root: PathBuf::from("tasks/t"),
            source_document: PathBuf::from("Book.pdf"),
        };
        assert_eq!(task.images_dir(), PathBuf::from("tasks/t/images"));
        assert_eq!(task.manifest_path(), PathBuf::from("tasks/t/images.json"));
        assert_eq!(task.structure_dir(), PathBuf::from("tasks/t/structure_json"));
        assert_eq!(task.ocr_log_path(), PathBuf::from("tasks/t/ocr.txt"));
        assert_eq!(task.contents_path(), PathBuf::from("tasks/t/contents.txt"));
        assert_eq!(task.report_path(), PathBuf::from("tasks/t/analysis.json"));
    }
}
