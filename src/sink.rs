//! Output sinks: where a successful analysis payload is persisted.
//!
//! One contract, two layouts:
//!
//! * [`OcrTextLog`]: append-only `ocr.txt`, one header block per item
//!   followed by the recognised text.
//! * [`StructureJsonDir`]: one pretty-printed `structure_json/<stem>.json`
//!   per item.
//!
//! Both accept either payload kind, so any backend can be paired with any
//! sink. Every artifact is attributable to its subject: the log header
//! carries the subject id, and JSON files are named after the image.

use crate::analysis::{AnalysisPayload, PayloadKind};
use crate::runner::AnalysisItem;
use crate::task::Task;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Persists one artifact per successfully analysed item.
///
/// Calls arrive strictly in input order, one at a time.
#[async_trait]
pub trait OutputSink: Send {
    /// Store `payload` for `item` and return the artifact path.
    async fn persist(
        &mut self,
        item: &AnalysisItem,
        payload: &AnalysisPayload,
        elapsed: Duration,
    ) -> io::Result<PathBuf>;
}

/// Sink matching a backend's payload kind: text → `ocr.txt`,
/// structured → `structure_json/`.
pub fn default_sink(kind: PayloadKind, task: &Task) -> Box<dyn OutputSink> {
    match kind {
        PayloadKind::Text => Box::new(OcrTextLog::new(task.ocr_log_path())),
        PayloadKind::Structured => Box::new(StructureJsonDir::new(task.structure_dir())),
    }
}

/// `<m>m <s>s (<ms>ms)`, where `<ms>` is the sub-second remainder.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{}m {}s ({}ms)",
        secs / 60,
        secs % 60,
        elapsed.subsec_millis()
    )
}

fn render_text(payload: &AnalysisPayload) -> io::Result<String> {
    match payload {
        AnalysisPayload::Text(text) => Ok(text.clone()),
        AnalysisPayload::Structured(value) => {
            serde_json::to_string_pretty(value).map_err(io::Error::other)
        }
    }
}

// ── OCR text log ─────────────────────────────────────────────────────────

/// Append-only text log.
#[derive(Debug, Clone)]
pub struct OcrTextLog {
    path: PathBuf,
}

impl OcrTextLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The block appended for one item.
    pub fn format_block(item: &AnalysisItem, text: &str, elapsed: Duration) -> String {
        format!(
            "\n--- OCR Result for {} ---\nUUID: {}\nTime taken: {}\n\n{}\n",
            item.filename,
            item.subject_id,
            format_elapsed(elapsed),
            text
        )
    }
}

#[async_trait]
impl OutputSink for OcrTextLog {
    async fn persist(
        &mut self,
        item: &AnalysisItem,
        payload: &AnalysisPayload,
        elapsed: Duration,
    ) -> io::Result<PathBuf> {
        let block = Self::format_block(item, &render_text(payload)?, elapsed);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(block.as_bytes()).await?;
        file.flush().await?;

        Ok(self.path.clone())
    }
}

// ── Structure JSON directory ─────────────────────────────────────────────

/// One JSON document per item, named after the image stem.
#[derive(Debug, Clone)]
pub struct StructureJsonDir {
    dir: PathBuf,
}

impl StructureJsonDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<dir>/<stem>.json` for the item's filename.
    pub fn artifact_path(&self, item: &AnalysisItem) -> PathBuf {
        let stem = Path::new(&item.filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| item.subject_id.clone());
        self.dir.join(format!("{stem}.json"))
    }
}

#[async_trait]
impl OutputSink for StructureJsonDir {
    async fn persist(
        &mut self,
        item: &AnalysisItem,
        payload: &AnalysisPayload,
        _elapsed: Duration,
    ) -> io::Result<PathBuf> {
        let value = match payload {
            AnalysisPayload::Structured(value) => value.clone(),
            AnalysisPayload::Text(text) => serde_json::json!({ "text": text }),
        };
        let bytes = serde_json::to_vec_pretty(&value).map_err(io::Error::other)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.artifact_path(item);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn item(name: &str, id: &str) -> AnalysisItem {
        AnalysisItem {
            subject_id: id.to_string(),
            filename: name.to_string(),
            path: PathBuf::from(name),
        }
    }

    #[test]
    fn elapsed_format() {
        assert_eq!(format_elapsed(Duration::from_millis(0)), "0m 0s (0ms)");
        assert_eq!(format_elapsed(Duration::from_millis(61_250)), "1m 1s (250ms)");
        assert_eq!(format_elapsed(Duration::from_secs(3600)), "60m 0s (0ms)");
    }

    #[test]
    fn block_layout() {
        let block = OcrTextLog::format_block(
            &item("page2_img1.png", "1b4e28ba-2fa1-11d2-883f-0016d3cca427"),
            "Hello",
            Duration::from_millis(1_500),
        );
        assert_eq!(
            block,
            "\n--- OCR Result for page2_img1.png ---\n\
             UUID: 1b4e28ba-2fa1-11d2-883f-0016d3cca427\n\
             Time taken: 0m 1s (500ms)\n\nHello\n"
        );
    }

    #[tokio::test]
    async fn text_log_appends_in_call_order() {
        let dir = TempDir::new().unwrap();
        let mut sink = OcrTextLog::new(dir.path().join("ocr.txt"));

        for n in 1..=3 {
            let it = item(&format!("page_{n}.png"), &format!("id-{n}"));
            let payload = AnalysisPayload::Text(format!("text {n}"));
            sink.persist(&it, &payload, Duration::ZERO).await.unwrap();
        }

        let log = std::fs::read_to_string(sink.path()).unwrap();
        let a = log.find("page_1.png").unwrap();
        let b = log.find("page_2.png").unwrap();
        let c = log.find("page_3.png").unwrap();
        assert!(a < b && b < c);
        assert_eq!(log.matches("--- OCR Result for").count(), 3);
    }

    #[tokio::test]
    async fn structure_dir_names_files_after_stem() {
        let dir = TempDir::new().unwrap();
        let mut sink = StructureJsonDir::new(dir.path().join("structure_json"));
        let payload = AnalysisPayload::Structured(json!({"blocks": [{"type": "title"}]}));

        let path = sink
            .persist(&item("page_3.png", "x"), &payload, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("structure_json").join("page_3.json"));
        let back: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back["blocks"][0]["type"], "title");
    }

    #[tokio::test]
    async fn structure_dir_wraps_text_payload() {
        let dir = TempDir::new().unwrap();
        let mut sink = StructureJsonDir::new(dir.path());
        let path = sink
            .persist(&item("page_1.png", "x"), &AnalysisPayload::Text("hi".into()), Duration::ZERO)
            .await
            .unwrap();
        let back: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back, json!({"text": "hi"}));
    }
}
