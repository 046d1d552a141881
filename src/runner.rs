//! Analysis runner: drive a backend over an ordered batch of images.
//!
//! ## Failure isolation
//!
//! A failing item becomes a `Failed` record and the batch moves on. Neither
//! a backend error nor a sink error for one item can cancel its siblings,
//! whatever the concurrency.
//!
//! ## Ordering under concurrency
//!
//! Up to `concurrency` backend calls run at once through an *ordered*
//! buffered stream (`buffered`, not `buffer_unordered`). Results are yielded
//! and persisted in input order, so `ocr.txt` blocks and report entries
//! always follow page/manifest order however the engine's calls interleave.
//!
//! ## Retry strategy
//!
//! Engine failures are often transient (rate limits, GPU contention). Each
//! item gets `1 + max_retries` attempts with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`). Sink failures are not retried.

use crate::analysis::{AnalysisBackend, AnalysisPayload, BackendError};
use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::error::{ItemError, PipelineError};
use crate::pipeline::extract::ManifestEntry;
use crate::pipeline::rasterize::PageImage;
use crate::pipeline::write_atomic;
use crate::sink::{format_elapsed, OutputSink};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// One image to analyse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisItem {
    /// Page image path, or embedded image id.
    pub subject_id: String,
    pub filename: String,
    pub path: PathBuf,
}

impl AnalysisItem {
    pub fn from_page(page: &PageImage) -> Self {
        Self {
            subject_id: page.path.display().to_string(),
            filename: page.filename(),
            path: page.path.clone(),
        }
    }

    pub fn from_manifest(entry: &ManifestEntry) -> Self {
        Self {
            subject_id: entry.id.to_string(),
            filename: entry.filename.clone(),
            path: entry.path.clone(),
        }
    }
}

/// Outcome of one item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisStatus {
    Success,
    Failed { reason: ItemError },
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Record for one attempted item. Skipped items have no record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    /// 1-based position in the input batch.
    pub index: usize,
    pub subject_id: String,
    pub filename: String,
    /// Where the payload was persisted (None on failure).
    pub artifact: Option<PathBuf>,
    /// Backend calls made, including the successful one.
    pub attempts: u32,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
    #[serde(flatten)]
    pub status: AnalysisStatus,
    /// The payload itself; kept in memory only, the sink owns the durable copy.
    #[serde(skip)]
    pub payload: Option<AnalysisPayload>,
}

impl AnalysisResult {
    pub fn is_success(&self) -> bool {
        matches!(self.status, AnalysisStatus::Success)
    }
}

/// Aggregate counts for operator visibility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisSummary {
    pub item_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Items never started because the run was cancelled.
    pub skipped_count: usize,
    #[serde(rename = "total_elapsed_ms", serialize_with = "as_millis")]
    pub total_elapsed: Duration,
}

/// Everything one runner pass produced; persisted as `analysis.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub backend: String,
    pub summary: AnalysisSummary,
    pub results: Vec<AnalysisResult>,
}

impl AnalysisReport {
    /// Publish the report as pretty JSON via temp file + rename.
    pub async fn write(&self, path: &Path) -> Result<(), PipelineError> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| PipelineError::Internal(format!("report serialisation failed: {e}")))?;
        write_atomic(path, &bytes).await
    }

    pub fn failures(&self) -> impl Iterator<Item = &AnalysisResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

enum Outcome<'a> {
    Skipped,
    Finished {
        index: usize,
        item: &'a AnalysisItem,
        result: Result<AnalysisPayload, BackendError>,
        attempts: u32,
        elapsed: Duration,
    },
}

/// Call the backend with bounded exponential-backoff retry.
async fn analyze_with_retry(
    backend: &dyn AnalysisBackend,
    item: &AnalysisItem,
    max_retries: u32,
    retry_backoff_ms: u64,
) -> (Result<AnalysisPayload, BackendError>, u32) {
    let mut last_err = BackendError::new("no attempt made");

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = retry_backoff_ms.saturating_mul(2u64.saturating_pow(attempt - 1));
            warn!(
                "{}: retry {}/{} after {}ms",
                item.filename, attempt, max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match backend.analyze(&item.path).await {
            Ok(payload) => return (Ok(payload), attempt + 1),
            Err(e) => {
                debug!("{}: attempt {} failed: {}", item.filename, attempt + 1, e);
                last_err = e;
            }
        }
    }

    (Err(last_err), max_retries + 1)
}

/// Analyse `items` in order, persisting each success through `sink`.
///
/// Never fails as a whole: every attempted item yields exactly one
/// [`AnalysisResult`], and items not started because `cancel` fired are
/// counted in [`AnalysisSummary::skipped_count`].
pub async fn run_analysis(
    items: &[AnalysisItem],
    backend: &dyn AnalysisBackend,
    sink: &mut dyn OutputSink,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> AnalysisReport {
    let started = Instant::now();
    let total = items.len();
    let callback = config.progress_callback.clone();
    let max_retries = config.max_retries;
    let retry_backoff_ms = config.retry_backoff_ms;

    info!(
        "Analysing {} items with '{}' (concurrency {})",
        total,
        backend.name(),
        config.concurrency
    );
    if let Some(ref cb) = callback {
        cb.on_analysis_start(total);
    }

    let item_callback = callback.clone();
    let mut outcomes = stream::iter(items.iter().enumerate())
        .map(move |(i, item)| {
            let callback = item_callback.clone();
            async move {
                if cancel.is_cancelled() {
                    return Outcome::Skipped;
                }
                let index = i + 1;
                if let Some(ref cb) = callback {
                    cb.on_item_start(index, total, &item.filename);
                }
                let start = Instant::now();
                let (result, attempts) =
                    analyze_with_retry(backend, item, max_retries, retry_backoff_ms).await;
                Outcome::Finished {
                    index,
                    item,
                    result,
                    attempts,
                    elapsed: start.elapsed(),
                }
            }
        })
        .buffered(config.concurrency.max(1));

    let mut summary = AnalysisSummary {
        item_count: total,
        ..Default::default()
    };
    let mut results = Vec::with_capacity(total);

    while let Some(outcome) = outcomes.next().await {
        let Outcome::Finished {
            index,
            item,
            result,
            attempts,
            elapsed,
        } = outcome
        else {
            summary.skipped_count += 1;
            continue;
        };

        let persisted = match result {
            Ok(payload) => match sink.persist(item, &payload, elapsed).await {
                Ok(artifact) => Ok((artifact, payload)),
                Err(e) => Err(ItemError::PersistFailed {
                    subject: item.subject_id.clone(),
                    detail: e.to_string(),
                }),
            },
            Err(e) => Err(ItemError::AnalysisFailed {
                subject: item.subject_id.clone(),
                attempts,
                detail: e.to_string(),
            }),
        };

        let record = match persisted {
            Ok((artifact, payload)) => {
                summary.success_count += 1;
                debug!(
                    "[{}/{}] {} done in {}",
                    index,
                    total,
                    item.filename,
                    format_elapsed(elapsed)
                );
                if let Some(ref cb) = callback {
                    cb.on_item_complete(index, total, &item.filename, elapsed);
                }
                AnalysisResult {
                    index,
                    subject_id: item.subject_id.clone(),
                    filename: item.filename.clone(),
                    artifact: Some(artifact),
                    attempts,
                    elapsed,
                    status: AnalysisStatus::Success,
                    payload: Some(payload),
                }
            }
            Err(reason) => {
                summary.failure_count += 1;
                warn!("[{}/{}] {}", index, total, reason);
                if let Some(ref cb) = callback {
                    cb.on_item_error(index, total, &item.filename, &reason.to_string());
                }
                AnalysisResult {
                    index,
                    subject_id: item.subject_id.clone(),
                    filename: item.filename.clone(),
                    artifact: None,
                    attempts,
                    elapsed,
                    status: AnalysisStatus::Failed { reason },
                    payload: None,
                }
            }
        };
        results.push(record);
    }

    summary.total_elapsed = started.elapsed();
    info!(
        "Analysis complete: {} succeeded, {} failed, {} skipped; total time {}",
        summary.success_count,
        summary.failure_count,
        summary.skipped_count,
        format_elapsed(summary.total_elapsed)
    );
    if let Some(ref cb) = callback {
        cb.on_analysis_complete(&summary);
    }

    AnalysisReport {
        backend: backend.name().to_string(),
        summary,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::PayloadKind;
    use crate::sink::OcrTextLog;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::io;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Fails for the given 1-based positions; echoes the filename otherwise.
    struct FlakyBackend {
        failing: HashSet<String>,
        calls: AtomicU32,
    }

    impl FlakyBackend {
        fn failing_on(names: &[&str]) -> Self {
            Self {
                failing: names.iter().map(|s| s.to_string()).collect(),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl AnalysisBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        fn payload_kind(&self) -> PayloadKind {
            PayloadKind::Text
        }

        async fn analyze(&self, image: &Path) -> Result<AnalysisPayload, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = image.file_name().unwrap().to_string_lossy().to_string();
            if self.failing.contains(&name) {
                Err(BackendError::new("engine crashed"))
            } else {
                Ok(AnalysisPayload::Text(format!("text of {name}")))
            }
        }
    }

    /// Fails the first `n` calls, then succeeds.
    struct RecoveringBackend {
        remaining_failures: AtomicU32,
    }

    #[async_trait]
    impl AnalysisBackend for RecoveringBackend {
        fn name(&self) -> &str {
            "recovering"
        }

        fn payload_kind(&self) -> PayloadKind {
            PayloadKind::Text
        }

        async fn analyze(&self, _image: &Path) -> Result<AnalysisPayload, BackendError> {
            let left = self.remaining_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.remaining_failures.store(left - 1, Ordering::SeqCst);
                return Err(BackendError::new("rate limited"));
            }
            Ok(AnalysisPayload::Text("ok".into()))
        }
    }

    /// Records persisted subjects in memory.
    #[derive(Default)]
    struct MemorySink {
        persisted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OutputSink for MemorySink {
        async fn persist(
            &mut self,
            item: &AnalysisItem,
            _payload: &AnalysisPayload,
            _elapsed: Duration,
        ) -> io::Result<PathBuf> {
            self.persisted.lock().unwrap().push(item.filename.clone());
            Ok(PathBuf::from(format!("mem://{}", item.filename)))
        }
    }

    /// Refuses one subject.
    struct BrokenSink {
        refuse: String,
    }

    #[async_trait]
    impl OutputSink for BrokenSink {
        async fn persist(
            &mut self,
            item: &AnalysisItem,
            _payload: &AnalysisPayload,
            _elapsed: Duration,
        ) -> io::Result<PathBuf> {
            if item.filename == self.refuse {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
            } else {
                Ok(item.path.clone())
            }
        }
    }

    fn items(k: usize) -> Vec<AnalysisItem> {
        (1..=k)
            .map(|n| AnalysisItem {
                subject_id: format!("id-{n}"),
                filename: format!("page_{n}.png"),
                path: PathBuf::from(format!("/tmp/page_{n}.png")),
            })
            .collect()
    }

    fn config() -> PipelineConfig {
        PipelineConfig::builder().retry_backoff_ms(1).build().unwrap()
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let backend = FlakyBackend::failing_on(&["page_2.png", "page_5.png"]);
        let mut sink = MemorySink::default();
        let batch = items(7);

        let report =
            run_analysis(&batch, &backend, &mut sink, &config(), &CancelToken::new()).await;

        assert_eq!(report.summary.item_count, 7);
        assert_eq!(report.summary.success_count, 5);
        assert_eq!(report.summary.failure_count, 2);
        assert_eq!(report.results.len(), 7);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 7);

        let failed: Vec<usize> = report.failures().map(|r| r.index).collect();
        assert_eq!(failed, vec![2, 5]);
        assert!(report.results[6].is_success(), "last item must still run");
        assert_eq!(sink.persisted.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn concurrent_run_persists_in_input_order() {
        let backend = FlakyBackend::failing_on(&[]);
        let mut sink = MemorySink::default();
        let batch = items(12);
        let config = PipelineConfig::builder().concurrency(4).build().unwrap();

        let report = run_analysis(&batch, &backend, &mut sink, &config, &CancelToken::new()).await;

        let expected: Vec<String> = batch.iter().map(|i| i.filename.clone()).collect();
        assert_eq!(*sink.persisted.lock().unwrap(), expected);
        let indices: Vec<usize> = report.results.iter().map(|r| r.index).collect();
        assert_eq!(indices, (1..=12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn retry_recovers_transient_failure() {
        let backend = RecoveringBackend {
            remaining_failures: AtomicU32::new(2),
        };
        let mut sink = MemorySink::default();
        let config = PipelineConfig::builder()
            .max_retries(2)
            .retry_backoff_ms(1)
            .build()
            .unwrap();

        let report =
            run_analysis(&items(1), &backend, &mut sink, &config, &CancelToken::new()).await;

        assert_eq!(report.summary.success_count, 1);
        assert_eq!(report.results[0].attempts, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_report_attempts() {
        let backend = FlakyBackend::failing_on(&["page_1.png"]);
        let mut sink = MemorySink::default();
        let config = PipelineConfig::builder()
            .max_retries(1)
            .retry_backoff_ms(1)
            .build()
            .unwrap();

        let report =
            run_analysis(&items(1), &backend, &mut sink, &config, &CancelToken::new()).await;

        match &report.results[0].status {
            AnalysisStatus::Failed {
                reason: ItemError::AnalysisFailed { attempts, subject, .. },
            } => {
                assert_eq!(*attempts, 2);
                assert_eq!(subject, "id-1");
            }
            other => panic!("unexpected status: {other:?}"),
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sink_failure_is_an_item_failure() {
        let backend = FlakyBackend::failing_on(&[]);
        let mut sink = BrokenSink {
            refuse: "page_2.png".into(),
        };

        let report =
            run_analysis(&items(3), &backend, &mut sink, &config(), &CancelToken::new()).await;

        assert_eq!(report.summary.success_count, 2);
        assert!(matches!(
            report.results[1].status,
            AnalysisStatus::Failed {
                reason: ItemError::PersistFailed { .. }
            }
        ));
    }

    #[tokio::test]
    async fn cancelled_token_skips_everything() {
        let backend = FlakyBackend::failing_on(&[]);
        let mut sink = MemorySink::default();
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = run_analysis(&items(4), &backend, &mut sink, &config(), &cancel).await;

        assert_eq!(report.summary.skipped_count, 4);
        assert!(report.results.is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    /// Cancels the shared token after the first analysis.
    struct CancellingBackend {
        cancel: CancelToken,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AnalysisBackend for CancellingBackend {
        fn name(&self) -> &str {
            "cancelling"
        }

        fn payload_kind(&self) -> PayloadKind {
            PayloadKind::Text
        }

        async fn analyze(&self, _image: &Path) -> Result<AnalysisPayload, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.cancel.cancel();
            Ok(AnalysisPayload::Text("first".into()))
        }
    }

    #[tokio::test]
    async fn cancellation_stops_at_item_boundary() {
        let cancel = CancelToken::new();
        let backend = CancellingBackend {
            cancel: cancel.clone(),
            calls: AtomicUsize::new(0),
        };
        let dir = TempDir::new().unwrap();
        let mut sink = OcrTextLog::new(dir.path().join("ocr.txt"));

        let report = run_analysis(&items(5), &backend, &mut sink, &config(), &cancel).await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.summary.success_count, 1);
        assert_eq!(report.summary.skipped_count, 4);
        let log = std::fs::read_to_string(dir.path().join("ocr.txt")).unwrap();
        assert_eq!(log.matches("--- OCR Result for").count(), 1);
    }

    #[tokio::test]
    async fn report_serialises_and_publishes() {
        let backend = FlakyBackend::failing_on(&["page_2.png"]);
        let mut sink = MemorySink::default();
        let report =
            run_analysis(&items(2), &backend, &mut sink, &config(), &CancelToken::new()).await;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("analysis.json");
        report.write(&path).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["backend"], "flaky");
        assert_eq!(json["summary"]["failure_count"], 1);
        assert!(json["summary"]["total_elapsed_ms"].is_u64());
        assert_eq!(json["results"][0]["status"], "success");
        assert_eq!(json["results"][1]["status"], "failed");
        assert!(json["results"][1]["reason"].is_object());
        assert!(json["results"][0].get("payload").is_none());
    }
}
