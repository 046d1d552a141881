//! CLI binary for pagemill.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` / `BackendConfig`, runs one document and prints where
//! the task landed.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pagemill::document::pdfium::PdfiumSource;
use pagemill::{
    build_backend, AnalysisSummary, AnalysisTarget, BackendConfig, BackendKind, CancelToken,
    Pipeline, PipelineConfig, PipelineProgressCallback, PipelineState, ProgressCallback,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner while the document is being prepared, then
/// a bar over the analysis batch with one ✓/✗ line per item.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Creating task…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Analysing");
        self.bar.reset_eta();
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_state(&self, state: &PipelineState) {
        match state {
            PipelineState::Start => {}
            PipelineState::Failed(_) => {
                self.bar.println(format!("{} {}", red("✘"), red(&state.to_string())));
            }
            PipelineState::WorkspaceCreated => {
                self.bar.set_message("Reading document…");
                self.bar.println(format!("{} {}", cyan("◆"), state));
            }
            _ => self.bar.println(format!("{} {}", cyan("◆"), state)),
        }
    }

    fn on_analysis_start(&self, total_items: usize) {
        self.activate_bar(total_items);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Analysing {total_items} images…"))
        ));
    }

    fn on_item_start(&self, _index: usize, _total: usize, subject: &str) {
        self.bar.set_message(subject.to_string());
    }

    fn on_item_complete(&self, index: usize, total: usize, subject: &str, elapsed: Duration) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<24}  {}",
            green("✓"),
            index,
            total,
            subject,
            dim(&format!("{:.1}s", elapsed.as_secs_f64())),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, index: usize, total: usize, subject: &str, error: &str) {
        let msg = if error.chars().count() > 80 {
            let cut: String = error.chars().take(79).collect();
            format!("{cut}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<24}  {}",
            red("✗"),
            index,
            total,
            subject,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_analysis_complete(&self, summary: &AnalysisSummary) {
        self.bar.finish_and_clear();

        if summary.failure_count == 0 && summary.skipped_count == 0 {
            eprintln!(
                "{} {} images analysed successfully",
                green("✔"),
                bold(&summary.success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} images analysed  ({} failed, {} skipped)",
                if summary.success_count == 0 {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&summary.success_count.to_string()),
                summary.item_count,
                red(&summary.failure_count.to_string()),
                summary.skipped_count,
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Layout JSON for every page with a vision LLM
  pagemill Book.pdf

  # OCR every page (needs --features ocr and the ocrs models)
  pagemill --backend ocr Book.pdf

  # Extract embedded images and OCR those instead of the pages
  pagemill --backend ocr --images embedded Book.pdf

  # Stable embedded-image ids across re-runs
  pagemill --extract-embedded --deterministic-ids Book.pdf

  # Machine-readable summary
  pagemill --json Book.pdf > run.json

TASK LAYOUT:
  tasks/<task-id>/
    Book.pdf                      copied source
    contents.txt                  text layer
    images/page_<n>.png           rasterised pages
    images/page<p>_img<i>.<ext>   embedded images
    images.json                   embedded-image manifest
    ocr.txt | structure_json/     analysis output
    analysis.json                 per-item report

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (structure backend)
  ANTHROPIC_API_KEY       Anthropic API key (structure backend)
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PAGEMILL_PDFIUM_LIB     Path to libpdfium
  PAGEMILL_OCR_MODELS     Directory with text-detection.rten / text-recognition.rten
  RUST_LOG                Log filter (overrides -v / -q)
"#;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum BackendArg {
    Ocr,
    Structure,
}

impl From<BackendArg> for BackendKind {
    fn from(v: BackendArg) -> Self {
        match v {
            BackendArg::Ocr => BackendKind::Ocr,
            BackendArg::Structure => BackendKind::Structure,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ImagesArg {
    Pages,
    Embedded,
}

impl From<ImagesArg> for AnalysisTarget {
    fn from(v: ImagesArg) -> Self {
        match v {
            ImagesArg::Pages => AnalysisTarget::Pages,
            ImagesArg::Embedded => AnalysisTarget::EmbeddedImages,
        }
    }
}

/// Turn a PDF into a task workspace of page images, embedded images and
/// OCR / layout analysis.
#[derive(Parser, Debug)]
#[command(
    name = "pagemill",
    version,
    about = "Turn a PDF into page images, embedded images and OCR / layout analysis",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF document to process.
    input: PathBuf,

    /// Analysis engine. `ocr` needs a build with `--features ocr`.
    #[arg(long, env = "PAGEMILL_BACKEND", value_enum, default_value = "structure")]
    backend: BackendArg,

    /// Which images to analyse. `embedded` implies --extract-embedded.
    #[arg(long, env = "PAGEMILL_IMAGES", value_enum, default_value = "pages")]
    images: ImagesArg,

    /// Extract natively embedded images and write images.json.
    #[arg(long, env = "PAGEMILL_EXTRACT_EMBEDDED")]
    extract_embedded: bool,

    /// Directory that receives one sub-directory per task.
    #[arg(long, env = "PAGEMILL_TASKS_DIR", default_value = pagemill::config::DEFAULT_TASKS_ROOT)]
    tasks_dir: PathBuf,

    /// Rendering DPI (72–600).
    #[arg(long, env = "PAGEMILL_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Number of images analysed at once.
    #[arg(short, long, env = "PAGEMILL_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Extra attempts per image after a backend failure.
    #[arg(long, env = "PAGEMILL_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Skip writing the text layer to contents.txt.
    #[arg(long, env = "PAGEMILL_NO_TEXT")]
    no_text: bool,

    /// Derive embedded-image ids from content (UUID v5) instead of random.
    #[arg(long, env = "PAGEMILL_DETERMINISTIC_IDS")]
    deterministic_ids: bool,

    /// Path to the pdfium shared library.
    #[arg(long, env = "PAGEMILL_PDFIUM_LIB")]
    pdfium_lib: Option<PathBuf>,

    /// Directory holding the OCR models.
    #[arg(long, env = "PAGEMILL_OCR_MODELS")]
    ocr_models: Option<PathBuf>,

    /// LLM model ID for the structure backend (e.g. gpt-4.1-nano, gpt-4.1).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider for the structure backend: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "PAGEMILL_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file containing a custom layout prompt.
    #[arg(long, env = "PAGEMILL_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Print a JSON summary of the task on stdout.
    #[arg(long, env = "PAGEMILL_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PAGEMILL_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAGEMILL_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PAGEMILL_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs unless -v is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if !cli.input.is_file() {
        anyhow::bail!("Input document not found: {}", cli.input.display());
    }

    // ── Engines, checked once before any task exists ─────────────────────
    PdfiumSource::new(cli.pdfium_lib.clone())
        .probe()
        .context("PDF engine unavailable (pass --pdfium-lib or install libpdfium)")?;
    let backend_config = build_backend_config(&cli).await?;
    let backend = build_backend(&backend_config).context("Analysis backend unavailable")?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    let pipeline = Pipeline::with_pdfium(config, backend);

    // ── Ctrl-C stops at the next item boundary ───────────────────────────
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} interrupt received, finishing current item…", cyan("⚠"));
                cancel.cancel();
            }
        });
    }

    let output = pipeline
        .process_document_with_cancel(&cli.input, &cancel)
        .await
        .with_context(|| format!("Processing {} failed", cli.input.display()))?;

    let summary = &output.report.summary;
    if cli.json {
        let json = serde_json::json!({
            "task_id": output.task.id,
            "root": output.root(),
            "pages": output.pages.len(),
            "embedded_images": output.manifest.as_ref().map(Vec::len),
            "text_pages": output.text_pages,
            "report": &output.report,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        eprintln!(
            "{}  {}/{} images  {}ms  →  {}",
            if summary.failure_count == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            summary.success_count,
            summary.item_count,
            summary.total_elapsed.as_millis(),
            bold(&output.root().display().to_string()),
        );
        for failed in output.report.failures() {
            eprintln!("   {} {}", red("✗"), dim(&failed.filename));
        }
    }

    Ok(())
}

/// Map CLI args to `BackendConfig`.
async fn build_backend_config(cli: &Cli) -> Result<BackendConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut config = BackendConfig::new(cli.backend.into());
    config.ocr_model_dir = cli.ocr_models.clone();
    config.model = cli.model.clone();
    config.provider_name = cli.provider.clone();
    config.system_prompt = system_prompt;
    Ok(config)
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let target: AnalysisTarget = cli.images.into();
    let extract_embedded = cli.extract_embedded || target == AnalysisTarget::EmbeddedImages;

    let mut builder = PipelineConfig::builder()
        .tasks_root(&cli.tasks_dir)
        .dpi(cli.dpi)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .extract_text(!cli.no_text)
        .extract_embedded(extract_embedded)
        .analysis_target(target)
        .deterministic_image_ids(cli.deterministic_ids);

    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library_path(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backend_works_without_ocr_feature() {
        let cli = Cli::try_parse_from(["pagemill", "Book.pdf"]).unwrap();
        assert_eq!(cli.backend, BackendArg::Structure);
        assert_eq!(BackendKind::from(cli.backend), BackendKind::Structure);
    }

    #[test]
    fn ocr_backend_is_opt_in() {
        let cli = Cli::try_parse_from(["pagemill", "--backend", "ocr", "Book.pdf"]).unwrap();
        assert_eq!(cli.backend, BackendArg::Ocr);
    }
}
