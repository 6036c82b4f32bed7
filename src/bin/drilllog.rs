//! CLI binary for edgequake-drilllog.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints the batch result as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_drilllog::process::write_json_atomic;
use edgequake_drilllog::{
    BatchOutput, Borehole, DrillLogPipeline, ExtractionConfig, ExtractionProgressCallback,
    IdentifierPolicy, ImageFormat, PageSelection, ProgressCallback, SchemaKind,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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

/// Last path or URL segment of a document reference.
fn file_name(source: &str) -> &str {
    source
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source)
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar across every document in the batch,
/// plus a log line per finished call. Calls complete out of order, and
/// several documents may be in flight, so the bar grows as documents start.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start time per (document, page, pass).
    start_times: Mutex<HashMap<(String, usize, SchemaKind), Instant>>,
    activated: AtomicBool,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            activated: AtomicBool::new(false),
        })
    }

    /// Switch to the full progress-bar style on the first document start.
    fn activate_bar(&self) {
        if self.activated.swap(true, Ordering::SeqCst) {
            return;
        }
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} calls  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, source: &str, page_num: usize, kind: SchemaKind) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&(source.to_string(), page_num, kind)))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_document_start(&self, source: &str, total_calls: usize) {
        self.activate_bar();
        self.bar.inc_length(total_calls as u64);
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(source),
            dim(&format!("{} pages, {total_calls} calls", total_calls / 2)),
        ));
    }

    fn on_call_start(&self, source: &str, page_num: usize, kind: SchemaKind) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert((source.to_string(), page_num, kind), Instant::now());
        }
        self.bar
            .set_message(format!("{} page {page_num} ({kind})", file_name(source)));
    }

    fn on_call_complete(&self, source: &str, page_num: usize, kind: SchemaKind, items: usize) {
        let elapsed = self.elapsed_secs(source, page_num, kind);
        self.bar.println(format!(
            "  {} {} page {:>3} {:<6}  {:<8}  {}",
            green("✓"),
            file_name(source),
            page_num,
            kind,
            dim(&format!("{items:>3} rows")),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_call_error(&self, source: &str, page_num: usize, kind: SchemaKind, error: &str) {
        let elapsed = self.elapsed_secs(source, page_num, kind);
        // Keep log lines on one row.
        let msg: String = if error.chars().count() > 80 {
            let head: String = error.chars().take(79).collect();
            format!("{head}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {} page {:>3} {:<6}  {}  {}",
            red("✗"),
            file_name(source),
            page_num,
            kind,
            red(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_complete(&self, source: &str, boreholes: usize, failed_calls: usize) {
        let mark = if failed_calls == 0 {
            green("✔")
        } else {
            cyan("⚠")
        };
        self.bar.println(format!(
            "{mark} {}  {} boreholes  {}",
            bold(source),
            boreholes,
            if failed_calls == 0 {
                dim("no failed calls")
            } else {
                red(&format!("{failed_calls} failed calls"))
            },
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one drill log (JSON on stdout)
  drilllog BH-1.pdf

  # Several logs into one file
  drilllog site-a.pdf site-b.pdf -o boreholes.json

  # Only one borehole from the result
  drilllog site-a.pdf --hole BH-3

  # First five pages, smaller batches
  drilllog --pages 1-5 --batch-size 3 site-a.pdf

  # Download from URL with a specific model
  drilllog --model gpt-4.1 --provider openai https://example.com/logs/BH-7.pdf

  # Merge identifiers that differ only by spacing or case
  drilllog --identifier-policy casefold site-a.pdf

OUTPUT:
  {"documents": [...], "summary": {...}}
  Each document lists its boreholes; each borehole carries metadata,
  soil_data (layers with the samples taken inside their depth range) and
  sample_data (all samples, sorted by sample number).
  With --hole the output is the list of matching boreholes instead.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         libpdfium file or its directory
  RUST_LOG                Log filter, overrides -v / -q

  Variables from a .env file in the working directory are loaded first.
"#;

/// Extract borehole data from drill-log PDFs using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "drilllog",
    version,
    about = "Extract borehole data from drill-log PDFs using Vision LLMs",
    long_about = "Extract borehole records from scanned drill logs (local files or URLs). \
Each page is read twice by a Vision Language Model, once for the soil column and once for \
the sample column, and the results are joined per borehole on depth.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "DRILLLOG_OUTPUT")]
    output: Option<PathBuf>,

    /// Output only the boreholes with this HOLE_NO.
    #[arg(long)]
    hole: Option<String>,

    /// LLM model ID (e.g. gpt-4.1-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "DRILLLOG_PAGES", default_value = "all")]
    pages: String,

    /// Pages per batch (upper bound on concurrent model calls per document).
    #[arg(long, env = "DRILLLOG_BATCH_SIZE", default_value_t = 10,
          value_parser = clap::value_parser!(u32).range(1..=100))]
    batch_size: u32,

    /// Documents processed at once.
    #[arg(long, env = "DRILLLOG_DOCUMENTS", default_value_t = 2,
          value_parser = clap::value_parser!(u32).range(1..=32))]
    documents: u32,

    /// Longest rendered page edge in pixels.
    #[arg(long, env = "DRILLLOG_MAX_PIXELS", default_value_t = 3000,
          value_parser = clap::value_parser!(u32).range(500..=10000))]
    max_pixels: u32,

    /// Page image encoding sent to the model.
    #[arg(long, env = "DRILLLOG_IMAGE_FORMAT", value_enum, default_value = "jpeg")]
    image_format: ImageFormatArg,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "DRILLLOG_PASSWORD")]
    password: Option<String>,

    /// Path to a text file replacing the soil-pass prompt.
    #[arg(long, env = "DRILLLOG_SOIL_PROMPT")]
    soil_prompt: Option<PathBuf>,

    /// Path to a text file replacing the sample-pass prompt.
    #[arg(long, env = "DRILLLOG_SAMPLE_PROMPT")]
    sample_prompt: Option<PathBuf>,

    /// Max LLM output tokens per call.
    #[arg(long, env = "DRILLLOG_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0 to 2.0).
    #[arg(long, env = "DRILLLOG_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries per (page, pass) call on failure.
    #[arg(long, env = "DRILLLOG_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "DRILLLOG_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DRILLLOG_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// How HOLE_NO values are compared when grouping pages.
    #[arg(long, env = "DRILLLOG_IDENTIFIER_POLICY", value_enum, default_value = "exact")]
    identifier_policy: IdentifierArg,

    /// Disable progress bar.
    #[arg(long, env = "DRILLLOG_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DRILLLOG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DRILLLOG_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ImageFormatArg {
    Jpeg,
    Png,
}

impl From<ImageFormatArg> for ImageFormat {
    fn from(v: ImageFormatArg) -> Self {
        match v {
            ImageFormatArg::Jpeg => ImageFormat::Jpeg,
            ImageFormatArg::Png => ImageFormat::Png,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum IdentifierArg {
    Exact,
    Trim,
    Casefold,
}

impl From<IdentifierArg> for IdentifierPolicy {
    fn from(v: IdentifierArg) -> Self {
        match v {
            IdentifierArg::Exact => IdentifierPolicy::Exact,
            IdentifierArg::Trim => IdentifierPolicy::Trim,
            IdentifierArg::Casefold => IdentifierPolicy::TrimCaseFold,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is not an error.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    let progress = show_progress.then(CliProgressCallback::new_dynamic);
    let config = build_config(
        &cli,
        progress
            .clone()
            .map(|cb| cb as Arc<dyn ExtractionProgressCallback>),
    )
    .await?;

    let pipeline =
        DrillLogPipeline::from_config(config).context("Failed to set up the extraction pipeline")?;

    // ── Run extraction ───────────────────────────────────────────────────
    let batch = pipeline.process_documents(&cli.inputs).await;
    if let Some(ref cb) = progress {
        cb.finish();
    }

    if let Some(ref hole) = cli.hole {
        let matches: Vec<&Borehole> = batch.find_hole(hole).collect();
        if matches.is_empty() && !cli.quiet {
            eprintln!("{} no borehole named {}", cyan("⚠"), bold(hole));
        }
        emit(&cli, &matches).await?;
    } else {
        emit(&cli, &batch).await?;
    }

    if !cli.quiet {
        print_summary(&cli, &batch);
    }

    if batch.summary.successful_documents == 0 {
        anyhow::bail!(
            "No document could be processed ({} failed)",
            batch.summary.failed_documents
        );
    }
    Ok(())
}

/// Write `value` to `--output` or stdout.
async fn emit<T: serde::Serialize>(cli: &Cli, value: &T) -> Result<()> {
    if let Some(ref path) = cli.output {
        write_json_atomic(path, value)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    } else {
        let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{json}").context("Failed to write to stdout")?;
    }
    Ok(())
}

fn print_summary(cli: &Cli, batch: &BatchOutput) {
    let s = &batch.summary;
    let mark = if s.failed_documents == 0 && s.failed_calls == 0 {
        green("✔")
    } else if s.successful_documents == 0 {
        red("✘")
    } else {
        cyan("⚠")
    };
    let target = cli
        .output
        .as_ref()
        .map(|p| format!("  →  {}", bold(&p.display().to_string())))
        .unwrap_or_default();

    eprintln!(
        "{mark}  {}/{} documents  {} boreholes  {}/{} calls ok{target}",
        s.successful_documents,
        s.total_documents,
        s.total_boreholes,
        s.total_calls - s.failed_calls.min(s.total_calls),
        s.total_calls,
    );
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&s.input_tokens.to_string()),
        dim(&s.output_tokens.to_string()),
    );
    for failure in s.failures.iter().filter(|f| f.page.is_none()) {
        eprintln!("   {} {}: {}", red("✗"), failure.source, failure.reason);
    }
    if !s.anomalies.is_empty() {
        eprintln!(
            "   {} reconciliation anomalies (see summary.anomalies)",
            dim(&s.anomalies.len().to_string())
        );
    }
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let pages = parse_pages(&cli.pages)?;

    let mut builder = ExtractionConfig::builder()
        .max_rendered_pixels(cli.max_pixels)
        .image_format(cli.image_format.into())
        .batch_size(cli.batch_size as usize)
        .document_concurrency(cli.documents as usize)
        .pages(pages)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .identifier_policy(cli.identifier_policy.into())
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(ref path) = cli.soil_prompt {
        builder = builder.soil_prompt(read_prompt(path).await?);
    }
    if let Some(ref path) = cli.sample_prompt {
        builder = builder.sample_prompt(read_prompt(path).await?);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn read_prompt(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read prompt from {:?}", path))
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}
