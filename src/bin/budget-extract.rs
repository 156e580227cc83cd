//! CLI binary for budget-extract.
//!
//! A thin shim over the library crate: maps CLI flags to `ExtractionConfig`,
//! drives the progress bar, and prints results.

use anyhow::{Context, Result};
use budget_extract::config::{DEFAULT_OUTPUT_PATH, DEFAULT_PAGES_DIR, DEFAULT_PDF_PATH};
use budget_extract::pipeline::llm::resolve_backend;
use budget_extract::{
    extract, load_combined, rebuild_combined, render_report, BudgetAgent, Column, ExtractionConfig,
    ExtractionProgressCallback, PageSelection, PageStore, PageType, ProgressCallback, ReportOptions,
};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

const TICKS: [&str; 11] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_run_start` tells us how many pages there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting {total_pages} page(s)…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_retry(&self, page_num: usize, attempt: u32, wait_ms: u64) {
        self.bar.println(format!(
            "  {} Page {:>3}  {}",
            yellow("↻"),
            page_num,
            dim(&format!("rate limited, retry {attempt} in {:.0}s", wait_ms as f64 / 1000.0)),
        ));
    }

    fn on_page_cached(&self, page_num: usize, _total: usize, page_type: PageType, items: usize) {
        self.bar.println(format!(
            "  {} Page {:>3}  {:<15} {}",
            dim("="),
            page_num,
            dim(page_type.as_str()),
            dim(&format!("{items:>4} items (cached)")),
        ));
        self.bar.inc(1);
    }

    fn on_page_complete(&self, page_num: usize, _total: usize, page_type: PageType, items: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}  {:<15} {}  {}",
            green("✓"),
            page_num,
            page_type.as_str(),
            format!("{items:>4} items"),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, _total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}  {}  {}",
            red("✗"),
            page_num,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!("{} {} page(s) done", green("✔"), bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} {}/{} page(s) done  ({} failed)",
                if failed == total_pages { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every page of data/raw/budget.pdf
  budget-extract extract

  # Just page 8, or the first 10 pages
  budget-extract extract --page 8
  budget-extract extract --pages 10

  # A range, skipping pages already on disk
  budget-extract extract --range 3-15 --resume

  # Rebuild data/processed/budget.json from the per-page files
  budget-extract merge

  # Terminal report on the adopted budget
  budget-extract report --column budget-2526-final --top 15

  # Ask a question (omit it for an interactive session)
  budget-extract ask "How much does the police department cost?"

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY     Google Gemini API key (default provider)
  PDFIUM_LIB_PATH    Path to libpdfium if it is not installed system-wide
  RUST_LOG           Log filter, overrides -v / -q
  BUDGET_*           Every flag has a BUDGET_ equivalent (see --help per command)

  A .env file in the working directory is loaded at startup.
"#;

/// Extract structured line items from a municipal budget PDF.
#[derive(Parser, Debug)]
#[command(
    name = "budget-extract",
    version,
    about = "Extract structured line items from a municipal budget PDF with a vision model",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "BUDGET_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "BUDGET_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract pages into per-page JSON files and rebuild the combined file.
    Extract(ExtractArgs),
    /// Rebuild the combined file from the per-page files.
    Merge(MergeArgs),
    /// Print a report from the combined file.
    Report(ReportArgs),
    /// Ask questions about the budget.
    Ask(AskArgs),
}

#[derive(Args, Debug)]
struct DataPaths {
    /// Directory of per-page JSON files.
    #[arg(long, env = "BUDGET_PAGES_DIR", default_value = DEFAULT_PAGES_DIR)]
    pages_dir: PathBuf,

    /// Combined JSON file.
    #[arg(short, long, env = "BUDGET_OUTPUT", default_value = DEFAULT_OUTPUT_PATH)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Model ID.
    #[arg(long, env = "BUDGET_MODEL")]
    model: Option<String>,

    /// LLM provider understood by edgequake-llm (gemini, openai, anthropic, …).
    #[arg(long, env = "BUDGET_PROVIDER")]
    provider: Option<String>,

    /// Retries on rate limits and transient failures.
    #[arg(long, env = "BUDGET_MAX_RETRIES", default_value_t = 4)]
    max_retries: u32,

    /// Wait before the first retry in ms, doubled per retry.
    #[arg(long, env = "BUDGET_RETRY_BACKOFF_MS", default_value_t = 5000)]
    retry_backoff_ms: u64,

    /// Per-call timeout in seconds.
    #[arg(long, env = "BUDGET_API_TIMEOUT", default_value_t = 300)]
    api_timeout: u64,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Process only this page (1-indexed).
    #[arg(long, env = "BUDGET_PAGE", conflicts_with_all = ["pages", "range"])]
    page: Option<usize>,

    /// Process the first N pages.
    #[arg(long, env = "BUDGET_PAGES", conflicts_with = "range")]
    pages: Option<usize>,

    /// Page range: 3-15 or 1,3,5.
    #[arg(long, env = "BUDGET_RANGE")]
    range: Option<String>,

    /// Skip pages whose per-page file already exists.
    #[arg(long, env = "BUDGET_RESUME")]
    resume: bool,

    /// Source PDF: local path or HTTP/HTTPS URL.
    #[arg(long, env = "BUDGET_PDF", default_value = DEFAULT_PDF_PATH)]
    pdf: String,

    #[command(flatten)]
    paths: DataPaths,

    #[command(flatten)]
    model: ModelArgs,

    /// Rendering DPI (72–400).
    #[arg(long, env = "BUDGET_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Max model output tokens per page.
    #[arg(long, env = "BUDGET_MAX_TOKENS", default_value_t = 65536)]
    max_tokens: usize,

    /// Path to a text file replacing the built-in extraction prompt.
    #[arg(long, env = "BUDGET_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "BUDGET_PASSWORD")]
    password: Option<String>,

    /// Stop the run when a page exhausts its retries instead of skipping it.
    #[arg(long, env = "BUDGET_ABORT_ON_FAILURE")]
    abort_on_failure: bool,

    /// HTTP download timeout in seconds (URL inputs).
    #[arg(long, env = "BUDGET_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Disable progress bar.
    #[arg(long, env = "BUDGET_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Source PDF recorded in the combined file.
    #[arg(long, env = "BUDGET_PDF", default_value = DEFAULT_PDF_PATH)]
    pdf: String,

    #[command(flatten)]
    paths: DataPaths,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Combined JSON file.
    #[arg(short, long, env = "BUDGET_OUTPUT", default_value = DEFAULT_OUTPUT_PATH)]
    output: PathBuf,

    /// Amount column to report on.
    #[arg(long, env = "BUDGET_COLUMN", value_enum, default_value = "budget-2526-final")]
    column: ColumnArg,

    /// Rows per ranked table.
    #[arg(long, env = "BUDGET_TOP", default_value_t = 10)]
    top: usize,
}

#[derive(Args, Debug)]
struct AskArgs {
    /// The question. Omit for an interactive session on stdin.
    question: Option<String>,

    /// Combined JSON file.
    #[arg(short, long, env = "BUDGET_OUTPUT", default_value = DEFAULT_OUTPUT_PATH)]
    output: PathBuf,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ColumnArg {
    Fy2024Actual,
    Fy2025ActualYtd,
    Budget2425Original,
    Budget2425Adjusted,
    Budget2526Request,
    Budget2526Mayor,
    Budget2526Final,
}

impl From<ColumnArg> for Column {
    fn from(v: ColumnArg) -> Self {
        match v {
            ColumnArg::Fy2024Actual => Column::Fy2024Actual,
            ColumnArg::Fy2025ActualYtd => Column::Fy2025ActualYtd,
            ColumnArg::Budget2425Original => Column::Budget2425Original,
            ColumnArg::Budget2425Adjusted => Column::Budget2425Adjusted,
            ColumnArg::Budget2526Request => Column::Budget2526Request,
            ColumnArg::Budget2526Mayor => Column::Budget2526Mayor,
            ColumnArg::Budget2526Final => Column::Budget2526Final,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs while it is on screen.
    let show_progress = match cli.command {
        Command::Extract(ref args) => !cli.quiet && !args.no_progress,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Extract(ref args) => run_extract(args, show_progress, cli.quiet).await,
        Command::Merge(ref args) => run_merge(args, cli.quiet).await,
        Command::Report(ref args) => run_report(args).await,
        Command::Ask(ref args) => run_ask(args).await,
    }
}

async fn run_extract(args: &ExtractArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(args, progress_cb).await?;
    let output = extract(&config).await.context("Extraction failed")?;

    if !quiet {
        let stats = &output.stats;
        eprintln!(
            "{}  {} extracted, {} cached, {} failed  {}ms  →  {}",
            if stats.failed_pages == 0 { green("✔") } else { cyan("⚠") },
            stats.extracted_pages,
            stats.cached_pages,
            stats.failed_pages,
            stats.total_duration_ms,
            bold(&config.output_path.display().to_string()),
        );
        eprintln!(
            "   {} pages / {} items in combined file  ·  {} tokens in  /  {} tokens out",
            output.document.total_pages,
            output.document.total_items,
            dim(&stats.total_input_tokens.to_string()),
            dim(&stats.total_output_tokens.to_string()),
        );
        let failed: Vec<String> = output.failures().map(|e| e.page().to_string()).collect();
        if !failed.is_empty() {
            eprintln!(
                "   {} failed page(s): {}. Rerun with --resume to retry them.",
                red(&failed.len().to_string()),
                failed.join(", ")
            );
        }
    }
    Ok(())
}

async fn run_merge(args: &MergeArgs, quiet: bool) -> Result<()> {
    let store = PageStore::new(&args.paths.pages_dir);
    let document = rebuild_combined(&store, &args.paths.output, Some(args.pdf.clone()))
        .await
        .with_context(|| format!("Failed to merge {}", args.paths.pages_dir.display()))?;
    if !quiet {
        eprintln!(
            "{} {} page(s), {} item(s)  →  {}",
            green("✔"),
            document.total_pages,
            document.total_items,
            bold(&args.paths.output.display().to_string())
        );
    }
    Ok(())
}

async fn run_report(args: &ReportArgs) -> Result<()> {
    let document = load_combined(&args.output)
        .await
        .with_context(|| format!("Failed to read {}", args.output.display()))?;
    let options = ReportOptions {
        column: args.column.into(),
        top: args.top,
    };
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(render_report(&document, &options).as_bytes())
        .context("Failed to write to stdout")?;
    Ok(())
}

async fn run_ask(args: &AskArgs) -> Result<()> {
    let document = load_combined(&args.output)
        .await
        .with_context(|| format!("Failed to read {}", args.output.display()))?;

    let mut builder = ExtractionConfig::builder()
        .max_tokens(8192)
        .max_retries(args.model.max_retries)
        .retry_backoff_ms(args.model.retry_backoff_ms)
        .api_timeout_secs(args.model.api_timeout);
    if let Some(ref provider) = args.model.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref model) = args.model.model {
        builder = builder.model(model);
    }
    let config = builder.build().context("Invalid configuration")?;
    let backend = resolve_backend(&config).context("Model provider unavailable")?;
    let mut agent = BudgetAgent::with_config(backend, &document, config);

    if let Some(ref question) = args.question {
        let answer = agent.ask(question).await.context("Question failed")?;
        println!("{answer}");
        return Ok(());
    }

    eprintln!(
        "{} {} — empty line or Ctrl-D to quit",
        cyan("◆"),
        bold("Ask about the budget")
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("{} ", cyan("?"));
        io::stderr().flush().ok();
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        if line.trim().is_empty() {
            break;
        }
        match agent.ask(&line).await {
            Ok(answer) => println!("{answer}\n"),
            Err(e) => eprintln!("{} {}", red("✗"), e),
        }
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(args: &ExtractArgs, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let pages = if let Some(page) = args.page {
        if page < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
        }
        PageSelection::Single(page)
    } else if let Some(n) = args.pages {
        PageSelection::First(n)
    } else if let Some(ref range) = args.range {
        parse_range(range)?
    } else {
        PageSelection::All
    };

    let mut builder = ExtractionConfig::builder()
        .input(args.pdf.as_str())
        .pages_dir(&args.paths.pages_dir)
        .output_path(&args.paths.output)
        .pages(pages)
        .resume(args.resume)
        .dpi(args.dpi)
        .max_tokens(args.max_tokens)
        .max_retries(args.model.max_retries)
        .retry_backoff_ms(args.model.retry_backoff_ms)
        .api_timeout_secs(args.model.api_timeout)
        .abort_on_failure(args.abort_on_failure)
        .download_timeout_secs(args.download_timeout);

    if let Some(ref path) = args.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref password) = args.password {
        builder = builder.password(password);
    }
    if let Some(ref provider) = args.model.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref model) = args.model.model {
        builder = builder.model(model);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--range` into `PageSelection`: `3-15`, `1,3,5`, or a single page.
fn parse_range(s: &str) -> Result<PageSelection> {
    let s = s.trim();

    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start.trim().parse().context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }
        return Ok(PageSelection::Range(start, end));
    }

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

    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}
