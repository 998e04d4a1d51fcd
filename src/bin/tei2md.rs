//! CLI binary for tei2md.
//!
//! A thin shim over the library crate that maps flags onto the three config
//! builders and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tei2md::{
    analyze_files, extract_to_dir, process_batch, AnalysisConfig, BatchOptions,
    BatchProgressCallback, ExtractionConfig, GrobidClient, GrobidConfig, ProgressCallback,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

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

// ── Batch progress bar ───────────────────────────────────────────────────

/// One bar for the whole batch plus a log line per finished document.
/// Documents finish out of order, so start times are keyed by index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} papers  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        bar.set_prefix("Processing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total} papers…"))
        ));
    }

    fn on_document_start(&self, index: usize, _total: usize, path: &Path) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(index, Instant::now());
        }
        self.bar.set_message(file_name(path));
    }

    fn on_document_complete(&self, index: usize, _total: usize, path: &Path) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:<40}  {}",
            green("✓"),
            file_name(path),
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, _total: usize, path: &Path, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            red("✗"),
            file_name(path),
            red(&msg),
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let failed = total.saturating_sub(succeeded);
        if failed == 0 {
            eprintln!("{} {} papers processed", green("✔"), bold(&succeeded.to_string()));
        } else {
            eprintln!(
                "{} {}/{} papers processed  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

// ── Arguments ────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Full pipeline: PDF → GROBID → Markdown + figures
  tei2md process paper.pdf -o out/

  # Several papers, with heritage analysis
  tei2md process papers/*.pdf -o out/ --analyze --top-n 5

  # TEI you already have, cropping figures from the PDF
  tei2md extract paper.tei.xml --pdf paper.pdf -o out/

  # Analyse existing Markdown, using the TEI bibliography
  tei2md analyze out/paper_sections.md --tei out/paper.tei.xml

OUTPUT LAYOUT (per paper):
  <out>/<stem>.tei.xml          raw GROBID output (process only)
  <out>/<stem>_sections.md      heading-nested Markdown
  <out>/<stem>_content.json     sections, figures, graphics, crop failures
  <out>/<stem>_analysis.json    analysis (with --analyze)
  <out>/figures/*.png           cropped figures and tables
  <out>/graphics/*.png          cropped graphics

ENVIRONMENT VARIABLES:
  GROBID_URL              GROBID base URL (default http://localhost:8070)
  TEI2MD_MODEL            LLM model ID
  TEI2MD_PROVIDER         LLM provider (openai, anthropic, gemini, ollama)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Provider fallback when --provider is not set
  EDGEQUAKE_MODEL         Model fallback when --model is not set
  RUST_LOG                Log filter (default tei2md=info)
"#;

/// Turn GROBID TEI-XML into Markdown, cropped figures, and LLM analysis.
#[derive(Parser, Debug)]
#[command(
    name = "tei2md",
    version,
    about = "Turn academic PDFs into Markdown, cropped figures, and a heritage analysis via GROBID",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "TEI2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "TEI2MD_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send PDFs through GROBID, then extract (and optionally analyse) each.
    Process(ProcessArgs),
    /// Extract Markdown and figures from an existing TEI file.
    Extract(ExtractArgs),
    /// Run the heritage analysis on an existing Markdown file.
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// PDF files to process.
    #[arg(required = true)]
    pdfs: Vec<PathBuf>,

    /// Output root; each paper gets `<out>/<stem>/`.
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// GROBID base URL.
    #[arg(long, env = "GROBID_URL", default_value = "http://localhost:8070")]
    grobid_url: String,

    /// GROBID request timeout in seconds.
    #[arg(long, default_value_t = 120)]
    grobid_timeout: u64,

    /// Papers processed at once.
    #[arg(short, long, default_value_t = 2)]
    concurrency: usize,

    /// Also run the LLM heritage analysis.
    #[arg(long)]
    analyze: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,

    #[command(flatten)]
    extraction: ExtractionArgs,

    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// TEI-XML file produced by GROBID.
    tei: PathBuf,

    /// Original PDF; figures are cropped only when given.
    #[arg(long)]
    pdf: Option<PathBuf>,

    /// Output directory.
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Print the extraction stats as JSON.
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    extraction: ExtractionArgs,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Markdown file to analyse.
    markdown: PathBuf,

    /// TEI file for the structured bibliography.
    #[arg(long)]
    tei: Option<PathBuf>,

    /// Write the full analysis JSON here.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    llm: LlmArgs,
}

#[derive(Args, Debug)]
struct ExtractionArgs {
    /// Points → pixels factor for page rendering (0.5–8.0).
    #[arg(long, default_value_t = 2.0)]
    scale: f32,

    /// Crop every page a multi-page figure touches.
    #[arg(long)]
    all_pages: bool,

    /// Skip figure and table crops.
    #[arg(long)]
    no_figures: bool,

    /// Skip graphic crops.
    #[arg(long)]
    no_graphics: bool,

    /// Number of `#` for top-level sections (1–5).
    #[arg(long, default_value_t = 2)]
    heading_level: usize,
}

#[derive(Args, Debug)]
struct LlmArgs {
    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "TEI2MD_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "TEI2MD_PROVIDER")]
    provider: Option<String>,

    /// Relevant references to keep.
    #[arg(long, default_value_t = 3)]
    top_n: usize,

    /// Max LLM output tokens.
    #[arg(long, default_value_t = 2000)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, default_value_t = 0.2)]
    temperature: f32,

    /// Retries on LLM failure.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// LLM call timeout in seconds.
    #[arg(long, default_value_t = 120)]
    api_timeout: u64,

    /// Path to a text file containing a custom system prompt.
    #[arg(long)]
    system_prompt: Option<PathBuf>,
}

// ── Config mapping ───────────────────────────────────────────────────────

fn extraction_config(args: &ExtractionArgs) -> Result<ExtractionConfig> {
    ExtractionConfig::builder()
        .render_scale(args.scale)
        .crop_all_pages(args.all_pages)
        .crop_figures(!args.no_figures)
        .crop_graphics(!args.no_graphics)
        .heading_base_level(args.heading_level)
        .build()
        .context("Invalid extraction configuration")
}

async fn analysis_config(args: &LlmArgs) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .top_n(args.top_n)
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout);
    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = args.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    builder.build().context("Invalid analysis configuration")
}

// ── Commands ─────────────────────────────────────────────────────────────

async fn run_process(args: ProcessArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let grobid = GrobidConfig::builder()
        .server_url(&args.grobid_url)
        .timeout_secs(args.grobid_timeout)
        .build()
        .context("Invalid GROBID configuration")?;
    let extraction = extraction_config(&args.extraction)?;
    let analysis = if args.analyze {
        Some(analysis_config(&args.llm).await?)
    } else {
        None
    };

    let client = GrobidClient::new(&grobid)?;
    client
        .ensure_alive()
        .await
        .with_context(|| format!("GROBID is not reachable at {}", grobid.server_url))?;

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{} Interrupted: finishing papers already started", cyan("⚠"));
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let options = BatchOptions {
        concurrency: args.concurrency,
        cancel: Some(cancel),
        progress,
    };

    let results = process_batch(
        args.pdfs,
        &args.output_dir,
        &grobid,
        &extraction,
        analysis.as_ref(),
        &options,
    )
    .await;

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if !quiet {
        for (pdf, result) in &results {
            match result {
                Ok(report) => {
                    let stats = &report.extraction.stats;
                    eprintln!(
                        "{}  {}  {} sections, {} figures, {} tables, {} images  {}",
                        green("✔"),
                        bold(&file_name(pdf)),
                        stats.sections,
                        stats.figures,
                        stats.tables,
                        stats.images_written,
                        dim(&format!("{}ms", stats.duration_ms)),
                    );
                    if let Some(summary) = report
                        .analysis
                        .as_ref()
                        .and_then(|a| a.analysis.as_ref())
                        .map(|a| a.summary(analysis.as_ref().map_or(3, |c| c.top_n)))
                    {
                        println!("{summary}");
                    }
                    if let Some(err) = &report.analysis_error {
                        eprintln!("   {}", red(&format!("analysis failed: {}", err)));
                    }
                }
                Err(e) if !show_progress => {
                    eprintln!("{}  {}  {}", red("✘"), bold(&file_name(pdf)), red(&e.to_string()));
                }
                Err(_) => {}
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} papers failed", failed, results.len());
    }
    Ok(())
}

async fn run_extract(args: ExtractArgs, quiet: bool) -> Result<()> {
    let config = extraction_config(&args.extraction)?;
    let output = extract_to_dir(&args.tei, args.pdf.as_deref(), &args.output_dir, &config)
        .await
        .with_context(|| format!("Extraction of {} failed", args.tei.display()))?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output.stats).context("Failed to serialise stats")?
        );
    } else if !quiet {
        let stats = &output.stats;
        eprintln!(
            "{}  {} sections, {} figures, {} tables, {} graphics  {}",
            green("✔"),
            stats.sections,
            stats.figures,
            stats.tables,
            stats.graphics,
            dim(&format!("{}ms", stats.duration_ms)),
        );
        eprintln!(
            "   {} images written, {} crop failures, {} geometry warnings",
            stats.images_written, stats.crop_failures, stats.geometry_warnings
        );
        if let Some(paths) = &output.paths {
            eprintln!("   →  {}", bold(&paths.markdown.display().to_string()));
        }
    }
    Ok(())
}

async fn run_analyze(args: AnalyzeArgs, quiet: bool) -> Result<()> {
    let config = analysis_config(&args.llm).await?;
    let outcome = analyze_files(&args.markdown, args.tei.as_deref(), &config)
        .await
        .with_context(|| format!("Analysis of {} failed", args.markdown.display()))?;

    if let Some(ref path) = args.output {
        tei2md::output::write_json(path, &outcome)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    match &outcome.analysis {
        Some(analysis) => println!("{}", analysis.summary(config.top_n)),
        None => {
            let reason = outcome
                .parse_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();
            eprintln!("{} Could not parse the model's reply: {}", red("✘"), reason);
            println!("{}", outcome.raw_response);
        }
    }
    if !quiet {
        eprintln!(
            "   {} references ({:?})  {} tokens in  /  {} tokens out",
            outcome.references.len(),
            outcome.reference_source,
            dim(&outcome.prompt_tokens.to_string()),
            dim(&outcome.completion_tokens.to_string()),
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The progress bar carries the per-paper feedback, so library INFO logs
    // are lowered to WARN while it is shown.
    let show_progress = match &cli.command {
        Command::Process(args) => !cli.quiet && !args.no_progress,
        _ => false,
    };
    let filter = if cli.verbose {
        "tei2md=debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "tei2md=warn"
    } else {
        "tei2md=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Process(args) => run_process(args, cli.quiet, show_progress).await,
        Command::Extract(args) => run_extract(args, cli.quiet).await,
        Command::Analyze(args) => run_analyze(args, cli.quiet).await,
    }
}
