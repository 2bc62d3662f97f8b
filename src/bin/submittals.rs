//! CLI binary for submittal-extract.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use submittal_extract::pipeline::{input, plan, split};
use submittal_extract::prompts::load_prompt_file;
use submittal_extract::schema::load_schema_file;
use submittal_extract::service::resolve_service;
use submittal_extract::{
    extract_submittals, inspect, write_result, ChunkPlan, ChunkResult, ChunkSpec, CostRates,
    ExtractionConfig, MergedResult, PageRange, PipelineObserver,
};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Progress observer using indicatif ────────────────────────────────────

/// Live progress bar over chunks. Chunks may complete out of order when
/// `--concurrency` is above one.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Loading document…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineObserver for CliObserver {
    fn on_run_start(&self, plan: &ChunkPlan) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>2}/{len} chunks  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(plan.len() as u64);
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            bold("◆"),
            bold(&format!(
                "Pages {} in {} chunk(s), ~{} tokens",
                plan.range,
                plan.len(),
                plan.estimated_tokens
            ))
        ));
    }

    fn on_chunk_start(&self, spec: &ChunkSpec, _total: usize) {
        self.bar
            .set_message(format!("pages {}-{}", spec.start_page, spec.end_page));
    }

    fn on_chunk_complete(&self, result: &ChunkResult, total: usize) {
        let line = match &result.error {
            None => format!(
                "  {} Chunk {:>2}/{:<2}  pages {:>4}-{:<4}  {}  {}{}",
                green("✓"),
                result.chunk_index,
                total,
                result.start_page,
                result.end_page,
                dim(&format!("{:>4} bullets", result.bullets.len())),
                dim(&format!("${:.4}  {:.1}s", result.usage.cost, result.duration_ms as f64 / 1000.0)),
                if result.repaired { yellow("  repaired") } else { String::new() },
            ),
            Some(e) => {
                let msg = e.to_string();
                let msg = match msg.char_indices().nth(90) {
                    Some((cut, _)) => format!("{}…", &msg[..cut]),
                    None => msg,
                };
                format!(
                    "  {} Chunk {:>2}/{:<2}  pages {:>4}-{:<4}  {}",
                    red("✗"),
                    result.chunk_index,
                    total,
                    result.start_page,
                    result.end_page,
                    red(&msg)
                )
            }
        };
        self.bar.println(line);
        self.bar.inc(1);
    }

    fn on_run_complete(&self, _result: &MergedResult) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a submittal register (JSON to stdout)
  submittals extract project_manual.pdf

  # Write to a file, stop spending after $5
  submittals extract project_manual.pdf -o register.json --cost-ceiling 5

  # Only Division 08 (pages 410-520), keep raw responses for inspection
  submittals extract manual.pdf --pages 410-520 --debug-dir debug/

  # How would the manual be chunked and what will it cost? (no API key needed)
  submittals plan project_manual.pdf

  # Write the chunk PDFs without extracting anything
  submittals split project_manual.pdf --out-dir chunks/

  # Check credentials and custom prompt/schema files
  submittals validate --prompt-file prompt.txt --schema-file schema.json

ENVIRONMENT VARIABLES:
  OPENROUTER_API_KEY      OpenRouter key (structured-output endpoint, preferred)
  OPENROUTER_BASE_URL     Override the OpenRouter base URL
  GEMINI_MODEL_NAME       Model for OpenRouter (default google/gemini-2.5-pro)
  EDGEQUAKE_LLM_PROVIDER  edgequake-llm provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         edgequake-llm model id
  PDFIUM_LIB_PATH         Directory containing libpdfium
  RUST_LOG                Overrides -v / -q log filtering
"#;

/// Extract submittal registers from construction specification manuals.
#[derive(Parser, Debug)]
#[command(
    name = "submittals",
    version,
    about = "Extract submittal registers from construction specification manuals using LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "SUBMITTALS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "SUBMITTALS_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full extraction and emit the merged JSON result.
    Extract(ExtractArgs),
    /// Print page count, chunk plan and estimated cost. No API key needed.
    Plan(PlanArgs),
    /// Write each planned chunk as its own file.
    Split(SplitArgs),
    /// Check service credentials and optional prompt/schema files.
    Validate(ValidateArgs),
}

/// Flags shared by every command that plans a document.
#[derive(Args, Debug, Clone)]
struct PlanningArgs {
    /// Restrict the run to pages `a-b` (or a single page `n`), 1-indexed.
    #[arg(long, env = "SUBMITTALS_PAGES")]
    pages: Option<PageRange>,

    /// Documents estimated at or below this many tokens go out whole.
    #[arg(long, env = "SUBMITTALS_SPLIT_THRESHOLD", default_value_t = 100_000)]
    split_threshold: usize,

    /// Token budget per chunk once splitting kicks in.
    #[arg(long, env = "SUBMITTALS_MAX_TOKENS_PER_CHUNK", default_value_t = 100_000)]
    max_tokens_per_chunk: usize,

    /// Average tokens per specification page, used for planning.
    #[arg(long, env = "SUBMITTALS_TOKENS_PER_PAGE", default_value_t = 530)]
    tokens_per_page: usize,

    /// Input price in USD per million tokens.
    #[arg(long, env = "SUBMITTALS_INPUT_RATE", default_value_t = 1.25)]
    input_rate: f64,

    /// Output price in USD per million tokens.
    #[arg(long, env = "SUBMITTALS_OUTPUT_RATE", default_value_t = 10.0)]
    output_rate: f64,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// PDF or form-feed paged text file.
    input: String,

    /// Write the JSON result to this file instead of stdout.
    #[arg(short, long, env = "SUBMITTALS_OUTPUT")]
    output: Option<PathBuf>,

    #[command(flatten)]
    planning: PlanningArgs,

    /// Model id (OpenRouter or edgequake-llm, depending on the service).
    #[arg(long, env = "SUBMITTALS_MODEL")]
    model: Option<String>,

    /// edgequake-llm provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "SUBMITTALS_PROVIDER")]
    provider: Option<String>,

    /// Number of chunks extracted at once.
    #[arg(short, long, env = "SUBMITTALS_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Stop sending chunks once this many USD have been spent.
    #[arg(long, env = "SUBMITTALS_COST_CEILING")]
    cost_ceiling: Option<f64>,

    /// Warn when a single response costs more than this many USD.
    #[arg(long, env = "SUBMITTALS_COST_ALERT", default_value_t = 10.0)]
    cost_alert: f64,

    /// Retries per chunk on a transient service failure.
    #[arg(long, env = "SUBMITTALS_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Initial retry delay in milliseconds (doubles each retry).
    #[arg(long, env = "SUBMITTALS_RETRY_BACKOFF_MS", default_value_t = 1000)]
    retry_backoff_ms: u64,

    /// Per-request timeout in seconds.
    #[arg(long, env = "SUBMITTALS_TIMEOUT", default_value_t = 300)]
    timeout: u64,

    /// Sampling temperature (0.0 to 2.0).
    #[arg(long, env = "SUBMITTALS_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max output tokens per response.
    #[arg(long, env = "SUBMITTALS_MAX_OUTPUT_TOKENS", default_value_t = 65_536)]
    max_output_tokens: usize,

    /// Text file with a replacement system prompt.
    #[arg(long, env = "SUBMITTALS_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// JSON file with a replacement response schema.
    #[arg(long, env = "SUBMITTALS_SCHEMA_FILE")]
    schema_file: Option<PathBuf>,

    /// Keep raw responses and chunk files in this directory.
    #[arg(long, env = "SUBMITTALS_DEBUG_DIR")]
    debug_dir: Option<PathBuf>,

    /// Exit with an error when any chunk failed or was skipped.
    #[arg(long, env = "SUBMITTALS_STRICT")]
    strict: bool,

    /// Disable the progress bar.
    #[arg(long, env = "SUBMITTALS_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// PDF or form-feed paged text file.
    input: String,

    #[command(flatten)]
    planning: PlanningArgs,

    /// Print the plan as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct SplitArgs {
    /// PDF or form-feed paged text file.
    input: String,

    /// Directory for the chunk files.
    #[arg(long, env = "SUBMITTALS_SPLIT_DIR")]
    out_dir: PathBuf,

    #[command(flatten)]
    planning: PlanningArgs,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Model id to validate against.
    #[arg(long, env = "SUBMITTALS_MODEL")]
    model: Option<String>,

    /// edgequake-llm provider name.
    #[arg(long, env = "SUBMITTALS_PROVIDER")]
    provider: Option<String>,

    /// Prompt file to check.
    #[arg(long, env = "SUBMITTALS_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Schema file to check.
    #[arg(long, env = "SUBMITTALS_SCHEMA_FILE")]
    schema_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // While the progress bar is up only warnings get through, so retries
    // and cost alerts still show.
    let progress = match &cli.command {
        Command::Extract(args) => !cli.quiet && !args.no_progress,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if progress {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Extract(args) => run_extract(args, progress, cli.quiet).await,
        Command::Plan(args) => run_plan(args).await,
        Command::Split(args) => run_split(args, cli.quiet).await,
        Command::Validate(args) => run_validate(args),
    }
}

async fn run_extract(args: ExtractArgs, progress: bool, quiet: bool) -> Result<()> {
    let config = build_config(&args, progress)?;

    let result = extract_submittals(&args.input, &config)
        .await
        .context("Extraction failed")?;
    let result = if args.strict {
        result
            .into_complete(config.cost_ceiling)
            .context("Extraction incomplete")?
    } else {
        result
    };

    match args.output {
        Some(ref path) => {
            write_result(&result, path).context("Failed to write result")?;
        }
        None => {
            let json = serde_json::to_string_pretty(&result).context("Failed to serialize result")?;
            println!("{json}");
        }
    }

    if !quiet {
        print_summary(&result, args.output.as_ref());
    }
    Ok(())
}

fn print_summary(result: &MergedResult, output: Option<&PathBuf>) {
    let s = &result.stats;
    let mark = if result.ceiling_exceeded {
        red("⚠")
    } else if result.partial {
        yellow("⚠")
    } else {
        green("✔")
    };
    eprintln!(
        "{}  {}/{} chunks  {} bullets ({} duplicates removed)  {}ms{}",
        mark,
        s.chunks_total - s.chunks_failed,
        s.chunks_total,
        bold(&s.bullets_after_dedup.to_string()),
        s.duplicates_removed,
        s.duration_ms,
        output
            .map(|p| format!("  →  {}", bold(&p.display().to_string())))
            .unwrap_or_default(),
    );
    eprintln!(
        "   {} tokens in  /  {} tokens out  /  ${:.4}  /  {} retries",
        dim(&s.total_input_tokens.to_string()),
        dim(&s.total_output_tokens.to_string()),
        s.total_cost,
        s.total_retries,
    );
    for gap in &result.gaps {
        eprintln!(
            "   {} pages {}-{} missing ({}): {}",
            red("✗"),
            gap.start_page,
            gap.end_page,
            gap.kind,
            gap.reason
        );
    }
    if result.ceiling_exceeded {
        eprintln!(
            "   {}",
            red(&format!(
                "cost ceiling reached, {} chunk(s) not sent",
                s.chunks_not_attempted
            ))
        );
    }
}

async fn run_plan(args: PlanArgs) -> Result<()> {
    let config = planning_config(&args.planning)?;
    let inspection = inspect(&args.input, &config)
        .await
        .context("Failed to inspect document")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&inspection).context("Failed to serialize plan")?
        );
        return Ok(());
    }

    println!("File:         {}", inspection.name);
    println!("Kind:         {:?}", inspection.kind);
    println!("Pages:        {}", inspection.page_count);
    println!("Selected:     {}", inspection.range);
    println!("Est. tokens:  {}", inspection.plan.estimated_tokens);
    println!("Chunks:       {}", inspection.plan.len());
    for spec in &inspection.plan.chunks {
        println!(
            "  {:>2}  pages {:>4}-{:<4}  ~{} tokens",
            spec.index, spec.start_page, spec.end_page, spec.estimated_tokens
        );
    }
    println!(
        "Est. cost:    ${:.2}  ({} in / {} out tokens)",
        inspection.estimate.cost, inspection.estimate.input_tokens, inspection.estimate.output_tokens
    );
    Ok(())
}

async fn run_split(args: SplitArgs, quiet: bool) -> Result<()> {
    let config = planning_config(&args.planning)?;
    let document = input::load_document(&args.input)
        .await
        .context("Failed to load document")?;
    let range = document.selected_range(config.pages)?;
    let plan = plan::plan(range, &config);
    let chunks = split::split(&document, &plan)
        .await
        .context("Failed to split document")?;
    let paths = split::write_chunks(&chunks, &document.stem(), document.kind(), &args.out_dir)
        .context("Failed to write chunks")?;

    if !quiet {
        for path in &paths {
            eprintln!("  {} {}", green("✓"), path.display());
        }
        eprintln!("{}  {} chunk file(s) written", green("✔"), paths.len());
    }
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<()> {
    let mut builder = ExtractionConfig::builder();
    if let Some(ref path) = args.prompt_file {
        let prompt = load_prompt_file(path).context("Prompt file is invalid")?;
        println!("{} prompt {} ({} chars)", green("✓"), path.display(), prompt.len());
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref path) = args.schema_file {
        let schema = load_schema_file(path).context("Schema file is invalid")?;
        println!("{} schema {}", green("✓"), path.display());
        builder = builder.schema(schema);
    }
    if let Some(ref model) = args.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider.clone());
    }
    let config = builder.build().context("Invalid configuration")?;

    let service = resolve_service(&config).context("No extraction service available")?;
    println!("{} service {}", green("✓"), service.name());
    Ok(())
}

/// Config carrying only what planning needs.
fn planning_config(args: &PlanningArgs) -> Result<ExtractionConfig> {
    planning_builder(args)
        .build()
        .context("Invalid configuration")
}

fn planning_builder(args: &PlanningArgs) -> submittal_extract::ExtractionConfigBuilder {
    let mut builder = ExtractionConfig::builder()
        .split_threshold_tokens(args.split_threshold)
        .max_tokens_per_chunk(args.max_tokens_per_chunk)
        .tokens_per_page_estimate(args.tokens_per_page)
        .rates(CostRates {
            input_per_million: args.input_rate,
            output_per_million: args.output_rate,
        });
    if let Some(range) = args.pages {
        builder = builder.pages(range);
    }
    builder
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(args: &ExtractArgs, progress: bool) -> Result<ExtractionConfig> {
    let mut builder = planning_builder(&args.planning)
        .concurrency(args.concurrency)
        .max_retries(args.max_retries)
        .retry_backoff_ms(args.retry_backoff_ms)
        .request_timeout_secs(args.timeout)
        .temperature(args.temperature)
        .max_output_tokens(args.max_output_tokens)
        .cost_alert_threshold(Some(args.cost_alert));

    if let Some(ceiling) = args.cost_ceiling {
        builder = builder.cost_ceiling(ceiling);
    }
    if let Some(ref model) = args.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref path) = args.prompt_file {
        builder = builder.system_prompt(load_prompt_file(path).context("Failed to load prompt")?);
    }
    if let Some(ref path) = args.schema_file {
        builder = builder.schema(load_schema_file(path).context("Failed to load schema")?);
    }
    if let Some(ref dir) = args.debug_dir {
        builder = builder.debug_dir(dir.clone());
    }
    if progress {
        builder = builder.observer(CliObserver::new());
    }

    builder.build().context("Invalid configuration")
}
