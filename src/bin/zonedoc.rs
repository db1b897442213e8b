//! CLI binary for zonedoc.
//!
//! A thin shim over the library crate: each subcommand maps to one stage
//! entry point, and `run` drives the whole pipeline over a city's source
//! PDFs.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zonedoc::pipeline::normalize::{fetch_ocr, normalize_stage};
use zonedoc::pipeline::{dedup, segment, tables};
use zonedoc::{
    BatchProgressCallback, CheckpointOnly, DataLayout, DocumentContext, DocumentOutput,
    DocumentType, DuplicatePages, ImageDedup, Job, LlmPageClassifier, PdfiumRenderer, Pipeline,
    PipelineConfig, ProgressCallback, StageOutcome,
};

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the batch, one line per document.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Processing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.bar.set_length(total_documents as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_documents} documents…"))
        ));
    }

    fn on_document_start(&self, _doc_num: usize, _total: usize, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn on_document_complete(&self, doc_num: usize, total: usize, name: &str) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}",
            green("✓"),
            doc_num,
            total,
            name
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, doc_num: usize, total: usize, name: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        // Keep the first line only; hints follow on later lines.
        let first = error.lines().next().unwrap_or(error);
        let msg: String = if first.chars().count() > 80 {
            format!("{}\u{2026}", first.chars().take(79).collect::<String>())
        } else {
            first.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            doc_num,
            total,
            name,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let failed = total_documents.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} documents processed successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents processed  ({} failed)",
                if failed == total_documents {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_documents,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"DATA DIRECTORY:
  data/
   ├─ 1.external/<city>/<date>/<doc>.pdf          source PDFs
   ├─ 2.ocr/<city>/<doc>.json                     raw OCR results
   ├─ 3.raw/<city>/<doc>.json                     normalized documents
   ├─ 4.interim/<city>/<doc>.page_split.json      classifier output
   ├─ 4.interim/<city>/<zoning>/<zone>.json       zone documents
   └─ 7.render/<city>/images/<zone>/<image>       exported zone images

EXAMPLES:
  # Normalize an OCR result already stored under 2.ocr/
  zonedoc format --city grenoble --date 2024-03-01 --doc reglement

  # Deduplicate with exact image matching
  zonedoc clean --city grenoble --date 2024-03-01 --doc reglement --image-dedup exact

  # List the tables a substitution would replace
  zonedoc tables --city grenoble --date 2024-03-01 --doc reglement --list

  # Split into zone documents
  zonedoc split --city grenoble --date 2024-03-01 --doc reglement --provider gemini

  # Every stage for every document of a city
  zonedoc run --city grenoble

ENVIRONMENT VARIABLES:
  ZONEDOC_DATA_DIR        Data directory (default: data)
  OPENAI_API_KEY          OpenAI API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Log filter (default: info)
"#;

/// Normalize, deduplicate and split OCR'd urban-planning regulations by zone.
#[derive(Parser, Debug)]
#[command(
    name = "zonedoc",
    version,
    about = "Normalize, deduplicate and split OCR'd urban-planning regulations by zone",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Root of the numbered data directory.
    #[arg(long, global = true, env = "ZONEDOC_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "ZONEDOC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "ZONEDOC_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize the raw OCR result of one document.
    Format {
        #[command(flatten)]
        doc: DocArgs,
    },
    /// Remove duplicate pages and images from one normalized document.
    Clean {
        #[command(flatten)]
        doc: DocArgs,
        #[command(flatten)]
        dedup: DedupArgs,
    },
    /// Replace markdown tables with rendered source pages.
    Tables {
        #[command(flatten)]
        doc: DocArgs,
        #[command(flatten)]
        render: RenderArgs,
        /// Only list the table paragraphs; change nothing.
        #[arg(long)]
        list: bool,
    },
    /// Split one document into zone documents.
    Split {
        #[command(flatten)]
        doc: DocArgs,
        #[command(flatten)]
        llm: LlmArgs,
        /// Copy the document whole instead of classifying its pages.
        #[arg(long)]
        whole: bool,
    },
    /// Run every stage for every source PDF of a city.
    Run {
        /// City identifier.
        #[arg(long)]
        city: String,
        /// Only documents dated this day (YYYY-MM-DD).
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        /// Document type.
        #[arg(long = "type", value_enum, default_value = "plu")]
        doc_type: DocTypeArg,
        #[command(flatten)]
        dedup: DedupArgs,
        #[command(flatten)]
        render: RenderArgs,
        #[command(flatten)]
        llm: LlmArgs,
        /// Keep tables as markdown.
        #[arg(long)]
        no_tables: bool,
        /// Copy documents whole instead of splitting them by zone.
        #[arg(long)]
        no_split: bool,
        /// Disable progress bar.
        #[arg(long, env = "ZONEDOC_NO_PROGRESS")]
        no_progress: bool,
    },
}

#[derive(Args, Debug)]
struct DocArgs {
    /// City identifier.
    #[arg(long)]
    city: String,
    /// Document date (YYYY-MM-DD).
    #[arg(long, value_parser = parse_date)]
    date: NaiveDate,
    /// Document name: the file stem of its checkpoints.
    #[arg(long = "doc")]
    name: String,
    /// Document type.
    #[arg(long = "type", value_enum, default_value = "plu")]
    doc_type: DocTypeArg,
}

impl DocArgs {
    fn context(&self) -> DocumentContext {
        DocumentContext::new(&self.name, self.date, self.doc_type.into(), &self.city)
    }
}

#[derive(Args, Debug)]
struct DedupArgs {
    /// Image duplicate detection: exact or perceptual.
    #[arg(long, value_enum, default_value = "perceptual")]
    image_dedup: DedupArg,
    /// Perceptual-hash distance below which two images are duplicates (1–64).
    #[arg(long, default_value_t = 5)]
    max_distance: u32,
    /// Drop every page of an identical group instead of keeping the first.
    #[arg(long)]
    remove_all_duplicates: bool,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Table rendering DPI (72–400).
    #[arg(long, env = "ZONEDOC_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,
    /// JPEG quality of rendered tables (1–100).
    #[arg(long, default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,
}

#[derive(Args, Debug)]
struct LlmArgs {
    /// LLM model ID used by the page classifier.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,
    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,
    /// Retries on classifier failure.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,
    /// Path to a text file containing a custom classifier prompt.
    #[arg(long)]
    system_prompt: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DocTypeArg {
    Plu,
    Dg,
    PluAndDg,
}

impl From<DocTypeArg> for DocumentType {
    fn from(v: DocTypeArg) -> Self {
        match v {
            DocTypeArg::Plu => DocumentType::Plu,
            DocTypeArg::Dg => DocumentType::Dg,
            DocTypeArg::PluAndDg => DocumentType::PluAndDg,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DedupArg {
    Exact,
    Perceptual,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
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

    let layout = DataLayout::new(&cli.data_dir);

    match &cli.command {
        Command::Format { doc } => {
            let ctx = doc.context();
            let source = layout.source_pdf(&ctx.city, ctx.date, &ctx.name);
            fetch_ocr(&layout, &ctx, &source, &CheckpointOnly).context("OCR stage failed")?;
            let outcome = normalize_stage(&layout, &ctx).context("Normalization failed")?;
            report_outcome(&cli, "Normalized", &outcome);
        }
        Command::Clean { doc, dedup: args } => {
            let config = dedup_config(&cli, args)?;
            let outcome = dedup::dedup_stage(
                &layout,
                &doc.context(),
                config.duplicate_pages,
                config.image_dedup,
            )
            .context("Deduplication failed")?;
            report_outcome(&cli, "Deduplicated", &outcome);
        }
        Command::Tables { doc, render, list } => {
            let ctx = doc.context();
            if *list {
                let path = layout.normalized(&ctx.city, &ctx.name);
                let document = zonedoc::checkpoint::read_document(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                for (page, para, preview) in zonedoc::find_table_paragraphs(&document) {
                    println!("page {page:>3}  paragraph {para:>3}  {}", preview.replace('\n', " "));
                }
                return Ok(());
            }
            let renderer = PdfiumRenderer::new(render.dpi, render.quality)?;
            let source = layout.source_pdf(&ctx.city, ctx.date, &ctx.name);
            let outcome = tables::tables_stage(&layout, &ctx, &source, &renderer)
                .context("Table substitution failed")?;
            report_outcome(&cli, "Tables substituted in", &outcome);
        }
        Command::Split { doc, llm, whole } => {
            let ctx = doc.context();
            if *whole {
                let outcome = segment::whole_document_stage(&layout, &ctx)
                    .context("Whole-document copy failed")?;
                report_outcome(&cli, "Copied", &outcome);
                return Ok(());
            }
            let config = llm_config(&cli, llm, PipelineConfig::builder())?;
            let classifier = LlmPageClassifier::new(&config)?;
            let report = segment::split_stage(&layout, &ctx, &classifier)
                .context("Zone segmentation failed")?;
            if !cli.quiet {
                eprintln!(
                    "{}  {} zones ({} new, {} skipped groups, {} owned by other documents)  {} images",
                    green("✔"),
                    bold(&report.zone_documents.len().to_string()),
                    report.written,
                    report.skipped_groups,
                    report.foreign_zones,
                    report.images_written
                );
                for path in &report.zone_documents {
                    eprintln!("   {}", dim(&path.display().to_string()));
                }
            }
        }
        Command::Run {
            city,
            date,
            doc_type,
            dedup: dedup_args,
            render,
            llm,
            no_tables,
            no_split,
            no_progress,
        } => {
            let builder = PipelineConfig::builder()
                .data_dir(&cli.data_dir)
                .table_dpi(render.dpi)
                .jpeg_quality(render.quality)
                .substitute_tables(!no_tables)
                .image_dedup(image_dedup(dedup_args))
                .duplicate_pages(duplicate_pages(dedup_args));
            let config = llm_config(&cli, llm, builder)?;

            let jobs = discover_jobs(&layout, city, *date, (*doc_type).into())?;
            if jobs.is_empty() {
                bail!(
                    "No source PDFs under {}",
                    layout.root().join("1.external").join(city).display()
                );
            }

            let renderer = if *no_tables {
                None
            } else {
                Some(PdfiumRenderer::new(config.table_dpi, config.jpeg_quality)?)
            };
            let classifier = if *no_split {
                None
            } else {
                Some(LlmPageClassifier::new(&config)?)
            };

            let mut pipeline = Pipeline::new(config, &CheckpointOnly);
            if let Some(ref r) = renderer {
                pipeline = pipeline.with_renderer(r);
            }
            if let Some(ref c) = classifier {
                pipeline = pipeline.with_classifier(c);
            }
            if !cli.quiet && !no_progress {
                pipeline = pipeline.with_progress(CliProgressCallback::new() as ProgressCallback);
            }

            let report = pipeline.run_batch(&jobs);
            if !cli.quiet && *no_progress {
                for doc in &report.succeeded {
                    let summary = match &doc.output {
                        DocumentOutput::Zones(z) => format!("{} zones", z.zone_documents.len()),
                        DocumentOutput::Whole(p) => p.display().to_string(),
                    };
                    eprintln!("{} {}  {}", green("✓"), doc.name, dim(&summary));
                }
                for (name, e) in &report.failed {
                    eprintln!("{} {}  {}", red("✗"), name, red(&e.to_string()));
                }
            }
            if !report.is_success() {
                bail!("{} of {} documents failed", report.failed.len(), jobs.len());
            }
        }
    }

    Ok(())
}

fn report_outcome(cli: &Cli, verb: &str, outcome: &StageOutcome) {
    if cli.quiet {
        return;
    }
    let path = outcome.path().display().to_string();
    if outcome.was_skipped() {
        eprintln!("{}  already done  →  {}", dim("–"), bold(&path));
    } else {
        eprintln!("{}  {}  →  {}", green("✔"), verb, bold(&path));
    }
}

fn image_dedup(args: &DedupArgs) -> ImageDedup {
    match args.image_dedup {
        DedupArg::Exact => ImageDedup::Exact,
        DedupArg::Perceptual => ImageDedup::Perceptual {
            max_distance: args.max_distance,
        },
    }
}

fn duplicate_pages(args: &DedupArgs) -> DuplicatePages {
    if args.remove_all_duplicates {
        DuplicatePages::RemoveAll
    } else {
        DuplicatePages::KeepFirst
    }
}

/// Validate the dedup flags through the config builder.
fn dedup_config(cli: &Cli, args: &DedupArgs) -> Result<PipelineConfig> {
    PipelineConfig::builder()
        .data_dir(&cli.data_dir)
        .image_dedup(image_dedup(args))
        .duplicate_pages(duplicate_pages(args))
        .build()
        .context("Invalid configuration")
}

/// Apply the classifier flags to `builder` and build.
fn llm_config(
    cli: &Cli,
    llm: &LlmArgs,
    builder: zonedoc::PipelineConfigBuilder,
) -> Result<PipelineConfig> {
    let mut builder = builder.data_dir(&cli.data_dir).max_retries(llm.max_retries);
    if let Some(ref model) = llm.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = llm.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = llm.system_prompt {
        let prompt = fs::read_to_string(path)
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    builder.build().context("Invalid configuration")
}

/// One job per `1.external/<city>/<date>/<doc>.pdf`, oldest date first.
fn discover_jobs(
    layout: &DataLayout,
    city: &str,
    only: Option<NaiveDate>,
    document_type: DocumentType,
) -> Result<Vec<Job>> {
    let city_dir = layout.root().join("1.external").join(city);
    let entries = fs::read_dir(&city_dir)
        .with_context(|| format!("Failed to list {}", city_dir.display()))?;

    let mut dated = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| NaiveDate::parse_from_str(n, "%Y-%m-%d").ok())
        else {
            continue;
        };
        if only.is_some_and(|d| d != date) || !path.is_dir() {
            continue;
        }
        dated.push((date, path));
    }
    dated.sort();

    let mut jobs = Vec::new();
    for (date, dir) in dated {
        let mut pdfs: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pdf")))
            .collect();
        pdfs.sort();
        for pdf in pdfs {
            let Some(stem) = pdf.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let ctx = DocumentContext::new(stem, date, document_type, city);
            jobs.push(Job::new(layout, ctx).with_source(pdf));
        }
    }
    Ok(jobs)
}
