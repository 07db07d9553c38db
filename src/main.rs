mod assemble;
mod batch;
mod config;
mod error;
mod export;
mod fetch;
mod model;
mod parser;
mod pipeline;
mod writer;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::error;

use crate::assemble::RunContext;
use crate::config::Settings;
use crate::error::{EXIT_INVALID_ARGS, EXIT_OUTPUT, EXIT_PARSE};
use crate::fetch::Fetcher;
use crate::pipeline::ExportOutcome;
use crate::writer::OutputWriter;

#[derive(Parser)]
#[command(name = "wjx_export", about = "Export wjx.cn surveys to docx, JSON and Markdown")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one survey URL and write all three formats
    Export {
        url: String,
        /// Output directory (default: configured output_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Export many URLs into a timestamped run directory
    Batch {
        /// URLs, separated by spaces, commas or semicolons
        urls: Vec<String>,
        /// Text or CSV file with more URLs
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Concurrent downloads
        #[arg(short = 'j', long)]
        jobs: Option<usize>,
    },
    /// Parse a saved HTML page and print the detected questions
    Inspect {
        file: PathBuf,
        /// Source URL recorded in the survey
        #[arg(long, default_value = "https://v.wjx.cn/vm/local.aspx")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            error!("Bad configuration: {}", e);
            return ExitCode::from(EXIT_INVALID_ARGS);
        }
    };

    let code = match cli.command {
        Commands::Export { url, output } => {
            if let Some(dir) = output {
                settings.output_dir = dir;
            }
            run_export(&settings, &url).await
        }
        Commands::Batch { urls, file, output, jobs } => {
            if let Some(dir) = output {
                settings.output_dir = dir;
            }
            if let Some(n) = jobs {
                settings.concurrency = n.max(1);
            }
            match run_batch(settings, urls, file).await {
                Ok(code) => code,
                Err(e) => {
                    error!("{:#}", e);
                    EXIT_OUTPUT
                }
            }
        }
        Commands::Inspect { file, url } => match inspect(&file, &url) {
            Ok(code) => code,
            Err(e) => {
                error!("{:#}", e);
                EXIT_INVALID_ARGS
            }
        },
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    ExitCode::from(code)
}

async fn run_export(settings: &Settings, url: &str) -> u8 {
    let fetcher = match Fetcher::new(settings) {
        Ok(f) => f,
        Err(e) => {
            error!("{}", e);
            return crate::error::Error::from(e).exit_code();
        }
    };
    let writer = OutputWriter::new(&settings.output_dir);
    match pipeline::export_url(&fetcher, url, &writer, settings).await {
        Ok(outcome) => {
            print_outcome(&outcome);
            outcome.exit_code()
        }
        Err(e) => {
            error!("{}", e);
            e.exit_code()
        }
    }
}

fn print_outcome(outcome: &ExportOutcome) {
    println!("{} ({} questions)", outcome.title, outcome.question_count);
    println!("  from {}", outcome.url);
    for (format, path) in &outcome.files {
        println!("  {:<4} {}", format.extension(), path.display());
    }
    for (format, e) in &outcome.failures {
        println!("  {:<4} FAILED: {}", format.extension(), e);
    }
    println!("{}", outcome.warnings);
}

async fn run_batch(settings: Settings, urls: Vec<String>, file: Option<PathBuf>) -> anyhow::Result<u8> {
    let mut tokens: Vec<String> = urls.iter().flat_map(|u| batch::split_url_tokens(u)).collect();
    if let Some(path) = &file {
        let from_file = batch::read_url_file(path)
            .with_context(|| format!("reading URL list {}", path.display()))?;
        tokens.extend(from_file);
    }

    let (valid, invalid) = batch::partition_urls(tokens, &settings.allowed_hosts);
    if valid.is_empty() {
        error!("No valid survey URLs given ({} rejected)", invalid.len());
        return Ok(EXIT_INVALID_ARGS);
    }

    let report = batch::run_batch(valid, invalid, Arc::new(settings)).await?;
    println!(
        "Batch {}: {} ok, {} failed, {} skipped -> {}",
        report.run_id,
        report.success_count,
        report.failed_count,
        report.skipped.len(),
        report.output_dir.display()
    );
    for entry in report.results.iter().filter(|r| r.status == batch::Status::Failed) {
        println!("  FAILED {} ({})", entry.url, entry.message);
    }
    println!("  log    {}", report.log_path.display());
    println!("  bundle {}", report.bundle_path.display());
    Ok(report.exit_code())
}

/// Offline parse of a saved page. Nothing is written.
fn inspect(file: &std::path::Path, url: &str) -> anyhow::Result<u8> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let markup = String::from_utf8_lossy(&bytes);

    let mut ctx = RunContext::new();
    let survey = match parser::parse_survey(&markup, url, &mut ctx) {
        Ok(s) => s,
        Err(e) => {
            error!("{}", e);
            return Ok(EXIT_PARSE);
        }
    };

    println!("{}", survey.title);
    if !survey.description.is_empty() {
        println!("{}", truncate(&survey.description, 80));
    }
    println!();
    println!(
        "{:>3} | {:<4} | {:<2} | {:<12} | {:>4} | {:<40}",
        "#", "题型", "必填", "章节", "选项", "题干"
    );
    println!("{}", "-".repeat(84));
    for q in &survey.questions {
        let section = survey.section_of(q.index).map(|s| s.name.as_str()).unwrap_or("-");
        println!(
            "{:>3} | {:<4} | {:<2} | {:<12} | {:>4} | {:<40}",
            q.index,
            q.kind.label(),
            if q.required { "是" } else { "否" },
            truncate(section, 12),
            q.options.len(),
            truncate(&q.prompt, 40)
        );
        if !q.logic.is_empty() {
            println!("    logic: {}", q.logic);
        }
    }

    println!("\n{}", ctx.summary());
    for w in ctx.warnings() {
        println!("  Q{}: {}", w.index, w.reason);
    }
    Ok(0)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
