#![forbid(unsafe_code)]

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;

use reliability_harness::agreement::KrippendorffAlpha;
use reliability_harness::config::AnalysisConfig;
use reliability_harness::export::{write_entity_tsv, write_jsonl, write_jsonl_file, write_tie_tsv};
use reliability_harness::pipeline::{run_analysis, RunReport};
use reliability_harness::store::{DocumentStore, InMemoryDocumentStore, SqliteDocumentStore};

#[derive(Parser)]
#[command(name = "reliability", version, about = "Inter-coder reliability harness CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Source {
    /// Analysis config JSON
    #[arg(long)]
    config: PathBuf,
    /// SQLite document store
    #[arg(long, env = "RELIABILITY_DB")]
    db: Option<PathBuf>,
    /// JSON array of documents (alternative to --db)
    #[arg(long)]
    documents: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum RowFormat {
    Tsv,
    Jsonl,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full analysis and write the report as JSON
    Run {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        out: PathBuf,
    },
    /// Write rows where any two slots disagree, one JSON object per line
    Disagreements {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        out: PathBuf,
    },
    /// Write the reconciled comparison table
    ExportRows {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_enum, default_value = "tsv")]
        format: RowFormat,
        /// Export relation tie rows instead of entity rows
        #[arg(long)]
        ties: bool,
    },
    /// Load a JSON array of documents into a SQLite store
    Import {
        #[arg(long)]
        documents: PathBuf,
        #[arg(long, env = "RELIABILITY_DB")]
        db: Option<PathBuf>,
    },
}

fn open_store(source: &Source) -> Result<Box<dyn DocumentStore>, Box<dyn std::error::Error>> {
    if let Some(path) = &source.documents {
        return Ok(Box::new(InMemoryDocumentStore::from_json_path(path)?));
    }
    let path = source.db.clone().unwrap_or_else(SqliteDocumentStore::default_path);
    if !path.exists() {
        return Err(format!("document store not found: {}", path.display()).into());
    }
    Ok(Box::new(SqliteDocumentStore::new(path)?))
}

fn analyze(source: &Source) -> Result<RunReport, Box<dyn std::error::Error>> {
    let config = AnalysisConfig::load(&source.config)?;
    let store = open_store(source)?;
    let report = run_analysis(store.as_ref(), &config, Arc::new(KrippendorffAlpha))?;
    Ok(report)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { source, out } => {
            let report = analyze(&source)?;
            let file = File::create(&out)?;
            serde_json::to_writer_pretty(file, &report)?;
            println!(
                "{} rows, {} ties, {} results, {} disagreements, {} warnings",
                report.rows.len(),
                report.tie_rows.len(),
                report.results.len() + report.tie_results.len(),
                report.disagreements.len(),
                report.warnings.len()
            );
        }
        Commands::Disagreements { source, out } => {
            let report = analyze(&source)?;
            let written = write_jsonl_file(&out, &report.disagreements)?;
            println!("{written} rows with disagreements");
        }
        Commands::ExportRows {
            source,
            out,
            format,
            ties,
        } => {
            let report = analyze(&source)?;
            let file = File::create(&out)?;
            let written = match (format, ties) {
                (RowFormat::Tsv, false) => {
                    write_entity_tsv(file, &report.rows, report.metadata.slot_count)?
                }
                (RowFormat::Tsv, true) => {
                    write_tie_tsv(file, &report.tie_rows, report.metadata.relation_slot_count)?
                }
                (RowFormat::Jsonl, false) => write_jsonl(file, &report.rows)?,
                (RowFormat::Jsonl, true) => write_jsonl(file, &report.tie_rows)?,
            };
            println!("{written} rows written to {}", out.display());
        }
        Commands::Import { documents, db } => {
            let source = InMemoryDocumentStore::from_json_path(&documents)?;
            let path = db.unwrap_or_else(SqliteDocumentStore::default_path);
            let store = SqliteDocumentStore::new(&path)?;
            let count = store.insert_documents(source.documents())?;
            info!(documents = count, db = %path.display(), "import finished");
            println!("imported {count} documents into {}", path.display());
        }
    }

    Ok(())
}
