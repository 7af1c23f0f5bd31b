//! # docq CLI
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//! docq                      # sync ./assets, then ask questions interactively
//! docq sync --dry-run       # show what would be uploaded
//! docq ask "What is in a.pdf?"
//! docq status
//! ```
//!
//! Exit codes: `0` on success, `2` on configuration errors (missing
//! credential, bad config, unreadable documents directory), `1` otherwise.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use docq::ask::Conversation;
use docq::config::{self, Config};
use docq::error::DocqError;
use docq::models::{StoreHandle, SyncReport};
use docq::openai::OpenAiService;
use docq::progress::ProgressMode;
use docq::remote::VectorStoreService;
use docq::state::{self, State};
use docq::{scan, session, status, sync};

/// Ask questions about a folder of PDFs.
///
/// PDFs in the documents directory are uploaded (once per distinct content)
/// to a hosted vector store; questions are answered by an assistant that
/// searches that store.
#[derive(Parser)]
#[command(name = "docq", version, about = "Ask questions about a folder of PDFs")]
struct Cli {
    /// Path to a TOML configuration file. Defaults to `./docq.toml` if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Upload progress on stderr. Defaults to `human` on a TTY, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync the documents directory, then answer questions from stdin (default).
    Chat,

    /// Upload new or changed PDFs to the vector store.
    Sync {
        /// List what would be uploaded without uploading anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Ask a single question against the current store (no sync).
    Ask {
        /// The question text.
        question: String,
    },

    /// Show the store, the assistant and which local documents are indexed.
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .try_init()
        .ok();

    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = err
                .downcast_ref::<DocqError>()
                .map(DocqError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Credential first: nothing touches the network without it.
    let api_key = config::load_api_key()?;
    let cfg = config::load_config(cli.config.as_deref())?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
    let service = Arc::new(OpenAiService::new(&cfg, &api_key)?);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(&cfg, service, progress).await,
        Commands::Sync { dry_run: true } => run_dry_run(&cfg, service.as_ref()).await,
        Commands::Sync { dry_run: false } => {
            let docs = scan_local(&cfg)?;
            let provisioned = state::ensure_provisioned(&cfg, service.as_ref()).await?;
            let mut store = StoreHandle::new(&provisioned.store_id);
            run_sync(&cfg, docs, &mut store, service, progress).await?;
            Ok(())
        }
        Commands::Ask { question } => {
            if State::load(&cfg.state.path)?.store_id.is_none() {
                return Err(DocqError::EmptyStore {
                    store_id: "(not created yet)".to_string(),
                }
                .into());
            }
            let provisioned = state::ensure_provisioned(&cfg, service.as_ref()).await?;
            let mut store = StoreHandle::new(&provisioned.store_id);
            store.set_manifest(service.list_files(&provisioned.store_id).await?);
            let mut conversation = Conversation::new(service.as_ref(), provisioned.assistant_id);
            let answer = conversation.ask(&store, &question).await?;
            println!("{}", session::format_answer(&answer));
            Ok(())
        }
        Commands::Status => {
            status::run_status(&cfg, service.as_ref()).await?;
            Ok(())
        }
    }
}

fn scan_local(cfg: &Config) -> anyhow::Result<Vec<docq::models::Document>> {
    if scan::ensure_documents_dir(&cfg.documents.dir)? {
        println!("Created directory: {}", cfg.documents.dir.display());
    }
    let docs = scan::scan_documents(&cfg.documents)?;
    if docs.is_empty() {
        println!("No PDF files found in {}", cfg.documents.dir.display());
    }
    Ok(docs)
}

async fn run_sync(
    cfg: &Config,
    docs: Vec<docq::models::Document>,
    store: &mut StoreHandle,
    service: Arc<OpenAiService>,
    progress: ProgressMode,
) -> anyhow::Result<SyncReport> {
    let options = sync::SyncOptions::from_config(cfg);
    let reporter = progress.reporter();
    let outcome = sync::sync_documents(docs, store, service, &options, reporter.as_ref())
        .await
        .context("sync failed")?;
    state::record_sync(&cfg.state.path)?;
    print_report(&store.store_id, &outcome.report);
    Ok(outcome.report)
}

async fn run_chat(
    cfg: &Config,
    service: Arc<OpenAiService>,
    progress: ProgressMode,
) -> anyhow::Result<()> {
    let docs = scan_local(cfg)?;
    let provisioned = state::ensure_provisioned(cfg, service.as_ref()).await?;
    let mut store = StoreHandle::new(&provisioned.store_id);
    let report = run_sync(cfg, docs, &mut store, service.clone(), progress).await?;

    if report.uploaded.is_empty() && store.is_empty() {
        println!("No documents are indexed; answers will not be grounded in any files.");
    }

    let mut conversation = Conversation::new(service.as_ref(), provisioned.assistant_id);
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let summary =
        session::run_session(&mut conversation, &store, stdin.lock(), &mut stdout).await?;
    tracing::debug!(
        answered = summary.answered,
        failed = summary.failed,
        "session ended"
    );
    Ok(())
}

async fn run_dry_run(cfg: &Config, service: &dyn VectorStoreService) -> anyhow::Result<()> {
    let docs = scan_local(cfg)?;
    let state = State::load(&cfg.state.path)?;

    let mut store = StoreHandle::new(state.store_id.clone().unwrap_or_default());
    if let Some(id) = state.store_id.as_deref() {
        if service.get_store(id).await?.is_some() {
            store.set_manifest(service.list_files(id).await?);
        }
    }

    let plan = sync::plan_sync(docs, &store);
    println!("sync (dry-run)");
    println!("  would upload: {}", plan.to_upload.len());
    for doc in &plan.to_upload {
        println!("    {}", doc.file_name);
    }
    println!("  would skip: {}", plan.skipped.len() + plan.duplicate_count());
    Ok(())
}

fn print_report(store_id: &str, report: &SyncReport) {
    println!("sync {}", store_id);
    println!("  uploaded: {}", report.uploaded.len());
    for name in &report.uploaded {
        println!("    {}", name);
    }
    println!("  skipped: {}", report.skipped.len());
    for name in &report.skipped {
        println!("    {}", name);
    }
    println!("  failed: {}", report.failed.len());
    for failed in &report.failed {
        println!("    {}: {}", failed.file_name, failed.error);
    }
    let attempted = report.uploaded.len() + report.failed.len();
    println!(
        "uploaded {}/{} files",
        report.uploaded.len(),
        attempted
    );
    if report.failed.is_empty() {
        println!("ok");
    }
}
