use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use mailstash::Result;
use mailstash::config::{MailboxConfig, ServerConfig, StoreConfig};
use mailstash::error::DatabaseError;
use mailstash::ingest::pipeline::{self, write_document};
use mailstash::ingest::{ImapConnector, IngestReport, SearchCriteria};
use mailstash::store::{self, LibSqlBackend, RecordStore, TagRemoval};

#[derive(Parser)]
#[command(name = "mailstash", version, about = "Fetch, store and browse mailbox messages")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Database file (overrides MAILSTASH_DB_PATH)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the newest messages and write them as a JSON document
    Fetch {
        #[command(flatten)]
        batch: BatchArgs,
        /// Output file, or - for stdout
        #[arg(short, long, default_value = "-")]
        output: String,
    },
    /// Import a JSON document into the store
    Import { path: PathBuf },
    /// Fetch and import in one step
    Sync {
        #[command(flatten)]
        batch: BatchArgs,
        /// Also write the fetched document here
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Serve the read-only web interface
    Serve {
        /// Listen address (overrides MAILSTASH_HTTP_ADDR)
        #[arg(long)]
        addr: Option<std::net::SocketAddr>,
    },
    /// Print store statistics as JSON
    Stats,
    /// Tag a record with a category
    Tag { id: String, category: String },
    /// Remove a category from a record
    Untag { id: String, category: String },
    /// Set the processed flag of a record
    Mark {
        id: String,
        /// Clear the flag instead of setting it
        #[arg(long)]
        unprocessed: bool,
    },
}

#[derive(Args)]
struct BatchArgs {
    /// Folder to read (overrides MAILSTASH_FOLDER)
    #[arg(long)]
    folder: Option<String>,
    /// Search criteria: all, unseen, since:YYYY-MM-DD or a raw IMAP query
    #[arg(long)]
    search: Option<SearchCriteria>,
    /// Maximum messages per run (overrides MAILSTASH_MAX_MESSAGES)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    max: Option<u64>,
}

impl BatchArgs {
    fn apply(self, config: &mut MailboxConfig) {
        if let Some(folder) = self.folder {
            config.folder = folder;
        }
        if let Some(search) = self.search {
            config.search = search;
        }
        if let Some(max) = self.max {
            config.max_messages = usize::try_from(max).unwrap_or(usize::MAX);
        }
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // The result only says whether another provider got there first.
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse()).await?;
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let db_path = cli.db.unwrap_or_else(|| StoreConfig::from_env().db_path);

    match cli.command {
        Command::Fetch { batch, output } => {
            let report = fetch(batch).await?;
            write_output(&output, &report)?;
            print_batch_summary(&report);
        }
        Command::Import { path } => {
            let records = store::load_document(&path)?;
            let db = open_store(&db_path).await?;
            let summary = store::import_records(&db, &records).await?;
            eprintln!(
                "Imported {} records ({} already present)",
                summary.added, summary.skipped
            );
        }
        Command::Sync { batch, output } => {
            let report = fetch(batch).await?;
            if let Some(output) = output {
                write_output(&output, &report)?;
            }
            print_batch_summary(&report);
            let db = open_store(&db_path).await?;
            let summary = store::import_records(&db, &report.records).await?;
            eprintln!(
                "Imported {} records ({} already present)",
                summary.added, summary.skipped
            );
        }
        Command::Serve { addr } => {
            let addr = match addr {
                Some(addr) => addr,
                None => ServerConfig::from_env()?.addr,
            };
            let db: Arc<dyn RecordStore> = Arc::new(open_store(&db_path).await?);
            eprintln!("mailstash v{}", env!("CARGO_PKG_VERSION"));
            eprintln!("   Database: {}", db_path.display());
            eprintln!("   Web: http://{addr}/");
            mailstash::web::serve(addr, db).await?;
        }
        Command::Stats => {
            let db = open_store(&db_path).await?;
            let stats = db.statistics().await?;
            let json = serde_json::to_string_pretty(&stats)
                .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
            println!("{json}");
        }
        Command::Tag { id, category } => {
            let db = open_store(&db_path).await?;
            db.tag(&id, &category).await?;
            eprintln!("Tagged {id} with {category}");
        }
        Command::Untag { id, category } => {
            let db = open_store(&db_path).await?;
            match db.untag(&id, &category).await? {
                TagRemoval::Removed => eprintln!("Removed {category} from {id}"),
                TagRemoval::NotFound => eprintln!("{id} was not tagged with {category}"),
            }
        }
        Command::Mark { id, unprocessed } => {
            let db = open_store(&db_path).await?;
            db.set_processed(&id, !unprocessed).await?;
            let state = if unprocessed { "unprocessed" } else { "processed" };
            eprintln!("Marked {id} as {state}");
        }
    }

    Ok(())
}

/// Run one ingestion batch off the async runtime.
async fn fetch(batch: BatchArgs) -> Result<IngestReport> {
    let mut config = MailboxConfig::from_env()?;
    batch.apply(&mut config);

    let params = config.session_params();
    let options = config.ingest_options();
    let report =
        tokio::task::spawn_blocking(move || pipeline::run(&ImapConnector, &params, &options))
            .await??;
    Ok(report)
}

async fn open_store(path: &Path) -> Result<LibSqlBackend> {
    LibSqlBackend::new_local(path).await.map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Failed to open database");
        e.into()
    })
}

fn write_output(target: &str, report: &IngestReport) -> std::io::Result<()> {
    if target == "-" {
        write_document(&report.records, std::io::stdout().lock())
    } else {
        let file = std::fs::File::create(target)?;
        write_document(&report.records, BufWriter::new(file))
    }
}

fn print_batch_summary(report: &IngestReport) {
    eprintln!(
        "Fetched {} of {} messages, skipped {}",
        report.records.len(),
        report.listed,
        report.skipped
    );
    if !report.skipped_ids.is_empty() {
        eprintln!("   Skipped ids: {}", report.skipped_ids.join(", "));
    }
}
