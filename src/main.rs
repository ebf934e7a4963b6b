use clap::Parser;
use commission_ledger::application::lifecycle::PaymentLifecycleManager;
use commission_ledger::config::EngineConfig;
use commission_ledger::domain::ids::{CompanyId, ParticipantId};
use commission_ledger::domain::ports::{Actor, DirectoryRef, Role, StoreRef};
use commission_ledger::infrastructure::in_memory::{InMemoryDirectory, InMemoryStore};
use commission_ledger::infrastructure::log_sink::LogEventSink;
use commission_ledger::interfaces::csv::command_reader::CommandReader;
use commission_ledger::interfaces::csv::directory_reader::read_directory;
use commission_ledger::interfaces::csv::statement_writer::StatementWriter;
use commission_ledger::interfaces::replay::CommandReplayer;
use commission_ledger::telemetry;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Payment commands CSV file
    input: PathBuf,

    /// Property directory CSV (property,tenant,owner,agent,rent,commission_percent,relationship)
    #[arg(long)]
    properties: Option<PathBuf>,

    /// Company the commands are recorded for.
    #[arg(long, default_value = "agency")]
    company: String,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = EngineConfig::load().into_diagnostic()?;
    telemetry::init(&config.log_level).into_diagnostic()?;

    let store = open_store(cli.db_path)?;
    let company_id = CompanyId::new(cli.company);
    let directory: DirectoryRef = match cli.properties {
        Some(path) => {
            let file = File::open(path).into_diagnostic()?;
            let directory = read_directory(file, &company_id).into_diagnostic()?;
            info!(properties = directory.len(), "property directory loaded");
            Arc::new(directory)
        }
        None => Arc::new(InMemoryDirectory::new()),
    };

    let manager = PaymentLifecycleManager::new(store, directory, Arc::new(LogEventSink), config);
    let replayer = CommandReplayer::new(
        &manager,
        Actor {
            id: ParticipantId::new("cli"),
            company_id,
            role: Role::Admin,
        },
    );

    let file = File::open(cli.input).into_diagnostic()?;
    for (line, command) in CommandReader::new(file).commands().enumerate() {
        // Header is line 1.
        let line = line + 2;
        match command {
            Ok(command) => {
                if let Err(err) = replayer.apply(command).await {
                    warn!(line, error = %err, "command rejected");
                }
            }
            Err(err) => warn!(line, error = %err, "unreadable command"),
        }
    }

    let statements = manager.ledger().statements().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = StatementWriter::new(stdout.lock());
    writer.write_statements(&statements).into_diagnostic()?;

    Ok(())
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<StoreRef> {
    use commission_ledger::infrastructure::rocksdb::RocksDBStore;

    Ok(match db_path {
        Some(path) => Arc::new(RocksDBStore::open(path).into_diagnostic()?),
        None => Arc::new(InMemoryStore::new()),
    })
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<StoreRef> {
    if db_path.is_some() {
        warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryStore::new()))
}
