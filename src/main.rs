use bulkpay::application::service::{BatchService, ExecuteRequest};
use bulkpay::config::EngineConfig;
use bulkpay::domain::job::JobStatus;
use bulkpay::domain::ports::SharedJobStore;
use bulkpay::error::BatchError;
use bulkpay::infrastructure::in_memory::InMemoryJobStore;
#[cfg(feature = "storage-rocksdb")]
use bulkpay::infrastructure::rocksdb::RocksDbJobStore;
use bulkpay::infrastructure::simulated::SimulatedExecutionClient;
use bulkpay::interfaces::csv::instruction_reader::InstructionReader;
use bulkpay::interfaces::csv::report_writer::ReportWriter;
use bulkpay::interfaces::http;
use bulkpay::telemetry;
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use std::fs::File;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Engine configuration file (JSON). Defaults apply to anything missing.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Submit, validate and execute a CSV batch, then print the item report
    Run {
        /// Input payment instructions CSV file
        input: PathBuf,

        /// Maximum number of payments in flight
        #[arg(long)]
        concurrency: Option<u32>,

        /// Share of payments the simulated backend rejects permanently
        #[arg(long, default_value_t = 0.0)]
        fail_rate: f64,

        /// Share of calls the simulated backend fails transiently
        #[arg(long, default_value_t = 0.0)]
        retryable_fail_rate: f64,

        /// Upper bound of the simulated backend latency, in milliseconds
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,
    },
    /// Serve the REST API
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_json);

    let config = EngineConfig::load(cli.config.as_deref())?;
    let store = open_store(cli.db_path)?;

    match cli.command {
        Command::Run {
            input,
            concurrency,
            fail_rate,
            retryable_fail_rate,
            latency_ms,
        } => {
            let client = SimulatedExecutionClient::new()
                .with_latency(Duration::ZERO, Duration::from_millis(latency_ms))
                .with_terminal_failure_rate(fail_rate)
                .with_retryable_failure_rate(retryable_fail_rate);
            let service = BatchService::new(store, Arc::new(client), config);
            run(&service, input, concurrency).await
        }
        Command::Serve { addr } => {
            let service = BatchService::new(store, Arc::new(SimulatedExecutionClient::new()), config);
            service.recover().await?;
            let listener = TcpListener::bind(addr).await.into_diagnostic()?;
            http::serve(listener, Arc::new(service)).await?;
            Ok(())
        }
    }
}

fn open_store(db_path: Option<PathBuf>) -> Result<SharedJobStore> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => Ok(Arc::new(RocksDbJobStore::open(path)?)),
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            tracing::warn!(
                "persistent storage requested via --db-path, but the 'storage-rocksdb' feature \
                 is not enabled; falling back to in-memory storage"
            );
            Ok(Arc::new(InMemoryJobStore::new()))
        }
        None => Ok(Arc::new(InMemoryJobStore::new())),
    }
}

async fn run(service: &BatchService, input: PathBuf, concurrency: Option<u32>) -> Result<()> {
    let file = File::open(&input).into_diagnostic()?;
    let instructions = InstructionReader::new(file).read_all()?;

    let submitted = service.submit(instructions).await?;
    let job_id = submitted.job.id;
    if submitted.job.status != JobStatus::Ready {
        for issue in &submitted.job.issues {
            eprintln!("{issue}");
        }
        return Err(BatchError::Validation(submitted.job.issues).into());
    }

    let mut request = ExecuteRequest::immediate();
    if let Some(limit) = concurrency {
        request = request.with_concurrency(limit);
    }
    service.execute(job_id, request).await?;
    service.wait_until_settled(job_id).await;

    let snapshot = service.get_status(job_id).await?;
    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    writer.write_items(&snapshot.job.items)?;

    info!(
        %job_id,
        status = %snapshot.job.status,
        completed = snapshot.counts.completed,
        failed = snapshot.counts.failed,
        amount = %snapshot.counts.completed_amount,
        "batch done"
    );
    match snapshot.job.degraded {
        Some(reason) => Err(miette!("job {job_id} was halted: {reason}")),
        None => Ok(()),
    }
}
