use clap::{Args, Parser, Subcommand};
use mysql_optimizer::backend::MySqlBackend;
use mysql_optimizer::config::{ConfigOverrides, OptimizerConfig};
use mysql_optimizer::job::OptimizeTablesJob;
use mysql_optimizer::models::OptimizationSummary;
use mysql_optimizer::modes;
use mysql_optimizer::optimizer::TableOptimizer;
use mysql_optimizer::progress::OptimizationProgress;
use mysql_optimizer::queue::{SpoolQueue, Worker};
use mysql_optimizer::reporter::{failure_line, ReportFormat, Reporter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// MySQL table optimizer - runs OPTIMIZE TABLE over a database, inline or through a queue
#[derive(Parser, Debug)]
#[command(name = "mysql-optimizer")]
#[command(version = "0.1.0")]
#[command(about = "Optimize table/s of the database")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    optimize: OptimizeArgs,

    #[command(flatten)]
    connection: ConnectionArgs,

    /// Path to YAML config file
    #[arg(short = 'c', long = "config", global = true)]
    config_path: Option<String>,

    /// Enable verbose logging
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Args, Debug)]
struct OptimizeArgs {
    /// Database that needs to be optimized; `default` uses the configured default database
    #[arg(long = "database", default_value = "default")]
    database: String,

    /// Table to optimize (repeatable); defaults to all tables in the database
    #[arg(long = "table")]
    tables: Vec<String>,

    /// Queue the optimization job instead of running synchronously
    #[arg(long = "queued")]
    queued: bool,

    /// Disable logging when using the queue option
    #[arg(long = "no-log")]
    no_log: bool,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value = "text")]
    format: ReportFormat,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Database host
    #[arg(short = 'H', long = "host", env = "MYSQL_HOST", global = true)]
    host: Option<String>,

    /// Database port
    #[arg(long = "port", env = "MYSQL_PORT", global = true)]
    port: Option<u16>,

    /// Username
    #[arg(short = 'u', long = "username", env = "MYSQL_USER", global = true)]
    username: Option<String>,

    /// Password
    #[arg(short = 'p', long = "password", env = "MYSQL_PASSWORD", global = true)]
    password: Option<String>,

    /// Database used when --database is `default`
    #[arg(long = "default-database", env = "MYSQL_DATABASE", global = true)]
    default_database: Option<String>,

    /// Directory holding queued jobs
    #[arg(long = "spool-dir", env = "MYSQL_OPTIMIZER_SPOOL_DIR", global = true)]
    spool_dir: Option<PathBuf>,
}

impl ConnectionArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            database: self.default_database.clone(),
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            spool_dir: self.spool_dir.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process queued optimization jobs
    Work {
        /// Keep polling the queue instead of exiting once it is empty
        #[arg(long = "daemon")]
        daemon: bool,

        /// Seconds to wait between polls in daemon mode
        #[arg(long = "sleep", default_value = "5")]
        sleep: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &cli.config_path {
        Some(path) => {
            info!("Loading config from: {}", path);
            OptimizerConfig::from_config_file(path)?
        }
        None => OptimizerConfig::default(),
    }
    .with_overrides(cli.connection.overrides());

    match cli.command {
        Some(Commands::Work { daemon, sleep }) => {
            run_worker(&config, daemon, Duration::from_secs(sleep)).await?;
            Ok(ExitCode::SUCCESS)
        }
        None if cli.optimize.queued => {
            let job = OptimizeTablesJob::new(
                Some(cli.optimize.database),
                cli.optimize.tables,
                !cli.optimize.no_log,
            );
            let queue = SpoolQueue::new(&config.queue);
            let message = modes::dispatch_deferred(&queue, job).await?;
            println!("{}", message);
            Ok(ExitCode::SUCCESS)
        }
        None => Ok(run_synchronous(&config, &cli.optimize).await),
    }
}

async fn run_synchronous(config: &OptimizerConfig, args: &OptimizeArgs) -> ExitCode {
    let reporter = Reporter::new(args.format);
    reporter.status("Starting Optimization.");

    let summary = match optimize(config, args).await {
        Ok(summary) => summary,
        Err(err) => {
            eprintln!("{}", failure_line(&err));
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = reporter.report(&summary) {
        eprintln!("{}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn optimize(
    config: &OptimizerConfig,
    args: &OptimizeArgs,
) -> anyhow::Result<OptimizationSummary> {
    let resolver_config = config.resolver_config();
    let backend = MySqlBackend::connect(&config.connect_options()).await?;
    let mut optimizer = TableOptimizer::new(backend, resolver_config);

    let progress = OptimizationProgress::new();
    let summary =
        modes::run_synchronous(&mut optimizer, Some(args.database.as_str()), &args.tables, &progress)
            .await?;
    Ok(summary)
}

async fn run_worker(config: &OptimizerConfig, daemon: bool, sleep: Duration) -> anyhow::Result<()> {
    let resolver_config = config.resolver_config();
    let backend = MySqlBackend::connect(&config.connect_options()).await?;
    let mut optimizer = TableOptimizer::new(backend, resolver_config);

    let queue = SpoolQueue::new(&config.queue);
    info!("Processing jobs from {}", queue.root().display());
    let worker = Worker::new(queue, config.queue.clone());

    loop {
        let report = worker.drain(&mut optimizer).await?;
        info!(
            completed = report.completed,
            retried = report.retried,
            failed = report.failed,
            "Queue drained"
        );

        if !daemon {
            println!(
                "Processed queue: {} completed, {} retried, {} failed",
                report.completed, report.retried, report.failed
            );
            return Ok(());
        }
        tokio::time::sleep(sleep).await;
    }
}
