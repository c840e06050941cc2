//! logmirror command line: the long-running downloader and the hourly check.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use logmirror::check::parse_base_hour;
use logmirror::instance::{terminate_holder, InstanceLock};
use logmirror::notify::{InfluxSink, LogMetrics, LogNotifier, MailNotifier};
use logmirror::shard::hour_floor;
use logmirror::storage::AwsCliLister;
use logmirror::{
    run_downloader, CancellationToken, Checker, ListingCollector, LocalTools, MetricsSink,
    MirrorConfig, MirrorError, NativeTools, Notifier, RemoteHost, SshRemote, StorageLister,
};
use logmirror_logging::{init_logging, LogConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "logmirror")]
#[command(about = "Mirror remote log files and reconcile every archive stage")]
#[command(version)]
struct Cli {
    /// Also log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the download workers until interrupted
    Download {
        /// Path to the TOML configuration
        #[arg(short, long, env = "LOGMIRROR_CONFIG")]
        config: PathBuf,
    },

    /// Run one reconciliation round and exit
    Check {
        /// Path to the TOML configuration
        #[arg(short, long, env = "LOGMIRROR_CONFIG")]
        config: PathBuf,

        /// Base hour as "YYYY-MM-DD HH:MM" (defaults to the previous hour)
        #[arg(long)]
        date: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config_path, app_name) = match &cli.command {
        Commands::Download { config } => (config.clone(), "logmirror-download"),
        Commands::Check { config, .. } => (config.clone(), "logmirror-check"),
    };

    let config = match MirrorConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: failed to load {}: {}", config_path.display(), e);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = init_logging(LogConfig {
        app_name,
        log_dir: config.log_dir.as_deref(),
        verbose: cli.verbose,
    }) {
        eprintln!("Warning: {:?}", e);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    let result = match cli.command {
        Commands::Download { .. } => runtime.block_on(run_download(config)),
        Commands::Check { date, .. } => runtime.block_on(run_check(config, date)),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "Command failed");
            eprintln!("{:?}", err);
            ExitCode::from(1)
        }
    }
}

async fn run_download(config: MirrorConfig) -> Result<ExitCode> {
    let _lock = match InstanceLock::acquire(&config.download.lock_file) {
        Ok(lock) => lock,
        Err(MirrorError::AlreadyRunning { pid, path }) => {
            info!(pid = ?pid, lock = %path.display(), "Downloader already running, nothing to do");
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => return Err(e).context("Failed to take downloader lock"),
    };

    let cancel = CancellationToken::new();
    install_signal_handler(cancel.clone())?;

    let remote: Arc<dyn RemoteHost> = Arc::new(SshRemote::new(
        config.remote.ssh_program.clone(),
        config.remote.scp_program.clone(),
    ));
    let local: Arc<dyn LocalTools> = Arc::new(NativeTools);

    info!(
        servers = config.servers.len(),
        log_types = config.log_types.len(),
        archive = %config.archive.root.display(),
        "Downloader starting"
    );
    run_downloader(&config, remote, local, cancel).await?;
    info!("Downloader stopped");
    Ok(ExitCode::SUCCESS)
}

#[cfg(unix)]
fn install_signal_handler(cancel: CancellationToken) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM, SIGQUIT]).context("Failed to install signal handlers")?;
    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, stopping workers...", sig);
                cancel.cancel();
            }
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

#[cfg(not(unix))]
fn install_signal_handler(cancel: CancellationToken) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, stopping workers...");
            cancel.cancel();
        }
    });
    Ok(())
}

async fn run_check(config: MirrorConfig, date: Option<String>) -> Result<ExitCode> {
    let base = match date {
        Some(value) => parse_base_hour(&value)?,
        None => hour_floor(chrono::Local::now().naive_local() - chrono::Duration::hours(1)),
    };
    info!(base = %base, "Check round starting");

    tokio::fs::create_dir_all(&config.check.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create listing directory {}",
                config.check.output_dir.display()
            )
        })?;

    let remote: Arc<dyn RemoteHost> = Arc::new(SshRemote::new(
        config.remote.ssh_program.clone(),
        config.remote.scp_program.clone(),
    ));
    let storage: Option<Arc<dyn StorageLister>> = config
        .storage
        .as_ref()
        .map(|s| Arc::new(AwsCliLister::new(s.aws_program.clone())) as Arc<dyn StorageLister>);
    let collector = ListingCollector::new(
        remote,
        Arc::new(NativeTools),
        storage,
        config.check.output_dir.clone(),
    );

    let notifier: Arc<dyn Notifier> = if config.alerts.recipients.is_empty() {
        warn!("No alert recipients configured, alerts go to the log only");
        Arc::new(LogNotifier)
    } else {
        Arc::new(MailNotifier::new(
            config.alerts.mail_program.clone(),
            config.alerts.recipients.clone(),
        ))
    };
    let metrics: Arc<dyn MetricsSink> = match &config.metrics {
        Some(m) => Arc::new(InfluxSink::new(m.url.clone())),
        None => Arc::new(LogMetrics),
    };

    let restart = config.check.restart_downloader_on_gap;
    let lock_file = config.download.lock_file.clone();
    let checker = Arc::new(Checker::new(Arc::new(config), collector, notifier, metrics));
    let report = checker.run(base).await;

    if !report.has_local_gaps() {
        info!(checks = report.outcomes.len(), "Check round clean");
        return Ok(ExitCode::SUCCESS);
    }

    warn!("Check round found files missing locally");
    if restart {
        restart_downloader(&lock_file);
    }
    Ok(ExitCode::from(1))
}

fn restart_downloader(lock_file: &Path) {
    match terminate_holder(lock_file) {
        Ok(Some(pid)) => info!(pid, "Asked downloader to restart"),
        Ok(None) => warn!(lock = %lock_file.display(), "No running downloader to restart"),
        Err(e) => error!(error = %e, "Failed to signal downloader"),
    }
}
