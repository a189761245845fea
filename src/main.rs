//! `profiler-host` command line: attach the bundled profiling agent to running
//! .NET processes and collect its reports.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use profiler_host::attach::{AttachCoordinator, DiagnosticsAttach};
use profiler_host::catalog::{
    DiagnosticsProcessCatalog, ProcessCatalog, ProfilerCatalog, StaticProfilerCatalog,
};
use profiler_host::config::GlobalConfig;
use profiler_host::models::process::ProcessDescriptor;
use profiler_host::models::profiler::ProfilerDescriptor;
use profiler_host::models::session::{session_directory, SessionDescriptor, SessionStatus};
use profiler_host::selftest::SelfTestHarness;
use profiler_host::session::{CompletedSession, SessionDiscovery, SessionTracker};
use profiler_host::staging::LibraryStager;
use profiler_host::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "profiler-host", about = "Attach the profiling agent to .NET processes", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List attachable .NET processes.
    Processes,
    /// List available profilers.
    Profilers {
        /// Include unreleased profilers.
        #[arg(long)]
        all: bool,
    },
    /// Attach a profiler to a running process.
    Attach {
        /// Target process id.
        #[arg(long)]
        pid: u32,
        /// Profiler identifier.
        #[arg(long)]
        profiler: Uuid,
        /// Parameter override as `key=value`; repeatable.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Wait for the session to complete and list its reports.
        #[arg(long)]
        wait: bool,
    },
    /// List completed sessions.
    Sessions,
    /// List the reports of a completed session.
    Reports {
        /// Session identifier.
        session: Uuid,
    },
    /// Wait for an attached session to complete.
    Wait {
        /// Session identifier.
        session: Uuid,
    },
    /// Load the staged agent in-process and activate a profiler class.
    SelfTest {
        /// Profiler identifier to activate.
        #[arg(long)]
        profiler: Uuid,
    },
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.trim().to_owned(), value.to_owned()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::from_toml_str("")?,
    };
    let config = Arc::new(config);
    info!(
        session_root = %config.session_root.display(),
        build_version = %config.build_version,
        "configuration loaded"
    );

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    match args.command {
        Command::Processes => {
            let catalog = DiagnosticsProcessCatalog::new(config.diagnostics_dir.clone());
            for process in catalog.list().await? {
                println!(
                    "{}\t{}\t{}",
                    process.pid, process.managed_entrypoint, process.runtime_version
                );
            }
        }
        Command::Profilers { all } => {
            for profiler in StaticProfilerCatalog::from_config(&config).profilers(all) {
                let released = if profiler.is_released { "" } else { " (unreleased)" };
                println!("{}\t{}{released}", profiler.id, profiler.name);
            }
        }
        Command::Attach {
            pid,
            profiler,
            params,
            wait,
        } => {
            let profiler = resolve_profiler(&config, profiler, &params)?;
            let process = DiagnosticsProcessCatalog::new(config.diagnostics_dir.clone())
                .get(pid)
                .await
                .unwrap_or_else(|err| {
                    warn!(pid, %err, "process details unavailable; attaching by pid");
                    ProcessDescriptor::from_pid(pid)
                });

            let coordinator = AttachCoordinator::from_config(
                &config,
                Arc::new(DiagnosticsAttach::new(config.diagnostics_dir.clone())),
            )?;
            let session = coordinator
                .attach(process, profiler, config.attach_timeout())
                .await?;
            println!("{}\t{}", session.id, session.directory.display());

            if wait {
                let completed = tracker(&config).await_completion(&session, &ct).await?;
                print_reports(&config, &completed)?;
            }
        }
        Command::Sessions => {
            for completed in SessionDiscovery::new(config.session_root.clone()).list()? {
                println!(
                    "{}\t{}\t{}\t{}",
                    completed.session.id,
                    completed.manifest.timestamp.to_rfc3339(),
                    completed.session.process.pid,
                    completed.session.profiler.name
                );
            }
        }
        Command::Reports { session } => {
            let completed = SessionDiscovery::new(config.session_root.clone()).get(session)?;
            print_reports(&config, &completed)?;
        }
        Command::Wait { session } => {
            let pending = pending_session(&config, session)?;
            let completed = tracker(&config).await_completion(&pending, &ct).await?;
            print_reports(&config, &completed)?;
        }
        Command::SelfTest { profiler } => {
            let harness = Arc::new(SelfTestHarness::new(LibraryStager::from_config(&config)?));
            let version = config.build_version.clone();
            let report = tokio::task::spawn_blocking(move || harness.run(&version, profiler))
                .await
                .map_err(|err| AppError::Io(format!("self-test task failed: {err}")))??;
            let rendered = serde_json::to_string_pretty(&report)
                .map_err(|err| AppError::Io(format!("cannot render report: {err}")))?;
            println!("{rendered}");
        }
    }

    Ok(())
}

fn tracker(config: &GlobalConfig) -> SessionTracker {
    SessionTracker::from_config(config).with_file_events(true)
}

fn resolve_profiler(
    config: &GlobalConfig,
    id: Uuid,
    params: &[(String, String)],
) -> Result<ProfilerDescriptor> {
    let mut profiler = StaticProfilerCatalog::from_config(config).get(id)?;
    for (key, value) in params {
        profiler.set_parameter(key, value)?;
    }
    Ok(profiler)
}

/// Descriptor for a session attached by an earlier invocation.
fn pending_session(config: &GlobalConfig, id: Uuid) -> Result<SessionDescriptor> {
    let directory = session_directory(&config.session_root, id);
    if !directory.is_dir() {
        return Err(AppError::NotFound(format!("session {id}")));
    }
    Ok(SessionDescriptor {
        id,
        profiler: ProfilerDescriptor::new(Uuid::nil(), "unknown"),
        process: ProcessDescriptor::from_pid(0),
        created_at: chrono::Utc::now(),
        directory,
        status: SessionStatus::Attached,
    })
}

fn print_reports(config: &GlobalConfig, completed: &CompletedSession) -> Result<()> {
    let reports = tracker(config).enumerate_reports(&completed.session)?;
    if reports.is_empty() {
        info!(session_id = %completed.session.id, "session produced no reports");
    }
    for report in reports {
        println!("{}\t{}\t{}", report.name, report.size, report.path.display());
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
