#![forbid(unsafe_code)]

//! `sockline-daemon`: runs the demo command set on a Unix socket.
//!
//! Serves until a client sends `quit` or the process receives Ctrl-C, then
//! drains in-flight replies and removes the socket.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use sockline::demo::DemoApp;
use sockline::server::build_runtime;
use sockline::{IpcConfig, IpcError, IpcServer, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "sockline-daemon", about = "Local IPC demo server", version, long_about = None)]
struct Cli {
    /// Socket path to listen on; overrides the config file.
    #[arg(long)]
    path: Option<PathBuf>,

    /// Worker pool size; overrides the config file.
    #[arg(long)]
    threads: Option<usize>,

    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "sockline-daemon failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Cli) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => IpcConfig::load_from_path(path)?,
        None => IpcConfig::default(),
    };
    if let Some(path) = args.path {
        config.path = path;
    }
    if let Some(threads) = args.threads {
        // Values below one are clamped rather than rejected.
        config.threads = threads.max(1);
    }
    config.validate()?;

    let options = config.server_options();
    build_runtime(&options)?.block_on(async move {
        let server = IpcServer::bind(&config.path, options)?;
        info!(path = %server.path().display(), "sockline-daemon started");

        let shutdown = server.shutdown_handle();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => {
                        info!("ctrl-c received; draining");
                        shutdown.request_quit();
                    }
                    Err(err) => warn!(%err, "cannot listen for ctrl-c"),
                },
                () = shutdown.stopped() => {}
            }
        });

        server.serve(DemoApp::new()).await
    })
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| IpcError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| IpcError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
