#![forbid(unsafe_code)]

//! `sockline-ctl`: command-line client for `sockline-daemon`.
//!
//! Probes, sends commands to, stress-tests and stops a running daemon.
//! Exits 0 on success and 1 on any failure.

use std::path::{Path, PathBuf};
use std::process::{Command as Process, ExitCode, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

use sockline::client::{get_active_state, send_command, ConnectOptions};
use sockline::{ActiveState, IpcConfig, IpcError};

/// Interval between liveness probes while waiting on the daemon.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const DAEMON_BIN: &str = "sockline-daemon";

#[derive(Debug, Parser)]
#[command(
    name = "sockline-ctl",
    about = "Local CLI for sockline-daemon",
    version,
    long_about = None
)]
struct Cli {
    /// Socket path of the daemon; overrides the config file.
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    /// Path to an optional TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report whether a daemon is listening.
    IsActive,

    /// Start a daemon in the background and wait until it listens.
    StartDaemon {
        /// Worker pool size for the daemon.
        #[arg(long, default_value_t = 5)]
        threads: usize,
        /// Seconds to wait for the daemon to come up.
        #[arg(long, default_value_t = 60)]
        max_wait: u64,
    },

    /// Send one command and print the reply.
    Send {
        /// Command text.
        command: String,
    },

    /// Send `sendbytes` followed by a ballast of repeated bytes.
    Sendbytes {
        /// Ballast length.
        #[arg(long, default_value_t = 1024)]
        bytecount: usize,
        /// Ballast byte; only the first character is used.
        #[arg(long, default_value = "x")]
        byte: String,
    },

    /// Send ballast requests from many threads at once.
    Multiple {
        /// Number of client threads.
        #[arg(long, default_value_t = 5)]
        threads: usize,
        /// Requests per thread.
        #[arg(long, default_value_t = 10)]
        batchsize: usize,
        /// Base ballast length.
        #[arg(long, default_value_t = 1)]
        bytecount: usize,
    },

    /// Ask the daemon to quit and wait until it stops listening.
    StopDaemon {
        /// Seconds to wait for the daemon to stop.
        #[arg(long, default_value_t = 60)]
        max_wait: u64,
    },
}

fn main() -> ExitCode {
    let args = Cli::parse();

    let mut config = match &args.config {
        Some(path) => match IpcConfig::load_from_path(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Error: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => IpcConfig::default(),
    };
    if let Some(path) = args.path {
        config.path = path;
    }

    let result = match args.command {
        Command::IsActive => probe_server(&config.path),
        Command::StartDaemon { threads, max_wait } => {
            start_daemon(&config.path, threads, Duration::from_secs(max_wait))
        }
        command => probe_server(&config.path).and_then(|()| run_client(&config, command)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("Error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run_client(config: &IpcConfig, command: Command) -> Result<(), String> {
    let path = config.path.as_path();
    let options = ConnectOptions {
        wait_if_busy: true,
        wait_if_not_found: false,
        ..config.connect_options()
    };

    match command {
        Command::Send { command } => send(path, &options, &command),
        Command::Sendbytes { bytecount, byte } => {
            let byte = byte.chars().next().unwrap_or('x');
            do_sendbytes(path, &options, bytecount, byte)
        }
        Command::Multiple {
            threads,
            batchsize,
            bytecount,
        } => multiple(path, &options, threads.max(1), batchsize.max(1), bytecount.max(1)),
        Command::StopDaemon { max_wait } => {
            stop_daemon(path, &options, Duration::from_secs(max_wait))
        }
        Command::IsActive | Command::StartDaemon { .. } => Ok(()),
    }
}

fn probe_server(path: &Path) -> Result<(), String> {
    let target = path.display();
    match get_active_state(path) {
        ActiveState::Listening => Ok(()),
        ActiveState::NotListening => Err(format!("no server listening at '{target}'")),
        ActiveState::PathNotFound => Err(format!("path not found '{target}'")),
        ActiveState::InvalidPath => Err(format!("invalid socket path '{target}'")),
        ActiveState::OtherError => Err(format!("other error for '{target}'")),
    }
}

fn send(path: &Path, options: &ConnectOptions, command: &str) -> Result<(), String> {
    let reply = send_command(path, options, command)
        .map_err(|err| format!("failed to send '{command}' to '{}': {err}", path.display()))?;
    if !reply.is_empty() {
        println!("{}", String::from_utf8_lossy(&reply));
    }
    Ok(())
}

fn do_sendbytes(
    path: &Path,
    options: &ConnectOptions,
    bytecount: usize,
    byte: char,
) -> Result<(), String> {
    let mut command = String::with_capacity("sendbytes ".len() + bytecount);
    command.push_str("sendbytes ");
    command.extend(std::iter::repeat(byte).take(bytecount));

    let reply = send_command(path, options, &command).map_err(|err: IpcError| {
        format!(
            "client failed to sendbytes({bytecount}, '{byte}') to '{}': {err}",
            path.display()
        )
    })?;
    let reply = String::from_utf8_lossy(&reply);
    println!("sent:{byte}{bytecount:08} {}", reply.trim_end());
    Ok(())
}

fn multiple(
    path: &Path,
    options: &ConnectOptions,
    threads: usize,
    batchsize: usize,
    bytecount: usize,
) -> Result<(), String> {
    // Threads must not race each other through chdir.
    let options = ConnectOptions {
        uds_disallow_chdir: true,
        ..*options
    };

    let (good, join_errors, errors) = thread::scope(|scope| {
        let workers: Vec<_> = (0..threads)
            .map(|k| {
                let letter = letter_for(k);
                let base = bytecount + batchsize * (k / 26);
                scope.spawn(move || {
                    let mut good = 0usize;
                    let mut errors = 0usize;
                    for n in 0..batchsize {
                        match do_sendbytes(path, &options, base + n, letter) {
                            Ok(()) => good += 1,
                            Err(message) => {
                                eprintln!("Error: {message}");
                                errors += 1;
                            }
                        }
                    }
                    (good, errors)
                })
            })
            .collect();

        workers
            .into_iter()
            .fold((0, 0, 0), |(good, join_errors, errors), worker| {
                match worker.join() {
                    Ok((g, e)) => (good + g, join_errors, errors + e),
                    Err(_) => (good, join_errors + 1, errors),
                }
            })
    });

    println!("client (good {good}) (join {join_errors}), (errors {errors})");
    if join_errors + errors > 0 {
        Err(format!("{} of {} requests failed", join_errors + errors, threads * batchsize))
    } else {
        Ok(())
    }
}

fn letter_for(k: usize) -> char {
    // k % 26 always fits in a u8.
    char::from(b'A' + u8::try_from(k % 26).unwrap_or(0))
}

fn stop_daemon(path: &Path, options: &ConnectOptions, max_wait: Duration) -> Result<(), String> {
    let deadline = Instant::now() + max_wait;
    send(path, options, "quit")?;

    loop {
        thread::sleep(POLL_INTERVAL);
        if get_active_state(path) != ActiveState::Listening {
            return Ok(());
        }
        if Instant::now() > deadline {
            return Err("daemon has not shutdown yet".into());
        }
    }
}

fn start_daemon(path: &Path, threads: usize, max_wait: Duration) -> Result<(), String> {
    let exe = std::env::current_exe()
        .map_err(|err| format!("cannot locate {DAEMON_BIN}: {err}"))?
        .with_file_name(DAEMON_BIN);

    let mut child = Process::new(&exe)
        .arg("--path")
        .arg(path)
        .arg("--threads")
        .arg(threads.max(1).to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| format!("could not spawn {}: {err}", exe.display()))?;

    let deadline = Instant::now() + max_wait;
    loop {
        match child.try_wait() {
            Ok(None) => {
                if get_active_state(path).is_listening() {
                    return Ok(());
                }
                if Instant::now() > deadline {
                    return Err("daemon not online yet".into());
                }
                thread::sleep(POLL_INTERVAL);
            }
            Ok(Some(_)) => {
                // Another daemon may own the socket; any listener will do.
                return if get_active_state(path).is_listening() {
                    Ok(())
                } else {
                    Err("daemon failed to start".into())
                };
            }
            Err(err) => return Err(format!("cannot watch daemon process: {err}")),
        }
    }
}
