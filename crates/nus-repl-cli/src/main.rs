//! nus-repl - interactive REPL terminal over the BLE Nordic UART Service.
//!
//! # Configuration
//!
//! Configuration is loaded from multiple sources with priority:
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (`NUS_REPL_*`)
//! 3. Config file (`--config`, or `~/.config/nus-repl/config.toml`)
//! 4. Default values (lowest priority)
//!
//! # Exit Codes
//!
//! - `0`: the session ended normally
//! - `1`: the session failed
//! - `2`: configuration error, or the device could not be reached

mod config;
mod exit_key;

use std::{fs::OpenOptions, io, path::PathBuf, process::ExitCode, sync::Mutex, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use nus_repl_ble::{DeviceFilter, NusConnector};
use nus_repl_core::{ConnectionError, ExitReason, SessionController, SessionStatus};
use nus_repl_term::{CrosstermRawMode, stdin_source, stdout_sink};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::{
    config::{AppConfig, ConfigError, ConfigLoader, LoggingConfig, parse_write_mode},
    exit_key::{describe_exit_key, parse_exit_key},
};

/// Interactive REPL terminal for devices exposing a BLE UART service.
#[derive(Parser, Debug)]
#[command(name = "nus-repl")]
#[command(version, about, long_about = None)]
struct Args {
    /// Device local name or address (default: first device found)
    #[arg(short, long)]
    name: Option<String>,

    /// Advertised service UUID to scan for
    #[arg(long, value_name = "UUID")]
    service: Option<Uuid>,

    /// Scan timeout in milliseconds
    #[arg(long, value_name = "MS")]
    scan_timeout: Option<u64>,

    /// Drive a Pybricks hub: start its REPL on connect and stop it on exit
    #[arg(long)]
    pybricks: bool,

    /// Cap the write payload in bytes
    #[arg(long, value_name = "BYTES")]
    payload_size: Option<usize>,

    /// ATT MTU of the link, when known
    #[arg(long)]
    mtu: Option<u16>,

    /// Exit key sequence, e.g. ^] or 0x1d ("none" disables it)
    #[arg(long, value_name = "KEYS")]
    exit_key: Option<String>,

    /// Write mode: auto, with-response or without-response
    #[arg(long, value_name = "MODE")]
    write_mode: Option<String>,

    /// Config file (default: ~/.config/nus-repl/config.toml)
    #[arg(short, long, env = "NUS_REPL_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Ignore the default config file
    #[arg(long, conflicts_with = "config")]
    no_config: bool,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Log filter, e.g. info or nus_repl_ble=debug (also: RUST_LOG)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn resolve(&self) -> Result<AppConfig, ConfigError> {
        let mut loader = ConfigLoader::new();
        if let Some(ref path) = self.config {
            loader = loader.with_config_file(path);
        } else if self.no_config {
            loader = loader.skip_default_file();
        }
        let mut config = loader.load()?;
        self.apply(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// CLI args override (highest priority).
    fn apply(&self, config: &mut AppConfig) -> Result<(), ConfigError> {
        if let Some(ref name) = self.name {
            config.scan.name = Some(name.clone());
        }
        if self.service.is_some() {
            config.scan.service = self.service;
        }
        if let Some(ms) = self.scan_timeout {
            config.scan.scan_timeout_ms = ms;
        }
        if self.pybricks {
            config.scan.pybricks = true;
        }
        if self.mtu.is_some() {
            config.scan.mtu = self.mtu;
        }
        if let Some(ref mode) = self.write_mode {
            config.scan.write_mode = parse_write_mode(mode).ok_or(ConfigError::InvalidArg {
                flag: "write-mode",
                message: format!("unknown mode '{mode}'"),
            })?;
        }
        if self.payload_size.is_some() {
            config.bridge.payload_size = self.payload_size;
        }
        if let Some(ref keys) = self.exit_key {
            config.bridge.exit_sequence =
                parse_exit_key(keys).map_err(|e| ConfigError::InvalidArg {
                    flag: "exit-key",
                    message: e.to_string(),
                })?;
        }
        if let Some(ref path) = self.log_file {
            config.logging.file = Some(path.clone());
        }
        if let Some(ref level) = self.log_level {
            config.logging.level.clone_from(level);
        }
        Ok(())
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. Logs never go to stdout, which
/// carries the device output.
fn init_tracing(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level).map_err(|e| {
            nus_repl_core::ConfigError::invalid("logging.level", e.to_string())
        })?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| ConfigError::OpenLogFile {
                    path: path.clone(),
                    source,
                })?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(io::stderr).init(),
    }
    Ok(())
}

/// Resolves on SIGINT, SIGTERM or SIGHUP.
#[cfg(unix)]
async fn wait_for_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    Ok(tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
    })
}

#[cfg(not(unix))]
async fn wait_for_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}

fn describe_exit(status: &SessionStatus) -> String {
    match status {
        SessionStatus::Graceful(ExitReason::ExitKey | ExitReason::InputClosed) => {
            "Goodbye.".into()
        }
        SessionStatus::Graceful(ExitReason::RemoteClosed) => "Device disconnected.".into(),
        SessionStatus::Graceful(ExitReason::Shutdown) => "Interrupted.".into(),
        SessionStatus::Failed(e) => format!("Session failed: {e}"),
    }
}

async fn run(args: Args) -> Result<u8> {
    let config = args.resolve()?;
    init_tracing(&config.logging)?;
    info!(?config, "Configuration resolved");

    let filter = DeviceFilter::new(config.scan.name.clone(), config.scan.service());
    eprintln!("Searching for {filter}...");

    let controller =
        SessionController::new(NusConnector::new(config.scan.clone()), config.bridge.clone());
    let session = tokio::select! {
        session = controller.connect() => session?,
        signal = wait_for_signal() => {
            let signal = signal.context("Failed to install signal handler")?;
            info!(signal, "Interrupted while connecting");
            eprintln!("Interrupted.");
            return Ok(0);
        }
    };

    let exit_hint = if config.bridge.exit_sequence.is_empty() {
        "end of input".to_string()
    } else {
        describe_exit_key(&config.bridge.exit_sequence)
    };
    eprintln!(
        "Connected to {} ({} byte writes). Press {exit_hint} to exit.",
        session.info().peer,
        session.payload_size()
    );

    let shutdown = session.shutdown_handle();
    let signals = tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => {
                info!(signal, "Shutting down");
                shutdown.trigger();
            }
            Err(e) => tracing::warn!("Failed to install signal handler: {e}"),
        }
    });

    let status = session
        .run(
            stdin_source(&config.bridge),
            stdout_sink(),
            CrosstermRawMode::default(),
        )
        .await;
    signals.abort();

    eprintln!("\r\n{}", describe_exit(&status));
    Ok(u8::try_from(status.exit_code()).unwrap_or(1))
}

/// Connection and configuration problems exit with 2.
fn error_exit_code(e: &anyhow::Error) -> u8 {
    if e.is::<ConnectionError>() || e.is::<ConfigError>() {
        2
    } else {
        1
    }
}

/// How long shutdown waits for blocking work.
///
/// A stdin read sits on a blocking thread and cannot be cancelled.
const BLOCKING_SHUTDOWN: Duration = Duration::from_millis(100);

fn main() -> ExitCode {
    let args = Args::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let code = match runtime.block_on(run(args)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            error_exit_code(&e)
        }
    };
    runtime.shutdown_timeout(BLOCKING_SHUTDOWN);
    ExitCode::from(code)
}

#[cfg(test)]
mod tests {
    use nus_repl_ble::WriteMode;

    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("nus-repl").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn cli_overrides_config() {
        let mut config = AppConfig::default();
        config.scan.name = Some("from-file".into());

        args(&[
            "-n",
            "Pybricks Hub",
            "--pybricks",
            "--scan-timeout",
            "5000",
            "--payload-size",
            "64",
            "--exit-key",
            "^X",
            "--write-mode",
            "with-response",
            "--log-level",
            "debug",
        ])
        .apply(&mut config)
        .unwrap();

        assert_eq!(config.scan.name.as_deref(), Some("Pybricks Hub"));
        assert!(config.scan.pybricks);
        assert_eq!(config.scan.scan_timeout_ms, 5000);
        assert_eq!(config.scan.write_mode, WriteMode::WithResponse);
        assert_eq!(config.bridge.payload_size, Some(64));
        assert_eq!(config.bridge.exit_sequence, vec![0x18]);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn absent_flags_keep_config() {
        let mut config = AppConfig::default();
        config.scan.name = Some("esp32".into());
        config.bridge.exit_sequence = vec![0x04];

        args(&[]).apply(&mut config).unwrap();

        assert_eq!(config.scan.name.as_deref(), Some("esp32"));
        assert_eq!(config.bridge.exit_sequence, vec![0x04]);
        assert!(!config.scan.pybricks);
    }

    #[test]
    fn invalid_flags_are_config_errors() {
        let mut config = AppConfig::default();
        let err = args(&["--exit-key", "]"]).apply(&mut config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidArg { flag: "exit-key", .. }));

        let err = args(&["--write-mode", "fast"]).apply(&mut config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidArg { flag: "write-mode", .. }));

        assert!(Args::try_parse_from(["nus-repl", "--service", "nope"]).is_err());
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        let not_found = anyhow::Error::new(ConnectionError::NoAdapter);
        assert_eq!(error_exit_code(&not_found), 2);

        let config = anyhow::Error::new(ConfigError::invalid_env_var("NUS_REPL_NAME", "bad"));
        assert_eq!(error_exit_code(&config), 2);

        let other = anyhow::anyhow!("terminal went away");
        assert_eq!(error_exit_code(&other), 1);
    }

    #[test]
    fn exit_messages() {
        assert_eq!(
            describe_exit(&SessionStatus::Graceful(ExitReason::RemoteClosed)),
            "Device disconnected."
        );
        assert_eq!(describe_exit(&SessionStatus::Graceful(ExitReason::ExitKey)), "Goodbye.");
    }
}
