//! cyclerflash CLI - Command-line tool for uploading firmware to PCR thermal cyclers.
//!
//! ## Features
//!
//! - Upload flat binary or Intel HEX firmware over YMODEM or plain chunks
//! - Inspect firmware images
//! - List serial ports
//! - Stream block and lid temperatures
//! - Write PCR program files to the instrument's storage card
//! - Interactive serial port selection
//! - Environment variable support

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use console::style;
use cyclerflash::BlockSize;
use cyclerflash::port::DEFAULT_BAUD;
use env_logger::Env;
use log::{debug, warn};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed since the last reset.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Forget an earlier Ctrl-C.
pub(crate) fn clear_interrupted_flag() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

mod commands;
mod config;
mod serial;

use config::{Config, StrategyKind};
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Errors that map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or environment (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Stopped by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Exit code for an error returned by a command.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return cli_err.exit_code();
    }
    if err
        .downcast_ref::<cyclerflash::Error>()
        .is_some_and(cyclerflash::Error::is_cancelled)
    {
        return 130;
    }
    1
}

/// cyclerflash - Upload firmware and programs to PCR thermal cyclers.
///
/// Environment variables:
///   CYCLERFLASH_PORT              - Default serial port
///   CYCLERFLASH_BAUD              - Default baud rate (default: 9600)
///   CYCLERFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "cyclerflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    cyclerflash -p /dev/ttyUSB0 upload easypcr.hex\n  \
    cyclerflash upload --strategy chunked --chunk-size 256 firmware.bin\n  \
    cyclerflash info --json easypcr.hex\n  \
    cyclerflash protocol covid.toml --root /media/EASYPCR")]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "CYCLERFLASH_PORT")]
    port: Option<String>,

    /// Baud rate (default: 9600).
    #[arg(short, long, global = true, env = "CYCLERFLASH_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "CYCLERFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload a firmware image (.bin or Intel .hex) to the instrument.
    Upload(UploadArgs),

    /// Show information about a firmware image.
    Info {
        /// Path to the firmware image.
        file: PathBuf,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Stream block (Peltier) and lid temperatures.
    Monitor {
        /// Print one JSON object per sample.
        #[arg(long)]
        json: bool,

        /// Print every received line, with non-printable bytes escaped.
        #[arg(long, conflicts_with = "json")]
        raw: bool,

        /// Stop after this many samples (lines with --raw).
        #[arg(long, value_name = "N")]
        count: Option<u64>,
    },

    /// Write a PCR program file to the instrument's storage card.
    Protocol {
        /// TOML description of the program.
        file: PathBuf,

        /// Storage card root (the file goes to <ROOT>/bio/<name>.txt).
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,

        /// Override the program name.
        #[arg(long)]
        name: Option<String>,

        /// Print the file to stdout instead of writing it.
        #[arg(long)]
        stdout: bool,
    },
}

/// Arguments of the upload command.
#[derive(Args, Debug, Clone)]
pub(crate) struct UploadArgs {
    /// Path to the firmware image.
    pub file: PathBuf,

    /// Upload strategy.
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyKind>,

    /// YMODEM block size.
    #[arg(long, value_parser = parse_block_size, value_name = "128|1024")]
    pub block_size: Option<BlockSize>,

    /// YMODEM attempts per block.
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Chunk size for the chunked strategy.
    #[arg(long, value_name = "BYTES")]
    pub chunk_size: Option<usize>,

    /// Pause between chunks for the chunked strategy.
    #[arg(long, value_name = "MS")]
    pub delay_ms: Option<u64>,
}

/// Parse a YMODEM block size.
fn parse_block_size(s: &str) -> Result<BlockSize, String> {
    s.trim()
        .parse::<usize>()
        .ok()
        .and_then(BlockSize::from_len)
        .ok_or_else(|| format!("Invalid block size: '{s}'. Expected 128 or 1024"))
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection (clig.dev best practice) ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        // Disable all color output
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "cyclerflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        warn!("Failed to install Ctrl-C handler: {e}");
    }

    // Load configuration
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match run(&cli, &mut config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code_for(&err);
            if code == 130 {
                eprintln!("{} {err}", style("⚠").yellow());
            } else {
                eprintln!("{} {err:#}", style("Error:").red().bold());
            }
            ExitCode::from(code)
        },
    }
}

fn run(cli: &Cli, config: &mut Config) -> Result<()> {
    match &cli.command {
        Commands::Upload(args) => commands::upload::cmd_upload(cli, config, args),
        Commands::Info { file, json } => commands::info::cmd_info(file, *json),
        Commands::ListPorts { json } => commands::info::cmd_list_ports(*json),
        Commands::Monitor { json, raw, count } => {
            let format = if *raw {
                commands::monitor::OutputFormat::Raw
            } else if *json {
                commands::monitor::OutputFormat::Json
            } else {
                commands::monitor::OutputFormat::Text
            };
            commands::monitor::cmd_monitor(cli, config, format, *count)
        },
        Commands::Protocol {
            file,
            root,
            name,
            stdout,
        } => commands::protocol::cmd_protocol(
            cli,
            config,
            file,
            root.as_deref(),
            name.as_deref(),
            *stdout,
        ),
    }
}

/// Get serial port from CLI args, config, or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli
            .port
            .clone(),
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;

    // Ask to remember a port the user had to pick by hand
    if selected.prompted && !cli.non_interactive {
        ask_remember_port(&selected.name, config)?;
    }

    Ok(selected.name)
}

/// Baud rate from CLI/env, then config, then the instrument default.
pub(crate) fn resolve_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config
            .connection
            .baud)
        .unwrap_or(DEFAULT_BAUD)
}
