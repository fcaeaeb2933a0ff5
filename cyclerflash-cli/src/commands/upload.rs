//! Upload command.

use super::ensure_not_interrupted;
use crate::config::{Config, StrategyKind, UploadConfig};
use crate::{Cli, CliError, UploadArgs, get_port, resolve_baud, use_fancy_output, was_interrupted};
use anyhow::{Context, Result};
use console::style;
use cyclerflash::{
    BlockSize, CancelToken, ChunkedConfig, FirmwareImage, NativePort, Port, ProgressTracker,
    SerialConfig, Strategy, TransferOutcome, YmodemConfig, spawn_upload,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use std::thread;
use std::time::Duration;

/// How often the main thread checks the worker and the Ctrl-C flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn usage(message: String) -> anyhow::Error {
    CliError::Usage(message).into()
}

/// Resolve the transfer strategy from flags, then config, then defaults.
pub(crate) fn build_strategy(
    args: &UploadArgs,
    config: &UploadConfig,
    image: &FirmwareImage,
) -> Result<Strategy> {
    match args
        .strategy
        .or(config.strategy)
        .unwrap_or(StrategyKind::Ymodem)
    {
        StrategyKind::Chunked => {
            let defaults = ChunkedConfig::default();
            let chunk_size = args
                .chunk_size
                .or(config.chunk_size)
                .unwrap_or(defaults.chunk_size);
            if chunk_size == 0 {
                return Err(usage("Chunk size must be greater than zero".to_string()));
            }
            let inter_chunk_delay = args
                .delay_ms
                .or(config.delay_ms)
                .map_or(defaults.inter_chunk_delay, Duration::from_millis);

            Ok(Strategy::Chunked(ChunkedConfig {
                chunk_size,
                inter_chunk_delay,
            }))
        },
        StrategyKind::Ymodem => {
            let mut ymodem = YmodemConfig::for_image_len(image.len());

            if let Some(size) = args.block_size {
                ymodem.block_size = size;
            } else if let Some(len) = config.block_size {
                ymodem.block_size = BlockSize::from_len(len).ok_or_else(|| {
                    usage(format!("Invalid block size in config: {len}. Expected 128 or 1024"))
                })?;
            }

            if let Some(retries) = args
                .max_retries
                .or(config.max_retries)
            {
                if retries == 0 {
                    return Err(usage("Retry count must be at least 1".to_string()));
                }
                ymodem.max_retries = retries;
            }

            Ok(Strategy::Negotiated(ymodem))
        },
    }
}

fn progress_bar(cli: &Cli) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Upload command implementation.
pub(crate) fn cmd_upload(cli: &Cli, config: &mut Config, args: &UploadArgs) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware {}",
            style("📦").cyan(),
            args.file
                .display()
        );
    }

    let image = FirmwareImage::from_file(&args.file)
        .with_context(|| format!("Failed to load firmware {}", args.file.display()))?;
    if image.is_empty() {
        return Err(cyclerflash::Error::EmptyImage)
            .with_context(|| format!("Nothing to upload in {}", args.file.display()));
    }

    let strategy = build_strategy(args, &config.upload, &image)?;

    if !cli.quiet {
        eprintln!(
            "{} {} ({}, {} bytes)",
            style("ℹ").blue(),
            image.name(),
            image.format(),
            image.len()
        );
        if let Some(range) = image.address_range() {
            eprintln!(
                "    {} 0x{:08X}..0x{:08X}",
                style("•").dim(),
                range.start,
                range.end
            );
        }
        eprintln!("    {} Strategy: {strategy}", style("•").dim());
    }

    let port_name = get_port(cli, config)?;
    let baud = resolve_baud(cli, config);
    if !cli.quiet {
        eprintln!(
            "{} Using port {port_name} at {baud} baud",
            style("🔌").cyan()
        );
    }

    ensure_not_interrupted()?;
    let port = NativePort::open(&SerialConfig::new(&port_name, baud))?;

    if !cli.quiet && matches!(strategy, Strategy::Negotiated(_)) {
        eprintln!(
            "{} Waiting for the instrument to start the transfer...",
            style("⏳").yellow()
        );
    }

    let pb = progress_bar(cli);
    pb.set_message(format!("Uploading {}", image.name()));
    let bar = pb.clone();
    let mut tracker = ProgressTracker::new(move |pct| bar.set_position(u64::from(pct)));

    let cancel = CancelToken::new();
    let handle = spawn_upload(
        port,
        image,
        strategy,
        cancel.clone(),
        Box::new(move |sent, total| tracker.update(sent, total)),
    )?;

    while !handle.is_finished() {
        if was_interrupted() && !cancel.is_cancelled() {
            debug!("Ctrl-C received, cancelling upload");
            pb.set_message("Cancelling...");
            cancel.cancel();
        }
        thread::sleep(POLL_INTERVAL);
    }

    let (mut port, outcome) = handle.join()?;
    if let Err(e) = port.close() {
        warn!("Failed to close {port_name}: {e}");
    }

    match outcome {
        TransferOutcome::Completed { .. } => {
            pb.finish_with_message("Complete");
            if !cli.quiet {
                eprintln!(
                    "\n{} {}",
                    style("🎉").green().bold(),
                    outcome.status_line()
                );
            }
            Ok(())
        },
        TransferOutcome::Cancelled => {
            pb.abandon_with_message("Cancelled");
            Err(CliError::Cancelled(outcome.status_line()).into())
        },
        TransferOutcome::Failed(e) => {
            pb.abandon_with_message("Failed");
            Err(anyhow::Error::new(e).context("Upload failed"))
        },
    }
}
