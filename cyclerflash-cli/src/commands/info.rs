//! Info and list-ports commands.

use crate::serial::port_label;
use anyhow::{Context, Result};
use console::style;
use cyclerflash::protocol::crc::crc16_xmodem;
use cyclerflash::{BlockSize, FirmwareImage, NativePortEnumerator, PortEnumerator};
use std::path::Path;

/// Summary of a firmware image as printed by `info --json`.
fn image_json(path: &Path, image: &FirmwareImage) -> serde_json::Value {
    serde_json::json!({
        "path": path.display().to_string(),
        "name": image.name(),
        "format": image.format(),
        "size": image.len(),
        "address_range": image.address_range(),
        "crc16": format!("0x{:04X}", crc16_xmodem(image.data())),
        "blocks": {
            "128": image.block_count(BlockSize::Standard.len()),
            "1024": image.block_count(BlockSize::OneK.len()),
        },
    })
}

/// Info command implementation.
pub(crate) fn cmd_info(file: &Path, json: bool) -> Result<()> {
    let image = FirmwareImage::from_file(file)
        .with_context(|| format!("Failed to load firmware {}", file.display()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&image_json(file, &image))?
        );
        return Ok(());
    }

    eprintln!(
        "{} {}",
        style("Firmware:").bold(),
        file.display()
    );
    eprintln!("  Name:     {}", image.name());
    eprintln!("  Format:   {}", image.format());
    eprintln!("  Size:     {} bytes", image.len());
    if let Some(range) = image.address_range() {
        eprintln!(
            "  Address:  0x{:08X}..0x{:08X}",
            range.start, range.end
        );
    }
    eprintln!("  CRC16:    0x{:04X}", crc16_xmodem(image.data()));
    eprintln!(
        "  Blocks:   {} x 128 B, {} x 1024 B",
        image.block_count(BlockSize::Standard.len()),
        image.block_count(BlockSize::OneK.len())
    );
    if image.is_empty() {
        eprintln!(
            "{} Image is empty and cannot be uploaded",
            style("⚠").yellow()
        );
    }

    Ok(())
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports().context("Failed to list serial ports")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    if ports.is_empty() {
        eprintln!("{} No serial ports found", style("⚠").yellow());
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold());
    for port in &ports {
        eprintln!("  {} {}", style("•").dim(), port_label(port));
        if let Some(manufacturer) = &port.manufacturer {
            eprintln!("      Manufacturer: {manufacturer}");
        }
    }

    Ok(())
}
