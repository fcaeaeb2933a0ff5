//! PCR program command.
//!
//! Programs are described in TOML:
//!
//! ```toml
//! name = "covid"
//!
//! [[stage]]
//! name = "Intro Denaturing"
//! temperature = 95
//! seconds = 180
//! ```

use crate::config::Config;
use crate::{Cli, CliError};
use anyhow::{Context, Result};
use console::style;
use cyclerflash::PcrProtocol;
use std::fs;
use std::path::Path;

/// Read a program description from TOML.
pub(crate) fn load_program(file: &Path, name: Option<&str>) -> Result<PcrProtocol> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let mut program: PcrProtocol =
        toml::from_str(&text).with_context(|| format!("Failed to parse {}", file.display()))?;

    if let Some(name) = name {
        program.name = name.to_string();
    }
    if program.stages.is_empty() {
        return Err(CliError::Usage(format!("{} defines no stages", file.display())).into());
    }
    program
        .validate()
        .with_context(|| format!("Invalid program in {}", file.display()))?;
    Ok(program)
}

/// Protocol command implementation.
pub(crate) fn cmd_protocol(
    cli: &Cli,
    config: &Config,
    file: &Path,
    root: Option<&Path>,
    name: Option<&str>,
    stdout: bool,
) -> Result<()> {
    let program = load_program(file, name)?;

    if stdout {
        println!("{}", program.to_text());
        return Ok(());
    }

    let root = root
        .or(config
            .storage
            .root
            .as_deref())
        .ok_or_else(|| {
            CliError::Usage("No storage root given; use --root or set storage.root".to_string())
        })?;

    let path = program
        .save_to(root)
        .with_context(|| format!("Failed to write program {:?}", program.name))?;

    if !cli.quiet {
        eprintln!(
            "{} Wrote {} ({} stages) to {}",
            style("✓").green(),
            program.name,
            program.stages.len(),
            path.display()
        );
    }
    Ok(())
}
