//! Interactive serial port selection.
//!
//! The port is taken from, in order: the command line / environment, the
//! config file, the only port on the system, or an interactive prompt when
//! there are several and a terminal is attached.

use {
    crate::{CliError, config::Config},
    anyhow::{Context, Result},
    console::style,
    cyclerflash::{NativePortEnumerator, PortEnumerator, PortInfo},
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI or environment.
    pub port: Option<String>,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
}

/// Result of port selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPort {
    /// Port name/path.
    pub name: String,
    /// Whether the user picked it from a prompt.
    pub prompted: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Pick a port without prompting, if the candidates allow it.
///
/// Returns `Ok(None)` when a prompt is needed.
fn choose_without_prompt(ports: &[PortInfo], non_interactive: bool) -> Result<Option<String>> {
    match ports
        .len()
        .cmp(&1)
    {
        Ordering::Equal => Ok(Some(ports[0]
            .name
            .clone())),
        Ordering::Greater if non_interactive => Err(usage_err(
            "Multiple serial ports found; specify one with --port",
        )),
        Ordering::Greater => Ok(None),
        Ordering::Less => Err(usage_err("No serial ports found")),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    // If port explicitly specified, use it
    if let Some(name) = &options.port {
        return Ok(SelectedPort {
            name: name.clone(),
            prompted: false,
        });
    }

    // If port in config, use it
    if let Some(name) = &config
        .connection
        .port
    {
        debug!("Using port from config: {name}");
        return Ok(SelectedPort {
            name: name.clone(),
            prompted: false,
        });
    }

    let ports = NativePortEnumerator::list_ports().context("Failed to list serial ports")?;

    if let Some(name) = choose_without_prompt(&ports, options.non_interactive)? {
        info!("Auto-selected port: {name}");
        return Ok(SelectedPort {
            name,
            prompted: false,
        });
    }

    ensure_interactive_terminal()?;
    select_port_interactive(&ports)
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Several serial ports found and no terminal to prompt on; use --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Port prompt failed")
            }
        },
    }
}

/// One-line description of a port for prompts and listings.
pub fn port_label(port: &PortInfo) -> String {
    let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    format!("{}{vid_pid}{product}", port.name)
}

/// Interactive port selection.
fn select_port_interactive(ports: &[PortInfo]) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    // Truncate labels to fit terminal width to prevent wrapping in narrow
    // terminals.
    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the instrument's serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .get(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            Ok(SelectedPort {
                name: port
                    .name
                    .clone(),
                prompted: true,
            })
        },
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Ask user if they want to remember this port.
pub fn ask_remember_port(port: &str, config: &mut Config) -> Result<()> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {port} for next time?"))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_port(port) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}
