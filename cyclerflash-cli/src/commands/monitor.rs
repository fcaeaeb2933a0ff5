//! Temperature monitor command.
//!
//! Samples (or, with `--raw`, every received line) go to stdout one per line
//! so they can be piped; status lines go to stderr.

use super::ensure_not_interrupted;
use crate::config::Config;
use crate::{Cli, clear_interrupted_flag, get_port, resolve_baud, was_interrupted};
use anyhow::Result;
use console::style;
use cyclerflash::{NativePort, Port, SerialConfig, TelemetryReader, TelemetrySample, escape_line};
use log::{debug, warn};
use std::time::Duration;

/// Read timeout per poll; bounds the Ctrl-C reaction time.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// What the monitor prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    /// One aligned line per sample.
    Text,
    /// One JSON object per sample.
    Json,
    /// Every received line, non-printable bytes escaped.
    Raw,
}

fn format_sample(sample: &TelemetrySample) -> String {
    format!(
        "#{:<5} Peltier {:>7.2} °C   Lid {:>7.2} °C",
        sample.index, sample.peltier_c, sample.lid_c
    )
}

/// Monitor command implementation.
pub(crate) fn cmd_monitor(
    cli: &Cli,
    config: &mut Config,
    format: OutputFormat,
    count: Option<u64>,
) -> Result<()> {
    let port_name = get_port(cli, config)?;
    let baud = resolve_baud(cli, config);
    ensure_not_interrupted()?;

    let mut port = NativePort::open(&SerialConfig::new(&port_name, baud).with_timeout(POLL_TIMEOUT))?;

    if !cli.quiet {
        eprintln!(
            "{} Monitoring {port_name} at {baud} baud (Ctrl+C to stop)",
            style("🌡").cyan()
        );
    }

    let result = stream(&mut port, format, count);

    if let Err(e) = port.close() {
        warn!("Failed to close {port_name}: {e}");
    }

    let received = result?;
    clear_interrupted_flag();
    if !cli.quiet {
        eprintln!(
            "{} Monitor stopped after {received} {}",
            style("ℹ").blue(),
            if format == OutputFormat::Raw { "lines" } else { "samples" }
        );
    }
    Ok(())
}

fn stream<P: Port>(port: &mut P, format: OutputFormat, count: Option<u64>) -> Result<u64> {
    let mut reader = TelemetryReader::new(port, POLL_TIMEOUT);
    let mut received = 0u64;
    let reached = |received: u64| count.is_some_and(|limit| received >= limit);

    loop {
        if was_interrupted() {
            debug!("Ctrl-C received, leaving monitor");
            return Ok(received);
        }
        if reached(received) {
            return Ok(received);
        }

        for line in render(&mut reader, format)? {
            if reached(received) {
                break;
            }
            println!("{line}");
            received += 1;
        }
    }
}

/// Poll once and format whatever completed.
fn render<P: Port>(reader: &mut TelemetryReader<'_, P>, format: OutputFormat) -> Result<Vec<String>> {
    Ok(match format {
        OutputFormat::Raw => reader
            .poll_lines()?
            .iter()
            .map(|line| escape_line(line))
            .collect(),
        OutputFormat::Json => reader
            .poll()?
            .iter()
            .map(serde_json::to_string)
            .collect::<serde_json::Result<_>>()?,
        OutputFormat::Text => reader
            .poll()?
            .iter()
            .map(format_sample)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor, Read, Write};

    /// Serves a fixed byte stream; EOF reads as a timeout.
    struct ReplayPort(Cursor<Vec<u8>>);

    impl Read for ReplayPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Write for ReplayPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Port for ReplayPort {
        fn set_timeout(&mut self, _timeout: Duration) -> cyclerflash::Result<()> {
            Ok(())
        }

        fn timeout(&self) -> Duration {
            POLL_TIMEOUT
        }

        fn baud_rate(&self) -> u32 {
            115_200
        }

        fn clear_buffers(&mut self) -> cyclerflash::Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "replay"
        }

        fn is_open(&self) -> bool {
            true
        }

        fn close(&mut self) -> cyclerflash::Result<()> {
            Ok(())
        }
    }

    fn replay(bytes: &[u8]) -> ReplayPort {
        ReplayPort(Cursor::new(bytes.to_vec()))
    }

    #[test]
    fn test_raw_render_escapes_every_line() {
        let mut port = replay(b"Ready\r\n\x1b[0m\tPeltier> T:95.0*C; Lid> T:105.0*C;\n\xff\\end\n");
        let mut reader = TelemetryReader::new(&mut port, POLL_TIMEOUT);

        assert_eq!(
            render(&mut reader, OutputFormat::Raw).unwrap(),
            vec![
                "Ready".to_string(),
                "\\x1B[0m\\tPeltier> T:95.0*C; Lid> T:105.0*C;".to_string(),
                "\\xFF\\\\end".to_string(),
            ]
        );
    }

    #[test]
    fn test_text_render_skips_non_telemetry() {
        let mut port = replay(b"Ready\nPeltier> T:95.0*C; Lid> T:105.0*C;\n");
        let mut reader = TelemetryReader::new(&mut port, POLL_TIMEOUT);
        assert_eq!(
            render(&mut reader, OutputFormat::Text).unwrap(),
            vec!["#0     Peltier   95.00 °C   Lid  105.00 °C".to_string()]
        );
    }

    #[test]
    fn test_format_sample() {
        let sample = TelemetrySample {
            index: 3,
            peltier_c: 95.5,
            lid_c: 105.0,
        };
        assert_eq!(
            format_sample(&sample),
            "#3     Peltier   95.50 °C   Lid  105.00 °C"
        );
    }

    #[test]
    fn test_sample_json_shape() {
        let sample = TelemetrySample {
            index: 0,
            peltier_c: 72.0,
            lid_c: 104.5,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&sample).unwrap()).unwrap();
        assert_eq!(value["index"], 0);
        assert_eq!(value["peltier_c"], 72.0);
        assert_eq!(value["lid_c"], 104.5);
    }
}
