//! Temperature telemetry from the instrument's status stream.
//!
//! While idle or cycling, the instrument prints lines such as
//!
//! ```text
//! Peltier> T:95.5*C; Lid> T:105*C;
//! ```
//!
//! [`TelemetryParser`] turns the raw byte stream into [`TelemetrySample`]s;
//! [`TelemetryReader`] drives it from a [`Port`].

use crate::error::Result;
use crate::port::Port;
use log::{debug, trace};
use std::time::Duration;

/// Longest line kept while waiting for a newline.
pub const MAX_LINE_LEN: usize = 4096;

/// One parsed status line.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TelemetrySample {
    /// Number of samples parsed before this one.
    pub index: u64,
    /// Block (Peltier) temperature in degrees Celsius.
    pub peltier_c: f32,
    /// Heated lid temperature in degrees Celsius.
    pub lid_c: f32,
}

/// Extract `(peltier, lid)` from a status line; both must be present.
pub fn parse_line(line: &str) -> Option<(f32, f32)> {
    Some((reading(line, "Peltier>")?, reading(line, "Lid>")?))
}

/// Find the first `<label> T:<number>*C;` in `line`.
fn reading(line: &str, label: &str) -> Option<f32> {
    line.match_indices(label)
        .find_map(|(at, _)| {
            let rest = line[at + label.len()..].trim_start();
            let rest = rest.strip_prefix("T:")?;
            let len = number_len(rest)?;
            if !rest[len..].starts_with("*C;") {
                return None;
            }
            rest[..len]
                .parse()
                .ok()
        })
}

/// Length of a leading `[+-]?\d+(\.\d+)?`.
fn number_len(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));

    let digits = |from: usize| {
        bytes[from..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };

    let int = digits(i);
    if int == 0 {
        return None;
    }
    i += int;

    if bytes.get(i) == Some(&b'.') {
        let frac = digits(i + 1);
        if frac > 0 {
            i += 1 + frac;
        }
    }
    Some(i)
}

/// Incremental line splitter and parser.
#[derive(Debug, Default)]
pub struct TelemetryParser {
    buffer: Vec<u8>,
    next_index: u64,
}

impl TelemetryParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return the samples from every line they complete.
    ///
    /// An unterminated tail is kept for the next call. Lines that are not
    /// valid UTF-8 are decoded lossily.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<TelemetrySample> {
        let mut samples = Vec::new();
        for line in self.feed_lines(bytes) {
            let text = String::from_utf8_lossy(&line);
            match parse_line(&text) {
                Some((peltier_c, lid_c)) => {
                    samples.push(TelemetrySample {
                        index: self.next_index,
                        peltier_c,
                        lid_c,
                    });
                    self.next_index += 1;
                },
                None => trace!("Ignoring line: {text:?}"),
            }
        }
        samples
    }

    /// Feed raw bytes and return every line they complete, without the
    /// trailing `\r\n`/`\n`.
    pub fn feed_lines(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer
            .extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self
            .buffer
            .iter()
            .position(|&b| b == b'\n')
        {
            let mut line: Vec<u8> = self
                .buffer
                .drain(..=pos)
                .collect();
            while matches!(line.last(), Some(b'\n' | b'\r')) {
                line.pop();
            }
            lines.push(line);
        }

        if self.buffer.len() > MAX_LINE_LEN {
            debug!("Dropping {} bytes without a line break", self.buffer.len());
            self.buffer
                .clear();
        }

        lines
    }

    /// Bytes held back waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer
            .len()
    }
}

/// Polls a port and parses what arrives.
pub struct TelemetryReader<'a, P: Port> {
    port: &'a mut P,
    parser: TelemetryParser,
    poll_timeout: Duration,
}

impl<'a, P: Port> TelemetryReader<'a, P> {
    /// Create a reader that waits up to `poll_timeout` per poll.
    pub fn new(port: &'a mut P, poll_timeout: Duration) -> Self {
        Self {
            port,
            parser: TelemetryParser::new(),
            poll_timeout,
        }
    }

    /// Read whatever is available and return the raw lines it completes.
    ///
    /// Lines that are not telemetry are returned too.
    pub fn poll_lines(&mut self) -> Result<Vec<Vec<u8>>> {
        let bytes = self
            .port
            .read_bytes(256, self.poll_timeout)?;
        Ok(self
            .parser
            .feed_lines(&bytes))
    }

    /// Read whatever is available and return the samples it completes.
    ///
    /// Returns an empty vector when nothing arrived before the timeout.
    pub fn poll(&mut self) -> Result<Vec<TelemetrySample>> {
        let bytes = self
            .port
            .read_bytes(256, self.poll_timeout)?;
        Ok(self
            .parser
            .feed(&bytes))
    }
}

/// Render a raw line for display: printable ASCII as-is, `\t` `\r` `\\`
/// escaped, everything else as `\xNN`.
pub fn escape_line(line: &[u8]) -> String {
    line.iter()
        .map(|&b| match b {
            b'\t' => "\\t".to_string(),
            b'\r' => "\\r".to_string(),
            b'\\' => "\\\\".to_string(),
            0x20..=0x7E => char::from(b).to_string(),
            _ => format!("\\x{b:02X}"),
        })
        .collect()
}
