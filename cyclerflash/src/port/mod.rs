//! Transport abstraction for the instrument's serial link.
//!
//! Protocol code in this crate never touches the `serialport` crate directly.
//! It talks to a [`Port`], a duplex byte stream with a read timeout, so the
//! transfer state machines can be driven by a scripted port in tests.
//!
//! ```text
//! +---------------------------+
//! |  Transfer strategies      |
//! |  (chunked, ymodem)        |
//! +-------------+-------------+
//!               |
//!               v
//! +-------------+-------------+
//! |        Port trait         |
//! +-------------+-------------+
//!               |
//!               v
//! +-------------+-------------+
//! |  NativePort (serialport)  |
//! +---------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use cyclerflash::port::Port;
//! use std::time::Duration;
//!
//! fn example<P: Port>(port: &mut P) -> cyclerflash::Result<()> {
//!     port.write_all_bytes(b"Hello")?;
//!
//!     let reply = port.read_bytes(32, Duration::from_millis(500))?;
//!     println!("Received: {reply:?}");
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default baud rate of the instrument's serial link.
pub const DEFAULT_BAUD: u32 = 9600;

/// Default read timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Serial port configuration.
///
/// The instrument always talks 8N1 without flow control, so only the name,
/// baud rate and read timeout are configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Duplex byte stream to the instrument.
///
/// A port is owned by whoever opened it. Transfer sessions borrow it
/// mutably for their whole lifetime, so two transfers can never interleave
/// on the same link.
pub trait Port: Read + Write + Send {
    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current read timeout.
    fn timeout(&self) -> Duration;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Discard pending input and output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Whether the port is still open.
    fn is_open(&self) -> bool;

    /// Close the port and release the OS handle.
    ///
    /// Closing an already closed port is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes and flush, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }

    /// Read up to `max` bytes, waiting at most `timeout`.
    ///
    /// A timeout yields an empty vector, never an error.
    fn read_bytes(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        if self.timeout() != timeout {
            self.set_timeout(timeout)?;
        }

        let mut buf = vec![0u8; max];
        match self.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            },
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Ok(Vec::new())
            },
            Err(e) => Err(e.into()),
        }
    }
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
