//! # cyclerflash
//!
//! A library for uploading firmware to serial-attached PCR thermal cyclers.
//!
//! The instrument is reached over a single point-to-point serial link. This
//! crate provides:
//!
//! - Firmware image loading (flat binary and Intel HEX)
//! - A naive chunked uploader (fixed-size writes with a pause)
//! - A YMODEM sender with CRC16, retries and cancellation
//! - Progress reporting and worker-thread sessions
//! - Temperature telemetry parsing
//! - PCR settings files
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use cyclerflash::{CancelToken, FirmwareImage, Strategy, spawn_upload};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("easypcr.hex")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let port = cyclerflash::NativePort::open_simple("/dev/ttyUSB0", 9600)?;
//!         let strategy = Strategy::for_image(&image);
//!         let handle = spawn_upload(
//!             port,
//!             image,
//!             strategy,
//!             CancelToken::new(),
//!             Box::new(|sent, total| println!("{sent}/{total}")),
//!         )?;
//!
//!         let (_port, outcome) = handle.join()?;
//!         println!("{}", outcome.status_line());
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod image;
pub mod pcr;
pub mod port;
pub mod progress;
pub mod protocol;
pub mod session;
pub mod telemetry;

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    error::{Error, Result},
    image::{AddressRange, FirmwareImage, ImageFormat},
    pcr::{PcrProtocol, PcrStage},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    progress::{ProgressFn, ProgressTracker, percent},
    protocol::{BlockSize, ChunkedConfig, YmodemConfig},
    session::{CancelToken, Strategy, TransferOutcome, TransferSession, UploadHandle, spawn_upload},
    telemetry::{TelemetryParser, TelemetryReader, TelemetrySample, escape_line},
};
