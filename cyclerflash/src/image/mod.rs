//! Firmware image loading.
//!
//! Two on-disk formats are accepted:
//!
//! - **Flat binary** (`.bin` and anything unrecognised): read verbatim.
//! - **Intel HEX** (`.hex`, `.ihex`): records are validated and flattened
//!   into the contiguous byte range they address, see [`hex`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use cyclerflash::FirmwareImage;
//!
//! fn main() -> cyclerflash::Result<()> {
//!     let image = FirmwareImage::from_file("easypcr.hex")?;
//!     println!("{}: {} bytes", image.name(), image.len());
//!     Ok(())
//! }
//! ```

pub mod hex;

use crate::error::{Error, Result};
use log::debug;
use std::fmt;
use std::fs;
use std::path::Path;

/// On-disk firmware format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ImageFormat {
    /// Already-flat binary.
    Binary,
    /// Intel HEX records.
    IntelHex,
}

impl ImageFormat {
    /// Detect the format from the file extension.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("hex" | "ihex") => Self::IntelHex,
            _ => Self::Binary,
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => write!(f, "binary"),
            Self::IntelHex => write!(f, "Intel HEX"),
        }
    }
}

/// Address span covered by a flattened HEX image (`end` exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct AddressRange {
    /// Lowest addressed byte.
    pub start: u32,
    /// One past the highest addressed byte.
    pub end: u64,
}

impl AddressRange {
    /// Number of bytes in the span.
    pub fn len(&self) -> u64 {
        self.end - u64::from(self.start)
    }

    /// Whether the span is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable firmware payload ready for transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    name: String,
    format: ImageFormat,
    data: Vec<u8>,
    address_range: Option<AddressRange>,
}

impl FirmwareImage {
    /// Load an image from disk, flattening Intel HEX when the extension says so.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = ImageFormat::from_path(path);
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("firmware");

        match format {
            ImageFormat::Binary => {
                let data = fs::read(path)?;
                let name = path
                    .file_name()
                    .and_then(|s| s.to_str())
                    .unwrap_or("firmware.bin");
                debug!("Loaded binary {} ({} bytes)", path.display(), data.len());
                Ok(Self::from_bytes(name, data))
            },
            ImageFormat::IntelHex => {
                let raw = fs::read(path)?;
                let text = String::from_utf8(raw)
                    .map_err(|_| Error::Format(format!("{} is not text", path.display())))?;
                Self::from_hex_str(&format!("{stem}.bin"), &text)
            },
        }
    }

    /// Wrap raw bytes as a binary image.
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            format: ImageFormat::Binary,
            data,
            address_range: None,
        }
    }

    /// Flatten Intel HEX text into an image.
    pub fn from_hex_str(name: impl Into<String>, text: &str) -> Result<Self> {
        let flat = hex::flatten(text)?;
        Ok(Self {
            name: name.into(),
            format: ImageFormat::IntelHex,
            data: flat.data,
            address_range: Some(flat.range),
        })
    }

    /// Name announced to the receiver.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source format.
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data
            .len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data
            .is_empty()
    }

    /// Source address span, for images flattened from HEX.
    pub fn address_range(&self) -> Option<AddressRange> {
        self.address_range
    }

    /// Number of `block_size` blocks needed to carry the payload.
    pub fn block_count(&self, block_size: usize) -> usize {
        self.len()
            .div_ceil(block_size)
    }
}
