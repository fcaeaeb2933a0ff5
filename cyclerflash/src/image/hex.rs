//! Intel HEX flattening.
//!
//! Records are parsed (and checksum-validated) with the `ihex` crate, then
//! the addressed bytes are laid out into one contiguous buffer spanning the
//! lowest to the highest addressed byte. Holes are filled with
//! [`FILL_BYTE`], the erased state of flash.

use crate::error::{Error, Result};
use crate::image::AddressRange;
use ihex::Record;
use log::{debug, trace};

/// Value written into address gaps between records.
pub const FILL_BYTE: u8 = 0xFF;

/// Largest flattened image accepted (16 MiB).
pub const MAX_SPAN: u64 = 16 * 1024 * 1024;

/// Flattened HEX payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flattened {
    /// Raw bytes covering `range`.
    pub data: Vec<u8>,
    /// Address span the bytes were taken from.
    pub range: AddressRange,
}

/// Parse Intel HEX text and flatten it into raw bytes.
pub fn flatten(text: &str) -> Result<Flattened> {
    let mut segments: Vec<(u64, Vec<u8>)> = Vec::new();
    let mut base: u64 = 0;

    for (line_no, line) in text
        .lines()
        .enumerate()
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record = Record::from_record_string(line)
            .map_err(|e| Error::Format(format!("Intel HEX line {}: {e:?}", line_no + 1)))?;

        match record {
            Record::Data { offset, value } => {
                trace!("data @ {:#x}+{:#06x}, {} bytes", base, offset, value.len());
                if !value.is_empty() {
                    segments.push((base + u64::from(offset), value));
                }
            },
            Record::ExtendedSegmentAddress(segment) => {
                base = u64::from(segment) << 4;
            },
            Record::ExtendedLinearAddress(upper) => {
                base = u64::from(upper) << 16;
            },
            Record::EndOfFile => break,
            Record::StartSegmentAddress { .. } | Record::StartLinearAddress(_) => {},
        }
    }

    let start = segments
        .iter()
        .map(|(addr, _)| *addr)
        .min()
        .ok_or_else(|| Error::Format("Intel HEX has no data records".into()))?;
    let end = segments
        .iter()
        .map(|(addr, value)| addr + value.len() as u64)
        .max()
        .unwrap_or(start);

    let span = end - start;
    if span > MAX_SPAN {
        return Err(Error::Format(format!(
            "records span {span} bytes ({start:#x}..{end:#x}), limit is {MAX_SPAN}"
        )));
    }

    let mut data = vec![FILL_BYTE; span as usize];
    for (addr, value) in &segments {
        let at = (addr - start) as usize;
        data[at..at + value.len()].copy_from_slice(value);
    }

    debug!("Flattened HEX: {start:#x}..{end:#x} ({span} bytes)");

    let start = u32::try_from(start)
        .map_err(|_| Error::Format(format!("start address {start:#x} out of range")))?;

    Ok(Flattened {
        data,
        range: AddressRange { start, end },
    })
}
