//! Naive chunked upload.
//!
//! The payload is cut into fixed-size chunks that are written back to back,
//! with a fixed pause between writes so the receiver can keep up. Nothing is
//! read back: the only errors detected are local write failures.

use crate::error::{Error, Result};
use crate::port::Port;
use crate::session::CancelToken;
use log::{debug, trace};
use std::thread;
use std::time::Duration;

/// Chunked writer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedConfig {
    /// Bytes per write.
    pub chunk_size: usize,
    /// Pause between consecutive writes.
    pub inter_chunk_delay: Duration,
}

impl Default for ChunkedConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256,
            inter_chunk_delay: Duration::from_millis(100),
        }
    }
}

/// Chunked upload handler.
pub struct ChunkedWriter<'a, P: Port> {
    port: &'a mut P,
    config: ChunkedConfig,
}

impl<'a, P: Port> ChunkedWriter<'a, P> {
    /// Create a writer with the default configuration.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            config: ChunkedConfig::default(),
        }
    }

    /// Create a writer with a custom configuration.
    pub fn with_config(port: &'a mut P, config: ChunkedConfig) -> Self {
        Self { port, config }
    }

    /// Write `data` from byte 0, reporting `(bytes_sent, total)` after each chunk.
    ///
    /// Returns the number of bytes written. Cancellation is honoured between
    /// chunks only.
    pub fn send<F>(&mut self, data: &[u8], cancel: &CancelToken, mut progress: F) -> Result<usize>
    where
        F: FnMut(usize, usize),
    {
        if self.config.chunk_size == 0 {
            return Err(Error::Config("chunk size must be at least 1".into()));
        }
        if data.is_empty() {
            return Err(Error::EmptyImage);
        }

        let total = data.len();
        let chunks = total.div_ceil(self.config.chunk_size);
        debug!(
            "Chunked upload: {total} bytes in {chunks} chunks of {}",
            self.config.chunk_size
        );

        let mut sent = 0;
        for (index, chunk) in data
            .chunks(self.config.chunk_size)
            .enumerate()
        {
            if cancel.is_cancelled() {
                debug!("Cancelled before chunk {}/{chunks}", index + 1);
                return Err(Error::Cancelled);
            }
            if index > 0 && !self.config.inter_chunk_delay.is_zero() {
                thread::sleep(self.config.inter_chunk_delay);
            }

            self.port
                .write_all_bytes(chunk)
                .map_err(|e| Error::Transfer(format!("write of chunk {} failed: {e}", index + 1)))?;

            sent += chunk.len();
            trace!("Chunk {}/{chunks} written ({sent}/{total})", index + 1);
            progress(sent, total);
        }

        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;

    fn no_delay(chunk_size: usize) -> ChunkedConfig {
        ChunkedConfig {
            chunk_size,
            inter_chunk_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_thousand_bytes_in_256_byte_chunks() {
        let mut port = MockPort::silent();
        let data: Vec<u8> = (0..1000u32)
            .map(|i| i as u8)
            .collect();
        let mut calls = Vec::new();

        let sent = ChunkedWriter::with_config(&mut port, no_delay(256))
            .send(&data, &CancelToken::new(), |s, t| calls.push((s, t)))
            .unwrap();

        assert_eq!(sent, 1000);
        let sizes: Vec<usize> = port
            .frames()
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![256, 256, 256, 232]);
        assert_eq!(
            calls,
            vec![(256, 1000), (512, 1000), (768, 1000), (1000, 1000)]
        );
        assert_eq!(port.frames().concat(), data);
    }

    #[test]
    fn test_write_failure_aborts() {
        let mut port = MockPort::silent().fail_write_at(1);
        let mut calls = 0;

        let err = ChunkedWriter::with_config(&mut port, no_delay(4))
            .send(&[0u8; 16], &CancelToken::new(), |_, _| calls += 1)
            .unwrap_err();

        assert!(matches!(err, Error::Transfer(_)));
        assert_eq!(port.frames().len(), 1);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_cancel_between_chunks_keeps_whole_chunks() {
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let mut port = MockPort::silent().on_write(move |index, _| {
            if index == 1 {
                trigger.cancel();
            }
        });

        let err = ChunkedWriter::with_config(&mut port, no_delay(10))
            .send(&[7u8; 100], &cancel, |_, _| {})
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(port.frames().len(), 2);
        assert!(port
            .frames()
            .iter()
            .all(|f| f.len() == 10));
    }

    #[test]
    fn test_empty_payload_rejected() {
        let mut port = MockPort::silent();
        let err = ChunkedWriter::new(&mut port)
            .send(&[], &CancelToken::new(), |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::EmptyImage));
        assert_eq!(port.bytes_written(), 0);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut port = MockPort::silent();
        let err = ChunkedWriter::with_config(&mut port, no_delay(0))
            .send(&[1, 2, 3], &CancelToken::new(), |_, _| {})
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_default_config_matches_instrument_pacing() {
        let config = ChunkedConfig::default();
        assert_eq!(config.chunk_size, 256);
        assert_eq!(config.inter_chunk_delay, Duration::from_millis(100));
    }
}
