//! YMODEM block transfer, sender side.
//!
//! The sender is an explicit state machine so retry and failure policy can be
//! exercised against a scripted port:
//!
//! ```text
//! AwaitStart --'C'--> SendHeader --ACK--> SendData(1..=N) --> SendEot --ACK--> Finish --> Completed
//!     |                   |                    |                  |
//!  N rounds          retry budget         retry budget       retry budget
//!     v                   v                    v                  v
//! NoReceiver          Handshake            Transfer           Transfer
//! ```
//!
//! Blocks use CRC16 and are framed as:
//!
//! ```text
//! +---------+-----+------+--------------------+--------+
//! | SOH/STX | SEQ | ~SEQ | DATA (128 or 1024) | CRC16  |
//! +---------+-----+------+--------------------+--------+
//! | 1       | 1   | 1    |     128 / 1024     | 2 (BE) |
//! +---------+-----+------+--------------------+--------+
//! ```
//!
//! Sequence 0 carries the header (`name\0size\0`). Data blocks are numbered
//! from 1 and wrap from 255 back to 1.

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::crc::crc16_xmodem;
use crate::session::CancelToken;
use log::{debug, info, trace, warn};
use std::time::{Duration, Instant};

/// YMODEM control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// Start of Text (1024-byte block).
    pub const STX: u8 = 0x02;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// CRC mode request character.
    pub const C: u8 = b'C';
}

/// Payload size of a data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockSize {
    /// 128-byte blocks framed with SOH.
    Standard,
    /// 1024-byte blocks framed with STX.
    #[default]
    OneK,
}

impl BlockSize {
    /// Payload bytes per block.
    pub const fn len(self) -> usize {
        match self {
            Self::Standard => 128,
            Self::OneK => 1024,
        }
    }

    /// Frame marker byte.
    pub const fn marker(self) -> u8 {
        match self {
            Self::Standard => control::SOH,
            Self::OneK => control::STX,
        }
    }

    /// Parse a payload size in bytes.
    pub fn from_len(len: usize) -> Option<Self> {
        match len {
            128 => Some(Self::Standard),
            1024 => Some(Self::OneK),
            _ => None,
        }
    }
}

/// YMODEM configuration options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YmodemConfig {
    /// Data block size.
    pub block_size: BlockSize,
    /// Timeout for each single-byte read.
    pub char_timeout: Duration,
    /// Reads without a start signal tolerated before giving up.
    pub start_timeouts: u32,
    /// Attempts per block (header, data, EOT) before giving up.
    pub max_retries: u32,
    /// Send the empty block 0 that closes a YMODEM batch.
    pub send_finish_block: bool,
}

impl Default for YmodemConfig {
    fn default() -> Self {
        Self {
            block_size: BlockSize::OneK,
            char_timeout: Duration::from_secs(1),
            start_timeouts: 60,
            max_retries: 10,
            send_finish_block: true,
        }
    }
}

impl YmodemConfig {
    /// Defaults, with 128-byte blocks when `len` bytes fit in one of them.
    pub fn for_image_len(len: usize) -> Self {
        let block_size = if len <= BlockSize::Standard.len() {
            BlockSize::Standard
        } else {
            BlockSize::OneK
        };
        Self {
            block_size,
            ..Self::default()
        }
    }
}

/// Sender state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YmodemState {
    /// Waiting for the receiver's 'C'.
    AwaitStart,
    /// Sending block 0.
    SendHeader,
    /// Sending data block `block` (1-based).
    SendData {
        /// Index of the next block to send.
        block: usize,
    },
    /// Sending EOT.
    SendEot,
    /// Sending the empty batch-terminating block 0.
    Finish,
    /// Receiver acknowledged EOT.
    Completed,
    /// Gave up.
    Failed,
    /// Stopped by the cancellation token.
    Cancelled,
}

/// What the receiver said after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Ack,
    Nak,
    Cancel,
    Timeout,
    Other(u8),
}

/// Sequence number of 1-based data block `index` (skips 0 on wrap).
pub fn data_sequence(index: usize) -> u8 {
    debug_assert!(index >= 1);
    ((index - 1) % 255 + 1) as u8
}

/// Block 0 payload: `name\0size\0`.
///
/// The name is truncated so the header always fits a 128-byte block.
pub fn header_payload(name: &str, size: usize) -> Vec<u8> {
    let size = size.to_string();
    let room = BlockSize::Standard.len() - size.len() - 2;
    let name = name.as_bytes();
    let name = &name[..name.len().min(room)];

    let mut payload = Vec::with_capacity(BlockSize::Standard.len());
    payload.extend_from_slice(name);
    payload.push(0x00);
    payload.extend_from_slice(size.as_bytes());
    payload.push(0x00);
    payload
}

/// Frame `data` as one block, zero-padding it to `size`.
pub fn build_block(seq: u8, data: &[u8], size: BlockSize) -> Vec<u8> {
    let len = size.len();
    let mut block = Vec::with_capacity(3 + len + 2);

    block.push(size.marker());
    block.push(seq);
    block.push(!seq);

    let take = data.len().min(len);
    block.extend_from_slice(&data[..take]);
    block.resize(3 + len, 0x00);

    let crc = crc16_xmodem(&block[3..3 + len]);
    block.extend_from_slice(&crc.to_be_bytes());

    block
}

/// YMODEM sender.
pub struct YmodemTransfer<'a, P: Port> {
    port: &'a mut P,
    config: YmodemConfig,
    state: YmodemState,
}

impl<'a, P: Port> YmodemTransfer<'a, P> {
    /// Create a sender with the default configuration.
    pub fn new(port: &'a mut P) -> Self {
        Self::with_config(port, YmodemConfig::default())
    }

    /// Create a sender with a custom configuration.
    pub fn with_config(port: &'a mut P, config: YmodemConfig) -> Self {
        Self {
            port,
            config,
            state: YmodemState::AwaitStart,
        }
    }

    /// Current state.
    pub fn state(&self) -> YmodemState {
        self.state
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let buf = self
            .port
            .read_bytes(1, self.config.char_timeout)?;
        Ok(buf.first().copied())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.port
            .write_all_bytes(frame)
            .map_err(|e| Error::Transfer(format!("write failed: {e}")))
    }

    /// Wait for the acknowledgement of the frame just written.
    ///
    /// The 'C' a receiver emits right after acknowledging block 0 may show up
    /// here; one such byte is skipped.
    fn await_reply(&mut self) -> Result<Reply> {
        let mut byte = self.read_byte()?;
        if byte == Some(control::C) {
            trace!("Skipping 'C' while awaiting ACK");
            byte = self.read_byte()?;
        }

        Ok(match byte {
            Some(control::ACK) => Reply::Ack,
            Some(control::NAK) => Reply::Nak,
            Some(control::CAN) => Reply::Cancel,
            Some(other) => Reply::Other(other),
            None => Reply::Timeout,
        })
    }

    /// Write `frame` until it is ACKed, at most `max_retries` times.
    fn send_acked(&mut self, frame: &[u8], what: &str, fail: fn(String) -> Error) -> Result<()> {
        for attempt in 1..=self.config.max_retries {
            trace!("Sending {what} (attempt {attempt})");
            self.write_frame(frame)?;

            match self.await_reply()? {
                Reply::Ack => {
                    trace!("{what} ACKed");
                    return Ok(());
                },
                Reply::Nak => debug!("{what} NAKed, retrying..."),
                Reply::Timeout => debug!("Timeout waiting for ACK of {what}, retrying..."),
                Reply::Other(c) => debug!("Unexpected response 0x{c:02X} to {what}, retrying..."),
                Reply::Cancel => return Err(fail(format!("{what}: cancelled by receiver"))),
            }
        }

        Err(fail(format!(
            "{what} not acknowledged after {} attempts",
            self.config.max_retries
        )))
    }

    /// Tell the receiver to give up. Best effort.
    fn abort(&mut self) {
        if let Err(e) = self
            .port
            .write_all_bytes(&[control::CAN, control::CAN])
        {
            warn!("Failed to send CAN: {e}");
        }
    }

    /// Wait for the receiver to request a CRC-mode transfer.
    ///
    /// Only read timeouts use up `start_timeouts`; other bytes (status lines
    /// from the instrument) are skipped. Chatter without a 'C' still gives up
    /// once `start_timeouts * char_timeout` has elapsed.
    pub fn wait_for_start(&mut self, cancel: &CancelToken) -> Result<()> {
        debug!("Waiting for 'C' from receiver...");
        let deadline = Instant::now() + self.config.char_timeout * self.config.start_timeouts;
        let mut timeouts = 0;

        while timeouts < self.config.start_timeouts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match self.read_byte()? {
                Some(control::C) => {
                    debug!("Received 'C' after {timeouts} timeout(s)");
                    return Ok(());
                },
                Some(c) => {
                    trace!("Ignoring 0x{c:02X} while waiting for 'C'");
                    if Instant::now() >= deadline {
                        break;
                    }
                },
                None => {
                    timeouts += 1;
                    trace!("No start signal ({timeouts}/{})", self.config.start_timeouts);
                },
            }
        }

        Err(Error::NoReceiver { rounds: timeouts })
    }

    /// Send block 0 announcing `name` and `size`.
    pub fn send_header(&mut self, name: &str, size: usize) -> Result<()> {
        debug!("Sending file info: {name} ({size} bytes)");
        let block = build_block(0, &header_payload(name, size), BlockSize::Standard);
        self.send_acked(&block, "header", Error::Handshake)
    }

    /// Send EOT until the receiver ACKs it.
    pub fn send_eot(&mut self) -> Result<()> {
        debug!("Sending EOT");
        self.send_acked(&[control::EOT], "EOT", Error::Transfer)
    }

    /// Send the empty block 0 that ends the batch.
    pub fn send_finish(&mut self) -> Result<()> {
        debug!("Sending finish block");
        let block = build_block(0, &[], BlockSize::Standard);
        self.send_acked(&block, "finish block", Error::Transfer)
    }

    /// Run a complete transfer of `data` announced as `name`.
    ///
    /// `progress` receives `(blocks_acked, total_blocks)`. Returns the number
    /// of data blocks sent.
    pub fn transfer<F>(
        &mut self,
        name: &str,
        data: &[u8],
        cancel: &CancelToken,
        progress: F,
    ) -> Result<usize>
    where
        F: FnMut(usize, usize),
    {
        if data.is_empty() {
            self.state = YmodemState::Failed;
            return Err(Error::EmptyImage);
        }

        self.state = YmodemState::AwaitStart;
        let result = self.run(name, data, cancel, progress);

        self.state = match &result {
            Ok(_) => YmodemState::Completed,
            Err(Error::Cancelled) => YmodemState::Cancelled,
            Err(_) => YmodemState::Failed,
        };
        result
    }

    fn run<F>(&mut self, name: &str, data: &[u8], cancel: &CancelToken, mut progress: F) -> Result<usize>
    where
        F: FnMut(usize, usize),
    {
        let block_len = self.config.block_size.len();
        let total_blocks = data.len().div_ceil(block_len);

        info!(
            "Starting YMODEM transfer: {name} ({} bytes, {total_blocks} x {block_len}-byte blocks)",
            data.len()
        );

        loop {
            match self.state {
                YmodemState::AwaitStart => {
                    self.wait_for_start(cancel)?;
                    self.state = YmodemState::SendHeader;
                },
                YmodemState::SendHeader => {
                    if cancel.is_cancelled() {
                        self.abort();
                        return Err(Error::Cancelled);
                    }
                    self.send_header(name, data.len())?;
                    self.state = YmodemState::SendData { block: 1 };
                },
                YmodemState::SendData { block } if block > total_blocks => {
                    self.state = YmodemState::SendEot;
                },
                YmodemState::SendData { block } => {
                    if cancel.is_cancelled() {
                        debug!("Cancelled before block {block}/{total_blocks}");
                        self.abort();
                        return Err(Error::Cancelled);
                    }

                    let start = (block - 1) * block_len;
                    let end = (start + block_len).min(data.len());
                    let frame = build_block(
                        data_sequence(block),
                        &data[start..end],
                        self.config.block_size,
                    );

                    if let Err(e) = self.send_acked(&frame, &format!("block {block}"), Error::Transfer) {
                        self.abort();
                        return Err(e);
                    }

                    progress(block, total_blocks);
                    self.state = YmodemState::SendData { block: block + 1 };
                },
                YmodemState::SendEot => {
                    if let Err(e) = self.send_eot() {
                        self.abort();
                        return Err(e);
                    }
                    self.state = if self.config.send_finish_block {
                        YmodemState::Finish
                    } else {
                        YmodemState::Completed
                    };
                },
                YmodemState::Finish => {
                    if let Err(e) = self.send_finish() {
                        warn!("Finish block not acknowledged: {e}");
                    }
                    self.state = YmodemState::Completed;
                },
                YmodemState::Completed => break,
                YmodemState::Failed | YmodemState::Cancelled => {
                    return Err(Error::Transfer(format!(
                        "transfer resumed from terminal state {:?}",
                        self.state
                    )));
                },
            }
        }

        info!("YMODEM transfer complete");
        Ok(total_blocks)
    }
}
