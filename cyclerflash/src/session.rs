//! Transfer sessions.
//!
//! A session ties an open [`Port`], a [`FirmwareImage`] and a [`Strategy`]
//! together and reduces whatever happens during the upload to a single
//! [`TransferOutcome`]. The session holds the port by `&mut`, so a second
//! upload on the same port cannot start while one is running.
//!
//! [`spawn_upload`] runs the same session on a worker thread and hands the
//! port back when the thread is joined.

use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::port::Port;
use crate::progress::ProgressFn;
use crate::protocol::chunked::{ChunkedConfig, ChunkedWriter};
use crate::protocol::ymodem::{YmodemConfig, YmodemTransfer};
use log::{info, warn};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Name of the upload worker thread.
pub const WORKER_THREAD_NAME: &str = "cyclerflash-upload";

/// Cooperative cancellation flag shared between the caller and a transfer.
///
/// Strategies poll it between blocks/chunks, never in the middle of a write.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0
            .store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0
            .load(Ordering::SeqCst)
    }
}

/// How the image is pushed over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Fixed-size writes with a pause in between, no acknowledgement.
    Chunked(ChunkedConfig),
    /// YMODEM blocks with CRC, ACK/NAK and retries.
    Negotiated(YmodemConfig),
}

impl Strategy {
    /// Default strategy for `image`: YMODEM, with 128-byte blocks when the
    /// whole image fits in one of them.
    pub fn for_image(image: &FirmwareImage) -> Self {
        Self::Negotiated(YmodemConfig::for_image_len(image.len()))
    }

    /// Unit reported by progress callbacks.
    pub fn unit(&self) -> &'static str {
        match self {
            Self::Chunked(_) => "bytes",
            Self::Negotiated(_) => "blocks",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chunked(c) => write!(f, "chunked ({} bytes/chunk)", c.chunk_size),
            Self::Negotiated(c) => write!(f, "ymodem ({}-byte blocks)", c.block_size.len()),
        }
    }
}

/// Terminal state of a session.
#[derive(Debug)]
pub enum TransferOutcome {
    /// Every unit was sent and, for YMODEM, acknowledged.
    Completed {
        /// Bytes (chunked) or blocks (YMODEM) sent.
        units: usize,
    },
    /// The transfer stopped on an error.
    Failed(Error),
    /// The cancellation token was set.
    Cancelled,
}

impl TransferOutcome {
    fn from_result(result: Result<usize>) -> Self {
        match result {
            Ok(units) => Self::Completed { units },
            Err(Error::Cancelled) => Self::Cancelled,
            Err(e) => Self::Failed(e),
        }
    }

    /// Whether the upload completed.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// One human-readable line describing the outcome.
    pub fn status_line(&self) -> String {
        match self {
            Self::Completed { units } => format!("Upload complete ({units} units sent)"),
            Self::Failed(e) => format!("Upload failed: {e}"),
            Self::Cancelled => "Upload cancelled".to_string(),
        }
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.status_line())
    }
}

/// A single upload over a borrowed port.
pub struct TransferSession<'a, P: Port> {
    port: &'a mut P,
    strategy: Strategy,
    cancel: CancelToken,
}

impl<'a, P: Port> TransferSession<'a, P> {
    /// Create a session with a fresh cancellation token.
    pub fn new(port: &'a mut P, strategy: Strategy) -> Self {
        Self {
            port,
            strategy,
            cancel: CancelToken::new(),
        }
    }

    /// Use `cancel` instead of the session's own token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this session.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel
            .clone()
    }

    /// Strategy in use.
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Upload `image`, reporting `(sent, total)` in the strategy's units.
    pub fn run<F>(&mut self, image: &FirmwareImage, progress: F) -> TransferOutcome
    where
        F: FnMut(usize, usize),
    {
        info!(
            "Uploading {} ({} bytes, {}) to {} @ {} Bd via {}",
            image.name(),
            image.len(),
            image.format(),
            self.port
                .name(),
            self.port
                .baud_rate(),
            self.strategy
        );

        // Stale status lines would otherwise be read as replies.
        if let Err(e) = self
            .port
            .clear_buffers()
        {
            warn!("Failed to clear {}: {e}", self.port.name());
        }

        let result = match &self.strategy {
            Strategy::Chunked(config) => {
                ChunkedWriter::with_config(&mut *self.port, config.clone()).send(
                    image.data(),
                    &self.cancel,
                    progress,
                )
            },
            Strategy::Negotiated(config) => {
                YmodemTransfer::with_config(&mut *self.port, config.clone()).transfer(
                    image.name(),
                    image.data(),
                    &self.cancel,
                    progress,
                )
            },
        };

        let outcome = TransferOutcome::from_result(result);
        match &outcome {
            TransferOutcome::Completed { .. } => info!("{outcome}"),
            _ => warn!("{outcome}"),
        }
        outcome
    }
}

/// Upload running on a worker thread.
pub struct UploadHandle<P> {
    thread: JoinHandle<(P, TransferOutcome)>,
    cancel: CancelToken,
}

impl<P> UploadHandle<P> {
    /// Ask the worker to stop at the next block/chunk boundary.
    pub fn cancel(&self) {
        self.cancel
            .cancel();
    }

    /// Whether the worker has finished.
    pub fn is_finished(&self) -> bool {
        self.thread
            .is_finished()
    }

    /// Wait for the worker; returns the port and the outcome.
    pub fn join(self) -> Result<(P, TransferOutcome)> {
        self.thread
            .join()
            .map_err(|_| Error::Transfer("upload worker panicked".into()))
    }
}

/// Run a [`TransferSession`] on a dedicated thread.
///
/// The port moves into the worker for the duration of the upload and comes
/// back from [`UploadHandle::join`]. `progress` runs on the worker thread.
pub fn spawn_upload<P>(
    mut port: P,
    image: FirmwareImage,
    strategy: Strategy,
    cancel: CancelToken,
    mut progress: Box<ProgressFn<'static>>,
) -> Result<UploadHandle<P>>
where
    P: Port + 'static,
{
    let worker_cancel = cancel.clone();
    let thread = thread::Builder::new()
        .name(WORKER_THREAD_NAME.into())
        .spawn(move || {
            let outcome = TransferSession::new(&mut port, strategy)
                .with_cancel(worker_cancel)
                .run(&image, &mut *progress);
            (port, outcome)
        })?;

    Ok(UploadHandle { thread, cancel })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ymodem::BlockSize;
    use crate::port::mock::MockPort;
    use crate::protocol::ymodem::control::{ACK, C};
    use std::sync::Mutex;
    use std::time::Duration;

    fn fast_ymodem() -> Strategy {
        Strategy::Negotiated(YmodemConfig {
            block_size: BlockSize::Standard,
            char_timeout: Duration::from_millis(5),
            start_timeouts: 3,
            max_retries: 2,
            send_finish_block: false,
        })
    }

    fn fast_chunked(chunk_size: usize) -> Strategy {
        Strategy::Chunked(ChunkedConfig {
            chunk_size,
            inter_chunk_delay: Duration::ZERO,
        })
    }

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_for_image_picks_negotiated() {
        let small = FirmwareImage::from_bytes("s.bin", vec![0; 100]);
        let large = FirmwareImage::from_bytes("l.bin", vec![0; 5000]);

        match Strategy::for_image(&small) {
            Strategy::Negotiated(c) => assert_eq!(c.block_size, BlockSize::Standard),
            other => panic!("unexpected {other:?}"),
        }
        match Strategy::for_image(&large) {
            Strategy::Negotiated(c) => assert_eq!(c.block_size, BlockSize::OneK),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_run_negotiated_completes() {
        // C, header ACK, 2 blocks, EOT
        let mut port = MockPort::new(&[C, ACK, ACK, ACK, ACK]);
        let image = FirmwareImage::from_bytes("fw.bin", vec![0x5A; 200]);
        let mut seen = Vec::new();

        let outcome = TransferSession::new(&mut port, fast_ymodem()).run(&image, |s, t| seen.push((s, t)));

        assert!(outcome.is_success(), "{outcome:?}");
        assert!(matches!(outcome, TransferOutcome::Completed { units: 2 }));
        assert_eq!(seen, vec![(1, 2), (2, 2)]);
    }

    #[test]
    fn test_run_chunked_completes() {
        let mut port = MockPort::silent();
        let image = FirmwareImage::from_bytes("fw.bin", vec![1; 10]);

        let outcome = TransferSession::new(&mut port, fast_chunked(4)).run(&image, |_, _| {});

        assert!(matches!(outcome, TransferOutcome::Completed { units: 10 }));
        assert_eq!(port.frames().len(), 3);
    }

    #[test]
    fn test_silent_receiver_fails_with_no_receiver() {
        let mut port = MockPort::silent();
        let image = FirmwareImage::from_bytes("fw.bin", vec![1; 10]);

        let outcome = TransferSession::new(&mut port, fast_ymodem()).run(&image, |_, _| {});

        assert!(matches!(
            outcome,
            TransferOutcome::Failed(Error::NoReceiver { rounds: 3 })
        ));
        assert!(!outcome.is_success());
        assert_eq!(port.bytes_written(), 0);
    }

    #[test]
    fn test_cancel_before_start_is_cancelled_outcome() {
        for strategy in [fast_ymodem(), fast_chunked(4)] {
            let mut port = MockPort::new(&[C, ACK, ACK]);
            let image = FirmwareImage::from_bytes("fw.bin", vec![1; 10]);
            let cancel = CancelToken::new();
            cancel.cancel();

            let outcome = TransferSession::new(&mut port, strategy)
                .with_cancel(cancel)
                .run(&image, |_, _| {});

            assert!(matches!(outcome, TransferOutcome::Cancelled));
            assert_eq!(port.bytes_written(), 0);
        }
    }

    #[test]
    fn test_empty_image_fails() {
        let mut port = MockPort::silent();
        let image = FirmwareImage::from_bytes("fw.bin", Vec::new());

        let outcome = TransferSession::new(&mut port, fast_chunked(4)).run(&image, |_, _| {});
        assert!(matches!(outcome, TransferOutcome::Failed(Error::EmptyImage)));
    }

    #[test]
    fn test_status_lines() {
        assert_eq!(
            TransferOutcome::Completed { units: 3 }.status_line(),
            "Upload complete (3 units sent)"
        );
        assert_eq!(TransferOutcome::Cancelled.status_line(), "Upload cancelled");
        assert_eq!(
            TransferOutcome::Failed(Error::EmptyImage).status_line(),
            "Upload failed: Firmware image is empty"
        );
    }

    #[test]
    fn test_spawn_upload_returns_port_and_outcome() {
        let port = MockPort::new(&[C, ACK, ACK, ACK]);
        let image = FirmwareImage::from_bytes("fw.bin", vec![7; 100]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let handle = spawn_upload(
            port,
            image,
            fast_ymodem(),
            CancelToken::new(),
            Box::new(move |s, t| {
                assert_eq!(
                    thread::current().name(),
                    Some(WORKER_THREAD_NAME)
                );
                sink.lock()
                    .unwrap()
                    .push((s, t));
            }),
        )
        .unwrap();

        let (port, outcome) = handle
            .join()
            .unwrap();
        assert!(outcome.is_success(), "{outcome:?}");
        assert_eq!(*seen.lock().unwrap(), vec![(1, 1)]);
        // header, 1 block, EOT
        assert_eq!(port.frames().len(), 3);
    }

    #[test]
    fn test_spawn_upload_cancel_via_handle() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let handle = spawn_upload(
            MockPort::silent(),
            FirmwareImage::from_bytes("fw.bin", vec![7; 100]),
            fast_chunked(8),
            cancel,
            Box::new(|_, _| {}),
        )
        .unwrap();
        handle.cancel();

        let (port, outcome) = handle
            .join()
            .unwrap();
        assert!(matches!(outcome, TransferOutcome::Cancelled));
        assert_eq!(port.bytes_written(), 0);
    }
}
