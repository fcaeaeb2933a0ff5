//! Scripted in-memory port for protocol tests.
//!
//! Unlike `Cursor<Vec<u8>>`, reads and writes are independent: reads replay a
//! script of receiver replies (one byte per read, `None` meaning a read
//! timeout) and every `write` call is recorded as a separate frame.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::{DEFAULT_BAUD, DEFAULT_TIMEOUT, Port};

type WriteHook = Box<dyn FnMut(usize, &[u8]) + Send>;

pub(crate) struct MockPort {
    replies: VecDeque<Option<u8>>,
    frames: Vec<Vec<u8>>,
    timeout: Duration,
    open: bool,
    fail_write_at: Option<usize>,
    hook: Option<WriteHook>,
}

impl MockPort {
    /// Port whose receiver answers with `replies`, then goes silent.
    pub(crate) fn new(replies: &[u8]) -> Self {
        Self::scripted(replies.iter().copied().map(Some))
    }

    /// Port whose receiver never answers.
    pub(crate) fn silent() -> Self {
        Self::scripted(std::iter::empty())
    }

    /// Port replaying `script`; `None` entries time out.
    pub(crate) fn scripted(script: impl IntoIterator<Item = Option<u8>>) -> Self {
        Self {
            replies: script.into_iter().collect(),
            frames: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            open: true,
            fail_write_at: None,
            hook: None,
        }
    }

    /// Make the `index`-th write (0-based) fail with a broken pipe.
    pub(crate) fn fail_write_at(mut self, index: usize) -> Self {
        self.fail_write_at = Some(index);
        self
    }

    /// Run `hook(frame_index, frame)` after each recorded write.
    pub(crate) fn on_write<F>(mut self, hook: F) -> Self
    where
        F: FnMut(usize, &[u8]) + Send + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    pub(crate) fn frames(&self) -> &[Vec<u8>] {
        &self.frames
    }

    pub(crate) fn bytes_written(&self) -> usize {
        self.frames
            .iter()
            .map(Vec::len)
            .sum()
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(ErrorKind::NotConnected, "port closed"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        match self.replies.pop_front() {
            Some(Some(byte)) => {
                buf[0] = byte;
                Ok(1)
            },
            Some(None) | None => Err(io::Error::new(ErrorKind::TimedOut, "no data")),
        }
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(ErrorKind::NotConnected, "port closed"));
        }
        let index = self.frames.len();
        if self.fail_write_at == Some(index) {
            return Err(io::Error::new(ErrorKind::BrokenPipe, "link dropped"));
        }
        self.frames.push(buf.to_vec());
        if let Some(hook) = self.hook.as_mut() {
            hook(index, buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn baud_rate(&self) -> u32 {
        DEFAULT_BAUD
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}
