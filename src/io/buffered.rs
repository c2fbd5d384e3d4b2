//! Buffered stream that suspends the calling task on buffer underflow and
//! overflow.
//!
//! Reads refill a fixed input buffer with one asynchronous read, writes are
//! collected in an output buffer and sent with one asynchronous write. Every
//! device operation is an `.await` point: the calling task is parked and the
//! worker is free to run other connections until the operation completes.
//!
//! Each outstanding operation can be raced against a deadline. The deadline
//! is a spawned timer task which, when it fires, runs the timeout callback
//! (by default: close the stream). Closing wakes the suspended operation,
//! which then fails with [`std::io::ErrorKind::NotConnected`].

use std::io;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Capacity of the input and output buffers.
pub const BUF_SIZE: usize = 4096;

/// Number of already consumed bytes kept in front of the read window.
pub const PUTBACK_SIZE: usize = 4;

pub type TimeoutCallback = Arc<dyn Fn() + Send + Sync>;

/// Close flag shared between a stream and its deadline timers.
///
/// Timers and timeout callbacks only ever hold a [`Weak`] reference to it, so
/// a deadline firing after the stream is gone does nothing.
#[derive(Debug)]
pub struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl CloseSignal {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Marks the stream closed and wakes any operation suspended on it.
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only returns once closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// A timer armed while one device operation is outstanding.
#[derive(Default)]
struct Deadline {
    task: Option<JoinHandle<()>>,
}

impl Deadline {
    fn arm(&mut self, after: Duration, callback: Option<TimeoutCallback>, signal: Weak<CloseSignal>) {
        self.cancel();
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            match callback {
                Some(callback) => callback(),
                None => {
                    if let Some(signal) = signal.upgrade() {
                        signal.close();
                    }
                }
            }
        }));
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream closed")
}

/// Suspending buffered stream over an asynchronous byte device.
///
/// The device is owned exclusively and dropped (closing it) by
/// [`close`](Self::close) or when the buffer itself is dropped.
pub struct AsyncStreamBuf<S> {
    device: Option<S>,

    // input[begin..pos] is the putback region, input[pos..end] the read window
    input: Box<[u8]>,
    begin: usize,
    pos: usize,
    end: usize,

    output: BytesMut,

    read_timeout: Duration,
    write_timeout: Duration,
    read_deadline: Deadline,
    write_deadline: Deadline,
    on_read_timeout: Option<TimeoutCallback>,
    on_write_timeout: Option<TimeoutCallback>,

    signal: Arc<CloseSignal>,
}

impl<S> AsyncStreamBuf<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(device: S) -> Self {
        Self {
            device: Some(device),
            input: vec![0u8; BUF_SIZE].into_boxed_slice(),
            begin: PUTBACK_SIZE,
            pos: PUTBACK_SIZE,
            end: PUTBACK_SIZE,
            output: BytesMut::with_capacity(BUF_SIZE),
            read_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
            read_deadline: Deadline::default(),
            write_deadline: Deadline::default(),
            on_read_timeout: None,
            on_write_timeout: None,
            signal: Arc::new(CloseSignal::new()),
        }
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some() && !self.signal.is_closed()
    }

    /// Closes the device. Safe to call any number of times.
    pub fn close(&mut self) {
        self.signal.close();
        if self.device.take().is_some() {
            tracing::trace!("stream device closed");
        }
    }

    /// Non-owning handle that closes this stream from anywhere.
    pub fn close_handle(&self) -> Weak<CloseSignal> {
        Arc::downgrade(&self.signal)
    }

    pub fn device(&self) -> Option<&S> {
        self.device.as_ref()
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// `Duration::ZERO` disables the read deadline.
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    /// `Duration::ZERO` disables the write deadline.
    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_timeout = timeout;
    }

    pub fn set_read_timeout_callback(&mut self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_read_timeout = Some(Arc::new(callback));
    }

    pub fn set_write_timeout_callback(&mut self, callback: impl Fn() + Send + Sync + 'static) {
        self.on_write_timeout = Some(Arc::new(callback));
    }

    /// Unread bytes currently in the read window.
    pub fn buffered(&self) -> &[u8] {
        &self.input[self.pos..self.end]
    }

    /// Bytes written but not yet flushed.
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    /// Returns the read window, refilling it first if it is empty.
    ///
    /// An empty slice means the peer closed the connection.
    pub async fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos == self.end {
            self.fetch().await?;
        }
        Ok(&self.input[self.pos..self.end])
    }

    pub fn consume(&mut self, amount: usize) {
        self.pos = (self.pos + amount).min(self.end);
    }

    /// Number of bytes readable without suspending again; refills once if
    /// the window is empty. `Ok(0)` means end of stream.
    pub async fn available(&mut self) -> io::Result<usize> {
        if self.pos < self.end {
            return Ok(self.end - self.pos);
        }
        self.fetch().await
    }

    pub async fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        Ok(self.fill_buf().await?.first().copied())
    }

    pub async fn next_byte(&mut self) -> io::Result<Option<u8>> {
        let byte = self.peek_byte().await?;
        if byte.is_some() {
            self.pos += 1;
        }
        Ok(byte)
    }

    /// Steps back over the last consumed byte, if it is still buffered.
    pub fn unget(&mut self) -> bool {
        if self.pos > self.begin {
            self.pos -= 1;
            true
        } else {
            false
        }
    }

    /// Copies up to `dst.len()` bytes, suspending only if nothing is buffered.
    pub async fn read_some(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let window = self.fill_buf().await?;
        let n = window.len().min(dst.len());
        dst[..n].copy_from_slice(&window[..n]);
        self.consume(n);
        Ok(n)
    }

    pub async fn put(&mut self, byte: u8) -> io::Result<()> {
        if self.output.len() >= BUF_SIZE {
            self.sync().await?;
        }
        self.output.extend_from_slice(&[byte]);
        Ok(())
    }

    pub async fn write_all(&mut self, mut bytes: &[u8]) -> io::Result<()> {
        while !bytes.is_empty() {
            if self.output.len() >= BUF_SIZE {
                self.sync().await?;
            }
            let n = (BUF_SIZE - self.output.len()).min(bytes.len());
            self.output.extend_from_slice(&bytes[..n]);
            bytes = &bytes[n..];
        }
        Ok(())
    }

    /// Sends everything buffered. An empty buffer never issues a write.
    pub async fn sync(&mut self) -> io::Result<()> {
        if self.output.is_empty() {
            return Ok(());
        }
        let result = self.write_with_timeout().await;
        self.output.clear();
        result
    }

    async fn fetch(&mut self) -> io::Result<usize> {
        let keep = (self.pos - self.begin).min(PUTBACK_SIZE);
        self.input
            .copy_within(self.pos - keep..self.pos, PUTBACK_SIZE - keep);
        self.begin = PUTBACK_SIZE - keep;
        self.pos = PUTBACK_SIZE;
        self.end = PUTBACK_SIZE;

        match self.read_with_timeout().await {
            Ok(n) => {
                self.end = PUTBACK_SIZE + n;
                Ok(n)
            }
            Err(e) => {
                self.begin = PUTBACK_SIZE;
                Err(e)
            }
        }
    }

    async fn read_with_timeout(&mut self) -> io::Result<usize> {
        if !self.read_timeout.is_zero() {
            self.read_deadline.arm(
                self.read_timeout,
                self.on_read_timeout.clone(),
                Arc::downgrade(&self.signal),
            );
        }

        let Self {
            device,
            input,
            signal,
            ..
        } = self;
        let result = match device.as_mut() {
            Some(device) if !signal.is_closed() => tokio::select! {
                read = device.read(&mut input[PUTBACK_SIZE..]) => read,
                _ = signal.closed() => Err(closed_error()),
            },
            _ => Err(closed_error()),
        };

        self.read_deadline.cancel();
        self.reap();
        result
    }

    async fn write_with_timeout(&mut self) -> io::Result<()> {
        if !self.write_timeout.is_zero() {
            self.write_deadline.arm(
                self.write_timeout,
                self.on_write_timeout.clone(),
                Arc::downgrade(&self.signal),
            );
        }

        let Self {
            device,
            output,
            signal,
            ..
        } = self;
        let result = match device.as_mut() {
            Some(device) if !signal.is_closed() => tokio::select! {
                written = async {
                    device.write_all(&output[..]).await?;
                    device.flush().await
                } => written,
                _ = signal.closed() => Err(closed_error()),
            },
            _ => Err(closed_error()),
        };

        self.write_deadline.cancel();
        self.reap();
        result
    }

    // A timeout callback may have closed the signal while we were suspended.
    fn reap(&mut self) {
        if self.signal.is_closed() && self.device.take().is_some() {
            tracing::trace!("stream device closed by signal");
        }
    }
}
