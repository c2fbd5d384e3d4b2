//! Bidirectional stream facade over [`AsyncStreamBuf`].

use std::io;
use std::sync::Weak;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::http::parser;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer;
use crate::io::buffered::{AsyncStreamBuf, CloseSignal};

/// Text and message oriented front end of a connection.
///
/// Every read or write may suspend the calling task; to the caller it reads
/// like blocking code.
pub struct AsyncStream<S> {
    buf: AsyncStreamBuf<S>,
}

fn close_on_timeout(signal: Weak<CloseSignal>, direction: &'static str) -> impl Fn() + Send + Sync + 'static {
    move || {
        if let Some(signal) = signal.upgrade() {
            tracing::debug!(direction, "I/O deadline expired, closing stream");
            signal.close();
        }
    }
}

impl<S> AsyncStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(device: S) -> Self {
        let mut buf = AsyncStreamBuf::new(device);
        let signal = buf.close_handle();
        buf.set_read_timeout_callback(close_on_timeout(signal.clone(), "read"));
        buf.set_write_timeout_callback(close_on_timeout(signal, "write"));
        Self { buf }
    }

    pub fn streambuf(&mut self) -> &mut AsyncStreamBuf<S> {
        &mut self.buf
    }

    pub fn device(&self) -> Option<&S> {
        self.buf.device()
    }

    pub fn is_open(&self) -> bool {
        self.buf.is_open()
    }

    /// Flushes pending output, then closes the device.
    ///
    /// Calling it again does nothing.
    pub async fn close(&mut self) {
        if self.buf.is_open() {
            if let Err(e) = self.buf.sync().await {
                tracing::debug!(error = %e, "flush on close failed");
            }
        }
        self.buf.close();
    }

    pub fn read_timeout(&self) -> Duration {
        self.buf.read_timeout()
    }

    pub fn write_timeout(&self) -> Duration {
        self.buf.write_timeout()
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.buf.set_read_timeout(timeout);
    }

    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.buf.set_write_timeout(timeout);
    }

    pub async fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.buf.fill_buf().await
    }

    pub fn consume(&mut self, amount: usize) {
        self.buf.consume(amount);
    }

    pub async fn read_some(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        self.buf.read_some(dst).await
    }

    /// Appends one line, including its `\n`, to `line`.
    ///
    /// Returns the number of bytes read; `0` means end of stream.
    pub async fn read_line(&mut self, line: &mut String) -> io::Result<usize> {
        let mut raw = Vec::new();
        loop {
            let window = self.buf.fill_buf().await?;
            if window.is_empty() {
                break;
            }
            match window.iter().position(|b| *b == b'\n') {
                Some(i) => {
                    raw.extend_from_slice(&window[..=i]);
                    self.buf.consume(i + 1);
                    break;
                }
                None => {
                    let n = window.len();
                    raw.extend_from_slice(window);
                    self.buf.consume(n);
                }
            }
        }
        line.push_str(&String::from_utf8_lossy(&raw));
        Ok(raw.len())
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.buf.write_all(bytes).await
    }

    pub async fn write_str(&mut self, text: &str) -> io::Result<()> {
        self.buf.write_all(text.as_bytes()).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.buf.sync().await
    }

    /// Parses one request from the stream into `request`.
    ///
    /// See [`parser::parse`] for the meaning of the result.
    pub async fn read_request(&mut self, request: &mut Request) -> bool {
        parser::parse(self, request).await
    }

    /// Serializes `response` into the output buffer. Does not flush.
    pub async fn write_response(&mut self, response: &Response) -> io::Result<()> {
        writer::write_response(self, response).await
    }
}
