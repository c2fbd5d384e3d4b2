//! Suspending stream I/O.
//!
//! - **`buffered`**: [`AsyncStreamBuf`], the buffered stream that parks the
//!   calling task on every refill and flush, with read/write deadlines
//! - **`stream`**: [`AsyncStream`], the text and message facade a protocol
//!   handler works with
//! - **`flag`**: one-shot completion flag for handing work to another task

pub mod buffered;
pub mod flag;
pub mod stream;

pub use buffered::AsyncStreamBuf;
pub use stream::AsyncStream;

use tokio::io::{AsyncRead, AsyncWrite};

/// A byte device a connection can run over.
pub trait Device: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Device for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
