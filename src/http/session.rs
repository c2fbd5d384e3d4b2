use std::io;

use anyhow::Context;

use crate::http::request::Request;
use crate::http::response::Response;
use crate::io::flag;
use crate::io::{AsyncStream, Device};

/// One request/response cycle on a connection.
///
/// Created fresh for every iteration of the keep-alive loop.
pub struct Session<'s, S> {
    stream: &'s mut AsyncStream<S>,
    pub request: Request,
    pub response: Response,
    raw: bool,
}

impl<'s, S: Device> Session<'s, S> {
    pub fn new(stream: &'s mut AsyncStream<S>) -> Self {
        Self {
            stream,
            request: Request::default(),
            response: Response::default(),
            raw: false,
        }
    }

    /// Parses the next request from the connection into `self.request`.
    pub async fn read_request(&mut self) -> bool {
        self.stream.read_request(&mut self.request).await
    }

    /// The peer closed the connection before sending a request.
    pub fn closed(&self) -> bool {
        self.request.closed
    }

    /// Both the request and the response allow another cycle.
    pub fn keep_alive(&self) -> bool {
        self.request.keep_alive && self.response.keep_alive()
    }

    /// The handler wrote the wire response itself.
    pub fn raw(&self) -> bool {
        self.raw
    }

    pub fn set_raw(&mut self, raw: bool) {
        self.raw = raw;
    }

    pub fn stream(&mut self) -> &mut AsyncStream<S> {
        self.stream
    }

    /// Serializes `self.response` into the connection's output buffer.
    pub async fn write_response(&mut self) -> io::Result<()> {
        self.stream.write_response(&self.response).await
    }

    /// Runs `job` on the blocking pool and suspends until it finishes.
    ///
    /// A panic inside `job` is reported as an error.
    pub async fn defer<F, T>(&mut self, job: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (signal, done) = flag::flag();
        tokio::task::spawn_blocking(move || signal.set(job()));
        done.wait().await.context("deferred job did not complete")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, duplex};

    #[tokio::test]
    async fn connection_close_in_either_direction_ends_keep_alive() {
        let (mut client, server) = duplex(256);
        let mut stream = AsyncStream::new(server);
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n")
            .await
            .unwrap();

        let mut session = Session::new(&mut stream);
        assert!(session.read_request().await);
        assert!(session.keep_alive());

        session.response.add_header("Connection", "close");
        assert!(!session.keep_alive());
    }

    #[tokio::test]
    async fn defer_returns_value_and_reports_panics() {
        let (_client, server) = duplex(16);
        let mut stream = AsyncStream::new(server);
        let mut session = Session::new(&mut stream);

        assert_eq!(session.defer(|| 6 * 7).await.unwrap(), 42);
        assert!(session.defer(|| -> u8 { panic!("boom") }).await.is_err());
    }
}
