use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;

use crate::http::session::Session;
use crate::io::{AsyncStream, Device};
use crate::server::{Protocol, panic_message};

const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad request\r\n";
const INTERNAL_ERROR: &[u8] = b"HTTP/1.1 500 Internal Server Error\r\n";

/// Application logic run once per parsed request.
///
/// `handle` fills `session.response` (or writes a raw response and calls
/// [`Session::set_raw`]) and returns whether the connection may serve
/// another request. An `Err` or a panic is answered with a bare 500 status
/// line.
pub trait Application: Send + Sync + 'static {
    fn handle<S: Device>(
        &self,
        session: &mut Session<'_, S>,
    ) -> impl Future<Output = anyhow::Result<bool>> + Send;
}

/// HTTP/1.x keep-alive loop around an [`Application`].
///
/// ```text
///   read request ──closed──▶ stop
///        │ ──invalid──▶ 400, stop
///        ▼
///   application ──error/panic──▶ 500, stop
///        │
///        ▼
///   serialize (unless raw), flush
///        │
///        ├─ both sides keep-alive → read request
///        └─ otherwise → stop
/// ```
pub struct HttpProtocol<A> {
    app: A,
}

impl<A: Application> HttpProtocol<A> {
    pub fn new(app: A) -> Self {
        Self { app }
    }

    pub fn application(&self) -> &A {
        &self.app
    }
}

impl<A: Application> Protocol for HttpProtocol<A> {
    async fn serve<S: Device>(&self, stream: &mut AsyncStream<S>) -> anyhow::Result<bool> {
        loop {
            let mut session = Session::new(&mut *stream);

            let parsed = session.read_request().await;
            if session.closed() {
                tracing::debug!("peer closed connection");
                break;
            }
            if !parsed {
                reply_status_line(&mut session, BAD_REQUEST).await;
                break;
            }

            tracing::debug!(
                method = %session.request.method,
                url = %session.request.url,
                "request"
            );

            let outcome = AssertUnwindSafe(self.app.handle(&mut session))
                .catch_unwind()
                .await;
            let proceed = match outcome {
                Ok(Ok(proceed)) => proceed,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "application failed");
                    reply_status_line(&mut session, INTERNAL_ERROR).await;
                    break;
                }
                Err(panic) => {
                    tracing::error!(panic = %panic_message(&*panic), "application panicked");
                    reply_status_line(&mut session, INTERNAL_ERROR).await;
                    break;
                }
            };

            if !session.raw() {
                if let Err(e) = session.write_response().await {
                    tracing::debug!(error = %e, "write failed");
                    break;
                }
            }
            if let Err(e) = session.stream().flush().await {
                tracing::debug!(error = %e, "flush failed");
                break;
            }

            if !(proceed && session.keep_alive()) {
                break;
            }
        }

        Ok(false)
    }
}

async fn reply_status_line<S: Device>(session: &mut Session<'_, S>, line: &[u8]) {
    let stream = session.stream();
    let result = match stream.write_all(line).await {
        Ok(()) => stream.flush().await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "could not send status line");
    }
}
