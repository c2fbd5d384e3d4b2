use std::io;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::FutureExt;
use tokio::net::{TcpListener, TcpSocket};
use tokio::runtime::Runtime;
use tracing::info;

use crate::config::Config;
use crate::io::{AsyncStream, Device};
use crate::server::{Protocol, ShutdownHandle, panic_message};

const LISTEN_BACKLOG: u32 = 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Per-connection read and write timeouts; zero disables.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
}

/// A listening socket plus the worker pool that serves it.
///
/// The socket is bound at construction; connections are accepted once
/// [`run`](Server::run) is called.
pub struct Server<P> {
    listener: TcpListener,
    runtime: Runtime,
    protocol: Arc<P>,
    timeouts: Timeouts,
    shutdown: ShutdownHandle,
}

impl<P: Protocol> Server<P> {
    /// Starts `workers` worker threads and listens on `address:port`.
    ///
    /// The server owns its runtime, so it must be built, run and dropped
    /// outside of any tokio runtime; calling this from async code fails.
    pub fn bind(protocol: P, address: &str, port: u16, workers: usize) -> anyhow::Result<Self> {
        if workers == 0 {
            anyhow::bail!("worker count must be at least 1");
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            anyhow::bail!("Server::bind called from inside a tokio runtime");
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("coserve-worker")
            .enable_all()
            .build()
            .context("failed to start worker pool")?;
        let listener = runtime.block_on(listen(address, port))?;

        info!("Listening on {}:{} with {} workers", address, port, workers);

        Ok(Self {
            listener,
            runtime,
            protocol: Arc::new(protocol),
            timeouts: Timeouts::default(),
            shutdown: ShutdownHandle::default(),
        })
    }

    pub fn from_config(protocol: P, cfg: &Config) -> anyhow::Result<Self> {
        let server = Self::bind(protocol, &cfg.server.address, cfg.server.port, cfg.server.workers)?;
        Ok(server.with_timeouts(cfg.server.read_timeout(), cfg.server.write_timeout()))
    }

    pub fn with_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.timeouts = Timeouts { read, write };
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Requests shutdown on ctrl-c, and on SIGTERM where available.
    pub fn shutdown_on_signal(&self) {
        let handle = self.shutdown.clone();
        self.runtime.spawn(async move {
            wait_for_signal().await;
            info!("Shutdown signal received");
            handle.shutdown();
        });
    }

    /// Serves connections until shutdown is requested.
    ///
    /// Connections still open at that point are dropped, which closes their
    /// sockets without flushing.
    pub fn run(self) -> anyhow::Result<()> {
        let Server {
            listener,
            runtime,
            protocol,
            timeouts,
            shutdown,
        } = self;

        runtime.spawn(accept_loop(listener, protocol, timeouts));
        runtime.block_on(shutdown.requested());

        info!("Stopping worker pool");
        runtime.shutdown_timeout(SHUTDOWN_GRACE);
        Ok(())
    }
}

async fn listen(address: &str, port: u16) -> anyhow::Result<TcpListener> {
    let addr = tokio::net::lookup_host((address, port))
        .await
        .with_context(|| format!("failed to resolve {address}:{port}"))?
        .next()
        .with_context(|| format!("{address} resolved to no addresses"))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }?;
    socket.set_reuseaddr(true)?;
    socket
        .bind(addr)
        .with_context(|| format!("failed to bind {addr}"))?;
    socket
        .listen(LISTEN_BACKLOG)
        .with_context(|| format!("failed to listen on {addr}"))
}

async fn accept_loop<P: Protocol>(listener: TcpListener, protocol: Arc<P>, timeouts: Timeouts) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                tracing::debug!(peer = %peer, "Accepted connection");
                let protocol = Arc::clone(&protocol);
                tokio::spawn(async move {
                    serve_connection(protocol.as_ref(), socket, peer, timeouts).await;
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed, no longer accepting connections");
                break;
            }
        }
    }
}

/// Runs `protocol` over one connection, then closes it.
///
/// A protocol error or panic is reported to the peer as a single diagnostic
/// line.
pub async fn serve_connection<P, S>(protocol: &P, device: S, peer: SocketAddr, timeouts: Timeouts)
where
    P: Protocol,
    S: Device,
{
    let mut stream = AsyncStream::new(device);
    stream.set_read_timeout(timeouts.read);
    stream.set_write_timeout(timeouts.write);

    let outcome = AssertUnwindSafe(protocol.serve(&mut stream))
        .catch_unwind()
        .await;
    let failure = match outcome {
        Ok(Ok(keep_alive)) => {
            tracing::debug!(peer = %peer, keep_alive, "Connection finished");
            None
        }
        Ok(Err(e)) => {
            tracing::error!(peer = %peer, error = %e, "Connection error");
            Some(e.to_string())
        }
        Err(panic) => {
            let message = panic_message(&*panic);
            tracing::error!(peer = %peer, panic = %message, "Connection handler panicked");
            Some(format!("panic: {message}"))
        }
    };

    if let Some(reason) = failure {
        let line = format!("Unhandled error: {reason}\r\n");
        let sent = match stream.write_str(&line).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            tracing::debug!(peer = %peer, error = %e, "could not report error to peer");
        }
    }

    stream.close().await;
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!(error = %e, "cannot watch SIGTERM");
            wait_for_ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = wait_for_ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot watch ctrl-c");
        std::future::pending::<()>().await;
    }
}
