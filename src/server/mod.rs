//! Connection acceptance and the per-connection task model.

pub mod listener;

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Notify;

use crate::io::{AsyncStream, Device};

pub use listener::{Server, Timeouts, serve_connection};

/// Handler run on every accepted connection.
///
/// The returned flag says whether the connection could have continued; the
/// server closes the stream either way once `serve` returns.
pub trait Protocol: Send + Sync + 'static {
    fn serve<S: Device>(
        &self,
        stream: &mut AsyncStream<S>,
    ) -> impl Future<Output = anyhow::Result<bool>> + Send;
}

/// Requests that a running [`Server`] stop.
///
/// A request made before `run` starts waiting is remembered.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<Notify>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.notify_one();
    }

    pub(crate) async fn requested(&self) {
        self.0.notified().await;
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
