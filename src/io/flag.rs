//! One-shot completion flag.
//!
//! A task hands work to another task and suspends until that task sets the
//! flag. Dropping the setter without setting it wakes the waiter with
//! [`Abandoned`].

use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
#[error("completion flag dropped before it was set")]
pub struct Abandoned;

/// Setting half of a completion flag.
pub struct Signal<T>(oneshot::Sender<T>);

/// Waiting half of a completion flag.
pub struct Completion<T>(oneshot::Receiver<T>);

pub fn flag<T>() -> (Signal<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    (Signal(tx), Completion(rx))
}

impl<T> Signal<T> {
    pub fn set(self, value: T) {
        // the waiter may have given up, nothing to report then
        let _ = self.0.send(value);
    }
}

impl<T> Completion<T> {
    pub async fn wait(self) -> Result<T, Abandoned> {
        self.0.await.map_err(|_| Abandoned)
    }
}
