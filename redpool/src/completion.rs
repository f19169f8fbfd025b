//! Dual-mode completion: a result goes either to a callback or to a
//! [`Deferred`] value, depending on which public method the caller used.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{ConnectionError, Error, Result};

/// Callback completion, invoked once with the outcome.
pub type Callback<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

enum Sink<T> {
    Callback(Callback<T>),
    Deferred(oneshot::Sender<Result<T>>),
}

impl<T> Sink<T> {
    fn deliver(self, outcome: Result<T>) {
        match self {
            Sink::Callback(callback) => callback(outcome),
            Sink::Deferred(tx) => {
                // The caller may have dropped the deferred value; nobody to tell.
                let _ = tx.send(outcome);
            }
        }
    }
}

/// Where an operation's outcome goes. Dropped without being completed, it
/// delivers [`ConnectionError::Abandoned`], so a task the runtime never ran
/// still answers its caller.
pub(crate) struct Completion<T> {
    sink: Option<Sink<T>>,
}

impl<T> Completion<T> {
    pub(crate) fn callback<F>(callback: F) -> Self
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        Completion {
            sink: Some(Sink::Callback(Box::new(callback))),
        }
    }

    pub(crate) fn deferred() -> (Self, Deferred<T>) {
        let (tx, rx) = oneshot::channel();
        let completion = Completion {
            sink: Some(Sink::Deferred(tx)),
        };
        (completion, Deferred { rx })
    }

    /// Delivers the outcome through whichever channel this completion is.
    pub(crate) fn complete(mut self, outcome: Result<T>) {
        if let Some(sink) = self.sink.take() {
            sink.deliver(outcome);
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.deliver(Err(Error::Connection(ConnectionError::Abandoned)));
        }
    }
}

/// A pending result. Awaiting it yields the reply or the error.
///
/// The operation runs whether or not this is awaited.
#[must_use = "the result of the operation is only observable by awaiting it"]
pub struct Deferred<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Deferred<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(Error::Connection(ConnectionError::Abandoned)))
        })
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").finish_non_exhaustive()
    }
}
