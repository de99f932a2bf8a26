use crate::{Error, ErrorKind, Result};
use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::RwLock;
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tracing::{trace, warn};

/// Handle on the outcome of an operation queued on a channel.
///
/// It can be awaited, or waited on from a blocking context. Dropping it does
/// not cancel the operation: queued work always runs to completion so that the
/// per-channel command sequence stays intact.
#[must_use = "Promise should be used or you can miss errors"]
pub struct Promise<T> {
    recv: Receiver<Result<T>>,
    recv_fut: Pin<Box<dyn Future<Output = Result<T>> + Send>>,
    marker: Marker,
}

type Marker = Arc<RwLock<Option<String>>>;

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Promise")
    }
}

impl<T: Send + 'static> Promise<T> {
    pub(crate) fn new() -> (Self, PromiseResolver<T>) {
        let (send, recv) = flume::bounded(1);
        let marker = Marker::default();
        let recv_fut = recv.clone().into_recv_async();
        let recv_fut = Box::pin(async move { recv_fut.await.unwrap_or_else(|_| Err(vanished())) });
        let resolver = PromiseResolver {
            send,
            marker: marker.clone(),
        };
        let promise = Self {
            recv,
            recv_fut,
            marker,
        };
        (promise, resolver)
    }

    pub(crate) fn new_with_data(data: Result<T>) -> Self {
        let (promise, resolver) = Self::new();
        resolver.complete(data);
        promise
    }

    pub(crate) fn set_marker(&self, marker: String) {
        *self.marker.write() = Some(marker);
    }

    /// Get the outcome if it is already known.
    pub fn try_wait(&self) -> Option<Result<T>> {
        match self.recv.try_recv() {
            Ok(res) => Some(res),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(vanished())),
        }
    }

    /// Block the current thread until the outcome is known.
    pub fn wait(&self) -> Result<T> {
        self.recv.recv().unwrap_or_else(|_| Err(vanished()))
    }

    /// Block the current thread until the outcome is known or `timeout` elapses.
    ///
    /// On timeout the operation keeps running in the background.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<T> {
        match self.recv.recv_timeout(timeout) {
            Ok(res) => res,
            Err(RecvTimeoutError::Timeout) => {
                trace!(promise = %marker(&self.marker), "Promise timed out.");
                Err(ErrorKind::Timeout.into())
            }
            Err(RecvTimeoutError::Disconnected) => Err(vanished()),
        }
    }
}

impl<T: Send + 'static> Future for Promise<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.recv_fut).poll(cx)
    }
}

// Every resolver went away without completing: whatever was meant to resolve
// it (a dispatcher, a confirmation entry) is gone with the connection.
fn vanished() -> Error {
    Error::connection_lost()
}

pub(crate) struct PromiseResolver<T> {
    send: Sender<Result<T>>,
    marker: Marker,
}

impl<T> fmt::Debug for PromiseResolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PromiseResolver")
    }
}

impl<T> Clone for PromiseResolver<T> {
    fn clone(&self) -> Self {
        Self {
            send: self.send.clone(),
            marker: self.marker.clone(),
        }
    }
}

impl<T> PromiseResolver<T> {
    pub(crate) fn resolve(&self, data: T) {
        self.complete(Ok(data))
    }

    pub(crate) fn reject(&self, error: Error) {
        self.complete(Err(error))
    }

    pub(crate) fn complete(&self, res: Result<T>) {
        trace!(
            promise = %marker(&self.marker),
            "Resolving promise.",
        );
        if self.send.try_send(res).is_err() {
            warn!(
                promise = %marker(&self.marker),
                "Failed resolving promise, promise has vanished or was already resolved.",
            );
        }
    }
}

fn marker(marker: &Marker) -> String {
    marker
        .read()
        .as_ref()
        .map_or(String::default(), |marker| format!("[{}] ", marker))
}
