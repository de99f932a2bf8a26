use crate::{Promise, Result};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

/// Outcome of a publish, as reported through its [`PublisherConfirm`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Confirmation {
    /// The broker took responsibility for the message
    Ack,
    /// The broker could not take responsibility for the message
    Nack,
    /// The channel is not in confirm mode: the message was written and that is all we know
    NotRequested,
}

impl Confirmation {
    pub fn is_ack(&self) -> bool {
        matches!(self, Confirmation::Ack)
    }

    pub fn is_nack(&self) -> bool {
        matches!(self, Confirmation::Nack)
    }
}

/// Completion handle of a publish.
///
/// Resolves with the broker's ack or nack in confirm mode, with
/// [`Confirmation::NotRequested`] once written otherwise, or with the error
/// that prevented the confirmation (channel closed, connection lost).
#[derive(Debug)]
#[must_use = "PublisherConfirm should be used or you can miss errors"]
pub struct PublisherConfirm {
    inner: Promise<Confirmation>,
}

impl PublisherConfirm {
    pub(crate) fn new(inner: Promise<Confirmation>) -> Self {
        Self { inner }
    }

    pub fn try_wait(&self) -> Option<Result<Confirmation>> {
        self.inner.try_wait()
    }

    pub fn wait(&self) -> Result<Confirmation> {
        self.inner.wait()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<Confirmation> {
        self.inner.wait_timeout(timeout)
    }
}

impl Future for PublisherConfirm {
    type Output = Result<Confirmation>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}
