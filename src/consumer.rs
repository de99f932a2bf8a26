use crate::{
    message::{Delivery, DeliveryResult},
    types::ShortString,
    ErrorKind, Result,
};
use flume::{r#async::RecvStream, Receiver, RecvTimeoutError, Sender};
use futures_core::stream::Stream;
use std::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

/// The deliveries of one `basic.consume`.
///
/// Consume it as a [`Stream`], or block on [`next_delivery`](Consumer::next_delivery).
/// The stream ends once the consumer is canceled; if the channel fails, one
/// last error is yielded first. The handle keeps receiving across a channel
/// recovery, the consumer being re-registered under the same tag.
pub struct Consumer {
    tag: ShortString,
    queue: ShortString,
    receiver: Receiver<DeliveryResult>,
    stream: Pin<Box<RecvStream<'static, DeliveryResult>>>,
}

impl Consumer {
    pub(crate) fn new(tag: ShortString, queue: ShortString) -> (Self, ConsumerSink) {
        let (sender, receiver) = flume::unbounded();
        let stream = Box::pin(receiver.clone().into_stream());
        let sink = ConsumerSink {
            queue: queue.clone(),
            sender,
        };
        (
            Self {
                tag,
                queue,
                receiver,
                stream,
            },
            sink,
        )
    }

    pub fn tag(&self) -> &ShortString {
        &self.tag
    }

    pub fn queue(&self) -> &ShortString {
        &self.queue
    }

    /// Block until the next delivery. `None` once the consumer is canceled.
    pub fn next_delivery(&self) -> Option<Result<Delivery>> {
        self.receiver.recv().ok().and_then(Result::transpose)
    }

    /// Same as [`next_delivery`](Consumer::next_delivery), giving up after `timeout`.
    pub fn next_delivery_timeout(&self, timeout: Duration) -> Option<Result<Delivery>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(delivery) => delivery.transpose(),
            Err(RecvTimeoutError::Timeout) => Some(Err(ErrorKind::Timeout.into())),
            Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Stream for Consumer {
    type Item = Result<Delivery>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.stream.as_mut().poll_next(cx) {
            Poll::Ready(Some(delivery)) => Poll::Ready(delivery.transpose()),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("tag", &self.tag)
            .field("queue", &self.queue)
            .finish()
    }
}

/// The channel's end of a [`Consumer`].
#[derive(Clone)]
pub(crate) struct ConsumerSink {
    queue: ShortString,
    sender: Sender<DeliveryResult>,
}

impl ConsumerSink {
    pub(crate) fn queue(&self) -> &ShortString {
        &self.queue
    }

    pub(crate) fn deliver(&self, delivery: Delivery) {
        let _ = self.sender.send(Ok(Some(delivery)));
    }

    pub(crate) fn cancel(&self) {
        let _ = self.sender.send(Ok(None));
    }

    pub(crate) fn set_error(&self, error: crate::Error) {
        let _ = self.sender.send(Err(error));
        self.cancel();
    }
}

impl fmt::Debug for ConsumerSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerSink")
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use futures_lite::StreamExt;

    fn delivery(tag: u64) -> Delivery {
        Delivery::new(tag, "ctag".into(), "".into(), "q".into(), false)
    }

    #[test]
    fn stream_ends_on_cancel() {
        let (mut consumer, sink) = Consumer::new("ctag".into(), "q".into());
        sink.deliver(delivery(1));
        sink.cancel();
        futures_lite::future::block_on(async {
            assert_eq!(consumer.next().await, Some(Ok(delivery(1))));
            assert_eq!(consumer.next().await, None);
        });
    }

    #[test]
    fn error_then_end() {
        let (consumer, sink) = Consumer::new("ctag".into(), "q".into());
        sink.set_error(Error::connection_lost());
        assert_eq!(
            consumer.next_delivery(),
            Some(Err(Error::connection_lost()))
        );
        assert_eq!(consumer.next_delivery(), None);
    }

    #[test]
    fn timeout() {
        let (consumer, _sink) = Consumer::new("ctag".into(), "q".into());
        assert_eq!(
            consumer.next_delivery_timeout(Duration::from_millis(10)),
            Some(Err(ErrorKind::Timeout.into()))
        );
    }
}
