use crate::{
    consumer::ConsumerSink, message::Delivery, types::ShortString, BasicProperties, Error,
};
use parking_lot::Mutex;
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::warn;

/// The consumers of one channel, and the delivery being assembled.
#[derive(Clone, Default)]
pub(crate) struct Consumers(Arc<Mutex<Inner>>);

#[derive(Default)]
struct Inner {
    sinks: HashMap<ShortString, ConsumerSink>,
    current: Option<Delivery>,
}

impl Consumers {
    pub(crate) fn register(&self, tag: ShortString, sink: ConsumerSink) {
        self.0.lock().sinks.insert(tag, sink);
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, tag: &ShortString) -> bool {
        self.0.lock().sinks.contains_key(tag)
    }

    /// Forget a consumer and end its stream.
    pub(crate) fn deregister(&self, tag: &ShortString) {
        let sink = self.0.lock().sinks.remove(tag);
        if let Some(sink) = sink {
            sink.cancel();
        }
    }

    /// End every consumer reading from `queue`, as the broker does when it
    /// deletes the queue. Returns their tags.
    pub(crate) fn deregister_queue(&self, queue: &str) -> Vec<ShortString> {
        let removed = {
            let mut inner = self.0.lock();
            let tags = inner
                .sinks
                .iter()
                .filter(|(_, sink)| sink.queue().as_str() == queue)
                .map(|(tag, _)| tag.clone())
                .collect::<Vec<_>>();
            tags.into_iter()
                .filter_map(|tag| inner.sinks.remove(&tag).map(|sink| (tag, sink)))
                .collect::<Vec<_>>()
        };
        removed
            .into_iter()
            .map(|(tag, sink)| {
                sink.cancel();
                tag
            })
            .collect()
    }

    pub(crate) fn start_delivery(&self, delivery: Delivery) {
        let mut inner = self.0.lock();
        if let Some(previous) = inner.current.replace(delivery) {
            warn!(
                delivery_tag = previous.delivery_tag,
                "dropping incomplete delivery",
            );
        }
    }

    pub(crate) fn set_delivery_properties(&self, properties: BasicProperties) {
        if let Some(delivery) = self.0.lock().current.as_mut() {
            delivery.properties = properties;
        }
    }

    pub(crate) fn receive_delivery_content(&self, payload: Vec<u8>) {
        if let Some(delivery) = self.0.lock().current.as_mut() {
            delivery.receive_content(payload);
        }
    }

    /// Hand the assembled delivery over to its consumer.
    pub(crate) fn complete_delivery(&self) {
        let mut inner = self.0.lock();
        if let Some(delivery) = inner.current.take() {
            match inner.sinks.get(&delivery.consumer_tag) {
                Some(sink) => sink.deliver(delivery),
                None => warn!(
                    consumer_tag = %delivery.consumer_tag.as_str(),
                    delivery_tag = delivery.delivery_tag,
                    "delivery for an unknown consumer, dropping it",
                ),
            }
        }
    }

    /// A connection loss interrupted the reception: the broker will redeliver.
    pub(crate) fn drop_partial_delivery(&self) {
        self.0.lock().current = None;
    }

    pub(crate) fn cancel(&self) {
        let sinks = std::mem::take(&mut self.0.lock().sinks);
        for (_, sink) in sinks {
            sink.cancel();
        }
    }

    pub(crate) fn error(&self, error: Error) {
        let sinks = {
            let mut inner = self.0.lock();
            inner.current = None;
            std::mem::take(&mut inner.sinks)
        };
        for (_, sink) in sinks {
            sink.set_error(error.clone());
        }
    }
}

impl fmt::Debug for Consumers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_tuple("Consumers");
        if let Some(inner) = self.0.try_lock() {
            debug.field(&inner.sinks);
        }
        debug.finish()
    }
}
