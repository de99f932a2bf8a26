use crate::{
    promise::PromiseResolver,
    publisher_confirm::Confirmation,
    types::{ChannelId, DeliveryTag},
    Error, ErrorKind, Result,
};
use parking_lot::Mutex;
use std::{collections::BTreeMap, fmt, sync::Arc};
use tracing::{debug, trace};

/// Publisher confirms bookkeeping of one channel.
///
/// Pending entries are removed under the lock and their handles are completed
/// once the lock is released, so an entry is resolved exactly once whichever
/// of ack, nack, channel closure or connection loss gets to it first.
#[derive(Clone)]
pub(crate) struct Confirmations {
    channel_id: ChannelId,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    enabled: bool,
    next_tag: DeliveryTag,
    pending: BTreeMap<DeliveryTag, PromiseResolver<Confirmation>>,
    idle_waiters: Vec<PromiseResolver<()>>,
}

type Resolved = Vec<(DeliveryTag, PromiseResolver<Confirmation>)>;

impl Confirmations {
    pub(crate) fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            inner: Default::default(),
        }
    }

    /// Turn confirm mode on, delivery tags starting over at 1.
    pub(crate) fn enable(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.enabled {
            return Err(ErrorKind::ConfirmsAlreadyEnabled(self.channel_id).into());
        }
        inner.enabled = true;
        inner.next_tag = 1;
        trace!(channel = self.channel_id, "publisher confirms enabled");
        Ok(())
    }

    pub(crate) fn enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    /// Assign the next delivery tag to a publish about to be written.
    ///
    /// Outside of confirm mode the handle is resolved right away and no tag is
    /// consumed.
    pub(crate) fn track(&self, handle: PromiseResolver<Confirmation>) -> Option<DeliveryTag> {
        let mut inner = self.inner.lock();
        if !inner.enabled {
            drop(inner);
            handle.resolve(Confirmation::NotRequested);
            return None;
        }
        let tag = inner.next_tag;
        inner.next_tag += 1;
        inner.pending.insert(tag, handle);
        Some(tag)
    }

    pub(crate) fn resolve_ack(&self, delivery_tag: DeliveryTag, multiple: bool) -> Result<()> {
        self.resolve(delivery_tag, multiple, Confirmation::Ack)
    }

    pub(crate) fn resolve_nack(&self, delivery_tag: DeliveryTag, multiple: bool) -> Result<()> {
        self.resolve(delivery_tag, multiple, Confirmation::Nack)
    }

    /// Fail the entry of a publish that never made it to the wire.
    pub(crate) fn fail(&self, delivery_tag: DeliveryTag, error: Error) {
        let (handle, waiters) = {
            let mut inner = self.inner.lock();
            let handle = inner.pending.remove(&delivery_tag);
            (handle, inner.take_idle_waiters())
        };
        if let Some(handle) = handle {
            handle.reject(error);
        }
        notify(waiters);
    }

    /// Resolve every pending entry with `error`. Calling it again is a no-op.
    pub(crate) fn fail_all_outstanding(&self, error: Error) {
        let (resolved, waiters) = {
            let mut inner = self.inner.lock();
            let pending = std::mem::take(&mut inner.pending);
            (pending, inner.take_idle_waiters())
        };
        if !resolved.is_empty() {
            debug!(
                channel = self.channel_id,
                count = resolved.len(),
                %error,
                "failing outstanding publisher confirms",
            );
        }
        for (_, handle) in resolved {
            handle.reject(error.clone());
        }
        notify(waiters);
    }

    /// Leave confirm mode; the next `enable` restarts the tag sequence.
    pub(crate) fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.enabled = false;
        inner.next_tag = 0;
    }

    /// Complete `resolver` once nothing is waiting for a confirmation anymore.
    pub(crate) fn notify_when_idle(&self, resolver: PromiseResolver<()>) {
        let mut inner = self.inner.lock();
        if inner.pending.is_empty() {
            drop(inner);
            resolver.resolve(());
        } else {
            inner.idle_waiters.push(resolver);
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    fn resolve(
        &self,
        delivery_tag: DeliveryTag,
        multiple: bool,
        confirmation: Confirmation,
    ) -> Result<()> {
        let (resolved, waiters) = {
            let mut inner = self.inner.lock();
            let resolved = if multiple {
                inner.take_up_to(delivery_tag)
            } else {
                let handle = inner
                    .pending
                    .remove(&delivery_tag)
                    .ok_or(ErrorKind::InvalidAck(delivery_tag))?;
                vec![(delivery_tag, handle)]
            };
            (resolved, inner.take_idle_waiters())
        };
        for (tag, handle) in resolved {
            trace!(channel = self.channel_id, delivery_tag = tag, ?confirmation, "publish confirmed");
            handle.resolve(confirmation.clone());
        }
        notify(waiters);
        Ok(())
    }
}

impl Inner {
    fn take_up_to(&mut self, delivery_tag: DeliveryTag) -> Resolved {
        let rest = match delivery_tag.checked_add(1) {
            Some(next) => self.pending.split_off(&next),
            None => BTreeMap::new(),
        };
        std::mem::replace(&mut self.pending, rest)
            .into_iter()
            .collect()
    }

    fn take_idle_waiters(&mut self) -> Vec<PromiseResolver<()>> {
        if self.pending.is_empty() {
            std::mem::take(&mut self.idle_waiters)
        } else {
            Vec::new()
        }
    }
}

fn notify(waiters: Vec<PromiseResolver<()>>) {
    for waiter in waiters {
        waiter.resolve(());
    }
}

impl fmt::Debug for Confirmations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Confirmations");
        debug.field("channel_id", &self.channel_id);
        if let Some(inner) = self.inner.try_lock() {
            debug
                .field("enabled", &inner.enabled)
                .field("next_tag", &inner.next_tag)
                .field("pending", &inner.pending.keys().collect::<Vec<_>>());
        }
        debug.finish()
    }
}
