use crate::{
    frame::{Method, ReplyKind},
    promise::PromiseResolver,
    types::ChannelId,
    Error, ErrorKind, Promise, Result,
};
use parking_lot::Mutex;
use std::{collections::VecDeque, fmt, sync::Arc};
use tracing::{trace, warn};

/// Requests of one channel waiting for the broker's answer, oldest first.
///
/// AMQP answers synchronous requests in order, so the reply always matches
/// the front of the queue.
///
/// Each connection loss starts a new epoch: a unit that started before it
/// can no longer register a request, so nothing it sends can be taken for
/// an answer to the replay.
#[derive(Clone, Default)]
pub(crate) struct ExpectedReplies(Arc<Mutex<Inner>>);

#[derive(Default)]
struct Inner {
    epoch: u64,
    pending: VecDeque<ExpectedReply>,
}

struct ExpectedReply {
    kind: ReplyKind,
    resolver: PromiseResolver<Method>,
}

impl ExpectedReplies {
    pub(crate) fn epoch(&self) -> u64 {
        self.0.lock().epoch
    }

    /// Get ready for the answer to a request sent by a unit started in
    /// `epoch`, if the request gets one.
    pub(crate) fn expect(
        &self,
        epoch: u64,
        kind: Option<ReplyKind>,
    ) -> Result<Option<Promise<Method>>> {
        let mut inner = self.0.lock();
        if inner.epoch != epoch {
            return Err(Error::connection_lost());
        }
        Ok(kind.map(|kind| {
            let (promise, resolver) = Promise::new();
            inner.pending.push_back(ExpectedReply { kind, resolver });
            promise
        }))
    }

    /// Hand a reply to the request waiting for it.
    pub(crate) fn resolve(&self, channel_id: ChannelId, kind: ReplyKind, method: Method) -> Result<()> {
        let expected = self.0.lock().pending.pop_front();
        match expected {
            Some(expected) if expected.kind == kind => {
                trace!(channel = channel_id, method = method.name(), "got expected reply");
                expected.resolver.resolve(method);
                Ok(())
            }
            Some(expected) => {
                warn!(
                    channel = channel_id,
                    expected = ?expected.kind,
                    method = method.name(),
                    "unexpected reply",
                );
                let error: Error = ErrorKind::UnexpectedReply(channel_id, method.name()).into();
                expected.resolver.reject(error.clone());
                Err(error)
            }
            None => {
                warn!(channel = channel_id, method = method.name(), "reply without a request");
                Err(ErrorKind::UnexpectedReply(channel_id, method.name()).into())
            }
        }
    }

    /// Fail every pending request with `error`.
    pub(crate) fn cancel(&self, error: Error) {
        let expected = std::mem::take(&mut self.0.lock().pending);
        for reply in expected {
            reply.resolver.reject(error.clone());
        }
    }

    /// Fail every pending request and start a new epoch.
    pub(crate) fn reset(&self, error: Error) {
        let expected = {
            let mut inner = self.0.lock();
            inner.epoch += 1;
            std::mem::take(&mut inner.pending)
        };
        for reply in expected {
            reply.resolver.reject(error.clone());
        }
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.0.lock().pending.is_empty()
    }
}

impl fmt::Debug for ExpectedReplies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_tuple("ExpectedReplies");
        if let Some(inner) = self.0.try_lock() {
            debug.field(&inner.epoch).field(
                &inner
                    .pending
                    .iter()
                    .map(|reply| reply.kind)
                    .collect::<Vec<_>>(),
            );
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl ExpectedReplies {
        fn register(&self, kind: ReplyKind) -> Promise<Method> {
            self.expect(self.epoch(), Some(kind)).unwrap().unwrap()
        }
    }

    #[test]
    fn replies_resolve_in_order() {
        let replies = ExpectedReplies::default();
        let open = replies.register(ReplyKind::ChannelOpenOk);
        let qos = replies.register(ReplyKind::BasicQosOk);
        replies
            .resolve(1, ReplyKind::ChannelOpenOk, Method::ChannelOpenOk)
            .unwrap();
        replies
            .resolve(1, ReplyKind::BasicQosOk, Method::BasicQosOk)
            .unwrap();
        assert_eq!(open.try_wait(), Some(Ok(Method::ChannelOpenOk)));
        assert_eq!(qos.try_wait(), Some(Ok(Method::BasicQosOk)));
        assert!(replies.is_empty());
    }

    #[test]
    fn mismatch_fails_the_request() {
        let replies = ExpectedReplies::default();
        let open = replies.register(ReplyKind::ChannelOpenOk);
        let error: Error = ErrorKind::UnexpectedReply(1, "basic.qos-ok").into();
        assert_eq!(
            replies.resolve(1, ReplyKind::BasicQosOk, Method::BasicQosOk),
            Err(error.clone())
        );
        assert_eq!(open.try_wait(), Some(Err(error)));
    }

    #[test]
    fn cancel() {
        let replies = ExpectedReplies::default();
        let open = replies.register(ReplyKind::ChannelOpenOk);
        replies.cancel(Error::connection_lost());
        assert_eq!(open.try_wait(), Some(Err(Error::connection_lost())));
        assert!(replies.is_empty());
    }

    #[test]
    fn units_from_before_a_reset_cannot_register() {
        let replies = ExpectedReplies::default();
        let open = replies.register(ReplyKind::ChannelOpenOk);
        let stale = replies.epoch();
        replies.reset(Error::connection_lost());
        assert_eq!(open.try_wait(), Some(Err(Error::connection_lost())));
        assert_eq!(
            replies
                .expect(stale, Some(ReplyKind::BasicQosOk))
                .map(|reply| reply.is_some()),
            Err(Error::connection_lost())
        );
        assert!(replies.is_empty());

        let open = replies.register(ReplyKind::ChannelOpenOk);
        replies
            .resolve(1, ReplyKind::ChannelOpenOk, Method::ChannelOpenOk)
            .unwrap();
        assert_eq!(open.try_wait(), Some(Ok(Method::ChannelOpenOk)));
    }
}
