use crate::topology::Declaration;
use parking_lot::Mutex;
use std::{fmt, sync::Arc};

/// The declarations of one channel that recovery has to replay, in the order
/// they were made.
///
/// Only what the broker accepted gets recorded. Deleting, unbinding or
/// canceling something removes it, so that the log always describes what
/// currently exists.
#[derive(Clone, Default)]
pub(crate) struct ReplayLog(Arc<Mutex<Vec<Declaration>>>);

impl ReplayLog {
    pub(crate) fn record(&self, declaration: Declaration) {
        let mut log = self.0.lock();
        match log
            .iter_mut()
            .find(|recorded| same_entity(recorded, &declaration))
        {
            Some(recorded) => *recorded = declaration,
            None => log.push(declaration),
        }
    }

    pub(crate) fn forget_exchange(&self, name: &str) {
        self.0.lock().retain(|declaration| match declaration {
            Declaration::Exchange { name: n, .. } => n.as_str() != name,
            Declaration::ExchangeBinding {
                destination,
                source,
                ..
            } => destination.as_str() != name && source.as_str() != name,
            Declaration::QueueBinding { exchange, .. } => exchange.as_str() != name,
            _ => true,
        });
    }

    pub(crate) fn forget_exchange_binding(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
    ) {
        self.0.lock().retain(|declaration| {
            !matches!(declaration, Declaration::ExchangeBinding { destination: d, source: s, routing_key: r, .. }
                if d.as_str() == destination && s.as_str() == source && r.as_str() == routing_key)
        });
    }

    pub(crate) fn forget_queue(&self, name: &str) {
        self.0.lock().retain(|declaration| match declaration {
            Declaration::Queue { name: n, .. } => n.as_str() != name,
            Declaration::QueueBinding { queue, .. } => queue.as_str() != name,
            Declaration::Consumer { queue, .. } => queue.as_str() != name,
            _ => true,
        });
    }

    pub(crate) fn forget_queue_binding(&self, queue: &str, exchange: &str, routing_key: &str) {
        self.0.lock().retain(|declaration| {
            !matches!(declaration, Declaration::QueueBinding { queue: q, exchange: e, routing_key: r, .. }
                if q.as_str() == queue && e.as_str() == exchange && r.as_str() == routing_key)
        });
    }

    pub(crate) fn forget_consumer(&self, tag: &str) {
        self.0.lock().retain(
            |declaration| !matches!(declaration, Declaration::Consumer { tag: t, .. } if t.as_str() == tag),
        );
    }

    pub(crate) fn snapshot(&self) -> Vec<Declaration> {
        self.0.lock().clone()
    }
}

fn same_entity(left: &Declaration, right: &Declaration) -> bool {
    use Declaration::*;

    match (left, right) {
        (Exchange { name: l, .. }, Exchange { name: r, .. }) => l == r,
        (Queue { name: l, .. }, Queue { name: r, .. }) => l == r,
        (
            ExchangeBinding {
                destination: ld,
                source: ls,
                routing_key: lr,
                ..
            },
            ExchangeBinding {
                destination: rd,
                source: rs,
                routing_key: rr,
                ..
            },
        ) => ld == rd && ls == rs && lr == rr,
        (
            QueueBinding {
                queue: lq,
                exchange: le,
                routing_key: lr,
                ..
            },
            QueueBinding {
                queue: rq,
                exchange: re,
                routing_key: rr,
                ..
            },
        ) => lq == rq && le == re && lr == rr,
        (Qos { options: l, .. }, Qos { options: r, .. }) => l.global == r.global,
        (Consumer { tag: l, .. }, Consumer { tag: r, .. }) => l == r,
        _ => false,
    }
}

impl fmt::Debug for ReplayLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_tuple("ReplayLog");
        if let Some(log) = self.0.try_lock() {
            debug.field(&*log);
        }
        debug.finish()
    }
}
