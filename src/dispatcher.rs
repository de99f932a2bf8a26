use crate::{types::ChannelId, Error, Promise, Result};
use executor_trait::FullExecutor;
use flume::{Receiver, Sender};
use futures_core::future::BoxFuture;
use parking_lot::Mutex;
use std::{fmt, future::Future, sync::Arc};
use tracing::{trace, warn};

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
type Cancel = Box<dyn FnOnce(Error) + Send>;

/// Which of the two queues of a channel this is, for logging purposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DispatcherKind {
    Commands,
    Recovery,
}

/// Serialized executor for the work of one channel.
///
/// Units run one at a time, in the order they were enqueued. Distinct
/// dispatchers run concurrently on the executor with no ordering between them.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    sender: Sender<Option<Unit>>,
    wakeup: Sender<()>,
    shared: Arc<Shared>,
}

struct Shared {
    channel_id: ChannelId,
    kind: DispatcherKind,
    receiver: Receiver<Option<Unit>>,
    wakeup: Receiver<()>,
    state: Mutex<State>,
}

struct Unit {
    epoch: u64,
    job: Job,
    cancel: Cancel,
}

struct State {
    mode: Mode,
    // Bumped each time pending work gets failed: units from an older epoch
    // are cancelled instead of run.
    epoch: u64,
    failure: Option<Error>,
}

#[derive(Clone, Debug)]
enum Mode {
    Running,
    Suspended,
    Closed(Error),
}

impl Dispatcher {
    pub(crate) fn new(
        channel_id: ChannelId,
        kind: DispatcherKind,
        executor: &Arc<dyn FullExecutor + Send + Sync>,
    ) -> Self {
        let (sender, receiver) = flume::unbounded();
        let (wakeup, wakeup_receiver) = flume::unbounded();
        let shared = Arc::new(Shared {
            channel_id,
            kind,
            receiver,
            wakeup: wakeup_receiver,
            state: Mutex::new(State {
                mode: Mode::Running,
                epoch: 0,
                failure: None,
            }),
        });
        executor.spawn(Box::pin(shared.clone().run()));
        Self {
            sender,
            wakeup,
            shared,
        }
    }

    /// Queue a unit of work and return immediately.
    ///
    /// The returned promise resolves with the outcome of the unit, or with the
    /// error that prevented it from running.
    pub(crate) fn enqueue<T, F, Fut>(&self, task: F) -> Promise<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (promise, resolver) = Promise::new();
        let canceler = resolver.clone();
        self.push(
            move || -> BoxFuture<'static, ()> {
                Box::pin(async move {
                    resolver.complete(task().await);
                })
            },
            move |error| canceler.reject(error),
        );
        promise
    }

    /// Queue a unit of work and wait for its completion.
    ///
    /// The unit is queued right away, not when the returned future is first
    /// polled.
    pub(crate) fn enqueue_and_await<T, F, Fut>(
        &self,
        task: F,
    ) -> impl Future<Output = Result<T>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let promise = self.enqueue(task);
        async move { promise.await }
    }

    /// Queue a raw unit: exactly one of `job` or `cancel` will be called.
    pub(crate) fn push<J, C>(&self, job: J, cancel: C)
    where
        J: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
        C: FnOnce(Error) + Send + 'static,
    {
        let state = self.shared.state.lock();
        if let Mode::Closed(error) = &state.mode {
            let error = error.clone();
            drop(state);
            cancel(error);
            return;
        }
        let unit = Unit {
            epoch: state.epoch,
            job: Box::new(job),
            cancel: Box::new(cancel),
        };
        // The worker holds on to the receiver for as long as we live.
        let _ = self.sender.send(Some(unit));
    }

    /// Stop running units; new ones keep accumulating until `resume`.
    pub(crate) fn suspend(&self) {
        let mut state = self.shared.state.lock();
        if let Mode::Running = state.mode {
            trace!(channel = self.shared.channel_id, kind = ?self.shared.kind, "suspending dispatcher");
            state.mode = Mode::Suspended;
        }
    }

    pub(crate) fn resume(&self) {
        let mut state = self.shared.state.lock();
        if let Mode::Suspended = state.mode {
            trace!(channel = self.shared.channel_id, kind = ?self.shared.kind, "resuming dispatcher");
            state.mode = Mode::Running;
            drop(state);
            self.wake();
        }
    }

    /// Fail every unit queued so far with `error`, keep accepting new ones.
    pub(crate) fn fail_pending(&self, error: Error) {
        let units = {
            let mut state = self.shared.state.lock();
            if let Mode::Closed(_) = state.mode {
                return;
            }
            state.epoch += 1;
            state.failure = Some(error.clone());
            self.drain()
        };
        self.cancel_all(units, error);
        self.wake();
    }

    /// Fail every queued unit with `error` and reject everything enqueued later.
    pub(crate) fn close(&self, error: Error) {
        let units = {
            let mut state = self.shared.state.lock();
            if let Mode::Closed(_) = state.mode {
                return;
            }
            trace!(channel = self.shared.channel_id, kind = ?self.shared.kind, %error, "closing dispatcher");
            state.mode = Mode::Closed(error.clone());
            let units = self.drain();
            let _ = self.sender.send(None);
            units
        };
        self.cancel_all(units, error);
        self.wake();
    }

    pub(crate) fn pending(&self) -> usize {
        self.shared.receiver.len()
    }

    fn drain(&self) -> Vec<Unit> {
        self.shared.receiver.drain().flatten().collect()
    }

    fn cancel_all(&self, units: Vec<Unit>, error: Error) {
        if !units.is_empty() {
            warn!(
                channel = self.shared.channel_id,
                kind = ?self.shared.kind,
                count = units.len(),
                %error,
                "failing queued units",
            );
        }
        for unit in units {
            (unit.cancel)(error.clone());
        }
    }

    fn wake(&self) {
        let _ = self.wakeup.send(());
    }
}

impl Shared {
    async fn run(self: Arc<Self>) {
        while let Ok(Some(unit)) = self.receiver.recv_async().await {
            match self.wait_turn(unit.epoch).await {
                Ok(()) => (unit.job)().await,
                Err(error) => (unit.cancel)(error),
            }
        }
        trace!(channel = self.channel_id, kind = ?self.kind, "dispatcher stopped");
    }

    async fn wait_turn(&self, epoch: u64) -> Result<()> {
        loop {
            {
                let state = self.state.lock();
                if epoch != state.epoch {
                    return Err(state.failure.clone().unwrap_or_else(Error::connection_lost));
                }
                match &state.mode {
                    Mode::Running => return Ok(()),
                    Mode::Closed(error) => return Err(error.clone()),
                    Mode::Suspended => {}
                }
            }
            if self.wakeup.recv_async().await.is_err() {
                // Every handle is gone, nobody will ever resume us.
                return Err(Error::connection_lost());
            }
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Dispatcher");
        debug
            .field("channel_id", &self.shared.channel_id)
            .field("kind", &self.shared.kind)
            .field("pending", &self.pending());
        if let Some(state) = self.shared.state.try_lock() {
            debug.field("mode", &state.mode);
        }
        debug.finish()
    }
}
