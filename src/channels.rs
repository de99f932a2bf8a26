use crate::{
    channel_allocator::ChannelAllocator,
    frame::Frame,
    name_generator::NameGenerator,
    recovery_config::RecoveryConfig,
    topology::TopologyDefinition,
    transport::FrameWriter,
    types::{ChannelId, ReplyCode},
    Channel, Configuration, Error, ErrorKind, Promise, Result,
};
use executor_trait::FullExecutor;
use parking_lot::Mutex;
use std::{collections::HashMap, fmt, future::Future, sync::Arc};
use tracing::{debug, trace, warn};

/// The channels of one connection, by number.
#[derive(Clone)]
pub(crate) struct Channels {
    inner: Arc<Mutex<Inner>>,
    allocator: ChannelAllocator,
    configuration: Configuration,
    writer: FrameWriter,
    executor: Arc<dyn FullExecutor + Send + Sync>,
    recovery_config: RecoveryConfig,
    name_generator: Arc<dyn NameGenerator>,
}

impl Channels {
    pub(crate) fn new(
        configuration: Configuration,
        writer: FrameWriter,
        executor: Arc<dyn FullExecutor + Send + Sync>,
        recovery_config: RecoveryConfig,
        name_generator: Arc<dyn NameGenerator>,
    ) -> Self {
        Self {
            inner: Arc::default(),
            allocator: ChannelAllocator::new(configuration.channel_max()),
            configuration,
            writer,
            executor,
            recovery_config,
            name_generator,
        }
    }

    /// Allocate a number and register a new, unopened channel under it.
    pub(crate) fn create(&self) -> Result<Channel> {
        let id = self.allocator.allocate()?;
        debug!(channel = id, "create channel");
        let channel = Channel::new(
            id,
            self.configuration.clone(),
            self.allocator.clone(),
            self.writer.clone(),
            &self.executor,
            self.recovery_config.clone(),
            self.name_generator.clone(),
        );
        let mut inner = self.inner.lock();
        inner.prune();
        inner.channels.insert(id, channel.clone());
        Ok(channel)
    }

    pub(crate) fn get(&self, id: ChannelId) -> Option<Channel> {
        self.inner.lock().channels.get(&id).cloned()
    }

    /// The channels that are not closed yet, by ascending number.
    pub(crate) fn list(&self) -> Vec<Channel> {
        let mut inner = self.inner.lock();
        inner.prune();
        let mut channels = inner.channels.values().cloned().collect::<Vec<_>>();
        channels.sort_by_key(Channel::id);
        channels
    }

    pub(crate) fn allocator(&self) -> &ChannelAllocator {
        &self.allocator
    }

    pub(crate) fn handle_frame(&self, id: ChannelId, frame: Frame) -> Result<()> {
        trace!(channel = id, ?frame, "will handle frame");
        match self.get(id) {
            Some(channel) => channel.handle_frame(frame),
            None => {
                warn!(channel = id, "frame received on an unknown channel");
                Err(ErrorKind::InvalidChannel(id).into())
            }
        }
    }

    pub(crate) fn connection_lost(&self, cause: Error) {
        for channel in self.list() {
            channel.connection_lost(cause.clone());
        }
    }

    /// Start the replay of every channel waiting for it. They recover
    /// concurrently, each on its own queue.
    pub(crate) fn recover_all(&self) -> Promise<()> {
        let recoveries = self
            .list()
            .into_iter()
            .filter(|channel| channel.status().recovering())
            .map(|channel| channel.recover())
            .collect::<Vec<_>>();
        self.join(recoveries)
    }

    pub(crate) fn close_all(&self, reply_code: ReplyCode, reply_text: &str) -> Promise<()> {
        let closings = self
            .list()
            .into_iter()
            .map(|channel| channel.close(reply_code, reply_text))
            .collect::<Vec<_>>();
        self.join(closings)
    }

    pub(crate) fn topology(&self) -> TopologyDefinition {
        TopologyDefinition {
            channels: self.list().iter().map(Channel::definition).collect(),
        }
    }

    /// Resolves once all of `operations` did, with the first failure if any.
    ///
    /// Each operation is driven by its own task, so a stuck one does not hold
    /// back the others.
    fn join<F>(&self, operations: Vec<F>) -> Promise<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let (promise, resolver) = Promise::new();
        let (sender, outcomes) = flume::unbounded();
        for operation in operations {
            let sender = sender.clone();
            self.executor.spawn(Box::pin(async move {
                let _ = sender.send(operation.await);
            }));
        }
        drop(sender);
        self.executor.spawn(Box::pin(async move {
            let mut res = Ok(());
            // Ends once every operation task dropped its sender.
            while let Ok(outcome) = outcomes.recv_async().await {
                if let Err(error) = outcome {
                    if res.is_ok() {
                        res = Err(error);
                    }
                }
            }
            resolver.complete(res);
        }));
        promise
    }
}

impl fmt::Debug for Channels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Channels");
        if let Some(inner) = self.inner.try_lock() {
            debug.field("channels", &inner.channels.values());
        }
        debug
            .field("allocator", &self.allocator)
            .field("configuration", &self.configuration)
            .field("recovery_config", &self.recovery_config)
            .finish()
    }
}

#[derive(Default)]
struct Inner {
    channels: HashMap<ChannelId, Channel>,
}

impl Inner {
    fn prune(&mut self) {
        self.channels.retain(|_, channel| !channel.status().closed());
    }
}
