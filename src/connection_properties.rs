use crate::{
    name_generator::{DefaultNameGenerator, NameGenerator},
    recovery_config::RecoveryConfig,
    types::{ChannelId, FrameSize},
};
use executor_trait::FullExecutor;
use std::{fmt, sync::Arc};

/// How the channel layer of a connection behaves.
///
/// `channel_max` and `frame_max` are the values negotiated during the
/// connection handshake.
#[derive(Clone)]
pub struct ConnectionProperties {
    pub(crate) executor: Option<Arc<dyn FullExecutor + Send + Sync>>,
    pub(crate) channel_max: ChannelId,
    pub(crate) frame_max: FrameSize,
    pub(crate) recovery_config: RecoveryConfig,
    pub(crate) name_generator: Arc<dyn NameGenerator>,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            executor: default_executor(),
            channel_max: 2047,
            frame_max: 131_072,
            recovery_config: RecoveryConfig::default(),
            name_generator: Arc::new(DefaultNameGenerator::new()),
        }
    }
}

#[cfg(feature = "default-runtime")]
fn default_executor() -> Option<Arc<dyn FullExecutor + Send + Sync>> {
    Some(Arc::new(async_global_executor_trait::AsyncGlobalExecutor))
}

#[cfg(not(feature = "default-runtime"))]
fn default_executor() -> Option<Arc<dyn FullExecutor + Send + Sync>> {
    None
}

impl ConnectionProperties {
    #[must_use]
    pub fn with_executor<E: FullExecutor + Send + Sync + 'static>(mut self, executor: E) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// 0 means no limit other than the protocol's.
    #[must_use]
    pub fn with_channel_max(mut self, channel_max: ChannelId) -> Self {
        self.channel_max = channel_max;
        self
    }

    #[must_use]
    pub fn with_frame_max(mut self, frame_max: FrameSize) -> Self {
        self.frame_max = frame_max;
        self
    }

    #[must_use]
    pub fn with_recovery_config(mut self, config: RecoveryConfig) -> Self {
        self.recovery_config = config;
        self
    }

    /// Use another source of queue names and consumer tags.
    #[must_use]
    pub fn with_name_generator<G: NameGenerator + 'static>(mut self, generator: G) -> Self {
        self.name_generator = Arc::new(generator);
        self
    }
}

impl fmt::Debug for ConnectionProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProperties")
            .field("channel_max", &self.channel_max)
            .field("frame_max", &self.frame_max)
            .field("recovery_config", &self.recovery_config)
            .field("name_generator", &self.name_generator)
            .finish()
    }
}
