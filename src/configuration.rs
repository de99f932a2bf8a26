use crate::{
    frame::{FRAME_MIN_SIZE, FRAME_OVERHEAD},
    types::{ChannelId, FrameSize},
};
use std::{
    fmt,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// The tuning values negotiated with the broker.
#[derive(Clone, Default)]
pub struct Configuration {
    inner: Arc<RwLock<Inner>>,
}

impl Configuration {
    pub(crate) fn new(channel_max: ChannelId, frame_max: FrameSize) -> Self {
        let configuration = Self::default();
        configuration.set_channel_max(channel_max);
        configuration.set_frame_max(frame_max);
        configuration
    }

    pub fn channel_max(&self) -> ChannelId {
        self.read_inner().channel_max
    }

    pub(crate) fn set_channel_max(&self, channel_max: ChannelId) {
        self.write_inner().channel_max = channel_max;
    }

    /// 0 means no limit.
    pub fn frame_max(&self) -> FrameSize {
        self.read_inner().frame_max
    }

    pub(crate) fn set_frame_max(&self, frame_max: FrameSize) {
        let frame_max = if frame_max == 0 {
            0
        } else {
            std::cmp::max(frame_max, FRAME_MIN_SIZE)
        };
        self.write_inner().frame_max = frame_max;
    }

    /// The largest body chunk that fits in a single frame.
    pub fn max_content_body_size(&self) -> usize {
        match self.frame_max() {
            0 => usize::MAX,
            frame_max => (frame_max - FRAME_OVERHEAD) as usize,
        }
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Default)]
struct Inner {
    channel_max: ChannelId,
    frame_max: FrameSize,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read_inner();
        f.debug_struct("Configuration")
            .field("channel_max", &inner.channel_max)
            .field("frame_max", &inner.frame_max)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_body_size() {
        let configuration = Configuration::new(2047, 131_072);
        assert_eq!(configuration.max_content_body_size(), 131_064);
        configuration.set_frame_max(1024);
        assert_eq!(configuration.frame_max(), FRAME_MIN_SIZE);
        assert_eq!(configuration.max_content_body_size(), 4088);
        configuration.set_frame_max(0);
        assert_eq!(configuration.max_content_body_size(), usize::MAX);
    }
}
