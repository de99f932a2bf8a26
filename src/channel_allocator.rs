use crate::{types::ChannelId, ErrorKind, Result};
use parking_lot::Mutex;
use std::{collections::BTreeSet, fmt, sync::Arc};
use tracing::trace;

/// Pool of channel numbers for one connection.
///
/// Numbers are handed out lowest-free-first in `1..=channel_max`, channel 0
/// being reserved for the connection itself. Everything above the high-water
/// mark is implicitly free, so the bookkeeping only grows with the number of
/// channels that were open at the same time.
#[derive(Clone)]
pub struct ChannelAllocator {
    inner: Arc<Mutex<Inner>>,
}

impl ChannelAllocator {
    pub fn new(channel_max: ChannelId) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new(channel_max))),
        }
    }

    /// Reserve the lowest channel number not currently in use.
    pub fn allocate(&self) -> Result<ChannelId> {
        let id = self.inner.lock().allocate()?;
        trace!(channel = id, "allocated channel number");
        Ok(id)
    }

    /// Give a channel number back to the pool.
    pub fn release(&self, id: ChannelId) -> Result<()> {
        self.inner.lock().release(id)?;
        trace!(channel = id, "released channel number");
        Ok(())
    }

    pub fn is_allocated(&self, id: ChannelId) -> bool {
        self.inner.lock().is_allocated(id)
    }

    pub fn allocated_count(&self) -> usize {
        let inner = self.inner.lock();
        usize::from(inner.watermark) - inner.released.len()
    }

    pub fn channel_max(&self) -> ChannelId {
        self.inner.lock().channel_max
    }

    /// Apply a freshly negotiated channel-max, 0 meaning "no limit".
    ///
    /// Numbers already handed out stay valid even above the new limit.
    pub(crate) fn set_channel_max(&self, channel_max: ChannelId) {
        self.inner.lock().channel_max = normalize(channel_max);
    }
}

fn normalize(channel_max: ChannelId) -> ChannelId {
    if channel_max == 0 {
        ChannelId::MAX
    } else {
        channel_max
    }
}

struct Inner {
    channel_max: ChannelId,
    watermark: ChannelId,
    released: BTreeSet<ChannelId>,
}

impl Inner {
    fn new(channel_max: ChannelId) -> Self {
        Self {
            channel_max: normalize(channel_max),
            watermark: 0,
            released: BTreeSet::new(),
        }
    }

    fn allocate(&mut self) -> Result<ChannelId> {
        if let Some(id) = self
            .released
            .first()
            .copied()
            .filter(|id| *id <= self.channel_max)
        {
            self.released.remove(&id);
            return Ok(id);
        }
        if self.watermark < self.channel_max {
            self.watermark += 1;
            return Ok(self.watermark);
        }
        Err(ErrorKind::ChannelsLimitReached.into())
    }

    fn release(&mut self, id: ChannelId) -> Result<()> {
        if !self.is_allocated(id) {
            return Err(ErrorKind::InvalidChannelRelease(id).into());
        }
        if id == self.watermark {
            self.watermark -= 1;
            while self.watermark > 0 && self.released.remove(&self.watermark) {
                self.watermark -= 1;
            }
        } else {
            self.released.insert(id);
        }
        Ok(())
    }

    fn is_allocated(&self, id: ChannelId) -> bool {
        id != 0 && id <= self.watermark && !self.released.contains(&id)
    }
}

impl fmt::Debug for ChannelAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ChannelAllocator");
        if let Some(inner) = self.inner.try_lock() {
            debug
                .field("channel_max", &inner.channel_max)
                .field("watermark", &inner.watermark)
                .field("released", &inner.released);
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::{collections::HashSet, thread};

    #[test]
    fn lowest_free_first() {
        let allocator = ChannelAllocator::new(10);
        for i in 1..=5 {
            assert_eq!(allocator.allocate(), Ok(i));
        }
        allocator.release(2).unwrap();
        allocator.release(4).unwrap();
        assert_eq!(allocator.allocate(), Ok(2));
        assert_eq!(allocator.allocate(), Ok(4));
        assert_eq!(allocator.allocate(), Ok(6));
    }

    #[test]
    fn exhaustion_and_reuse() {
        let allocator = ChannelAllocator::new(3);
        assert_eq!(allocator.allocate(), Ok(1));
        assert_eq!(allocator.allocate(), Ok(2));
        assert_eq!(allocator.allocate(), Ok(3));
        assert_eq!(
            allocator.allocate(),
            Err(Error::from(ErrorKind::ChannelsLimitReached))
        );
        allocator.release(2).unwrap();
        assert_eq!(allocator.allocate(), Ok(2));
    }

    #[test]
    fn releasing_the_top_shrinks_the_watermark() {
        let allocator = ChannelAllocator::new(10);
        for _ in 1..=4 {
            allocator.allocate().unwrap();
        }
        allocator.release(3).unwrap();
        allocator.release(4).unwrap();
        assert_eq!(allocator.inner.lock().watermark, 2);
        assert!(allocator.inner.lock().released.is_empty());
        assert_eq!(allocator.allocated_count(), 2);
        assert_eq!(allocator.allocate(), Ok(3));
    }

    #[test]
    fn invalid_release() {
        let allocator = ChannelAllocator::new(10);
        let id = allocator.allocate().unwrap();
        assert_eq!(
            allocator.release(0),
            Err(ErrorKind::InvalidChannelRelease(0).into())
        );
        assert_eq!(
            allocator.release(7),
            Err(ErrorKind::InvalidChannelRelease(7).into())
        );
        allocator.release(id).unwrap();
        assert_eq!(
            allocator.release(id),
            Err(ErrorKind::InvalidChannelRelease(id).into())
        );
    }

    #[test]
    fn zero_means_no_limit() {
        let allocator = ChannelAllocator::new(0);
        assert_eq!(allocator.channel_max(), ChannelId::MAX);
        allocator.set_channel_max(2);
        assert_eq!(allocator.channel_max(), 2);
    }

    #[test]
    fn concurrent_allocations_are_distinct_and_in_range() {
        let allocator = ChannelAllocator::new(2047);
        let handles = (0..8)
            .map(|_| {
                let allocator = allocator.clone();
                thread::spawn(move || {
                    (0..200)
                        .map(|_| allocator.allocate().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!((1..=2047).contains(&id));
                assert!(seen.insert(id), "channel {} handed out twice", id);
            }
        }
        assert_eq!(seen.len(), 1600);
    }
}
