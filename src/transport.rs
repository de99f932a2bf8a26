use crate::{error_handler::ErrorHandler, frame::Frame, types::ChannelId, Error, Result};
use parking_lot::Mutex;
use std::{fmt, sync::Arc};
use tracing::{error, trace};

/// The write half of the connection, provided by the socket layer.
///
/// Encoding the frame and putting it on the wire is the implementor's job.
/// A failure means the connection is gone.
pub trait Transport: Send + Sync {
    fn write_frame(&self, channel_id: ChannelId, frame: Frame) -> Result<()>;
}

/// The single critical section every channel writes through.
///
/// Holding the lock for a whole batch keeps the frames of one publish (method,
/// header, bodies) contiguous on the wire.
#[derive(Clone)]
pub(crate) struct FrameWriter {
    transport: Arc<Mutex<Arc<dyn Transport>>>,
    error_handler: ErrorHandler,
}

impl FrameWriter {
    pub(crate) fn new(transport: Arc<dyn Transport>, error_handler: ErrorHandler) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            error_handler,
        }
    }

    pub(crate) fn write(&self, channel_id: ChannelId, frame: Frame) -> Result<()> {
        self.write_all(channel_id, vec![frame])
    }

    pub(crate) fn write_all(&self, channel_id: ChannelId, frames: Vec<Frame>) -> Result<()> {
        let res = {
            let transport = self.transport.lock();
            frames.into_iter().try_for_each(|frame| {
                trace!(channel = channel_id, ?frame, "writing frame");
                transport.write_frame(channel_id, frame)
            })
        };
        res.map_err(|err| {
            error!(channel = channel_id, error = %err, "failed to write frame");
            self.error_handler.on_error(err);
            Error::connection_lost()
        })
    }

    /// Swap in the transport of a new connection.
    pub(crate) fn set_transport(&self, transport: Arc<dyn Transport>) {
        *self.transport.lock() = transport;
    }
}

impl fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameWriter").finish()
    }
}
