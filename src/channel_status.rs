use crate::{
    channel_receiver_state::ChannelReceiverStates,
    types::{ChannelId, Identifier, PayloadSize, ShortString},
    Error, Result,
};
use parking_lot::Mutex;
use std::{fmt, sync::Arc};
use tracing::trace;

#[derive(Clone, Default)]
pub struct ChannelStatus(Arc<Mutex<Inner>>);

impl ChannelStatus {
    pub fn initializing(&self) -> bool {
        self.0.lock().state == ChannelState::Initial
    }

    pub fn connected(&self) -> bool {
        self.0.lock().state == ChannelState::Connected
    }

    pub fn recovering(&self) -> bool {
        self.0.lock().state == ChannelState::Recovering
    }

    pub fn closing(&self) -> bool {
        self.0.lock().state == ChannelState::Closing
    }

    pub fn closed(&self) -> bool {
        self.0.lock().state == ChannelState::Closed
    }

    /// Whether publisher confirms were requested on this channel.
    ///
    /// The flag survives a connection loss: recovery uses it to put the
    /// channel back in confirm mode.
    pub fn confirm(&self) -> bool {
        self.0.lock().confirm
    }

    pub(crate) fn set_confirm(&self) {
        self.0.lock().confirm = true;
        trace!("Publisher confirms activated");
    }

    pub fn state(&self) -> ChannelState {
        self.0.lock().state.clone()
    }

    /// Why the channel ended up closed, if it did not close on request.
    pub fn close_reason(&self) -> Option<Error> {
        self.0.lock().close_reason.clone()
    }

    pub(crate) fn set_state(&self, state: ChannelState) {
        self.0.lock().state = state;
    }

    /// Move to `next` if the current state is one of `from`, else report the
    /// current state.
    pub(crate) fn transition(
        &self,
        from: &[ChannelState],
        next: ChannelState,
    ) -> std::result::Result<(), ChannelState> {
        let mut inner = self.0.lock();
        if from.contains(&inner.state) {
            inner.state = next;
            Ok(())
        } else {
            Err(inner.state.clone())
        }
    }

    /// Operations are accepted while connected, and queued while recovering.
    pub(crate) fn ensure_usable(&self) -> std::result::Result<(), ChannelState> {
        let inner = self.0.lock();
        match inner.state {
            ChannelState::Connected | ChannelState::Recovering => Ok(()),
            ref state => Err(state.clone()),
        }
    }

    /// Enter the final state. Returns false if the channel was already closed.
    pub(crate) fn set_closed(&self, reason: Option<Error>) -> bool {
        let mut inner = self.0.lock();
        if inner.state == ChannelState::Closed {
            return false;
        }
        inner.state = ChannelState::Closed;
        inner.close_reason = reason;
        inner.receiver_state.reset();
        true
    }

    pub(crate) fn set_will_receive(&self, consumer_tag: ShortString) {
        self.0.lock().receiver_state.set_will_receive(consumer_tag);
    }

    pub(crate) fn set_content_length(
        &self,
        channel_id: ChannelId,
        class_id: Identifier,
        length: PayloadSize,
    ) -> Result<(ShortString, bool)> {
        self.0
            .lock()
            .receiver_state
            .set_content_length(channel_id, class_id, length)
    }

    pub(crate) fn receive(
        &self,
        channel_id: ChannelId,
        length: PayloadSize,
    ) -> Result<(ShortString, bool)> {
        self.0.lock().receiver_state.receive(channel_id, length)
    }

    /// Forget any partially received content.
    pub(crate) fn reset_receiver_state(&self) {
        self.0.lock().receiver_state.reset();
    }

    #[cfg(test)]
    pub(crate) fn receiver_state(
        &self,
    ) -> Option<crate::channel_receiver_state::ChannelReceiverState> {
        self.0.lock().receiver_state.receiver_state()
    }

    pub(crate) fn set_send_flow(&self, flow: bool) {
        self.0.lock().send_flow = flow;
    }

    /// Whether the broker allows us to publish, as per the last channel.flow.
    pub fn flow(&self) -> bool {
        self.0.lock().send_flow
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ChannelState {
    #[default]
    Initial,
    Opening,
    Connected,
    Closing,
    Closed,
    Recovering,
}

impl fmt::Debug for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ChannelStatus");
        if let Some(inner) = self.0.try_lock() {
            debug
                .field("state", &inner.state)
                .field("receiver_state", &inner.receiver_state)
                .field("confirm", &inner.confirm)
                .field("send_flow", &inner.send_flow)
                .field("close_reason", &inner.close_reason);
        }
        debug.finish()
    }
}

struct Inner {
    confirm: bool,
    send_flow: bool,
    state: ChannelState,
    close_reason: Option<Error>,
    receiver_state: ChannelReceiverStates,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            confirm: false,
            send_flow: true,
            state: ChannelState::default(),
            close_reason: None,
            receiver_state: ChannelReceiverStates::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        let status = ChannelStatus::default();
        assert!(status.initializing());
        assert_eq!(
            status.transition(&[ChannelState::Initial], ChannelState::Opening),
            Ok(())
        );
        assert_eq!(
            status.transition(&[ChannelState::Initial], ChannelState::Opening),
            Err(ChannelState::Opening)
        );
        assert_eq!(status.ensure_usable(), Err(ChannelState::Opening));
        status.set_state(ChannelState::Recovering);
        assert_eq!(status.ensure_usable(), Ok(()));
    }

    #[test]
    fn closes_once() {
        let status = ChannelStatus::default();
        status.set_state(ChannelState::Connected);
        assert!(status.set_closed(Some(Error::connection_lost())));
        assert!(!status.set_closed(None));
        assert_eq!(status.close_reason(), Some(Error::connection_lost()));
    }
}
