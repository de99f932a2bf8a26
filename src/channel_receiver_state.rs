use crate::{
    frame::BASIC_CLASS_ID,
    types::{ChannelId, Identifier, PayloadSize, ShortString},
    ErrorKind, Result,
};
use tracing::error;

/// Where we stand in the reception of a delivery's content.
#[derive(Debug, Default)]
pub(crate) struct ChannelReceiverStates(Option<ChannelReceiverState>);

impl ChannelReceiverStates {
    #[cfg(test)]
    pub(crate) fn receiver_state(&self) -> Option<ChannelReceiverState> {
        self.0.clone()
    }

    pub(crate) fn set_will_receive(&mut self, consumer_tag: ShortString) {
        self.0 = Some(ChannelReceiverState::WillReceiveContent(consumer_tag));
    }

    /// Returns the consumer tag the content belongs to, and whether the
    /// delivery is already complete (empty body).
    pub(crate) fn set_content_length(
        &mut self,
        channel_id: ChannelId,
        class_id: Identifier,
        length: PayloadSize,
    ) -> Result<(ShortString, bool)> {
        match self.0.take() {
            Some(ChannelReceiverState::WillReceiveContent(consumer_tag))
                if class_id == BASIC_CLASS_ID =>
            {
                if length > 0 {
                    self.0 = Some(ChannelReceiverState::ReceivingContent(
                        consumer_tag.clone(),
                        length,
                    ));
                }
                Ok((consumer_tag, length == 0))
            }
            Some(ChannelReceiverState::WillReceiveContent(_)) => invalid(format!(
                "content header frame with class id {} instead of {} received on channel {}",
                class_id, BASIC_CLASS_ID, channel_id
            ), channel_id),
            _ => invalid(
                format!(
                    "unexpected content header frame received on channel {}",
                    channel_id
                ),
                channel_id,
            ),
        }
    }

    pub(crate) fn receive(
        &mut self,
        channel_id: ChannelId,
        length: PayloadSize,
    ) -> Result<(ShortString, bool)> {
        match self.0.take() {
            Some(ChannelReceiverState::ReceivingContent(consumer_tag, len)) => {
                match len.checked_sub(length) {
                    Some(remaining) => {
                        if remaining > 0 {
                            self.0 = Some(ChannelReceiverState::ReceivingContent(
                                consumer_tag.clone(),
                                remaining,
                            ));
                        }
                        Ok((consumer_tag, remaining == 0))
                    }
                    None => invalid(format!("unexpectedly large content body frame received on channel {} ({} bytes, expected {} bytes)", channel_id, length, len), channel_id),
                }
            }
            _ => invalid(
                format!(
                    "unexpected content body frame received on channel {}",
                    channel_id
                ),
                channel_id,
            ),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.0 = None;
    }
}

fn invalid<T>(message: String, channel_id: ChannelId) -> Result<T> {
    error!("{}", message);
    Err(ErrorKind::InvalidFrameReceived(channel_id).into())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ChannelReceiverState {
    WillReceiveContent(ShortString),
    ReceivingContent(ShortString, PayloadSize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_split_over_frames() {
        let mut states = ChannelReceiverStates::default();
        states.set_will_receive("ctag".into());
        assert_eq!(
            states.set_content_length(1, BASIC_CLASS_ID, 10),
            Ok(("ctag".into(), false))
        );
        assert_eq!(states.receive(1, 6), Ok(("ctag".into(), false)));
        assert_eq!(
            states.receiver_state(),
            Some(ChannelReceiverState::ReceivingContent("ctag".into(), 4))
        );
        assert_eq!(states.receive(1, 4), Ok(("ctag".into(), true)));
        assert_eq!(states.receiver_state(), None);
    }

    #[test]
    fn empty_body() {
        let mut states = ChannelReceiverStates::default();
        states.set_will_receive("ctag".into());
        assert_eq!(
            states.set_content_length(1, BASIC_CLASS_ID, 0),
            Ok(("ctag".into(), true))
        );
        assert_eq!(states.receiver_state(), None);
    }

    #[test]
    fn out_of_sequence() {
        let mut states = ChannelReceiverStates::default();
        assert_eq!(
            states.receive(3, 1),
            Err(ErrorKind::InvalidFrameReceived(3).into())
        );
        states.set_will_receive("ctag".into());
        assert_eq!(
            states.set_content_length(3, 50, 1),
            Err(ErrorKind::InvalidFrameReceived(3).into())
        );
        states.set_will_receive("ctag".into());
        states.set_content_length(3, BASIC_CLASS_ID, 1).unwrap();
        assert_eq!(
            states.receive(3, 2),
            Err(ErrorKind::InvalidFrameReceived(3).into())
        );
    }
}
