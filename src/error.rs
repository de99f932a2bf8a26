use crate::{
    channel_status::ChannelState,
    connection_status::ConnectionState,
    types::{ChannelId, DeliveryTag, Identifier, ReplyCode, ShortString},
};
use std::{error, fmt, io, sync::Arc};

/// A std Result with an amqp_channels::Error error type
pub type Result<T> = std::result::Result<T, Error>;

/// The error that can be returned in this crate.
///
/// Errors are cheap to clone: the same failure is usually broadcast to every
/// pending operation of a channel.
#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
}

/// The type of error that can be returned in this crate.
///
/// Even though we expose the complete enumeration of possible error variants, it is not
/// considered stable to exhaustively match on this enumeration: do it at your own risk.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Every channel number up to channel-max is in use
    ChannelsLimitReached,
    /// The channel number was released while not allocated
    InvalidChannelRelease(ChannelId),
    /// No channel is registered under this number
    InvalidChannel(ChannelId),
    /// The channel cannot accept this operation in its current state
    InvalidChannelState(ChannelState),
    /// The connection cannot accept this operation in its current state
    InvalidConnectionState(ConnectionState),
    /// The broker refused a request by closing the channel
    HandshakeFailed(ProtocolError),
    /// The broker closed the channel without a pending request
    ProtocolError(ProtocolError),
    /// The connection went away while the operation was pending
    ConnectionLost,
    /// confirm.select was requested twice on the same channel incarnation
    ConfirmsAlreadyEnabled(ChannelId),
    /// The channel could not be brought back after a connection loss
    RecoveryAbandoned(ChannelId),
    /// An ack/nack referenced a delivery tag we are not waiting for
    InvalidAck(DeliveryTag),
    /// The broker replied with a method we were not waiting for
    UnexpectedReply(ChannelId, &'static str),
    /// A content frame arrived out of sequence
    InvalidFrameReceived(ChannelId),
    /// The operation did not complete in the time allotted by the caller
    Timeout,
    /// No executor was configured and the default runtime is disabled
    NoConfiguredExecutor,
    IOError(Arc<io::Error>),
}

/// The reply carried by a channel.close sent by the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolError {
    reply_code: ReplyCode,
    reply_text: ShortString,
    class_id: Identifier,
    method_id: Identifier,
}

impl ProtocolError {
    pub fn new(
        reply_code: ReplyCode,
        reply_text: ShortString,
        class_id: Identifier,
        method_id: Identifier,
    ) -> Self {
        Self {
            reply_code,
            reply_text,
            class_id,
            method_id,
        }
    }

    pub fn reply_code(&self) -> ReplyCode {
        self.reply_code
    }

    pub fn reply_text(&self) -> &ShortString {
        &self.reply_text
    }

    pub fn class_id(&self) -> Identifier {
        self.class_id
    }

    pub fn method_id(&self) -> Identifier {
        self.method_id
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (class {}, method {})",
            self.reply_code,
            self.reply_text.as_str(),
            self.class_id,
            self.method_id
        )
    }
}

impl error::Error for ProtocolError {}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Whether this error is the broadcast of a connection loss.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self.kind, ErrorKind::ConnectionLost | ErrorKind::IOError(_))
    }

    pub(crate) fn connection_lost() -> Self {
        ErrorKind::ConnectionLost.into()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self { kind }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::ChannelsLimitReached => write!(
                f,
                "the maximum number of channels for this connection has been reached"
            ),
            ErrorKind::InvalidChannelRelease(id) => {
                write!(f, "channel {} was released but is not allocated", id)
            }
            ErrorKind::InvalidChannel(id) => write!(f, "invalid channel: {}", id),
            ErrorKind::InvalidChannelState(state) => {
                write!(f, "invalid channel state: {:?}", state)
            }
            ErrorKind::InvalidConnectionState(state) => {
                write!(f, "invalid connection state: {:?}", state)
            }
            ErrorKind::HandshakeFailed(e) => write!(f, "request refused by the broker: {}", e),
            ErrorKind::ProtocolError(e) => write!(f, "protocol error: {}", e),
            ErrorKind::ConnectionLost => write!(f, "connection lost"),
            ErrorKind::ConfirmsAlreadyEnabled(id) => {
                write!(f, "publisher confirms are already enabled on channel {}", id)
            }
            ErrorKind::RecoveryAbandoned(id) => {
                write!(f, "recovery of channel {} was abandoned", id)
            }
            ErrorKind::InvalidAck(tag) => {
                write!(f, "invalid acknowledgement for delivery tag {}", tag)
            }
            ErrorKind::UnexpectedReply(id, method) => {
                write!(f, "unexpected reply {} on channel {}", method, id)
            }
            ErrorKind::InvalidFrameReceived(id) => {
                write!(f, "invalid frame received on channel {}", id)
            }
            ErrorKind::Timeout => write!(f, "operation timed out"),
            ErrorKind::NoConfiguredExecutor => write!(
                f,
                "an executor must be provided if the default-runtime feature is disabled"
            ),
            ErrorKind::IOError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ErrorKind::HandshakeFailed(e) | ErrorKind::ProtocolError(e) => Some(e),
            ErrorKind::IOError(e) => Some(&**e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(other: io::Error) -> Self {
        ErrorKind::IOError(Arc::new(other)).into()
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        use tracing::error;
        use ErrorKind::*;

        match (&self.kind, &other.kind) {
            (ChannelsLimitReached, ChannelsLimitReached) => true,
            (InvalidChannelRelease(left), InvalidChannelRelease(right)) => left == right,
            (InvalidChannel(left), InvalidChannel(right)) => left == right,
            (InvalidChannelState(left), InvalidChannelState(right)) => left == right,
            (InvalidConnectionState(left), InvalidConnectionState(right)) => left == right,
            (HandshakeFailed(left), HandshakeFailed(right)) => left == right,
            (ErrorKind::ProtocolError(left), ErrorKind::ProtocolError(right)) => left == right,
            (ConnectionLost, ConnectionLost) => true,
            (ConfirmsAlreadyEnabled(left), ConfirmsAlreadyEnabled(right)) => left == right,
            (RecoveryAbandoned(left), RecoveryAbandoned(right)) => left == right,
            (InvalidAck(left), InvalidAck(right)) => left == right,
            (UnexpectedReply(left_id, left), UnexpectedReply(right_id, right)) => {
                left_id == right_id && left == right
            }
            (InvalidFrameReceived(left), InvalidFrameReceived(right)) => left == right,
            (Timeout, Timeout) => true,
            (NoConfiguredExecutor, NoConfiguredExecutor) => true,
            (IOError(_), IOError(_)) => {
                error!("Unable to compare amqp_channels::ErrorKind::IOError");
                false
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_compare_by_payload() {
        let left: Error = ErrorKind::InvalidAck(3).into();
        assert_eq!(left, ErrorKind::InvalidAck(3).into());
        assert_ne!(left, ErrorKind::InvalidAck(4).into());
        assert_ne!(left, Error::connection_lost());
    }

    #[test]
    fn io_errors_count_as_connection_loss() {
        let error = Error::from(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(error.is_connection_lost());
        assert!(Error::connection_lost().is_connection_lost());
        assert!(!Error::from(ErrorKind::Timeout).is_connection_lost());
    }

    #[test]
    fn protocol_error_is_the_source() {
        let refusal = ProtocolError::new(406, "PRECONDITION_FAILED".into(), 50, 10);
        let error: Error = ErrorKind::HandshakeFailed(refusal.clone()).into();
        assert_eq!(
            error.to_string(),
            "request refused by the broker: 406 PRECONDITION_FAILED (class 50, method 10)"
        );
        assert!(error::Error::source(&error).is_some());
    }
}
