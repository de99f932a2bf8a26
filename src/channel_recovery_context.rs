use crate::Error;

/// Bookkeeping of a channel between a connection loss and the end of its replay.
#[derive(Debug)]
pub(crate) struct ChannelRecoveryContext {
    cause: Error,
    attempts: usize,
}

impl ChannelRecoveryContext {
    pub(crate) fn new(cause: Error) -> Self {
        Self { cause, attempts: 1 }
    }

    pub(crate) fn cause(&self) -> Error {
        self.cause.clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts
    }

    /// The connection went away again before we were done.
    pub(crate) fn retry(&mut self, cause: Error) {
        self.cause = cause;
        self.attempts += 1;
    }
}
