/// What to do with channels when the connection goes away.
///
/// Recovery is off by default: channels are closed on connection loss.
#[derive(Clone, Debug)]
pub struct RecoveryConfig {
    pub(crate) auto_recover_channels: bool,
    pub(crate) max_attempts: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            auto_recover_channels: false,
            max_attempts: 3,
        }
    }
}

impl RecoveryConfig {
    /// Replay the declarations of every channel once the connection is back.
    #[must_use]
    pub fn auto_recover_channels(mut self) -> Self {
        self.auto_recover_channels = true;
        self
    }

    /// How many connection losses in a row a channel may go through before
    /// we give up on it.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub(crate) fn allows(&self, attempt: usize) -> bool {
        self.auto_recover_channels && attempt <= self.max_attempts
    }
}
