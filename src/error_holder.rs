use crate::{Error, Result};

use std::{fmt, sync::Arc};

use parking_lot::Mutex;

/// First failure of a multi-step sequence, checked by the later steps.
#[derive(Clone, Default)]
pub(crate) struct ErrorHolder(Arc<Mutex<Option<Error>>>);

impl ErrorHolder {
    pub(crate) fn set(&self, error: Error) {
        let mut inner = self.0.lock();
        if inner.is_none() {
            *inner = Some(error);
        }
    }

    pub(crate) fn check(&self) -> Result<()> {
        self.0
            .lock()
            .clone()
            .map(Err)
            .transpose()
            .map(Option::unwrap_or_default)
    }
}

impl fmt::Debug for ErrorHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHolder").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn keeps_the_first_error() {
        let holder = ErrorHolder::default();
        assert_eq!(holder.check(), Ok(()));
        holder.set(ErrorKind::Timeout.into());
        holder.set(Error::connection_lost());
        assert_eq!(holder.check(), Err(ErrorKind::Timeout.into()));
    }
}
