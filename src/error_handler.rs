use crate::Error;
use parking_lot::RwLock;
use std::{fmt, sync::Arc};

type ErrorFn = Arc<dyn Fn(Error) + Send + Sync + 'static>;

/// Callback notified of failures the application did not directly ask for,
/// such as a transport write error.
#[derive(Clone, Default)]
pub(crate) struct ErrorHandler(Arc<RwLock<Option<ErrorFn>>>);

impl ErrorHandler {
    pub(crate) fn set_handler<E: Fn(Error) + Send + Sync + 'static>(&self, handler: E) {
        *self.0.write() = Some(Arc::new(handler));
    }

    pub(crate) fn on_error(&self, error: Error) {
        // Called outside of the lock: the handler may well reach back into the connection.
        let handler = self.0.read().clone();
        if let Some(handler) = handler {
            handler(error)
        }
    }
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorHandler")
            .field(&self.0.read().is_some())
            .finish()
    }
}
