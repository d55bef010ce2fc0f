//! Unsubscribe handles returned by every `on`/`once` style registration.

use std::fmt;

/// Whether a listener stays registered after its first delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscribeMode {
    On,
    Once,
}

/// Handle that removes a listener when [`unsubscribe`](Self::unsubscribe) is called.
///
/// Dropping the handle keeps the listener registered.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the listener. Calling this after a once-listener fired is a no-op.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
