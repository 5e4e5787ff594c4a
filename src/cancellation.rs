//! Cooperative cancellation for timers and external-event waits.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TokenState {
    canceled: bool,
    callbacks: Vec<Callback>,
}

/// Token that cancels the durable waits registered against it.
///
/// Callbacks run synchronously on the thread calling [`CancellationToken::cancel`],
/// which inside an orchestration is the single thread driving the pass.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Mutex<TokenState>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let callbacks = {
            let mut state = self.inner.lock();
            if state.canceled {
                return;
            }
            state.canceled = true;
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.lock().canceled
    }

    /// Run `f` on cancellation, or immediately if already canceled.
    pub(crate) fn on_cancel(&self, f: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.lock();
        if state.canceled {
            drop(state);
            f();
        } else {
            state.callbacks.push(Box::new(f));
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}
