//! Cooperative cancellation signal with registered-callback fan-out.
//!
//! ## Model
//!
//! A [`CancellationSource`] owns exactly one token and is the only entity
//! allowed to flip it. The flip is monotonic: once requested, cancellation
//! never resets. [`CancellationToken`] handles are cheap clones sharing the
//! same underlying signal.
//!
//! Cancellation is **advisory and cooperative**, never forcible. Long-running
//! loops (the GPU pass loop, the scheduler tick) must poll
//! [`CancellationToken::throw_if_cancellation_requested`]; code that does not
//! poll will not be interrupted.
//!
//! ## Callback guarantees
//!
//! * `register` appends a callback, or invokes it synchronously when the
//!   token is already canceled.
//! * `cancel` is idempotent: only the first call has effect, every registered
//!   callback fires exactly once, in registration order, and the list is
//!   cleared afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::error::CancellationError;


type Callback = Box<dyn FnOnce() + Send>;

/// State shared between a source and all of its token clones.
///
/// The `requested` flag is duplicated outside the mutex so that poll points
/// stay lock-free; the flag inside the guarded state is authoritative for the
/// register/cancel ordering.
struct Signal {
    requested: AtomicBool,
    guarded: Mutex<GuardedState>,
}

struct GuardedState {
    requested: bool,
    callbacks: Vec<Callback>,
}

/// Cloneable handle observing a cancellation signal.

#[derive(Clone)]
pub struct CancellationToken {
    signal: Arc<Signal>,
}

impl CancellationToken {
    /// Returns a token that can never be canceled.
    ///
    /// Useful for APIs taking an optional token.
    pub fn none() -> Self {
        CancellationToken {
            signal: Arc::new(Signal {
                requested: AtomicBool::new(false),
                guarded: Mutex::new(GuardedState {
                    requested: false,
                    callbacks: Vec::new(),
                }),
            }),
        }
    }

    /// Returns `true` once cancellation has been requested.
    ///
    /// Monotonic: transitions `false → true` at most once and never resets.
    #[inline]
    pub fn is_cancellation_requested(&self) -> bool {
        self.signal.requested.load(Ordering::Acquire)
    }

    /// Cooperative poll point.
    ///
    /// Returns [`CancellationError`] once cancellation has been requested so
    /// the caller can abort with `?` and settle as `Canceled`.
    #[inline]
    pub fn throw_if_cancellation_requested(&self) -> Result<(), CancellationError> {
        if self.is_cancellation_requested() {
            Err(CancellationError)
        } else {
            Ok(())
        }
    }

    /// Registers a callback to run when cancellation is requested.
    ///
    /// ## Semantics
    /// * If the token is already canceled, `cb` runs synchronously before
    ///   `register` returns.
    /// * Otherwise `cb` is appended and will run exactly once, in
    ///   registration order, when [`CancellationSource::cancel`] fires.
    pub fn register<F>(&self, cb: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self
                .signal
                .guarded
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !state.requested {
                state.callbacks.push(Box::new(cb));
                return;
            }
        }
        // Already canceled: run synchronously, outside the lock.
        cb();
    }
}

/// Owner of a cancellation signal.
///
/// ## Role
/// The source is the only mutator: [`CancellationSource::cancel`] flips the
/// token and drains the callback list. Hand out tokens with
/// [`CancellationSource::token`]; keep the source with whoever decides when
/// to stop.

pub struct CancellationSource {
    signal: Arc<Signal>,
}

impl CancellationSource {
    /// Creates a fresh, un-canceled source.
    pub fn new() -> Self {
        CancellationSource {
            signal: Arc::new(Signal {
                requested: AtomicBool::new(false),
                guarded: Mutex::new(GuardedState {
                    requested: false,
                    callbacks: Vec::new(),
                }),
            }),
        }
    }

    /// Returns a token observing this source.
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            signal: Arc::clone(&self.signal),
        }
    }

    /// Requests cancellation.
    ///
    /// ## Semantics
    /// * Idempotent: only the first call has effect.
    /// * Registered callbacks fire exactly once in total, in registration
    ///   order, outside the internal lock.
    pub fn cancel(&self) {
        let callbacks = {
            let mut state = self
                .signal
                .guarded
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if state.requested {
                return;
            }
            state.requested = true;
            self.signal.requested.store(true, Ordering::Release);
            std::mem::take(&mut state.callbacks)
        };

        tracing::debug!(callbacks = callbacks.len(), "cancellation requested");
        for cb in callbacks {
            cb();
        }
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn cancel_is_idempotent_and_fires_callbacks_once() {
        let source = CancellationSource::new();
        let token = source.token();

        let fired = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let fired = Arc::clone(&fired);
            token.register(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        source.cancel();
        source.cancel();

        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert!(token.is_cancellation_requested());
    }

    #[test]
    fn register_after_cancel_runs_synchronously() {
        let source = CancellationSource::new();
        let token = source.token();
        source.cancel();

        let fired = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&fired);
        token.register(move || {
            observed.fetch_add(1, Ordering::SeqCst);
        });

        // Must have run before register returned.
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_fire_in_registration_order() {
        let source = CancellationSource::new();
        let token = source.token();

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = Arc::clone(&order);
            token.register(move || order.lock().unwrap().push(i));
        }

        source.cancel();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn throw_if_cancellation_requested_reports_the_cause() {
        let source = CancellationSource::new();
        let token = source.token();

        assert!(token.throw_if_cancellation_requested().is_ok());
        source.cancel();
        assert_eq!(
            token.throw_if_cancellation_requested(),
            Err(CancellationError)
        );
    }

    #[test]
    fn none_token_never_cancels() {
        let token = CancellationToken::none();
        assert!(!token.is_cancellation_requested());
        assert!(token.throw_if_cancellation_requested().is_ok());
    }
}
