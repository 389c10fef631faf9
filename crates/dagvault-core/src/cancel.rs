// SPDX-License-Identifier: Apache-2.0
//! Cooperative cancellation token threaded through service calls (spec §5:
//! "a per-request context supplying cancellation and deadlines").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A cloneable, cheaply-shareable cancellation signal.
///
/// All clones share the same underlying state: cancelling one immediately
/// makes every clone observe `is_cancelled() == true`. Service methods
/// check [`CancellationToken::is_cancelled`] before each transaction
/// boundary rather than mid-statement, so a cancelled call either
/// completes its current transaction or rolls it back cleanly — there is
/// no partial-commit state.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Create a new, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns `true` if [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token has been cancelled. Resolves immediately if
    /// it already has been.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            self.inner.notify.notified().await;
            if self.is_cancelled() {
                return;
            }
        }
    }

    /// Return [`dagvault_core::Error::Unavailable`](crate::Error::Unavailable)
    /// if cancellation has been requested, `Ok(())` otherwise. Called at
    /// transaction boundaries by orchestration code.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Unavailable`] if the token is cancelled.
    pub fn check(&self) -> Result<(), crate::Error> {
        if self.is_cancelled() {
            Err(crate::Error::Unavailable {
                message: "request cancelled".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
