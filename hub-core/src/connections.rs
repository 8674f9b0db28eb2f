//! Force-closeable connection tracking for stream endpoints.
//!
//! Adapted from the teacher's `api::ws_connection::WsConnectionManager` /
//! `ConnectionGuard` pair: a hierarchical [`tokio_util::sync::CancellationToken`]
//! lets the Hub Supervisor cancel every tracked session at shutdown without
//! reaching into each session's socket directly, and an RAII guard
//! guarantees a session is untracked even if its task exits early or panics.
//!
//! The control session and the screen-control session both register here so
//! `Hub::shutdown` can force-close every durable stream, per spec §5: "all
//! control streams are closed... then all listening sockets are closed."

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Tracks active stream-endpoint sessions and can force-close all of them.
pub struct ConnectionRegistry {
    count: AtomicU64,
    global_cancel: RwLock<CancellationToken>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            global_cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Registers a new session, returning an RAII guard carrying a
    /// cancellation token scoped to this session (child of the global
    /// token, so a global cancel also cancels it).
    pub fn register(self: &Arc<Self>) -> ConnectionGuard {
        self.count.fetch_add(1, Ordering::Relaxed);
        let cancel_token = self.global_cancel.read().child_token();
        ConnectionGuard {
            registry: Arc::clone(self),
            cancel_token,
        }
    }

    /// Number of currently tracked sessions.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Cancels every tracked session's token. A fresh token is installed
    /// afterward so the registry can keep accepting new sessions (used for
    /// full-shutdown only in this hub, but kept symmetric with the
    /// teacher's `close_all`).
    pub fn close_all(&self) {
        let mut guard = self.global_cancel.write();
        guard.cancel();
        *guard = CancellationToken::new();
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle for a tracked session. Drop decrements the registry's count;
/// `cancel_token()` is what the owning task should select on to notice a
/// forced shutdown.
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    cancel_token: CancellationToken,
}

impl ConnectionGuard {
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.count.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_all_cancels_outstanding_guards() {
        let registry = Arc::new(ConnectionRegistry::new());
        let guard = registry.register();
        assert!(!guard.cancel_token().is_cancelled());
        registry.close_all();
        assert!(guard.cancel_token().is_cancelled());
    }

    #[test]
    fn drop_decrements_count() {
        let registry = Arc::new(ConnectionRegistry::new());
        let guard = registry.register();
        assert_eq!(registry.count(), 1);
        drop(guard);
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn new_sessions_after_close_all_are_not_pre_cancelled() {
        let registry = Arc::new(ConnectionRegistry::new());
        registry.close_all();
        let guard = registry.register();
        assert!(!guard.cancel_token().is_cancelled());
    }
}
