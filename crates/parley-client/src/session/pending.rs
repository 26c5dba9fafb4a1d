//! Table of in-flight calls keyed by correlation id

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use parley_core::{CorrelationId, ParleyError, Response, Result};
use tokio::sync::{oneshot, watch};

#[derive(Default)]
struct PendingState {
    calls: HashMap<CorrelationId, oneshot::Sender<Response>>,
    closed: bool,
}

/// Calls waiting for a response on one connection
///
/// Closing the table drops every waiting sender, so each waiter observes a
/// closed channel immediately. Registration after close fails, and callers
/// still writing their request are released through [`PendingCalls::closed`].
pub struct PendingCalls {
    state: Mutex<PendingState>,
    closed_signal: watch::Sender<bool>,
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self {
            state: Mutex::new(PendingState::default()),
            closed_signal: watch::channel(false).0,
        }
    }
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a slot for `id` and return the receiving end
    pub fn register(&self, id: CorrelationId) -> Result<oneshot::Receiver<Response>> {
        let mut state = self.lock();
        if state.closed {
            return Err(ParleyError::connection_lost(
                "connection closed before the request was sent",
            ));
        }
        let (sender, receiver) = oneshot::channel();
        state.calls.insert(id, sender);
        Ok(receiver)
    }

    /// Hand `response` to the caller waiting on `id`; `false` if nobody is
    pub fn complete(&self, id: CorrelationId, response: Response) -> bool {
        let sender = self.lock().calls.remove(&id);
        match sender {
            // The waiter may have timed out between removal and send
            Some(sender) => sender.send(response).is_ok(),
            None => false,
        }
    }

    /// Forget `id` without completing it
    pub fn cancel(&self, id: CorrelationId) -> bool {
        self.lock().calls.remove(&id).is_some()
    }

    /// Fail every waiting call and refuse new ones; returns how many were waiting
    pub fn close(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        let drained = state.calls.len();
        state.calls.clear();
        drop(state);
        self.closed_signal.send_replace(true);
        drained
    }

    /// Resolves once the table has been closed
    pub async fn closed(&self) {
        let mut signal = self.closed_signal.subscribe();
        // The sender lives as long as `self`, so waiting cannot fail
        let _ = signal.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::Payload;

    #[tokio::test]
    async fn test_complete_reaches_only_its_waiter() {
        let pending = PendingCalls::new();
        let first = pending.register(CorrelationId::new(1)).unwrap();
        let mut second = pending.register(CorrelationId::new(2)).unwrap();

        assert!(pending.complete(CorrelationId::new(1), Response::ok(Payload::new().with("n", 1))));
        assert_eq!(first.await.unwrap().payload.get_i64("n"), Some(1));
        assert!(second.try_recv().is_err());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_stale_completion_is_rejected() {
        let pending = PendingCalls::new();
        assert!(!pending.complete(CorrelationId::new(9), Response::ok(Payload::new())));

        pending.register(CorrelationId::new(3)).unwrap();
        assert!(pending.cancel(CorrelationId::new(3)));
        assert!(!pending.complete(CorrelationId::new(3), Response::ok(Payload::new())));
    }

    #[tokio::test]
    async fn test_close_fails_waiters_and_blocks_registration() {
        let pending = PendingCalls::new();
        let waiter = pending.register(CorrelationId::new(1)).unwrap();

        assert_eq!(pending.close(), 1);
        assert!(waiter.await.is_err());
        assert!(pending.register(CorrelationId::new(2)).unwrap_err().is_connection_lost());
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_closed_releases_current_and_later_waiters() {
        let pending = std::sync::Arc::new(PendingCalls::new());
        let watcher = std::sync::Arc::clone(&pending);
        let waiting = tokio::spawn(async move { watcher.closed().await });

        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        pending.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiting)
            .await
            .expect("close should release the waiter")
            .unwrap();

        // Already closed: resolves immediately
        tokio::time::timeout(std::time::Duration::from_millis(100), pending.closed())
            .await
            .expect("closed table should not block");
    }
}
