// lock.rs
// FIFO async write lock serializing all SQL mutations in-process.
//
// SQLite has a single writer; every mutating operation acquires this lock so
// a SELECT and its dependent UPDATE/INSERT never interleave with another
// writer. Waiters are served strictly in enqueue order; a timed-out waiter is
// removed from the queue without disturbing the order of the rest.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{EngramError, Result};

/// Snapshot of lock counters, exposed through the stats tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct LockStats {
    pub active: usize,
    pub queue_depth: usize,
    pub max_concurrent: usize,
    pub total_acquires: u64,
    pub total_waits: u64,
    pub max_queue_depth: usize,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<std::result::Result<(), String>>,
}

struct LockState {
    active: usize,
    queue: VecDeque<Waiter>,
    next_waiter_id: u64,
    total_acquires: u64,
    total_waits: u64,
    max_queue_depth: usize,
}

struct Inner {
    state: Mutex<LockState>,
    max_concurrent: usize,
}

impl Inner {
    /// Hand the slot to the next live waiter, or decrement the active count.
    /// A release at `active == 0` is a no-op.
    fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        // Skip waiters whose receiver is gone (timed out between pop and send)
        while let Some(waiter) = state.queue.pop_front() {
            if waiter.tx.send(Ok(())).is_ok() {
                // Slot handed over directly; active count unchanged
                state.total_acquires += 1;
                return;
            }
        }
        state.active = state.active.saturating_sub(1);
    }
}

/// FIFO async mutex with a configurable width and per-acquire timeout.
#[derive(Clone)]
pub struct WriteLock {
    inner: Arc<Inner>,
}

/// RAII guard; releases the slot on drop.
pub struct WriteGuard {
    inner: Arc<Inner>,
    released: bool,
}

impl WriteGuard {
    /// Explicit release for call sites that want the handoff before drop.
    pub fn release(mut self) {
        self.released = true;
        self.inner.release();
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if !self.released {
            self.inner.release();
        }
    }
}

impl WriteLock {
    /// Create a lock admitting up to `max_concurrent` holders (clamped >= 1).
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LockState {
                    active: 0,
                    queue: VecDeque::new(),
                    next_waiter_id: 0,
                    total_acquires: 0,
                    total_waits: 0,
                    max_queue_depth: 0,
                }),
                max_concurrent: max_concurrent.max(1),
            }),
        }
    }

    /// Acquire a slot, waiting indefinitely.
    pub async fn acquire(&self) -> Result<WriteGuard> {
        self.acquire_timeout(None).await
    }

    /// Acquire a slot, failing with `LockTimeout` after `timeout` if queued.
    pub async fn acquire_timeout(&self, timeout: Option<Duration>) -> Result<WriteGuard> {
        let (waiter_id, rx) = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.active < self.inner.max_concurrent {
                state.active += 1;
                state.total_acquires += 1;
                return Ok(WriteGuard {
                    inner: self.inner.clone(),
                    released: false,
                });
            }

            let id = state.next_waiter_id;
            state.next_waiter_id += 1;
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(Waiter { id, tx });
            state.total_waits += 1;
            state.max_queue_depth = state.max_queue_depth.max(state.queue.len());
            (id, rx)
        };

        let outcome = match timeout {
            Some(t) => match tokio::time::timeout(t, rx).await {
                Ok(received) => received,
                Err(_) => {
                    // Timed out: remove self from the queue. If the slot was
                    // handed over in the race window, release it back.
                    let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
                    let was_queued = state.queue.iter().any(|w| w.id == waiter_id);
                    state.queue.retain(|w| w.id != waiter_id);
                    drop(state);
                    if !was_queued {
                        self.inner.release();
                    }
                    return Err(EngramError::LockTimeout);
                }
            },
            None => rx.await,
        };

        match outcome {
            Ok(Ok(())) => Ok(WriteGuard {
                inner: self.inner.clone(),
                released: false,
            }),
            Ok(Err(reason)) => Err(EngramError::Other(reason)),
            // Sender dropped without a verdict (drain during shutdown)
            Err(_) => Err(EngramError::Cancelled),
        }
    }

    /// Acquire, run the future, release whether it succeeded or failed.
    pub async fn with_lock<F, T>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let guard = self.acquire().await?;
        let result = fut.await;
        guard.release();
        result
    }

    /// Reject every queued waiter with `reason` and zero the active count.
    /// Used at shutdown.
    pub fn drain(&self, reason: &str) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(waiter) = state.queue.pop_front() {
            let _ = waiter.tx.send(Err(reason.to_string()));
        }
        state.active = 0;
    }

    pub fn stats(&self) -> LockStats {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        LockStats {
            active: state.active,
            queue_depth: state.queue.len(),
            max_concurrent: self.inner.max_concurrent,
            total_acquires: state.total_acquires,
            total_waits: state.total_waits,
            max_queue_depth: state.max_queue_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;

    #[tokio::test]
    async fn test_uncontended_acquire_release() {
        let lock = WriteLock::new(1);
        let guard = lock.acquire().await.unwrap();
        assert_eq!(lock.stats().active, 1);
        guard.release();
        assert_eq!(lock.stats().active, 0);
        assert_eq!(lock.stats().total_acquires, 1);
    }

    #[tokio::test]
    async fn test_zero_width_clamped_to_one() {
        let lock = WriteLock::new(0);
        assert_eq!(lock.stats().max_concurrent, 1);
        let _guard = lock.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let lock = WriteLock::new(1);
        let order: StdArc<Mutex<Vec<char>>> = StdArc::new(Mutex::new(Vec::new()));

        // A holds the lock; B then C enqueue in that order
        let guard = lock.acquire().await.unwrap();
        order.lock().unwrap().push('A');

        let mut handles = Vec::new();
        for letter in ['B', 'C'] {
            let spawned_lock = lock.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let guard = spawned_lock.acquire().await.unwrap();
                // Internal delay must not affect service order
                if letter == 'B' {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                order.lock().unwrap().push(letter);
                guard.release();
            }));
            // Wait for the spawned task to actually enqueue before the next
            while lock.stats().queue_depth < (letter as usize - 'A' as usize) {
                tokio::task::yield_now().await;
            }
        }

        guard.release();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!['A', 'B', 'C']);
        let stats = lock.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queue_depth, 0);
        assert_eq!(stats.total_acquires, 3);
        assert_eq!(stats.total_waits, 2);
        assert_eq!(stats.max_queue_depth, 2);
    }

    #[tokio::test]
    async fn test_timeout_removes_waiter_preserving_order() {
        let lock = WriteLock::new(1);
        let guard = lock.acquire().await.unwrap();

        let timed = {
            let lock = lock.clone();
            tokio::spawn(async move {
                lock.acquire_timeout(Some(Duration::from_millis(20))).await
            })
        };
        while lock.stats().queue_depth < 1 {
            tokio::task::yield_now().await;
        }

        let patient = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire().await })
        };
        while lock.stats().queue_depth < 2 {
            tokio::task::yield_now().await;
        }

        // First waiter times out and leaves the queue
        let timed_result = timed.await.unwrap();
        assert!(matches!(timed_result, Err(EngramError::LockTimeout)));
        assert_eq!(lock.stats().queue_depth, 1);

        // The remaining waiter gets the slot on release
        guard.release();
        let patient_guard = patient.await.unwrap().unwrap();
        patient_guard.release();
        assert_eq!(lock.stats().active, 0);
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let lock = WriteLock::new(1);
        let result: Result<()> = lock
            .with_lock(async { Err(EngramError::InvalidInput("boom".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(lock.stats().active, 0);

        // Lock is still usable afterwards
        let out = lock.with_lock(async { Ok(41 + 1) }).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_drain_rejects_queued_waiters() {
        let lock = WriteLock::new(1);
        let _guard = lock.acquire().await.unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire().await })
        };
        while lock.stats().queue_depth < 1 {
            tokio::task::yield_now().await;
        }

        lock.drain("shutting down");
        let result = waiter.await.unwrap();
        assert!(result.is_err());
        let stats = lock.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queue_depth, 0);
    }

    #[tokio::test]
    async fn test_release_at_zero_is_noop() {
        let lock = WriteLock::new(1);
        let guard = lock.acquire().await.unwrap();
        lock.drain("reset");
        // Guard drop after drain must not underflow
        drop(guard);
        assert_eq!(lock.stats().active, 0);
    }

    #[tokio::test]
    async fn test_wider_lock_admits_concurrently() {
        let lock = WriteLock::new(2);
        let g1 = lock.acquire().await.unwrap();
        let g2 = lock.acquire().await.unwrap();
        assert_eq!(lock.stats().active, 2);
        g1.release();
        g2.release();
        assert_eq!(lock.stats().active, 0);
    }

    #[tokio::test]
    async fn test_quiescent_stats_invariant() {
        let lock = WriteLock::new(1);
        for _ in 0..5 {
            let g = lock.acquire().await.unwrap();
            g.release();
        }
        let stats = lock.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queue_depth, 0);
        assert_eq!(stats.total_acquires, 5);
    }
}
