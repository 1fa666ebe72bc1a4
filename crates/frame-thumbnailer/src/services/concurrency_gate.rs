//! Concurrency Gate
//!
//! Ticketed admission for render sessions. Holding a [`Ticket`] is the only
//! authorization to run a session; the gate hands out at most `capacity` of
//! them and admits waiters strictly in arrival order.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::errors::{ThumbnailError, ThumbnailResult};

#[derive(Debug)]
struct GateState {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    outstanding: AtomicUsize,
    waiting: AtomicUsize,
    next_ticket: AtomicU64,
}

/// Bounded, FIFO admission queue for render sessions
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    state: Arc<GateState>,
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(GateState {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                outstanding: AtomicUsize::new(0),
                waiting: AtomicUsize::new(0),
                next_ticket: AtomicU64::new(1),
            }),
        }
    }

    /// Wait for a free slot. Waiters are admitted in the order they arrived.
    pub async fn acquire(&self) -> ThumbnailResult<Ticket> {
        let permit = {
            let _waiting = WaitingGuard::enter(&self.state.waiting);
            self.state
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ThumbnailError::GateClosed)?
        };

        let id = self.state.next_ticket.fetch_add(1, Ordering::Relaxed);
        let outstanding = self.state.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            "Admitted render ticket {} ({}/{} outstanding)",
            id, outstanding, self.state.capacity
        );

        Ok(Ticket {
            id,
            state: self.state.clone(),
            _permit: permit,
        })
    }

    /// Return a ticket. The longest waiter is admitted next.
    pub fn release(&self, ticket: Ticket) {
        drop(ticket);
    }

    /// Run `op` while holding a ticket. The ticket is returned on every path,
    /// including when the returned future is dropped before completion.
    pub async fn with_permit<F, Fut, T>(&self, op: F) -> ThumbnailResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ThumbnailResult<T>>,
    {
        let ticket = self.acquire().await?;
        let result = op().await;
        self.release(ticket);
        result
    }

    /// Stop admitting. Current and future waiters fail with `GateClosed`;
    /// tickets already handed out stay valid until released.
    pub fn close(&self) {
        if !self.state.semaphore.is_closed() {
            info!(
                "Closing render gate ({} outstanding, {} waiting)",
                self.outstanding(),
                self.waiting()
            );
            self.state.semaphore.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.semaphore.is_closed()
    }

    /// Tickets currently held
    pub fn outstanding(&self) -> usize {
        self.state.outstanding.load(Ordering::SeqCst)
    }

    /// Callers currently queued in `acquire`
    pub fn waiting(&self) -> usize {
        self.state.waiting.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.state.capacity
    }
}

/// Admission token. Dropping it (or passing it to
/// [`ConcurrencyGate::release`]) frees the slot exactly once.
#[derive(Debug)]
pub struct Ticket {
    id: u64,
    state: Arc<GateState>,
    // Declared last: the slot is handed on only after `outstanding` is decremented
    _permit: OwnedSemaphorePermit,
}

impl Ticket {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let outstanding = self.state.outstanding.fetch_sub(1, Ordering::SeqCst) - 1;
        debug!(
            "Released render ticket {} ({}/{} outstanding)",
            self.id, outstanding, self.state.capacity
        );
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
