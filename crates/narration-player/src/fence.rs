//! Session fencing.
//!
//! Every operation that invalidates scheduled or in-flight work advances the
//! fence. Asynchronous continuations hold a [`FenceTicket`] and drop their
//! effect once the ticket is no longer current.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing session generation.
#[derive(Clone, Debug, Default)]
pub struct SessionFence {
    generation: Arc<AtomicU64>,
}

/// Snapshot of the generation taken when a piece of work started.
#[derive(Clone, Debug)]
pub struct FenceTicket {
    generation: Arc<AtomicU64>,
    issued: u64,
}

impl SessionFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate all outstanding tickets and return a ticket for the new generation.
    pub fn advance(&self) -> FenceTicket {
        let issued = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        FenceTicket {
            generation: self.generation.clone(),
            issued,
        }
    }

    /// Ticket for the current generation, without advancing.
    pub fn ticket(&self) -> FenceTicket {
        FenceTicket {
            generation: self.generation.clone(),
            issued: self.current(),
        }
    }

    pub fn current(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl FenceTicket {
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.issued
    }

    pub fn generation(&self) -> u64 {
        self.issued
    }
}
