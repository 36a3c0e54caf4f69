//! Single-slot debounce timer
//!
//! At most one operation is pending. Scheduling replaces (aborts) whatever
//! was pending; nothing is queued. Each scheduled operation gets a ticket so
//! the receiver can ignore a firing that raced with a cancel.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

struct Pending {
    ticket: u64,
    task: JoinHandle<()>,
}

/// Debounce slot owned by the session controller
pub struct Debouncer {
    delay: Duration,
    next_ticket: u64,
    pending: Option<Pending>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_ticket: 0,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `fire(ticket)` after the debounce delay, replacing any pending run
    pub fn schedule<F, Fut>(&mut self, fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let delay = self.delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(ticket).await;
        });

        self.pending = Some(Pending { ticket, task });
        ticket
    }

    /// Drop the pending run, if any
    ///
    /// Returns true when something was pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(pending) => {
                pending.task.abort();
                true
            }
            None => false,
        }
    }

    /// Accept a firing; false when the ticket was cancelled or replaced
    pub fn claim(&mut self, ticket: u64) -> bool {
        match &self.pending {
            Some(pending) if pending.ticket == ticket => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
