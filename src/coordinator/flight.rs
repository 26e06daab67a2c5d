//! In-flight request table.
//!
//! One entry per fingerprint with an upstream call running. The first caller
//! becomes the leader and receives a [`Completer`]; later callers get a
//! [`Waiter`] on the same `watch` channel. The table lock is held only to
//! create or attach, never across I/O.

use crate::upstream::Completion;
use crate::{Error, ErrorContext, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

type Outcome = Option<Result<Completion>>;

struct Flight {
    rx: watch::Receiver<Outcome>,
    waiters: Arc<AtomicUsize>,
}

pub(crate) enum Role {
    Leader { completer: Completer, waiter: Waiter },
    Waiter(Waiter),
}

#[derive(Default)]
pub(crate) struct InFlightTable {
    flights: Mutex<HashMap<String, Flight>>,
}

impl InFlightTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Flight>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn join_or_lead(self: &Arc<Self>, key: &str) -> Role {
        let mut flights = self.lock();
        if let Some(flight) = flights.get(key) {
            flight.waiters.fetch_add(1, Ordering::SeqCst);
            return Role::Waiter(Waiter {
                rx: flight.rx.clone(),
                waiters: flight.waiters.clone(),
            });
        }

        let (tx, rx) = watch::channel(None);
        let waiters = Arc::new(AtomicUsize::new(1));
        flights.insert(
            key.to_owned(),
            Flight {
                rx: rx.clone(),
                waiters: waiters.clone(),
            },
        );
        Role::Leader {
            completer: Completer {
                key: key.to_owned(),
                tx,
                table: Arc::clone(self),
                finished: false,
            },
            waiter: Waiter { rx, waiters },
        }
    }

    fn retire(&self, key: &str) {
        self.lock().remove(key);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Callers currently waiting on `key`, leader included.
    pub(crate) fn waiters(&self, key: &str) -> Option<usize> {
        self.lock()
            .get(key)
            .map(|f| f.waiters.load(Ordering::SeqCst))
    }
}

/// Leader's handle for publishing the outcome.
///
/// Dropping it without completing (e.g. the leader task panicked) retires the
/// flight and releases waiters with an error.
pub(crate) struct Completer {
    key: String,
    tx: watch::Sender<Outcome>,
    table: Arc<InFlightTable>,
    finished: bool,
}

impl Completer {
    pub(crate) fn complete(mut self, outcome: Result<Completion>) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: Result<Completion>) {
        if self.finished {
            return;
        }
        self.finished = true;
        // Retire before publishing: anyone arriving after this either hits the
        // cache (success) or starts a fresh flight (failure).
        self.table.retire(&self.key);
        self.tx.send_replace(Some(outcome));
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        self.finish(Err(aborted()));
    }
}

pub(crate) struct Waiter {
    rx: watch::Receiver<Outcome>,
    waiters: Arc<AtomicUsize>,
}

impl Waiter {
    /// Wait for the leader's outcome. Dropping the future only stops this waiter.
    pub(crate) async fn wait(mut self) -> Result<Completion> {
        match self.rx.wait_for(|o| o.is_some()).await {
            Ok(outcome) => (*outcome).clone().unwrap_or_else(|| Err(aborted())),
            Err(_) => Err(aborted()),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}

fn aborted() -> Error {
    Error::runtime_with_context(
        "in-flight generation ended without a result",
        ErrorContext::new().with_source("single_flight"),
    )
}
