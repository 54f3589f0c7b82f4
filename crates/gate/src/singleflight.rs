// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight slot: at most one background operation at a time, with every
//! concurrent caller awaiting that operation's result.
//!
//! The slot is a plain value meant to live inside its owner's lock so that the
//! "is the cached value still good?" check and "join or start the operation"
//! happen atomically. Operations run on a spawned task, so a waiter that is
//! dropped never cancels the work other waiters depend on.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinError;

/// Handle to an in-flight (or finished) shared operation.
pub struct Flight<T, E>
where
    T: Clone,
    E: Clone,
{
    shared: Shared<BoxFuture<'static, Result<T, E>>>,
    /// Set by the task itself, so completion is visible even if no waiter
    /// ever polled the shared future.
    done: Arc<AtomicBool>,
}

impl<T, E> Clone for Flight<T, E>
where
    T: Clone,
    E: Clone,
{
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone(), done: Arc::clone(&self.done) }
    }
}

impl<T, E> Flight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Wait for the operation to finish.
    pub async fn wait(self) -> Result<T, E> {
        self.shared.await
    }

    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire) || self.shared.peek().is_some()
    }
}

/// Slot holding the current flight, if any.
pub struct SingleFlight<T, E>
where
    T: Clone,
    E: Clone,
{
    current: Option<Flight<T, E>>,
    started: u64,
}

impl<T, E> Default for SingleFlight<T, E>
where
    T: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self { current: None, started: 0 }
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// The running flight, if one has not finished yet.
    pub fn in_flight(&self) -> Option<Flight<T, E>> {
        self.current.as_ref().filter(|f| !f.is_finished()).cloned()
    }

    pub fn is_running(&self) -> bool {
        self.in_flight().is_some()
    }

    /// Join the running flight or spawn `start()` as the new one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn join_or_start<F, Fut>(&mut self, start: F) -> Flight<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if let Some(flight) = self.in_flight() {
            return flight;
        }
        let done = Arc::new(AtomicBool::new(false));
        let op = start();
        let task_done = Arc::clone(&done);
        let handle = tokio::spawn(async move {
            let result = op.await;
            task_done.store(true, Ordering::Release);
            result
        });
        let shared = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(E::from(e)),
            }
        }
        .boxed()
        .shared();
        let flight = Flight { shared, done };
        self.current = Some(flight.clone());
        self.started += 1;
        flight
    }

    /// Number of operations started over the slot's lifetime.
    pub fn started(&self) -> u64 {
        self.started
    }
}

#[cfg(test)]
#[path = "singleflight_tests.rs"]
mod tests;
