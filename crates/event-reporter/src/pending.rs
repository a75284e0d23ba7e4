// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Outstanding-work counter.
//!
//! Every event accepted by the capture gate holds an [`InFlight`] token
//! until it reaches a terminal state. [`Pending::wait`] blocks until no
//! tokens remain.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct Pending {
    count: Mutex<usize>,
    zero: Condvar,
}

impl Pending {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one unit of work. The returned token retires it on drop.
    #[must_use]
    pub fn register(self: &Arc<Self>) -> InFlight {
        *self.lock() += 1;
        InFlight {
            pending: Arc::clone(self),
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        *self.lock()
    }

    /// Blocks until every registered unit has been retired.
    pub fn wait(&self) {
        let mut count = self.lock();
        while *count > 0 {
            count = self.zero.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`Pending::wait`] but gives up after `timeout`. Returns whether
    /// the counter reached zero.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.lock();
        while *count > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            count = self
                .zero
                .wait_timeout(count, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn retire(&self) {
        let mut count = self.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registration of one outstanding event.
#[derive(Debug)]
pub struct InFlight {
    pending: Arc<Pending>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.pending.retire();
    }
}
