//! Wake-up signal between the completion context and one blocked consumer.
//!
//! [`raise()`](PeriodSignal::raise) never blocks: it only `try_lock`s the
//! waiter slot and unparks the registered thread. A failed `try_lock` means
//! the consumer is registering or deregistering; in the first case it has
//! not evaluated its predicate yet and will see the producer's update, in
//! the second it is already leaving. Unpark tokens are sticky, so a raise
//! that lands between the predicate check and `park()` is not lost.
//!
//! Both sides issue a `SeqCst` fence between publishing their own state and
//! observing the other's, so either the producer sees the waiter or the
//! consumer sees the producer's update.
//!
//! The slot holds one thread. A second thread that would have to park while
//! another is parked gets [`Error::Busy`].

use std::sync::atomic::{fence, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, Thread};

use crate::error::{Error, Result};

/// Single-waiter park/unpark signal.
#[derive(Debug, Default)]
pub struct PeriodSignal {
    waiter: Mutex<Option<Thread>>,
}

impl PeriodSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the registered consumer, if any. Safe to call from the
    /// completion context.
    pub fn raise(&self) {
        fence(Ordering::SeqCst);
        let waiter = match self.waiter.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return,
        };
        if let Some(thread) = waiter.as_ref() {
            thread.unpark();
        }
    }

    /// Block the calling thread until `ready` yields a value.
    ///
    /// `ready` is evaluated before the first park and again after every
    /// wake, spurious or not. Fails with [`Error::Busy`] without blocking if
    /// `ready` is not satisfied and another thread is already waiting.
    pub fn wait_until<T>(&self, mut ready: impl FnMut() -> Option<T>) -> Result<T> {
        if let Some(value) = ready() {
            return Ok(value);
        }

        {
            let mut waiter = self.lock_waiter();
            if waiter.is_some() {
                return Err(Error::Busy);
            }
            *waiter = Some(thread::current());
        }
        fence(Ordering::SeqCst);
        let value = loop {
            if let Some(value) = ready() {
                break value;
            }
            thread::park();
        };
        *self.lock_waiter() = None;
        Ok(value)
    }

    fn lock_waiter(&self) -> MutexGuard<'_, Option<Thread>> {
        self.waiter.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn ready_predicate_returns_without_parking() {
        let signal = PeriodSignal::new();
        assert_eq!(signal.wait_until(|| Some(7)).unwrap(), 7);
    }

    #[test]
    fn raise_without_waiter_is_noop() {
        let signal = PeriodSignal::new();
        signal.raise();
        signal.raise();
    }

    #[test]
    fn raise_wakes_parked_waiter() {
        let signal = Arc::new(PeriodSignal::new());
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let signal = Arc::clone(&signal);
            let flag = Arc::clone(&flag);
            thread::spawn(move || signal.wait_until(|| flag.load(Ordering::SeqCst).then_some(())))
        };

        thread::sleep(Duration::from_millis(20));
        flag.store(true, Ordering::SeqCst);
        signal.raise();
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn second_waiter_is_rejected() {
        let signal = Arc::new(PeriodSignal::new());
        let flag = Arc::new(AtomicBool::new(false));

        let first = {
            let signal = Arc::clone(&signal);
            let flag = Arc::clone(&flag);
            thread::spawn(move || signal.wait_until(|| flag.load(Ordering::SeqCst).then_some(1)))
        };
        while signal.lock_waiter().is_none() {
            thread::sleep(Duration::from_millis(1));
        }

        assert!(matches!(signal.wait_until(|| None::<()>), Err(Error::Busy)));
        // A satisfied predicate never needs the slot.
        assert_eq!(signal.wait_until(|| Some(2)).unwrap(), 2);

        flag.store(true, Ordering::SeqCst);
        signal.raise();
        assert_eq!(first.join().unwrap().unwrap(), 1);
        assert!(signal.lock_waiter().is_none());
    }

    #[test]
    fn no_lost_wakeups_under_contention() {
        let signal = Arc::new(PeriodSignal::new());
        let count = Arc::new(AtomicUsize::new(0));
        const ROUNDS: usize = 2_000;

        let consumer = {
            let signal = Arc::clone(&signal);
            let count = Arc::clone(&count);
            thread::spawn(move || {
                for round in 1..=ROUNDS {
                    signal
                        .wait_until(|| (count.load(Ordering::SeqCst) >= round).then_some(()))
                        .unwrap();
                }
            })
        };

        for _ in 0..ROUNDS {
            count.fetch_add(1, Ordering::SeqCst);
            signal.raise();
        }
        consumer.join().unwrap();
    }
}
