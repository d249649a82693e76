// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! A non-reentrant unfair spinlock with a FIFO condition queue.
//!
//! Intended for critical sections of a few dozen instructions; waiters spin
//! with exponential backoff and escalate to yielding. There is no ownership
//! tracking: unlocking happens when the guard drops, and signalling a
//! condition while nobody holds the lock is a programming error that panics.

use crate::interrupt::{self, Interrupted};
use crossbeam::utils::Backoff;
use parking_lot::Mutex;
use std::{
    cell::UnsafeCell,
    collections::VecDeque,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    thread::{self, Thread},
    time::Instant,
};

#[derive(Debug)]
struct RawLock {
    locked: AtomicBool,
}

impl RawLock {
    fn try_acquire(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn release(&self) {
        self.locked.store(false, Ordering::Release);
    }
}

/// Lock-around-data spinlock. Non-reentrant: re-locking from the holding
/// thread deadlocks.
#[derive(Debug)]
pub struct SpinLock<T> {
    raw: Arc<RawLock>,
    data: UnsafeCell<T>,
}

// Safety: the lock bit serializes all access to `data`.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

/// RAII guard; the lock releases when this drops.
#[derive(Debug)]
pub struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> SpinLock<T> {
    pub fn new(data: T) -> Self {
        Self {
            raw: Arc::new(RawLock {
                locked: AtomicBool::new(false),
            }),
            data: UnsafeCell::new(data),
        }
    }

    /// Spin until the lock is acquired.
    pub fn lock(&self) -> SpinGuard<'_, T> {
        let backoff = Backoff::new();
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            while self.raw.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }

    pub fn try_lock(&self) -> Option<SpinGuard<'_, T>> {
        if self.raw.try_acquire() {
            Some(SpinGuard { lock: self })
        } else {
            None
        }
    }

    /// Spin until acquired or the calling thread is interrupted.
    pub fn lock_interruptibly(&self) -> Result<SpinGuard<'_, T>, Interrupted> {
        let backoff = Backoff::new();
        loop {
            interrupt::check_interrupted()?;
            if let Some(guard) = self.try_lock() {
                return Ok(guard);
            }
            backoff.snooze();
        }
    }

    /// Spin until acquired, the deadline elapses (`Ok(None)`), or the calling
    /// thread is interrupted.
    pub fn try_lock_until(&self, deadline: Instant) -> Result<Option<SpinGuard<'_, T>>, Interrupted> {
        let backoff = Backoff::new();
        loop {
            interrupt::check_interrupted()?;
            if let Some(guard) = self.try_lock() {
                return Ok(Some(guard));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            backoff.snooze();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.raw.locked.load(Ordering::Acquire)
    }

    /// A condition queue bound to this lock.
    pub fn condvar(&self) -> SpinCondvar {
        SpinCondvar {
            raw: Arc::clone(&self.raw),
            waiters: Mutex::new(VecDeque::new()),
        }
    }
}

impl<'a, T> SpinGuard<'a, T> {
    fn spinlock(&self) -> &'a SpinLock<T> {
        self.lock
    }
}

impl<T> Deref for SpinGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard witnesses exclusive acquisition of the lock bit.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: as above.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}

const WAITING: u8 = 0;
const NOTIFIED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug)]
struct Waiter {
    thread: Thread,
    state: AtomicU8,
}

impl Waiter {
    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(WAITING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// FIFO condition queue created from a [`SpinLock`] via [`SpinLock::condvar`].
///
/// Waits enqueue the calling thread, release the lock, park, and re-acquire
/// the lock before returning. Notification order is registration order.
#[derive(Debug)]
pub struct SpinCondvar {
    raw: Arc<RawLock>,
    waiters: Mutex<VecDeque<Arc<Waiter>>>,
}

impl SpinCondvar {
    /// Wait until notified, ignoring interrupts (a pending interrupt flag is
    /// left in place for the caller).
    pub fn wait<'a, T>(&self, guard: SpinGuard<'a, T>) -> SpinGuard<'a, T> {
        let lock = self.start_wait(&guard);
        let waiter = self.enqueue();
        drop(guard);
        while waiter.state.load(Ordering::Acquire) == WAITING {
            thread::park();
        }
        lock.lock()
    }

    /// Wait until notified or interrupted. On `Err` the lock is *not* held
    /// and the interrupt flag has been cleared. A waiter that was notified
    /// and interrupted at the same time returns `Ok` with the flag preserved;
    /// the notification is never lost.
    pub fn wait_interruptibly<'a, T>(
        &self,
        guard: SpinGuard<'a, T>,
    ) -> Result<SpinGuard<'a, T>, Interrupted> {
        let lock = self.start_wait(&guard);
        let waiter = self.enqueue();
        drop(guard);
        loop {
            if interrupt::is_interrupted() {
                if waiter.transition(CANCELLED) {
                    self.forget(&waiter);
                    interrupt::take_interrupted();
                    return Err(Interrupted);
                }
                // Notified concurrently with the interrupt: consume the
                // notification, keep the flag for the caller.
                return Ok(lock.lock());
            }
            if waiter.state.load(Ordering::Acquire) != WAITING {
                return Ok(lock.lock());
            }
            thread::park();
        }
    }

    /// Wait until notified, the deadline elapses, or the calling thread is
    /// interrupted. `Ok((guard, timed_out))` re-acquires the lock; on `Err`
    /// the lock is not held.
    pub fn wait_until<'a, T>(
        &self,
        guard: SpinGuard<'a, T>,
        deadline: Instant,
    ) -> Result<(SpinGuard<'a, T>, bool), Interrupted> {
        let lock = self.start_wait(&guard);
        let waiter = self.enqueue();
        drop(guard);
        loop {
            if interrupt::is_interrupted() {
                if waiter.transition(CANCELLED) {
                    self.forget(&waiter);
                    interrupt::take_interrupted();
                    return Err(Interrupted);
                }
                return Ok((lock.lock(), false));
            }
            if waiter.state.load(Ordering::Acquire) != WAITING {
                return Ok((lock.lock(), false));
            }
            if Instant::now() >= deadline {
                if waiter.transition(CANCELLED) {
                    self.forget(&waiter);
                    return Ok((lock.lock(), true));
                }
                // Notified at the deadline: not a timeout.
                return Ok((lock.lock(), false));
            }
            interrupt::park_until(deadline);
        }
    }

    /// Wake the longest-waiting thread. Panics if the associated lock is not
    /// held by anyone.
    pub fn notify_one(&self) {
        self.assert_locked();
        let mut queue = self.waiters.lock();
        while let Some(waiter) = queue.pop_front() {
            if waiter.transition(NOTIFIED) {
                waiter.thread.unpark();
                break;
            }
        }
    }

    /// Wake every waiting thread. Panics if the associated lock is not held
    /// by anyone.
    pub fn notify_all(&self) {
        self.assert_locked();
        let mut queue = self.waiters.lock();
        for waiter in queue.drain(..) {
            if waiter.transition(NOTIFIED) {
                waiter.thread.unpark();
            }
        }
    }

    fn start_wait<'a, T>(&self, guard: &SpinGuard<'a, T>) -> &'a SpinLock<T> {
        let lock = guard.spinlock();
        assert!(
            Arc::ptr_eq(&self.raw, &lock.raw),
            "condition waited on with a guard from a different lock"
        );
        lock
    }

    fn enqueue(&self) -> Arc<Waiter> {
        let waiter = Arc::new(Waiter {
            thread: thread::current(),
            state: AtomicU8::new(WAITING),
        });
        self.waiters.lock().push_back(Arc::clone(&waiter));
        waiter
    }

    fn forget(&self, waiter: &Arc<Waiter>) {
        self.waiters.lock().retain(|w| !Arc::ptr_eq(w, waiter));
    }

    fn assert_locked(&self) {
        assert!(
            self.raw.locked.load(Ordering::Acquire),
            "condition signalled without holding its lock"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt;
    use std::{sync::mpsc, time::Duration};

    #[test]
    fn lock_excludes_concurrent_increments() {
        let lock = Arc::new(SpinLock::new(0u64));
        let mut handles = vec![];
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..10_000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(), 80_000);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(());
        let guard = lock.lock();
        claims::assert_none!(lock.try_lock());
        drop(guard);
        claims::assert_some!(lock.try_lock());
    }

    #[test]
    fn try_lock_until_times_out() {
        let lock = Arc::new(SpinLock::new(()));
        let guard = lock.lock();
        let contender = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                lock.try_lock_until(Instant::now() + Duration::from_millis(30))
                    .unwrap()
                    .is_some()
            })
        };
        assert!(!contender.join().unwrap());
        drop(guard);
    }

    #[test]
    fn lock_interruptibly_observes_interrupt() {
        let lock = Arc::new(SpinLock::new(()));
        let guard = lock.lock();
        let (tx, rx) = mpsc::channel();
        let contender = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                tx.send(interrupt::current()).unwrap();
                lock.lock_interruptibly().map(|_| ())
            })
        };
        let handle = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(10));
        handle.interrupt();
        assert_eq!(contender.join().unwrap(), Err(Interrupted));
        drop(guard);
    }

    #[test]
    fn signal_hands_off_to_waiter() {
        let lock = Arc::new(SpinLock::new(false));
        let condvar = Arc::new(lock.condvar());
        let waiter = {
            let lock = Arc::clone(&lock);
            let condvar = Arc::clone(&condvar);
            thread::spawn(move || {
                let mut guard = lock.lock();
                while !*guard {
                    guard = condvar.wait(guard);
                }
                // Lock is held again on return.
                assert!(lock.try_lock().is_none());
            })
        };
        thread::sleep(Duration::from_millis(20));
        {
            let mut guard = lock.lock();
            *guard = true;
            condvar.notify_one();
        }
        waiter.join().unwrap();
    }

    #[test]
    #[should_panic(expected = "condition signalled without holding its lock")]
    fn signalling_unheld_lock_panics() {
        let lock = SpinLock::new(());
        let condvar = lock.condvar();
        condvar.notify_one();
    }

    #[test]
    fn notify_all_releases_every_waiter() {
        let lock = Arc::new(SpinLock::new(false));
        let condvar = Arc::new(lock.condvar());
        let mut waiters = vec![];
        for _ in 0..4 {
            let lock = Arc::clone(&lock);
            let condvar = Arc::clone(&condvar);
            waiters.push(thread::spawn(move || {
                let mut guard = lock.lock();
                while !*guard {
                    guard = condvar.wait(guard);
                }
            }));
        }
        thread::sleep(Duration::from_millis(20));
        {
            let mut guard = lock.lock();
            *guard = true;
            condvar.notify_all();
        }
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn interrupted_wait_releases_the_lock() {
        let lock = Arc::new(SpinLock::new(()));
        let condvar = Arc::new(lock.condvar());
        let (tx, rx) = mpsc::channel();
        let waiter = {
            let lock = Arc::clone(&lock);
            let condvar = Arc::clone(&condvar);
            thread::spawn(move || {
                tx.send(interrupt::current()).unwrap();
                let guard = lock.lock();
                condvar.wait_interruptibly(guard).map(|_| ())
            })
        };
        let handle = rx.recv().unwrap();
        thread::sleep(Duration::from_millis(10));
        handle.interrupt();
        assert_eq!(waiter.join().unwrap(), Err(Interrupted));
        assert!(!lock.is_locked());
    }

    #[test]
    fn timed_wait_reports_timeout() {
        let lock = SpinLock::new(());
        let condvar = lock.condvar();
        let guard = lock.lock();
        let (guard, timed_out) = condvar
            .wait_until(guard, Instant::now() + Duration::from_millis(20))
            .unwrap();
        assert!(timed_out);
        drop(guard);
    }
}
