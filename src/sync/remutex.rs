use core::{fmt, marker::PhantomData};

use parking_lot::{Condvar, Mutex};
use scopeguard::defer;
use static_assertions::{assert_impl_all, assert_not_impl_any};

use crate::task_id::{GetTaskId, RawThreadId};

use super::GuardNoSend;

struct LockState {
    /// Task ID of the current owner, 0 when unowned.
    owner      : usize,
    hold_count : usize,
}

/// An exclusive lock which can be recursively acquired by a single task.
///
/// This type is identical to a plain mutex except for the following points:
///
/// - Locking multiple times from the same task will work correctly instead
///   of deadlocking; every `lock` must be balanced by one `unlock`.
/// - The lock does not protect any data itself; it only provides mutual
///   exclusion between tasks.
///
/// Non-owners wait on a condition variable until the hold count reaches
/// zero; on release exactly one waiter is woken. No ordering is guaranteed
/// among waiters beyond that.
pub struct ReentrantLock<G: GetTaskId = RawThreadId> {
    state       : Mutex<LockState>,
    released    : Condvar,
    get_task_id : G,
}

assert_impl_all!(ReentrantLock: Send, Sync);

impl ReentrantLock<RawThreadId> {
    /// Creates a new lock in an unlocked state ready for use.
    #[inline]
    pub const fn new() -> Self {
        Self::with_provider()
    }
}

impl<G: GetTaskId> ReentrantLock<G> {
    /// Creates a new lock whose re-entry detection uses the task IDs
    /// supplied by `G`.
    #[inline]
    pub const fn with_provider() -> Self {
        Self {
            state: Mutex::new(LockState { owner: 0, hold_count: 0 }),
            released: Condvar::new(),
            get_task_id: G::INIT,
        }
    }

    /// Acquires the lock, blocking the current task until it is able to do so.
    ///
    /// If the lock is held by another task, this function blocks until it
    /// becomes available. If the lock is already held by the current task,
    /// the hold count is incremented and this function returns immediately.
    pub fn lock(&self) {
        let me = self.get_task_id.nonzero_task_id().get();
        let mut state = self.state.lock();

        if state.owner == me {
            state.hold_count = state
                .hold_count
                .checked_add(1)
                .expect("ReentrantLock hold count overflow");
            return;
        }
        while state.hold_count > 0 {
            self.released.wait(&mut state);
        }
        state.owner = me;
        state.hold_count = 1;
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// Returns `true` if the lock was acquired (or re-entered) and `false`
    /// otherwise. On success the acquisition must be balanced by `unlock`.
    pub fn try_lock(&self) -> bool {
        let me = self.get_task_id.nonzero_task_id().get();
        let mut state = self.state.lock();

        if state.owner == me {
            state.hold_count = state
                .hold_count
                .checked_add(1)
                .expect("ReentrantLock hold count overflow");
            return true;
        }
        if state.hold_count > 0 {
            return false;
        }
        state.owner = me;
        state.hold_count = 1;
        true
    }

    /// Releases one hold on the lock.
    ///
    /// When the hold count reaches zero, ownership is cleared and one
    /// waiting task is woken.
    ///
    /// # Panics
    ///
    /// Panics if the lock is not held by the current task. An unmatched
    /// unlock is a contract violation and is never silently ignored.
    pub fn unlock(&self) {
        let me = self.get_task_id.nonzero_task_id().get();
        let mut state = self.state.lock();

        if state.hold_count == 0 || state.owner != me {
            panic!("unlock of a ReentrantLock not held by the current task");
        }
        state.hold_count -= 1;
        if state.hold_count == 0 {
            state.owner = 0;
            self.released.notify_one();
        }
    }

    /// Acquires the lock and returns an RAII guard which releases it when
    /// dropped.
    #[inline]
    pub fn guard(&self) -> ReentrantLockGuard<'_, G> {
        self.lock();
        ReentrantLockGuard { lock: self, marker: PhantomData }
    }

    /// Attempts to acquire the lock without blocking, returning an RAII
    /// guard on success.
    #[inline]
    pub fn try_guard(&self) -> Option<ReentrantLockGuard<'_, G>> {
        if self.try_lock() {
            Some(ReentrantLockGuard { lock: self, marker: PhantomData })
        } else {
            None
        }
    }

    /// Checks whether the lock is currently held by any task.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.state.lock().hold_count > 0
    }

    /// Checks whether the lock is currently held by the current task.
    #[inline]
    pub fn is_owned_by_current_task(&self) -> bool {
        let me = self.get_task_id.nonzero_task_id().get();
        self.state.lock().owner == me
    }

    /// Returns the current hold count, regardless of which task is the owner.
    #[inline]
    pub fn hold_count(&self) -> usize {
        self.state.lock().hold_count
    }
}

impl Default for ReentrantLock<RawThreadId> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<G: GetTaskId> fmt::Debug for ReentrantLock<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReentrantLock")
            .field("locked", &(state.hold_count > 0))
            .field("hold_count", &state.hold_count)
            .finish()
    }
}

/// An RAII implementation of a "scoped lock" of a [`ReentrantLock`].
/// When this structure is dropped (falls out of scope), the lock will be
/// released.
#[must_use = "if unused the lock will immediately unlock"]
pub struct ReentrantLockGuard<'a, G: GetTaskId = RawThreadId> {
    lock   : &'a ReentrantLock<G>,
    marker : PhantomData<GuardNoSend>,
}

assert_not_impl_any!(ReentrantLockGuard<'static>: Send);

impl<'a, G: GetTaskId> ReentrantLockGuard<'a, G> {
    /// Returns a reference to the original [`ReentrantLock`] object.
    pub fn locker(s: &Self) -> &'a ReentrantLock<G> {
        s.lock
    }

    /// Temporarily releases the lock to execute the given function.
    ///
    /// The lock is re-acquired before this function returns, even if `f`
    /// panics.
    #[inline]
    pub fn unlocked<F, U>(s: &mut Self, f: F) -> U
    where
        F: FnOnce() -> U,
    {
        s.lock.unlock();
        defer!(s.lock.lock());
        f()
    }
}

impl<'a, G: GetTaskId> Drop for ReentrantLockGuard<'a, G> {
    fn drop(&mut self) {
        // A guard is only constructed after a successful acquisition, so this
        // release always has a matching hold.
        self.lock.unlock();
    }
}

impl<'a, G: GetTaskId> fmt::Debug for ReentrantLockGuard<'a, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantLockGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use super::*;

    #[test]
    fn nested_acquisition() {
        let lock = ReentrantLock::new();

        lock.lock();
        lock.lock();
        lock.lock();
        assert_eq!(lock.hold_count(), 3);
        assert!(lock.is_owned_by_current_task());

        lock.unlock();
        lock.unlock();
        assert!(lock.is_locked());

        lock.unlock();
        assert!(!lock.is_locked());
        assert!(!lock.is_owned_by_current_task());
    }

    #[test]
    fn try_lock_is_reentrant() {
        let lock = ReentrantLock::new();

        assert!(lock.try_lock());
        assert!(lock.try_lock());
        lock.unlock();
        lock.unlock();
    }

    #[test]
    fn try_lock_fails_across_tasks() {
        let lock = ReentrantLock::new();
        lock.lock();

        thread::scope(|s| {
            let held = s.spawn(|| lock.try_lock()).join().unwrap();
            assert!(!held);
        });

        lock.unlock();
        thread::scope(|s| {
            let held = s.spawn(|| {
                let held = lock.try_lock();
                if held {
                    lock.unlock();
                }
                held
            });
            assert!(held.join().unwrap());
        });
    }

    #[test]
    fn blocked_task_acquires_after_release() {
        let lock = ReentrantLock::new();
        let (tx, rx) = mpsc::channel();

        lock.lock();
        thread::scope(|s| {
            s.spawn(|| {
                lock.lock();
                tx.send(()).unwrap();
                lock.unlock();
            });

            // The spawned task must still be blocked on the lock.
            assert!(rx.try_recv().is_err());
            lock.unlock();
            rx.recv().unwrap();
        });
    }

    #[test]
    fn guard_releases_on_drop() {
        let lock = ReentrantLock::new();
        {
            let _guard = lock.guard();
            assert!(lock.is_locked());
            assert!(lock.try_guard().is_some());
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn guard_unlocked_releases_temporarily() {
        let lock = ReentrantLock::new();
        let mut guard = lock.guard();

        ReentrantLockGuard::unlocked(&mut guard, || {
            assert!(!lock.is_locked());
        });
        assert!(lock.is_locked());
    }

    #[test]
    #[should_panic(expected = "unlock of a ReentrantLock")]
    fn unlock_of_unheld_lock_panics() {
        let lock = ReentrantLock::new();
        lock.unlock();
    }

    #[test]
    fn unlock_from_non_owner_panics() {
        let lock = ReentrantLock::new();
        lock.lock();

        thread::scope(|s| {
            let result = s.spawn(|| lock.unlock()).join();
            assert!(result.is_err());
        });

        lock.unlock();
    }
}
