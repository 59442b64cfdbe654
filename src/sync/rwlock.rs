use core::{fmt, marker::PhantomData};
use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};
use static_assertions::{assert_impl_all, assert_not_impl_any};

use crate::task_id::{GetTaskId, RawThreadId};

use super::GuardNoSend;

struct RwState {
    /// Read hold count per task; a task ID is present iff its count is > 0.
    readers      : HashMap<usize, usize>,
    /// Task ID of the write owner, 0 when no writer holds.
    writer       : usize,
    writer_holds : usize,
}

impl RwState {
    /// Whether `me` may take write ownership: no writer holds, and either no
    /// readers exist or the caller is the sole reader (the upgrade path).
    fn writable_by(&self, me: usize) -> bool {
        self.writer_holds == 0
            && (self.readers.is_empty()
                || (self.readers.len() == 1 && self.readers.contains_key(&me)))
    }

    fn add_reader(&mut self, me: usize) {
        let count = self.readers.entry(me).or_insert(0);
        *count = count
            .checked_add(1)
            .expect("ReentrantRwLock read hold count overflow");
    }
}

/// A read/write lock which can be recursively acquired by a single task.
///
/// Any number of distinct tasks may hold read ownership simultaneously, and
/// at most one task holds write ownership at a time. The same task may
/// acquire either mode reentrantly, and may transition between modes:
///
/// - **Upgrade**: a task holding read ownership may acquire write ownership
///   once it is the *sole* reader; it waits out all other readers without
///   deadlocking against itself.
/// - **Downgrade**: the write owner may always acquire read ownership.
///
/// Both modes are released independently, in whichever order the caller
/// chooses; the lock does not collapse nested modes on its own.
///
/// # Fairness
///
/// A waiting writer is woken once the last reader leaves, but a continuous
/// stream of newly arriving readers can keep the reader count above zero
/// indefinitely and so starve a writer. This is a known, accepted
/// limitation; no ordering is guaranteed among waiters of either mode.
pub struct ReentrantRwLock<G: GetTaskId = RawThreadId> {
    state       : Mutex<RwState>,
    readers_cv  : Condvar,
    writer_cv   : Condvar,
    get_task_id : G,
}

assert_impl_all!(ReentrantRwLock: Send, Sync);

impl ReentrantRwLock<RawThreadId> {
    /// Creates a new lock with no readers and no writer.
    pub fn new() -> Self {
        Self::with_provider()
    }
}

impl<G: GetTaskId> ReentrantRwLock<G> {
    /// Creates a new lock whose re-entry detection uses the task IDs
    /// supplied by `G`.
    pub fn with_provider() -> Self {
        Self {
            state: Mutex::new(RwState {
                readers: HashMap::new(),
                writer: 0,
                writer_holds: 0,
            }),
            readers_cv: Condvar::new(),
            writer_cv: Condvar::new(),
            get_task_id: G::INIT,
        }
    }

    /// Acquires read ownership, blocking while a *different* task holds
    /// write ownership.
    ///
    /// The current write owner may always re-enter as a reader; this is the
    /// sanctioned self-downgrade path.
    pub fn lock_shared(&self) {
        let me = self.get_task_id.nonzero_task_id().get();
        let mut state = self.state.lock();

        while state.writer_holds > 0 && state.writer != me {
            self.readers_cv.wait(&mut state);
        }
        state.add_reader(me);
    }

    /// Attempts to acquire read ownership without blocking.
    pub fn try_lock_shared(&self) -> bool {
        let me = self.get_task_id.nonzero_task_id().get();
        let mut state = self.state.lock();

        if state.writer_holds > 0 && state.writer != me {
            return false;
        }
        state.add_reader(me);
        true
    }

    /// Releases one read hold of the current task.
    ///
    /// When at most one reader remains and no writer holds, pending writers
    /// are woken: the remaining reader may be one of them, waiting to
    /// upgrade, so every waiter gets to re-check its acquisition condition.
    ///
    /// # Panics
    ///
    /// Panics if the current task holds no read ownership.
    pub fn unlock_shared(&self) {
        let me = self.get_task_id.nonzero_task_id().get();
        let mut state = self.state.lock();

        match state.readers.get_mut(&me) {
            None => panic!("read unlock of a ReentrantRwLock not read-held by the current task"),
            Some(count) => {
                *count -= 1;
                if *count == 0 {
                    state.readers.remove(&me);
                }
            }
        }
        if state.readers.len() <= 1 && state.writer_holds == 0 {
            self.writer_cv.notify_all();
        }
    }

    /// Acquires write ownership, blocking until no other writer and no
    /// other reader holds the lock.
    ///
    /// If the current task is already the write owner, the write hold count
    /// is incremented without blocking. A task that is the *sole* reader may
    /// acquire write ownership without releasing its read holds first (the
    /// upgrade path); it still waits out every other reader.
    pub fn lock_exclusive(&self) {
        let me = self.get_task_id.nonzero_task_id().get();
        let mut state = self.state.lock();

        if state.writer == me {
            state.writer_holds = state
                .writer_holds
                .checked_add(1)
                .expect("ReentrantRwLock write hold count overflow");
            return;
        }
        while !state.writable_by(me) {
            self.writer_cv.wait(&mut state);
        }
        state.writer = me;
        state.writer_holds = 1;
    }

    /// Attempts to acquire write ownership without blocking.
    pub fn try_lock_exclusive(&self) -> bool {
        let me = self.get_task_id.nonzero_task_id().get();
        let mut state = self.state.lock();

        if state.writer == me {
            state.writer_holds = state
                .writer_holds
                .checked_add(1)
                .expect("ReentrantRwLock write hold count overflow");
            return true;
        }
        if !state.writable_by(me) {
            return false;
        }
        state.writer = me;
        state.writer_holds = 1;
        true
    }

    /// Releases one write hold of the current task.
    ///
    /// When the write hold count reaches zero, write ownership is cleared,
    /// one pending writer is woken and all pending readers are woken (since
    /// multiple readers may proceed together).
    ///
    /// # Panics
    ///
    /// Panics if the current task is not the write owner.
    pub fn unlock_exclusive(&self) {
        let me = self.get_task_id.nonzero_task_id().get();
        let mut state = self.state.lock();

        if state.writer != me {
            panic!("write unlock of a ReentrantRwLock not write-held by the current task");
        }
        state.writer_holds -= 1;
        if state.writer_holds == 0 {
            state.writer = 0;
            self.writer_cv.notify_one();
            self.readers_cv.notify_all();
        }
    }

    /// Acquires read ownership and returns an RAII guard which releases it
    /// when dropped.
    #[inline]
    pub fn read(&self) -> ReentrantReadGuard<'_, G> {
        self.lock_shared();
        ReentrantReadGuard { lock: self, marker: PhantomData }
    }

    /// Attempts to acquire read ownership without blocking, returning an
    /// RAII guard on success.
    #[inline]
    pub fn try_read(&self) -> Option<ReentrantReadGuard<'_, G>> {
        if self.try_lock_shared() {
            Some(ReentrantReadGuard { lock: self, marker: PhantomData })
        } else {
            None
        }
    }

    /// Acquires write ownership and returns an RAII guard which releases it
    /// when dropped.
    ///
    /// Calling this while holding a [`ReentrantReadGuard`] of the same lock
    /// performs an upgrade; the read guard stays valid and is released
    /// separately.
    #[inline]
    pub fn write(&self) -> ReentrantWriteGuard<'_, G> {
        self.lock_exclusive();
        ReentrantWriteGuard { lock: self, marker: PhantomData }
    }

    /// Attempts to acquire write ownership without blocking, returning an
    /// RAII guard on success.
    #[inline]
    pub fn try_write(&self) -> Option<ReentrantWriteGuard<'_, G>> {
        if self.try_lock_exclusive() {
            Some(ReentrantWriteGuard { lock: self, marker: PhantomData })
        } else {
            None
        }
    }

    /// Checks whether any task currently holds write ownership.
    #[inline]
    pub fn is_locked_exclusive(&self) -> bool {
        self.state.lock().writer_holds > 0
    }

    /// Checks whether the current task holds write ownership.
    #[inline]
    pub fn is_owned_by_current_task(&self) -> bool {
        let me = self.get_task_id.nonzero_task_id().get();
        self.state.lock().writer == me
    }

    /// Returns the number of distinct tasks currently holding read ownership.
    #[inline]
    pub fn reader_count(&self) -> usize {
        self.state.lock().readers.len()
    }
}

impl Default for ReentrantRwLock<RawThreadId> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<G: GetTaskId> fmt::Debug for ReentrantRwLock<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReentrantRwLock")
            .field("readers", &state.readers.len())
            .field("write_locked", &(state.writer_holds > 0))
            .finish()
    }
}

/// RAII structure used to release one read hold of a [`ReentrantRwLock`]
/// when dropped.
#[must_use = "if unused the lock will immediately unlock"]
pub struct ReentrantReadGuard<'a, G: GetTaskId = RawThreadId> {
    lock   : &'a ReentrantRwLock<G>,
    marker : PhantomData<GuardNoSend>,
}

assert_not_impl_any!(ReentrantReadGuard<'static>: Send);

impl<'a, G: GetTaskId> ReentrantReadGuard<'a, G> {
    /// Returns a reference to the original [`ReentrantRwLock`] object.
    pub fn rwlock(s: &Self) -> &'a ReentrantRwLock<G> {
        s.lock
    }
}

impl<'a, G: GetTaskId> Drop for ReentrantReadGuard<'a, G> {
    fn drop(&mut self) {
        self.lock.unlock_shared();
    }
}

impl<'a, G: GetTaskId> fmt::Debug for ReentrantReadGuard<'a, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantReadGuard").finish_non_exhaustive()
    }
}

/// RAII structure used to release one write hold of a [`ReentrantRwLock`]
/// when dropped.
#[must_use = "if unused the lock will immediately unlock"]
pub struct ReentrantWriteGuard<'a, G: GetTaskId = RawThreadId> {
    lock   : &'a ReentrantRwLock<G>,
    marker : PhantomData<GuardNoSend>,
}

assert_not_impl_any!(ReentrantWriteGuard<'static>: Send);

impl<'a, G: GetTaskId> ReentrantWriteGuard<'a, G> {
    /// Returns a reference to the original [`ReentrantRwLock`] object.
    pub fn rwlock(s: &Self) -> &'a ReentrantRwLock<G> {
        s.lock
    }

    /// Acquires an additional read hold, downgrading without giving up
    /// write ownership. The returned guard is released independently.
    #[inline]
    pub fn downgrade(s: &Self) -> ReentrantReadGuard<'a, G> {
        s.lock.read()
    }
}

impl<'a, G: GetTaskId> Drop for ReentrantWriteGuard<'a, G> {
    fn drop(&mut self) {
        self.lock.unlock_exclusive();
    }
}

impl<'a, G: GetTaskId> fmt::Debug for ReentrantWriteGuard<'a, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantWriteGuard").finish_non_exhaustive()
    }
}
