use core::{fmt, hash::Hash, marker::PhantomData};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use static_assertions::{assert_impl_all, assert_not_impl_any};

use crate::task_id::{GetTaskId, RawThreadId};

use super::rwlock::ReentrantRwLock;
use super::GuardNoSend;

/// The shared surface of the per-key lock managers.
///
/// A keyed locker multiplexes many independent critical sections over a set
/// of read/write locks, one critical section per key. Acquisitions return
/// RAII guards; a guard releases exactly once, when dropped.
pub trait KeyedLocker<K> {
    /// Guard released when exclusive access to the key ends.
    type WriteGuard<'a>
    where
        Self: 'a;
    /// Guard released when shared access to the key ends.
    type ReadGuard<'a>
    where
        Self: 'a;

    /// Acquires exclusive access to `key`, blocking until available.
    fn write(&self, key: K) -> Self::WriteGuard<'_>;

    /// Attempts to acquire exclusive access to `key` without blocking.
    fn try_write(&self, key: K) -> Option<Self::WriteGuard<'_>>;

    /// Acquires shared access to `key`, blocking until available.
    fn read(&self, key: K) -> Self::ReadGuard<'_>;

    /// Attempts to acquire shared access to `key` without blocking.
    fn try_read(&self, key: K) -> Option<Self::ReadGuard<'_>>;
}

/// A keyed locker which lazily materializes one [`ReentrantRwLock`] per key.
///
/// Exactly one lock object is ever published per key, even when multiple
/// tasks race to access a key for the first time. The map only grows: locks
/// are never removed, so memory use is proportional to the number of
/// distinct keys ever seen. This is intended for key spaces that are small
/// or bounded in practice; for unbounded key spaces with bounded memory,
/// use [`ShardedKeyedLocker`](super::ShardedKeyedLocker) instead.
///
/// The per-key locks are reentrant, so a task may nest acquisitions of the
/// same key and upgrade or downgrade between modes, with the same rules as
/// [`ReentrantRwLock`].
pub struct MapKeyedLocker<K, G: GetTaskId = RawThreadId> {
    locks: Mutex<HashMap<K, Arc<ReentrantRwLock<G>>>>,
}

assert_impl_all!(MapKeyedLocker<u64>: Send, Sync);

impl<K: Eq + Hash> MapKeyedLocker<K, RawThreadId> {
    /// Creates an empty locker.
    pub fn new() -> Self {
        Self::with_provider()
    }
}

impl<K: Eq + Hash, G: GetTaskId> MapKeyedLocker<K, G> {
    /// Creates an empty locker whose per-key locks use the task IDs
    /// supplied by `G`.
    pub fn with_provider() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    /// Acquires exclusive access to `key`, blocking until available.
    pub fn write(&self, key: K) -> KeyedWriteGuard<G> {
        let lock = self.locker(key);
        lock.lock_exclusive();
        KeyedWriteGuard { lock, marker: PhantomData }
    }

    /// Attempts to acquire exclusive access to `key` without blocking.
    pub fn try_write(&self, key: K) -> Option<KeyedWriteGuard<G>> {
        let lock = self.locker(key);
        if lock.try_lock_exclusive() {
            Some(KeyedWriteGuard { lock, marker: PhantomData })
        } else {
            None
        }
    }

    /// Acquires shared access to `key`, blocking until available.
    pub fn read(&self, key: K) -> KeyedReadGuard<G> {
        let lock = self.locker(key);
        lock.lock_shared();
        KeyedReadGuard { lock, marker: PhantomData }
    }

    /// Attempts to acquire shared access to `key` without blocking.
    pub fn try_read(&self, key: K) -> Option<KeyedReadGuard<G>> {
        let lock = self.locker(key);
        if lock.try_lock_shared() {
            Some(KeyedReadGuard { lock, marker: PhantomData })
        } else {
            None
        }
    }

    /// Returns the lock backing `key`, creating it on first access.
    ///
    /// The lock is created through the map's atomic get-or-insert, so
    /// concurrent first accesses to the same key all observe the same lock
    /// object. The returned handle can be held and locked directly, e.g. to
    /// compose scoped helpers.
    pub fn locker(&self, key: K) -> Arc<ReentrantRwLock<G>> {
        self.locks
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(ReentrantRwLock::with_provider()))
            .clone()
    }

    /// Returns the number of distinct keys seen so far.
    pub fn key_count(&self) -> usize {
        self.locks.lock().len()
    }
}

impl<K: Eq + Hash> Default for MapKeyedLocker<K, RawThreadId> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, G: GetTaskId> fmt::Debug for MapKeyedLocker<K, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapKeyedLocker")
            .field("keys", &self.locks.lock().len())
            .finish()
    }
}

impl<K: Eq + Hash, G: GetTaskId> KeyedLocker<K> for MapKeyedLocker<K, G> {
    type WriteGuard<'a>
        = KeyedWriteGuard<G>
    where
        Self: 'a;
    type ReadGuard<'a>
        = KeyedReadGuard<G>
    where
        Self: 'a;

    #[inline]
    fn write(&self, key: K) -> KeyedWriteGuard<G> {
        MapKeyedLocker::write(self, key)
    }

    #[inline]
    fn try_write(&self, key: K) -> Option<KeyedWriteGuard<G>> {
        MapKeyedLocker::try_write(self, key)
    }

    #[inline]
    fn read(&self, key: K) -> KeyedReadGuard<G> {
        MapKeyedLocker::read(self, key)
    }

    #[inline]
    fn try_read(&self, key: K) -> Option<KeyedReadGuard<G>> {
        MapKeyedLocker::try_read(self, key)
    }
}

/// RAII structure used to release exclusive access to a key when dropped.
///
/// The guard keeps the per-key lock alive through an `Arc`, so it carries no
/// lifetime and may outlive the borrow of the locker it came from.
#[must_use = "if unused the key will immediately unlock"]
pub struct KeyedWriteGuard<G: GetTaskId = RawThreadId> {
    lock   : Arc<ReentrantRwLock<G>>,
    marker : PhantomData<GuardNoSend>,
}

assert_not_impl_any!(KeyedWriteGuard: Send);

impl<G: GetTaskId> KeyedWriteGuard<G> {
    /// Returns the per-key lock this guard is holding.
    pub fn locker(s: &Self) -> &Arc<ReentrantRwLock<G>> {
        &s.lock
    }
}

impl<G: GetTaskId> Drop for KeyedWriteGuard<G> {
    fn drop(&mut self) {
        self.lock.unlock_exclusive();
    }
}

impl<G: GetTaskId> fmt::Debug for KeyedWriteGuard<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedWriteGuard").finish_non_exhaustive()
    }
}

/// RAII structure used to release shared access to a key when dropped.
///
/// The guard keeps the per-key lock alive through an `Arc`, so it carries no
/// lifetime and may outlive the borrow of the locker it came from.
#[must_use = "if unused the key will immediately unlock"]
pub struct KeyedReadGuard<G: GetTaskId = RawThreadId> {
    lock   : Arc<ReentrantRwLock<G>>,
    marker : PhantomData<GuardNoSend>,
}

assert_not_impl_any!(KeyedReadGuard: Send);

impl<G: GetTaskId> KeyedReadGuard<G> {
    /// Returns the per-key lock this guard is holding.
    pub fn locker(s: &Self) -> &Arc<ReentrantRwLock<G>> {
        &s.lock
    }
}

impl<G: GetTaskId> Drop for KeyedReadGuard<G> {
    fn drop(&mut self) {
        self.lock.unlock_shared();
    }
}

impl<G: GetTaskId> fmt::Debug for KeyedReadGuard<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedReadGuard").finish_non_exhaustive()
    }
}
