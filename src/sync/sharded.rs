use core::{
    fmt,
    hash::{BuildHasher, Hash, Hasher},
    marker::PhantomData,
};
use std::collections::hash_map::RandomState;

use parking_lot::RwLock;
use static_assertions::assert_impl_all;

use super::keyed::KeyedLocker;

/// RAII structure used to release shared access to a shard when dropped.
pub type ShardReadGuard<'a> = parking_lot::RwLockReadGuard<'a, ()>;

/// RAII structure used to release exclusive access to a shard when dropped.
pub type ShardWriteGuard<'a> = parking_lot::RwLockWriteGuard<'a, ()>;

/// A keyed locker backed by a fixed, power-of-two-sized array of plain
/// read/write locks.
///
/// Each key is mapped to a shard by hashing it and masking the hash with
/// `2^exp - 1`. Compared to [`MapKeyedLocker`](super::MapKeyedLocker) this
/// never allocates after construction and uses O(2^exp) memory regardless of
/// the key space, at the cost of *false contention*: distinct keys that
/// collide into the same shard serialize against each other.
///
/// # Reentrancy
///
/// The shard locks are **not** reentrant. A task that already holds a shard
/// and acquires a colliding key again will deadlock against itself; this is
/// a documented contract, not a bug. Size `exp` so that collisions stay
/// unlikely for the expected workload.
pub struct ShardedKeyedLocker<K, S = RandomState> {
    shards       : Box<[RwLock<()>]>,
    mask         : u64,
    hash_builder : S,
    marker       : PhantomData<fn(&K)>,
}

assert_impl_all!(ShardedKeyedLocker<u64>: Send, Sync);

impl<K: Hash> ShardedKeyedLocker<K, RandomState> {
    /// Creates a locker with `2^exp` shards and a randomly seeded hasher.
    ///
    /// # Panics
    ///
    /// Panics unless `1 <= exp <= 32`.
    pub fn new(exp: u32) -> Self {
        Self::with_hasher(exp, RandomState::new())
    }
}

impl<K: Hash, S: BuildHasher> ShardedKeyedLocker<K, S> {
    /// Creates a locker with `2^exp` shards, hashing keys with the supplied
    /// [`BuildHasher`].
    ///
    /// # Panics
    ///
    /// Panics unless `1 <= exp <= 32`.
    pub fn with_hasher(exp: u32, hash_builder: S) -> Self {
        assert!(
            (1..=32).contains(&exp),
            "shard exponent must be between 1 and 32, got {exp}"
        );
        let count = 1u64 << exp;
        let shards: Box<[RwLock<()>]> =
            (0..count).map(|_| RwLock::new(())).collect();
        Self {
            shards,
            mask: count - 1,
            hash_builder,
            marker: PhantomData,
        }
    }

    /// Acquires exclusive access to the shard of `key`, blocking until
    /// available.
    pub fn write(&self, key: &K) -> ShardWriteGuard<'_> {
        self.shard(key).write()
    }

    /// Attempts to acquire exclusive access to the shard of `key` without
    /// blocking.
    pub fn try_write(&self, key: &K) -> Option<ShardWriteGuard<'_>> {
        self.shard(key).try_write()
    }

    /// Acquires shared access to the shard of `key`, blocking until
    /// available.
    pub fn read(&self, key: &K) -> ShardReadGuard<'_> {
        self.shard(key).read()
    }

    /// Attempts to acquire shared access to the shard of `key` without
    /// blocking.
    pub fn try_read(&self, key: &K) -> Option<ShardReadGuard<'_>> {
        self.shard(key).try_read()
    }

    /// Returns the shard lock that `key` maps to, for direct use with
    /// scoped helpers. All keys with colliding hashes share this lock.
    pub fn locker(&self, key: &K) -> &RwLock<()> {
        self.shard(key)
    }

    /// Returns the fixed number of shards.
    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, key: &K) -> &RwLock<()> {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() & self.mask) as usize]
    }
}

impl<K: Hash> Default for ShardedKeyedLocker<K, RandomState> {
    /// A locker with 16 shards, a reasonable default for light contention.
    fn default() -> Self {
        Self::new(4)
    }
}

impl<K, S> fmt::Debug for ShardedKeyedLocker<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedKeyedLocker")
            .field("shards", &self.shards.len())
            .finish()
    }
}

impl<K: Hash, S: BuildHasher> KeyedLocker<K> for ShardedKeyedLocker<K, S> {
    type WriteGuard<'a>
        = ShardWriteGuard<'a>
    where
        Self: 'a;
    type ReadGuard<'a>
        = ShardReadGuard<'a>
    where
        Self: 'a;

    #[inline]
    fn write(&self, key: K) -> ShardWriteGuard<'_> {
        ShardedKeyedLocker::write(self, &key)
    }

    #[inline]
    fn try_write(&self, key: K) -> Option<ShardWriteGuard<'_>> {
        ShardedKeyedLocker::try_write(self, &key)
    }

    #[inline]
    fn read(&self, key: K) -> ShardReadGuard<'_> {
        ShardedKeyedLocker::read(self, &key)
    }

    #[inline]
    fn try_read(&self, key: K) -> Option<ShardReadGuard<'_>> {
        ShardedKeyedLocker::try_read(self, &key)
    }
}
