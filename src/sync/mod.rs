//! Reentrant, keyed, and pooling synchronization primitives.
//!
//! The following is an overview of the available primitives:
//!
//! - [`ReentrantLock`]: an exclusive lock which can be recursively acquired
//!   by a single task.
//!
//! - [`ReentrantRwLock`]: a read/write lock which allows recursive
//!   acquisition of either mode by a single task, as well as upgrading from
//!   read to write ownership and downgrading back.
//!
//! - [`MapKeyedLocker`]: lazily materializes one reentrant read/write lock
//!   per key over an unbounded key space.
//!
//! - [`ShardedKeyedLocker`]: maps keys onto a fixed power-of-two array of
//!   plain read/write locks, trading false contention for bounded memory.
//!
//! - [`ReusePool`]: a FIFO pool of reusable resources with caller-supplied
//!   construction, validation and disposal.
//!
//! The lock types expose both an explicit `lock`/`unlock` surface, which
//! faults loudly on misuse, and RAII guards for scoped acquisition.

mod keyed;
mod pool;
mod remutex;
mod rwlock;
mod sharded;

pub use keyed::{KeyedLocker, KeyedReadGuard, KeyedWriteGuard, MapKeyedLocker};
pub use pool::{BoxError, PoolError, ReusePool, ReusePoolBuilder};
pub use remutex::{ReentrantLock, ReentrantLockGuard};
pub use rwlock::{ReentrantReadGuard, ReentrantRwLock, ReentrantWriteGuard};
pub use sharded::{ShardReadGuard, ShardWriteGuard, ShardedKeyedLocker};

/// Marker type which indicates that a guard may not be sent to another task,
/// since releasing it there would corrupt the owner bookkeeping.
pub(crate) type GuardNoSend = *mut ();
