//! Synchronization primitives for coordinating access to shared, mutable
//! resources across concurrently executing tasks.
//!
//! The crate provides four families of primitives:
//!
//! - [`ReentrantLock`]: an exclusive lock that the owning task may acquire
//!   multiple times without blocking itself.
//! - [`ReentrantRwLock`]: a read/write lock supporting reentrant acquisition
//!   of either mode and upgrade/downgrade between read and write ownership
//!   by the same task.
//! - [`MapKeyedLocker`] and [`ShardedKeyedLocker`]: per-key lock managers
//!   that multiplex many independent critical sections over an unbounded or
//!   fixed set of locks.
//! - [`ReusePool`]: a generic object pool that recycles validated resources
//!   and discards invalid ones through a caller-supplied disposer.
//!
//! All reentrant primitives recognize re-entry through a task-identity
//! provider (the [`GetTaskId`] trait); [`RawThreadId`] is the default
//! provider, identifying each OS thread by the address of a thread-local.
//!
//! [`ReentrantLock`]: crate::sync::ReentrantLock
//! [`ReentrantRwLock`]: crate::sync::ReentrantRwLock
//! [`MapKeyedLocker`]: crate::sync::MapKeyedLocker
//! [`ShardedKeyedLocker`]: crate::sync::ShardedKeyedLocker
//! [`ReusePool`]: crate::sync::ReusePool

pub mod sync;
pub mod task_id;

pub use task_id::{GetTaskId, RawThreadId};
