//! Cross-thread properties of the lock types: mutual exclusion, reader
//! overlap, writer progress and per-key independence under contention.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::{seq::SliceRandom, Rng};

use synckit::sync::{MapKeyedLocker, ReentrantLock, ReentrantRwLock, ShardedKeyedLocker};

/// Bumps `current`, records the high-water mark in `max`, and returns a
/// token whose drop undoes the bump.
fn enter<'a>(current: &'a AtomicIsize, max: &AtomicIsize) -> impl Drop + 'a {
    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
    max.fetch_max(now, Ordering::SeqCst);

    struct Leave<'a>(&'a AtomicIsize);
    impl Drop for Leave<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }
    Leave(current)
}

#[test]
fn reentrant_lock_mutual_exclusion() {
    let lock = Arc::new(ReentrantLock::new());
    let current = AtomicIsize::new(0);
    let max = AtomicIsize::new(0);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..500 {
                    lock.lock();
                    lock.lock();
                    {
                        let _token = enter(&current, &max);
                        std::hint::spin_loop();
                    }
                    lock.unlock();
                    lock.unlock();
                }
            });
        }
    });

    assert_eq!(max.load(Ordering::SeqCst), 1);
}

#[test]
fn rwlock_writers_are_mutually_exclusive() {
    let lock = Arc::new(ReentrantRwLock::new());
    let current = AtomicIsize::new(0);
    let max = AtomicIsize::new(0);

    thread::scope(|s| {
        for _ in 0..5 {
            s.spawn(|| {
                for _ in 0..200 {
                    let _guard = lock.write();
                    let _token = enter(&current, &max);
                    std::hint::spin_loop();
                }
            });
        }
    });

    assert_eq!(max.load(Ordering::SeqCst), 1);
}

#[test]
fn rwlock_readers_overlap() {
    let lock = Arc::new(ReentrantRwLock::new());
    let current = AtomicIsize::new(0);
    let max = AtomicIsize::new(0);

    thread::scope(|s| {
        for _ in 0..10 {
            s.spawn(|| {
                let _guard = lock.read();
                let _token = enter(&current, &max);
                thread::sleep(Duration::from_millis(100));
            });
        }
    });

    // With every reader sleeping while holding the lock, at least two of
    // them must have been inside simultaneously.
    assert!(
        max.load(Ordering::SeqCst) > 1,
        "readers never overlapped (max concurrency {})",
        max.load(Ordering::SeqCst)
    );
}

#[test]
fn rwlock_readers_and_writers_exclude_each_other() {
    let lock = Arc::new(ReentrantRwLock::new());
    let readers = AtomicIsize::new(0);
    let writers = AtomicIsize::new(0);
    let violations = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..5 {
            s.spawn(|| {
                for _ in 0..50 {
                    let _guard = lock.read();
                    readers.fetch_add(1, Ordering::SeqCst);
                    if writers.load(Ordering::SeqCst) > 0 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(1));
                    readers.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }
        for _ in 0..3 {
            s.spawn(|| {
                for _ in 0..25 {
                    let _guard = lock.write();
                    writers.fetch_add(1, Ordering::SeqCst);
                    if readers.load(Ordering::SeqCst) > 0 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(2));
                    writers.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(violations.load(Ordering::SeqCst), 0);
}

#[test]
fn rwlock_writer_is_not_starved_forever() {
    let lock = Arc::new(ReentrantRwLock::new());
    let writer_ran = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..5 {
            s.spawn(|| {
                let _guard = lock.read();
                thread::sleep(Duration::from_millis(100));
            });
        }
        s.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            let _guard = lock.write();
            writer_ran.fetch_add(1, Ordering::SeqCst);
        });
    });

    assert_eq!(writer_ran.load(Ordering::SeqCst), 1);
}

#[test]
fn rwlock_counter_stress() {
    let lock = Arc::new(ReentrantRwLock::new());
    let counter = AtomicI64::new(0);

    thread::scope(|s| {
        for _ in 0..20 {
            s.spawn(|| {
                for _ in 0..1000 {
                    let _guard = lock.read();
                    let _ = counter.load(Ordering::SeqCst);
                    thread::yield_now();
                }
            });
        }
        for _ in 0..5 {
            s.spawn(|| {
                for _ in 0..200 {
                    let _guard = lock.write();
                    counter.fetch_add(1, Ordering::SeqCst);
                    thread::yield_now();
                }
            });
        }
    });

    assert_eq!(counter.load(Ordering::SeqCst), 5 * 200);
}

#[test]
fn upgrade_succeeds_under_reader_churn() {
    let lock = Arc::new(ReentrantRwLock::new());

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..100 {
                    let _guard = lock.read();
                    thread::yield_now();
                }
            });
        }
        s.spawn(|| {
            for _ in 0..20 {
                // Hold read, then upgrade; must complete without deadlock
                // once this task is the sole remaining reader.
                lock.lock_shared();
                lock.lock_exclusive();
                lock.unlock_exclusive();
                lock.unlock_shared();
            }
        });
    });
}

#[test]
fn map_keyed_locker_guards_per_key_counters() {
    let locker = Arc::new(MapKeyedLocker::<u32>::new());
    let keys: Vec<u32> = (0..8).collect();
    let mut plain: HashMap<u32, Arc<AtomicI64>> = HashMap::new();
    for &key in &keys {
        plain.insert(key, Arc::new(AtomicI64::new(0)));
    }
    let plain = Arc::new(plain);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                let mut rng = rand::thread_rng();
                for _ in 0..500 {
                    let key = *keys.choose(&mut rng).unwrap();
                    let _guard = locker.write(key);
                    // Non-atomic read-modify-write would race without the
                    // per-key lock; the counter doubles as a witness.
                    let counter = &plain[&key];
                    let val = counter.load(Ordering::Relaxed);
                    thread::yield_now();
                    counter.store(val + 1, Ordering::Relaxed);
                }
            });
        }
    });

    let total: i64 = plain.values().map(|c| c.load(Ordering::SeqCst)).sum();
    assert_eq!(total, 8 * 500);
}

#[test]
fn sharded_keyed_locker_guards_per_key_counters() {
    let locker = Arc::new(ShardedKeyedLocker::<u32>::new(5));
    let counters: Vec<Arc<AtomicI64>> = (0..8).map(|_| Arc::new(AtomicI64::new(0))).collect();
    let counters = Arc::new(counters);

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                let mut rng = rand::thread_rng();
                for _ in 0..500 {
                    let key = rng.gen_range(0..8u32);
                    let _guard = locker.write(&key);
                    let counter = &counters[key as usize];
                    let val = counter.load(Ordering::Relaxed);
                    thread::yield_now();
                    counter.store(val + 1, Ordering::Relaxed);
                }
            });
        }
    });

    let total: i64 = counters.iter().map(|c| c.load(Ordering::SeqCst)).sum();
    assert_eq!(total, 8 * 500);
}
