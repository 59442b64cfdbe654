use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::VecDeque;
use std::error::Error;
use std::mem;

use parking_lot::Mutex;
use static_assertions::assert_impl_all;

/// Boxed error type returned by pool callbacks.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

type Factory<T>   = Box<dyn Fn() -> Result<T, BoxError> + Send + Sync>;
type Validator<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type Disposer<T>  = Box<dyn Fn(T) -> Result<(), BoxError> + Send + Sync>;

/// Error returned by [`ReusePool`] operations.
///
/// These are environmental failures surfaced to the caller; none of them
/// indicate pool misuse, and no operation retries internally.
pub enum PoolError {
    /// The pool was closed; no resources are handed out anymore.
    Closed,
    /// The pool is empty and no factory was configured.
    Empty,
    /// The factory failed to construct a fresh resource.
    Factory(BoxError),
    /// The disposer failed while discarding a resource.
    Dispose(BoxError),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Closed       => f.write_str("pool is closed"),
            PoolError::Empty        => f.write_str("pool is empty and has no factory"),
            PoolError::Factory(err) => write!(f, "factory failed: {err}"),
            PoolError::Dispose(err) => write!(f, "disposer failed: {err}"),
        }
    }
}

impl fmt::Debug for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Error for PoolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PoolError::Factory(err) | PoolError::Dispose(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// A FIFO pool of reusable resources.
///
/// Resources enter the pool through [`put`](ReusePool::put) and leave it
/// through [`get`](ReusePool::get); ownership transfers to the caller on
/// `get` and back to the pool on `put`. Three optional callbacks shape the
/// pool's behavior:
///
/// - a **factory** constructs a fresh resource when the queue cannot supply
///   a valid one; without it, `get` on an exhausted pool fails with
///   [`PoolError::Empty`].
/// - a **validator** decides whether a resource is still usable; resources
///   are re-validated on both `put` and `get`. Without it, everything is
///   accepted.
/// - a **disposer** cleans up rejected or drained resources; without it,
///   dropping the value is the cleanup.
///
/// Pool bookkeeping holds an internal mutex only briefly; `get` blocks only
/// to the extent the factory itself blocks. Once [`close`](ReusePool::close)
/// has been called, `get` fails immediately and `put` disposes instead of
/// enqueueing, so no resource can leak into a pool nobody will drain again.
pub struct ReusePool<T> {
    resources : Mutex<VecDeque<T>>,
    factory   : Option<Factory<T>>,
    validator : Option<Validator<T>>,
    disposer  : Option<Disposer<T>>,
    closed    : AtomicBool,
}

assert_impl_all!(ReusePool<Vec<u8>>: Send, Sync);

impl<T> ReusePool<T> {
    /// Creates a pool with no callbacks: nothing is constructed on demand,
    /// everything is accepted, and dropping is the cleanup.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a builder for a pool with callbacks.
    pub fn builder() -> ReusePoolBuilder<T> {
        ReusePoolBuilder {
            factory: None,
            validator: None,
            disposer: None,
        }
    }

    /// Retrieves a resource from the pool, transferring ownership to the
    /// caller.
    ///
    /// Queued resources are considered in FIFO order and re-validated;
    /// resources the validator rejects are passed to the disposer and
    /// skipped. When the queue is exhausted, the factory is invoked for a
    /// fresh resource.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Closed`] when the pool has been closed.
    /// - [`PoolError::Dispose`] when discarding a rejected resource fails.
    /// - [`PoolError::Factory`] when the factory fails.
    /// - [`PoolError::Empty`] when the queue is exhausted and no factory is
    ///   configured.
    pub fn get(&self) -> Result<T, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        loop {
            let candidate = self.resources.lock().pop_front();
            match candidate {
                None => break,
                Some(res) => {
                    if self.is_valid(&res) {
                        return Ok(res);
                    }
                    self.dispose(res)?;
                }
            }
        }

        match &self.factory {
            Some(factory) => factory().map_err(PoolError::Factory),
            None => Err(PoolError::Empty),
        }
    }

    /// Returns a resource to the pool.
    ///
    /// If the pool is closed or the validator rejects the resource, it is
    /// disposed of immediately instead of being enqueued.
    ///
    /// # Errors
    ///
    /// [`PoolError::Dispose`] when disposal of a rejected resource fails.
    pub fn put(&self, res: T) -> Result<(), PoolError> {
        if self.closed.load(Ordering::Acquire) || !self.is_valid(&res) {
            return self.dispose(res);
        }
        self.resources.lock().push_back(res);
        Ok(())
    }

    /// Drains the queue, disposing of every resource.
    ///
    /// Draining continues past disposal failures so that no resource is
    /// left behind; only the first error encountered is returned.
    pub fn clear(&self) -> Result<(), PoolError> {
        let drained = mem::take(&mut *self.resources.lock());

        let mut first_err = None;
        for res in drained {
            if let Err(err) = self.dispose(res) {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Closes the pool and drains the queue.
    ///
    /// After this call [`get`](ReusePool::get) fails with
    /// [`PoolError::Closed`] and [`put`](ReusePool::put) disposes instead of
    /// enqueueing. Closing an already-closed pool just drains again.
    pub fn close(&self) -> Result<(), PoolError> {
        self.closed.store(true, Ordering::Release);
        self.clear()
    }

    /// Checks whether the pool has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the number of resources currently queued.
    #[inline]
    pub fn len(&self) -> usize {
        self.resources.lock().len()
    }

    /// Checks whether no resources are currently queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.resources.lock().is_empty()
    }

    fn is_valid(&self, res: &T) -> bool {
        self.validator.as_ref().map_or(true, |validator| validator(res))
    }

    fn dispose(&self, res: T) -> Result<(), PoolError> {
        match &self.disposer {
            Some(disposer) => disposer(res).map_err(PoolError::Dispose),
            None => Ok(()),
        }
    }
}

impl<T> Default for ReusePool<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ReusePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReusePool")
            .field("queued", &self.resources.lock().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Builder for [`ReusePool`], configuring its optional callbacks.
pub struct ReusePoolBuilder<T> {
    factory   : Option<Factory<T>>,
    validator : Option<Validator<T>>,
    disposer  : Option<Disposer<T>>,
}

impl<T> ReusePoolBuilder<T> {
    /// Sets the factory used to construct a fresh resource when the queue
    /// cannot supply a valid one.
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<T, BoxError> + Send + Sync + 'static,
    {
        self.factory = Some(Box::new(factory));
        self
    }

    /// Sets the validator deciding whether a resource is still usable.
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Sets the disposer invoked when a resource is discarded rather than
    /// reused.
    pub fn disposer<F>(mut self, disposer: F) -> Self
    where
        F: Fn(T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.disposer = Some(Box::new(disposer));
        self
    }

    /// Builds the pool with an empty queue.
    pub fn build(self) -> ReusePool<T> {
        ReusePool {
            resources: Mutex::new(VecDeque::new()),
            factory: self.factory,
            validator: self.validator,
            disposer: self.disposer,
            closed: AtomicBool::new(false),
        }
    }
}

impl<T> fmt::Debug for ReusePoolBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReusePoolBuilder")
            .field("factory", &self.factory.is_some())
            .field("validator", &self.validator.is_some())
            .field("disposer", &self.disposer.is_some())
            .finish()
    }
}
