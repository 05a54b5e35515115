use std::any::type_name;
use std::fmt;
use std::mem;

use parking_lot::Mutex;

use crate::Error;

type CreateFn<T> = dyn Fn() -> Result<T, Error> + Send + Sync;

/// A best-effort, thread-safe collection of idle reusable objects.
///
/// Acquiring takes any idle object or, if there is none, constructs a new one on the calling
/// thread using the construction function given at creation time. Releasing places an object
/// back in the idle list.
///
/// The pool makes no promises about which idle object an acquire returns, nor about keeping
/// released objects around: with an idle cap configured, objects released into a full pool are
/// dropped, and [`clear()`][Self::clear] drops every idle object at once. The pool never holds a
/// reference to an object while a caller owns it.
///
/// # Examples
///
/// ```
/// use codec_pool::ObjectPool;
///
/// let pool = ObjectPool::new(|| Ok(Vec::<u8>::with_capacity(1024)));
///
/// let buffer = pool.acquire().unwrap();
/// assert!(buffer.capacity() >= 1024);
///
/// pool.release(buffer);
/// assert_eq!(pool.idle_len(), 1);
/// ```
pub struct ObjectPool<T> {
    idle: Mutex<Vec<T>>,
    create: Box<CreateFn<T>>,
    max_idle: usize,
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("idle", &self.idle.lock().len())
            .field("max_idle", &self.max_idle)
            .finish_non_exhaustive()
    }
}

impl<T> ObjectPool<T> {
    /// Creates an empty pool with no idle cap that constructs new objects with `create`.
    #[must_use]
    pub fn new<F>(create: F) -> Self
    where
        F: Fn() -> Result<T, Error> + Send + Sync + 'static,
    {
        Self {
            idle: Mutex::new(Vec::new()),
            create: Box::new(create),
            max_idle: usize::MAX,
        }
    }

    /// Limits how many idle objects the pool retains. Objects released into a pool that
    /// already holds `max_idle` idle objects are dropped.
    #[must_use]
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Takes an idle object or constructs a new one.
    ///
    /// # Errors
    ///
    /// Returns whatever error the construction function returns when there is no idle object.
    pub fn acquire(&self) -> Result<T, Error> {
        match self.take_idle() {
            Some(item) => Ok(item),
            None => self.create(),
        }
    }

    /// Takes an idle object, if there is one.
    #[must_use]
    pub fn take_idle(&self) -> Option<T> {
        self.idle.lock().pop()
    }

    /// Constructs a new object without consulting the idle list.
    ///
    /// The construction function runs without holding the pool's lock, so concurrent callers
    /// may construct objects in parallel.
    ///
    /// # Errors
    ///
    /// Returns whatever error the construction function returns.
    pub fn create(&self) -> Result<T, Error> {
        (self.create)()
    }

    /// Places an object in the idle list, or drops it if the idle cap has been reached.
    pub fn release(&self, item: T) {
        let mut idle = self.idle.lock();

        if idle.len() < self.max_idle {
            idle.push(item);
            return;
        }

        drop(idle);

        // Dropped outside the lock, as dropping a codec handle frees engine resources.
        drop(item);
    }

    /// Drops every idle object.
    pub fn clear(&self) {
        let idle = mem::take(&mut *self.idle.lock());
        drop(idle);
    }

    /// The number of idle objects currently held by the pool.
    #[must_use]
    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::CodecKind;

    assert_impl_all!(ObjectPool<Vec<u8>>: Send, Sync);

    fn counting_pool() -> (ObjectPool<usize>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));

        let pool = ObjectPool::new({
            let created = Arc::clone(&created);
            move || Ok(created.fetch_add(1, Ordering::Relaxed))
        });

        (pool, created)
    }

    #[test]
    fn acquire_constructs_when_empty() {
        let (pool, created) = counting_pool();

        assert_eq!(pool.acquire().unwrap(), 0);
        assert_eq!(pool.acquire().unwrap(), 1);
        assert_eq!(created.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn acquire_prefers_idle_items() {
        let (pool, created) = counting_pool();

        let item = pool.acquire().unwrap();
        pool.release(item);

        assert_eq!(pool.acquire().unwrap(), item);
        assert_eq!(created.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn release_beyond_cap_drops_item() {
        let (pool, _) = counting_pool();
        let pool = pool.with_max_idle(1);

        pool.release(10);
        pool.release(11);

        assert_eq!(pool.idle_len(), 1);
    }

    #[test]
    fn zero_cap_never_retains() {
        let (pool, _) = counting_pool();
        let pool = pool.with_max_idle(0);

        pool.release(10);

        assert_eq!(pool.idle_len(), 0);
        assert!(pool.take_idle().is_none());
    }

    #[test]
    fn clear_drops_idle_items() {
        let (pool, _) = counting_pool();

        pool.release(1);
        pool.release(2);
        pool.clear();

        assert_eq!(pool.idle_len(), 0);
    }

    #[test]
    fn construction_error_is_returned() {
        let pool = ObjectPool::<u32>::new(|| {
            Err(Error::Construction {
                kind: CodecKind::Encoder,
                source: io::Error::other("no memory"),
            })
        });

        assert!(matches!(pool.acquire(), Err(Error::Construction { .. })));
    }
}
