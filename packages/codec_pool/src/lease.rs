//! Pool state shared by the encoder and decoder facades, and the lease that ties an acquired
//! handle back to it.

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, error, trace, warn};

use crate::{CodecHandle, ConstructionPolicy, Error, ObjectPool, Result, ReturnPolicy};

pub(crate) struct PoolCore<H: CodecHandle> {
    pub(crate) pool: ObjectPool<H>,
    pub(crate) live: Arc<AtomicUsize>,
    pub(crate) construction: ConstructionPolicy,
    pub(crate) return_policy: ReturnPolicy,
    pub(crate) leak_warnings: bool,
}

impl<H: CodecHandle> fmt::Debug for PoolCore<H> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolCore")
            .field("kind", &H::KIND)
            .field("pool", &self.pool)
            .field("live", &self.live.load(Ordering::Relaxed))
            .field("construction", &self.construction)
            .field("return_policy", &self.return_policy)
            .field("leak_warnings", &self.leak_warnings)
            .finish()
    }
}

impl<H: CodecHandle> PoolCore<H> {
    /// Takes an idle handle or constructs a new one.
    ///
    /// `None` means construction failed and the pool hands out degenerate wrappers.
    pub(crate) fn obtain(&self) -> Result<Option<H>> {
        if let Some(handle) = self.pool.take_idle() {
            trace!(kind = %H::KIND, "reusing idle codec handle");
            return Ok(Some(handle));
        }

        self.construct()
    }

    /// Constructs a new handle, applying the construction policy to failures.
    pub(crate) fn construct(&self) -> Result<Option<H>> {
        match self.pool.create() {
            Ok(handle) => {
                debug!(kind = %H::KIND, "constructed new codec handle");
                Ok(Some(handle))
            }
            Err(failure) => match self.construction {
                ConstructionPolicy::Propagate => Err(failure),
                ConstructionPolicy::Degenerate => {
                    error!(
                        kind = %H::KIND,
                        error = %failure,
                        "codec handle construction failed, handing out a wrapper without a handle"
                    );
                    Ok(None)
                }
                ConstructionPolicy::Panic => {
                    panic!("codec handle construction failed: {failure:?}");
                }
            },
        }
    }

    /// Resets a handle that a caller has finished with and returns it to the idle list if the
    /// return policy allows. Handles that are not returned are released here.
    fn reclaim(&self, mut handle: H) {
        match (handle.reset(), self.return_policy) {
            (Ok(()), _) => {
                trace!(kind = %H::KIND, "codec handle returned to pool");
                self.pool.release(handle);
            }
            (Err(failure), ReturnPolicy::Always) => {
                warn!(
                    kind = %H::KIND,
                    error = %failure,
                    "codec handle failed to reset, returning it to the pool anyway"
                );
                self.pool.release(handle);
            }
            (Err(failure), ReturnPolicy::OnSuccessfulReset) => {
                warn!(
                    kind = %H::KIND,
                    error = %failure,
                    "codec handle failed to reset, releasing it instead of returning it to the pool"
                );
            }
        }
    }
}

/// Exclusive ownership of one handle between acquire and release.
///
/// Dropping a lease that still holds its handle runs the same release path as an explicit
/// release, so a handle is never leaked by a caller that forgets to give it back. The lease only
/// holds a weak reference to its pool; if the pool is gone by the time the handle comes back,
/// the handle is released instead.
pub(crate) struct Lease<H: CodecHandle> {
    handle: Option<H>,
    home: Weak<PoolCore<H>>,
    leak_warnings: bool,
}

impl<H: CodecHandle> Lease<H> {
    pub(crate) fn new(handle: Option<H>, home: &Arc<PoolCore<H>>) -> Self {
        Self {
            handle,
            home: Arc::downgrade(home),
            leak_warnings: home.leak_warnings,
        }
    }

    pub(crate) fn handle_mut(&mut self) -> Result<&mut H> {
        self.handle
            .as_mut()
            .ok_or(Error::HandleAbsent { kind: H::KIND })
    }

    /// Whether the lease was taken from the pool that owns `core`.
    pub(crate) fn belongs_to(&self, core: &Arc<PoolCore<H>>) -> bool {
        ptr::eq(self.home.as_ptr(), Arc::as_ptr(core))
    }

    pub(crate) fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    /// Gives the handle back to the pool it came from.
    pub(crate) fn release(mut self) {
        self.give_back();
    }

    /// Terminally closes the handle. It never returns to the pool.
    pub(crate) fn close(mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
    }

    fn give_back(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        match self.home.upgrade() {
            Some(core) => core.reclaim(handle),
            None => {
                debug!(kind = %H::KIND, "owning pool is gone, releasing codec handle");
                drop(handle);
            }
        }
    }
}

impl<H: CodecHandle> Drop for Lease<H> {
    fn drop(&mut self) {
        if self.handle.is_none() {
            return;
        }

        if self.leak_warnings {
            warn!(
                kind = %H::KIND,
                "pooled codec dropped without an explicit release, releasing it implicitly"
            );
        }

        self.give_back();
    }
}

impl<H: CodecHandle + fmt::Debug> fmt::Debug for Lease<H> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("handle", &self.handle)
            .field("pool_alive", &(self.home.strong_count() > 0))
            .finish_non_exhaustive()
    }
}
