use std::fmt;
use std::io::{self, Write};
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::warn;

use crate::{
    CodecHandle, ConstructionPolicy, EncoderConfig, EncoderHandle, EncoderOption, Lease,
    ObjectPool, PoolCore, Result, ReturnPolicy,
};

/// A thread-safe pool of reusable zstd encoders.
///
/// Constructing a zstd compression context allocates several megabytes of engine state, so
/// callers that compress many independent streams save a lot of work by reusing contexts. The
/// pool hands out [`PooledEncoder`]s bound to a caller-supplied sink. When the caller is done,
/// the encoder is reset and its context goes back to the pool for the next caller.
///
/// Cloning the pool is cheap and every clone refers to the same set of idle encoders.
///
/// # Examples
///
/// ```
/// use std::io::Write;
///
/// use codec_pool::EncoderPool;
///
/// let pool = EncoderPool::new();
///
/// let mut encoder = pool.acquire(Vec::new()).unwrap();
/// encoder.write_all(b"hello pooled world").unwrap();
/// let compressed = encoder.finish().unwrap();
///
/// assert_eq!(zstd::decode_all(compressed.as_slice()).unwrap(), b"hello pooled world");
/// ```
#[derive(Clone, Debug)]
pub struct EncoderPool {
    core: Arc<PoolCore<EncoderHandle>>,
}

impl EncoderPool {
    /// Creates a pool that constructs encoders with the default compression level.
    ///
    /// Use [`EncoderPool::builder()`] for custom configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a pool that constructs encoders with the given codec options.
    #[must_use]
    pub fn with_options(options: impl IntoIterator<Item = EncoderOption>) -> Self {
        Self::builder().options(options).build()
    }

    /// Creates a builder for configuring the pool.
    pub fn builder() -> EncoderPoolBuilder {
        EncoderPoolBuilder::new()
    }

    /// Takes an idle encoder, or constructs a new one, and binds it to `sink`.
    ///
    /// An idle encoder that fails to reset is released and replaced by a new one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Construction`][crate::Error::Construction] if a new encoder is needed,
    /// the codec engine fails to construct it and the pool uses
    /// [`ConstructionPolicy::Propagate`].
    pub fn acquire<W: Write>(&self, sink: W) -> Result<PooledEncoder<W>> {
        let mut handle = self.core.obtain()?;

        if let Some(Err(error)) = handle.as_mut().map(CodecHandle::reset) {
            warn!(
                kind = %EncoderHandle::KIND,
                error = %error,
                "idle encoder failed to reset, replacing it with a new one"
            );

            if let Some(mut stale) = handle.take() {
                stale.close();
            }

            handle = self.core.construct()?;
        }

        Ok(PooledEncoder {
            lease: Lease::new(handle, &self.core),
            sink,
        })
    }

    /// Resets `encoder` and returns it to the pool it was acquired from, discarding any frame
    /// that was not finished. Returns the sink the encoder was bound to.
    ///
    /// This is equivalent to [`PooledEncoder::release()`]. An encoder always goes back to the
    /// pool it was acquired from.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if `encoder` was acquired from a different pool.
    pub fn release<W: Write>(&self, encoder: PooledEncoder<W>) -> W {
        debug_assert!(
            encoder.lease.belongs_to(&self.core),
            "encoder released to a pool it was not acquired from"
        );

        encoder.release()
    }

    /// The number of encoders belonging to this pool whose codec context has not been
    /// released yet, whether idle in the pool or held by a caller.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.core.live.load(Ordering::Relaxed)
    }

    /// The number of encoders waiting in the pool for a caller.
    #[must_use]
    pub fn idle_handles(&self) -> usize {
        self.core.pool.idle_len()
    }

    /// Releases every idle encoder.
    ///
    /// Encoders currently held by callers are unaffected and return to the pool as usual.
    pub fn clear(&self) {
        self.core.pool.clear();
    }
}

impl Default for EncoderPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for configuring an [`EncoderPool`].
///
/// # Examples
///
/// ```
/// use codec_pool::{EncoderOption, EncoderPool, ReturnPolicy};
///
/// let pool = EncoderPool::builder()
///     .option(EncoderOption::Level(9))
///     .return_policy(ReturnPolicy::OnSuccessfulReset)
///     .max_idle(16)
///     .build();
/// # drop(pool);
/// ```
#[derive(Debug)]
#[must_use]
pub struct EncoderPoolBuilder {
    config: EncoderConfig,
    construction: ConstructionPolicy,
    return_policy: ReturnPolicy,
    max_idle: usize,
    leak_warnings: bool,
}

impl EncoderPoolBuilder {
    fn new() -> Self {
        Self {
            config: EncoderConfig::default(),
            construction: ConstructionPolicy::default(),
            return_policy: ReturnPolicy::default(),
            max_idle: usize::MAX,
            leak_warnings: cfg!(debug_assertions),
        }
    }

    /// Applies one codec option to every encoder the pool constructs.
    pub fn option(mut self, option: EncoderOption) -> Self {
        self.config.apply(option);
        self
    }

    /// Applies codec options in order to every encoder the pool constructs.
    pub fn options(mut self, options: impl IntoIterator<Item = EncoderOption>) -> Self {
        for option in options {
            self.config.apply(option);
        }

        self
    }

    /// Sets what happens when the codec engine fails to construct an encoder.
    ///
    /// Default is [`ConstructionPolicy::Propagate`].
    pub fn construction_policy(mut self, policy: ConstructionPolicy) -> Self {
        self.construction = policy;
        self
    }

    /// Sets whether an encoder that fails to reset on release still returns to the pool.
    ///
    /// Default is [`ReturnPolicy::Always`]. See [`ReturnPolicy`] for how this differs from
    /// decoder pools.
    pub fn return_policy(mut self, policy: ReturnPolicy) -> Self {
        self.return_policy = policy;
        self
    }

    /// Sets how many idle encoders the pool retains. Encoders released into a full pool are
    /// released instead of retained.
    ///
    /// Default is unlimited.
    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Sets whether dropping a [`PooledEncoder`] without releasing, finishing or closing it
    /// logs a warning.
    ///
    /// Default is enabled in debug builds and disabled in release builds.
    pub fn leak_warnings(mut self, enabled: bool) -> Self {
        self.leak_warnings = enabled;
        self
    }

    /// Builds the pool. No encoders are constructed until the first acquire.
    #[must_use]
    pub fn build(self) -> EncoderPool {
        let live = Arc::new(AtomicUsize::new(0));
        let config = self.config;

        let pool = ObjectPool::new({
            let live = Arc::clone(&live);
            move || EncoderHandle::new(&config, &live)
        })
        .with_max_idle(self.max_idle);

        EncoderPool {
            core: Arc::new(PoolCore {
                pool,
                live,
                construction: self.construction,
                return_policy: self.return_policy,
                leak_warnings: self.leak_warnings,
            }),
        }
    }
}

/// A pooled zstd encoder bound to a sink.
///
/// Data written to the encoder is compressed and written to the sink. Call
/// [`finish()`][Self::finish] to complete the frame and return the encoder to its pool, or
/// [`release()`][Self::release] to abandon the frame and return the encoder to its pool.
///
/// Dropping the encoder behaves like [`release()`][Self::release]: the frame is abandoned and
/// the encoder returns to its pool, or is released if the pool no longer exists.
///
/// An encoder acquired from a pool configured with [`ConstructionPolicy::Degenerate`] may hold
/// no codec context. Every codec operation on such an encoder fails with an I/O error of kind
/// [`NotConnected`][io::ErrorKind::NotConnected].
pub struct PooledEncoder<W: Write> {
    lease: Lease<EncoderHandle>,
    sink: W,
}

impl<W: Write> PooledEncoder<W> {
    /// Abandons the current frame and binds the encoder to a new sink, returning the previous
    /// one. The codec context keeps its allocations and parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoder holds no codec context or the codec engine fails to
    /// reset it. The encoder stays bound to the previous sink in that case.
    pub fn reset(&mut self, sink: W) -> Result<W> {
        self.lease.handle_mut()?.reset()?;
        Ok(mem::replace(&mut self.sink, sink))
    }

    /// Completes the current frame, returns the encoder to its pool and hands back the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the codec engine or the sink fails while writing the end of the
    /// frame. The encoder returns to its pool either way.
    pub fn finish(self) -> io::Result<W> {
        let Self { mut lease, mut sink } = self;

        let result = Self::end_frame(&mut lease, &mut sink);
        lease.release();

        result.map(|()| sink)
    }

    /// Completes the current frame and terminally closes the codec context instead of
    /// returning it to the pool. Hands back the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the codec engine or the sink fails while writing the end of the
    /// frame. The codec context is closed either way.
    pub fn close(self) -> io::Result<W> {
        let Self { mut lease, mut sink } = self;

        let result = Self::end_frame(&mut lease, &mut sink);
        lease.close();

        result.map(|()| sink)
    }

    /// Abandons the current frame, returns the encoder to its pool and hands back the sink.
    pub fn release(self) -> W {
        let Self { lease, sink } = self;
        lease.release();
        sink
    }

    /// Whether the encoder holds a codec context.
    ///
    /// This is only ever `false` for encoders handed out under
    /// [`ConstructionPolicy::Degenerate`].
    #[must_use]
    pub fn has_handle(&self) -> bool {
        self.lease.has_handle()
    }

    /// The sink the encoder writes compressed data to.
    #[must_use]
    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// The sink the encoder writes compressed data to.
    ///
    /// Writing to the sink directly interleaves with the compressed stream and corrupts it.
    #[must_use]
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    fn end_frame(lease: &mut Lease<EncoderHandle>, sink: &mut W) -> io::Result<()> {
        lease.handle_mut()?.finish_to(sink)
    }
}

impl<W: Write> Write for PooledEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lease.handle_mut()?.write_to(buf, &mut self.sink)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lease.handle_mut()?.flush_to(&mut self.sink)
    }
}

impl<W: Write> fmt::Debug for PooledEncoder<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledEncoder")
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}
