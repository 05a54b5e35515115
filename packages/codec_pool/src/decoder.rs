use std::fmt;
use std::io::{self, Read};
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    CodecHandle, ConstructionPolicy, DecoderConfig, DecoderHandle, DecoderOption, Lease,
    ObjectPool, PoolCore, Result, ReturnPolicy,
};

/// A thread-safe pool of reusable zstd decoders.
///
/// The pool hands out [`PooledDecoder`]s bound to a caller-supplied source of compressed bytes.
/// When the caller is done, the decoder's source is reset to empty and the decoder goes back to
/// the pool for the next caller.
///
/// A decoder is never terminally closed while it can still be reused: a closed zstd decoder
/// cannot be reset again. Releasing a decoder only returns it to the pool if its reset
/// succeeds, so the pool only ever contains decoders that are ready for a new source.
///
/// Cloning the pool is cheap and every clone refers to the same set of idle decoders.
///
/// # Examples
///
/// ```
/// use std::io::Read;
///
/// use codec_pool::DecoderPool;
///
/// let compressed = zstd::encode_all(&b"hello pooled world"[..], 3).unwrap();
///
/// let pool = DecoderPool::new();
/// let mut decoder = pool.acquire(compressed.as_slice()).unwrap();
///
/// let mut decompressed = Vec::new();
/// decoder.read_to_end(&mut decompressed).unwrap();
/// pool.release(decoder);
///
/// assert_eq!(decompressed, b"hello pooled world");
/// ```
#[derive(Clone, Debug)]
pub struct DecoderPool {
    core: Arc<PoolCore<DecoderHandle>>,
}

impl DecoderPool {
    /// Creates a pool that constructs decoders with default settings.
    ///
    /// Use [`DecoderPool::builder()`] for custom configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a pool that constructs decoders with the given codec options.
    #[must_use]
    pub fn with_options(options: impl IntoIterator<Item = DecoderOption>) -> Self {
        Self::builder().options(options).build()
    }

    /// Creates a builder for configuring the pool.
    pub fn builder() -> DecoderPoolBuilder {
        DecoderPoolBuilder::new()
    }

    /// Takes an idle decoder, or constructs a new one, and binds it to `source`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Construction`][crate::Error::Construction] if a new decoder is needed,
    /// the codec engine fails to construct it and the pool uses
    /// [`ConstructionPolicy::Propagate`].
    ///
    /// # Panics
    ///
    /// Panics if the decoder taken from the pool cannot be reset. The pool only ever stores
    /// decoders whose reset succeeded on release, so this indicates a broken invariant rather
    /// than a condition the caller can recover from.
    pub fn acquire<R: Read>(&self, source: R) -> Result<PooledDecoder<R>> {
        let mut handle = self.core.obtain()?;

        if let Some(Err(error)) = handle.as_mut().map(CodecHandle::reset) {
            panic!("pooled decoder could not be reset, the pool stored an unusable decoder: {error}");
        }

        Ok(PooledDecoder {
            lease: Lease::new(handle, &self.core),
            source,
        })
    }

    /// Resets `decoder` to an empty source and, if that succeeds, returns it to the pool it was
    /// acquired from. Returns the source the decoder was bound to.
    ///
    /// This is equivalent to [`PooledDecoder::release()`]. A decoder always goes back to the
    /// pool it was acquired from.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if `decoder` was acquired from a different pool.
    pub fn release<R: Read>(&self, decoder: PooledDecoder<R>) -> R {
        debug_assert!(
            decoder.lease.belongs_to(&self.core),
            "decoder released to a pool it was not acquired from"
        );

        decoder.release()
    }

    /// The number of decoders belonging to this pool whose codec context has not been
    /// released yet, whether idle in the pool or held by a caller.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.core.live.load(Ordering::Relaxed)
    }

    /// The number of decoders waiting in the pool for a caller.
    #[must_use]
    pub fn idle_handles(&self) -> usize {
        self.core.pool.idle_len()
    }

    /// Releases every idle decoder.
    ///
    /// Decoders currently held by callers are unaffected and return to the pool as usual.
    pub fn clear(&self) {
        self.core.pool.clear();
    }
}

impl Default for DecoderPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for configuring a [`DecoderPool`].
///
/// # Examples
///
/// ```
/// use codec_pool::{DecoderOption, DecoderPool};
///
/// let pool = DecoderPool::builder()
///     .option(DecoderOption::WindowLogMax(27))
///     .max_idle(8)
///     .build();
/// # drop(pool);
/// ```
#[derive(Debug)]
#[must_use]
pub struct DecoderPoolBuilder {
    config: DecoderConfig,
    construction: ConstructionPolicy,
    max_idle: usize,
    leak_warnings: bool,
}

impl DecoderPoolBuilder {
    fn new() -> Self {
        Self {
            config: DecoderConfig::default(),
            construction: ConstructionPolicy::default(),
            max_idle: usize::MAX,
            leak_warnings: cfg!(debug_assertions),
        }
    }

    /// Applies one codec option to every decoder the pool constructs.
    pub fn option(mut self, option: DecoderOption) -> Self {
        self.config.apply(option);
        self
    }

    /// Applies codec options in order to every decoder the pool constructs.
    pub fn options(mut self, options: impl IntoIterator<Item = DecoderOption>) -> Self {
        for option in options {
            self.config.apply(option);
        }

        self
    }

    /// Sets what happens when the codec engine fails to construct a decoder.
    ///
    /// Default is [`ConstructionPolicy::Propagate`].
    pub fn construction_policy(mut self, policy: ConstructionPolicy) -> Self {
        self.construction = policy;
        self
    }

    /// Sets how many idle decoders the pool retains. Decoders released into a full pool are
    /// released instead of retained.
    ///
    /// Default is unlimited.
    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Sets whether dropping a [`PooledDecoder`] without releasing it logs a warning.
    ///
    /// Closing or dropping a [`DecoderStream`] counts as releasing it. Default is enabled in
    /// debug builds and disabled in release builds.
    pub fn leak_warnings(mut self, enabled: bool) -> Self {
        self.leak_warnings = enabled;
        self
    }

    /// Builds the pool. No decoders are constructed until the first acquire.
    #[must_use]
    pub fn build(self) -> DecoderPool {
        let live = Arc::new(AtomicUsize::new(0));
        let config = self.config;

        let pool = ObjectPool::new({
            let live = Arc::clone(&live);
            move || DecoderHandle::new(&config, &live)
        })
        .with_max_idle(self.max_idle);

        DecoderPool {
            core: Arc::new(PoolCore {
                pool,
                live,
                construction: self.construction,
                return_policy: ReturnPolicy::OnSuccessfulReset,
                leak_warnings: self.leak_warnings,
            }),
        }
    }
}

/// A pooled zstd decoder bound to a source of compressed bytes.
///
/// Reading from the decoder yields the decompressed stream. Concatenated frames are decoded
/// one after another; a source that ends in the middle of a frame produces an error of kind
/// [`UnexpectedEof`][io::ErrorKind::UnexpectedEof].
///
/// Call [`release()`][Self::release] when done to reset the decoder and return it to its pool.
/// Dropping the decoder does the same. There is deliberately no way to terminally close a
/// pooled decoder.
///
/// A decoder acquired from a pool configured with [`ConstructionPolicy::Degenerate`] may hold
/// no codec context. Reading from such a decoder fails with an I/O error of kind
/// [`NotConnected`][io::ErrorKind::NotConnected].
pub struct PooledDecoder<R: Read> {
    lease: Lease<DecoderHandle>,
    source: R,
}

impl<R: Read> PooledDecoder<R> {
    /// Abandons whatever is left of the current source and binds the decoder to a new one,
    /// returning the previous source. The codec context keeps its allocations and parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the decoder holds no codec context or the codec engine fails to
    /// reset it. The decoder stays bound to the previous source in that case.
    pub fn reset(&mut self, source: R) -> Result<R> {
        self.lease.handle_mut()?.reset()?;
        Ok(mem::replace(&mut self.source, source))
    }

    /// Resets the decoder to an empty source and, if that succeeds, returns it to its pool.
    /// Hands back the source.
    ///
    /// If the reset fails, the decoder is released instead of being returned to the pool.
    pub fn release(self) -> R {
        let Self { lease, source } = self;
        lease.release();
        source
    }

    /// Converts the decoder into a plain byte stream for code that knows nothing about
    /// pooling. Closing or dropping the stream releases the decoder back to its pool.
    #[must_use]
    pub fn into_stream(self) -> DecoderStream<R> {
        DecoderStream {
            decoder: Some(self),
        }
    }

    /// Whether the decoder holds a codec context.
    ///
    /// This is only ever `false` for decoders handed out under
    /// [`ConstructionPolicy::Degenerate`].
    #[must_use]
    pub fn has_handle(&self) -> bool {
        self.lease.has_handle()
    }

    /// The source the decoder reads compressed data from.
    #[must_use]
    pub fn get_ref(&self) -> &R {
        &self.source
    }

    /// The source the decoder reads compressed data from.
    ///
    /// Reading from the source directly skips compressed data and corrupts the stream.
    #[must_use]
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.source
    }
}

impl<R: Read> Read for PooledDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.lease.handle_mut()?.read_from(&mut self.source, buf)
    }
}

impl<R: Read> fmt::Debug for PooledDecoder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledDecoder")
            .field("lease", &self.lease)
            .finish_non_exhaustive()
    }
}

/// The decompressed output of a [`PooledDecoder`] as a plain byte stream.
///
/// The stream owns the decoder. Closing it, explicitly or by dropping it, releases the decoder
/// back to its pool exactly like [`PooledDecoder::release()`], whether or not the stream was
/// read to the end. Closing never fails.
///
/// # Examples
///
/// ```
/// use std::io;
///
/// use codec_pool::DecoderPool;
///
/// let compressed = zstd::encode_all(&b"streamed"[..], 3).unwrap();
/// let pool = DecoderPool::new();
///
/// let mut stream = pool.acquire(compressed.as_slice()).unwrap().into_stream();
/// let mut decompressed = Vec::new();
/// io::copy(&mut stream, &mut decompressed).unwrap();
/// stream.close();
///
/// assert_eq!(decompressed, b"streamed");
/// assert_eq!(pool.idle_handles(), 1);
/// ```
pub struct DecoderStream<R: Read> {
    // Only `None` while being dropped.
    decoder: Option<PooledDecoder<R>>,
}

impl<R: Read> DecoderStream<R> {
    /// Releases the decoder back to its pool.
    pub fn close(self) {
        drop(self);
    }
}

impl<R: Read> Read for DecoderStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.decoder {
            Some(decoder) => decoder.read(buf),
            None => Ok(0),
        }
    }
}

impl<R: Read> Drop for DecoderStream<R> {
    fn drop(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            decoder.release();
        }
    }
}

impl<R: Read> fmt::Debug for DecoderStream<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderStream")
            .field("decoder", &self.decoder)
            .finish()
    }
}
