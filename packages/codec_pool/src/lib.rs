#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Leak-free pooling of reusable zstd encoders and decoders.
//!
//! A zstd compression or decompression context is expensive to create: it allocates megabytes
//! of engine state that is worth keeping around between streams. This crate lets many threads
//! share a pool of such contexts without ever leaking one, even when a caller forgets to give a
//! context back.
//!
//! # Quick start
//!
//! ```
//! use std::io::{Read, Write};
//!
//! use codec_pool::{DecoderPool, EncoderPool};
//!
//! let encoders = EncoderPool::new();
//! let decoders = DecoderPool::new();
//!
//! let mut encoder = encoders.acquire(Vec::new()).unwrap();
//! encoder.write_all(b"round and round").unwrap();
//! let compressed = encoder.finish().unwrap();
//!
//! let mut decoder = decoders.acquire(compressed.as_slice()).unwrap();
//! let mut decompressed = Vec::new();
//! decoder.read_to_end(&mut decompressed).unwrap();
//! decoders.release(decoder);
//!
//! assert_eq!(decompressed, b"round and round");
//! ```
//!
//! # Lifecycle
//!
//! Acquiring from a pool takes an idle context or constructs a new one on the calling thread,
//! then binds it to the caller's sink or source. The caller has exclusive use of it until it is
//! released, after which the context is reset and returned to the pool.
//!
//! There are several ways a context gets back:
//!
//! * Explicitly, via `release()` on the pool or on the wrapper, or via
//!   [`PooledEncoder::finish()`] which also completes the compressed frame.
//! * By closing or dropping a [`DecoderStream`], for code that only knows about [`std::io::Read`].
//! * By dropping the wrapper. This is the same as an explicit release and, in debug builds,
//!   logs a warning through `tracing` so forgotten releases can be found.
//!
//! Wrappers only hold a weak reference to their pool. If the pool is dropped while a wrapper is
//! still in use, the context is released when the wrapper is done with it.
//!
//! # Encoders and decoders release differently
//!
//! A decoder is never terminally closed while it is pool-eligible, because a closed decoder can
//! never be reset. Releasing a decoder resets it and only returns it to the pool if that reset
//! succeeds. Encoders by default return to the pool regardless and are reset again on the next
//! acquire; see [`ReturnPolicy`] to make them follow the decoder rule. Only encoders offer a
//! terminal [`close()`][PooledEncoder::close].
//!
//! # Construction failures
//!
//! What happens when the codec engine cannot construct a context for the configured options is
//! governed by [`ConstructionPolicy`].

mod decoder;
mod encoder;
mod error;
mod handle;
mod kind;
mod lease;
mod object_pool;
mod options;
mod policy;

pub use decoder::*;
pub use encoder::*;
pub use error::*;
pub(crate) use handle::*;
pub use kind::*;
pub(crate) use lease::*;
pub use object_pool::*;
pub(crate) use options::{DecoderConfig, EncoderConfig};
pub use options::*;
pub use policy::*;
