#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for tests, examples and benchmarks in `codec_pool`.

use std::sync::mpsc;
use std::time::Duration;
use std::{env, panic, thread};

/// Compression level used for reference data produced outside the pools.
pub const REFERENCE_LEVEL: i32 = 3;

/// Runs a test body on a separate thread and fails the test if it takes too long.
///
/// Pool tests coordinate many threads and a lost wakeup or a deadlock would otherwise hang the
/// whole test run. The limit is 10 seconds, or 60 seconds under Miri.
///
/// Setting the `MUTATION_TESTING` environment variable to "1" disables the limit so that
/// mutation testing can detect mutations that make the code hang.
///
/// # Panics
///
/// Panics if the test body panics or exceeds the time limit.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let answer = with_watchdog(|| 6 * 7);
/// assert_eq!(answer, 42);
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let limit = if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    };

    let (tx, rx) = mpsc::channel();

    let body = thread::spawn(move || {
        // The receiver is gone if the watchdog already gave up on us.
        drop(tx.send(test_fn()));
    });

    match rx.recv_timeout(limit) {
        Ok(result) => {
            body.join().expect("test thread finished sending so it cannot have panicked");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test exceeded the {limit:?} watchdog limit");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match body.join() {
            Ok(()) => panic!("test thread exited without reporting a result"),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

/// Generates `len` bytes of compressible data that differ between seeds.
///
/// Distinct seeds give distinct payloads, so a decoder that leaks state from one stream into
/// the next produces a detectable mismatch.
#[must_use]
pub fn payload(seed: u8, len: usize) -> Vec<u8> {
    let phrase = format!("payload {seed} says hello to the pool; ");

    phrase.bytes().cycle().take(len).collect()
}

/// Compresses `data` into a single zstd frame without using any pool.
///
/// # Panics
///
/// Panics if the codec engine fails, which is not expected for in-memory data.
#[must_use]
pub fn compress(data: &[u8]) -> Vec<u8> {
    zstd::encode_all(data, REFERENCE_LEVEL).expect("in-memory compression cannot fail")
}

/// Decompresses all zstd frames in `data` without using any pool.
///
/// # Panics
///
/// Panics if `data` is not a valid zstd stream.
#[must_use]
pub fn decompress(data: &[u8]) -> Vec<u8> {
    zstd::decode_all(data).expect("data must be a valid zstd stream")
}
