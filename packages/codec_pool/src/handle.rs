//! Codec handles: the stateful zstd contexts that the pools hand out.
//!
//! A handle owns one engine context plus the staging buffer that sits between the context and
//! the caller's sink or source. Handles never own the sink or source itself; the wrapper types
//! keep those so that the handle can go back to a pool unbound.

use std::fmt;
use std::io::{self, Read, Write};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;
use zstd::stream::raw::{CParameter, DParameter, Decoder, Encoder, InBuffer, Operation, OutBuffer};

use crate::{CodecKind, DecoderConfig, EncoderConfig, Error, Result};

/// Operations the pooling layer needs from a handle, independent of its direction.
pub(crate) trait CodecHandle: Send + 'static {
    const KIND: CodecKind;

    /// Rebinds the handle to an empty target, discarding any partially processed frame but
    /// keeping the engine's allocations and parameters.
    fn reset(&mut self) -> Result<()>;

    /// Terminally releases the engine context. A closed handle can never be reset again.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// An engine context that is counted as live until it is dropped.
struct Tracked<C> {
    context: C,
    live: Arc<AtomicUsize>,
}

impl<C> Tracked<C> {
    fn new(context: C, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::Relaxed);

        Self {
            context,
            live: Arc::clone(live),
        }
    }
}

impl<C> Deref for Tracked<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.context
    }
}

impl<C> DerefMut for Tracked<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.context
    }
}

impl<C> Drop for Tracked<C> {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

fn closed(kind: CodecKind) -> io::Error {
    Error::Closed { kind }.into()
}

/// A zstd compression context with its output staging buffer.
///
/// The engine writes compressed bytes into the staging buffer and they are copied to the sink
/// from there. `pending_start..pending_end` is output the sink has not accepted yet. It is
/// always written out before the engine runs again, so a sink error never loses output that the
/// engine has already produced.
pub(crate) struct EncoderHandle {
    context: Option<Tracked<Encoder<'static>>>,
    buffer: Box<[u8]>,
    pending_start: usize,
    pending_end: usize,

    // The engine has ended the current frame. Only its pending epilogue may remain.
    finished: bool,
}

impl EncoderHandle {
    /// Creates a context configured with `config`, counting it in `live` until it is released.
    pub(crate) fn new(config: &EncoderConfig, live: &Arc<AtomicUsize>) -> Result<Self> {
        Self::new_context(config)
            .map(|context| Self {
                context: Some(Tracked::new(context, live)),
                buffer: vec![0; config.buffer_size.get()].into_boxed_slice(),
                pending_start: 0,
                pending_end: 0,
                finished: false,
            })
            .map_err(|source| Error::Construction {
                kind: Self::KIND,
                source,
            })
    }

    fn new_context(config: &EncoderConfig) -> io::Result<Encoder<'static>> {
        let mut context = match &config.dictionary {
            Some(dictionary) => Encoder::with_dictionary(config.level, dictionary)?,
            None => Encoder::new(config.level)?,
        };

        if let Some(checksum) = config.checksum {
            context.set_parameter(CParameter::ChecksumFlag(checksum))?;
        }

        if let Some(window_log) = config.window_log {
            context.set_parameter(CParameter::WindowLog(window_log))?;
        }

        Ok(context)
    }

    /// Compresses `data`, writing whatever output the engine produces to `sink`.
    ///
    /// Output left over from an earlier call is written first. If that fails, nothing of `data`
    /// is consumed. If the sink fails after the engine has taken some of `data`, the count taken
    /// is returned and the output stays pending for the next call.
    pub(crate) fn write_to<W: Write>(&mut self, data: &[u8], sink: &mut W) -> io::Result<usize> {
        let Self {
            context,
            buffer,
            pending_start,
            pending_end,
            finished,
        } = self;

        let context = context.as_mut().ok_or_else(|| closed(Self::KIND))?;

        drain(buffer, pending_start, *pending_end, sink)?;
        *finished = false;

        let mut input = InBuffer::around(data);

        while input.pos() < data.len() {
            let produced = {
                let mut output = OutBuffer::around(&mut **buffer);
                context.run(&mut input, &mut output)?;
                output.pos()
            };

            *pending_start = 0;
            *pending_end = produced;

            if let Err(error) = drain(buffer, pending_start, *pending_end, sink) {
                return match input.pos() {
                    0 => Err(error),
                    consumed => Ok(consumed),
                };
            }
        }

        Ok(data.len())
    }

    /// Pushes all buffered data through the engine to `sink` without ending the frame.
    pub(crate) fn flush_to<W: Write>(&mut self, sink: &mut W) -> io::Result<()> {
        let Self {
            context,
            buffer,
            pending_start,
            pending_end,
            finished,
        } = self;

        let context = context.as_mut().ok_or_else(|| closed(Self::KIND))?;

        drain(buffer, pending_start, *pending_end, sink)?;

        if !*finished {
            loop {
                let (remaining, produced) = {
                    let mut output = OutBuffer::around(&mut **buffer);
                    let remaining = context.flush(&mut output)?;
                    (remaining, output.pos())
                };

                *pending_start = 0;
                *pending_end = produced;
                drain(buffer, pending_start, *pending_end, sink)?;

                if remaining == 0 {
                    break;
                }
            }
        }

        sink.flush()
    }

    /// Ends the current frame and writes its epilogue to `sink`.
    ///
    /// Calling this again after a sink error resumes writing the epilogue. The handle must be
    /// reset before it can start another frame.
    pub(crate) fn finish_to<W: Write>(&mut self, sink: &mut W) -> io::Result<()> {
        let Self {
            context,
            buffer,
            pending_start,
            pending_end,
            finished,
        } = self;

        let context = context.as_mut().ok_or_else(|| closed(Self::KIND))?;

        drain(buffer, pending_start, *pending_end, sink)?;

        while !*finished {
            let (remaining, produced) = {
                let mut output = OutBuffer::around(&mut **buffer);
                let remaining = context.finish(&mut output, true)?;
                (remaining, output.pos())
            };

            *pending_start = 0;
            *pending_end = produced;
            *finished = remaining == 0;
            drain(buffer, pending_start, *pending_end, sink)?;
        }

        sink.flush()
    }
}

/// Writes `buffer[*start..end]` to `sink`, advancing `start` past every byte the sink accepts.
#[expect(
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    reason = "start <= end <= buffer.len() and the sink never accepts more than it was given"
)]
fn drain<W: Write>(buffer: &[u8], start: &mut usize, end: usize, sink: &mut W) -> io::Result<()> {
    while *start < end {
        match sink.write(&buffer[*start..end]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "sink accepted no compressed bytes",
                ));
            }
            Ok(written) => *start += written,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }

    Ok(())
}

impl CodecHandle for EncoderHandle {
    const KIND: CodecKind = CodecKind::Encoder;

    fn reset(&mut self) -> Result<()> {
        let context = self
            .context
            .as_mut()
            .ok_or(Error::Closed { kind: Self::KIND })?;

        context.reinit().map_err(|source| Error::Reset {
            kind: Self::KIND,
            source,
        })?;

        self.pending_start = 0;
        self.pending_end = 0;
        self.finished = false;

        Ok(())
    }

    fn close(&mut self) {
        if self.context.take().is_some() {
            trace!(kind = %Self::KIND, "codec handle closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.context.is_none()
    }
}

impl fmt::Debug for EncoderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderHandle")
            .field("closed", &self.is_closed())
            .field("buffer_size", &self.buffer.len())
            .field("pending", &self.pending_end.saturating_sub(self.pending_start))
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// A zstd decompression context with its input staging buffer.
///
/// Compressed bytes are read from the source into the staging buffer and fed to the engine
/// from there. `start..end` is the part of the buffer the engine has not consumed yet.
pub(crate) struct DecoderHandle {
    context: Option<Tracked<Decoder<'static>>>,
    buffer: Box<[u8]>,
    start: usize,
    end: usize,

    // The source has reported end of stream since the last reset.
    source_exhausted: bool,

    // The last call filled the caller's output completely, so the engine may still hold
    // decompressed data that it did not have room to emit.
    output_pending: bool,

    // Input of a frame has been consumed but the engine has not reported the frame complete.
    in_frame: bool,
}

impl DecoderHandle {
    /// Creates a context configured with `config`, counting it in `live` until it is released.
    pub(crate) fn new(config: &DecoderConfig, live: &Arc<AtomicUsize>) -> Result<Self> {
        Self::new_context(config)
            .map(|context| Self {
                context: Some(Tracked::new(context, live)),
                buffer: vec![0; config.buffer_size.get()].into_boxed_slice(),
                start: 0,
                end: 0,
                source_exhausted: false,
                output_pending: false,
                in_frame: false,
            })
            .map_err(|source| Error::Construction {
                kind: Self::KIND,
                source,
            })
    }

    fn new_context(config: &DecoderConfig) -> io::Result<Decoder<'static>> {
        let mut context = match &config.dictionary {
            Some(dictionary) => Decoder::with_dictionary(dictionary)?,
            None => Decoder::new()?,
        };

        if let Some(window_log_max) = config.window_log_max {
            context.set_parameter(DParameter::WindowLogMax(window_log_max))?;
        }

        Ok(context)
    }

    /// Decompresses into `output`, pulling compressed bytes from `source` as needed.
    ///
    /// Returns 0 only at the end of the decompressed stream. Concatenated frames are decoded
    /// one after another. A source that ends in the middle of a frame is an
    /// [`UnexpectedEof`][io::ErrorKind::UnexpectedEof] error.
    #[expect(
        clippy::indexing_slicing,
        clippy::arithmetic_side_effects,
        reason = "start <= end <= buffer.len() and the engine never consumes more than it was given"
    )]
    pub(crate) fn read_from<R: Read>(
        &mut self,
        source: &mut R,
        output: &mut [u8],
    ) -> io::Result<usize> {
        if output.is_empty() {
            return Ok(0);
        }

        let Self {
            context,
            buffer,
            start,
            end,
            source_exhausted,
            output_pending,
            in_frame,
        } = self;

        let context = context.as_mut().ok_or_else(|| closed(Self::KIND))?;

        loop {
            if *start == *end && !*source_exhausted && !*output_pending {
                let filled = source.read(buffer)?;

                *start = 0;
                *end = filled;
                *source_exhausted = filled == 0;
            }

            let (hint, consumed, produced) = {
                let mut input = InBuffer::around(&buffer[*start..*end]);
                let mut out = OutBuffer::around(&mut *output);
                let hint = context.run(&mut input, &mut out)?;
                (hint, input.pos(), out.pos())
            };

            *start += consumed;
            *output_pending = produced == output.len();

            if consumed > 0 {
                *in_frame = true;
            }

            if hint == 0 {
                *in_frame = false;
            }

            if produced > 0 {
                return Ok(produced);
            }

            if *start == *end && *source_exhausted && !*output_pending {
                if *in_frame {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "compressed source ended in the middle of a frame",
                    ));
                }

                return Ok(0);
            }
        }
    }
}

impl CodecHandle for DecoderHandle {
    const KIND: CodecKind = CodecKind::Decoder;

    fn reset(&mut self) -> Result<()> {
        let context = self
            .context
            .as_mut()
            .ok_or(Error::Closed { kind: Self::KIND })?;

        context.reinit().map_err(|source| Error::Reset {
            kind: Self::KIND,
            source,
        })?;

        self.start = 0;
        self.end = 0;
        self.source_exhausted = false;
        self.output_pending = false;
        self.in_frame = false;

        Ok(())
    }

    fn close(&mut self) {
        if self.context.take().is_some() {
            trace!(kind = %Self::KIND, "codec handle closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.context.is_none()
    }
}

impl fmt::Debug for DecoderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderHandle")
            .field("closed", &self.is_closed())
            .field("buffered", &self.end.saturating_sub(self.start))
            .field("source_exhausted", &self.source_exhausted)
            .field("in_frame", &self.in_frame)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::num::NonZero;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(EncoderHandle: Send);
    assert_impl_all!(DecoderHandle: Send);

    fn compress(payload: &[u8]) -> Vec<u8> {
        let live = Arc::new(AtomicUsize::new(0));
        let mut handle = EncoderHandle::new(&EncoderConfig::default(), &live).unwrap();
        let mut sink = Vec::new();

        handle.write_to(payload, &mut sink).unwrap();
        handle.finish_to(&mut sink).unwrap();

        sink
    }

    fn decompress(handle: &mut DecoderHandle, mut source: &[u8]) -> io::Result<Vec<u8>> {
        let mut decompressed = Vec::new();
        let mut chunk = [0_u8; 100];

        loop {
            let read = handle.read_from(&mut source, &mut chunk)?;

            if read == 0 {
                return Ok(decompressed);
            }

            decompressed.extend_from_slice(&chunk[..read]);
        }
    }

    #[cfg_attr(miri, ignore)] // Calls into the C codec.
    #[test]
    fn live_count_follows_context_lifetime() {
        let live = Arc::new(AtomicUsize::new(0));

        let mut encoder = EncoderHandle::new(&EncoderConfig::default(), &live).unwrap();
        let decoder = DecoderHandle::new(&DecoderConfig::default(), &live).unwrap();
        assert_eq!(live.load(Ordering::Relaxed), 2);

        encoder.close();
        assert!(encoder.is_closed());
        assert_eq!(live.load(Ordering::Relaxed), 1);

        drop(decoder);
        assert_eq!(live.load(Ordering::Relaxed), 0);
    }

    #[cfg_attr(miri, ignore)] // Calls into the C codec.
    #[test]
    fn encoder_output_is_a_standard_zstd_frame() {
        let payload = b"pooled codecs ".repeat(200);

        let compressed = compress(&payload);

        assert!(compressed.len() < payload.len());
        assert_eq!(zstd::decode_all(compressed.as_slice()).unwrap(), payload);
    }

    /// A sink that refuses the first write and every `fail_every`-th one after it with
    /// `WouldBlock`.
    struct FlakySink {
        written: Vec<u8>,
        attempts: usize,
        fail_every: usize,
    }

    impl FlakySink {
        fn new(fail_every: usize) -> Self {
            Self {
                written: Vec::new(),
                attempts: 0,
                fail_every,
            }
        }
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let attempt = self.attempts;
            self.attempts += 1;

            if attempt % self.fail_every == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }

            self.written.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn retry<T>(mut operation: impl FnMut() -> io::Result<T>) -> T {
        loop {
            match operation() {
                Ok(value) => return value,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {}
                Err(error) => panic!("unexpected error: {error}"),
            }
        }
    }

    #[cfg_attr(miri, ignore)] // Calls into the C codec.
    #[test]
    fn sink_error_on_first_write_loses_no_output() {
        let payload = b"frame header must survive ".repeat(100);
        let live = Arc::new(AtomicUsize::new(0));
        let mut handle = EncoderHandle::new(&EncoderConfig::default(), &live).unwrap();
        let mut sink = FlakySink::new(usize::MAX);

        let mut remaining = payload.as_slice();
        while !remaining.is_empty() {
            let written = retry(|| handle.write_to(remaining, &mut sink));
            remaining = &remaining[written..];
        }
        retry(|| handle.finish_to(&mut sink));

        assert_eq!(zstd::decode_all(sink.written.as_slice()).unwrap(), payload);
    }

    #[cfg_attr(miri, ignore)] // Calls into the C codec.
    #[test]
    fn output_survives_a_sink_that_keeps_failing() {
        let payload = testing::payload(7, 200_000);
        let config = EncoderConfig {
            buffer_size: NonZero::new(64).unwrap(),
            ..EncoderConfig::default()
        };
        let live = Arc::new(AtomicUsize::new(0));
        let mut handle = EncoderHandle::new(&config, &live).unwrap();
        let mut sink = FlakySink::new(3);

        for chunk in payload.chunks(10_000) {
            let mut remaining = chunk;
            while !remaining.is_empty() {
                let written = retry(|| handle.write_to(remaining, &mut sink));
                remaining = &remaining[written..];
            }
            retry(|| handle.flush_to(&mut sink));
        }
        retry(|| handle.finish_to(&mut sink));

        assert_eq!(zstd::decode_all(sink.written.as_slice()).unwrap(), payload);
    }

    #[cfg_attr(miri, ignore)] // Calls into the C codec.
    #[test]
    fn reset_drops_output_the_sink_never_took() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut handle = EncoderHandle::new(&EncoderConfig::default(), &live).unwrap();

        let mut refusing = FlakySink::new(1);
        handle.write_to(b"abandoned", &mut refusing).unwrap();
        let error = handle.finish_to(&mut refusing).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::WouldBlock);
        assert!(refusing.written.is_empty());

        handle.reset().unwrap();

        let mut sink = Vec::new();
        handle.write_to(b"kept", &mut sink).unwrap();
        handle.finish_to(&mut sink).unwrap();

        assert_eq!(zstd::decode_all(sink.as_slice()).unwrap(), b"kept");
    }

    #[cfg_attr(miri, ignore)] // Calls into the C codec.
    #[test]
    fn flush_emits_decodable_prefix() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut handle = EncoderHandle::new(&EncoderConfig::default(), &live).unwrap();
        let mut sink = Vec::new();

        handle.write_to(b"first half", &mut sink).unwrap();
        handle.flush_to(&mut sink).unwrap();
        assert!(!sink.is_empty());

        handle.write_to(b" second half", &mut sink).unwrap();
        handle.finish_to(&mut sink).unwrap();

        assert_eq!(
            zstd::decode_all(sink.as_slice()).unwrap(),
            b"first half second half"
        );
    }

    #[cfg_attr(miri, ignore)] // Calls into the C codec.
    #[test]
    fn decoder_handles_tiny_staging_buffer() {
        let payload = b"0123456789".repeat(500);
        let compressed = zstd::encode_all(payload.as_slice(), 3).unwrap();

        let config = DecoderConfig {
            buffer_size: NonZero::new(7).unwrap(),
            ..DecoderConfig::default()
        };
        let live = Arc::new(AtomicUsize::new(0));
        let mut handle = DecoderHandle::new(&config, &live).unwrap();

        assert_eq!(decompress(&mut handle, &compressed).unwrap(), payload);
    }

    #[cfg_attr(miri, ignore)] // Calls into the C codec.
    #[test]
    fn decoder_reads_concatenated_frames() {
        let mut compressed = compress(b"alpha ");
        compressed.extend(compress(b"beta"));

        let live = Arc::new(AtomicUsize::new(0));
        let mut handle = DecoderHandle::new(&DecoderConfig::default(), &live).unwrap();

        assert_eq!(decompress(&mut handle, &compressed).unwrap(), b"alpha beta");
    }

    #[cfg_attr(miri, ignore)] // Calls into the C codec.
    #[test]
    fn decoder_rejects_truncated_frame() {
        let compressed = compress(&b"truncated ".repeat(100));
        let truncated = &compressed[..compressed.len() - 4];

        let live = Arc::new(AtomicUsize::new(0));
        let mut handle = DecoderHandle::new(&DecoderConfig::default(), &live).unwrap();

        let error = decompress(&mut handle, truncated).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[cfg_attr(miri, ignore)] // Calls into the C codec.
    #[test]
    fn empty_source_is_empty_stream() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut handle = DecoderHandle::new(&DecoderConfig::default(), &live).unwrap();

        assert!(decompress(&mut handle, &[]).unwrap().is_empty());
    }

    #[cfg_attr(miri, ignore)] // Calls into the C codec.
    #[test]
    fn reset_discards_partial_frame() {
        let first = compress(&b"abandoned ".repeat(1000));
        let second = compress(b"fresh");

        let live = Arc::new(AtomicUsize::new(0));
        let mut handle = DecoderHandle::new(&DecoderConfig::default(), &live).unwrap();

        let mut source = first.as_slice();
        let mut chunk = [0_u8; 16];
        handle.read_from(&mut source, &mut chunk).unwrap();

        handle.reset().unwrap();

        assert_eq!(decompress(&mut handle, &second).unwrap(), b"fresh");
    }

    #[cfg_attr(miri, ignore)] // Calls into the C codec.
    #[test]
    fn closed_handle_refuses_reset_and_io() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut handle = DecoderHandle::new(&DecoderConfig::default(), &live).unwrap();

        handle.close();

        assert!(matches!(handle.reset(), Err(Error::Closed { .. })));
        let error = decompress(&mut handle, b"anything").unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::NotConnected);
    }

    #[cfg_attr(miri, ignore)] // Calls into the C codec.
    #[test]
    fn out_of_range_window_log_fails_construction() {
        let config = EncoderConfig {
            window_log: Some(100),
            ..EncoderConfig::default()
        };
        let live = Arc::new(AtomicUsize::new(0));

        let result = EncoderHandle::new(&config, &live);

        assert!(matches!(result, Err(Error::Construction { .. })));
        assert_eq!(live.load(Ordering::Relaxed), 0);
    }
}
