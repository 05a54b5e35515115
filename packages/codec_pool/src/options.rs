use std::num::NonZero;
use std::sync::Arc;

/// Size of the staging buffer each handle uses between the codec and the caller's target.
///
/// This matches the block size the zstd streaming API recommends for both directions.
const DEFAULT_BUFFER_SIZE: NonZero<usize> = NonZero::new(128 * 1024).unwrap();

/// Codec configuration applied to every encoder handle a pool constructs.
///
/// Options are applied in order, so a later option overrides an earlier one of the same kind.
///
/// # Examples
///
/// ```
/// use codec_pool::{EncoderOption, EncoderPool};
///
/// let pool = EncoderPool::with_options([EncoderOption::Level(19), EncoderOption::Checksum(true)]);
/// # drop(pool);
/// ```
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum EncoderOption {
    /// The zstd compression level. Defaults to the zstd default level.
    Level(i32),

    /// Whether each frame carries a content checksum.
    Checksum(bool),

    /// Base-2 logarithm of the maximum back-reference distance.
    WindowLog(u32),

    /// A prepared dictionary shared by every handle the pool constructs.
    Dictionary(Arc<[u8]>),

    /// Size of the staging buffer compressed output passes through on its way to the sink.
    BufferSize(NonZero<usize>),
}

/// Codec configuration applied to every decoder handle a pool constructs.
///
/// Options are applied in order, so a later option overrides an earlier one of the same kind.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum DecoderOption {
    /// Base-2 logarithm of the largest window a frame may request before decoding is refused.
    WindowLogMax(u32),

    /// A prepared dictionary shared by every handle the pool constructs.
    Dictionary(Arc<[u8]>),

    /// Size of the staging buffer compressed input is read into from the source.
    BufferSize(NonZero<usize>),
}

#[derive(Clone, Debug)]
pub(crate) struct EncoderConfig {
    pub(crate) level: i32,
    pub(crate) checksum: Option<bool>,
    pub(crate) window_log: Option<u32>,
    pub(crate) dictionary: Option<Arc<[u8]>>,
    pub(crate) buffer_size: NonZero<usize>,
}

impl EncoderConfig {
    pub(crate) fn apply(&mut self, option: EncoderOption) {
        match option {
            EncoderOption::Level(level) => self.level = level,
            EncoderOption::Checksum(enabled) => self.checksum = Some(enabled),
            EncoderOption::WindowLog(window_log) => self.window_log = Some(window_log),
            EncoderOption::Dictionary(dictionary) => self.dictionary = Some(dictionary),
            EncoderOption::BufferSize(size) => self.buffer_size = size,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            level: zstd::DEFAULT_COMPRESSION_LEVEL,
            checksum: None,
            window_log: None,
            dictionary: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct DecoderConfig {
    pub(crate) window_log_max: Option<u32>,
    pub(crate) dictionary: Option<Arc<[u8]>>,
    pub(crate) buffer_size: NonZero<usize>,
}

impl DecoderConfig {
    pub(crate) fn apply(&mut self, option: DecoderOption) {
        match option {
            DecoderOption::WindowLogMax(window_log) => self.window_log_max = Some(window_log),
            DecoderOption::Dictionary(dictionary) => self.dictionary = Some(dictionary),
            DecoderOption::BufferSize(size) => self.buffer_size = size,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            window_log_max: None,
            dictionary: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}
