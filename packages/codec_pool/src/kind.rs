use std::fmt;

/// The direction a pooled codec handle works in.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[expect(
    clippy::exhaustive_enums,
    reason = "a codec either compresses or decompresses, there is no third direction"
)]
pub enum CodecKind {
    /// The handle compresses data written to it into a sink.
    Encoder,

    /// The handle decompresses data read from a source.
    Decoder,
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoder => f.write_str("encoder"),
            Self::Decoder => f.write_str("decoder"),
        }
    }
}
