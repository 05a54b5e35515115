use std::io;

use thiserror::Error;

use crate::CodecKind;

/// Errors that can occur when acquiring or operating pooled codec handles.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The codec engine could not create a handle for the configured options.
    #[error("failed to construct {kind} handle")]
    Construction {
        /// The kind of handle that was being constructed.
        kind: CodecKind,

        /// The failure reported by the codec engine.
        #[source]
        source: io::Error,
    },

    /// The codec engine failed to rebind a handle to a new target.
    #[error("failed to reset {kind} handle")]
    Reset {
        /// The kind of handle that failed to reset.
        kind: CodecKind,

        /// The failure reported by the codec engine.
        #[source]
        source: io::Error,
    },

    /// The handle has been terminally closed and can no longer be used or reset.
    #[error("{kind} handle has been closed")]
    Closed {
        /// The kind of handle that was closed.
        kind: CodecKind,
    },

    /// The wrapper holds no handle because handle construction failed and the pool was
    /// configured to hand out degenerate wrappers instead of reporting the failure.
    #[error("{kind} wrapper holds no handle because its construction failed")]
    HandleAbsent {
        /// The kind of handle that is missing.
        kind: CodecKind,
    },
}

impl From<Error> for io::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Construction { .. } | Error::Reset { .. } => Self::other(error),
            Error::Closed { .. } | Error::HandleAbsent { .. } => {
                Self::new(io::ErrorKind::NotConnected, error)
            }
        }
    }
}

/// A specialized `Result` type for codec pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::error::Error as _;
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn construction_error_exposes_source() {
        let error = Error::Construction {
            kind: CodecKind::Encoder,
            source: io::Error::other("bad level"),
        };

        assert_eq!(error.to_string(), "failed to construct encoder handle");
        assert!(error.source().is_some());
    }

    #[test]
    fn closed_handle_maps_to_not_connected() {
        let error = io::Error::from(Error::Closed {
            kind: CodecKind::Decoder,
        });

        assert_eq!(error.kind(), io::ErrorKind::NotConnected);
        assert_eq!(error.to_string(), "decoder handle has been closed");
    }

    #[test]
    fn reset_failure_maps_to_other() {
        let error = io::Error::from(Error::Reset {
            kind: CodecKind::Decoder,
            source: io::Error::other("context corrupted"),
        });

        assert_eq!(error.kind(), io::ErrorKind::Other);
    }
}
