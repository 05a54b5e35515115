/// What a pool does when the codec engine fails to construct a new handle.
///
/// Construction only happens when a caller acquires from a pool that has no idle handle.
///
/// # Examples
///
/// ```
/// use codec_pool::{ConstructionPolicy, DecoderPool};
///
/// let pool = DecoderPool::builder()
///     .construction_policy(ConstructionPolicy::Degenerate)
///     .build();
/// # drop(pool);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum ConstructionPolicy {
    /// The failure is returned from `acquire()` as [`Error::Construction`][crate::Error].
    #[default]
    Propagate,

    /// `acquire()` succeeds but hands out a wrapper that holds no handle. Every codec
    /// operation on such a wrapper fails with [`Error::HandleAbsent`][crate::Error] and
    /// releasing it does not place anything in the pool.
    Degenerate,

    /// The failure is treated as a programming error and the acquiring thread panics.
    Panic,
}

/// Whether a handle whose reset fails during release is still returned to the pool.
///
/// Decoder pools always use [`OnSuccessfulReset`][Self::OnSuccessfulReset]: a decoder that
/// cannot be reset must never be handed to another caller. Encoder pools default to
/// [`Always`][Self::Always], which means encoders and decoders follow different rules on
/// release. An encoder that comes back from the pool is reset again on acquire and replaced
/// by a fresh handle if that second reset fails, so the looser rule never hands out a broken
/// encoder. Choose [`OnSuccessfulReset`][Self::OnSuccessfulReset] for encoders to apply the
/// decoder rule to both kinds.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum ReturnPolicy {
    /// The handle is returned to the pool even if its reset failed.
    #[default]
    Always,

    /// The handle is returned to the pool only if its reset succeeded. Otherwise it is
    /// released on the spot.
    OnSuccessfulReset,
}
