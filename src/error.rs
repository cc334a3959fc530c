use thiserror::Error;

/// Errors reported by pool registration and allocation operations.
///
/// Every failure the allocator can detect is reported synchronously through
/// one of these kinds. Misuse that cannot be detected from the information
/// available (double release, releasing a pointer from another handle,
/// buffer overruns corrupting block headers) is undefined behavior by
/// contract and is *not* mapped to an error (see [`Tlsf::release`]).
///
/// [`Tlsf::release`]: crate::Tlsf::release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TlsfError {
    /// The supplied memory region is too small to carve into a pool, or too
    /// large for a single block to span.
    #[error("memory region cannot back a pool")]
    InvalidPool,

    /// The allocation request is zero bytes, or rounding it up to a size
    /// class would exceed the largest representable block size.
    #[error("allocation size is zero or out of range")]
    InvalidSize,

    /// The requested alignment is not a power of two.
    #[error("alignment is not a power of two")]
    InvalidAlignment,

    /// No registered pool holds a free block large enough for the request.
    #[error("no suitable free block in any pool")]
    OutOfMemory,
}
