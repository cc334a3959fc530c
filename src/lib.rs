//! This crate implements a TLSF (Two-Level Segmented Fit)¹ dynamic memory
//! allocator over caller-supplied memory pools.
//!
//!  - **Allocation, aligned allocation, and release complete in constant
//!    time.** Bucket selection is a pair of fixed-width bitmap scans, never
//!    a list walk, so the allocator is suitable for latency-sensitive
//!    servers and real-time applications.
//!
//!  - **The memory pools are provided by the application.** A `static`
//!    buffer, a memory-mapped region, or storage obtained from another
//!    allocator all work; the allocator carves blocks out of the regions but
//!    never owns, grows, or frees the backing storage.
//!
//!  - **Low fragmentation.** Neighboring free blocks are merged eagerly via
//!    boundary tags; no two free blocks are ever physically adjacent.
//!
//!  - **This crate supports `#![no_std]`.** It can be used in bare-metal and
//!    RTOS-based applications.
//!
//! <sub>¹ M. Masmano, I. Ripoll, A. Crespo and J. Real, "TLSF: a new dynamic
//! memory allocator for real-time systems," *Proceedings. 16th Euromicro
//! Conference on Real-Time Systems*, 2004. ECRTS 2004., Catania, Italy,
//! 2004, pp. 79-88, doi: 10.1109/EMRTS.2004.1311009.</sub>
//!
//! # Examples
//!
//! ```rust
//! use tlsf_pool::Tlsf;
//! use core::mem::MaybeUninit;
//!
//! // The first pool also hosts the allocator's own directory.
//! let mut arena = [MaybeUninit::<u8>::uninit(); 32768];
//! let mut tlsf = Tlsf::create_with_pool(&mut arena).unwrap();
//!
//! let mut p = tlsf.allocate(64).unwrap().cast::<u32>();
//! let q = tlsf.allocate_aligned(128, 64).unwrap();
//! assert_eq!(q.as_ptr() as usize % 128, 0);
//!
//! unsafe {
//!     *p.as_mut() = 42;
//!     assert_eq!(*p.as_ref(), 42);
//!     tlsf.release(p.cast().as_ptr());
//!     tlsf.release(q.as_ptr());
//! }
//! ```
//!
//! # Errors and misuse
//!
//! Every detectable failure is reported synchronously as a [`TlsfError`];
//! nothing panics or unwinds in non-test code, and there is no internal
//! retry: the allocator never grows a pool by itself. Misuse that the
//! in-band metadata cannot reveal (double release, releasing a foreign
//! pointer, header corruption by an out-of-bounds write) is undefined
//! behavior by contract; see [`Tlsf::release`].
//!
//! # Concurrency
//!
//! The core is single-threaded by contract: every operation takes
//! `&mut self` and runs to completion in bounded time with no suspension
//! points. Embedders sharing a handle across threads or interrupt contexts
//! must wrap each call in a short-held mutual-exclusion primitive, one lock
//! per handle.
//!
//! # Cargo features
//!
//!  - `std`: pulls in the standard library (tests and hosted diagnostics).
//!  - `log`: emits [`log`] trace records when pools are registered.
#![no_std]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

mod error;
mod tlsf;
mod utils;

pub use self::{
    error::TlsfError,
    tlsf::{
        Tlsf, ALIGN_SIZE, ALLOC_OVERHEAD, BLOCK_SIZE_MAX, BLOCK_SIZE_MIN, CONTROL_OVERHEAD,
        POOL_OVERHEAD,
    },
};

/// The crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(any(test, feature = "std"))]
extern crate std;
