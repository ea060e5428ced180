//! SXL Runtime Loader
//!
//! The runtime half of the SXL executable compressor: a freestanding
//! decompression-and-load engine prepended to a compressed ELF binary.
//! When the packed program starts, a tiny per-architecture assembly
//! bootstrap (out of this crate) calls [`stub::sxl_main`], which rebuilds
//! the original process image directly in memory and returns the entry
//! address for the final jump.
//!
//! # Constraints
//!
//! - No heap, no `std`, no unwinding: every byte of this crate is dead
//!   weight added to every packed executable.
//! - No recoverable errors: any structural violation of the container, any
//!   refused mapping syscall, terminates the process (exit code 127).
//! - A truncated or hostile container must fail closed: nothing is ever
//!   written outside the bounds the stream declared.
//!
//! # Components
//!
//! - [`extent`]: bounds-checked (pointer, length) cursor; the only
//!   container type used anywhere in the crate
//! - [`unpack`]: block-stream container decoder, byte unfilter engine,
//!   built-in decompression method
//! - [`elf`]: defensive, allocation-free ELF64 image parsing
//! - [`mm`]: page math and the raw Linux syscall layer
//! - [`load`]: address-space reservation, segment mapping, escape hatch,
//!   whole-image loading
//! - [`auxv`]: auxiliary-vector patching
//! - [`stub`]: the orchestrator called by the bootstrap

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod auxv;
pub mod elf;
pub mod error;
pub mod extent;
pub mod load;
pub mod mm;
pub mod stub;
pub mod unpack;

pub use error::LoaderError;
pub use extent::Extent;
pub use stub::{Handoff, HeaderScratch, MAX_ELF_HDR};

/// One compression-method implementation, as consumed by the block-stream
/// reader. `0` on success with `*out_len` set to the number of bytes
/// produced in `dst`; any nonzero status is a method-specific error code
/// and fatal to the caller.
pub type DecompressFn = fn(src: &[u8], dst: &mut [u8], out_len: &mut usize, method: u8) -> i32;

/// In-place inverse of the encoder's byte-level filter. Total and
/// infallible over the closed filter-id set; the caller rejects unknown
/// ids before dispatching.
pub type UnfilterFn = fn(buf: &mut [u8], filter_id: u8, seed: u8);

/// Process exit status for every loader failure. The packed program has
/// not started yet, so there is no state worth reporting beyond "failed
/// to start".
pub const EXIT_FAILURE: usize = 127;

#[cfg(all(feature = "freestanding", not(test)))]
mod panic_handler {
    use core::panic::PanicInfo;

    /// Freestanding builds cannot unwind; treat a panic like any other
    /// fatal loader error.
    #[panic_handler]
    fn panic(_info: &PanicInfo) -> ! {
        crate::mm::sys::exit_group(crate::EXIT_FAILURE)
    }
}
