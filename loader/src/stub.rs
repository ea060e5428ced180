//! The orchestrator called by the assembly bootstrap.
//!
//! Rebuilds the process image in four moves: decompress the embedded ELF
//! headers into a scratch buffer, load the main image from the remaining
//! stream, load the requested interpreter (if any) from disk, patch the
//! auxiliary vector so the program and its interpreter observe correct
//! bootstrap values. The result is purely computational: an entry
//! address and an optional trampoline site. The jump itself, and the
//! later unmapping of this code through the trampoline, happen outside,
//! after which nothing here may run again.

use core::mem::size_of;
use core::ptr;

use crate::auxv::{self, AuxEntry, AT_BASE, AT_ENTRY, AT_NULL, AT_PAGESZ, AT_PHDR, AT_PHENT, AT_PHNUM};
use crate::elf::{Elf64ProgramHeader, ImageView, PT_PHDR};
use crate::error::LoaderError;
use crate::extent::Extent;
use crate::load::{HatchSite, ProgramLoader, SegmentSource};
use crate::mm::{sys, PAGE_SIZE};
use crate::unpack::{self, filter, method, BlockHeader, BLOCK_HDR_SIZE};

/// The decompressed ELF header plus its whole program-header table must
/// fit in this many bytes.
pub const MAX_ELF_HDR: usize = 1024;

/// Scratch buffer for image headers. Alignment matches the widest field
/// read out of it.
#[repr(C, align(8))]
pub struct HeaderScratch {
    pub bytes: [u8; MAX_ELF_HDR],
}

impl HeaderScratch {
    pub const fn new() -> Self {
        HeaderScratch {
            bytes: [0; MAX_ELF_HDR],
        }
    }
}

impl Default for HeaderScratch {
    fn default() -> Self {
        Self::new()
    }
}

/// What the bootstrap needs for phase two: where to jump, and where the
/// self-unmap trampoline landed (also smuggled to it through the
/// auxiliary vector's terminator value).
#[derive(Debug, Clone, Copy)]
pub struct Handoff {
    pub entry: usize,
    pub hatch: Option<HatchSite>,
}

/// Rebuild the process image from a compressed container.
///
/// # Safety
///
/// `compressed` must point to `compressed_len` readable bytes that stay
/// untouched for the duration of the call. `av` must be null or point to
/// the process's `AT_NULL`-terminated auxiliary vector. The call rewrites
/// the process address space according to the container's program
/// headers.
pub unsafe fn run(
    compressed: *const u8,
    compressed_len: usize,
    scratch: &mut HeaderScratch,
    av: *mut AuxEntry,
) -> Result<Handoff, LoaderError> {
    let mut input = unsafe { Extent::from_raw(compressed as *mut u8, compressed_len) };

    // Peek the first block header: its uncompressed size is the length of
    // the embedded Ehdr + Phdr table.
    if compressed_len < BLOCK_HDR_SIZE {
        return Err(LoaderError::TruncatedHeader);
    }
    let mut head = [0u8; BLOCK_HDR_SIZE];
    unsafe { ptr::copy_nonoverlapping(compressed, head.as_mut_ptr(), BLOCK_HDR_SIZE) };
    let first = BlockHeader::parse(head);
    let hdr_len = first.sz_unc as usize;
    if hdr_len > MAX_ELF_HDR {
        return Err(LoaderError::MalformedStream);
    }

    // Image headers are never filtered.
    let mut hdr_out = Extent::from_mut_slice(&mut scratch.bytes[..hdr_len]);
    match unpack::read_block(&mut input, &mut hdr_out, method::decompress, None)? {
        unpack::Step::Continue => {}
        unpack::Step::Done => return Err(LoaderError::MalformedStream),
    }

    let view = ImageView::parse(&scratch.bytes[..hdr_len])?;
    unsafe {
        auxv::auxv_up(av, AT_PHNUM, view.phdr_count());
        auxv::auxv_up(av, AT_PHENT, size_of::<Elf64ProgramHeader>());
        auxv::auxv_up(av, AT_PAGESZ, PAGE_SIZE);
    }

    let main = {
        let mut source = SegmentSource::Unpack {
            input: &mut input,
            decompress: method::decompress,
            unfilter: Some(filter::unfilter),
        };
        unsafe { ProgramLoader::new().load(&view, &mut source, av) }?
    };
    unpack::finish_stream(&mut input)?;

    // PT_PHDR already patched AT_PHDR during the load; otherwise fall
    // back to the conventional spot behind the file header.
    if !view.phdrs().any(|p| p.p_type == PT_PHDR) {
        unsafe { auxv::auxv_up(av, AT_PHDR, main.reloc.apply(view.phdr_vaddr())) };
    }
    unsafe { auxv::auxv_up(av, AT_ENTRY, main.entry) };

    // The view borrows the scratch buffer, which the interpreter pass
    // reuses; everything still needed is captured first.
    let interp_vaddr = view.interp_vaddr();

    let mut entry = main.entry;
    if let Some(vaddr) = interp_vaddr {
        // NUL-terminated path inside the freshly mapped main image.
        let path = main.reloc.apply(vaddr) as *const u8;
        let fd = unsafe { sys::open(path) }.map_err(|errno| {
            log::debug!("interpreter open refused: errno {}", errno);
            LoaderError::InterpreterOpenFailed
        })?;
        let got = unsafe { sys::read(fd, scratch.bytes.as_mut_ptr(), MAX_ELF_HDR) }
            .map_err(|_| LoaderError::InterpreterOpenFailed)?;
        if got != MAX_ELF_HDR {
            sys::close(fd);
            return Err(LoaderError::InterpreterOpenFailed);
        }

        let iview = ImageView::parse(&scratch.bytes[..])?;
        let interp = {
            let mut isource = SegmentSource::File { fd };
            unsafe { ProgramLoader::new().load(&iview, &mut isource, ptr::null_mut()) }?
        };
        sys::close(fd);

        unsafe { auxv::auxv_up(av, AT_BASE, interp.reloc.0) };
        entry = interp.entry;
    }

    if let Some(site) = main.hatch {
        // The terminator's value field carries the trampoline address to
        // the bootstrap.
        unsafe { auxv::auxv_up(av, AT_NULL, site.addr) };
    }

    Ok(Handoff {
        entry,
        hatch: main.hatch,
    })
}

/// Entry point for the per-architecture bootstrap.
///
/// Returns the address to jump to. Every failure path terminates the
/// process instead: the packed program has not started, so the only
/// observable behavior is "failed to start" with a fixed exit status.
///
/// # Safety
///
/// As [`run`]; additionally `scratch` must point to a writable
/// [`HeaderScratch`].
#[no_mangle]
pub unsafe extern "C" fn sxl_main(
    compressed: *const u8,
    compressed_len: usize,
    scratch: *mut HeaderScratch,
    av: *mut AuxEntry,
) -> usize {
    match unsafe { run(compressed, compressed_len, &mut *scratch, av) } {
        Ok(handoff) => handoff.entry,
        Err(err) => {
            log::debug!("image reconstruction failed: {}", err);
            sys::exit_group(crate::EXIT_FAILURE)
        }
    }
}
