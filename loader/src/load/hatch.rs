//! Escape hatch.
//!
//! After control has left the loader, its own pages are dead weight
//! inside the reconstructed process. They cannot be unmapped *from* the
//! loader (the unmapping code would pull its own instructions out from
//! under itself), so a few spare bytes inside an already-mapped
//! executable segment get a tiny trampoline (invoke the unmap syscall,
//! then return) for the bootstrap to call after handoff.
//!
//! Placement never risks program memory: either the slack just past the
//! segment's content on its last page, or the unused identification
//! bytes of the mapped ELF header. When neither fits, no hatch is
//! installed and the loader's pages simply leak.

use core::ptr;

use crate::elf::Elf64ProgramHeader;
use crate::mm::PAGE_SIZE;

use super::reserve::Reloc;

/// Where the trampoline was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HatchSite {
    pub addr: usize,
    pub len: usize,
}

// One trampoline encoding per target, as plain data. This module is the
// only place hand-written instruction bytes live.

#[cfg(target_arch = "x86_64")]
mod arch {
    /// `syscall; ret`
    pub const TRAMPOLINE: [u8; 3] = [0x0F, 0x05, 0xC3];
    pub const ALIGN: usize = 1;
    /// The 3-byte sequence fits the 4 spare bytes of `e_ident[12..16]`.
    pub const HEADER_SITE: bool = true;
}

#[cfg(target_arch = "aarch64")]
mod arch {
    /// `svc #0; ret`
    pub const TRAMPOLINE: [u8; 8] = [0x01, 0x00, 0x00, 0xD4, 0xC0, 0x03, 0x5F, 0xD6];
    pub const ALIGN: usize = 4;
    /// Two 4-byte instructions cannot fit inside `e_ident[12..16]`.
    pub const HEADER_SITE: bool = false;
}

/// Offset of the spare identification bytes within an ELF header.
const EHDR_SPARE_OFFSET: usize = 12;

/// Length of the spare identification bytes.
const EHDR_SPARE_LEN: usize = 4;

/// Install the trampoline into spare space of an executable segment.
///
/// Preferred site: just past the segment's content, on the same page, and
/// only when `memsz == filesz` (the slack of a segment with zero-fill
/// belongs to the program) and the page fragment leaves room. Fallback:
/// the spare `e_ident` bytes of the segment mapping the image header,
/// on targets whose trampoline fits there.
///
/// Idempotent (the same site gets the same bytes) and infallible: when
/// no space fits it returns `None` and self-cleanup is skipped.
///
/// # Safety
///
/// The segment described by `phdr` must be mapped, writable, at
/// `reloc`-relocated addresses (the window between content fill and
/// permission sealing).
pub unsafe fn write_hatch(phdr: &Elf64ProgramHeader, reloc: Reloc) -> Option<HatchSite> {
    if !phdr.is_load() || !phdr.is_executable() {
        return None;
    }

    if phdr.p_memsz == phdr.p_filesz {
        let end = reloc.apply(phdr.p_vaddr) + phdr.p_memsz as usize;
        let addr = (end + arch::ALIGN - 1) & !(arch::ALIGN - 1);
        // Distance to the next page boundary; zero means the next byte
        // starts an unmapped page.
        let room = addr.wrapping_neg() & (PAGE_SIZE - 1);
        if room >= arch::TRAMPOLINE.len() {
            return Some(install(addr));
        }
    }

    if arch::HEADER_SITE
        && phdr.p_offset == 0
        && phdr.p_filesz as usize >= EHDR_SPARE_OFFSET + EHDR_SPARE_LEN
    {
        let addr = reloc.apply(phdr.p_vaddr) + EHDR_SPARE_OFFSET;
        return Some(install(addr));
    }

    None
}

fn install(addr: usize) -> HatchSite {
    log::trace!("hatch at {:#x}", addr);
    unsafe {
        ptr::copy_nonoverlapping(
            arch::TRAMPOLINE.as_ptr(),
            addr as *mut u8,
            arch::TRAMPOLINE.len(),
        );
    }
    HatchSite {
        addr,
        len: arch::TRAMPOLINE.len(),
    }
}
