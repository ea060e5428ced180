//! Per-segment mapping.
//!
//! Each loadable segment is mapped inside the image's reservation with
//! `MAP_FIXED`, filled with its content (decompressed into place for the
//! packed image, file-backed for the interpreter) and only then locked
//! to its declared permissions. The write window therefore closes after
//! every content write, which both satisfies W^X policies and guarantees
//! there is no partially-protected interval during decompression.

use core::ptr;

use crate::elf::Elf64ProgramHeader;
use crate::error::LoaderError;
use crate::extent::Extent;
use crate::mm::sys::{self, pf_to_prot, MapFlags, Prot};
use crate::mm::{page_frag, page_up};
use crate::{DecompressFn, UnfilterFn};

use super::reserve::Reloc;

/// Where a segment's content comes from.
pub enum SegmentSource<'a, 'e> {
    /// Decompress from the block stream directly into the mapping
    Unpack {
        input: &'a mut Extent<'e>,
        decompress: DecompressFn,
        unfilter: Option<UnfilterFn>,
    },
    /// Map the content straight from an open file
    File { fd: i32 },
}

impl SegmentSource<'_, '_> {
    pub fn is_unpack(&self) -> bool {
        matches!(self, SegmentSource::Unpack { .. })
    }
}

/// A mapped segment whose final permissions may still be pending.
#[derive(Debug)]
pub struct MappedSegment {
    addr: usize,
    len: usize,
    prot: Prot,
    sealed: bool,
}

impl MappedSegment {
    /// Apply the segment's declared permission mask. Must run after every
    /// write into the mapping, the escape hatch included. No-op when the
    /// mapping was created with its final permissions.
    pub fn seal(&mut self) -> Result<(), LoaderError> {
        if self.sealed || self.len == 0 {
            self.sealed = true;
            return Ok(());
        }
        unsafe { sys::mprotect(self.addr, self.len, self.prot) }.map_err(|errno| {
            log::debug!("segment protect refused: errno {}", errno);
            LoaderError::ProtectionFailed
        })?;
        self.sealed = true;
        Ok(())
    }
}

/// Map one loadable segment and fill it from `source`.
///
/// The mapping covers the page range of `[vaddr, vaddr + filesz)`
/// including the low-edge page fragment. For the unpack source the range
/// starts read-write regardless of the final permissions and the caller
/// seals it; the file source is mapped with its final permissions
/// directly. The gap between `filesz` and `memsz` reads as zero
/// afterwards: the tail fragment of the last content page is cleared
/// explicitly (for writable segments), and any whole pages beyond it get
/// a fresh anonymous mapping.
///
/// # Safety
///
/// The segment's relocated page range is replaced wholesale
/// (`MAP_FIXED`); it must lie inside a reservation the caller created
/// for this image, which holds for any descriptor that passed
/// validation and the matching [`reserve`](super::reserve::reserve)
/// call.
pub unsafe fn map_segment(
    phdr: &Elf64ProgramHeader,
    reloc: Reloc,
    source: &mut SegmentSource<'_, '_>,
) -> Result<MappedSegment, LoaderError> {
    let prot = pf_to_prot(phdr.p_flags);
    let vaddr = reloc.apply(phdr.p_vaddr);
    let filesz = phdr.p_filesz as usize;
    let memsz = phdr.p_memsz as usize;

    let frag = page_frag(vaddr);
    let map_addr = vaddr - frag;
    let map_len = filesz + frag;

    log::trace!(
        "segment [{:#x}, {:#x}) memsz {:#x} prot {:?}",
        map_addr,
        map_addr + map_len,
        memsz,
        prot
    );

    let unpack_source = source.is_unpack();
    if map_len > 0 {
        match source {
            SegmentSource::Unpack {
                input,
                decompress,
                unfilter,
            } => {
                let got = unsafe {
                    sys::mmap(
                        map_addr,
                        map_len,
                        prot | Prot::WRITE,
                        MapFlags::PRIVATE | MapFlags::ANONYMOUS | MapFlags::FIXED,
                        -1,
                        0,
                    )
                }
                .map_err(|_| LoaderError::MappingFailed)?;
                if got != map_addr {
                    return Err(LoaderError::MappingFailed);
                }
                // The content lands at the segment's exact vaddr; the
                // stream is bounded to the declared file size.
                let mut out = unsafe { Extent::from_raw(vaddr as *mut u8, filesz) };
                crate::unpack::unpack_stream(input, &mut out, *decompress, *unfilter)?;
            }
            SegmentSource::File { fd } => {
                // File offset and vaddr must agree on their page
                // fragment, or no file mapping can express the segment.
                let offset = phdr.p_offset as usize;
                if page_frag(offset) != frag {
                    return Err(LoaderError::MappingFailed);
                }
                let got = unsafe {
                    sys::mmap(
                        map_addr,
                        map_len,
                        prot,
                        MapFlags::PRIVATE | MapFlags::FIXED,
                        *fd,
                        offset - frag,
                    )
                }
                .map_err(|_| LoaderError::MappingFailed)?;
                if got != map_addr {
                    return Err(LoaderError::MappingFailed);
                }
            }
        }
    }

    // Fragment between the end of content and the next page boundary.
    // For the file source those bytes hold unrelated file content; they
    // must read as zero. Read-only segments cannot carry zero-fill data.
    let content_end = map_addr + map_len;
    let tail = page_up(content_end) - content_end;
    if tail != 0 && prot.contains(Prot::WRITE) {
        unsafe { ptr::write_bytes(content_end as *mut u8, 0, tail) };
    }

    // Whole pages past the content: fresh anonymous zero pages.
    let bss_start = page_up(content_end);
    let seg_end = vaddr + memsz;
    if bss_start < seg_end {
        let got = unsafe {
            sys::mmap(
                bss_start,
                seg_end - bss_start,
                prot,
                MapFlags::PRIVATE | MapFlags::ANONYMOUS | MapFlags::FIXED,
                -1,
                0,
            )
        }
        .map_err(|_| LoaderError::MappingFailed)?;
        if got != bss_start {
            return Err(LoaderError::MappingFailed);
        }
    }

    Ok(MappedSegment {
        addr: map_addr,
        len: map_len,
        prot,
        // The file source already carries its final permissions.
        sealed: !unpack_source,
    })
}
