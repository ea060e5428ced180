//! Whole-image loading.
//!
//! `ProgramLoader` drives one image (the packed main program, then
//! optionally its interpreter) through a fixed sequence: reserve the
//! hull, map every loadable segment in file order, hand back the
//! relocated entry address. The sequence is entered once per image and
//! never re-entered; nothing is rolled back on failure, because a
//! partially mapped address space is harmless in a process that is about
//! to terminate.

pub mod hatch;
pub mod reserve;
pub mod segment;

pub use hatch::HatchSite;
pub use reserve::{Reloc, Reservation};
pub use segment::SegmentSource;

use crate::auxv::{self, AuxEntry, AT_PHDR};
use crate::elf::ImageView;
use crate::error::LoaderError;

/// Loading progresses strictly forward through these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Reserving,
    MappingSegments,
    Done,
}

/// A fully mapped image.
#[derive(Debug, Clone, Copy)]
pub struct LoadedImage {
    /// Relocated entry address
    pub entry: usize,
    /// Relocation constant applied to every vaddr of the image
    pub reloc: Reloc,
    /// First address past the reservation (initial heap break for a
    /// fixed-address program)
    pub brk: usize,
    /// Trampoline site, when one was installed
    pub hatch: Option<HatchSite>,
}

/// One-shot loader for a single program image.
pub struct ProgramLoader {
    phase: Phase,
}

impl ProgramLoader {
    pub fn new() -> Self {
        ProgramLoader {
            phase: Phase::Reserving,
        }
    }

    /// Reserve, map and finalize one image.
    ///
    /// Segments are visited in file order. For the packed image
    /// (`SegmentSource::Unpack`) the `PT_PHDR` entry patches `AT_PHDR`
    /// with its relocated address, and the first executable segment with
    /// spare space receives the escape hatch before its permissions are
    /// sealed. The interpreter pass runs with a null `av` and takes no
    /// hatch.
    ///
    /// # Safety
    ///
    /// `av` must be null or point to an `AT_NULL`-terminated auxiliary
    /// vector. The image's reservation and segment mappings rewrite the
    /// process address space; the descriptor must come from
    /// [`ImageView::parse`] so every range stays inside the hull.
    pub unsafe fn load(
        &mut self,
        view: &ImageView<'_>,
        source: &mut SegmentSource<'_, '_>,
        av: *mut AuxEntry,
    ) -> Result<LoadedImage, LoaderError> {
        debug_assert_eq!(self.phase, Phase::Reserving);
        let resv = reserve::reserve(view)?;

        self.phase = Phase::MappingSegments;
        let take_hatch = source.is_unpack();
        let mut hatch = None;
        for phdr in view.phdrs() {
            if phdr.p_type == crate::elf::PT_PHDR {
                if take_hatch {
                    unsafe { auxv::auxv_up(av, AT_PHDR, resv.reloc.apply(phdr.p_vaddr)) };
                }
                continue;
            }
            if !phdr.is_load() {
                continue;
            }
            let mut seg = unsafe { segment::map_segment(&phdr, resv.reloc, source) }?;
            if take_hatch && hatch.is_none() && phdr.is_executable() {
                // Written while the segment is still writable, before the
                // permission mask is sealed.
                hatch = unsafe { hatch::write_hatch(&phdr, resv.reloc) };
            }
            seg.seal()?;
        }

        self.phase = Phase::Done;
        Ok(LoadedImage {
            entry: resv.reloc.apply(view.entry()),
            reloc: resv.reloc,
            brk: resv.brk,
            hatch,
        })
    }
}

impl Default for ProgramLoader {
    fn default() -> Self {
        Self::new()
    }
}
