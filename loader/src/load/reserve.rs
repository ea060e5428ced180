//! Address-space reservation.
//!
//! Before any segment is mapped, the whole span of the image's loadable
//! segments (their convex hull) is reserved with a single no-access
//! anonymous mapping. A kernel applying address-space randomization could
//! otherwise drop an unrelated mapping inside the range between two
//! per-segment calls; after the reservation, every later `MAP_FIXED`
//! inside it only ever replaces pages this loader owns.

use crate::elf::ImageView;
use crate::error::LoaderError;
use crate::mm::sys::{self, MapFlags, PROT_NONE};
use crate::mm::{page_down, page_up};

/// The relocation constant of one mapped image: added to every virtual
/// address in the image to obtain the actual mapped address. Zero for a
/// fixed-address executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reloc(pub usize);

impl Reloc {
    /// Relocate an image virtual address.
    #[inline]
    pub fn apply(&self, vaddr: u64) -> usize {
        (vaddr as usize).wrapping_add(self.0)
    }
}

/// Convex hull of an image's loadable segments, page-granular.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hull {
    /// Lowest segment vaddr, rounded down to a page boundary
    pub lo: usize,
    /// Page-rounded length covering every segment's memory image
    pub len: usize,
}

/// Compute the minimal page-aligned interval covering every loadable
/// segment's `[vaddr, vaddr + memsz)`.
pub fn load_hull(view: &ImageView<'_>) -> Option<Hull> {
    let mut lo = usize::MAX;
    let mut hi = 0usize;
    for phdr in view.phdrs().filter(|p| p.is_load()) {
        let start = phdr.p_vaddr as usize;
        let end = start + phdr.p_memsz as usize;
        lo = lo.min(start);
        hi = hi.max(end);
    }
    if lo > hi {
        return None;
    }
    let lo = page_down(lo);
    Some(Hull {
        lo,
        len: page_up(hi - lo),
    })
}

/// One reserved image range.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    /// Relocation constant for every vaddr of this image
    pub reloc: Reloc,
    /// First address past the reservation; the initial heap break of the
    /// loaded program when the image is not position independent
    pub brk: usize,
}

/// Reserve the hull with one no-access anonymous mapping.
///
/// Fixed-address images are reserved exactly at their link address;
/// position-independent images let the kernel pick the base, and the
/// returned [`Reloc`] captures the difference. Must complete before any
/// per-segment mapping of the same image.
pub fn reserve(view: &ImageView<'_>) -> Result<Reservation, LoaderError> {
    let hull = load_hull(view).ok_or(LoaderError::BadImage)?;
    let mut flags = MapFlags::PRIVATE | MapFlags::ANONYMOUS;
    if !view.is_pie() {
        flags |= MapFlags::FIXED;
    }
    let base = unsafe { sys::mmap(hull.lo, hull.len, PROT_NONE, flags, -1, 0) }
        .map_err(|errno| {
            log::debug!("hull reservation refused: errno {}", errno);
            LoaderError::MappingFailed
        })?;
    log::trace!(
        "reserved [{:#x}, {:#x}) reloc {:#x}",
        base,
        base + hull.len,
        base.wrapping_sub(hull.lo)
    );
    Ok(Reservation {
        reloc: Reloc(base.wrapping_sub(hull.lo)),
        brk: base + hull.len,
    })
}
