//! ELF header fuzz harness.

use sxl_loader::elf::ImageView;

use crate::{FuzzResult, FuzzTarget};

/// Drives the image validator over raw bytes. Accepted inputs must obey
/// every structural invariant the loader later relies on.
pub struct ImageHeaderTarget;

impl FuzzTarget for ImageHeaderTarget {
    fn name(&self) -> &str {
        "elf_header"
    }

    fn fuzz(&mut self, data: &[u8]) -> FuzzResult {
        match ImageView::parse(data) {
            Ok(view) => {
                // Walk everything a load pass would touch; must not
                // panic whatever the table contains.
                let mut loads = 0usize;
                for phdr in view.phdrs() {
                    if phdr.is_load() {
                        loads += 1;
                    }
                }
                assert!(loads > 0);
                let _ = view.phdr_vaddr();
                let _ = view.interp_vaddr();
                let _ = view.entry();
                FuzzResult::Ok
            }
            Err(err) => FuzzResult::Rejected(err),
        }
    }

    fn reset(&mut self) {}
}
