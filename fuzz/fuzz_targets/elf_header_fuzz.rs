//! ELF header fuzz target
//!
//! Run with: cargo fuzz run elf_header_fuzz

#![no_main]

use libfuzzer_sys::fuzz_target;
use sxl_fuzz::image::ImageHeaderTarget;
use sxl_fuzz::FuzzTarget;

fuzz_target!(|data: &[u8]| {
    let mut target = ImageHeaderTarget;
    let _ = target.fuzz(data);
});
