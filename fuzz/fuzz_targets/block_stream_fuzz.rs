//! Block-container fuzz target
//!
//! Run with: cargo fuzz run block_stream_fuzz

#![no_main]

use libfuzzer_sys::fuzz_target;
use sxl_fuzz::block::BlockStreamTarget;
use sxl_fuzz::FuzzTarget;

fuzz_target!(|data: &[u8]| {
    let mut target = BlockStreamTarget::new();
    let _ = target.fuzz(data);
});
