//! Block-container fuzz harness.

use sxl_loader::extent::Extent;
use sxl_loader::unpack::{filter, method, unpack_stream};

use crate::{FuzzResult, FuzzTarget};

/// Upper bound on decoded output per iteration.
pub const MAX_OUTPUT: usize = 64 * 1024;

/// Drives the stream reader over raw input. The first input byte picks
/// the declared output size so short streams exercise the "ends early"
/// paths as well as the overrun ones.
pub struct BlockStreamTarget {
    input: [u8; MAX_OUTPUT],
    output: [u8; MAX_OUTPUT],
}

impl BlockStreamTarget {
    pub const fn new() -> Self {
        BlockStreamTarget {
            input: [0; MAX_OUTPUT],
            output: [0; MAX_OUTPUT],
        }
    }
}

impl Default for BlockStreamTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl FuzzTarget for BlockStreamTarget {
    fn name(&self) -> &str {
        "block_stream"
    }

    fn fuzz(&mut self, data: &[u8]) -> FuzzResult {
        if data.is_empty() {
            return FuzzResult::Ok;
        }
        let out_len = (data[0] as usize * 256).min(MAX_OUTPUT);
        let body = &data[1..];
        let n = body.len().min(MAX_OUTPUT);
        self.input[..n].copy_from_slice(&body[..n]);

        let mut input = Extent::from_mut_slice(&mut self.input[..n]);
        let mut output = Extent::from_mut_slice(&mut self.output[..out_len]);
        match unpack_stream(
            &mut input,
            &mut output,
            method::decompress,
            Some(filter::unfilter),
        ) {
            Ok(()) => FuzzResult::Ok,
            Err(err) => FuzzResult::Rejected(err),
        }
    }

    fn reset(&mut self) {
        self.output = [0; MAX_OUTPUT];
    }
}
