//! Block-stream container decoder.
//!
//! The compressed payload is a sequence of (header, payload) blocks, each
//! header 12 bytes little-endian, terminated by a header whose
//! uncompressed size is zero and whose compressed-size field carries the
//! end magic. The reader validates every size invariant before touching
//! payload bytes, so a truncated or hostile container can never write
//! past the output extent.
//!
//! Layout of one block header:
//!
//! | Field    | Size | Meaning                                |
//! |----------|------|----------------------------------------|
//! | `sz_unc` | u32  | uncompressed size of this block        |
//! | `sz_cpr` | u32  | compressed size of this block          |
//! | `method` | u8   | compression method id                  |
//! | `filter` | u8   | filter id, 0 = none                    |
//! | `seed`   | u8   | 8-bit filter parameter                 |
//! | unused   | u8   | written as 0, ignored on read          |
//!
//! A block with `sz_cpr == sz_unc` was not compressible and is stored
//! verbatim; stored blocks are never filtered (the encoder falls back to
//! the unfiltered original when compression does not pay).

pub mod filter;
pub mod method;

use crate::error::LoaderError;
use crate::extent::Extent;
use crate::{DecompressFn, UnfilterFn};

/// Stream terminator: `sz_unc == 0` and `sz_cpr ==` this magic
/// (`b"SXL!"` read little-endian).
pub const END_MAGIC: u32 = 0x214C_5853;

/// Size of one encoded block header on the wire.
pub const BLOCK_HDR_SIZE: usize = 12;

/// The fixed leading region of a program image (ELF header plus program
/// header table) is stored unfiltered; a decoded block is only unfiltered
/// when it is longer than this, or when it is the last block of its
/// output extent.
pub const EHDR_REGION: usize = 512;

/// One decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Uncompressed size of this block
    pub sz_unc: u32,
    /// Compressed size of this block
    pub sz_cpr: u32,
    /// Compression method id
    pub method: u8,
    /// Filter id, 0 = none
    pub filter: u8,
    /// 8-bit filter parameter
    pub seed: u8,
}

impl BlockHeader {
    /// Decode a header from its 12-byte wire form.
    pub fn parse(raw: [u8; BLOCK_HDR_SIZE]) -> Self {
        BlockHeader {
            sz_unc: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            sz_cpr: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            method: raw[8],
            filter: raw[9],
            seed: raw[10],
            // raw[11] reserved
        }
    }

    /// Whether this header is the stream terminator.
    pub fn is_end_marker(&self) -> bool {
        self.sz_unc == 0
    }
}

/// Outcome of reading one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A block was produced; more may follow
    Continue,
    /// The end marker was consumed
    Done,
}

/// Read one block from `input` and produce its bytes into `output`.
///
/// Enforces, in order:
/// - at least one whole header remains (`TruncatedHeader`);
/// - end marker: `sz_cpr == END_MAGIC` and the input is exhausted
///   (`MalformedStream` otherwise);
/// - `0 < sz_cpr <= sz_unc <= output.remaining()` (`MalformedStream`);
/// - a decompressor that reports success must have produced exactly
///   `sz_unc` bytes (`DecompressionMismatch`);
/// - a filter id outside the closed set is rejected before dispatch
///   (`UnknownFilter`).
pub fn read_block(
    input: &mut Extent<'_>,
    output: &mut Extent<'_>,
    decompress: DecompressFn,
    unfilter: Option<UnfilterFn>,
) -> Result<Step, LoaderError> {
    let raw = input
        .read_array::<BLOCK_HDR_SIZE>()
        .ok_or(LoaderError::TruncatedHeader)?;
    let hdr = BlockHeader::parse(raw);

    if hdr.is_end_marker() {
        if hdr.sz_cpr != END_MAGIC || !input.is_empty() {
            return Err(LoaderError::MalformedStream);
        }
        return Ok(Step::Done);
    }

    let sz_unc = hdr.sz_unc as usize;
    let sz_cpr = hdr.sz_cpr as usize;
    if hdr.sz_cpr == 0 || hdr.sz_cpr > hdr.sz_unc || sz_unc > output.remaining() {
        return Err(LoaderError::MalformedStream);
    }

    // Evaluated before the output advances: a block that fills the rest
    // of the extent is the last one and always eligible for unfiltering.
    let last_block = output.remaining() == sz_unc;

    let src = input
        .take_bytes(sz_cpr)
        .ok_or(LoaderError::MalformedStream)?;
    let dst = output
        .take_slice(sz_unc)
        .ok_or(LoaderError::MalformedStream)?;

    if sz_cpr == sz_unc {
        // Stored block: copied verbatim, never filtered.
        dst.copy_from_slice(src);
        return Ok(Step::Continue);
    }

    let mut out_len = 0usize;
    let status = decompress(src, dst, &mut out_len, hdr.method);
    if status != 0 || out_len != sz_unc {
        log::debug!(
            "block decompress failed: status={} produced={} declared={}",
            status,
            out_len,
            sz_unc
        );
        return Err(LoaderError::DecompressionMismatch);
    }

    // Skip the image's leading header region: the first, header-only
    // block of an image is stored unfiltered by the encoder.
    if hdr.filter != filter::FILTER_NONE && (sz_unc > EHDR_REGION || last_block) {
        if filter::Filter::from_id(hdr.filter).is_none() {
            return Err(LoaderError::UnknownFilter);
        }
        if let Some(unf) = unfilter {
            unf(dst, hdr.filter, hdr.seed);
        }
    }

    Ok(Step::Continue)
}

/// Decompress blocks from `input` until `output` is full.
///
/// A stream that signals `Done` before the output extent is exhausted
/// declared less data than the caller requires and fails closed.
pub fn unpack_stream(
    input: &mut Extent<'_>,
    output: &mut Extent<'_>,
    decompress: DecompressFn,
    unfilter: Option<UnfilterFn>,
) -> Result<(), LoaderError> {
    while !output.is_empty() {
        match read_block(input, output, decompress, unfilter)? {
            Step::Continue => {}
            Step::Done => return Err(LoaderError::MalformedStream),
        }
    }
    Ok(())
}

/// Consume and validate the stream terminator.
///
/// Called once after the last segment's bytes have been produced; any
/// trailing bytes beyond the marker mean the container lied about its
/// length.
pub fn finish_stream(input: &mut Extent<'_>) -> Result<(), LoaderError> {
    let mut empty = [0u8; 0];
    let mut output = Extent::from_mut_slice(&mut empty);
    match read_block(input, &mut output, method::decompress, None)? {
        Step::Done => Ok(()),
        Step::Continue => Err(LoaderError::MalformedStream),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(sz_unc: u32, sz_cpr: u32, method: u8, filter: u8, seed: u8) -> [u8; 12] {
        let mut h = [0u8; 12];
        h[0..4].copy_from_slice(&sz_unc.to_le_bytes());
        h[4..8].copy_from_slice(&sz_cpr.to_le_bytes());
        h[8] = method;
        h[9] = filter;
        h[10] = seed;
        h
    }

    fn end_marker() -> [u8; 12] {
        header_bytes(0, END_MAGIC, 0, 0, 0)
    }

    #[test]
    fn test_header_decode() {
        let hdr = BlockHeader::parse(header_bytes(0x1234, 0x56, 2, 0x46, 0xAA));
        assert_eq!(hdr.sz_unc, 0x1234);
        assert_eq!(hdr.sz_cpr, 0x56);
        assert_eq!(hdr.method, 2);
        assert_eq!(hdr.filter, 0x46);
        assert_eq!(hdr.seed, 0xAA);
    }

    #[test]
    fn test_truncated_header() {
        let mut stream = [0u8; 7];
        let mut out_buf = [0u8; 16];
        let mut input = Extent::from_mut_slice(&mut stream);
        let mut output = Extent::from_mut_slice(&mut out_buf);
        assert_eq!(
            read_block(&mut input, &mut output, method::decompress, None),
            Err(LoaderError::TruncatedHeader)
        );
    }

    #[test]
    fn test_stored_block_copied_verbatim() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&header_bytes(4, 4, 0, 0, 0));
        stream.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        stream.extend_from_slice(&end_marker());

        let mut out_buf = [0u8; 4];
        let mut input = Extent::from_mut_slice(&mut stream);
        let mut output = Extent::from_mut_slice(&mut out_buf);
        unpack_stream(&mut input, &mut output, method::decompress, None).unwrap();
        finish_stream(&mut input).unwrap();
        assert_eq!(out_buf, [0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_end_marker_with_wrong_magic_rejected() {
        // Scenario: sz_unc == 0 but sz_cpr is not the magic. Must fail
        // before the output extent is touched.
        let mut stream = Vec::new();
        stream.extend_from_slice(&header_bytes(0, 0x1111_1111, 0, 0, 0));

        let mut out_buf = [0xAAu8; 8];
        let mut input = Extent::from_mut_slice(&mut stream);
        let mut output = Extent::from_mut_slice(&mut out_buf);
        assert_eq!(
            read_block(&mut input, &mut output, method::decompress, None),
            Err(LoaderError::MalformedStream)
        );
        assert_eq!(out_buf, [0xAA; 8]);
    }

    #[test]
    fn test_end_marker_with_trailing_bytes_rejected() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&end_marker());
        stream.push(0); // trailing garbage

        let mut out_buf = [0u8; 0];
        let mut input = Extent::from_mut_slice(&mut stream);
        let mut output = Extent::from_mut_slice(&mut out_buf);
        assert_eq!(
            read_block(&mut input, &mut output, method::decompress, None),
            Err(LoaderError::MalformedStream)
        );
    }

    #[test]
    fn test_compressed_larger_than_uncompressed_rejected() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&header_bytes(4, 8, 2, 0, 0));
        stream.extend_from_slice(&[0u8; 8]);

        let mut out_buf = [0u8; 16];
        let mut input = Extent::from_mut_slice(&mut stream);
        let mut output = Extent::from_mut_slice(&mut out_buf);
        assert_eq!(
            read_block(&mut input, &mut output, method::decompress, None),
            Err(LoaderError::MalformedStream)
        );
    }

    #[test]
    fn test_zero_compressed_size_rejected() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&header_bytes(4, 0, 2, 0, 0));

        let mut out_buf = [0u8; 16];
        let mut input = Extent::from_mut_slice(&mut stream);
        let mut output = Extent::from_mut_slice(&mut out_buf);
        assert_eq!(
            read_block(&mut input, &mut output, method::decompress, None),
            Err(LoaderError::MalformedStream)
        );
    }

    #[test]
    fn test_block_larger_than_output_rejected() {
        // Declares more output than the extent can hold; must fail closed
        // without writing anything.
        let mut stream = Vec::new();
        stream.extend_from_slice(&header_bytes(32, 32, 0, 0, 0));
        stream.extend_from_slice(&[7u8; 32]);

        let mut out_buf = [0u8; 16];
        let mut input = Extent::from_mut_slice(&mut stream);
        let mut output = Extent::from_mut_slice(&mut out_buf);
        assert_eq!(
            read_block(&mut input, &mut output, method::decompress, None),
            Err(LoaderError::MalformedStream)
        );
        assert_eq!(out_buf, [0; 16]);
    }

    #[test]
    fn test_unknown_filter_rejected_before_dispatch() {
        // A compressed last block naming a filter outside the closed set.
        let payload = method::tests::lz1_literal_run(&[1, 2, 3, 4]);
        let mut stream = Vec::new();
        stream.extend_from_slice(&header_bytes(4, payload.len() as u32, 2, 0x7F, 0));
        stream.extend_from_slice(&payload);

        let mut out_buf = [0u8; 4];
        let mut input = Extent::from_mut_slice(&mut stream);
        let mut output = Extent::from_mut_slice(&mut out_buf);
        assert_eq!(
            read_block(&mut input, &mut output, method::decompress, Some(filter::unfilter)),
            Err(LoaderError::UnknownFilter)
        );
    }

    #[test]
    fn test_stream_ending_early_rejected() {
        // Terminator arrives while the output extent still expects bytes.
        let mut stream = Vec::new();
        stream.extend_from_slice(&header_bytes(4, 4, 0, 0, 0));
        stream.extend_from_slice(&[1, 2, 3, 4]);
        stream.extend_from_slice(&end_marker());

        let mut out_buf = [0u8; 8];
        let mut input = Extent::from_mut_slice(&mut stream);
        let mut output = Extent::from_mut_slice(&mut out_buf);
        assert_eq!(
            unpack_stream(&mut input, &mut output, method::decompress, None),
            Err(LoaderError::MalformedStream)
        );
    }

    #[test]
    fn test_stored_then_compressed_filtered_block() {
        // Two-block stream: block 1 is the stored header region and must
        // come through verbatim and unfiltered; block 2 is compressed and
        // delta-filtered with seed 0, so only block 2 is unfiltered.
        let hdr_region = [0x7F, b'E', b'L', b'F'];

        // Delta-filtered form of [10, 20, 30, 40] with seed 0.
        let original: [u8; 4] = [10, 20, 30, 40];
        let mut filtered = original;
        filter::tests::delta8_forward(&mut filtered, 0);
        let payload = method::tests::lz1_literal_run(&filtered);

        let mut stream = Vec::new();
        stream.extend_from_slice(&header_bytes(4, 4, 0, 0, 0));
        stream.extend_from_slice(&hdr_region);
        stream.extend_from_slice(&header_bytes(
            4,
            payload.len() as u32,
            method::METHOD_LZ1,
            filter::FILTER_DELTA8,
            0,
        ));
        stream.extend_from_slice(&payload);
        stream.extend_from_slice(&end_marker());

        let mut out_buf = [0u8; 8];
        let mut input = Extent::from_mut_slice(&mut stream);
        let mut output = Extent::from_mut_slice(&mut out_buf);
        unpack_stream(
            &mut input,
            &mut output,
            method::decompress,
            Some(filter::unfilter),
        )
        .unwrap();
        finish_stream(&mut input).unwrap();

        assert_eq!(&out_buf[..4], &hdr_region);
        assert_eq!(&out_buf[4..], &original);
    }
}
