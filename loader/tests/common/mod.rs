//! Test-side encoder: the forward half of the container format.
//!
//! Mirrors the decoder's limits exactly (window, match lengths, filter
//! scans) so the round-trip law can be exercised against arbitrary
//! input.

use sxl_loader::unpack::filter::{FILTER_NONE};
use sxl_loader::unpack::method::{LZ1_MAX_DIST, LZ1_MAX_MATCH, LZ1_MAX_RUN, METHOD_LZ1};
use sxl_loader::unpack::END_MAGIC;

/// Greedy single-pass LZ compressor matching the built-in decoder.
pub fn lz1_compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut lit_start = 0usize;
    let mut i = 0usize;

    fn flush_literals(out: &mut Vec<u8>, data: &[u8], from: usize, to: usize) {
        for chunk_start in (from..to).step_by(LZ1_MAX_RUN) {
            let chunk_end = (chunk_start + LZ1_MAX_RUN).min(to);
            out.push((chunk_end - chunk_start - 1) as u8);
            out.extend_from_slice(&data[chunk_start..chunk_end]);
        }
    }

    while i < data.len() {
        let window_start = i.saturating_sub(LZ1_MAX_DIST);
        let mut best_len = 0usize;
        let mut best_dist = 0usize;
        for cand in window_start..i {
            let limit = (data.len() - i).min(LZ1_MAX_MATCH);
            let mut l = 0usize;
            while l < limit && data[cand + l] == data[i + l] {
                l += 1;
            }
            if l > best_len {
                best_len = l;
                best_dist = i - cand;
            }
        }

        if best_len >= 3 {
            flush_literals(&mut out, data, lit_start, i);
            let dist = best_dist - 1;
            if best_len <= 8 {
                out.push(((best_len - 2) as u8) << 5 | (dist >> 8) as u8);
                out.push(dist as u8);
            } else {
                out.push(7 << 5 | (dist >> 8) as u8);
                out.push((best_len - 9) as u8);
                out.push(dist as u8);
            }
            i += best_len;
            lit_start = i;
        } else {
            i += 1;
        }
    }
    flush_literals(&mut out, data, lit_start, data.len());
    out
}

/// Forward delta filter.
pub fn delta8_forward(buf: &mut [u8], seed: u8) {
    let mut prev = seed;
    for b in buf.iter_mut() {
        let cur = *b;
        *b = cur.wrapping_sub(prev);
        prev = cur;
    }
}

/// Forward call/jmp displacement transform.
pub fn call_e8e9_forward(buf: &mut [u8], seed: u8) {
    let mut i = 0;
    while i + 5 <= buf.len() {
        let op = buf[i];
        if op == 0xE8 || op == 0xE9 {
            let d = u32::from_le_bytes([buf[i + 1], buf[i + 2], buf[i + 3], buf[i + 4]]);
            let d = d.wrapping_add(i as u32 + 5 + seed as u32);
            buf[i + 1..i + 5].copy_from_slice(&d.to_le_bytes());
            i += 5;
        } else {
            i += 1;
        }
    }
}

fn push_header(out: &mut Vec<u8>, sz_unc: u32, sz_cpr: u32, method: u8, filter: u8, seed: u8) {
    out.extend_from_slice(&sz_unc.to_le_bytes());
    out.extend_from_slice(&sz_cpr.to_le_bytes());
    out.push(method);
    out.push(filter);
    out.push(seed);
    out.push(0);
}

/// Emit one stored block.
pub fn push_stored(out: &mut Vec<u8>, data: &[u8]) {
    push_header(out, data.len() as u32, data.len() as u32, 0, FILTER_NONE, 0);
    out.extend_from_slice(data);
}

/// Emit one block, compressed when that pays, stored (unfiltered)
/// otherwise; the decoder never unfilters stored blocks.
pub fn push_block(out: &mut Vec<u8>, data: &[u8], filter_id: u8, seed: u8) {
    let mut work = data.to_vec();
    match filter_id {
        FILTER_NONE => {}
        sxl_loader::unpack::filter::FILTER_DELTA8 => delta8_forward(&mut work, seed),
        sxl_loader::unpack::filter::FILTER_CALL_E8E9 => call_e8e9_forward(&mut work, seed),
        other => panic!("test encoder has no filter {other:#x}"),
    }
    let packed = lz1_compress(&work);
    if packed.len() < data.len() {
        push_header(
            out,
            data.len() as u32,
            packed.len() as u32,
            METHOD_LZ1,
            filter_id,
            seed,
        );
        out.extend_from_slice(&packed);
    } else {
        push_stored(out, data);
    }
}

/// Emit the stream terminator.
pub fn push_end_marker(out: &mut Vec<u8>) {
    push_header(out, 0, END_MAGIC, 0, FILTER_NONE, 0);
}

/// Deterministic pseudo-random bytes for round-trip inputs.
pub fn lcg_bytes(len: usize, mut state: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        out.push((state >> 24) as u8);
    }
    out
}

/// Build a minimal ELF64 image header (+ program headers) in a byte
/// buffer. `phdrs` entries are
/// `(p_type, p_flags, p_offset, p_vaddr, p_filesz, p_memsz)`.
pub fn build_image_header(
    e_type: u16,
    entry: u64,
    phdrs: &[(u32, u32, u64, u64, u64, u64)],
) -> Vec<u8> {
    use sxl_loader::elf::{ELFCLASS64, ELFDATA2LSB, ELF_MAGIC, EM_NATIVE};

    let mut buf = vec![0u8; 64 + phdrs.len() * 56];
    buf[0..4].copy_from_slice(&ELF_MAGIC);
    buf[4] = ELFCLASS64;
    buf[5] = ELFDATA2LSB;
    buf[6] = 1;
    buf[16..18].copy_from_slice(&e_type.to_le_bytes());
    buf[18..20].copy_from_slice(&EM_NATIVE.to_le_bytes());
    buf[20..24].copy_from_slice(&1u32.to_le_bytes());
    buf[24..32].copy_from_slice(&entry.to_le_bytes());
    buf[32..40].copy_from_slice(&64u64.to_le_bytes());
    buf[52..54].copy_from_slice(&64u16.to_le_bytes());
    buf[54..56].copy_from_slice(&56u16.to_le_bytes());
    buf[56..58].copy_from_slice(&(phdrs.len() as u16).to_le_bytes());

    for (i, &(p_type, p_flags, p_offset, p_vaddr, p_filesz, p_memsz)) in phdrs.iter().enumerate() {
        let at = 64 + i * 56;
        buf[at..at + 4].copy_from_slice(&p_type.to_le_bytes());
        buf[at + 4..at + 8].copy_from_slice(&p_flags.to_le_bytes());
        buf[at + 8..at + 16].copy_from_slice(&p_offset.to_le_bytes());
        buf[at + 16..at + 24].copy_from_slice(&p_vaddr.to_le_bytes());
        buf[at + 24..at + 32].copy_from_slice(&p_vaddr.to_le_bytes());
        buf[at + 32..at + 40].copy_from_slice(&p_filesz.to_le_bytes());
        buf[at + 40..at + 48].copy_from_slice(&p_memsz.to_le_bytes());
        buf[at + 48..at + 56].copy_from_slice(&0x1000u64.to_le_bytes());
    }
    buf
}
