//! Auxiliary-vector patching.
//!
//! The kernel hands every new process a fixed-format array of
//! (type, value) pairs describing bootstrap facts. The values it filled
//! in describe this loader, not the program being reconstructed, so the
//! relevant entries are rewritten in place once the real image is mapped.
//! Entries are never appended or removed.

/// End of auxiliary vector
pub const AT_NULL: usize = 0;
/// Entry to be ignored; reusable as a free slot
pub const AT_IGNORE: usize = 1;
/// Program headers location
pub const AT_PHDR: usize = 3;
/// Size of one program header entry
pub const AT_PHENT: usize = 4;
/// Number of program headers
pub const AT_PHNUM: usize = 5;
/// Page size
pub const AT_PAGESZ: usize = 6;
/// Base address of the interpreter
pub const AT_BASE: usize = 7;
/// Program entry point
pub const AT_ENTRY: usize = 9;

/// One auxiliary-vector entry, laid out exactly as the kernel builds it
/// on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct AuxEntry {
    pub a_type: usize,
    pub a_val: usize,
}

/// Overwrite the value of the first entry matching `a_type`, or claim an
/// `AT_IGNORE` slot for it.
///
/// Best effort by design: the environment is assumed to have
/// pre-populated every entry this loader cares about, so a missing slot
/// is a silent no-op, not an error. The walk stops at the `AT_NULL`
/// terminator, except that requesting `AT_NULL` itself patches the
/// terminator's value, which is how the escape-hatch address reaches the
/// bootstrap without growing the vector.
///
/// # Safety
///
/// `av` must be null or point to an `AT_NULL`-terminated entry array.
pub unsafe fn auxv_up(av: *mut AuxEntry, a_type: usize, value: usize) {
    if av.is_null() {
        return;
    }
    let mut at = av;
    loop {
        let entry = unsafe { &mut *at };
        if entry.a_type == a_type || (entry.a_type == AT_IGNORE && a_type != AT_NULL) {
            log::trace!("auxv[{}] <- {:#x}", a_type, value);
            entry.a_type = a_type;
            entry.a_val = value;
            return;
        }
        if entry.a_type == AT_NULL {
            return;
        }
        at = unsafe { at.add(1) };
    }
}
