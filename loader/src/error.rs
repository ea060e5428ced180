//! Loader error taxonomy.
//!
//! Every variant is fatal: errors are raised as close to detection as
//! possible and propagated unchanged up to the orchestrator, which
//! terminates the process. There is no retry or partial-result path.

use core::fmt;

/// Errors that can occur while rebuilding the process image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderError {
    /// Fewer bytes remain in the input than one block header
    TruncatedHeader,
    /// The block container violates its structural invariants
    MalformedStream,
    /// A decompressor reported failure, or success with a byte count
    /// other than the one the block header declared
    DecompressionMismatch,
    /// A block names a filter id outside the closed supported set
    UnknownFilter,
    /// The image is not a loadable ELF64 binary for this machine
    BadImage,
    /// A memory mapping syscall was refused
    MappingFailed,
    /// A protection-change syscall was refused
    ProtectionFailed,
    /// An unmapping syscall was refused
    UnmapFailed,
    /// The requested program interpreter could not be opened or read
    InterpreterOpenFailed,
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedHeader => write!(f, "Truncated block header"),
            Self::MalformedStream => write!(f, "Malformed block stream"),
            Self::DecompressionMismatch => write!(f, "Decompressed size mismatch"),
            Self::UnknownFilter => write!(f, "Unknown filter id"),
            Self::BadImage => write!(f, "Invalid program image"),
            Self::MappingFailed => write!(f, "Memory mapping failed"),
            Self::ProtectionFailed => write!(f, "Memory protection change failed"),
            Self::UnmapFailed => write!(f, "Memory unmapping failed"),
            Self::InterpreterOpenFailed => write!(f, "Program interpreter unavailable"),
        }
    }
}
