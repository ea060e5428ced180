//! ELF64 image parsing.
//!
//! A defensive, allocation-free view over the decompressed ELF header and
//! program-header table sitting in the header scratch buffer. The
//! container is parsed as hostile: every offset and count is validated
//! against the buffer bounds before anything derives addresses from it.
//!
//! Only the pieces a loader needs exist here: the file header, the
//! program-header table and the segment constants. Section headers are
//! never looked at.

use core::mem::size_of;

use crate::error::LoaderError;

/// ELF magic number: 0x7F 'E' 'L' 'F'
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// ELF class: 64-bit
pub const ELFCLASS64: u8 = 2;

/// ELF data encoding: little endian
pub const ELFDATA2LSB: u8 = 1;

/// ELF type: executable
pub const ET_EXEC: u16 = 2;

/// ELF type: shared object (PIE)
pub const ET_DYN: u16 = 3;

/// Machine type: x86_64
pub const EM_X86_64: u16 = 62;

/// Machine type: AArch64
pub const EM_AARCH64: u16 = 183;

/// The machine id this loader accepts.
#[cfg(target_arch = "x86_64")]
pub const EM_NATIVE: u16 = EM_X86_64;
#[cfg(target_arch = "aarch64")]
pub const EM_NATIVE: u16 = EM_AARCH64;

/// Program header type: loadable segment
pub const PT_LOAD: u32 = 1;

/// Program header type: interpreter path
pub const PT_INTERP: u32 = 3;

/// Program header type: program header table
pub const PT_PHDR: u32 = 6;

/// Segment permission: executable
pub const PF_X: u32 = 1;

/// Segment permission: writable
pub const PF_W: u32 = 2;

/// Segment permission: readable
pub const PF_R: u32 = 4;

/// ELF64 file header
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Elf64Header {
    /// Magic number and other info
    pub e_ident: [u8; 16],
    /// Object file type
    pub e_type: u16,
    /// Machine type
    pub e_machine: u16,
    /// Object file version
    pub e_version: u32,
    /// Entry point virtual address
    pub e_entry: u64,
    /// Program header table file offset
    pub e_phoff: u64,
    /// Section header table file offset
    pub e_shoff: u64,
    /// Processor-specific flags
    pub e_flags: u32,
    /// ELF header size
    pub e_ehsize: u16,
    /// Program header table entry size
    pub e_phentsize: u16,
    /// Program header table entry count
    pub e_phnum: u16,
    /// Section header table entry size
    pub e_shentsize: u16,
    /// Section header table entry count
    pub e_shnum: u16,
    /// Section name string table index
    pub e_shstrndx: u16,
}

/// ELF64 program header
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct Elf64ProgramHeader {
    /// Segment type
    pub p_type: u32,
    /// Segment flags
    pub p_flags: u32,
    /// Segment file offset
    pub p_offset: u64,
    /// Segment virtual address
    pub p_vaddr: u64,
    /// Segment physical address (unused)
    pub p_paddr: u64,
    /// Segment size in file
    pub p_filesz: u64,
    /// Segment size in memory
    pub p_memsz: u64,
    /// Segment alignment
    pub p_align: u64,
}

impl Elf64ProgramHeader {
    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }

    pub fn is_executable(&self) -> bool {
        self.p_flags & PF_X != 0
    }

    pub fn is_writable(&self) -> bool {
        self.p_flags & PF_W != 0
    }
}

/// Validated read-only view over an ELF64 header and its program-header
/// table. Borrows the scratch buffer the headers were decompressed (or
/// read) into; lives for the duration of one load pass.
pub struct ImageView<'a> {
    ehdr: Elf64Header,
    phdr_bytes: &'a [u8],
}

impl<'a> ImageView<'a> {
    /// Parse and validate an image header from raw bytes.
    ///
    /// The program-header table must lie entirely inside `buf`. Segment
    /// file offsets are validated later, implicitly, by the bounded
    /// block-stream decode; this only guards what the loader dereferences
    /// directly.
    pub fn parse(buf: &'a [u8]) -> Result<ImageView<'a>, LoaderError> {
        if buf.len() < size_of::<Elf64Header>() {
            return Err(LoaderError::BadImage);
        }
        // Size checked above; repr(C, packed), so unaligned reads are fine.
        let ehdr: Elf64Header =
            unsafe { core::ptr::read_unaligned(buf.as_ptr() as *const Elf64Header) };

        if ehdr.e_ident[0..4] != ELF_MAGIC {
            return Err(LoaderError::BadImage);
        }
        if ehdr.e_ident[4] != ELFCLASS64 || ehdr.e_ident[5] != ELFDATA2LSB || ehdr.e_ident[6] != 1 {
            return Err(LoaderError::BadImage);
        }
        if ehdr.e_type != ET_EXEC && ehdr.e_type != ET_DYN {
            return Err(LoaderError::BadImage);
        }
        if ehdr.e_machine != EM_NATIVE {
            return Err(LoaderError::BadImage);
        }
        if ehdr.e_phentsize as usize != size_of::<Elf64ProgramHeader>() {
            return Err(LoaderError::BadImage);
        }
        if ehdr.e_phnum == 0 {
            return Err(LoaderError::BadImage);
        }

        let phoff = ehdr.e_phoff as usize;
        let table_len = (ehdr.e_phnum as usize)
            .checked_mul(ehdr.e_phentsize as usize)
            .ok_or(LoaderError::BadImage)?;
        let table_end = phoff.checked_add(table_len).ok_or(LoaderError::BadImage)?;
        if ehdr.e_phoff > buf.len() as u64 || table_end > buf.len() {
            return Err(LoaderError::BadImage);
        }

        let view = ImageView {
            ehdr,
            phdr_bytes: &buf[phoff..table_end],
        };

        // Per-segment sanity plus "at least one loadable segment".
        let mut loadable = 0usize;
        for phdr in view.phdrs() {
            if !phdr.is_load() {
                continue;
            }
            if phdr.p_filesz > phdr.p_memsz {
                return Err(LoaderError::BadImage);
            }
            if phdr.p_vaddr.checked_add(phdr.p_memsz).is_none() {
                return Err(LoaderError::BadImage);
            }
            loadable += 1;
        }
        if loadable == 0 {
            return Err(LoaderError::BadImage);
        }

        Ok(view)
    }

    pub fn ehdr(&self) -> &Elf64Header {
        &self.ehdr
    }

    /// Whether the image is position independent and expects the loader
    /// to pick its base.
    pub fn is_pie(&self) -> bool {
        self.ehdr.e_type == ET_DYN
    }

    /// Unrelocated entry point.
    pub fn entry(&self) -> u64 {
        self.ehdr.e_entry
    }

    pub fn phdr_count(&self) -> usize {
        self.ehdr.e_phnum as usize
    }

    /// Program header at `index`, decoded from the table bytes.
    pub fn phdr(&self, index: usize) -> Elf64ProgramHeader {
        let off = index * size_of::<Elf64ProgramHeader>();
        debug_assert!(off + size_of::<Elf64ProgramHeader>() <= self.phdr_bytes.len());
        unsafe {
            core::ptr::read_unaligned(
                self.phdr_bytes.as_ptr().add(off) as *const Elf64ProgramHeader
            )
        }
    }

    /// Iterate every program header in file order.
    pub fn phdrs(&self) -> impl Iterator<Item = Elf64ProgramHeader> + '_ {
        (0..self.phdr_count()).map(move |i| self.phdr(i))
    }

    /// Virtual address of the program-header table, from `PT_PHDR` when
    /// present, else derived from the lowest loadable segment (the table
    /// conventionally follows the file header).
    pub fn phdr_vaddr(&self) -> u64 {
        for phdr in self.phdrs() {
            if phdr.p_type == PT_PHDR {
                return phdr.p_vaddr;
            }
        }
        self.phdrs()
            .filter(|p| p.is_load())
            .map(|p| p.p_vaddr)
            .min()
            .unwrap_or(0)
            + size_of::<Elf64Header>() as u64
    }

    /// Unrelocated vaddr of the interpreter path string, when the image
    /// requests one.
    pub fn interp_vaddr(&self) -> Option<u64> {
        self.phdrs()
            .find(|p| p.p_type == PT_INTERP)
            .map(|p| p.p_vaddr)
    }
}
