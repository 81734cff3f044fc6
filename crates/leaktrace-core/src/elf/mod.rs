//! Minimal ELF64 reader used for symbolization.
//!
//! This is not a loader: it only understands enough of the format to map a
//! return address back to the function containing it.
//!
//! # Constraints
//!
//! 1. **Direct file I/O**: objects are read with positioned reads on an open
//!    file descriptor, never through the dynamic loader
//! 2. **Bounded buffers**: section headers and symbols are scanned in fixed
//!    batches so memory use does not grow with table size
//! 3. **Little-endian ELF64 only**: the layouts that x86_64 and aarch64 Linux
//!    processes actually map

pub mod header;
pub mod program;
pub mod reader;
pub mod section;
pub mod symbol;

pub use header::{Elf64Header, ElfType};
pub use program::{Elf64ProgramHeader, ProgramType};
pub use reader::ElfFile;
pub use section::{Elf64SectionHeader, SectionType};
pub use symbol::Elf64Symbol;

/// First four bytes of every ELF object.
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Why an object could not be used for symbol lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElfError {
    /// Not an ELF object at all
    InvalidMagic,
    /// 32-bit objects are not read
    UnsupportedClass(u8),
    /// Big-endian objects are not read
    UnsupportedEncoding(u8),
    /// Table entry size does not match the ELF64 layout
    UnexpectedEntrySize { kind: &'static str, size: u64 },
    /// A table or entry lies past the end of the file
    InvalidOffset { kind: &'static str, offset: u64 },
    /// Fewer bytes than one fixed-size record
    BufferTooSmall { needed: usize, available: usize },
    /// Name offset outside its string table
    InvalidStringIndex(u32),
    /// Section index out of range
    InvalidSectionIndex(u32),
    /// Underlying read failed
    Io(std::io::ErrorKind),
}

impl core::fmt::Display for ElfError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidMagic => write!(f, "not an ELF object"),
            Self::UnsupportedClass(c) => write!(f, "ELF class {c} is not ELF64"),
            Self::UnsupportedEncoding(e) => write!(f, "ELF data encoding {e} is not little-endian"),
            Self::UnexpectedEntrySize { kind, size } => {
                write!(f, "unexpected {kind} entry size: {size}")
            }
            Self::InvalidOffset { kind, offset } => {
                write!(f, "{kind} at {offset:#x} is out of bounds")
            }
            Self::BufferTooSmall { needed, available } => {
                write!(f, "short record: {available} of {needed} bytes")
            }
            Self::InvalidStringIndex(idx) => write!(f, "name offset {idx} outside string table"),
            Self::InvalidSectionIndex(idx) => write!(f, "invalid section index: {idx}"),
            Self::Io(kind) => write!(f, "io: {kind}"),
        }
    }
}

impl std::error::Error for ElfError {}

impl From<std::io::Error> for ElfError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.kind())
    }
}

pub type ElfResult<T> = Result<T, ElfError>;

#[inline]
pub(crate) fn le_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

#[inline]
pub(crate) fn le_u32(data: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(raw)
}

#[inline]
pub(crate) fn le_u64(data: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(raw)
}

/// Fail with [`ElfError::BufferTooSmall`] unless `data` holds `needed` bytes.
#[inline]
pub(crate) fn ensure_len(data: &[u8], needed: usize) -> ElfResult<()> {
    if data.len() < needed {
        return Err(ElfError::BufferTooSmall {
            needed,
            available: data.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_spells_elf() {
        assert_eq!(&ELF_MAGIC[1..], b"ELF");
    }

    #[test]
    fn errors_render_for_logs() {
        assert_eq!(ElfError::InvalidMagic.to_string(), "not an ELF object");
        assert_eq!(
            ElfError::InvalidOffset { kind: "symtab", offset: 0x40 }.to_string(),
            "symtab at 0x40 is out of bounds"
        );

        let err = ElfError::UnexpectedEntrySize {
            kind: "symbol",
            size: 16,
        };
        assert_eq!(format!("{err}"), "unexpected symbol entry size: 16");
    }

    #[test]
    fn io_errors_keep_their_kind() {
        let err = ElfError::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert_eq!(err, ElfError::Io(std::io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn little_endian_helpers() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(le_u16(&data, 0), 0x0201);
        assert_eq!(le_u32(&data, 4), 0x0807_0605);
        assert_eq!(le_u64(&data, 0), 0x0807_0605_0403_0201);
        assert!(ensure_len(&data, 9).is_err());
    }
}
