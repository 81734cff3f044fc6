//! ELF64 file header.
//!
//! The symbolizer needs three facts from it: whether symbol values must be
//! shifted by a load bias, and where the section and program header tables
//! start.

use super::{ELF_MAGIC, ElfError, ElfResult, ensure_len, le_u16, le_u64};

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;

/// How an object is placed in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfType {
    /// `ET_EXEC`: linked at its final addresses.
    Exec,
    /// `ET_DYN`: shared object or PIE, shifted by a load bias.
    Dyn,
    /// Relocatable objects, core files and the rest.
    Other(u16),
}

impl From<u16> for ElfType {
    fn from(value: u16) -> Self {
        match value {
            2 => Self::Exec,
            3 => Self::Dyn,
            other => Self::Other(other),
        }
    }
}

/// Table locations read from an ELF64 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64Header {
    pub e_type: ElfType,
    pub e_phoff: u64,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shoff: u64,
    pub e_shentsize: u16,
    pub e_shnum: u16,
}

impl Elf64Header {
    /// Size of an ELF64 header in bytes.
    pub const SIZE: usize = 64;

    /// Validate the identification bytes and read the table locations.
    ///
    /// # Errors
    ///
    /// Short input, a bad magic, or anything other than little-endian ELF64.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        ensure_len(data, Self::SIZE)?;
        if data[..ELF_MAGIC.len()] != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        match (data[EI_CLASS], data[EI_DATA]) {
            (ELFCLASS64, ELFDATA2LSB) => {}
            (ELFCLASS64, encoding) => return Err(ElfError::UnsupportedEncoding(encoding)),
            (class, _) => return Err(ElfError::UnsupportedClass(class)),
        }

        Ok(Self {
            e_type: ElfType::from(le_u16(data, 16)),
            e_phoff: le_u64(data, 32),
            e_shoff: le_u64(data, 40),
            e_phentsize: le_u16(data, 54),
            e_phnum: le_u16(data, 56),
            e_shentsize: le_u16(data, 58),
            e_shnum: le_u16(data, 60),
        })
    }

    /// Symbol values are absolute addresses.
    pub fn is_executable(&self) -> bool {
        self.e_type == ElfType::Exec
    }

    /// Symbol values are relative to the load bias.
    pub fn is_relocated(&self) -> bool {
        self.e_type == ElfType::Dyn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_object_header() -> [u8; 64] {
        let mut raw = [0u8; 64];
        raw[..4].copy_from_slice(&ELF_MAGIC);
        raw[EI_CLASS] = ELFCLASS64;
        raw[EI_DATA] = ELFDATA2LSB;
        raw[16] = 3;
        raw[32..40].copy_from_slice(&0x40u64.to_le_bytes());
        raw[40..48].copy_from_slice(&0x3000u64.to_le_bytes());
        raw[54] = 56;
        raw[56] = 2;
        raw[58] = 64;
        raw[60] = 7;
        raw
    }

    #[test]
    fn shared_object_tables_are_located() {
        let header = Elf64Header::parse(&shared_object_header()).unwrap();
        assert!(header.is_relocated());
        assert!(!header.is_executable());
        assert_eq!((header.e_phoff, header.e_phentsize, header.e_phnum), (0x40, 56, 2));
        assert_eq!((header.e_shoff, header.e_shentsize, header.e_shnum), (0x3000, 64, 7));
    }

    #[test]
    fn fixed_address_executable() {
        let mut raw = shared_object_header();
        raw[16] = 2;
        let header = Elf64Header::parse(&raw).unwrap();
        assert!(header.is_executable());
        assert!(!header.is_relocated());
    }

    #[test]
    fn rejects_non_elf64_le() {
        let mut raw = shared_object_header();
        raw[1] = b'X';
        assert_eq!(Elf64Header::parse(&raw), Err(ElfError::InvalidMagic));

        let mut raw = shared_object_header();
        raw[EI_CLASS] = 1;
        assert_eq!(Elf64Header::parse(&raw), Err(ElfError::UnsupportedClass(1)));

        let mut raw = shared_object_header();
        raw[EI_DATA] = 2;
        assert_eq!(Elf64Header::parse(&raw), Err(ElfError::UnsupportedEncoding(2)));
    }

    #[test]
    fn short_input() {
        assert_eq!(
            Elf64Header::parse(&[0x7f, b'E', b'L', b'F']),
            Err(ElfError::BufferTooSmall {
                needed: 64,
                available: 4
            })
        );
    }

    #[test]
    fn core_files_are_other() {
        assert_eq!(ElfType::from(4), ElfType::Other(4));
    }
}
