//! On-disk layout of the appended bundle archive.
//!
//! An archive is a 64-byte signature, an 8-byte core header, a table of
//! 64-byte section headers, and the section payloads concatenated in table
//! order with no padding. All multi-byte integers are little-endian.

use scroll::{Pread, Pwrite, LE};

use crate::errors::ContainerError;

/// Magic preamble identifying an appended archive.
pub const SIGNATURE: [u8; 64] = [
    0xAB, 0x41, 0x6C, 0x69, 0x00, 0x00, 0x00, 0x00, //
    0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x62, 0x38, 0x71, 0xA0, 0xEE, 0x66, 0xD4, 0x47, //
    0x81, 0x4F, 0xA5, 0x00, 0xAA, 0xFE, 0x74, 0x0B, //
    0x71, 0xCC, 0x8F, 0x4F, 0xDB, 0xB0, 0x0F, 0x40, //
    0xA2, 0x1B, 0x0E, 0x5C, 0x00, 0xB2, 0x39, 0xA4, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
];

pub const SIGNATURE_LEN: u64 = SIGNATURE.len() as u64;
pub const CORE_HEADER_LEN: u64 = 8;
pub const SECTION_HEADER_LEN: u64 = 64;

/// Width of the name field; the final byte is reserved as a terminator.
pub const NAME_LEN: usize = 59;

bitflags::bitflags! {
    /// Per-section flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Characteristics: u8 {
        /// Execute at startup, in section-index order.
        const AUTO = 0x01;
        /// Payload is a script chunk.
        const SCRIPT = 0x02;
        /// Payload is a shared-library image, loaded in memory.
        const NATIVE = 0x04;
        /// Payload may be demanded by another native section's import table.
        const MEM_DEP = 0x08;
        /// Entry borrows offset/size/characteristics from its predecessor.
        const ALIAS = 0x10;
    }
}

bitflags::bitflags! {
    /// Feature flags carried in byte 3 of the core-header config word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ConfigFlags: u8 {
        const RUN_AUTOS = 0x01;
        const AUTHORING_API = 0x02;
        const BIT_LIB = 0x04;
        const CUSTOM_REQUIRE = 0x08;
    }
}

/// The fixed header following the signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreHeader {
    pub section_count: u32,
    pub config: [u8; 4],
}

impl CoreHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, ContainerError> {
        let mut offset = 0;
        let section_count = buf.gread_with::<u32>(&mut offset, LE)?;
        let mut config = [0u8; 4];
        config.copy_from_slice(&buf[offset..offset + 4]);
        Ok(CoreHeader {
            section_count,
            config,
        })
    }

    pub fn write_into(&self, buf: &mut [u8]) -> Result<(), ContainerError> {
        let mut offset = 0;
        buf.gwrite_with::<u32>(self.section_count, &mut offset, LE)?;
        buf[offset..offset + 4].copy_from_slice(&self.config);
        Ok(())
    }
}

/// One section-table entry, with the name already validated and unpacked.
#[derive(Debug, Clone, Default)]
pub struct SectionHeader {
    pub name: String,
    pub characteristics: Characteristics,
    pub size: u32,
}

impl SectionHeader {
    /// Decode a 64-byte table entry. Names must be printable ASCII up to the
    /// first NUL; anything else fails the whole parse.
    pub fn parse(index: usize, entry: &[u8]) -> Result<Self, ContainerError> {
        let name = parse_name(index, &entry[..NAME_LEN])?;
        let characteristics = Characteristics::from_bits_retain(entry[NAME_LEN]);
        let size = entry.pread_with::<u32>(NAME_LEN + 1, LE)?;
        Ok(SectionHeader {
            name,
            characteristics,
            size,
        })
    }

    pub fn write_into(&self, entry: &mut [u8]) -> Result<(), ContainerError> {
        write_name(&self.name, &mut entry[..NAME_LEN]);
        entry[NAME_LEN] = self.characteristics.bits();
        entry.pwrite_with::<u32>(self.size, NAME_LEN + 1, LE)?;
        Ok(())
    }
}

fn parse_name(index: usize, field: &[u8]) -> Result<String, ContainerError> {
    // the last byte acts as an unconditional terminator
    let field = &field[..NAME_LEN - 1];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let name = &field[..end];
    if !name.iter().all(|&b| (0x20..0x7f).contains(&b)) {
        return Err(ContainerError::BadName { index });
    }
    Ok(String::from_utf8_lossy(name).into_owned())
}

/// NUL-pad `name` into a 59-byte field, truncating past the writable width.
pub fn write_name(name: &str, field: &mut [u8]) {
    field.fill(0);
    let bytes = name.as_bytes();
    let len = bytes.len().min(NAME_LEN - 1);
    field[..len].copy_from_slice(&bytes[..len]);
}

/// File offset of the section-header table.
pub fn table_offset(base: u64) -> u64 {
    base + SIGNATURE_LEN + CORE_HEADER_LEN
}

/// File offset of table entry `index`.
pub fn entry_offset(base: u64, index: usize) -> u64 {
    table_offset(base) + index as u64 * SECTION_HEADER_LEN
}

/// File offset of the first payload byte.
pub fn payload_base(base: u64, section_count: u32) -> u64 {
    entry_offset(base, section_count as usize)
}

/// File offset of the config word within the core header.
pub fn config_offset(base: u64) -> u64 {
    base + SIGNATURE_LEN + 4
}
