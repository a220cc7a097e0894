//! Container handles: parsing an appended archive, authoring a new one in
//! memory, and the section-level read/write operations behind the
//! script-facing API.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
};

use byteorder::{ReadBytesExt, LE};

use crate::{
    errors::ContainerError,
    format::{
        self, Characteristics, ConfigFlags, CoreHeader, SectionHeader, SECTION_HEADER_LEN,
        SIGNATURE,
    },
};

type Result<T> = std::result::Result<T, ContainerError>;

/// Storage behind one section of an in-memory handle.
#[derive(Debug, Default)]
pub enum SectionSource {
    /// Nothing assigned yet; contributes zero bytes on save.
    #[default]
    None,
    /// An owned, zero-initialized buffer created by `alloc`.
    Buffer(Vec<u8>),
    /// A file on disk referenced by `setfile`; streamed on save.
    FileRef(PathBuf),
}

#[derive(Debug)]
enum Backing {
    /// Parsed from an existing archive; payload reads go through the file.
    File { file: File, writable: bool },
    /// Authored in memory; every section carries its own source.
    Memory { sources: Vec<SectionSource> },
}

/// Data-type tags used by the typed read/write calls.
#[derive(Debug, Clone, Copy)]
pub enum DataType {
    /// Tag 1: raw byte string of a caller-chosen length.
    Bytes { len: u32 },
    /// Tag 2: little-endian f64.
    Number,
    /// Tag 3: little-endian i32.
    Int,
}

impl DataType {
    pub fn from_tag(tag: u8, len: Option<u32>) -> Result<Self> {
        match tag {
            1 => Ok(DataType::Bytes {
                len: len.unwrap_or(0),
            }),
            2 => Ok(DataType::Number),
            3 => Ok(DataType::Int),
            other => Err(ContainerError::BadDataType(other)),
        }
    }

    fn width(&self) -> u32 {
        match self {
            DataType::Bytes { len } => *len,
            DataType::Number => 8,
            DataType::Int => 4,
        }
    }
}

/// One value moved through a typed read or write.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Bytes(Vec<u8>),
    Number(f64),
    Int(i32),
}

impl Item {
    fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Item::Bytes(b) => b.clone(),
            Item::Number(n) => n.to_le_bytes().to_vec(),
            Item::Int(i) => i.to_le_bytes().to_vec(),
        }
    }
}

/// An open archive, file-backed or in-memory.
#[derive(Debug)]
pub struct Container {
    backing: Backing,
    config: [u8; 4],
    sections: Vec<SectionHeader>,
    /// Absolute payload offsets, one per section plus the end-of-archive
    /// offset bounding the last payload.
    offsets: Vec<u64>,
    cursors: Vec<u32>,
    base: u64,
}

impl Container {
    /// Parse an archive that begins at `base` within `file`.
    pub fn parse(file: File, writable: bool, base: u64) -> Result<Self> {
        let mut sig = [0u8; SIGNATURE.len()];
        file.read_exact_at(&mut sig, base)
            .map_err(|_| ContainerError::BadSignature)?;
        if sig != SIGNATURE {
            return Err(ContainerError::BadSignature);
        }

        let mut head = [0u8; format::CORE_HEADER_LEN as usize];
        file.read_exact_at(&mut head, base + format::SIGNATURE_LEN)?;
        let header = CoreHeader::parse(&head)?;

        let count = header.section_count as usize;
        let mut table = vec![0u8; count * SECTION_HEADER_LEN as usize];
        file.read_exact_at(&mut table, format::table_offset(base))?;

        let mut sections: Vec<SectionHeader> = Vec::with_capacity(count);
        let mut offsets = Vec::with_capacity(count + 1);
        let mut pos = format::payload_base(base, header.section_count);
        for index in 0..count {
            let entry = &table[index * 64..(index + 1) * 64];
            let mut section = SectionHeader::parse(index, entry)?;
            if section.characteristics.contains(Characteristics::ALIAS) && index > 0 {
                // alias entries borrow everything but the name from their
                // predecessor; an alias in the first slot is a plain entry
                section.size = sections[index - 1].size;
                section.characteristics = sections[index - 1].characteristics;
                offsets.push(offsets[index - 1]);
            } else {
                offsets.push(pos);
                pos += u64::from(section.size);
            }
            sections.push(section);
        }
        offsets.push(pos);

        let file_len = file.metadata()?.len();
        if pos > file_len {
            return Err(ContainerError::Truncated {
                expected: pos,
                actual: file_len,
            });
        }

        Ok(Container {
            backing: Backing::File { file, writable },
            config: header.config,
            sections,
            offsets,
            cursors: vec![0; count],
            base,
        })
    }

    /// Open an archive file, preferring read-write so header edits can land
    /// back on disk.
    pub fn open_path(path: &Path) -> Result<Self> {
        let (file, writable) = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => (file, true),
            Err(_) => (File::open(path)?, false),
        };
        Self::parse(file, writable, 0)
    }

    /// Fresh in-memory archive with `count` blank sections.
    pub fn new_in_memory(count: u32) -> Self {
        let n = count as usize;
        Container {
            backing: Backing::Memory {
                sources: std::iter::repeat_with(SectionSource::default).take(n).collect(),
            },
            config: [0; 4],
            sections: vec![SectionHeader::default(); n],
            offsets: vec![0; n + 1],
            cursors: vec![0; n],
            base: 0,
        }
    }

    pub fn section_count(&self) -> u32 {
        self.sections.len() as u32
    }

    pub fn sections(&self) -> &[SectionHeader] {
        &self.sections
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn cursor(&self, index: usize) -> u32 {
        self.cursors[index]
    }

    /// The config word as scripts see it: big-endian regardless of host order.
    pub fn config_word(&self) -> u32 {
        u32::from_be_bytes(self.config)
    }

    pub fn config_flags(&self) -> ConfigFlags {
        ConfigFlags::from_bits_retain(self.config[3])
    }

    /// First section with the given name.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.name == name)
    }

    /// First section with the given name carrying all of `flags`.
    pub fn find_with(&self, name: &str, flags: Characteristics) -> Option<usize> {
        self.sections
            .iter()
            .position(|s| s.name == name && s.characteristics.contains(flags))
    }

    /// Whole payload of section `index`.
    pub fn read_all(&self, index: usize) -> Result<Vec<u8>> {
        let size = self.sections[index].size;
        self.read_at(index, 0, size)
    }

    /// Bounded read of up to `len` bytes starting `pos` bytes into a section.
    /// Returns fewer bytes (possibly none) near the section end; never reads
    /// into the next section.
    fn read_at(&self, index: usize, pos: u32, len: u32) -> Result<Vec<u8>> {
        let size = self.sections[index].size;
        let avail = size.saturating_sub(pos).min(len);
        let mut out = vec![0u8; avail as usize];
        if avail == 0 {
            return Ok(out);
        }
        match &self.backing {
            Backing::File { file, .. } => {
                file.read_exact_at(&mut out, self.offsets[index] + u64::from(pos))?;
            }
            Backing::Memory { sources } => match &sources[index] {
                SectionSource::Buffer(buf) => {
                    let start = pos as usize;
                    out.copy_from_slice(&buf[start..start + avail as usize]);
                }
                SectionSource::FileRef(path) => {
                    File::open(path)?.read_exact_at(&mut out, u64::from(pos))?;
                }
                SectionSource::None => out.clear(),
            },
        }
        Ok(out)
    }

    /// Typed read at the section cursor. The cursor advances past every value
    /// actually produced; items that would cross the section end are dropped.
    pub fn read_values(&mut self, index: usize, dtype: DataType, count: u32) -> Result<Vec<Item>> {
        let width = dtype.width();
        let mut out = Vec::new();
        if width == 0 {
            return Ok(out);
        }
        for _ in 0..count {
            let cursor = self.cursors[index];
            if self.sections[index].size.saturating_sub(cursor) < width {
                break;
            }
            let raw = self.read_at(index, cursor, width)?;
            if raw.len() != width as usize {
                break;
            }
            out.push(match dtype {
                DataType::Bytes { .. } => Item::Bytes(raw),
                DataType::Number => Item::Number(raw.as_slice().read_f64::<LE>()?),
                DataType::Int => Item::Int(raw.as_slice().read_i32::<LE>()?),
            });
            self.cursors[index] = cursor + width;
        }
        Ok(out)
    }

    /// Typed write at the section cursor. The cursor stays put; callers
    /// position writes with [`Container::seek`]. Only in-memory handles have
    /// writable payloads.
    pub fn write_value(&mut self, index: usize, value: &Item) -> Result<()> {
        let bytes = value.to_le_bytes();
        let cursor = self.cursors[index];
        let avail = self.sections[index].size.saturating_sub(cursor) as usize;
        let len = bytes.len().min(avail);
        match &mut self.backing {
            Backing::File { .. } => Err(ContainerError::NotWritable { index }),
            Backing::Memory { .. } if len == 0 => Ok(()),
            Backing::Memory { sources } => match &mut sources[index] {
                SectionSource::Buffer(buf) => {
                    let start = cursor as usize;
                    buf[start..start + len].copy_from_slice(&bytes[..len]);
                    Ok(())
                }
                SectionSource::FileRef(path) => {
                    let file = OpenOptions::new().read(true).write(true).open(path)?;
                    file.write_all_at(&bytes[..len], u64::from(cursor))?;
                    Ok(())
                }
                SectionSource::None => Err(ContainerError::NotWritable { index }),
            },
        }
    }

    /// Move the section cursor, clamped into `[0, size]`.
    pub fn seek(&mut self, index: usize, pos: i64, absolute: bool) -> u32 {
        let size = i64::from(self.sections[index].size);
        let target = if absolute {
            pos
        } else {
            i64::from(self.cursors[index]) + pos
        };
        let clamped = target.clamp(0, size) as u32;
        self.cursors[index] = clamped;
        clamped
    }

    /// Rename section `index`, writing the header field back to disk for
    /// writable file-backed handles.
    pub fn rename(&mut self, index: usize, name: &str) -> Result<()> {
        let mut truncated = name.as_bytes();
        if truncated.len() > format::NAME_LEN - 1 {
            truncated = &truncated[..format::NAME_LEN - 1];
        }
        self.sections[index].name = String::from_utf8_lossy(truncated).into_owned();
        if let Backing::File { file, writable } = &self.backing {
            Self::require_writable(*writable)?;
            let mut field = [0u8; format::NAME_LEN];
            format::write_name(&self.sections[index].name, &mut field);
            file.write_all_at(&field, format::entry_offset(self.base, index))?;
        }
        Ok(())
    }

    /// Replace the config word (big-endian as exposed to scripts), writing
    /// through for writable file-backed handles.
    pub fn set_config_word(&mut self, value: u32) -> Result<()> {
        self.config = value.to_be_bytes();
        if let Backing::File { file, writable } = &self.backing {
            Self::require_writable(*writable)?;
            file.write_all_at(&self.config, format::config_offset(self.base))?;
        }
        Ok(())
    }

    /// Replace a section's characteristics byte, writing through for
    /// writable file-backed handles.
    pub fn set_characteristics(&mut self, index: usize, byte: u8) -> Result<()> {
        self.sections[index].characteristics = Characteristics::from_bits_retain(byte);
        if let Backing::File { file, writable } = &self.backing {
            Self::require_writable(*writable)?;
            let offset = format::entry_offset(self.base, index) + format::NAME_LEN as u64;
            file.write_all_at(&[byte], offset)?;
        }
        Ok(())
    }

    fn require_writable(writable: bool) -> Result<()> {
        if writable {
            Ok(())
        } else {
            Err(io::Error::from(io::ErrorKind::PermissionDenied).into())
        }
    }

    /// Give section `index` an owned zero-filled buffer of `size` bytes.
    /// Ignored on file-backed handles.
    pub fn alloc(&mut self, index: usize, size: u32) {
        match &mut self.backing {
            Backing::Memory { sources } => {
                sources[index] = SectionSource::Buffer(vec![0; size as usize]);
                self.sections[index].size = size;
                self.cursors[index] = 0;
            }
            Backing::File { .. } => log::debug!("alloc ignored on a file-backed handle"),
        }
    }

    /// Source section `index` from a file on disk; the section size follows
    /// the file's current length. Ignored on file-backed handles.
    pub fn set_file(&mut self, index: usize, path: &Path) -> Result<()> {
        match &mut self.backing {
            Backing::Memory { sources } => {
                let len = std::fs::metadata(path)?.len();
                self.sections[index].size = len as u32;
                sources[index] = SectionSource::FileRef(path.to_owned());
                self.cursors[index] = 0;
            }
            Backing::File { .. } => log::debug!("setfile ignored on a file-backed handle"),
        }
        Ok(())
    }

    /// Whether section `index` of an in-memory handle is file-sourced.
    /// File-backed handles report nothing.
    pub fn is_file_ref(&self, index: usize) -> Option<bool> {
        match &self.backing {
            Backing::Memory { sources } => {
                Some(matches!(sources[index], SectionSource::FileRef(_)))
            }
            Backing::File { .. } => None,
        }
    }

    /// Serialize an in-memory archive: signature, core header, section table,
    /// then payloads. Unassigned sections keep their header slot but emit no
    /// bytes. Ignored on file-backed handles.
    pub fn save(&self, path: &Path) -> Result<()> {
        let Backing::Memory { sources } = &self.backing else {
            log::debug!("savefile ignored on a file-backed handle");
            return Ok(());
        };
        let mut out = io::BufWriter::new(File::create(path)?);
        out.write_all(&SIGNATURE)?;

        let header = CoreHeader {
            section_count: self.section_count(),
            config: self.config,
        };
        let mut head = [0u8; format::CORE_HEADER_LEN as usize];
        header.write_into(&mut head)?;
        out.write_all(&head)?;

        let mut entry = [0u8; SECTION_HEADER_LEN as usize];
        for section in &self.sections {
            section.write_into(&mut entry)?;
            out.write_all(&entry)?;
        }

        for (index, source) in sources.iter().enumerate() {
            let size = u64::from(self.sections[index].size);
            match source {
                SectionSource::Buffer(buf) => out.write_all(buf)?,
                SectionSource::FileRef(ref_path) => {
                    let mut src = File::open(ref_path)?.take(size);
                    let copied = io::copy(&mut src, &mut out)?;
                    // the header size was fixed at setfile time; keep the
                    // payload that long even if the file shrank since
                    for _ in copied..size {
                        out.write_all(&[0])?;
                    }
                }
                SectionSource::None => {}
            }
        }
        out.flush()?;
        Ok(())
    }
}
