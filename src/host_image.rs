//! Locating the end of the host executable's own image and classifying
//! whatever has been appended past it.

use std::{fs::File, path::Path};

use goblin::Object;
use memmap2::Mmap;

use crate::{errors::ImageError, format::SIGNATURE};

/// What the bytes past the image turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailKind {
    /// Starts with the archive signature.
    Bundle,
    /// Anything else: treated as one anonymous script chunk.
    Chunk,
}

/// Appended data found past the executable image.
#[derive(Debug, Clone, Copy)]
pub struct HostTail {
    pub offset: u64,
    pub len: u64,
    pub kind: TailKind,
}

/// First file offset past every byte the executable image itself owns.
///
/// For PE this is the furthest section's raw data end, as the original host
/// computed it. ELF images additionally account for the header tables and
/// segment file extents, since toolchains place the section-header table
/// last.
pub fn image_end(data: &[u8]) -> Result<u64, ImageError> {
    match Object::parse(data)? {
        Object::Elf(elf) => {
            let header = &elf.header;
            let mut end =
                header.e_shoff + u64::from(header.e_shentsize) * u64::from(header.e_shnum);
            end = end.max(
                header.e_phoff + u64::from(header.e_phentsize) * u64::from(header.e_phnum),
            );
            for section in &elf.section_headers {
                if section.sh_type != goblin::elf::section_header::SHT_NOBITS {
                    end = end.max(section.sh_offset + section.sh_size);
                }
            }
            for segment in &elf.program_headers {
                end = end.max(segment.p_offset + segment.p_filesz);
            }
            Ok(end)
        }
        Object::PE(pe) => {
            let mut end = 0u64;
            for section in &pe.sections {
                end = end
                    .max(u64::from(section.pointer_to_raw_data) + u64::from(section.size_of_raw_data));
            }
            Ok(end)
        }
        _ => Err(ImageError::UnsupportedImage),
    }
}

/// Probe `path` for appended data past its executable image.
pub fn find_tail(path: &Path) -> Result<Option<HostTail>, ImageError> {
    let file = File::open(path)?;
    let map = unsafe { Mmap::map(&file)? };
    let file_len = map.len() as u64;
    let end = image_end(&map)?;
    if file_len <= end {
        return Ok(None);
    }
    let tail = &map[end as usize..];
    let kind = if tail.len() >= SIGNATURE.len() && tail[..SIGNATURE.len()] == SIGNATURE {
        TailKind::Bundle
    } else {
        TailKind::Chunk
    };
    Ok(Some(HostTail {
        offset: end,
        len: file_len - end,
        kind,
    }))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    /// The running test binary, cut down to exactly its own image.
    fn bare_image() -> Vec<u8> {
        let exe = std::env::current_exe().unwrap();
        let data = std::fs::read(&exe).unwrap();
        let end = image_end(&data).unwrap() as usize;
        assert!(end <= data.len());
        data[..end].to_vec()
    }

    fn write_temp(bytes: &[u8]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host");
        let mut f = File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        (dir, path)
    }

    #[test]
    fn a_bare_image_has_no_tail() {
        let image = bare_image();
        let (_dir, path) = write_temp(&image);
        assert!(find_tail(&path).unwrap().is_none());
    }

    #[test]
    fn appended_signature_classifies_as_bundle() {
        let mut bytes = bare_image();
        let end = bytes.len() as u64;
        bytes.extend_from_slice(&SIGNATURE);
        bytes.extend_from_slice(&[0u8; 8]);
        let (_dir, path) = write_temp(&bytes);
        let tail = find_tail(&path).unwrap().unwrap();
        assert_eq!(tail.kind, TailKind::Bundle);
        assert_eq!(tail.offset, end);
        assert_eq!(tail.len, 72);
    }

    #[test]
    fn appended_source_classifies_as_chunk() {
        let mut bytes = bare_image();
        bytes.extend_from_slice(b"print('hi')\n");
        let (_dir, path) = write_temp(&bytes);
        let tail = find_tail(&path).unwrap().unwrap();
        assert_eq!(tail.kind, TailKind::Chunk);
        assert_eq!(tail.len, 12);
    }
}
