//! Code-object introspection.
//!
//! The module loader needs the exact byte length of an image, which the
//! image itself records:
//!
//! - ELF64: the section header table is the last thing in the file, so the
//!   length is `e_shoff + e_shnum * e_shentsize`.
//! - Offload bundle: a table of `{offset, size, triple}` entries; the length
//!   is the furthest entry end.
//!
//! Every field is checked against the bytes actually supplied. An extent
//! that does not fit, or a header that cannot be parsed, is an error rather
//! than a guess.

use crate::error::{HipwireError, Result};

/// ELF identification bytes.
pub const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// Offload bundle identification string.
pub const BUNDLE_MAGIC: &[u8; 24] = b"__CLANG_OFFLOAD_BUNDLE__";

/// Upper bound on bundle entries.
pub const MAX_BUNDLE_ENTRIES: u64 = 64;

const ELF64_HEADER_SIZE: usize = 64;
const ELFCLASS64: u8 = 2;
const BUNDLE_HEADER_SIZE: usize = 32;

/// Container format of a code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Elf,
    OffloadBundle,
}

/// Determine the format and byte length of `image`.
///
/// The returned extent is never larger than `image.len()`; bytes past it are
/// not part of the code object.
pub fn image_extent(image: &[u8]) -> Result<(ImageKind, usize)> {
    if image.starts_with(ELF_MAGIC) {
        elf_extent(image).map(|n| (ImageKind::Elf, n))
    } else if image.starts_with(BUNDLE_MAGIC) {
        bundle_extent(image).map(|n| (ImageKind::OffloadBundle, n))
    } else {
        Err(invalid("unrecognized code object magic".to_string()))
    }
}

fn invalid(msg: String) -> HipwireError {
    HipwireError::Validation(msg)
}

fn u16_at(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn u64_at(buf: &[u8], at: usize) -> Option<u64> {
    let b = buf.get(at..at + 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(b);
    Some(u64::from_le_bytes(raw))
}

fn elf_extent(image: &[u8]) -> Result<usize> {
    if image.len() < ELF64_HEADER_SIZE {
        return Err(invalid(format!(
            "ELF image of {} bytes is smaller than its header",
            image.len()
        )));
    }
    if image[4] != ELFCLASS64 {
        return Err(invalid("only 64-bit ELF code objects are accepted".into()));
    }

    let short = || invalid("truncated ELF header".to_string());
    let shoff = u64_at(image, 40).ok_or_else(short)?;
    let shentsize = u16_at(image, 58).ok_or_else(short)? as u64;
    let shnum = u16_at(image, 60).ok_or_else(short)? as u64;
    if shoff == 0 || shnum == 0 {
        return Err(invalid("ELF image has no section header table".into()));
    }

    let extent = shnum
        .checked_mul(shentsize)
        .and_then(|table| table.checked_add(shoff))
        .ok_or_else(|| invalid("ELF section table overflows".into()))?;
    fit(extent, ELF64_HEADER_SIZE, image.len())
}

fn bundle_extent(image: &[u8]) -> Result<usize> {
    let count = u64_at(image, BUNDLE_MAGIC.len())
        .ok_or_else(|| invalid("truncated bundle header".to_string()))?;
    if count == 0 || count > MAX_BUNDLE_ENTRIES {
        return Err(invalid(format!("implausible bundle entry count {}", count)));
    }

    let mut cursor = BUNDLE_HEADER_SIZE;
    let mut extent = 0u64;
    for index in 0..count {
        let short = || invalid(format!("bundle entry {} is truncated", index));
        let offset = u64_at(image, cursor).ok_or_else(short)?;
        let size = u64_at(image, cursor + 8).ok_or_else(short)?;
        let triple_len = u64_at(image, cursor + 16).ok_or_else(short)?;
        let triple_end = (cursor as u64 + 24)
            .checked_add(triple_len)
            .filter(|&end| end <= image.len() as u64)
            .ok_or_else(short)?;
        cursor = triple_end as usize;

        let end = offset
            .checked_add(size)
            .ok_or_else(|| invalid(format!("bundle entry {} overflows", index)))?;
        extent = extent.max(end);
    }

    fit(extent.max(cursor as u64), BUNDLE_HEADER_SIZE, image.len())
}

/// Accept `extent` only if it covers the header and lies inside the buffer.
fn fit(extent: u64, header: usize, available: usize) -> Result<usize> {
    if extent < header as u64 {
        return Err(invalid(format!(
            "code object extent {} is smaller than its header",
            extent
        )));
    }
    if extent > available as u64 {
        return Err(invalid(format!(
            "code object extent {} exceeds the {} bytes supplied",
            extent, available
        )));
    }
    Ok(extent as usize)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal ELF64 image: header, `shnum` zeroed section headers at 64.
    pub(crate) fn elf_image(shnum: u16, trailing: usize) -> Vec<u8> {
        let mut image = vec![0u8; ELF64_HEADER_SIZE + shnum as usize * 64 + trailing];
        image[..4].copy_from_slice(ELF_MAGIC);
        image[4] = ELFCLASS64;
        image[5] = 1;
        image[40..48].copy_from_slice(&64u64.to_le_bytes());
        image[58..60].copy_from_slice(&64u16.to_le_bytes());
        image[60..62].copy_from_slice(&shnum.to_le_bytes());
        image
    }

    fn bundle_image(entries: &[(u64, u64, &str)], total: usize) -> Vec<u8> {
        let mut image = Vec::new();
        image.extend_from_slice(BUNDLE_MAGIC);
        image.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        for (offset, size, triple) in entries {
            image.extend_from_slice(&offset.to_le_bytes());
            image.extend_from_slice(&size.to_le_bytes());
            image.extend_from_slice(&(triple.len() as u64).to_le_bytes());
            image.extend_from_slice(triple.as_bytes());
        }
        image.resize(total.max(image.len()), 0);
        image
    }

    #[test]
    fn test_elf_extent_ignores_trailing_bytes() {
        let image = elf_image(2, 100);
        assert_eq!(image_extent(&image).unwrap(), (ImageKind::Elf, 64 + 128));
    }

    #[test]
    fn test_elf_section_table_outside_buffer() {
        let mut image = elf_image(2, 0);
        image[60..62].copy_from_slice(&3u16.to_le_bytes());
        assert!(image_extent(&image).is_err());
    }

    #[test]
    fn test_elf_shorter_than_header() {
        let image = elf_image(1, 0);
        assert!(image_extent(&image[..40]).is_err());
    }

    #[test]
    fn test_elf_without_sections_rejected() {
        let mut image = elf_image(1, 0);
        image[60..62].copy_from_slice(&0u16.to_le_bytes());
        assert!(image_extent(&image).is_err());
    }

    #[test]
    fn test_elf_overflowing_offset_rejected() {
        let mut image = elf_image(1, 0);
        image[40..48].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(image_extent(&image).is_err());
    }

    #[test]
    fn test_bundle_extent_is_furthest_entry() {
        let image = bundle_image(
            &[
                (200, 50, "host-x86_64-unknown-linux-gnu"),
                (300, 100, "hipv4-amdgcn-amd-amdhsa--gfx90a"),
            ],
            512,
        );
        assert_eq!(
            image_extent(&image).unwrap(),
            (ImageKind::OffloadBundle, 400)
        );
    }

    #[test]
    fn test_bundle_entry_beyond_buffer() {
        let image = bundle_image(&[(200, 400, "hipv4-amdgcn-amd-amdhsa--gfx90a")], 512);
        assert!(image_extent(&image).is_err());
    }

    #[test]
    fn test_bundle_entry_count_bounded() {
        let mut image = bundle_image(&[(100, 10, "t")], 256);
        image[24..32].copy_from_slice(&(MAX_BUNDLE_ENTRIES + 1).to_le_bytes());
        assert!(image_extent(&image).is_err());
    }

    #[test]
    fn test_bundle_truncated_triple() {
        let mut image = bundle_image(&[(100, 10, "t")], 0);
        // declare a triple longer than the image
        image[48..56].copy_from_slice(&1000u64.to_le_bytes());
        assert!(image_extent(&image).is_err());
    }

    #[test]
    fn test_unknown_magic() {
        assert!(image_extent(b"not a code object at all").is_err());
        assert!(image_extent(b"").is_err());
    }
}
