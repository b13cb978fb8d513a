//! Header facts: magic classification, sprite path, project-root marker,
//! and the page string sweep.
//!
//! The header occupies `[0, header_end)` where `header_end` is the marker
//! offset of the first accepted container. Everything in it is decoded
//! best-effort; a header that matches nothing still parses.
use log::debug;
use serde::Serialize;

use crate::error::{warn, Warning, WarningKind};
use crate::{scan, ByteRange};

pub const MAGIC_STANDARD: [u8; 4] = [0x00, 0x00, 0x10, 0x40];
/// Seen in a handful of files; uses a different layout this parser only
/// flags.
pub const MAGIC_ALTERNATE: [u8; 4] = [0x7B, 0x14, 0x0E, 0x40];

/// `01 00 00 00 01 00 00 00` before the "Container" string: the phantom
/// project root that corresponds to container id 1.
const PROJECT_ROOT_MARKER: [u8; 8] = [0x01, 0, 0, 0, 0x01, 0, 0, 0];
const PROJECT_ROOT_NAME: &[u8] = b"Container";

const SPRITE_SUFFIX: &str = ".bspr";
/// Sanity bound for the sprite path's u32 length prefix.
const MAX_SPRITE_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MagicVariant {
    Standard,
    Alternate,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpritePath {
    pub path: String,
    /// Marker through the last string byte.
    pub range: ByteRange,
}

/// A Pascal string from the header's page data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageString {
    pub text: String,
    /// Length byte through the last string byte.
    pub range: ByteRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Header {
    pub magic: [u8; 4],
    pub variant: MagicVariant,
    pub sprite: Option<SpritePath>,
    /// Footprint of the project-root marker and its "Container" string.
    /// When present, container id 1 exists logically even if no `03` block
    /// was scanned for it.
    pub project_root: Option<ByteRange>,
    /// Page/manifest strings in file order.
    pub pages: Vec<PageString>,
    /// Start of the first container block; the header is `[0, header_end)`.
    pub header_end: usize,
}

impl Header {
    pub fn range(&self) -> ByteRange {
        ByteRange::new(0, self.header_end)
    }
}

/// Decodes the header region. `header_end` comes from the container
/// scanner; when no container was found it equals the register start.
pub(crate) fn parse(data: &[u8], header_end: usize, warnings: &mut Vec<Warning>) -> Header {
    let magic = [data[0], data[1], data[2], data[3]];
    let variant = if magic == MAGIC_STANDARD {
        MagicVariant::Standard
    } else if magic == MAGIC_ALTERNATE {
        MagicVariant::Alternate
    } else {
        MagicVariant::Unknown
    };
    if variant != MagicVariant::Standard {
        warn(
            warnings,
            WarningKind::MagicVariant,
            0,
            format!(
                "non-standard magic {magic:02X?} ({variant:?}), parsing best-effort"
            ),
        );
    }

    let sprite = decode_sprite(data, header_end);
    if sprite.is_none() {
        warn(
            warnings,
            WarningKind::SpriteAbsent,
            4,
            "no sprite path block at the start of the header".to_owned(),
        );
    }

    let project_root = find_project_root(data, header_end);
    debug!("project root marker: {project_root:?}");

    // The page sweep covers whatever header bytes the structured blocks
    // above did not claim.
    let pages_from = [
        sprite.as_ref().map(|s| s.range.end),
        project_root.map(|r| r.end),
        Some(4),
    ]
    .into_iter()
    .flatten()
    .max()
    .unwrap_or(4);
    let pages = sweep_pages(data, pages_from, header_end);

    Header {
        magic,
        variant,
        sprite,
        project_root,
        pages,
        header_end,
    }
}

/// `01 00 00 00`, u32 length, then an ASCII path ending in `.bspr`.
fn decode_sprite(data: &[u8], header_end: usize) -> Option<SpritePath> {
    if scan::u32_at(data, 4)? != 1 {
        return None;
    }
    let len = scan::u32_at(data, 8)? as usize;
    if len == 0 || len > MAX_SPRITE_LEN {
        return None;
    }
    let start: usize = 12;
    let end = start.checked_add(len)?;
    if end > header_end {
        return None;
    }
    let bytes = &data[start..end];
    if !scan::is_printable(bytes) {
        return None;
    }
    let path = std::str::from_utf8(bytes).ok()?.to_owned();
    if !path.to_ascii_lowercase().ends_with(SPRITE_SUFFIX) {
        return None;
    }
    Some(SpritePath {
        path,
        range: ByteRange::new(4, end),
    })
}

/// Searches `[4, header_end)` for the double-`01` marker followed by a
/// length-prefixed "Container". The length prefix is a u8 in most files but
/// a u32 in some, so both are tried.
fn find_project_root(data: &[u8], header_end: usize) -> Option<ByteRange> {
    let name_len = PROJECT_ROOT_NAME.len();
    let mut pos = 4;
    while let Some(marker) = scan::find(data, pos, header_end, &PROJECT_ROOT_MARKER) {
        let after = marker + PROJECT_ROOT_MARKER.len();

        // u8 length prefix.
        if data.get(after) == Some(&(name_len as u8))
            && data.get(after + 1..after + 1 + name_len) == Some(PROJECT_ROOT_NAME)
        {
            return Some(ByteRange::new(marker, after + 1 + name_len));
        }
        // u32 length prefix.
        if scan::u32_at(data, after) == Some(name_len as u32)
            && data.get(after + 4..after + 4 + name_len) == Some(PROJECT_ROOT_NAME)
        {
            return Some(ByteRange::new(marker, after + 4 + name_len));
        }

        pos = marker + 4;
    }
    None
}

/// Collects Pascal strings from the remaining header bytes, skipping
/// non-printable runs one byte at a time.
fn sweep_pages(data: &[u8], start: usize, header_end: usize) -> Vec<PageString> {
    let mut pages = Vec::new();
    let mut pos = start;
    while pos < header_end.min(data.len()) {
        match scan::pascal_string(data, pos, header_end) {
            Some((text, next)) => {
                pages.push(PageString {
                    text,
                    range: ByteRange::new(pos, next),
                });
                pos = next;
            }
            None => pos += 1,
        }
    }
    pages
}
