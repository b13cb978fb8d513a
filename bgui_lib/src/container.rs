//! UI element blocks recovered by scanning the container region.
//!
//! Container blocks have no table of contents. The scanner searches
//! `[0, register_start)` for the `03`/`04` marker sequences, validates each
//! candidate against the surrounding bytes and the register id set, and
//! decodes the block layout:
//!
//! | Offset | Bytes | Field |
//! | --- | --- | --- |
//! | marker+0 | 4 | marker (`03 00 00 00` or `04 00 00 00`) |
//! | marker+4 | 1 | name length `N` |
//! | marker+5 | N | ASCII name (empty for the manifest) |
//! | marker+5+N | 4 | hash/pad between name and id |
//! | body+0 | 4 | id |
//! | body+4 | 12 | x, y, size as f32 |
//! | body+16 | 4 | unk1 |
//! | body+20 | 44 | reserved |
//! | body+64 | | resource property (`BD` tag), if present |
//!
//! The trailing RGB color has no fixed offset and is found by a backward
//! search for the `1.0f` anchor.
use std::io::Cursor;

use binrw::{BinRead, BinReaderExt};
use indexmap::IndexSet;
use log::{debug, trace};
use serde::Serialize;

use crate::error::{warn, Warning, WarningKind};
use crate::register::Register;
use crate::{scan, ByteRange};

pub(crate) const MARKER_STANDARD: [u8; 4] = [0x03, 0, 0, 0];
pub(crate) const MARKER_TEXT: [u8; 4] = [0x04, 0, 0, 0];
/// `BD 00 00 00`: nominally the u32 length 189 of the resource property,
/// but treated as a tag since real lengths vary.
const RESOURCE_TAG: [u8; 4] = [0xBD, 0, 0, 0];
const RESOURCE_FLAGS: [u8; 5] = [0x00, 0x01, 0x00, 0x00, 0x00];
/// IEEE-754 `1.0f` little-endian; the three bytes before the last
/// occurrence in a block are the RGB color.
const COLOR_ANCHOR: [u8; 4] = [0x00, 0x00, 0x80, 0x3F];

const MAX_NAME_LEN: usize = 64;
/// Ids above this are scan noise, not containers.
const MAX_PLAUSIBLE_ID: u32 = 100_000;
/// Manifest string counts above this are garbage reads.
const MAX_MANIFEST_KEYS: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MarkerKind {
    /// `03 00 00 00`: image or group block.
    Standard,
    /// `04 00 00 00`: text block. Same body layout as [Standard].
    Text,
}

/// A decoded UI element block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Container {
    pub kind: MarkerKind,
    /// ASCII name; empty for the id 0 manifest.
    pub name: String,
    pub id: u32,
    /// The 4 bytes between name and id. Sometimes zero, sometimes looks
    /// like a hash. Preserved but not interpreted.
    pub name_hash: u32,
    pub x: f32,
    pub y: f32,
    pub size: f32,
    // TODO: packed RGBA color?
    pub unk1: u32,
    /// The 44 bytes at body+20, preserved verbatim. Zero-filled when the
    /// container region ends before the block does.
    #[serde(serialize_with = "serialize_reserved")]
    pub reserved: [u8; 44],
    pub resource: Option<Resource>,
    pub color: Option<Color>,
    /// Manifest string table; empty for everything but the id 0 manifest.
    pub keys: Vec<ManifestKey>,
    pub marker_offset: usize,
    /// Offset of the id field.
    pub body_offset: usize,
    /// Marker offset of the next accepted container, or the register start
    /// for the last one.
    pub block_end: usize,
}

impl Container {
    /// Marker, name length, name, and hash/pad bytes.
    pub fn header_range(&self) -> ByteRange {
        ByteRange::new(self.marker_offset, self.body_offset)
    }

    /// Id through the end of the reserved block, clipped to the block.
    pub fn body_range(&self) -> ByteRange {
        ByteRange::new(self.body_offset, (self.body_offset + 64).min(self.block_end))
    }

    pub fn reserved_range(&self) -> ByteRange {
        ByteRange::new(
            (self.body_offset + 20).min(self.block_end),
            (self.body_offset + 64).min(self.block_end),
        )
    }

    /// The whole block: marker through `block_end`.
    pub fn range(&self) -> ByteRange {
        ByteRange::new(self.marker_offset, self.block_end)
    }

    pub fn is_manifest(&self) -> bool {
        self.name.is_empty() && self.id == 0
    }
}

/// A `BD`-tagged resource property carrying a texture or font path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    /// E.g. `display_camaro_gt4r.dds` or `gui\font_display_generic_arial.bfont`.
    pub path: String,
    /// The 5 flag bytes between the tag and the length byte.
    pub flags: [u8; 5],
    /// Inner length byte as written in the file. Differs from `path.len()`
    /// only when the string was clipped by the end of the block.
    pub declared_len: u8,
    pub truncated: bool,
    /// Tag through the last stored string byte.
    pub property_range: ByteRange,
    /// Just the string bytes.
    pub string_range: ByteRange,
}

/// RGB triple read backwards from a `1.0f` anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// The three RGB bytes; ends where the anchor begins.
    pub range: ByteRange,
}

/// One entry of the manifest string table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestKey {
    pub text: String,
    /// Length byte through the last string byte.
    pub range: ByteRange,
}

/// Serde stops at 32-element arrays, so the reserved block serializes
/// through a seq.
fn serialize_reserved<S: serde::Serializer>(
    bytes: &[u8; 44],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(bytes)
}

/// Fixed-layout fields at the body offset.
#[derive(BinRead)]
struct RawBody {
    id: u32,
    x: f32,
    y: f32,
    size: f32,
    unk1: u32,
    reserved: [u8; 44],
}

/// A marker that passed validation but has not been bounded yet.
struct Candidate {
    kind: MarkerKind,
    marker_offset: usize,
    body_offset: usize,
    name: String,
    id: u32,
}

/// Scans `[0, register_start)` for container blocks. Containers are emitted
/// in file order; each block ends where the next accepted marker begins.
pub(crate) fn scan(
    data: &[u8],
    register: &Register,
    warnings: &mut Vec<Warning>,
) -> Vec<Container> {
    let region_end = register.start;
    let ids = register.ids();

    let mut candidates = Vec::new();
    let mut pos = 0;
    while let Some(marker) = next_marker(data, pos, region_end) {
        pos = marker + 4;
        match validate(data, marker, region_end, &ids) {
            Some(candidate) => candidates.push(candidate),
            None => trace!("rejected marker candidate at {marker:#x}"),
        }
    }
    if candidates.is_empty() {
        log::warn!("no container blocks found in [0, {region_end:#x})");
    }
    debug!("{} container blocks accepted", candidates.len());

    let block_ends: Vec<usize> = candidates
        .iter()
        .skip(1)
        .map(|c| c.marker_offset)
        .chain([region_end])
        .collect();
    candidates
        .into_iter()
        .zip(block_ends)
        .map(|(candidate, block_end)| decode(data, candidate, block_end, region_end, warnings))
        .collect()
}

/// Earliest `03`/`04` marker at or after `pos`.
fn next_marker(data: &[u8], pos: usize, region_end: usize) -> Option<usize> {
    let standard = scan::find(data, pos, region_end, &MARKER_STANDARD);
    let text = scan::find(data, pos, region_end, &MARKER_TEXT);
    match (standard, text) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Candidate validation. Markers also occur inside the header's phantom
/// region and inside resource padding, so every hit is tested against the
/// name bytes and the register id set before acceptance.
fn validate(
    data: &[u8],
    marker_offset: usize,
    region_end: usize,
    register_ids: &IndexSet<u32>,
) -> Option<Candidate> {
    if marker_offset + 9 > region_end {
        return None;
    }
    let kind = match data[marker_offset] {
        0x03 => MarkerKind::Standard,
        _ => MarkerKind::Text,
    };

    let name_len = data[marker_offset + 4] as usize;
    if name_len > MAX_NAME_LEN {
        return None;
    }
    let name_bytes = data.get(marker_offset + 5..marker_offset + 5 + name_len)?;
    if !scan::is_printable(name_bytes) {
        return None;
    }

    let body_offset = marker_offset + 4 + 1 + name_len + 4;
    if body_offset + 16 > region_end {
        return None;
    }
    let id = scan::u32_at(data, body_offset)?;
    if id > MAX_PLAUSIBLE_ID || !register_ids.contains(&id) {
        return None;
    }

    Some(Candidate {
        kind,
        marker_offset,
        body_offset,
        name: std::str::from_utf8(name_bytes).ok()?.to_owned(),
        id,
    })
}

fn decode(
    data: &[u8],
    candidate: Candidate,
    block_end: usize,
    region_end: usize,
    warnings: &mut Vec<Warning>,
) -> Container {
    let body = candidate.body_offset;

    // The fixed 64-byte body window, zero-filled where the region ends
    // before the block does. Validation guarantees the first 16 bytes.
    let mut fixed = [0u8; 64];
    let available = region_end.min(body + 64) - body;
    fixed[..available].copy_from_slice(&data[body..body + available]);
    let raw: RawBody = match Cursor::new(&fixed[..]).read_le() {
        Ok(raw) => raw,
        // Unreachable: the scratch window is always 64 bytes.
        Err(_) => RawBody {
            id: candidate.id,
            x: 0.0,
            y: 0.0,
            size: 0.0,
            unk1: 0,
            reserved: [0; 44],
        },
    };

    let name_hash = scan::u32_at(data, body - 4).unwrap_or_default();

    let manifest = candidate.name.is_empty() && candidate.id == 0;
    let (resource, color, keys) = if manifest {
        let keys = decode_manifest_keys(data, candidate.marker_offset, block_end, name_hash);
        (None, None, keys)
    } else {
        let resource = decode_resource(data, body, block_end, warnings);
        let color = decode_color(data, body, block_end);
        if color.is_none() {
            warn(
                warnings,
                WarningKind::ColorMissing,
                body,
                format!("no color anchor in block of container {}", candidate.id),
            );
        }
        (resource, color, Vec::new())
    };

    Container {
        kind: candidate.kind,
        name: candidate.name,
        id: raw.id,
        name_hash,
        x: raw.x,
        y: raw.y,
        size: raw.size,
        unk1: raw.unk1,
        reserved: raw.reserved,
        resource,
        color,
        keys,
        marker_offset: candidate.marker_offset,
        body_offset: body,
        block_end,
    }
}

/// Resource property at body+64: `BD` tag, 5 flag bytes, u8 inner length,
/// then the string. A declared length past `block_end` clips the string.
fn decode_resource(
    data: &[u8],
    body: usize,
    block_end: usize,
    warnings: &mut Vec<Warning>,
) -> Option<Resource> {
    let tag_offset = body + 64;
    // Tag, flags, and length byte must all fit before the next block.
    if tag_offset + 10 > block_end {
        return None;
    }
    if data.get(tag_offset..tag_offset + 4)? != RESOURCE_TAG.as_slice() {
        return None;
    }
    let flags: [u8; 5] = data
        .get(tag_offset + 4..tag_offset + 9)?
        .try_into()
        .ok()?;
    if flags != RESOURCE_FLAGS {
        return None;
    }

    let declared_len = *data.get(tag_offset + 9)?;
    let string_start = tag_offset + 10;
    let declared_end = string_start + declared_len as usize;
    let (string_end, truncated) = if declared_end > block_end {
        (block_end, true)
    } else {
        (declared_end, false)
    };
    if truncated {
        warn(
            warnings,
            WarningKind::ResourceTruncated,
            string_start,
            format!(
                "resource string declares {declared_len} bytes but only {} remain in the block",
                string_end - string_start
            ),
        );
    }

    Some(Resource {
        path: String::from_utf8_lossy(&data[string_start..string_end]).into_owned(),
        flags,
        declared_len,
        truncated,
        property_range: ByteRange::new(tag_offset, string_end),
        string_range: ByteRange::new(string_start, string_end),
    })
}

/// Backward search in `(body+64, block_end)` for the last `1.0f` anchor;
/// the three bytes before it are R, G, B.
fn decode_color(data: &[u8], body: usize, block_end: usize) -> Option<Color> {
    let anchor = scan::rfind(data, body + 65, block_end, &COLOR_ANCHOR)?;
    let rgb = anchor.checked_sub(3)?;
    Some(Color {
        r: data[rgb],
        g: data[rgb + 1],
        b: data[rgb + 2],
        range: ByteRange::new(rgb, anchor),
    })
}

/// Manifest string table: `string_count` Pascal strings swept from
/// marker+64, skipping bytes that do not start a printable string.
fn decode_manifest_keys(
    data: &[u8],
    marker_offset: usize,
    block_end: usize,
    string_count: u32,
) -> Vec<ManifestKey> {
    if string_count == 0 || string_count > MAX_MANIFEST_KEYS {
        return Vec::new();
    }
    let mut keys = Vec::new();
    let mut pos = marker_offset + 64;
    while keys.len() < string_count as usize && pos < block_end {
        match scan::pascal_string(data, pos, block_end) {
            Some((text, next)) => {
                keys.push(ManifestKey {
                    text,
                    range: ByteRange::new(pos, next),
                });
                pos = next;
            }
            None => pos += 1,
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::RegisterEntry;
    use pretty_assertions::assert_eq;

    fn register_with(ids: &[u32], start: usize) -> Register {
        Register {
            start,
            entries: ids
                .iter()
                .enumerate()
                .map(|(i, &id)| RegisterEntry {
                    id,
                    child_count: 0,
                    offset: start + 14 + i * 8,
                })
                .collect(),
        }
    }

    /// Marker + name + hash/pad + 64-byte body, no trailing data.
    fn push_block(data: &mut Vec<u8>, marker: [u8; 4], name: &str, id: u32) -> usize {
        let marker_offset = data.len();
        data.extend_from_slice(&marker);
        data.push(name.len() as u8);
        data.extend_from_slice(name.as_bytes());
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&id.to_le_bytes());
        data.extend_from_slice(&1.0f32.to_le_bytes());
        data.extend_from_slice(&2.0f32.to_le_bytes());
        data.extend_from_slice(&3.0f32.to_le_bytes());
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&[0; 44]);
        marker_offset
    }

    #[test]
    fn accepts_both_marker_kinds() {
        let mut data = vec![0u8; 8];
        let first = push_block(&mut data, MARKER_STANDARD, "TEST3", 100);
        data.extend_from_slice(&[0; 16]);
        let second = push_block(&mut data, MARKER_TEXT, "TEST4", 101);
        let register = register_with(&[100, 101], data.len());

        let mut warnings = Vec::new();
        let containers = scan(&data, &register, &mut warnings);

        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].kind, MarkerKind::Standard);
        assert_eq!(containers[0].name, "TEST3");
        assert_eq!(containers[0].id, 100);
        assert_eq!(containers[0].x, 1.0);
        assert_eq!(containers[0].marker_offset, first);
        assert_eq!(containers[0].block_end, second);
        assert_eq!(containers[1].kind, MarkerKind::Text);
        assert_eq!(containers[1].block_end, register.start);
    }

    #[test]
    fn rejects_bad_name_length_and_unregistered_ids() {
        let mut data = vec![0u8; 4];
        push_block(&mut data, MARKER_STANDARD, "Good", 7);
        // Marker with an implausible name length.
        let bad = data.len();
        data.extend_from_slice(&MARKER_STANDARD);
        data.push(200);
        data.extend_from_slice(&[0x41; 32]);
        // Valid-looking block whose id is not in the register.
        push_block(&mut data, MARKER_STANDARD, "Ghost", 8);
        let register = register_with(&[7], data.len());

        let mut warnings = Vec::new();
        let containers = scan(&data, &register, &mut warnings);

        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].id, 7);
        // The rejected candidates did not become block boundaries.
        assert!(containers[0].block_end > bad);
        assert_eq!(containers[0].block_end, register.start);
    }

    #[test]
    fn unprintable_name_is_rejected() {
        let mut data = vec![0u8; 4];
        let marker = data.len();
        data.extend_from_slice(&MARKER_STANDARD);
        data.push(3);
        data.extend_from_slice(b"a\x01b");
        data.extend_from_slice(&[0; 4]);
        data.extend_from_slice(&9u32.to_le_bytes());
        data.extend_from_slice(&[0; 60]);
        let register = register_with(&[9], data.len());

        let mut warnings = Vec::new();
        let containers = scan(&data, &register, &mut warnings);
        assert!(containers.is_empty(), "marker at {marker:#x} should fail");
    }

    #[test]
    fn resource_is_decoded_and_bounded() {
        let mut data = vec![0u8; 4];
        let marker = push_block(&mut data, MARKER_STANDARD, "Img", 5);
        let body = marker + 4 + 1 + 3 + 4;
        data.extend_from_slice(&RESOURCE_TAG);
        data.extend_from_slice(&RESOURCE_FLAGS);
        data.push(5);
        data.extend_from_slice(b"r.dds");
        let register = register_with(&[5], data.len());

        let mut warnings = Vec::new();
        let containers = scan(&data, &register, &mut warnings);
        let resource = containers[0].resource.as_ref().unwrap();

        assert_eq!(resource.path, "r.dds");
        assert_eq!(resource.declared_len, 5);
        assert!(!resource.truncated);
        assert_eq!(resource.property_range.start, body + 64);
        assert_eq!(resource.string_range.len(), 5);
        assert_eq!(resource.string_range.end, register.start);
        assert!(!warnings.iter().any(|w| w.kind == WarningKind::ResourceTruncated));
    }

    #[test]
    fn truncated_resource_keeps_prefix_and_warns() {
        let mut data = vec![0u8; 4];
        push_block(&mut data, MARKER_STANDARD, "Img", 5);
        data.extend_from_slice(&RESOURCE_TAG);
        data.extend_from_slice(&RESOURCE_FLAGS);
        data.push(50);
        data.extend_from_slice(b"only_twenty_bytes_xx");
        let register = register_with(&[5], data.len());

        let mut warnings = Vec::new();
        let containers = scan(&data, &register, &mut warnings);
        let resource = containers[0].resource.as_ref().unwrap();

        assert_eq!(resource.path, "only_twenty_bytes_xx");
        assert_eq!(resource.declared_len, 50);
        assert!(resource.truncated);
        assert!(warnings.iter().any(|w| w.kind == WarningKind::ResourceTruncated));
    }

    #[test]
    fn unexpected_resource_flags_mean_no_resource() {
        let mut data = vec![0u8; 4];
        push_block(&mut data, MARKER_STANDARD, "Img", 5);
        data.extend_from_slice(&RESOURCE_TAG);
        data.extend_from_slice(&[0x00, 0x02, 0x00, 0x00, 0x00]);
        data.push(5);
        data.extend_from_slice(b"r.dds");
        let register = register_with(&[5], data.len());

        let mut warnings = Vec::new();
        let containers = scan(&data, &register, &mut warnings);
        assert_eq!(containers[0].resource, None);
    }

    #[test]
    fn color_comes_from_the_last_anchor() {
        let mut data = vec![0u8; 4];
        push_block(&mut data, MARKER_STANDARD, "Bar", 6);
        // Early anchor with black RGB, then the real one near the end.
        data.extend_from_slice(&[0x00, 0x00, 0x00]);
        data.extend_from_slice(&COLOR_ANCHOR);
        data.extend_from_slice(&[0; 8]);
        let rgb = data.len();
        data.extend_from_slice(&[0xD3, 0x9F, 0x10]);
        data.extend_from_slice(&COLOR_ANCHOR);
        let register = register_with(&[6], data.len());

        let mut warnings = Vec::new();
        let containers = scan(&data, &register, &mut warnings);
        let color = containers[0].color.unwrap();

        assert_eq!((color.r, color.g, color.b), (0xD3, 0x9F, 0x10));
        assert_eq!(color.range, ByteRange::new(rgb, rgb + 3));
        assert!(!warnings.iter().any(|w| w.kind == WarningKind::ColorMissing));
    }

    #[test]
    fn missing_color_anchor_warns() {
        let mut data = vec![0u8; 4];
        push_block(&mut data, MARKER_STANDARD, "Bar", 6);
        let register = register_with(&[6], data.len());

        let mut warnings = Vec::new();
        let containers = scan(&data, &register, &mut warnings);
        assert_eq!(containers[0].color, None);
        assert!(warnings.iter().any(|w| w.kind == WarningKind::ColorMissing));
    }

    #[test]
    fn manifest_block_collects_keys() {
        let mut data = vec![0u8; 4];
        let marker = data.len();
        data.extend_from_slice(&MARKER_STANDARD);
        data.push(0);
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        // Pad out to marker+64, then two keys with a junk byte between.
        data.resize(marker + 64, 0);
        data.extend_from_slice(b"\x05pageA");
        data.push(0xFF);
        data.extend_from_slice(b"\x05pageB");
        let register = register_with(&[0], data.len());

        let mut warnings = Vec::new();
        let containers = scan(&data, &register, &mut warnings);

        assert!(containers[0].is_manifest());
        assert_eq!(containers[0].resource, None);
        assert_eq!(containers[0].color, None);
        let texts: Vec<_> = containers[0].keys.iter().map(|k| k.text.as_str()).collect();
        assert_eq!(texts, ["pageA", "pageB"]);
        assert_eq!(containers[0].keys[0].range, ByteRange::new(marker + 64, marker + 70));
        // Manifest blocks do not emit color warnings.
        assert!(!warnings.iter().any(|w| w.kind == WarningKind::ColorMissing));
    }
}
