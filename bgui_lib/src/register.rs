//! The end-of-file register: the table of `(id, child_count)` pairs that
//! defines the logical tree topology.
//!
//! The register is authoritative. Ids listed here bound what the container
//! scanner will accept, and the entry order is the pre-order traversal of
//! the logical tree.
use std::io::Cursor;

use binrw::{BinRead, BinReaderExt};
use indexmap::IndexSet;
use log::debug;
use serde::Serialize;

use crate::error::{warn, ParseError, Warning, WarningKind};
use crate::{scan, ByteRange};

/// `0E` followed by thirteen zero bytes, written immediately before the
/// first entry.
pub const REGISTER_SIGNATURE: [u8; 14] = [0x0E, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

/// A single `(id, child_count)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisterEntry {
    pub id: u32,
    pub child_count: u32,
    /// Offset of the entry's first byte.
    pub offset: usize,
}

impl RegisterEntry {
    pub fn range(&self) -> ByteRange {
        ByteRange::new(self.offset, self.offset + 8)
    }
}

/// Located register: signature offset plus decoded entries.
pub(crate) struct Register {
    /// Offset of the signature's first byte. The container region ends here.
    pub start: usize,
    pub entries: Vec<RegisterEntry>,
}

impl Register {
    /// Ids in entry order, deduplicated.
    pub fn ids(&self) -> IndexSet<u32> {
        self.entries.iter().map(|e| e.id).collect()
    }
}

/// An entry as written in the file.
#[derive(BinRead)]
struct RawEntry {
    id: u32,
    child_count: u32,
}

/// Locates the register by scanning backwards for the last signature
/// occurrence, then decodes every full 8-byte entry up to EOF.
pub(crate) fn parse(data: &[u8], warnings: &mut Vec<Warning>) -> Result<Register, ParseError> {
    let start = scan::rfind(data, 0, data.len(), &REGISTER_SIGNATURE)
        .ok_or(ParseError::RegisterNotFound)?;
    debug!("register signature at {start:#x}");

    let entries_start = start + REGISTER_SIGNATURE.len();
    let capacity = (data.len() - entries_start) / 8;
    let remainder = (data.len() - entries_start) % 8;
    if remainder != 0 {
        warn(
            warnings,
            WarningKind::TrailingBytes,
            data.len() - remainder,
            format!("{remainder} bytes after the last register entry"),
        );
    }

    let mut entries = Vec::with_capacity(capacity);
    let mut seen = IndexSet::new();
    for i in 0..capacity {
        let offset = entries_start + i * 8;
        let Ok(raw) = Cursor::new(&data[offset..offset + 8]).read_le::<RawEntry>() else {
            break;
        };
        if !seen.insert(raw.id) {
            warn(
                warnings,
                WarningKind::DuplicateId,
                offset,
                format!("id {} already appeared in an earlier register entry", raw.id),
            );
        }
        entries.push(RegisterEntry {
            id: raw.id,
            child_count: raw.child_count,
            offset,
        });
    }
    debug!("{} register entries", entries.len());

    Ok(Register { start, entries })
}
