//! A library for parsing the Madness Engine `.bgui` binary UI description
//! format.
//!
//! The format is undocumented and has no table of contents, so the parser
//! recovers structure heuristically. A file splits into three regions:
//!
//! | Region | Contents |
//! | --- | --- |
//! | header | magic, sprite path, project-root marker, page strings |
//! | container region | `03`/`04` blocks found by validated marker search |
//! | register | `(id, child_count)` pairs defining the logical tree |
//!
//! The register at EOF is located first (bounding the container region),
//! containers are scanned next (bounding the header), and the logical tree
//! is hydrated last by consuming register entries in pre-order. Files that
//! deviate from the idealized layout parse best-effort: anything
//! recoverable becomes a [Warning] instead of an error, and every decoded
//! artifact carries [ByteRange]s so a viewer can highlight its exact
//! footprint.
//!
//! # Getting Started
//! ```rust no_run
//! # fn main() -> Result<(), bgui_lib::ParseError> {
//! let bgui = bgui_lib::Bgui::from_file("display_camaro_gt4r.bgui")?;
//!
//! println!("{} containers", bgui.containers.len());
//! for root in &bgui.roots {
//!     for node in root.descendants() {
//!         println!("{} ({} children)", node.id, node.child_count);
//!     }
//! }
//! # Ok(())
//! # }
//! ```
use std::path::Path;

use log::debug;
use serde::Serialize;

pub mod container;
pub mod error;
pub mod header;
pub mod register;
mod scan;
pub mod tree;

pub use container::{Color, Container, ManifestKey, MarkerKind, Resource};
pub use error::{ParseError, Warning, WarningKind};
pub use header::{Header, MagicVariant, PageString, SpritePath};
pub use register::RegisterEntry;
pub use tree::Node;

/// Too short to hold even a magic and one header marker.
const MIN_FILE_LEN: usize = 8;

/// A half-open byte interval `[start, end)` over the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, offset: usize) -> bool {
        (self.start..self.end).contains(&offset)
    }

    /// Smallest range covering both.
    pub fn union(self, other: ByteRange) -> ByteRange {
        ByteRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// A fully parsed `.bgui` file.
///
/// All strings and byte blocks are owned; the input buffer can be dropped
/// after parsing. [ByteRange]s stay valid as indexes into a copy of the
/// bytes a host keeps around.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bgui {
    pub header: Header,
    /// Containers in file order.
    pub containers: Vec<Container>,
    /// Register entries in file order, which is pre-order of the tree.
    pub register: Vec<RegisterEntry>,
    /// Offset of the register signature. Containers occupy
    /// `[header.header_end, register_start)`.
    pub register_start: usize,
    /// Logical forest. Standard files have a single root.
    pub roots: Vec<Node>,
    /// Recoverable anomalies, in the order discovered.
    pub warnings: Vec<Warning>,
    pub file_len: usize,
}

impl Bgui {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ParseError> {
        Self::from_bytes(&std::fs::read(path)?)
    }

    /// Parses a `.bgui` byte buffer.
    ///
    /// Parsing is a pure function of the bytes: no I/O, single pass over
    /// each region, deterministic output. Fatal failures are limited to a
    /// missing register signature and a buffer too short for a header;
    /// everything else degrades to [Warning]s on the result.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < MIN_FILE_LEN {
            return Err(ParseError::FileTooShort { len: data.len() });
        }

        let mut warnings = Vec::new();
        let register = register::parse(data, &mut warnings)?;
        let containers = container::scan(data, &register, &mut warnings);
        // The first accepted block (the manifest counts) ends the header.
        let header_end = containers
            .first()
            .map(|c| c.marker_offset)
            .unwrap_or(register.start);
        let header = header::parse(data, header_end, &mut warnings);
        let roots = tree::build(&register.entries, &containers, &mut warnings);
        debug!(
            "parsed {} register entries, {} containers, {} roots, {} warnings",
            register.entries.len(),
            containers.len(),
            roots.len(),
            warnings.len()
        );

        Ok(Bgui {
            header,
            containers,
            register: register.entries,
            register_start: register.start,
            roots,
            warnings,
            file_len: data.len(),
        })
    }

    /// First container with the given id, in scan order.
    pub fn container_by_id(&self, id: u32) -> Option<&Container> {
        self.containers.iter().find(|c| c.id == id)
    }

    /// Node with the given id, searching the forest in pre-order.
    pub fn node_by_id(&self, id: u32) -> Option<&Node> {
        self.roots
            .iter()
            .flat_map(|root| root.descendants())
            .find(|node| node.id == id)
    }

    /// Byte footprint of the subtree rooted at the node with `id`.
    pub fn subtree_range(&self, id: u32) -> Option<ByteRange> {
        self.node_by_id(id)?.subtree_range
    }

    /// Signature through the last full register entry.
    pub fn register_range(&self) -> ByteRange {
        let end = self
            .register
            .last()
            .map(|entry| entry.offset + 8)
            .unwrap_or(self.register_start + register::REGISTER_SIGNATURE.len());
        ByteRange::new(self.register_start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_union_and_contains() {
        let a = ByteRange::new(10, 20);
        let b = ByteRange::new(15, 40);
        assert_eq!(a.union(b), ByteRange::new(10, 40));
        assert_eq!(a.len(), 10);
        assert!(a.contains(10));
        assert!(!a.contains(20));
        assert!(ByteRange::new(5, 5).is_empty());
    }

    #[test]
    fn short_files_are_fatal() {
        assert!(matches!(
            Bgui::from_bytes(&[0u8; 7]),
            Err(ParseError::FileTooShort { len: 7 })
        ));
    }
}
