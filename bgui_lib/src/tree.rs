//! Logical tree reconstruction.
//!
//! The file's physical layout is flat; topology comes from consuming
//! register entries in order with child-count accounting. Entry order is
//! pre-order, so each entry's children are exactly the next `child_count`
//! subtrees in the stream.
//!
//! Nodes reference containers by id, never by pointer, so the tree owns its
//! children outright and cannot cycle.
use indexmap::IndexMap;
use serde::Serialize;

use crate::container::Container;
use crate::error::{warn, Warning, WarningKind};
use crate::register::RegisterEntry;
use crate::ByteRange;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: u32,
    /// Child count declared by the register entry. Matches `children.len()`
    /// unless the register ran short.
    pub child_count: u32,
    /// True when no scanned container carries this id; the node exists only
    /// in the register.
    pub dangling: bool,
    /// Offset of the register entry that produced this node.
    pub register_offset: usize,
    pub children: Vec<Node>,
    /// Min marker offset to max block end over this node and its
    /// descendants. `None` for a dangling leaf.
    pub subtree_range: Option<ByteRange>,
}

impl Node {
    /// Pre-order traversal of this node and all descendants.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Consumes register entries in order into a forest. Standard files produce
/// a single root; every additional root is reported.
pub(crate) fn build(
    entries: &[RegisterEntry],
    containers: &[Container],
    warnings: &mut Vec<Warning>,
) -> Vec<Node> {
    // First-wins container footprint per id.
    let mut ranges: IndexMap<u32, ByteRange> = IndexMap::new();
    for container in containers {
        ranges.entry(container.id).or_insert_with(|| container.range());
    }

    let mut roots = Vec::new();
    let mut index = 0;
    while index < entries.len() {
        if !roots.is_empty() {
            warn(
                warnings,
                WarningKind::SecondRoot,
                entries[index].offset,
                format!("register entry for id {} starts another root", entries[index].id),
            );
        }
        let mut root = consume(entries, &mut index, &ranges, warnings);
        compute_subtree_ranges(&mut root);
        roots.push(root);
    }
    roots
}

/// Builds the node for `entries[*index]` and recursively consumes its
/// declared children from the stream.
fn consume(
    entries: &[RegisterEntry],
    index: &mut usize,
    ranges: &IndexMap<u32, ByteRange>,
    warnings: &mut Vec<Warning>,
) -> Node {
    let entry = entries[*index];
    *index += 1;

    let own_range = ranges.get(&entry.id).copied();
    if own_range.is_none() {
        warn(
            warnings,
            WarningKind::DanglingRegisterId,
            entry.offset,
            format!("register references id {} but no container block was found", entry.id),
        );
    }

    let mut children = Vec::with_capacity(entry.child_count as usize);
    for _ in 0..entry.child_count {
        if *index >= entries.len() {
            warn(
                warnings,
                WarningKind::RegisterShortfall,
                entry.offset,
                format!(
                    "id {} declares {} children but the register ended after {}",
                    entry.id,
                    entry.child_count,
                    children.len()
                ),
            );
            break;
        }
        children.push(consume(entries, index, ranges, warnings));
    }

    Node {
        id: entry.id,
        child_count: entry.child_count,
        dangling: own_range.is_none(),
        register_offset: entry.offset,
        children,
        subtree_range: own_range,
    }
}

/// Single post-order walk unioning each node's own footprint with its
/// children's. `consume` seeds `subtree_range` with the node's own range.
fn compute_subtree_ranges(node: &mut Node) {
    for child in &mut node.children {
        compute_subtree_ranges(child);
        node.subtree_range = match (node.subtree_range, child.subtree_range) {
            (Some(a), Some(b)) => Some(a.union(b)),
            (a, b) => a.or(b),
        };
    }
}
