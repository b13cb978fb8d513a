//! Shared error and diagnostic types for parse operations.
use serde::Serialize;
use thiserror::Error;

/// Unrecoverable parse failures. Anything else is a [Warning].
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("register signature not found")]
    RegisterNotFound,

    #[error("file too short for a header: {len} bytes")]
    FileTooShort { len: usize },

    #[error("error reading file")]
    Io(#[from] std::io::Error),
}

/// A recoverable anomaly encountered while parsing.
///
/// Warnings are collected in the order discovered and returned on the parse
/// result. The parser keeps going past all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    /// Offset of the bytes that triggered the warning.
    pub offset: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WarningKind {
    /// Magic is not the standard `00 00 10 40`.
    MagicVariant,
    /// No sprite path block at the start of the header.
    SpriteAbsent,
    /// A resource string's declared length ran past the end of its block.
    ResourceTruncated,
    /// No trailing `1.0f` anchor inside a container's block.
    ColorMissing,
    /// The register references an id no container scan produced.
    DanglingRegisterId,
    /// A register entry declared more children than entries remained.
    RegisterShortfall,
    /// The same id appears in more than one register entry.
    DuplicateId,
    /// A register entry started a new root after the first.
    SecondRoot,
    /// Bytes after the last full register entry.
    TrailingBytes,
}

pub(crate) fn warn(
    warnings: &mut Vec<Warning>,
    kind: WarningKind,
    offset: usize,
    message: String,
) {
    log::warn!("{kind:?} at {offset:#x}: {message}");
    warnings.push(Warning {
        kind,
        offset,
        message,
    });
}
