//! Header field representation.

use bytes::Bytes;
use std::fmt;

/// Per-entry bookkeeping overhead charged against the dynamic table
/// capacity (RFC 9204 Section 3.2.1).
pub const ENTRY_OVERHEAD: usize = 32;

/// A decoded header field, also the unit stored in the dynamic table.
///
/// Entries are immutable once inserted; cloning shares the underlying bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct FieldLine {
    pub name: Bytes,
    pub value: Bytes,
}

impl FieldLine {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Size accounted against the dynamic table capacity.
    pub fn size(&self) -> usize {
        entry_size(&self.name, &self.value)
    }
}

/// Accounted size of a (name, value) pair.
pub fn entry_size(name: &[u8], value: &[u8]) -> usize {
    name.len() + value.len() + ENTRY_OVERHEAD
}

impl fmt::Debug for FieldLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FieldLine({:?}: {:?})",
            String::from_utf8_lossy(&self.name),
            String::from_utf8_lossy(&self.value)
        )
    }
}

impl From<(&'static str, &'static str)> for FieldLine {
    fn from((name, value): (&'static str, &'static str)) -> Self {
        Self::new(name, value)
    }
}
