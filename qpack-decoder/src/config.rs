//! Negotiated decoder settings.
//!
//! These values are advertised to the peer in `SETTINGS_QPACK_MAX_TABLE_CAPACITY`
//! and `SETTINGS_QPACK_BLOCKED_STREAMS` (RFC 9204 Section 5) and bound what the
//! peer's encoder may do.

use serde::{Deserialize, Serialize};

use crate::field_line::ENTRY_OVERHEAD;

/// Largest value a QPACK prefixed integer may carry.
const MAX_VARINT: u64 = (1u64 << 62) - 1;

/// Configuration for a [`QpackDecoder`](crate::QpackDecoder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Maximum dynamic table capacity in bytes (default: 4 KB).
    ///
    /// The encoder may raise the table capacity up to this value with
    /// Set Dynamic Table Capacity. Zero disables the dynamic table.
    #[serde(default = "default_max_table_capacity")]
    pub max_table_capacity: u64,

    /// Maximum number of concurrently blocked header blocks (default: 100).
    ///
    /// A header block that would block beyond this limit fails immediately.
    #[serde(default = "default_max_blocked_streams")]
    pub max_blocked_streams: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_table_capacity: default_max_table_capacity(),
            max_blocked_streams: default_max_blocked_streams(),
        }
    }
}

impl DecoderConfig {
    pub fn with_max_table_capacity(mut self, capacity: u64) -> Self {
        self.max_table_capacity = capacity;
        self
    }

    pub fn with_max_blocked_streams(mut self, streams: u64) -> Self {
        self.max_blocked_streams = streams;
        self
    }

    /// `MaxEntries` from RFC 9204 Section 3.2.3, used to reconstruct the
    /// Required Insert Count.
    pub fn max_entries(&self) -> u64 {
        self.max_table_capacity / ENTRY_OVERHEAD as u64
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_table_capacity > MAX_VARINT {
            errors.push(format!(
                "max_table_capacity {} is not encodable as a QPACK integer",
                self.max_table_capacity
            ));
        }
        if self.max_blocked_streams > MAX_VARINT {
            errors.push(format!(
                "max_blocked_streams {} is not encodable as a QPACK integer",
                self.max_blocked_streams
            ));
        }
        if usize::try_from(self.max_table_capacity).is_err() {
            errors.push(format!(
                "max_table_capacity {} exceeds addressable memory",
                self.max_table_capacity
            ));
        }

        errors
    }
}

fn default_max_table_capacity() -> u64 {
    4096
}

fn default_max_blocked_streams() -> u64 {
    100
}
