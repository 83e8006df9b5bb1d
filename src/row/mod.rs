//! Binary row codec.
//!
//! Converts Arrow record batches into Spark-compatible `UnsafeRow`s, one
//! buffer per row, and decodes such rows back into batches. See [`layout`]
//! for the byte format.

pub mod layout;
mod reader;
mod writer;

use serde::{Deserialize, Serialize};

pub use layout::{RowLayout, SlotKind};
pub use reader::UnsafeRowReader;
pub use writer::UnsafeRowWriter;

/// Default initial variable-region capacity per row, in bytes.
pub const DEFAULT_VARIABLE_LENGTH_ESTIMATE: usize = 64;

/// Configuration for [`UnsafeRowWriter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowWriterConfig {
    /// Bytes reserved per row for variable-length values, on top of the
    /// fixed region. Rows grow past this on demand.
    pub variable_length_estimate: usize,
    /// Keep row allocations across `write` calls instead of reallocating.
    pub reuse_buffers: bool,
}

impl Default for RowWriterConfig {
    fn default() -> Self {
        Self {
            variable_length_estimate: DEFAULT_VARIABLE_LENGTH_ESTIMATE,
            reuse_buffers: true,
        }
    }
}

impl RowWriterConfig {
    /// Creates a new writer configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-row variable-length estimate.
    #[must_use]
    pub fn with_variable_length_estimate(mut self, estimate: usize) -> Self {
        self.variable_length_estimate = estimate;
        self
    }

    /// Sets whether row buffers are reused across writes.
    #[must_use]
    pub fn with_reuse_buffers(mut self, reuse: bool) -> Self {
        self.reuse_buffers = reuse;
        self
    }
}
