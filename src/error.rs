//! Error types for the columnar runtime.

use thiserror::Error;

/// Result type alias using [`ColumnarError`].
pub type Result<T> = std::result::Result<T, ColumnarError>;

/// Error types for cursor construction and row encoding.
///
/// "Not yet available" is never an error: the cursor reports it through
/// boolean returns and [`crate::relation::BatchLength`].
#[derive(Debug, Error)]
pub enum ColumnarError {
    /// Schema-related errors (unknown column name, bad field index).
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Type mismatch errors.
    #[error("Type error: expected {expected}, got {actual}")]
    TypeError { expected: String, actual: String },

    /// Column type without an `UnsafeRow` encoding.
    #[error("Unsupported type for column '{column}': {data_type}")]
    UnsupportedType { column: String, data_type: String },

    /// Row buffer could not be grown.
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// Decimal value does not fit the 8-byte slot of its declared precision.
    #[error("Decimal overflow: unscaled value {value} does not fit precision {precision}")]
    DecimalOverflow { value: i128, precision: u8 },

    /// Row exceeds the 32-bit offset/length addressing of the row format.
    #[error("Row too large: {size} bytes exceeds the {limit} byte limit")]
    RowTooLarge { size: usize, limit: usize },

    /// Encoded row is truncated, misaligned, or points outside itself.
    #[error("Malformed row {row}: {message}")]
    MalformedRow { row: usize, message: String },

    /// Error raised by the Arrow library.
    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),
}
