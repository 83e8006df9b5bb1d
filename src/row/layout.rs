//! `UnsafeRow` binary layout.
//!
//! ```text
//! [null bitmap: ceil(n/64) * 8 bytes][slot 0: 8 bytes]...[slot n-1][variable region]
//! ```
//!
//! All multi-byte values are little-endian. A variable-length slot holds the
//! value's offset from the row start in its upper 32 bits and its length in the
//! lower 32 bits. Every row is a multiple of 8 bytes.

use arrow::datatypes::{DataType, Schema};

use crate::error::{ColumnarError, Result};

/// Width of one fixed slot and the row alignment.
pub const WORD_SIZE: usize = 8;

/// Bytes reserved in the variable region for a decimal too wide for its slot.
pub const WIDE_DECIMAL_SIZE: usize = 16;

/// Largest decimal precision whose unscaled value is stored in the slot.
pub const MAX_FIXED_DECIMAL_PRECISION: u8 = 18;

/// Largest offset or length addressable by a variable-length slot.
pub const MAX_ROW_SIZE: usize = u32::MAX as usize;

/// Width of the null bitmap for `num_cols` columns.
#[must_use]
pub fn null_bitset_width(num_cols: usize) -> usize {
    num_cols.div_ceil(64) * WORD_SIZE
}

/// Rounds `n` up to the next multiple of [`WORD_SIZE`].
#[must_use]
pub fn round_to_word(n: usize) -> usize {
    n.div_ceil(WORD_SIZE) * WORD_SIZE
}

/// Packs a variable-length descriptor into a slot value.
#[must_use]
pub fn pack_offset_and_size(offset: u32, size: u32) -> u64 {
    (u64::from(offset) << 32) | u64::from(size)
}

/// Splits a slot value into `(offset, size)`.
#[must_use]
pub fn unpack_offset_and_size(slot: u64) -> (u32, u32) {
    ((slot >> 32) as u32, slot as u32)
}

/// Marks column `col` null in the bitmap at the start of `row`.
pub fn set_null(row: &mut [u8], col: usize) {
    row[col >> 3] |= 1 << (col & 7);
}

/// Returns true if column `col` is marked null in `row`.
#[must_use]
pub fn is_null(row: &[u8], col: usize) -> bool {
    row[col >> 3] & (1 << (col & 7)) != 0
}

/// Minimal big-endian two's-complement bytes of an unscaled decimal.
///
/// Returns a buffer and the index of the first significant byte, so that
/// `&buf[start..]` has at least one byte.
#[must_use]
pub fn decimal_to_be_bytes(value: i128) -> ([u8; WIDE_DECIMAL_SIZE], usize) {
    let buf = value.to_be_bytes();
    let mut start = 0;
    while start < WIDE_DECIMAL_SIZE - 1 {
        let redundant = (buf[start] == 0x00 && buf[start + 1] & 0x80 == 0)
            || (buf[start] == 0xFF && buf[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    (buf, start)
}

/// Sign-extends big-endian two's-complement bytes into an `i128`.
///
/// `bytes` must hold between 1 and 16 bytes.
#[must_use]
pub fn decimal_from_be_bytes(bytes: &[u8]) -> i128 {
    let negative = bytes.first().is_some_and(|b| b & 0x80 != 0);
    let mut buf = if negative {
        [0xFF; WIDE_DECIMAL_SIZE]
    } else {
        [0x00; WIDE_DECIMAL_SIZE]
    };
    buf[WIDE_DECIMAL_SIZE - bytes.len()..].copy_from_slice(bytes);
    i128::from_be_bytes(buf)
}

/// How a column's value is stored in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Value of the given byte width in the low bytes of the slot.
    Fixed(usize),
    /// Bytes in the variable region, slot holds offset and length.
    Variable,
    /// 16 reserved bytes in the variable region, reserved even when null.
    WideDecimal,
}

impl SlotKind {
    /// Returns the slot kind for `data_type`, or `None` if it has no encoding.
    #[must_use]
    pub fn for_type(data_type: &DataType) -> Option<SlotKind> {
        match data_type {
            DataType::Boolean | DataType::Int8 => Some(SlotKind::Fixed(1)),
            DataType::Int16 => Some(SlotKind::Fixed(2)),
            DataType::Int32 | DataType::Float32 | DataType::Date32 => Some(SlotKind::Fixed(4)),
            DataType::Int64 | DataType::Float64 | DataType::Date64 | DataType::Timestamp(_, _) => {
                Some(SlotKind::Fixed(8))
            }
            DataType::Decimal128(precision, _) if *precision <= MAX_FIXED_DECIMAL_PRECISION => {
                Some(SlotKind::Fixed(8))
            }
            DataType::Decimal128(_, _) => Some(SlotKind::WideDecimal),
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Binary | DataType::LargeBinary => {
                Some(SlotKind::Variable)
            }
            _ => None,
        }
    }
}

/// Slot layout of rows for one schema.
#[derive(Debug, Clone)]
pub struct RowLayout {
    bitset_width: usize,
    kinds: Vec<SlotKind>,
}

impl RowLayout {
    /// Computes the layout for `schema`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedType` for the first field without an encoding.
    pub fn try_new(schema: &Schema) -> Result<Self> {
        let kinds = schema
            .fields()
            .iter()
            .map(|field| {
                SlotKind::for_type(field.data_type()).ok_or_else(|| ColumnarError::UnsupportedType {
                    column: field.name().clone(),
                    data_type: field.data_type().to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            bitset_width: null_bitset_width(kinds.len()),
            kinds,
        })
    }

    #[must_use]
    pub fn num_cols(&self) -> usize {
        self.kinds.len()
    }

    #[must_use]
    pub fn bitset_width(&self) -> usize {
        self.bitset_width
    }

    /// Size of the bitmap plus all fixed slots.
    #[must_use]
    pub fn fixed_size(&self) -> usize {
        self.bitset_width + self.kinds.len() * WORD_SIZE
    }

    /// Byte offset of column `col`'s slot from the row start.
    #[must_use]
    pub fn slot_offset(&self, col: usize) -> usize {
        self.bitset_width + col * WORD_SIZE
    }

    #[must_use]
    pub fn kind(&self, col: usize) -> SlotKind {
        self.kinds[col]
    }

    /// Bytes every row reserves in the variable region regardless of values.
    #[must_use]
    pub fn reserved_variable_size(&self) -> usize {
        self.kinds
            .iter()
            .filter(|kind| **kind == SlotKind::WideDecimal)
            .count()
            * WIDE_DECIMAL_SIZE
    }
}
