//! Columnar batch to `UnsafeRow` encoder.

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{
    DataType, Date32Type, Date64Type, Decimal128Type, Float32Type, Float64Type, Int16Type,
    Int32Type, Int64Type, Int8Type, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType,
};
use arrow::record_batch::RecordBatch;

use super::layout::{
    decimal_to_be_bytes, pack_offset_and_size, round_to_word, set_null, RowLayout, SlotKind,
    MAX_ROW_SIZE, WIDE_DECIMAL_SIZE, WORD_SIZE,
};
use super::RowWriterConfig;
use crate::error::{ColumnarError, Result};

/// Copies a primitive value's little-endian bytes into the low end of a slot.
macro_rules! put_primitive {
    ($slot:expr, $array:expr, $row:expr, $t:ty) => {{
        let bytes = $array.as_primitive::<$t>().value($row).to_le_bytes();
        $slot[..bytes.len()].copy_from_slice(&bytes);
    }};
}

/// Encodes every row of a record batch as an `UnsafeRow`.
///
/// Construction computes the row layout and allocates one buffer per row.
/// [`UnsafeRowWriter::write`] fills the buffers; the rows are then pulled in
/// order with [`UnsafeRowWriter::next_row`]. Calling `write` again re-encodes
/// into the same buffers and restarts the sequence.
#[derive(Debug)]
pub struct UnsafeRowWriter {
    batch: RecordBatch,
    config: RowWriterConfig,
    layout: RowLayout,
    buffers: Vec<Vec<u8>>,
    /// Rows produced by the last successful `write`.
    num_written: usize,
    row_cursor: usize,
}

impl UnsafeRowWriter {
    /// Prepares a writer for `batch`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedType` if a column has no row encoding, or
    /// `AllocationFailed` if the row buffers cannot be reserved.
    pub fn try_new(batch: RecordBatch, config: RowWriterConfig) -> Result<Self> {
        let layout = RowLayout::try_new(&batch.schema())?;
        let mut writer = Self {
            batch,
            config,
            layout,
            buffers: Vec::new(),
            num_written: 0,
            row_cursor: 0,
        };
        writer.allocate_buffers()?;
        tracing::debug!(
            num_cols = writer.layout.num_cols(),
            num_rows = writer.batch.num_rows(),
            fixed_size = writer.layout.fixed_size(),
            "initialized row writer"
        );
        Ok(writer)
    }

    /// Number of columns per row.
    #[must_use]
    pub fn num_cols(&self) -> usize {
        self.layout.num_cols()
    }

    /// Number of rows in the source batch.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    /// Row layout derived from the batch schema.
    #[must_use]
    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    /// Encodes every row of the batch, in row order.
    ///
    /// # Errors
    ///
    /// Returns `AllocationFailed` or `RowTooLarge`. After an error no rows are
    /// available until a later `write` succeeds.
    pub fn write(&mut self) -> Result<()> {
        self.num_written = 0;
        self.row_cursor = 0;
        if !self.config.reuse_buffers {
            self.allocate_buffers()?;
        }
        let Self {
            batch,
            config,
            layout,
            buffers,
            ..
        } = self;
        let columns = batch.columns();
        for (row, buf) in buffers.iter_mut().enumerate() {
            encode_row(layout, columns, row, buf, config.variable_length_estimate)?;
        }
        self.num_written = self.buffers.len();
        Ok(())
    }

    /// Returns true if [`Self::next_row`] will yield another row.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.row_cursor < self.num_written
    }

    /// Returns the next encoded row. Its length is always a multiple of 8.
    pub fn next_row(&mut self) -> Option<&[u8]> {
        if !self.has_next() {
            return None;
        }
        let idx = self.row_cursor;
        self.row_cursor += 1;
        Some(self.buffers[idx].as_slice())
    }

    /// Iterates over all rows produced by the last `write`, without consuming them.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.buffers[..self.num_written].iter().map(Vec::as_slice)
    }

    fn allocate_buffers(&mut self) -> Result<()> {
        let num_rows = self.batch.num_rows();
        let capacity = self.layout.fixed_size()
            + self.layout.reserved_variable_size()
            + self.config.variable_length_estimate;
        let mut buffers = Vec::new();
        buffers.try_reserve_exact(num_rows).map_err(alloc_error)?;
        for _ in 0..num_rows {
            let mut buf = Vec::new();
            buf.try_reserve_exact(capacity).map_err(alloc_error)?;
            buffers.push(buf);
        }
        self.buffers = buffers;
        Ok(())
    }
}

fn alloc_error(e: std::collections::TryReserveError) -> ColumnarError {
    ColumnarError::AllocationFailed(e.to_string())
}

/// Grows `buf` by `additional` zero bytes.
fn grow(buf: &mut Vec<u8>, additional: usize) -> Result<()> {
    let new_len = buf.len() + additional;
    if new_len > MAX_ROW_SIZE {
        return Err(ColumnarError::RowTooLarge {
            size: new_len,
            limit: MAX_ROW_SIZE,
        });
    }
    buf.try_reserve(additional).map_err(alloc_error)?;
    buf.resize(new_len, 0);
    Ok(())
}

fn encode_row(
    layout: &RowLayout,
    columns: &[ArrayRef],
    row: usize,
    buf: &mut Vec<u8>,
    variable_length_estimate: usize,
) -> Result<()> {
    buf.clear();
    let capacity =
        layout.fixed_size() + layout.reserved_variable_size() + variable_length_estimate;
    buf.try_reserve(capacity).map_err(alloc_error)?;
    buf.resize(layout.fixed_size(), 0);

    for (col, array) in columns.iter().enumerate() {
        let slot = layout.slot_offset(col);
        match layout.kind(col) {
            SlotKind::Fixed(_) => {
                if array.is_null(row) {
                    set_null(buf, col);
                } else {
                    write_fixed(array.as_ref(), row, &mut buf[slot..slot + WORD_SIZE])?;
                }
            }
            SlotKind::Variable => {
                if array.is_null(row) {
                    set_null(buf, col);
                } else {
                    let bytes = variable_bytes(array.as_ref(), row)?;
                    let offset = buf.len();
                    grow(buf, round_to_word(bytes.len()))?;
                    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
                    write_descriptor(buf, slot, offset, bytes.len());
                }
            }
            SlotKind::WideDecimal => {
                let offset = buf.len();
                grow(buf, WIDE_DECIMAL_SIZE)?;
                if array.is_null(row) {
                    set_null(buf, col);
                    write_descriptor(buf, slot, offset, 0);
                } else {
                    let value = array.as_primitive::<Decimal128Type>().value(row);
                    let (bytes, start) = decimal_to_be_bytes(value);
                    let bytes = &bytes[start..];
                    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
                    write_descriptor(buf, slot, offset, bytes.len());
                }
            }
        }
    }
    Ok(())
}

/// Writes an `(offset, length)` descriptor. Both fit in 32 bits once `grow` succeeded.
fn write_descriptor(buf: &mut [u8], slot: usize, offset: usize, len: usize) {
    let packed = pack_offset_and_size(offset as u32, len as u32);
    buf[slot..slot + WORD_SIZE].copy_from_slice(&packed.to_le_bytes());
}

fn write_fixed(array: &dyn Array, row: usize, slot: &mut [u8]) -> Result<()> {
    match array.data_type() {
        DataType::Boolean => slot[0] = u8::from(array.as_boolean().value(row)),
        DataType::Int8 => put_primitive!(slot, array, row, Int8Type),
        DataType::Int16 => put_primitive!(slot, array, row, Int16Type),
        DataType::Int32 => put_primitive!(slot, array, row, Int32Type),
        DataType::Int64 => put_primitive!(slot, array, row, Int64Type),
        DataType::Float32 => put_primitive!(slot, array, row, Float32Type),
        DataType::Float64 => put_primitive!(slot, array, row, Float64Type),
        DataType::Date32 => put_primitive!(slot, array, row, Date32Type),
        DataType::Date64 => put_primitive!(slot, array, row, Date64Type),
        DataType::Timestamp(TimeUnit::Second, _) => {
            put_primitive!(slot, array, row, TimestampSecondType);
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            put_primitive!(slot, array, row, TimestampMillisecondType);
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            put_primitive!(slot, array, row, TimestampMicrosecondType);
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            put_primitive!(slot, array, row, TimestampNanosecondType);
        }
        DataType::Decimal128(precision, _) => {
            // Arrow does not enforce precision, so the value may not fit the slot.
            let unscaled = array.as_primitive::<Decimal128Type>().value(row);
            let value = i64::try_from(unscaled).map_err(|_| ColumnarError::DecimalOverflow {
                value: unscaled,
                precision: *precision,
            })?;
            slot.copy_from_slice(&value.to_le_bytes());
        }
        other => return Err(unsupported(other)),
    }
    Ok(())
}

fn variable_bytes(array: &dyn Array, row: usize) -> Result<&[u8]> {
    Ok(match array.data_type() {
        DataType::Utf8 => array.as_string::<i32>().value(row).as_bytes(),
        DataType::LargeUtf8 => array.as_string::<i64>().value(row).as_bytes(),
        DataType::Binary => array.as_binary::<i32>().value(row),
        DataType::LargeBinary => array.as_binary::<i64>().value(row),
        other => return Err(unsupported(other)),
    })
}

fn unsupported(data_type: &DataType) -> ColumnarError {
    ColumnarError::UnsupportedType {
        column: String::new(),
        data_type: data_type.to_string(),
    }
}
