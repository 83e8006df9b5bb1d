//! `UnsafeRow` to columnar batch decoder.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BinaryArray, BooleanArray, Decimal128Array, LargeBinaryArray, LargeStringArray,
    PrimitiveArray, StringArray,
};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Date32Type, Date64Type, Float32Type, Float64Type, Int16Type,
    Int32Type, Int64Type, Int8Type, SchemaRef, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType,
};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};

use super::layout::{
    decimal_from_be_bytes, is_null, unpack_offset_and_size, RowLayout, SlotKind,
    WIDE_DECIMAL_SIZE, WORD_SIZE,
};
use crate::error::{ColumnarError, Result};

/// Decodes `UnsafeRow`s back into a record batch of a known schema.
#[derive(Debug, Clone)]
pub struct UnsafeRowReader {
    schema: SchemaRef,
    layout: RowLayout,
}

impl UnsafeRowReader {
    /// Creates a reader for rows encoded from batches of `schema`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedType` if a field has no row encoding.
    pub fn try_new(schema: SchemaRef) -> Result<Self> {
        let layout = RowLayout::try_new(&schema)?;
        Ok(Self { schema, layout })
    }

    #[must_use]
    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    /// Decodes `rows` into one record batch, preserving row order.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRow` if a row is too short, not 8-byte aligned, points
    /// outside itself, or holds invalid UTF-8 in a string column.
    pub fn read<'a, I>(&self, rows: I) -> Result<RecordBatch>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let rows: Vec<&[u8]> = rows.into_iter().collect();
        for (idx, row) in rows.iter().enumerate() {
            self.validate(idx, row)?;
        }

        let columns = self
            .schema
            .fields()
            .iter()
            .enumerate()
            .map(|(col, field)| self.decode_column(&rows, col, field.data_type()))
            .collect::<Result<Vec<_>>>()?;

        let options = RecordBatchOptions::new().with_row_count(Some(rows.len()));
        Ok(RecordBatch::try_new_with_options(
            self.schema.clone(),
            columns,
            &options,
        )?)
    }

    fn validate(&self, idx: usize, row: &[u8]) -> Result<()> {
        if row.len() < self.layout.fixed_size() {
            return Err(malformed(
                idx,
                format!(
                    "{} bytes is shorter than the {} byte fixed region",
                    row.len(),
                    self.layout.fixed_size()
                ),
            ));
        }
        if row.len() % WORD_SIZE != 0 {
            return Err(malformed(idx, format!("length {} is not 8-byte aligned", row.len())));
        }
        Ok(())
    }

    fn slot(&self, row: &[u8], col: usize) -> [u8; WORD_SIZE] {
        let offset = self.layout.slot_offset(col);
        let mut slot = [0u8; WORD_SIZE];
        slot.copy_from_slice(&row[offset..offset + WORD_SIZE]);
        slot
    }

    /// Returns the variable-length bytes of a non-null value.
    fn variable<'r>(&self, idx: usize, row: &'r [u8], col: usize) -> Result<&'r [u8]> {
        let (offset, size) = unpack_offset_and_size(u64::from_le_bytes(self.slot(row, col)));
        let (offset, size) = (offset as usize, size as usize);
        if offset < self.layout.fixed_size() || offset + size > row.len() {
            return Err(malformed(
                idx,
                format!("column {col} points to [{offset}, {}) outside the row", offset + size),
            ));
        }
        Ok(&row[offset..offset + size])
    }

    fn primitive<T: ArrowPrimitiveType>(
        &self,
        rows: &[&[u8]],
        col: usize,
        decode: impl Fn([u8; WORD_SIZE]) -> T::Native,
    ) -> PrimitiveArray<T> {
        rows.iter()
            .map(|row| (!is_null(row, col)).then(|| decode(self.slot(row, col))))
            .collect()
    }

    fn variable_column<'r>(&self, rows: &[&'r [u8]], col: usize) -> Result<Vec<Option<&'r [u8]>>> {
        rows.iter()
            .enumerate()
            .map(|(idx, row)| {
                if is_null(row, col) {
                    Ok(None)
                } else {
                    self.variable(idx, row, col).map(Some)
                }
            })
            .collect()
    }

    fn string_column<'r>(&self, rows: &[&'r [u8]], col: usize) -> Result<Vec<Option<&'r str>>> {
        self.variable_column(rows, col)?
            .into_iter()
            .enumerate()
            .map(|(idx, bytes)| {
                bytes
                    .map(|b| {
                        std::str::from_utf8(b)
                            .map_err(|e| malformed(idx, format!("column {col}: {e}")))
                    })
                    .transpose()
            })
            .collect()
    }

    fn decode_column(&self, rows: &[&[u8]], col: usize, data_type: &DataType) -> Result<ArrayRef> {
        let array: ArrayRef = match (self.layout.kind(col), data_type) {
            (SlotKind::Fixed(_), DataType::Boolean) => Arc::new(
                rows.iter()
                    .map(|row| (!is_null(row, col)).then(|| self.slot(row, col)[0] != 0))
                    .collect::<BooleanArray>(),
            ),
            (SlotKind::Fixed(_), DataType::Int8) => {
                Arc::new(self.primitive::<Int8Type>(rows, col, |s| s[0] as i8))
            }
            (SlotKind::Fixed(_), DataType::Int16) => Arc::new(
                self.primitive::<Int16Type>(rows, col, |s| i16::from_le_bytes([s[0], s[1]])),
            ),
            (SlotKind::Fixed(_), DataType::Int32) => {
                Arc::new(self.primitive::<Int32Type>(rows, col, low_i32))
            }
            (SlotKind::Fixed(_), DataType::Date32) => {
                Arc::new(self.primitive::<Date32Type>(rows, col, low_i32))
            }
            (SlotKind::Fixed(_), DataType::Float32) => {
                Arc::new(self.primitive::<Float32Type>(rows, col, |s| {
                    f32::from_le_bytes([s[0], s[1], s[2], s[3]])
                }))
            }
            (SlotKind::Fixed(_), DataType::Int64) => {
                Arc::new(self.primitive::<Int64Type>(rows, col, i64::from_le_bytes))
            }
            (SlotKind::Fixed(_), DataType::Date64) => {
                Arc::new(self.primitive::<Date64Type>(rows, col, i64::from_le_bytes))
            }
            (SlotKind::Fixed(_), DataType::Float64) => {
                Arc::new(self.primitive::<Float64Type>(rows, col, f64::from_le_bytes))
            }
            (SlotKind::Fixed(_), DataType::Timestamp(unit, _)) => match unit {
                TimeUnit::Second => Arc::new(
                    self.primitive::<TimestampSecondType>(rows, col, i64::from_le_bytes)
                        .with_data_type(data_type.clone()),
                ),
                TimeUnit::Millisecond => Arc::new(
                    self.primitive::<TimestampMillisecondType>(rows, col, i64::from_le_bytes)
                        .with_data_type(data_type.clone()),
                ),
                TimeUnit::Microsecond => Arc::new(
                    self.primitive::<TimestampMicrosecondType>(rows, col, i64::from_le_bytes)
                        .with_data_type(data_type.clone()),
                ),
                TimeUnit::Nanosecond => Arc::new(
                    self.primitive::<TimestampNanosecondType>(rows, col, i64::from_le_bytes)
                        .with_data_type(data_type.clone()),
                ),
            },
            (SlotKind::Fixed(_), DataType::Decimal128(precision, scale)) => Arc::new(
                rows.iter()
                    .map(|row| {
                        (!is_null(row, col))
                            .then(|| i128::from(i64::from_le_bytes(self.slot(row, col))))
                    })
                    .collect::<Decimal128Array>()
                    .with_precision_and_scale(*precision, *scale)?,
            ),
            (SlotKind::WideDecimal, DataType::Decimal128(precision, scale)) => {
                let values = self
                    .variable_column(rows, col)?
                    .into_iter()
                    .enumerate()
                    .map(|(idx, bytes)| match bytes {
                        Some(b) if b.is_empty() || b.len() > WIDE_DECIMAL_SIZE => Err(malformed(
                            idx,
                            format!("column {col}: decimal of {} bytes", b.len()),
                        )),
                        Some(b) => Ok(Some(decimal_from_be_bytes(b))),
                        None => Ok(None),
                    })
                    .collect::<Result<Decimal128Array>>()?;
                Arc::new(values.with_precision_and_scale(*precision, *scale)?)
            }
            (SlotKind::Variable, DataType::Utf8) => {
                Arc::new(StringArray::from(self.string_column(rows, col)?))
            }
            (SlotKind::Variable, DataType::LargeUtf8) => {
                Arc::new(LargeStringArray::from(self.string_column(rows, col)?))
            }
            (SlotKind::Variable, DataType::Binary) => {
                Arc::new(BinaryArray::from(self.variable_column(rows, col)?))
            }
            (SlotKind::Variable, DataType::LargeBinary) => {
                Arc::new(LargeBinaryArray::from(self.variable_column(rows, col)?))
            }
            (_, other) => {
                return Err(ColumnarError::UnsupportedType {
                    column: self.schema.field(col).name().clone(),
                    data_type: other.to_string(),
                })
            }
        };
        Ok(array)
    }
}

fn low_i32(slot: [u8; WORD_SIZE]) -> i32 {
    i32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]])
}

fn malformed(row: usize, message: String) -> ColumnarError {
    ColumnarError::MalformedRow { row, message }
}
