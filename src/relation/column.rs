//! Batch-aware relation columns.

use std::collections::HashMap;
use std::marker::PhantomData;

use arrow::array::{make_comparator, new_empty_array, Array, ArrayRef, DynComparator};
use arrow::compute::SortOptions;
use arrow::datatypes::DataType;

use super::batch_source::BatchId;
use crate::error::{ColumnarError, Result};

/// One column of a sorted relation, holding one array per live batch.
///
/// Arrays are loaded by the owning relation as batches are discovered and
/// dropped by [`RelationColumn::release_batch`] once the cursor has moved past
/// them.
#[derive(Debug, Clone)]
pub struct RelationColumn {
    name: String,
    /// Index of this column in each incoming batch.
    field_index: usize,
    data_type: DataType,
    arrays: HashMap<BatchId, ArrayRef>,
}

impl RelationColumn {
    /// Creates an empty column reading field `field_index` of every batch.
    pub fn new(name: impl Into<String>, field_index: usize, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            field_index,
            data_type,
            arrays: HashMap::new(),
        }
    }

    /// Returns the column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the field index within incoming batches.
    #[must_use]
    pub fn field_index(&self) -> usize {
        self.field_index
    }

    /// Returns the declared data type.
    #[must_use]
    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    /// Stores the array for `batch_id`, replacing any previous one.
    pub fn load_batch(&mut self, batch_id: BatchId, array: ArrayRef) {
        self.arrays.insert(batch_id, array);
    }

    /// Drops the array for `batch_id`. No-op if absent.
    pub fn release_batch(&mut self, batch_id: BatchId) {
        self.arrays.remove(&batch_id);
    }

    /// Returns the array for `batch_id` if it is loaded.
    #[must_use]
    pub fn array(&self, batch_id: BatchId) -> Option<&ArrayRef> {
        self.arrays.get(&batch_id)
    }

    /// Number of batches currently held.
    #[must_use]
    pub fn num_loaded(&self) -> usize {
        self.arrays.len()
    }

    /// Returns true if `row_a` of batch `batch_a` equals `row_b` of batch `batch_b`.
    ///
    /// Two nulls compare equal. Returns false if either batch is not loaded.
    #[must_use]
    pub fn is_equal_to(
        &self,
        batch_a: BatchId,
        row_a: usize,
        batch_b: BatchId,
        row_b: usize,
    ) -> bool {
        self.comparator(batch_a, batch_b).is_some_and(|cmp| cmp(row_a, row_b).is_eq())
    }

    /// Builds a comparator between rows of `batch_a` (left) and `batch_b` (right).
    ///
    /// Returns `None` if either batch is not loaded.
    #[must_use]
    pub fn comparator(&self, batch_a: BatchId, batch_b: BatchId) -> Option<DynComparator> {
        let left = self.arrays.get(&batch_a)?;
        let right = self.arrays.get(&batch_b)?;
        make_comparator(left.as_ref(), right.as_ref(), SortOptions::default()).ok()
    }

    /// Returns a view of this column as the concrete array type `A`.
    ///
    /// # Errors
    ///
    /// Returns `TypeError` if the column's data type is not represented by `A`.
    pub fn typed<A: Array + 'static>(&self) -> Result<TypedColumn<'_, A>> {
        let empty = new_empty_array(&self.data_type);
        if empty.as_any().downcast_ref::<A>().is_none() {
            return Err(ColumnarError::TypeError {
                expected: std::any::type_name::<A>().to_string(),
                actual: self.data_type.to_string(),
            });
        }
        Ok(TypedColumn {
            column: self,
            _marker: PhantomData,
        })
    }
}

/// Checked view of a [`RelationColumn`] as a concrete Arrow array type.
#[derive(Debug)]
pub struct TypedColumn<'a, A> {
    column: &'a RelationColumn,
    _marker: PhantomData<fn() -> A>,
}

impl<'a, A: Array + 'static> TypedColumn<'a, A> {
    /// Returns the typed array for `batch_id` if it is loaded.
    #[must_use]
    pub fn array(&self, batch_id: BatchId) -> Option<&'a A> {
        self.column
            .arrays
            .get(&batch_id)
            .and_then(|array| array.as_any().downcast_ref::<A>())
    }

    /// Returns true if the value at `(batch_id, row)` is null or not loaded.
    #[must_use]
    pub fn is_null(&self, batch_id: BatchId, row: usize) -> bool {
        self.array(batch_id).map_or(true, |array| array.is_null(row))
    }

    /// Returns the underlying column.
    #[must_use]
    pub fn column(&self) -> &'a RelationColumn {
        self.column
    }
}
