//! Forward cursor over a sorted, batched relation.

use arrow::array::{Array, DynComparator};
use arrow::datatypes::Schema;

use super::batch_source::{BatchId, BatchLength, BatchSource};
use super::column::{RelationColumn, TypedColumn};
use crate::error::{ColumnarError, Result};

/// Physical position of a row: batch id and row index within that batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemIndex {
    pub batch_id: BatchId,
    pub row: usize,
}

impl ItemIndex {
    #[must_use]
    pub fn new(batch_id: BatchId, row: usize) -> Self {
        Self { batch_id, row }
    }
}

/// Outcome of walking forward from the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Located {
    At(ItemIndex),
    /// A batch on the way was not known yet.
    Blocked(BatchLength),
}

/// Cursor over a relation that arrives as a sequence of sorted batches.
///
/// The relation is logically the concatenation of all batches. The cursor only
/// moves forward; batches it has moved past are released from every column and
/// from the source immediately.
///
/// # Example
///
/// ```ignore
/// let mut rel = SortRelation::try_from_schema(source, &schema, &["k"], &["v"])?;
/// while rel.check_range_bound(0) {
///     let group = rel.same_key_range();
///     // ... consume `group` rows via item_index_with_shift ...
///     if !rel.next_new_key() {
///         break;
///     }
/// }
/// ```
#[derive(Debug)]
pub struct SortRelation<S> {
    source: S,
    keys: Vec<RelationColumn>,
    payloads: Vec<RelationColumn>,
    /// Logical offset: rows consumed since creation.
    offset: u64,
    requested_batches: BatchId,
    offset_in_current_batch: usize,
    /// Batches `< loaded_batches` have been handed to the columns.
    loaded_batches: BatchId,
    range_cache: Option<usize>,
}

impl<S: BatchSource> SortRelation<S> {
    /// Creates a cursor positioned at the first row of the relation.
    pub fn new(source: S, keys: Vec<RelationColumn>, payloads: Vec<RelationColumn>) -> Self {
        Self {
            source,
            keys,
            payloads,
            offset: 0,
            requested_batches: 0,
            offset_in_current_batch: 0,
            loaded_batches: 0,
            range_cache: None,
        }
    }

    /// Creates a cursor whose key and payload columns are looked up by name.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if a name is not a field of `schema`.
    pub fn try_from_schema(
        source: S,
        schema: &Schema,
        key_names: &[&str],
        payload_names: &[&str],
    ) -> Result<Self> {
        let resolve = |names: &[&str]| -> Result<Vec<RelationColumn>> {
            names
                .iter()
                .map(|name| {
                    let index = schema.index_of(name).map_err(|_| {
                        ColumnarError::SchemaError(format!("Column '{name}' not found"))
                    })?;
                    let field = schema.field(index);
                    Ok(RelationColumn::new(*name, index, field.data_type().clone()))
                })
                .collect()
        };
        let keys = resolve(key_names)?;
        let payloads = resolve(payload_names)?;
        Ok(Self::new(source, keys, payloads))
    }

    /// Logical offset of the cursor.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Current physical position, `(requested_batches, offset_in_current_batch)`.
    ///
    /// This may point past the end of an empty or fully consumed batch; use
    /// [`Self::item_index_with_shift`] with shift 0 for the current row.
    #[must_use]
    pub fn position(&self) -> ItemIndex {
        ItemIndex::new(self.requested_batches, self.offset_in_current_batch)
    }

    #[must_use]
    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn num_payloads(&self) -> usize {
        self.payloads.len()
    }

    /// Returns the underlying batch source.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Releases `batch_id` from every key and payload column and from the source.
    pub fn release_array(&mut self, batch_id: BatchId) {
        tracing::trace!(batch_id, "releasing batch");
        for col in self.keys.iter_mut().chain(self.payloads.iter_mut()) {
            col.release_batch(batch_id);
        }
        self.source.release_batch(batch_id);
    }

    /// Releases every batch still held, for consumption that stops early.
    pub fn release_remaining(&mut self) {
        for batch_id in self.requested_batches..self.loaded_batches {
            self.release_array(batch_id);
        }
    }

    /// Returns true if the row `shift` positions ahead of the cursor is available.
    ///
    /// Never blocks and never moves the cursor.
    pub fn check_range_bound(&mut self, shift: usize) -> bool {
        matches!(self.locate(shift), Located::At(_))
    }

    /// Returns the physical position `shift` rows ahead of the cursor.
    ///
    /// The caller must have checked [`Self::check_range_bound`] for `shift`.
    /// Otherwise the returned index does not name a real row.
    pub fn item_index_with_shift(&mut self, shift: usize) -> ItemIndex {
        let located = self.locate(shift);
        debug_assert!(
            matches!(located, Located::At(_)),
            "lookahead of {shift} rows past available data"
        );
        match located {
            Located::At(index) => index,
            Located::Blocked(_) => self.position(),
        }
    }

    /// Moves the cursor `shift` rows forward, releasing every batch left behind.
    ///
    /// The caller must have checked [`Self::check_range_bound`] for `shift`. An
    /// unchecked advance into unavailable data leaves the cursor where it is.
    pub fn advance(&mut self, shift: usize) {
        let located = self.locate(shift);
        debug_assert!(
            matches!(located, Located::At(_)),
            "advance of {shift} rows blocked: {located:?}"
        );
        let Located::At(target) = located else {
            return;
        };
        for batch_id in self.requested_batches..target.batch_id {
            self.release_array(batch_id);
        }
        self.requested_batches = target.batch_id;
        self.offset_in_current_batch = target.row;
        self.offset += shift as u64;
        self.range_cache = None;
    }

    /// Moves to the next row. Returns false without moving if it is not available.
    pub fn next_row(&mut self) -> bool {
        if !self.check_range_bound(1) {
            return false;
        }
        self.advance(1);
        true
    }

    /// Moves past the current key group to the first row of the next one.
    ///
    /// Returns false without moving if the row after the group is not available.
    pub fn next_new_key(&mut self) -> bool {
        let range = self.same_key_range();
        if range == 0 || !self.check_range_bound(range) {
            return false;
        }
        self.advance(range);
        true
    }

    /// Number of consecutive rows, starting at the current one, whose keys all
    /// equal the current row's keys.
    ///
    /// The count only covers rows available right now. It is cached until the
    /// cursor moves. Returns 0 if there is no current row.
    pub fn same_key_range(&mut self) -> usize {
        if let Some(range) = self.range_cache {
            return range;
        }
        let Located::At(first) = self.locate(0) else {
            return 0;
        };
        // One comparator per key column, rebuilt only when the batch pair changes.
        let mut comparators: Vec<Option<(BatchId, BatchId, DynComparator)>> =
            (0..self.keys.len()).map(|_| None).collect();
        let mut prev = first;
        let mut range = 1;
        while let Located::At(next) = self.step(prev) {
            let mut same = true;
            for (col, slot) in self.keys.iter().zip(comparators.iter_mut()) {
                let stale = !matches!(
                    slot,
                    Some((a, b, _)) if *a == prev.batch_id && *b == next.batch_id
                );
                if stale {
                    *slot = col
                        .comparator(prev.batch_id, next.batch_id)
                        .map(|cmp| (prev.batch_id, next.batch_id, cmp));
                }
                let equal = slot
                    .as_ref()
                    .is_some_and(|(_, _, cmp)| cmp(prev.row, next.row).is_eq());
                if !equal {
                    same = false;
                    break;
                }
            }
            if !same {
                break;
            }
            prev = next;
            range += 1;
        }
        self.range_cache = Some(range);
        range
    }

    /// Returns the payload column at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.num_payloads()`.
    #[must_use]
    pub fn column(&self, index: usize) -> &RelationColumn {
        &self.payloads[index]
    }

    /// Returns the payload column at `index` viewed as array type `A`.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` for an out-of-range index and `TypeError` if the
    /// column is not of type `A`.
    pub fn typed_column<A: Array + 'static>(&self, index: usize) -> Result<TypedColumn<'_, A>> {
        self.payloads
            .get(index)
            .ok_or_else(|| {
                ColumnarError::SchemaError(format!(
                    "Payload column {index} out of range ({} columns)",
                    self.payloads.len()
                ))
            })?
            .typed::<A>()
    }

    /// Returns the key column at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.num_keys()`.
    #[must_use]
    pub fn key_column(&self, index: usize) -> &RelationColumn {
        &self.keys[index]
    }

    fn batch_length(&mut self, batch_id: BatchId) -> BatchLength {
        let length = self.source.row_count_of_batch(batch_id);
        if matches!(length, BatchLength::Known(_)) {
            self.load_through(batch_id);
        }
        length
    }

    /// Hands every batch up to and including `batch_id` to the columns.
    fn load_through(&mut self, batch_id: BatchId) {
        while self.loaded_batches <= batch_id {
            let id = self.loaded_batches;
            if let Some(batch) = self.source.batch(id) {
                tracing::trace!(batch_id = id, rows = batch.num_rows(), "loading batch");
                for col in self.keys.iter_mut().chain(self.payloads.iter_mut()) {
                    if let Some(array) = batch.columns().get(col.field_index()) {
                        col.load_batch(id, array.clone());
                    }
                }
            }
            self.loaded_batches += 1;
        }
    }

    /// Walks `shift` rows forward from the cursor without moving it.
    fn locate(&mut self, shift: usize) -> Located {
        let Some(remaining) = self.offset_in_current_batch.checked_add(shift) else {
            return Located::Blocked(BatchLength::Exhausted);
        };
        self.walk(self.requested_batches, remaining)
    }

    /// Position of the row right after `index`, which must name a real row.
    fn step(&mut self, index: ItemIndex) -> Located {
        self.walk(index.batch_id, index.row + 1)
    }

    /// Resolves row `remaining` counted from the start of `batch_id`.
    fn walk(&mut self, mut batch_id: BatchId, mut remaining: usize) -> Located {
        loop {
            match self.batch_length(batch_id) {
                BatchLength::Known(len) if remaining < len => {
                    return Located::At(ItemIndex::new(batch_id, remaining));
                }
                BatchLength::Known(len) => {
                    remaining -= len;
                    batch_id += 1;
                }
                blocked => return Located::Blocked(blocked),
            }
        }
    }
}
