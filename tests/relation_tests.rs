//! Integration tests for the sorted relation cursor.

use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use columnar_runtime::relation::{
    BatchId, BatchLength, BatchSource, ItemIndex, LazyBatchIterator, RelationColumn, SortRelation,
};
use proptest::prelude::*;

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("k", DataType::Int64, true),
        Field::new("p", DataType::Int64, true),
    ]))
}

fn batch(keys: &[i64]) -> RecordBatch {
    let k = Arc::new(Int64Array::from(keys.to_vec())) as ArrayRef;
    let p = Arc::new(Int64Array::from_iter_values(keys.iter().map(|k| k * 10))) as ArrayRef;
    RecordBatch::try_new(schema(), vec![k, p]).unwrap()
}

fn relation(batches: Vec<RecordBatch>) -> SortRelation<LazyBatchIterator> {
    let source = LazyBatchIterator::from_batches(batches);
    SortRelation::try_from_schema(source, &schema(), &["k"], &["p"]).unwrap()
}

/// Splits `keys` into batches at the given cut points.
fn partition(keys: &[i64], cuts: &[usize]) -> Vec<RecordBatch> {
    let mut batches = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        batches.push(batch(&keys[start..cut]));
        start = cut;
    }
    batches.push(batch(&keys[start..]));
    batches
}

/// Physical position of logical row `offset`, computed from batch lengths alone.
fn replay(lengths: &[usize], offset: usize) -> Option<ItemIndex> {
    let mut remaining = offset;
    for (batch_id, &len) in lengths.iter().enumerate() {
        if remaining < len {
            return Some(ItemIndex::new(batch_id, remaining));
        }
        remaining -= len;
    }
    None
}

/// Source with scripted lengths that counts release calls.
#[derive(Debug, Default)]
struct ScriptedSource {
    lengths: Vec<BatchLength>,
    released: Vec<BatchId>,
}

impl BatchSource for ScriptedSource {
    fn row_count_of_batch(&mut self, batch_id: BatchId) -> BatchLength {
        self.lengths
            .get(batch_id)
            .copied()
            .unwrap_or(BatchLength::Exhausted)
    }

    fn batch(&self, _batch_id: BatchId) -> Option<&RecordBatch> {
        None
    }

    fn release_batch(&mut self, batch_id: BatchId) {
        self.released.push(batch_id);
    }
}

// =============================================================================
// Key Group Tests
// =============================================================================

mod key_group_tests {
    use super::*;

    const KEYS: [i64; 6] = [1, 1, 2, 2, 2, 3];

    fn ranges_at_group_starts(mut rel: SortRelation<LazyBatchIterator>) -> Vec<(u64, usize)> {
        let mut out = Vec::new();
        loop {
            out.push((rel.offset(), rel.same_key_range()));
            if !rel.next_new_key() {
                break;
            }
        }
        out
    }

    #[test]
    fn test_groups_across_batches() {
        let rel = relation(partition(&KEYS, &[3]));
        assert_eq!(ranges_at_group_starts(rel), vec![(0, 2), (2, 3), (5, 1)]);
    }

    #[test]
    fn test_groups_for_every_two_way_partition() {
        for cut in 0..=KEYS.len() {
            let rel = relation(partition(&KEYS, &[cut]));
            assert_eq!(
                ranges_at_group_starts(rel),
                vec![(0, 2), (2, 3), (5, 1)],
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn test_groups_one_row_per_batch() {
        let rel = relation(partition(&KEYS, &[1, 2, 3, 4, 5]));
        assert_eq!(ranges_at_group_starts(rel), vec![(0, 2), (2, 3), (5, 1)]);
    }

    #[test]
    fn test_long_group_over_many_single_row_batches() {
        let keys = vec![7; 2000];
        let cuts: Vec<usize> = (1..keys.len()).collect();
        let mut rel = relation(partition(&keys, &cuts));
        assert_eq!(rel.same_key_range(), 2000);
        rel.advance(1500);
        assert_eq!(rel.same_key_range(), 500);
        assert!(!rel.next_new_key());
    }

    #[test]
    fn test_range_recomputed_after_next() {
        let mut rel = relation(partition(&KEYS, &[3]));
        assert_eq!(rel.same_key_range(), 2);
        assert!(rel.next_row());
        assert_eq!(rel.same_key_range(), 1);
        assert!(rel.next_row());
        assert_eq!(rel.same_key_range(), 3);
        assert_eq!(rel.same_key_range(), 3);
    }

    #[test]
    fn test_null_keys_form_a_group() {
        let k = Arc::new(Int64Array::from(vec![None, None, Some(1)])) as ArrayRef;
        let p = Arc::new(Int64Array::from(vec![0, 1, 2])) as ArrayRef;
        let b = RecordBatch::try_new(schema(), vec![k, p]).unwrap();
        let mut rel = relation(vec![b]);
        assert_eq!(rel.same_key_range(), 2);
    }

    #[test]
    fn test_multiple_key_columns_short_circuit() {
        let k = Arc::new(Int64Array::from(vec![1, 1, 1])) as ArrayRef;
        let p = Arc::new(Int64Array::from(vec![5, 5, 6])) as ArrayRef;
        let b = RecordBatch::try_new(schema(), vec![k, p]).unwrap();
        let source = LazyBatchIterator::from_batches(vec![b]);
        let mut rel = SortRelation::try_from_schema(source, &schema(), &["k", "p"], &[]).unwrap();
        assert_eq!(rel.same_key_range(), 2);
        assert!(rel.next_new_key());
        assert_eq!(rel.same_key_range(), 1);
    }

    #[test]
    fn test_range_limited_to_available_data() {
        let (tx, source) = LazyBatchIterator::channel();
        let mut rel = SortRelation::try_from_schema(source, &schema(), &["k"], &["p"]).unwrap();
        tx.unbounded_send(Ok(batch(&[4, 4]))).unwrap();
        assert_eq!(rel.same_key_range(), 2);
        // The group may continue in a batch that is still pending.
        assert!(!rel.next_new_key());
        assert_eq!(rel.offset(), 0);

        tx.unbounded_send(Ok(batch(&[4, 5]))).unwrap();
        // Cached until the cursor moves.
        assert_eq!(rel.same_key_range(), 2);
        assert!(rel.next_row());
        assert_eq!(rel.same_key_range(), 2);
        assert!(rel.next_new_key());
        assert_eq!(rel.offset(), 3);
        assert_eq!(rel.position(), ItemIndex::new(1, 1));
    }
}

// =============================================================================
// Range Bound Tests
// =============================================================================

mod range_bound_tests {
    use super::*;

    fn scripted(lengths: Vec<BatchLength>) -> SortRelation<ScriptedSource> {
        let source = ScriptedSource {
            lengths,
            released: Vec::new(),
        };
        SortRelation::new(source, Vec::new(), Vec::new())
    }

    #[test]
    fn test_pending_batch_fails_check() {
        let mut rel = scripted(vec![
            BatchLength::Known(2),
            BatchLength::Pending,
            BatchLength::Known(5),
        ]);
        assert!(rel.check_range_bound(1));
        assert!(!rel.check_range_bound(2));
        assert!(!rel.check_range_bound(6));
        assert_eq!(rel.position(), ItemIndex::new(0, 0));
        assert_eq!(rel.offset(), 0);
    }

    #[test]
    fn test_pending_first_batch() {
        let mut rel = scripted(vec![BatchLength::Pending]);
        assert!(!rel.check_range_bound(0));
        assert!(!rel.next_row());
        assert_eq!(rel.same_key_range(), 0);
    }

    #[test]
    fn test_exhausted_after_last_row() {
        let mut rel = scripted(vec![BatchLength::Known(1), BatchLength::Known(0)]);
        assert!(rel.check_range_bound(0));
        assert!(!rel.check_range_bound(1));
        assert!(!rel.next_row());
    }

    #[test]
    fn test_advance_releases_in_increasing_order() {
        let mut rel = scripted(vec![
            BatchLength::Known(1),
            BatchLength::Known(0),
            BatchLength::Known(2),
            BatchLength::Known(3),
        ]);
        assert!(rel.check_range_bound(3));
        rel.advance(3);
        assert_eq!(rel.position(), ItemIndex::new(3, 0));
        assert_eq!(rel.source().released, vec![0, 1, 2]);

        assert!(rel.next_row());
        assert_eq!(rel.source().released, vec![0, 1, 2]);
    }

    #[test]
    fn test_release_before_fetch_does_not_corrupt() {
        let mut rel = relation(vec![batch(&[1, 2]), batch(&[3])]);
        rel.release_array(1);
        rel.release_array(1);
        assert!(rel.check_range_bound(2));
        assert!(rel.next_row());
        assert!(rel.next_row());
        let p = rel.typed_column::<Int64Array>(0).unwrap();
        assert_eq!(p.array(1).unwrap().value(0), 30);
    }

    #[test]
    fn test_custom_columns() {
        let keys = vec![RelationColumn::new("k", 0, DataType::Int64)];
        let payloads = vec![RelationColumn::new("p", 1, DataType::Int64)];
        let source = LazyBatchIterator::from_batches(vec![batch(&[8, 8, 9])]);
        let mut rel = SortRelation::new(source, keys, payloads);
        assert_eq!(rel.same_key_range(), 2);
        assert_eq!(rel.column(0).name(), "p");
        assert_eq!(rel.key_column(0).field_index(), 0);
    }
}

// =============================================================================
// Property Tests
// =============================================================================

fn lengths_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..5, 0..8)
}

#[derive(Debug, Clone)]
enum Step {
    Next,
    NextNewKey,
    Advance(usize),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Next),
        Just(Step::NextNewKey),
        (0usize..6).prop_map(Step::Advance),
    ]
}

proptest! {
    #[test]
    fn prop_position_matches_replay(
        lengths in lengths_strategy(),
        steps in prop::collection::vec(step_strategy(), 0..20),
    ) {
        let total: usize = lengths.iter().sum();
        // Sorted keys with small groups.
        let keys: Vec<i64> = (0..total).map(|i| (i / 2) as i64).collect();
        let mut cuts = Vec::new();
        let mut acc = 0;
        for len in &lengths[..lengths.len().saturating_sub(1)] {
            acc += len;
            cuts.push(acc);
        }
        let batches = if lengths.is_empty() { Vec::new() } else { partition(&keys, &cuts) };
        let mut rel = relation(batches);

        for step in steps {
            let before = rel.offset();
            match step {
                Step::Next => {
                    let moved = rel.next_row();
                    prop_assert_eq!(moved, (before as usize) + 1 < total);
                }
                Step::NextNewKey => {
                    let _ = rel.next_new_key();
                }
                Step::Advance(shift) => {
                    if rel.check_range_bound(shift) {
                        rel.advance(shift);
                        prop_assert_eq!(rel.offset(), before + shift as u64);
                    } else {
                        prop_assert_eq!(rel.offset(), before);
                    }
                }
            }

            let offset = rel.offset() as usize;
            let expected = replay(&lengths, offset);
            prop_assert_eq!(rel.check_range_bound(0), expected.is_some());
            if let Some(expected) = expected {
                prop_assert_eq!(rel.item_index_with_shift(0), expected);
                let range = rel.same_key_range();
                prop_assert_eq!(range, rel.same_key_range());
                let key = keys[offset];
                let group = keys[offset..].iter().take_while(|k| **k == key).count();
                prop_assert_eq!(range, group);
            }
        }
    }

    #[test]
    fn prop_range_check_never_moves(
        lengths in lengths_strategy(),
        shift in 0usize..30,
    ) {
        let scripted: Vec<BatchLength> = lengths.iter().map(|&n| BatchLength::Known(n)).collect();
        let total: usize = lengths.iter().sum();
        let source = ScriptedSource { lengths: scripted, released: Vec::new() };
        let mut rel = SortRelation::new(source, Vec::new(), Vec::new());

        let position = rel.position();
        prop_assert_eq!(rel.check_range_bound(shift), shift < total);
        prop_assert_eq!(rel.position(), position);
        prop_assert_eq!(rel.offset(), 0);
        prop_assert!(rel.source().released.is_empty());
    }
}
