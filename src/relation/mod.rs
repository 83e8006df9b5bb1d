//! Sorted relation cursor.
//!
//! This module lets merge-style operators walk a relation that arrives as a
//! sequence of sorted Arrow batches as if it were one table. Batches are
//! pulled lazily from a [`BatchSource`] and released as soon as the cursor
//! has moved past them.

mod batch_source;
mod column;
mod sort_relation;

pub use batch_source::{BatchId, BatchLength, BatchSender, BatchSource, LazyBatchIterator};
pub use column::{RelationColumn, TypedColumn};
pub use sort_relation::{ItemIndex, SortRelation};
