//! columnar-runtime - runtime support for a native columnar query engine.
//!
//! Two independent pieces used by generated operator code:
//!
//! - [`relation`]: a forward cursor over a sorted relation delivered as a
//!   sequence of Arrow batches, with key-group detection and eager release of
//!   consumed batches, for merge joins and sort aggregation.
//! - [`row`]: an encoder from Arrow batches to Spark `UnsafeRow`s, plus the
//!   matching decoder.

pub mod error;
pub mod relation;
pub mod row;

pub use error::{ColumnarError, Result};
pub use relation::{BatchLength, BatchSource, ItemIndex, LazyBatchIterator, SortRelation};
pub use row::{RowWriterConfig, UnsafeRowReader, UnsafeRowWriter};
