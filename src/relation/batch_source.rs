//! Lazily materialized batch sources.

use std::collections::HashMap;
use std::pin::Pin;

use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use futures::channel::mpsc;
use futures::{FutureExt, Stream, StreamExt};

/// Identifier of a batch, assigned in arrival order starting at 0.
pub type BatchId = usize;

/// Row count of a batch as reported by a [`BatchSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchLength {
    /// The batch exists and has this many rows. Final once reported.
    Known(usize),
    /// The producer has not materialized the batch yet.
    Pending,
    /// The stream ended before this batch id.
    Exhausted,
}

impl BatchLength {
    /// Returns the row count if the batch is known.
    #[must_use]
    pub fn known(self) -> Option<usize> {
        match self {
            BatchLength::Known(n) => Some(n),
            BatchLength::Pending | BatchLength::Exhausted => None,
        }
    }
}

/// Producer of batches consumed by a [`super::SortRelation`].
///
/// Ids are requested in non-decreasing order. Implementations must not block:
/// a batch that is not ready yet is reported as [`BatchLength::Pending`].
pub trait BatchSource {
    /// Returns the row count of `batch_id`, pulling from upstream if needed.
    fn row_count_of_batch(&mut self, batch_id: BatchId) -> BatchLength;

    /// Returns the batch if it has been pulled and not released.
    fn batch(&self, batch_id: BatchId) -> Option<&RecordBatch>;

    /// Drops the source's copy of the batch. No-op for unknown ids.
    fn release_batch(&mut self, _batch_id: BatchId) {}
}

type BatchStream = Pin<Box<dyn Stream<Item = Result<RecordBatch, ArrowError>> + Send>>;

/// Sending half of [`LazyBatchIterator::channel`].
pub type BatchSender = mpsc::UnboundedSender<Result<RecordBatch, ArrowError>>;

/// [`BatchSource`] over a stream of record batches.
///
/// The stream is polled without blocking: if no item is ready the requested
/// batch is `Pending`, and once the stream ends every further id is
/// `Exhausted`. Lengths are remembered for the lifetime of the iterator; batch
/// data is dropped on [`BatchSource::release_batch`].
pub struct LazyBatchIterator {
    stream: BatchStream,
    /// Row counts of every batch pulled so far, indexed by id.
    lengths: Vec<usize>,
    batches: HashMap<BatchId, RecordBatch>,
    exhausted: bool,
    error: Option<ArrowError>,
}

impl LazyBatchIterator {
    /// Creates an iterator over an arbitrary batch stream.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<RecordBatch, ArrowError>> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
            lengths: Vec::new(),
            batches: HashMap::new(),
            exhausted: false,
            error: None,
        }
    }

    /// Creates an iterator over batches that are all available up front.
    #[must_use]
    pub fn from_batches(batches: Vec<RecordBatch>) -> Self {
        Self::from_stream(futures::stream::iter(batches.into_iter().map(Ok)))
    }

    /// Creates an iterator fed by a channel.
    ///
    /// Batches not yet sent are `Pending`; dropping every sender ends the stream.
    #[must_use]
    pub fn channel() -> (BatchSender, Self) {
        let (tx, rx) = mpsc::unbounded();
        (tx, Self::from_stream(rx))
    }

    /// Number of batches pulled from upstream so far.
    #[must_use]
    pub fn num_pulled(&self) -> usize {
        self.lengths.len()
    }

    /// Number of pulled batches whose data is still held.
    #[must_use]
    pub fn num_retained(&self) -> usize {
        self.batches.len()
    }

    /// Returns true once the upstream stream has ended.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Takes the upstream error that ended the stream, if any.
    pub fn take_error(&mut self) -> Option<ArrowError> {
        self.error.take()
    }

    /// Pulls one item without blocking. Returns false if nothing was pulled.
    fn poll_one(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        match self.stream.next().now_or_never() {
            None => false,
            Some(None) => {
                tracing::debug!(batches = self.lengths.len(), "batch stream exhausted");
                self.exhausted = true;
                false
            }
            Some(Some(Err(e))) => {
                tracing::warn!(error = %e, batch_id = self.lengths.len(), "batch stream failed");
                self.error = Some(e);
                self.exhausted = true;
                false
            }
            Some(Some(Ok(batch))) => {
                let batch_id = self.lengths.len();
                tracing::trace!(batch_id, rows = batch.num_rows(), "pulled batch");
                self.lengths.push(batch.num_rows());
                self.batches.insert(batch_id, batch);
                true
            }
        }
    }
}

impl BatchSource for LazyBatchIterator {
    fn row_count_of_batch(&mut self, batch_id: BatchId) -> BatchLength {
        while self.lengths.len() <= batch_id {
            if !self.poll_one() {
                return if self.exhausted {
                    BatchLength::Exhausted
                } else {
                    BatchLength::Pending
                };
            }
        }
        BatchLength::Known(self.lengths[batch_id])
    }

    fn batch(&self, batch_id: BatchId) -> Option<&RecordBatch> {
        self.batches.get(&batch_id)
    }

    fn release_batch(&mut self, batch_id: BatchId) {
        self.batches.remove(&batch_id);
    }
}

impl std::fmt::Debug for LazyBatchIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyBatchIterator")
            .field("lengths", &self.lengths)
            .field("retained", &self.batches.len())
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}
