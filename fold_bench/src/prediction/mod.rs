//! Sequence models and batched prediction over one-hot sequences.

mod external;

pub use external::ExternalModel;

use ndarray::{s, Array3, ArrayView3};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// A trained model mapping one-hot sequences to per-position target values.
pub trait SeqModel {
    fn num_targets(&self) -> usize;

    /// `[batch, length, depth]` in, `[batch, positions, num_targets]` out.
    fn predict_batch(&mut self, batch: ArrayView3<f32>) -> PipelineResult<Array3<f32>>;
}

impl<M: SeqModel + ?Sized> SeqModel for Box<M> {
    fn num_targets(&self) -> usize {
        (**self).num_targets()
    }

    fn predict_batch(&mut self, batch: ArrayView3<f32>) -> PipelineResult<Array3<f32>> {
        (**self).predict_batch(batch)
    }
}

impl<M: SeqModel + ?Sized> SeqModel for &mut M {
    fn num_targets(&self) -> usize {
        (**self).num_targets()
    }

    fn predict_batch(&mut self, batch: ArrayView3<f32>) -> PipelineResult<Array3<f32>> {
        (**self).predict_batch(batch)
    }
}

/// Predictions for the segments `start..start + preds.len_of(Axis(0))`.
#[derive(Debug, Clone)]
pub struct PredictionBatch {
    pub start: usize,
    pub preds: Array3<f32>,
}

impl PredictionBatch {
    pub fn end(&self) -> usize {
        self.start + self.preds.shape()[0]
    }
}

/// Lazily predicts `seqs` in consecutive batches of `batch_size` segments.
pub struct PredictionStream<'a, M> {
    model: &'a mut M,
    seqs: ArrayView3<'a, f32>,
    batch_size: usize,
    next: usize,
}

impl<'a, M: SeqModel> PredictionStream<'a, M> {
    pub fn new(model: &'a mut M, seqs: ArrayView3<'a, f32>, batch_size: usize) -> PipelineResult<Self> {
        if batch_size == 0 {
            return Err(PipelineError::InvalidArgument("batch size must be positive".to_string()));
        }
        Ok(PredictionStream {
            model,
            seqs,
            batch_size,
            next: 0,
        })
    }

    pub fn num_batches(&self) -> usize {
        self.seqs.shape()[0].div_ceil(self.batch_size)
    }
}

impl<M: SeqModel> Iterator for PredictionStream<'_, M> {
    type Item = PipelineResult<PredictionBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.seqs.shape()[0];
        if self.next >= total {
            return None;
        }
        let start = self.next;
        let end = (start + self.batch_size).min(total);
        self.next = end;

        debug!("Predicting segments {}..{} of {}", start, end, total);
        let batch = self.seqs.slice(s![start..end, .., ..]);
        let result = self.model.predict_batch(batch).and_then(|preds| {
            if preds.shape()[0] != end - start || preds.shape()[2] != self.model.num_targets() {
                return Err(PipelineError::Shape(format!(
                    "model returned {:?} for {} sequences and {} targets",
                    preds.shape(),
                    end - start,
                    self.model.num_targets()
                )));
            }
            Ok(PredictionBatch { start, preds })
        });
        Some(result)
    }
}
