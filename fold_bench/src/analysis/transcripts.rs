//! Segment-level predictions remapped onto transcripts.

use std::collections::BTreeMap;

use ndarray::{Array2, ArrayView3};
use tracing::debug;

use crate::data_handling::genes::TranscriptMap;
use crate::error::{PipelineError, PipelineResult};
use crate::prediction::PredictionBatch;

/// `[transcripts, targets]` taken from `seq_preds[segment, position, :]` in map order.
pub fn transcript_predictions(map: &TranscriptMap, seq_preds: ArrayView3<f32>) -> PipelineResult<Array2<f64>> {
    let (num_segments, num_positions, num_targets) = seq_preds.dim();
    let mut out = Array2::zeros((map.len(), num_targets));

    for (tx_i, (id, (seg, pos))) in map.iter().enumerate() {
        if seg >= num_segments || pos >= num_positions {
            return Err(out_of_range(id, seg, pos));
        }
        for ti in 0..num_targets {
            out[[tx_i, ti]] = seq_preds[[seg, pos, ti]] as f64;
        }
    }
    Ok(out)
}

/// Same as [`transcript_predictions`], consuming batches as they are produced
/// so the full `[segments, positions, targets]` array is never held.
pub fn gather_transcript_predictions<I>(map: &TranscriptMap, batches: I, num_targets: usize) -> PipelineResult<Array2<f64>>
where
    I: IntoIterator<Item = PipelineResult<PredictionBatch>>,
{
    let mut by_segment: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
    for (tx_i, (_, (seg, pos))) in map.iter().enumerate() {
        by_segment.entry(seg).or_default().push((tx_i, pos));
    }

    let ids: Vec<&str> = map.ids().collect();
    let mut out = Array2::zeros((map.len(), num_targets));
    let mut filled = 0;
    let mut predicted_end = 0;

    for batch in batches {
        let batch = batch?;
        predicted_end = predicted_end.max(batch.end());
        let (_, num_positions, batch_targets) = batch.preds.dim();
        if batch_targets != num_targets {
            return Err(PipelineError::Shape(format!(
                "batch at {} has {} targets, expected {}",
                batch.start, batch_targets, num_targets
            )));
        }

        for (&seg, members) in by_segment.range(batch.start..batch.end()) {
            for &(tx_i, pos) in members {
                if pos >= num_positions {
                    return Err(out_of_range(ids[tx_i], seg, pos));
                }
                let row = batch.preds.slice(ndarray::s![seg - batch.start, pos, ..]);
                out.row_mut(tx_i).assign(&row.mapv(f64::from));
                filled += 1;
            }
        }
        debug!("Segments {}..{}: {} transcripts gathered", batch.start, batch.end(), filled);
    }

    if filled != map.len() {
        let first = map
            .iter()
            .find(|(_, (seg, _))| *seg >= predicted_end)
            .map(|(id, _)| id)
            .unwrap_or("?");
        return Err(PipelineError::Shape(format!(
            "{} of {} transcripts lie beyond the {} predicted segments, first {}",
            map.len() - filled,
            map.len(),
            predicted_end,
            first
        )));
    }
    Ok(out)
}

fn out_of_range(id: &str, seg: usize, pos: usize) -> PipelineError {
    PipelineError::Shape(format!(
        "transcript {} at segment {} position {} is outside the predictions",
        id, seg, pos
    ))
}
