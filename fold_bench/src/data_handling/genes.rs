//! Genes dataset: sequence segments, transcripts mapped onto them and
//! measured expression targets.

use std::collections::HashMap;
use std::path::Path;

use ndarray::{Array2, Array3, Axis, Ix2, Ix3};
use tracing::info;

use super::archive::ArrayArchive;
use crate::error::{PipelineError, PipelineResult};

/// Ordered transcript id → `(segment, position)` table.
///
/// Insertion order is kept. Inserting an id again keeps its first slot
/// and takes the new location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptMap {
    entries: Vec<(String, (usize, usize))>,
    index: HashMap<String, usize>,
}

impl TranscriptMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, location: (usize, usize)) {
        let id = id.into();
        match self.index.get(&id) {
            Some(&slot) => self.entries[slot].1 = location,
            None => {
                self.index.insert(id.clone(), self.entries.len());
                self.entries.push((id, location));
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<(usize, usize)> {
        self.index.get(id).map(|&slot| self.entries[slot].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, (usize, usize))> {
        self.entries.iter().map(|(id, loc)| (id.as_str(), *loc))
    }
}

impl<S: Into<String>> FromIterator<(S, (usize, usize))> for TranscriptMap {
    fn from_iter<I: IntoIterator<Item = (S, (usize, usize))>>(iter: I) -> Self {
        let mut map = TranscriptMap::new();
        for (id, loc) in iter {
            map.insert(id, loc);
        }
        map
    }
}

pub struct GenesDataset {
    pub seg_chrom: Vec<String>,
    pub seg_start: Vec<i64>,
    pub seg_end: Vec<i64>,
    /// One-hot sequences, `[segments, length, depth]`.
    pub seqs_1hot: Array3<f32>,
    pub transcript_map: TranscriptMap,
    /// Measured values, `[transcripts, targets]`, rows in transcript map order.
    pub transcript_targets: Array2<f64>,
    pub target_labels: Vec<String>,
}

impl GenesDataset {
    pub fn load(path: &Path) -> PipelineResult<Self> {
        info!("Reading genes dataset from {}", path.display());
        let mut archive = ArrayArchive::open(path)?;

        let seg_chrom = archive.read_strings("seg_chrom")?;
        let seg_start = archive.read_i64("seg_start")?;
        let seg_end = archive.read_i64("seg_end")?;
        let seqs_1hot = archive.read_f32("seqs_1hot")?.into_dimensionality::<Ix3>()?;

        let transcripts = archive.read_strings("transcripts")?;
        let transcript_index = archive.read_i64("transcript_index")?;
        let transcript_pos = archive.read_i64("transcript_pos")?;
        if transcript_index.len() != transcripts.len() || transcript_pos.len() != transcripts.len() {
            return Err(PipelineError::Shape(format!(
                "{} transcripts but {} indexes and {} positions",
                transcripts.len(),
                transcript_index.len(),
                transcript_pos.len()
            )));
        }

        let num_segments = seqs_1hot.shape()[0];
        let num_rows = transcripts.len();
        let mut transcript_map = TranscriptMap::new();
        let mut last_row: HashMap<String, usize> = HashMap::new();
        for (row, ((id, &si), &pos)) in transcripts
            .into_iter()
            .zip(&transcript_index)
            .zip(&transcript_pos)
            .enumerate()
        {
            let (si, pos) = (to_index(si, "transcript_index")?, to_index(pos, "transcript_pos")?);
            if si >= num_segments {
                return Err(PipelineError::Shape(format!(
                    "transcript {} maps to segment {} of {}",
                    id, si, num_segments
                )));
            }
            last_row.insert(id.clone(), row);
            transcript_map.insert(id, (si, pos));
        }

        let measured = archive.read_f64("transcript_targets")?.into_dimensionality::<Ix2>()?;
        if measured.nrows() != num_rows {
            return Err(PipelineError::Shape(format!(
                "{} measured rows for {} transcripts",
                measured.nrows(),
                num_rows
            )));
        }
        // Repeated ids keep the measurements of their latest row.
        let rows: Vec<usize> = transcript_map
            .ids()
            .filter_map(|id| last_row.get(id).copied())
            .collect();
        let transcript_targets = measured.select(Axis(0), &rows);
        let target_labels = archive.read_strings("target_labels")?;
        if target_labels.len() != transcript_targets.ncols() {
            return Err(PipelineError::Shape(format!(
                "{} target labels for {} target columns",
                target_labels.len(),
                transcript_targets.ncols()
            )));
        }

        info!(
            "{} segments, {} transcripts, {} targets",
            num_segments,
            transcript_map.len(),
            target_labels.len()
        );

        Ok(GenesDataset {
            seg_chrom,
            seg_start,
            seg_end,
            seqs_1hot,
            transcript_map,
            transcript_targets,
            target_labels,
        })
    }

    pub fn seq_length(&self) -> usize {
        self.seqs_1hot.shape()[1]
    }

    pub fn seq_depth(&self) -> usize {
        self.seqs_1hot.shape()[2]
    }

    pub fn num_targets(&self) -> usize {
        self.transcript_targets.ncols()
    }
}

fn to_index(v: i64, what: &str) -> PipelineResult<usize> {
    usize::try_from(v).map_err(|_| PipelineError::Shape(format!("negative {}: {}", what, v)))
}
