//! Predicted versus measured expression tables.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::{stack, ArrayView1, ArrayView2, Axis};
use ndarray_stats::CorrelationExt;
use polars::df;
use polars::prelude::*;
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};

/// Parse `-t 0,3,5`. `None` selects every target.
pub fn parse_target_indexes(raw: Option<&str>, num_targets: usize) -> PipelineResult<Vec<usize>> {
    let Some(raw) = raw else {
        return Ok((0..num_targets).collect());
    };

    raw.split(',')
        .map(|part| {
            let ti: usize = part
                .trim()
                .parse()
                .map_err(|_| PipelineError::InvalidArgument(format!("target index '{}' is not a number", part)))?;
            if ti >= num_targets {
                return Err(PipelineError::InvalidArgument(format!(
                    "target index {} out of range for {} targets",
                    ti, num_targets
                )));
            }
            Ok(ti)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvalRow {
    pub transcript: String,
    pub measured: f64,
    pub predicted: f64,
    pub target_index: usize,
    pub label: String,
}

impl EvalRow {
    /// Fixed-width line of `table.txt`.
    pub fn table_line(&self) -> String {
        format!(
            "{:<20}  {:.3}  {:.3}  {:>4}  {:>20}",
            self.transcript, self.measured, self.predicted, self.target_index, self.label
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetSummary {
    pub target_index: usize,
    pub label: String,
    pub transcripts: usize,
    pub pearson_r: Option<f64>,
}

/// Pearson correlation of two equally long series; `None` when undefined.
pub fn pearson<'a>(x: ArrayView1<'a, f64>, y: ArrayView1<'a, f64>) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let pair = stack(Axis(0), &[x, y]).ok()?;
    let corr = pair.pearson_correlation().ok()?;
    let r = corr[[0, 1]];
    r.is_finite().then_some(r)
}

/// Rows and summary of one target.
pub fn evaluate_target(
    ids: &[&str],
    measured: ArrayView2<f64>,
    predicted: ArrayView2<f64>,
    ti: usize,
    label: &str,
) -> (Vec<EvalRow>, TargetSummary) {
    let m = measured.column(ti);
    let p = predicted.column(ti);
    let rows = ids
        .iter()
        .zip(m.iter().zip(p.iter()))
        .map(|(id, (&measured, &predicted))| EvalRow {
            transcript: id.to_string(),
            measured,
            predicted,
            target_index: ti,
            label: label.to_string(),
        })
        .collect();

    let pearson_r = pearson(m, p);
    match pearson_r {
        Some(r) => info!("Target {} ({}): PearsonR {:.4} over {} transcripts", ti, label, r, ids.len()),
        None => warn!("Target {} ({}): correlation undefined", ti, label),
    }

    let summary = TargetSummary {
        target_index: ti,
        label: label.to_string(),
        transcripts: ids.len(),
        pearson_r,
    };
    (rows, summary)
}

pub fn write_table_txt(path: &Path, rows: &[EvalRow]) -> PipelineResult<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for row in rows {
        writeln!(out, "{}", row.table_line())?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_table_tsv(path: &Path, rows: &[EvalRow]) -> PipelineResult<()> {
    let mut df = df!(
        "transcript" => rows.iter().map(|r| r.transcript.clone()).collect::<Vec<_>>(),
        "measured" => rows.iter().map(|r| r.measured).collect::<Vec<_>>(),
        "predicted" => rows.iter().map(|r| r.predicted).collect::<Vec<_>>(),
        "target_index" => rows.iter().map(|r| r.target_index as u32).collect::<Vec<_>>(),
        "target_label" => rows.iter().map(|r| r.label.clone()).collect::<Vec<_>>()
    )?;
    write_tsv(path, &mut df)
}

pub fn write_summary_tsv(path: &Path, summaries: &[TargetSummary]) -> PipelineResult<()> {
    let mut df = df!(
        "target_index" => summaries.iter().map(|s| s.target_index as u32).collect::<Vec<_>>(),
        "target_label" => summaries.iter().map(|s| s.label.clone()).collect::<Vec<_>>(),
        "transcripts" => summaries.iter().map(|s| s.transcripts as u32).collect::<Vec<_>>(),
        "pearson_r" => summaries.iter().map(|s| s.pearson_r).collect::<Vec<_>>()
    )?;
    write_tsv(path, &mut df)
}

fn write_tsv(path: &Path, df: &mut DataFrame) -> PipelineResult<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b'\t')
        .finish(df)?;
    info!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}
