pub mod evaluation;
pub mod scatter;
pub mod transcripts;

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::{GenesArgs, ModelParams};
use crate::data_handling::genes::GenesDataset;
use crate::error::{PipelineError, PipelineResult};
use crate::helper_functions::ensure_dir;
use crate::prediction::{PredictionStream, SeqModel};

use evaluation::{evaluate_target, write_summary_tsv, write_table_tsv, write_table_txt, TargetSummary};
use scatter::scatter_plot;
use transcripts::gather_transcript_predictions;

/// Settings of one gene evaluation run.
#[derive(Debug, Clone)]
pub struct GeneEvalConfig {
    pub out_dir: PathBuf,
    pub batch_size: usize,
    /// Raw `-t` value; every target when absent.
    pub target_indexes: Option<String>,
    pub plots: bool,
}

/// Predict every segment, remap to transcripts and write tables (and plots)
/// for the selected targets into `config.out_dir`.
pub fn evaluate_genes<M: SeqModel>(
    genes: &GenesDataset,
    model: &mut M,
    config: &GeneEvalConfig,
) -> PipelineResult<Vec<TargetSummary>> {
    ensure_dir(&config.out_dir)?;

    let num_targets = model.num_targets();
    let stream = PredictionStream::new(model, genes.seqs_1hot.view(), config.batch_size)?;
    info!(
        "Predicting {} segments in {} batches",
        genes.seqs_1hot.shape()[0],
        stream.num_batches()
    );
    let transcript_preds = gather_transcript_predictions(&genes.transcript_map, stream, num_targets)?;

    let usable = num_targets.min(genes.num_targets());
    if usable < num_targets {
        info!(
            "Model predicts {} targets, dataset measures {}; evaluating the first {}",
            num_targets,
            genes.num_targets(),
            usable
        );
    }
    let targets = evaluation::parse_target_indexes(config.target_indexes.as_deref(), usable)?;

    let ids: Vec<&str> = genes.transcript_map.ids().collect();
    let mut rows = Vec::new();
    let mut summaries = Vec::with_capacity(targets.len());
    for &ti in &targets {
        let label = genes
            .target_labels
            .get(ti)
            .ok_or_else(|| PipelineError::InvalidArgument(format!("no label for target {}", ti)))?;

        if config.plots {
            let measured = genes.transcript_targets.column(ti).to_vec();
            let predicted = transcript_preds.column(ti).to_vec();
            scatter_plot(&plot_path(&config.out_dir, ti), &measured, &predicted, label)?;
        }

        let (target_rows, summary) = evaluate_target(
            &ids,
            genes.transcript_targets.view(),
            transcript_preds.view(),
            ti,
            label,
        );
        rows.extend(target_rows);
        summaries.push(summary);
    }

    write_table_txt(&config.out_dir.join("table.txt"), &rows)?;
    write_table_tsv(&config.out_dir.join("table.tsv"), &rows)?;
    write_summary_tsv(&config.out_dir.join("summary.tsv"), &summaries)?;
    Ok(summaries)
}

/// Read the model parameters for `genes`, build the model with them and
/// evaluate. Parameters are validated before `build_model` runs, so a
/// missing `num_targets` fails before any prediction.
pub fn run_genes_evaluation<M, F>(
    args: &GenesArgs,
    genes: &GenesDataset,
    build_model: F,
) -> PipelineResult<Vec<TargetSummary>>
where
    M: SeqModel,
    F: FnOnce(&ModelParams, usize) -> PipelineResult<M>,
{
    let params = ModelParams::from_params_file(&args.params_file, genes.seq_length(), genes.seq_depth())?;
    let batch_size = params.resolve_batch_size(args.batch_size);
    info!("Batch size {}", batch_size);

    let mut model = build_model(&params, batch_size)?;
    let config = GeneEvalConfig {
        out_dir: args.out_dir.clone(),
        batch_size,
        target_indexes: args.target_indexes.clone(),
        plots: !args.no_plots,
    };
    evaluate_genes(genes, &mut model, &config)
}

pub fn plot_path(out_dir: &Path, ti: usize) -> PathBuf {
    out_dir.join(format!("t{}.svg", ti))
}
