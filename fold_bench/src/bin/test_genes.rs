use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use fold_bench::analysis::run_genes_evaluation;
use fold_bench::config::GenesArgs;
use fold_bench::data_handling::genes::GenesDataset;
use fold_bench::helper_functions::{ensure_dir, init_tracing};
use fold_bench::prediction::ExternalModel;
use fold_bench::PipelineError;

fn main() {
    let args = GenesArgs::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args) {
        match e.downcast_ref::<PipelineError>() {
            Some(pe @ PipelineError::MissingParameter { .. }) => error!("{}", pe.exit_message()),
            _ => error!("{:#}", e),
        }
        std::process::exit(1);
    }
}

fn run(args: GenesArgs) -> Result<()> {
    ensure_dir(&args.out_dir)?;

    let genes = GenesDataset::load(&args.genes_file)
        .with_context(|| format!("reading genes dataset {}", args.genes_file.display()))?;

    let summaries = run_genes_evaluation(&args, &genes, |params, batch_size| {
        ExternalModel::new(&args.predictor, &args.model_file, params, batch_size)
    })?;

    for s in &summaries {
        match s.pearson_r {
            Some(r) => info!("t{} {:<20} PearsonR {:.4}", s.target_index, s.label, r),
            None => info!("t{} {:<20} PearsonR n/a", s.target_index, s.label),
        }
    }
    info!("Tables written to {}", args.out_dir.display());
    Ok(())
}
