use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use fold_bench::checkpoint::FileCheckpoint;
use fold_bench::config::{BenchArgs, SchedulerKind};
use fold_bench::driver::{BenchDriver, BenchSummary};
use fold_bench::genome::EnvGenomeResolver;
use fold_bench::helper_functions::init_tracing;
use fold_bench::scheduler::{LocalScheduler, Scheduler, SlurmScheduler};

fn main() {
    let args = BenchArgs::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: BenchArgs) -> Result<()> {
    info!("Benchmarking replicates in {}", args.exp_dir.display());

    let scheduler: Box<dyn Scheduler> = match args.fold.scheduler {
        SchedulerKind::Slurm => Box::new(
            SlurmScheduler::new(args.fold.max_jobs, args.fold.poll_interval())
                .context("SLURM scheduler unavailable; try --scheduler local")?,
        ),
        SchedulerKind::Local => Box::new(LocalScheduler::default()),
    };
    let checkpoint = FileCheckpoint::new(&args.exp_dir, &args.sat.out_dir, &args.tools.scores_name);

    let mut driver = BenchDriver::new(args, scheduler, checkpoint, EnvGenomeResolver);
    let summary = driver.run().context("fold benchmark failed")?;
    report(&summary, driver.args.dry_run)
}

fn report(summary: &BenchSummary, dry_run: bool) -> Result<()> {
    if dry_run {
        for job in &summary.planned {
            println!("{}", serde_json::to_string(job)?);
        }
        return Ok(());
    }

    let failed = summary
        .saturation
        .iter()
        .chain(&summary.regression)
        .filter(|o| !o.succeeded())
        .count();
    info!(
        "{} folds, {} PCs: {} saturation and {} regression jobs run, {} failed",
        summary.num_folds,
        summary.num_pcs,
        summary.saturation.len(),
        summary.regression.len(),
        failed
    );
    if let Some(ensemble) = &summary.ensemble {
        info!("Ensemble scores in {}", ensemble.display());
    }
    Ok(())
}
