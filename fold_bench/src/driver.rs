//! Saturation mutagenesis, ensembling and PhyloP regression over a fold grid.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::checkpoint::{Checkpoint, Stage, StageKey};
use crate::config::BenchArgs;
use crate::data_handling::manifest::DataStats;
use crate::ensemble::ensemble_scores;
use crate::error::PipelineResult;
use crate::genome::GenomeResolver;
use crate::helper_functions::{ensure_dir, with_suffix};
use crate::models::{Job, JobOutcome, Replicate, Resources};
use crate::options::options_string;
use crate::scheduler::{log_outcomes, Scheduler};

/// What a driver run did.
#[derive(Debug, Clone, Default)]
pub struct BenchSummary {
    pub num_folds: usize,
    pub num_pcs: u64,
    pub saturation: Vec<JobOutcome>,
    pub ensemble: Option<PathBuf>,
    pub regression: Vec<JobOutcome>,
    /// Jobs a dry run would have submitted, both phases.
    pub planned: Vec<Job>,
}

pub struct BenchDriver<S, C, G> {
    pub args: BenchArgs,
    pub scheduler: S,
    pub checkpoint: C,
    pub genome: G,
}

impl<S: Scheduler, C: Checkpoint, G: GenomeResolver> BenchDriver<S, C, G> {
    pub fn new(args: BenchArgs, scheduler: S, checkpoint: C, genome: G) -> Self {
        BenchDriver {
            args,
            scheduler,
            checkpoint,
            genome,
        }
    }

    fn exp_dir(&self) -> &Path {
        &self.args.exp_dir
    }

    pub fn saturation_job(&self, rep: Replicate, genome_fasta: &Path) -> Job {
        let a = &self.args;
        let sat_dir = rep.out_dir(self.exp_dir(), &a.sat.out_dir);
        let options = options_string(&a.sat.option_group(genome_fasta), &sat_dir);

        let mut cmd = String::new();
        if let Some(activation) = a.fold.conda_activation() {
            cmd.push_str(&activation);
            cmd.push(' ');
        }
        cmd.push_str("echo $HOSTNAME; ");
        cmd.push_str(&format!(
            "{} {} {} {} {}",
            a.tools.sat_tool,
            options,
            a.params_file.display(),
            rep.dir(self.exp_dir()).join(&a.tools.model_name).display(),
            a.bed_file.display()
        ));

        Job {
            cmd,
            name: rep.job_name(&a.fold.name),
            out_file: with_suffix(&sat_dir, "out"),
            err_file: with_suffix(&sat_dir, "err"),
            resources: Resources::saturation(&a.fold.queue),
        }
    }

    pub fn regression_job(&self, rep: Replicate, num_pcs: u64) -> Job {
        let a = &self.args;
        let sat_dir = rep.out_dir(self.exp_dir(), &a.sat.out_dir);
        let cmd = format!(
            "{} -e 100 -p 4 -d {} -o {} {}",
            a.tools.bench_tool,
            num_pcs,
            sat_dir.display(),
            sat_dir.join(&a.tools.scores_name).display()
        );

        Job {
            cmd,
            name: rep.job_name(&a.fold.name),
            out_file: sat_dir.join("phylop.out"),
            err_file: sat_dir.join("phylop.err"),
            resources: Resources::regression(&a.bench_queue),
        }
    }

    fn pending_jobs(&self, reps: &[Replicate], stage: Stage, build: impl Fn(Replicate) -> Job) -> Vec<Job> {
        let mut jobs = Vec::new();
        for &rep in reps {
            if self.checkpoint.is_complete(&StageKey::new(rep, stage)) {
                info!("{} {:?} already generated.", rep, stage);
            } else {
                jobs.push(build(rep));
            }
        }
        jobs
    }

    fn submit(&mut self, phase: &str, reps: &[Replicate], stage: Stage, jobs: &[Job]) -> PipelineResult<Vec<JobOutcome>> {
        if jobs.is_empty() {
            info!("{}: nothing to submit", phase);
            return Ok(Vec::new());
        }
        info!("{}: submitting {} job(s)", phase, jobs.len());
        let outcomes = self.scheduler.submit_and_wait(jobs)?;
        log_outcomes(phase, &outcomes);

        for outcome in outcomes.iter().filter(|o| o.succeeded()) {
            if let Some(&rep) = reps
                .iter()
                .find(|rep| rep.job_name(&self.args.fold.name) == outcome.name)
            {
                self.checkpoint.mark_complete(&StageKey::new(rep, stage))?;
            }
        }
        Ok(outcomes)
    }

    pub fn run(&mut self) -> PipelineResult<BenchSummary> {
        let stats = DataStats::from_data_dir(&self.args.data_dir)?;
        let num_pcs = stats.num_pcs()?;
        let genome_fasta = self.genome.genome_fasta(&self.args.genome)?;
        info!("Genome FASTA {}", genome_fasta.display());

        let folds = Replicate::grid(stats.num_folds, self.args.fold.crosses);
        let mut summary = BenchSummary {
            num_folds: stats.num_folds,
            num_pcs,
            ..Default::default()
        };

        // saturation mutagenesis
        let sat_jobs = self.pending_jobs(&folds, Stage::Saturation, |rep| self.saturation_job(rep, &genome_fasta));

        if self.args.dry_run {
            let mut all = folds.clone();
            all.push(Replicate::Ensemble);
            let bench_jobs = self.pending_jobs(&all, Stage::Regression, |rep| self.regression_job(rep, num_pcs));
            summary.planned = sat_jobs.into_iter().chain(bench_jobs).collect();
            info!("Dry run: {} job(s) planned", summary.planned.len());
            return Ok(summary);
        }

        summary.saturation = self.submit("saturation mutagenesis", &folds, Stage::Saturation, &sat_jobs)?;

        // ensemble
        let ensemble_dir = Replicate::Ensemble.out_dir(self.exp_dir(), &self.args.sat.out_dir);
        ensure_dir(&ensemble_dir)?;
        let scores_files: Vec<PathBuf> = folds
            .iter()
            .map(|rep| rep.out_dir(self.exp_dir(), &self.args.sat.out_dir).join(&self.args.tools.scores_name))
            .collect();
        summary.ensemble = Some(ensemble_scores(
            &ensemble_dir,
            &scores_files,
            self.args.stat_key_naming(),
            &self.args.tools.scores_name,
        )?);

        // regression benchmark
        let mut all = folds;
        all.push(Replicate::Ensemble);
        let bench_jobs = self.pending_jobs(&all, Stage::Regression, |rep| self.regression_job(rep, num_pcs));
        summary.regression = self.submit("PhyloP regression", &all, Stage::Regression, &bench_jobs)?;

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{FileCheckpoint, MemoryCheckpoint};
    use crate::data_handling::{ArchiveWriter, ArrayArchive};
    use crate::error::PipelineError;
    use crate::genome::StaticGenomeResolver;
    use clap::Parser;
    use std::collections::HashMap;
    use std::fs;

    /// Plays the external tools: saturation jobs leave a scores archive,
    /// regression jobs leave `stats.txt`.
    #[derive(Default)]
    struct FakeScheduler {
        submitted: Vec<Job>,
        fail: Vec<String>,
    }

    impl Scheduler for FakeScheduler {
        fn submit_and_wait(&mut self, jobs: &[Job]) -> PipelineResult<Vec<JobOutcome>> {
            let mut outcomes = Vec::new();
            for job in jobs {
                self.submitted.push(job.clone());
                if self.fail.contains(&job.name) {
                    outcomes.push(JobOutcome::failed(&job.name, "FAILED"));
                    continue;
                }
                if job.out_file.ends_with("phylop.out") {
                    let dir = job.out_file.parent().unwrap();
                    fs::write(dir.join("stats.txt"), "r2 0.5\n").unwrap();
                } else {
                    let sat_dir = job.out_file.with_extension("");
                    fs::create_dir_all(&sat_dir).unwrap();
                    let fold_value = self.submitted.len() as f32;
                    let mut w = ArchiveWriter::create(sat_dir.join("scores.npz")).unwrap();
                    w.write_strings("chr", &["chrI".to_string()]).unwrap();
                    w.write::<i64>("start", &[1], vec![10]).unwrap();
                    w.write::<f32>("sum", &[1, 2], vec![fold_value, 2.0 * fold_value]).unwrap();
                    w.finish().unwrap();
                }
                outcomes.push(JobOutcome::completed(&job.name));
            }
            Ok(outcomes)
        }
    }

    fn setup(extra: &[&str]) -> (tempfile::TempDir, BenchArgs, StaticGenomeResolver) {
        let tmp = tempfile::tempdir().unwrap();
        let data = tmp.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(
            data.join("statistics.json"),
            r#"{"fold0": 10, "fold1": 10, "num_targets": 16, "seq_length": 1024}"#,
        )
        .unwrap();

        let exp = tmp.path().join("exp");
        let mut argv = vec!["bench_folds".to_string()];
        argv.extend(extra.iter().map(|s| s.to_string()));
        argv.extend([
            exp.display().to_string(),
            "params.json".to_string(),
            data.display().to_string(),
            "regions.bed".to_string(),
        ]);
        let args = BenchArgs::try_parse_from(argv).unwrap();
        let genome = StaticGenomeResolver(HashMap::from([("ce11".to_string(), PathBuf::from("/genomes/ce11"))]));
        (tmp, args, genome)
    }

    fn checkpoint(args: &BenchArgs) -> FileCheckpoint {
        FileCheckpoint::new(&args.exp_dir, &args.sat.out_dir, &args.tools.scores_name)
    }

    #[test]
    fn full_run_then_idempotent_rerun() {
        let (_tmp, args, genome) = setup(&[]);
        let exp = args.exp_dir.clone();

        let cp = checkpoint(&args);
        let mut driver = BenchDriver::new(args.clone(), FakeScheduler::default(), cp, genome.clone());
        let summary = driver.run().unwrap();
        assert_eq!(summary.num_folds, 2);
        assert_eq!(summary.num_pcs, 8);
        assert_eq!(summary.saturation.len(), 2);
        assert_eq!(summary.regression.len(), 3);
        assert!(exp.join("ensemble/sat_mut/stats.txt").is_file());

        let names: Vec<&str> = driver.scheduler.submitted.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["sat-f0c0", "sat-f1c0", "sat-f0c0", "sat-f1c0", "sat-ens"]);

        let ens_path = summary.ensemble.unwrap();
        assert_eq!(ens_path, exp.join("ensemble/sat_mut/scores.npz"));
        let mut ens = ArrayArchive::open(&ens_path).unwrap();
        assert_eq!(ens.read_f64("sum").unwrap().into_raw_vec(), vec![1.5, 3.0]);

        let cp = checkpoint(&args);
        let mut rerun = BenchDriver::new(args, FakeScheduler::default(), cp, genome);
        let summary = rerun.run().unwrap();
        assert!(summary.saturation.is_empty());
        assert!(summary.regression.is_empty());
        assert!(rerun.scheduler.submitted.is_empty());
        assert!(summary.ensemble.is_some());
    }

    #[test]
    fn job_shapes() {
        let (_tmp, args, genome) = setup(&["-e", "", "--rc", "-c", "2"]);
        let exp = args.exp_dir.clone();
        let cp = checkpoint(&args);
        let driver = BenchDriver::new(args, FakeScheduler::default(), cp, genome);

        let rep = Replicate::Fold { fold: 1, cross: 1 };
        let sat = driver.saturation_job(rep, Path::new("/genomes/ce11/assembly/ce11.fa"));
        let sat_dir = exp.join("f1_c1/sat_mut");
        assert_eq!(sat.name, "sat-f1c1");
        assert_eq!(
            sat.cmd,
            format!(
                "echo $HOSTNAME; basenji_sat_bed.py -d 0 -f /genomes/ce11/assembly/ce11.fa -l 0 -o {} --rc \
                 --shifts 0 --stats sum -u 0 params.json {} regions.bed",
                sat_dir.display(),
                exp.join("f1_c1/train/model_best.h5").display()
            )
        );
        assert_eq!(sat.out_file, with_suffix(&sat_dir, "out"));
        assert_eq!(sat.resources, Resources::saturation("gtx1080ti"));

        let bench = driver.regression_job(Replicate::Ensemble, 8);
        let ens_dir = exp.join("ensemble/sat_mut");
        assert_eq!(bench.name, "sat-ens");
        assert_eq!(
            bench.cmd,
            format!(
                "basenji_bench_phylop.py -e 100 -p 4 -d 8 -o {} {}",
                ens_dir.display(),
                ens_dir.join("scores.npz").display()
            )
        );
        assert_eq!(bench.err_file, ens_dir.join("phylop.err"));
        assert_eq!(bench.resources, Resources::regression("standard"));
    }

    #[test]
    fn failed_job_is_not_marked() {
        let (_tmp, args, genome) = setup(&[]);
        let scheduler = FakeScheduler {
            fail: vec!["sat-f1c0".to_string()],
            ..Default::default()
        };
        let mut driver = BenchDriver::new(args, scheduler, MemoryCheckpoint::default(), genome);

        // The missing replicate surfaces when the ensemble opens its scores.
        let err = driver.run().unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
        assert_eq!(driver.checkpoint.len(), 1);
        assert!(driver
            .checkpoint
            .is_complete(&StageKey::new(Replicate::Fold { fold: 0, cross: 0 }, Stage::Saturation)));
        assert_eq!(driver.scheduler.submitted.len(), 2);
    }

    #[test]
    fn dry_run_submits_nothing() {
        let (_tmp, args, genome) = setup(&["--dry-run"]);
        let cp = checkpoint(&args);
        let mut driver = BenchDriver::new(args, FakeScheduler::default(), cp, genome);
        let summary = driver.run().unwrap();
        assert!(driver.scheduler.submitted.is_empty());
        assert_eq!(summary.planned.len(), 5);
        assert!(summary.ensemble.is_none());
    }

    #[test]
    fn missing_num_targets_aborts_before_submission() {
        let (tmp, args, genome) = setup(&[]);
        fs::write(tmp.path().join("data/statistics.json"), r#"{"fold0": 1}"#).unwrap();
        let cp = checkpoint(&args);
        let mut driver = BenchDriver::new(args, FakeScheduler::default(), cp, genome);
        assert!(matches!(driver.run(), Err(PipelineError::MissingParameter { .. })));
        assert!(driver.scheduler.submitted.is_empty());
    }

    #[test]
    fn missing_genome_aborts() {
        let (_tmp, args, _) = setup(&["-g", "hg38"]);
        let cp = checkpoint(&args);
        let mut driver = BenchDriver::new(args, FakeScheduler::default(), cp, StaticGenomeResolver::default());
        assert!(matches!(driver.run(), Err(PipelineError::MissingEnv(ref v)) if v == "HG38"));
    }
}
