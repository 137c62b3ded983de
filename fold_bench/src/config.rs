use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Args, Parser, ValueEnum};
use serde_json::{Map, Value};

use crate::data_handling::scores::DEFAULT_SCORES_NAME;
use crate::ensemble::StatKeyNaming;
use crate::error::{PipelineError, PipelineResult};
use crate::options::{ForwardedOption, OUT_DIR_DEST};

/// Benchmark model replicates on a BED PhyloP task.
#[derive(Debug, Clone, Parser)]
#[command(name = "bench_folds")]
#[command(about = "Saturation mutagenesis and PhyloP regression across fold replicates", long_about = None)]
pub struct BenchArgs {
    /// Experiment directory holding the f<fold>_c<cross> replicates
    #[arg(value_name = "EXP_DIR")]
    pub exp_dir: PathBuf,

    /// Model parameters JSON
    #[arg(value_name = "PARAMS_FILE")]
    pub params_file: PathBuf,

    /// Training data directory containing statistics.json
    #[arg(value_name = "DATA_DIR")]
    pub data_dir: PathBuf,

    /// Target regions
    #[arg(value_name = "BED_FILE")]
    pub bed_file: PathBuf,

    #[command(flatten)]
    pub sat: SatOptions,

    /// PhyloP and FASTA genome
    #[arg(short = 'g', long = "genome", default_value = "ce11", help_heading = "PhyloP options")]
    pub genome: String,

    /// Queue for the regression benchmark jobs
    #[arg(long = "bench-queue", default_value = "standard", help_heading = "PhyloP options")]
    pub bench_queue: String,

    #[command(flatten)]
    pub fold: FoldOptions,

    #[command(flatten)]
    pub tools: ToolOptions,

    /// Store every ensemble statistic under the last key, as older ensembles did
    #[arg(long = "last-key-compat")]
    pub last_key_compat: bool,

    /// Print the jobs that would be submitted and stop
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl BenchArgs {
    pub fn stat_key_naming(&self) -> StatKeyNaming {
        if self.last_key_compat {
            StatKeyNaming::LastKeyCompat
        } else {
            StatKeyNaming::PerKey
        }
    }
}

/// Options forwarded to the saturation mutagenesis tool.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Saturation mutagenesis options")]
pub struct SatOptions {
    /// Nucleotides downstream of center sequence to mutate
    #[arg(short = 'd', default_value_t = 0)]
    pub mut_down: i64,

    /// Genome FASTA for sequences (replaced by the genome assets FASTA)
    #[arg(short = 'f')]
    pub genome_fasta: Option<String>,

    /// Length of center sequence to mutate
    #[arg(short = 'l', default_value_t = 0)]
    pub mut_len: i64,

    /// Output directory inside each replicate
    #[arg(short = 'o', default_value = "sat_mut")]
    pub out_dir: String,

    /// Make heatmap plots
    #[arg(long = "plots")]
    pub plots: bool,

    /// Number of processes
    #[arg(short = 'p')]
    pub processes: Option<i64>,

    /// Ensemble forward and reverse complement predictions
    #[arg(long = "rc")]
    pub rc: bool,

    /// Ensemble prediction shifts
    #[arg(long = "shifts", default_value = "0")]
    pub shifts: String,

    /// Comma-separated list of stats to save
    #[arg(long = "stats", default_value = "sum")]
    pub sad_stats: String,

    /// File specifying target indexes and labels in table format
    #[arg(short = 't')]
    pub targets_file: Option<String>,

    /// Nucleotides upstream of center sequence to mutate
    #[arg(short = 'u', default_value_t = 0)]
    pub mut_up: i64,
}

impl SatOptions {
    /// The option group in declaration order, with `genome_fasta` pinned.
    pub fn option_group(&self, genome_fasta: &Path) -> Vec<ForwardedOption> {
        let fasta = genome_fasta.to_string_lossy();
        vec![
            ForwardedOption::new("-d", "mut_down", self.mut_down),
            ForwardedOption::new("-f", "genome_fasta", &*fasta),
            ForwardedOption::new("-l", "mut_len", self.mut_len),
            ForwardedOption::new("-o", OUT_DIR_DEST, self.out_dir.as_str()),
            ForwardedOption::new("--plots", "plots", self.plots),
            ForwardedOption::new("-p", "processes", self.processes),
            ForwardedOption::new("--rc", "rc", self.rc),
            ForwardedOption::new("--shifts", "shifts", self.shifts.as_str()),
            ForwardedOption::new("--stats", "sad_stats", self.sad_stats.as_str()),
            ForwardedOption::new("-t", "targets_file", self.targets_file.as_deref()),
            ForwardedOption::new("-u", "mut_up", self.mut_up),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchedulerKind {
    Slurm,
    Local,
}

#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Cross-fold options")]
pub struct FoldOptions {
    /// Number of cross-fold rounds
    #[arg(short = 'c', default_value_t = 1)]
    pub crosses: usize,

    /// Anaconda environment; empty to run without activation
    #[arg(short = 'e', default_value = "tf2-gpu")]
    pub conda_env: String,

    /// Script that defines `conda activate`
    #[arg(long = "conda-profile", default_value = "$HOME/anaconda3/etc/profile.d/conda.sh")]
    pub conda_profile: String,

    /// Job name prefix
    #[arg(long = "name", default_value = "sat")]
    pub name: String,

    /// Queue for the saturation mutagenesis jobs
    #[arg(short = 'q', default_value = "gtx1080ti")]
    pub queue: String,

    #[arg(long = "scheduler", value_enum, default_value_t = SchedulerKind::Slurm)]
    pub scheduler: SchedulerKind,

    /// Jobs in flight at once
    #[arg(long = "max-jobs", default_value_t = 256)]
    pub max_jobs: usize,

    /// Seconds between scheduler polls
    #[arg(long = "poll-secs", default_value_t = 30)]
    pub poll_secs: u64,
}

impl FoldOptions {
    /// Shell prefix activating the conda environment, if one is configured.
    pub fn conda_activation(&self) -> Option<String> {
        if self.conda_env.is_empty() {
            return None;
        }
        Some(format!(". {}; conda activate {};", self.conda_profile, self.conda_env))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }
}

#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Tools")]
pub struct ToolOptions {
    #[arg(long = "sat-tool", default_value = "basenji_sat_bed.py")]
    pub sat_tool: String,

    #[arg(long = "bench-tool", default_value = "basenji_bench_phylop.py")]
    pub bench_tool: String,

    /// Model file relative to each replicate directory
    #[arg(long = "model-name", default_value = "train/model_best.h5")]
    pub model_name: String,

    /// Scores archive written by the saturation mutagenesis tool
    #[arg(long = "scores-name", default_value = DEFAULT_SCORES_NAME)]
    pub scores_name: String,
}

/// Compare predicted and measured gene expression.
#[derive(Debug, Clone, Parser)]
#[command(name = "test_genes")]
#[command(about = "Evaluate transcript-level predictions against measured targets", long_about = None)]
pub struct GenesArgs {
    #[arg(value_name = "PARAMS_FILE")]
    pub params_file: PathBuf,

    #[arg(value_name = "MODEL_FILE")]
    pub model_file: PathBuf,

    /// Genes dataset archive
    #[arg(value_name = "GENES_FILE")]
    pub genes_file: PathBuf,

    /// Batch size
    #[arg(short = 'b')]
    pub batch_size: Option<usize>,

    /// Output directory for tables and plots
    #[arg(short = 'o', default_value = "sed")]
    pub out_dir: PathBuf,

    /// Comma-separated list of target indexes to scatter plot true versus predicted values
    #[arg(short = 't')]
    pub target_indexes: Option<String>,

    /// Prediction command, invoked as `<predictor> <params.json> <model> <batch.npy> <preds.npy>`
    #[arg(long = "predictor", default_value = "predict_batch")]
    pub predictor: String,

    /// Skip the scatter plots
    #[arg(long = "no-plots")]
    pub no_plots: bool,

    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Model parameters, completed with the geometry of the input sequences.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub path: PathBuf,
    pub raw: Map<String, Value>,
    pub seq_length: usize,
    pub seq_depth: usize,
    pub num_targets: usize,
    pub batch_size: Option<usize>,
}

impl ModelParams {
    /// `num_targets` and `batch_size` are looked up at the top level, then in `model`.
    pub fn from_params_file(path: &Path, seq_length: usize, seq_depth: usize) -> PipelineResult<Self> {
        let file = File::open(path)?;
        let raw: Map<String, Value> =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| PipelineError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        let num_targets = lookup_usize(&raw, "num_targets")
            .ok_or_else(|| PipelineError::missing_parameter("num_targets", path))?;
        let batch_size = lookup_usize(&raw, "batch_size");

        Ok(ModelParams {
            path: path.to_path_buf(),
            raw,
            seq_length,
            seq_depth,
            num_targets,
            batch_size,
        })
    }

    /// `-b` first, then the parameters file, then the default.
    pub fn resolve_batch_size(&self, cli: Option<usize>) -> usize {
        cli.or(self.batch_size).unwrap_or(DEFAULT_BATCH_SIZE)
    }

    /// Parameters as handed to an external predictor.
    pub fn to_json(&self, batch_size: usize) -> Value {
        let mut params = self.raw.clone();
        for (key, value) in [
            ("seq_length", self.seq_length),
            ("batch_length", self.seq_length),
            ("seq_depth", self.seq_depth),
            ("num_targets", self.num_targets),
            ("batch_size", batch_size),
        ] {
            params.insert(key.to_string(), Value::from(value));
        }
        Value::Object(params)
    }
}

fn lookup_usize(raw: &Map<String, Value>, key: &str) -> Option<usize> {
    raw.get(key)
        .or_else(|| raw.get("model").and_then(|m| m.get(key)))
        .and_then(Value::as_u64)
        .map(|v| v as usize)
}
