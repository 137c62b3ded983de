use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// One training replicate of the fold grid, or the merged ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Replicate {
    Fold { fold: usize, cross: usize },
    Ensemble,
}

impl Replicate {
    /// Directory of this replicate under the experiment directory.
    pub fn dir(&self, exp_dir: &Path) -> PathBuf {
        match self {
            Replicate::Fold { fold, cross } => exp_dir.join(format!("f{}_c{}", fold, cross)),
            Replicate::Ensemble => exp_dir.join("ensemble"),
        }
    }

    /// Output directory of the mutagenesis tool for this replicate.
    pub fn out_dir(&self, exp_dir: &Path, out_dir: &str) -> PathBuf {
        self.dir(exp_dir).join(out_dir)
    }

    pub fn job_name(&self, prefix: &str) -> String {
        match self {
            Replicate::Fold { fold, cross } => format!("{}-f{}c{}", prefix, fold, cross),
            Replicate::Ensemble => format!("{}-ens", prefix),
        }
    }

    /// Every fold replicate, cross-round major, in submission order.
    pub fn grid(num_folds: usize, crosses: usize) -> Vec<Replicate> {
        (0..crosses)
            .flat_map(|cross| (0..num_folds).map(move |fold| Replicate::Fold { fold, cross }))
            .collect()
    }
}

impl fmt::Display for Replicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Replicate::Fold { fold, cross } => write!(f, "f{}_c{}", fold, cross),
            Replicate::Ensemble => write!(f, "ensemble"),
        }
    }
}

/// Resource request attached to a scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resources {
    pub cpu: u32,
    pub gpu: u32,
    pub queue: String,
    /// Memory in MB.
    pub mem: u64,
    /// Wall-clock limit in SLURM notation, e.g. `7-0:00:00`.
    pub time: String,
}

impl Resources {
    /// Shape of a saturation mutagenesis job.
    pub fn saturation(queue: &str) -> Self {
        Resources {
            cpu: 2,
            gpu: 1,
            queue: queue.to_string(),
            mem: 30000,
            time: "7-0:00:00".to_string(),
        }
    }

    /// Shape of a regression benchmark job.
    pub fn regression(queue: &str) -> Self {
        Resources {
            cpu: 4,
            gpu: 0,
            queue: queue.to_string(),
            mem: 22000,
            time: "1-0:0:0".to_string(),
        }
    }
}

/// A command to run on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub cmd: String,
    pub name: String,
    pub out_file: PathBuf,
    pub err_file: PathBuf,
    pub resources: Resources,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Completed,
    Failed(String),
}

/// Terminal state of one submitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub name: String,
    pub state: JobState,
}

impl JobOutcome {
    pub fn completed(name: impl Into<String>) -> Self {
        JobOutcome {
            name: name.into(),
            state: JobState::Completed,
        }
    }

    pub fn failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        JobOutcome {
            name: name.into(),
            state: JobState::Failed(reason.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == JobState::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_is_cross_major() {
        let grid = Replicate::grid(2, 2);
        assert_eq!(
            grid,
            vec![
                Replicate::Fold { fold: 0, cross: 0 },
                Replicate::Fold { fold: 1, cross: 0 },
                Replicate::Fold { fold: 0, cross: 1 },
                Replicate::Fold { fold: 1, cross: 1 },
            ]
        );
    }

    #[test]
    fn paths_and_names() {
        let exp = Path::new("/exp");
        let rep = Replicate::Fold { fold: 3, cross: 1 };
        assert_eq!(rep.out_dir(exp, "sat_mut"), PathBuf::from("/exp/f3_c1/sat_mut"));
        assert_eq!(rep.job_name("sat"), "sat-f3c1");
        assert_eq!(Replicate::Ensemble.out_dir(exp, "sat_mut"), PathBuf::from("/exp/ensemble/sat_mut"));
        assert_eq!(Replicate::Ensemble.job_name("sat"), "sat-ens");
    }

    #[test]
    fn job_json() {
        let job = Job {
            cmd: "echo hi".to_string(),
            name: "sat-ens".to_string(),
            out_file: PathBuf::from("/exp/ensemble/sat_mut/phylop.out"),
            err_file: PathBuf::from("/exp/ensemble/sat_mut/phylop.err"),
            resources: Resources::regression("standard"),
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["name"], "sat-ens");
        assert_eq!(json["resources"]["gpu"], 0);
        assert_eq!(json["resources"]["time"], "1-0:0:0");
    }
}
