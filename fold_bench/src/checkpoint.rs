//! Stage completion markers used to resume an interrupted run.

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::PipelineResult;
use crate::models::Replicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Saturation mutagenesis scores were produced.
    Saturation,
    /// Regression benchmark statistics were produced.
    Regression,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageKey {
    pub replicate: Replicate,
    pub stage: Stage,
}

impl StageKey {
    pub fn new(replicate: Replicate, stage: Stage) -> Self {
        StageKey { replicate, stage }
    }
}

pub trait Checkpoint {
    fn is_complete(&self, key: &StageKey) -> bool;
    fn mark_complete(&self, key: &StageKey) -> PipelineResult<()>;
}

/// Marker files written by the external tools themselves:
/// `<replicate>/<out_dir>/<scores_name>` and `<replicate>/<out_dir>/stats.txt`.
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    pub exp_dir: PathBuf,
    pub out_dir: String,
    pub scores_name: String,
}

pub const STATS_FILE: &str = "stats.txt";

impl FileCheckpoint {
    pub fn new(exp_dir: impl Into<PathBuf>, out_dir: impl Into<String>, scores_name: impl Into<String>) -> Self {
        FileCheckpoint {
            exp_dir: exp_dir.into(),
            out_dir: out_dir.into(),
            scores_name: scores_name.into(),
        }
    }

    pub fn marker_path(&self, key: &StageKey) -> PathBuf {
        let dir = key.replicate.out_dir(&self.exp_dir, &self.out_dir);
        match key.stage {
            Stage::Saturation => dir.join(&self.scores_name),
            Stage::Regression => dir.join(STATS_FILE),
        }
    }
}

impl Checkpoint for FileCheckpoint {
    fn is_complete(&self, key: &StageKey) -> bool {
        self.marker_path(key).is_file()
    }

    // The tools write the marker; a job that exited cleanly without it is suspicious.
    fn mark_complete(&self, key: &StageKey) -> PipelineResult<()> {
        let marker = self.marker_path(key);
        if marker.is_file() {
            debug!("{} complete: {}", key.replicate, marker.display());
        } else {
            warn!("{} job finished but {} is missing", key.replicate, marker.display());
        }
        Ok(())
    }
}

/// In-process marker set, for dry runs and alternate stores.
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    done: RefCell<HashSet<StageKey>>,
}

impl MemoryCheckpoint {
    pub fn with_completed(keys: impl IntoIterator<Item = StageKey>) -> Self {
        MemoryCheckpoint {
            done: RefCell::new(keys.into_iter().collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.done.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.borrow().is_empty()
    }
}

impl Checkpoint for MemoryCheckpoint {
    fn is_complete(&self, key: &StageKey) -> bool {
        self.done.borrow().contains(key)
    }

    fn mark_complete(&self, key: &StageKey) -> PipelineResult<()> {
        self.done.borrow_mut().insert(*key);
        Ok(())
    }
}
