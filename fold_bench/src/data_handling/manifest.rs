use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::info;

use crate::error::{PipelineError, PipelineResult};

pub const STATISTICS_FILE: &str = "statistics.json";

/// Summary of a training data directory, read from `statistics.json`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataStats {
    pub path: PathBuf,
    pub num_folds: usize,
    pub num_targets: Option<u64>,
}

impl DataStats {
    pub fn from_data_dir(data_dir: &Path) -> PipelineResult<Self> {
        Self::from_file(&data_dir.join(STATISTICS_FILE))
    }

    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let file = File::open(path)?;
        let stats: Map<String, Value> =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| PipelineError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        let num_folds = stats.keys().filter(|k| k.starts_with("fold")).count();
        let num_targets = stats.get("num_targets").and_then(Value::as_u64);
        info!("{}: {} folds, num_targets {:?}", path.display(), num_folds, num_targets);

        Ok(DataStats {
            path: path.to_path_buf(),
            num_folds,
            num_targets,
        })
    }

    pub fn num_targets(&self) -> PipelineResult<u64> {
        self.num_targets
            .ok_or_else(|| PipelineError::missing_parameter("num_targets", &self.path))
    }

    /// Principal components handed to the regression benchmark: `floor(num_targets^0.75)`.
    pub fn num_pcs(&self) -> PipelineResult<u64> {
        Ok((self.num_targets()? as f64).powf(0.75).floor() as u64)
    }
}
