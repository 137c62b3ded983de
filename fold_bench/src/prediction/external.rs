use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use ndarray::{Array3, ArrayView3, ShapeBuilder};
use npyz::{NpyFile, Order, WriteOptions, WriterBuilder};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::SeqModel;
use crate::config::ModelParams;
use crate::data_handling::archive::numeric_values;
use crate::error::{PipelineError, PipelineResult};
use crate::helper_functions::{locate_program, run_checked};

/// A model served by an external command:
/// `<predictor> <params.json> <model_file> <batch.npy> <preds.npy>`.
pub struct ExternalModel {
    predictor: PathBuf,
    model_file: PathBuf,
    params_file: NamedTempFile,
    num_targets: usize,
}

impl ExternalModel {
    pub fn new(predictor: &str, model_file: &Path, params: &ModelParams, batch_size: usize) -> PipelineResult<Self> {
        let predictor = locate_program(predictor)?;
        let mut params_file = tempfile::Builder::new().prefix("params_").suffix(".json").tempfile()?;
        serde_json::to_writer_pretty(&mut params_file, &params.to_json(batch_size)).map_err(|source| {
            PipelineError::Json {
                path: params_file.path().to_path_buf(),
                source,
            }
        })?;
        params_file.flush()?;

        info!(
            "Predicting with {} on {} ({} targets)",
            predictor.display(),
            model_file.display(),
            params.num_targets
        );
        Ok(ExternalModel {
            predictor,
            model_file: model_file.to_path_buf(),
            params_file,
            num_targets: params.num_targets,
        })
    }
}

impl SeqModel for ExternalModel {
    fn num_targets(&self) -> usize {
        self.num_targets
    }

    fn predict_batch(&mut self, batch: ArrayView3<f32>) -> PipelineResult<Array3<f32>> {
        let scratch = tempfile::tempdir()?;
        let batch_path = scratch.path().join("batch.npy");
        let preds_path = scratch.path().join("preds.npy");
        write_npy(&batch_path, batch)?;

        run_checked(
            Command::new(&self.predictor)
                .arg(self.params_file.path())
                .arg(&self.model_file)
                .arg(&batch_path)
                .arg(&preds_path),
        )?;

        let preds = read_npy3(&preds_path)?;
        debug!("{} -> {:?}", batch_path.display(), preds.shape());
        if preds.shape()[2] != self.num_targets {
            return Err(PipelineError::Shape(format!(
                "{} returned {} targets, expected {}",
                self.predictor.display(),
                preds.shape()[2],
                self.num_targets
            )));
        }
        Ok(preds)
    }
}

fn write_npy(path: &Path, batch: ArrayView3<f32>) -> PipelineResult<()> {
    let shape: Vec<u64> = batch.shape().iter().map(|&d| d as u64).collect();
    let mut writer = WriteOptions::<f32>::new()
        .default_dtype()
        .shape(&shape)
        .writer(BufWriter::new(File::create(path)?))
        .begin_nd()?;
    writer.extend(batch.iter().copied())?;
    writer.finish()?;
    Ok(())
}

fn read_npy3(path: &Path) -> PipelineResult<Array3<f32>> {
    let npy = NpyFile::new(BufReader::new(File::open(path)?))?;
    let shape = npy.shape().to_vec();
    let &[b, p, t] = shape.as_slice() else {
        return Err(PipelineError::npy("preds", path, format!("expected 3 dimensions, found {:?}", shape)));
    };
    let shape = (b as usize, p as usize, t as usize);
    let order = npy.order();
    let values: Vec<f32> = numeric_values(npy, "preds", path)?
        .into_iter()
        .map(|v| v as f32)
        .collect();
    match order {
        Order::C => Ok(Array3::from_shape_vec(shape, values)?),
        // Column-major on disk, e.g. a transposed array saved by numpy.
        Order::Fortran => Ok(Array3::from_shape_vec(shape.f(), values)?
            .as_standard_layout()
            .into_owned()),
    }
}
