//! Merge per-replicate scores archives into one ensemble archive.

use std::path::{Path, PathBuf};

use ndarray::{stack, ArrayD, ArrayViewD, Axis};
use tracing::{debug, info};

use crate::data_handling::scores::partition_keys;
use crate::data_handling::{ArchiveWriter, ArrayArchive};
use crate::error::{PipelineError, PipelineResult};

/// Where reduced statistics are stored in the ensemble archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatKeyNaming {
    /// Each statistic under its own key.
    #[default]
    PerKey,
    /// Every statistic under the last key of the first replicate, as older
    /// ensembles were written. A second statistic collides with the first.
    LastKeyCompat,
}

/// Average the statistics of `scores_files` into `<out_dir>/<scores_name>`.
///
/// Base annotation arrays are copied verbatim from the first replicate. Each
/// statistic is averaged across replicates in `f64` and stored as `f16`.
pub fn ensemble_scores(
    out_dir: &Path,
    scores_files: &[PathBuf],
    naming: StatKeyNaming,
    scores_name: &str,
) -> PipelineResult<PathBuf> {
    let Some(first_file) = scores_files.first() else {
        return Err(PipelineError::EmptyInput("no scores files to ensemble".to_string()));
    };

    let mut replicates = scores_files
        .iter()
        .map(ArrayArchive::open)
        .collect::<PipelineResult<Vec<_>>>()?;

    let keys = replicates[0].keys();
    let (base_keys, stat_keys) = partition_keys(&keys);
    info!(
        "Ensembling {} replicates from {}: {} base arrays, statistics {:?}",
        replicates.len(),
        first_file.display(),
        base_keys.len(),
        stat_keys
    );

    let mut ensemble = ArchiveWriter::create(out_dir.join(scores_name))?;
    for key in &base_keys {
        ensemble.copy_from(&mut replicates[0], key)?;
    }

    let last_key = keys.last().cloned().unwrap_or_default();
    for stat in &stat_keys {
        let values = replicates
            .iter_mut()
            .map(|r| r.read_f64(stat))
            .collect::<PipelineResult<Vec<_>>>()?;
        let mean = replicate_mean(stat, &values)?;

        let dest = match naming {
            StatKeyNaming::PerKey => stat.as_str(),
            StatKeyNaming::LastKeyCompat => last_key.as_str(),
        };
        debug!("{} -> {} {:?}", stat, dest, mean.shape());
        ensemble.write_f16(dest, &mean)?;
    }

    let path = ensemble.finish()?;
    info!("Wrote {}", path.display());
    Ok(path)
}

/// Element-wise mean over a new leading replicate axis.
fn replicate_mean(stat: &str, values: &[ArrayD<f64>]) -> PipelineResult<ArrayD<f64>> {
    let shape = values[0].shape();
    if let Some(bad) = values.iter().position(|v| v.shape() != shape) {
        return Err(PipelineError::Shape(format!(
            "{}: replicate {} has shape {:?}, expected {:?}",
            stat,
            bad,
            values[bad].shape(),
            shape
        )));
    }

    let views: Vec<ArrayViewD<f64>> = values.iter().map(|v| v.view()).collect();
    let stacked = stack(Axis(0), &views)?;
    stacked
        .mean_axis(Axis(0))
        .ok_or_else(|| PipelineError::EmptyInput(format!("no replicates for {}", stat)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Read;

    fn write_replicate(path: &Path, sum: Vec<f32>, ref_scores: Vec<f32>) {
        let mut w = ArchiveWriter::create(path).unwrap();
        w.write_strings("chr", &["chr1".to_string(), "chr2".to_string()]).unwrap();
        w.write::<i64>("start", &[2], vec![100, 200]).unwrap();
        w.write::<i64>("end", &[2], vec![103, 203]).unwrap();
        w.write_strings("strand", &["+".to_string(), "-".to_string()]).unwrap();
        w.write::<u8>("seqs", &[2, 3, 4], (0..24).map(|i| (i % 4 == 0) as u8)).unwrap();
        w.write::<f32>("sum", &[2, 3], sum).unwrap();
        w.write::<f32>("ref", &[2, 3], ref_scores).unwrap();
        w.finish().unwrap();
    }

    fn replicates(dir: &Path) -> Vec<PathBuf> {
        let paths = vec![dir.join("f0.npz"), dir.join("f1.npz"), dir.join("f2.npz")];
        write_replicate(&paths[0], vec![0.1, 0.2, 0.3, 1.0, 2.0, 3.0], vec![1.0; 6]);
        write_replicate(&paths[1], vec![0.2, 0.4, 0.6, 1.5, 2.5, 3.5], vec![2.0; 6]);
        write_replicate(&paths[2], vec![0.3, 0.6, 0.9, 2.0, 3.0, 4.0], vec![6.0; 6]);
        paths
    }

    fn member_bytes(path: &Path, key: &str) -> Vec<u8> {
        let mut zip = npyz::zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut member = zip.by_name(&format!("{}.npy", key)).unwrap();
        let mut bytes = Vec::new();
        member.read_to_end(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn base_arrays_are_copied_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let files = replicates(tmp.path());
        let out = tmp.path().join("ensemble");
        std::fs::create_dir_all(&out).unwrap();

        let path = ensemble_scores(&out, &files, StatKeyNaming::PerKey, "scores.npz").unwrap();
        for key in ["chr", "start", "end", "strand", "seqs"] {
            assert_eq!(member_bytes(&path, key), member_bytes(&files[0], key), "{key}");
        }
    }

    #[test]
    fn statistics_are_averaged_at_half_precision() {
        let tmp = tempfile::tempdir().unwrap();
        let files = replicates(tmp.path());

        let path = ensemble_scores(tmp.path(), &files, StatKeyNaming::PerKey, "ens.npz").unwrap();
        let mut ens = ArrayArchive::open(&path).unwrap();
        assert_eq!(ens.keys(), vec!["chr", "end", "ref", "seqs", "start", "strand", "sum"]);

        let expected = [0.2, 0.4, 0.6, 1.5, 2.5, 3.5];
        let sum = ens.read_f64("sum").unwrap();
        assert_eq!(sum.shape(), &[2, 3]);
        for (got, want) in sum.iter().zip(expected) {
            assert!((got - want).abs() <= want * 2f64.powi(-10), "{got} vs {want}");
        }
        assert!(ens.read_f64("ref").unwrap().iter().all(|&v| v == 3.0));

        let header = String::from_utf8_lossy(&member_bytes(&path, "sum")[..64]).to_string();
        assert!(header.contains("'<f2'"), "{header}");
    }

    #[test]
    fn last_key_compat_collides() {
        let tmp = tempfile::tempdir().unwrap();
        let files = replicates(tmp.path());

        // Sorted keys end with "sum", so "ref" lands there and "sum" collides.
        let err = ensemble_scores(tmp.path(), &files, StatKeyNaming::LastKeyCompat, "ens.npz").unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateKey { ref key, .. } if key == "sum"));
    }

    #[test]
    fn last_key_compat_single_statistic() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.npz");
        let mut w = ArchiveWriter::create(&path).unwrap();
        w.write::<i64>("start", &[1], vec![5]).unwrap();
        w.write::<f32>("alt", &[1], vec![2.0]).unwrap();
        w.write::<f32>("zz", &[1], vec![0.0]).unwrap();
        w.finish().unwrap();

        // "alt" and "zz" are both statistics; "alt" is stored as "zz" and "zz" then collides.
        let out = tmp.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let err = ensemble_scores(&out, &[path.clone()], StatKeyNaming::LastKeyCompat, "e.npz").unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateKey { .. }));

        let ok = ensemble_scores(&out, &[path], StatKeyNaming::PerKey, "e.npz").unwrap();
        assert_eq!(ArrayArchive::open(ok).unwrap().read_f64("alt").unwrap()[[0]], 2.0);
    }

    #[test]
    fn empty_input() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ensemble_scores(tmp.path(), &[], StatKeyNaming::PerKey, "e.npz").unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput(_)));
    }

    #[test]
    fn shape_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let mut files = replicates(tmp.path());
        let odd = tmp.path().join("odd.npz");
        let mut w = ArchiveWriter::create(&odd).unwrap();
        w.write::<f32>("sum", &[3], vec![1.0, 2.0, 3.0]).unwrap();
        w.write::<f32>("ref", &[2, 3], vec![1.0; 6]).unwrap();
        w.finish().unwrap();
        files.push(odd);

        let err = ensemble_scores(tmp.path(), &files, StatKeyNaming::PerKey, "e.npz").unwrap_err();
        assert!(matches!(err, PipelineError::Shape(_)));
    }
}
