//! Keyed n-d array containers stored as NumPy `.npz` archives.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use half::f16;
use ndarray::{ArrayD, IxDyn};
use npyz::npz::{file_name_from_array_name, NpzArchive, NpzWriter};
use npyz::zip::read::ZipFile;
use npyz::zip::result::ZipError;
use npyz::{AutoSerialize, DType, NpyFile, Order, TypeChar, WriterBuilder};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Read access to the arrays of one archive.
pub struct ArrayArchive {
    path: PathBuf,
    npz: NpzArchive<BufReader<File>>,
}

impl ArrayArchive {
    pub fn open(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening array archive {}", path.display());
        let npz = NpzArchive::open(&path)?;
        Ok(ArrayArchive { path, npz })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Array names in lexicographic order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.npz.array_names().map(str::to_string).collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.npz.array_names().any(|k| k == key)
    }

    fn member(&mut self, key: &str) -> PipelineResult<NpyFile<ZipFile<'_>>> {
        match self.npz.by_name(key)? {
            Some(npy) => {
                if npy.order() == Order::Fortran {
                    return Err(PipelineError::npy(key, &self.path, "Fortran-ordered arrays are not supported"));
                }
                Ok(npy)
            }
            None => Err(PipelineError::MissingKey {
                key: key.to_string(),
                path: self.path.clone(),
            }),
        }
    }

    /// Stored zip member, for verbatim copies into another archive.
    pub fn raw_member(&mut self, key: &str) -> PipelineResult<ZipFile<'_>> {
        match self.npz.zip_archive().by_name(&file_name_from_array_name(key)) {
            Ok(file) => Ok(file),
            Err(ZipError::FileNotFound) => Err(PipelineError::MissingKey {
                key: key.to_string(),
                path: self.path.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn shape(&mut self, key: &str) -> PipelineResult<Vec<usize>> {
        let npy = self.member(key)?;
        Ok(npy.shape().iter().map(|&d| d as usize).collect())
    }

    /// Any boolean, integer or float array, widened to `f64`.
    pub fn read_f64(&mut self, key: &str) -> PipelineResult<ArrayD<f64>> {
        let path = self.path.clone();
        let npy = self.member(key)?;
        let shape: Vec<usize> = npy.shape().iter().map(|&d| d as usize).collect();
        let values = numeric_values(npy, key, &path)?;
        Ok(ArrayD::from_shape_vec(IxDyn(&shape), values)?)
    }

    /// Any boolean, integer or float array as `f32`, decoded without an
    /// `f64` intermediate. Used for one-hot sequences.
    pub fn read_f32(&mut self, key: &str) -> PipelineResult<ArrayD<f32>> {
        let path = self.path.clone();
        let npy = self.member(key)?;
        let shape: Vec<usize> = npy.shape().iter().map(|&d| d as usize).collect();
        let values = f32_values(npy, key, &path)?;
        Ok(ArrayD::from_shape_vec(IxDyn(&shape), values)?)
    }

    /// Any integer array, widened to `i64`.
    pub fn read_i64(&mut self, key: &str) -> PipelineResult<Vec<i64>> {
        let path = self.path.clone();
        let npy = self.member(key)?;
        integer_values(npy, key, &path)
    }

    /// Byte (`S`) or unicode (`U`) string array.
    pub fn read_strings(&mut self, key: &str) -> PipelineResult<Vec<String>> {
        let npy = self.member(key)?;
        Ok(npy.into_vec::<String>()?)
    }
}

fn scalar_type(dtype: &DType, key: &str, path: &Path) -> PipelineResult<(TypeChar, u64)> {
    match dtype {
        DType::Plain(ts) => Ok((ts.type_char(), ts.size_field())),
        other => Err(PipelineError::npy(key, path, format!("unsupported dtype {}", other.descr()))),
    }
}

fn integer_values<R: io::Read>(npy: NpyFile<R>, key: &str, path: &Path) -> PipelineResult<Vec<i64>> {
    let values = match scalar_type(&npy.dtype(), key, path)? {
        (TypeChar::Int, 1) => npy.into_vec::<i8>()?.into_iter().map(i64::from).collect(),
        (TypeChar::Int, 2) => npy.into_vec::<i16>()?.into_iter().map(i64::from).collect(),
        (TypeChar::Int, 4) => npy.into_vec::<i32>()?.into_iter().map(i64::from).collect(),
        (TypeChar::Int, 8) => npy.into_vec::<i64>()?,
        (TypeChar::Uint, 1) => npy.into_vec::<u8>()?.into_iter().map(i64::from).collect(),
        (TypeChar::Uint, 2) => npy.into_vec::<u16>()?.into_iter().map(i64::from).collect(),
        (TypeChar::Uint, 4) => npy.into_vec::<u32>()?.into_iter().map(i64::from).collect(),
        (TypeChar::Uint, 8) => npy
            .into_vec::<u64>()?
            .into_iter()
            .map(|v| i64::try_from(v).map_err(|_| PipelineError::npy(key, path, "value exceeds i64")))
            .collect::<PipelineResult<Vec<i64>>>()?,
        (tc, size) => {
            return Err(PipelineError::npy(
                key,
                path,
                format!("expected integers, found {}{}", tc.to_str(), size),
            ))
        }
    };
    Ok(values)
}

pub(crate) fn numeric_values<R: io::Read>(npy: NpyFile<R>, key: &str, path: &Path) -> PipelineResult<Vec<f64>> {
    let values = match scalar_type(&npy.dtype(), key, path)? {
        (TypeChar::Float, 2) => npy.into_vec::<f16>()?.into_iter().map(f64::from).collect(),
        (TypeChar::Float, 4) => npy.into_vec::<f32>()?.into_iter().map(f64::from).collect(),
        (TypeChar::Float, 8) => npy.into_vec::<f64>()?,
        (TypeChar::Bool, _) => npy
            .into_vec::<bool>()?
            .into_iter()
            .map(|b| if b { 1.0 } else { 0.0 })
            .collect(),
        (TypeChar::Int, _) | (TypeChar::Uint, _) => integer_values(npy, key, path)?
            .into_iter()
            .map(|v| v as f64)
            .collect(),
        (tc, size) => {
            return Err(PipelineError::npy(
                key,
                path,
                format!("expected numbers, found {}{}", tc.to_str(), size),
            ))
        }
    };
    Ok(values)
}

fn f32_values<R: io::Read>(npy: NpyFile<R>, key: &str, path: &Path) -> PipelineResult<Vec<f32>> {
    let values = match scalar_type(&npy.dtype(), key, path)? {
        (TypeChar::Float, 2) => npy.into_vec::<f16>()?.into_iter().map(f32::from).collect(),
        (TypeChar::Float, 4) => npy.into_vec::<f32>()?,
        (TypeChar::Float, 8) => npy.into_vec::<f64>()?.into_iter().map(|v| v as f32).collect(),
        (TypeChar::Bool, _) => npy
            .into_vec::<bool>()?
            .into_iter()
            .map(|b| if b { 1.0 } else { 0.0 })
            .collect(),
        (TypeChar::Uint, 1) => npy.into_vec::<u8>()?.into_iter().map(f32::from).collect(),
        (TypeChar::Int, 1) => npy.into_vec::<i8>()?.into_iter().map(f32::from).collect(),
        (TypeChar::Int, _) | (TypeChar::Uint, _) => integer_values(npy, key, path)?
            .into_iter()
            .map(|v| v as f32)
            .collect(),
        (tc, size) => {
            return Err(PipelineError::npy(
                key,
                path,
                format!("expected numbers, found {}{}", tc.to_str(), size),
            ))
        }
    };
    Ok(values)
}

/// Writes a fresh archive, clobbering any file already at `path`.
pub struct ArchiveWriter {
    path: PathBuf,
    npz: NpzWriter<BufWriter<File>>,
    written: HashSet<String>,
}

impl ArchiveWriter {
    pub fn create(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.is_file() {
            debug!("Removing existing {}", path.display());
            fs::remove_file(&path)?;
        }
        let npz = NpzWriter::create(&path)?;
        Ok(ArchiveWriter {
            path,
            npz,
            written: HashSet::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn claim(&mut self, key: &str) -> PipelineResult<()> {
        if !self.written.insert(key.to_string()) {
            return Err(PipelineError::DuplicateKey {
                key: key.to_string(),
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    /// Copy a member of `src` without decoding it.
    pub fn copy_from(&mut self, src: &mut ArrayArchive, key: &str) -> PipelineResult<()> {
        self.claim(key)?;
        let file = src.raw_member(key)?;
        self.npz.zip_writer().raw_copy_file(file)?;
        Ok(())
    }

    pub fn write<T: AutoSerialize>(
        &mut self,
        key: &str,
        shape: &[usize],
        values: impl IntoIterator<Item = T>,
    ) -> PipelineResult<()> {
        self.claim(key)?;
        let shape: Vec<u64> = shape.iter().map(|&d| d as u64).collect();
        let mut writer = self
            .npz
            .array::<T>(key, Default::default())?
            .default_dtype()
            .shape(&shape)
            .begin_nd()?;
        writer.extend(values)?;
        writer.finish()?;
        Ok(())
    }

    /// Store an n-d array at half precision.
    pub fn write_f16(&mut self, key: &str, array: &ArrayD<f64>) -> PipelineResult<()> {
        let shape = array.shape().to_vec();
        self.write(key, &shape, array.iter().map(|&v| f16::from_f64(v)))
    }

    /// Store a 1-d unicode string array.
    pub fn write_strings(&mut self, key: &str, values: &[String]) -> PipelineResult<()> {
        self.claim(key)?;
        let width = values.iter().map(|s| s.chars().count()).max().unwrap_or(0).max(1);
        let type_str: npyz::TypeStr = format!("<U{}", width)
            .parse()
            .map_err(|e: npyz::ParseTypeStrError| PipelineError::npy(key, &self.path, e.to_string()))?;
        let mut writer = self
            .npz
            .array::<str>(key, Default::default())?
            .dtype(DType::new_scalar(type_str))
            .shape(&[values.len() as u64])
            .begin_nd()?;
        for value in values {
            writer.push(value.as_str())?;
        }
        writer.finish()?;
        Ok(())
    }

    pub fn finish(mut self) -> PipelineResult<PathBuf> {
        let mut inner = self.npz.zip_writer().finish()?;
        inner.flush()?;
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_members() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.npz");

        let mut w = ArchiveWriter::create(&path).unwrap();
        w.write_strings("chr", &["chr1".to_string(), "chrX".to_string()]).unwrap();
        w.write::<i32>("start", &[2], vec![10, 20]).unwrap();
        w.write::<f32>("sum", &[2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert!(matches!(
            w.write::<i32>("start", &[1], vec![1]),
            Err(PipelineError::DuplicateKey { .. })
        ));
        w.finish().unwrap();

        let mut a = ArrayArchive::open(&path).unwrap();
        assert_eq!(a.keys(), vec!["chr", "start", "sum"]);
        assert_eq!(a.read_strings("chr").unwrap(), vec!["chr1", "chrX"]);
        assert_eq!(a.read_i64("start").unwrap(), vec![10, 20]);
        let sum = a.read_f64("sum").unwrap();
        assert_eq!(sum.shape(), &[2, 3]);
        assert_eq!(sum[[1, 2]], 5.0);
        assert!(matches!(a.read_f64("missing"), Err(PipelineError::MissingKey { .. })));
        assert!(a.read_i64("sum").is_err());
    }

    #[test]
    fn one_hot_as_f32() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("seqs.npz");

        let mut w = ArchiveWriter::create(&path).unwrap();
        w.write::<bool>("bool_1hot", &[1, 2, 2], vec![true, false, false, true]).unwrap();
        w.write::<u8>("u8_1hot", &[1, 2, 2], vec![0, 1, 1, 0]).unwrap();
        w.write::<f16>("f16_1hot", &[1, 2, 2], [1.0, 0.0, 0.25, 0.0].map(f16::from_f32)).unwrap();
        w.write_strings("names", &["a".to_string()]).unwrap();
        w.finish().unwrap();

        let mut a = ArrayArchive::open(&path).unwrap();
        let b = a.read_f32("bool_1hot").unwrap();
        assert_eq!(b.shape(), &[1, 2, 2]);
        assert_eq!(b.into_raw_vec(), vec![1.0, 0.0, 0.0, 1.0]);
        assert_eq!(a.read_f32("u8_1hot").unwrap().into_raw_vec(), vec![0.0, 1.0, 1.0, 0.0]);
        assert_eq!(a.read_f32("f16_1hot").unwrap().into_raw_vec(), vec![1.0, 0.0, 0.25, 0.0]);
        assert!(a.read_f32("names").is_err());
    }

    #[test]
    fn create_clobbers_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("scores.npz");
        fs::write(&path, b"not a zip").unwrap();

        let mut w = ArchiveWriter::create(&path).unwrap();
        w.write::<f64>("x", &[1], vec![1.5]).unwrap();
        w.finish().unwrap();

        let mut a = ArrayArchive::open(&path).unwrap();
        assert_eq!(a.read_f64("x").unwrap().into_raw_vec(), vec![1.5]);
    }
}
