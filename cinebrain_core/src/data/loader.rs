//! `.npy` sample discovery and array I/O.

use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayD};
use ndarray_npy::{write_npy, ReadNpyError, ReadNpyExt, ReadableElement};

use crate::error::{PipelineError, PipelineResult};
use crate::preprocess::RawSample;
use crate::tensor::SliceComparison;

const SAMPLE_EXTENSION: &str = "npy";

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// All `*.npy` files under `root`, recursively, in sorted path order.
///
/// A missing `root` yields an empty list; the caller decides whether that is
/// an error.
pub fn list_data_files<P: AsRef<Path>>(root: P) -> PipelineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let root = root.as_ref();
    if root.is_dir() {
        collect_npy(root, &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn collect_npy(dir: &Path, files: &mut Vec<PathBuf>) -> PipelineResult<()> {
    let entries =
        fs::read_dir(dir).map_err(|err| PipelineError::io(dir.display().to_string(), err))?;
    for entry in entries {
        let path = entry
            .map_err(|err| PipelineError::io(dir.display().to_string(), err))?
            .path();
        if path.is_dir() {
            collect_npy(&path, files)?;
        } else if path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case(SAMPLE_EXTENSION))
        {
            files.push(path);
        }
    }
    Ok(())
}

/// First sample (in sorted order) under `root`, used when prediction is run
/// without an explicit input file.
pub fn find_default_sample<P: AsRef<Path>>(root: P) -> PipelineResult<PathBuf> {
    let root = root.as_ref();
    list_data_files(root)?.into_iter().next().ok_or_else(|| {
        PipelineError::no_data(format!("no .npy samples under '{}'", root.display()))
    })
}

/// Reads an `.npy` array of any common numeric dtype and flattens it, in
/// logical row-major order, to `f32`.
///
/// The file is read once; the header's `descr` picks the element type.
pub fn load_raw_sample<P: AsRef<Path>>(path: P) -> PipelineResult<RawSample> {
    let path = path.as_ref();
    let id = path.display().to_string();
    let bytes = fs::read(path).map_err(|err| PipelineError::io(id.clone(), err))?;

    let descr = npy_descr(&bytes)
        .ok_or_else(|| PipelineError::array_format(id.clone(), "missing or malformed .npy header"))?;
    // byte-order prefix ('<', '>', '|', '=') then kind and width
    let code = descr.get(descr.len().saturating_sub(2)..).unwrap_or_default();
    let values = match code {
        "f4" => read_as::<f32>(&bytes, &id)?,
        "f8" => read_as::<f64>(&bytes, &id)?,
        "i8" => read_as::<i64>(&bytes, &id)?,
        "i4" => read_as::<i32>(&bytes, &id)?,
        "i2" => read_as::<i16>(&bytes, &id)?,
        "i1" => read_as::<i8>(&bytes, &id)?,
        "u8" => read_as::<u64>(&bytes, &id)?,
        "u4" => read_as::<u32>(&bytes, &id)?,
        "u2" => read_as::<u16>(&bytes, &id)?,
        "u1" => read_as::<u8>(&bytes, &id)?,
        _ => {
            return Err(PipelineError::array_format(
                id,
                format!("unsupported dtype '{descr}' (expected a numeric array)"),
            ))
        }
    };
    Ok(RawSample::new(id, values))
}

/// The `descr` entry of an `.npy` header, e.g. `<f8`.
fn npy_descr(bytes: &[u8]) -> Option<&str> {
    if !bytes.starts_with(NPY_MAGIC) {
        return None;
    }
    let (len, start): (usize, usize) = match *bytes.get(6)? {
        1 => (u16::from_le_bytes([*bytes.get(8)?, *bytes.get(9)?]) as usize, 10),
        2 | 3 => {
            let raw: [u8; 4] = bytes.get(8..12)?.try_into().ok()?;
            (u32::from_le_bytes(raw) as usize, 12)
        }
        _ => return None,
    };
    let header = std::str::from_utf8(bytes.get(start..start.checked_add(len)?)?).ok()?;
    let rest = &header[header.find("'descr'")? + "'descr'".len()..];
    rest.split('\'').nth(1)
}

trait ToF32: Copy {
    fn to_f32(self) -> f32;
}

macro_rules! impl_to_f32 {
    ($($ty:ty),+) => {
        $(impl ToF32 for $ty {
            #[inline]
            fn to_f32(self) -> f32 {
                self as f32
            }
        })+
    };
}

impl_to_f32!(f32, f64, i64, i32, i16, i8, u64, u32, u16, u8);

fn read_as<T: ReadableElement + ToF32>(bytes: &[u8], id: &str) -> PipelineResult<Vec<f32>> {
    match ArrayD::<T>::read_npy(bytes) {
        Ok(array) => Ok(array.iter().map(|v| v.to_f32()).collect()),
        Err(ReadNpyError::Io(err)) => Err(PipelineError::io(id.to_string(), err)),
        Err(err) => Err(PipelineError::array_format(id.to_string(), err.to_string())),
    }
}

/// Writes a 2D `f32` plane as `.npy`, creating parent directories.
pub fn save_slice<P: AsRef<Path>>(path: P, plane: &Array2<f32>) -> PipelineResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|err| PipelineError::io(parent.display().to_string(), err))?;
        }
    }
    write_npy(path, plane)
        .map_err(|err| PipelineError::array_format(path.display().to_string(), err.to_string()))
}

/// Writes the six planes as `input_{Z,Y,X}.npy` and `recon_{Z,Y,X}.npy`
/// into `dir`; returns the written paths.
pub fn save_slices<P: AsRef<Path>>(
    dir: P,
    comparison: &SliceComparison,
) -> PipelineResult<Vec<PathBuf>> {
    let dir = dir.as_ref();
    comparison
        .named_planes()
        .into_iter()
        .map(|(name, plane)| {
            let path = dir.join(format!("{name}.{SAMPLE_EXTENSION}"));
            save_slice(&path, plane)?;
            Ok(path)
        })
        .collect()
}
