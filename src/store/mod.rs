//! Flat comma-separated persistence of the calibrated camera.
//!
//! The file holds exactly two records: the row-major 3x3 camera matrix, then
//! the five distortion coefficients. Every value is written with four
//! decimals. Reading is deliberately forgiving: a token that is not a number
//! falls back to its longest numeric prefix, or zero, with a warning.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use log::warn;
use nalgebra::DMatrix;

use crate::camera::rad_tan::DISTORTION_LEN;
use crate::camera::{CameraModelError, RadTanModel, Resolution};

/// Number of records a complete parameter file carries.
pub const RECORD_COUNT: usize = 2;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Unable to open parameter file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Parameter file holds {found} of {expected} records")]
    MissingRecord { found: usize, expected: usize },
    #[error("Record {record} has {actual} values, expected {expected}")]
    WrongRecordLength {
        record: usize,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Model(#[from] CameraModelError),
}

/// Reader and writer for one parameter file.
#[derive(Debug, Clone)]
pub struct ParameterStore {
    path: PathBuf,
}

impl ParameterStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        ParameterStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Writes `matrix` row-major as one record. `truncate` clears the file
    /// first; otherwise the record is appended.
    pub fn write_matrix(&self, matrix: &DMatrix<f64>, truncate: bool) -> Result<(), StoreError> {
        let mut options = OpenOptions::new();
        options.create(true);
        if truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options.open(&self.path).map_err(|e| self.io_error(e))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);
        let record: Vec<String> = (0..matrix.nrows())
            .flat_map(|r| (0..matrix.ncols()).map(move |c| (r, c)))
            .map(|(r, c)| format!("{:.4}", matrix[(r, c)]))
            .collect();
        writer.write_record(&record)?;
        writer.flush().map_err(|e| self.io_error(e))?;
        Ok(())
    }

    /// Reads up to the first two records as numbers.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] when the file cannot be opened and
    /// [`StoreError::MissingRecord`] when fewer than two records exist.
    pub fn read_records(&self) -> Result<Vec<Vec<f64>>, StoreError> {
        let file = File::open(&self.path).map_err(|e| self.io_error(e))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut records = Vec::with_capacity(RECORD_COUNT);
        for (index, record) in reader.records().take(RECORD_COUNT).enumerate() {
            let record = record?;
            let values = record
                .iter()
                .enumerate()
                .map(|(field, token)| parse_lenient(token, index + 1, field + 1))
                .collect();
            records.push(values);
        }

        if records.len() < RECORD_COUNT {
            return Err(StoreError::MissingRecord {
                found: records.len(),
                expected: RECORD_COUNT,
            });
        }
        Ok(records)
    }

    /// Rewrites the file with the model's camera matrix, then appends its
    /// distortion coefficients.
    pub fn save_model(&self, model: &RadTanModel) -> Result<(), StoreError> {
        self.write_matrix(&model.camera_matrix(), true)?;
        self.write_matrix(&model.distortion_matrix(), false)
    }

    /// Rebuilds a camera from the stored records.
    pub fn load_model(&self, resolution: Resolution) -> Result<RadTanModel, StoreError> {
        let records = self.read_records()?;
        for (record, expected) in [(0, 9), (1, DISTORTION_LEN)] {
            if records[record].len() != expected {
                return Err(StoreError::WrongRecordLength {
                    record: record + 1,
                    expected,
                    actual: records[record].len(),
                });
            }
        }
        Ok(RadTanModel::from_parameters(
            &records[0],
            &records[1],
            resolution,
        )?)
    }
}

/// Parses a token leniently: the longest numeric prefix wins, and a
/// token without one reads as zero.
fn parse_lenient(token: &str, record: usize, field: usize) -> f64 {
    let trimmed = token.trim();
    if let Ok(value) = trimmed.parse::<f64>() {
        return value;
    }

    let prefix = trimmed
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .rev()
        .find_map(|end| trimmed[..end].parse::<f64>().ok());
    let value = prefix.unwrap_or(0.0);
    warn!("Record {record} field {field}: '{token}' is not a number, read as {value}");
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Intrinsics;
    use approx::assert_abs_diff_eq;
    use std::fs;

    fn temp_store(name: &str) -> ParameterStore {
        ParameterStore::new(std::env::temp_dir().join(format!("calib_ar_store_{name}.csv")))
    }

    #[test]
    fn test_write_then_read_keeps_four_decimals() {
        let store = temp_store("round_trip");
        let m = DMatrix::from_row_slice(
            3,
            3,
            &[812.34567, 0.0, 319.5, 0.0, 812.34567, 241.25, 0.0, 0.0, 1.0],
        );
        let d = DMatrix::from_row_slice(1, 5, &[-0.123456, 0.05, 0.0001, -0.00049, 0.0]);
        store.write_matrix(&m, true).unwrap();
        store.write_matrix(&d, false).unwrap();

        let contents = fs::read_to_string(store.path()).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next(),
            Some("812.3457,0.0000,319.5000,0.0000,812.3457,241.2500,0.0000,0.0000,1.0000")
        );
        assert_eq!(lines.next(), Some("-0.1235,0.0500,0.0001,-0.0005,0.0000"));
        assert!(contents.ends_with('\n'));

        let records = store.read_records().unwrap();
        assert_eq!(records.len(), 2);
        for (r, c) in (0..3).flat_map(|r| (0..3).map(move |c| (r, c))) {
            assert_abs_diff_eq!(records[0][r * 3 + c], m[(r, c)], epsilon = 5e-5);
        }
        for (i, value) in records[1].iter().enumerate() {
            assert_abs_diff_eq!(*value, d[(0, i)], epsilon = 5e-5);
        }
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn test_truncate_replaces_previous_contents() {
        let store = temp_store("truncate");
        let m = DMatrix::from_row_slice(1, 2, &[1.0, 2.0]);
        store.write_matrix(&m, true).unwrap();
        store.write_matrix(&m, false).unwrap();
        store.write_matrix(&m, false).unwrap();
        store.write_matrix(&m, true).unwrap();

        let contents = fs::read_to_string(store.path()).unwrap();
        assert_eq!(contents, "1.0000,2.0000\n");
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn test_read_is_lenient_with_bad_tokens() {
        let store = temp_store("lenient");
        fs::write(store.path(), "1.5,abc,2.25xyz\n-3,,4e1\nextra\n").unwrap();

        let records = store.read_records().unwrap();
        assert_eq!(records, vec![vec![1.5, 0.0, 2.25], vec![-3.0, 0.0, 40.0]]);
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn test_read_missing_file_is_io_error() {
        let store = ParameterStore::new("/nonexistent/calib_ar/data.csv");
        assert!(matches!(store.read_records(), Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_read_single_record_is_missing_record() {
        let store = temp_store("single");
        fs::write(store.path(), "1,2,3\n").unwrap();
        assert!(matches!(
            store.read_records(),
            Err(StoreError::MissingRecord { found: 1, expected: 2 })
        ));
        let _ = fs::remove_file(store.path());
    }

    #[test]
    fn test_model_round_trip_and_length_check() {
        let store = temp_store("model");
        let resolution = Resolution {
            width: 640,
            height: 480,
        };
        let model = RadTanModel {
            intrinsics: Intrinsics {
                fx: 800.0,
                fy: 800.0,
                cx: 320.0,
                cy: 240.0,
            },
            resolution,
            distortions: [-0.1, 0.01, 0.0, 0.0, 0.0],
        };
        store.save_model(&model).unwrap();
        assert_eq!(store.load_model(resolution).unwrap(), model);

        fs::write(store.path(), "1,0,0,0,1,0,0,0,1\n0,0,0\n").unwrap();
        assert!(matches!(
            store.load_model(resolution),
            Err(StoreError::WrongRecordLength {
                record: 2,
                expected: 5,
                actual: 3
            })
        ));
        let _ = fs::remove_file(store.path());
    }
}
