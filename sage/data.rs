//! # Data Loading and Validation Module
//!
//! Entry point for user-provided tabular data. A delimited file with a header
//! row is read with `polars`, every column is validated as complete, numeric
//! and finite, and the result is reshaped into the `ndarray` structures the
//! estimator consumes.
//!
//! - Target Convention: unless a target column is named explicitly, the last
//!   column is the target and every preceding column is a feature, in file
//!   order. That order is the order of the importance vector.
//! - User-Centric Errors: failures are assumed to be user-input errors and
//!   `DataError` names the offending column.

use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use rand::Rng;
use rand::seq::index;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// A feature matrix paired row-for-row with its targets.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Shape: [n_rows, n_features].
    pub features: Array2<f64>,
    pub targets: Array1<f64>,
    /// Column names, index-aligned with `features`.
    pub feature_names: Vec<String>,
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. It contains non-numeric data. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the column '{0}'. This tool requires complete data with no missing values."
    )]
    MissingValuesFound(String),
    #[error(
        "Non-finite values (NaN or Infinity) were found in the column '{0}'. This tool requires all data to be finite."
    )]
    NonFiniteValuesFound(String),
    #[error("Input file has {0} column(s); at least one feature column and one target column are required.")]
    TooFewColumns(usize),
    #[error("The dataset contains no rows.")]
    EmptyDataset,
    #[error("Feature matrix has {features} rows but the target vector has {targets}.")]
    RowCountMismatch { features: usize, targets: usize },
    #[error("Feature matrix has {columns} columns but {names} feature names were given.")]
    NameCountMismatch { columns: usize, names: usize },
    #[error("Feature index {index} is out of range for a dataset with {num_features} features.")]
    FeatureIndexOutOfRange { index: usize, num_features: usize },
}

impl Dataset {
    pub fn new(
        features: Array2<f64>,
        targets: Array1<f64>,
        feature_names: Vec<String>,
    ) -> Result<Self, DataError> {
        if features.nrows() != targets.len() {
            return Err(DataError::RowCountMismatch {
                features: features.nrows(),
                targets: targets.len(),
            });
        }
        if features.ncols() != feature_names.len() {
            return Err(DataError::NameCountMismatch {
                columns: features.ncols(),
                names: feature_names.len(),
            });
        }
        if features.nrows() == 0 {
            return Err(DataError::EmptyDataset);
        }
        if features.ncols() == 0 {
            return Err(DataError::TooFewColumns(1));
        }
        for (name, column) in feature_names.iter().zip(features.axis_iter(Axis(1))) {
            if column.iter().any(|v| !v.is_finite()) {
                return Err(DataError::NonFiniteValuesFound(name.clone()));
            }
        }
        if targets.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound("target".to_string()));
        }
        Ok(Self {
            features,
            targets,
            feature_names,
        })
    }

    /// Builds a dataset with generated names `x0`, `x1`, ...
    pub fn from_arrays(features: Array2<f64>, targets: Array1<f64>) -> Result<Self, DataError> {
        let names = (0..features.ncols()).map(|j| format!("x{j}")).collect();
        Self::new(features, targets, names)
    }

    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    /// Returns a copy holding only the given feature columns, in the given order.
    pub fn select_features(&self, indices: &[usize]) -> Result<Self, DataError> {
        if let Some(&index) = indices.iter().find(|&&i| i >= self.n_features()) {
            return Err(DataError::FeatureIndexOutOfRange {
                index,
                num_features: self.n_features(),
            });
        }
        Ok(Self {
            features: self.features.select(Axis(1), indices),
            targets: self.targets.clone(),
            feature_names: indices
                .iter()
                .map(|&i| self.feature_names[i].clone())
                .collect(),
        })
    }

    /// Reorders columns so that they follow `names`. Used to line a background
    /// file up with the explicand when the two files order columns differently.
    pub fn align_to(&self, names: &[String]) -> Result<Self, DataError> {
        let indices = names
            .iter()
            .map(|name| {
                self.feature_names
                    .iter()
                    .position(|candidate| candidate == name)
                    .ok_or_else(|| DataError::ColumnNotFound(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.select_features(&indices)
    }

    /// Draws `n` distinct rows uniformly at random, preserving their original
    /// relative order. Returns a full copy when `n` covers every row.
    pub fn sample_rows<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Self {
        if n >= self.n_rows() {
            return self.clone();
        }
        let mut rows = index::sample(rng, self.n_rows(), n).into_vec();
        rows.sort_unstable();
        Self {
            features: self.features.select(Axis(0), &rows),
            targets: self.targets.select(Axis(0), &rows),
            feature_names: self.feature_names.clone(),
        }
    }
}

/// Loads a delimited file with a header row.
///
/// `target_column` names the target; when `None`, the last column is used.
pub fn load_dataset(
    path: &Path,
    target_column: Option<&str>,
    separator: u8,
) -> Result<Dataset, DataError> {
    log::info!("Loading data from '{}'", path.display());

    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(separator)),
        )
        .finish()?;

    let columns: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    if columns.len() < 2 {
        return Err(DataError::TooFewColumns(columns.len()));
    }
    if df.height() == 0 {
        return Err(DataError::EmptyDataset);
    }

    let target_name = match target_column {
        Some(name) => {
            if !columns.iter().any(|c| c == name) {
                return Err(DataError::ColumnNotFound(name.to_string()));
            }
            name.to_string()
        }
        None => columns[columns.len() - 1].clone(),
    };
    let feature_names: Vec<String> = columns
        .iter()
        .filter(|c| **c != target_name)
        .cloned()
        .collect();

    let n = df.height();
    let targets = Array1::from_vec(extract_numeric_column(&df, &target_name)?);

    let mut features = Array2::<f64>::zeros((n, feature_names.len()));
    for (j, name) in feature_names.iter().enumerate() {
        let values = extract_numeric_column(&df, name)?;
        features
            .column_mut(j)
            .iter_mut()
            .zip(values)
            .for_each(|(slot, v)| *slot = v);
    }

    log::info!(
        "Loaded {} rows with {} features; target column '{}'",
        n,
        feature_names.len(),
        target_name
    );

    Dataset::new(features, targets, feature_names)
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }

    let wrong_type = || DataError::ColumnWrongType {
        column_name: column_name.to_string(),
        expected_type: "f64 (numeric)",
        found_type: format!("{:?}", series.dtype()),
    };
    let casted = series.cast(&DataType::Float64).map_err(|_| wrong_type())?;
    if casted.null_count() > 0 {
        return Err(wrong_type());
    }

    let chunked = casted.f64()?.rechunk();
    let values: Vec<f64> = chunked.into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_csv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    fn bike_rows(num_rows: usize) -> String {
        let mut rows = vec!["season,temp,hum,windspeed,cnt".to_string()];
        for i in 0..num_rows {
            rows.push(format!(
                "{},{:.2},{:.2},{:.3},{}",
                1 + i % 4,
                0.2 + i as f64 / 100.0,
                0.5 + (i % 3) as f64 / 10.0,
                0.1 + (i % 5) as f64 / 50.0,
                100 + 7 * i
            ));
        }
        rows.join("\n")
    }

    #[test]
    fn last_column_is_the_default_target() {
        let file = create_test_csv(&bike_rows(25)).unwrap();
        let data = load_dataset(file.path(), None, b',').unwrap();

        assert_eq!(data.feature_names, vec!["season", "temp", "hum", "windspeed"]);
        assert_eq!(data.features.shape(), &[25, 4]);
        assert_eq!(data.targets.len(), 25);
        assert_abs_diff_eq!(data.features[[0, 0]], 1.0);
        assert_abs_diff_eq!(data.features[[10, 1]], 0.30, epsilon = 1e-9);
        assert_abs_diff_eq!(data.targets[3], 121.0);
    }

    #[test]
    fn explicit_target_keeps_remaining_columns_in_file_order() {
        let file = create_test_csv(&bike_rows(5)).unwrap();
        let data = load_dataset(file.path(), Some("temp"), b',').unwrap();
        assert_eq!(data.feature_names, vec!["season", "hum", "windspeed", "cnt"]);
        assert_abs_diff_eq!(data.targets[0], 0.2, epsilon = 1e-9);
    }

    #[test]
    fn tab_separated_files_are_supported() {
        let content = "a\tb\ty\n1\t2\t3\n4\t5\t6";
        let file = create_test_csv(content).unwrap();
        let data = load_dataset(file.path(), None, b'\t').unwrap();
        assert_eq!(data.features, array![[1.0, 2.0], [4.0, 5.0]]);
        assert_eq!(data.targets, array![3.0, 6.0]);
    }

    #[test]
    fn error_column_not_found() {
        let file = create_test_csv(&bike_rows(5)).unwrap();
        let err = load_dataset(file.path(), Some("registered"), b',').unwrap_err();
        match err {
            DataError::ColumnNotFound(col) => assert_eq!(col, "registered"),
            other => panic!("Expected ColumnNotFound, got {:?}", other),
        }
    }

    #[test]
    fn error_missing_values() {
        let content = "a,b,y\n1,,3\n4,5,6";
        let file = create_test_csv(content).unwrap();
        match load_dataset(file.path(), None, b',') {
            Err(DataError::MissingValuesFound(col)) => assert_eq!(col, "b"),
            other => panic!("Expected MissingValuesFound(b), got {:?}", other),
        }
    }

    #[test]
    fn error_wrong_type() {
        let content = "a,b,y\n1,spring,3\n4,summer,6";
        let file = create_test_csv(content).unwrap();
        match load_dataset(file.path(), None, b',') {
            Err(DataError::ColumnWrongType { column_name, .. }) => assert_eq!(column_name, "b"),
            other => panic!("Expected ColumnWrongType(b), got {:?}", other),
        }
    }

    #[test]
    fn error_too_few_columns() {
        let content = "y\n1\n2";
        let file = create_test_csv(content).unwrap();
        match load_dataset(file.path(), None, b',') {
            Err(DataError::TooFewColumns(1)) => {}
            other => panic!("Expected TooFewColumns(1), got {:?}", other),
        }
    }

    #[test]
    fn constructor_rejects_inconsistent_shapes() {
        let err = Dataset::from_arrays(array![[1.0], [2.0]], array![1.0]).unwrap_err();
        assert!(matches!(
            err,
            DataError::RowCountMismatch {
                features: 2,
                targets: 1
            }
        ));

        let err = Dataset::new(array![[1.0, 2.0]], array![1.0], vec!["a".into()]).unwrap_err();
        assert!(matches!(err, DataError::NameCountMismatch { columns: 2, names: 1 }));

        let err = Dataset::from_arrays(array![[f64::NAN]], array![1.0]).unwrap_err();
        assert!(matches!(err, DataError::NonFiniteValuesFound(ref c) if c == "x0"));
    }

    #[test]
    fn select_and_align_reorder_columns() {
        let data = Dataset::new(
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            array![0.0, 1.0],
            vec!["a".into(), "b".into(), "c".into()],
        )
        .unwrap();

        let picked = data.select_features(&[2, 0]).unwrap();
        assert_eq!(picked.features, array![[3.0, 1.0], [6.0, 4.0]]);
        assert_eq!(picked.feature_names, vec!["c", "a"]);

        let aligned = data
            .align_to(&["b".to_string(), "c".to_string(), "a".to_string()])
            .unwrap();
        assert_eq!(aligned.features, array![[2.0, 3.0, 1.0], [5.0, 6.0, 4.0]]);

        assert!(matches!(
            data.select_features(&[3]),
            Err(DataError::FeatureIndexOutOfRange { index: 3, num_features: 3 })
        ));
        assert!(matches!(
            data.align_to(&["z".to_string()]),
            Err(DataError::ColumnNotFound(ref c)) if c == "z"
        ));
    }

    #[test]
    fn sample_rows_keeps_rows_intact() {
        let features = Array2::from_shape_fn((50, 2), |(i, j)| (i * 10 + j) as f64);
        let targets = Array1::from_shape_fn(50, |i| i as f64);
        let data = Dataset::from_arrays(features, targets).unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let sample = data.sample_rows(12, &mut rng);
        assert_eq!(sample.n_rows(), 12);
        for (row, &target) in sample.features.rows().into_iter().zip(sample.targets.iter()) {
            assert_abs_diff_eq!(row[0], target * 10.0);
            assert_abs_diff_eq!(row[1], target * 10.0 + 1.0);
        }

        let everything = data.sample_rows(500, &mut rng);
        assert_eq!(everything.n_rows(), 50);
    }
}
