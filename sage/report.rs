use crate::sampler::SageValues;
use itertools::Itertools;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write the results file: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Failed to write the results file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("{names} feature names were given for {values} SAGE values.")]
    NameCountMismatch { names: usize, values: usize },
}

fn check_names(names: &[String], result: &SageValues) -> Result<(), ReportError> {
    if names.len() != result.values.len() {
        return Err(ReportError::NameCountMismatch {
            names: names.len(),
            values: result.values.len(),
        });
    }
    Ok(())
}

/// Writes one row per feature, in input column order, to a tab-separated file
/// with columns `feature`, `sage_value` and `std_error`.
pub fn write_sage_tsv(path: &Path, names: &[String], result: &SageValues) -> Result<(), ReportError> {
    check_names(names, result)?;
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record(["feature", "sage_value", "std_error"])?;
    for ((name, value), std_error) in names
        .iter()
        .zip(result.values.iter())
        .zip(result.std_errors.iter())
    {
        writer.write_record([name.clone(), value.to_string(), std_error.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// A console table of the features, most important first.
pub fn format_summary(names: &[String], result: &SageValues) -> Result<String, ReportError> {
    check_names(names, result)?;
    let width = names.iter().map(String::len).max().unwrap_or(0).max(7);
    let header = format!("{:<width$}  {:>12}  {:>12}", "feature", "sage_value", "std_error");
    let rows = result
        .ranking()
        .into_iter()
        .map(|j| {
            format!(
                "{:<width$}  {:>12.6}  {:>12.6}",
                names[j], result.values[j], result.std_errors[j]
            )
        })
        .join("\n");
    let footer = format!(
        "{} permutations{}, total {:.6}",
        result.n_permutations,
        if result.converged { " (converged)" } else { "" },
        result.sum()
    );
    Ok([header, rows, footer].join("\n"))
}
