//! Batch prediction over a CSV of encounters.
//!
//! Every input row is one direct procedure request. Columns are matched by their
//! training names (`CCSR Procedure Code`, `Age Group`, ...); any other columns are
//! carried through untouched. A row that fails to predict records its error and the
//! run continues. Rows without a procedure code are skipped.

use crate::bundle::BundleSource;
use crate::files::create_output;
use crate::router::Predictor;
use crate::types::{DirectPrediction, Feature, FeatureRow};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{info, warn};
use rayon::prelude::*;
use std::fs::File;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PREDICTED_COST_COLUMN: &str = "predicted_total_costs";
pub const PREDICTED_LENGTH_OF_STAY_COLUMN: &str = "predicted_length_of_stay";
pub const PREDICTED_MORTALITY_COLUMN: &str = "predicted_mortality";
pub const ERROR_COLUMN: &str = "error";

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Failed to open batch input '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read or write batch file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse batch CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("The batch input has no '{}' column.", Feature::ProcedureCode.column_name())]
    NoProcedureColumn,
}

/// Counts for a finished batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub predicted: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.predicted + self.failed + self.skipped
    }
}

fn create_progress_bar(len: u64) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    let style = ProgressStyle::with_template(
        "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    pb.set_message("predicting");
    pb
}

/// Maps each recognized feature to its column index in the input header.
fn feature_columns(headers: &csv::StringRecord) -> Vec<(Feature, usize)> {
    Feature::ALL
        .into_iter()
        .filter_map(|feature| {
            headers
                .iter()
                .position(|h| h.trim() == feature.column_name())
                .map(|idx| (feature, idx))
        })
        .collect()
}

fn row_from_record(record: &csv::StringRecord, columns: &[(Feature, usize)]) -> FeatureRow {
    let mut row = FeatureRow::new();
    for &(feature, idx) in columns {
        row.set(feature, record.get(idx).unwrap_or("").trim());
    }
    row
}

/// Predicts every row of `input` and writes the annotated rows to `output`.
pub fn predict_file<S: BundleSource>(
    predictor: &Predictor<S>,
    input: &Path,
    output: &Path,
) -> Result<BatchSummary, BatchError> {
    let file = File::open(input).map_err(|source| BatchError::Open {
        path: input.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let headers = reader.headers()?.clone();
    let columns = feature_columns(&headers);
    if !columns.iter().any(|&(f, _)| f == Feature::ProcedureCode) {
        return Err(BatchError::NoProcedureColumn);
    }
    let records = reader.records().collect::<Result<Vec<_>, _>>()?;
    info!(
        "Read {} rows from '{}' ({} feature columns).",
        records.len(),
        input.display(),
        columns.len()
    );

    let pb = create_progress_bar(records.len() as u64);
    let outcomes: Vec<Option<Result<DirectPrediction, String>>> = records
        .par_iter()
        .map(|record| {
            let row = row_from_record(record, &columns);
            let outcome = if row.get(Feature::ProcedureCode).is_empty() {
                None
            } else {
                Some(predictor.predict_procedure(&row).map_err(|e| e.to_string()))
            };
            pb.inc(1);
            outcome
        })
        .collect();
    pb.finish_and_clear();

    let mut writer = csv::Writer::from_writer(create_output(output)?);
    let mut out_headers = headers.clone();
    for name in [
        PREDICTED_COST_COLUMN,
        PREDICTED_LENGTH_OF_STAY_COLUMN,
        PREDICTED_MORTALITY_COLUMN,
        ERROR_COLUMN,
    ] {
        out_headers.push_field(name);
    }
    writer.write_record(&out_headers)?;

    let mut summary = BatchSummary::default();
    for (line, (record, outcome)) in records.iter().zip(outcomes).enumerate() {
        let mut out = record.clone();
        match outcome {
            None => {
                warn!("Row {}: no procedure code, skipping.", line + 1);
                summary.skipped += 1;
                continue;
            }
            Some(Ok(prediction)) => {
                out.push_field(&prediction.total_costs.to_string());
                out.push_field(&prediction.length_of_stay.to_string());
                out.push_field(&prediction.mortality);
                out.push_field("");
                summary.predicted += 1;
            }
            Some(Err(message)) => {
                for _ in 0..3 {
                    out.push_field("");
                }
                out.push_field(&message);
                summary.failed += 1;
            }
        }
        writer.write_record(&out)?;
    }
    writer.flush()?;

    info!(
        "Batch finished: {} predicted, {} failed, {} skipped. Results written to '{}'.",
        summary.predicted,
        summary.failed,
        summary.skipped,
        output.display()
    );
    Ok(summary)
}
