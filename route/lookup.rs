//! # Static Lookup Tables
//!
//! Two read-only mappings produced offline by the data-preparation scripts:
//!
//! - diagnosis code -> ordered candidate procedures, each with its historical usage
//!   fraction within the diagnosis and its reference median cost;
//! - procedure code -> human-readable description.
//!
//! The tables are loaded once with the `polars` CSV reader. Every column is read as
//! text first so clinical codes keep their exact spelling (leading zeros included);
//! numeric columns are cast afterwards and validated.

use crate::types::DiagnosisProcedureEntry;
use ahash::AHashMap;
use log::info;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

const DIAGNOSIS_TABLE: &str = "diagnosis table";
const DESCRIPTION_TABLE: &str = "description table";

pub const DIAGNOSIS_CODE_COLUMN: &str = "diagnosis_code";
pub const PROCEDURE_CODE_COLUMN: &str = "procedure_code";
pub const USAGE_FRACTION_COLUMN: &str = "usage_fraction";
pub const REFERENCE_MEDIAN_COLUMN: &str = "reference_median";
pub const DESCRIPTION_COLUMN: &str = "description";

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("The required column '{column}' was not found in the {table}.")]
    ColumnNotFound { table: &'static str, column: String },
    #[error("Missing values were found in column '{column}' of the {table}.")]
    MissingValuesFound { table: &'static str, column: String },
    #[error("Column '{column}' of the {table} contains non-numeric or non-finite values.")]
    NonNumericValues { table: &'static str, column: String },
    #[error(
        "Usage fraction {value} for procedure '{procedure}' under diagnosis '{diagnosis}' is outside [0, 1]."
    )]
    UsageOutOfRange {
        diagnosis: String,
        procedure: String,
        value: f64,
    },
}

/// Diagnosis and description lookups. Immutable after construction.
#[derive(Debug, Clone, Default)]
pub struct LookupTables {
    procedures: AHashMap<String, Vec<DiagnosisProcedureEntry>>,
    descriptions: AHashMap<String, String>,
}

impl LookupTables {
    /// Builds the tables from in-memory rows. Diagnosis rows keep their relative order
    /// within each diagnosis.
    pub fn from_entries<D, P>(diagnosis_rows: D, descriptions: P) -> Result<Self, LookupError>
    where
        D: IntoIterator<Item = (String, DiagnosisProcedureEntry)>,
        P: IntoIterator<Item = (String, String)>,
    {
        let mut procedures: AHashMap<String, Vec<DiagnosisProcedureEntry>> = AHashMap::new();
        for (diagnosis, entry) in diagnosis_rows {
            if !(0.0..=1.0).contains(&entry.usage_fraction) {
                return Err(LookupError::UsageOutOfRange {
                    diagnosis,
                    procedure: entry.procedure_code,
                    value: entry.usage_fraction,
                });
            }
            procedures.entry(diagnosis).or_default().push(entry);
        }

        Ok(Self {
            procedures,
            descriptions: descriptions.into_iter().collect(),
        })
    }

    /// Loads both tables from CSV files.
    pub fn load(diagnosis_table: &Path, description_table: &Path) -> Result<Self, LookupError> {
        info!("Loading diagnosis table from '{}'", diagnosis_table.display());
        let df = internal::read_text_table(
            diagnosis_table,
            DIAGNOSIS_TABLE,
            &[
                DIAGNOSIS_CODE_COLUMN,
                PROCEDURE_CODE_COLUMN,
                USAGE_FRACTION_COLUMN,
                REFERENCE_MEDIAN_COLUMN,
            ],
        )?;
        let diagnoses = internal::text_column(&df, DIAGNOSIS_TABLE, DIAGNOSIS_CODE_COLUMN)?;
        let codes = internal::text_column(&df, DIAGNOSIS_TABLE, PROCEDURE_CODE_COLUMN)?;
        let fractions = internal::numeric_column(&df, DIAGNOSIS_TABLE, USAGE_FRACTION_COLUMN)?;
        let medians = internal::numeric_column(&df, DIAGNOSIS_TABLE, REFERENCE_MEDIAN_COLUMN)?;

        let diagnosis_rows = diagnoses
            .into_iter()
            .zip(codes)
            .zip(fractions.into_iter().zip(medians))
            .map(|((diagnosis, procedure_code), (usage_fraction, reference_median))| {
                (
                    diagnosis,
                    DiagnosisProcedureEntry {
                        procedure_code,
                        usage_fraction,
                        reference_median,
                    },
                )
            });

        info!("Loading procedure descriptions from '{}'", description_table.display());
        let df = internal::read_text_table(
            description_table,
            DESCRIPTION_TABLE,
            &[PROCEDURE_CODE_COLUMN, DESCRIPTION_COLUMN],
        )?;
        let description_codes = internal::text_column(&df, DESCRIPTION_TABLE, PROCEDURE_CODE_COLUMN)?;
        let texts = internal::text_column(&df, DESCRIPTION_TABLE, DESCRIPTION_COLUMN)?;

        let tables = Self::from_entries(diagnosis_rows, description_codes.into_iter().zip(texts))?;
        info!(
            "Lookup tables ready: {} diagnoses, {} procedure descriptions.",
            tables.diagnosis_count(),
            tables.descriptions.len()
        );
        Ok(tables)
    }

    /// Candidate procedures for a diagnosis, in table order. Unknown diagnoses have none.
    pub fn procedures_for_diagnosis(&self, code: &str) -> &[DiagnosisProcedureEntry] {
        self.procedures.get(code).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The description of a procedure, or the code itself when none is recorded.
    pub fn description_for_procedure<'a>(&'a self, code: &'a str) -> &'a str {
        self.descriptions.get(code).map(String::as_str).unwrap_or(code)
    }

    pub fn diagnosis_count(&self) -> usize {
        self.procedures.len()
    }
}

mod internal {
    use super::*;

    pub(super) fn read_text_table(
        path: &Path,
        table: &'static str,
        required: &[&str],
    ) -> Result<DataFrame, LookupError> {
        // A zero-row schema inference reads every column as a string.
        let df = CsvReader::new(File::open(path)?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_infer_schema_length(Some(0)),
            )
            .finish()?;

        let present: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        for column in required {
            if !present.iter().any(|p| p == column) {
                return Err(LookupError::ColumnNotFound {
                    table,
                    column: column.to_string(),
                });
            }
        }
        Ok(df)
    }

    pub(super) fn text_column(
        df: &DataFrame,
        table: &'static str,
        name: &str,
    ) -> Result<Vec<String>, LookupError> {
        let column = df.column(name)?;
        if column.null_count() > 0 {
            return Err(LookupError::MissingValuesFound {
                table,
                column: name.to_string(),
            });
        }
        let casted = column.cast(&DataType::String)?;
        let values = casted
            .str()?
            .into_no_null_iter()
            .map(str::to_string)
            .collect();
        Ok(values)
    }

    pub(super) fn numeric_column(
        df: &DataFrame,
        table: &'static str,
        name: &str,
    ) -> Result<Vec<f64>, LookupError> {
        let column = df.column(name)?;
        if column.null_count() > 0 {
            return Err(LookupError::MissingValuesFound {
                table,
                column: name.to_string(),
            });
        }

        let non_numeric = || LookupError::NonNumericValues {
            table,
            column: name.to_string(),
        };
        let casted = column.cast(&DataType::Float64).map_err(|_| non_numeric())?;
        if casted.null_count() > 0 {
            return Err(non_numeric());
        }

        let values: Vec<f64> = casted.f64()?.into_no_null_iter().collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(non_numeric());
        }
        Ok(values)
    }
}
