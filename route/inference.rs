//! # Inference Engine
//!
//! Turns one feature row into a raw prediction using a single bundle:
//!
//! 1. Select the encoder's declared input columns from the row, in the encoder's
//!    order. Row columns the encoder does not know are dropped.
//! 2. One-hot encode and run the regressor.
//! 3. Read the fixed output positions and decode the mortality ordinal through the
//!    bundle's own decoder.

use crate::bundle::{ComponentError, ModelBundle, REQUIRED_OUTPUTS};
use crate::types::FeatureRow;
use thiserror::Error;

pub const COST_OUTPUT: usize = 0;
pub const LENGTH_OF_STAY_OUTPUT: usize = 1;
pub const MORTALITY_OUTPUT: usize = 2;

/// Model output for one row, before any cost adjustment.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPrediction {
    pub cost: f64,
    pub length_of_stay: f64,
    pub mortality: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("the encoder expects column '{0}', which the request row does not provide")]
    EncoderColumnMissing(String),
    #[error("{0}")]
    Component(#[from] ComponentError),
    #[error("the regressor produced {found} outputs, at least {required} are required")]
    OutputTooShort { found: usize, required: usize },
    #[error("mortality ordinal {ordinal} is outside the decoder's {classes} classes")]
    MortalityOutOfRange { ordinal: i64, classes: usize },
    #[error("the regressor produced a non-finite value {value} at output {position}")]
    NonFiniteOutput { position: usize, value: f64 },
}

/// Predicts cost, length of stay and mortality tier for `row`.
pub fn predict(bundle: &ModelBundle, row: &FeatureRow) -> Result<RawPrediction, InferenceError> {
    // --- 1. Align the row to the encoder's input columns ---
    let values = bundle
        .encoder
        .feature_names_in
        .iter()
        .map(|column| {
            row.value_for_column(column)
                .ok_or_else(|| InferenceError::EncoderColumnMissing(column.clone()))
        })
        .collect::<Result<Vec<&str>, _>>()?;

    // --- 2. Encode and predict ---
    let encoded = bundle.encoder.transform(&values)?;
    let output = bundle.model.predict(encoded.view())?;
    if output.len() < REQUIRED_OUTPUTS {
        return Err(InferenceError::OutputTooShort {
            found: output.len(),
            required: REQUIRED_OUTPUTS,
        });
    }

    if let Some(position) = (0..REQUIRED_OUTPUTS).find(|&i| !output[i].is_finite()) {
        return Err(InferenceError::NonFiniteOutput {
            position,
            value: output[position],
        });
    }

    // --- 3. Decode the mortality ordinal ---
    // The raw output is an average and may be fractional.
    let ordinal = output[MORTALITY_OUTPUT].round_ties_even() as i64;
    let mortality = bundle
        .mortality_encoder
        .inverse_transform(ordinal)
        .ok_or(InferenceError::MortalityOutOfRange {
            ordinal,
            classes: bundle.mortality_encoder.classes.len(),
        })?
        .to_string();

    log::trace!(
        "Raw prediction: cost={:.2}, length_of_stay={:.2}, mortality={mortality}",
        output[COST_OUTPUT],
        output[LENGTH_OF_STAY_OUTPUT]
    );

    Ok(RawPrediction {
        cost: output[COST_OUTPUT],
        length_of_stay: output[LENGTH_OF_STAY_OUTPUT],
        mortality,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{LabelDecoder, OneHotEncoder, Regressor};
    use crate::types::Feature;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    /// Bundle over (procedure, gender): costs 1000/4000 for ADM001/CAR004, Male adds 500.
    fn bundle(mortality_rows: [f64; 4]) -> ModelBundle {
        ModelBundle {
            features: vec!["CCSR Procedure Code".into(), "Gender".into()],
            target_columns: Vec::new(),
            encoder: OneHotEncoder {
                feature_names_in: vec!["CCSR Procedure Code".into(), "Gender".into()],
                categories: vec![
                    vec!["ADM001".into(), "CAR004".into()],
                    vec!["F".into(), "M".into()],
                ],
            },
            model: Regressor::Linear {
                intercept: array![0.0, 0.0, 0.0],
                coefficients: Array2::from(vec![
                    [1000.0, 4000.0, 0.0, 500.0],
                    [3.0, 7.5, 0.0, 0.0],
                    mortality_rows,
                ]),
            },
            mortality_encoder: LabelDecoder {
                classes: vec!["Extreme".into(), "Major".into(), "Minor".into(), "Moderate".into()],
            },
        }
    }

    fn row(procedure: &str, gender: &str) -> FeatureRow {
        FeatureRow::new()
            .with(Feature::ProcedureCode, procedure)
            .with(Feature::Gender, gender)
            .with(Feature::TypeOfAdmission, "Emergency")
    }

    #[test]
    fn extra_row_columns_are_dropped_and_outputs_read_by_position() {
        let prediction = predict(&bundle([2.0, 1.0, 0.0, 0.0]), &row("CAR004", "M")).unwrap();
        assert_abs_diff_eq!(prediction.cost, 4500.0, epsilon = 1e-9);
        assert_abs_diff_eq!(prediction.length_of_stay, 7.5, epsilon = 1e-9);
        assert_eq!(prediction.mortality, "Major");
    }

    #[test]
    fn fractional_mortality_is_rounded_before_decoding() {
        let prediction = predict(&bundle([2.4, 1.0, 0.0, 0.0]), &row("ADM001", "F")).unwrap();
        assert_eq!(prediction.mortality, "Minor");
        let prediction = predict(&bundle([2.6, 1.0, 0.0, 0.0]), &row("ADM001", "F")).unwrap();
        assert_eq!(prediction.mortality, "Moderate");
    }

    #[test]
    fn out_of_range_mortality_is_an_error() {
        let err = predict(&bundle([7.0, 1.0, 0.0, 0.0]), &row("ADM001", "F")).unwrap_err();
        assert_eq!(
            err,
            InferenceError::MortalityOutOfRange {
                ordinal: 7,
                classes: 4
            }
        );
    }

    #[test]
    fn unknown_encoder_column_is_reported() {
        let mut b = bundle([0.0; 4]);
        b.encoder.feature_names_in[1] = "Zip Code".into();
        let err = predict(&b, &row("ADM001", "F")).unwrap_err();
        assert_eq!(err, InferenceError::EncoderColumnMissing("Zip Code".into()));
    }

    #[test]
    fn non_finite_outputs_are_rejected_instead_of_decoded() {
        let mut b = bundle([0.0; 4]);
        b.model = Regressor::Linear {
            intercept: array![100.0, 1.0, f64::NAN],
            coefficients: Array2::zeros((3, 4)),
        };
        let err = predict(&b, &row("ADM001", "F")).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::NonFiniteOutput { position: MORTALITY_OUTPUT, value } if value.is_nan()
        ));

        b.model = Regressor::Linear {
            intercept: array![f64::INFINITY, 1.0, 2.0],
            coefficients: Array2::zeros((3, 4)),
        };
        let err = predict(&b, &row("ADM001", "F")).unwrap_err();
        assert!(matches!(
            err,
            InferenceError::NonFiniteOutput { position: COST_OUTPUT, .. }
        ));
    }
}
