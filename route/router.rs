//! # Prediction Router
//!
//! Drives a request through the routing state machine:
//!
//! ```text
//! ParseRequest -> ResolveCandidates -> ResolveSignature (per candidate) -> Dispatch
//!              -> Aggregate -> Rank -> Truncate -> StripInternalFields -> Return
//! ```
//!
//! Candidates are processed one after another. A candidate whose feature signature
//! has no bundle aborts the whole request: a partial ranking would silently hide a
//! procedure the caller asked about.

use crate::aggregate::{self, DEFAULT_MAX_RESULTS, ScoredCandidate};
use crate::bundle::{BundleError, BundleSource, DiskLoader, ModelBundle};
use crate::inference::{self, RawPrediction};
use crate::lookup::LookupTables;
use crate::registry::{ModelRegistry, RouteMiss};
use crate::types::{
    Candidate, DirectPrediction, Feature, FeatureRow, FeatureSignature, Prediction,
    PredictionRequest, PredictionResponse, ProcedurePrediction,
};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Message returned to the caller whenever no bundle serves the request's features.
pub const MODEL_NOT_FOUND_MESSAGE: &str = "Model not found for these features";

/// Message returned to the caller when a routed bundle cannot be used. Paths stay in the log.
pub const BUNDLE_UNUSABLE_MESSAGE: &str = "Model for these features is unavailable";

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("{}", MODEL_NOT_FOUND_MESSAGE)]
    ModelNotFound { signature: FeatureSignature },
    #[error("{}", MODEL_NOT_FOUND_MESSAGE)]
    BundlePathInvalid { path: PathBuf },
    #[error("Model bundle '{}' is unusable: {reason}", path.display())]
    CorruptBundle { path: PathBuf, reason: String },
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
}

impl PredictError {
    /// The structured error body for the caller. Server-side paths and load
    /// failures are not part of it.
    pub fn to_response(&self) -> PredictionResponse {
        let error = match self {
            PredictError::CorruptBundle { .. } => BUNDLE_UNUSABLE_MESSAGE.to_string(),
            other => other.to_string(),
        };
        PredictionResponse::Error { error }
    }

    fn from_bundle_error(error: BundleError) -> Self {
        match error {
            BundleError::NotFound(path) => PredictError::BundlePathInvalid { path },
            BundleError::Io { path, source } => PredictError::CorruptBundle {
                path,
                reason: source.to_string(),
            },
            BundleError::Corrupt { path, reason } => PredictError::CorruptBundle { path, reason },
        }
    }
}

/// Extracts the code from a diagnosis label: the text after the last `(`, with every
/// `)` removed and surrounding whitespace trimmed. `"Pneumonia (J189)"` becomes
/// `"J189"`; a label without parentheses is only trimmed.
pub fn canonicalize_diagnosis_code(raw: &str) -> String {
    let tail = raw.rsplit('(').next().unwrap_or(raw);
    tail.replace(')', "").trim().to_string()
}

/// What the request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMode {
    Diagnosis(String),
    Procedure(String),
}

/// ParseRequest: decides the request mode and collects the demographic fields.
/// A request with neither code becomes a procedure request with an empty code,
/// which routing later rejects as having no model.
pub fn parse_request(request: &PredictionRequest) -> Result<(RequestMode, FeatureRow), PredictError> {
    let has_diagnosis = !request.diagnosis_code.is_empty();
    let has_procedure = !request.procedure_code.is_empty();
    if has_diagnosis && has_procedure {
        return Err(PredictError::MalformedRequest(
            "a request names either a diagnosis code or a procedure code, not both".to_string(),
        ));
    }

    let mode = if has_diagnosis {
        RequestMode::Diagnosis(canonicalize_diagnosis_code(&request.diagnosis_code))
    } else {
        RequestMode::Procedure(request.procedure_code.clone())
    };
    Ok((mode, request.demographics()))
}

/// Routes requests to bundles and aggregates the results. Registry and tables are
/// injected and shared read-only.
pub struct Predictor<S: BundleSource = DiskLoader> {
    registry: Arc<ModelRegistry>,
    tables: Arc<LookupTables>,
    source: S,
    max_results: usize,
}

impl<S: BundleSource> Predictor<S> {
    pub fn new(registry: Arc<ModelRegistry>, tables: Arc<LookupTables>, source: S) -> Self {
        Self {
            registry,
            tables,
            source,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Runs a request through the full state machine.
    pub fn predict(&self, request: &PredictionRequest) -> Result<Prediction, PredictError> {
        let (mode, demographics) = parse_request(request)?;
        match mode {
            RequestMode::Diagnosis(code) => self
                .predict_diagnosis(&code, &demographics)
                .map(Prediction::Ranked),
            RequestMode::Procedure(code) => {
                let row = demographics.with(Feature::ProcedureCode, code);
                self.predict_procedure(&row).map(Prediction::Direct)
            }
        }
    }

    /// Like [`Predictor::predict`], but folds failures into the JSON error body.
    pub fn respond(&self, request: &PredictionRequest) -> PredictionResponse {
        match self.predict(request) {
            Ok(prediction) => prediction.into(),
            Err(e) => {
                warn!("Request failed: {e}");
                e.to_response()
            }
        }
    }

    /// Direct mode: `row` already carries the procedure code. The cost is reported
    /// without adjustment since there is no reference median to pull toward.
    pub fn predict_procedure(&self, row: &FeatureRow) -> Result<DirectPrediction, PredictError> {
        let candidate = Candidate::direct(row.get(Feature::ProcedureCode));
        let raw = self.infer(row)?;
        Ok(DirectPrediction {
            total_costs: aggregate::adjust_cost(
                raw.cost,
                candidate.usage_fraction,
                candidate.reference_median,
            ),
            length_of_stay: aggregate::round_half_even(raw.length_of_stay) as i64,
            mortality: raw.mortality,
        })
    }

    /// Diagnosis mode: fan out over the diagnosis's candidate procedures, then rank.
    pub fn predict_diagnosis(
        &self,
        diagnosis_code: &str,
        demographics: &FeatureRow,
    ) -> Result<Vec<ProcedurePrediction>, PredictError> {
        // --- ResolveCandidates ---
        let entries = self.tables.procedures_for_diagnosis(diagnosis_code);
        info!(
            "Diagnosis '{diagnosis_code}' has {} candidate procedures",
            entries.len()
        );

        // --- ResolveSignature + Dispatch, one candidate at a time ---
        let mut scored = Vec::with_capacity(entries.len());
        for entry in entries {
            let candidate = Candidate::from(entry);
            scored.push(self.score_candidate(&candidate, demographics)?);
        }

        // --- Aggregate, Rank, Truncate, StripInternalFields ---
        Ok(aggregate::finalize(scored, self.max_results))
    }

    fn score_candidate(
        &self,
        candidate: &Candidate,
        demographics: &FeatureRow,
    ) -> Result<ScoredCandidate, PredictError> {
        // The feature row is rebuilt per candidate with the candidate's code substituted.
        let row = demographics
            .clone()
            .with(Feature::ProcedureCode, candidate.procedure_code.as_str());
        let raw = self.infer(&row)?;

        Ok(ScoredCandidate {
            procedure_code: self
                .tables
                .description_for_procedure(&candidate.procedure_code)
                .to_string(),
            total_costs: aggregate::adjust_cost(
                raw.cost,
                candidate.usage_fraction,
                candidate.reference_median,
            ),
            length_of_stay: aggregate::round_half_even(raw.length_of_stay) as i64,
            mortality: raw.mortality,
            usage_percentage: aggregate::usage_percentage(candidate.usage_fraction),
        })
    }

    /// Resolves the row's signature to a bundle and runs inference on it.
    fn infer(&self, row: &FeatureRow) -> Result<RawPrediction, PredictError> {
        let (path, bundle) = self.route(row)?;
        inference::predict(&bundle, row).map_err(|e| PredictError::CorruptBundle {
            path,
            reason: e.to_string(),
        })
    }

    fn route(&self, row: &FeatureRow) -> Result<(PathBuf, Arc<ModelBundle>), PredictError> {
        let signature = row.signature();
        if !signature.has_mandatory() {
            debug!("{signature} lacks a mandatory feature and is never routed");
            return Err(PredictError::ModelNotFound { signature });
        }
        let path = match self.registry.resolve(signature) {
            Ok(path) => path.to_path_buf(),
            Err(RouteMiss::NoEntry) => {
                debug!("No bundle is registered for {signature}");
                return Err(PredictError::ModelNotFound { signature });
            }
            Err(RouteMiss::PathMissing(path)) => {
                warn!(
                    "Bundle for {signature} is registered at '{}' but the file is missing",
                    path.display()
                );
                return Err(PredictError::BundlePathInvalid { path });
            }
        };

        debug!("Routing {signature} to '{}'", path.display());
        let bundle = self
            .source
            .get_or_load(&path)
            .map_err(PredictError::from_bundle_error)?;
        Ok((path, bundle))
    }
}
