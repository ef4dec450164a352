// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the six categorical inputs a model bundle can be trained on. The column
/// names are the exact spellings used by the training data and the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feature {
    ProcedureCode,
    AgeGroup,
    Gender,
    Race,
    Ethnicity,
    TypeOfAdmission,
}

impl Feature {
    /// Canonical order. Display and encoding iterate in this order.
    pub const ALL: [Feature; 6] = [
        Feature::ProcedureCode,
        Feature::AgeGroup,
        Feature::Gender,
        Feature::Race,
        Feature::Ethnicity,
        Feature::TypeOfAdmission,
    ];

    /// Fields without which no model is expected to exist.
    pub const MANDATORY: [Feature; 2] = [Feature::ProcedureCode, Feature::TypeOfAdmission];

    /// Demographic fields a request may leave empty.
    pub const OPTIONAL: [Feature; 4] = [
        Feature::AgeGroup,
        Feature::Gender,
        Feature::Race,
        Feature::Ethnicity,
    ];

    pub fn column_name(self) -> &'static str {
        match self {
            Feature::ProcedureCode => "CCSR Procedure Code",
            Feature::AgeGroup => "Age Group",
            Feature::Gender => "Gender",
            Feature::Race => "Race",
            Feature::Ethnicity => "Ethnicity",
            Feature::TypeOfAdmission => "Type of Admission",
        }
    }

    pub fn from_column_name(name: &str) -> Option<Self> {
        Feature::ALL.into_iter().find(|f| f.column_name() == name)
    }

    #[inline]
    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// The set of features that are populated in a row. This is the routing key of the
/// model registry: two signatures are equal exactly when they contain the same members,
/// regardless of the order in which those members were discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FeatureSignature(u8);

impl FeatureSignature {
    pub const EMPTY: FeatureSignature = FeatureSignature(0);

    pub fn from_features<I: IntoIterator<Item = Feature>>(features: I) -> Self {
        let mut signature = Self::EMPTY;
        for feature in features {
            signature.insert(feature);
        }
        signature
    }

    /// Adds a feature. Returns `false` if it was already a member.
    pub fn insert(&mut self, feature: Feature) -> bool {
        let present = self.contains(feature);
        self.0 |= feature.bit();
        !present
    }

    #[inline]
    pub fn contains(self, feature: Feature) -> bool {
        self.0 & feature.bit() != 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_subset(self, other: FeatureSignature) -> bool {
        self.0 & !other.0 == 0
    }

    /// True when both mandatory features are members.
    pub fn has_mandatory(self) -> bool {
        Feature::MANDATORY.iter().all(|&f| self.contains(f))
    }

    /// Members in canonical order.
    pub fn iter(self) -> impl Iterator<Item = Feature> {
        Feature::ALL.into_iter().filter(move |&f| self.contains(f))
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl fmt::Display for FeatureSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, feature) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(feature.column_name())?;
        }
        f.write_str("]")
    }
}

/// The joined feature dictionary handed to a model. An empty string means the
/// feature is absent, never that the category is the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureRow {
    values: [String; 6],
}

impl FeatureRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, feature: Feature, value: impl Into<String>) -> Self {
        self.set(feature, value);
        self
    }

    pub fn set(&mut self, feature: Feature, value: impl Into<String>) {
        self.values[feature.index()] = value.into();
    }

    pub fn get(&self, feature: Feature) -> &str {
        &self.values[feature.index()]
    }

    /// Looks a value up by training column name. `None` if the name is not one of
    /// the six recognized columns.
    pub fn value_for_column(&self, column: &str) -> Option<&str> {
        Feature::from_column_name(column).map(|f| self.get(f))
    }

    /// The features whose value is non-empty.
    pub fn signature(&self) -> FeatureSignature {
        FeatureSignature::from_features(Feature::ALL.into_iter().filter(|&f| !self.get(f).is_empty()))
    }
}

/// A normalized prediction request as received from the web adapter. Absent JSON
/// fields deserialize to the empty string, which is the same as "not provided".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionRequest {
    #[serde(rename = "Diagnosis_Code")]
    pub diagnosis_code: String,
    #[serde(rename = "CCSR_Procedure_Code")]
    pub procedure_code: String,
    #[serde(rename = "Age_Group")]
    pub age_group: String,
    #[serde(rename = "Gender")]
    pub gender: String,
    #[serde(rename = "Race")]
    pub race: String,
    #[serde(rename = "Ethnicity")]
    pub ethnicity: String,
    #[serde(rename = "Type_of_Admission")]
    pub type_of_admission: String,
}

impl PredictionRequest {
    /// The demographic part of the request, with the procedure code left empty.
    pub fn demographics(&self) -> FeatureRow {
        FeatureRow::new()
            .with(Feature::AgeGroup, self.age_group.as_str())
            .with(Feature::Gender, self.gender.as_str())
            .with(Feature::Race, self.race.as_str())
            .with(Feature::Ethnicity, self.ethnicity.as_str())
            .with(Feature::TypeOfAdmission, self.type_of_admission.as_str())
    }
}

/// One row of the diagnosis lookup table: a procedure historically used for the
/// diagnosis, the share of the diagnosis's cases that used it, and its median cost.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosisProcedureEntry {
    pub procedure_code: String,
    pub usage_fraction: f64,
    pub reference_median: f64,
}

/// A procedure code to be scored. Direct procedure requests have no reference median.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub procedure_code: String,
    pub usage_fraction: f64,
    pub reference_median: Option<f64>,
}

impl Candidate {
    pub fn direct(procedure_code: impl Into<String>) -> Self {
        Self {
            procedure_code: procedure_code.into(),
            usage_fraction: 1.0,
            reference_median: None,
        }
    }
}

impl From<&DiagnosisProcedureEntry> for Candidate {
    fn from(entry: &DiagnosisProcedureEntry) -> Self {
        Self {
            procedure_code: entry.procedure_code.clone(),
            usage_fraction: entry.usage_fraction,
            reference_median: Some(entry.reference_median),
        }
    }
}

/// Response body for a direct procedure request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectPrediction {
    pub total_costs: f64,
    pub length_of_stay: i64,
    pub mortality: String,
}

/// One ranked entry of a diagnosis-driven response. There is deliberately no
/// mortality field: mortality is a sort key only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedurePrediction {
    /// Human-readable description of the procedure, or the raw code if none is known.
    pub procedure_code: String,
    pub total_costs: f64,
    pub length_of_stay: i64,
    pub usage_percentage: f64,
}

/// A successful prediction in either request mode.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    Direct(DirectPrediction),
    Ranked(Vec<ProcedurePrediction>),
}

/// The JSON body returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictionResponse {
    Direct(DirectPrediction),
    Ranked(Vec<ProcedurePrediction>),
    Error { error: String },
}

impl From<Prediction> for PredictionResponse {
    fn from(prediction: Prediction) -> Self {
        match prediction {
            Prediction::Direct(direct) => PredictionResponse::Direct(direct),
            Prediction::Ranked(ranked) => PredictionResponse::Ranked(ranked),
        }
    }
}
