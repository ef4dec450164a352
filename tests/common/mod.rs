//! On-disk deployment fixture: linear bundles for a chosen set of signatures, a
//! manifest pointing at them, and the two lookup tables.
#![allow(dead_code)]

use ndarray::{Array1, Array2};
use staywise::bundle::{BundleSource, LabelDecoder, ModelBundle, OneHotEncoder, Regressor};
use staywise::check::expected_signatures;
use staywise::config::PredictorConfig;
use staywise::registry::{ManifestRow, write_manifest};
use staywise::router::Predictor;
use staywise::types::{Feature, FeatureSignature};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// (code, cost, length of stay, mortality ordinal)
pub const PROCEDURES: [(&str, f64, f64, f64); 5] = [
    ("ADM001", 5000.0, 3.2, 2.0),
    ("CAR004", 12000.0, 6.5, 1.0),
    ("GIS010", 800.0, 1.0, 3.0),
    ("RES005", 3000.0, 4.0, 0.0),
    ("URN003", 2000.0, 2.4, 2.0),
];

pub const EMERGENCY_SURCHARGE: f64 = 1000.0;

pub const MORTALITY_CLASSES: [&str; 4] = ["Extreme", "Major", "Minor", "Moderate"];

pub const DIAGNOSIS_TABLE: &str = "diagnosis_code,procedure_code,usage_fraction,reference_median
RSP002,ADM001,0.5,6000
RSP002,CAR004,0.1,11000
RSP002,GIS010,0.3,900
RSP002,RES005,0.05,3000
RSP002,URN003,0.05,2000
CIR019,CAR004,0.9,200000
";

pub const DESCRIPTION_TABLE: &str = "procedure_code,description
GIS010,Upper gastrointestinal endoscopy (GIS010)
RES005,Respiratory intubation and mechanical ventilation (RES005)
";

pub fn categories(feature: Feature) -> Vec<String> {
    let values: &[&str] = match feature {
        Feature::ProcedureCode => &["ADM001", "CAR004", "GIS010", "RES005", "URN003"],
        Feature::AgeGroup => &["0 to 17", "18 to 29", "30 to 49", "50 to 69", "70 or Older"],
        Feature::Gender => &["F", "M"],
        Feature::Race => &["Black/African American", "Other Race", "White"],
        Feature::Ethnicity => &["Not Span/Hispanic", "Spanish/Hispanic"],
        Feature::TypeOfAdmission => &["Elective", "Emergency"],
    };
    values.iter().map(|v| v.to_string()).collect()
}

/// A bundle over `signature`. The cost intercept equals the number of features, so
/// the bundle that served a direct request can be read back from its cost.
pub fn bundle_for(signature: FeatureSignature) -> ModelBundle {
    let features: Vec<Feature> = signature.iter().collect();
    let names: Vec<String> = features.iter().map(|f| f.column_name().to_string()).collect();
    let cats: Vec<Vec<String>> = features.iter().map(|&f| categories(f)).collect();
    let width: usize = cats.iter().map(Vec::len).sum();

    let mut coefficients = Array2::zeros((3, width));
    let mut offset = 0;
    for (&feature, block) in features.iter().zip(&cats) {
        match feature {
            Feature::ProcedureCode => {
                for (i, (_, cost, los, mortality)) in PROCEDURES.iter().enumerate() {
                    coefficients[[0, offset + i]] = *cost;
                    coefficients[[1, offset + i]] = *los;
                    coefficients[[2, offset + i]] = *mortality;
                }
            }
            Feature::TypeOfAdmission => {
                coefficients[[0, offset + 1]] = EMERGENCY_SURCHARGE;
            }
            _ => {}
        }
        offset += block.len();
    }

    let mut intercept = Array1::zeros(3);
    intercept[0] = signature.len() as f64;

    ModelBundle {
        features: names.clone(),
        target_columns: vec![
            "Total Costs".into(),
            "Length of Stay".into(),
            "APR Risk of Mortality".into(),
        ],
        encoder: OneHotEncoder {
            feature_names_in: names,
            categories: cats,
        },
        model: Regressor::Linear {
            intercept,
            coefficients,
        },
        mortality_encoder: LabelDecoder {
            classes: MORTALITY_CLASSES.iter().map(|c| c.to_string()).collect(),
        },
    }
}

pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    /// Every expected signature served.
    pub fn complete() -> Self {
        Self::with_signatures(&expected_signatures())
    }

    pub fn with_signatures(signatures: &[FeatureSignature]) -> Self {
        let dir = tempfile::tempdir().expect("temporary directory");
        let root = dir.path();
        fs::create_dir_all(root.join("model")).expect("model directory");

        let mut rows = Vec::new();
        for &signature in signatures {
            let relative = Self::relative_bundle_path(signature);
            bundle_for(signature)
                .save(&root.join(&relative))
                .expect("save bundle");
            rows.push(ManifestRow {
                signature,
                // Training runs record paths relative to their own working directory.
                model_path: format!("../{relative}"),
                score: Some(0.5),
            });
        }
        write_manifest(&root.join("model_paths.csv"), &rows).expect("write manifest");
        fs::write(root.join("diagnosis_procedures.csv"), DIAGNOSIS_TABLE).expect("write table");
        fs::write(root.join("procedure_descriptions.csv"), DESCRIPTION_TABLE)
            .expect("write table");

        Self { dir }
    }

    fn relative_bundle_path(signature: FeatureSignature) -> String {
        format!("model/bundle_{}.toml", signature.bits())
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn bundle_path(&self, signature: FeatureSignature) -> PathBuf {
        self.root().join(Self::relative_bundle_path(signature))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root().join("model_paths.csv")
    }

    pub fn config(&self) -> PredictorConfig {
        PredictorConfig {
            root: self.root().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn predictor(&self) -> Predictor<Box<dyn BundleSource>> {
        self.config().build_predictor().expect("build predictor")
    }
}

pub fn signature(features: &[Feature]) -> FeatureSignature {
    FeatureSignature::from_features(features.iter().copied())
}

pub fn mandatory() -> FeatureSignature {
    signature(&Feature::MANDATORY)
}
