#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

#[path = "../shared/files.rs"]
pub mod files;

pub mod aggregate;
pub mod batch;
pub mod bundle;
pub mod cache;
pub mod check;
pub mod config;
pub mod inference;
pub mod lookup;
pub mod registry;
pub mod router;
pub mod types;

pub use bundle::{BundleSource, DiskLoader, ModelBundle};
pub use cache::CachedLoader;
pub use config::PredictorConfig;
pub use registry::ModelRegistry;
pub use router::{PredictError, Predictor};
pub use types::{Feature, FeatureSignature, Prediction, PredictionRequest, PredictionResponse};
