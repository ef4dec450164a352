use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::files::is_regular_file;

// --- Public Data Structures ---
// These structs define the public, human-readable format of a model bundle
// when serialized to a TOML file. One bundle exists per feature signature.

/// One-hot encoder fitted on the categorical input columns of one feature signature.
///
/// Unknown categories encode to an all-zero block, matching an encoder fitted with
/// "ignore unknown" semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotEncoder {
    /// Input column names, in the order the encoder expects them.
    pub feature_names_in: Vec<String>,
    /// Category vocabulary per input column, aligned with `feature_names_in`.
    pub categories: Vec<Vec<String>>,
}

impl OneHotEncoder {
    /// Width of the encoded vector.
    pub fn n_features_out(&self) -> usize {
        self.categories.iter().map(Vec::len).sum()
    }

    /// Encodes one row. `values` must be aligned with `feature_names_in`.
    pub fn transform(&self, values: &[&str]) -> Result<Array1<f64>, ComponentError> {
        if values.len() != self.feature_names_in.len() {
            return Err(ComponentError::WidthMismatch {
                component: "encoder input",
                expected: self.feature_names_in.len(),
                found: values.len(),
            });
        }

        let mut encoded = Array1::zeros(self.n_features_out());
        let mut offset = 0;
        for (value, cats) in values.iter().zip(&self.categories) {
            if let Some(pos) = cats.iter().position(|c| c == value) {
                encoded[offset + pos] = 1.0;
            }
            offset += cats.len();
        }
        Ok(encoded)
    }
}

/// Maps an ordinal model output back to its training label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDecoder {
    /// Labels indexed by ordinal.
    pub classes: Vec<String>,
}

impl LabelDecoder {
    pub fn inverse_transform(&self, ordinal: i64) -> Option<&str> {
        usize::try_from(ordinal)
            .ok()
            .and_then(|i| self.classes.get(i))
            .map(String::as_str)
    }
}

/// A node of a flattened regression tree. Children are indices into the tree's node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    /// Go left when `x[feature] <= threshold`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf { value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    /// Node 0 is the root.
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    fn evaluate(&self, x: ArrayView1<f64>) -> Result<f64, ComponentError> {
        let mut index = 0;
        // A well-formed tree reaches a leaf in fewer steps than it has nodes.
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(index) {
                Some(TreeNode::Leaf { value }) => return Ok(*value),
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let v = x.get(*feature).ok_or(ComponentError::MalformedTree(
                        "split feature index outside the encoded row",
                    ))?;
                    index = if *v <= *threshold { *left } else { *right };
                }
                None => return Err(ComponentError::MalformedTree("child index out of range")),
            }
        }
        Err(ComponentError::MalformedTree("cycle between nodes"))
    }
}

/// The averaged trees predicting one output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub trees: Vec<RegressionTree>,
}

/// Multi-output regressor. Output positions are fixed by training:
/// `[0]` total cost, `[1]` length of stay, `[2]` mortality ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Regressor {
    /// `y = coefficients . x + intercept`, with `coefficients` shaped `[n_outputs, n_inputs]`.
    Linear {
        intercept: Array1<f64>,
        coefficients: Array2<f64>,
    },
    /// One random-forest ensemble per output; each output is the mean of its trees.
    Forest {
        n_inputs: usize,
        outputs: Vec<TreeEnsemble>,
    },
}

impl Regressor {
    pub fn n_inputs(&self) -> usize {
        match self {
            Regressor::Linear { coefficients, .. } => coefficients.ncols(),
            Regressor::Forest { n_inputs, .. } => *n_inputs,
        }
    }

    pub fn n_outputs(&self) -> usize {
        match self {
            Regressor::Linear { coefficients, .. } => coefficients.nrows(),
            Regressor::Forest { outputs, .. } => outputs.len(),
        }
    }

    pub fn predict(&self, x: ArrayView1<f64>) -> Result<Array1<f64>, ComponentError> {
        if x.len() != self.n_inputs() {
            return Err(ComponentError::WidthMismatch {
                component: "regressor input",
                expected: self.n_inputs(),
                found: x.len(),
            });
        }

        match self {
            Regressor::Linear {
                intercept,
                coefficients,
            } => Ok(coefficients.dot(&x) + intercept),
            Regressor::Forest { outputs, .. } => {
                let mut predictions = Array1::zeros(outputs.len());
                for (slot, ensemble) in predictions.iter_mut().zip(outputs) {
                    let mut total = 0.0;
                    for tree in &ensemble.trees {
                        total += tree.evaluate(x)?;
                    }
                    *slot = total / ensemble.trees.len() as f64;
                }
                Ok(predictions)
            }
        }
    }
}

/// The top-level, self-contained bundle artifact: a regressor, the encoder it was
/// trained behind, and the decoder for its mortality output. The three are trained
/// together and are never mixed across bundles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    /// Training column names of the signature this bundle serves.
    pub features: Vec<String>,
    #[serde(default)]
    pub target_columns: Vec<String>,
    pub encoder: OneHotEncoder,
    pub model: Regressor,
    pub mortality_encoder: LabelDecoder,
}

/// Inconsistencies inside a bundle's components.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComponentError {
    #[error("{component} width is {found}, expected {expected}")]
    WidthMismatch {
        component: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("the regressor produces {found} outputs, at least {required} are required")]
    TooFewOutputs { found: usize, required: usize },
    #[error("the mortality decoder has no classes")]
    EmptyDecoder,
    #[error("an output ensemble has no trees")]
    EmptyEnsemble,
    #[error("malformed regression tree: {0}")]
    MalformedTree(&'static str),
}

/// Errors raised while loading a bundle file.
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Model bundle '{}' does not exist.", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to read model bundle '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Model bundle '{}' is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum BundleSaveError {
    #[error("Failed to write model bundle: {0}")]
    Write(#[from] std::io::Error),
    #[error("Failed to serialize model bundle to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// Minimum number of regressor outputs: cost, length of stay, mortality.
pub const REQUIRED_OUTPUTS: usize = 3;

impl ModelBundle {
    /// Checks that the three components fit together.
    pub fn validate(&self) -> Result<(), ComponentError> {
        if self.encoder.feature_names_in.len() != self.encoder.categories.len() {
            return Err(ComponentError::WidthMismatch {
                component: "encoder category list",
                expected: self.encoder.feature_names_in.len(),
                found: self.encoder.categories.len(),
            });
        }
        if self.encoder.n_features_out() != self.model.n_inputs() {
            return Err(ComponentError::WidthMismatch {
                component: "encoder output",
                expected: self.model.n_inputs(),
                found: self.encoder.n_features_out(),
            });
        }
        if self.model.n_outputs() < REQUIRED_OUTPUTS {
            return Err(ComponentError::TooFewOutputs {
                found: self.model.n_outputs(),
                required: REQUIRED_OUTPUTS,
            });
        }
        if self.mortality_encoder.classes.is_empty() {
            return Err(ComponentError::EmptyDecoder);
        }

        match &self.model {
            Regressor::Linear {
                intercept,
                coefficients,
            } => {
                if intercept.len() != coefficients.nrows() {
                    return Err(ComponentError::WidthMismatch {
                        component: "linear intercept",
                        expected: coefficients.nrows(),
                        found: intercept.len(),
                    });
                }
            }
            Regressor::Forest { outputs, .. } => {
                if outputs.iter().any(|e| e.trees.is_empty()) {
                    return Err(ComponentError::EmptyEnsemble);
                }
            }
        }
        Ok(())
    }

    /// Saves the bundle in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), BundleSaveError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads and validates a bundle. Parse failures, missing components and
    /// inconsistent components are all reported as [`BundleError::Corrupt`].
    pub fn load(path: &Path) -> Result<Self, BundleError> {
        if !is_regular_file(path) {
            return Err(BundleError::NotFound(path.to_path_buf()));
        }

        let toml_string = fs::read_to_string(path).map_err(|source| BundleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let bundle: ModelBundle = toml::from_str(&toml_string).map_err(|e| BundleError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        bundle.validate().map_err(|e| BundleError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        log::debug!(
            "Loaded bundle '{}' ({} encoded inputs, {} outputs)",
            path.display(),
            bundle.model.n_inputs(),
            bundle.model.n_outputs()
        );
        Ok(bundle)
    }
}

/// Where the router gets its bundles from. Implementations may read from disk on every
/// call or cache; tests substitute in-memory sources.
pub trait BundleSource: Send + Sync {
    fn get_or_load(&self, path: &Path) -> Result<Arc<ModelBundle>, BundleError>;
}

/// Deserializes the bundle from disk on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskLoader;

impl BundleSource for DiskLoader {
    fn get_or_load(&self, path: &Path) -> Result<Arc<ModelBundle>, BundleError> {
        ModelBundle::load(path).map(Arc::new)
    }
}

impl<S: BundleSource + ?Sized> BundleSource for Box<S> {
    fn get_or_load(&self, path: &Path) -> Result<Arc<ModelBundle>, BundleError> {
        (**self).get_or_load(path)
    }
}

impl<S: BundleSource + ?Sized> BundleSource for Arc<S> {
    fn get_or_load(&self, path: &Path) -> Result<Arc<ModelBundle>, BundleError> {
        (**self).get_or_load(path)
    }
}
