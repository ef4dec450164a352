//! # Model Registry
//!
//! The registry is the routing table of the service: it maps a [`FeatureSignature`]
//! (the set of populated request fields) to the on-disk bundle trained for exactly
//! that set. It is built once from the manifest written by the training runs and is
//! immutable afterwards, so it can be shared across threads without locking.
//!
//! The manifest is a CSV file with at least two columns:
//!
//! - `features`: a textual list such as `"['CCSR Procedure Code', 'Age Group']"`.
//!   Quotes and brackets are stray characters left by the writer and are stripped
//!   before the names are parsed.
//! - `model_path`: a path relative to the configured root.
//!
//! An optional `Total Costs_r2` column carries the validation score used when the
//! manifests of several training runs are combined.

use crate::files::{create_output, is_regular_file, resolve_under_root};
use crate::types::{Feature, FeatureSignature};
use ahash::AHashMap;
use log::{info, warn};
use natord::compare;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FEATURES_COLUMN: &str = "features";
pub const MODEL_PATH_COLUMN: &str = "model_path";
pub const SCORE_COLUMN: &str = "Total Costs_r2";

/// A parsed manifest line.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRow {
    pub signature: FeatureSignature,
    /// The path exactly as recorded in the manifest.
    pub model_path: String,
    pub score: Option<f64>,
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to read or write manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse manifest CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("The required column '{0}' was not found in the manifest. Please check spelling and case.")]
    ColumnNotFound(&'static str),
    #[error("Manifest row {row}: '{name}' is not a recognized feature name.")]
    UnknownFeature { row: usize, name: String },
    #[error("Manifest row {row}: the feature list is empty.")]
    EmptyFeatureSet { row: usize },
    #[error("Manifest row {row}: the model path is empty.")]
    EmptyModelPath { row: usize },
    #[error("Manifest row {row}: score '{value}' is not a number.")]
    InvalidScore { row: usize, value: String },
}

/// Parses the textual feature list of a manifest row. On failure the offending
/// name is returned.
pub fn parse_feature_set(raw: &str) -> Result<FeatureSignature, String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | '[' | ']'))
        .collect();

    let mut signature = FeatureSignature::EMPTY;
    for name in cleaned.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        match Feature::from_column_name(name) {
            Some(feature) => {
                signature.insert(feature);
            }
            None => return Err(name.to_string()),
        }
    }
    Ok(signature)
}

/// Renders a signature the way the training runs write it, e.g.
/// `['CCSR Procedure Code', 'Type of Admission']`.
pub fn format_feature_set(signature: FeatureSignature) -> String {
    let names: Vec<String> = signature
        .iter()
        .map(|f| format!("'{}'", f.column_name()))
        .collect();
    format!("[{}]", names.join(", "))
}

/// Reads and validates every row of a manifest file.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRow>, ManifestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(File::open(path)?);

    let headers = reader.headers()?.clone();
    let position = |name: &'static str| headers.iter().position(|h| h.trim() == name);
    let features_idx = position(FEATURES_COLUMN).ok_or(ManifestError::ColumnNotFound(FEATURES_COLUMN))?;
    let path_idx =
        position(MODEL_PATH_COLUMN).ok_or(ManifestError::ColumnNotFound(MODEL_PATH_COLUMN))?;
    let score_idx = position(SCORE_COLUMN);

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        let row = i + 1;

        let raw_features = record.get(features_idx).unwrap_or("");
        let signature = parse_feature_set(raw_features)
            .map_err(|name| ManifestError::UnknownFeature { row, name })?;
        if signature.is_empty() {
            return Err(ManifestError::EmptyFeatureSet { row });
        }

        let model_path = record.get(path_idx).unwrap_or("").trim().to_string();
        if model_path.is_empty() {
            return Err(ManifestError::EmptyModelPath { row });
        }

        let score = match score_idx.and_then(|idx| record.get(idx)).map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(value.parse::<f64>().map_err(|_| ManifestError::InvalidScore {
                row,
                value: value.to_string(),
            })?),
        };

        rows.push(ManifestRow {
            signature,
            model_path,
            score,
        });
    }
    Ok(rows)
}

/// Writes manifest rows in the format [`read_manifest`] accepts. The score column is
/// only written when at least one row carries a score.
pub fn write_manifest(path: &Path, rows: &[ManifestRow]) -> Result<(), ManifestError> {
    let with_scores = rows.iter().any(|r| r.score.is_some());
    let mut writer = csv::Writer::from_writer(create_output(path)?);

    if with_scores {
        writer.write_record([FEATURES_COLUMN, MODEL_PATH_COLUMN, SCORE_COLUMN])?;
    } else {
        writer.write_record([FEATURES_COLUMN, MODEL_PATH_COLUMN])?;
    }

    for row in rows {
        let features = format_feature_set(row.signature);
        if with_scores {
            let score = row.score.map(|s| s.to_string()).unwrap_or_default();
            writer.write_record([features.as_str(), row.model_path.as_str(), score.as_str()])?;
        } else {
            writer.write_record([features.as_str(), row.model_path.as_str()])?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Selects, for every signature present in any of the given training runs, the row
/// with the highest score. Unscored rows are used only when no scored row exists for
/// that signature. On equal scores the earlier run wins. The result is ordered by
/// signature so the merged manifest is reproducible.
pub fn combine_manifests(runs: &[Vec<ManifestRow>]) -> Vec<ManifestRow> {
    let mut best: AHashMap<FeatureSignature, ManifestRow> = AHashMap::new();

    for row in runs.iter().flatten() {
        let replace = match best.get(&row.signature) {
            None => true,
            Some(current) => match (current.score, row.score) {
                (Some(kept), Some(candidate)) => candidate > kept,
                (None, Some(_)) => true,
                _ => false,
            },
        };
        if replace {
            best.insert(row.signature, row.clone());
        }
    }

    let mut combined: Vec<ManifestRow> = best.into_values().collect();
    combined.sort_by_key(|r| r.signature);
    combined
}

/// A manifest signature that was declared more than once. The later row wins.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateRoute {
    pub signature: FeatureSignature,
    pub replaced: PathBuf,
    pub kept: PathBuf,
}

/// Why a signature could not be routed to a bundle file.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteMiss {
    /// The manifest declares no bundle for the signature.
    NoEntry,
    /// The manifest declares a bundle, but nothing is on disk at the resolved path.
    PathMissing(PathBuf),
}

/// Immutable routing table from feature signature to bundle path.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    root: PathBuf,
    routes: AHashMap<FeatureSignature, PathBuf>,
    duplicates: Vec<DuplicateRoute>,
}

impl ModelRegistry {
    /// Reads the manifest at `manifest` and resolves its paths under `root`.
    pub fn from_manifest_path(manifest: &Path, root: &Path) -> Result<Self, ManifestError> {
        info!("Loading model manifest from '{}'", manifest.display());
        let rows = read_manifest(manifest)?;
        let registry = Self::from_rows(rows, root);
        info!(
            "Model registry ready: {} feature sets under '{}', {} duplicate declarations.",
            registry.len(),
            registry.root().display(),
            registry.duplicates.len()
        );
        Ok(registry)
    }

    /// Builds the table from already-parsed rows. A repeated signature replaces the
    /// earlier declaration and is recorded in [`ModelRegistry::duplicates`].
    pub fn from_rows<I: IntoIterator<Item = ManifestRow>>(rows: I, root: &Path) -> Self {
        let mut routes = AHashMap::new();
        let mut duplicates = Vec::new();

        for row in rows {
            let resolved = resolve_under_root(root, &row.model_path);
            if !row.signature.has_mandatory() {
                warn!(
                    "Manifest routes {} to '{}', but requests without {} and {} are never routed.",
                    row.signature,
                    resolved.display(),
                    Feature::ProcedureCode.column_name(),
                    Feature::TypeOfAdmission.column_name()
                );
            }
            if let Some(replaced) = routes.insert(row.signature, resolved.clone()) {
                warn!(
                    "Manifest declares {} more than once; '{}' replaces '{}'.",
                    row.signature,
                    resolved.display(),
                    replaced.display()
                );
                duplicates.push(DuplicateRoute {
                    signature: row.signature,
                    replaced,
                    kept: resolved,
                });
            }
        }

        Self {
            root: root.to_path_buf(),
            routes,
            duplicates,
        }
    }

    /// Pure table lookup; does not touch the file system.
    pub fn lookup(&self, signature: FeatureSignature) -> Option<&Path> {
        self.routes.get(&signature).map(PathBuf::as_path)
    }

    /// Looks the signature up and confirms the bundle file exists. A miss is an
    /// expected outcome (absent optional fields), so it is reported, never raised.
    pub fn resolve(&self, signature: FeatureSignature) -> Result<&Path, RouteMiss> {
        let path = self.lookup(signature).ok_or(RouteMiss::NoEntry)?;
        if is_regular_file(path) {
            Ok(path)
        } else {
            Err(RouteMiss::PathMissing(path.to_path_buf()))
        }
    }

    /// All routes, ordered naturally by bundle path (`model_2` before `model_10`).
    pub fn routes_by_path(&self) -> Vec<(FeatureSignature, &Path)> {
        let mut routes: Vec<(FeatureSignature, &Path)> = self
            .routes
            .iter()
            .map(|(sig, path)| (*sig, path.as_path()))
            .collect();
        routes.sort_by(|a, b| compare(&a.1.to_string_lossy(), &b.1.to_string_lossy()));
        routes
    }

    pub fn duplicates(&self) -> &[DuplicateRoute] {
        &self.duplicates
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
