//! Service configuration.
//!
//! A `PredictorConfig` names the artifact root, the manifest and the two lookup
//! tables. It is read from TOML, the same format bundles are persisted in, and every
//! field can be overridden from the command line.

use crate::bundle::{BundleSource, DiskLoader};
use crate::cache::CachedLoader;
use crate::files::resolve_under_root;
use crate::lookup::{LookupError, LookupTables};
use crate::registry::{ManifestError, ModelRegistry};
use crate::router::Predictor;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_MANIFEST: &str = "model_paths.csv";
pub const DEFAULT_DIAGNOSIS_TABLE: &str = "diagnosis_procedures.csv";
pub const DEFAULT_DESCRIPTION_TABLE: &str = "procedure_descriptions.csv";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PredictorConfig {
    /// Directory that manifest paths and relative table paths are resolved against.
    pub root: PathBuf,
    pub manifest: PathBuf,
    pub diagnosis_table: PathBuf,
    pub description_table: PathBuf,
    pub max_results: usize,
    pub cache_bundles: bool,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            manifest: PathBuf::from(DEFAULT_MANIFEST),
            diagnosis_table: PathBuf::from(DEFAULT_DIAGNOSIS_TABLE),
            description_table: PathBuf::from(DEFAULT_DESCRIPTION_TABLE),
            max_results: crate::aggregate::DEFAULT_MAX_RESULTS,
            cache_bundles: true,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("max_results must be at least 1")]
    ZeroMaxResults,
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
}

impl PredictorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Paths relative to `root` become `root`-anchored; absolute paths are kept.
    fn under_root(&self, path: &Path) -> PathBuf {
        resolve_under_root(&self.root, &path.to_string_lossy())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.under_root(&self.manifest)
    }

    pub fn diagnosis_table_path(&self) -> PathBuf {
        self.under_root(&self.diagnosis_table)
    }

    pub fn description_table_path(&self) -> PathBuf {
        self.under_root(&self.description_table)
    }

    pub fn build_registry(&self) -> Result<ModelRegistry, ConfigError> {
        Ok(ModelRegistry::from_manifest_path(
            &self.manifest_path(),
            &self.root,
        )?)
    }

    pub fn build_tables(&self) -> Result<LookupTables, ConfigError> {
        Ok(LookupTables::load(
            &self.diagnosis_table_path(),
            &self.description_table_path(),
        )?)
    }

    /// Loads the registry and lookup tables and wires them to a bundle source.
    pub fn build_predictor(&self) -> Result<Predictor<Box<dyn BundleSource>>, ConfigError> {
        if self.max_results == 0 {
            return Err(ConfigError::ZeroMaxResults);
        }
        let registry = self.build_registry()?;
        let tables = self.build_tables()?;

        let source: Box<dyn BundleSource> = if self.cache_bundles {
            Box::new(CachedLoader::new(DiskLoader))
        } else {
            Box::new(DiskLoader)
        };
        info!(
            "Predictor ready (root '{}', bundle cache {}).",
            self.root.display(),
            if self.cache_bundles { "on" } else { "off" }
        );

        Ok(Predictor::new(Arc::new(registry), Arc::new(tables), source)
            .with_max_results(self.max_results))
    }
}
