//! Deployment coverage check.
//!
//! A complete deployment has one loadable bundle for every combination of the four
//! optional demographic fields together with the two mandatory fields: sixteen
//! signatures in all. [`coverage`] checks each of them against a registry and a
//! bundle source and reports anything the manifest declares beyond that set.

use crate::bundle::{BundleError, BundleSource};
use crate::registry::{DuplicateRoute, ModelRegistry, RouteMiss};
use crate::types::{Feature, FeatureSignature};
use itertools::Itertools;
use rayon::prelude::*;
use std::fmt;
use std::path::PathBuf;

/// Every signature a complete deployment serves, smallest first.
pub fn expected_signatures() -> Vec<FeatureSignature> {
    (0..=Feature::OPTIONAL.len())
        .flat_map(|k| Feature::OPTIONAL.into_iter().combinations(k))
        .map(|optional| {
            FeatureSignature::from_features(Feature::MANDATORY.into_iter().chain(optional))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoverageStatus {
    Ok(PathBuf),
    /// No manifest entry.
    Missing,
    /// Manifest entry whose file does not exist.
    Dangling(PathBuf),
    /// The file exists but does not load.
    Corrupt { path: PathBuf, reason: String },
}

impl CoverageStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, CoverageStatus::Ok(_))
    }
}

impl fmt::Display for CoverageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoverageStatus::Ok(path) => write!(f, "ok       {}", path.display()),
            CoverageStatus::Missing => write!(f, "missing  (no manifest entry)"),
            CoverageStatus::Dangling(path) => write!(f, "dangling {}", path.display()),
            CoverageStatus::Corrupt { path, reason } => {
                write!(f, "corrupt  {} ({reason})", path.display())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoverageReport {
    pub entries: Vec<(FeatureSignature, CoverageStatus)>,
    pub duplicates: Vec<DuplicateRoute>,
    /// Routes whose signature lacks a mandatory feature, in natural path order.
    /// The router rejects such signatures before lookup, so these bundles are never served.
    pub unreachable: Vec<(FeatureSignature, PathBuf)>,
}

impl CoverageReport {
    pub fn is_complete(&self) -> bool {
        self.entries.iter().all(|(_, status)| status.is_ok())
    }

    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|(_, s)| !s.is_ok()).count()
    }
}

impl fmt::Display for CoverageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (signature, status) in &self.entries {
            writeln!(f, "{status}  {signature}")?;
        }
        for dup in &self.duplicates {
            writeln!(
                f,
                "duplicate {}: '{}' replaced by '{}'",
                dup.signature,
                dup.replaced.display(),
                dup.kept.display()
            )?;
        }
        for (signature, path) in &self.unreachable {
            writeln!(
                f,
                "unreachable {} {signature}: lacks a mandatory feature",
                path.display()
            )?;
        }
        write!(
            f,
            "{} of {} expected feature sets are served.",
            self.entries.len() - self.failures(),
            self.entries.len()
        )
    }
}

fn status_for<S: BundleSource>(
    registry: &ModelRegistry,
    source: &S,
    signature: FeatureSignature,
) -> CoverageStatus {
    let path = match registry.resolve(signature) {
        Ok(path) => path.to_path_buf(),
        Err(RouteMiss::NoEntry) => return CoverageStatus::Missing,
        Err(RouteMiss::PathMissing(path)) => return CoverageStatus::Dangling(path),
    };
    match source.get_or_load(&path) {
        Ok(_) => CoverageStatus::Ok(path),
        Err(BundleError::NotFound(path)) => CoverageStatus::Dangling(path),
        Err(e) => CoverageStatus::Corrupt {
            path,
            reason: e.to_string(),
        },
    }
}

/// Loads the bundle of every expected signature, in parallel.
pub fn coverage<S: BundleSource>(registry: &ModelRegistry, source: &S) -> CoverageReport {
    let entries = expected_signatures()
        .into_par_iter()
        .map(|signature| (signature, status_for(registry, source, signature)))
        .collect();

    let unreachable = registry
        .routes_by_path()
        .into_iter()
        .filter(|(signature, _)| !signature.has_mandatory())
        .map(|(signature, path)| (signature, path.to_path_buf()))
        .collect();

    CoverageReport {
        entries,
        duplicates: registry.duplicates().to_vec(),
        unreachable,
    }
}
