// src/resolver.rs

//! Resolution of a package request to a single installable variant
//!
//! Resolution is a pure function of the manifest set, the request, the host
//! platform and the set of installed package names. Steps run in a fixed
//! order so the reported failure is deterministic: lookup, variant
//! selection, conflicts, minimum OS.

use crate::error::ResolutionError;
use crate::manifest::{Manifest, ManifestSet, Variant, ZapAction};
use crate::platform::Platform;
use crate::version::VersionConstraint;
use std::collections::BTreeSet;
use tracing::debug;

/// What the caller wants installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequest {
    pub name: String,
    pub version: VersionConstraint,
}

impl PackageRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: VersionConstraint::Any,
        }
    }

    pub fn with_version(mut self, version: VersionConstraint) -> Self {
        self.version = version;
        self
    }
}

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstall {
    pub name: String,
    pub version: String,
    pub variant: Variant,
    /// Download URL with the version filled in
    pub url: String,
    /// Install under `<prefix>/opt/<name>` rather than the shared prefix
    pub keg_only: bool,
}

impl ResolvedInstall {
    pub fn zap_paths(&self) -> Vec<String> {
        self.variant.zap.iter().map(|z| z.path().to_string()).collect()
    }
}

/// Resolve `request` for `platform` given the names currently installed
pub fn resolve(
    manifests: &ManifestSet,
    request: &PackageRequest,
    platform: &Platform,
    installed: &BTreeSet<String>,
) -> Result<ResolvedInstall, ResolutionError> {
    let manifest = select_manifest(manifests, request)?;
    let variant = select_variant(manifest, platform)?;

    if let Some(other) = find_conflict(manifest, installed) {
        return Err(ResolutionError::Conflict(other));
    }

    if let Some(required) = manifest.effective_minimum_os(variant)
        && !required.is_satisfied_by(platform)
    {
        return Err(ResolutionError::UnsupportedOs {
            name: manifest.name.clone(),
            required: required.to_string(),
            actual: platform
                .os_version
                .map(|v| format!("{} {}", platform.os, v))
                .unwrap_or_else(|| format!("{} (unknown version)", platform.os)),
        });
    }

    debug!(
        "Resolved {} {} for {} -> {}",
        manifest.name, manifest.version, platform, variant.platform
    );

    Ok(ResolvedInstall {
        name: manifest.name.clone(),
        version: manifest.version.clone(),
        url: variant.url_for(&manifest.version),
        variant: variant.clone(),
        keg_only: manifest.keg_only,
    })
}

/// Newest manifest version satisfying the request
fn select_manifest<'a>(
    manifests: &'a ManifestSet,
    request: &PackageRequest,
) -> Result<&'a Manifest, ResolutionError> {
    let versions = manifests.versions(&request.name);
    if versions.is_empty() {
        return Err(ResolutionError::NotFound(request.name.clone()));
    }

    versions
        .iter()
        .rev()
        .find(|m| request.version.matches(&m.version))
        .ok_or_else(|| ResolutionError::NotFound(format!("{}@{}", request.name, request.version)))
}

fn select_variant<'a>(
    manifest: &'a Manifest,
    platform: &Platform,
) -> Result<&'a Variant, ResolutionError> {
    let candidates = manifest.variants_for(platform);
    match candidates.as_slice() {
        [] => Err(ResolutionError::UnsupportedPlatform {
            name: manifest.name.clone(),
            platform: platform.to_string(),
        }),
        [only] => Ok(*only),
        _ => Err(ResolutionError::AmbiguousVariant {
            name: manifest.name.clone(),
            platform: platform.to_string(),
        }),
    }
}

/// Conflict entries may be tap-qualified (`owner/tap/name`); only the final
/// segment names the package.
fn find_conflict(manifest: &Manifest, installed: &BTreeSet<String>) -> Option<String> {
    manifest
        .conflicts_with
        .iter()
        .map(|c| c.rsplit('/').next().unwrap_or(c))
        .find(|name| installed.contains(*name) && *name != manifest.name)
        .map(str::to_string)
}

/// Zap paths of a manifest across all of its variants
pub fn all_zap_paths(manifest: &Manifest) -> Vec<String> {
    let mut paths: Vec<String> = manifest
        .variants
        .iter()
        .flat_map(|v| v.zap.iter().map(ZapAction::path))
        .map(str::to_string)
        .collect();
    paths.sort();
    paths.dedup();
    paths
}
