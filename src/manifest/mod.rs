// src/manifest/mod.rs

//! Manifest model
//!
//! A `Manifest` describes one installable package at one version across
//! platforms. Per-platform details (download URL, checksum, lifecycle
//! actions) live in `Variant`s whose platform predicates never overlap.
//! Lifecycle steps are plain data interpreted by the installer.

pub mod loader;

use crate::error::ParseError;
use crate::platform::{OsRequirement, Platform, PlatformPredicate};
use crate::version::compare_versions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use loader::{load, load_dir};

/// Placeholder substituted with the manifest version in variant URLs
pub const VERSION_PLACEHOLDER: &str = "{version}";

/// Kind of package a manifest describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    /// Command-line tool
    #[default]
    Formula,
    /// Application bundle
    Cask,
}

impl PackageKind {
    pub fn as_str(&self) -> &str {
        match self {
            PackageKind::Formula => "formula",
            PackageKind::Cask => "cask",
        }
    }
}

/// Expected artifact digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    /// Lowercase hex SHA-256
    Sha256(String),
    /// Verification deliberately skipped
    Unchecked,
}

impl Checksum {
    /// Marker used in manifest sources for unchecked artifacts
    pub const UNCHECKED_MARKER: &'static str = "no_check";

    pub fn as_str(&self) -> &str {
        match self {
            Checksum::Sha256(hex) => hex,
            Checksum::Unchecked => Self::UNCHECKED_MARKER,
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Places part of the unpacked artifact under the install prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstallAction {
    /// Executable linked into `<prefix>/bin`
    Binary {
        source: String,
        #[serde(default)]
        target: Option<String>,
    },
    /// Application bundle placed in `<prefix>/Applications`
    App {
        source: String,
        #[serde(default)]
        target: Option<String>,
    },
    /// Arbitrary file or directory placed at `<prefix>/<target>`
    File { source: String, target: String },
}

/// Runs before installed files are removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UninstallAction {
    /// Terminate running processes with this name
    Quit { process: String },
    /// Remove an additional path
    Delete { path: String },
}

/// User-scoped leftovers removed only on zap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ZapAction {
    Trash { path: String },
}

impl ZapAction {
    pub fn path(&self) -> &str {
        match self {
            ZapAction::Trash { path } => path,
        }
    }
}

/// Post-install check run against the installed package
///
/// `command` is a file name the package installed (`coder`) or a path
/// relative to the prefix. `{version}` in `args` and `expect_contains` is
/// replaced with the installed version. Output is stdout followed by stderr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmokeTest {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub expect_contains: Vec<String>,
    #[serde(default)]
    pub expect_absent: Vec<String>,
    #[serde(default)]
    pub exit_code: i32,
}

/// Platform-specific portion of a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub platform: PlatformPredicate,
    pub url: String,
    pub checksum: Checksum,
    pub install: Vec<InstallAction>,
    pub uninstall: Vec<UninstallAction>,
    pub zap: Vec<ZapAction>,
    pub minimum_os: Option<OsRequirement>,
}

impl Variant {
    pub fn new(platform: PlatformPredicate, url: impl Into<String>, checksum: Checksum) -> Self {
        Self {
            platform,
            url: url.into(),
            checksum,
            install: Vec::new(),
            uninstall: Vec::new(),
            zap: Vec::new(),
            minimum_os: None,
        }
    }

    /// Download URL with the version placeholder filled in
    pub fn url_for(&self, version: &str) -> String {
        self.url.replace(VERSION_PLACEHOLDER, version)
    }
}

/// One package at one version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub kind: PackageKind,
    pub description: Option<String>,
    pub homepage: Option<String>,
    pub variants: Vec<Variant>,
    pub conflicts_with: Vec<String>,
    pub minimum_os: Option<OsRequirement>,
    /// Installed under `<prefix>/opt/<name>` instead of the shared
    /// `bin/` and `Applications/`, so it can sit beside the package it
    /// shadows (`coder@1` next to `coder`)
    pub keg_only: bool,
    pub tests: Vec<SmokeTest>,
}

impl Manifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            kind: PackageKind::Formula,
            description: None,
            homepage: None,
            variants: Vec::new(),
            conflicts_with: Vec::new(),
            minimum_os: None,
            keg_only: false,
            tests: Vec::new(),
        }
    }

    /// Check the structural invariants: a name, at least one variant, and
    /// pairwise-disjoint variant platforms.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.name.trim().is_empty() {
            return Err(ParseError::MissingField("name".to_string()));
        }
        if self.variants.is_empty() {
            return Err(ParseError::MissingField("variants".to_string()));
        }
        for (i, variant) in self.variants.iter().enumerate() {
            if variant.url.trim().is_empty() {
                return Err(ParseError::MissingField(format!("variants[{}].url", i)));
            }
        }
        for (i, test) in self.tests.iter().enumerate() {
            if test.command.trim().is_empty() {
                return Err(ParseError::MissingField(format!("tests[{}].command", i)));
            }
        }
        if let Some((a, b)) = self.first_overlap() {
            return Err(ParseError::OverlappingVariants {
                name: self.name.clone(),
                first: a.platform.to_string(),
                second: b.platform.to_string(),
            });
        }
        Ok(())
    }

    fn first_overlap(&self) -> Option<(&Variant, &Variant)> {
        for (i, a) in self.variants.iter().enumerate() {
            for b in &self.variants[i + 1..] {
                if a.platform.overlaps(&b.platform) {
                    return Some((a, b));
                }
            }
        }
        None
    }

    /// All variants applicable to the host
    pub fn variants_for(&self, platform: &Platform) -> Vec<&Variant> {
        self.variants
            .iter()
            .filter(|v| v.platform.matches(platform))
            .collect()
    }

    /// Variant constraint if present, else the manifest's
    pub fn effective_minimum_os(&self, variant: &Variant) -> Option<OsRequirement> {
        variant.minimum_os.or(self.minimum_os)
    }
}

/// Every loaded manifest, grouped by package name
#[derive(Debug, Clone, Default)]
pub struct ManifestSet {
    // Versions kept sorted oldest first
    manifests: BTreeMap<String, Vec<Manifest>>,
}

impl ManifestSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a manifest; the same name and version may appear only once
    pub fn insert(&mut self, manifest: Manifest) -> Result<(), ParseError> {
        let versions = self.manifests.entry(manifest.name.clone()).or_default();
        if versions.iter().any(|m| m.version == manifest.version) {
            return Err(ParseError::Duplicate {
                name: manifest.name,
                version: manifest.version,
            });
        }
        let pos = versions
            .iter()
            .position(|m| compare_versions(&m.version, &manifest.version).is_gt())
            .unwrap_or(versions.len());
        versions.insert(pos, manifest);
        Ok(())
    }

    /// All versions of a package, oldest first
    pub fn versions(&self, name: &str) -> &[Manifest] {
        self.manifests.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn newest(&self, name: &str) -> Option<&Manifest> {
        self.versions(name).last()
    }

    pub fn get(&self, name: &str, version: &str) -> Option<&Manifest> {
        self.versions(name).iter().find(|m| m.version == version)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.manifests.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.manifests.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}
