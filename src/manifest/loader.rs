// src/manifest/loader.rs

//! Manifest parsing and validation
//!
//! Manifests are JSON documents. A minimal one looks like:
//!
//! ```json
//! {
//!   "name": "coder",
//!   "version": "2.29.5",
//!   "variants": [
//!     {
//!       "platform": "darwin/arm64",
//!       "url": "https://github.com/coder/coder/releases/download/v{version}/coder_{version}_darwin_arm64.zip",
//!       "sha256": "b1e313415667cc38dec5c64e2470c63459803b922a2106ae812d24b943cedfea",
//!       "install": [{ "type": "binary", "source": "coder" }]
//!     }
//!   ]
//! }
//! ```

use super::{
    Checksum, InstallAction, Manifest, ManifestSet, PackageKind, SmokeTest, UninstallAction,
    Variant, ZapAction,
};
use crate::error::ParseError;
use crate::platform::{OsRequirement, PlatformPredicate};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct RawManifest {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    kind: PackageKind,
    #[serde(default, alias = "description")]
    desc: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
    variants: Option<Vec<RawVariant>>,
    #[serde(default)]
    conflicts_with: Vec<String>,
    #[serde(default)]
    minimum_os: Option<String>,
    #[serde(default)]
    keg_only: bool,
    #[serde(default, alias = "test")]
    tests: Vec<SmokeTest>,
}

#[derive(Debug, Deserialize)]
struct RawVariant {
    #[serde(default)]
    platform: Option<String>,
    url: Option<String>,
    sha256: Option<String>,
    #[serde(default)]
    install: Vec<InstallAction>,
    #[serde(default)]
    uninstall: Vec<UninstallAction>,
    #[serde(default)]
    zap: Vec<ZapAction>,
    #[serde(default)]
    minimum_os: Option<String>,
}

/// Parse and validate one manifest
pub fn load(source: &str) -> Result<Manifest, ParseError> {
    let raw: RawManifest =
        serde_json::from_str(source).map_err(|e| ParseError::Syntax(e.to_string()))?;

    let name = required(raw.name, "name")?;
    let version = required(raw.version, "version")?;
    let raw_variants = raw
        .variants
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ParseError::MissingField("variants".to_string()))?;

    let variants = raw_variants
        .into_iter()
        .enumerate()
        .map(|(i, raw)| convert_variant(i, raw))
        .collect::<Result<Vec<_>, _>>()?;

    let manifest = Manifest {
        name,
        version,
        kind: raw.kind,
        description: raw.desc,
        homepage: raw.homepage,
        variants,
        conflicts_with: raw.conflicts_with,
        minimum_os: raw
            .minimum_os
            .as_deref()
            .map(|s| parse_requirement("minimum_os", s))
            .transpose()?,
        keg_only: raw.keg_only,
        tests: raw.tests,
    };

    manifest.validate()?;

    debug!(
        "Loaded manifest {} {} ({} variants)",
        manifest.name,
        manifest.version,
        manifest.variants.len()
    );
    Ok(manifest)
}

/// Load every `*.json` manifest in a directory
pub fn load_dir(dir: &Path) -> crate::Result<ManifestSet> {
    let mut paths = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    paths.retain(|p| p.extension().is_some_and(|ext| ext == "json"));
    paths.sort();

    let mut set = ManifestSet::new();
    for path in &paths {
        let text = fs::read_to_string(path)?;
        let manifest = load(&text).map_err(|e| in_file(path, e))?;
        set.insert(manifest).map_err(|e| in_file(path, e))?;
    }

    info!("Loaded {} manifests from {}", set.len(), dir.display());
    Ok(set)
}

fn in_file(path: &Path, source: ParseError) -> ParseError {
    ParseError::InFile {
        path: path.to_path_buf(),
        source: Box::new(source),
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, ParseError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ParseError::MissingField(field.to_string()))
}

fn convert_variant(index: usize, raw: RawVariant) -> Result<Variant, ParseError> {
    let field = |name: &str| format!("variants[{}].{}", index, name);

    let platform = match raw.platform.as_deref() {
        Some(p) => p
            .parse::<PlatformPredicate>()
            .map_err(|_| ParseError::InvalidValue {
                field: field("platform"),
                value: p.to_string(),
            })?,
        None => PlatformPredicate::any(),
    };

    let url = required(raw.url, &field("url"))?;
    let checksum = parse_checksum(&field("sha256"), &required(raw.sha256, &field("sha256"))?)?;

    Ok(Variant {
        platform,
        url,
        checksum,
        install: raw.install,
        uninstall: raw.uninstall,
        zap: raw.zap,
        minimum_os: raw
            .minimum_os
            .as_deref()
            .map(|s| parse_requirement(&field("minimum_os"), s))
            .transpose()?,
    })
}

fn parse_checksum(field: &str, value: &str) -> Result<Checksum, ParseError> {
    let value = value.trim().trim_start_matches(':');
    if value == Checksum::UNCHECKED_MARKER {
        return Ok(Checksum::Unchecked);
    }
    if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ParseError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
    Ok(Checksum::Sha256(value.to_ascii_lowercase()))
}

fn parse_requirement(field: &str, value: &str) -> Result<OsRequirement, ParseError> {
    value
        .parse::<OsRequirement>()
        .map_err(|_| ParseError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Arch, Os, OsVersion};

    const CODER: &str = r#"{
        "name": "coder",
        "version": "2.29.5",
        "desc": "Provisions remote development environments via Terraform",
        "variants": [
            {
                "platform": "darwin/arm64",
                "url": "https://github.com/coder/coder/releases/download/v{version}/coder_{version}_darwin_arm64.zip",
                "sha256": "b1e313415667cc38dec5c64e2470c63459803b922a2106ae812d24b943cedfea",
                "install": [{ "type": "binary", "source": "coder" }]
            },
            {
                "platform": "darwin/amd64",
                "url": "https://github.com/coder/coder/releases/download/v{version}/coder_{version}_darwin_amd64.zip",
                "sha256": "5ec6e40efda11af174048aabdc259c51867f6dbac14a856a090b73e501406c2b",
                "install": [{ "type": "binary", "source": "coder" }]
            },
            {
                "platform": "linux/*",
                "url": "https://github.com/coder/coder/releases/download/v{version}/coder_{version}_linux_amd64.tar.gz",
                "sha256": "3547a796d2eedadf081cdded8208c9bf5f522d4ebf2b0d7897f4136406abd194",
                "install": [{ "type": "binary", "source": "coder" }]
            }
        ]
    }"#;

    const DESKTOP: &str = r#"{
        "name": "coder-desktop-preview",
        "version": "0.1.0-13-g98c184d",
        "kind": "cask",
        "conflicts_with": ["coder/coder/coder-desktop"],
        "minimum_os": "macos >= sonoma",
        "variants": [
            {
                "platform": "darwin",
                "url": "https://github.com/coder/coder-desktop-macos/releases/download/preview/Coder.Desktop.dmg",
                "sha256": "no_check",
                "install": [{ "type": "app", "source": "Coder Desktop.app" }],
                "uninstall": [{ "type": "quit", "process": "Coder Desktop" }],
                "zap": [{ "type": "trash", "path": "~/Library/Preferences/com.coder.Coder-Desktop.plist" }]
            }
        ]
    }"#;

    #[test]
    fn test_load_formula() {
        let manifest = load(CODER).unwrap();
        assert_eq!(manifest.name, "coder");
        assert_eq!(manifest.kind, PackageKind::Formula);
        assert_eq!(manifest.variants.len(), 3);
        assert_eq!(
            manifest.variants[0].platform,
            PlatformPredicate::exact(Os::Darwin, Arch::Arm64)
        );
        assert_eq!(manifest.variants[2].platform, PlatformPredicate::os(Os::Linux));
        assert_eq!(
            manifest.variants[0].install,
            vec![InstallAction::Binary {
                source: "coder".to_string(),
                target: None
            }]
        );
    }

    #[test]
    fn test_load_cask_with_unchecked_artifact() {
        let manifest = load(DESKTOP).unwrap();
        assert_eq!(manifest.kind, PackageKind::Cask);
        assert_eq!(manifest.variants[0].checksum, Checksum::Unchecked);
        assert_eq!(manifest.conflicts_with, vec!["coder/coder/coder-desktop"]);
        let req = manifest.minimum_os.unwrap();
        assert_eq!(req.version, OsVersion::new(14, 0));
        assert_eq!(manifest.variants[0].zap.len(), 1);
    }

    #[test]
    fn test_load_keg_only_formula_with_tests() {
        let source = r#"{
            "name": "coder@1",
            "version": "1.44.0",
            "keg_only": true,
            "variants": [
                {
                    "platform": "darwin",
                    "url": "https://github.com/coder/coder-v1-cli/releases/download/v{version}/coder-cli-darwin-amd64.zip",
                    "sha256": "f3fe13cec4d0615a40134675279d4cd1a5a871356d90dedef020981622f1b693",
                    "install": [{ "type": "binary", "source": "coder" }]
                }
            ],
            "test": [{ "command": "coder", "args": ["--version"], "expect_contains": ["{version}"] }]
        }"#;

        let manifest = load(source).unwrap();
        assert!(manifest.keg_only);
        assert_eq!(manifest.tests.len(), 1);
        assert_eq!(manifest.tests[0].args, vec!["--version"]);
        assert_eq!(manifest.tests[0].exit_code, 0);

        assert!(!load(CODER).unwrap().keg_only);
    }

    #[test]
    fn test_missing_fields_are_named() {
        let cases = [
            (r#"{"version": "1.0", "variants": []}"#, "name"),
            (r#"{"name": "x", "variants": []}"#, "version"),
            (r#"{"name": "x", "version": "1.0", "variants": []}"#, "variants"),
            (r#"{"name": "x", "version": "1.0"}"#, "variants"),
            (
                r#"{"name": "x", "version": "1.0", "variants": [{"sha256": "no_check"}]}"#,
                "variants[0].url",
            ),
            (
                r#"{"name": "x", "version": "1.0", "variants": [{"url": "https://e.com/x"}]}"#,
                "variants[0].sha256",
            ),
            (
                r#"{"name": "x", "version": "1.0",
                    "variants": [{"url": "https://e.com/x", "sha256": "no_check"}],
                    "tests": [{"command": " "}]}"#,
                "tests[0].command",
            ),
        ];

        for (source, field) in cases {
            assert_eq!(
                load(source).unwrap_err(),
                ParseError::MissingField(field.to_string()),
                "source: {}",
                source
            );
        }
    }

    #[test]
    fn test_invalid_values() {
        let bad_platform = r#"{"name": "x", "version": "1.0", "variants": [
            {"platform": "plan9/mips", "url": "https://e.com/x", "sha256": "no_check"}]}"#;
        assert!(matches!(
            load(bad_platform).unwrap_err(),
            ParseError::InvalidValue { .. }
        ));

        let bad_checksum = r#"{"name": "x", "version": "1.0", "variants": [
            {"url": "https://e.com/x", "sha256": "abc"}]}"#;
        assert!(matches!(
            load(bad_checksum).unwrap_err(),
            ParseError::InvalidValue { .. }
        ));

        assert!(matches!(load("not json").unwrap_err(), ParseError::Syntax(_)));
    }

    #[test]
    fn test_overlapping_variants_rejected() {
        let source = r#"{"name": "x", "version": "1.0", "variants": [
            {"platform": "darwin", "url": "https://e.com/a", "sha256": "no_check"},
            {"platform": "darwin/arm64", "url": "https://e.com/b", "sha256": "no_check"}]}"#;
        assert!(matches!(
            load(source).unwrap_err(),
            ParseError::OverlappingVariants { .. }
        ));
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("coder.json"), CODER).unwrap();
        fs::write(dir.path().join("desktop.json"), DESKTOP).unwrap();
        fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let set = load_dir(dir.path()).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains("coder"));
        assert!(set.contains("coder-desktop-preview"));
    }

    #[test]
    fn test_load_dir_reports_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), r#"{"name": "x"}"#).unwrap();

        let err = load_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }
}
