// src/engine.rs

//! End-to-end package operations
//!
//! `Engine` wires the manifest set, resolver, fetcher and installer together
//! for one configuration. `install X` flows Loader → Resolver → Fetcher →
//! Installer, consulting and updating the registry along the way. The CLI
//! is a thin layer over these methods.

use crate::config::Config;
use crate::error::{Error, InstallError, ResolutionError, Result};
use crate::fetcher::{Fetcher, HttpTransport, Transport};
use crate::installer::{InstallOutcome, InstallStatus, Installer, ProcessControl, SystemProcesses, ZapReport};
use crate::manifest::{self, Manifest, ManifestSet, UninstallAction};
use crate::platform::Platform;
use crate::registry::{InstalledRecord, Registry};
use crate::resolver::{self, PackageRequest, ResolvedInstall};
use crate::version::compare_versions;
use rayon::prelude::*;
use tracing::{debug, info};

/// An installed package with a newer manifest available
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outdated {
    pub name: String,
    pub installed: String,
    pub available: String,
}

pub struct Engine<T: Transport = HttpTransport, P: ProcessControl = SystemProcesses> {
    config: Config,
    manifests: ManifestSet,
    platform: Platform,
    fetcher: Fetcher<T>,
    installer: Installer<P>,
}

impl Engine {
    /// Load manifests and open (or create) the registry named by `config`
    pub fn open(config: Config) -> Result<Self> {
        let manifests = if config.manifest_dir.is_dir() {
            manifest::load_dir(&config.manifest_dir)?
        } else {
            debug!(
                "Manifest directory {} does not exist",
                config.manifest_dir.display()
            );
            ManifestSet::new()
        };

        let registry = Registry::open_or_init(&config.db_path)?;
        let fetcher = Fetcher::new(config.http_timeout, config.retry.clone())?
            .with_cache(&config.cache_dir);
        let installer = Installer::new(registry, &config);

        Self::from_parts(config, manifests, fetcher, installer)
    }
}

impl<T: Transport, P: ProcessControl> Engine<T, P> {
    /// Assemble an engine from already-built components
    ///
    /// The host platform comes from `config.platform` when set, otherwise
    /// from detection.
    pub fn from_parts(
        config: Config,
        manifests: ManifestSet,
        fetcher: Fetcher<T>,
        installer: Installer<P>,
    ) -> Result<Self> {
        let platform = match &config.platform {
            Some(platform) => platform.clone(),
            None => Platform::current().ok_or_else(|| ResolutionError::UnsupportedPlatform {
                name: "caskade".to_string(),
                platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
            })?,
        };

        Ok(Self {
            config,
            manifests,
            platform,
            fetcher,
            installer,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manifests(&self) -> &ManifestSet {
        &self.manifests
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn registry(&self) -> &Registry {
        self.installer.registry()
    }

    /// Resolve one request against the current registry
    pub fn resolve(&self, request: &PackageRequest) -> Result<ResolvedInstall> {
        let installed = self.registry().installed_names()?;
        Ok(resolver::resolve(
            &self.manifests,
            request,
            &self.platform,
            &installed,
        )?)
    }

    /// Install every request
    ///
    /// All requests are resolved first, so a resolution failure installs
    /// nothing. Artifacts are then fetched and verified in parallel before
    /// the first install action runs.
    pub fn install(&self, requests: &[PackageRequest]) -> Result<Vec<InstallOutcome>> {
        let mut installed = self.registry().installed_names()?;
        let mut resolved = Vec::with_capacity(requests.len());
        for request in requests {
            if resolved.iter().any(|r: &ResolvedInstall| r.name == request.name) {
                continue;
            }
            let r = resolver::resolve(&self.manifests, request, &self.platform, &installed)?;
            // Later requests must not conflict with earlier ones either
            installed.insert(r.name.clone());
            resolved.push(r);
        }

        let mut pending = Vec::new();
        let mut outcomes = Vec::new();
        for r in resolved {
            match self.installer.current(&r)? {
                Some(record) => {
                    info!("{} {} is already installed", record.name, record.version);
                    outcomes.push(InstallOutcome {
                        record,
                        status: InstallStatus::Unchanged,
                    });
                }
                None => pending.push(r),
            }
        }

        let fetcher = &self.fetcher;
        let artifacts = pending
            .par_iter()
            .map(|r| fetcher.fetch_verified(&r.url, &r.variant.checksum))
            .collect::<Result<Vec<_>>>()?;

        for (r, artifact) in pending.iter().zip(artifacts) {
            outcomes.push(self.installer.install(r, &artifact)?);
        }
        Ok(outcomes)
    }

    /// Install the newest manifest version of an installed package
    ///
    /// Does nothing when the installed version is already the newest.
    pub fn upgrade(&self, name: &str) -> Result<InstallOutcome> {
        let record = self
            .registry()
            .get(name)?
            .ok_or_else(|| InstallError::NotInstalled(name.to_string()))?;

        let resolved = self.resolve(&PackageRequest::new(name))?;
        if compare_versions(&resolved.version, &record.version).is_lt() {
            debug!(
                "{} {} is newer than any manifest ({})",
                name, record.version, resolved.version
            );
            return Ok(InstallOutcome {
                record,
                status: InstallStatus::Unchanged,
            });
        }

        let mut outcomes = self.install(&[PackageRequest::new(name)])?;
        outcomes
            .pop()
            .ok_or_else(|| Error::from(ResolutionError::NotFound(name.to_string())))
    }

    /// Installed packages whose newest manifest is a later version
    pub fn outdated(&self) -> Result<Vec<Outdated>> {
        let outdated = self
            .registry()
            .list()?
            .into_iter()
            .filter_map(|record| {
                let newest = self.manifests.newest(&record.name)?;
                compare_versions(&newest.version, &record.version)
                    .is_gt()
                    .then(|| Outdated {
                        available: newest.version.clone(),
                        installed: record.version,
                        name: record.name,
                    })
            })
            .collect();
        Ok(outdated)
    }

    pub fn uninstall(&self, name: &str) -> Result<InstalledRecord> {
        let (actions, _) = self.removal_plan(name)?;
        self.installer.uninstall(name, &actions)
    }

    pub fn zap(&self, name: &str) -> Result<ZapReport> {
        let (actions, zap_paths) = self.removal_plan(name)?;
        self.installer.zap(name, &actions, &zap_paths)
    }

    /// Run the smoke tests of the manifest that installed `name`
    pub fn test(&self, name: &str) -> Result<usize> {
        let record = self
            .registry()
            .get(name)?
            .ok_or_else(|| InstallError::NotInstalled(name.to_string()))?;
        let Some(manifest) = self
            .manifests
            .get(name, &record.version)
            .or_else(|| self.manifests.newest(name))
        else {
            debug!("No manifest for {}; nothing to test", name);
            return Ok(0);
        };
        self.installer.test(name, &manifest.tests, manifest.keg_only)
    }

    /// Uninstall actions and zap paths from the manifest that installed
    /// `name`, falling back to its newest manifest
    fn removal_plan(&self, name: &str) -> Result<(Vec<UninstallAction>, Vec<String>)> {
        let record = self
            .registry()
            .get(name)?
            .ok_or_else(|| InstallError::NotInstalled(name.to_string()))?;

        let Some(manifest) = self
            .manifests
            .get(name, &record.version)
            .or_else(|| self.manifests.newest(name))
        else {
            debug!("No manifest for {}; removing recorded files only", name);
            return Ok((Vec::new(), Vec::new()));
        };

        let actions = installed_variant_actions(manifest, &record, &self.platform);
        Ok((actions, resolver::all_zap_paths(manifest)))
    }
}

/// Uninstall actions of the variant that produced `record`, or of the
/// variant for `platform` when the source URL no longer matches
fn installed_variant_actions(
    manifest: &Manifest,
    record: &InstalledRecord,
    platform: &Platform,
) -> Vec<UninstallAction> {
    manifest
        .variants
        .iter()
        .find(|v| v.url_for(&manifest.version) == record.source_url)
        .or_else(|| manifest.variants_for(platform).into_iter().next())
        .map(|v| v.uninstall.clone())
        .unwrap_or_default()
}
