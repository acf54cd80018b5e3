// src/installer/mod.rs

//! Installation, removal and zap of resolved packages
//!
//! An install runs in this order, holding the package lock throughout:
//! 1. Idempotence check against the registry
//! 2. Unpack the verified artifact into a private staging directory
//! 3. Plan every install action, then place staged entries by rename
//! 4. Flush placed files, then commit the new record in one registry
//!    transaction
//! 5. On upgrade, remove what the previous version owned and no longer does
//!
//! Any failure before the commit rolls back placed files and leaves the
//! registry untouched. Keg-only packages are rooted at `<prefix>/opt/<name>`
//! instead of the prefix itself.

pub mod actions;
pub mod extract;
pub mod smoke;

pub use actions::{ProcessControl, SystemProcesses};
pub use extract::{DiskImages, Hdiutil};

use crate::config::{Config, ZapPolicy};
use crate::error::{InstallError, Result};
use crate::fetcher::artifact_file_name;
use crate::lock::{PackageLock, lock_file_stem};
use crate::manifest::{SmokeTest, UninstallAction};
use crate::registry::{InstalledRecord, Operation, Registry};
use crate::resolver::ResolvedInstall;
use actions::{Journal, expand_path, prune_empty_dirs, relative_path, remove_path};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How an install call changed the system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStatus {
    Installed,
    Upgraded { from: String },
    /// Same version, but recorded files had gone missing
    Reinstalled,
    /// Already installed; nothing was written
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub record: InstalledRecord,
    pub status: InstallStatus,
}

/// A zap path that could not be removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapFailure {
    pub path: String,
    pub reason: String,
}

/// Result of a zap: the removed record plus best-effort cleanup results
#[derive(Debug, Clone)]
pub struct ZapReport {
    pub record: InstalledRecord,
    pub removed: Vec<PathBuf>,
    pub failures: Vec<ZapFailure>,
}

/// Executes install, uninstall and zap against one prefix and registry
pub struct Installer<P: ProcessControl = SystemProcesses> {
    registry: Registry,
    prefix: PathBuf,
    staging_root: PathBuf,
    lock_dir: PathBuf,
    lock_timeout: Duration,
    zap_policy: ZapPolicy,
    processes: P,
    images: Box<dyn DiskImages>,
}

impl Installer<SystemProcesses> {
    pub fn new(registry: Registry, config: &Config) -> Self {
        Self::with_processes(registry, config, SystemProcesses)
    }
}

impl<P: ProcessControl> Installer<P> {
    pub fn with_processes(registry: Registry, config: &Config, processes: P) -> Self {
        let installer = Self {
            registry,
            prefix: config.prefix.clone(),
            staging_root: config.staging_dir(),
            lock_dir: config.lock_dir(),
            lock_timeout: config.lock_timeout,
            zap_policy: config.zap_policy,
            processes,
            images: Box::new(Hdiutil),
        };
        installer.sweep_staging();
        installer
    }

    pub fn with_disk_images(mut self, images: impl DiskImages + 'static) -> Self {
        self.images = Box::new(images);
        self
    }

    /// Remove staging directories left behind by installs that died
    ///
    /// A directory is only removed while its package lock can be taken, so
    /// installs running in other processes keep theirs.
    fn sweep_staging(&self) {
        let Ok(entries) = fs::read_dir(&self.staging_root) else {
            return;
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(stem) = file_name
                .to_str()
                .and_then(|n| n.strip_prefix("install-"))
                .and_then(|rest| rest.rsplit_once('.'))
                .map(|(stem, _)| stem)
            else {
                continue;
            };

            let path = entry.path();
            match PackageLock::try_acquire(&self.lock_dir, stem) {
                Ok(Some(_lock)) => match remove_path(&path) {
                    Ok(_) => info!("Removed stale staging directory {}", path.display()),
                    Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
                },
                Ok(None) => debug!("Staging directory {} is in use", path.display()),
                Err(e) => warn!("Cannot lock {} for cleanup: {}", stem, e),
            }
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Where a package's install actions are rooted
    pub fn install_root(&self, name: &str, keg_only: bool) -> Result<PathBuf> {
        if keg_only {
            Ok(self.prefix.join("opt").join(relative_path(name)?))
        } else {
            Ok(self.prefix.clone())
        }
    }

    /// The installed record, if `resolved` is already in place and intact
    pub fn current(&self, resolved: &ResolvedInstall) -> Result<Option<InstalledRecord>> {
        let candidate = record_for(resolved);
        Ok(self
            .registry
            .get(&resolved.name)?
            .filter(|r| is_intact(r, &candidate)))
    }

    /// Install a resolved variant from its verified artifact bytes
    pub fn install(&self, resolved: &ResolvedInstall, artifact: &[u8]) -> Result<InstallOutcome> {
        let _lock = PackageLock::acquire(&self.lock_dir, &resolved.name, self.lock_timeout)?;

        let previous = self.registry.get(&resolved.name)?;
        let mut record = record_for(resolved);

        if let Some(prev) = &previous
            && is_intact(prev, &record)
        {
            debug!("{} {} is already installed", prev.name, prev.version);
            return Ok(InstallOutcome {
                record: prev.clone(),
                status: InstallStatus::Unchanged,
            });
        }

        fs::create_dir_all(&self.staging_root)
            .map_err(|e| InstallError::io(&self.staging_root, e))?;
        let staging = tempfile::Builder::new()
            .prefix(&format!("install-{}.", lock_file_stem(&resolved.name)))
            .tempdir_in(&self.staging_root)
            .map_err(|e| InstallError::io(&self.staging_root, e))?;

        let unpacked = staging.path().join("artifact");
        extract::unpack(
            artifact,
            &artifact_file_name(&resolved.url),
            &unpacked,
            self.images.as_ref(),
        )?;

        let root = self.install_root(&resolved.name, resolved.keg_only)?;
        let placements = actions::plan(&resolved.variant.install, &unpacked, &root)?;
        for placement in &placements {
            let path = path_string(&placement.target);
            if let Some(owner) = self.registry.owner_of(&path, &resolved.name)? {
                return Err(InstallError::PathOwned { path, owner }.into());
            }
        }

        let mut journal = Journal::new(staging.path().join("replaced"));
        for placement in &placements {
            if let Err(e) = journal.place(placement) {
                journal.rollback();
                return Err(e);
            }
        }
        record.files = journal.targets().map(path_string).collect();

        if let Err(e) = journal.sync() {
            journal.rollback();
            return Err(e);
        }
        if let Err(e) = self.registry.commit_install(&record) {
            journal.rollback();
            return Err(e);
        }

        let status = match &previous {
            Some(prev) => {
                self.remove_superseded(prev, &record);
                if prev.version == record.version {
                    InstallStatus::Reinstalled
                } else {
                    InstallStatus::Upgraded {
                        from: prev.version.clone(),
                    }
                }
            }
            None => InstallStatus::Installed,
        };

        if let Err(e) = staging.close() {
            warn!("Failed to clean staging directory: {}", e);
        }

        info!("Installed {} {}", record.name, record.version);
        Ok(InstallOutcome { record, status })
    }

    /// Paths the previous version owned that the new one does not
    fn remove_superseded(&self, previous: &InstalledRecord, current: &InstalledRecord) {
        for stale in previous.files.difference(&current.files) {
            match remove_path(Path::new(stale)) {
                Ok(_) => debug!("Removed stale {}", stale),
                Err(e) => warn!("Failed to remove stale {}: {}", stale, e),
            }
        }

        if self.zap_policy == ZapPolicy::Supersede {
            let dropped = previous
                .zap_paths
                .iter()
                .filter(|p| !current.zap_paths.contains(p));
            for path in dropped {
                if let Err(e) = expand_path(path, &self.prefix)
                    .and_then(|p| remove_path(&p).map_err(|e| InstallError::io(p, e).into()))
                {
                    warn!("Failed to remove superseded zap path {}: {}", path, e);
                }
            }
        }
    }

    /// Remove an installed package
    ///
    /// `actions` come from the package's manifest; quit and delete steps run
    /// before the recorded files are removed.
    pub fn uninstall(&self, name: &str, actions: &[UninstallAction]) -> Result<InstalledRecord> {
        let _lock = PackageLock::acquire(&self.lock_dir, name, self.lock_timeout)?;
        self.remove_installed(name, actions, Operation::Uninstall)
    }

    /// Uninstall, then remove user-scoped leftovers best-effort
    ///
    /// `zap_paths` is merged with the paths recorded at install time.
    pub fn zap(
        &self,
        name: &str,
        actions: &[UninstallAction],
        zap_paths: &[String],
    ) -> Result<ZapReport> {
        let _lock = PackageLock::acquire(&self.lock_dir, name, self.lock_timeout)?;
        let record = self.remove_installed(name, actions, Operation::Zap)?;

        let mut paths: Vec<&String> = record.zap_paths.iter().collect();
        for extra in zap_paths {
            if !paths.contains(&extra) {
                paths.push(extra);
            }
        }

        let mut removed = Vec::new();
        let mut failures = Vec::new();
        for path in paths {
            let result = expand_path(path, &self.prefix).and_then(|expanded| {
                remove_path(&expanded)
                    .map(|existed| existed.then_some(expanded.clone()))
                    .map_err(|e| InstallError::io(expanded, e).into())
            });
            match result {
                Ok(Some(expanded)) => removed.push(expanded),
                Ok(None) => debug!("Zap path {} does not exist", path),
                Err(e) => {
                    warn!("Failed to zap {}: {}", path, e);
                    failures.push(ZapFailure {
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(ZapReport {
            record,
            removed,
            failures,
        })
    }

    fn remove_installed(
        &self,
        name: &str,
        actions: &[UninstallAction],
        operation: Operation,
    ) -> Result<InstalledRecord> {
        let record = self
            .registry
            .get(name)?
            .ok_or_else(|| InstallError::NotInstalled(name.to_string()))?;

        for action in actions {
            match action {
                UninstallAction::Quit { process } => {
                    if self.processes.terminate(process)? {
                        info!("Stopped running {}", process);
                    }
                }
                UninstallAction::Delete { path } => {
                    let expanded = expand_path(path, &self.prefix)?;
                    remove_path(&expanded).map_err(|e| InstallError::io(&expanded, e))?;
                }
            }
        }

        for file in &record.files {
            remove_path(Path::new(file)).map_err(|e| InstallError::io(file, e))?;
        }

        if let Ok(keg) = self.install_root(name, true)
            && keg.is_dir()
            && let Err(e) = prune_empty_dirs(&keg)
        {
            warn!("Failed to remove keg {}: {}", keg.display(), e);
        }

        self.registry.commit_removal(name, operation)?;
        Ok(record)
    }

    /// Run smoke tests against an installed package; returns how many ran
    pub fn test(&self, name: &str, tests: &[SmokeTest], keg_only: bool) -> Result<usize> {
        let _lock = PackageLock::acquire(&self.lock_dir, name, self.lock_timeout)?;
        let record = self
            .registry
            .get(name)?
            .ok_or_else(|| InstallError::NotInstalled(name.to_string()))?;

        let root = self.install_root(name, keg_only)?;
        for test in tests {
            smoke::run(&record, test, &root)?;
        }
        info!("{} of {} passed {} test(s)", record.name, record.version, tests.len());
        Ok(tests.len())
    }
}

fn record_for(resolved: &ResolvedInstall) -> InstalledRecord {
    let mut record = InstalledRecord::new(
        resolved.name.clone(),
        resolved.version.clone(),
        resolved.url.clone(),
        resolved.variant.checksum.as_str().to_string(),
    );
    record.zap_paths = resolved.zap_paths();
    record
}

/// Same install as `candidate` with every recorded path still present
fn is_intact(installed: &InstalledRecord, candidate: &InstalledRecord) -> bool {
    installed.is_same_install(candidate)
        && installed
            .files
            .iter()
            .all(|f| Path::new(f).symlink_metadata().is_ok())
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::manifest::{Checksum, InstallAction, Variant, ZapAction};
    use crate::platform::PlatformPredicate;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingProcesses {
        stopped: Mutex<Vec<String>>,
    }

    impl ProcessControl for RecordingProcesses {
        fn terminate(&self, process: &str) -> Result<bool> {
            self.stopped.lock().unwrap().push(process.to_string());
            Ok(true)
        }
    }

    struct Fixture {
        _root: tempfile::TempDir,
        config: Config,
        installer: Installer<RecordingProcesses>,
    }

    fn fixture(zap_policy: ZapPolicy) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::rooted_at(root.path());
        config.zap_policy = zap_policy;
        let installer = Installer::with_processes(
            Registry::in_memory().unwrap(),
            &config,
            RecordingProcesses::default(),
        );
        Fixture {
            _root: root,
            config,
            installer,
        }
    }

    fn resolved(name: &str, version: &str, url: &str, install: Vec<InstallAction>) -> ResolvedInstall {
        let mut variant = Variant::new(PlatformPredicate::any(), url, Checksum::Unchecked);
        variant.install = install;
        ResolvedInstall {
            name: name.to_string(),
            version: version.to_string(),
            url: url.to_string(),
            variant,
            keg_only: false,
        }
    }

    fn binary(source: &str) -> InstallAction {
        InstallAction::Binary {
            source: source.to_string(),
            target: None,
        }
    }

    fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_install_places_binary() {
        let f = fixture(ZapPolicy::Preserve);
        let r = resolved("coder", "2.30.2", "file:///mirror/coder", vec![binary("coder")]);

        let outcome = f.installer.install(&r, b"coder v2.30.2").unwrap();
        assert_eq!(outcome.status, InstallStatus::Installed);

        let bin = f.config.prefix.join("bin/coder");
        assert_eq!(fs::read(&bin).unwrap(), b"coder v2.30.2");
        assert!(outcome.record.files.contains(&path_string(&bin)));

        let stored = f.installer.registry().get("coder").unwrap().unwrap();
        assert_eq!(stored, outcome.record);
        assert_eq!(stored.checksum, "no_check");
    }

    #[test]
    fn test_repeat_install_is_idempotent() {
        let f = fixture(ZapPolicy::Preserve);
        let r = resolved("coder", "2.30.2", "file:///mirror/coder", vec![binary("coder")]);

        let first = f.installer.install(&r, b"v1").unwrap();
        let second = f.installer.install(&r, b"v1").unwrap();

        assert_eq!(second.status, InstallStatus::Unchanged);
        assert_eq!(f.installer.current(&r).unwrap(), Some(first.record.clone()));
        assert_eq!(second.record, first.record);
        assert_eq!(f.installer.registry().history().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_file_triggers_reinstall() {
        let f = fixture(ZapPolicy::Preserve);
        let r = resolved("coder", "2.30.2", "file:///mirror/coder", vec![binary("coder")]);
        f.installer.install(&r, b"v1").unwrap();

        let bin = f.config.prefix.join("bin/coder");
        fs::remove_file(&bin).unwrap();

        let outcome = f.installer.install(&r, b"v1").unwrap();
        assert_eq!(outcome.status, InstallStatus::Reinstalled);
        assert!(bin.exists());
    }

    #[test]
    fn test_upgrade_replaces_files() {
        let f = fixture(ZapPolicy::Preserve);
        let readme = |n: &str| InstallAction::File {
            source: format!("README-{}", n),
            target: format!("share/coder/README-{}", n),
        };

        let v1 = resolved(
            "coder",
            "2.29.5",
            "file:///mirror/coder_2.29.5.tar.gz",
            vec![binary("coder"), readme("1")],
        );
        f.installer
            .install(&v1, &tar_gz(&[("coder", b"old"), ("README-1", b"one")]))
            .unwrap();

        let v2 = resolved(
            "coder",
            "2.30.2",
            "file:///mirror/coder_2.30.2.tar.gz",
            vec![binary("coder"), readme("2")],
        );
        let outcome = f
            .installer
            .install(&v2, &tar_gz(&[("coder", b"new"), ("README-2", b"two")]))
            .unwrap();

        assert_eq!(
            outcome.status,
            InstallStatus::Upgraded {
                from: "2.29.5".to_string()
            }
        );
        assert_eq!(fs::read(f.config.prefix.join("bin/coder")).unwrap(), b"new");
        assert!(!f.config.prefix.join("share/coder/README-1").exists());
        assert!(f.config.prefix.join("share/coder/README-2").exists());

        let stored = f.installer.registry().get("coder").unwrap().unwrap();
        assert_eq!(stored.version, "2.30.2");
        assert_eq!(stored.files.len(), 2);
    }

    #[test]
    fn test_failed_install_leaves_no_trace() {
        let f = fixture(ZapPolicy::Preserve);
        let r = resolved(
            "coder",
            "2.30.2",
            "file:///mirror/coder.tar.gz",
            vec![binary("coder"), binary("missing")],
        );

        let err = f
            .installer
            .install(&r, &tar_gz(&[("coder", b"bin")]))
            .unwrap_err();
        assert!(matches!(err, Error::Install(InstallError::MissingSource(_))));
        assert!(f.installer.registry().get("coder").unwrap().is_none());
        assert!(!f.config.prefix.join("bin/coder").exists());
    }

    #[test]
    fn test_path_owned_by_other_package() {
        let f = fixture(ZapPolicy::Preserve);
        let first = resolved("coder", "2.30.2", "file:///mirror/coder", vec![binary("coder")]);
        f.installer.install(&first, b"coder").unwrap();

        let clash = resolved("coder@1", "1.0.0", "file:///mirror/coder", vec![binary("coder")]);
        let err = f.installer.install(&clash, b"other").unwrap_err();
        assert!(matches!(
            err,
            Error::Install(InstallError::PathOwned { ref owner, .. }) if owner == "coder"
        ));
        assert_eq!(fs::read(f.config.prefix.join("bin/coder")).unwrap(), b"coder");
        assert!(f.installer.registry().get("coder@1").unwrap().is_none());
    }

    #[test]
    fn test_uninstall_runs_actions_and_removes_files() {
        let f = fixture(ZapPolicy::Preserve);
        let r = resolved("coder", "2.30.2", "file:///mirror/coder", vec![binary("coder")]);
        f.installer.install(&r, b"bin").unwrap();

        let extra = f.config.prefix.join("etc/coder.conf");
        fs::create_dir_all(extra.parent().unwrap()).unwrap();
        fs::write(&extra, b"conf").unwrap();

        let actions = vec![
            UninstallAction::Quit {
                process: "Coder Desktop".to_string(),
            },
            UninstallAction::Delete {
                path: "etc/coder.conf".to_string(),
            },
        ];
        let record = f.installer.uninstall("coder", &actions).unwrap();

        assert_eq!(record.version, "2.30.2");
        assert!(!f.config.prefix.join("bin/coder").exists());
        assert!(!extra.exists());
        assert_eq!(
            *f.installer.processes.stopped.lock().unwrap(),
            vec!["Coder Desktop".to_string()]
        );
        assert!(f.installer.registry().get("coder").unwrap().is_none());

        let err = f.installer.uninstall("coder", &[]).unwrap_err();
        assert!(matches!(err, Error::Install(InstallError::NotInstalled(_))));
    }

    #[test]
    fn test_uninstall_tolerates_missing_files() {
        let f = fixture(ZapPolicy::Preserve);
        let r = resolved("coder", "2.30.2", "file:///mirror/coder", vec![binary("coder")]);
        f.installer.install(&r, b"bin").unwrap();
        fs::remove_file(f.config.prefix.join("bin/coder")).unwrap();

        assert!(f.installer.uninstall("coder", &[]).is_ok());
    }

    #[test]
    fn test_zap_collects_failures() {
        let f = fixture(ZapPolicy::Preserve);
        let support = f.config.prefix.join("support/com.coder.Coder-Desktop");
        fs::create_dir_all(&support).unwrap();

        let mut r = resolved("coder-desktop", "0.8.0", "file:///mirror/app", vec![binary("app")]);
        r.variant.zap = vec![
            ZapAction::Trash {
                path: "support/com.coder.Coder-Desktop".to_string(),
            },
            ZapAction::Trash {
                path: "../outside".to_string(),
            },
        ];
        f.installer.install(&r, b"app").unwrap();

        let report = f
            .installer
            .zap("coder-desktop", &[], &["support/never-created".to_string()])
            .unwrap();

        assert_eq!(report.removed, vec![support.clone()]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, "../outside");
        assert!(!support.exists());
        assert!(f.installer.registry().get("coder-desktop").unwrap().is_none());

        let history = f.installer.registry().history().unwrap();
        assert_eq!(history[0].operation, Operation::Zap);
    }

    #[test]
    fn test_supersede_policy_removes_dropped_zap_paths() {
        let f = fixture(ZapPolicy::Supersede);
        let old_cache = f.config.prefix.join("cache/old");
        fs::create_dir_all(&old_cache).unwrap();

        let mut v1 = resolved("coder", "1.0.0", "file:///mirror/v1/coder", vec![binary("coder")]);
        v1.variant.zap = vec![ZapAction::Trash {
            path: "cache/old".to_string(),
        }];
        f.installer.install(&v1, b"v1").unwrap();

        let v2 = resolved("coder", "2.0.0", "file:///mirror/v2/coder", vec![binary("coder")]);
        f.installer.install(&v2, b"v2").unwrap();

        assert!(!old_cache.exists());
    }

    #[test]
    fn test_preserve_policy_keeps_old_zap_paths() {
        let f = fixture(ZapPolicy::Preserve);
        let old_cache = f.config.prefix.join("cache/old");
        fs::create_dir_all(&old_cache).unwrap();

        let mut v1 = resolved("coder", "1.0.0", "file:///mirror/v1/coder", vec![binary("coder")]);
        v1.variant.zap = vec![ZapAction::Trash {
            path: "cache/old".to_string(),
        }];
        f.installer.install(&v1, b"v1").unwrap();

        let v2 = resolved("coder", "2.0.0", "file:///mirror/v2/coder", vec![binary("coder")]);
        f.installer.install(&v2, b"v2").unwrap();

        assert!(old_cache.exists());
    }

    struct FakeImages;

    impl DiskImages for FakeImages {
        fn attach(&self, _image: &Path, mountpoint: &Path) -> Result<()> {
            let contents = mountpoint.join("Coder Desktop.app/Contents");
            fs::create_dir_all(&contents).unwrap();
            fs::write(contents.join("Info.plist"), b"<plist/>").unwrap();
            Ok(())
        }

        fn detach(&self, _mountpoint: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_keg_only_coexists_with_unversioned() {
        let f = fixture(ZapPolicy::Preserve);
        let current = resolved("coder", "2.29.5", "file:///mirror/coder", vec![binary("coder")]);
        f.installer.install(&current, b"coder v2").unwrap();

        let mut legacy = resolved("coder@1", "1.44.0", "file:///mirror/coder", vec![binary("coder")]);
        legacy.keg_only = true;
        let outcome = f.installer.install(&legacy, b"coder v1").unwrap();
        assert_eq!(outcome.status, InstallStatus::Installed);

        let keg = f.config.prefix.join("opt/coder@1");
        assert_eq!(fs::read(keg.join("bin/coder")).unwrap(), b"coder v1");
        assert_eq!(fs::read(f.config.prefix.join("bin/coder")).unwrap(), b"coder v2");

        f.installer.uninstall("coder@1", &[]).unwrap();
        assert!(!keg.exists());
        assert!(f.config.prefix.join("opt").is_dir());
        assert!(f.config.prefix.join("bin/coder").exists());
    }

    #[test]
    fn test_open_sweeps_stale_staging() {
        let root = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(root.path());
        let staging = config.staging_dir();
        for dir in ["install-coder.abc123", "install-busy.xyz789", "keep-me"] {
            fs::create_dir_all(staging.join(dir).join("artifact")).unwrap();
        }

        let held = PackageLock::acquire(&config.lock_dir(), "busy", Duration::ZERO).unwrap();
        let _installer = Installer::with_processes(
            Registry::in_memory().unwrap(),
            &config,
            RecordingProcesses::default(),
        );

        assert!(!staging.join("install-coder.abc123").exists());
        assert!(staging.join("install-busy.xyz789").exists());
        assert!(staging.join("keep-me").exists());
        drop(held);
    }

    #[test]
    fn test_install_app_from_disk_image() {
        let f = fixture(ZapPolicy::Preserve);
        let installer = f.installer.with_disk_images(FakeImages);
        let r = resolved(
            "coder-desktop",
            "0.8.0",
            "https://example.com/Coder.Desktop.dmg",
            vec![InstallAction::App {
                source: "Coder Desktop.app".to_string(),
                target: None,
            }],
        );

        installer.install(&r, b"not really a disk image").unwrap();
        let app = f.config.prefix.join("Applications/Coder Desktop.app");
        assert!(app.join("Contents/Info.plist").is_file());

        let leftovers: Vec<_> = fs::read_dir(f.config.staging_dir()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_smoke_tests_run_against_keg() {
        let f = fixture(ZapPolicy::Preserve);
        let mut legacy = resolved("coder@1", "1.44.0", "file:///mirror/coder", vec![binary("coder")]);
        legacy.keg_only = true;
        f.installer
            .install(&legacy, b"#!/bin/sh\necho \"Coder v1.44.0\"\n")
            .unwrap();

        let version = SmokeTest {
            command: "coder".to_string(),
            args: vec!["--version".to_string()],
            expect_contains: vec!["{version}".to_string()],
            expect_absent: Vec::new(),
            exit_code: 0,
        };
        let by_path = SmokeTest {
            command: "bin/coder".to_string(),
            ..version.clone()
        };
        assert_eq!(f.installer.test("coder@1", &[version, by_path], true).unwrap(), 2);

        let err = f.installer.test("coder", &[], false).unwrap_err();
        assert!(matches!(err, Error::Install(InstallError::NotInstalled(_))));
    }

    #[test]
    fn test_concurrent_installs() {
        let f = fixture(ZapPolicy::Preserve);
        let installer = Arc::new(f.installer);

        let handles: Vec<_> = ["coder", "coder@1", "coder", "coder@1"]
            .into_iter()
            .map(|name| {
                let installer = Arc::clone(&installer);
                std::thread::spawn(move || {
                    let r = resolved(
                        name,
                        "1.0.0",
                        &format!("file:///mirror/{}", name),
                        vec![binary(name)],
                    );
                    installer.install(&r, name.as_bytes()).unwrap()
                })
            })
            .collect();

        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let fresh = outcomes
            .iter()
            .filter(|o| o.status == InstallStatus::Installed)
            .count();
        assert_eq!(fresh, 2);

        let names = installer.registry().installed_names().unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(installer.registry().history().unwrap().len(), 2);
    }
}
