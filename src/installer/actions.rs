// src/installer/actions.rs

//! Executors for install, uninstall and zap actions
//!
//! Install actions are planned against the staging directory first, so a
//! missing source or an unsafe target fails before anything under the
//! prefix changes. Placement then moves each staged entry into place with
//! `rename`, journaling what it replaced so a failed install can be undone.

use crate::error::{InstallError, Result};
use crate::installer::extract::set_executable;
use crate::manifest::InstallAction;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Where a staged entry goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub source: PathBuf,
    pub target: PathBuf,
    pub executable: bool,
}

/// Map install actions onto concrete source and target paths
///
/// With no actions, every top-level staged entry is installed: `.app`
/// bundles into `Applications`, anything else as a binary.
pub fn plan(actions: &[InstallAction], staging: &Path, prefix: &Path) -> Result<Vec<Placement>> {
    if actions.is_empty() {
        return plan_defaults(staging, prefix);
    }

    let mut placements = Vec::with_capacity(actions.len());
    for action in actions {
        let placement = match action {
            InstallAction::Binary { source, target } => {
                let source = find_source(staging, source)?;
                Placement {
                    target: prefix.join("bin").join(target_name(&source, target.as_deref())?),
                    source,
                    executable: true,
                }
            }
            InstallAction::App { source, target } => {
                let source = find_source(staging, source)?;
                Placement {
                    target: prefix
                        .join("Applications")
                        .join(target_name(&source, target.as_deref())?),
                    source,
                    executable: false,
                }
            }
            InstallAction::File { source, target } => Placement {
                source: find_source(staging, source)?,
                target: prefix.join(relative_path(target)?),
                executable: false,
            },
        };
        placements.push(placement);
    }
    Ok(placements)
}

fn plan_defaults(staging: &Path, prefix: &Path) -> Result<Vec<Placement>> {
    let mut entries = fs::read_dir(staging)
        .map_err(|e| InstallError::io(staging, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect::<Vec<_>>();
    entries.sort();

    let placements = entries
        .into_iter()
        .filter_map(|source| {
            let name = source.file_name()?.to_os_string();
            let is_app = Path::new(&name)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("app"));
            let (dir, executable) = if is_app {
                ("Applications", false)
            } else {
                ("bin", source.is_file())
            };
            Some(Placement {
                target: prefix.join(dir).join(name),
                source,
                executable,
            })
        })
        .collect::<Vec<_>>();

    if placements.is_empty() {
        return Err(InstallError::MissingSource("<any file>".to_string()).into());
    }
    Ok(placements)
}

/// Locate an action source inside the staged artifact
///
/// Archives often wrap their contents in a single top-level directory;
/// a source not found at the root is looked up inside that directory.
fn find_source(staging: &Path, source: &str) -> Result<PathBuf> {
    let relative = relative_path(source)?;

    let direct = staging.join(&relative);
    if direct.symlink_metadata().is_ok() {
        return Ok(direct);
    }

    let entries: Vec<PathBuf> = fs::read_dir(staging)
        .map_err(|e| InstallError::io(staging, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    if let [only] = entries.as_slice()
        && only.is_dir()
    {
        let nested = only.join(&relative);
        if nested.symlink_metadata().is_ok() {
            return Ok(nested);
        }
    }

    Err(InstallError::MissingSource(source.to_string()).into())
}

fn target_name(source: &Path, target: Option<&str>) -> Result<PathBuf> {
    match target {
        Some(t) => relative_path(t),
        None => source
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| InstallError::MissingSource(source.display().to_string()).into()),
    }
}

/// Reject absolute paths and `..` so actions stay inside their root
pub fn relative_path(path: &str) -> Result<PathBuf> {
    let candidate = Path::new(path);
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(InstallError::UnsafePath(path.to_string()).into()),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(InstallError::UnsafePath(path.to_string()).into());
    }
    Ok(clean)
}

/// Resolve a path named by an uninstall or zap action
///
/// `~` expands to the home directory, absolute paths are kept, and
/// relative paths are taken from the prefix.
pub fn expand_path(path: &str, prefix: &Path) -> Result<PathBuf> {
    if path == "~" || path.starts_with("~/") {
        let home = dirs::home_dir().ok_or_else(|| {
            InstallError::io(
                path,
                io::Error::new(io::ErrorKind::NotFound, "home directory is unknown"),
            )
        })?;
        let rest = path.trim_start_matches('~').trim_start_matches('/');
        return Ok(if rest.is_empty() { home } else { home.join(rest) });
    }

    if Path::new(path).is_absolute() {
        return Ok(PathBuf::from(path));
    }
    Ok(prefix.join(relative_path(path)?))
}

/// Remove a file, symlink or directory tree. Returns false if it was absent.
pub fn remove_path(path: &Path) -> io::Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(true)
}

/// Remove `dir` and every directory below it if none of them hold a file.
/// Returns whether `dir` was removed.
pub fn prune_empty_dirs(dir: &Path) -> io::Result<bool> {
    let mut empty = true;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !(fs::symlink_metadata(&path)?.is_dir() && prune_empty_dirs(&path)?) {
            empty = false;
        }
    }
    if empty {
        fs::remove_dir(dir)?;
    }
    Ok(empty)
}

/// Record of placements made during one install
pub struct Journal {
    backup_dir: PathBuf,
    entries: Vec<(PathBuf, Option<PathBuf>)>,
}

impl Journal {
    /// Replaced targets are parked under `backup_dir` until the install
    /// either commits or rolls back
    pub fn new(backup_dir: PathBuf) -> Self {
        Self {
            backup_dir,
            entries: Vec::new(),
        }
    }

    /// Move one staged entry into place
    pub fn place(&mut self, placement: &Placement) -> Result<()> {
        let target = &placement.target;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| InstallError::io(parent, e))?;
        }

        let backup = if target.symlink_metadata().is_ok() {
            fs::create_dir_all(&self.backup_dir)
                .map_err(|e| InstallError::io(&self.backup_dir, e))?;
            let backup = self.backup_dir.join(self.entries.len().to_string());
            fs::rename(target, &backup).map_err(|e| InstallError::io(target, e))?;
            Some(backup)
        } else {
            None
        };

        if let Err(e) = fs::rename(&placement.source, target) {
            if let Some(backup) = &backup
                && let Err(restore) = fs::rename(backup, target)
            {
                warn!("Failed to restore {}: {}", target.display(), restore);
            }
            return Err(InstallError::io(target, e).into());
        }
        self.entries.push((target.clone(), backup));

        if placement.executable {
            set_executable(target)?;
        }

        debug!("Placed {}", target.display());
        Ok(())
    }

    /// Flush placed entries and their parent directories to disk, so the
    /// renames survive a crash once the registry commit has
    pub fn sync(&self) -> Result<()> {
        let mut parents = BTreeSet::new();
        for (target, _) in &self.entries {
            sync_tree(target).map_err(|e| InstallError::io(target, e))?;
            if let Some(parent) = target.parent() {
                parents.insert(parent.to_path_buf());
            }
        }
        for parent in parents {
            sync_dir(&parent).map_err(|e| InstallError::io(&parent, e))?;
        }
        Ok(())
    }

    /// Paths written so far
    pub fn targets(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|(target, _)| target.as_path())
    }

    /// Undo every placement, restoring replaced targets
    pub fn rollback(self) {
        for (target, backup) in self.entries.into_iter().rev() {
            if let Err(e) = remove_path(&target) {
                warn!("Failed to remove {} during rollback: {}", target.display(), e);
                continue;
            }
            if let Some(backup) = backup
                && let Err(e) = fs::rename(&backup, &target)
            {
                warn!("Failed to restore {} during rollback: {}", target.display(), e);
            }
        }
    }
}

fn sync_tree(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        for entry in fs::read_dir(path)? {
            sync_tree(&entry?.path())?;
        }
        sync_dir(path)
    } else if meta.is_file() {
        fs::File::open(path)?.sync_all()
    } else {
        Ok(())
    }
}

fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    fs::File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Stops running processes ahead of an uninstall
pub trait ProcessControl: Send + Sync {
    /// Terminate every process named `process`. Returns whether any matched.
    fn terminate(&self, process: &str) -> Result<bool>;
}

/// `pkill -x` on the host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcesses;

impl ProcessControl for SystemProcesses {
    fn terminate(&self, process: &str) -> Result<bool> {
        debug!("Terminating processes named {}", process);
        let status = Command::new("pkill")
            .arg("-x")
            .arg(process)
            .status()
            .map_err(|e| InstallError::Quit {
                process: process.to_string(),
                reason: e.to_string(),
            })?;

        // pkill exits 1 when nothing matched
        match status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(InstallError::Quit {
                process: process.to_string(),
                reason: format!("pkill exited with {}", status),
            }
            .into()),
        }
    }
}
