// src/config.rs

//! Runtime configuration
//!
//! There are no configuration files; everything durable lives in the
//! registry database. `Config` only carries paths and tunables, with
//! platform-appropriate defaults that the CLI overrides:
//! - **Linux**: state in `~/.local/share/caskade`, cache in `~/.cache/caskade`
//! - **macOS**: state in `~/Library/Application Support/caskade`,
//!   cache in `~/Library/Caches/caskade`
//!
//! The install prefix defaults to `~/.caskade`, holding `bin/` and
//! `Applications/`.

use crate::fetcher::{HTTP_TIMEOUT, RetryPolicy};
use crate::platform::Platform;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default wait for a package lock held by another installer
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Name of the staging directory kept under the prefix
pub const STAGING_DIR: &str = ".caskade-staging";

/// What an upgrade does with the previous version's zap paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZapPolicy {
    /// Leave user data from the old version in place
    #[default]
    Preserve,
    /// Remove old zap paths the new version no longer declares
    Supersede,
}

impl ZapPolicy {
    pub fn as_str(&self) -> &str {
        match self {
            ZapPolicy::Preserve => "preserve",
            ZapPolicy::Supersede => "supersede",
        }
    }
}

impl FromStr for ZapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "preserve" => Ok(ZapPolicy::Preserve),
            "supersede" => Ok(ZapPolicy::Supersede),
            _ => Err(format!("Invalid zap policy: {}", s)),
        }
    }
}

impl fmt::Display for ZapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Paths and tunables for one engine instance
#[derive(Debug, Clone)]
pub struct Config {
    /// Holds the registry database and lock files
    pub state_dir: PathBuf,
    pub db_path: PathBuf,
    pub manifest_dir: PathBuf,
    pub prefix: PathBuf,
    pub cache_dir: PathBuf,
    /// Overrides host detection when set
    pub platform: Option<Platform>,
    pub retry: RetryPolicy,
    pub http_timeout: Duration,
    pub lock_timeout: Duration,
    pub zap_policy: ZapPolicy,
}

impl Default for Config {
    fn default() -> Self {
        let state_dir = dirs::data_local_dir()
            .map(|d| d.join("caskade"))
            .unwrap_or_else(|| PathBuf::from(".caskade/state"));
        let cache_dir = dirs::cache_dir()
            .map(|d| d.join("caskade"))
            .unwrap_or_else(|| state_dir.join("cache"));
        let prefix = dirs::home_dir()
            .map(|h| h.join(".caskade"))
            .unwrap_or_else(|| PathBuf::from(".caskade"));

        Self {
            db_path: state_dir.join("caskade.db"),
            manifest_dir: state_dir.join("manifests"),
            state_dir,
            prefix,
            cache_dir,
            platform: None,
            retry: RetryPolicy::default(),
            http_timeout: HTTP_TIMEOUT,
            lock_timeout: LOCK_TIMEOUT,
            zap_policy: ZapPolicy::default(),
        }
    }
}

impl Config {
    /// Everything under one directory; used for sandboxes and tests
    pub fn rooted_at(root: &Path) -> Self {
        let state_dir = root.join("state");
        Self {
            db_path: state_dir.join("caskade.db"),
            manifest_dir: root.join("manifests"),
            prefix: root.join("prefix"),
            cache_dir: root.join("cache"),
            state_dir,
            ..Self::default()
        }
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.state_dir.join("locks")
    }

    /// Staging lives under the prefix so placement is a same-filesystem rename
    pub fn staging_dir(&self) -> PathBuf {
        self.prefix.join(STAGING_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rooted_config() {
        let config = Config::rooted_at(Path::new("/tmp/sandbox"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/sandbox/state/caskade.db"));
        assert_eq!(config.lock_dir(), PathBuf::from("/tmp/sandbox/state/locks"));
        assert_eq!(
            config.staging_dir(),
            PathBuf::from("/tmp/sandbox/prefix/.caskade-staging")
        );
        assert_eq!(config.lock_timeout, LOCK_TIMEOUT);
        assert_eq!(config.zap_policy, ZapPolicy::Preserve);
    }

    #[test]
    fn test_default_db_lives_in_state_dir() {
        let config = Config::default();
        assert!(config.db_path.starts_with(&config.state_dir));
        assert_eq!(config.http_timeout, HTTP_TIMEOUT);
    }

    #[test]
    fn test_zap_policy_parse() {
        assert_eq!("supersede".parse::<ZapPolicy>().unwrap(), ZapPolicy::Supersede);
        assert_eq!("Preserve".parse::<ZapPolicy>().unwrap(), ZapPolicy::Preserve);
        assert!("delete".parse::<ZapPolicy>().is_err());
    }
}
