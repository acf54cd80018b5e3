// src/lib.rs

//! Caskade package installer
//!
//! Resolves declarative package manifests for the running host, fetches and
//! verifies their artifacts, and installs them idempotently under a prefix.
//!
//! # Architecture
//!
//! - Manifests: typed, validated data; lifecycle steps are data, not code
//! - Resolution: a pure function of manifests, request, platform and registry
//! - Registry: all durable state in SQLite, one transaction per transition
//! - Per-package locks: distinct packages install concurrently

pub mod config;
pub mod engine;
mod error;
pub mod fetcher;
pub mod installer;
pub mod lock;
pub mod manifest;
pub mod platform;
pub mod registry;
pub mod resolver;
pub mod version;

pub use config::{Config, ZapPolicy};
pub use engine::{Engine, Outdated};
pub use error::{Error, FetchError, InstallError, ParseError, ResolutionError, Result};
pub use installer::{InstallOutcome, InstallStatus, Installer, ZapReport};
pub use manifest::{Manifest, ManifestSet};
pub use platform::Platform;
pub use registry::{InstalledRecord, Registry};
pub use resolver::{PackageRequest, ResolvedInstall};
