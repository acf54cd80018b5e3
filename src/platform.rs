// src/platform.rs

//! Host platform description and platform predicates
//!
//! Manifests describe which hosts a variant supports with a predicate over
//! OS family and CPU architecture. The host itself is a concrete `Platform`,
//! optionally carrying its OS version for minimum-OS checks.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Darwin,
    Linux,
}

impl Os {
    pub fn as_str(&self) -> &str {
        match self {
            Os::Darwin => "darwin",
            Os::Linux => "linux",
        }
    }
}

impl FromStr for Os {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "darwin" | "macos" | "mac" | "osx" => Ok(Os::Darwin),
            "linux" => Ok(Os::Linux),
            _ => Err(format!("Unknown OS: {}", s)),
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    Arm64,
    Amd64,
}

impl Arch {
    pub fn as_str(&self) -> &str {
        match self {
            Arch::Arm64 => "arm64",
            Arch::Amd64 => "amd64",
        }
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            "amd64" | "x86_64" | "x64" | "intel" => Ok(Arch::Amd64),
            _ => Err(format!("Unknown architecture: {}", s)),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dotted OS release version (e.g. macOS 14.2, Linux kernel 6.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OsVersion {
    pub major: u32,
    pub minor: u32,
}

impl OsVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }
}

/// macOS release codenames accepted in manifests
const MACOS_CODENAMES: &[(&str, u32)] = &[
    ("big_sur", 11),
    ("monterey", 12),
    ("ventura", 13),
    ("sonoma", 14),
    ("sequoia", 15),
    ("tahoe", 26),
];

impl FromStr for OsVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches(':');

        if let Some((_, major)) = MACOS_CODENAMES.iter().find(|(name, _)| *name == s) {
            return Ok(OsVersion::new(*major, 0));
        }

        let mut parts = s.split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(|| format!("Invalid OS version: {}", s))?;
        let minor = match parts.next() {
            Some(p) => p
                .parse::<u32>()
                .map_err(|_| format!("Invalid OS version: {}", s))?,
            None => 0,
        };

        Ok(OsVersion::new(major, minor))
    }
}

impl fmt::Display for OsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Requirement that hosts running `os` be at least `version`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsRequirement {
    pub os: Os,
    pub version: OsVersion,
}

impl OsRequirement {
    /// Whether the host satisfies this requirement.
    ///
    /// Hosts on a different OS family are unaffected. A host on the same
    /// family with an unknown version does not satisfy it.
    pub fn is_satisfied_by(&self, platform: &Platform) -> bool {
        if platform.os != self.os {
            return true;
        }
        match platform.os_version {
            Some(v) => v.cmp(&self.version) != Ordering::Less,
            None => false,
        }
    }
}

impl FromStr for OsRequirement {
    type Err = String;

    /// Parses `"macos >= sonoma"` or `"linux >= 5.4"`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (os, version) = s
            .split_once(">=")
            .ok_or_else(|| format!("Expected '<os> >= <version>', got: {}", s))?;
        Ok(OsRequirement {
            os: os.trim().parse()?,
            version: version.trim().parse()?,
        })
    }
}

impl fmt::Display for OsRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} >= {}", self.os, self.version)
    }
}

/// A concrete host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
    pub os_version: Option<OsVersion>,
}

impl Platform {
    pub fn new(os: Os, arch: Arch) -> Self {
        Self {
            os,
            arch,
            os_version: None,
        }
    }

    pub fn with_os_version(mut self, version: OsVersion) -> Self {
        self.os_version = Some(version);
        self
    }

    /// Detect the running host. Returns `None` on unsupported systems.
    pub fn current() -> Option<Self> {
        let os = std::env::consts::OS.parse::<Os>().ok()?;
        let arch = std::env::consts::ARCH.parse::<Arch>().ok()?;
        let os_version = detect_os_version(os);
        debug!("Detected platform {}/{} ({:?})", os, arch, os_version);
        Some(Self {
            os,
            arch,
            os_version,
        })
    }
}

impl FromStr for Platform {
    type Err = String;

    /// Parses `"darwin/arm64"` or `"darwin/arm64@14.2"`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (pair, version) = match s.split_once('@') {
            Some((pair, v)) => (pair, Some(v.parse::<OsVersion>()?)),
            None => (s, None),
        };
        let (os, arch) = pair
            .split_once('/')
            .ok_or_else(|| format!("Expected '<os>/<arch>', got: {}", s))?;
        Ok(Platform {
            os: os.parse()?,
            arch: arch.parse()?,
            os_version: version,
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)?;
        if let Some(v) = self.os_version {
            write!(f, "@{}", v)?;
        }
        Ok(())
    }
}

/// Variant applicability; `None` in a dimension matches anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlatformPredicate {
    pub os: Option<Os>,
    pub arch: Option<Arch>,
}

impl PlatformPredicate {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn exact(os: Os, arch: Arch) -> Self {
        Self {
            os: Some(os),
            arch: Some(arch),
        }
    }

    pub fn os(os: Os) -> Self {
        Self {
            os: Some(os),
            arch: None,
        }
    }

    pub fn matches(&self, platform: &Platform) -> bool {
        self.os.is_none_or(|os| os == platform.os) && self.arch.is_none_or(|a| a == platform.arch)
    }

    /// True when some host would match both predicates
    pub fn overlaps(&self, other: &PlatformPredicate) -> bool {
        fn dim<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
            match (a, b) {
                (Some(x), Some(y)) => x == y,
                _ => true,
            }
        }
        dim(&self.os, &other.os) && dim(&self.arch, &other.arch)
    }
}

impl FromStr for PlatformPredicate {
    type Err = String;

    /// Parses `"*"`, `"darwin"`, `"darwin/*"`, `"*/arm64"` or `"darwin/arm64"`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        fn part<T: FromStr<Err = String>>(p: &str) -> std::result::Result<Option<T>, String> {
            match p.trim() {
                "*" | "any" | "" => Ok(None),
                other => other.parse().map(Some),
            }
        }

        match s.split_once('/') {
            Some((os, arch)) => Ok(Self {
                os: part(os)?,
                arch: part(arch)?,
            }),
            None => Ok(Self {
                os: part(s)?,
                arch: None,
            }),
        }
    }
}

impl fmt::Display for PlatformPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let os = self.os.map(|o| o.as_str().to_string()).unwrap_or_else(|| "*".to_string());
        let arch = self.arch.map(|a| a.as_str().to_string()).unwrap_or_else(|| "*".to_string());
        write!(f, "{}/{}", os, arch)
    }
}

fn detect_os_version(os: Os) -> Option<OsVersion> {
    let output = match os {
        Os::Darwin => std::process::Command::new("sw_vers")
            .arg("-productVersion")
            .output()
            .ok()?,
        Os::Linux => std::process::Command::new("uname").arg("-r").output().ok()?,
    };
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    // Kernel releases look like 6.1.0-18-amd64; keep the numeric prefix
    let numeric: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts = numeric.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some(OsVersion::new(major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_platform() {
        let p: Platform = "darwin/arm64".parse().unwrap();
        assert_eq!(p, Platform::new(Os::Darwin, Arch::Arm64));

        let p: Platform = "linux/x86_64@6.1".parse().unwrap();
        assert_eq!(p.arch, Arch::Amd64);
        assert_eq!(p.os_version, Some(OsVersion::new(6, 1)));

        assert!("darwin".parse::<Platform>().is_err());
    }

    #[test]
    fn test_32bit_arch_is_not_arm64() {
        assert!("arm".parse::<Arch>().is_err());
        assert!("linux/arm".parse::<Platform>().is_err());
        assert!("x86".parse::<Arch>().is_err());
        assert_eq!("aarch64".parse::<Arch>().unwrap(), Arch::Arm64);
        assert_eq!("x64".parse::<Arch>().unwrap(), Arch::Amd64);
    }

    #[test]
    fn test_predicate_matching() {
        let host = Platform::new(Os::Darwin, Arch::Arm64);
        assert!(PlatformPredicate::any().matches(&host));
        assert!(PlatformPredicate::os(Os::Darwin).matches(&host));
        assert!(PlatformPredicate::exact(Os::Darwin, Arch::Arm64).matches(&host));
        assert!(!PlatformPredicate::exact(Os::Darwin, Arch::Amd64).matches(&host));
        assert!(!PlatformPredicate::os(Os::Linux).matches(&host));
    }

    #[test]
    fn test_predicate_overlap() {
        let darwin_arm = PlatformPredicate::exact(Os::Darwin, Arch::Arm64);
        let darwin_intel = PlatformPredicate::exact(Os::Darwin, Arch::Amd64);
        let darwin_any = PlatformPredicate::os(Os::Darwin);
        let linux = PlatformPredicate::os(Os::Linux);

        assert!(!darwin_arm.overlaps(&darwin_intel));
        assert!(darwin_arm.overlaps(&darwin_any));
        assert!(!darwin_any.overlaps(&linux));
        assert!(PlatformPredicate::any().overlaps(&linux));
    }

    #[test]
    fn test_predicate_parse_and_display() {
        let p: PlatformPredicate = "linux/*".parse().unwrap();
        assert_eq!(p, PlatformPredicate::os(Os::Linux));
        assert_eq!(p.to_string(), "linux/*");

        let p: PlatformPredicate = "*".parse().unwrap();
        assert_eq!(p, PlatformPredicate::any());

        assert!("solaris/sparc".parse::<PlatformPredicate>().is_err());
    }

    #[test]
    fn test_os_requirement_codenames() {
        let req: OsRequirement = "macos >= :sonoma".parse().unwrap();
        assert_eq!(req.os, Os::Darwin);
        assert_eq!(req.version, OsVersion::new(14, 0));

        let sonoma = Platform::new(Os::Darwin, Arch::Arm64).with_os_version(OsVersion::new(14, 2));
        let ventura = Platform::new(Os::Darwin, Arch::Arm64).with_os_version(OsVersion::new(13, 6));
        let unknown = Platform::new(Os::Darwin, Arch::Arm64);
        let linux = Platform::new(Os::Linux, Arch::Amd64);

        assert!(req.is_satisfied_by(&sonoma));
        assert!(!req.is_satisfied_by(&ventura));
        assert!(!req.is_satisfied_by(&unknown));
        assert!(req.is_satisfied_by(&linux));
    }
}
