// src/installer/extract.rs

//! Artifact unpacking into a staging directory
//!
//! Archives are decoded in-process. Disk images have no portable reader,
//! so they are mounted through a `DiskImages` implementation and copied out.

use crate::error::{InstallError, Result};
use std::ffi::OsStr;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

/// Container format of a downloaded artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Zip,
    TarGz,
    TarXz,
    TarZst,
    Dmg,
    /// A single file, typically a bare executable
    Raw,
}

impl ArtifactFormat {
    /// Detect format from the file name, falling back to magic bytes
    pub fn detect(file_name: &str, content: &[u8]) -> Self {
        let lower = file_name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            return ArtifactFormat::Zip;
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            return ArtifactFormat::TarGz;
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            return ArtifactFormat::TarXz;
        } else if lower.ends_with(".tar.zst") {
            return ArtifactFormat::TarZst;
        } else if lower.ends_with(".dmg") {
            return ArtifactFormat::Dmg;
        }

        if content.starts_with(b"PK\x03\x04") {
            ArtifactFormat::Zip
        } else if content.starts_with(&[0x1F, 0x8B]) {
            ArtifactFormat::TarGz
        } else if content.starts_with(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]) {
            ArtifactFormat::TarXz
        } else if content.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]) {
            ArtifactFormat::TarZst
        } else {
            ArtifactFormat::Raw
        }
    }
}

/// Mounts disk images for copying
pub trait DiskImages: Send + Sync {
    /// Attach `image` read-only at `mountpoint`
    fn attach(&self, image: &Path, mountpoint: &Path) -> Result<()>;

    fn detach(&self, mountpoint: &Path) -> Result<()>;
}

/// `hdiutil` on macOS; every other host reports disk images as unsupported
#[derive(Debug, Clone, Copy, Default)]
pub struct Hdiutil;

impl DiskImages for Hdiutil {
    fn attach(&self, image: &Path, mountpoint: &Path) -> Result<()> {
        if !cfg!(target_os = "macos") {
            return Err(InstallError::UnsupportedArtifact(format!(
                "{} is a disk image; mounting one requires macOS",
                image.display()
            ))
            .into());
        }
        hdiutil(&[
            OsStr::new("attach"),
            OsStr::new("-nobrowse"),
            OsStr::new("-readonly"),
            OsStr::new("-noautoopen"),
            OsStr::new("-mountpoint"),
            mountpoint.as_os_str(),
            image.as_os_str(),
        ])
    }

    fn detach(&self, mountpoint: &Path) -> Result<()> {
        hdiutil(&[OsStr::new("detach"), mountpoint.as_os_str(), OsStr::new("-force")])
    }
}

fn hdiutil(args: &[&OsStr]) -> Result<()> {
    debug!("Running hdiutil {:?}", args);
    let output = Command::new("hdiutil")
        .args(args)
        .output()
        .map_err(|e| InstallError::Extract(format!("Failed to run hdiutil: {}", e)))?;

    if !output.status.success() {
        return Err(InstallError::Extract(format!(
            "hdiutil {} failed: {}",
            args.first().map(|a| a.to_string_lossy()).unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        ))
        .into());
    }
    Ok(())
}

/// Unpack `content` into `dest`
///
/// Raw artifacts are written as a single executable named `file_name`.
pub fn unpack(
    content: &[u8],
    file_name: &str,
    dest: &Path,
    images: &dyn DiskImages,
) -> Result<ArtifactFormat> {
    let format = ArtifactFormat::detect(file_name, content);
    debug!("Unpacking {} as {:?} into {}", file_name, format, dest.display());

    fs::create_dir_all(dest).map_err(|e| InstallError::io(dest, e))?;

    match format {
        ArtifactFormat::Zip => {
            let mut archive = zip::ZipArchive::new(Cursor::new(content))
                .map_err(|e| InstallError::Extract(format!("Failed to open zip: {}", e)))?;
            archive
                .extract(dest)
                .map_err(|e| InstallError::Extract(format!("Failed to extract zip: {}", e)))?;
        }
        ArtifactFormat::TarGz => {
            unpack_tar(flate2::read::GzDecoder::new(content), dest)?;
        }
        ArtifactFormat::TarXz => {
            unpack_tar(xz2::read::XzDecoder::new(content), dest)?;
        }
        ArtifactFormat::TarZst => {
            let decoder = zstd::stream::read::Decoder::new(content)
                .map_err(|e| InstallError::Extract(format!("Failed to open zstd stream: {}", e)))?;
            unpack_tar(decoder, dest)?;
        }
        ArtifactFormat::Dmg => {
            unpack_dmg(content, dest, images)?;
        }
        ArtifactFormat::Raw => {
            let name = match file_name {
                "" | "." | ".." => "artifact",
                name => name,
            };
            let path = dest.join(name);
            fs::write(&path, content).map_err(|e| InstallError::io(&path, e))?;
            set_executable(&path)?;
        }
    }

    Ok(format)
}

/// Mount the image next to `dest`, copy its visible top-level entries, detach
fn unpack_dmg(content: &[u8], dest: &Path, images: &dyn DiskImages) -> Result<()> {
    let work_root = dest.parent().unwrap_or(dest);
    let work = tempfile::Builder::new()
        .prefix("dmg-")
        .tempdir_in(work_root)
        .map_err(|e| InstallError::io(work_root, e))?;

    let image = work.path().join("image.dmg");
    fs::write(&image, content).map_err(|e| InstallError::io(&image, e))?;
    let mountpoint = work.path().join("mount");
    fs::create_dir_all(&mountpoint).map_err(|e| InstallError::io(&mountpoint, e))?;

    images.attach(&image, &mountpoint)?;
    let copied = copy_volume(&mountpoint, dest);
    let detached = images.detach(&mountpoint);
    if let Err(e) = &detached {
        warn!("Failed to detach {}: {}", mountpoint.display(), e);
    }

    copied?;
    detached
}

/// Volume metadata (`.Trashes`, `.fseventsd`, `.background`) is skipped
fn copy_volume(volume: &Path, dest: &Path) -> Result<()> {
    let entries = fs::read_dir(volume).map_err(|e| InstallError::io(volume, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| InstallError::io(volume, e))?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        copy_tree(&entry.path(), &dest.join(entry.file_name()))?;
    }
    Ok(())
}

/// Recursive copy that keeps symlinks as symlinks
fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(source).map_err(|e| InstallError::io(source, e))?;

    if meta.file_type().is_symlink() {
        let link = fs::read_link(source).map_err(|e| InstallError::io(source, e))?;
        #[cfg(unix)]
        std::os::unix::fs::symlink(&link, target).map_err(|e| InstallError::io(target, e))?;
        #[cfg(not(unix))]
        debug!("Skipping symlink {} -> {}", source.display(), link.display());
    } else if meta.is_dir() {
        fs::create_dir_all(target).map_err(|e| InstallError::io(target, e))?;
        for entry in fs::read_dir(source).map_err(|e| InstallError::io(source, e))? {
            let entry = entry.map_err(|e| InstallError::io(source, e))?;
            copy_tree(&entry.path(), &target.join(entry.file_name()))?;
        }
    } else {
        fs::copy(source, target).map_err(|e| InstallError::io(target, e))?;
    }
    Ok(())
}

fn unpack_tar<R: std::io::Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive
        .unpack(dest)
        .map_err(|e| InstallError::Extract(format!("Failed to extract tarball: {}", e)))?;
    Ok(())
}

/// Mark a file as executable (0755)
pub fn set_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)
            .map_err(|e| InstallError::io(path, e))?
            .permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).map_err(|e| InstallError::io(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
