// src/installer/smoke.rs

//! Post-install smoke tests
//!
//! Each test runs one installed program and checks its exit status and
//! combined output against the manifest's expectations.

use crate::error::{InstallError, Result};
use crate::installer::actions::expand_path;
use crate::manifest::{SmokeTest, VERSION_PLACEHOLDER};
use crate::registry::InstalledRecord;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;
use tracing::debug;

const BUSY_RETRIES: u32 = 5;

/// Run one smoke test against an installed package
pub fn run(record: &InstalledRecord, test: &SmokeTest, root: &Path) -> Result<()> {
    let fail = |reason: String| -> crate::error::Error {
        InstallError::TestFailed {
            name: record.name.clone(),
            command: test.command.clone(),
            reason,
        }
        .into()
    };

    let program = locate(record, &test.command, root)?
        .ok_or_else(|| fail("not installed by this package".to_string()))?;
    let args: Vec<String> = test
        .args
        .iter()
        .map(|a| a.replace(VERSION_PLACEHOLDER, &record.version))
        .collect();

    debug!("Testing {}: {} {:?}", record.name, program.display(), args);
    let output = spawn(&program, &args).map_err(|e| fail(format!("failed to start: {}", e)))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    if output.status.code() != Some(test.exit_code) {
        return Err(fail(format!(
            "{} (expected exit code {})",
            output.status, test.exit_code
        )));
    }
    for expected in &test.expect_contains {
        let expected = expected.replace(VERSION_PLACEHOLDER, &record.version);
        if !text.contains(&expected) {
            return Err(fail(format!("output does not contain '{}'", expected)));
        }
    }
    for unwanted in &test.expect_absent {
        if text.contains(unwanted.as_str()) {
            return Err(fail(format!("output contains '{}'", unwanted)));
        }
    }
    Ok(())
}

/// A bare name is matched against the files the package installed;
/// anything else is a path under the package root
fn locate(record: &InstalledRecord, command: &str, root: &Path) -> Result<Option<PathBuf>> {
    if !command.contains('/') {
        return Ok(record
            .files
            .iter()
            .map(PathBuf::from)
            .find(|f| f.file_name().is_some_and(|n| n == command)));
    }
    let path = expand_path(command, root)?;
    Ok(path.is_file().then_some(path))
}

/// A just-placed executable can briefly report ETXTBSY while another
/// thread's fork still holds a write handle to it
fn spawn(program: &Path, args: &[String]) -> io::Result<Output> {
    let mut attempt = 0;
    loop {
        match Command::new(program).args(args).output() {
            Err(e) if e.kind() == io::ErrorKind::ExecutableFileBusy && attempt < BUSY_RETRIES => {
                attempt += 1;
                std::thread::sleep(Duration::from_millis(20 * u64::from(attempt)));
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::fs;

    fn installed_script(dir: &Path, body: &str) -> InstalledRecord {
        let bin = dir.join("bin");
        fs::create_dir_all(&bin).unwrap();
        let path = bin.join("coder");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        crate::installer::extract::set_executable(&path).unwrap();

        let mut record = InstalledRecord::new(
            "coder".to_string(),
            "2.30.2".to_string(),
            "file:///mirror/coder.tar.gz".to_string(),
            "no_check".to_string(),
        );
        record.files.insert(path.to_string_lossy().into_owned());
        record
    }

    fn smoke(args: &[&str], contains: &[&str], absent: &[&str], exit_code: i32) -> SmokeTest {
        SmokeTest {
            command: "coder".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            expect_contains: contains.iter().map(|a| a.to_string()).collect(),
            expect_absent: absent.iter().map(|a| a.to_string()).collect(),
            exit_code,
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_version_output_matches() {
        let dir = tempfile::tempdir().unwrap();
        let record = installed_script(
            dir.path(),
            r#"if [ "$1" = version ]; then echo "Coder v2.30.2+abc Full build"; else echo "You are not logged in" >&2; exit 1; fi"#,
        );

        let version = smoke(&["version"], &["{version}", "Full build"], &["AGPL"], 0);
        run(&record, &version, dir.path()).unwrap();

        let netcheck = smoke(&["netcheck"], &["You are not logged in"], &[], 1);
        run(&record, &netcheck, dir.path()).unwrap();

        let by_path = SmokeTest {
            command: "bin/coder".to_string(),
            ..version
        };
        run(&record, &by_path, dir.path()).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_failures_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let record = installed_script(dir.path(), r#"echo "Coder v2.30.2 AGPL""#);

        let cases = [
            smoke(&["version"], &["Full build"], &[], 0),
            smoke(&["version"], &[], &["AGPL"], 0),
            smoke(&["version"], &[], &[], 1),
        ];
        for test in cases {
            let err = run(&record, &test, dir.path()).unwrap_err();
            assert!(matches!(err, Error::Install(InstallError::TestFailed { .. })), "{}", err);
        }

        let missing = SmokeTest {
            command: "coderd".to_string(),
            ..smoke(&[], &[], &[], 0)
        };
        let err = run(&record, &missing, dir.path()).unwrap_err();
        assert!(err.to_string().contains("not installed by this package"));
    }
}
