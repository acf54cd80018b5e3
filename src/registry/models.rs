// src/registry/models.rs

//! Registry records
//!
//! Rust structs mirroring the registry tables, with the queries that read
//! and write them. Callers wrap writes in a transaction.

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// An installed package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledRecord {
    pub name: String,
    pub version: String,
    /// RFC 3339 timestamp
    pub installed_at: String,
    pub files: BTreeSet<String>,
    /// Identifies the installed variant together with `checksum`
    pub source_url: String,
    pub checksum: String,
    pub zap_paths: Vec<String>,
}

impl InstalledRecord {
    pub fn new(name: String, version: String, source_url: String, checksum: String) -> Self {
        Self {
            name,
            version,
            installed_at: chrono::Utc::now().to_rfc3339(),
            files: BTreeSet::new(),
            source_url,
            checksum,
            zap_paths: Vec::new(),
        }
    }

    /// Same package, version and artifact
    pub fn is_same_install(&self, other: &InstalledRecord) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.source_url == other.source_url
            && self.checksum == other.checksum
    }

    /// Insert or replace this record with its file and zap sets
    pub fn save(&self, conn: &Connection) -> Result<()> {
        Self::delete(conn, &self.name)?;

        conn.execute(
            "INSERT INTO packages (name, version, source_url, checksum, installed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &self.name,
                &self.version,
                &self.source_url,
                &self.checksum,
                &self.installed_at,
            ],
        )?;

        let mut files =
            conn.prepare("INSERT INTO package_files (package_name, path) VALUES (?1, ?2)")?;
        for path in &self.files {
            files.execute(params![&self.name, path])?;
        }

        let mut zaps =
            conn.prepare("INSERT OR IGNORE INTO zap_paths (package_name, path) VALUES (?1, ?2)")?;
        for path in &self.zap_paths {
            zaps.execute(params![&self.name, path])?;
        }

        Ok(())
    }

    /// Find an installed package by name
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT name, version, source_url, checksum, installed_at FROM packages WHERE name = ?1",
        )?;

        let record = stmt.query_row([name], Self::from_row).optional()?;

        match record {
            Some(mut record) => {
                record.load_paths(conn)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all installed packages
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT name, version, source_url, checksum, installed_at FROM packages ORDER BY name",
        )?;

        let mut records = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for record in &mut records {
            record.load_paths(conn)?;
        }

        Ok(records)
    }

    /// Names of every installed package
    pub fn names(conn: &Connection) -> Result<BTreeSet<String>> {
        let mut stmt = conn.prepare("SELECT name FROM packages")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<BTreeSet<String>, _>>()?;
        Ok(names)
    }

    /// Package that recorded `path`, if any
    pub fn find_owner(conn: &Connection, path: &str) -> Result<Option<String>> {
        let owner = conn
            .query_row(
                "SELECT package_name FROM package_files WHERE path = ?1 LIMIT 1",
                [path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner)
    }

    /// Delete a package record; files and zap paths cascade
    pub fn delete(conn: &Connection, name: &str) -> Result<()> {
        conn.execute("DELETE FROM package_files WHERE package_name = ?1", [name])?;
        conn.execute("DELETE FROM zap_paths WHERE package_name = ?1", [name])?;
        conn.execute("DELETE FROM packages WHERE name = ?1", [name])?;
        Ok(())
    }

    fn load_paths(&mut self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare("SELECT path FROM package_files WHERE package_name = ?1")?;
        self.files = stmt
            .query_map([&self.name], |row| row.get(0))?
            .collect::<std::result::Result<BTreeSet<String>, _>>()?;

        let mut stmt =
            conn.prepare("SELECT path FROM zap_paths WHERE package_name = ?1 ORDER BY id")?;
        self.zap_paths = stmt
            .query_map([&self.name], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(())
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            version: row.get(1)?,
            source_url: row.get(2)?,
            checksum: row.get(3)?,
            installed_at: row.get(4)?,
            files: BTreeSet::new(),
            zap_paths: Vec::new(),
        })
    }
}

/// Kind of committed transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Install,
    Upgrade,
    Uninstall,
    Zap,
}

impl Operation {
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Install => "install",
            Operation::Upgrade => "upgrade",
            Operation::Uninstall => "uninstall",
            Operation::Zap => "zap",
        }
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "install" => Ok(Operation::Install),
            "upgrade" => Ok(Operation::Upgrade),
            "uninstall" => Ok(Operation::Uninstall),
            "zap" => Ok(Operation::Zap),
            _ => Err(format!("Invalid operation: {}", s)),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Changeset is one committed registry transition
#[derive(Debug, Clone)]
pub struct Changeset {
    pub id: Option<i64>,
    pub operation: Operation,
    pub package: String,
    pub from_version: Option<String>,
    pub to_version: Option<String>,
    pub committed_at: Option<String>,
}

impl Changeset {
    pub fn new(operation: Operation, package: String) -> Self {
        Self {
            id: None,
            operation,
            package,
            from_version: None,
            to_version: None,
            committed_at: None,
        }
    }

    /// Insert this changeset into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO changesets (operation, package, from_version, to_version)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                self.operation.as_str(),
                &self.package,
                &self.from_version,
                &self.to_version,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// List all changesets, most recent first
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, operation, package, from_version, to_version, committed_at
             FROM changesets ORDER BY id DESC",
        )?;

        let changesets = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(changesets)
    }

    /// Changesets touching one package, most recent first
    pub fn find_by_package(conn: &Connection, package: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, operation, package, from_version, to_version, committed_at
             FROM changesets WHERE package = ?1 ORDER BY id DESC",
        )?;

        let changesets = stmt
            .query_map([package], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(changesets)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let op_str: String = row.get(1)?;
        let operation = op_str.parse::<Operation>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            operation,
            package: row.get(2)?,
            from_version: row.get(3)?,
            to_version: row.get(4)?,
            committed_at: row.get(5)?,
        })
    }
}
