// src/registry/mod.rs

//! Registry State: the durable record of installed packages
//!
//! This module handles all SQLite operations including:
//! - Database initialization and schema migration
//! - Connection management
//! - Atomic commits of install, upgrade and removal transitions
//! - The changeset history
//!
//! Every transition is a single SQLite transaction. A process that dies
//! before the commit leaves the previous state; after it, the new one.

pub mod models;
pub mod schema;

pub use models::{Changeset, InstalledRecord, Operation};

use crate::error::{Error, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Initialize a new registry database at the specified path
///
/// Creates the database file and applies the schema. Idempotent.
pub fn init(db_path: &Path) -> Result<()> {
    debug!("Initializing registry at: {}", db_path.display());

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::InitError(format!("Failed to create registry directory: {}", e)))?;
    }

    let conn = Connection::open(db_path)?;
    configure(&conn)?;
    schema::migrate(&conn)?;

    info!("Registry initialized at {}", db_path.display());
    Ok(())
}

/// Open an existing registry database
pub fn open(db_path: &Path) -> Result<Connection> {
    if !db_path.exists() {
        return Err(Error::DatabaseNotFound(db_path.display().to_string()));
    }

    let conn = Connection::open(db_path)?;
    configure(&conn)?;
    schema::migrate(&conn)?;

    Ok(conn)
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA busy_timeout = 5000;
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = FULL;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

/// Run `f` inside a transaction, committing only if it succeeds
///
/// The write lock is taken up front so concurrent writers queue on
/// `busy_timeout` instead of failing when a read upgrades to a write.
pub fn transaction<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let result = f(&tx)?;
    tx.commit()?;
    Ok(result)
}

/// Serialized access to the registry database
pub struct Registry {
    conn: Mutex<Connection>,
}

impl Registry {
    /// Open the registry at `db_path`, creating it if needed
    pub fn open_or_init(db_path: &Path) -> Result<Self> {
        if !db_path.exists() {
            init(db_path)?;
        }
        Ok(Self {
            conn: Mutex::new(open(db_path)?),
        })
    }

    /// Open an existing registry
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open(db_path)?),
        })
    }

    /// Registry that lives only as long as the process
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-applied
        // transaction behind, so the connection is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, name: &str) -> Result<Option<InstalledRecord>> {
        InstalledRecord::find_by_name(&self.conn(), name)
    }

    pub fn list(&self) -> Result<Vec<InstalledRecord>> {
        InstalledRecord::list_all(&self.conn())
    }

    pub fn installed_names(&self) -> Result<BTreeSet<String>> {
        InstalledRecord::names(&self.conn())
    }

    /// Installed package, other than `name`, that owns `path`
    pub fn owner_of(&self, path: &str, name: &str) -> Result<Option<String>> {
        let owner = InstalledRecord::find_owner(&self.conn(), path)?;
        Ok(owner.filter(|o| o != name))
    }

    /// Atomically replace the record for `record.name` and log the change
    pub fn commit_install(&self, record: &InstalledRecord) -> Result<Changeset> {
        let mut conn = self.conn();
        let changeset = transaction(&mut conn, |tx| {
            let previous = InstalledRecord::find_by_name(tx, &record.name)?;
            let operation = if previous.is_some() {
                Operation::Upgrade
            } else {
                Operation::Install
            };

            let mut changeset = Changeset::new(operation, record.name.clone());
            changeset.from_version = previous.map(|p| p.version);
            changeset.to_version = Some(record.version.clone());

            record.save(tx)?;
            changeset.insert(tx)?;
            Ok(changeset)
        })?;

        info!(
            "Committed {} of {} {}",
            changeset.operation, record.name, record.version
        );
        Ok(changeset)
    }

    /// Atomically remove the record for `name` and log the change
    pub fn commit_removal(&self, name: &str, operation: Operation) -> Result<Changeset> {
        let mut conn = self.conn();
        let changeset = transaction(&mut conn, |tx| {
            let previous = InstalledRecord::find_by_name(tx, name)?;
            let mut changeset = Changeset::new(operation, name.to_string());
            changeset.from_version = previous.map(|p| p.version);

            InstalledRecord::delete(tx, name)?;
            changeset.insert(tx)?;
            Ok(changeset)
        })?;

        info!("Committed {} of {}", operation, name);
        Ok(changeset)
    }

    pub fn history(&self) -> Result<Vec<Changeset>> {
        Changeset::list_all(&self.conn())
    }

    /// Changesets for one package, most recent first
    pub fn history_for(&self, name: &str) -> Result<Vec<Changeset>> {
        Changeset::find_by_package(&self.conn(), name)
    }
}
