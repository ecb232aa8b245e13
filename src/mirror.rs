//! Durable local mirror of the cache, backed by redb.
//!
//! One entry per table:
//!
//! ```text
//! mirror:  pharmacy_<table>  →  JSON array of records
//! ```
//!
//! Entries are always read and written wholesale. The cache hands over the
//! exact bytes it serialized so the mirror never drifts from it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};

use crate::model::{retain_records, Record, Table};

const MIRROR_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("mirror");
const MIRROR_FILE_NAME: &str = "mirror.redb";

pub struct Mirror {
    db: Database,
}

impl Mirror {
    /// Open (or create) the mirror inside `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
        let path = Self::path_in(data_dir);
        let db = Database::create(&path)
            .with_context(|| format!("failed to open mirror at {}", path.display()))?;
        // Ensure table exists
        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(MIRROR_TABLE)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }

    pub fn path_in(data_dir: &Path) -> PathBuf {
        data_dir.join(MIRROR_FILE_NAME)
    }

    /// Raw JSON bytes stored for `table`, if any.
    pub fn load_raw(&self, table: Table) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let entries = txn.open_table(MIRROR_TABLE)?;
        Ok(entries.get(table.mirror_key())?.map(|v| v.value().to_vec()))
    }

    /// Records stored for `table`. Missing entries read as empty; rows
    /// without an id are dropped.
    pub fn load(&self, table: Table) -> Result<Vec<Record>> {
        match self.load_raw(table)? {
            Some(bytes) => {
                let records: Vec<Record> = serde_json::from_slice(&bytes)
                    .with_context(|| format!("corrupt mirror entry for {table}"))?;
                Ok(retain_records(records))
            }
            None => Ok(Vec::new()),
        }
    }

    /// Overwrite the entry for `table` with already-serialized records.
    pub fn save_raw(&self, table: Table, json: &[u8]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut entries = txn.open_table(MIRROR_TABLE)?;
            entries.insert(table.mirror_key(), json)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn save(&self, table: Table, records: &[Record]) -> Result<()> {
        let json = serde_json::to_vec(records)?;
        self.save_raw(table, &json)
    }

    pub fn is_empty(&self, table: Table) -> bool {
        self.load(table).map(|r| r.is_empty()).unwrap_or(true)
    }
}
