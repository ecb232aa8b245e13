//! In-memory record cache, the source of truth for every synchronous read.
//!
//! Each table is loaded lazily from the durable mirror on first access. Every
//! write re-serializes the whole table once and stores those same bytes in
//! the mirror while the table lock is held, so cache and mirror never
//! disagree.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::mirror::Mirror;
use crate::model::{generate_id, next_timestamp, now_iso, record_id, Record, Table};

pub struct Cache {
    tables: Mutex<HashMap<Table, Vec<Record>>>,
    mirror: Mirror,
}

impl Cache {
    pub fn new(mirror: Mirror) -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            mirror,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Table, Vec<Record>>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Table contents, pulling them from the mirror if not yet cached.
    fn entry<'a>(
        &self,
        tables: &'a mut HashMap<Table, Vec<Record>>,
        table: Table,
    ) -> &'a mut Vec<Record> {
        tables.entry(table).or_insert_with(|| {
            self.mirror.load(table).unwrap_or_else(|e| {
                tracing::error!("Could not read mirror for {}: {:#}", table, e);
                Vec::new()
            })
        })
    }

    /// Serialize `records` and write them through to the mirror.
    fn persist(&self, table: Table, records: &[Record]) {
        let result = serde_json::to_vec(records)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.mirror.save_raw(table, &json));
        if let Err(e) = result {
            tracing::error!("Could not save mirror for {}: {:#}", table, e);
        }
    }

    /// Copy of every record in `table`, in stored order.
    pub fn get_all(&self, table: Table) -> Vec<Record> {
        let mut tables = self.lock();
        self.entry(&mut tables, table).clone()
    }

    pub fn get_by_id(&self, table: Table, id: &str) -> Option<Record> {
        let mut tables = self.lock();
        self.entry(&mut tables, table)
            .iter()
            .find(|r| record_id(r) == Some(id))
            .cloned()
    }

    /// Serialized form of `table`, as stored in the mirror.
    pub fn snapshot(&self, table: Table) -> String {
        let mut tables = self.lock();
        serde_json::to_string(self.entry(&mut tables, table)).unwrap_or_default()
    }

    /// Swap in a whole table at once.
    pub fn replace(&self, table: Table, records: Vec<Record>) {
        let mut tables = self.lock();
        self.persist(table, &records);
        tables.insert(table, records);
    }

    /// Swap in `records` only if they serialize differently from what is
    /// cached. Returns whether the table changed.
    pub fn replace_if_changed(&self, table: Table, records: Vec<Record>) -> bool {
        let mut tables = self.lock();
        let current = self.entry(&mut tables, table);
        let old = serde_json::to_string(&*current).unwrap_or_default();
        let new = serde_json::to_string(&records).unwrap_or_default();
        if old == new {
            return false;
        }
        self.persist(table, &records);
        tables.insert(table, records);
        true
    }

    /// Re-read `table` from the mirror, discarding what is cached.
    pub fn reload_from_mirror(&self, table: Table) -> Vec<Record> {
        let mut tables = self.lock();
        tables.remove(&table);
        self.entry(&mut tables, table).clone()
    }

    /// Whether the mirror holds nothing for `table`.
    pub fn mirror_is_empty(&self, table: Table) -> bool {
        let _tables = self.lock();
        self.mirror.is_empty(table)
    }

    /// Append a record, assigning a fresh id when it has none or its id is
    /// already taken, and stamping `created_at == updated_at`.
    pub fn create(&self, table: Table, mut record: Record) -> Record {
        let mut tables = self.lock();
        let records = self.entry(&mut tables, table);

        let taken = |id: &str| records.iter().any(|r| record_id(r) == Some(id));
        let collides = record_id(&record).map_or(true, |id| taken(id));
        if collides {
            if let Some(id) = record_id(&record) {
                tracing::debug!("Id {} already used in {}; assigning a new one", id, table);
            }
            let mut id = generate_id();
            while taken(&id) {
                id = generate_id();
            }
            record.insert("id".to_string(), Value::String(id));
        }
        let now = now_iso();
        record.insert("created_at".to_string(), Value::String(now.clone()));
        record.insert("updated_at".to_string(), Value::String(now));

        records.push(record.clone());
        self.persist(table, records);
        record
    }

    /// Merge `changes` over the record with `id` and re-stamp `updated_at`.
    /// Returns the updated record, or `None` if no such record exists.
    pub fn update(&self, table: Table, id: &str, changes: &Record) -> Option<Record> {
        let mut tables = self.lock();
        let records = self.entry(&mut tables, table);
        let index = records.iter().position(|r| record_id(r) == Some(id))?;

        let existing = &mut records[index];
        let previous = existing
            .get("updated_at")
            .and_then(Value::as_str)
            .map(str::to_string);
        for (key, value) in changes {
            if key != "id" {
                existing.insert(key.clone(), value.clone());
            }
        }
        existing.insert(
            "updated_at".to_string(),
            Value::String(next_timestamp(previous.as_deref())),
        );

        let updated = existing.clone();
        self.persist(table, records);
        Some(updated)
    }

    /// Remove the record with `id`. Returns whether one was removed.
    pub fn delete(&self, table: Table, id: &str) -> bool {
        let mut tables = self.lock();
        let records = self.entry(&mut tables, table);
        let before = records.len();
        records.retain(|r| record_id(r) != Some(id));
        if records.len() == before {
            return false;
        }
        self.persist(table, records);
        true
    }
}
