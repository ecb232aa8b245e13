//! Remote backends for the portal.
//!
//! - [`ServerClient`]: shared REST server (`/api/<table>`)
//! - [`SheetsClient`]: spreadsheet script endpoint, GET-only, writes queued
//!
//! The `DataStore` holds an `Arc<dyn RemoteStore>` for whichever backend is
//! active; local-only mode simply has none.

pub mod server;
pub mod sheets;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::SyncError;
use crate::mode::StorageMode;
use crate::model::{Record, Table};

pub use server::ServerClient;
pub use sheets::SheetsClient;

/// A mutation to propagate to the active backend.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Create { table: Table, record: Record },
    Update { table: Table, id: String, changes: Record },
    Delete { table: Table, id: String },
}

impl WriteOp {
    pub fn table(&self) -> Table {
        match self {
            WriteOp::Create { table, .. }
            | WriteOp::Update { table, .. }
            | WriteOp::Delete { table, .. } => *table,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            WriteOp::Create { .. } => "create",
            WriteOp::Update { .. } => "update",
            WriteOp::Delete { .. } => "delete",
        }
    }
}

/// Result of a submitted write, resolved once the backend has answered.
pub type PendingWrite = BoxFuture<'static, Result<Value, SyncError>>;

/// Common surface of every remote backend.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn mode(&self) -> StorageMode;

    /// Verify the backend answers. Called before a backend becomes active.
    async fn check_available(&self) -> Result<(), SyncError>;

    /// Every record of `table`, already in local field names.
    async fn fetch_all(&self, table: Table) -> Result<Vec<Record>, SyncError>;

    /// Hand a write to the backend.
    ///
    /// Any ordering the backend guarantees is fixed at call time, before the
    /// returned future is first polled.
    fn submit(&self, op: WriteOp) -> PendingWrite;

    /// Spreadsheet-only operations (init, export).
    fn as_sheets(&self) -> Option<&SheetsClient> {
        None
    }
}
