//! REST server backend.
//!
//! ```text
//! GET    {base}/{table}        → JSON array of records
//! POST   {base}/{table}        ← full record
//! PUT    {base}/{table}/{id}   ← changed fields
//! DELETE {base}/{table}/{id}
//! ```
//!
//! Availability is probed once with a short timeout and remembered for the
//! lifetime of the client. Writes are independent requests with no ordering
//! between concurrent callers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::OnceCell;

use super::{PendingWrite, RemoteStore, WriteOp};
use crate::error::SyncError;
use crate::mode::StorageMode;
use crate::model::{retain_records, Record, Table};
use crate::transport::{HttpRequest, HttpTransport};

pub struct ServerClient {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    probe_timeout: Duration,
    request_timeout: Duration,
    available: OnceCell<bool>,
}

impl ServerClient {
    pub fn new(
        base_url: &str,
        transport: Arc<dyn HttpTransport>,
        probe_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            probe_timeout,
            request_timeout,
            available: OnceCell::new(),
        }
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/{}", self.base_url, table)
    }

    fn record_url(&self, table: Table, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, table, urlencoding::encode(id))
    }

    /// Whether the server answered the connectivity probe.
    ///
    /// The probe runs at most once; later calls return the cached answer.
    pub async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                let request = HttpRequest::get(self.table_url(Table::Medicines))
                    .with_timeout(self.probe_timeout);
                let ok = match tokio::time::timeout(self.probe_timeout, self.transport.send(request))
                    .await
                {
                    Ok(Ok(_)) => true,
                    Ok(Err(e)) => {
                        tracing::info!("Server probe failed: {}", e);
                        false
                    }
                    Err(_) => {
                        tracing::info!("Server probe timed out after {:?}", self.probe_timeout);
                        false
                    }
                };
                if ok {
                    tracing::info!("Server reachable at {} (shared database mode)", self.base_url);
                }
                ok
            })
            .await
    }

    fn request_for(&self, op: &WriteOp) -> HttpRequest {
        let request = match op {
            WriteOp::Create { table, record } => {
                HttpRequest::new(Method::POST, self.table_url(*table))
                    .with_body(Value::Object(record.clone()))
            }
            WriteOp::Update { table, id, changes } => {
                HttpRequest::new(Method::PUT, self.record_url(*table, id))
                    .with_body(Value::Object(changes.clone()))
            }
            WriteOp::Delete { table, id } => {
                HttpRequest::new(Method::DELETE, self.record_url(*table, id))
            }
        };
        request.with_timeout(self.request_timeout)
    }
}

#[async_trait]
impl RemoteStore for ServerClient {
    fn mode(&self) -> StorageMode {
        StorageMode::Server
    }

    async fn check_available(&self) -> Result<(), SyncError> {
        if self.is_available().await {
            Ok(())
        } else {
            Err(SyncError::Transport(format!(
                "server at {} is unreachable",
                self.base_url
            )))
        }
    }

    async fn fetch_all(&self, table: Table) -> Result<Vec<Record>, SyncError> {
        let request = HttpRequest::get(self.table_url(table)).with_timeout(self.request_timeout);
        let body = self.transport.send(request).await?;
        let records: Vec<Record> = serde_json::from_value(body).map_err(|e| {
            SyncError::Remote(format!("unexpected response for {table}: {e}"))
        })?;
        Ok(retain_records(records))
    }

    fn submit(&self, op: WriteOp) -> PendingWrite {
        let request = self.request_for(&op);
        let transport = Arc::clone(&self.transport);
        Box::pin(async move { transport.send(request).await })
    }
}
