//! Spreadsheet script endpoint backend.
//!
//! The endpoint only answers GET reliably, so writes travel as a
//! URL-encoded JSON `payload` query parameter:
//!
//! ```text
//! GET {url}?action=ping | init | read&sheet=<t>
//! GET {url}?payload=<urlencoded {action, sheet, id?, data?}>
//! ```
//!
//! Every response is an envelope `{success, ...}` or `{success: false, error}`.
//!
//! Writes go through a single worker task: one request in flight at a time,
//! strict FIFO, with a cooldown between the end of one write and the start of
//! the next. A failed write does not affect the ones queued behind it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::{PendingWrite, RemoteStore, WriteOp};
use crate::error::SyncError;
use crate::mapping::{from_remote, to_remote};
use crate::mode::StorageMode;
use crate::model::{retain_records, Record, Table};
use crate::transport::{HttpRequest, HttpTransport};

/// Every deployed script URL starts with this.
pub const SCRIPT_URL_PREFIX: &str = "https://script.google.com/";

/// Reject URLs that cannot be a deployed script endpoint.
pub fn validate_script_url(url: &str) -> Result<(), SyncError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(SyncError::Configuration(
            "spreadsheet script URL is not set".to_string(),
        ));
    }
    if !url.starts_with(SCRIPT_URL_PREFIX) {
        return Err(SyncError::Configuration(format!(
            "not a script URL (expected {SCRIPT_URL_PREFIX}...): {url}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PingResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InitResponse {
    pub message: String,
    /// Tables the script had to create.
    pub created: Vec<String>,
}

struct QueuedWrite {
    request: HttpRequest,
    reply: oneshot::Sender<Result<Value, SyncError>>,
}

pub struct SheetsClient {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    request_timeout: Duration,
    queue_tx: mpsc::UnboundedSender<QueuedWrite>,
}

impl SheetsClient {
    /// Create a client and start its write worker.
    ///
    /// Must be called from within a Tokio runtime. The worker exits once the
    /// client is dropped and the queue has drained.
    pub fn new(
        base_url: &str,
        transport: Arc<dyn HttpTransport>,
        cooldown: Duration,
        request_timeout: Duration,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_write_queue(Arc::clone(&transport), queue_rx, cooldown));
        Self {
            base_url: base_url.trim().to_string(),
            transport,
            request_timeout,
            queue_tx,
        }
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    fn query_url(&self, query: &str) -> String {
        let sep = if self.base_url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.base_url, sep, query)
    }

    async fn get(&self, query: &str, what: &str) -> Result<Value, SyncError> {
        let request = HttpRequest::get(self.query_url(query)).with_timeout(self.request_timeout);
        let body = self.transport.send(request).await?;
        check_envelope(body, what)
    }

    /// Connectivity test.
    pub async fn ping(&self) -> Result<PingResponse, SyncError> {
        let body = self.get("action=ping", "ping").await?;
        serde_json::from_value(body).map_err(|e| SyncError::Remote(format!("bad ping response: {e}")))
    }

    /// Create or verify the four sheets with their fixed column layout.
    pub async fn init(&self) -> Result<InitResponse, SyncError> {
        let body = self.get("action=init", "init").await?;
        serde_json::from_value(body).map_err(|e| SyncError::Remote(format!("bad init response: {e}")))
    }

    /// Every row of `table`, renamed to local fields, blank rows dropped.
    pub async fn read_all(&self, table: Table) -> Result<Vec<Record>, SyncError> {
        let mut body = self.get(&format!("action=read&sheet={table}"), "read").await?;
        let data = body.get_mut("data").map(Value::take).unwrap_or(Value::Null);
        let rows: Vec<Record> = serde_json::from_value(data)
            .map_err(|e| SyncError::Remote(format!("unexpected rows for {table}: {e}")))?;
        Ok(retain_records(rows.iter().map(from_remote).collect()))
    }

    /// Put a write on the queue. Its position is fixed before this returns.
    fn enqueue(&self, payload: Value) -> PendingWrite {
        let action = payload["action"].as_str().unwrap_or("write").to_string();
        let url = self.query_url(&format!(
            "payload={}",
            urlencoding::encode(&payload.to_string())
        ));
        let request = HttpRequest::get(url).with_timeout(self.request_timeout);

        let (reply, rx) = oneshot::channel();
        let queued = self.queue_tx.send(QueuedWrite { request, reply });

        Box::pin(async move {
            if queued.is_err() {
                return Err(SyncError::Transport("write queue is closed".to_string()));
            }
            let body = rx
                .await
                .map_err(|_| SyncError::Transport("write queue dropped the request".to_string()))??;
            check_envelope(body, &action)
        })
    }

    pub fn create(&self, table: Table, record: &Record) -> PendingWrite {
        self.enqueue(json!({
            "action": "create",
            "sheet": table.as_str(),
            "data": to_remote(record),
        }))
    }

    pub fn update(&self, table: Table, id: &str, changes: &Record) -> PendingWrite {
        self.enqueue(json!({
            "action": "update",
            "sheet": table.as_str(),
            "id": id,
            "data": to_remote(changes),
        }))
    }

    pub fn delete(&self, table: Table, id: &str) -> PendingWrite {
        self.enqueue(json!({
            "action": "delete",
            "sheet": table.as_str(),
            "id": id,
        }))
    }

    /// Append many rows in one request. Resolves to the number written.
    pub fn bulk_create(
        &self,
        table: Table,
        records: &[Record],
    ) -> impl Future<Output = Result<usize, SyncError>> + Send + 'static {
        let pending = self.enqueue(json!({
            "action": "bulkCreate",
            "sheet": table.as_str(),
            "data": records.iter().map(to_remote).collect::<Vec<_>>(),
        }));
        async move { pending.await.map(|body| written_count(&body)) }
    }

    /// Replace the whole sheet. Resolves to the number of rows written.
    pub fn clear_and_import(
        &self,
        table: Table,
        records: &[Record],
    ) -> impl Future<Output = Result<usize, SyncError>> + Send + 'static {
        let pending = self.enqueue(json!({
            "action": "clearAndImport",
            "sheet": table.as_str(),
            "data": records.iter().map(to_remote).collect::<Vec<_>>(),
        }));
        async move { pending.await.map(|body| written_count(&body)) }
    }
}

fn written_count(body: &Value) -> usize {
    body.get("count").and_then(Value::as_u64).unwrap_or(0) as usize
}

/// Unwrap the `{success, ...}` envelope.
fn check_envelope(body: Value, action: &str) -> Result<Value, SyncError> {
    if body.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }
    match body.get("error").and_then(Value::as_str) {
        Some(message) => Err(SyncError::from_remote_message(message)),
        None => Err(SyncError::Remote(format!("{action} failed"))),
    }
}

async fn run_write_queue(
    transport: Arc<dyn HttpTransport>,
    mut queue_rx: mpsc::UnboundedReceiver<QueuedWrite>,
    cooldown: Duration,
) {
    let mut last_done: Option<Instant> = None;

    while let Some(write) = queue_rx.recv().await {
        if let Some(done) = last_done {
            tokio::time::sleep_until(done + cooldown).await;
        }

        let result = transport.send(write.request).await;
        last_done = Some(Instant::now());

        if write.reply.send(result).is_err() {
            tracing::debug!("Sheets write finished after its caller went away");
        }
    }

    tracing::debug!("Sheets write queue closed");
}

#[async_trait]
impl RemoteStore for SheetsClient {
    fn mode(&self) -> StorageMode {
        StorageMode::Sheets
    }

    async fn check_available(&self) -> Result<(), SyncError> {
        self.ping().await.map(|_| ())
    }

    async fn fetch_all(&self, table: Table) -> Result<Vec<Record>, SyncError> {
        self.read_all(table).await
    }

    fn submit(&self, op: WriteOp) -> PendingWrite {
        match op {
            WriteOp::Create { table, record } => self.create(table, &record),
            WriteOp::Update { table, id, changes } => self.update(table, &id, &changes),
            WriteOp::Delete { table, id } => self.delete(table, &id),
        }
    }

    fn as_sheets(&self) -> Option<&SheetsClient> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    const URL: &str = "https://script.google.com/macros/s/test/exec";

    fn client(transport: Arc<MockTransport>) -> SheetsClient {
        SheetsClient::new(
            URL,
            transport,
            Duration::from_millis(300),
            Duration::from_secs(30),
        )
    }

    fn rec(value: Value) -> Record {
        value.as_object().unwrap().clone()
    }

    /// Decode the `payload` parameter of a write request.
    fn payload_of(request: &HttpRequest) -> Value {
        let (_, encoded) = request.url.split_once("payload=").unwrap();
        serde_json::from_str(&urlencoding::decode(encoded).unwrap()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_are_fifo_with_cooldown() {
        let transport = Arc::new(
            MockTransport::new(|_| Ok(json!({"success": true}))).with_delay(Duration::from_millis(50)),
        );
        let sheets = client(Arc::clone(&transport));

        let w1 = sheets.create(Table::Medicines, &rec(json!({"id": "w1"})));
        let w2 = sheets.update(Table::Medicines, "w1", &rec(json!({"notes": "w2"})));
        let w3 = sheets.delete(Table::Medicines, "w3");

        // Await in reverse to show completion order does not depend on it
        assert!(w3.await.is_ok());
        assert!(w2.await.is_ok());
        assert!(w1.await.is_ok());

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        let actions: Vec<Value> = calls.iter().map(|c| payload_of(&c.request)["action"].clone()).collect();
        assert_eq!(actions, vec![json!("create"), json!("update"), json!("delete")]);

        for pair in calls.windows(2) {
            assert!(pair[1].started - pair[0].started >= Duration::from_millis(300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_does_not_cancel_queue() {
        let transport = Arc::new(MockTransport::new(|req| {
            let payload = payload_of(req);
            match payload["action"].as_str() {
                Some("update") => Ok(json!({"success": false, "error": "Record not found: gone"})),
                Some("delete") => Err(SyncError::Http { status: 500 }),
                _ => Ok(json!({"success": true, "data": payload["data"]})),
            }
        }));
        let sheets = client(Arc::clone(&transport));

        let first = sheets.update(Table::Shifts, "gone", &rec(json!({"notes": "x"})));
        let second = sheets.delete(Table::Shifts, "s1");
        let third = sheets.create(Table::Shifts, &rec(json!({"id": "s2"})));

        assert_eq!(first.await.unwrap_err(), SyncError::NotFound("gone".to_string()));
        assert_eq!(second.await.unwrap_err().to_string(), "API Error: 500");
        let created = third.await.unwrap();
        assert_eq!(created["data"]["id"], json!("s2"));
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_write_payload_uses_remote_field_names() {
        let transport = Arc::new(MockTransport::new(|_| Ok(json!({"success": true}))));
        let sheets = client(Arc::clone(&transport));

        sheets
            .update(
                Table::Shifts,
                "s 1",
                &rec(json!({"staff_name": "佐藤 花子", "start_time": "09:00"})),
            )
            .await
            .unwrap();

        let request = &transport.requests()[0];
        assert_eq!(request.method, reqwest::Method::GET);
        assert!(request.url.starts_with(&format!("{URL}?payload=")));
        assert_eq!(
            payload_of(request),
            json!({
                "action": "update",
                "sheet": "shifts",
                "id": "s 1",
                "data": {"employeeName": "佐藤 花子", "startTime": "09:00"}
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_and_import_returns_count() {
        let transport = Arc::new(MockTransport::new(|req| {
            let count = payload_of(req)["data"].as_array().map(Vec::len).unwrap_or(0);
            Ok(json!({"success": true, "count": count, "message": "Import completed"}))
        }));
        let sheets = client(Arc::clone(&transport));

        let records = vec![rec(json!({"id": "a"})), rec(json!({"id": "b"}))];
        assert_eq!(sheets.clear_and_import(Table::Employees, &records).await.unwrap(), 2);
        assert_eq!(sheets.bulk_create(Table::Employees, &[]).await.unwrap(), 0);

        let actions: Vec<Value> = transport
            .requests()
            .iter()
            .map(|r| payload_of(r)["action"].clone())
            .collect();
        assert_eq!(actions, vec![json!("clearAndImport"), json!("bulkCreate")]);
    }

    #[tokio::test]
    async fn test_read_maps_rows_and_drops_blanks() {
        let transport = Arc::new(MockTransport::new(|req| {
            assert_eq!(req.url, format!("{URL}?action=read&sheet=shifts"));
            Ok(json!({
                "success": true,
                "data": [
                    {"id": "s1", "employeeName": "山田 太郎", "startTime": "1899-12-30T08:30:00.000Z", "endTime": "17:00"},
                    {"id": "", "employeeName": "", "startTime": ""}
                ]
            }))
        }));
        let sheets = client(transport);

        let rows = sheets.read_all(Table::Shifts).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["staff_name"], json!("山田 太郎"));
        assert_eq!(rows[0]["start_time"], json!("08:30"));
        assert_eq!(rows[0]["end_time"], json!("17:00"));
    }

    #[tokio::test]
    async fn test_remote_error_message_surfaces() {
        let transport = Arc::new(MockTransport::new(|_| {
            Ok(json!({"success": false, "error": "Sheet not found: medicines"}))
        }));
        let sheets = client(transport);

        let err = sheets.read_all(Table::Medicines).await.unwrap_err();
        assert_eq!(err, SyncError::Remote("Sheet not found: medicines".to_string()));
        assert!(sheets.check_available().await.is_err());
    }

    #[tokio::test]
    async fn test_ping_and_init() {
        let transport = Arc::new(MockTransport::new(|req| {
            if req.url.ends_with("action=ping") {
                Ok(json!({"success": true, "message": "pong", "timestamp": "2026-01-01T00:00:00.000Z"}))
            } else {
                Ok(json!({"success": true, "message": "ok", "created": ["medicines", "shifts"]}))
            }
        }));
        let sheets = client(transport);

        let ping = sheets.ping().await.unwrap();
        assert!(ping.success);
        assert_eq!(ping.message, "pong");
        let init = sheets.init().await.unwrap();
        assert_eq!(init.created, vec!["medicines", "shifts"]);
    }

    #[test]
    fn test_validate_script_url() {
        assert!(validate_script_url(URL).is_ok());
        assert!(matches!(validate_script_url("  "), Err(SyncError::Configuration(_))));
        assert!(matches!(
            validate_script_url("https://example.com/exec"),
            Err(SyncError::Configuration(_))
        ));
    }
}
