//! The portal's data store: cache, durable mirror, active backend, and the
//! background poll, behind one cloneable handle.
//!
//! Reads are served from the cache. Mutations commit locally first and
//! return; propagation to the active backend happens in a spawned task whose
//! failure is logged and never rolls back the local change.
//!
//! ```text
//! create/update/delete ─→ Cache + Mirror ─→ return
//!                                  └─ spawn ─→ RemoteStore::submit
//! poll tick ─→ fetch_all ─→ changed? ─→ Cache::replace ─→ DataSync
//! ```

mod sync;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::cache::Cache;
use crate::config::Config;
use crate::error::SyncError;
use crate::mirror::Mirror;
use crate::mode::{ModeController, StorageMode};
use crate::model::{decode, Record, Table};
use crate::storage::sheets::{validate_script_url, InitResponse};
use crate::storage::{RemoteStore, ServerClient, SheetsClient, WriteOp};
use crate::transport::{HttpTransport, ReqwestTransport};

use sync::Poller;

pub use sync::{LoadReport, LoadSource};

const EVENT_CAPACITY: usize = 64;

/// Notifications for consumers of the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    /// Startup load finished.
    Ready { mode: StorageMode },
    /// A poll replaced `table` with different remote contents.
    DataSync { table: Table },
    /// The active backend changed.
    ModeChanged { mode: StorageMode },
}

/// Outcome of exporting one table to the spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub table: Table,
    /// Rows written, or why the table failed.
    pub result: Result<usize, SyncError>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    config: Config,
    transport: Arc<dyn HttpTransport>,
    cache: Cache,
    modes: ModeController,
    remote: RwLock<Option<Arc<dyn RemoteStore>>>,
    /// One server client per session so its probe result sticks.
    server: Mutex<Option<Arc<ServerClient>>>,
    events: broadcast::Sender<StorageEvent>,
    poller: Mutex<Option<Poller>>,
    propagation: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn remote(&self) -> Option<Arc<dyn RemoteStore>> {
        self.remote
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_remote(&self, remote: Option<Arc<dyn RemoteStore>>) {
        *self.remote.write().unwrap_or_else(PoisonError::into_inner) = remote;
    }

    fn emit(&self, event: StorageEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn server_client(&self) -> Result<Arc<ServerClient>, SyncError> {
        let base_url = self
            .config
            .server
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| SyncError::Configuration("no server URL configured".to_string()))?;

        let mut server = lock(&self.server);
        let client = server.get_or_insert_with(|| {
            Arc::new(ServerClient::new(
                base_url,
                Arc::clone(&self.transport),
                self.config.server.probe_timeout(),
                self.config.server.request_timeout(),
            ))
        });
        Ok(Arc::clone(client))
    }

    fn sheets_client(&self, gas_url: &str) -> SheetsClient {
        SheetsClient::new(
            gas_url,
            Arc::clone(&self.transport),
            self.config.sheets.write_cooldown(),
            self.config.sheets.request_timeout(),
        )
    }

    /// Backend for `mode`, verified to answer.
    async fn connect(&self, mode: StorageMode) -> Result<Option<Arc<dyn RemoteStore>>, SyncError> {
        let remote: Arc<dyn RemoteStore> = match mode {
            StorageMode::Local => return Ok(None),
            StorageMode::Server => self.server_client()?,
            StorageMode::Sheets => {
                let connection = self.modes.sheets_connection().ok_or_else(|| {
                    SyncError::Configuration("no spreadsheet connected".to_string())
                })?;
                Arc::new(self.sheets_client(&connection.gas_url))
            }
        };
        remote.check_available().await?;
        Ok(Some(remote))
    }
}

/// Cloneable handle to the portal's data.
#[derive(Clone)]
pub struct DataStore {
    inner: Arc<Inner>,
}

impl DataStore {
    /// Build a store over `data_dir`. Nothing touches the network until
    /// [`DataStore::start`].
    pub fn new(
        config: Config,
        data_dir: PathBuf,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, SyncError> {
        let mirror = Mirror::open(&data_dir).map_err(|e| SyncError::Mirror(format!("{e:#}")))?;
        let modes = ModeController::load(&data_dir, config.storage.preferred_mode);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                cache: Cache::new(mirror),
                modes,
                remote: RwLock::new(None),
                server: Mutex::new(None),
                events,
                poller: Mutex::new(None),
                propagation: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Store using the configured data directory and a real HTTP client.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let data_dir = config.data_dir()?;
        let transport = Arc::new(ReqwestTransport::new()?);
        Ok(Self::new(config, data_dir, transport)?)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.inner.events.subscribe()
    }

    /// Pick the startup backend, load every table, start polling, and emit
    /// [`StorageEvent::Ready`].
    ///
    /// An unreachable backend never fails startup: the session runs on the
    /// mirror instead and the saved preference is left for next time.
    pub async fn start(&self) -> LoadReport {
        let inner = &self.inner;
        let (mode, remote) = self.resolve_startup_backend().await;
        inner.modes.set_active(mode);
        inner.set_remote(remote.clone());

        let report = inner.load_all(mode, remote.as_deref()).await;
        self.start_polling();
        tracing::info!("Storage ready: {}", inner.modes.mode_name());
        inner.emit(StorageEvent::Ready { mode });
        report
    }

    async fn resolve_startup_backend(&self) -> (StorageMode, Option<Arc<dyn RemoteStore>>) {
        let inner = &self.inner;
        match inner.modes.preferred() {
            StorageMode::Local => (StorageMode::Local, None),
            StorageMode::Sheets => match inner.modes.sheets_connection() {
                // Reads that fail fall back to the mirror table by table
                Some(connection) => {
                    let sheets: Arc<dyn RemoteStore> = Arc::new(inner.sheets_client(&connection.gas_url));
                    (StorageMode::Sheets, Some(sheets))
                }
                None => {
                    tracing::warn!("Spreadsheet mode saved without a connection; using local data");
                    (StorageMode::Local, None)
                }
            },
            StorageMode::Server => {
                let server = match inner.server_client() {
                    Ok(server) => server,
                    Err(e) => {
                        tracing::info!("{}; running on local data", e);
                        return (StorageMode::Local, None);
                    }
                };
                if server.is_available().await {
                    let server: Arc<dyn RemoteStore> = server;
                    (StorageMode::Server, Some(server))
                } else {
                    tracing::info!("Server unavailable; running on local data this session");
                    (StorageMode::Local, None)
                }
            }
        }
    }

    pub fn mode(&self) -> StorageMode {
        self.inner.modes.current()
    }

    pub fn mode_name(&self) -> &'static str {
        self.inner.modes.mode_name()
    }

    /// Mode saved for the next session.
    pub fn preferred_mode(&self) -> StorageMode {
        self.inner.modes.preferred()
    }

    /// URL of the saved spreadsheet connection, if any.
    pub fn sheets_url(&self) -> Option<String> {
        self.inner.modes.sheets_connection().map(|c| c.gas_url)
    }

    pub fn get_all(&self, table: Table) -> Vec<Record> {
        self.inner.cache.get_all(table)
    }

    pub fn get_by_id(&self, table: Table, id: &str) -> Option<Record> {
        self.inner.cache.get_by_id(table, id)
    }

    /// Every record of `table` as a typed view. Rows that do not fit are
    /// skipped.
    pub fn get_all_as<T: DeserializeOwned>(&self, table: Table) -> Vec<T> {
        self.get_all(table)
            .iter()
            .filter_map(|record| match decode(record) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!("Skipping malformed {} record: {}", table, e);
                    None
                }
            })
            .collect()
    }

    /// Add a record. It is visible to reads before this returns.
    pub fn create(&self, table: Table, record: Record) -> Record {
        let created = self.inner.cache.create(table, record);
        self.propagate(WriteOp::Create {
            table,
            record: created.clone(),
        });
        created
    }

    /// Merge `changes` into record `id`. `None` if there is no such record.
    pub fn update(&self, table: Table, id: &str, mut changes: Record) -> Option<Record> {
        let updated = self.inner.cache.update(table, id, &changes)?;
        changes.remove("id");
        if let Some(stamp) = updated.get("updated_at") {
            changes.insert("updated_at".to_string(), stamp.clone());
        }
        self.propagate(WriteOp::Update {
            table,
            id: id.to_string(),
            changes,
        });
        Some(updated)
    }

    /// Remove record `id`. Returns whether it existed locally.
    pub fn delete(&self, table: Table, id: &str) -> bool {
        if !self.inner.cache.delete(table, id) {
            return false;
        }
        self.propagate(WriteOp::Delete {
            table,
            id: id.to_string(),
        });
        true
    }

    fn propagate(&self, op: WriteOp) {
        let Some(remote) = self.inner.remote() else {
            return;
        };
        let (action, table, mode) = (op.action(), op.table(), remote.mode());
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("No async runtime; {} on {} not sent to {}", action, table, mode);
            return;
        };

        let pending = remote.submit(op);
        let handle = runtime.spawn(async move {
            match pending.await {
                Ok(_) => tracing::debug!("Remote {} on {} done", action, table),
                Err(e) => tracing::warn!("Remote {} on {} failed ({}): {}", action, table, mode, e),
            }
        });

        let mut tasks = lock(&self.inner.propagation);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Wait for every remote write issued so far.
    pub async fn flush(&self) {
        loop {
            let pending = std::mem::take(&mut *lock(&self.inner.propagation));
            if pending.is_empty() {
                break;
            }
            for task in pending {
                if let Err(e) = task.await {
                    tracing::error!("Remote write task failed: {}", e);
                }
            }
        }
    }

    /// Stop polling and wait for outstanding writes.
    pub async fn shutdown(&self) {
        self.stop_polling();
        self.flush().await;
    }

    /// Make `mode` the active backend and remember it.
    ///
    /// The new backend is checked first; if it does not answer, the previous
    /// backend stays active and the error is returned.
    pub async fn switch_mode(&self, mode: StorageMode) -> Result<LoadReport, SyncError> {
        self.stop_polling();
        match self.inner.connect(mode).await {
            Ok(remote) => Ok(self.activate(mode, remote).await),
            Err(e) => {
                tracing::warn!("Could not switch to {}: {}", mode, e);
                self.start_polling();
                Err(e)
            }
        }
    }

    async fn activate(&self, mode: StorageMode, remote: Option<Arc<dyn RemoteStore>>) -> LoadReport {
        let inner = &self.inner;
        inner.set_remote(remote.clone());
        if let Err(e) = inner.modes.switch_to(mode) {
            tracing::warn!("Could not save storage mode: {:#}", e);
        }

        let report = inner.load_all(mode, remote.as_deref()).await;
        self.start_polling();
        tracing::info!("Storage mode changed: {}", inner.modes.mode_name());
        inner.emit(StorageEvent::ModeChanged { mode });
        report
    }

    /// Connect to a spreadsheet script and make it the active backend.
    ///
    /// Local tables whose sheet is still empty are uploaded first so
    /// switching does not hide existing data.
    pub async fn connect_to_sheets(&self, gas_url: &str) -> Result<LoadReport, SyncError> {
        validate_script_url(gas_url)?;
        let gas_url = gas_url.trim();
        let sheets = self.inner.sheets_client(gas_url);
        let ping = sheets.ping().await?;
        tracing::info!("Spreadsheet answered: {}", ping.message);

        if let Err(e) = self.inner.modes.set_sheets_connection(gas_url) {
            tracing::warn!("Could not save spreadsheet connection: {:#}", e);
        }

        for table in Table::ALL {
            let local = self.get_all(table);
            if local.is_empty() {
                continue;
            }
            match sheets.read_all(table).await {
                Ok(rows) if rows.is_empty() => match sheets.bulk_create(table, &local).await {
                    Ok(count) => tracing::info!("Uploaded {} {} to spreadsheet", count, table),
                    Err(e) => tracing::warn!("Upload of {} failed: {}", table, e),
                },
                Ok(_) => {}
                Err(e) => tracing::warn!("Could not read sheet {}: {}", table, e),
            }
        }

        self.stop_polling();
        Ok(self.activate(StorageMode::Sheets, Some(Arc::new(sheets))).await)
    }

    /// Forget the spreadsheet and continue on local data.
    pub async fn disconnect_sheets(&self) -> Result<LoadReport, SyncError> {
        if let Err(e) = self.inner.modes.clear_sheets_connection() {
            tracing::warn!("Could not clear spreadsheet connection: {:#}", e);
        }
        self.switch_mode(StorageMode::Local).await
    }

    /// Active spreadsheet backend, or one for the saved connection.
    fn sheets_remote(&self) -> Result<Arc<dyn RemoteStore>, SyncError> {
        if let Some(remote) = self.inner.remote() {
            if remote.as_sheets().is_some() {
                return Ok(remote);
            }
        }
        match self.inner.modes.sheets_connection() {
            Some(connection) => Ok(Arc::new(self.inner.sheets_client(&connection.gas_url))),
            None => Err(SyncError::Configuration(
                "no spreadsheet connected".to_string(),
            )),
        }
    }

    /// Create the four sheets with their column headers.
    pub async fn init_sheets(&self) -> Result<InitResponse, SyncError> {
        let remote = self.sheets_remote()?;
        let sheets = remote
            .as_sheets()
            .ok_or_else(|| SyncError::Configuration("no spreadsheet connected".to_string()))?;
        sheets.init().await
    }

    /// Replace every sheet with the cached records.
    pub async fn export_to_sheets(&self) -> Result<Vec<ExportOutcome>, SyncError> {
        let remote = self.sheets_remote()?;
        let sheets = remote
            .as_sheets()
            .ok_or_else(|| SyncError::Configuration("no spreadsheet connected".to_string()))?;

        let pending: Vec<_> = Table::ALL
            .into_iter()
            .map(|table| (table, sheets.clear_and_import(table, &self.get_all(table))))
            .collect();

        let mut outcomes = Vec::with_capacity(pending.len());
        for (table, write) in pending {
            let result = write.await;
            if let Err(e) = &result {
                tracing::warn!("Export of {} failed: {}", table, e);
            }
            outcomes.push(ExportOutcome { table, result });
        }
        Ok(outcomes)
    }
}
