//! Loading and background polling.
//!
//! A full load fills every table from the active backend, falling back to
//! the mirror per table. The poller refetches each table on a fixed interval
//! and swaps it in only when its serialized form differs from the cache, so
//! unchanged remote data never produces a notification.

use std::sync::Arc;

use chrono::Local;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::{lock, DataStore, Inner, StorageEvent};
use crate::mode::StorageMode;
use crate::model::{now_iso, Table};
use crate::sample_data::sample_records;
use crate::storage::RemoteStore;

/// Where a table's contents came from during a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Remote,
    Mirror,
    Sample,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub mode: StorageMode,
    /// `(table, source, record count)` in load order.
    pub tables: Vec<(Table, LoadSource, usize)>,
}

impl LoadReport {
    pub fn source(&self, table: Table) -> Option<LoadSource> {
        self.tables
            .iter()
            .find(|(t, _, _)| *t == table)
            .map(|(_, source, _)| *source)
    }
}

/// Running poll loop. Dropping `stop` ends the loop after the current tick.
pub(super) struct Poller {
    task: JoinHandle<()>,
    stop: watch::Sender<()>,
}

impl Poller {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Inner {
    /// Fill every table from `remote`, or from the mirror when there is no
    /// backend or a fetch fails. Empty tables are seeded only when no backend
    /// answered at all.
    pub(super) async fn load_all(
        &self,
        mode: StorageMode,
        remote: Option<&dyn RemoteStore>,
    ) -> LoadReport {
        let mut fetched = Vec::with_capacity(Table::ALL.len());
        for table in Table::ALL {
            let records = match remote {
                Some(remote) => match remote.fetch_all(table).await {
                    Ok(records) => Some(records),
                    Err(e) => {
                        tracing::warn!("Could not load {} from {}: {}; using local copy", table, mode, e);
                        None
                    }
                },
                None => None,
            };
            fetched.push((table, records));
        }

        let reachable = fetched.iter().any(|(_, records)| records.is_some());
        if remote.is_some() && !reachable {
            tracing::warn!("{} did not answer; running on local data", mode);
        }

        let tables = fetched
            .into_iter()
            .map(|(table, records)| match records {
                Some(records) => {
                    let count = records.len();
                    self.cache.replace(table, records);
                    (table, LoadSource::Remote, count)
                }
                None if !reachable && self.should_seed(table) => {
                    let samples = sample_records(table, Local::now().date_naive(), &now_iso());
                    let count = samples.len();
                    self.cache.replace(table, samples);
                    tracing::info!("Seeded {} sample {}", count, table);
                    (table, LoadSource::Sample, count)
                }
                None => {
                    let count = self.cache.reload_from_mirror(table).len();
                    (table, LoadSource::Mirror, count)
                }
            })
            .collect();

        LoadReport { mode, tables }
    }

    fn should_seed(&self, table: Table) -> bool {
        self.config.sync.seed_sample_data && self.cache.mirror_is_empty(table)
    }

    /// One poll tick. Returns the tables that changed.
    pub(super) async fn poll_once(&self, remote: &dyn RemoteStore) -> Vec<Table> {
        let mut changed = Vec::new();
        for table in Table::ALL {
            match remote.fetch_all(table).await {
                Ok(records) => {
                    if self.cache.replace_if_changed(table, records) {
                        tracing::debug!("{} changed remotely", table);
                        self.emit(StorageEvent::DataSync { table });
                        changed.push(table);
                    }
                }
                // Retried on the next tick
                Err(e) => tracing::debug!("Poll of {} failed: {}", table, e),
            }
        }
        changed
    }
}

impl DataStore {
    /// Start the background poll for the active backend.
    ///
    /// Does nothing in local mode or when a poll is already running.
    pub fn start_polling(&self) {
        if self.inner.remote().is_none() {
            return;
        }
        let mut poller = lock(&self.inner.poller);
        if poller.as_ref().is_some_and(Poller::is_running) {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("No async runtime; background sync disabled");
            return;
        };

        let period = self.inner.config.sync.poll_interval();
        let weak = Arc::downgrade(&self.inner);
        let (stop, mut stopped) = watch::channel(());
        let task = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    // Sender dropped: stop requested
                    _ = stopped.changed() => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                // Re-read every tick so a mode switch takes effect
                let Some(remote) = inner.remote() else {
                    break;
                };
                // Runs to completion even if a stop arrives meanwhile
                inner.poll_once(remote.as_ref()).await;
            }
        });
        *poller = Some(Poller { task, stop });
        tracing::info!("Auto sync started ({}s interval)", period.as_secs());
    }

    /// Stop the background poll. A tick already fetching finishes first.
    pub fn stop_polling(&self) {
        if let Some(Poller { task, stop }) = lock(&self.inner.poller).take() {
            drop(stop);
            drop(task);
            tracing::debug!("Auto sync stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.inner.poller)
            .as_ref()
            .is_some_and(Poller::is_running)
    }

    /// Run one poll tick now, outside the timer.
    pub async fn poll_now(&self) -> Vec<Table> {
        match self.inner.remote() {
            Some(remote) => self.inner.poll_once(remote.as_ref()).await,
            None => Vec::new(),
        }
    }
}
