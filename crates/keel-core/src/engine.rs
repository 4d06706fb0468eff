//! Sync engine for Keel
//!
//! The engine decides, for every read and write, whether to hit the
//! network or the local store, and reconciles divergence when
//! connectivity returns. Two rules shape every entry point: a write
//! always succeeds locally before the remote is attempted, and no
//! failure from either side escapes to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::Result;
use crate::filter::Filter;
use crate::record::Record;
use crate::remote::RemoteClient;
use crate::store::LocalStore;

/// Outcome of one full reconciliation sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Pending records pushed to the remote store
    pub pushed: usize,
    /// Records fetched in authoritative snapshots
    pub fetched: usize,
    /// Tables whose sync failed and was skipped
    pub failed_tables: Vec<String>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failed_tables.is_empty()
    }
}

/// Releases the one-sweep-at-a-time flag when the sweep scope ends,
/// including on error paths.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Offline-first orchestration over a local store and a remote client.
///
/// Construct one per process and share it via `Arc`; the sweep guard and
/// the connectivity flag are process-wide state.
pub struct SyncEngine {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteClient>,
    connectivity: ConnectivityMonitor,
    tables: Vec<String>,
    current_user: RwLock<Option<String>>,
    sweep_active: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteClient>,
        connectivity: ConnectivityMonitor,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            remote,
            connectivity,
            tables: config.tables,
            current_user: RwLock::new(None),
            sweep_active: AtomicBool::new(false),
        }
    }

    /// Tables visited by a full sweep, in order.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Last known reachability, as tracked by the connectivity monitor.
    pub fn connection_status(&self) -> bool {
        self.connectivity.status()
    }

    /// The monitor this engine reads; embedders use it to initialize
    /// probing and to feed platform reachability callbacks.
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Set the identity that full sweeps reconcile for.
    pub async fn set_current_user(&self, user_id: Option<String>) {
        *self.current_user.write().await = user_id;
    }

    pub async fn current_user(&self) -> Option<String> {
        self.current_user.read().await.clone()
    }

    /// Read a table's rows, preferring the remote store.
    ///
    /// Online, a successful remote query refreshes the local snapshot
    /// and is returned. On remote failure or offline the local slice is
    /// returned instead, with the same filter applied client-side so
    /// both paths yield the same subset. Never fails the caller.
    pub async fn fetch_with_fallback(
        &self,
        table: &str,
        user_id: &str,
        filter: Option<&Filter>,
    ) -> Vec<Record> {
        if self.connection_status() {
            match self.remote.select(table, user_id, filter).await {
                Ok(rows) => {
                    let rows: Vec<Record> = rows
                        .into_iter()
                        .map(|mut row| {
                            row.synced = true;
                            row
                        })
                        .collect();
                    self.refresh_snapshot(table, user_id, &rows, filter).await;
                    return rows;
                }
                Err(e) => {
                    warn!("Remote fetch for {table} failed, serving local data: {e}");
                }
            }
        }

        let mut records = self.load_or_empty(table, user_id).await;
        if let Some(filter) = filter {
            records.retain(|record| filter.matches(record));
        }
        records
    }

    /// Insert a record, guaranteed to succeed locally.
    ///
    /// The record is persisted under a temporary id before any network
    /// activity. Online, a successful remote insert replaces it with the
    /// remote-assigned row; otherwise the temporary record stays pending
    /// for the next sweep. The returned record is usable either way.
    pub async fn insert_with_fallback(
        &self,
        table: &str,
        user_id: &str,
        fields: Map<String, Value>,
    ) -> Record {
        let record = Record::with_temp_id(user_id, fields);
        if let Err(e) = self.store.append(table, user_id, &record).await {
            warn!("Local insert into {table} failed: {e}");
        }

        if self.connection_status() {
            match self.remote.insert(table, user_id, &record.fields).await {
                Ok(mut row) => {
                    row.synced = true;
                    if let Err(e) = self.store.remove(table, user_id, &record.id).await {
                        warn!("Failed to drop temporary record {}: {e}", record.id);
                    }
                    if let Err(e) = self.store.append(table, user_id, &row).await {
                        warn!("Failed to persist remote row {}: {e}", row.id);
                    }
                    return row;
                }
                Err(e) => {
                    warn!("Remote insert into {table} failed, keeping {}: {e}", record.id);
                }
            }
        }

        record
    }

    /// Merge field changes into a record.
    ///
    /// The local merge marks the record pending; a successful remote
    /// update acknowledges it again, and a failed one leaves it for the
    /// sweep to retry via upsert. An id with no local record is a local
    /// no-op, but the remote attempt still proceeds.
    pub async fn update_with_fallback(
        &self,
        table: &str,
        user_id: &str,
        id: &str,
        changes: &Map<String, Value>,
    ) {
        let mut updated = None;
        match self.store.load(table, user_id).await {
            Ok(records) => {
                if let Some(mut record) = records.into_iter().find(|r| r.id == id) {
                    record.merge_fields(changes);
                    record.synced = false;
                    if let Err(e) = self.store.append(table, user_id, &record).await {
                        warn!("Local update of {id} in {table} failed: {e}");
                    }
                    updated = Some(record);
                } else {
                    debug!("Update target {id} not found locally in {table}");
                }
            }
            Err(e) => warn!("Local load of {table} failed during update: {e}"),
        }

        if self.connection_status() {
            match self.remote.update(table, id, changes).await {
                Ok(()) => {
                    if let Some(mut record) = updated {
                        record.synced = true;
                        if let Err(e) = self.store.append(table, user_id, &record).await {
                            warn!("Failed to acknowledge update of {id}: {e}");
                        }
                    }
                }
                Err(e) => warn!("Remote update of {id} in {table} failed: {e}"),
            }
        }
    }

    /// Delete a record, locally first and unconditionally.
    ///
    /// The remote delete is best effort; if it never lands, a later
    /// sweep's snapshot may resurrect the row.
    pub async fn delete_with_fallback(&self, table: &str, user_id: &str, id: &str) {
        if let Err(e) = self.store.remove(table, user_id, id).await {
            warn!("Local delete of {id} in {table} failed: {e}");
        }

        if self.connection_status() {
            if let Err(e) = self.remote.delete(table, id).await {
                warn!("Remote delete of {id} in {table} failed: {e}");
            }
        }
    }

    /// Run a full reconciliation sweep over the registered tables.
    ///
    /// Flushes pending local mutations to the remote store, then pulls
    /// each table's authoritative snapshot. At most one sweep runs per
    /// process; a second request while one is active returns `None`, as
    /// does a request while offline or with no current user. Table
    /// failures are logged and skipped, not fatal to the sweep.
    pub async fn sync_all_data(&self) -> Option<SyncReport> {
        if !self.connection_status() {
            debug!("Skipping sweep: offline");
            return None;
        }
        if self
            .sweep_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Skipping sweep: another sweep is running");
            return None;
        }
        let _guard = SweepGuard(&self.sweep_active);
        let Some(user_id) = self.current_user().await else {
            debug!("Skipping sweep: no current user");
            return None;
        };

        info!("Starting reconciliation sweep for {} tables", self.tables.len());
        let mut report = SyncReport::default();
        for table in &self.tables {
            match self.sync_table(table, &user_id).await {
                Ok((pushed, fetched)) => {
                    report.pushed += pushed;
                    report.fetched += fetched;
                }
                Err(e) => {
                    error!("Sync of table {table} failed: {e}");
                    report.failed_tables.push(table.clone());
                }
            }
        }
        info!(
            "Sweep finished: pushed {}, fetched {}, {} table(s) failed",
            report.pushed,
            report.fetched,
            report.failed_tables.len()
        );
        Some(report)
    }

    /// Watch the connectivity monitor and run one sweep per
    /// offline-to-online transition.
    pub fn spawn_reconnect_sync(engine: Arc<Self>) -> JoinHandle<()> {
        let mut rx = engine.connectivity.subscribe();
        tokio::spawn(async move {
            let mut was_online = *rx.borrow();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online && !was_online {
                    info!("Connectivity restored; starting reconciliation sweep");
                    engine.sync_all_data().await;
                }
                was_online = online;
            }
        })
    }

    /// Reconcile one table: push `synced=false` records, then pull the
    /// authoritative snapshot.
    async fn sync_table(&self, table: &str, user_id: &str) -> Result<(usize, usize)> {
        let local = self.store.load(table, user_id).await?;
        let pending: Vec<Record> = local.into_iter().filter(|r| !r.synced).collect();

        let mut pushed = 0;
        for record in pending {
            if record.is_temp() {
                // Offline insert: the backend assigns the real id.
                let mut row = self.remote.insert(table, user_id, &record.fields).await?;
                row.synced = true;
                self.store.remove(table, user_id, &record.id).await?;
                self.store.append(table, user_id, &row).await?;
            } else {
                let mut record = record;
                self.remote.upsert(table, &record).await?;
                record.synced = true;
                self.store.append(table, user_id, &record).await?;
            }
            pushed += 1;
        }

        // Remote is authoritative once local pending writes are flushed.
        let snapshot: Vec<Record> = self
            .remote
            .select(table, user_id, None)
            .await?
            .into_iter()
            .map(|mut row| {
                row.synced = true;
                row
            })
            .collect();
        self.store.save(table, user_id, &snapshot).await?;

        debug!("Synced table {table}: pushed {pushed}, fetched {}", snapshot.len());
        Ok((pushed, snapshot.len()))
    }

    /// Persist a freshly fetched remote result without dropping pending
    /// local mutations.
    ///
    /// An unfiltered result replaces the slice, with pending records
    /// re-applied over it by id. A filtered result is only a subset, so
    /// its rows are merged in individually instead, skipping ids whose
    /// local version is still pending.
    async fn refresh_snapshot(
        &self,
        table: &str,
        user_id: &str,
        rows: &[Record],
        filter: Option<&Filter>,
    ) {
        let local = self.load_or_empty(table, user_id).await;

        if filter.is_none_or(Filter::is_empty) {
            let mut merged: Vec<Record> = rows.to_vec();
            for record in local.into_iter().filter(|r| !r.synced) {
                if let Some(slot) = merged.iter_mut().find(|r| r.id == record.id) {
                    *slot = record;
                } else {
                    merged.push(record);
                }
            }
            if let Err(e) = self.store.save(table, user_id, &merged).await {
                warn!("Failed to persist snapshot of {table}: {e}");
            }
            return;
        }

        for row in rows {
            let pending_locally = local.iter().any(|r| r.id == row.id && !r.synced);
            if pending_locally {
                continue;
            }
            if let Err(e) = self.store.append(table, user_id, row).await {
                warn!("Failed to merge fetched row {} into {table}: {e}", row.id);
            }
        }
    }

    async fn load_or_empty(&self, table: &str, user_id: &str) -> Vec<Record> {
        match self.store.load(table, user_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!("Local load of {table} failed, treating as empty: {e}");
                Vec::new()
            }
        }
    }
}
