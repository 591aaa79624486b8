// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! In-memory catalog the transaction manager operates on: databases, tables,
//! partitions with version counters, tablets, replicas, and the tablet
//! inverted index. Only what commit/publish needs; everything else about a
//! table lives elsewhere.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::common::ids::{
    BackendId, DbId, PartitionId, ReplicaId, TabletId, TableId, TxnId, Version,
};
use crate::common::status::{EngineError, Result};

pub const PARTITION_INIT_VERSION: Version = 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReplicaState {
    Normal,
    Clone,
    Alter,
    Decommission,
}

/// One copy of a tablet on one backend. Version bookkeeping follows the
/// publish protocol: `last_failed_version < 0` means healthy.
pub struct Replica {
    id: ReplicaId,
    backend_id: BackendId,
    version: AtomicI64,
    last_failed_version: AtomicI64,
    last_success_version: AtomicI64,
    state: Mutex<ReplicaState>,
}

impl Replica {
    pub fn new(id: ReplicaId, backend_id: BackendId, version: Version) -> Arc<Self> {
        Arc::new(Self {
            id,
            backend_id,
            version: AtomicI64::new(version),
            last_failed_version: AtomicI64::new(-1),
            last_success_version: AtomicI64::new(version),
            state: Mutex::new(ReplicaState::Normal),
        })
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn backend_id(&self) -> BackendId {
        self.backend_id
    }

    pub fn version(&self) -> Version {
        self.version.load(Ordering::Acquire)
    }

    pub fn last_failed_version(&self) -> Version {
        self.last_failed_version.load(Ordering::Acquire)
    }

    pub fn last_success_version(&self) -> Version {
        self.last_success_version.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ReplicaState {
        *self.state.lock().expect("replica state lock")
    }

    pub fn set_state(&self, state: ReplicaState) {
        *self.state.lock().expect("replica state lock") = state;
    }

    /// The replica holds every version up to `version`.
    pub fn check_version_catch_up(&self, version: Version) -> bool {
        self.version() >= version
    }

    /// Raise the failure watermark; never lowers it.
    pub fn update_last_failed_version(&self, version: Version) {
        self.last_failed_version
            .fetch_max(version, Ordering::AcqRel);
    }

    pub fn update_version_with_failed_info(
        &self,
        new_version: Version,
        last_failed_version: Version,
        last_success_version: Version,
    ) {
        self.version.store(new_version, Ordering::Release);
        self.last_failed_version
            .store(last_failed_version, Ordering::Release);
        self.last_success_version
            .store(last_success_version, Ordering::Release);
    }
}

pub struct Tablet {
    id: TabletId,
    replicas: Mutex<Vec<Arc<Replica>>>,
}

impl Tablet {
    pub fn new(id: TabletId) -> Arc<Self> {
        Arc::new(Self {
            id,
            replicas: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> TabletId {
        self.id
    }

    pub fn add_replica(&self, replica: Arc<Replica>) {
        self.replicas.lock().expect("tablet replicas lock").push(replica);
    }

    pub fn replicas(&self) -> Vec<Arc<Replica>> {
        self.replicas.lock().expect("tablet replicas lock").clone()
    }

    pub fn backend_ids(&self) -> HashSet<BackendId> {
        self.replicas
            .lock()
            .expect("tablet replicas lock")
            .iter()
            .map(|r| r.backend_id())
            .collect()
    }
}

pub struct MaterializedIndex {
    id: i64,
    tablets: Mutex<Vec<Arc<Tablet>>>,
}

impl MaterializedIndex {
    pub fn new(id: i64) -> Arc<Self> {
        Arc::new(Self {
            id,
            tablets: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn add_tablet(&self, tablet: Arc<Tablet>) {
        self.tablets.lock().expect("index tablets lock").push(tablet);
    }

    pub fn tablets(&self) -> Vec<Arc<Tablet>> {
        self.tablets.lock().expect("index tablets lock").clone()
    }
}

/// Versioned horizontal slice of a table. `visible_version` is what queries
/// see; `next_version` is handed to the next commit.
pub struct Partition {
    id: PartitionId,
    range_desc: String,
    visible: Mutex<(Version, i64)>,
    next_version: Mutex<Version>,
    indexes: Mutex<Vec<Arc<MaterializedIndex>>>,
}

impl Partition {
    pub fn new(id: PartitionId, range_desc: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            range_desc: range_desc.into(),
            visible: Mutex::new((PARTITION_INIT_VERSION, 0)),
            next_version: Mutex::new(PARTITION_INIT_VERSION + 1),
            indexes: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn range_desc(&self) -> &str {
        &self.range_desc
    }

    pub fn visible_version(&self) -> Version {
        self.visible.lock().expect("partition visible lock").0
    }

    pub fn visible_version_time(&self) -> i64 {
        self.visible.lock().expect("partition visible lock").1
    }

    pub fn update_visible_version_and_time(&self, version: Version, version_time: i64) {
        let mut visible = self.visible.lock().expect("partition visible lock");
        *visible = (version, version_time);
    }

    pub fn next_version(&self) -> Version {
        *self.next_version.lock().expect("partition next version lock")
    }

    pub fn set_next_version(&self, version: Version) {
        *self.next_version.lock().expect("partition next version lock") = version;
    }

    pub fn committed_version(&self) -> Version {
        self.next_version() - 1
    }

    pub fn add_index(&self, index: Arc<MaterializedIndex>) {
        self.indexes.lock().expect("partition indexes lock").push(index);
    }

    pub fn indexes(&self) -> Vec<Arc<MaterializedIndex>> {
        self.indexes.lock().expect("partition indexes lock").clone()
    }

    /// Materialized indices restricted to `loaded` when the transaction
    /// declared a subset, all of them otherwise.
    pub fn indexes_filtered(&self, loaded: Option<&Vec<i64>>) -> Vec<Arc<MaterializedIndex>> {
        let all = self.indexes();
        match loaded {
            None => all,
            Some(ids) => all
                .into_iter()
                .filter(|index| ids.contains(&index.id()))
                .collect(),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OlapTableState {
    Normal,
    Rollup,
    SchemaChange,
    Restore,
}

pub struct OlapTable {
    id: TableId,
    name: String,
    state: Mutex<OlapTableState>,
    partitions: Mutex<BTreeMap<PartitionId, Arc<Partition>>>,
    load_required_replica_num: i32,
    total_replica_num: i32,
    /// Transactions above this id are guaranteed loaded into alter replicas.
    alter_watershed_txn_id: AtomicI64,
    meta_lock: RwLock<()>,
}

impl OlapTable {
    pub fn new(
        id: TableId,
        name: impl Into<String>,
        load_required_replica_num: i32,
        total_replica_num: i32,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            state: Mutex::new(OlapTableState::Normal),
            partitions: Mutex::new(BTreeMap::new()),
            load_required_replica_num,
            total_replica_num,
            alter_watershed_txn_id: AtomicI64::new(-1),
            meta_lock: RwLock::new(()),
        })
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> OlapTableState {
        *self.state.lock().expect("table state lock")
    }

    pub fn set_state(&self, state: OlapTableState) {
        *self.state.lock().expect("table state lock") = state;
    }

    pub fn add_partition(&self, partition: Arc<Partition>) {
        self.partitions
            .lock()
            .expect("table partitions lock")
            .insert(partition.id(), partition);
    }

    pub fn drop_partition(&self, partition_id: PartitionId) {
        self.partitions
            .lock()
            .expect("table partitions lock")
            .remove(&partition_id);
    }

    pub fn get_partition(&self, partition_id: PartitionId) -> Option<Arc<Partition>> {
        self.partitions
            .lock()
            .expect("table partitions lock")
            .get(&partition_id)
            .cloned()
    }

    pub fn all_partitions(&self) -> Vec<Arc<Partition>> {
        self.partitions
            .lock()
            .expect("table partitions lock")
            .values()
            .cloned()
            .collect()
    }

    pub fn load_required_replica_num(&self, _partition_id: PartitionId) -> i32 {
        self.load_required_replica_num
    }

    pub fn total_replica_num(&self) -> i32 {
        self.total_replica_num
    }

    pub fn set_alter_watershed_txn_id(&self, txn_id: TxnId) {
        self.alter_watershed_txn_id.store(txn_id, Ordering::Release);
    }

    pub fn alter_watershed_txn_id(&self) -> Option<TxnId> {
        let id = self.alter_watershed_txn_id.load(Ordering::Acquire);
        (id >= 0).then_some(id)
    }

    pub fn meta_lock(&self) -> &RwLock<()> {
        &self.meta_lock
    }
}

pub struct Database {
    id: DbId,
    full_name: String,
    data_quota_bytes: AtomicI64,
    used_data_bytes: AtomicI64,
    transaction_quota: AtomicI64,
    tables: Mutex<BTreeMap<TableId, Arc<OlapTable>>>,
}

impl Database {
    pub fn new(id: DbId, full_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            full_name: full_name.into(),
            data_quota_bytes: AtomicI64::new(i64::MAX),
            used_data_bytes: AtomicI64::new(0),
            transaction_quota: AtomicI64::new(100),
            tables: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn id(&self) -> DbId {
        self.id
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn data_quota_bytes(&self) -> i64 {
        self.data_quota_bytes.load(Ordering::Acquire)
    }

    pub fn set_data_quota_bytes(&self, quota: i64) {
        self.data_quota_bytes.store(quota, Ordering::Release);
    }

    pub fn used_data_bytes(&self) -> i64 {
        self.used_data_bytes.load(Ordering::Acquire)
    }

    pub fn set_used_data_bytes(&self, used: i64) {
        self.used_data_bytes.store(used, Ordering::Release);
    }

    pub fn transaction_quota(&self) -> i64 {
        self.transaction_quota.load(Ordering::Acquire)
    }

    pub fn set_transaction_quota(&self, quota: i64) {
        self.transaction_quota.store(quota, Ordering::Release);
    }

    pub fn add_table(&self, table: Arc<OlapTable>) {
        self.tables
            .lock()
            .expect("db tables lock")
            .insert(table.id(), table);
    }

    pub fn drop_table(&self, table_id: TableId) {
        self.tables.lock().expect("db tables lock").remove(&table_id);
    }

    pub fn get_table(&self, table_id: TableId) -> Option<Arc<OlapTable>> {
        self.tables.lock().expect("db tables lock").get(&table_id).cloned()
    }

    /// Existing tables among `table_ids`, ascending by id; dropped tables are
    /// silently skipped.
    pub fn tables_on_id_order_if_exist(&self, table_ids: &[TableId]) -> Vec<Arc<OlapTable>> {
        let tables = self.tables.lock().expect("db tables lock");
        let mut sorted: Vec<TableId> = table_ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        sorted
            .into_iter()
            .filter_map(|id| tables.get(&id).cloned())
            .collect()
    }
}

#[derive(Copy, Clone, Debug)]
pub struct TabletMetaInfo {
    pub table_id: TableId,
    pub partition_id: PartitionId,
    pub index_id: i64,
}

/// tablet id -> owning (table, partition, index), plus per-backend replica
/// lookup.
#[derive(Default)]
pub struct TabletInvertedIndex {
    tablet_metas: Mutex<HashMap<TabletId, TabletMetaInfo>>,
    replica_metas: Mutex<HashMap<(TabletId, BackendId), Arc<Replica>>>,
}

impl TabletInvertedIndex {
    pub fn add_tablet(&self, tablet_id: TabletId, meta: TabletMetaInfo) {
        self.tablet_metas
            .lock()
            .expect("inverted index lock")
            .insert(tablet_id, meta);
    }

    pub fn get_tablet_meta(&self, tablet_id: TabletId) -> Option<TabletMetaInfo> {
        self.tablet_metas
            .lock()
            .expect("inverted index lock")
            .get(&tablet_id)
            .copied()
    }

    pub fn add_replica(&self, tablet_id: TabletId, replica: Arc<Replica>) {
        self.replica_metas
            .lock()
            .expect("inverted index lock")
            .insert((tablet_id, replica.backend_id()), replica);
    }

    pub fn get_replica(&self, tablet_id: TabletId, backend_id: BackendId) -> Option<Arc<Replica>> {
        self.replica_metas
            .lock()
            .expect("inverted index lock")
            .get(&(tablet_id, backend_id))
            .cloned()
    }
}

/// Root handle the transaction manager is constructed with. Mirrors the
/// catalog surface the publish protocol needs and nothing more.
#[derive(Default)]
pub struct Catalog {
    dbs: Mutex<BTreeMap<DbId, Arc<Database>>>,
    inverted_index: TabletInvertedIndex,
    backend_ids: Mutex<Vec<BackendId>>,
}

impl Catalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_db(&self, db: Arc<Database>) {
        self.dbs.lock().expect("catalog dbs lock").insert(db.id(), db);
    }

    pub fn get_db(&self, db_id: DbId) -> Option<Arc<Database>> {
        self.dbs.lock().expect("catalog dbs lock").get(&db_id).cloned()
    }

    pub fn get_db_or_meta_err(&self, db_id: DbId) -> Result<Arc<Database>> {
        self.get_db(db_id)
            .ok_or_else(|| EngineError::MetaNotFound(format!("database {} does not exist", db_id)))
    }

    pub fn inverted_index(&self) -> &TabletInvertedIndex {
        &self.inverted_index
    }

    pub fn backend_ids(&self) -> Vec<BackendId> {
        self.backend_ids.lock().expect("catalog backends lock").clone()
    }

    pub fn set_backend_ids(&self, ids: Vec<BackendId>) {
        *self.backend_ids.lock().expect("catalog backends lock") = ids;
    }
}

/// Run `f` with the meta write lock of every table held, acquired in the
/// given order. Callers pass tables sorted by id to keep the lock order
/// global.
pub fn with_tables_write_locked<R, F: FnOnce() -> R>(tables: &[Arc<OlapTable>], f: F) -> R {
    match tables.split_first() {
        None => f(),
        Some((first, rest)) => {
            let _guard = first.meta_lock().write().expect("table meta lock");
            with_tables_write_locked(rest, f)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_versions_start_at_init() {
        let partition = Partition::new(1, "");
        assert_eq!(partition.visible_version(), PARTITION_INIT_VERSION);
        assert_eq!(partition.next_version(), PARTITION_INIT_VERSION + 1);
        assert_eq!(partition.committed_version(), PARTITION_INIT_VERSION);
    }

    #[test]
    fn replica_failure_watermark_never_lowers() {
        let replica = Replica::new(1, 100, 5);
        replica.update_last_failed_version(7);
        replica.update_last_failed_version(6);
        assert_eq!(replica.last_failed_version(), 7);
    }

    #[test]
    fn tables_on_id_order_skips_dropped() {
        let db = Database::new(1, "db1");
        db.add_table(OlapTable::new(20, "t20", 2, 3));
        db.add_table(OlapTable::new(10, "t10", 2, 3));
        let tables = db.tables_on_id_order_if_exist(&[20, 99, 10]);
        let ids: Vec<TableId> = tables.iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![10, 20]);
    }

    #[test]
    fn nested_table_locks_release_cleanly() {
        let tables = vec![
            OlapTable::new(1, "a", 1, 1),
            OlapTable::new(2, "b", 1, 1),
        ];
        let out = with_tables_write_locked(&tables, || 7);
        assert_eq!(out, 7);
        // locks were released: a second pass succeeds
        let out = with_tables_write_locked(&tables, || 8);
        assert_eq!(out, 8);
    }
}
