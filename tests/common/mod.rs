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
//! Shared fixtures for integration tests: a small 3-replica catalog and an
//! in-memory tablet manager.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use novastore::common::ids::{BackendId, ReplicaId, SchemaHash, TabletId, TabletUid};
use novastore::common::status::Result;
use novastore::storage::data_dir::{DataDir, DataDirInfo};
use novastore::storage::rowset::{RowsetId, RowsetMeta};
use novastore::storage::tablet::{CreateTabletRequest, Tablet, TabletManager};
use novastore::txn::catalog::{
    Catalog, Database, MaterializedIndex, OlapTable, Partition, Replica,
    Tablet as CatalogTablet, TabletMetaInfo,
};

pub const DB_ID: i64 = 1;
pub const TABLE_ID: i64 = 10;
pub const PARTITION_ID: i64 = 20;
pub const INDEX_ID: i64 = 30;
pub const TABLET_ID: i64 = 40;
pub const BACKEND_IDS: [BackendId; 3] = [101, 102, 103];
pub const REPLICA_IDS: [ReplicaId; 3] = [401, 402, 403];

/// One database, one table (quorum 2 of 3), one partition at visible
/// version 5 / next version 6, one tablet with replicas on three backends.
pub fn build_small_catalog() -> Arc<Catalog> {
    let catalog = Catalog::new();
    let db = Database::new(DB_ID, "test_db");
    let table = OlapTable::new(TABLE_ID, "test_tbl", 2, 3);
    let partition = Partition::new(PARTITION_ID, "[types: [BIGINT]; keys: [1]; ..)");
    partition.update_visible_version_and_time(5, 0);
    partition.set_next_version(6);
    let index = MaterializedIndex::new(INDEX_ID);
    let tablet = CatalogTablet::new(TABLET_ID);

    for (replica_id, backend_id) in REPLICA_IDS.iter().zip(BACKEND_IDS.iter()) {
        let replica = Replica::new(*replica_id, *backend_id, 5);
        tablet.add_replica(Arc::clone(&replica));
        catalog.inverted_index().add_replica(TABLET_ID, replica);
    }
    catalog.inverted_index().add_tablet(
        TABLET_ID,
        TabletMetaInfo {
            table_id: TABLE_ID,
            partition_id: PARTITION_ID,
            index_id: INDEX_ID,
        },
    );

    index.add_tablet(tablet);
    partition.add_index(index);
    table.add_partition(partition);
    db.add_table(table);
    catalog.add_db(db);
    catalog.set_backend_ids(BACKEND_IDS.to_vec());
    catalog
}

pub struct MockTablet {
    tablet_id: TabletId,
    tablet_uid: TabletUid,
    merge_on_write: bool,
    pub useful_rowsets: Mutex<Vec<RowsetId>>,
    pub removed_delete_bitmaps: Mutex<Vec<RowsetId>>,
    pub gc_binlog_versions: Mutex<Vec<i64>>,
}

impl MockTablet {
    pub fn new(tablet_id: TabletId, tablet_uid: TabletUid, merge_on_write: bool) -> Arc<Self> {
        Arc::new(Self {
            tablet_id,
            tablet_uid,
            merge_on_write,
            useful_rowsets: Mutex::new(Vec::new()),
            removed_delete_bitmaps: Mutex::new(Vec::new()),
            gc_binlog_versions: Mutex::new(Vec::new()),
        })
    }
}

impl Tablet for MockTablet {
    fn tablet_id(&self) -> TabletId {
        self.tablet_id
    }

    fn tablet_uid(&self) -> TabletUid {
        self.tablet_uid
    }

    fn rowset_meta_is_useful(&self, rowset_meta: &RowsetMeta) -> bool {
        self.useful_rowsets
            .lock()
            .unwrap()
            .contains(&rowset_meta.rowset_id)
    }

    fn enable_unique_key_merge_on_write(&self) -> bool {
        self.merge_on_write
    }

    fn remove_rowset_delete_bitmap(&self, rowset_id: &RowsetId) {
        self.removed_delete_bitmaps.lock().unwrap().push(*rowset_id);
    }

    fn gc_binlogs(&self, version: i64) {
        self.gc_binlog_versions.lock().unwrap().push(version);
    }
}

#[derive(Default)]
pub struct MockTabletManager {
    pub tablets: Mutex<HashMap<TabletId, Arc<MockTablet>>>,
}

impl MockTabletManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, tablet: Arc<MockTablet>) {
        self.tablets.lock().unwrap().insert(tablet.tablet_id(), tablet);
    }

    pub fn remove(&self, tablet_id: TabletId) {
        self.tablets.lock().unwrap().remove(&tablet_id);
    }
}

impl TabletManager for MockTabletManager {
    fn get_tablet(&self, tablet_id: TabletId) -> Option<Arc<dyn Tablet>> {
        self.tablets
            .lock()
            .unwrap()
            .get(&tablet_id)
            .cloned()
            .map(|t| t as Arc<dyn Tablet>)
    }

    fn get_tablet_with_uid(
        &self,
        tablet_id: TabletId,
        tablet_uid: TabletUid,
        _include_deleted: bool,
    ) -> Option<Arc<dyn Tablet>> {
        self.tablets
            .lock()
            .unwrap()
            .get(&tablet_id)
            .filter(|t| t.tablet_uid() == tablet_uid)
            .cloned()
            .map(|t| t as Arc<dyn Tablet>)
    }

    fn create_tablet(&self, request: &CreateTabletRequest, stores: &[Arc<DataDir>]) -> Result<()> {
        assert!(!stores.is_empty());
        self.insert(MockTablet::new(
            request.tablet_id,
            TabletUid {
                hi: request.tablet_id,
                lo: 0,
            },
            false,
        ));
        Ok(())
    }

    fn load_tablet_from_dir(
        &self,
        _store: &Arc<DataDir>,
        tablet_id: TabletId,
        _schema_hash: SchemaHash,
        _schema_hash_path: &Path,
        _force: bool,
        _restore: bool,
    ) -> Result<()> {
        self.insert(MockTablet::new(tablet_id, TabletUid { hi: tablet_id, lo: 0 }, false));
        Ok(())
    }

    fn start_trash_sweep(&self) -> Result<()> {
        Ok(())
    }

    fn update_root_path_info(&self, _path_map: &mut BTreeMap<String, DataDirInfo>) -> usize {
        self.tablets.lock().unwrap().len()
    }
}
