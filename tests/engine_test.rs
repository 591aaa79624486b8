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
//! Integration tests for the storage engine controller: disk bring-up, meta
//! cleanup sweeps, transaction rowset GC, placement-driven tablet creation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use novastore::common::ids::{BackendUid, TabletUid};
use novastore::storage::data_dir::{SNAPSHOT_PREFIX, StorageMedium, TRASH_PREFIX};
use novastore::storage::engine::{EngineOptions, StorageEngine, StorePath};
use novastore::storage::meta::{
    BinlogMeta, PendingPublishInfo, RowsetMetaManager, TabletMetaManager,
};
use novastore::storage::rowset::{Rowset, RowsetId, RowsetMeta, RowsetState, VersionRange};
use novastore::storage::tablet::{CreateTabletRequest, TabletInfo, TabletManager};
use novastore::txn::manager::TransactionManager;

mod common;

use common::{MockTablet, MockTabletManager};

fn test_engine(
    tmp: &tempfile::TempDir,
    num_dirs: usize,
    tablet_manager: Arc<MockTabletManager>,
) -> Arc<StorageEngine> {
    let mut store_paths = Vec::new();
    for i in 0..num_dirs {
        let path = tmp.path().join(format!("disk{}", i));
        std::fs::create_dir_all(&path).unwrap();
        store_paths.push(StorePath {
            path: path.to_string_lossy().into_owned(),
            capacity_bytes: -1,
            medium: StorageMedium::Hdd,
        });
    }
    let options = EngineOptions {
        store_paths,
        backend_uid: BackendUid { hi: 11, lo: 22 },
        broken_paths: HashSet::new(),
    };
    let engine = StorageEngine::new(options, tablet_manager);
    engine.open().unwrap();
    engine
}

fn rowset_meta(tablet_id: i64, uid_hi: i64, hi: u64, state: RowsetState) -> RowsetMeta {
    RowsetMeta {
        rowset_id: RowsetId { hi, mi: 0, lo: 0 },
        tablet_id,
        tablet_uid: TabletUid { hi: uid_hi, lo: 0 },
        version: VersionRange::new(2, 2),
        state,
        is_local: true,
        num_rows: 1,
        data_disk_size: 1,
    }
}

#[test]
fn open_reports_all_dirs() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = test_engine(&tmp, 2, MockTabletManager::new());
    let infos = engine.get_all_data_dir_info(true).unwrap();
    assert_eq!(infos.len(), 2);
    assert!(infos.iter().all(|info| info.is_used));
    assert!(infos.iter().all(|info| info.disk_capacity > 0));
    engine.stop();
}

#[test]
fn trash_sweep_removes_orphan_meta_records() {
    let tmp = tempfile::tempdir().unwrap();
    let tablet_manager = MockTabletManager::new();

    // live tablet 88 with one useful rowset
    let live = MockTablet::new(88, TabletUid { hi: 88, lo: 0 }, false);
    let useful = rowset_meta(88, 88, 3, RowsetState::Visible);
    live.useful_rowsets.lock().unwrap().push(useful.rowset_id);
    tablet_manager.insert(live);

    let engine = test_engine(&tmp, 1, Arc::clone(&tablet_manager));
    let dir = engine.get_stores(false).pop().unwrap();
    let meta = dir.get_meta();

    // orphan: tablet 77 does not exist
    RowsetMetaManager::save(meta.as_ref(), &rowset_meta(77, 77, 1, RowsetState::Visible)).unwrap();
    // stale incarnation: tablet id 88 but an older uid
    RowsetMetaManager::save(meta.as_ref(), &rowset_meta(88, 87, 2, RowsetState::Visible)).unwrap();
    // useful rowset of the live tablet
    RowsetMetaManager::save(meta.as_ref(), &useful).unwrap();
    // visible but no longer useful to the tablet
    RowsetMetaManager::save(meta.as_ref(), &rowset_meta(88, 88, 4, RowsetState::Visible)).unwrap();
    // pending rowsets are never judged useful/useless here
    RowsetMetaManager::save(meta.as_ref(), &rowset_meta(88, 88, 5, RowsetState::Pending)).unwrap();

    // binlog metas: one for a dropped tablet, one for the live tablet
    RowsetMetaManager::save_binlog(
        meta.as_ref(),
        TabletUid { hi: 77, lo: 0 },
        &BinlogMeta {
            tablet_id: 77,
            rowset_id: RowsetId { hi: 10, mi: 0, lo: 0 },
            version: 2,
        },
    )
    .unwrap();
    RowsetMetaManager::save_binlog(
        meta.as_ref(),
        TabletUid { hi: 88, lo: 0 },
        &BinlogMeta {
            tablet_id: 88,
            rowset_id: RowsetId { hi: 11, mi: 0, lo: 0 },
            version: 2,
        },
    )
    .unwrap();

    // delete bitmaps and pending publish infos of the dropped tablet
    TabletMetaManager::save_delete_bitmap(meta.as_ref(), 77, 2, "{}").unwrap();
    TabletMetaManager::save_delete_bitmap(meta.as_ref(), 88, 2, "{}").unwrap();
    TabletMetaManager::save_pending_publish_info(
        meta.as_ref(),
        77,
        3,
        &PendingPublishInfo {
            transaction_id: 500,
            partition_id: 20,
        },
    )
    .unwrap();
    TabletMetaManager::save_pending_publish_info(
        meta.as_ref(),
        88,
        3,
        &PendingPublishInfo {
            transaction_id: 501,
            partition_id: 20,
        },
    )
    .unwrap();

    engine.start_trash_sweep(false).unwrap();

    let mut remaining_rowsets = Vec::new();
    RowsetMetaManager::traverse_rowset_metas(meta.as_ref(), &mut |_, rowset_id, _| {
        remaining_rowsets.push(rowset_id.hi);
        true
    })
    .unwrap();
    remaining_rowsets.sort_unstable();
    assert_eq!(remaining_rowsets, vec![3, 5]);

    let mut remaining_binlogs = Vec::new();
    RowsetMetaManager::traverse_binlog_metas(meta.as_ref(), &mut |_, value| {
        let parsed: BinlogMeta = serde_json::from_str(value).unwrap();
        remaining_binlogs.push(parsed.tablet_id);
        true
    })
    .unwrap();
    assert_eq!(remaining_binlogs, vec![88]);

    let mut remaining_bitmaps = Vec::new();
    TabletMetaManager::traverse_delete_bitmap(meta.as_ref(), &mut |tablet_id, _, _| {
        remaining_bitmaps.push(tablet_id);
        true
    })
    .unwrap();
    assert_eq!(remaining_bitmaps, vec![88]);

    let mut remaining_publish = Vec::new();
    TabletMetaManager::traverse_pending_publish(meta.as_ref(), &mut |tablet_id, _, _| {
        remaining_publish.push(tablet_id);
        true
    })
    .unwrap();
    assert_eq!(remaining_publish, vec![88]);

    engine.stop();
}

#[test]
fn clear_transaction_task_hands_rowsets_to_gc() {
    let tmp = tempfile::tempdir().unwrap();
    let tablet_manager = MockTabletManager::new();
    let tablet = MockTablet::new(55, TabletUid { hi: 55, lo: 0 }, true);
    tablet_manager.insert(Arc::clone(&tablet));
    let engine = test_engine(&tmp, 1, Arc::clone(&tablet_manager));

    let rowset_dir = tmp.path().join("staged_rowset");
    std::fs::create_dir_all(&rowset_dir).unwrap();
    std::fs::write(rowset_dir.join("0.dat"), b"x").unwrap();
    let meta = rowset_meta(55, 55, 9, RowsetState::Pending);
    let rowset_id = meta.rowset_id;
    let rowset = Rowset::new(meta, &rowset_dir);

    engine.txn_rowset_registry().record_txn_rowset(
        900,
        20,
        TabletInfo {
            tablet_id: 55,
            tablet_uid: TabletUid { hi: 55, lo: 0 },
        },
        rowset,
    );

    engine.clear_transaction_task(900, None);
    assert!(engine.check_rowset_id_in_unused_rowsets(&rowset_id));
    assert!(engine.txn_rowset_registry().get_partition_ids(900).is_empty());

    // nothing pins the rowset and the delay is zero, so GC removes the files
    // and drops the merge-on-write delete bitmap slice
    engine.start_delete_unused_rowset();
    assert!(!rowset_dir.exists());
    assert_eq!(
        tablet.removed_delete_bitmaps.lock().unwrap().as_slice(),
        &[rowset_id]
    );
    engine.stop();
}

#[test]
fn orphan_txn_rowsets_are_rolled_back_by_the_sweep() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = test_engine(&tmp, 1, MockTabletManager::new());

    let meta = rowset_meta(66, 66, 12, RowsetState::Pending);
    let rowset_id = meta.rowset_id;
    engine.txn_rowset_registry().record_txn_rowset(
        901,
        20,
        TabletInfo {
            tablet_id: 66,
            tablet_uid: TabletUid { hi: 66, lo: 0 },
        },
        Rowset::new(meta, tmp.path().join("never_written")),
    );

    engine.start_trash_sweep(false).unwrap();
    assert!(engine.check_rowset_id_in_unused_rowsets(&rowset_id));
    assert!(engine.txn_rowset_registry().get_all_related_tablets().is_empty());
    engine.stop();
}

#[test]
fn create_tablet_places_on_a_store() {
    let tmp = tempfile::tempdir().unwrap();
    let tablet_manager = MockTabletManager::new();
    let engine = test_engine(&tmp, 2, Arc::clone(&tablet_manager));

    engine
        .create_tablet(&CreateTabletRequest {
            tablet_id: 1001,
            schema_hash: 12345,
            partition_id: 7,
            storage_medium: StorageMedium::Hdd,
        })
        .unwrap();
    assert!(tablet_manager.get_tablet(1001).is_some());
    engine.stop();
}

#[test]
fn load_header_goes_through_shard_path() {
    let tmp = tempfile::tempdir().unwrap();
    let tablet_manager = MockTabletManager::new();
    let engine = test_engine(&tmp, 1, Arc::clone(&tablet_manager));

    let (shard_path, _store) = engine.obtain_shard_path(StorageMedium::Hdd, -1, 7).unwrap();
    engine
        .load_header(
            &shard_path,
            &novastore::storage::engine::LoadHeaderRequest {
                tablet_id: 2002,
                schema_hash: 999,
            },
            false,
        )
        .unwrap();
    assert!(tablet_manager.get_tablet(2002).is_some());
    engine.stop();
}

#[test]
fn gc_binlogs_dispatches_versions_to_tablets() {
    let tmp = tempfile::tempdir().unwrap();
    let tablet_manager = MockTabletManager::new();
    let tablet = MockTablet::new(3003, TabletUid { hi: 3003, lo: 0 }, false);
    tablet_manager.insert(Arc::clone(&tablet));
    let engine = test_engine(&tmp, 1, Arc::clone(&tablet_manager));

    engine.gc_binlogs(&HashMap::from([(3003, 42), (9999, 1)]));
    assert_eq!(tablet.gc_binlog_versions.lock().unwrap().as_slice(), &[42]);
    engine.stop();
}

#[test]
fn sweep_honors_embedded_ttl_in_trash_and_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = test_engine(&tmp, 1, MockTabletManager::new());
    let dir = engine.get_stores(false).pop().unwrap();

    // ancient but protected by an enormous embedded ttl; entries sort by
    // name, so it must come after the doomed one or the sweep stops early
    let protected = dir.path().join(TRASH_PREFIX).join("20240101120000.1.99999999999");
    std::fs::create_dir_all(&protected).unwrap();
    // ancient with no embedded ttl: the global expiry applies
    let doomed = dir.path().join(TRASH_PREFIX).join("20240101115959");
    std::fs::create_dir_all(&doomed).unwrap();
    // snapshots follow the same naming rule
    let doomed_snapshot = dir.path().join(SNAPSHOT_PREFIX).join("20240101120000");
    std::fs::create_dir_all(&doomed_snapshot).unwrap();

    engine.start_trash_sweep(false).unwrap();
    assert!(protected.exists());
    assert!(!doomed.exists());
    assert!(!doomed_snapshot.exists());
    engine.stop();
}

#[test]
fn engine_and_txn_manager_share_a_node() {
    // smoke: the two top-level subsystems coexist over one catalog-less setup
    let tmp = tempfile::tempdir().unwrap();
    let engine = test_engine(&tmp, 1, MockTabletManager::new());
    let catalog = common::build_small_catalog();
    let edit_log: Arc<dyn novastore::txn::edit_log::EditLog> =
        Arc::new(novastore::txn::edit_log::MemoryEditLog::new());
    let submitter: Arc<dyn novastore::txn::manager::AgentTaskSubmitter> =
        Arc::new(novastore::txn::manager::NoopAgentTaskSubmitter);
    let txn_mgr = TransactionManager::new(catalog, edit_log, submitter);
    let _ = txn_mgr.get_db_transaction_mgr(common::DB_ID);
    engine.stop();
}
