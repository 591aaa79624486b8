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
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Local;
use threadpool::ThreadPool;

use crate::common::app_config;
use crate::common::config;
use crate::common::ids::{BackendId, BackendUid, PartitionId, ReplicaId, SchemaHash, TabletId, TxnId};
use crate::common::status::{EngineError, Result};
use crate::common::util::{self, CountDownLatch};
use crate::novastore_logging::{info, warn};
use crate::storage::data_dir::{
    DATA_PREFIX, DataDir, DataDirInfo, SNAPSHOT_PREFIX, StorageMedium, TRASH_PREFIX,
    load_or_create_backend_uid,
};
use crate::storage::meta::{BinlogMeta, RowsetMetaManager, TabletMetaManager};
use crate::storage::pending_rowsets::{PendingRowsetGuard, PendingRowsetSet};
use crate::storage::rowset::{Rowset, RowsetId, RowsetIdGenerator, RowsetMeta, RowsetState};
use crate::storage::tablet::{CreateTabletRequest, TabletManager};
use crate::storage::trash;
use crate::storage::txn_rowsets::TxnRowsetRegistry;

#[derive(Clone, Debug)]
pub struct StorePath {
    pub path: String,
    pub capacity_bytes: i64,
    pub medium: StorageMedium,
}

#[derive(Clone, Debug)]
pub struct EngineOptions {
    pub store_paths: Vec<StorePath>,
    pub backend_uid: BackendUid,
    pub broken_paths: HashSet<String>,
}

impl EngineOptions {
    /// Assemble options from the loaded configuration file.
    pub fn from_config() -> Result<Self> {
        let cfg = app_config::config()
            .map_err(|e| EngineError::Internal(format!("load config: {e:#}")))?;
        let mut store_paths = Vec::new();
        for sp in &cfg.storage.store_paths {
            let medium = StorageMedium::from_str(&sp.medium).map_err(EngineError::Internal)?;
            store_paths.push(StorePath {
                path: sp.path.clone(),
                capacity_bytes: sp.capacity_bytes,
                medium,
            });
        }
        if store_paths.is_empty() {
            return Err(EngineError::Internal("store paths is empty".to_string()));
        }
        let backend_uid = load_or_create_backend_uid(Path::new(&store_paths[0].path))?;
        let broken_paths = cfg
            .storage
            .broken_storage_path
            .split(';')
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string())
            .collect();
        Ok(Self {
            store_paths,
            backend_uid,
            broken_paths,
        })
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum DiskRemainingLevel {
    Low,
    Mid,
    High,
}

pub(crate) fn get_available_level(disk_usage_percent: f64) -> DiskRemainingLevel {
    if disk_usage_percent < 0.7 {
        DiskRemainingLevel::Low
    } else if disk_usage_percent < 0.85 {
        DiskRemainingLevel::Mid
    } else {
        DiskRemainingLevel::High
    }
}

struct DirInfo {
    data_dir: Arc<DataDir>,
    available_level: DiskRemainingLevel,
}

/// Within each availability band, emit dirs round-robin starting at
/// `curr_index` so bursty tablet creation spreads evenly.
fn get_round_robin_stores(curr_index: i64, dir_infos: &[DirInfo]) -> Vec<Arc<DataDir>> {
    let mut stores = Vec::with_capacity(dir_infos.len());
    let mut i = 0;
    while i < dir_infos.len() {
        let mut end = i + 1;
        while end < dir_infos.len() && dir_infos[i].available_level == dir_infos[end].available_level
        {
            end += 1;
        }
        let count = (end - i) as i64;
        for k in 0..count {
            let index = i + ((k + curr_index).rem_euclid(count)) as usize;
            stores.push(Arc::clone(&dir_infos[index].data_dir));
        }
        i = end;
    }
    stores
}

/// Bounded LRU of `(partition, medium) -> next placement index`.
struct CreateTabletIdxCache {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, (i64, u64)>,
    by_tick: BTreeMap<u64, String>,
}

impl CreateTabletIdxCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: HashMap::new(),
            by_tick: BTreeMap::new(),
        }
    }

    fn key(partition_id: PartitionId, medium: StorageMedium) -> String {
        format!("{}_{}", partition_id, medium)
    }

    fn get_index(&mut self, key: &str) -> Option<i64> {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(key)?;
        self.by_tick.remove(&entry.1);
        entry.1 = tick;
        self.by_tick.insert(tick, key.to_string());
        Some(entry.0)
    }

    fn set_index(&mut self, key: &str, next_idx: i64) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(key) {
            self.by_tick.remove(&entry.1);
            *entry = (next_idx, tick);
        } else {
            if self.entries.len() >= self.capacity {
                if let Some((_, victim)) = self.by_tick.pop_first() {
                    self.entries.remove(&victim);
                }
            }
            self.entries.insert(key.to_string(), (next_idx, tick));
        }
        self.by_tick.insert(tick, key.to_string());
    }
}

struct StoreState {
    map: BTreeMap<String, Arc<DataDir>>,
    idx_cache: CreateTabletIdxCache,
    last_use_index: HashMap<StorageMedium, i64>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReplicaInfo {
    pub replica_id: ReplicaId,
    pub backend_id: BackendId,
    pub host: String,
}

/// Agent workers that report tablets/disks/tasks to the frontend; the engine
/// pokes them when something worth reporting happened.
pub trait ReportListener: Send + Sync {
    fn name(&self) -> &str;
    fn notify(&self);
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CompactionType {
    Base,
    Cumulative,
}

#[derive(Clone, Debug)]
pub struct RowsetWriterContext {
    pub rowset_id: RowsetId,
    pub is_local: bool,
}

#[derive(Clone, Debug)]
pub struct LoadHeaderRequest {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
}

fn too_many_disks_are_failed(unused_num: u32, total_num: u32) -> bool {
    total_num == 0 || unused_num * 100 / total_num > config::max_percentage_of_error_disk()
}

/// Top-level coordinator of the node's local storage: disk registry and
/// placement, rowset lifecycle, trash/meta sweeping, background daemons.
pub struct StorageEngine {
    options: EngineOptions,
    stores: Mutex<StoreState>,
    available_storage_medium_type_count: AtomicUsize,
    effective_cluster_id: AtomicI32,
    is_all_cluster_id_exist: AtomicBool,
    stopped: AtomicBool,
    default_rowset_type_beta: AtomicBool,

    tablet_manager: Arc<dyn TabletManager>,
    txn_rowset_registry: TxnRowsetRegistry,
    rowset_id_generator: RowsetIdGenerator,

    pending_local_rowsets: PendingRowsetSet,
    pending_remote_rowsets: PendingRowsetSet,
    unused_rowsets: Mutex<HashMap<RowsetId, Arc<Rowset>>>,
    querying_rowsets: Mutex<HashMap<RowsetId, Arc<Rowset>>>,

    broken_paths: Mutex<HashSet<String>>,
    trash_sweep_lock: Mutex<()>,
    need_clean_trash: AtomicBool,

    peer_replica_infos: Mutex<HashMap<TabletId, ReplicaInfo>>,
    peer_replica_token: Mutex<String>,
    report_listeners: Mutex<Vec<Arc<dyn ReportListener>>>,

    base_compaction_pool: ThreadPool,
    cumu_compaction_pool: ThreadPool,
    tablet_submitted_base_compaction: Mutex<HashMap<String, HashSet<TabletId>>>,
    tablet_submitted_cumu_compaction: Mutex<HashMap<String, HashSet<TabletId>>>,
    low_priority_task_nums: Mutex<HashMap<String, i32>>,

    stop_background_threads_latch: CountDownLatch,
    bg_threads: Mutex<Vec<JoinHandle<()>>>,
}

impl StorageEngine {
    pub fn new(options: EngineOptions, tablet_manager: Arc<dyn TabletManager>) -> Arc<Self> {
        let backend_uid = options.backend_uid;
        let broken_paths = options.broken_paths.clone();
        Arc::new(Self {
            options,
            stores: Mutex::new(StoreState {
                map: BTreeMap::new(),
                idx_cache: CreateTabletIdxCache::new(config::partition_disk_index_lru_size()),
                last_use_index: HashMap::new(),
            }),
            available_storage_medium_type_count: AtomicUsize::new(0),
            effective_cluster_id: AtomicI32::new(-1),
            is_all_cluster_id_exist: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            default_rowset_type_beta: AtomicBool::new(true),
            tablet_manager,
            txn_rowset_registry: TxnRowsetRegistry::new(config::txn_map_shard_size()),
            rowset_id_generator: RowsetIdGenerator::new(backend_uid),
            pending_local_rowsets: PendingRowsetSet::new(),
            pending_remote_rowsets: PendingRowsetSet::new(),
            unused_rowsets: Mutex::new(HashMap::new()),
            querying_rowsets: Mutex::new(HashMap::new()),
            broken_paths: Mutex::new(broken_paths),
            trash_sweep_lock: Mutex::new(()),
            need_clean_trash: AtomicBool::new(false),
            peer_replica_infos: Mutex::new(HashMap::new()),
            peer_replica_token: Mutex::new(String::new()),
            report_listeners: Mutex::new(Vec::new()),
            base_compaction_pool: ThreadPool::with_name(
                "base_compaction".to_string(),
                config::max_base_compaction_threads().max(1),
            ),
            cumu_compaction_pool: ThreadPool::with_name(
                "cumu_compaction".to_string(),
                config::max_cumu_compaction_threads().max(1),
            ),
            tablet_submitted_base_compaction: Mutex::new(HashMap::new()),
            tablet_submitted_cumu_compaction: Mutex::new(HashMap::new()),
            low_priority_task_nums: Mutex::new(HashMap::new()),
            stop_background_threads_latch: CountDownLatch::new(1),
            bg_threads: Mutex::new(Vec::new()),
        })
    }

    pub fn open(&self) -> Result<()> {
        if self.options.store_paths.is_empty() {
            return Err(EngineError::Internal("store paths is empty".to_string()));
        }
        info!("starting backend using uid: {}", self.options.backend_uid);

        self.init_store_map()?;
        self.effective_cluster_id
            .store(config::cluster_id(), Ordering::Release);
        self.check_all_root_path_cluster_id()?;
        self.update_storage_medium_type_count();
        self.check_file_descriptor_number()?;
        self.load_data_dirs()?;
        self.parse_default_rowset_type()?;

        info!("success to init storage engine");
        Ok(())
    }

    /// Every store path must come online; one worker per path.
    fn init_store_map(&self) -> Result<()> {
        let mut dirs = Vec::with_capacity(self.options.store_paths.len());
        for sp in &self.options.store_paths {
            dirs.push(Arc::new(DataDir::new(&sp.path, sp.capacity_bytes, sp.medium)));
        }

        let error_msg = Mutex::new(String::new());
        std::thread::scope(|scope| {
            let error_msg = &error_msg;
            for dir in &dirs {
                scope.spawn(move || {
                    if let Err(e) = dir.init() {
                        warn!("store load failed, path={}, err={}", dir.path_string(), e);
                        let mut msg = error_msg.lock().expect("init error msg lock");
                        msg.push_str(&format!("{};", e));
                    }
                });
            }
        });
        let error_msg = error_msg.into_inner().expect("init error msg lock");
        if !error_msg.is_empty() {
            return Err(EngineError::Internal(format!(
                "init path failed, error={}",
                error_msg
            )));
        }

        let mut stores = self.stores.lock().expect("store lock");
        for dir in dirs {
            stores.map.insert(dir.path_string().to_string(), dir);
        }
        Ok(())
    }

    fn load_data_dirs(&self) -> Result<()> {
        let dirs = self.get_stores(false);
        let results: Mutex<Vec<(String, EngineError)>> = Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            let results = &results;
            for dir in &dirs {
                scope.spawn(move || {
                    if let Err(e) = dir.load() {
                        warn!(
                            "io error when init load tables. data dir={}, err={}",
                            dir.path_string(),
                            e
                        );
                        results
                            .lock()
                            .expect("load results lock")
                            .push((dir.path_string().to_string(), e));
                    }
                });
            }
        });
        let mut results = results.into_inner().expect("load results lock");
        match results.pop() {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }

    fn check_file_descriptor_number(&self) -> Result<()> {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
        if rc != 0 {
            warn!("call getrlimit() failed, use default configuration instead");
            return Ok(());
        }
        let min_fd = config::min_file_descriptor_number();
        if (limit.rlim_cur as u64) < min_fd {
            // raise the soft limit up to the hard cap before giving up
            let raised = libc::rlimit {
                rlim_cur: (min_fd as libc::rlim_t).min(limit.rlim_max),
                rlim_max: limit.rlim_max,
            };
            let rc = unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &raised) };
            if rc != 0 || (raised.rlim_cur as u64) < min_fd {
                return Err(EngineError::ExceededLimit(format!(
                    "file descriptors limit {} is smaller than {}, please use (ulimit -n) to raise it",
                    limit.rlim_cur, min_fd
                )));
            }
            info!(
                "raised file descriptor soft limit from {} to {}",
                limit.rlim_cur, raised.rlim_cur
            );
        }
        Ok(())
    }

    fn judge_and_update_effective_cluster_id(&self, cluster_id: i32) -> Result<()> {
        let effective = self.effective_cluster_id.load(Ordering::Acquire);
        if cluster_id == -1 && effective == -1 {
            // new cluster; the id arrives with the first heartbeat
            return Ok(());
        }
        if cluster_id != -1 && effective == -1 {
            self.effective_cluster_id.store(cluster_id, Ordering::Release);
            return Ok(());
        }
        if cluster_id != -1 && cluster_id != effective {
            return Err(EngineError::Corruption(format!(
                "multiple cluster ids is not equal. one={}, other={}",
                effective, cluster_id
            )));
        }
        Ok(())
    }

    fn check_all_root_path_cluster_id(&self) -> Result<()> {
        let dirs = self.get_stores(true);
        let mut cluster_id = -1;
        for dir in &dirs {
            let dir_cluster_id = dir.cluster_id();
            if dir.cluster_id_incomplete() {
                self.is_all_cluster_id_exist.store(false, Ordering::Release);
            } else if dir_cluster_id == cluster_id {
                // both carry the right id, nothing to do
            } else if cluster_id == -1 {
                cluster_id = dir_cluster_id;
            } else {
                return Err(EngineError::Corruption(format!(
                    "multiple cluster ids is not equal. one={}, other={}",
                    cluster_id, dir_cluster_id
                )));
            }
        }

        self.judge_and_update_effective_cluster_id(cluster_id)?;

        let effective = self.effective_cluster_id.load(Ordering::Acquire);
        if effective != -1 && !self.is_all_cluster_id_exist.load(Ordering::Acquire) {
            self.set_cluster_id(effective)?;
        }
        Ok(())
    }

    /// Stamp all roots, typically with the id from the first heartbeat.
    pub fn set_cluster_id(&self, cluster_id: i32) -> Result<()> {
        let stores = self.stores.lock().expect("store lock");
        for dir in stores.map.values() {
            dir.set_cluster_id(cluster_id)?;
        }
        self.effective_cluster_id.store(cluster_id, Ordering::Release);
        self.is_all_cluster_id_exist.store(true, Ordering::Release);
        Ok(())
    }

    pub fn effective_cluster_id(&self) -> i32 {
        self.effective_cluster_id.load(Ordering::Acquire)
    }

    fn parse_default_rowset_type(&self) -> Result<()> {
        let configured = config::default_rowset_type().to_ascii_uppercase();
        match configured.as_str() {
            "BETA" => self.default_rowset_type_beta.store(true, Ordering::Release),
            "ALPHA" => {
                warn!("default_rowset_type should be set to beta, alpha is not supported any more");
                self.default_rowset_type_beta.store(false, Ordering::Release);
            }
            other => {
                return Err(EngineError::Internal(format!(
                    "unknown value {} in default_rowset_type",
                    other
                )));
            }
        }
        Ok(())
    }

    pub fn get_stores(&self, include_unused: bool) -> Vec<Arc<DataDir>> {
        let stores = self.stores.lock().expect("store lock");
        stores
            .map
            .values()
            .filter(|dir| include_unused || dir.is_used())
            .cloned()
            .collect()
    }

    pub fn get_store(&self, path: &str) -> Option<Arc<DataDir>> {
        let stores = self.stores.lock().expect("store lock");
        stores.map.get(path).cloned()
    }

    fn update_storage_medium_type_count(&self) {
        let mut mediums = HashSet::new();
        {
            let stores = self.stores.lock().expect("store lock");
            for dir in stores.map.values() {
                if dir.is_used() {
                    mediums.insert(dir.storage_medium());
                }
            }
        }
        self.available_storage_medium_type_count
            .store(mediums.len(), Ordering::Release);
    }

    /// Refresh and snapshot per-dir stats. Capacity IO runs outside the
    /// store lock.
    pub fn get_all_data_dir_info(&self, need_update: bool) -> Result<Vec<DataDirInfo>> {
        let dirs = self.get_stores(true);
        if need_update {
            for dir in &dirs {
                dir.update_capacity()?;
            }
        }

        let mut path_map: BTreeMap<String, DataDirInfo> = dirs
            .iter()
            .map(|dir| (dir.path_string().to_string(), dir.get_dir_info()))
            .collect();

        let tablet_count = self.tablet_manager.update_root_path_info(&mut path_map);

        for (path, dir_info) in &path_map {
            if let Some(dir) = self.get_store(path) {
                dir.update_local_data_size(dir_info.local_used_capacity);
                dir.update_remote_data_size(dir_info.remote_used_capacity);
            }
        }

        info!("get root path info done, tablet counter: {}", tablet_count);
        Ok(path_map.into_values().collect())
    }

    fn get_and_set_next_disk_index(
        state: &mut StoreState,
        partition_id: PartitionId,
        medium: StorageMedium,
    ) -> i64 {
        let key = CreateTabletIdxCache::key(partition_id, medium);
        let last_use = state.last_use_index.entry(medium).or_insert(0);
        let curr_index = match state.idx_cache.get_index(&key) {
            Some(idx) => idx,
            // cache miss advances both structures, preserving the sequence
            None => (*last_use + 1).max(0),
        };
        *last_use = curr_index;
        state.idx_cache.set_index(&key, (curr_index + 1).max(0));
        curr_index
    }

    /// Candidate dirs for a new tablet, least-full availability band first,
    /// round-robin within a band.
    pub fn get_stores_for_create_tablet(
        &self,
        partition_id: PartitionId,
        medium: StorageMedium,
    ) -> Vec<Arc<DataDir>> {
        let medium_type_count = self
            .available_storage_medium_type_count
            .load(Ordering::Acquire);
        let (curr_index, mut dir_infos) = {
            let mut stores = self.stores.lock().expect("store lock");
            let curr_index = Self::get_and_set_next_disk_index(&mut stores, partition_id, medium);
            let mut dir_infos = Vec::new();
            for dir in stores.map.values() {
                if !dir.is_used() {
                    continue;
                }
                if (medium_type_count == 1 || dir.storage_medium() == medium)
                    && !dir.reach_capacity_limit(0)
                {
                    dir_infos.push(DirInfo {
                        data_dir: Arc::clone(dir),
                        available_level: get_available_level(dir.get_usage(0)),
                    });
                }
            }
            (curr_index, dir_infos)
        };

        dir_infos.sort_by_key(|info| info.available_level);
        get_round_robin_stores(curr_index, &dir_infos)
    }

    pub fn create_tablet(&self, request: &CreateTabletRequest) -> Result<()> {
        let stores =
            self.get_stores_for_create_tablet(request.partition_id, request.storage_medium);
        if stores.is_empty() {
            return Err(EngineError::CeCmdParamsError(
                "there is no available disk that can be used to create tablet".to_string(),
            ));
        }
        self.tablet_manager.create_tablet(request, &stores)
    }

    /// Pick a store (honoring `path_hash` when given) and allocate a shard
    /// under it for an incoming tablet clone/restore.
    pub fn obtain_shard_path(
        &self,
        medium: StorageMedium,
        path_hash: i64,
        partition_id: PartitionId,
    ) -> Result<(PathBuf, Arc<DataDir>)> {
        let stores = self.get_stores_for_create_tablet(partition_id, medium);
        if stores.is_empty() {
            return Err(EngineError::NoAvailableRootPath(
                "no available disk can be used to create tablet".to_string(),
            ));
        }

        let store = if path_hash != -1 {
            stores
                .iter()
                .find(|dir| dir.path_hash() == path_hash)
                .cloned()
                .unwrap_or_else(|| Arc::clone(&stores[0]))
        } else {
            Arc::clone(&stores[0])
        };

        let shard = store.get_shard()?;
        let shard_path = store.path().join(DATA_PREFIX).join(shard.to_string());
        Ok((shard_path, store))
    }

    /// Register a tablet whose files were copied into `shard_path` by clone
    /// or restore.
    pub fn load_header(
        &self,
        shard_path: &Path,
        request: &LoadHeaderRequest,
        restore: bool,
    ) -> Result<()> {
        info!(
            "begin to process load headers. tablet_id={}, schema_hash={}",
            request.tablet_id, request.schema_hash
        );
        let store_path = shard_path
            .parent()
            .and_then(|p| p.parent())
            .map(|p| p.to_string_lossy().into_owned())
            .ok_or_else(|| {
                EngineError::InvalidRootPath(format!(
                    "invalid shard path, path={}",
                    shard_path.display()
                ))
            })?;
        let store = self.get_store(&store_path).ok_or_else(|| {
            EngineError::InvalidRootPath(format!("invalid shard path, path={}", shard_path.display()))
        })?;

        let schema_hash_path = shard_path
            .join(request.tablet_id.to_string())
            .join(request.schema_hash.to_string());
        self.tablet_manager.load_tablet_from_dir(
            &store,
            request.tablet_id,
            request.schema_hash,
            &schema_hash_path,
            false,
            restore,
        )?;
        info!("success to process load headers");
        Ok(())
    }

    pub fn next_rowset_id(&self) -> RowsetId {
        self.rowset_id_generator.next_id()
    }

    pub fn tablet_manager(&self) -> &Arc<dyn TabletManager> {
        &self.tablet_manager
    }

    pub fn txn_rowset_registry(&self) -> &TxnRowsetRegistry {
        &self.txn_rowset_registry
    }

    // ---- pending / unused / querying rowsets -------------------------------

    pub fn add_pending_rowset(&self, ctx: &RowsetWriterContext) -> PendingRowsetGuard {
        if ctx.is_local {
            self.pending_local_rowsets.add(ctx.rowset_id)
        } else {
            self.pending_remote_rowsets.add(ctx.rowset_id)
        }
    }

    pub fn pending_rowset_exists(&self, rowset_id: &RowsetId) -> bool {
        self.pending_local_rowsets.contains(rowset_id)
            || self.pending_remote_rowsets.contains(rowset_id)
    }

    /// Flag a superseded rowset for deferred deletion. Idempotent.
    pub fn add_unused_rowset(&self, rowset: Arc<Rowset>) {
        let mut unused = self.unused_rowsets.lock().expect("gc lock");
        if !unused.contains_key(&rowset.rowset_id()) {
            rowset.set_need_delete_file();
            rowset.close();
            unused.insert(rowset.rowset_id(), rowset);
        }
    }

    pub fn check_rowset_id_in_unused_rowsets(&self, rowset_id: &RowsetId) -> bool {
        self.unused_rowsets.lock().expect("gc lock").contains_key(rowset_id)
    }

    pub fn unused_rowsets_count(&self) -> usize {
        self.unused_rowsets.lock().expect("gc lock").len()
    }

    /// Delete unused rowsets that nothing pins any more: no outstanding
    /// references beyond the registry, flagged for deletion, and past their
    /// delay. File removal happens outside the registry lock.
    pub fn start_delete_unused_rowset(&self) {
        let now = util::unix_seconds();
        let mut to_remove = Vec::new();
        {
            let mut unused = self.unused_rowsets.lock().expect("gc lock");
            unused.retain(|rowset_id, rowset| {
                let deletable = Arc::strong_count(rowset) == 1
                    && rowset.need_delete_file()
                    && now > rowset.delayed_expired_timestamp();
                if deletable {
                    self.evict_querying_rowset(rowset_id);
                    // remote rowset data is reclaimed by the remote GC path
                    if rowset.is_local() {
                        to_remove.push(Arc::clone(rowset));
                    }
                }
                !deletable
            });
        }

        for rowset in to_remove {
            if let Some(tablet) = self.tablet_manager.get_tablet(rowset.tablet_id()) {
                if tablet.enable_unique_key_merge_on_write() {
                    tablet.remove_rowset_delete_bitmap(&rowset.rowset_id());
                }
            }
            let status = rowset.remove();
            if let Err(e) = status {
                warn!("remove rowset {} failed: {}", rowset.rowset_id(), e);
            }
        }
    }

    pub fn add_querying_rowset(&self, rowset: Arc<Rowset>) {
        self.querying_rowsets
            .lock()
            .expect("querying rowsets lock")
            .insert(rowset.rowset_id(), rowset);
    }

    pub fn get_querying_rowset(&self, rowset_id: &RowsetId) -> Option<Arc<Rowset>> {
        self.querying_rowsets
            .lock()
            .expect("querying rowsets lock")
            .get(rowset_id)
            .cloned()
    }

    pub fn evict_querying_rowset(&self, rowset_id: &RowsetId) {
        self.querying_rowsets
            .lock()
            .expect("querying rowsets lock")
            .remove(rowset_id);
    }

    // ---- transaction cleanup ----------------------------------------------

    /// Roll staged rowsets of an aborted transaction into the unused
    /// registry. Without explicit partition ids, all of the txn's partitions
    /// are cleared.
    pub fn clear_transaction_task(
        &self,
        transaction_id: TxnId,
        partition_ids: Option<Vec<PartitionId>>,
    ) {
        info!("begin to clear transaction task. transaction_id={}", transaction_id);
        let partition_ids = partition_ids
            .unwrap_or_else(|| self.txn_rowset_registry.get_partition_ids(transaction_id));

        for partition_id in partition_ids {
            let tablet_infos = self
                .txn_rowset_registry
                .get_txn_related_tablets(transaction_id, partition_id);
            for (tablet_info, _) in tablet_infos {
                // tablet uid must match so a recreated tablet is not touched
                let tablet = self.tablet_manager.get_tablet_with_uid(
                    tablet_info.tablet_id,
                    tablet_info.tablet_uid,
                    false,
                );
                if tablet.is_none() {
                    info!("tablet is no longer exist. tablet_info={}", tablet_info);
                    continue;
                }
                if let Some(rowset) =
                    self.txn_rowset_registry
                        .delete_txn(partition_id, &tablet_info, transaction_id)
                {
                    self.add_unused_rowset(rowset);
                }
            }
        }
        info!("finish to clear transaction task. transaction_id={}", transaction_id);
    }

    fn clean_unused_txns(&self) {
        for tablet_info in self.txn_rowset_registry.get_all_related_tablets() {
            let tablet = self.tablet_manager.get_tablet_with_uid(
                tablet_info.tablet_id,
                tablet_info.tablet_uid,
                true,
            );
            if tablet.is_none() {
                let rowsets = self.txn_rowset_registry.force_rollback_tablet_related_txns(
                    tablet_info.tablet_id,
                    tablet_info.tablet_uid,
                );
                for rowset in rowsets {
                    self.add_unused_rowset(rowset);
                }
            }
        }
    }

    // ---- trash / snapshot / meta sweeping ---------------------------------

    /// One sweep across all dirs; serialized by a try-lock so only one sweep
    /// runs at a time. Returns the max disk usage observed.
    pub fn start_trash_sweep(&self, ignore_guard: bool) -> Result<f64> {
        let _guard = match self.trash_sweep_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("trash and snapshot sweep is running");
                if ignore_guard {
                    self.need_clean_trash.store(true, Ordering::Relaxed);
                }
                return Ok(0.0);
            }
        };
        info!("start trash and snapshot sweep. is_clean={}", ignore_guard);

        let snapshot_expire = config::snapshot_expire_time_sec();
        let trash_expire = config::trash_file_expire_time_sec();
        // stay below flood stage with some headroom
        let guard_space = if ignore_guard {
            0.0
        } else {
            config::storage_flood_stage_usage_percent() as f64 / 100.0 * 0.9
        };

        let mut data_dir_infos = self.get_all_data_dir_info(false)?;
        data_dir_infos.sort_by_key(|info| info.available);
        let local_now = Local::now().timestamp();

        let mut tmp_usage: f64 = 0.0;
        for info in &data_dir_infos {
            info!("start to sweep path {}", info.path);
            if !info.is_used {
                continue;
            }
            let curr_usage =
                (info.disk_capacity - info.available) as f64 / info.disk_capacity.max(1) as f64;
            tmp_usage = tmp_usage.max(curr_usage);

            let snapshot_path = Path::new(&info.path).join(SNAPSHOT_PREFIX);
            if let Err(e) = trash::do_sweep(&snapshot_path, local_now, snapshot_expire) {
                warn!("failed to sweep snapshot. path={}, err={}", snapshot_path.display(), e);
            }

            let effective_trash_expire = if curr_usage > guard_space { 0 } else { trash_expire };
            let trash_path = Path::new(&info.path).join(TRASH_PREFIX);
            if let Err(e) = trash::do_sweep(&trash_path, local_now, effective_trash_expire) {
                warn!("failed to sweep trash. path={}, err={}", trash_path.display(), e);
            }
        }

        // clear expired incremental rowsets, move deleted tablets to trash
        if let Err(e) = self.tablet_manager.start_trash_sweep() {
            warn!("tablet manager trash sweep failed: {}", e);
        }

        self.clean_unused_txns();
        self.clean_unused_rowset_metas();
        self.clean_unused_binlog_metas();
        self.clean_unused_delete_bitmap();
        self.clean_unused_pending_publish_info();

        for dir in self.get_stores(false) {
            dir.update_trash_capacity();
        }

        Ok(tmp_usage)
    }

    /// Drop rowset meta records that no live tablet can ever use again.
    fn clean_unused_rowset_metas(&self) {
        for data_dir in self.get_stores(false) {
            let meta = data_dir.get_meta();
            let mut invalid = Vec::new();
            let traverse = RowsetMetaManager::traverse_rowset_metas(
                meta.as_ref(),
                &mut |tablet_uid, rowset_id, value| {
                    let rowset_meta = match RowsetMeta::from_json(value) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            warn!(
                                "parse rowset meta string failed for rowset_id: {}, err={}",
                                rowset_id, e
                            );
                            invalid.push((tablet_uid, rowset_id));
                            return true;
                        }
                    };
                    if rowset_meta.tablet_uid != tablet_uid {
                        warn!(
                            "tablet uid is not equal, skip the rowset. rowset_id={}, key uid={}, meta uid={}",
                            rowset_id, tablet_uid, rowset_meta.tablet_uid
                        );
                        invalid.push((tablet_uid, rowset_id));
                        return true;
                    }
                    let Some(tablet) = self.tablet_manager.get_tablet(rowset_meta.tablet_id) else {
                        info!(
                            "failed to find tablet {} for rowset {}, tablet may be dropped",
                            rowset_meta.tablet_id, rowset_id
                        );
                        invalid.push((tablet_uid, rowset_id));
                        return true;
                    };
                    if tablet.tablet_uid() != rowset_meta.tablet_uid {
                        // id reused by a recreated replica; the old meta stayed behind
                        warn!(
                            "rowset tablet uid {} does not equal tablet uid {}",
                            rowset_meta.tablet_uid,
                            tablet.tablet_uid()
                        );
                        invalid.push((tablet_uid, rowset_id));
                        return true;
                    }
                    if rowset_meta.state == RowsetState::Visible
                        && !tablet.rowset_meta_is_useful(&rowset_meta)
                    {
                        info!("rowset meta is not used any more, remove it. rowset_id={}", rowset_id);
                        invalid.push((tablet_uid, rowset_id));
                    }
                    true
                },
            );
            if let Err(e) = traverse {
                warn!("traverse rowset metas failed on {}: {}", data_dir.path_string(), e);
                continue;
            }
            let removed = invalid.len();
            for (tablet_uid, rowset_id) in invalid {
                let _ = RowsetMetaManager::remove(meta.as_ref(), tablet_uid, rowset_id);
            }
            info!(
                "remove {} invalid rowset meta from dir: {}",
                removed,
                data_dir.path_string()
            );
        }
    }

    fn clean_unused_binlog_metas(&self) {
        for data_dir in self.get_stores(false) {
            let meta = data_dir.get_meta();
            let mut unused_suffixes = Vec::new();
            let traverse =
                RowsetMetaManager::traverse_binlog_metas(meta.as_ref(), &mut |suffix, value| {
                    match serde_json::from_str::<BinlogMeta>(value) {
                        Err(e) => {
                            warn!("parse binlog meta failed for key {}: {}", suffix, e);
                        }
                        Ok(binlog_meta) => {
                            if self.tablet_manager.get_tablet(binlog_meta.tablet_id).is_none() {
                                info!(
                                    "failed to find tablet {} for binlog rowset {}, tablet may be dropped",
                                    binlog_meta.tablet_id, binlog_meta.rowset_id
                                );
                                unused_suffixes.push(suffix.to_string());
                            }
                        }
                    }
                    true
                });
            if let Err(e) = traverse {
                warn!("traverse binlog metas failed on {}: {}", data_dir.path_string(), e);
                continue;
            }
            let removed = unused_suffixes.len();
            for suffix in unused_suffixes {
                let _ = RowsetMetaManager::remove_binlog(meta.as_ref(), &suffix);
            }
            info!(
                "remove {} invalid binlog meta from dir: {}",
                removed,
                data_dir.path_string()
            );
        }
    }

    fn clean_unused_delete_bitmap(&self) {
        for data_dir in self.get_stores(false) {
            let meta = data_dir.get_meta();
            let mut removed_tablets = HashSet::new();
            let traverse =
                TabletMetaManager::traverse_delete_bitmap(meta.as_ref(), &mut |tablet_id, _, _| {
                    if self.tablet_manager.get_tablet(tablet_id).is_none()
                        && removed_tablets.insert(tablet_id)
                    {
                        info!("clean unused delete bitmap for deleted tablet, tablet_id: {}", tablet_id);
                    }
                    true
                });
            if let Err(e) = traverse {
                warn!("traverse delete bitmap failed on {}: {}", data_dir.path_string(), e);
                continue;
            }
            // one full wipe per removed tablet id
            for tablet_id in &removed_tablets {
                let _ = TabletMetaManager::remove_old_version_delete_bitmap(
                    meta.as_ref(),
                    *tablet_id,
                    i64::MAX,
                );
            }
            info!(
                "removed invalid delete bitmap from dir: {}, deleted tablets size: {}",
                data_dir.path_string(),
                removed_tablets.len()
            );
        }
    }

    fn clean_unused_pending_publish_info(&self) {
        for data_dir in self.get_stores(false) {
            let meta = data_dir.get_meta();
            let mut removed_infos = Vec::new();
            let traverse = TabletMetaManager::traverse_pending_publish(
                meta.as_ref(),
                &mut |tablet_id, version, _| {
                    if self.tablet_manager.get_tablet(tablet_id).is_none() {
                        removed_infos.push((tablet_id, version));
                    }
                    true
                },
            );
            if let Err(e) = traverse {
                warn!("traverse pending publish failed on {}: {}", data_dir.path_string(), e);
                continue;
            }
            let removed = removed_infos.len();
            for (tablet_id, version) in removed_infos {
                let _ =
                    TabletMetaManager::remove_pending_publish_info(meta.as_ref(), tablet_id, version);
            }
            info!(
                "removed invalid pending publish info from dir: {}, size: {}",
                data_dir.path_string(),
                removed
            );
        }
    }

    pub fn gc_binlogs(&self, gc_tablet_infos: &HashMap<TabletId, i64>) {
        for (&tablet_id, &version) in gc_tablet_infos {
            info!("start to gc binlogs for tablet_id: {}, version: {}", tablet_id, version);
            match self.tablet_manager.get_tablet(tablet_id) {
                Some(tablet) => tablet.gc_binlogs(version),
                None => warn!("tablet_id: {} not found", tablet_id),
            }
        }
    }

    // ---- disk health ------------------------------------------------------

    fn start_disk_stat_monitor(&self) {
        let dirs = self.get_stores(true);
        for dir in &dirs {
            let was_used = dir.is_used();
            dir.health_check();
            if was_used && !dir.is_used() {
                self.add_broken_path(dir.path_string().to_string());
            }
        }

        self.update_storage_medium_type_count();
        self.exit_if_too_many_disks_are_failed();
    }

    fn exit_if_too_many_disks_are_failed(&self) {
        let (unused_num, total_num) = {
            let stores = self.stores.lock().expect("store lock");
            if stores.map.is_empty() {
                return;
            }
            let total = stores.map.len() as u32;
            let unused = stores.map.values().filter(|dir| !dir.is_used()).count() as u32;
            (unused, total)
        };

        if too_many_disks_are_failed(unused_num, total_num) {
            warn!(
                "meet too many error disks, process exit. max_ratio_allowed={}%, error_disk_count={}, total_disk_count={}",
                config::max_percentage_of_error_disk(),
                unused_num,
                total_num
            );
            // deliberate status 0: operational fail-fast, not a crash
            std::process::exit(0);
        }
    }

    pub fn add_broken_path(&self, path: String) -> bool {
        let mut broken_paths = self.broken_paths.lock().expect("broken paths lock");
        let inserted = broken_paths.insert(path);
        if inserted {
            Self::persist_broken_paths(&broken_paths);
        }
        inserted
    }

    pub fn remove_broken_path(&self, path: &str) -> bool {
        let mut broken_paths = self.broken_paths.lock().expect("broken paths lock");
        let removed = broken_paths.remove(path);
        if removed {
            Self::persist_broken_paths(&broken_paths);
        }
        removed
    }

    fn persist_broken_paths(broken_paths: &HashSet<String>) {
        let mut value = String::new();
        for path in broken_paths {
            value.push_str(path);
            value.push(';');
        }
        if !value.is_empty() {
            if let Err(e) = app_config::persist_custom_config("broken_storage_path", &value) {
                warn!("persist broken_storage_path failed: {e:#}");
            } else {
                info!("persist broken_storage_path {}", value);
            }
        }
    }

    // ---- peer replicas ----------------------------------------------------

    pub fn update_peer_replica_infos(&self, infos: HashMap<TabletId, ReplicaInfo>, token: String) {
        *self.peer_replica_infos.lock().expect("peer replica infos lock") = infos;
        *self.peer_replica_token.lock().expect("peer replica token lock") = token;
    }

    /// A peer replica usable for single-replica compaction fetch, if one is
    /// known and it is not ourselves.
    pub fn get_peer_replica_info(
        &self,
        tablet_id: TabletId,
        own_replica_id: ReplicaId,
    ) -> Option<(ReplicaInfo, String)> {
        if self.tablet_manager.get_tablet(tablet_id).is_none() {
            warn!("tablet is no longer exist: tablet_id={}", tablet_id);
            return None;
        }
        let infos = self.peer_replica_infos.lock().expect("peer replica infos lock");
        let info = infos.get(&tablet_id)?;
        if info.replica_id == own_replica_id {
            return None;
        }
        let token = self.peer_replica_token.lock().expect("peer replica token lock");
        Some((info.clone(), token.clone()))
    }

    pub fn should_fetch_from_peer(&self, tablet_id: TabletId, own_replica_id: ReplicaId) -> bool {
        if self.tablet_manager.get_tablet(tablet_id).is_none() {
            warn!("tablet is no longer exist: tablet_id={}", tablet_id);
            return false;
        }
        let infos = self.peer_replica_infos.lock().expect("peer replica infos lock");
        infos
            .get(&tablet_id)
            .is_some_and(|info| info.replica_id != own_replica_id)
    }

    // ---- report listeners -------------------------------------------------

    pub fn register_report_listener(&self, listener: Arc<dyn ReportListener>) {
        let mut listeners = self.report_listeners.lock().expect("report listeners lock");
        if listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return;
        }
        listeners.push(listener);
    }

    pub fn deregister_report_listener(&self, listener: &Arc<dyn ReportListener>) {
        let mut listeners = self.report_listeners.lock().expect("report listeners lock");
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn notify_listeners(&self) {
        let listeners = self.report_listeners.lock().expect("report listeners lock");
        for listener in listeners.iter() {
            listener.notify();
        }
    }

    pub fn notify_listener(&self, name: &str) -> bool {
        let listeners = self.report_listeners.lock().expect("report listeners lock");
        let mut found = false;
        for listener in listeners.iter() {
            if listener.name() == name {
                listener.notify();
                found = true;
            }
        }
        found
    }

    // ---- compaction scheduling --------------------------------------------

    fn submitted_compaction_map(
        &self,
        compaction_type: CompactionType,
    ) -> &Mutex<HashMap<String, HashSet<TabletId>>> {
        match compaction_type {
            CompactionType::Base => &self.tablet_submitted_base_compaction,
            CompactionType::Cumulative => &self.tablet_submitted_cumu_compaction,
        }
    }

    fn increase_low_priority_task_nums(&self, dir: &str) -> bool {
        if !config::enable_compaction_priority_scheduling() {
            return true;
        }
        let mut task_nums = self.low_priority_task_nums.lock().expect("low priority task lock");
        let count = task_nums.entry(dir.to_string()).or_insert(0);
        if *count < config::low_priority_compaction_task_num_per_disk() {
            *count += 1;
            return true;
        }
        false
    }

    fn decrease_low_priority_task_nums(&self, dir: &str) {
        if config::enable_compaction_priority_scheduling() {
            let mut task_nums = self.low_priority_task_nums.lock().expect("low priority task lock");
            if let Some(count) = task_nums.get_mut(dir) {
                *count -= 1;
            }
        }
    }

    /// Submit one compaction execution for a tablet. Returns false when the
    /// tablet already has a task of this type in flight on its disk, or the
    /// low-priority budget of the disk is spent.
    pub fn submit_compaction_task(
        self: &Arc<Self>,
        data_dir: &Arc<DataDir>,
        tablet_id: TabletId,
        compaction_type: CompactionType,
        is_low_priority: bool,
        task: Box<dyn FnOnce() + Send + 'static>,
    ) -> bool {
        let dir_path = data_dir.path_string().to_string();
        {
            let mut submitted = self
                .submitted_compaction_map(compaction_type)
                .lock()
                .expect("submitted compaction lock");
            if !submitted.entry(dir_path.clone()).or_default().insert(tablet_id) {
                return false;
            }
        }
        if is_low_priority && !self.increase_low_priority_task_nums(&dir_path) {
            let mut submitted = self
                .submitted_compaction_map(compaction_type)
                .lock()
                .expect("submitted compaction lock");
            if let Some(set) = submitted.get_mut(&dir_path) {
                set.remove(&tablet_id);
            }
            return false;
        }

        let engine = Arc::clone(self);
        let pool = match compaction_type {
            CompactionType::Base => &self.base_compaction_pool,
            CompactionType::Cumulative => &self.cumu_compaction_pool,
        };
        pool.execute(move || {
            task();
            {
                let mut submitted = engine
                    .submitted_compaction_map(compaction_type)
                    .lock()
                    .expect("submitted compaction lock");
                if let Some(set) = submitted.get_mut(&dir_path) {
                    set.remove(&tablet_id);
                }
            }
            if is_low_priority {
                engine.decrease_low_priority_task_nums(&dir_path);
            }
        });
        true
    }

    /// `{"BaseCompaction": {"/disk1": [10001]}, "CumulativeCompaction": {...}}`
    pub fn get_compaction_status_json(&self) -> Result<String> {
        let render = |map: &Mutex<HashMap<String, HashSet<TabletId>>>| {
            let map = map.lock().expect("submitted compaction lock");
            let mut doc = serde_json::Map::new();
            for (dir, tablet_ids) in map.iter() {
                let mut ids: Vec<TabletId> = tablet_ids.iter().copied().collect();
                ids.sort_unstable();
                doc.insert(
                    dir.clone(),
                    serde_json::Value::Array(
                        ids.into_iter().map(|id| id.to_string().into()).collect(),
                    ),
                );
            }
            serde_json::Value::Object(doc)
        };

        let root = serde_json::json!({
            "CumulativeCompaction": render(&self.tablet_submitted_cumu_compaction),
            "BaseCompaction": render(&self.tablet_submitted_base_compaction),
        });
        serde_json::to_string_pretty(&root)
            .map_err(|e| EngineError::Internal(format!("render compaction status: {}", e)))
    }

    // ---- background daemons -----------------------------------------------

    pub fn start_background_threads(self: &Arc<Self>) {
        let mut threads = self.bg_threads.lock().expect("bg threads lock");

        let engine = Arc::clone(self);
        threads.push(
            std::thread::Builder::new()
                .name("unused_rowset_monitor".to_string())
                .spawn(move || {
                    let interval = Duration::from_secs(config::unused_rowset_monitor_interval_sec());
                    while !engine.stop_background_threads_latch.wait_timeout(interval) {
                        engine.start_delete_unused_rowset();
                    }
                })
                .expect("spawn unused_rowset_monitor"),
        );

        let engine = Arc::clone(self);
        threads.push(
            std::thread::Builder::new()
                .name("garbage_sweeper".to_string())
                .spawn(move || {
                    let min_interval = config::min_garbage_sweep_interval_sec().max(1);
                    let max_interval = config::max_garbage_sweep_interval_sec().max(min_interval);
                    let mut curr_interval = max_interval;
                    loop {
                        let ignore_guard = engine.need_clean_trash.swap(false, Ordering::Relaxed);
                        if engine
                            .stop_background_threads_latch
                            .wait_timeout(Duration::from_secs(if ignore_guard {
                                0
                            } else {
                                curr_interval
                            }))
                        {
                            break;
                        }
                        let usage = match engine.start_trash_sweep(ignore_guard) {
                            Ok(usage) => usage,
                            Err(e) => {
                                warn!("trash sweep failed: {}", e);
                                continue;
                            }
                        };
                        // the fuller the disks, the more eager the sweep
                        let pressure = ((1.0 - usage).max(0.0) * max_interval as f64) as u64;
                        curr_interval = pressure.clamp(min_interval, max_interval);
                    }
                })
                .expect("spawn garbage_sweeper"),
        );

        let engine = Arc::clone(self);
        threads.push(
            std::thread::Builder::new()
                .name("disk_stat_monitor".to_string())
                .spawn(move || {
                    let interval = Duration::from_secs(config::disk_stat_monitor_interval_sec());
                    while !engine.stop_background_threads_latch.wait_timeout(interval) {
                        engine.start_disk_stat_monitor();
                    }
                })
                .expect("spawn disk_stat_monitor"),
        );

        info!("storage engine background threads started");
    }

    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            warn!("storage engine is stopped twice");
            return;
        }
        // wake the waiting report workers first
        self.notify_listeners();

        self.stop_background_threads_latch.count_down();
        let threads = {
            let mut threads = self.bg_threads.lock().expect("bg threads lock");
            std::mem::take(&mut *threads)
        };
        for thread in threads {
            let _ = thread.join();
        }

        self.base_compaction_pool.join();
        self.cumu_compaction_pool.join();
        info!("storage engine is stopped");
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        if !self.stopped.load(Ordering::Acquire) {
            self.stop();
        }
    }
}
