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
use std::ffi::CString;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::common::config;
use crate::common::ids::BackendUid;
use crate::common::status::{EngineError, Result};
use crate::common::util;
use crate::novastore_logging::{info, warn};
use crate::storage::meta::{LocalMetaStore, MetaStore};

pub const DATA_PREFIX: &str = "data";
pub const SNAPSHOT_PREFIX: &str = "snapshot";
pub const TRASH_PREFIX: &str = "trash";
const META_PREFIX: &str = "meta";
const CLUSTER_ID_FILE: &str = "cluster_id";
const HEALTH_CHECK_FILE: &str = ".health_check";
const SHARD_COUNTER_KEY: &str = "next_shard";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum StorageMedium {
    Hdd,
    Ssd,
    Remote,
}

impl fmt::Display for StorageMedium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StorageMedium::Hdd => "HDD",
            StorageMedium::Ssd => "SSD",
            StorageMedium::Remote => "REMOTE",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for StorageMedium {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HDD" => Ok(StorageMedium::Hdd),
            "SSD" => Ok(StorageMedium::Ssd),
            "REMOTE" => Ok(StorageMedium::Remote),
            other => Err(format!("unknown storage medium '{}'", other)),
        }
    }
}

/// Point-in-time stats of one storage root.
#[derive(Clone, Debug)]
pub struct DataDirInfo {
    pub path: String,
    pub path_hash: i64,
    pub disk_capacity: i64,
    pub available: i64,
    pub local_used_capacity: i64,
    pub remote_used_capacity: i64,
    pub trash_used_capacity: i64,
    pub is_used: bool,
    pub storage_medium: StorageMedium,
}

fn hash_path(path: &str) -> i64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish() as i64
}

fn statvfs_capacity(path: &str) -> Option<(u64, u64)> {
    let c_path = CString::new(path).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    let block_size = stat.f_frsize as u64;
    let total = stat.f_blocks as u64 * block_size;
    let available = stat.f_bavail as u64 * block_size;
    Some((total, available))
}

/// One physical storage root owned by the engine.
pub struct DataDir {
    path: PathBuf,
    path_str: String,
    path_hash: i64,
    medium: StorageMedium,
    /// Configured ceiling; -1 means use the whole disk.
    configured_capacity_bytes: i64,

    disk_capacity_bytes: AtomicI64,
    available_bytes: AtomicI64,
    local_used_bytes: AtomicI64,
    remote_used_bytes: AtomicI64,
    trash_used_bytes: AtomicI64,

    is_used: AtomicBool,
    cluster_id: AtomicI32,
    cluster_id_incomplete: AtomicBool,
    next_shard: AtomicU64,
    meta: OnceLock<Arc<dyn MetaStore>>,
}

impl DataDir {
    pub fn new(path: impl Into<PathBuf>, capacity_bytes: i64, medium: StorageMedium) -> Self {
        let path = path.into();
        let path_str = path.to_string_lossy().into_owned();
        let path_hash = hash_path(&path_str);
        Self {
            path,
            path_str,
            path_hash,
            medium,
            configured_capacity_bytes: capacity_bytes,
            disk_capacity_bytes: AtomicI64::new(1),
            available_bytes: AtomicI64::new(0),
            local_used_bytes: AtomicI64::new(0),
            remote_used_bytes: AtomicI64::new(0),
            trash_used_bytes: AtomicI64::new(0),
            is_used: AtomicBool::new(false),
            cluster_id: AtomicI32::new(-1),
            cluster_id_incomplete: AtomicBool::new(false),
            next_shard: AtomicU64::new(0),
            meta: OnceLock::new(),
        }
    }

    /// Bring the root online: conventional subdirectories, local meta store,
    /// cluster-id file. Failure here fails engine startup.
    pub fn init(&self) -> Result<()> {
        if !self.path.exists() {
            return Err(EngineError::InvalidRootPath(format!(
                "store path does not exist: {}",
                self.path_str
            )));
        }
        for sub in [DATA_PREFIX, SNAPSHOT_PREFIX, TRASH_PREFIX] {
            std::fs::create_dir_all(self.path.join(sub))?;
        }

        let meta: Arc<dyn MetaStore> = Arc::new(LocalMetaStore::open(&self.path.join(META_PREFIX))?);
        let _ = self.meta.set(meta);

        self.read_cluster_id_file()?;
        self.restore_shard_counter()?;
        self.update_capacity()?;
        self.is_used.store(true, Ordering::Release);
        info!(
            "data dir is ready. path={}, medium={}, cluster_id={}",
            self.path_str,
            self.medium,
            self.cluster_id()
        );
        Ok(())
    }

    /// Replay persisted state after init; runs in parallel across dirs.
    pub fn load(&self) -> Result<()> {
        // Shards already created on disk must keep their numbering even if
        // the persisted counter was lost.
        let data_root = self.path.join(DATA_PREFIX);
        let mut max_shard = None;
        for entry in std::fs::read_dir(&data_root)? {
            let entry = entry?;
            if let Ok(shard) = entry.file_name().to_string_lossy().parse::<u64>() {
                max_shard = Some(max_shard.map_or(shard, |m: u64| m.max(shard)));
            }
        }
        if let Some(max_shard) = max_shard {
            let floor = max_shard + 1;
            if self.next_shard.load(Ordering::Acquire) < floor {
                self.next_shard.store(floor, Ordering::Release);
            }
        }
        Ok(())
    }

    fn read_cluster_id_file(&self) -> Result<()> {
        let file = self.path.join(CLUSTER_ID_FILE);
        match std::fs::read_to_string(&file) {
            Ok(content) => {
                let trimmed = content.trim();
                if trimmed.is_empty() {
                    self.cluster_id_incomplete.store(true, Ordering::Release);
                    return Ok(());
                }
                let id: i32 = trimmed.parse().map_err(|_| {
                    EngineError::Corruption(format!(
                        "cluster id file {} is corrupt: '{}'",
                        file.display(),
                        trimmed
                    ))
                })?;
                self.cluster_id.store(id, Ordering::Release);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.cluster_id_incomplete.store(true, Ordering::Release);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    pub fn set_cluster_id(&self, cluster_id: i32) -> Result<()> {
        let file = self.path.join(CLUSTER_ID_FILE);
        let tmp = self.path.join(format!("{}.tmp", CLUSTER_ID_FILE));
        std::fs::write(&tmp, format!("{}", cluster_id))?;
        std::fs::rename(&tmp, &file)?;
        self.cluster_id.store(cluster_id, Ordering::Release);
        self.cluster_id_incomplete.store(false, Ordering::Release);
        Ok(())
    }

    pub fn cluster_id(&self) -> i32 {
        self.cluster_id.load(Ordering::Acquire)
    }

    pub fn cluster_id_incomplete(&self) -> bool {
        self.cluster_id_incomplete.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn path_string(&self) -> &str {
        &self.path_str
    }

    pub fn path_hash(&self) -> i64 {
        self.path_hash
    }

    pub fn storage_medium(&self) -> StorageMedium {
        self.medium
    }

    pub fn is_used(&self) -> bool {
        self.is_used.load(Ordering::Acquire)
    }

    pub fn get_meta(&self) -> Arc<dyn MetaStore> {
        Arc::clone(self.meta.get().expect("data dir not initialized"))
    }

    /// Write-read-delete a probe file. A dir that fails the probe is BROKEN
    /// and leaves placement until the operator intervenes.
    pub fn health_check(&self) {
        let probe = self.path.join(HEALTH_CHECK_FILE);
        let verdict = (|| -> Result<()> {
            std::fs::write(&probe, b"ok")?;
            let read_back = std::fs::read(&probe)?;
            if read_back != b"ok" {
                return Err(EngineError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "health probe read mismatch",
                )));
            }
            std::fs::remove_file(&probe)?;
            Ok(())
        })();
        if let Err(e) = verdict {
            warn!("health check failed, mark dir broken. path={}, err={}", self.path_str, e);
            self.is_used.store(false, Ordering::Release);
        }
    }

    pub fn update_capacity(&self) -> Result<()> {
        let Some((total, available)) = statvfs_capacity(&self.path_str) else {
            return Err(EngineError::Os(format!(
                "statvfs failed for path {}",
                self.path_str
            )));
        };
        let mut capacity = total as i64;
        if self.configured_capacity_bytes > 0 {
            capacity = capacity.min(self.configured_capacity_bytes);
        }
        self.disk_capacity_bytes.store(capacity, Ordering::Release);
        self.available_bytes.store(available as i64, Ordering::Release);
        Ok(())
    }

    pub fn update_trash_capacity(&self) {
        let used = util::file_or_directory_size(&self.path.join(TRASH_PREFIX));
        self.trash_used_bytes.store(used as i64, Ordering::Release);
    }

    pub fn update_local_data_size(&self, size: i64) {
        self.local_used_bytes.store(size, Ordering::Release);
    }

    pub fn update_remote_data_size(&self, size: i64) {
        self.remote_used_bytes.store(size, Ordering::Release);
    }

    /// Usage fraction assuming `incoming_bytes` more data lands here.
    pub fn get_usage(&self, incoming_bytes: i64) -> f64 {
        let capacity = self.disk_capacity_bytes.load(Ordering::Acquire);
        let available = self.available_bytes.load(Ordering::Acquire);
        if capacity <= 0 {
            return 0.0;
        }
        (capacity - available + incoming_bytes) as f64 / capacity as f64
    }

    pub fn reach_capacity_limit(&self, incoming_bytes: i64) -> bool {
        let usage = self.get_usage(incoming_bytes);
        let flood_stage = config::storage_flood_stage_usage_percent() as f64 / 100.0;
        if usage >= flood_stage {
            warn!(
                "reach capacity limit. path={}, usage={:.3}, incoming={}",
                self.path_str, usage, incoming_bytes
            );
            return true;
        }
        false
    }

    /// Allocate the next data shard and make sure its directory exists.
    pub fn get_shard(&self) -> Result<u64> {
        let shard = self.next_shard.fetch_add(1, Ordering::AcqRel);
        std::fs::create_dir_all(self.path.join(DATA_PREFIX).join(shard.to_string()))?;
        self.persist_shard_counter()?;
        Ok(shard)
    }

    fn restore_shard_counter(&self) -> Result<()> {
        if let Some(value) = self.get_meta().get(SHARD_COUNTER_KEY)? {
            if let Ok(next) = value.parse::<u64>() {
                self.next_shard.store(next, Ordering::Release);
            }
        }
        Ok(())
    }

    fn persist_shard_counter(&self) -> Result<()> {
        let next = self.next_shard.load(Ordering::Acquire);
        self.get_meta().put(SHARD_COUNTER_KEY, &next.to_string())
    }

    pub fn get_dir_info(&self) -> DataDirInfo {
        DataDirInfo {
            path: self.path_str.clone(),
            path_hash: self.path_hash,
            disk_capacity: self.disk_capacity_bytes.load(Ordering::Acquire),
            available: self.available_bytes.load(Ordering::Acquire),
            local_used_capacity: self.local_used_bytes.load(Ordering::Acquire),
            remote_used_capacity: self.remote_used_bytes.load(Ordering::Acquire),
            trash_used_capacity: self.trash_used_bytes.load(Ordering::Acquire),
            is_used: self.is_used(),
            storage_medium: self.medium,
        }
    }
}

/// Per-process backend UID, persisted under the first store root so that
/// rowset ids stay unique across restarts of the same node.
pub fn load_or_create_backend_uid(root: &Path) -> Result<BackendUid> {
    let file = root.join("backend_uid");
    if let Ok(content) = std::fs::read_to_string(&file) {
        if let Some((hi, lo)) = content.trim().split_once(' ') {
            if let (Ok(hi), Ok(lo)) = (hi.parse(), lo.parse()) {
                return Ok(BackendUid { hi, lo });
            }
        }
        return Err(EngineError::Corruption(format!(
            "backend uid file {} is corrupt",
            file.display()
        )));
    }
    let uid = BackendUid {
        hi: util::unix_millis(),
        lo: std::process::id() as i64,
    };
    std::fs::write(&file, format!("{} {}", uid.hi, uid.lo))?;
    Ok(uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_dir(root: &Path) -> DataDir {
        DataDir::new(root, -1, StorageMedium::Hdd)
    }

    #[test]
    fn init_creates_conventional_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = new_dir(tmp.path());
        dir.init().unwrap();
        assert!(tmp.path().join("data").is_dir());
        assert!(tmp.path().join("trash").is_dir());
        assert!(tmp.path().join("snapshot").is_dir());
        assert!(dir.is_used());
        assert_eq!(dir.cluster_id(), -1);
        assert!(dir.cluster_id_incomplete());
    }

    #[test]
    fn cluster_id_file_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let dir = new_dir(tmp.path());
            dir.init().unwrap();
            dir.set_cluster_id(42).unwrap();
            assert!(!dir.cluster_id_incomplete());
        }
        let dir = new_dir(tmp.path());
        dir.init().unwrap();
        assert_eq!(dir.cluster_id(), 42);
        assert!(!dir.cluster_id_incomplete());
    }

    #[test]
    fn corrupt_cluster_id_file_fails_init() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("cluster_id"), "not-a-number").unwrap();
        let dir = new_dir(tmp.path());
        assert!(matches!(dir.init(), Err(EngineError::Corruption(_))));
    }

    #[test]
    fn shard_counter_survives_reload() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let dir = new_dir(tmp.path());
            dir.init().unwrap();
            assert_eq!(dir.get_shard().unwrap(), 0);
            assert_eq!(dir.get_shard().unwrap(), 1);
        }
        let dir = new_dir(tmp.path());
        dir.init().unwrap();
        dir.load().unwrap();
        assert_eq!(dir.get_shard().unwrap(), 2);
    }

    #[test]
    fn health_check_passes_on_writable_root() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = new_dir(tmp.path());
        dir.init().unwrap();
        dir.health_check();
        assert!(dir.is_used());
    }

    #[test]
    fn missing_root_fails_init() {
        let dir = new_dir(Path::new("/definitely/not/here"));
        assert!(matches!(dir.init(), Err(EngineError::InvalidRootPath(_))));
    }

    #[test]
    fn backend_uid_is_stable_across_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let first = load_or_create_backend_uid(tmp.path()).unwrap();
        let second = load_or_create_backend_uid(tmp.path()).unwrap();
        assert_eq!(first, second);
    }
}
