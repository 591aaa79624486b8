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
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::common::ids::{TabletId, TabletUid, Version};
use crate::common::status::{EngineError, Result};
use crate::novastore_logging::warn;
use crate::storage::rowset::{RowsetId, RowsetMeta};

pub const ROWSET_META_PREFIX: &str = "rst_";
pub const BINLOG_META_PREFIX: &str = "blm_";
pub const DELETE_BITMAP_PREFIX: &str = "dlb_";
pub const PENDING_PUBLISH_PREFIX: &str = "ppi_";

/// Per-DataDir key-value store for small metadata records. Values are JSON
/// text. Traversal visits keys with a prefix in lexicographic order; the
/// visitor returns false to stop early.
pub trait MetaStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn traverse_prefix(
        &self,
        prefix: &str,
        visit: &mut dyn FnMut(&str, &str) -> bool,
    ) -> Result<()>;
}

/// In-memory store for tests and transient setups.
#[derive(Default)]
pub struct MemMetaStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetaStore for MemMetaStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().expect("meta store lock").get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .expect("meta store lock")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().expect("meta store lock").remove(key);
        Ok(())
    }

    fn traverse_prefix(
        &self,
        prefix: &str,
        visit: &mut dyn FnMut(&str, &str) -> bool,
    ) -> Result<()> {
        let entries = self.entries.lock().expect("meta store lock");
        for (key, value) in entries.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            if !visit(key, value) {
                break;
            }
        }
        Ok(())
    }
}

/// Write-through store persisted as one JSON document under `<dir>/meta.json`.
/// Good enough for header-sized records; large payloads live in data files.
pub struct LocalMetaStore {
    file_path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl LocalMetaStore {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let file_path = dir.join("meta.json");
        let entries = match std::fs::read_to_string(&file_path) {
            Ok(s) if !s.trim().is_empty() => serde_json::from_str(&s).map_err(|e| {
                EngineError::Corruption(format!(
                    "meta store {} is not readable: {}",
                    file_path.display(),
                    e
                ))
            })?,
            _ => BTreeMap::new(),
        };
        Ok(Self {
            file_path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let rendered = serde_json::to_string(entries)
            .map_err(|e| EngineError::Internal(format!("serialize meta store: {}", e)))?;
        let tmp = self.file_path.with_extension("json.tmp");
        std::fs::write(&tmp, rendered)?;
        std::fs::rename(&tmp, &self.file_path)?;
        Ok(())
    }
}

impl MetaStore for LocalMetaStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().expect("meta store lock").get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("meta store lock");
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("meta store lock");
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn traverse_prefix(
        &self,
        prefix: &str,
        visit: &mut dyn FnMut(&str, &str) -> bool,
    ) -> Result<()> {
        // Clone the range so the visitor may call back into the store.
        let snapshot: Vec<(String, String)> = {
            let entries = self.entries.lock().expect("meta store lock");
            entries
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        for (key, value) in snapshot {
            if !visit(&key, &value) {
                break;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BinlogMeta {
    pub tablet_id: TabletId,
    pub rowset_id: RowsetId,
    pub version: Version,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingPublishInfo {
    pub transaction_id: i64,
    pub partition_id: i64,
}

/// Key-encoding façade for rowset and binlog meta records.
pub struct RowsetMetaManager;

impl RowsetMetaManager {
    fn rowset_key(tablet_uid: TabletUid, rowset_id: RowsetId) -> String {
        format!("{}{}_{}", ROWSET_META_PREFIX, tablet_uid, rowset_id)
    }

    fn binlog_key(tablet_uid: TabletUid, rowset_id: RowsetId) -> String {
        format!("{}{}_{}", BINLOG_META_PREFIX, tablet_uid, rowset_id)
    }

    pub fn save(meta: &dyn MetaStore, rowset_meta: &RowsetMeta) -> Result<()> {
        let value = rowset_meta
            .to_json()
            .map_err(|e| EngineError::Internal(format!("serialize rowset meta: {}", e)))?;
        meta.put(
            &Self::rowset_key(rowset_meta.tablet_uid, rowset_meta.rowset_id),
            &value,
        )
    }

    pub fn get(
        meta: &dyn MetaStore,
        tablet_uid: TabletUid,
        rowset_id: RowsetId,
    ) -> Result<Option<RowsetMeta>> {
        let Some(value) = meta.get(&Self::rowset_key(tablet_uid, rowset_id))? else {
            return Ok(None);
        };
        let parsed = RowsetMeta::from_json(&value)
            .map_err(|e| EngineError::Corruption(format!("parse rowset meta: {}", e)))?;
        Ok(Some(parsed))
    }

    pub fn remove(meta: &dyn MetaStore, tablet_uid: TabletUid, rowset_id: RowsetId) -> Result<()> {
        meta.remove(&Self::rowset_key(tablet_uid, rowset_id))
    }

    /// Visit every rowset meta record. The tablet uid and rowset id are
    /// decoded from the key so the visitor can cross-check them against the
    /// (possibly corrupt) value.
    pub fn traverse_rowset_metas(
        meta: &dyn MetaStore,
        visit: &mut dyn FnMut(TabletUid, RowsetId, &str) -> bool,
    ) -> Result<()> {
        meta.traverse_prefix(ROWSET_META_PREFIX, &mut |key, value| {
            let suffix = &key[ROWSET_META_PREFIX.len()..];
            let Some((uid_str, rowset_str)) = suffix.rsplit_once('_') else {
                warn!("malformed rowset meta key: {}", key);
                return true;
            };
            let (Ok(tablet_uid), Ok(rowset_id)) =
                (TabletUid::from_str(uid_str), RowsetId::from_str(rowset_str))
            else {
                warn!("malformed rowset meta key: {}", key);
                return true;
            };
            visit(tablet_uid, rowset_id, value)
        })
    }

    pub fn save_binlog(
        meta: &dyn MetaStore,
        tablet_uid: TabletUid,
        binlog_meta: &BinlogMeta,
    ) -> Result<()> {
        let value = serde_json::to_string(binlog_meta)
            .map_err(|e| EngineError::Internal(format!("serialize binlog meta: {}", e)))?;
        meta.put(&Self::binlog_key(tablet_uid, binlog_meta.rowset_id), &value)
    }

    /// Visit every binlog meta record with its key suffix (the part after the
    /// prefix) and raw value.
    pub fn traverse_binlog_metas(
        meta: &dyn MetaStore,
        visit: &mut dyn FnMut(&str, &str) -> bool,
    ) -> Result<()> {
        meta.traverse_prefix(BINLOG_META_PREFIX, &mut |key, value| {
            visit(&key[BINLOG_META_PREFIX.len()..], value)
        })
    }

    pub fn remove_binlog(meta: &dyn MetaStore, key_suffix: &str) -> Result<()> {
        meta.remove(&format!("{}{}", BINLOG_META_PREFIX, key_suffix))
    }
}

/// Key-encoding façade for tablet-scoped records: delete bitmaps and
/// pending publish infos. Keys embed zero-padded ids so lexicographic order
/// matches numeric order.
pub struct TabletMetaManager;

impl TabletMetaManager {
    fn delete_bitmap_key(tablet_id: TabletId, version: Version) -> String {
        format!("{}{:020}_{:020}", DELETE_BITMAP_PREFIX, tablet_id, version)
    }

    fn pending_publish_key(tablet_id: TabletId, version: Version) -> String {
        format!("{}{:020}_{:020}", PENDING_PUBLISH_PREFIX, tablet_id, version)
    }

    fn decode_id_version(suffix: &str) -> Option<(TabletId, Version)> {
        let (id_str, version_str) = suffix.split_once('_')?;
        Some((id_str.parse().ok()?, version_str.parse().ok()?))
    }

    pub fn save_delete_bitmap(
        meta: &dyn MetaStore,
        tablet_id: TabletId,
        version: Version,
        value: &str,
    ) -> Result<()> {
        meta.put(&Self::delete_bitmap_key(tablet_id, version), value)
    }

    pub fn traverse_delete_bitmap(
        meta: &dyn MetaStore,
        visit: &mut dyn FnMut(TabletId, Version, &str) -> bool,
    ) -> Result<()> {
        meta.traverse_prefix(DELETE_BITMAP_PREFIX, &mut |key, value| {
            match Self::decode_id_version(&key[DELETE_BITMAP_PREFIX.len()..]) {
                Some((tablet_id, version)) => visit(tablet_id, version, value),
                None => {
                    warn!("malformed delete bitmap key: {}", key);
                    true
                }
            }
        })
    }

    /// Remove every delete-bitmap record of `tablet_id` whose version is at
    /// most `max_version`. `i64::MAX` wipes the tablet entirely.
    pub fn remove_old_version_delete_bitmap(
        meta: &dyn MetaStore,
        tablet_id: TabletId,
        max_version: Version,
    ) -> Result<()> {
        let prefix = format!("{}{:020}_", DELETE_BITMAP_PREFIX, tablet_id);
        let mut stale_keys = Vec::new();
        meta.traverse_prefix(&prefix, &mut |key, _| {
            if let Some((_, version)) = Self::decode_id_version(&key[DELETE_BITMAP_PREFIX.len()..])
            {
                if version <= max_version {
                    stale_keys.push(key.to_string());
                }
            }
            true
        })?;
        for key in stale_keys {
            meta.remove(&key)?;
        }
        Ok(())
    }

    pub fn save_pending_publish_info(
        meta: &dyn MetaStore,
        tablet_id: TabletId,
        version: Version,
        info: &PendingPublishInfo,
    ) -> Result<()> {
        let value = serde_json::to_string(info)
            .map_err(|e| EngineError::Internal(format!("serialize pending publish info: {}", e)))?;
        meta.put(&Self::pending_publish_key(tablet_id, version), &value)
    }

    pub fn traverse_pending_publish(
        meta: &dyn MetaStore,
        visit: &mut dyn FnMut(TabletId, Version, &str) -> bool,
    ) -> Result<()> {
        meta.traverse_prefix(PENDING_PUBLISH_PREFIX, &mut |key, value| {
            match Self::decode_id_version(&key[PENDING_PUBLISH_PREFIX.len()..]) {
                Some((tablet_id, version)) => visit(tablet_id, version, value),
                None => {
                    warn!("malformed pending publish key: {}", key);
                    true
                }
            }
        })
    }

    pub fn remove_pending_publish_info(
        meta: &dyn MetaStore,
        tablet_id: TabletId,
        version: Version,
    ) -> Result<()> {
        meta.remove(&Self::pending_publish_key(tablet_id, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::rowset::{RowsetState, VersionRange};

    fn rowset_meta(tablet_id: TabletId, hi: u64) -> RowsetMeta {
        RowsetMeta {
            rowset_id: RowsetId { hi, mi: 1, lo: 2 },
            tablet_id,
            tablet_uid: TabletUid { hi: 10, lo: 20 },
            version: VersionRange::new(2, 2),
            state: RowsetState::Visible,
            is_local: true,
            num_rows: 0,
            data_disk_size: 0,
        }
    }

    #[test]
    fn rowset_meta_round_trips_through_store() {
        let store = MemMetaStore::new();
        let meta = rowset_meta(5, 42);
        RowsetMetaManager::save(&store, &meta).unwrap();

        let loaded = RowsetMetaManager::get(&store, meta.tablet_uid, meta.rowset_id)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.tablet_id, 5);
        assert_eq!(loaded.rowset_id, meta.rowset_id);

        RowsetMetaManager::remove(&store, meta.tablet_uid, meta.rowset_id).unwrap();
        assert!(RowsetMetaManager::get(&store, meta.tablet_uid, meta.rowset_id)
            .unwrap()
            .is_none());
    }

    #[test]
    fn traverse_decodes_ids_from_keys() {
        let store = MemMetaStore::new();
        RowsetMetaManager::save(&store, &rowset_meta(1, 1)).unwrap();
        RowsetMetaManager::save(&store, &rowset_meta(2, 2)).unwrap();

        let mut seen = Vec::new();
        RowsetMetaManager::traverse_rowset_metas(&store, &mut |uid, id, _| {
            seen.push((uid, id));
            true
        })
        .unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(uid, _)| *uid == TabletUid { hi: 10, lo: 20 }));
    }

    #[test]
    fn remove_old_version_delete_bitmap_respects_max_version() {
        let store = MemMetaStore::new();
        for version in 1..=5 {
            TabletMetaManager::save_delete_bitmap(&store, 9, version, "{}").unwrap();
        }
        TabletMetaManager::save_delete_bitmap(&store, 10, 1, "{}").unwrap();

        TabletMetaManager::remove_old_version_delete_bitmap(&store, 9, 3).unwrap();

        let mut remaining = Vec::new();
        TabletMetaManager::traverse_delete_bitmap(&store, &mut |tablet_id, version, _| {
            remaining.push((tablet_id, version));
            true
        })
        .unwrap();
        assert_eq!(remaining, vec![(9, 4), (9, 5), (10, 1)]);
    }

    #[test]
    fn local_meta_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalMetaStore::open(dir.path()).unwrap();
            store.put("k1", "v1").unwrap();
            store.put("k2", "v2").unwrap();
            store.remove("k2").unwrap();
        }
        let store = LocalMetaStore::open(dir.path()).unwrap();
        assert_eq!(store.get("k1").unwrap().as_deref(), Some("v1"));
        assert_eq!(store.get("k2").unwrap(), None);
    }
}
