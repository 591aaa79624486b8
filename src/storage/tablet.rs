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

//! Seams to the tablet layer. The engine coordinates disk placement and
//! garbage collection; what lives inside a tablet (schema, rowset trees,
//! readers) belongs to the tablet implementation behind these traits.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::common::ids::{PartitionId, SchemaHash, TabletId, TabletUid, Version};
use crate::common::status::Result;
use crate::storage::data_dir::{DataDir, DataDirInfo, StorageMedium};
use crate::storage::rowset::{RowsetId, RowsetMeta};

/// Identity of one tablet incarnation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TabletInfo {
    pub tablet_id: TabletId,
    pub tablet_uid: TabletUid,
}

impl fmt::Display for TabletInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.tablet_id, self.tablet_uid)
    }
}

pub trait Tablet: Send + Sync {
    fn tablet_id(&self) -> TabletId;

    fn tablet_uid(&self) -> TabletUid;

    /// Whether the rowset's version range still overlaps the tablet's valid
    /// visible history (or is a stale leftover).
    fn rowset_meta_is_useful(&self, rowset_meta: &RowsetMeta) -> bool;

    fn enable_unique_key_merge_on_write(&self) -> bool;

    /// Drop the delete-bitmap slice belonging to one rowset.
    fn remove_rowset_delete_bitmap(&self, rowset_id: &RowsetId);

    /// Reclaim binlog files up to and including `version`.
    fn gc_binlogs(&self, version: Version);
}

#[derive(Clone, Debug)]
pub struct CreateTabletRequest {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub partition_id: PartitionId,
    pub storage_medium: StorageMedium,
}

pub trait TabletManager: Send + Sync {
    fn get_tablet(&self, tablet_id: TabletId) -> Option<Arc<dyn Tablet>>;

    /// Uid-checked lookup used when the caller has recorded an incarnation.
    /// `include_deleted` also finds tablets pending drop.
    fn get_tablet_with_uid(
        &self,
        tablet_id: TabletId,
        tablet_uid: TabletUid,
        include_deleted: bool,
    ) -> Option<Arc<dyn Tablet>>;

    fn create_tablet(&self, request: &CreateTabletRequest, stores: &[Arc<DataDir>]) -> Result<()>;

    fn load_tablet_from_dir(
        &self,
        store: &Arc<DataDir>,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        schema_hash_path: &Path,
        force: bool,
        restore: bool,
    ) -> Result<()>;

    /// Expire incremental rowsets and move dropped tablets to trash.
    fn start_trash_sweep(&self) -> Result<()>;

    /// Fold per-tablet sizes into the path map; returns the tablet count.
    fn update_root_path_info(&self, path_map: &mut BTreeMap<String, DataDirInfo>) -> usize;
}

/// `<schema_hash_path>/<tablet_id>.hdr`
pub fn header_file_path(schema_hash_path: &Path, tablet_id: TabletId) -> PathBuf {
    schema_hash_path.join(format!("{}.hdr", tablet_id))
}
