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
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::common::ids::{BackendUid, TabletId, TabletUid, Version};
use crate::common::status::Result;
use crate::novastore_logging::trace;

/// Globally-unique rowset identifier: a process-monotonic counter in `hi`,
/// the backend UID in `mi`/`lo`. Value equality and hashing only; the order
/// of ids carries no meaning.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RowsetId {
    pub hi: u64,
    pub mi: u64,
    pub lo: u64,
}

const ROWSET_ID_VERSION: u64 = 2 << 56;

impl fmt::Display for RowsetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}{:016x}", self.hi, self.mi, self.lo)
    }
}

impl fmt::Debug for RowsetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromStr for RowsetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 48 {
            return Err(format!("invalid rowset id string '{}'", s));
        }
        let parse = |part: &str| {
            u64::from_str_radix(part, 16).map_err(|e| format!("invalid rowset id '{}': {}", s, e))
        };
        Ok(Self {
            hi: parse(&s[0..16])?,
            mi: parse(&s[16..32])?,
            lo: parse(&s[32..48])?,
        })
    }
}

/// Hands out process-unique rowset ids seeded with the backend UID.
pub struct RowsetIdGenerator {
    backend_uid: BackendUid,
    next_id: AtomicU64,
}

impl RowsetIdGenerator {
    pub fn new(backend_uid: BackendUid) -> Self {
        Self {
            backend_uid,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> RowsetId {
        let inc = self.next_id.fetch_add(1, Ordering::Relaxed);
        RowsetId {
            hi: ROWSET_ID_VERSION | inc,
            mi: self.backend_uid.hi as u64,
            lo: self.backend_uid.lo as u64,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RowsetState {
    Pending,
    Committed,
    Visible,
}

/// Closed version range `[start, end]` covered by a rowset.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VersionRange {
    pub start: Version,
    pub end: Version,
}

impl VersionRange {
    pub fn new(start: Version, end: Version) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, version: Version) -> bool {
        self.start <= version && version <= self.end
    }

    pub fn overlaps(&self, other: &VersionRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{}]", self.start, self.end)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RowsetMeta {
    pub rowset_id: RowsetId,
    pub tablet_id: TabletId,
    pub tablet_uid: TabletUid,
    pub version: VersionRange,
    pub state: RowsetState,
    pub is_local: bool,
    pub num_rows: i64,
    pub data_disk_size: i64,
}

impl RowsetMeta {
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// An immutable set of row data on disk. The engine only manages lifetime
/// here; reading and writing segment files belongs to the writers/readers.
pub struct Rowset {
    meta: RowsetMeta,
    rowset_path: PathBuf,
    need_delete_file: AtomicBool,
    delayed_expired_timestamp: AtomicI64,
    closed: AtomicBool,
}

impl Rowset {
    pub fn new(meta: RowsetMeta, rowset_path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            meta,
            rowset_path: rowset_path.into(),
            need_delete_file: AtomicBool::new(false),
            delayed_expired_timestamp: AtomicI64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn rowset_id(&self) -> RowsetId {
        self.meta.rowset_id
    }

    pub fn tablet_id(&self) -> TabletId {
        self.meta.tablet_id
    }

    pub fn tablet_uid(&self) -> TabletUid {
        self.meta.tablet_uid
    }

    pub fn version(&self) -> VersionRange {
        self.meta.version
    }

    pub fn rowset_meta(&self) -> &RowsetMeta {
        &self.meta
    }

    pub fn rowset_path(&self) -> &Path {
        &self.rowset_path
    }

    pub fn is_local(&self) -> bool {
        self.meta.is_local
    }

    pub fn set_need_delete_file(&self) {
        self.need_delete_file.store(true, Ordering::Release);
    }

    pub fn need_delete_file(&self) -> bool {
        self.need_delete_file.load(Ordering::Acquire)
    }

    /// GC will not touch the rowset before this unix-seconds timestamp, so
    /// queries opened against a just-superseded version can drain.
    pub fn set_delayed_expired_timestamp(&self, ts: i64) {
        self.delayed_expired_timestamp.store(ts, Ordering::Release);
    }

    pub fn delayed_expired_timestamp(&self) -> i64 {
        self.delayed_expired_timestamp.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Delete the rowset's files. Idempotent: a missing path is success.
    pub fn remove(&self) -> Result<()> {
        trace!("removing rowset {} at {}", self.rowset_id(), self.rowset_path.display());
        match std::fs::metadata(&self.rowset_path) {
            Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(&self.rowset_path)?,
            Ok(_) => std::fs::remove_file(&self.rowset_path)?,
            Err(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_uid() -> BackendUid {
        BackendUid { hi: 7, lo: 11 }
    }

    #[test]
    fn generator_produces_distinct_ids() {
        let generator = RowsetIdGenerator::new(backend_uid());
        let a = generator.next_id();
        let b = generator.next_id();
        assert_ne!(a, b);
        assert_eq!(a.mi, 7);
        assert_eq!(a.lo, 11);
    }

    #[test]
    fn rowset_id_round_trips_through_display() {
        let generator = RowsetIdGenerator::new(backend_uid());
        let id = generator.next_id();
        let parsed: RowsetId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn version_range_overlap() {
        let a = VersionRange::new(2, 5);
        assert!(a.overlaps(&VersionRange::new(5, 9)));
        assert!(a.overlaps(&VersionRange::new(0, 2)));
        assert!(!a.overlaps(&VersionRange::new(6, 9)));
        assert!(a.contains(3));
        assert!(!a.contains(6));
    }

    #[test]
    fn remove_deletes_rowset_directory() {
        let dir = tempfile::tempdir().unwrap();
        let rowset_dir = dir.path().join("rs_0");
        std::fs::create_dir(&rowset_dir).unwrap();
        std::fs::write(rowset_dir.join("0.dat"), b"x").unwrap();

        let generator = RowsetIdGenerator::new(backend_uid());
        let meta = RowsetMeta {
            rowset_id: generator.next_id(),
            tablet_id: 1,
            tablet_uid: TabletUid { hi: 1, lo: 2 },
            version: VersionRange::new(2, 2),
            state: RowsetState::Visible,
            is_local: true,
            num_rows: 1,
            data_disk_size: 1,
        };
        let rowset = Rowset::new(meta, &rowset_dir);
        rowset.remove().unwrap();
        assert!(!rowset_dir.exists());
        // removing again is fine
        rowset.remove().unwrap();
    }
}
