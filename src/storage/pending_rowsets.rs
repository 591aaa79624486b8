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
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::storage::rowset::RowsetId;

/// Ids of rowsets whose files are still being materialized by a writer.
/// Anything present here is invisible to garbage collection.
#[derive(Default)]
pub struct PendingRowsetSet {
    inner: Arc<Mutex<HashSet<RowsetId>>>,
}

impl PendingRowsetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `rowset_id`; the reservation lives as long as the guard.
    pub fn add(&self, rowset_id: RowsetId) -> PendingRowsetGuard {
        self.inner
            .lock()
            .expect("pending rowset set lock")
            .insert(rowset_id);
        PendingRowsetGuard {
            set: Arc::clone(&self.inner),
            rowset_id,
        }
    }

    pub fn contains(&self, rowset_id: &RowsetId) -> bool {
        self.inner
            .lock()
            .expect("pending rowset set lock")
            .contains(rowset_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("pending rowset set lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releasing the guard is the only way an id leaves the pending set.
pub struct PendingRowsetGuard {
    set: Arc<Mutex<HashSet<RowsetId>>>,
    rowset_id: RowsetId,
}

impl PendingRowsetGuard {
    pub fn rowset_id(&self) -> RowsetId {
        self.rowset_id
    }
}

impl Drop for PendingRowsetGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .expect("pending rowset set lock")
            .remove(&self.rowset_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rowset_id(hi: u64) -> RowsetId {
        RowsetId { hi, mi: 0, lo: 0 }
    }

    #[test]
    fn guard_drop_removes_id() {
        let set = PendingRowsetSet::new();
        let id = rowset_id(1);
        {
            let _guard = set.add(id);
            assert!(set.contains(&id));
        }
        assert!(!set.contains(&id));
        assert!(set.is_empty());
    }

    #[test]
    fn guards_are_independent() {
        let set = PendingRowsetSet::new();
        let a = set.add(rowset_id(1));
        let b = set.add(rowset_id(2));
        drop(a);
        assert!(!set.contains(&rowset_id(1)));
        assert!(set.contains(&rowset_id(2)));
        drop(b);
        assert!(set.is_empty());
    }
}
