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
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::common::ids::{PartitionId, TabletId, TabletUid, TxnId};
use crate::storage::rowset::Rowset;
use crate::storage::tablet::TabletInfo;

#[derive(Copy, Clone, Eq, PartialEq, Hash)]
struct TxnKey {
    transaction_id: TxnId,
    partition_id: PartitionId,
}

type TxnShard = Mutex<HashMap<TxnKey, HashMap<TabletInfo, Arc<Rowset>>>>;

/// Node-local index of which rowsets each load transaction has staged per
/// partition and tablet. Lets an abort (or the orphan-txn sweep) hand the
/// staged rowsets to the unused registry instead of leaking them.
pub struct TxnRowsetRegistry {
    shards: Vec<TxnShard>,
}

impl TxnRowsetRegistry {
    pub fn new(shard_size: usize) -> Self {
        let shard_size = shard_size.max(1);
        let mut shards = Vec::with_capacity(shard_size);
        for _ in 0..shard_size {
            shards.push(Mutex::new(HashMap::new()));
        }
        Self { shards }
    }

    fn shard(&self, transaction_id: TxnId) -> &TxnShard {
        let idx = (transaction_id as u64 % self.shards.len() as u64) as usize;
        &self.shards[idx]
    }

    pub fn record_txn_rowset(
        &self,
        transaction_id: TxnId,
        partition_id: PartitionId,
        tablet: TabletInfo,
        rowset: Arc<Rowset>,
    ) {
        let key = TxnKey {
            transaction_id,
            partition_id,
        };
        let mut shard = self.shard(transaction_id).lock().expect("txn rowset shard lock");
        shard.entry(key).or_default().insert(tablet, rowset);
    }

    /// Remove one tablet's staged rowset from a transaction.
    pub fn delete_txn(
        &self,
        partition_id: PartitionId,
        tablet: &TabletInfo,
        transaction_id: TxnId,
    ) -> Option<Arc<Rowset>> {
        let key = TxnKey {
            transaction_id,
            partition_id,
        };
        let mut shard = self.shard(transaction_id).lock().expect("txn rowset shard lock");
        let tablets = shard.get_mut(&key)?;
        let removed = tablets.remove(tablet);
        if tablets.is_empty() {
            shard.remove(&key);
        }
        removed
    }

    pub fn get_partition_ids(&self, transaction_id: TxnId) -> Vec<PartitionId> {
        let shard = self.shard(transaction_id).lock().expect("txn rowset shard lock");
        let mut partition_ids: Vec<PartitionId> = shard
            .keys()
            .filter(|key| key.transaction_id == transaction_id)
            .map(|key| key.partition_id)
            .collect();
        partition_ids.sort_unstable();
        partition_ids
    }

    pub fn get_txn_related_tablets(
        &self,
        transaction_id: TxnId,
        partition_id: PartitionId,
    ) -> HashMap<TabletInfo, Arc<Rowset>> {
        let key = TxnKey {
            transaction_id,
            partition_id,
        };
        let shard = self.shard(transaction_id).lock().expect("txn rowset shard lock");
        shard.get(&key).cloned().unwrap_or_default()
    }

    /// Every tablet referenced by any tracked transaction.
    pub fn get_all_related_tablets(&self) -> HashSet<TabletInfo> {
        let mut all = HashSet::new();
        for shard in &self.shards {
            let shard = shard.lock().expect("txn rowset shard lock");
            for tablets in shard.values() {
                all.extend(tablets.keys().copied());
            }
        }
        all
    }

    /// Drop every staged rowset of one tablet incarnation, returning them for
    /// unused-rowset handoff. Used when the tablet itself is gone.
    pub fn force_rollback_tablet_related_txns(
        &self,
        tablet_id: TabletId,
        tablet_uid: TabletUid,
    ) -> Vec<Arc<Rowset>> {
        let target = TabletInfo {
            tablet_id,
            tablet_uid,
        };
        let mut rolled_back = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.lock().expect("txn rowset shard lock");
            shard.retain(|_, tablets| {
                if let Some(rowset) = tablets.remove(&target) {
                    rolled_back.push(rowset);
                }
                !tablets.is_empty()
            });
        }
        rolled_back
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::rowset::{RowsetId, RowsetMeta, RowsetState, VersionRange};

    fn tablet(tablet_id: TabletId) -> TabletInfo {
        TabletInfo {
            tablet_id,
            tablet_uid: TabletUid { hi: tablet_id, lo: 0 },
        }
    }

    fn rowset(tablet_id: TabletId, hi: u64) -> Arc<Rowset> {
        Rowset::new(
            RowsetMeta {
                rowset_id: RowsetId { hi, mi: 0, lo: 0 },
                tablet_id,
                tablet_uid: TabletUid { hi: tablet_id, lo: 0 },
                version: VersionRange::new(2, 2),
                state: RowsetState::Pending,
                is_local: true,
                num_rows: 0,
                data_disk_size: 0,
            },
            "/nonexistent",
        )
    }

    #[test]
    fn record_and_delete_round_trip() {
        let registry = TxnRowsetRegistry::new(8);
        registry.record_txn_rowset(100, 1, tablet(10), rowset(10, 1));
        registry.record_txn_rowset(100, 2, tablet(11), rowset(11, 2));

        assert_eq!(registry.get_partition_ids(100), vec![1, 2]);
        assert_eq!(registry.get_txn_related_tablets(100, 1).len(), 1);

        let removed = registry.delete_txn(1, &tablet(10), 100);
        assert!(removed.is_some());
        assert_eq!(registry.get_partition_ids(100), vec![2]);
    }

    #[test]
    fn force_rollback_strips_one_tablet_everywhere() {
        let registry = TxnRowsetRegistry::new(2);
        registry.record_txn_rowset(100, 1, tablet(10), rowset(10, 1));
        registry.record_txn_rowset(101, 1, tablet(10), rowset(10, 2));
        registry.record_txn_rowset(101, 1, tablet(11), rowset(11, 3));

        let rolled_back =
            registry.force_rollback_tablet_related_txns(10, TabletUid { hi: 10, lo: 0 });
        assert_eq!(rolled_back.len(), 2);
        assert!(registry.get_partition_ids(100).is_empty());
        assert_eq!(registry.get_all_related_tablets().len(), 1);
    }
}
