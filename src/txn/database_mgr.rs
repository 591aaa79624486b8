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

//! Transaction manager of one database. Owns every index of the database's
//! load transactions behind a single read/write lock; no other lock may be
//! taken while holding it.

use std::backtrace::Backtrace;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use crate::common::config;
use crate::common::ids::{
    BackendId, DbId, PartitionId, ReplicaId, RequestId, TabletId, TableId, TxnId,
};
use crate::common::status::{EngineError, Result};
use crate::common::util;
use crate::novastore_logging::{debug, info, warn};
use crate::txn::catalog::{
    Catalog, Database, OlapTable, OlapTableState, Partition, with_tables_write_locked,
};
use crate::txn::edit_log::{BatchRemoveTransactionsOperation, EditLog};
use crate::txn::manager::{
    AgentTaskSubmitter, CallbackRegistry, ClearTransactionTask, TransactionIdGenerator,
};
use crate::txn::publish::{self, PublishResult, check_replica_continuous_version_succ};
use crate::txn::state::{
    LoadJobSourceType, PartitionCommitInfo, TableCommitInfo, TabletCommitInfo, TransactionState,
    TransactionStatus, TxnCoordinator,
};

/// Cap on removals per expiry round so the write lock is not held for long.
const MAX_REMOVE_TXN_PER_ROUND: usize = 10_000;

struct TxnIndexes {
    running: HashMap<TxnId, Arc<TransactionState>>,
    final_status: HashMap<TxnId, Arc<TransactionState>>,
    /// Final transactions in insertion order, split by label-retention class
    /// for O(1) oldest-first expiry.
    final_deque_short: VecDeque<Arc<TransactionState>>,
    final_deque_long: VecDeque<Arc<TransactionState>>,
    label_to_txn_ids: HashMap<String, HashSet<TxnId>>,
    running_txn_num: usize,
    running_routine_load_txn_num: usize,
}

impl TxnIndexes {
    fn get(&self, transaction_id: TxnId) -> Option<Arc<TransactionState>> {
        self.running
            .get(&transaction_id)
            .or_else(|| self.final_status.get(&transaction_id))
            .cloned()
    }
}

/// Write guard that reports long lock holds with a captured stack trace.
struct TimedWriteGuard<'a> {
    guard: RwLockWriteGuard<'a, TxnIndexes>,
    start: Instant,
    threshold_ms: u64,
}

impl Deref for TimedWriteGuard<'_> {
    type Target = TxnIndexes;

    fn deref(&self) -> &TxnIndexes {
        &self.guard
    }
}

impl DerefMut for TimedWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut TxnIndexes {
        &mut self.guard
    }
}

impl Drop for TimedWriteGuard<'_> {
    fn drop(&mut self) {
        let held_ms = self.start.elapsed().as_millis() as u64;
        if held_ms > self.threshold_ms {
            info!(
                "transaction write lock is held for {} ms. call stack is:\n{}",
                held_ms,
                Backtrace::force_capture()
            );
        }
    }
}

pub struct DatabaseTransactionMgr {
    db_id: DbId,
    catalog: Arc<Catalog>,
    edit_log: Arc<dyn EditLog>,
    id_generator: Arc<TransactionIdGenerator>,
    callback_registry: Arc<CallbackRegistry>,
    task_submitter: Arc<dyn AgentTaskSubmitter>,
    indexes: RwLock<TxnIndexes>,
    clear_transaction_tasks: Mutex<Vec<ClearTransactionTask>>,
    max_final_txns_num: i64,
}

impl DatabaseTransactionMgr {
    pub fn new(
        db_id: DbId,
        catalog: Arc<Catalog>,
        edit_log: Arc<dyn EditLog>,
        id_generator: Arc<TransactionIdGenerator>,
        callback_registry: Arc<CallbackRegistry>,
        task_submitter: Arc<dyn AgentTaskSubmitter>,
    ) -> Self {
        let threshold = config::label_num_threshold();
        Self {
            db_id,
            catalog,
            edit_log,
            id_generator,
            callback_registry,
            task_submitter,
            indexes: RwLock::new(TxnIndexes {
                running: HashMap::new(),
                final_status: HashMap::new(),
                final_deque_short: VecDeque::new(),
                final_deque_long: VecDeque::new(),
                label_to_txn_ids: HashMap::new(),
                running_txn_num: 0,
                running_routine_load_txn_num: 0,
            }),
            clear_transaction_tasks: Mutex::new(Vec::new()),
            max_final_txns_num: if threshold >= 0 { threshold } else { i64::MAX },
        }
    }

    pub fn db_id(&self) -> DbId {
        self.db_id
    }

    fn read_indexes(&self) -> RwLockReadGuard<'_, TxnIndexes> {
        self.indexes.read().expect("transaction lock")
    }

    fn write_indexes(&self) -> TimedWriteGuard<'_> {
        TimedWriteGuard {
            guard: self.indexes.write().expect("transaction lock"),
            start: Instant::now(),
            threshold_ms: config::lock_reporting_threshold_ms(),
        }
    }

    // ---- queries -----------------------------------------------------------

    pub fn get_transaction_state(&self, transaction_id: TxnId) -> Option<Arc<TransactionState>> {
        self.read_indexes().get(transaction_id)
    }

    pub fn running_txn_num(&self) -> usize {
        self.read_indexes().running_txn_num
    }

    pub fn running_routine_load_txn_num(&self) -> usize {
        self.read_indexes().running_routine_load_txn_num
    }

    pub fn finished_txn_num(&self) -> usize {
        self.read_indexes().final_status.len()
    }

    pub fn transaction_num(&self) -> usize {
        let indexes = self.read_indexes();
        indexes.running.len() + indexes.final_deque_short.len() + indexes.final_deque_long.len()
    }

    pub fn get_txn_ids_by_label(&self, label: &str) -> HashSet<TxnId> {
        self.read_indexes()
            .label_to_txn_ids
            .get(label)
            .cloned()
            .unwrap_or_default()
    }

    /// Status of the newest transaction carrying the label.
    pub fn get_label_state(&self, label: &str) -> TransactionStatus {
        let indexes = self.read_indexes();
        let Some(txn_ids) = indexes.label_to_txn_ids.get(label) else {
            return TransactionStatus::Unknown;
        };
        txn_ids
            .iter()
            .max()
            .and_then(|txn_id| indexes.get(*txn_id))
            .map(|txn| txn.status())
            .unwrap_or(TransactionStatus::Unknown)
    }

    pub fn get_transaction_id_by_label(&self, label: &str) -> Option<TxnId> {
        let indexes = self.read_indexes();
        indexes.label_to_txn_ids.get(label)?.iter().max().copied()
    }

    pub fn get_transaction_id_by_label_with_status(
        &self,
        label: &str,
        status_list: &[TransactionStatus],
    ) -> Result<TxnId> {
        let indexes = self.read_indexes();
        let txn_ids = indexes.label_to_txn_ids.get(label).ok_or_else(|| {
            EngineError::TransactionNotFound(-1, format!("transaction not found, label={}", label))
        })?;
        for status in status_list {
            for txn_id in txn_ids {
                if let Some(txn) = indexes.get(*txn_id) {
                    if txn.status() == *status {
                        return Ok(*txn_id);
                    }
                }
            }
        }
        Err(EngineError::TransactionNotFound(
            -1,
            format!("running transaction not found, label={}", label),
        ))
    }

    pub fn get_committed_txn_list(&self) -> Vec<Arc<TransactionState>> {
        let indexes = self.read_indexes();
        let mut txns: Vec<Arc<TransactionState>> = indexes
            .running
            .values()
            .filter(|txn| txn.status() == TransactionStatus::Committed)
            .cloned()
            .collect();
        txns.sort_by_key(|txn| txn.commit_time());
        txns
    }

    pub fn get_precommitted_txn_list(&self) -> Vec<Arc<TransactionState>> {
        let indexes = self.read_indexes();
        let mut txns: Vec<Arc<TransactionState>> = indexes
            .running
            .values()
            .filter(|txn| txn.status() == TransactionStatus::Precommitted)
            .cloned()
            .collect();
        txns.sort_by_key(|txn| txn.inner().pre_commit_time);
        txns
    }

    /// True when no running transaction with an id at or below the watermark
    /// still touches any of `table_ids`.
    pub fn is_previous_transactions_finished(
        &self,
        end_transaction_id: TxnId,
        table_ids: &[TableId],
    ) -> bool {
        let indexes = self.read_indexes();
        for (txn_id, txn) in indexes.running.iter() {
            if txn.status().is_final() {
                continue;
            }
            if !Self::is_intersection_not_empty(&txn.table_id_list(), table_ids) {
                continue;
            }
            if *txn_id <= end_transaction_id {
                debug!(
                    "find a running txn with txn_id={} on db: {}, less than watermark txn_id {}",
                    txn_id, self.db_id, end_transaction_id
                );
                return false;
            }
        }
        true
    }

    /// Partition-scoped variant: a COMMITTED txn that does not touch the
    /// partition does not block.
    pub fn is_previous_transactions_finished_for_partition(
        &self,
        end_transaction_id: TxnId,
        table_id: TableId,
        partition_id: PartitionId,
    ) -> bool {
        let indexes = self.read_indexes();
        for (txn_id, txn) in indexes.running.iter() {
            if *txn_id > end_transaction_id
                || txn.status().is_final()
                || !txn.table_id_list().contains(&table_id)
            {
                continue;
            }
            if txn.status() == TransactionStatus::Committed {
                let commit_infos = txn.table_commit_infos();
                if let Some(tci) = commit_infos.get(&table_id) {
                    if !tci.partition_commit_infos.contains_key(&partition_id) {
                        continue;
                    }
                }
            }
            return false;
        }
        true
    }

    /// Both lists known and disjoint is the only "no" answer; an empty list
    /// means "unknown tables", which must be treated as overlapping.
    fn is_intersection_not_empty(source: &[TableId], target: &[TableId]) -> bool {
        if source.is_empty() || target.is_empty() {
            return true;
        }
        source.iter().any(|id| target.contains(id))
    }

    // ---- begin -------------------------------------------------------------

    fn check_label(label: &str) -> Result<()> {
        let valid = !label.is_empty()
            && label.len() <= 128
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'));
        if !valid {
            return Err(EngineError::Internal(format!(
                "label format is invalid: '{}'",
                label
            )));
        }
        Ok(())
    }

    fn check_database_data_quota(&self, db: &Arc<Database>) -> Result<()> {
        if db.used_data_bytes() >= db.data_quota_bytes() {
            return Err(EngineError::QuotaExceeded {
                db: db.full_name().to_string(),
                quota_bytes: db.data_quota_bytes(),
            });
        }
        Ok(())
    }

    fn check_running_txn_exceed_limit(
        &self,
        indexes: &TxnIndexes,
        db: &Arc<Database>,
        source_type: LoadJobSourceType,
    ) -> Result<()> {
        // routine load has its own per-backend task cap and must not starve
        // other load types out of the quota
        if source_type == LoadJobSourceType::RoutineLoadTask {
            return Ok(());
        }
        let quota = db.transaction_quota();
        if indexes.running_txn_num as i64 >= quota {
            return Err(EngineError::BeginTxnLimitExceeded(format!(
                "current running txns on db {} is {}, larger than limit {}",
                self.db_id, indexes.running_txn_num, quota
            )));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn begin_transaction(
        &self,
        table_id_list: Vec<TableId>,
        label: &str,
        request_id: Option<RequestId>,
        coordinator: TxnCoordinator,
        source_type: LoadJobSourceType,
        callback_id: i64,
        timeout_ms: i64,
    ) -> Result<TxnId> {
        Self::check_label(label)?;
        let db = self.catalog.get_db_or_meta_err(self.db_id)?;
        self.check_database_data_quota(&db)?;

        let tid;
        {
            let mut indexes = self.write_indexes();

            // a label may map to many txns, of which at most one is not
            // aborted
            let existing_ids = indexes.label_to_txn_ids.get(label).cloned().unwrap_or_default();
            let not_aborted: Vec<Arc<TransactionState>> = existing_ids
                .iter()
                .filter_map(|txn_id| indexes.get(*txn_id))
                .filter(|txn| txn.status() != TransactionStatus::Aborted)
                .collect();
            if let Some(existing) = not_aborted.first() {
                let status = existing.status();
                if let (Some(request), Some(existing_request)) = (request_id, existing.request_id())
                {
                    if matches!(
                        status,
                        TransactionStatus::Prepare | TransactionStatus::Precommitted
                    ) && request == existing_request
                    {
                        // retry of the same job; hand back the existing txn id
                        return Err(EngineError::DuplicatedRequest {
                            request_id: request.to_string(),
                            txn_id: existing.transaction_id(),
                        });
                    }
                }
                return Err(EngineError::LabelAlreadyUsed {
                    label: label.to_string(),
                    status: status.to_string(),
                });
            }

            self.check_running_txn_exceed_limit(&indexes, &db, source_type)?;

            tid = self.id_generator.next_transaction_id();
            let txn = TransactionState::new(
                self.db_id,
                table_id_list,
                tid,
                label,
                request_id,
                source_type,
                coordinator.clone(),
                callback_id,
                timeout_ms,
            );
            self.unprotect_upsert_transaction_state(&mut indexes, &txn, false);
        }
        info!(
            "begin transaction: txn id {} with label {} from coordinator {}, listener id: {}",
            tid, label, coordinator, callback_id
        );
        Ok(tid)
    }

    // ---- commit ------------------------------------------------------------

    /// Validate the reported per-tablet writes against the catalog and
    /// collect the involved partitions and backends. Fails when any tablet is
    /// short of `load_required_replica_num` successful replicas.
    fn check_commit_status(
        &self,
        db: &Arc<Database>,
        tables: &[Arc<OlapTable>],
        txn: &Arc<TransactionState>,
        tablet_commit_infos: &[TabletCommitInfo],
        error_replica_ids: &mut HashSet<ReplicaId>,
        table_to_partition: &mut HashMap<TableId, HashSet<PartitionId>>,
        total_involved_backends: &mut HashSet<BackendId>,
    ) -> Result<()> {
        let inverted = self.catalog.inverted_index();
        let id_to_table: HashMap<TableId, Arc<OlapTable>> =
            tables.iter().map(|t| (t.id(), Arc::clone(t))).collect();

        // dropped tables/partitions during load are fine; their tablets are
        // simply ignored
        let mut tablet_to_backends: HashMap<TabletId, HashSet<BackendId>> = HashMap::new();
        for commit_info in tablet_commit_infos {
            let Some(tablet_meta) = inverted.get_tablet_meta(commit_info.tablet_id) else {
                continue;
            };
            let Some(table) = id_to_table.get(&tablet_meta.table_id) else {
                continue;
            };
            if table.state() == OlapTableState::Restore {
                return Err(EngineError::TransactionCommitFailed(format!(
                    "table {} is in restore process, can not load into it",
                    table.name()
                )));
            }
            if table.get_partition(tablet_meta.partition_id).is_none() {
                continue;
            }
            table_to_partition
                .entry(tablet_meta.table_id)
                .or_default()
                .insert(tablet_meta.partition_id);
            tablet_to_backends
                .entry(commit_info.tablet_id)
                .or_default()
                .insert(commit_info.backend_id);
        }

        let loaded_indexes = txn.loaded_tbl_indexes();
        for (table_id, partition_ids) in table_to_partition.iter() {
            let table = db.get_table(*table_id).ok_or_else(|| {
                EngineError::MetaNotFound(format!("table {} does not exist", table_id))
            })?;
            if matches!(
                table.state(),
                OlapTableState::Rollup | OlapTableState::SchemaChange
            ) {
                // with a short deadline a replica's publish task is likely to
                // fail, and a failed quorum fails the whole alter job
                txn.prolong_publish_timeout();
            }
            for partition in table.all_partitions() {
                if !partition_ids.contains(&partition.id()) {
                    continue;
                }
                let load_required_replica_num = table.load_required_replica_num(partition.id());
                for index in partition.indexes_filtered(loaded_indexes.get(table_id)) {
                    for tablet in index.tablets() {
                        let mut succ_replicas = Vec::new();
                        let mut write_failed_replicas = Vec::new();
                        let mut version_failed_replicas = Vec::new();
                        let tablet_backends = tablet.backend_ids();
                        total_involved_backends.extend(tablet_backends.iter().copied());
                        let commit_backends = tablet_to_backends.get(&tablet.id());
                        for backend_id in tablet_backends {
                            let replica = inverted
                                .get_replica(tablet.id(), backend_id)
                                .ok_or_else(|| {
                                    EngineError::TransactionCommitFailed(format!(
                                        "could not find replica for tablet [{}], backend [{}]",
                                        tablet.id(),
                                        backend_id
                                    ))
                                })?;
                            if commit_backends.is_some_and(|set| set.contains(&backend_id)) {
                                // a prior failure leaves the replica usable
                                // for writes but not countable for quorum
                                if replica.last_failed_version() < 0 {
                                    succ_replicas.push(replica);
                                } else {
                                    version_failed_replicas.push(replica);
                                }
                            } else {
                                error_replica_ids.insert(replica.id());
                                write_failed_replicas.push(replica);
                            }
                        }

                        let succ_num = succ_replicas.len() as i32;
                        if succ_num < load_required_replica_num {
                            let write_detail = publish::tablet_write_detail(
                                &succ_replicas,
                                &write_failed_replicas,
                                &version_failed_replicas,
                            );
                            let detail = format!(
                                "failed to commit txn {}, cause tablet {} succ replica num {} \
                                 < load required replica num {}. table {}, partition: [ id={}, \
                                 commit version {}, visible version {} ], this tablet detail: {}",
                                txn.transaction_id(),
                                tablet.id(),
                                succ_num,
                                load_required_replica_num,
                                table_id,
                                partition.id(),
                                partition.committed_version(),
                                partition.visible_version(),
                                write_detail
                            );
                            info!("{}", detail);
                            return Err(EngineError::TabletQuorumFailed {
                                txn_id: txn.transaction_id(),
                                tablet_id: tablet.id(),
                                detail,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// One-phase commit, or the commit leg of 2PC when `is_2pc`.
    /// The caller must hold the write locks of every involved table.
    pub fn commit_transaction(
        &self,
        tables: &[Arc<OlapTable>],
        transaction_id: TxnId,
        tablet_commit_infos: &[TabletCommitInfo],
        is_2pc: bool,
    ) -> Result<()> {
        let db = self.catalog.get_db_or_meta_err(self.db_id)?;
        let txn = self.get_transaction_state(transaction_id).ok_or_else(|| {
            EngineError::TransactionCommitFailed(format!(
                "transaction [{}] not found",
                transaction_id
            ))
        })?;

        match txn.status() {
            TransactionStatus::Aborted => {
                return Err(EngineError::TransactionCommitFailed(format!(
                    "transaction [{}] is already aborted. abort reason: {}",
                    transaction_id,
                    txn.reason()
                )));
            }
            TransactionStatus::Visible => {
                debug!("transaction is already visible: {}", transaction_id);
                if is_2pc {
                    return Err(EngineError::TransactionCommitFailed(format!(
                        "transaction [{}] is already visible, not pre-committed",
                        transaction_id
                    )));
                }
                return Ok(());
            }
            TransactionStatus::Committed => {
                debug!("transaction is already committed: {}", transaction_id);
                if is_2pc {
                    return Err(EngineError::TransactionCommitFailed(format!(
                        "transaction [{}] is already committed, not pre-committed",
                        transaction_id
                    )));
                }
                return Ok(());
            }
            TransactionStatus::Prepare if is_2pc => {
                return Err(EngineError::TransactionCommitFailed(format!(
                    "transaction [{}] is prepare, not pre-committed",
                    transaction_id
                )));
            }
            _ => {}
        }

        let mut error_replica_ids = HashSet::new();
        let mut table_to_partition = HashMap::new();
        let mut total_involved_backends = HashSet::new();
        if !is_2pc {
            self.check_commit_status(
                &db,
                tables,
                &txn,
                tablet_commit_infos,
                &mut error_replica_ids,
                &mut table_to_partition,
                &mut total_involved_backends,
            )?;
        }

        self.before_state_transform(&txn, TransactionStatus::Committed)?;
        let txn_operated;
        {
            let mut indexes = self.write_indexes();
            if is_2pc {
                self.unprotected_commit_transaction_2pc(&mut indexes, &txn, &db);
            } else {
                self.unprotected_commit_transaction(
                    &mut indexes,
                    &txn,
                    error_replica_ids,
                    &table_to_partition,
                    &total_involved_backends,
                    &db,
                );
            }
            txn_operated = true;
        }
        self.after_state_transform(&txn, TransactionStatus::Committed, txn_operated, "");

        // nextVersion is advanced only after the state persisted, so a failed
        // persist cannot leave a hole in the version sequence
        self.update_catalog_after_committed(&txn, &db);
        info!("transaction:[{}] successfully committed", txn);
        Ok(())
    }

    pub fn pre_commit_transaction_2pc(
        &self,
        tables: &[Arc<OlapTable>],
        transaction_id: TxnId,
        tablet_commit_infos: &[TabletCommitInfo],
    ) -> Result<()> {
        let db = self.catalog.get_db_or_meta_err(self.db_id)?;
        let txn = self.get_transaction_state(transaction_id).ok_or_else(|| {
            EngineError::TransactionCommitFailed("transaction not found".to_string())
        })?;
        match txn.status() {
            TransactionStatus::Aborted => {
                return Err(EngineError::TransactionCommitFailed(txn.reason()));
            }
            TransactionStatus::Visible => {
                return Err(EngineError::TransactionCommitFailed(
                    "transaction is already visible".to_string(),
                ));
            }
            TransactionStatus::Committed => {
                return Err(EngineError::TransactionCommitFailed(
                    "transaction is already committed".to_string(),
                ));
            }
            TransactionStatus::Precommitted => {
                debug!("transaction is already pre-committed: {}", transaction_id);
                return Ok(());
            }
            _ => {}
        }

        let mut error_replica_ids = HashSet::new();
        let mut table_to_partition = HashMap::new();
        let mut total_involved_backends = HashSet::new();
        self.check_commit_status(
            &db,
            tables,
            &txn,
            tablet_commit_infos,
            &mut error_replica_ids,
            &mut table_to_partition,
            &mut total_involved_backends,
        )?;

        {
            let mut indexes = self.write_indexes();
            self.unprotected_pre_commit_transaction_2pc(
                &mut indexes,
                &txn,
                error_replica_ids,
                &table_to_partition,
                &total_involved_backends,
            );
        }
        info!("transaction:[{}] successfully pre-committed", txn);
        Ok(())
    }

    fn unprotected_commit_transaction(
        &self,
        indexes: &mut TxnIndexes,
        txn: &Arc<TransactionState>,
        error_replica_ids: HashSet<ReplicaId>,
        table_to_partition: &HashMap<TableId, HashSet<PartitionId>>,
        total_involved_backends: &HashSet<BackendId>,
        db: &Arc<Database>,
    ) {
        // state may have moved while the commit check ran without the lock
        if txn.status() != TransactionStatus::Prepare {
            return;
        }
        let commit_time = util::unix_millis();
        {
            let mut inner = txn.inner();
            inner.commit_time = commit_time;
            inner.status = TransactionStatus::Committed;
            inner.error_replicas = error_replica_ids;
            for (table_id, partition_ids) in table_to_partition {
                let Some(table) = db.get_table(*table_id) else {
                    continue;
                };
                let mut table_commit_info = TableCommitInfo::new(*table_id);
                for partition_id in partition_ids {
                    let Some(partition) = table.get_partition(*partition_id) else {
                        continue;
                    };
                    table_commit_info.add_partition_commit_info(PartitionCommitInfo {
                        partition_id: *partition_id,
                        partition_range: partition.range_desc().to_string(),
                        version: partition.next_version(),
                        version_time: util::unix_millis(),
                    });
                }
                inner.table_commit_infos.insert(*table_id, table_commit_info);
            }
        }
        self.unprotect_upsert_transaction_state(indexes, txn, false);

        // publish tasks are created later; reserve the slots now
        for backend_id in total_involved_backends {
            txn.add_publish_version_task(*backend_id, None);
        }
    }

    fn unprotected_pre_commit_transaction_2pc(
        &self,
        indexes: &mut TxnIndexes,
        txn: &Arc<TransactionState>,
        error_replica_ids: HashSet<ReplicaId>,
        table_to_partition: &HashMap<TableId, HashSet<PartitionId>>,
        total_involved_backends: &HashSet<BackendId>,
    ) {
        if txn.status() != TransactionStatus::Prepare {
            return;
        }
        {
            let mut inner = txn.inner();
            inner.pre_commit_time = util::unix_millis();
            inner.status = TransactionStatus::Precommitted;
            inner.error_replicas = error_replica_ids;
            for (table_id, partition_ids) in table_to_partition {
                let mut table_commit_info = TableCommitInfo::new(*table_id);
                for partition_id in partition_ids {
                    // the real version is assigned at commit2PC
                    table_commit_info.add_partition_commit_info(PartitionCommitInfo {
                        partition_id: *partition_id,
                        partition_range: String::new(),
                        version: -1,
                        version_time: -1,
                    });
                }
                inner.table_commit_infos.insert(*table_id, table_commit_info);
            }
        }
        self.unprotect_upsert_transaction_state(indexes, txn, false);

        for backend_id in total_involved_backends {
            txn.add_publish_version_task(*backend_id, None);
        }
    }

    fn unprotected_commit_transaction_2pc(
        &self,
        indexes: &mut TxnIndexes,
        txn: &Arc<TransactionState>,
        db: &Arc<Database>,
    ) {
        if txn.status() != TransactionStatus::Precommitted {
            warn!(
                "state of transaction [{}] changed, failed to commit transaction",
                txn.transaction_id()
            );
            return;
        }
        {
            let mut inner = txn.inner();
            inner.commit_time = util::unix_millis();
            inner.status = TransactionStatus::Committed;

            let table_ids: Vec<TableId> = inner.table_commit_infos.keys().copied().collect();
            for table_id in table_ids {
                let Some(table) = db.get_table(table_id) else {
                    warn!("table {} is dropped, skip and remove it from transaction state", table_id);
                    inner.table_commit_infos.remove(&table_id);
                    continue;
                };
                let partition_ids: Vec<PartitionId> = inner
                    .table_commit_infos
                    .get(&table_id)
                    .map(|tci| tci.partition_commit_infos.keys().copied().collect())
                    .unwrap_or_default();
                for partition_id in partition_ids {
                    let Some(partition) = table.get_partition(partition_id) else {
                        warn!(
                            "partition {} is dropped, skip and remove it from transaction state",
                            partition_id
                        );
                        if let Some(tci) = inner.table_commit_infos.get_mut(&table_id) {
                            tci.partition_commit_infos.remove(&partition_id);
                        }
                        continue;
                    };
                    if let Some(pci) = inner
                        .table_commit_infos
                        .get_mut(&table_id)
                        .and_then(|tci| tci.partition_commit_infos.get_mut(&partition_id))
                    {
                        pci.version = partition.next_version();
                        pci.version_time = util::unix_millis();
                    }
                }
            }
        }
        self.unprotect_upsert_transaction_state(indexes, txn, false);
    }

    /// After COMMITTED persisted: raise error replicas' failure watermark and
    /// advance every involved partition's `next_version`.
    fn update_catalog_after_committed(&self, txn: &Arc<TransactionState>, db: &Arc<Database>) {
        let error_replica_ids = txn.error_replicas();
        for (table_id, table_commit_info) in txn.table_commit_infos() {
            let Some(table) = db.get_table(table_id) else {
                warn!(
                    "table {} does not exist when update catalog after committed. transaction: {}",
                    table_id,
                    txn.transaction_id()
                );
                continue;
            };
            for (partition_id, partition_commit_info) in &table_commit_info.partition_commit_infos {
                let Some(partition) = table.get_partition(*partition_id) else {
                    warn!(
                        "partition {} does not exist when update catalog after committed. transaction: {}",
                        partition_id,
                        txn.transaction_id()
                    );
                    continue;
                };
                for index in partition.indexes() {
                    for tablet in index.tablets() {
                        for replica in tablet.replicas() {
                            if error_replica_ids.contains(&replica.id()) {
                                replica.update_last_failed_version(partition_commit_info.version);
                            }
                        }
                    }
                }
                partition.set_next_version(partition.next_version() + 1);
            }
        }
    }

    // ---- finish (publish) --------------------------------------------------

    /// Try to make a COMMITTED transaction VISIBLE after a publish wave.
    /// Returning Ok with the txn still COMMITTED means "retry later".
    pub fn finish_transaction(&self, transaction_id: TxnId) -> Result<()> {
        let txn = self.get_transaction_state(transaction_id).ok_or_else(|| {
            EngineError::TransactionNotFound(transaction_id, "transaction not found".to_string())
        })?;
        let db = self.catalog.get_db_or_meta_err(self.db_id)?;
        let table_ids = txn.table_id_list();
        debug!("finish transaction {} with tables {:?}", transaction_id, table_ids);
        let tables = db.tables_on_id_order_if_exist(&table_ids);

        with_tables_write_locked(&tables, || {
            let mut related_tbl_partitions = Vec::new();
            if !self.finish_check_partition_version(&txn, &db, &mut related_tbl_partitions) {
                return Ok(());
            }

            let mut error_replica_ids = txn.error_replicas();
            let publish_result =
                self.finish_check_quorum_replicas(&txn, &related_tbl_partitions, &mut error_replica_ids);
            if publish_result == PublishResult::Failed {
                return Ok(());
            }

            let txn_operated;
            {
                let mut indexes = self.write_indexes();
                {
                    let mut inner = txn.inner();
                    inner.error_replicas = error_replica_ids;
                    inner.finish_time = util::unix_millis();
                    inner.err_msg.clear();
                    inner.status = TransactionStatus::Visible;
                }
                self.unprotect_upsert_transaction_state(&mut indexes, &txn, false);
                txn_operated = true;
            }
            self.after_state_transform(&txn, TransactionStatus::Visible, txn_operated, "");

            self.update_catalog_after_visible(&txn, &db);

            // only after everything is done, so a load can query its own
            // result right after the visible wait returns
            txn.countdown_visible_latch();
            info!(
                "finish transaction {} successfully, publish times {}, publish result {}",
                txn,
                txn.publish_count(),
                publish_result.name()
            );
            Ok(())
        })
    }

    /// Every surviving partition must be exactly one version behind its
    /// commit info; otherwise the txn has to wait for earlier publishes.
    fn finish_check_partition_version(
        &self,
        txn: &Arc<TransactionState>,
        db: &Arc<Database>,
        related_tbl_partitions: &mut Vec<(Arc<OlapTable>, Arc<Partition>)>,
    ) -> bool {
        let mut inner = txn.inner();
        let table_ids: Vec<TableId> = inner.table_commit_infos.keys().copied().collect();
        for table_id in table_ids {
            let Some(table) = db.get_table(table_id) else {
                warn!(
                    "table {} is dropped, skip version check and remove it from transaction state {}",
                    table_id,
                    txn.transaction_id()
                );
                inner.table_commit_infos.remove(&table_id);
                continue;
            };
            let partition_ids: Vec<PartitionId> = inner
                .table_commit_infos
                .get(&table_id)
                .map(|tci| tci.partition_commit_infos.keys().copied().collect())
                .unwrap_or_default();
            for partition_id in partition_ids {
                let Some(partition) = table.get_partition(partition_id) else {
                    warn!(
                        "partition {} is dropped, skip version check and remove it from transaction state {}",
                        partition_id,
                        txn.transaction_id()
                    );
                    if let Some(tci) = inner.table_commit_infos.get_mut(&table_id) {
                        tci.partition_commit_infos.remove(&partition_id);
                    }
                    continue;
                };
                let commit_version = inner
                    .table_commit_infos
                    .get(&table_id)
                    .and_then(|tci| tci.partition_commit_infos.get(&partition_id))
                    .map(|pci| pci.version)
                    .unwrap_or(-1);
                if partition.visible_version() != commit_version - 1 {
                    let err_msg = format!(
                        "wait for publishing partition {} version {}. self version: {}. table {}",
                        partition_id,
                        partition.visible_version() + 1,
                        commit_version,
                        table_id
                    );
                    debug!(
                        "txn {}: {}, partition visible version {}",
                        txn.transaction_id(),
                        err_msg,
                        partition.visible_version()
                    );
                    inner.err_msg = err_msg;
                    return false;
                }
                related_tbl_partitions.push((Arc::clone(&table), Arc::clone(&partition)));
            }
        }
        true
    }

    /// Quorum evaluation per tablet. After `publish_wait_time_second` a
    /// single successful replica is enough: the version is already assigned,
    /// so rolling back forever would stall the partition.
    fn finish_check_quorum_replicas(
        &self,
        txn: &Arc<TransactionState>,
        related_tbl_partitions: &[(Arc<OlapTable>, Arc<Partition>)],
        error_replica_ids: &mut HashSet<ReplicaId>,
    ) -> PublishResult {
        let now = util::unix_millis();
        let first_publish_version_time = txn.first_publish_version_time();
        let publish_wait_ms = config::publish_wait_time_second().saturating_mul(1000);
        let allow_publish_one_succ = config::publish_wait_time_second() > 0
            && first_publish_version_time > 0
            && now >= first_publish_version_time + publish_wait_ms;

        let publish_tasks = txn.publish_version_tasks();
        let loaded_indexes = txn.loaded_tbl_indexes();
        let mut publish_result = PublishResult::QuorumSucc;
        let mut logs = Vec::new();

        for (table, partition) in related_tbl_partitions {
            let table_id = table.id();
            let partition_id = partition.id();
            let new_version = partition.visible_version() + 1;
            let load_required_replica_num = table.load_required_replica_num(partition_id);
            let alter_replica_loaded_txn = match table.state() {
                OlapTableState::Rollup | OlapTableState::SchemaChange => table
                    .alter_watershed_txn_id()
                    .map(|watershed| txn.transaction_id() > watershed)
                    .unwrap_or(true),
                _ => true,
            };

            for index in partition.indexes_filtered(loaded_indexes.get(&table_id)) {
                for tablet in index.tablets() {
                    let mut succ_replicas = Vec::new();
                    let mut write_failed_replicas = Vec::new();
                    let mut version_failed_replicas = Vec::new();
                    for replica in tablet.replicas() {
                        let backend_task =
                            publish_tasks.get(&replica.backend_id()).and_then(|t| t.as_ref());
                        check_replica_continuous_version_succ(
                            tablet.id(),
                            &replica,
                            alter_replica_loaded_txn,
                            new_version,
                            backend_task,
                            error_replica_ids,
                            &mut succ_replicas,
                            &mut write_failed_replicas,
                            &mut version_failed_replicas,
                        );
                    }

                    let health_replica_num = succ_replicas.len() as i32;
                    if health_replica_num >= load_required_replica_num {
                        if !write_failed_replicas.is_empty() || !version_failed_replicas.is_empty()
                        {
                            let write_detail = publish::tablet_write_detail(
                                &succ_replicas,
                                &write_failed_replicas,
                                &version_failed_replicas,
                            );
                            logs.push(format!(
                                "publish version quorum succ for transaction {} on tablet {} with \
                                 version {}, and has failed replicas, load required replica num {}. \
                                 table {}, partition {}, tablet detail: {}",
                                txn.transaction_id(),
                                tablet.id(),
                                new_version,
                                load_required_replica_num,
                                table_id,
                                partition_id,
                                write_detail
                            ));
                        }
                        continue;
                    }

                    let write_detail = publish::tablet_write_detail(
                        &succ_replicas,
                        &write_failed_replicas,
                        &version_failed_replicas,
                    );
                    if allow_publish_one_succ && health_replica_num > 0 {
                        if publish_result == PublishResult::QuorumSucc {
                            publish_result = PublishResult::TimeoutSucc;
                        }
                        logs.push(format!(
                            "publish version timeout succ for transaction {} on tablet {} with \
                             version {}, and has failed replicas, load required replica num {}. \
                             table {}, partition {}, tablet detail: {}",
                            txn.transaction_id(),
                            tablet.id(),
                            new_version,
                            load_required_replica_num,
                            table_id,
                            partition_id,
                            write_detail
                        ));
                    } else {
                        publish_result = PublishResult::Failed;
                        let err_msg = format!(
                            "publish on tablet {} failed. succeed replica num {} < load required \
                             replica num {}. table: {}, partition: {}, publish version: {}",
                            tablet.id(),
                            health_replica_num,
                            load_required_replica_num,
                            table_id,
                            partition_id,
                            new_version
                        );
                        txn.set_err_msg(&err_msg);
                        logs.push(format!(
                            "publish version failed for transaction {} on tablet {} with version \
                             {}, and has failed replicas, load required replica num {}. table {}, \
                             partition {}, tablet detail: {}",
                            txn.transaction_id(),
                            tablet.id(),
                            new_version,
                            load_required_replica_num,
                            table_id,
                            partition_id,
                            write_detail
                        ));
                    }
                }
            }
        }

        // failure logs are rate limited; success logs always go out
        let need_log = publish_result != PublishResult::Failed
            || now - txn.inner().last_publish_log_time
                > config::publish_fail_log_interval_second().saturating_mul(1000);
        if need_log {
            txn.inner().last_publish_log_time = now;
            for log in logs {
                info!(
                    "{}. publish times {}, whole txn publish result {}",
                    log,
                    txn.publish_count(),
                    publish_result.name()
                );
            }
        }

        publish_result
    }

    /// Propagate the new version to every replica and advance the partitions'
    /// visible versions (spec'd failure bookkeeping for laggards included).
    fn update_catalog_after_visible(&self, txn: &Arc<TransactionState>, db: &Arc<Database>) {
        let error_replica_ids = txn.error_replicas();
        for (table_id, table_commit_info) in txn.table_commit_infos() {
            let Some(table) = db.get_table(table_id) else {
                warn!(
                    "table {} does not exist when update catalog after visible. transaction: {}",
                    table_id,
                    txn.transaction_id()
                );
                continue;
            };
            for (partition_id, partition_commit_info) in &table_commit_info.partition_commit_infos {
                let Some(partition) = table.get_partition(*partition_id) else {
                    warn!(
                        "partition {} in table {} does not exist when update catalog after visible. transaction: {}",
                        partition_id,
                        table_id,
                        txn.transaction_id()
                    );
                    continue;
                };
                let new_commit_version = partition_commit_info.version;
                for index in partition.indexes() {
                    for tablet in index.tablets() {
                        for replica in tablet.replicas() {
                            let mut last_failed_version = replica.last_failed_version();
                            let mut new_version = new_commit_version;
                            let mut last_success_version = replica.last_success_version();
                            if !error_replica_ids.contains(&replica.id()) {
                                if !replica.check_version_catch_up(partition.visible_version()) {
                                    // the replica has an unobserved gap; pin
                                    // it to its own version and mark the gap
                                    last_failed_version = partition.visible_version();
                                    new_version = replica.version();
                                }
                                // success version always moves forward
                                last_success_version = new_commit_version;
                            } else {
                                // keep the replica where it is; the next
                                // publish round may still repair it
                                new_version = replica.version();
                                if new_commit_version > last_failed_version {
                                    last_failed_version = new_commit_version;
                                }
                            }
                            replica.update_version_with_failed_info(
                                new_version,
                                last_failed_version,
                                last_success_version,
                            );
                        }
                    }
                }
                partition.update_visible_version_and_time(
                    partition_commit_info.version,
                    partition_commit_info.version_time,
                );
                debug!(
                    "transaction state {} set partition {}'s version to [{}]",
                    txn.transaction_id(),
                    partition_id,
                    partition_commit_info.version
                );
            }
        }

        // normalized loaded-row deltas, for the stats consumer
        let delta_rows = txn.table_id_to_num_delta_rows();
        if !delta_rows.is_empty() {
            let normalized: HashMap<TableId, i64> = delta_rows
                .into_iter()
                .filter_map(|(table_id, rows)| {
                    db.get_table(table_id)
                        .map(|table| (table_id, rows / table.total_replica_num().max(1) as i64))
                })
                .collect();
            debug!("table id to loaded rows: {:?}", normalized);
        }
    }

    // ---- abort -------------------------------------------------------------

    pub fn abort_transaction(&self, transaction_id: TxnId, reason: &str) -> Result<()> {
        if transaction_id < 0 {
            info!(
                "transaction id is {}, less than 0, maybe this is an old type load job, ignore abort operation",
                transaction_id
            );
            return Ok(());
        }
        let txn = {
            let indexes = self.read_indexes();
            indexes.running.get(&transaction_id).cloned()
        }
        .ok_or_else(|| {
            EngineError::TransactionNotFound(transaction_id, "transaction not found".to_string())
        })?;

        self.before_state_transform(&txn, TransactionStatus::Aborted)?;
        let result = {
            let mut indexes = self.write_indexes();
            self.unprotect_abort_transaction(&mut indexes, transaction_id, reason)
        };
        self.after_state_transform(&txn, TransactionStatus::Aborted, result.is_ok(), reason);
        result?;

        // parts of the txn may have succeeded on some backends and must be
        // cleared explicitly, or they would linger there forever
        if txn.status() == TransactionStatus::Aborted {
            self.clear_backend_transactions(&txn);
        }
        info!("abort transaction: {} successfully", txn);
        Ok(())
    }

    pub fn abort_transaction_by_label(&self, label: &str, reason: &str) -> Result<()> {
        let transaction_id = self
            .get_transaction_id_by_label_with_status(label, &[TransactionStatus::Prepare])?;
        self.abort_transaction(transaction_id, reason)
    }

    /// 2PC abort is also allowed from PRECOMMITTED.
    pub fn abort_transaction_2pc(&self, transaction_id: TxnId) -> Result<()> {
        info!("begin to abort txn {}", transaction_id);
        self.abort_transaction(transaction_id, "User Abort")
    }

    fn unprotect_abort_transaction(
        &self,
        indexes: &mut TxnIndexes,
        transaction_id: TxnId,
        reason: &str,
    ) -> Result<()> {
        let txn = indexes.get(transaction_id).ok_or_else(|| {
            EngineError::TransactionNotFound(transaction_id, "transaction not found".to_string())
        })?;
        match txn.status() {
            TransactionStatus::Aborted => {
                return Err(EngineError::TransactionNotFound(
                    transaction_id,
                    format!(
                        "transaction is already aborted, abort reason: {}",
                        txn.reason()
                    ),
                ));
            }
            TransactionStatus::Committed | TransactionStatus::Visible => {
                return Err(EngineError::Internal(format!(
                    "transaction [{}] is already {}, could not abort",
                    transaction_id,
                    txn.status()
                )));
            }
            _ => {}
        }
        {
            let mut inner = txn.inner();
            inner.finish_time = util::unix_millis();
            inner.reason = reason.to_string();
            inner.status = TransactionStatus::Aborted;
        }
        self.unprotect_upsert_transaction_state(indexes, &txn, false);
        Ok(())
    }

    /// The involved backend set of an aborted txn is unknown, so clear tasks
    /// go to every backend; they are batched to avoid an RPC per abort.
    fn clear_backend_transactions(&self, txn: &Arc<TransactionState>) {
        debug_assert_eq!(txn.status(), TransactionStatus::Aborted);
        let all_backend_ids = self.catalog.backend_ids();
        let batch = {
            let mut tasks = self
                .clear_transaction_tasks
                .lock()
                .expect("clear transaction tasks lock");
            for backend_id in &all_backend_ids {
                tasks.push(ClearTransactionTask {
                    backend_id: *backend_id,
                    transaction_id: txn.transaction_id(),
                });
            }
            if tasks.len() > all_backend_ids.len() * 2 {
                Some(std::mem::take(&mut *tasks))
            } else {
                None
            }
        };
        if let Some(batch) = batch {
            self.task_submitter.submit(batch);
        }
    }

    // ---- state bookkeeping -------------------------------------------------

    fn before_state_transform(
        &self,
        txn: &Arc<TransactionState>,
        to_status: TransactionStatus,
    ) -> Result<()> {
        if let Some(callback) = self.callback_registry.get(txn.callback_id()) {
            callback.before_state_transform(txn, to_status)?;
        }
        Ok(())
    }

    fn after_state_transform(
        &self,
        txn: &Arc<TransactionState>,
        to_status: TransactionStatus,
        txn_operated: bool,
        reason: &str,
    ) {
        if let Some(callback) = self.callback_registry.get(txn.callback_id()) {
            callback.after_state_transform(txn, to_status, txn_operated, reason);
        }
    }

    /// Maintain all indexes for an inserted/updated transaction, and persist
    /// it. PREPARE records of non-FRONTEND sources are not persisted: losing
    /// one merely fails the later commit, which the caller retries.
    fn unprotect_upsert_transaction_state(
        &self,
        indexes: &mut TxnIndexes,
        txn: &Arc<TransactionState>,
        is_replay: bool,
    ) {
        if !is_replay
            && (txn.status() != TransactionStatus::Prepare
                || txn.source_type() == LoadJobSourceType::Frontend)
        {
            self.edit_log.log_insert_transaction_state(txn);
        }

        if !txn.status().is_final() {
            if indexes
                .running
                .insert(txn.transaction_id(), Arc::clone(txn))
                .is_none()
            {
                if txn.source_type() == LoadJobSourceType::RoutineLoadTask {
                    indexes.running_routine_load_txn_num += 1;
                } else {
                    indexes.running_txn_num += 1;
                }
            }
        } else {
            if indexes.running.remove(&txn.transaction_id()).is_some() {
                if txn.source_type() == LoadJobSourceType::RoutineLoadTask {
                    indexes.running_routine_load_txn_num -= 1;
                } else {
                    indexes.running_txn_num -= 1;
                }
            }
            indexes
                .final_status
                .insert(txn.transaction_id(), Arc::clone(txn));
            if txn.is_short_txn() {
                indexes.final_deque_short.push_back(Arc::clone(txn));
            } else {
                indexes.final_deque_long.push_back(Arc::clone(txn));
            }
        }

        indexes
            .label_to_txn_ids
            .entry(txn.label().to_string())
            .or_default()
            .insert(txn.transaction_id());
    }

    fn clear_transaction_state(
        final_status: &mut HashMap<TxnId, Arc<TransactionState>>,
        label_to_txn_ids: &mut HashMap<String, HashSet<TxnId>>,
        transaction_id: TxnId,
    ) {
        let Some(txn) = final_status.remove(&transaction_id) else {
            warn!(
                "transaction state is not found when clear transaction: {}",
                transaction_id
            );
            return;
        };
        if let Some(txn_ids) = label_to_txn_ids.get_mut(txn.label()) {
            txn_ids.remove(&transaction_id);
            if txn_ids.is_empty() {
                label_to_txn_ids.remove(txn.label());
            }
        }
        debug!("transaction [{}] is expired, remove it from transaction manager", transaction_id);
    }

    // ---- expiry ------------------------------------------------------------

    fn drain_expired(
        deque: &mut VecDeque<Arc<TransactionState>>,
        final_status: &mut HashMap<TxnId, Arc<TransactionState>>,
        label_to_txn_ids: &mut HashMap<String, HashSet<TxnId>>,
        current_millis: i64,
        max_final_txns_num: i64,
        left: usize,
    ) -> (TxnId, usize) {
        let mut latest_txn_id = -1;
        let mut cleared = 0;
        while cleared < left {
            let Some(front) = deque.front() else {
                break;
            };
            if !front.is_expired(current_millis) {
                break;
            }
            let txn = deque.pop_front().expect("front just checked");
            latest_txn_id = txn.transaction_id();
            Self::clear_transaction_state(final_status, label_to_txn_ids, latest_txn_id);
            cleared += 1;
        }
        // keep each deque under its configured size ceiling too
        while deque.len() as i64 > max_final_txns_num && cleared < left {
            let Some(front) = deque.front() else {
                break;
            };
            if front.finish_time() == -1 {
                break;
            }
            let txn = deque.pop_front().expect("front just checked");
            latest_txn_id = txn.transaction_id();
            Self::clear_transaction_state(final_status, label_to_txn_ids, latest_txn_id);
            cleared += 1;
        }
        (latest_txn_id, cleared)
    }

    fn remove_useless_txns(&self, current_millis: i64) {
        let mut indexes = self.write_indexes();
        let TxnIndexes {
            final_status,
            final_deque_short,
            final_deque_long,
            label_to_txn_ids,
            ..
        } = &mut *indexes.guard;

        let (latest_short, cleared_short) = Self::drain_expired(
            final_deque_short,
            final_status,
            label_to_txn_ids,
            current_millis,
            self.max_final_txns_num,
            MAX_REMOVE_TXN_PER_ROUND,
        );
        let (latest_long, cleared_long) = Self::drain_expired(
            final_deque_long,
            final_status,
            label_to_txn_ids,
            current_millis,
            self.max_final_txns_num,
            MAX_REMOVE_TXN_PER_ROUND - cleared_short,
        );

        let cleared = cleared_short + cleared_long;
        if cleared > 0 {
            let op = BatchRemoveTransactionsOperation {
                db_id: self.db_id,
                latest_txn_id_for_short: latest_short,
                latest_txn_id_for_long: latest_long,
            };
            self.edit_log.log_batch_remove_transactions(&op);
            debug!("remove {} expired transactions", cleared);
        }
    }

    fn get_timeout_txns(&self, current_millis: i64) -> Vec<TxnId> {
        let indexes = self.read_indexes();
        indexes
            .running
            .values()
            .filter(|txn| txn.is_timeout(current_millis))
            .map(|txn| txn.transaction_id())
            .collect()
    }

    /// Periodic cleanup: drop expired final txns and abort timed-out running
    /// ones. Abort failures are logged and tolerated.
    pub fn remove_expired_and_timeout_txns(&self, current_millis: i64) {
        self.remove_useless_txns(current_millis);
        for txn_id in self.get_timeout_txns(current_millis) {
            match self.abort_transaction(txn_id, "timeout by txn manager") {
                Ok(()) => info!(
                    "transaction [{}] is timeout, abort it by transaction manager",
                    txn_id
                ),
                Err(e) => warn!("abort timeout txn {} failed. msg: {}", txn_id, e),
            }
        }
    }

    /// Eagerly drop final transactions of one label, or of every label when
    /// none is given.
    pub fn clean_label(&self, label: Option<&str>) {
        let mut removed_txn_ids: HashSet<TxnId> = HashSet::new();
        {
            let mut indexes = self.write_indexes();
            let TxnIndexes {
                final_status,
                final_deque_short,
                final_deque_long,
                label_to_txn_ids,
                ..
            } = &mut *indexes.guard;

            match label {
                None => {
                    label_to_txn_ids.retain(|_, txn_ids| {
                        txn_ids.retain(|txn_id| {
                            if final_status.remove(txn_id).is_some() {
                                removed_txn_ids.insert(*txn_id);
                                false
                            } else {
                                true
                            }
                        });
                        !txn_ids.is_empty()
                    });
                }
                Some(label) => {
                    let Some(txn_ids) = label_to_txn_ids.get_mut(label) else {
                        return;
                    };
                    txn_ids.retain(|txn_id| {
                        if final_status.remove(txn_id).is_some() {
                            removed_txn_ids.insert(*txn_id);
                            false
                        } else {
                            true
                        }
                    });
                    if txn_ids.is_empty() {
                        label_to_txn_ids.remove(label);
                    }
                }
            }
            final_deque_short.retain(|txn| !removed_txn_ids.contains(&txn.transaction_id()));
            final_deque_long.retain(|txn| !removed_txn_ids.contains(&txn.transaction_id()));

            self.edit_log.log_clean_label(self.db_id, label.unwrap_or(""));
        }
        info!(
            "clean label {:?} on db {}, removed {} final transactions",
            label,
            self.db_id,
            removed_txn_ids.len()
        );
    }

    /// Block until a COMMITTED transaction becomes VISIBLE, or the timeout
    /// runs out. Errors when the txn failed to commit at all.
    pub fn wait_for_transaction_finished(
        &self,
        transaction_id: TxnId,
        timeout_millis: u64,
    ) -> Result<bool> {
        let txn = self.get_transaction_state(transaction_id).ok_or_else(|| {
            EngineError::TransactionNotFound(transaction_id, "transaction not found".to_string())
        })?;
        match txn.status() {
            TransactionStatus::Committed | TransactionStatus::Visible => {}
            _ => {
                warn!(
                    "transaction commit failed, db={}, txn={}",
                    self.db_id, transaction_id
                );
                return Err(EngineError::TransactionCommitFailed(
                    "transaction commit failed".to_string(),
                ));
            }
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_millis);
        while txn.status() == TransactionStatus::Committed {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            txn.wait_transaction_visible(deadline - now);
        }
        Ok(txn.status() == TransactionStatus::Visible)
    }
}
