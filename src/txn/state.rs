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
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::common::config;
use crate::common::ids::{
    BackendId, DbId, PartitionId, ReplicaId, RequestId, TabletId, TableId, TxnId, Version,
};
use crate::common::status::Result;
use crate::common::util::{self, CountDownLatch};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TransactionStatus {
    Unknown,
    Prepare,
    Precommitted,
    Committed,
    Visible,
    Aborted,
}

impl TransactionStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, TransactionStatus::Visible | TransactionStatus::Aborted)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Unknown => "UNKNOWN",
            TransactionStatus::Prepare => "PREPARE",
            TransactionStatus::Precommitted => "PRECOMMITTED",
            TransactionStatus::Committed => "COMMITTED",
            TransactionStatus::Visible => "VISIBLE",
            TransactionStatus::Aborted => "ABORTED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum LoadJobSourceType {
    Frontend,
    Backend,
    BackendStreaming,
    InsertStreaming,
    RoutineLoadTask,
}

impl LoadJobSourceType {
    /// Streaming loads finish fast and keep their labels briefly; batch
    /// loads keep labels for the long retention window.
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            LoadJobSourceType::BackendStreaming | LoadJobSourceType::RoutineLoadTask
        )
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TxnSourceType {
    Fe,
    Be,
}

/// Where the load was initiated from; used for diagnostics and coordinator
/// eviction.
#[derive(Clone, Debug)]
pub struct TxnCoordinator {
    pub source_type: TxnSourceType,
    pub ip: String,
}

impl fmt::Display for TxnCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source_type {
            TxnSourceType::Fe => "FE",
            TxnSourceType::Be => "BE",
        };
        write!(f, "{}: {}", kind, self.ip)
    }
}

/// Reported by the load executor: this tablet's write succeeded on this
/// backend.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TabletCommitInfo {
    pub tablet_id: TabletId,
    pub backend_id: BackendId,
}

#[derive(Clone, Debug)]
pub struct PartitionCommitInfo {
    pub partition_id: PartitionId,
    pub partition_range: String,
    /// Target visible version assigned at commit; -1 until a 2PC commit
    /// assigns the real one.
    pub version: Version,
    pub version_time: i64,
}

#[derive(Clone, Debug, Default)]
pub struct TableCommitInfo {
    pub table_id: TableId,
    pub partition_commit_infos: BTreeMap<PartitionId, PartitionCommitInfo>,
}

impl TableCommitInfo {
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            partition_commit_infos: BTreeMap::new(),
        }
    }

    pub fn add_partition_commit_info(&mut self, info: PartitionCommitInfo) {
        self.partition_commit_infos.insert(info.partition_id, info);
    }
}

/// Result of one publish-version RPC to one backend. Newer backends report
/// the exact per-tablet success set; legacy ones only report error tablets.
pub struct PublishVersionTask {
    backend_id: BackendId,
    transaction_id: TxnId,
    finished: AtomicBool,
    succ_tablets: Mutex<Option<HashMap<TabletId, Version>>>,
    error_tablets: Mutex<Vec<TabletId>>,
}

impl PublishVersionTask {
    pub fn new(backend_id: BackendId, transaction_id: TxnId) -> Arc<Self> {
        Arc::new(Self {
            backend_id,
            transaction_id,
            finished: AtomicBool::new(false),
            succ_tablets: Mutex::new(None),
            error_tablets: Mutex::new(Vec::new()),
        })
    }

    pub fn backend_id(&self) -> BackendId {
        self.backend_id
    }

    pub fn transaction_id(&self) -> TxnId {
        self.transaction_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn finish_with_succ_tablets(&self, succ_tablets: HashMap<TabletId, Version>) {
        *self.succ_tablets.lock().expect("publish task lock") = Some(succ_tablets);
        self.finished.store(true, Ordering::Release);
    }

    pub fn finish_with_error_tablets(&self, error_tablets: Vec<TabletId>) {
        *self.error_tablets.lock().expect("publish task lock") = error_tablets;
        self.finished.store(true, Ordering::Release);
    }

    pub fn succ_tablets(&self) -> Option<HashMap<TabletId, Version>> {
        self.succ_tablets.lock().expect("publish task lock").clone()
    }

    pub fn error_tablets(&self) -> Vec<TabletId> {
        self.error_tablets.lock().expect("publish task lock").clone()
    }
}

/// Hooks a load job registers to observe its transaction's transitions,
/// resolved through the callback id.
pub trait TxnStateChangeCallback: Send + Sync {
    fn before_state_transform(
        &self,
        txn: &TransactionState,
        to_status: TransactionStatus,
    ) -> Result<()> {
        let _ = (txn, to_status);
        Ok(())
    }

    fn after_state_transform(
        &self,
        txn: &TransactionState,
        to_status: TransactionStatus,
        txn_operated: bool,
        reason: &str,
    ) {
        let _ = (txn, to_status, txn_operated, reason);
    }
}

pub(crate) struct TxnStateInner {
    pub status: TransactionStatus,
    pub table_id_list: Vec<TableId>,
    pub timeout_ms: i64,
    pub pre_commit_time: i64,
    pub commit_time: i64,
    pub finish_time: i64,
    pub first_publish_version_time: i64,
    pub last_publish_version_time: i64,
    pub last_publish_log_time: i64,
    pub publish_count: i64,
    pub prolonged_publish_timeout: bool,
    pub reason: String,
    pub err_msg: String,
    pub error_replicas: HashSet<ReplicaId>,
    pub table_commit_infos: BTreeMap<TableId, TableCommitInfo>,
    pub publish_version_tasks: HashMap<BackendId, Option<Arc<PublishVersionTask>>>,
    pub loaded_tbl_indexes: HashMap<TableId, Vec<i64>>,
    pub table_id_to_num_delta_rows: HashMap<TableId, i64>,
}

/// One load transaction. Identity fields are immutable; everything that a
/// state transition touches lives behind the inner mutex, serialized in
/// practice by the per-database transaction lock.
pub struct TransactionState {
    db_id: DbId,
    transaction_id: TxnId,
    label: String,
    request_id: Option<RequestId>,
    source_type: LoadJobSourceType,
    coordinator: TxnCoordinator,
    callback_id: i64,
    prepare_time: i64,
    inner: Mutex<TxnStateInner>,
    visible_latch: CountDownLatch,
}

impl TransactionState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_id: DbId,
        table_id_list: Vec<TableId>,
        transaction_id: TxnId,
        label: impl Into<String>,
        request_id: Option<RequestId>,
        source_type: LoadJobSourceType,
        coordinator: TxnCoordinator,
        callback_id: i64,
        timeout_ms: i64,
    ) -> Arc<Self> {
        Arc::new(Self {
            db_id,
            transaction_id,
            label: label.into(),
            request_id,
            source_type,
            coordinator,
            callback_id,
            prepare_time: util::unix_millis(),
            inner: Mutex::new(TxnStateInner {
                status: TransactionStatus::Prepare,
                table_id_list,
                timeout_ms,
                pre_commit_time: -1,
                commit_time: -1,
                finish_time: -1,
                first_publish_version_time: -1,
                last_publish_version_time: -1,
                last_publish_log_time: -1,
                publish_count: 0,
                prolonged_publish_timeout: false,
                reason: String::new(),
                err_msg: String::new(),
                error_replicas: HashSet::new(),
                table_commit_infos: BTreeMap::new(),
                publish_version_tasks: HashMap::new(),
                loaded_tbl_indexes: HashMap::new(),
                table_id_to_num_delta_rows: HashMap::new(),
            }),
            visible_latch: CountDownLatch::new(1),
        })
    }

    pub(crate) fn inner(&self) -> MutexGuard<'_, TxnStateInner> {
        self.inner.lock().expect("txn state lock")
    }

    pub fn db_id(&self) -> DbId {
        self.db_id
    }

    pub fn transaction_id(&self) -> TxnId {
        self.transaction_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    pub fn source_type(&self) -> LoadJobSourceType {
        self.source_type
    }

    pub fn coordinator(&self) -> &TxnCoordinator {
        &self.coordinator
    }

    pub fn callback_id(&self) -> i64 {
        self.callback_id
    }

    pub fn prepare_time(&self) -> i64 {
        self.prepare_time
    }

    pub fn status(&self) -> TransactionStatus {
        self.inner().status
    }

    pub fn table_id_list(&self) -> Vec<TableId> {
        self.inner().table_id_list.clone()
    }

    pub fn set_table_id_list(&self, table_ids: Vec<TableId>) {
        self.inner().table_id_list = table_ids;
    }

    pub fn timeout_ms(&self) -> i64 {
        self.inner().timeout_ms
    }

    pub fn reason(&self) -> String {
        self.inner().reason.clone()
    }

    pub fn err_msg(&self) -> String {
        self.inner().err_msg.clone()
    }

    pub fn set_err_msg(&self, msg: impl Into<String>) {
        self.inner().err_msg = msg.into();
    }

    pub fn clear_err_msg(&self) {
        self.inner().err_msg.clear();
    }

    pub fn commit_time(&self) -> i64 {
        self.inner().commit_time
    }

    pub fn finish_time(&self) -> i64 {
        self.inner().finish_time
    }

    pub fn error_replicas(&self) -> HashSet<ReplicaId> {
        self.inner().error_replicas.clone()
    }

    pub fn set_error_replicas(&self, error_replicas: HashSet<ReplicaId>) {
        self.inner().error_replicas = error_replicas;
    }

    pub fn table_commit_infos(&self) -> BTreeMap<TableId, TableCommitInfo> {
        self.inner().table_commit_infos.clone()
    }

    pub fn loaded_tbl_indexes(&self) -> HashMap<TableId, Vec<i64>> {
        self.inner().loaded_tbl_indexes.clone()
    }

    pub fn set_loaded_tbl_indexes(&self, loaded: HashMap<TableId, Vec<i64>>) {
        self.inner().loaded_tbl_indexes = loaded;
    }

    pub fn add_table_num_delta_rows(&self, table_id: TableId, num_rows: i64) {
        *self
            .inner()
            .table_id_to_num_delta_rows
            .entry(table_id)
            .or_insert(0) += num_rows;
    }

    pub fn table_id_to_num_delta_rows(&self) -> HashMap<TableId, i64> {
        self.inner().table_id_to_num_delta_rows.clone()
    }

    pub fn publish_count(&self) -> i64 {
        self.inner().publish_count
    }

    pub fn first_publish_version_time(&self) -> i64 {
        self.inner().first_publish_version_time
    }

    /// Record one publish wave being sent.
    pub fn on_publish_version_sent(&self, now_millis: i64) {
        let mut inner = self.inner();
        if inner.first_publish_version_time < 0 {
            inner.first_publish_version_time = now_millis;
        }
        inner.last_publish_version_time = now_millis;
        inner.publish_count += 1;
    }

    pub fn publish_version_tasks(
        &self,
    ) -> HashMap<BackendId, Option<Arc<PublishVersionTask>>> {
        self.inner().publish_version_tasks.clone()
    }

    pub fn add_publish_version_task(
        &self,
        backend_id: BackendId,
        task: Option<Arc<PublishVersionTask>>,
    ) {
        self.inner().publish_version_tasks.insert(backend_id, task);
    }

    /// Give publish tasks extra headroom while the table is under rollup or
    /// schema change: a timed-out publish would fail the whole alter job.
    pub fn prolong_publish_timeout(&self) {
        self.inner().prolonged_publish_timeout = true;
    }

    pub fn is_publish_timeout_prolonged(&self) -> bool {
        self.inner().prolonged_publish_timeout
    }

    pub fn is_short_txn(&self) -> bool {
        self.source_type.is_streaming()
    }

    /// Final transactions expire once their label retention window passed.
    pub fn is_expired(&self, current_millis: i64) -> bool {
        let inner = self.inner();
        if !inner.status.is_final() || inner.finish_time < 0 {
            return false;
        }
        let keep_sec = if self.is_short_txn() {
            config::streaming_label_keep_max_second()
        } else {
            config::label_keep_max_second()
        };
        current_millis - inner.finish_time > keep_sec.saturating_mul(1000)
    }

    /// A PREPARE transaction past its own timeout budget.
    pub fn is_timeout(&self, current_millis: i64) -> bool {
        let inner = self.inner();
        inner.status == TransactionStatus::Prepare
            && current_millis - self.prepare_time > inner.timeout_ms
    }

    pub fn countdown_visible_latch(&self) {
        self.visible_latch.count_down();
    }

    pub fn wait_transaction_visible(&self, timeout: Duration) -> bool {
        self.visible_latch.wait_timeout(timeout)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner();
        write!(
            f,
            "TransactionState. txn_id: {}, label: {}, db id: {}, table id list: {}, \
             status: {}, coordinator: {}, reason: {}",
            self.transaction_id,
            self.label,
            self.db_id,
            inner
                .table_id_list
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(","),
            inner.status,
            self.coordinator,
            inner.reason
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> TxnCoordinator {
        TxnCoordinator {
            source_type: TxnSourceType::Fe,
            ip: "127.0.0.1".to_string(),
        }
    }

    fn txn(source_type: LoadJobSourceType, timeout_ms: i64) -> Arc<TransactionState> {
        TransactionState::new(
            1,
            vec![10],
            100,
            "label_1",
            None,
            source_type,
            coordinator(),
            -1,
            timeout_ms,
        )
    }

    #[test]
    fn new_txn_starts_in_prepare() {
        let txn = txn(LoadJobSourceType::Frontend, 1000);
        assert_eq!(txn.status(), TransactionStatus::Prepare);
        assert!(!txn.status().is_final());
        assert!(txn.commit_time() < 0);
    }

    #[test]
    fn timeout_is_relative_to_prepare_time() {
        let txn = txn(LoadJobSourceType::Frontend, 1000);
        let now = txn.prepare_time();
        assert!(!txn.is_timeout(now + 999));
        assert!(txn.is_timeout(now + 1001));
    }

    #[test]
    fn timeout_only_applies_to_prepare() {
        let txn = txn(LoadJobSourceType::Frontend, 1000);
        txn.inner().status = TransactionStatus::Committed;
        assert!(!txn.is_timeout(txn.prepare_time() + 10_000));
    }

    #[test]
    fn expiry_uses_retention_class() {
        let short = txn(LoadJobSourceType::BackendStreaming, 1000);
        assert!(short.is_short_txn());
        {
            let mut inner = short.inner();
            inner.status = TransactionStatus::Visible;
            inner.finish_time = 0;
        }
        let streaming_keep_ms = config::streaming_label_keep_max_second() * 1000;
        assert!(!short.is_expired(streaming_keep_ms - 1));
        assert!(short.is_expired(streaming_keep_ms + 1));

        let long = txn(LoadJobSourceType::Frontend, 1000);
        assert!(!long.is_short_txn());
        {
            let mut inner = long.inner();
            inner.status = TransactionStatus::Aborted;
            inner.finish_time = 0;
        }
        assert!(!long.is_expired(streaming_keep_ms + 1));
        assert!(long.is_expired(config::label_keep_max_second() * 1000 + 1));
    }

    #[test]
    fn running_txn_never_expires() {
        let txn = txn(LoadJobSourceType::Frontend, 1000);
        assert!(!txn.is_expired(i64::MAX));
    }

    #[test]
    fn publish_wave_bookkeeping() {
        let txn = txn(LoadJobSourceType::Frontend, 1000);
        txn.on_publish_version_sent(100);
        txn.on_publish_version_sent(200);
        assert_eq!(txn.first_publish_version_time(), 100);
        assert_eq!(txn.publish_count(), 2);
    }

    #[test]
    fn visible_latch_unblocks_waiters() {
        let txn = txn(LoadJobSourceType::Frontend, 1000);
        assert!(!txn.wait_transaction_visible(Duration::from_millis(1)));
        txn.countdown_visible_latch();
        assert!(txn.wait_transaction_visible(Duration::from_millis(1)));
    }
}
