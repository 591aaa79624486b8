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

//! Process-wide transaction dispatcher: routes every operation to the
//! per-database manager, owns the id generator and the callback registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::ids::{BackendId, DbId, RequestId, TableId, TxnId};
use crate::common::status::{EngineError, Result};
use crate::common::util;
use crate::novastore_logging::debug;
use crate::txn::catalog::{Catalog, with_tables_write_locked};
use crate::txn::database_mgr::DatabaseTransactionMgr;
use crate::txn::edit_log::EditLog;
use crate::txn::state::{
    LoadJobSourceType, TabletCommitInfo, TransactionState, TransactionStatus, TxnCoordinator,
    TxnStateChangeCallback,
};

/// Monotonic, process-unique transaction ids.
pub struct TransactionIdGenerator {
    next_id: AtomicI64,
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionIdGenerator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1001),
        }
    }

    pub fn next_transaction_id(&self) -> TxnId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Listener hooks addressed by the transaction's `callback_id`.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: Mutex<HashMap<i64, Arc<dyn TxnStateChangeCallback>>>,
}

impl CallbackRegistry {
    pub fn add(&self, callback_id: i64, callback: Arc<dyn TxnStateChangeCallback>) {
        self.callbacks
            .lock()
            .expect("callback registry lock")
            .insert(callback_id, callback);
    }

    pub fn remove(&self, callback_id: i64) {
        self.callbacks
            .lock()
            .expect("callback registry lock")
            .remove(&callback_id);
    }

    pub fn get(&self, callback_id: i64) -> Option<Arc<dyn TxnStateChangeCallback>> {
        self.callbacks
            .lock()
            .expect("callback registry lock")
            .get(&callback_id)
            .cloned()
    }
}

/// Tells one backend to drop its leftover state of an aborted transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClearTransactionTask {
    pub backend_id: BackendId,
    pub transaction_id: TxnId,
}

/// Transport seam for agent task batches.
pub trait AgentTaskSubmitter: Send + Sync {
    fn submit(&self, tasks: Vec<ClearTransactionTask>);
}

pub struct NoopAgentTaskSubmitter;

impl AgentTaskSubmitter for NoopAgentTaskSubmitter {
    fn submit(&self, tasks: Vec<ClearTransactionTask>) {
        debug!("dropping {} clear transaction tasks (no agent transport)", tasks.len());
    }
}

pub struct TransactionManager {
    catalog: Arc<Catalog>,
    edit_log: Arc<dyn EditLog>,
    id_generator: Arc<TransactionIdGenerator>,
    callback_registry: Arc<CallbackRegistry>,
    task_submitter: Arc<dyn AgentTaskSubmitter>,
    db_mgrs: Mutex<HashMap<DbId, Arc<DatabaseTransactionMgr>>>,
}

impl TransactionManager {
    pub fn new(
        catalog: Arc<Catalog>,
        edit_log: Arc<dyn EditLog>,
        task_submitter: Arc<dyn AgentTaskSubmitter>,
    ) -> Self {
        Self {
            catalog,
            edit_log,
            id_generator: Arc::new(TransactionIdGenerator::new()),
            callback_registry: Arc::new(CallbackRegistry::default()),
            task_submitter,
            db_mgrs: Mutex::new(HashMap::new()),
        }
    }

    pub fn callback_registry(&self) -> &Arc<CallbackRegistry> {
        &self.callback_registry
    }

    pub fn get_db_transaction_mgr(&self, db_id: DbId) -> Arc<DatabaseTransactionMgr> {
        let mut db_mgrs = self.db_mgrs.lock().expect("db mgrs lock");
        Arc::clone(db_mgrs.entry(db_id).or_insert_with(|| {
            Arc::new(DatabaseTransactionMgr::new(
                db_id,
                Arc::clone(&self.catalog),
                Arc::clone(&self.edit_log),
                Arc::clone(&self.id_generator),
                Arc::clone(&self.callback_registry),
                Arc::clone(&self.task_submitter),
            ))
        }))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn begin_transaction(
        &self,
        db_id: DbId,
        table_id_list: Vec<TableId>,
        label: &str,
        request_id: Option<RequestId>,
        coordinator: TxnCoordinator,
        source_type: LoadJobSourceType,
        callback_id: i64,
        timeout_ms: i64,
    ) -> Result<TxnId> {
        self.get_db_transaction_mgr(db_id).begin_transaction(
            table_id_list,
            label,
            request_id,
            coordinator,
            source_type,
            callback_id,
            timeout_ms,
        )
    }

    fn commit_with_table_locks(
        &self,
        db_id: DbId,
        transaction_id: TxnId,
        tablet_commit_infos: &[TabletCommitInfo],
        is_2pc: bool,
        pre_commit: bool,
    ) -> Result<()> {
        let mgr = self.get_db_transaction_mgr(db_id);
        let db = self.catalog.get_db_or_meta_err(db_id)?;
        let txn = mgr.get_transaction_state(transaction_id).ok_or_else(|| {
            EngineError::TransactionCommitFailed(format!(
                "transaction [{}] not found",
                transaction_id
            ))
        })?;
        let tables = db.tables_on_id_order_if_exist(&txn.table_id_list());
        with_tables_write_locked(&tables, || {
            if pre_commit {
                mgr.pre_commit_transaction_2pc(&tables, transaction_id, tablet_commit_infos)
            } else {
                mgr.commit_transaction(&tables, transaction_id, tablet_commit_infos, is_2pc)
            }
        })
    }

    pub fn commit_transaction(
        &self,
        db_id: DbId,
        transaction_id: TxnId,
        tablet_commit_infos: &[TabletCommitInfo],
    ) -> Result<()> {
        self.commit_with_table_locks(db_id, transaction_id, tablet_commit_infos, false, false)
    }

    pub fn pre_commit_transaction_2pc(
        &self,
        db_id: DbId,
        transaction_id: TxnId,
        tablet_commit_infos: &[TabletCommitInfo],
    ) -> Result<()> {
        self.commit_with_table_locks(db_id, transaction_id, tablet_commit_infos, false, true)
    }

    pub fn commit_transaction_2pc(&self, db_id: DbId, transaction_id: TxnId) -> Result<()> {
        self.commit_with_table_locks(db_id, transaction_id, &[], true, false)
    }

    pub fn finish_transaction(&self, db_id: DbId, transaction_id: TxnId) -> Result<()> {
        self.get_db_transaction_mgr(db_id).finish_transaction(transaction_id)
    }

    pub fn abort_transaction(&self, db_id: DbId, transaction_id: TxnId, reason: &str) -> Result<()> {
        self.get_db_transaction_mgr(db_id)
            .abort_transaction(transaction_id, reason)
    }

    pub fn abort_transaction_by_label(&self, db_id: DbId, label: &str, reason: &str) -> Result<()> {
        self.get_db_transaction_mgr(db_id)
            .abort_transaction_by_label(label, reason)
    }

    pub fn get_transaction_state(
        &self,
        db_id: DbId,
        transaction_id: TxnId,
    ) -> Option<Arc<TransactionState>> {
        self.get_db_transaction_mgr(db_id).get_transaction_state(transaction_id)
    }

    pub fn get_label_state(&self, db_id: DbId, label: &str) -> TransactionStatus {
        self.get_db_transaction_mgr(db_id).get_label_state(label)
    }

    pub fn get_transaction_id_by_label(&self, db_id: DbId, label: &str) -> Option<TxnId> {
        self.get_db_transaction_mgr(db_id).get_transaction_id_by_label(label)
    }

    pub fn clean_label(&self, db_id: DbId, label: Option<&str>) {
        self.get_db_transaction_mgr(db_id).clean_label(label)
    }

    pub fn wait_for_transaction_finished(
        &self,
        db_id: DbId,
        transaction_id: TxnId,
        timeout_millis: u64,
    ) -> Result<bool> {
        self.get_db_transaction_mgr(db_id)
            .wait_for_transaction_finished(transaction_id, timeout_millis)
    }

    pub fn is_previous_transactions_finished(
        &self,
        end_transaction_id: TxnId,
        db_id: DbId,
        table_ids: &[TableId],
    ) -> bool {
        self.get_db_transaction_mgr(db_id)
            .is_previous_transactions_finished(end_transaction_id, table_ids)
    }

    /// Periodic sweep over every database.
    pub fn remove_expired_and_timeout_txns(&self) {
        let current_millis = util::unix_millis();
        let mgrs: Vec<Arc<DatabaseTransactionMgr>> = {
            let db_mgrs = self.db_mgrs.lock().expect("db mgrs lock");
            db_mgrs.values().cloned().collect()
        };
        for mgr in mgrs {
            mgr.remove_expired_and_timeout_txns(current_millis);
        }
    }
}
