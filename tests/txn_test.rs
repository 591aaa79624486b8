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
//! Integration tests for the load-transaction state machine: begin/label
//! rules, quorum commit, publish and visibility, abort, expiry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use novastore::common::ids::{BackendId, RequestId, TxnId};
use novastore::common::status::EngineError;
use novastore::common::util::unix_millis;
use novastore::txn::catalog::{Catalog, OlapTableState};
use novastore::txn::edit_log::{EditLogEntry, MemoryEditLog};
use novastore::txn::manager::{
    AgentTaskSubmitter, ClearTransactionTask, TransactionManager,
};
use novastore::txn::state::{
    LoadJobSourceType, PublishVersionTask, TabletCommitInfo, TransactionState, TransactionStatus,
    TxnCoordinator, TxnSourceType,
};

mod common;

use common::{BACKEND_IDS, DB_ID, PARTITION_ID, REPLICA_IDS, TABLE_ID, TABLET_ID, build_small_catalog};

#[derive(Default)]
struct RecordingSubmitter {
    batches: Mutex<Vec<Vec<ClearTransactionTask>>>,
}

impl AgentTaskSubmitter for RecordingSubmitter {
    fn submit(&self, tasks: Vec<ClearTransactionTask>) {
        self.batches.lock().unwrap().push(tasks);
    }
}

struct TestEnv {
    catalog: Arc<Catalog>,
    edit_log: Arc<MemoryEditLog>,
    submitter: Arc<RecordingSubmitter>,
    mgr: TransactionManager,
}

fn test_env() -> TestEnv {
    let catalog = build_small_catalog();
    let edit_log = Arc::new(MemoryEditLog::new());
    let submitter = Arc::new(RecordingSubmitter::default());
    let edit_log_handle: Arc<dyn novastore::txn::edit_log::EditLog> = edit_log.clone() as _;
    let submitter_handle: Arc<dyn AgentTaskSubmitter> = submitter.clone() as _;
    let mgr = TransactionManager::new(Arc::clone(&catalog), edit_log_handle, submitter_handle);
    TestEnv {
        catalog,
        edit_log,
        submitter,
        mgr,
    }
}

fn coordinator() -> TxnCoordinator {
    TxnCoordinator {
        source_type: TxnSourceType::Fe,
        ip: "127.0.0.1".to_string(),
    }
}

fn begin(env: &TestEnv, label: &str, request_id: Option<RequestId>) -> Result<TxnId, EngineError> {
    env.mgr.begin_transaction(
        DB_ID,
        vec![TABLE_ID],
        label,
        request_id,
        coordinator(),
        LoadJobSourceType::Frontend,
        -1,
        60_000,
    )
}

fn commit_infos(backends: &[BackendId]) -> Vec<TabletCommitInfo> {
    backends
        .iter()
        .map(|backend_id| TabletCommitInfo {
            tablet_id: TABLET_ID,
            backend_id: *backend_id,
        })
        .collect()
}

/// Attach finished publish tasks reporting tablet success for `backends`,
/// and unfinished tasks for the rest.
fn publish_wave(txn: &Arc<TransactionState>, succ_backends: &[BackendId], sent_at_millis: i64) {
    for backend_id in BACKEND_IDS {
        let task = PublishVersionTask::new(backend_id, txn.transaction_id());
        if succ_backends.contains(&backend_id) {
            task.finish_with_succ_tablets(HashMap::from([(TABLET_ID, 6)]));
        }
        txn.add_publish_version_task(backend_id, Some(task));
    }
    txn.on_publish_version_sent(sent_at_millis);
}

#[test]
fn begin_retry_with_same_request_id_returns_existing_txn() {
    let env = test_env();
    let request = RequestId { hi: 7, lo: 8 };
    let txn_id = begin(&env, "L1", Some(request)).unwrap();

    // same label + same request id while PREPARE: idempotent retry
    let retry = begin(&env, "L1", Some(request));
    match retry {
        Err(EngineError::DuplicatedRequest { txn_id: existing, .. }) => {
            assert_eq!(existing, txn_id);
        }
        other => panic!("expected DuplicatedRequest, got {:?}", other.map(|_| ())),
    }

    // different request id: the label is simply taken
    let other = begin(&env, "L1", Some(RequestId { hi: 9, lo: 9 }));
    assert!(matches!(other, Err(EngineError::LabelAlreadyUsed { .. })));
}

#[test]
fn begin_rejects_malformed_labels() {
    let env = test_env();
    assert!(begin(&env, "", None).is_err());
    assert!(begin(&env, "label with spaces", None).is_err());
    assert!(begin(&env, &"x".repeat(200), None).is_err());
}

#[test]
fn begin_respects_running_txn_quota() {
    let env = test_env();
    let db = env.catalog.get_db(DB_ID).unwrap();
    db.set_transaction_quota(1);
    begin(&env, "L1", None).unwrap();
    let second = begin(&env, "L2", None);
    assert!(matches!(second, Err(EngineError::BeginTxnLimitExceeded(_))));
}

#[test]
fn begin_respects_data_quota() {
    let env = test_env();
    let db = env.catalog.get_db(DB_ID).unwrap();
    db.set_data_quota_bytes(100);
    db.set_used_data_bytes(100);
    assert!(matches!(
        begin(&env, "L1", None),
        Err(EngineError::QuotaExceeded { .. })
    ));
}

#[test]
fn quorum_commit_records_error_replicas_and_advances_next_version() {
    let env = test_env();
    let txn_id = begin(&env, "L1", None).unwrap();

    // backends 101 and 102 report success, 103 is missing; quorum is 2
    env.mgr
        .commit_transaction(DB_ID, txn_id, &commit_infos(&BACKEND_IDS[..2]))
        .unwrap();

    let txn = env.mgr.get_transaction_state(DB_ID, txn_id).unwrap();
    assert_eq!(txn.status(), TransactionStatus::Committed);
    assert_eq!(txn.error_replicas(), [REPLICA_IDS[2]].into_iter().collect());

    let commit_infos = txn.table_commit_infos();
    let pci = &commit_infos[&TABLE_ID].partition_commit_infos[&PARTITION_ID];
    assert_eq!(pci.version, 6);

    let partition = env
        .catalog
        .get_db(DB_ID)
        .unwrap()
        .get_table(TABLE_ID)
        .unwrap()
        .get_partition(PARTITION_ID)
        .unwrap();
    assert_eq!(partition.next_version(), 7);
    assert_eq!(partition.visible_version(), 5);
}

#[test]
fn commit_below_quorum_fails_and_txn_stays_prepare() {
    let env = test_env();
    let txn_id = begin(&env, "L1", None).unwrap();

    let result = env
        .mgr
        .commit_transaction(DB_ID, txn_id, &commit_infos(&BACKEND_IDS[..1]));
    assert!(matches!(
        result,
        Err(EngineError::TabletQuorumFailed { tablet_id: TABLET_ID, .. })
    ));

    let txn = env.mgr.get_transaction_state(DB_ID, txn_id).unwrap();
    assert_eq!(txn.status(), TransactionStatus::Prepare);
    // nothing was assigned, the partition is untouched
    let partition = env
        .catalog
        .get_db(DB_ID)
        .unwrap()
        .get_table(TABLE_ID)
        .unwrap()
        .get_partition(PARTITION_ID)
        .unwrap();
    assert_eq!(partition.next_version(), 6);
}

#[test]
fn commit_into_restoring_table_is_refused() {
    let env = test_env();
    let txn_id = begin(&env, "L1", None).unwrap();
    let table = env.catalog.get_db(DB_ID).unwrap().get_table(TABLE_ID).unwrap();
    table.set_state(OlapTableState::Restore);
    let result = env.mgr.commit_transaction(DB_ID, txn_id, &commit_infos(&BACKEND_IDS));
    assert!(matches!(result, Err(EngineError::TransactionCommitFailed(_))));
}

#[test]
fn full_publish_cycle_advances_visible_version() {
    let env = test_env();
    let txn_id = begin(&env, "L1", None).unwrap();
    env.mgr
        .commit_transaction(DB_ID, txn_id, &commit_infos(&BACKEND_IDS))
        .unwrap();

    let txn = env.mgr.get_transaction_state(DB_ID, txn_id).unwrap();
    publish_wave(&txn, &BACKEND_IDS, unix_millis());
    env.mgr.finish_transaction(DB_ID, txn_id).unwrap();

    assert_eq!(txn.status(), TransactionStatus::Visible);
    let partition = env
        .catalog
        .get_db(DB_ID)
        .unwrap()
        .get_table(TABLE_ID)
        .unwrap()
        .get_partition(PARTITION_ID)
        .unwrap();
    assert_eq!(partition.visible_version(), 6);

    // quorum property: enough replicas hold the new version
    let caught_up = env
        .catalog
        .inverted_index()
        .get_replica(TABLET_ID, BACKEND_IDS[0])
        .into_iter()
        .chain(env.catalog.inverted_index().get_replica(TABLET_ID, BACKEND_IDS[1]))
        .chain(env.catalog.inverted_index().get_replica(TABLET_ID, BACKEND_IDS[2]))
        .filter(|replica| replica.version() >= 6)
        .count();
    assert!(caught_up >= 2);

    // waiting afterwards returns immediately
    assert!(env.mgr.wait_for_transaction_finished(DB_ID, txn_id, 10).unwrap());
}

#[test]
fn publish_below_quorum_keeps_txn_committed() {
    let env = test_env();
    let txn_id = begin(&env, "L1", None).unwrap();
    env.mgr
        .commit_transaction(DB_ID, txn_id, &commit_infos(&BACKEND_IDS))
        .unwrap();

    let txn = env.mgr.get_transaction_state(DB_ID, txn_id).unwrap();
    // only one backend published; the wave was just sent, no timeout yet
    publish_wave(&txn, &BACKEND_IDS[..1], unix_millis());
    env.mgr.finish_transaction(DB_ID, txn_id).unwrap();

    assert_eq!(txn.status(), TransactionStatus::Committed);
    assert!(txn.err_msg().contains("publish on tablet"));
    let partition = env
        .catalog
        .get_db(DB_ID)
        .unwrap()
        .get_table(TABLE_ID)
        .unwrap()
        .get_partition(PARTITION_ID)
        .unwrap();
    assert_eq!(partition.visible_version(), 5);
}

#[test]
fn publish_timeout_promotes_single_success() {
    let env = test_env();
    let txn_id = begin(&env, "L1", None).unwrap();
    env.mgr
        .commit_transaction(DB_ID, txn_id, &commit_infos(&BACKEND_IDS))
        .unwrap();

    let txn = env.mgr.get_transaction_state(DB_ID, txn_id).unwrap();
    // first publish happened longer ago than the default
    // publish_wait_time_second (300s)
    let wait_ms = 300 * 1000;
    publish_wave(&txn, &BACKEND_IDS[..1], unix_millis() - wait_ms - 1000);
    env.mgr.finish_transaction(DB_ID, txn_id).unwrap();

    assert_eq!(txn.status(), TransactionStatus::Visible);
    let partition = env
        .catalog
        .get_db(DB_ID)
        .unwrap()
        .get_table(TABLE_ID)
        .unwrap()
        .get_partition(PARTITION_ID)
        .unwrap();
    assert_eq!(partition.visible_version(), 6);

    // failed replicas carry the new version as their failure watermark
    let lagging = env
        .catalog
        .inverted_index()
        .get_replica(TABLET_ID, BACKEND_IDS[2])
        .unwrap();
    assert_eq!(lagging.last_failed_version(), 6);
    assert_eq!(lagging.version(), 5);
}

#[test]
fn later_commit_waits_for_earlier_publish() {
    let env = test_env();
    let txn1 = begin(&env, "L1", None).unwrap();
    env.mgr.commit_transaction(DB_ID, txn1, &commit_infos(&BACKEND_IDS)).unwrap();
    let txn2 = begin(&env, "L2", None).unwrap();
    env.mgr.commit_transaction(DB_ID, txn2, &commit_infos(&BACKEND_IDS)).unwrap();

    let state1 = env.mgr.get_transaction_state(DB_ID, txn1).unwrap();
    let state2 = env.mgr.get_transaction_state(DB_ID, txn2).unwrap();
    publish_wave(&state1, &BACKEND_IDS, unix_millis());
    for backend_id in BACKEND_IDS {
        let task = PublishVersionTask::new(backend_id, txn2);
        task.finish_with_succ_tablets(HashMap::from([(TABLET_ID, 7)]));
        state2.add_publish_version_task(backend_id, Some(task));
    }
    state2.on_publish_version_sent(unix_millis());

    // txn2 carries version 7 but visible is still 5: it has to wait
    env.mgr.finish_transaction(DB_ID, txn2).unwrap();
    assert_eq!(state2.status(), TransactionStatus::Committed);
    assert!(state2.err_msg().contains("wait for publishing"));

    env.mgr.finish_transaction(DB_ID, txn1).unwrap();
    assert_eq!(state1.status(), TransactionStatus::Visible);

    env.mgr.finish_transaction(DB_ID, txn2).unwrap();
    assert_eq!(state2.status(), TransactionStatus::Visible);

    let partition = env
        .catalog
        .get_db(DB_ID)
        .unwrap()
        .get_table(TABLE_ID)
        .unwrap()
        .get_partition(PARTITION_ID)
        .unwrap();
    assert_eq!(partition.visible_version(), 7);
}

#[test]
fn two_phase_commit_assigns_version_at_second_phase() {
    let env = test_env();
    let txn_id = begin(&env, "L1", None).unwrap();

    env.mgr
        .pre_commit_transaction_2pc(DB_ID, txn_id, &commit_infos(&BACKEND_IDS))
        .unwrap();
    let txn = env.mgr.get_transaction_state(DB_ID, txn_id).unwrap();
    assert_eq!(txn.status(), TransactionStatus::Precommitted);
    let pci_version = txn.table_commit_infos()[&TABLE_ID].partition_commit_infos[&PARTITION_ID].version;
    assert_eq!(pci_version, -1);

    env.mgr.commit_transaction_2pc(DB_ID, txn_id).unwrap();
    assert_eq!(txn.status(), TransactionStatus::Committed);
    let pci_version = txn.table_commit_infos()[&TABLE_ID].partition_commit_infos[&PARTITION_ID].version;
    assert_eq!(pci_version, 6);

    publish_wave(&txn, &BACKEND_IDS, unix_millis());
    env.mgr.finish_transaction(DB_ID, txn_id).unwrap();
    assert_eq!(txn.status(), TransactionStatus::Visible);
}

#[test]
fn abort_is_only_legal_before_commit() {
    let env = test_env();
    let txn1 = begin(&env, "L1", None).unwrap();
    env.mgr.abort_transaction(DB_ID, txn1, "user cancel").unwrap();
    let state1 = env.mgr.get_transaction_state(DB_ID, txn1).unwrap();
    assert_eq!(state1.status(), TransactionStatus::Aborted);
    assert_eq!(state1.reason(), "user cancel");

    // the label is free again once its only txn is aborted
    let txn2 = begin(&env, "L1", None).unwrap();
    env.mgr.commit_transaction(DB_ID, txn2, &commit_infos(&BACKEND_IDS)).unwrap();
    let result = env.mgr.abort_transaction(DB_ID, txn2, "too late");
    assert!(result.is_err());
    assert_eq!(
        env.mgr.get_transaction_state(DB_ID, txn2).unwrap().status(),
        TransactionStatus::Committed
    );
}

#[test]
fn aborts_batch_clear_tasks_to_all_backends() {
    let env = test_env();
    // each abort queues 3 tasks; the batch flushes once the queue exceeds
    // 2 x backend count (6)
    for i in 0..3 {
        let txn_id = begin(&env, &format!("L{}", i), None).unwrap();
        env.mgr.abort_transaction(DB_ID, txn_id, "cancel").unwrap();
    }
    let batches = env.submitter.batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 9);
    assert!(batches[0].iter().any(|task| task.backend_id == BACKEND_IDS[2]));
}

#[test]
fn expired_final_txns_are_swept_and_labels_freed() {
    let env = test_env();
    let txn_id = begin(&env, "L1", None).unwrap();
    env.mgr.abort_transaction(DB_ID, txn_id, "cancel").unwrap();

    let db_mgr = env.mgr.get_db_transaction_mgr(DB_ID);
    assert_eq!(db_mgr.finished_txn_num(), 1);

    // default label_keep_max_second is 259200
    let keep_ms = 259_200 * 1000;
    db_mgr.remove_expired_and_timeout_txns(unix_millis() + keep_ms + 10_000);

    assert_eq!(db_mgr.finished_txn_num(), 0);
    assert_eq!(db_mgr.get_transaction_id_by_label("L1"), None);
    assert!(env
        .edit_log
        .entries()
        .iter()
        .any(|entry| matches!(entry, EditLogEntry::BatchRemoveTransactions(_))));

    // label index consistency survives the sweep
    begin(&env, "L1", None).unwrap();
}

#[test]
fn timed_out_prepare_txns_are_aborted_by_the_sweeper() {
    let env = test_env();
    let txn_id = env
        .mgr
        .begin_transaction(
            DB_ID,
            vec![TABLE_ID],
            "L1",
            None,
            coordinator(),
            LoadJobSourceType::Frontend,
            -1,
            1, // 1ms timeout
        )
        .unwrap();

    let db_mgr = env.mgr.get_db_transaction_mgr(DB_ID);
    db_mgr.remove_expired_and_timeout_txns(unix_millis() + 10_000);

    let txn = env.mgr.get_transaction_state(DB_ID, txn_id).unwrap();
    assert_eq!(txn.status(), TransactionStatus::Aborted);
    assert_eq!(txn.reason(), "timeout by txn manager");
}

#[test]
fn clean_label_drops_final_txns_only() {
    let env = test_env();
    let aborted = begin(&env, "L1", None).unwrap();
    env.mgr.abort_transaction(DB_ID, aborted, "cancel").unwrap();
    let running = begin(&env, "L2", None).unwrap();

    env.mgr.clean_label(DB_ID, Some("L1"));
    let db_mgr = env.mgr.get_db_transaction_mgr(DB_ID);
    assert_eq!(db_mgr.get_transaction_id_by_label("L1"), None);
    assert_eq!(db_mgr.get_transaction_id_by_label("L2"), Some(running));
    assert_eq!(db_mgr.running_txn_num(), 1);
    assert!(env
        .edit_log
        .entries()
        .iter()
        .any(|entry| matches!(entry, EditLogEntry::CleanLabel { .. })));
}

#[test]
fn label_state_tracks_newest_txn() {
    let env = test_env();
    assert_eq!(env.mgr.get_label_state(DB_ID, "L1"), TransactionStatus::Unknown);
    let txn1 = begin(&env, "L1", None).unwrap();
    assert_eq!(env.mgr.get_label_state(DB_ID, "L1"), TransactionStatus::Prepare);
    env.mgr.abort_transaction(DB_ID, txn1, "cancel").unwrap();
    let _txn2 = begin(&env, "L1", None).unwrap();
    assert_eq!(env.mgr.get_label_state(DB_ID, "L1"), TransactionStatus::Prepare);
}

#[test]
fn previous_transactions_watermark() {
    let env = test_env();
    let txn1 = begin(&env, "L1", None).unwrap();
    assert!(!env.mgr.is_previous_transactions_finished(txn1, DB_ID, &[TABLE_ID]));
    // an unrelated table does not block
    assert!(env.mgr.is_previous_transactions_finished(txn1, DB_ID, &[9999]));
    env.mgr.abort_transaction(DB_ID, txn1, "cancel").unwrap();
    assert!(env.mgr.is_previous_transactions_finished(txn1, DB_ID, &[TABLE_ID]));
}

#[test]
fn prepare_of_frontend_source_is_persisted() {
    let env = test_env();
    let txn_id = begin(&env, "L1", None).unwrap();
    let entries = env.edit_log.entries();
    assert!(entries.iter().any(|entry| matches!(
        entry,
        EditLogEntry::InsertTransactionState { txn_id: id, status: TransactionStatus::Prepare, .. }
        if *id == txn_id
    )));

    // a streaming-source PREPARE is not persisted
    let streaming = env
        .mgr
        .begin_transaction(
            DB_ID,
            vec![TABLE_ID],
            "L2",
            None,
            coordinator(),
            LoadJobSourceType::BackendStreaming,
            -1,
            60_000,
        )
        .unwrap();
    let entries = env.edit_log.entries();
    assert!(!entries.iter().any(|entry| matches!(
        entry,
        EditLogEntry::InsertTransactionState { txn_id: id, .. } if *id == streaming
    )));
}
