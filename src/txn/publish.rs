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
use std::sync::Arc;

use crate::common::config;
use crate::common::ids::{ReplicaId, TabletId, Version};
use crate::txn::catalog::{Replica, ReplicaState};
use crate::txn::state::PublishVersionTask;

/// Outcome of one quorum evaluation across all tablets of a transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PublishResult {
    Failed,
    /// Every tablet has at least one successful replica and the publish wait
    /// budget ran out; move forward anyway.
    TimeoutSucc,
    /// Every tablet reached quorum.
    QuorumSucc,
}

impl PublishResult {
    pub fn name(&self) -> &'static str {
        match self {
            PublishResult::Failed => "FAILED",
            PublishResult::TimeoutSucc => "TIMEOUT_SUCC",
            PublishResult::QuorumSucc => "QUORUM_SUCC",
        }
    }
}

/// Classify one replica of one tablet after a publish wave.
///
/// A success replica passed both commit and publish and is version-continuous
/// up to `version - 1`. Alter replicas get a pass for transactions below the
/// alter watershed (the alter job backfills that history later).
pub(crate) fn check_replica_continuous_version_succ(
    tablet_id: TabletId,
    replica: &Arc<Replica>,
    alter_replica_loaded_txn: bool,
    version: Version,
    backend_publish_task: Option<&Arc<PublishVersionTask>>,
    error_replica_ids: &mut HashSet<ReplicaId>,
    tablet_succ_replicas: &mut Vec<Arc<Replica>>,
    tablet_write_failed_replicas: &mut Vec<Arc<Replica>>,
    tablet_version_failed_replicas: &mut Vec<Arc<Replica>>,
) {
    match backend_publish_task {
        None => {
            error_replica_ids.insert(replica.id());
        }
        Some(task) if !task.is_finished() => {
            error_replica_ids.insert(replica.id());
        }
        Some(task) => {
            match task.succ_tablets() {
                Some(succ_tablets) => {
                    if succ_tablets.contains_key(&tablet_id) {
                        error_replica_ids.remove(&replica.id());
                    } else {
                        error_replica_ids.insert(replica.id());
                    }
                }
                None => {
                    // legacy backends only report error tablets
                    if task.error_tablets().contains(&tablet_id) {
                        error_replica_ids.insert(replica.id());
                    }
                }
            }
        }
    }

    if replica.state() == ReplicaState::Alter
        && (!alter_replica_loaded_txn || !config::publish_version_check_alter_replica())
    {
        error_replica_ids.remove(&replica.id());
    }

    if !error_replica_ids.contains(&replica.id()) {
        if replica.check_version_catch_up(version - 1) {
            tablet_succ_replicas.push(Arc::clone(replica));
        } else {
            tablet_version_failed_replicas.push(Arc::clone(replica));
        }
    } else if replica.version() >= version {
        // already advanced past the target; publish must have landed
        tablet_succ_replicas.push(Arc::clone(replica));
        error_replica_ids.remove(&replica.id());
    } else {
        tablet_write_failed_replicas.push(Arc::clone(replica));
    }
}

/// Human-readable per-tablet replica breakdown for quorum failure logs.
pub(crate) fn tablet_write_detail(
    succ: &[Arc<Replica>],
    write_failed: &[Arc<Replica>],
    version_failed: &[Arc<Replica>],
) -> String {
    let render = |replicas: &[Arc<Replica>]| {
        replicas
            .iter()
            .map(|r| {
                format!(
                    "[replica_id={}, backend_id={}, version={}, last_failed_version={}]",
                    r.id(),
                    r.backend_id(),
                    r.version(),
                    r.last_failed_version()
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut detail = String::new();
    if !succ.is_empty() {
        detail.push_str(&format!("{} replicas final succ: {{ {} }}; ", succ.len(), render(succ)));
    }
    if !write_failed.is_empty() {
        detail.push_str(&format!(
            "{} replicas write data failed: {{ {} }}; ",
            write_failed.len(),
            render(write_failed)
        ));
    }
    if !version_failed.is_empty() {
        detail.push_str(&format!(
            "{} replicas write data succ but miss previous version: {{ {} }}.",
            version_failed.len(),
            render(version_failed)
        ));
    }
    detail
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn classify(
        replica: &Arc<Replica>,
        version: Version,
        task: Option<&Arc<PublishVersionTask>>,
        error_replica_ids: &mut HashSet<ReplicaId>,
    ) -> (usize, usize, usize) {
        let mut succ = Vec::new();
        let mut write_failed = Vec::new();
        let mut version_failed = Vec::new();
        check_replica_continuous_version_succ(
            7,
            replica,
            true,
            version,
            task,
            error_replica_ids,
            &mut succ,
            &mut write_failed,
            &mut version_failed,
        );
        (succ.len(), write_failed.len(), version_failed.len())
    }

    #[test]
    fn missing_task_marks_replica_errored() {
        let replica = Replica::new(1, 100, 5);
        let mut errors = HashSet::new();
        let (succ, write_failed, _) = classify(&replica, 6, None, &mut errors);
        assert_eq!(succ, 0);
        assert_eq!(write_failed, 1);
        assert!(errors.contains(&1));
    }

    #[test]
    fn unfinished_task_marks_replica_errored() {
        let replica = Replica::new(1, 100, 5);
        let task = PublishVersionTask::new(100, 500);
        let mut errors = HashSet::new();
        let (succ, write_failed, _) = classify(&replica, 6, Some(&task), &mut errors);
        assert_eq!(succ, 0);
        assert_eq!(write_failed, 1);
    }

    #[test]
    fn reported_succ_tablet_is_success_when_continuous() {
        let replica = Replica::new(1, 100, 5);
        let task = PublishVersionTask::new(100, 500);
        task.finish_with_succ_tablets(HashMap::from([(7, 6)]));
        let mut errors = HashSet::new();
        let (succ, _, _) = classify(&replica, 6, Some(&task), &mut errors);
        assert_eq!(succ, 1);
        assert!(errors.is_empty());
    }

    #[test]
    fn reported_succ_but_lagging_is_version_failed() {
        let replica = Replica::new(1, 100, 3);
        let task = PublishVersionTask::new(100, 500);
        task.finish_with_succ_tablets(HashMap::from([(7, 6)]));
        let mut errors = HashSet::new();
        let (succ, write_failed, version_failed) = classify(&replica, 6, Some(&task), &mut errors);
        assert_eq!((succ, write_failed, version_failed), (0, 0, 1));
    }

    #[test]
    fn legacy_error_tablets_mark_replica_errored() {
        let replica = Replica::new(1, 100, 5);
        let task = PublishVersionTask::new(100, 500);
        task.finish_with_error_tablets(vec![7]);
        let mut errors = HashSet::new();
        let (succ, write_failed, _) = classify(&replica, 6, Some(&task), &mut errors);
        assert_eq!((succ, write_failed), (0, 1));
        assert!(errors.contains(&1));
    }

    #[test]
    fn errored_but_already_advanced_counts_as_success() {
        let replica = Replica::new(1, 100, 6);
        let mut errors = HashSet::new();
        // no task at all, but the replica already holds the target version
        let (succ, _, _) = classify(&replica, 6, None, &mut errors);
        assert_eq!(succ, 1);
        assert!(!errors.contains(&1));
    }

    #[test]
    fn alter_replica_below_watershed_is_forgiven() {
        let replica = Replica::new(1, 100, 5);
        replica.set_state(ReplicaState::Alter);
        let mut errors = HashSet::new();
        let mut succ = Vec::new();
        let mut write_failed = Vec::new();
        let mut version_failed = Vec::new();
        check_replica_continuous_version_succ(
            7,
            &replica,
            false, // txn predates the alter watershed
            6,
            None,
            &mut errors,
            &mut succ,
            &mut write_failed,
            &mut version_failed,
        );
        assert_eq!(succ.len(), 1);
        assert!(errors.is_empty());
    }
}
