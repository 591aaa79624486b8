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
use crate::common::app_config::config as novastore_app_config;

pub(crate) fn min_file_descriptor_number() -> u64 {
    novastore_app_config()
        .ok()
        .map(|c| c.storage.min_file_descriptor_number)
        .unwrap_or(60_000)
}

pub(crate) fn cluster_id() -> i32 {
    novastore_app_config()
        .ok()
        .map(|c| c.storage.cluster_id)
        .unwrap_or(-1)
}

pub(crate) fn max_percentage_of_error_disk() -> u32 {
    novastore_app_config()
        .ok()
        .map(|c| c.storage.max_percentage_of_error_disk)
        .unwrap_or(0)
}

pub(crate) fn snapshot_expire_time_sec() -> i64 {
    novastore_app_config()
        .ok()
        .map(|c| c.storage.snapshot_expire_time_sec)
        .unwrap_or(172_800)
}

pub(crate) fn trash_file_expire_time_sec() -> i64 {
    novastore_app_config()
        .ok()
        .map(|c| c.storage.trash_file_expire_time_sec)
        .unwrap_or(259_200)
}

pub(crate) fn storage_flood_stage_usage_percent() -> i32 {
    novastore_app_config()
        .ok()
        .map(|c| c.storage.storage_flood_stage_usage_percent)
        .unwrap_or(90)
}

pub(crate) fn garbage_sweep_batch_size() -> i32 {
    novastore_app_config()
        .ok()
        .map(|c| c.storage.garbage_sweep_batch_size)
        .unwrap_or(100)
}

pub(crate) fn default_rowset_type() -> String {
    novastore_app_config()
        .ok()
        .map(|c| c.storage.default_rowset_type.clone())
        .unwrap_or_else(|| "BETA".to_string())
}

pub(crate) fn partition_disk_index_lru_size() -> usize {
    novastore_app_config()
        .ok()
        .map(|c| c.storage.partition_disk_index_lru_size)
        .unwrap_or(10_000)
}

pub(crate) fn unused_rowset_monitor_interval_sec() -> u64 {
    novastore_app_config()
        .ok()
        .map(|c| c.storage.unused_rowset_monitor_interval_sec)
        .unwrap_or(30)
}

pub(crate) fn disk_stat_monitor_interval_sec() -> u64 {
    novastore_app_config()
        .ok()
        .map(|c| c.storage.disk_stat_monitor_interval_sec)
        .unwrap_or(5)
}

pub(crate) fn min_garbage_sweep_interval_sec() -> u64 {
    novastore_app_config()
        .ok()
        .map(|c| c.storage.min_garbage_sweep_interval_sec)
        .unwrap_or(180)
}

pub(crate) fn max_garbage_sweep_interval_sec() -> u64 {
    novastore_app_config()
        .ok()
        .map(|c| c.storage.max_garbage_sweep_interval_sec)
        .unwrap_or(3600)
}

pub(crate) fn txn_map_shard_size() -> usize {
    novastore_app_config()
        .ok()
        .map(|c| c.txn.txn_map_shard_size)
        .unwrap_or(128)
}

pub(crate) fn label_num_threshold() -> i64 {
    novastore_app_config()
        .ok()
        .map(|c| c.txn.label_num_threshold)
        .unwrap_or(2000)
}

pub(crate) fn label_keep_max_second() -> i64 {
    novastore_app_config()
        .ok()
        .map(|c| c.txn.label_keep_max_second)
        .unwrap_or(259_200)
}

pub(crate) fn streaming_label_keep_max_second() -> i64 {
    novastore_app_config()
        .ok()
        .map(|c| c.txn.streaming_label_keep_max_second)
        .unwrap_or(43_200)
}

pub(crate) fn lock_reporting_threshold_ms() -> u64 {
    novastore_app_config()
        .ok()
        .map(|c| c.txn.lock_reporting_threshold_ms)
        .unwrap_or(500)
}

pub(crate) fn publish_wait_time_second() -> i64 {
    novastore_app_config()
        .ok()
        .map(|c| c.txn.publish_wait_time_second)
        .unwrap_or(300)
}

pub(crate) fn publish_version_check_alter_replica() -> bool {
    novastore_app_config()
        .ok()
        .map(|c| c.txn.publish_version_check_alter_replica)
        .unwrap_or(true)
}

pub(crate) fn publish_fail_log_interval_second() -> i64 {
    novastore_app_config()
        .ok()
        .map(|c| c.txn.publish_fail_log_interval_second)
        .unwrap_or(5)
}

pub(crate) fn enable_compaction_priority_scheduling() -> bool {
    novastore_app_config()
        .ok()
        .map(|c| c.compaction.enable_compaction_priority_scheduling)
        .unwrap_or(true)
}

pub(crate) fn low_priority_compaction_task_num_per_disk() -> i32 {
    novastore_app_config()
        .ok()
        .map(|c| c.compaction.low_priority_compaction_task_num_per_disk)
        .unwrap_or(1)
}

pub(crate) fn max_base_compaction_threads() -> usize {
    novastore_app_config()
        .ok()
        .map(|c| c.compaction.max_base_compaction_threads)
        .unwrap_or(4)
}

pub(crate) fn max_cumu_compaction_threads() -> usize {
    novastore_app_config()
        .ok()
        .map(|c| c.compaction.max_cumu_compaction_threads)
        .unwrap_or(10)
}
