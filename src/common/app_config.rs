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
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<NovaStoreConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static NovaStoreConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = NovaStoreConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static NovaStoreConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = match config_path_from_env() {
        Some(path) => NovaStoreConfig::load_from_file(&path)?,
        None => NovaStoreConfig::default(),
    };
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static NovaStoreConfig> {
    init_from_env_or_default()
}

fn config_path_from_env() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("NOVASTORE_CONFIG") {
        if !p.trim().is_empty() {
            return Some(PathBuf::from(p));
        }
    }

    let candidate = PathBuf::from("novastore.toml");
    if candidate.exists() {
        return Some(candidate);
    }
    None
}

#[derive(Clone, Deserialize)]
pub struct NovaStoreConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub txn: TxnConfig,

    #[serde(default)]
    pub compaction: CompactionConfig,
}

impl NovaStoreConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: NovaStoreConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }
}

impl Default for NovaStoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            storage: StorageConfig::default(),
            txn: TxnConfig::default(),
            compaction: CompactionConfig::default(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct StorePathConfig {
    pub path: String,
    /// -1 means "use the whole disk".
    #[serde(default = "default_store_capacity_bytes")]
    pub capacity_bytes: i64,
    #[serde(default = "default_storage_medium")]
    pub medium: String,
}

fn default_store_capacity_bytes() -> i64 {
    -1
}
fn default_storage_medium() -> String {
    "HDD".to_string()
}

#[derive(Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub store_paths: Vec<StorePathConfig>,

    /// -1 until assigned by the frontend through heartbeat.
    #[serde(default = "default_cluster_id")]
    pub cluster_id: i32,

    #[serde(default = "default_min_file_descriptor_number")]
    pub min_file_descriptor_number: u64,

    /// Percentage (0-100). Exceeding it makes the process exit on purpose.
    #[serde(default = "default_max_percentage_of_error_disk")]
    pub max_percentage_of_error_disk: u32,

    #[serde(default = "default_snapshot_expire_time_sec")]
    pub snapshot_expire_time_sec: i64,

    #[serde(default = "default_trash_file_expire_time_sec")]
    pub trash_file_expire_time_sec: i64,

    #[serde(default = "default_storage_flood_stage_usage_percent")]
    pub storage_flood_stage_usage_percent: i32,

    #[serde(default = "default_garbage_sweep_batch_size")]
    pub garbage_sweep_batch_size: i32,

    #[serde(default = "default_rowset_type")]
    pub default_rowset_type: String,

    #[serde(default = "default_partition_disk_index_lru_size")]
    pub partition_disk_index_lru_size: usize,

    #[serde(default = "default_tablet_map_shard_size")]
    pub tablet_map_shard_size: usize,

    /// Semicolon-separated list persisted when disks go bad.
    #[serde(default)]
    pub broken_storage_path: String,

    /// Directory for keys persisted back at runtime (e.g. broken_storage_path).
    #[serde(default)]
    pub custom_config_dir: String,

    #[serde(default = "default_unused_rowset_monitor_interval_sec")]
    pub unused_rowset_monitor_interval_sec: u64,

    #[serde(default = "default_disk_stat_monitor_interval_sec")]
    pub disk_stat_monitor_interval_sec: u64,

    #[serde(default = "default_min_garbage_sweep_interval_sec")]
    pub min_garbage_sweep_interval_sec: u64,

    #[serde(default = "default_max_garbage_sweep_interval_sec")]
    pub max_garbage_sweep_interval_sec: u64,
}

fn default_cluster_id() -> i32 {
    -1
}
fn default_min_file_descriptor_number() -> u64 {
    60000
}
fn default_max_percentage_of_error_disk() -> u32 {
    0
}
fn default_snapshot_expire_time_sec() -> i64 {
    172_800
}
fn default_trash_file_expire_time_sec() -> i64 {
    259_200
}
fn default_storage_flood_stage_usage_percent() -> i32 {
    90
}
fn default_garbage_sweep_batch_size() -> i32 {
    100
}
fn default_rowset_type() -> String {
    "BETA".to_string()
}
fn default_partition_disk_index_lru_size() -> usize {
    10_000
}
fn default_tablet_map_shard_size() -> usize {
    4
}
fn default_unused_rowset_monitor_interval_sec() -> u64 {
    30
}
fn default_disk_stat_monitor_interval_sec() -> u64 {
    5
}
fn default_min_garbage_sweep_interval_sec() -> u64 {
    180
}
fn default_max_garbage_sweep_interval_sec() -> u64 {
    3600
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_paths: Vec::new(),
            cluster_id: default_cluster_id(),
            min_file_descriptor_number: default_min_file_descriptor_number(),
            max_percentage_of_error_disk: default_max_percentage_of_error_disk(),
            snapshot_expire_time_sec: default_snapshot_expire_time_sec(),
            trash_file_expire_time_sec: default_trash_file_expire_time_sec(),
            storage_flood_stage_usage_percent: default_storage_flood_stage_usage_percent(),
            garbage_sweep_batch_size: default_garbage_sweep_batch_size(),
            default_rowset_type: default_rowset_type(),
            partition_disk_index_lru_size: default_partition_disk_index_lru_size(),
            tablet_map_shard_size: default_tablet_map_shard_size(),
            broken_storage_path: String::new(),
            custom_config_dir: String::new(),
            unused_rowset_monitor_interval_sec: default_unused_rowset_monitor_interval_sec(),
            disk_stat_monitor_interval_sec: default_disk_stat_monitor_interval_sec(),
            min_garbage_sweep_interval_sec: default_min_garbage_sweep_interval_sec(),
            max_garbage_sweep_interval_sec: default_max_garbage_sweep_interval_sec(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct TxnConfig {
    #[serde(default = "default_txn_map_shard_size")]
    pub txn_map_shard_size: usize,

    #[serde(default = "default_txn_shard_size")]
    pub txn_shard_size: usize,

    /// Upper bound kept in each final-status deque; -1 disables the ceiling.
    #[serde(default = "default_label_num_threshold")]
    pub label_num_threshold: i64,

    #[serde(default = "default_label_keep_max_second")]
    pub label_keep_max_second: i64,

    #[serde(default = "default_streaming_label_keep_max_second")]
    pub streaming_label_keep_max_second: i64,

    #[serde(default = "default_lock_reporting_threshold_ms")]
    pub lock_reporting_threshold_ms: u64,

    #[serde(default = "default_publish_wait_time_second")]
    pub publish_wait_time_second: i64,

    #[serde(default = "default_publish_version_check_alter_replica")]
    pub publish_version_check_alter_replica: bool,

    #[serde(default = "default_publish_fail_log_interval_second")]
    pub publish_fail_log_interval_second: i64,
}

fn default_txn_map_shard_size() -> usize {
    128
}
fn default_txn_shard_size() -> usize {
    1024
}
fn default_label_num_threshold() -> i64 {
    2000
}
fn default_label_keep_max_second() -> i64 {
    259_200
}
fn default_streaming_label_keep_max_second() -> i64 {
    43_200
}
fn default_lock_reporting_threshold_ms() -> u64 {
    500
}
fn default_publish_wait_time_second() -> i64 {
    300
}
fn default_publish_version_check_alter_replica() -> bool {
    true
}
fn default_publish_fail_log_interval_second() -> i64 {
    5
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            txn_map_shard_size: default_txn_map_shard_size(),
            txn_shard_size: default_txn_shard_size(),
            label_num_threshold: default_label_num_threshold(),
            label_keep_max_second: default_label_keep_max_second(),
            streaming_label_keep_max_second: default_streaming_label_keep_max_second(),
            lock_reporting_threshold_ms: default_lock_reporting_threshold_ms(),
            publish_wait_time_second: default_publish_wait_time_second(),
            publish_version_check_alter_replica: default_publish_version_check_alter_replica(),
            publish_fail_log_interval_second: default_publish_fail_log_interval_second(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct CompactionConfig {
    #[serde(default = "default_enable_compaction_priority_scheduling")]
    pub enable_compaction_priority_scheduling: bool,

    #[serde(default = "default_low_priority_compaction_task_num_per_disk")]
    pub low_priority_compaction_task_num_per_disk: i32,

    #[serde(default = "default_max_base_compaction_threads")]
    pub max_base_compaction_threads: usize,

    #[serde(default = "default_max_cumu_compaction_threads")]
    pub max_cumu_compaction_threads: usize,
}

fn default_enable_compaction_priority_scheduling() -> bool {
    true
}
fn default_low_priority_compaction_task_num_per_disk() -> i32 {
    1
}
fn default_max_base_compaction_threads() -> usize {
    4
}
fn default_max_cumu_compaction_threads() -> usize {
    10
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enable_compaction_priority_scheduling: default_enable_compaction_priority_scheduling(),
            low_priority_compaction_task_num_per_disk:
                default_low_priority_compaction_task_num_per_disk(),
            max_base_compaction_threads: default_max_base_compaction_threads(),
            max_cumu_compaction_threads: default_max_cumu_compaction_threads(),
        }
    }
}

/// Persist a runtime-updated key (currently only `broken_storage_path`) so it
/// survives restarts. Written as a tiny TOML document under
/// `storage.custom_config_dir`, or the working directory when unset.
pub fn persist_custom_config(key: &str, value: &str) -> Result<()> {
    let dir = config()
        .map(|c| c.storage.custom_config_dir.clone())
        .unwrap_or_default();
    let dir = if dir.is_empty() {
        PathBuf::from(".")
    } else {
        PathBuf::from(dir)
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create custom config dir: {}", dir.display()))?;
    let path = dir.join("novastore_custom.toml");

    let mut table: toml::Table = match std::fs::read_to_string(&path) {
        Ok(s) => toml::from_str(&s)
            .with_context(|| format!("parse custom config: {}", path.display()))?,
        Err(_) => toml::Table::new(),
    };
    table.insert(key.to_string(), toml::Value::String(value.to_string()));
    let rendered = toml::to_string(&table).map_err(|e| anyhow!("render custom config: {e}"))?;
    std::fs::write(&path, rendered)
        .with_context(|| format!("write custom config: {}", path.display()))?;
    Ok(())
}
