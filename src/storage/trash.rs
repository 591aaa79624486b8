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

//! Sweeping of `trash/` and `snapshot/` entries.
//!
//! Entry names start with a local-time timestamp `YYYYMMDDhhmmss`, optionally
//! followed by `.<n>.<ttl_seconds>`; the embedded TTL overrides the global
//! expiry for that entry.

use std::path::Path;

use chrono::{Local, NaiveDateTime, TimeZone};

use crate::common::config;
use crate::common::status::{EngineError, Result};
use crate::novastore_logging::warn;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Decode an entry name into (creation time as local unix seconds,
/// embedded ttl when present).
pub fn parse_timestamped_name(name: &str) -> Result<(i64, Option<i64>)> {
    let ts_part = name.split('.').next().unwrap_or(name);
    let naive = NaiveDateTime::parse_from_str(ts_part, TIMESTAMP_FORMAT)
        .map_err(|_| EngineError::Os(format!("fail to parse time from '{}'", name)))?;
    let create_time = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| EngineError::Os(format!("fail to localize time from '{}'", name)))?
        .timestamp();

    // eg: 20190818221123.3.86400, the trailing 86400 is a TTL in seconds
    let ttl = match name[ts_part.len()..].strip_prefix('.') {
        Some(rest) => rest
            .split_once('.')
            .and_then(|(_, ttl)| ttl.parse::<i64>().ok()),
        None => None,
    };
    Ok((create_time, ttl))
}

/// Delete expired entries under `scan_root`. Entries are visited in name
/// order, i.e. oldest first, so the scan stops at the first live entry.
/// A parse failure skips the entry; the last error is reported but never
/// interrupts the sweep.
pub fn do_sweep(scan_root: &Path, local_now: i64, expire_secs: i64) -> Result<()> {
    if !scan_root.exists() {
        return Ok(());
    }

    let mut result = Ok(());
    let mut names: Vec<String> = std::fs::read_dir(scan_root)?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    let batch_size = config::garbage_sweep_batch_size();
    let mut curr_batch = 0;
    for name in names {
        let (create_time, embedded_ttl) = match parse_timestamped_name(&name) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("skip unparsable garbage entry. name={}, err={}", name, e);
                result = Err(e);
                continue;
            }
        };
        let actual_expire = embedded_ttl.unwrap_or(expire_secs);
        if local_now - create_time < actual_expire {
            // names sort by create time; everything after this is younger
            break;
        }

        let target = scan_root.join(&name);
        let removed = if target.is_dir() {
            std::fs::remove_dir_all(&target)
        } else {
            std::fs::remove_file(&target)
        };
        if let Err(e) = removed {
            warn!("failed to sweep garbage entry. path={}, err={}", target.display(), e);
            result = Err(e.into());
            continue;
        }

        curr_batch += 1;
        if batch_size > 0 && curr_batch >= batch_size {
            // yield the filesystem to foreground IO
            curr_batch = 0;
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    result
}
