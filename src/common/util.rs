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
use std::path::Path;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One-shot latch used to stop background daemons. Each daemon sleeps on
/// `wait_timeout` at its wake boundary and exits once the latch hits zero.
pub struct CountDownLatch {
    count: Mutex<u32>,
    cv: Condvar,
}

impl CountDownLatch {
    pub fn new(count: u32) -> Self {
        Self {
            count: Mutex::new(count),
            cv: Condvar::new(),
        }
    }

    pub fn count_down(&self) {
        let mut count = self.count.lock().expect("latch lock");
        if *count > 0 {
            *count -= 1;
        }
        if *count == 0 {
            self.cv.notify_all();
        }
    }

    /// Returns true when the latch reached zero, false on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let count = self.count.lock().expect("latch lock");
        if *count == 0 {
            return true;
        }
        let (count, _) = self
            .cv
            .wait_timeout_while(count, timeout, |count| *count > 0)
            .expect("latch wait");
        *count == 0
    }
}

/// Recursive on-disk size of a file or directory. Missing paths count as 0.
pub fn file_or_directory_size(path: &Path) -> u64 {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return 0;
    };
    if !meta.is_dir() {
        return meta.len();
    }
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    let mut sum = 0u64;
    for entry in entries.flatten() {
        sum += file_or_directory_size(&entry.path());
    }
    sum
}
