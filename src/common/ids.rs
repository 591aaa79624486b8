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
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type DbId = i64;
pub type TableId = i64;
pub type PartitionId = i64;
pub type TabletId = i64;
pub type BackendId = i64;
pub type ReplicaId = i64;
pub type TxnId = i64;
pub type Version = i64;
pub type SchemaHash = i32;

/// Per-process backend identity, assigned at first start and stable for the
/// lifetime of the storage root.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BackendUid {
    pub hi: i64,
    pub lo: i64,
}

impl fmt::Display for BackendUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hi = self.hi as u64;
        let lo = self.lo as u64;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (hi >> 32) as u32,
            (hi >> 16) as u16,
            hi as u16,
            (lo >> 48) as u16,
            lo & 0x0000_FFFF_FFFF_FFFF
        )
    }
}

/// Identity of one incarnation of a tablet. A tablet id can be reused after
/// drop-and-recreate; the uid cannot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TabletUid {
    pub hi: i64,
    pub lo: i64,
}

impl fmt::Display for TabletUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}-{:016x}", self.hi as u64, self.lo as u64)
    }
}

impl FromStr for TabletUid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s
            .split_once('-')
            .ok_or_else(|| format!("invalid tablet uid string '{}'", s))?;
        let hi = u64::from_str_radix(hi, 16)
            .map_err(|e| format!("invalid tablet uid string '{}': {}", s, e))?;
        let lo = u64::from_str_radix(lo, 16)
            .map_err(|e| format!("invalid tablet uid string '{}': {}", s, e))?;
        Ok(Self {
            hi: hi as i64,
            lo: lo as i64,
        })
    }
}

/// Idempotency token attached to a begin-transaction request.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct RequestId {
    pub hi: i64,
    pub lo: i64,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}-{:x}", self.hi as u64, self.lo as u64)
    }
}
