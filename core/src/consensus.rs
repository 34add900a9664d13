// Copyright 2020 The Grin Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Consensus-adjacent constants that `global` needs to expose per chain
//! type. Actual consensus rule enforcement (difficulty retargeting, weight
//! accounting, PoW edge-bits selection) lives in `BlockChain` and is out of
//! scope for this crate; only the handful of constants the p2p/sync layer
//! reads directly are kept.

/// Block interval, in blocks, used to express "one day" in height terms.
pub const DAY_HEIGHT: u64 = 24 * 60 * 60 / BLOCK_TIME_SEC;

/// Target block time, in seconds.
pub const BLOCK_TIME_SEC: u64 = 60;

/// Coinbase maturity, in blocks, before an output becomes spendable.
pub const COINBASE_MATURITY: u64 = 1_440;

/// Default cut-through horizon, in blocks: how far back the chain can still
/// reorg. State snapshots older than this are safe to serve to peers.
pub const CUT_THROUGH_HORIZON: u32 = 1_440;

/// Threshold, in blocks, at which a node behind the tip should request a
/// TxHashSet snapshot instead of replaying full history.
pub const STATE_SYNC_THRESHOLD: u32 = 1_000;
