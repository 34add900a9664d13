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

//! Narrow boundary crate standing in for the transaction pool / stempool.
//! `Dandelion` only needs three operations to drive the stem/fluff/expire
//! state machine; everything else about pool admission, fee sorting and
//! eviction belongs to the real mempool and is out of scope here.

use braid_core::core::Transaction;
use chrono::{DateTime, Utc};

/// Configuration for the Dandelion stem/fluff relay, mirroring the values
/// consulted by the original `Dandelion` monitor: how long a stem entry sits
/// under embargo before it's force-fluffed, how long a chosen relay peer is
/// kept, and how often the monitor ticks.
#[derive(Debug, Clone, Copy)]
pub struct DandelionConfig {
	/// Time a stem-phase transaction is held before being fluffed anyway.
	pub embargo_secs: i64,
	/// How long a chosen Dandelion relay peer is reused before rotating.
	pub relay_secs: i64,
	/// Interval between Dandelion monitor ticks.
	pub patience_secs: u64,
}

impl Default for DandelionConfig {
	fn default() -> DandelionConfig {
		DandelionConfig {
			embargo_secs: 180,
			relay_secs: 600,
			patience_secs: 10,
		}
	}
}

/// A single entry awaiting stem relay or fluff broadcast.
#[derive(Clone)]
pub struct PoolEntry {
	pub tx: Transaction,
	pub embargo_expires: DateTime<Utc>,
}

/// Boundary trait consumed by `Dandelion`. `TxPool` implementations own
/// their own locking; every method here is expected to be non-blocking in
/// the common case.
pub trait TxPool: Sync + Send {
	/// Pops one transaction eligible for stem relay, if any.
	fn next_stem_tx(&self) -> Option<Transaction>;

	/// Pops one transaction ready to be fluffed (broadcast) immediately.
	fn next_fluff_tx(&self) -> Option<Transaction>;

	/// Drains stempool entries whose embargo has passed; these are promoted
	/// to the mempool and broadcast by the caller.
	fn expired_transactions(&self) -> Vec<Transaction>;
}
