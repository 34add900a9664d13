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

//! Shared, lock-light view of where the node's sync process currently
//! stands, read by status/API consumers and written by `sync::Syncer` and
//! its sub-syncers. A `RwLock<SyncStatus>` plus a handful of atomics, never
//! touched from the hot connection-loop path.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use braid_core::pow::Difficulty;
use braid_util::RwLock;

/// Snapshot of what the node is currently doing to catch up with the
/// network. Each sub-syncer owns exactly one of these variants at a time;
/// `Syncer` enforces that header-sync quiesces before state-sync starts, and
/// state-sync quiesces before block-sync starts.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncStatus {
	/// Not currently syncing; local chain is believed to be caught up.
	NoSync,
	/// Waiting to have enough connected peers to judge network height.
	AwaitingPeers,
	/// Downloading headers from the most-work peer.
	HeaderSync {
		current_height: u64,
		highest_height: u64,
	},
	/// Downloading a TxHashSet archive for a given header.
	TxHashsetDownload {
		start_time: chrono::DateTime<chrono::Utc>,
		downloaded_size: u64,
		total_size: u64,
	},
	/// Validating the downloaded TxHashSet before considering it our state.
	TxHashsetValidation {
		kernels: u64,
		kernels_total: u64,
		rproofs: u64,
		rproofs_total: u64,
	},
	/// Rebuilding indexes after a successful TxHashSet import.
	TxHashsetSave,
	TxHashsetDone,
	/// The active TxHashSet download/import was abandoned (bad data, stalled
	/// transfer, or the chosen peer disconnected). `StateSyncer` picks a new
	/// peer and retries on its next tick rather than getting stuck here.
	TxHashsetSyncFailed,
	/// Downloading full block bodies following header sync.
	BodySync {
		current_height: u64,
		highest_height: u64,
	},
	Shutdown,
}

impl Default for SyncStatus {
	fn default() -> SyncStatus {
		SyncStatus::NoSync
	}
}

impl SyncStatus {
	/// Whether the node should currently be considered "syncing" for the
	/// purposes of, e.g., deferring Dandelion stem relay or PoW mining.
	pub fn is_syncing(&self) -> bool {
		!matches!(self, SyncStatus::NoSync)
	}

	/// Whether `BlockSyncer` currently owns body download, i.e. inbound
	/// `Block` messages should be absorbed by `BlockPipe` rather than
	/// validated inline by `MessageHandler`.
	pub fn is_body_sync(&self) -> bool {
		matches!(self, SyncStatus::BodySync { .. })
	}
}

/// Shared sync state plus the bits of network-health bookkeeping every
/// sub-syncer needs: active connection count and the best height/difficulty
/// heard from any peer.
pub struct SyncState {
	status: RwLock<SyncStatus>,
	peer_count: AtomicU64,
	head_height: AtomicU64,
	head_difficulty: AtomicU64,
	prev_update: AtomicI64,
	stalled: AtomicBool,
}

impl SyncState {
	pub fn new() -> SyncState {
		SyncState {
			status: RwLock::new(SyncStatus::NoSync),
			peer_count: AtomicU64::new(0),
			head_height: AtomicU64::new(0),
			head_difficulty: AtomicU64::new(0),
			prev_update: AtomicI64::new(0),
			stalled: AtomicBool::new(false),
		}
	}

	pub fn status(&self) -> SyncStatus {
		self.status.read().clone()
	}

	pub fn update(&self, new_status: SyncStatus) {
		let mut status = self.status.write();
		if *status != new_status {
			debug!("sync_state: {:?} -> {:?}", *status, new_status);
			*status = new_status;
		}
	}

	pub fn is_syncing(&self) -> bool {
		self.status().is_syncing()
	}

	pub fn is_body_sync(&self) -> bool {
		self.status().is_body_sync()
	}

	pub fn set_peer_count(&self, count: u64) {
		self.peer_count.store(count, Ordering::SeqCst);
	}

	pub fn peer_count(&self) -> u64 {
		self.peer_count.load(Ordering::SeqCst)
	}

	/// Raises the known network head if `height`/`difficulty` beats what's
	/// currently on record; never lowers it (a single behind peer shouldn't
	/// make the network look like it shrank).
	pub fn update_awaiting_peers(&self, height: u64, difficulty: Difficulty) {
		let diff = difficulty.to_num();
		if diff > self.head_difficulty.load(Ordering::SeqCst) {
			self.head_difficulty.store(diff, Ordering::SeqCst);
			self.head_height.store(height, Ordering::SeqCst);
		}
	}

	pub fn head_height(&self) -> u64 {
		self.head_height.load(Ordering::SeqCst)
	}

	pub fn head_difficulty(&self) -> Difficulty {
		Difficulty::from_num(self.head_difficulty.load(Ordering::SeqCst))
	}

	pub fn is_stalled(&self) -> bool {
		self.stalled.load(Ordering::SeqCst)
	}

	pub fn set_stalled(&self, stalled: bool) {
		self.stalled.store(stalled, Ordering::SeqCst);
	}
}

impl Default for SyncState {
	fn default() -> Self {
		SyncState::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn no_sync_is_not_syncing() {
		assert!(!SyncStatus::NoSync.is_syncing());
		assert!(SyncStatus::BodySync {
			current_height: 1,
			highest_height: 2,
		}
		.is_syncing());
	}

	#[test]
	fn known_head_never_decreases() {
		let state = SyncState::new();
		state.update_awaiting_peers(100, Difficulty::from_num(100));
		state.update_awaiting_peers(50, Difficulty::from_num(10));
		assert_eq!(state.head_height(), 100);
	}

	#[test]
	fn status_update_is_idempotent_on_equal_value() {
		let state = SyncState::new();
		state.update(SyncStatus::AwaitingPeers);
		state.update(SyncStatus::AwaitingPeers);
		assert_eq!(state.status(), SyncStatus::AwaitingPeers);
	}
}
