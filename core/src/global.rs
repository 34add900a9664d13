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

//! Values that should be shared across all modules, without necessarily
//! having to pass them all over the place, but aren't consensus values.
//! should be used sparingly.

use crate::consensus::{CUT_THROUGH_HORIZON, STATE_SYNC_THRESHOLD};
use crate::ser::ProtocolVersion;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use braid_util::OneTime;

/// The default "local" protocol version for this node.
/// We negotiate compatible versions with each peer via Hand/Shake.
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion(3);

/// Mainnet wire magic bytes.
pub const MAINNET_MAGIC: [u8; 2] = [0x53, 0x35];

/// Floonet (public testnet) wire magic bytes.
pub const FLOONET_MAGIC: [u8; 2] = [0x46, 0x35];

/// Testing cut through horizon in blocks, used for automated/user testing
/// chain types where waiting out the production horizon would make tests
/// glacially slow.
pub const AUTOMATED_TESTING_CUT_THROUGH_HORIZON: u32 = 20;
pub const USER_TESTING_CUT_THROUGH_HORIZON: u32 = 70;

/// Testing state sync threshold in blocks.
pub const TESTING_STATE_SYNC_THRESHOLD: u32 = 20;

/// If a peer's last seen time is this many days ago we forget about it.
const PEER_EXPIRATION_DAYS: i64 = 7;

/// Defunct-peer timeout in seconds, derived from `PEER_EXPIRATION_DAYS`.
pub const PEER_EXPIRATION_REMOVE_TIME: i64 = PEER_EXPIRATION_DAYS * 24 * 3600;

/// If a peer's last updated difficulty is this many seconds old and lower
/// than ours, we consider it a stuck node and evict it.
pub const STUCK_PEER_KICK_TIME: i64 = 2 * 3600;

/// Types of chain a server can run with, dictates the genesis block, magic
/// bytes and various "is this production" checks used throughout p2p.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum ChainTypes {
	/// For CI testing
	AutomatedTesting,
	/// For user/manual testing
	UserTesting,
	/// Public test network
	Floonet,
	/// Main production network
	Mainnet,
}

impl ChainTypes {
	/// Short name representing the chain type ("floo", "main", etc.)
	pub fn shortname(&self) -> String {
		match *self {
			ChainTypes::AutomatedTesting => "auto".to_owned(),
			ChainTypes::UserTesting => "user".to_owned(),
			ChainTypes::Floonet => "floo".to_owned(),
			ChainTypes::Mainnet => "main".to_owned(),
		}
	}
}

impl Default for ChainTypes {
	fn default() -> ChainTypes {
		ChainTypes::Mainnet
	}
}

lazy_static! {
	/// Global chain_type that must be initialized once on node startup.
	/// This is accessed via get_chain_type() which allows the global value
	/// to be overridden on a per-thread basis (for testing).
	pub static ref GLOBAL_CHAIN_TYPE: OneTime<ChainTypes> = OneTime::new();

	/// Running flag for the node: every long-lived task's sleep loop checks
	/// this instead of being forcibly killed.
	pub static ref SERVER_RUNNING: Arc<AtomicBool> = Arc::new(AtomicBool::new(true));
}

thread_local! {
	/// Mainnet|Floonet|UserTesting|AutomatedTesting, overridable per-thread
	/// so tests can run with different chain types concurrently.
	pub static CHAIN_TYPE: Cell<Option<ChainTypes>> = Cell::new(None);
}

/// Set the chain type on a per-thread basis via thread_local storage.
pub fn set_local_chain_type(new_type: ChainTypes) {
	CHAIN_TYPE.with(|chain_type| chain_type.set(Some(new_type)))
}

/// Get the chain type via thread_local, fallback to global chain_type.
pub fn get_chain_type() -> ChainTypes {
	CHAIN_TYPE.with(|chain_type| match chain_type.get() {
		None => {
			if GLOBAL_CHAIN_TYPE.is_init() {
				let chain_type = GLOBAL_CHAIN_TYPE.borrow();
				set_local_chain_type(chain_type);
				chain_type
			} else {
				panic!("GLOBAL_CHAIN_TYPE and CHAIN_TYPE unset. Consider set_local_chain_type() in tests.");
			}
		}
		Some(chain_type) => chain_type,
	})
}

/// One time initialization of the global chain_type.
/// Will panic if we attempt to re-initialize this (via OneTime).
pub fn init_global_chain_type(new_type: ChainTypes) {
	GLOBAL_CHAIN_TYPE.init(new_type)
}

/// The wire magic bytes for the currently active chain type.
pub fn magic_bytes() -> [u8; 2] {
	match get_chain_type() {
		ChainTypes::Mainnet => MAINNET_MAGIC,
		_ => FLOONET_MAGIC,
	}
}

/// Horizon at which we can cut-through and do full local pruning.
pub fn cut_through_horizon() -> u32 {
	match get_chain_type() {
		ChainTypes::AutomatedTesting => AUTOMATED_TESTING_CUT_THROUGH_HORIZON,
		ChainTypes::UserTesting => USER_TESTING_CUT_THROUGH_HORIZON,
		_ => CUT_THROUGH_HORIZON,
	}
}

/// Threshold at which we can request a txhashset (and full blocks from).
pub fn state_sync_threshold() -> u32 {
	match get_chain_type() {
		ChainTypes::AutomatedTesting => TESTING_STATE_SYNC_THRESHOLD,
		ChainTypes::UserTesting => TESTING_STATE_SYNC_THRESHOLD,
		_ => STATE_SYNC_THRESHOLD,
	}
}

/// Are we in production mode? Production defined as a live public network,
/// floonet or mainnet.
pub fn is_production_mode() -> bool {
	matches!(get_chain_type(), ChainTypes::Floonet | ChainTypes::Mainnet)
}

/// Are we on floonet?
pub fn is_floonet() -> bool {
	matches!(get_chain_type(), ChainTypes::Floonet)
}

/// Are we on mainnet?
pub fn is_mainnet() -> bool {
	matches!(get_chain_type(), ChainTypes::Mainnet)
}

/// Get a network name suitable for logging / user agent strings.
pub fn get_network_name() -> String {
	let name = match get_chain_type() {
		ChainTypes::AutomatedTesting => "automatedtests",
		ChainTypes::UserTesting => "usertestnet",
		ChainTypes::Floonet => "floonet",
		ChainTypes::Mainnet => "mainnet",
	};
	name.to_string()
}

/// Checking running status of the server.
pub fn is_server_running() -> bool {
	SERVER_RUNNING.load(Ordering::SeqCst)
}

/// Request for server stopping.
pub fn request_server_stop() {
	SERVER_RUNNING.store(false, Ordering::SeqCst)
}

/// Get access to the flag responsible for stopping the server.
pub fn get_server_running_controller() -> Arc<AtomicBool> {
	SERVER_RUNNING.clone()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn chain_type_overrides_per_thread() {
		set_local_chain_type(ChainTypes::AutomatedTesting);
		assert_eq!(get_chain_type(), ChainTypes::AutomatedTesting);
		assert_eq!(cut_through_horizon(), AUTOMATED_TESTING_CUT_THROUGH_HORIZON);
		assert!(!is_production_mode());
	}

	#[test]
	fn mainnet_is_production() {
		set_local_chain_type(ChainTypes::Mainnet);
		assert!(is_production_mode());
		assert!(is_mainnet());
		assert!(!is_floonet());
	}
}
