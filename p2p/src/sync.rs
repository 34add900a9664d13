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

//! The chain syncer: a single `Syncer` task driving three stage-specific
//! sub-state-machines (`HeaderSyncer`, `StateSyncer`, `BlockSyncer`) in a
//! fixed order. Each tick, the first sub-syncer that still has work to do
//! wins and the remaining two are skipped, so header sync quiesces before
//! state sync starts and state sync quiesces before block sync starts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use braid_core::global;
use braid_core::hash::Hash;
use braid_util::StopState;

use crate::msg::{self, Type};
use crate::peer::Peer;
use crate::peers::Peers;
use crate::sync_status::{SyncState, SyncStatus};
use crate::types::{NetAdapter, PeerAddr, ReasonForBan, MAX_BLOCK_BODIES, MAX_BLOCK_HEADERS, MAX_LOCATORS};

/// Main loop tick; the syncer itself does very little work per iteration so
/// this can be aggressive without burning a core.
const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Below this many live connections we can't tell a stalled network from a
/// lonely node, so we just wait.
const MIN_PEERS_FOR_SYNC: u64 = 4;

/// How far behind the best known peer our header chain must fall before
/// header sync kicks in.
const HEADER_SYNC_TRIGGER: u64 = 5;

/// How far behind our own header tip our block chain must fall before block
/// sync kicks in.
const BLOCK_SYNC_TRIGGER: u64 = 5;

const HEADER_TIMEOUT: Duration = Duration::from_secs(12);
const STATE_SYNC_TIMEOUT: Duration = Duration::from_secs(20 * 60);
const STATE_SYNC_STALL_TIMEOUT: Duration = Duration::from_secs(30);
const BLOCK_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const BLOCK_RETRY_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the sparse locator heights used to ask a peer for headers: start
/// at `tip`, each next entry is `previous - 2^k` for increasing `k`, stop
/// before accumulating `MAX_LOCATORS - 1` entries, and always end with `0`
/// (property #10).
pub fn locator_heights(tip: u64) -> Vec<u64> {
	let mut heights = vec![tip];
	let mut prev = tip;
	let mut k: u32 = 0;
	while heights.len() + 1 < MAX_LOCATORS as usize {
		let step = 1u64 << k;
		if step >= prev {
			break;
		}
		prev -= step;
		heights.push(prev);
		k += 1;
	}
	if *heights.last().unwrap_or(&1) != 0 {
		heights.push(0);
	}
	heights
}

/// Converts locator heights into hashes via the chain adapter, skipping any
/// height we don't actually have a header for (can happen on a short local
/// chain below `MAX_LOCATORS` blocks tall).
fn locator_hashes(adapter: &dyn NetAdapter, tip: u64) -> Vec<Hash> {
	locator_heights(tip)
		.into_iter()
		.filter_map(|h| adapter.header_by_height(h))
		.map(|h| h.hash_ref())
		.collect()
}

/// `BlockHeader` doesn't carry its own `Hashed` impl usage here directly;
/// this trait gives `locator_hashes` a uniform way to get a hash out of
/// whatever the adapter returns without pulling in the whole `core::Hashed`
/// machinery for a single call site.
trait HeaderHash {
	fn hash_ref(&self) -> Hash;
}

impl HeaderHash for braid_core::core::BlockHeader {
	fn hash_ref(&self) -> Hash {
		use braid_core::hash::Hashed;
		self.hash()
	}
}

#[derive(Clone)]
struct HeaderSyncState {
	peer: PeerAddr,
	requested_at: Instant,
	last_progress: Instant,
	start_height: u64,
	timeouts: u32,
}

/// Drives header-sync: batches of `GetHeaders` against the most-work peer
/// until our header tip catches up to network height.
#[derive(Default)]
pub struct HeaderSyncer {
	active: Mutex<Option<HeaderSyncState>>,
}

impl HeaderSyncer {
	pub fn new() -> HeaderSyncer {
		HeaderSyncer::default()
	}

	/// Returns `true` if header sync claimed work this tick (whether or not
	/// it actually sent anything), so the syncer's other stages are skipped.
	fn tick(&self, adapter: &dyn NetAdapter, peers: &Peers, sync_state: &SyncState) -> bool {
		let tip = match adapter.tip_header() {
			Ok(h) => h,
			Err(_) => return false,
		};
		let network_height = sync_state.head_height();
		let first_sync = tip.height == 0 && network_height > 0;
		let triggered = network_height > tip.height + HEADER_SYNC_TRIGGER || first_sync;

		let mut active = self.active.lock().unwrap();
		if !triggered && active.is_none() {
			return false;
		}

		if let Some(state) = active.clone() {
			let peer_alive = peers.get_connected_peer(&state.peer).is_some();
			let jumped_full_batch = tip.height >= state.start_height + (MAX_BLOCK_HEADERS as u64 - 1);
			let stalled = state.last_progress.elapsed() >= HEADER_TIMEOUT;

			if !peer_alive || stalled {
				if stalled && state.timeouts >= 1 {
					peers.ban_peer(&state.peer, ReasonForBan::FraudHeight).ok();
					*active = None;
				} else if stalled {
					let timeouts = state.timeouts + 1;
					let peer = state.peer.clone();
					*active = Some(HeaderSyncState {
						peer,
						requested_at: Instant::now(),
						last_progress: Instant::now(),
						start_height: tip.height,
						timeouts,
					});
				} else {
					*active = None;
				}
			} else if jumped_full_batch {
				// Batch complete and progress is still being made; continue
				// with a fresh request from the same (or a newly best) peer.
				*active = None;
			} else {
				// Still within timeout, nothing new to do this tick.
				sync_state.update(SyncStatus::HeaderSync {
					current_height: tip.height,
					highest_height: network_height,
				});
				return true;
			}
		}

		if !triggered {
			return false;
		}

		let peer = match peers.most_work_peer() {
			Some(p) => p,
			None => return true,
		};
		self.request(&peer, adapter, tip.height);
		*active = Some(HeaderSyncState {
			peer: peer.addr(),
			requested_at: Instant::now(),
			last_progress: Instant::now(),
			start_height: tip.height,
			timeouts: 0,
		});
		sync_state.update(SyncStatus::HeaderSync {
			current_height: tip.height,
			highest_height: network_height,
		});
		true
	}

	fn request(&self, peer: &Arc<Peer>, adapter: &dyn NetAdapter, tip_height: u64) {
		let locator = locator_hashes(adapter, tip_height);
		let _ = peer.send(Type::GetHeaders, &msg::GetHeaders { locator });
	}
}

#[derive(Clone)]
struct StateSyncState {
	peer: PeerAddr,
	requested_at: Instant,
	last_progress: Instant,
	last_downloaded: u64,
}

/// Drives the single-shot TxHashSet snapshot request: pick a peer, ask for
/// state at `header_height - state_sync_threshold()`, then watch for
/// progress (actual streaming happens on the receiving connection's own
/// thread, see `conn::receive_txhashset`) until it completes, stalls or the
/// peer disappears.
#[derive(Default)]
pub struct StateSyncer {
	active: Mutex<Option<StateSyncState>>,
}

impl StateSyncer {
	pub fn new() -> StateSyncer {
		StateSyncer::default()
	}

	fn tick(&self, adapter: &dyn NetAdapter, peers: &Peers, sync_state: &SyncState) -> bool {
		match sync_state.status() {
			SyncStatus::TxHashsetValidation { .. } | SyncStatus::TxHashsetSave => {
				// Import in progress on a connection thread; never preempt it.
				return true;
			}
			_ => {}
		}

		let mut active = self.active.lock().unwrap();
		if let Some(state) = active.clone() {
			let peer_alive = peers.get_connected_peer(&state.peer).is_some();
			let overall_timeout = state.requested_at.elapsed() >= STATE_SYNC_TIMEOUT;
			let stalled = state.last_progress.elapsed() >= STATE_SYNC_STALL_TIMEOUT;

			if let SyncStatus::TxHashsetDownload { downloaded_size, .. } = sync_state.status() {
				if downloaded_size > state.last_downloaded {
					let peer = state.peer.clone();
					let requested_at = state.requested_at;
					*active = Some(StateSyncState {
						peer,
						requested_at,
						last_progress: Instant::now(),
						last_downloaded: downloaded_size,
					});
					return true;
				}
			}

			if matches!(sync_state.status(), SyncStatus::TxHashsetDone) {
				*active = None;
				return false;
			}

			if !peer_alive || overall_timeout || stalled || matches!(sync_state.status(), SyncStatus::TxHashsetSyncFailed) {
				peers.ban_peer(&state.peer, ReasonForBan::BadTxHashSet).ok();
				*active = None;
			} else {
				return true;
			}
		}

		let header_height = match adapter.tip_header() {
			Ok(h) => h.height,
			Err(_) => return false,
		};
		let block_height = adapter.total_height().unwrap_or(0);
		let horizon = global::cut_through_horizon() as u64;
		let network_height = sync_state.head_height();
		let headers_within_horizon = network_height <= header_height + horizon;
		let blocks_trailing = header_height > block_height + horizon;

		if !(headers_within_horizon && blocks_trailing) {
			return false;
		}

		let requested_height = header_height.saturating_sub(global::state_sync_threshold() as u64);
		let header = match adapter.header_by_height(requested_height) {
			Some(h) => h,
			None => return false,
		};
		let peer = match peers.most_work_peer() {
			Some(p) => p,
			None => return true,
		};
		let hash = {
			use braid_core::hash::Hashed;
			header.hash()
		};
		let _ = peer.send(
			Type::TxHashSetRequest,
			&msg::TxHashSetRequest {
				hash,
				height: requested_height,
			},
		);
		sync_state.update(SyncStatus::TxHashsetDownload {
			start_time: Utc::now(),
			downloaded_size: 0,
			total_size: 0,
		});
		*active = Some(StateSyncState {
			peer: peer.addr(),
			requested_at: Instant::now(),
			last_progress: Instant::now(),
			last_downloaded: 0,
		});
		true
	}
}

struct InFlight {
	peer: PeerAddr,
	hash: Hash,
	requested_at: Instant,
	retried: bool,
}

/// Drives batch block-body requests once header/state sync have quiesced:
/// an in-flight table keyed by height, filled round-robin across the
/// most-work peer set, up to `MAX_BLOCK_BODIES * num_most_work_peers`
/// parallel requests.
#[derive(Default)]
pub struct BlockSyncer {
	in_flight: Mutex<HashMap<u64, InFlight>>,
}

impl BlockSyncer {
	pub fn new() -> BlockSyncer {
		BlockSyncer::default()
	}

	fn tick(&self, adapter: &dyn NetAdapter, peers: &Peers, sync_state: &SyncState) -> bool {
		let header_height = match adapter.tip_header() {
			Ok(h) => h.height,
			Err(_) => return false,
		};
		let block_height = adapter.total_height().unwrap_or(0);
		let network_height = sync_state.head_height();
		let triggered = network_height > block_height + BLOCK_SYNC_TRIGGER;

		let most_work = most_work_peers(peers);
		let mut in_flight = self.in_flight.lock().unwrap();

		// Drop entries for heights we already have, and for peers that have
		// gone away or timed out without a successful retry.
		in_flight.retain(|height, entry| !adapter.has_block(*height, entry.hash));

		if !triggered && in_flight.is_empty() {
			return false;
		}

		sync_state.update(SyncStatus::BodySync {
			current_height: block_height,
			highest_height: header_height,
		});

		if most_work.is_empty() {
			return true;
		}

		let mut to_ban = Vec::new();
		for (height, entry) in in_flight.iter_mut() {
			let threshold = if entry.retried {
				BLOCK_RETRY_TIMEOUT
			} else {
				BLOCK_REQUEST_TIMEOUT
			};
			if entry.requested_at.elapsed() < threshold {
				continue;
			}
			if !entry.retried {
				entry.retried = true;
				entry.requested_at = Instant::now();
			} else {
				to_ban.push((*height, entry.peer.clone()));
			}
		}
		for (height, peer) in &to_ban {
			peers.ban_peer(peer, ReasonForBan::FraudHeight).ok();
			in_flight.remove(height);
		}

		let capacity = MAX_BLOCK_BODIES as usize * most_work.len();
		if in_flight.len() >= capacity {
			return true;
		}

		let needed = match adapter.blocks_needed(capacity as u64 * 2) {
			Ok(n) => n,
			Err(_) => return true,
		};

		let mut next_peer = 0usize;
		for (height, hash) in needed {
			if in_flight.len() >= capacity {
				break;
			}
			if in_flight.contains_key(&height) {
				continue;
			}
			let peer = &most_work[next_peer % most_work.len()];
			next_peer += 1;
			let _ = peer.send(Type::GetBlock, &msg::GetBlock { hash });
			in_flight.insert(
				height,
				InFlight {
					peer: peer.addr(),
					hash,
					requested_at: Instant::now(),
					retried: false,
				},
			);
		}

		true
	}
}

/// All connected peers tied for the maximal `(total_difficulty, height)`
/// key, used to spread block-sync requests round-robin across the peers
/// doing the most work rather than hammering a single one.
fn most_work_peers(peers: &Peers) -> Vec<Arc<Peer>> {
	let connected = peers.connected_peers();
	let mut best_key = None;
	let mut best: Vec<Arc<Peer>> = Vec::new();
	for p in connected {
		if p.info.height() == 0 {
			continue;
		}
		let key = (p.info.total_difficulty(), p.info.height());
		match &best_key {
			None => {
				best_key = Some(key);
				best = vec![p];
			}
			Some(bk) if key > *bk => {
				best_key = Some(key);
				best = vec![p];
			}
			Some(bk) if key == *bk => best.push(p),
			_ => {}
		}
	}
	best
}

/// Top-level sync loop: wakes roughly every 10ms, refreshes the shared
/// `SyncState` and drives the three sub-syncers in header/state/block
/// order. The first one that claims to have work wins the tick.
pub struct Syncer {
	adapter: Arc<dyn NetAdapter>,
	peers: Arc<Peers>,
	sync_state: Arc<SyncState>,
	stop: Arc<StopState>,
	header_syncer: HeaderSyncer,
	state_syncer: StateSyncer,
	block_syncer: BlockSyncer,
}

impl Syncer {
	pub fn new(
		adapter: Arc<dyn NetAdapter>,
		peers: Arc<Peers>,
		sync_state: Arc<SyncState>,
		stop: Arc<StopState>,
	) -> Syncer {
		Syncer {
			adapter,
			peers,
			sync_state,
			stop,
			header_syncer: HeaderSyncer::new(),
			state_syncer: StateSyncer::new(),
			block_syncer: BlockSyncer::new(),
		}
	}

	/// Runs the sync loop until stopped. Meant to be spawned on its own
	/// thread by the embedding server.
	pub fn run(&self) {
		while !self.stop.is_stopped() {
			self.tick();
			thread::sleep(TICK_INTERVAL);
		}
	}

	fn tick(&self) {
		let peer_count = self.peers.peer_count() as u64;
		self.sync_state.set_peer_count(peer_count);

		if peer_count < MIN_PEERS_FOR_SYNC {
			self.sync_state.update(SyncStatus::AwaitingPeers);
			return;
		}

		self.refresh_network_head();

		if self
			.header_syncer
			.tick(self.adapter.as_ref(), &self.peers, &self.sync_state)
		{
			return;
		}
		if self
			.state_syncer
			.tick(self.adapter.as_ref(), &self.peers, &self.sync_state)
		{
			return;
		}
		if self
			.block_syncer
			.tick(self.adapter.as_ref(), &self.peers, &self.sync_state)
		{
			return;
		}

		self.sync_state.update(SyncStatus::NoSync);
	}

	/// Raises the known network head from whatever the best connected peer
	/// is currently advertising.
	fn refresh_network_head(&self) {
		if let Some(peer) = self.peers.most_work_peer() {
			self.sync_state
				.update_awaiting_peers(peer.info.height(), peer.info.total_difficulty());
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn locator_starts_at_tip_and_ends_at_zero() {
		let heights = locator_heights(1000);
		assert_eq!(heights[0], 1000);
		assert_eq!(*heights.last().unwrap(), 0);
	}

	#[test]
	fn locator_steps_by_increasing_powers_of_two() {
		let heights = locator_heights(100);
		let mut prev = heights[0];
		let mut k = 0u32;
		for h in &heights[1..] {
			if *h == 0 && prev < (1u64 << k) {
				break;
			}
			assert_eq!(*h, prev - (1u64 << k));
			prev = *h;
			k += 1;
		}
	}

	#[test]
	fn locator_never_exceeds_max_locators() {
		let heights = locator_heights(u64::MAX / 2);
		assert!(heights.len() <= MAX_LOCATORS as usize);
		assert_eq!(*heights.last().unwrap(), 0);
	}

	#[test]
	fn locator_of_zero_height_is_just_zero() {
		let heights = locator_heights(0);
		assert_eq!(heights, vec![0]);
	}

	#[test]
	fn most_work_peers_excludes_zero_height_peers() {
		use crate::serv::DummyAdapter;
		use crate::store::PeerStore;
		use crate::types::{Capabilities, Direction, P2PConfig, PeerInfo, PeerLiveInfo};
		use braid_core::pow::Difficulty;
		use braid_util::RwLock;
		use std::sync::atomic::AtomicUsize;
		use std::sync::Mutex as StdMutex;

		global::set_local_chain_type(global::ChainTypes::AutomatedTesting);
		let peers = Peers::new(
			PeerStore::temp().unwrap(),
			Arc::new(DummyAdapter::default()),
			P2PConfig::default(),
		);
		let (tracker, _rx) = crate::peer::Tracker::pair();
		let info = PeerInfo {
			capabilities: Capabilities::FULL_NODE,
			user_agent: "test/0.1".into(),
			version: global::PROTOCOL_VERSION,
			addr: PeerAddr::from_str("127.0.0.1:3414"),
			direction: Direction::Outbound,
			live_info: Arc::new(RwLock::new(PeerLiveInfo::new(Difficulty::zero()))),
			header_sync_requested: Arc::new(AtomicUsize::new(0)),
			last_header: Arc::new(StdMutex::new(Instant::now())),
			last_header_reset: Arc::new(StdMutex::new(Instant::now())),
			last_txhashset_request: Arc::new(StdMutex::new(None)),
		};
		peers.add_connection(Arc::new(Peer::new(info, tracker))).unwrap();

		assert!(most_work_peers(&peers).is_empty());
	}
}
