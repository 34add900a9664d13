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

//! `Peers`: the single point of contact for everything that wants to reach
//! the outside network, combining the live connection registry with the
//! persistent address book in `store`. Sync, Dandelion and the adapters all
//! go through here rather than holding `Arc<Peer>` directly.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::thread_rng;

use braid_core::pow::Difficulty;
use braid_util::{RwLock, StopState};

use crate::msg::{self, Type};
use crate::peer::Peer;
use crate::pipe::BanSink;
use crate::store::{PeerData, PeerStore, State};
use crate::types::{Capabilities, Error, NetAdapter, P2PConfig, PeerAddr, ReasonForBan};

/// How often the background maintenance task flushes connection state to
/// the store and evicts long-unreachable peers.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(15);

/// Peers we haven't heard from in this long are dropped from the address
/// book outright, rather than just marked defunct.
const EVICT_AFTER_SECS: i64 = 7 * 24 * 3600;

pub struct Peers {
	pub config: P2PConfig,
	store: PeerStore,
	adapter: Arc<dyn NetAdapter>,
	connections: RwLock<Vec<Arc<Peer>>>,
}

impl Peers {
	pub fn new(store: PeerStore, adapter: Arc<dyn NetAdapter>, config: P2PConfig) -> Peers {
		Peers {
			config,
			store,
			adapter,
			connections: RwLock::new(vec![]),
		}
	}

	/// Spawns the periodic flush/eviction task. Runs for the lifetime of
	/// `stop`; intended to be called once, right after construction.
	pub fn start_maintenance(self: &Arc<Peers>, stop: Arc<StopState>) {
		let peers = self.clone();
		thread::spawn(move || {
			while !stop.is_stopped() {
				thread::sleep(MAINTENANCE_INTERVAL);
				peers.flush_connected();
				peers.evict_stale();
			}
		});
	}

	fn flush_connected(&self) {
		let records: Vec<PeerData> = self
			.connections
			.read()
			.iter()
			.filter(|p| p.is_connected())
			.map(|p| self.record_for(p))
			.collect();
		if let Err(e) = self.store.save_many(&records) {
			error!("failed to flush peer records: {}", e);
		}
	}

	fn evict_stale(&self) {
		let now = Utc::now().timestamp();
		match self.store.load_all() {
			Ok(all) => {
				let stale: Vec<PeerAddr> = all
					.into_iter()
					.filter(|p| now - p.last_connected > EVICT_AFTER_SECS)
					.map(|p| p.addr)
					.collect();
				if !stale.is_empty() {
					debug!("evicting {} stale peer(s) from the address book", stale.len());
					let _ = self.store.delete_many(&stale);
				}
			}
			Err(e) => error!("failed to load peer store for eviction: {}", e),
		}
	}

	fn record_for(&self, peer: &Arc<Peer>) -> PeerData {
		PeerData {
			addr: peer.addr(),
			capabilities: peer.info.capabilities,
			user_agent: peer.info.user_agent.clone(),
			flags: if peer.is_banned() {
				State::Banned
			} else {
				State::Healthy
			},
			last_banned: 0,
			ban_reason: ReasonForBan::None,
			last_connected: Utc::now().timestamp(),
		}
	}

	/// Registers a freshly handshaken connection. Rejects a second
	/// connection to an address already connected rather than replacing it.
	pub fn add_connection(&self, peer: Arc<Peer>) -> Result<(), Error> {
		if self.is_connected(&peer.addr()) {
			return Err(Error::PeerException(format!(
				"already connected to {}",
				peer.addr()
			)));
		}
		let record = self.record_for(&peer);
		let _ = self.store.save(&record);
		self.connections.write().push(peer);
		Ok(())
	}

	/// Drops every connection whose task has exited. If `inactive_only` is
	/// set, also leaves currently-connected peers alone even if banned (the
	/// connection's own loop is responsible for noticing a ban and exiting).
	pub fn prune(&self, inactive_only: bool) {
		let mut connections = self.connections.write();
		connections.retain(|p| {
			if inactive_only {
				p.is_connected()
			} else {
				p.is_connected() && !p.is_banned()
			}
		});
	}

	pub fn peer_count(&self) -> usize {
		self.connections.read().iter().filter(|p| p.is_connected()).count()
	}

	pub fn outbound_count(&self) -> usize {
		self.connections
			.read()
			.iter()
			.filter(|p| p.is_connected() && p.info.is_outbound())
			.count()
	}

	pub fn inbound_count(&self) -> usize {
		self.connections
			.read()
			.iter()
			.filter(|p| p.is_connected() && p.info.is_inbound())
			.count()
	}

	pub fn is_connected(&self, addr: &PeerAddr) -> bool {
		self.connections
			.read()
			.iter()
			.any(|p| p.is_connected() && &p.addr() == addr)
	}

	pub fn get_connected_peer(&self, addr: &PeerAddr) -> Option<Arc<Peer>> {
		self.connections
			.read()
			.iter()
			.find(|p| p.is_connected() && &p.addr() == addr)
			.cloned()
	}

	/// All live peers advertising `cap`, capped at `max`.
	pub fn get_peers(&self, cap: Capabilities, max: usize) -> Vec<PeerAddr> {
		self.connections
			.read()
			.iter()
			.filter(|p| p.is_connected() && p.info.capabilities.contains(cap))
			.take(max)
			.map(|p| p.addr())
			.collect()
	}

	pub fn connected_peers(&self) -> Vec<Arc<Peer>> {
		self.connections
			.read()
			.iter()
			.filter(|p| p.is_connected())
			.cloned()
			.collect()
	}

	/// The connected peer with the greatest (total_difficulty, height),
	/// randomized among ties so load doesn't always land on one peer.
	pub fn most_work_peer(&self) -> Option<Arc<Peer>> {
		let connections = self.connections.read();
		let mut best: Vec<&Arc<Peer>> = Vec::new();
		let mut best_key: Option<(Difficulty, u64)> = None;
		for p in connections.iter().filter(|p| p.is_connected()) {
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
		best.choose(&mut thread_rng()).map(|p| (*p).clone())
	}

	pub fn send_to_peer<T: braid_core::ser::Writeable>(
		&self,
		addr: &PeerAddr,
		msg_type: Type,
		body: &T,
	) -> Result<(), Error> {
		match self.get_connected_peer(addr) {
			Some(p) => p.send(msg_type, body),
			None => Err(Error::PeerNotFound),
		}
	}

	/// Sends `body` to every connected peer except `source`, at most once
	/// each. Best-effort: a peer whose send queue is full just misses this
	/// broadcast round.
	pub fn broadcast<T: braid_core::ser::Writeable>(
		&self,
		msg_type: Type,
		body: &T,
		source: Option<&PeerAddr>,
	) -> usize {
		let mut sent = 0;
		for p in self.connections.read().iter().filter(|p| p.is_connected()) {
			if Some(&p.addr()) == source {
				continue;
			}
			if p.send(msg_type, body).is_ok() {
				sent += 1;
			}
		}
		sent
	}

	/// Bans `addr`: marks any live connection for teardown and persists the
	/// ban, but only records `reason` if this is the first ban — the
	/// address book's ban reason is sticky, matching the wire contract that
	/// a peer learns only the reason it was first banned for.
	pub fn ban_peer(&self, addr: &PeerAddr, reason: ReasonForBan) -> Result<(), Error> {
		if let Some(p) = self.get_connected_peer(addr) {
			p.send_ban_reason(reason);
			p.mark_banned();
			p.stop();
		}
		match self.store.get(addr)? {
			Some(data) if data.flags == State::Banned => {}
			Some(mut data) => {
				data.flags = State::Banned;
				data.last_banned = Utc::now().timestamp();
				data.ban_reason = reason;
				self.store.save(&data)?;
			}
			None => {
				self.store.save(&PeerData {
					addr: addr.clone(),
					capabilities: Capabilities::UNKNOWN,
					user_agent: String::new(),
					flags: State::Banned,
					last_banned: Utc::now().timestamp(),
					ban_reason: reason,
					last_connected: Utc::now().timestamp(),
				})?;
			}
		}
		Ok(())
	}

	pub fn unban_peer(&self, addr: &PeerAddr) -> Result<(), Error> {
		match self.store.get(addr)? {
			Some(mut data) if data.flags == State::Banned => {
				data.flags = State::Healthy;
				data.ban_reason = ReasonForBan::None;
				self.store.save(&data)?;
				Ok(())
			}
			Some(_) => Ok(()),
			None => Err(Error::PeerNotFound),
		}
	}

	pub fn is_banned(&self, addr: &PeerAddr) -> bool {
		matches!(
			self.store.get(addr),
			Ok(Some(ref d)) if d.is_banned(self.config.ban_window())
		)
	}

	/// Records a newly-heard-of address in the book if we don't already
	/// know it, defaulting to `Healthy`.
	pub fn add_fresh(&self, addr: PeerAddr, capabilities: Capabilities) -> Result<(), Error> {
		if self.store.exists(&addr)? {
			return Ok(());
		}
		self.store.save(&PeerData {
			addr,
			capabilities,
			user_agent: String::new(),
			flags: State::Healthy,
			last_banned: 0,
			ban_reason: ReasonForBan::None,
			last_connected: 0,
		})
	}

	/// Picks a not-currently-connected, not-banned address to dial next,
	/// preferring one that advertises `preferred_capability` if any exists.
	pub fn get_new_peer(&self, preferred_capability: Capabilities) -> Result<Option<PeerAddr>, Error> {
		let all = self.store.load_all()?;
		let ban_window = self.config.ban_window();
		let mut candidates: Vec<PeerData> = all
			.into_iter()
			.filter(|p| !p.is_banned(ban_window) && !self.is_connected(&p.addr))
			.collect();
		candidates.shuffle(&mut thread_rng());
		if let Some(p) = candidates
			.iter()
			.find(|p| p.capabilities.contains(preferred_capability))
		{
			return Ok(Some(p.addr.clone()));
		}
		Ok(candidates.into_iter().next().map(|p| p.addr))
	}

	/// Notifies the chain/API adapter of a difficulty update heard via
	/// `Ping`/`Pong`, then updates the in-memory `PeerInfo`.
	pub fn update_peer_difficulty(&self, addr: &PeerAddr, total_difficulty: Difficulty, height: u64) {
		if let Some(p) = self.get_connected_peer(addr) {
			p.info.update(height, total_difficulty);
			self.adapter.peer_difficulty(addr.clone(), total_difficulty, height);
		}
	}

	pub fn stop_all(&self) {
		for p in self.connections.read().iter() {
			p.stop();
		}
	}
}

impl BanSink for Peers {
	fn ban(&self, addr: &PeerAddr, reason: ReasonForBan) {
		if let Err(e) = self.ban_peer(addr, reason) {
			error!("failed to ban {}: {}", addr, e);
		}
	}

	fn broadcast_header(&self, header: &braid_core::core::BlockHeader, source: &PeerAddr) {
		self.broadcast(Type::Header, header, Some(source));
	}

	fn broadcast_transaction(&self, tx: &braid_core::core::Transaction, source: &PeerAddr) {
		self.broadcast(Type::Transaction, tx, Some(source));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::peer::{Peer, Tracker};
	use crate::serv::DummyAdapter;
	use crate::types::{Capabilities as Cap, Direction, PeerInfo, PeerLiveInfo};
	use braid_core::global::{self, ChainTypes};

	fn setup() {
		global::set_local_chain_type(ChainTypes::AutomatedTesting);
	}

	fn sample_peer(addr: &str, diff: u64, height: u64) -> Arc<Peer> {
		let (tracker, _rx) = Tracker::pair();
		let info = PeerInfo {
			capabilities: Cap::FULL_NODE,
			user_agent: "test/0.1".into(),
			version: global::PROTOCOL_VERSION,
			addr: PeerAddr::from_str(addr),
			direction: Direction::Outbound,
			live_info: Arc::new(RwLock::new(PeerLiveInfo::new(Difficulty::from_num(diff)))),
			header_sync_requested: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
			last_header: Arc::new(std::sync::Mutex::new(std::time::Instant::now())),
			last_header_reset: Arc::new(std::sync::Mutex::new(std::time::Instant::now())),
			last_txhashset_request: Arc::new(std::sync::Mutex::new(None)),
		};
		info.update(height, Difficulty::from_num(diff));
		Arc::new(Peer::new(info, tracker))
	}

	fn sample_peers() -> Peers {
		Peers::new(
			PeerStore::temp().unwrap(),
			Arc::new(DummyAdapter::default()),
			P2PConfig::default(),
		)
	}

	#[test]
	fn most_work_peer_picks_highest_difficulty() {
		setup();
		let peers = sample_peers();
		peers.add_connection(sample_peer("127.0.0.1:3414", 10, 5)).unwrap();
		peers.add_connection(sample_peer("127.0.0.1:3415", 50, 3)).unwrap();
		peers.add_connection(sample_peer("127.0.0.1:3416", 20, 1)).unwrap();

		let best = peers.most_work_peer().unwrap();
		assert_eq!(best.addr(), PeerAddr::from_str("127.0.0.1:3415"));
	}

	#[test]
	fn broadcast_skips_source_and_reaches_everyone_else() {
		setup();
		let peers = sample_peers();
		let a = sample_peer("127.0.0.1:3417", 1, 1);
		let b = sample_peer("127.0.0.1:3418", 1, 1);
		let c = sample_peer("127.0.0.1:3419", 1, 1);
		peers.add_connection(a.clone()).unwrap();
		peers.add_connection(b).unwrap();
		peers.add_connection(c).unwrap();

		let sent = peers.broadcast(
			Type::Ping,
			&msg::Ping {
				total_difficulty: Difficulty::from_num(1),
				height: 1,
			},
			Some(&a.addr()),
		);
		assert_eq!(sent, 2);
	}

	#[test]
	fn ban_reason_is_sticky() {
		setup();
		let peers = sample_peers();
		let addr = PeerAddr::from_str("127.0.0.1:3420");
		peers.ban_peer(&addr, ReasonForBan::BadBlock).unwrap();
		peers.ban_peer(&addr, ReasonForBan::Abusive).unwrap();
		assert!(peers.is_banned(&addr));
		assert_eq!(peers.store.get(&addr).unwrap().unwrap().ban_reason, ReasonForBan::BadBlock);
	}
}
