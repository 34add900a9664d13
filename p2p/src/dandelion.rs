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

//! Dandelion relay: stems a transaction through a single chosen peer before
//! it's fluffed (broadcast) to the rest of the network, to make the
//! originating node harder to identify from network topology alone. One
//! `Dandelion` instance runs for the lifetime of the server, ticking at
//! `DandelionConfig::patience_secs`.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use braid_pool::{DandelionConfig, TxPool};

use crate::msg::Type;
use crate::peers::Peers;
use crate::types::{ChainAdapter, PeerAddr};

/// The relay peer currently in use for stem transactions, and when it
/// expires and should be re-picked.
struct Relay {
	addr: PeerAddr,
	expires: DateTime<Utc>,
}

/// Drives the stem/fluff/expire state machine against a `TxPool`. Failures
/// at any phase (no relay available, a send that fails, an empty pool) are
/// logged and skipped rather than propagated; Dandelion is a privacy layer
/// on top of ordinary broadcast; it must never be the reason a transaction
/// fails to propagate.
pub struct Dandelion {
	pool: Arc<dyn TxPool>,
	adapter: Arc<dyn ChainAdapter>,
	peers: Arc<Peers>,
	config: DandelionConfig,
	relay: Mutex<Option<Relay>>,
}

impl Dandelion {
	pub fn new(
		pool: Arc<dyn TxPool>,
		adapter: Arc<dyn ChainAdapter>,
		peers: Arc<Peers>,
		config: DandelionConfig,
	) -> Dandelion {
		Dandelion {
			pool,
			adapter,
			peers,
			config,
			relay: Mutex::new(None),
		}
	}

	/// Runs the monitor loop until stopped. Meant to be spawned on its own
	/// thread by the embedding server.
	pub fn run(&self, stop: &braid_util::StopState) {
		while !stop.is_stopped() {
			self.tick();
			thread::sleep(Duration::from_secs(self.config.patience_secs));
		}
	}

	fn tick(&self) {
		self.fluff_expired();
		self.fluff_ready();
		self.stem_next();
	}

	/// Transactions whose stem-phase embargo has elapsed are promoted
	/// straight to fluff: Dandelion gives up trying to hide them further and
	/// falls back to ordinary broadcast.
	fn fluff_expired(&self) {
		for tx in self.pool.expired_transactions() {
			debug!("dandelion: embargo expired for {}, fluffing", tx_hash(&tx));
			self.add_to_mempool_and_broadcast(tx);
		}
	}

	/// Transactions the pool has already decided are ready to fluff (e.g.
	/// this node is itself the one that should break stem and broadcast).
	fn fluff_ready(&self) {
		while let Some(tx) = self.pool.next_fluff_tx() {
			self.add_to_mempool_and_broadcast(tx);
		}
	}

	/// Lands a fluffed transaction in the node's own mempool before
	/// broadcasting it; a transaction relayed to peers but never accepted
	/// locally would leave this node unable to mine or re-serve it.
	fn add_to_mempool_and_broadcast(&self, tx: braid_core::core::Transaction) {
		if let Err(e) = self.adapter.transaction_received(tx.clone(), false) {
			debug!("dandelion: {} rejected by mempool, fluffing anyway: {}", tx_hash(&tx), e);
		}
		self.peers.broadcast(Type::Transaction, &tx, None);
	}

	/// Relays one stem transaction, if any, to the current relay peer.
	/// Falls back to a plain fluff if no relay peer is available so the
	/// transaction isn't dropped for lack of privacy.
	fn stem_next(&self) {
		let tx = match self.pool.next_stem_tx() {
			Some(tx) => tx,
			None => return,
		};
		match self.relay_peer() {
			Some(addr) => {
				if self.peers.send_to_peer(&addr, Type::StemTransaction, &tx).is_err() {
					warn!("dandelion: stem send to {} failed, fluffing instead", addr);
					self.add_to_mempool_and_broadcast(tx);
				}
			}
			None => {
				debug!("dandelion: no relay peer available, fluffing instead");
				self.add_to_mempool_and_broadcast(tx);
			}
		}
	}

	/// Returns the current relay peer, picking (or re-picking, if expired or
	/// disconnected) one otherwise. A `dandelion_peer` configured explicitly
	/// is preferred and never rotated away from while still connected.
	fn relay_peer(&self) -> Option<PeerAddr> {
		if let Some(preferred) = &self.peers.config.dandelion_peer {
			if self.peers.is_connected(preferred) {
				return Some(preferred.clone());
			}
		}

		let mut relay = self.relay.lock().unwrap();
		let needs_new = match relay.as_ref() {
			Some(r) => Utc::now() >= r.expires || !self.peers.is_connected(&r.addr),
			None => true,
		};
		if needs_new {
			let picked = self.peers.most_work_peer().map(|p| p.addr());
			*relay = picked.clone().map(|addr| Relay {
				addr,
				expires: Utc::now() + chrono::Duration::seconds(self.config.relay_secs),
			});
			return picked;
		}
		relay.as_ref().map(|r| r.addr.clone())
	}
}

fn tx_hash(tx: &braid_core::core::Transaction) -> braid_core::hash::Hash {
	use braid_core::hash::Hashed;
	tx.hash()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::serv::DummyAdapter;
	use crate::store::PeerStore;
	use crate::types::P2PConfig;
	use std::sync::Mutex as StdMutex;

	struct StubPool {
		stem: StdMutex<Vec<braid_core::core::Transaction>>,
		fluff: StdMutex<Vec<braid_core::core::Transaction>>,
		expired: StdMutex<Vec<braid_core::core::Transaction>>,
	}

	impl TxPool for StubPool {
		fn next_stem_tx(&self) -> Option<braid_core::core::Transaction> {
			self.stem.lock().unwrap().pop()
		}
		fn next_fluff_tx(&self) -> Option<braid_core::core::Transaction> {
			self.fluff.lock().unwrap().pop()
		}
		fn expired_transactions(&self) -> Vec<braid_core::core::Transaction> {
			std::mem::take(&mut self.expired.lock().unwrap())
		}
	}

	fn sample_tx() -> braid_core::core::Transaction {
		braid_core::core::Transaction {
			inputs: vec![],
			outputs: vec![],
			kernels: vec![],
			offset: [0u8; 32],
		}
	}

	fn dandelion_with_pool(pool: StubPool) -> Dandelion {
		braid_core::global::set_local_chain_type(braid_core::global::ChainTypes::AutomatedTesting);
		let adapter = Arc::new(DummyAdapter::default());
		let peers = Arc::new(Peers::new(PeerStore::temp().unwrap(), adapter.clone(), P2PConfig::default()));
		Dandelion::new(Arc::new(pool), adapter, peers, DandelionConfig::default())
	}

	#[test]
	fn stem_tx_with_no_relay_falls_back_to_fluff() {
		let dandelion = dandelion_with_pool(StubPool {
			stem: StdMutex::new(vec![sample_tx()]),
			fluff: StdMutex::new(vec![]),
			expired: StdMutex::new(vec![]),
		});
		// No connected peers at all, so relay_peer() returns None and
		// stem_next() must not panic, just silently give up on privacy.
		dandelion.tick();
	}

	#[test]
	fn expired_transactions_are_drained_every_tick() {
		let dandelion = dandelion_with_pool(StubPool {
			stem: StdMutex::new(vec![]),
			fluff: StdMutex::new(vec![]),
			expired: StdMutex::new(vec![sample_tx(), sample_tx()]),
		});
		dandelion.tick();
		// A second tick finds nothing left to drain.
		assert!(dandelion.pool.expired_transactions().is_empty());
	}

	#[test]
	fn relay_peer_is_none_without_connections() {
		let dandelion = dandelion_with_pool(StubPool {
			stem: StdMutex::new(vec![]),
			fluff: StdMutex::new(vec![]),
			expired: StdMutex::new(vec![]),
		});
		assert!(dandelion.relay_peer().is_none());
	}
}
