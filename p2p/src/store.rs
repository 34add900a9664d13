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

//! Persistent peer-address book, keyed by `PeerAddr`. Backed by `sled`, an
//! embedded KV store, so the crate is runnable standalone without pulling in
//! a full SQL engine for what is a small, flat table.

use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{Capabilities, Error, PeerAddr, ReasonForBan};

/// Connection-independent status of a peer, as recorded in the address book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
	Healthy,
	Banned,
	Defunct,
}

/// A persisted peer record. Distinct from `PeerInfo`/`Peer`, which only
/// exist while a connection is live; `PeerData` survives restarts and is the
/// raw material `PeerBook::get_new_peer` selects from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerData {
	pub addr: PeerAddr,
	pub capabilities: Capabilities,
	pub user_agent: String,
	pub flags: State,
	pub last_banned: i64,
	pub ban_reason: ReasonForBan,
	pub last_connected: i64,
}

impl PeerData {
	pub fn is_banned(&self, ban_window: i64) -> bool {
		self.flags == State::Banned && Utc::now().timestamp() - self.last_banned < ban_window
	}
}

const DB_TREE_PEERS: &str = "peers";

pub struct PeerStore {
	db: sled::Db,
}

impl PeerStore {
	pub fn new<P: AsRef<Path>>(path: P) -> Result<PeerStore, Error> {
		let db = sled::open(path)?;
		Ok(PeerStore { db })
	}

	/// An ephemeral store backed by a temp dir; used by tests and by nodes
	/// running with `Seeding::None`/`Programmatic` that don't care about
	/// address-book persistence across restarts.
	pub fn temp() -> Result<PeerStore, Error> {
		let dir = std::env::temp_dir().join(format!("braid-peers-{}", rand_suffix()));
		PeerStore::new(dir)
	}

	fn tree(&self) -> Result<sled::Tree, Error> {
		Ok(self.db.open_tree(DB_TREE_PEERS)?)
	}

	pub fn get(&self, addr: &PeerAddr) -> Result<Option<PeerData>, Error> {
		let tree = self.tree()?;
		match tree.get(addr.as_key().as_bytes())? {
			Some(bytes) => {
				let pd: PeerData =
					serde_json::from_slice(&bytes).map_err(|e| Error::Store(e.to_string()))?;
				Ok(Some(pd))
			}
			None => Ok(None),
		}
	}

	pub fn exists(&self, addr: &PeerAddr) -> Result<bool, Error> {
		Ok(self.get(addr)?.is_some())
	}

	pub fn save(&self, peer: &PeerData) -> Result<(), Error> {
		let tree = self.tree()?;
		let bytes = serde_json::to_vec(peer).map_err(|e| Error::Store(e.to_string()))?;
		tree.insert(peer.addr.as_key().as_bytes(), bytes)?;
		Ok(())
	}

	pub fn save_many(&self, peers: &[PeerData]) -> Result<(), Error> {
		for p in peers {
			self.save(p)?;
		}
		self.tree()?.flush()?;
		Ok(())
	}

	pub fn delete(&self, addr: &PeerAddr) -> Result<(), Error> {
		let tree = self.tree()?;
		tree.remove(addr.as_key().as_bytes())?;
		Ok(())
	}

	pub fn delete_many(&self, addrs: &[PeerAddr]) -> Result<(), Error> {
		for a in addrs {
			self.delete(a)?;
		}
		Ok(())
	}

	/// Loads every persisted peer, used once at startup to prime the
	/// in-memory `PeerBook`.
	pub fn load_all(&self) -> Result<Vec<PeerData>, Error> {
		let tree = self.tree()?;
		let mut out = Vec::new();
		for item in tree.iter() {
			let (_, bytes) = item?;
			let pd: PeerData =
				serde_json::from_slice(&bytes).map_err(|e| Error::Store(e.to_string()))?;
			out.push(pd);
		}
		Ok(out)
	}
}

fn rand_suffix() -> u64 {
	use rand::Rng;
	rand::thread_rng().gen()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample(addr: &str) -> PeerData {
		PeerData {
			addr: PeerAddr::from_str(addr),
			capabilities: Capabilities::FULL_NODE,
			user_agent: "test/0.1".to_string(),
			flags: State::Healthy,
			last_banned: 0,
			ban_reason: ReasonForBan::None,
			last_connected: Utc::now().timestamp(),
		}
	}

	#[test]
	fn save_then_load() {
		let store = PeerStore::temp().unwrap();
		let p = sample("127.0.0.1:3414");
		store.save(&p).unwrap();
		let back = store.get(&p.addr).unwrap().unwrap();
		assert_eq!(back.user_agent, "test/0.1");
		assert_eq!(store.load_all().unwrap().len(), 1);
	}

	#[test]
	fn delete_removes_entry() {
		let store = PeerStore::temp().unwrap();
		let p = sample("127.0.0.1:3415");
		store.save(&p).unwrap();
		store.delete(&p.addr).unwrap();
		assert!(store.get(&p.addr).unwrap().is_none());
	}

	#[test]
	fn ban_window_expires() {
		let mut p = sample("127.0.0.1:3416");
		p.flags = State::Banned;
		p.last_banned = Utc::now().timestamp() - 20_000;
		assert!(!p.is_banned(10_800));
	}
}
