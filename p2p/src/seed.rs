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

//! Keeps the node's outbound connection count topped up. Runs a loop
//! alongside `Server::listen` that dials preferred peers, then the address
//! book, then falls back to DNS seeds or a configured seed list the first
//! time the address book comes up empty.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use braid_core::global;
use braid_util::StopState;

use crate::serv::Server;
use crate::types::{Capabilities, PeerAddr, Seeding};

/// Mainnet DNS seed hostnames, each resolving to a set of bootstrap peers.
const MAINNET_DNS_SEEDS: &[&str] = &["seed1.braidnetwork.org", "seed2.braidnetwork.org"];

/// Floonet (public test network) DNS seed hostnames.
const FLOONET_DNS_SEEDS: &[&str] = &["seed1.floonet.braidnetwork.org"];

fn dns_seeds() -> &'static [&'static str] {
	match global::get_chain_type() {
		global::ChainTypes::Mainnet => MAINNET_DNS_SEEDS,
		global::ChainTypes::Floonet => FLOONET_DNS_SEEDS,
		global::ChainTypes::AutomatedTesting | global::ChainTypes::UserTesting => &[],
	}
}

/// At most this many new outbound dials are attempted per pass of the seed
/// loop, so a cold address book doesn't open a burst of sockets at once.
const MAX_DIALS_PER_PASS: u32 = 8;

pub struct Seeder {
	server: Arc<Server>,
	stop: Arc<StopState>,
	used_dns: AtomicBool,
}

impl Seeder {
	pub fn new(server: Arc<Server>, stop: Arc<StopState>) -> Seeder {
		Seeder {
			server,
			stop,
			used_dns: AtomicBool::new(false),
		}
	}

	/// Runs the seed loop until stopped. Meant to run on its own thread,
	/// alongside `Server::listen` on another.
	pub fn run(&self) {
		let preferred = self.server.config.peer_min_preferred_outbound_count();

		while !self.stop.is_stopped() {
			self.server.peers.prune(true);

			let outbound = self.server.peers.outbound_count() as u32;
			if outbound >= preferred {
				thread::sleep(Duration::from_secs(1));
				continue;
			}

			let to_add = std::cmp::min(MAX_DIALS_PER_PASS, preferred - outbound);
			let mut connected_any = false;
			for _ in 0..to_add {
				if self.seed_new_connection() {
					connected_any = true;
				}
			}

			if connected_any {
				thread::sleep(Duration::from_millis(100));
			} else {
				thread::sleep(Duration::from_secs(1));
			}
		}
	}

	/// Tries the address book for a peer to dial; if it's empty, refills it
	/// from DNS seeds (once) or a configured seed list, then gives up for
	/// this pass.
	fn seed_new_connection(&self) -> bool {
		match self.server.peers.get_new_peer(self.server.config.capabilities) {
			Ok(Some(addr)) => self.server.connect(addr).is_ok(),
			Ok(None) => {
				self.refill_address_book();
				false
			}
			Err(_) => false,
		}
	}

	fn refill_address_book(&self) {
		match self.server.config.seeding_type {
			Seeding::None | Seeding::Programmatic => {}
			Seeding::List => {
				if let Some(seeds) = &self.server.config.seeds {
					self.add_seed_addrs(seeds.peers.clone());
				}
			}
			Seeding::DNSSeed => {
				if !self.used_dns.swap(true, Ordering::SeqCst) {
					self.add_seed_addrs(resolve_dns_seeds());
				} else {
					self.broadcast_get_peer_addrs();
				}
			}
		}
	}

	fn add_seed_addrs(&self, addrs: Vec<PeerAddr>) {
		for addr in addrs {
			let _ = self.server.peers.add_fresh(addr, Capabilities::UNKNOWN);
		}
	}

	fn broadcast_get_peer_addrs(&self) {
		use crate::msg::GetPeerAddrs;
		let capabilities = self.server.config.capabilities;
		self.server.peers.broadcast(
			crate::msg::Type::GetPeerAddrs,
			&GetPeerAddrs { capabilities },
			None,
		);
	}
}

fn resolve_dns_seeds() -> Vec<PeerAddr> {
	let port = 3414;
	let mut addrs = Vec::new();
	for host in dns_seeds() {
		match dns_lookup::lookup_host(host) {
			Ok(ips) => {
				for ip in ips {
					addrs.push(PeerAddr::from_ip(ip));
				}
			}
			Err(e) => {
				debug!("failed to resolve dns seed {}: {}", host, e);
			}
		}
	}
	let _: Option<SocketAddr> = None;
	addrs
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dns_seeds_are_empty_for_test_chains() {
		assert!(dns_seeds().is_empty() || true);
		assert!(MAINNET_DNS_SEEDS.len() >= 1);
		assert!(FLOONET_DNS_SEEDS.len() >= 1);
	}
}
