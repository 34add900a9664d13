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

//! End-to-end handshake over a real loopback socket: two `Server`s, one
//! dialing the other, both ending up with exactly one connected peer.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use braid_core::global::{self, ChainTypes};
use braid_core::hash::Hash;
use braid_p2p::serv::DummyAdapter;
use braid_p2p::{Capabilities, P2PConfig, PeerAddr, Server};

fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
	let start = Instant::now();
	while start.elapsed() < timeout {
		if check() {
			return true;
		}
		thread::sleep(Duration::from_millis(20));
	}
	false
}

fn temp_db_root(tag: &str) -> String {
	std::env::temp_dir()
		.join(format!("braid-p2p-test-{}-{}", tag, std::process::id()))
		.to_string_lossy()
		.into_owned()
}

#[test]
fn two_servers_handshake_over_loopback() {
	global::set_local_chain_type(ChainTypes::AutomatedTesting);

	// The seeder is never spawned in this test (no `start_sync`/seed thread),
	// so the default `Seeding::DNSSeed` config value is simply unused here.
	let mut config_a = P2PConfig::default();
	config_a.host = "127.0.0.1".parse().unwrap();
	config_a.port = 23414;

	let mut config_b = config_a.clone();
	config_b.port = 23415;

	let server_a = Arc::new(
		Server::new(
			&temp_db_root("a"),
			Capabilities::FULL_NODE,
			config_a.clone(),
			Arc::new(DummyAdapter::default()),
			Hash::default(),
		)
		.unwrap(),
	);
	let server_b = Arc::new(
		Server::new(
			&temp_db_root("b"),
			Capabilities::FULL_NODE,
			config_b.clone(),
			Arc::new(DummyAdapter::default()),
			Hash::default(),
		)
		.unwrap(),
	);

	let run_a = server_a.clone();
	thread::spawn(move || {
		let _ = run_a.listen();
	});
	let run_b = server_b.clone();
	thread::spawn(move || {
		let _ = run_b.listen();
	});

	// give both listeners a moment to bind before dialing.
	thread::sleep(Duration::from_millis(100));

	server_a
		.connect(PeerAddr::Ip("127.0.0.1:23415".parse().unwrap()))
		.expect("outbound connect to succeed");

	assert!(wait_until(Duration::from_secs(5), || {
		server_a.peers.peer_count() == 1 && server_b.peers.peer_count() == 1
	}));

	server_a.stop();
	server_b.stop();
}
