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

//! Hand/Shake exchange that opens every peer connection. Outbound dialers
//! send `Hand` and block for `Shake`; inbound listeners wait for `Hand` and
//! reply with `Shake`. A mismatched genesis, a self-connect nonce, or an
//! unexpected first message all abort before the connection is ever
//! registered with `ConnectionManager`.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;

use braid_core::hash::Hash;
use braid_core::pow::Difficulty;
use braid_core::ser::ProtocolVersion;

use crate::codec;
use crate::msg::{self, Type};
use crate::types::{Capabilities, Direction, Error, PeerAddr, PeerInfo, PeerLiveInfo};
use braid_util::RwLock;

/// How long the handshake is allowed to take before the connection is
/// abandoned.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(8);

/// Performs the Hand/Shake exchange over an already-connected stream. On
/// success, returns the `PeerInfo` derived from the remote's advertised
/// capabilities, version, user agent and totals.
pub struct Handshake {
	genesis: Hash,
	capabilities: Capabilities,
	user_agent: String,
	/// Random nonce generated once for this node's lifetime; carried in
	/// `Hand` so a peer can detect dialing itself. Not a secret, never
	/// rotated.
	nonce: u64,
}

impl Handshake {
	pub fn new(genesis: Hash, capabilities: Capabilities, user_agent: String) -> Handshake {
		Handshake {
			genesis,
			capabilities,
			user_agent,
			nonce: rand::thread_rng().gen(),
		}
	}

	pub fn outbound<S: Read + Write>(
		&self,
		stream: &mut S,
		self_addr: SocketAddr,
		peer_addr: SocketAddr,
		total_difficulty: Difficulty,
	) -> Result<PeerInfo, Error> {
		let hand = msg::Hand {
			version: braid_core::global::PROTOCOL_VERSION,
			capabilities: self.capabilities,
			nonce: self.nonce,
			genesis: self.genesis,
			total_difficulty,
			sender_addr: PeerAddr::Ip(self_addr),
			receiver_addr: PeerAddr::Ip(peer_addr),
			user_agent: self.user_agent.clone(),
		};
		codec::write_message(stream, Type::Hand, &hand)?;

		let (msg_type, body) = codec::read_frame(stream)?;
		match msg_type {
			Type::Shake => {
				let shake: msg::Shake = braid_core::ser::deserialize(&body)?;
				self.verify_genesis(shake.genesis)?;
				Ok(peer_info_from_shake(shake, PeerAddr::Ip(peer_addr), Direction::Outbound))
			}
			Type::BanReason => Err(Error::Banned),
			_ => Err(Error::BadMessage),
		}
	}

	pub fn inbound<S: Read + Write>(
		&self,
		stream: &mut S,
		peer_addr: SocketAddr,
		total_difficulty: Difficulty,
		self_connected: impl Fn(u64) -> bool,
	) -> Result<PeerInfo, Error> {
		let (msg_type, body) = codec::read_frame(stream)?;
		if msg_type != Type::Hand {
			return Err(Error::BadMessage);
		}
		let hand: msg::Hand = braid_core::ser::deserialize(&body)?;

		if hand.nonce == self.nonce {
			return Err(Error::PeerWithSelf);
		}
		if self_connected(hand.nonce) {
			return Err(Error::PeerWithSelf);
		}
		self.verify_genesis(hand.genesis)?;

		let shake = msg::Shake {
			version: braid_core::global::PROTOCOL_VERSION,
			capabilities: self.capabilities,
			genesis: self.genesis,
			total_difficulty,
			user_agent: self.user_agent.clone(),
		};
		codec::write_message(stream, Type::Shake, &shake)?;

		Ok(peer_info_from_hand(hand, PeerAddr::Ip(peer_addr)))
	}

	fn verify_genesis(&self, their_genesis: Hash) -> Result<(), Error> {
		if their_genesis != self.genesis {
			return Err(Error::GenesisMismatch {
				us: self.genesis,
				peer: their_genesis,
			});
		}
		Ok(())
	}
}

fn peer_info_from_shake(shake: msg::Shake, addr: PeerAddr, direction: Direction) -> PeerInfo {
	PeerInfo {
		capabilities: shake.capabilities,
		user_agent: shake.user_agent,
		version: shake.version,
		addr,
		direction,
		live_info: std::sync::Arc::new(RwLock::new(PeerLiveInfo::new(shake.total_difficulty))),
		header_sync_requested: std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
		last_header: std::sync::Arc::new(std::sync::Mutex::new(std::time::Instant::now())),
		last_header_reset: std::sync::Arc::new(std::sync::Mutex::new(std::time::Instant::now())),
		last_txhashset_request: std::sync::Arc::new(std::sync::Mutex::new(None)),
	}
}

fn peer_info_from_hand(hand: msg::Hand, addr: PeerAddr) -> PeerInfo {
	PeerInfo {
		capabilities: hand.capabilities,
		user_agent: hand.user_agent,
		version: hand.version,
		addr,
		direction: Direction::Inbound,
		live_info: std::sync::Arc::new(RwLock::new(PeerLiveInfo::new(hand.total_difficulty))),
		header_sync_requested: std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0)),
		last_header: std::sync::Arc::new(std::sync::Mutex::new(std::time::Instant::now())),
		last_header_reset: std::sync::Arc::new(std::sync::Mutex::new(std::time::Instant::now())),
		last_txhashset_request: std::sync::Arc::new(std::sync::Mutex::new(None)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use braid_core::global::{self, ChainTypes};
	use std::io::Cursor;

	fn setup() {
		global::set_local_chain_type(ChainTypes::AutomatedTesting);
	}

	#[test]
	fn outbound_rejects_genesis_mismatch() {
		setup();
		let hs = Handshake::new(Hash::default(), Capabilities::FULL_NODE, "test/0.1".into());

		let mut out_buf: Vec<u8> = Vec::new();
		codec::write_message(
			&mut out_buf,
			Type::Shake,
			&msg::Shake {
				version: ProtocolVersion(3),
				capabilities: Capabilities::FULL_NODE,
				genesis: Hash::from_vec(&[1u8; 32]).unwrap(),
				total_difficulty: Difficulty::from_num(1),
				user_agent: "peer/0.1".into(),
			},
		)
		.unwrap();

		let mut cursor = Cursor::new(out_buf);
		let self_addr: SocketAddr = "127.0.0.1:3414".parse().unwrap();
		let peer_addr: SocketAddr = "127.0.0.1:3415".parse().unwrap();

		// We only read the Shake the peer "sent"; skip past our own written
		// Hand by constructing a stream that only ever yields the response.
		struct ReadOnly(Cursor<Vec<u8>>);
		impl Read for ReadOnly {
			fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
				self.0.read(buf)
			}
		}
		impl Write for ReadOnly {
			fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
				Ok(buf.len())
			}
			fn flush(&mut self) -> std::io::Result<()> {
				Ok(())
			}
		}
		let mut stream = ReadOnly(cursor);
		let result = hs.outbound(&mut stream, self_addr, peer_addr, Difficulty::from_num(1));
		assert!(matches!(result, Err(Error::GenesisMismatch { .. })));
	}

	#[test]
	fn inbound_rejects_self_connect_nonce() {
		setup();
		let hs = Handshake::new(Hash::default(), Capabilities::FULL_NODE, "test/0.1".into());
		let nonce = hs.nonce;

		let hand = msg::Hand {
			version: ProtocolVersion(3),
			capabilities: Capabilities::FULL_NODE,
			nonce,
			genesis: Hash::default(),
			total_difficulty: Difficulty::from_num(1),
			sender_addr: PeerAddr::from_str("127.0.0.1:3414"),
			receiver_addr: PeerAddr::from_str("127.0.0.1:3415"),
			user_agent: "test/0.1".into(),
		};
		let mut buf = Vec::new();
		codec::write_message(&mut buf, Type::Hand, &hand).unwrap();

		struct ReadOnly(Cursor<Vec<u8>>);
		impl Read for ReadOnly {
			fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
				self.0.read(buf)
			}
		}
		impl Write for ReadOnly {
			fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
				Ok(buf.len())
			}
			fn flush(&mut self) -> std::io::Result<()> {
				Ok(())
			}
		}
		let mut stream = ReadOnly(Cursor::new(buf));
		let peer_addr: SocketAddr = "127.0.0.1:3415".parse().unwrap();
		let result = hs.inbound(&mut stream, peer_addr, Difficulty::from_num(1), |_| false);
		assert!(matches!(result, Err(Error::PeerWithSelf)));
	}
}
