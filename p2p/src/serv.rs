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

//! The top-level networking service: listens for inbound connections,
//! dials outbound ones, and owns every piece of shared state a connection
//! thread needs (`Peers`, the message handler, the validation pipelines).

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};

use braid_chain as chain;
use braid_core::core;
use braid_core::hash::Hash;
use braid_core::pow::Difficulty;
use braid_util::StopState;

use braid_pool::{DandelionConfig, TxPool};

use crate::conn::{ConnContext, Connection};
use crate::dandelion::Dandelion;
use crate::handshake::Handshake;
use crate::msg_processor::MessageHandler;
use crate::peer::Peer;
use crate::peers::Peers;
use crate::pipe::{BanSink, BlockPipe, TxHashSetPipe, TxPipe};
use crate::store::PeerStore;
use crate::sync::Syncer;
use crate::sync_status::SyncState;
use crate::types::{
	Capabilities, ChainAdapter, Error, NetAdapter, P2PConfig, PeerAddr, PeerInfo, ReasonForBan, TxHashSetRead,
};

/// How long `listen()` sleeps between `accept()` attempts while paused, and
/// the poll granularity of its stop check.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Runs the gossip network service: the inbound listener plus everything a
/// connection thread needs to process and relay messages.
pub struct Server {
	pub config: P2PConfig,
	capabilities: Capabilities,
	handshake: Arc<Handshake>,
	pub peers: Arc<Peers>,
	pub sync_state: Arc<SyncState>,
	stop_state: Arc<StopState>,
	ctx: Arc<ConnContext>,
}

impl Server {
	pub fn new(
		db_root: &str,
		capabilities: Capabilities,
		config: P2PConfig,
		adapter: Arc<dyn NetAdapter>,
		genesis: Hash,
	) -> Result<Server, Error> {
		let store = PeerStore::new(db_root)?;
		let peers = Arc::new(Peers::new(store, adapter.clone(), config.clone()));
		let stop_state = Arc::new(StopState::new());
		let sync_state = Arc::new(SyncState::new());

		let chain_adapter: Arc<dyn ChainAdapter> = adapter.clone();
		let bans: Arc<dyn BanSink> = peers.clone();
		let block_pipe = Arc::new(BlockPipe::new(chain_adapter.clone(), bans.clone(), stop_state.clone()));
		let tx_pipe = Arc::new(TxPipe::new(chain_adapter, bans, stop_state.clone()));
		let txhashset_pipe = Arc::new(TxHashSetPipe::new());

		let handler = Arc::new(MessageHandler::new(
			adapter.clone(),
			peers.clone(),
			block_pipe,
			tx_pipe,
			sync_state.clone(),
		));

		let ctx = Arc::new(ConnContext {
			adapter,
			peers: peers.clone(),
			handler,
			txhashset_pipe,
			sync_state: sync_state.clone(),
			stop: stop_state.clone(),
		});

		let user_agent = format!("braid/{}", env!("CARGO_PKG_VERSION"));
		let handshake = Arc::new(Handshake::new(genesis, capabilities, user_agent));

		Ok(Server {
			config,
			capabilities,
			handshake,
			peers,
			sync_state,
			stop_state,
			ctx,
		})
	}

	/// Binds the listening socket and accepts inbound connections until
	/// stopped. Meant to run on its own thread.
	pub fn listen(&self) -> Result<(), Error> {
		let addr = SocketAddr::new(self.config.host, self.config.port);
		let listener = TcpListener::bind(addr)?;
		listener.set_nonblocking(true)?;

		self.peers.start_maintenance(self.stop_state.clone());

		loop {
			if self.stop_state.is_stopped() {
				break;
			}
			if self.stop_state.is_paused() {
				thread::sleep(PAUSE_POLL_INTERVAL);
				continue;
			}

			match listener.accept() {
				Ok((stream, peer_addr)) => {
					if self.check_undesirable(peer_addr) {
						let _ = stream.shutdown(std::net::Shutdown::Both);
						continue;
					}
					stream.set_nonblocking(false)?;
					self.handle_new_peer(stream);
				}
				Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
					thread::sleep(Duration::from_millis(5));
				}
				Err(_) => thread::sleep(Duration::from_millis(5)),
			}
		}
		Ok(())
	}

	/// Dials and registers an outbound connection to `addr`.
	pub fn connect(&self, addr: PeerAddr) -> Result<Arc<Peer>, Error> {
		if self.stop_state.is_stopped() {
			return Err(Error::ConnectionClose);
		}
		if self.peers.is_banned(&addr) {
			return Err(Error::Banned);
		}
		if let PeerAddr::Ip(ref socket_addr) = addr {
			if self.peers.is_connected(&addr) {
				return self
					.peers
					.get_connected_peer(&addr)
					.ok_or(Error::PeerNotFound);
			}
			if self.peers.outbound_count() as u32 >= self.config.peer_max_outbound_count() {
				return Err(Error::PeerException("outbound connection limit reached".to_string()));
			}
			let self_addr = SocketAddr::new(self.config.host, self.config.port);
			Connection::connect(self.ctx.clone(), &self.handshake, self_addr, *socket_addr)
		} else {
			Err(Error::PeerException("onion addresses are not supported".to_string()))
		}
	}

	fn handle_new_peer(&self, stream: std::net::TcpStream) {
		if self.peers.inbound_count() as u32 >= self.config.peer_max_inbound_count() {
			let _ = stream.shutdown(std::net::Shutdown::Both);
			return;
		}
		let ctx = self.ctx.clone();
		let handshake = self.handshake.clone();
		thread::spawn(move || {
			if let Err(e) = Connection::accept(ctx, &handshake, stream) {
				debug!("failed to accept inbound connection: {}", e);
			}
		});
	}

	fn check_undesirable(&self, peer_addr: SocketAddr) -> bool {
		let addr = PeerAddr::Ip(peer_addr);
		if self.peers.is_banned(&addr) {
			return true;
		}
		if self.peers.is_connected(&addr) {
			return true;
		}
		false
	}

	/// Spawns the chain syncer. Meant to be called once, after `listen()`
	/// has started accepting connections, so sync has peers to work with.
	pub fn start_sync(&self) {
		let syncer = Syncer::new(
			self.ctx.adapter.clone(),
			self.peers.clone(),
			self.sync_state.clone(),
			self.stop_state.clone(),
		);
		thread::spawn(move || syncer.run());
	}

	/// Spawns the Dandelion stem/fluff/expire monitor against `pool`. Meant
	/// to be called once; the embedding application owns the actual
	/// mempool/stempool and only hands us the narrow `TxPool` view.
	pub fn start_dandelion(&self, pool: Arc<dyn TxPool>, config: DandelionConfig) {
		let chain_adapter: Arc<dyn ChainAdapter> = self.ctx.adapter.clone();
		let dandelion = Dandelion::new(pool, chain_adapter, self.peers.clone(), config);
		let stop = self.stop_state.clone();
		thread::spawn(move || dandelion.run(&stop));
	}

	pub fn is_syncing(&self) -> bool {
		self.sync_state.is_syncing()
	}

	pub fn pause(&self) {
		self.stop_state.pause();
	}

	pub fn resume(&self) {
		self.stop_state.resume();
	}

	pub fn stop(&self) {
		self.stop_state.stop();
		self.peers.stop_all();
	}
}

/// No-op `ChainAdapter`/`NetAdapter` used by tests that exercise `Peers` and
/// the connection stack without a real chain behind them.
#[derive(Default)]
pub struct DummyAdapter {}

impl ChainAdapter for DummyAdapter {
	fn total_difficulty(&self) -> Result<Difficulty, chain::Error> {
		Ok(Difficulty::zero())
	}

	fn total_height(&self) -> Result<u64, chain::Error> {
		Ok(0)
	}

	fn transaction_received(&self, _tx: core::Transaction, _stem: bool) -> Result<bool, chain::Error> {
		Ok(true)
	}

	fn get_transaction(&self, _kernel_hash: Hash) -> Option<core::Transaction> {
		None
	}

	fn tx_kernel_received(&self, _kernel_hash: Hash, _peer_info: &PeerInfo) -> Result<bool, chain::Error> {
		Ok(false)
	}

	fn block_received(
		&self,
		_b: core::Block,
		_peer_info: &PeerInfo,
		_opts: chain::Options,
	) -> Result<bool, chain::Error> {
		Ok(true)
	}

	fn compact_block_received(&self, _cb: core::CompactBlock, _peer_info: &PeerInfo) -> Result<bool, chain::Error> {
		Ok(true)
	}

	fn header_received(&self, _bh: core::BlockHeader, _peer_info: &PeerInfo) -> Result<bool, chain::Error> {
		Ok(true)
	}

	fn headers_received(&self, _bh: &[core::BlockHeader], _peer_info: &PeerInfo) -> Result<bool, chain::Error> {
		Ok(true)
	}

	fn locate_headers(&self, _locator: &[Hash]) -> Result<Vec<core::BlockHeader>, chain::Error> {
		Ok(vec![])
	}

	fn tip_header(&self) -> Result<core::BlockHeader, chain::Error> {
		Err(chain::Error::NotFound)
	}

	fn header_by_height(&self, _height: u64) -> Option<core::BlockHeader> {
		None
	}

	fn get_block(&self, _h: Hash, _peer_info: &PeerInfo) -> Option<core::Block> {
		None
	}

	fn has_block(&self, _height: u64, _h: Hash) -> bool {
		false
	}

	fn blocks_needed(&self, _count: u64) -> Result<Vec<(u64, Hash)>, chain::Error> {
		Ok(vec![])
	}

	fn process_next_orphan_block(&self) -> Result<bool, chain::Error> {
		Ok(false)
	}

	fn txhashset_read(&self, _h: Hash) -> Option<TxHashSetRead> {
		None
	}

	fn txhashset_archive_header(&self) -> Result<core::BlockHeader, chain::Error> {
		Err(chain::Error::Other("no txhashset archive".to_string()))
	}

	fn txhashset_receive_ready(&self) -> bool {
		false
	}

	fn txhashset_download_update(&self, _start_time: DateTime<Utc>, _downloaded_size: u64, _total_size: u64) -> bool {
		false
	}

	fn txhashset_write(&self, _h: Hash, _txhashset_data: std::fs::File, _peer_info: &PeerInfo) -> Result<bool, chain::Error> {
		Ok(false)
	}

	fn get_tmp_dir(&self) -> std::path::PathBuf {
		std::env::temp_dir()
	}

	fn get_tmpfile_pathname(&self, tmpfile_name: String) -> std::path::PathBuf {
		std::env::temp_dir().join(tmpfile_name)
	}

	fn prepare_segmenter(&self) -> Result<(), chain::Error> {
		Err(chain::Error::Other("pibd not supported".to_string()))
	}

	fn get_kernel_segment(&self, _h: Hash, _id: core::SegmentIdentifier) -> Result<core::Segment<core::TxKernel>, chain::Error> {
		Err(chain::Error::Other("pibd not supported".to_string()))
	}

	fn get_bitmap_segment(&self, _h: Hash, _id: core::SegmentIdentifier) -> Result<core::Segment<core::BitmapChunk>, chain::Error> {
		Err(chain::Error::Other("pibd not supported".to_string()))
	}

	fn get_output_segment(&self, _h: Hash, _id: core::SegmentIdentifier) -> Result<core::Segment<core::OutputIdentifier>, chain::Error> {
		Err(chain::Error::Other("pibd not supported".to_string()))
	}

	fn get_rangeproof_segment(&self, _h: Hash, _id: core::SegmentIdentifier) -> Result<core::Segment<u64>, chain::Error> {
		Err(chain::Error::Other("pibd not supported".to_string()))
	}

	fn get_header_hashes_segment(&self, _id: core::SegmentIdentifier) -> Result<core::Segment<Hash>, chain::Error> {
		Err(chain::Error::Other("pibd not supported".to_string()))
	}

	fn receive_bitmap_segment(&self, _h: Hash, _id: core::SegmentIdentifier, _segment: core::Segment<core::BitmapChunk>) -> Result<bool, chain::Error> {
		Ok(false)
	}

	fn receive_output_segment(&self, _h: Hash, _id: core::SegmentIdentifier, _segment: core::Segment<core::OutputIdentifier>) -> Result<bool, chain::Error> {
		Ok(false)
	}

	fn receive_rangeproof_segment(&self, _h: Hash, _id: core::SegmentIdentifier, _segment: core::Segment<u64>) -> Result<bool, chain::Error> {
		Ok(false)
	}

	fn receive_kernel_segment(&self, _h: Hash, _id: core::SegmentIdentifier, _segment: core::Segment<core::TxKernel>) -> Result<bool, chain::Error> {
		Ok(false)
	}

	fn receive_header_hashes_segment(&self, _id: core::SegmentIdentifier, _segment: core::Segment<Hash>) -> Result<bool, chain::Error> {
		Ok(false)
	}

	fn receive_pibd_status(&self, _peer_info: &PeerInfo, _can_serve: bool) {}

	fn receive_another_archive_header(&self, _peer_info: &PeerInfo, _header_hash: Hash, _height: u64) {}

	fn receive_headers_hash_response(&self, _archive_height: u64, _headers_hash: Hash) -> Result<bool, chain::Error> {
		Ok(false)
	}
}

impl NetAdapter for DummyAdapter {
	fn find_peer_addrs(&self, _capab: Capabilities) -> Vec<PeerAddr> {
		vec![]
	}

	fn peer_addrs_received(&self, _: Vec<PeerAddr>) {}

	fn peer_difficulty(&self, _: PeerAddr, _: Difficulty, _: u64) {}

	fn is_banned(&self, _addr: PeerAddr) -> bool {
		false
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dummy_adapter_reports_zero_difficulty() {
		let adapter = DummyAdapter::default();
		assert_eq!(adapter.total_difficulty().unwrap(), Difficulty::zero());
		assert_eq!(adapter.total_height().unwrap(), 0);
		assert!(!adapter.txhashset_receive_ready());
	}
}
