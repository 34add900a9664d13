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

//! Deduplicated, bounded work queues that take heavy validation off the
//! connection threads: `BlockPipe`, `TxPipe` and `TxHashSetPipe`. All three
//! follow the same shape — a mutex-guarded FIFO plus a seen-set keyed by
//! content hash — but differ in worker count and what "processing an entry"
//! means.

use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use braid_chain as chain;
use braid_core::core::{Block, BlockHeader, Transaction};
use braid_core::hash::{Hash, Hashed};
use braid_util::StopState;

use crate::types::{ChainAdapter, Error, PeerAddr, PeerInfo, ReasonForBan};

/// Number of parallel block-validation workers; mirrors the CPU count since
/// validation is expected to be CPU-bound.
fn block_worker_count() -> usize {
	std::thread::available_parallelism()
		.map(|n| n.get())
		.unwrap_or(4)
}

/// One unit of pipeline work: the payload plus enough to attribute a
/// ban-worthy failure back to the peer that sent it.
pub struct Entry<T> {
	pub data: T,
	pub peer_addr: PeerAddr,
}

/// A bounded, deduplicating FIFO shared between producer connections and a
/// fixed pool of worker threads.
struct Queue<T> {
	items: Mutex<VecDeque<Entry<T>>>,
	seen: Mutex<HashSet<Hash>>,
}

impl<T> Queue<T> {
	fn new() -> Queue<T> {
		Queue {
			items: Mutex::new(VecDeque::new()),
			seen: Mutex::new(HashSet::new()),
		}
	}

	/// Enqueues `data` keyed by `key`, unless an entry with that key is
	/// already queued or mid-flight. Returns whether it was actually queued.
	fn push(&self, key: Hash, data: T, peer_addr: PeerAddr) -> bool {
		let mut seen = self.seen.lock().unwrap();
		if !seen.insert(key) {
			return false;
		}
		self.items.lock().unwrap().push_back(Entry { data, peer_addr });
		true
	}

	fn pop(&self, key_of: impl Fn(&T) -> Hash) -> Option<Entry<T>> {
		let entry = self.items.lock().unwrap().pop_front();
		if let Some(ref e) = entry {
			self.seen.lock().unwrap().remove(&key_of(&e.data));
		}
		entry
	}
}

/// Dispatches ban verdicts and post-acceptance broadcasts; the pipeline
/// itself never touches the connection registry directly, it only reports
/// what happened through this callback so `Peers` stays the single place
/// that records bans and fans messages back out.
pub trait BanSink: Sync + Send {
	fn ban(&self, addr: &PeerAddr, reason: ReasonForBan);
	/// "Header first" propagation: a full block was just accepted from
	/// `source`, so announce just its header to everyone else.
	fn broadcast_header(&self, header: &BlockHeader, source: &PeerAddr);
	/// A transaction was just fluffed into the mempool; broadcast it to
	/// everyone except the peer it came from.
	fn broadcast_transaction(&self, tx: &Transaction, source: &PeerAddr);
}

/// Parallel block-import queue. A fixed pool of workers calls
/// `ChainAdapter::block_received`; a dedicated extra worker repeatedly drains
/// out-of-order orphans via `process_next_orphan_block`.
pub struct BlockPipe {
	queue: Arc<Queue<Block>>,
}

impl BlockPipe {
	pub fn new(
		adapter: Arc<dyn ChainAdapter>,
		bans: Arc<dyn BanSink>,
		stop: Arc<StopState>,
	) -> BlockPipe {
		let queue = Arc::new(Queue::new());
		for _ in 0..block_worker_count() {
			let queue = queue.clone();
			let adapter = adapter.clone();
			let bans = bans.clone();
			let stop = stop.clone();
			thread::spawn(move || block_worker(queue, adapter, bans, stop));
		}
		{
			let adapter = adapter.clone();
			let stop = stop.clone();
			thread::spawn(move || orphan_worker(adapter, stop));
		}
		BlockPipe { queue }
	}

	/// Enqueues a block for validation, deduped by hash. `peer_info` is used
	/// only to identify the sender for a later ban; actual validation needs
	/// a full `PeerInfo` so the worker reconstructs a minimal one from the
	/// address where the chain adapter only needs identity, not liveness.
	pub fn enqueue(&self, block: Block, peer_addr: PeerAddr) -> bool {
		let key = block.hash();
		self.queue.push(key, block, peer_addr)
	}
}

fn block_worker(
	queue: Arc<Queue<Block>>,
	adapter: Arc<dyn ChainAdapter>,
	bans: Arc<dyn BanSink>,
	stop: Arc<StopState>,
) {
	while !stop.is_stopped() {
		match queue.pop(|b| b.hash()) {
			Some(entry) => {
				let info = minimal_peer_info(entry.peer_addr.clone());
				let header = entry.data.header.clone();
				match adapter.block_received(entry.data, &info, chain::Options::NONE) {
					Ok(true) => bans.broadcast_header(&header, &entry.peer_addr),
					Ok(false) => bans.ban(&entry.peer_addr, ReasonForBan::BadBlock),
					Err(_) => {}
				}
			}
			None => thread::sleep(Duration::from_millis(20)),
		}
	}
}

/// Repeatedly advances the orphan pool: every out-of-order block that became
/// connectable since the last check is processed immediately, then the
/// worker sleeps until it's worth checking again.
fn orphan_worker(adapter: Arc<dyn ChainAdapter>, stop: Arc<StopState>) {
	while !stop.is_stopped() {
		match adapter.process_next_orphan_block() {
			Ok(true) => {}
			Ok(false) => thread::sleep(Duration::from_millis(200)),
			Err(_) => thread::sleep(Duration::from_millis(200)),
		}
	}
}

/// Single-worker FIFO for transactions (both mempool and Dandelion stem
/// submissions). Ordering within this pipeline doesn't matter to
/// correctness, but keeping one worker avoids two conflicting transactions
/// racing each other into the pool.
pub struct TxPipe {
	queue: Arc<Queue<(Transaction, bool)>>,
}

impl TxPipe {
	pub fn new(
		adapter: Arc<dyn ChainAdapter>,
		bans: Arc<dyn BanSink>,
		stop: Arc<StopState>,
	) -> TxPipe {
		let queue: Arc<Queue<(Transaction, bool)>> = Arc::new(Queue::new());
		{
			let queue = queue.clone();
			thread::spawn(move || tx_worker(queue, adapter, bans, stop));
		}
		TxPipe { queue }
	}

	/// `stem` selects which pool the transaction targets: `true` for the
	/// Dandelion stempool, `false` for the regular mempool.
	pub fn enqueue(&self, tx: Transaction, stem: bool, peer_addr: PeerAddr) -> bool {
		let key = tx.hash();
		self.queue.push(key, (tx, stem), peer_addr)
	}
}

fn tx_worker(
	queue: Arc<Queue<(Transaction, bool)>>,
	adapter: Arc<dyn ChainAdapter>,
	bans: Arc<dyn BanSink>,
	stop: Arc<StopState>,
) {
	while !stop.is_stopped() {
		match queue.pop(|(tx, _)| tx.hash()) {
			Some(entry) => {
				let (tx, stem) = entry.data;
				let broadcastable = tx.clone();
				match adapter.transaction_received(tx, stem) {
					Ok(true) if !stem => bans.broadcast_transaction(&broadcastable, &entry.peer_addr),
					Ok(_) => {}
					Err(_) => {}
				}
			}
			None => thread::sleep(Duration::from_millis(20)),
		}
	}
}

/// Minimal stand-in `PeerInfo` built from just an address, used by workers
/// that need to hand a `&PeerInfo` to `ChainAdapter` but only actually have
/// the sender's address (the original connection's live `PeerInfo` may have
/// already gone away by the time the queue entry is processed).
fn minimal_peer_info(addr: PeerAddr) -> PeerInfo {
	use crate::types::{Capabilities, Direction, PeerLiveInfo};
	use braid_core::pow::Difficulty;
	use braid_util::RwLock;
	PeerInfo {
		capabilities: Capabilities::UNKNOWN,
		user_agent: String::new(),
		version: braid_core::global::PROTOCOL_VERSION,
		addr,
		direction: Direction::Inbound,
		live_info: Arc::new(RwLock::new(PeerLiveInfo::new(Difficulty::zero()))),
		header_sync_requested: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
		last_header: Arc::new(std::sync::Mutex::new(std::time::Instant::now())),
		last_header_reset: Arc::new(std::sync::Mutex::new(std::time::Instant::now())),
		last_txhashset_request: Arc::new(std::sync::Mutex::new(None)),
	}
}

/// Serialized TxHashSet import: at most one snapshot import runs at a time,
/// system-wide. Downloading the archive to a temp file happens on the
/// connection thread that received it (see `conn::Connection`); this type
/// only guards the subsequent import step.
pub struct TxHashSetPipe {
	importing: AtomicBool,
}

impl Default for TxHashSetPipe {
	fn default() -> Self {
		TxHashSetPipe {
			importing: AtomicBool::new(false),
		}
	}
}

impl TxHashSetPipe {
	pub fn new() -> TxHashSetPipe {
		TxHashSetPipe::default()
	}

	/// Attempts to import a downloaded archive. Returns `Ok(true)` if this
	/// call actually ran the import, `Ok(false)` if another import was
	/// already in flight and this one was refused (property #6), or `Err`
	/// if the chain adapter rejected the data.
	pub fn try_import(
		&self,
		adapter: &dyn ChainAdapter,
		hash: Hash,
		path: &std::path::Path,
		peer_info: &PeerInfo,
	) -> Result<bool, chain::Error> {
		if self
			.importing
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.is_err()
		{
			warn!(
				"txhashset import already in progress, refusing concurrent archive from {}",
				peer_info.addr
			);
			return Ok(false);
		}
		let result = (|| {
			let file = std::fs::File::open(path).map_err(|e| chain::Error::Io(e.to_string()))?;
			adapter.txhashset_write(hash, file, peer_info)
		})();
		self.importing.store(false, Ordering::SeqCst);
		result
	}
}

/// Streams a declared-size archive from `socket` into a fresh temp file,
/// 256 KiB at a time, honoring the shutdown flag between chunks. Does not
/// buffer the archive in memory.
pub fn receive_to_tempfile(
	socket: &mut crate::socket::Socket,
	total_size: u64,
	tmp_path: &std::path::Path,
	stop: &StopState,
	mut on_progress: impl FnMut(u64),
) -> Result<(), Error> {
	const CHUNK: usize = 256 * 1024;
	let mut file = std::fs::File::create(tmp_path)?;
	let mut remaining = total_size;
	let _ = socket.set_recv_timeout(Duration::from_secs(10));
	while remaining > 0 {
		if stop.is_stopped() {
			let _ = std::fs::remove_file(tmp_path);
			return Err(Error::ConnectionClose);
		}
		let want = std::cmp::min(CHUNK as u64, remaining) as usize;
		let buf = socket.receive(want, crate::socket::Mode::Blocking)?;
		if buf.len() != want {
			let _ = std::fs::remove_file(tmp_path);
			return Err(Error::ConnectionClose);
		}
		file.write_all(&buf)?;
		remaining -= want as u64;
		on_progress(total_size - remaining);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	struct NullBans;
	impl BanSink for NullBans {
		fn ban(&self, _addr: &PeerAddr, _reason: ReasonForBan) {}
		fn broadcast_header(&self, _header: &BlockHeader, _source: &PeerAddr) {}
		fn broadcast_transaction(&self, _tx: &Transaction, _source: &PeerAddr) {}
	}

	fn sample_block(height: u64) -> Block {
		use braid_core::core::BlockHeader;
		use braid_core::pow::Difficulty;
		Block {
			header: BlockHeader {
				version: 3,
				height,
				timestamp: 0,
				prev_hash: Hash::default(),
				prev_root: Hash::default(),
				output_root: Hash::default(),
				kernel_root: Hash::default(),
				total_difficulty: Difficulty::from_num(height),
				total_kernel_offset: [0u8; 32],
			},
			inputs: vec![],
			outputs: vec![],
			kernels: vec![],
		}
	}

	#[test]
	fn duplicate_block_hash_is_deduped() {
		let queue: Queue<Block> = Queue::new();
		let b = sample_block(10);
		let addr = PeerAddr::from_str("127.0.0.1:3414");
		assert!(queue.push(b.hash(), b.clone(), addr.clone()));
		assert!(!queue.push(b.hash(), b, addr));
	}
}
