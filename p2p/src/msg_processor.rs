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

//! Per-message dispatch table. `Connection` hands every decoded frame to
//! `MessageHandler::handle`, which is the only place that decides what a
//! given `Type` means: forward to a validation pipeline, answer directly
//! off the chain adapter, or flag the sender for a ban. Nothing here talks
//! to a socket; replies go back out through `Peer::send`.
//!
//! `TxHashSetArchive` is conspicuously absent from the match below:
//! `Connection` intercepts that type itself, before calling into this
//! module, because the raw archive bytes that follow it on the wire are
//! not another framed message.

use std::sync::Arc;
use std::time::{Duration, Instant};

use braid_chain as chain;
use braid_core::hash::{Hash, Hashed};
use braid_core::ser::{ByteSliceReader, Readable};

use crate::msg::{self, Type};
use crate::peer::Peer;
use crate::peers::Peers;
use crate::pipe::{BlockPipe, TxPipe};
use crate::sync_status::SyncState;
use crate::types::{Error, NetAdapter, PeerInfo, ReasonForBan};

/// How often a peer may ask us for our TxHashSet archive.
pub const TXHASHSET_REQUEST_INTERVAL: Duration = Duration::from_secs(2 * 3600);

/// Outcome of handling one message, reported back to `Connection` so it can
/// decide whether to keep the socket open.
pub enum MsgResult {
	/// Handled, nothing more to do.
	Ok,
	/// A `Type` this build doesn't recognize; ignored rather than treated as
	/// an error, so older/newer peers speaking a superset protocol don't get
	/// disconnected over it.
	Unknown,
	/// The request named something we don't have; a normal outcome; the
	/// requester gets told rather than hung or met with a null/garbage
	/// response.
	ResourceMissing,
	/// The sender violated the protocol badly enough to warrant a ban.
	/// `Connection` is required to always call `Peers::ban_peer` before
	/// closing the socket when it sees this, never just close quietly.
	BanPeer(ReasonForBan),
}

pub struct MessageHandler {
	adapter: Arc<dyn NetAdapter>,
	peers: Arc<Peers>,
	block_pipe: Arc<BlockPipe>,
	tx_pipe: Arc<TxPipe>,
	sync_state: Arc<SyncState>,
}

impl MessageHandler {
	pub fn new(
		adapter: Arc<dyn NetAdapter>,
		peers: Arc<Peers>,
		block_pipe: Arc<BlockPipe>,
		tx_pipe: Arc<TxPipe>,
		sync_state: Arc<SyncState>,
	) -> MessageHandler {
		MessageHandler {
			adapter,
			peers,
			block_pipe,
			tx_pipe,
			sync_state,
		}
	}

	pub fn handle(
		&self,
		peer_info: &PeerInfo,
		peer: &Peer,
		msg_type: Type,
		body: &[u8],
	) -> Result<MsgResult, Error> {
		match msg_type {
			Type::Ping => {
				let ping: msg::Ping = read(body)?;
				self.peers
					.update_peer_difficulty(&peer_info.addr, ping.total_difficulty, ping.height);
				peer.send_pong(
					self.adapter.total_difficulty().unwrap_or_else(|_| ping.total_difficulty),
					self.adapter.total_height().unwrap_or(ping.height),
				);
				Ok(MsgResult::Ok)
			}
			Type::Pong => {
				let pong: msg::Pong = read(body)?;
				self.peers
					.update_peer_difficulty(&peer_info.addr, pong.total_difficulty, pong.height);
				Ok(MsgResult::Ok)
			}
			Type::GetPeerAddrs => {
				let req: msg::GetPeerAddrs = read(body)?;
				let peers = self.adapter.find_peer_addrs(req.capabilities);
				let _ = peer.send(
					Type::PeerAddrs,
					&msg::PeerAddrs {
						peers: peers.into_iter().take(crate::types::MAX_PEER_ADDRS as usize).collect(),
					},
				);
				Ok(MsgResult::Ok)
			}
			Type::PeerAddrs => {
				let addrs: msg::PeerAddrs = read(body)?;
				self.adapter.peer_addrs_received(addrs.peers);
				Ok(MsgResult::Ok)
			}
			Type::GetHeaders => {
				let req: msg::GetHeaders = read(body)?;
				if req.locator.len() > crate::types::MAX_LOCATORS as usize {
					return Ok(MsgResult::BanPeer(ReasonForBan::Abusive));
				}
				match self.adapter.locate_headers(&req.locator) {
					Ok(headers) => {
						let _ = peer.send(Type::Headers, &msg::Headers { headers });
						Ok(MsgResult::Ok)
					}
					Err(_) => Ok(MsgResult::ResourceMissing),
				}
			}
			Type::Header => {
				let header = read_header_only(body)?;
				self.peers
					.update_peer_difficulty(&peer_info.addr, header.total_difficulty, header.height);
				let hash = header.hash();
				let height = header.height;
				match self.adapter.header_received(header, peer_info) {
					Ok(true) => {
						self.request_compact_block_if_missing(peer, hash, height);
						Ok(MsgResult::Ok)
					}
					Ok(false) => Ok(MsgResult::BanPeer(ReasonForBan::BadBlockHeader)),
					Err(chain::Error::Orphan) => {
						self.request_compact_block_if_missing(peer, hash, height);
						Ok(MsgResult::Ok)
					}
					Err(_) => Ok(MsgResult::Ok),
				}
			}
			Type::Headers => {
				let headers: msg::Headers = read(body)?;
				if headers.headers.len() > crate::types::MAX_BLOCK_HEADERS as usize {
					return Ok(MsgResult::BanPeer(ReasonForBan::Abusive));
				}
				// Called inline rather than handed to a detached task: this
				// bounds how many header batches can be mid-validation at
				// once to exactly the number of live connections.
				match self.adapter.headers_received(&headers.headers, peer_info) {
					Ok(true) => Ok(MsgResult::Ok),
					Ok(false) => Ok(MsgResult::BanPeer(ReasonForBan::BadBlockHeader)),
					Err(_) => Ok(MsgResult::BanPeer(ReasonForBan::BadBlockHeader)),
				}
			}
			Type::GetBlock => {
				let req: msg::GetBlock = read(body)?;
				match self.adapter.get_block(req.hash, peer_info) {
					Some(b) => {
						let _ = peer.send(Type::Block, &b);
						Ok(MsgResult::Ok)
					}
					None => Ok(MsgResult::ResourceMissing),
				}
			}
			Type::Block => {
				let block: msg::BlockMsg = read(body)?;
				if self.sync_state.is_body_sync() {
					// Mid-batch block-sync: let `BlockPipe` absorb and
					// parallelize these rather than validating inline on
					// the connection thread. Enqueued regardless of dedup
					// outcome: a duplicate just means another connection
					// already has it in flight.
					self.block_pipe.enqueue(block, peer_info.addr.clone());
					Ok(MsgResult::Ok)
				} else {
					// Unsolicited gossip outside of a sync batch: validate
					// inline so header-first propagation happens without an
					// extra queueing hop.
					let header = block.header.clone();
					let hash = header.hash();
					let height = header.height;
					match self
						.adapter
						.block_received(block, peer_info, chain::Options::BROADCAST)
					{
						Ok(true) => {
							self.peers.broadcast(Type::Header, &header, Some(&peer_info.addr));
							Ok(MsgResult::Ok)
						}
						Ok(false) => Ok(MsgResult::BanPeer(ReasonForBan::BadBlock)),
						Err(chain::Error::Orphan) => {
							self.request_compact_block_if_missing(peer, hash, height);
							Ok(MsgResult::Ok)
						}
						Err(_) => Ok(MsgResult::Ok),
					}
				}
			}
			Type::GetCompactBlock => {
				let req: msg::GetCompactBlock = read(body)?;
				match self.adapter.get_block(req.hash, peer_info) {
					Some(b) => {
						let cb = compact_from(&b);
						let _ = peer.send(Type::CompactBlock, &cb);
						Ok(MsgResult::Ok)
					}
					None => Ok(MsgResult::ResourceMissing),
				}
			}
			Type::CompactBlock => {
				let cb: msg::CompactBlockMsg = read(body)?;
				match self.adapter.compact_block_received(cb, peer_info) {
					Ok(true) => Ok(MsgResult::Ok),
					Ok(false) => Ok(MsgResult::BanPeer(ReasonForBan::BadCompactBlock)),
					Err(_) => Ok(MsgResult::BanPeer(ReasonForBan::BadCompactBlock)),
				}
			}
			Type::StemTransaction => {
				let tx: msg::TransactionMsg = read(body)?;
				if !self.sync_state.is_syncing() {
					self.tx_pipe.enqueue(tx, true, peer_info.addr.clone());
				}
				Ok(MsgResult::Ok)
			}
			Type::Transaction => {
				let tx: msg::TransactionMsg = read(body)?;
				if !self.sync_state.is_syncing() {
					self.tx_pipe.enqueue(tx, false, peer_info.addr.clone());
				}
				Ok(MsgResult::Ok)
			}
			Type::GetTransaction => {
				let req: msg::GetTransaction = read(body)?;
				match self.adapter.get_transaction(req.kernel_hash) {
					Some(tx) => {
						let _ = peer.send(Type::Transaction, &tx);
						Ok(MsgResult::Ok)
					}
					None => Ok(MsgResult::ResourceMissing),
				}
			}
			Type::TransactionKernel => {
				let msg: msg::TransactionKernelMsg = read(body)?;
				match self.adapter.tx_kernel_received(msg.kernel_hash, peer_info) {
					Ok(true) => {
						let _ = peer.send(
							Type::GetTransaction,
							&msg::GetTransaction {
								kernel_hash: msg.kernel_hash,
							},
						);
						Ok(MsgResult::Ok)
					}
					Ok(false) => Ok(MsgResult::Ok),
					Err(_) => Ok(MsgResult::Ok),
				}
			}
			Type::TxHashSetRequest => {
				let req: msg::TxHashSetRequest = read(body)?;
				if !self.check_and_record_txhashset_request(peer_info) {
					return Ok(MsgResult::BanPeer(ReasonForBan::Abusive));
				}
				match self.adapter.txhashset_read(req.hash) {
					Some(mut read) => {
						use std::io::Seek;
						let total_size = read
							.reader
							.seek(std::io::SeekFrom::End(0))
							.unwrap_or(0);
						let _ = read.reader.seek(std::io::SeekFrom::Start(0));
						let _ = peer.send(
							Type::TxHashSetArchive,
							&msg::TxHashSetArchive {
								hash: req.hash,
								height: req.height,
								bytes: total_size,
							},
						);
						stream_archive(&peer, read.reader, total_size);
						Ok(MsgResult::Ok)
					}
					None => Ok(MsgResult::ResourceMissing),
				}
			}
			Type::BanReason => {
				let msg: msg::BanReasonMsg = read(body)?;
				warn!("{} told us we're banned for {:?}", peer_info.addr, msg.reason);
				Ok(MsgResult::Ok)
			}
			Type::GetHeaderHashesSegment => {
				let req: msg::GetSegmentRequest = read(body)?;
				match self.adapter.get_header_hashes_segment(req.id) {
					Ok(segment) => {
						let _ = peer.send(
							Type::HeaderHashesSegment,
							&msg::HeaderHashesSegmentResponse {
								archive_hash: req.archive_hash,
								segment,
							},
						);
						Ok(MsgResult::Ok)
					}
					Err(_) => Ok(MsgResult::ResourceMissing),
				}
			}
			Type::GetBitmapSegment => {
				let req: msg::GetSegmentRequest = read(body)?;
				match self.adapter.get_bitmap_segment(req.archive_hash, req.id) {
					Ok(segment) => {
						let _ = peer.send(
							Type::BitmapSegment,
							&msg::BitmapSegmentResponse {
								archive_hash: req.archive_hash,
								segment,
							},
						);
						Ok(MsgResult::Ok)
					}
					Err(_) => Ok(MsgResult::ResourceMissing),
				}
			}
			Type::GetOutputSegment => {
				let req: msg::GetSegmentRequest = read(body)?;
				match self.adapter.get_output_segment(req.archive_hash, req.id) {
					Ok(segment) => {
						let _ = peer.send(
							Type::OutputSegment,
							&msg::OutputSegmentResponse {
								archive_hash: req.archive_hash,
								segment,
							},
						);
						Ok(MsgResult::Ok)
					}
					Err(_) => Ok(MsgResult::ResourceMissing),
				}
			}
			Type::GetRangeproofSegment => {
				let req: msg::GetSegmentRequest = read(body)?;
				match self.adapter.get_rangeproof_segment(req.archive_hash, req.id) {
					Ok(segment) => {
						let _ = peer.send(
							Type::RangeproofSegment,
							&msg::RangeproofSegmentResponse {
								archive_hash: req.archive_hash,
								segment,
							},
						);
						Ok(MsgResult::Ok)
					}
					Err(_) => Ok(MsgResult::ResourceMissing),
				}
			}
			Type::GetKernelSegment => {
				let req: msg::GetSegmentRequest = read(body)?;
				match self.adapter.get_kernel_segment(req.archive_hash, req.id) {
					Ok(segment) => {
						let _ = peer.send(
							Type::KernelSegment,
							&msg::KernelSegmentResponse {
								archive_hash: req.archive_hash,
								segment,
							},
						);
						Ok(MsgResult::Ok)
					}
					Err(_) => Ok(MsgResult::ResourceMissing),
				}
			}
			Type::HeaderHashesSegment => {
				let resp: msg::HeaderHashesSegmentResponse = read(body)?;
				let id = resp.segment.identifier;
				match self
					.adapter
					.receive_header_hashes_segment(id, resp.segment)
				{
					Ok(true) => Ok(MsgResult::Ok),
					Ok(false) => Ok(MsgResult::BanPeer(ReasonForBan::BadTxHashSet)),
					Err(_) => Ok(MsgResult::BanPeer(ReasonForBan::BadTxHashSet)),
				}
			}
			Type::BitmapSegment => {
				let resp: msg::BitmapSegmentResponse = read(body)?;
				match self
					.adapter
					.receive_bitmap_segment(resp.archive_hash, resp.segment.identifier, resp.segment)
				{
					Ok(true) => Ok(MsgResult::Ok),
					Ok(false) => Ok(MsgResult::BanPeer(ReasonForBan::BadTxHashSet)),
					Err(_) => Ok(MsgResult::BanPeer(ReasonForBan::BadTxHashSet)),
				}
			}
			Type::OutputSegment => {
				let resp: msg::OutputSegmentResponse = read(body)?;
				match self
					.adapter
					.receive_output_segment(resp.archive_hash, resp.segment.identifier, resp.segment)
				{
					Ok(true) => Ok(MsgResult::Ok),
					Ok(false) => Ok(MsgResult::BanPeer(ReasonForBan::BadTxHashSet)),
					Err(_) => Ok(MsgResult::BanPeer(ReasonForBan::BadTxHashSet)),
				}
			}
			Type::RangeproofSegment => {
				let resp: msg::RangeproofSegmentResponse = read(body)?;
				match self
					.adapter
					.receive_rangeproof_segment(resp.archive_hash, resp.segment.identifier, resp.segment)
				{
					Ok(true) => Ok(MsgResult::Ok),
					Ok(false) => Ok(MsgResult::BanPeer(ReasonForBan::BadTxHashSet)),
					Err(_) => Ok(MsgResult::BanPeer(ReasonForBan::BadTxHashSet)),
				}
			}
			Type::KernelSegment => {
				let resp: msg::KernelSegmentResponse = read(body)?;
				match self
					.adapter
					.receive_kernel_segment(resp.archive_hash, resp.segment.identifier, resp.segment)
				{
					Ok(true) => Ok(MsgResult::Ok),
					Ok(false) => Ok(MsgResult::BanPeer(ReasonForBan::BadTxHashSet)),
					Err(_) => Ok(MsgResult::BanPeer(ReasonForBan::BadTxHashSet)),
				}
			}
			Type::PibdStatus => {
				let status: msg::PibdStatusMsg = read(body)?;
				self.adapter.receive_pibd_status(peer_info, status.can_serve);
				Ok(MsgResult::Ok)
			}
			Type::Error | Type::Hand | Type::Shake | Type::TxHashSetArchive => Ok(MsgResult::Unknown),
		}
	}

	/// Asks `peer` for the compact block at `hash`/`height` unless we already
	/// have its body, used after accepting or orphaning a header/block so
	/// the body follows without waiting for the next sync tick.
	fn request_compact_block_if_missing(&self, peer: &Peer, hash: Hash, height: u64) {
		if !self.adapter.has_block(height, hash) {
			let _ = peer.send(Type::GetCompactBlock, &msg::GetCompactBlock { hash });
		}
	}

	/// Enforces the one-request-per-2h rate limit on `TxHashSetRequest`.
	/// Returns `false` (and the caller bans) if `peer_info` asked again too
	/// soon.
	fn check_and_record_txhashset_request(&self, peer_info: &PeerInfo) -> bool {
		let mut last = peer_info.last_txhashset_request.lock().unwrap();
		let now = Instant::now();
		if let Some(prev) = *last {
			if now.duration_since(prev) < TXHASHSET_REQUEST_INTERVAL {
				return false;
			}
		}
		*last = Some(now);
		true
	}
}

pub(crate) fn read<T: Readable>(body: &[u8]) -> Result<T, Error> {
	let mut reader = ByteSliceReader::new(body);
	Ok(T::read(&mut reader)?)
}

/// `Header` carries a single `BlockHeader`; reused `Block`'s reader isn't
/// applicable, so this reads just the header shape directly.
fn read_header_only(body: &[u8]) -> Result<braid_core::core::BlockHeader, Error> {
	let mut reader = ByteSliceReader::new(body);
	Ok(braid_core::core::BlockHeader::read(&mut reader)?)
}

fn compact_from(b: &braid_core::core::Block) -> braid_core::core::CompactBlock {
	braid_core::core::CompactBlock {
		header: b.header.clone(),
		nonce: 0,
		out_full: b.outputs.clone(),
		kern_full: b.kernels.clone(),
		kern_ids: vec![],
	}
}

/// Streams a full archive reader out through the peer's raw send queue,
/// chunked so no more than one chunk sits in memory at a time.
fn stream_archive(peer: &Peer, mut reader: std::fs::File, total_size: u64) {
	use std::io::Read;
	const CHUNK: usize = 256 * 1024;
	let mut remaining = total_size;
	let mut buf = vec![0u8; CHUNK];
	while remaining > 0 {
		let want = std::cmp::min(CHUNK as u64, remaining) as usize;
		match reader.read_exact(&mut buf[..want]) {
			Ok(()) => {}
			Err(e) => {
				warn!("failed reading txhashset archive to stream: {}", e);
				return;
			}
		}
		if peer.send_raw(buf[..want].to_vec()).is_err() {
			return;
		}
		remaining -= want as u64;
	}
}
