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

//! One thread per connected peer. `Connection::connect`/`Connection::accept`
//! run the handshake, register the new `Peer` with `Peers`, and hand the
//! live socket off to a background thread that then owns it exclusively for
//! the rest of the connection's life: everyone else only ever reaches it
//! through the peer's send queue.

use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use braid_core::pow::Difficulty;
use braid_util::StopState;

use crate::codec;
use crate::handshake::{self, Handshake};
use crate::msg::{self, Type};
use crate::msg_processor::{self, MessageHandler, MsgResult};
use crate::peer::{Outgoing, Peer, Tracker};
use crate::peers::Peers;
use crate::pipe::{self, TxHashSetPipe};
use crate::socket::Socket;
use crate::sync_status::{SyncState, SyncStatus};
use crate::types::{Error, NetAdapter, PeerInfo, ReasonForBan};

/// How often a live connection pings its peer.
const PING_INTERVAL: Duration = Duration::from_secs(10);

/// A connection that has sent or received nothing for this long is
/// considered dead and torn down.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long an outbound dial is allowed to take before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the loop sleeps when a tick neither sent nor received anything,
/// so an idle connection doesn't spin a core.
const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Everything a connection's background thread needs beyond the socket
/// itself. One instance is shared (via `Arc`) across every live connection,
/// constructed once by `Server`.
pub struct ConnContext {
	pub adapter: Arc<dyn NetAdapter>,
	pub peers: Arc<Peers>,
	pub handler: Arc<MessageHandler>,
	pub txhashset_pipe: Arc<TxHashSetPipe>,
	pub sync_state: Arc<SyncState>,
	pub stop: Arc<StopState>,
}

/// Marker type: the connection itself has no state of its own once spawned,
/// `connect`/`accept` hand back the `Peer` handle that addresses it.
pub struct Connection;

impl Connection {
	/// Dials `peer_addr`, completes the outbound handshake and spawns the
	/// connection's background thread. Returns the registered `Peer` handle.
	pub fn connect(
		ctx: Arc<ConnContext>,
		handshake: &Handshake,
		self_addr: SocketAddr,
		peer_addr: SocketAddr,
	) -> Result<Arc<Peer>, Error> {
		let mut socket = Socket::connect(peer_addr, CONNECT_TIMEOUT)?;
		socket.set_recv_timeout(handshake::HANDSHAKE_TIMEOUT)?;
		socket.set_send_timeout(handshake::HANDSHAKE_TIMEOUT)?;

		let total_difficulty = ctx
			.adapter
			.total_difficulty()
			.unwrap_or_else(|_| Difficulty::zero());
		let info = handshake.outbound(&mut socket, self_addr, peer_addr, total_difficulty)?;
		spawn(ctx, socket, info)
	}

	/// Completes the inbound handshake on an already-accepted `TcpStream` and
	/// spawns the connection's background thread.
	pub fn accept(ctx: Arc<ConnContext>, handshake: &Handshake, stream: TcpStream) -> Result<Arc<Peer>, Error> {
		let mut socket = Socket::accept(stream)?;
		socket.set_recv_timeout(handshake::HANDSHAKE_TIMEOUT)?;
		socket.set_send_timeout(handshake::HANDSHAKE_TIMEOUT)?;

		let peer_addr = socket.peer_addr()?;
		let total_difficulty = ctx
			.adapter
			.total_difficulty()
			.unwrap_or_else(|_| Difficulty::zero());
		// We have no reliable way to recognize a nonce we've already seen on
		// another inbound socket without a registry of in-flight dials; the
		// `Hand.nonce == self.nonce` check inside `inbound` already catches
		// the one case that actually matters, connecting to self.
		let info = handshake.inbound(&mut socket, peer_addr, total_difficulty, |_| false)?;
		spawn(ctx, socket, info)
	}
}

fn spawn(ctx: Arc<ConnContext>, mut socket: Socket, info: PeerInfo) -> Result<Arc<Peer>, Error> {
	socket.set_blocking(false)?;
	let (tracker, rx) = Tracker::pair();
	let peer = Arc::new(Peer::new(info, tracker));
	ctx.peers.add_connection(peer.clone())?;

	// If we're still short of our preferred peer count, ask the newly
	// registered peer for its address book right away rather than waiting
	// for the seeder to notice and fall back to a broadcast.
	if ctx.peers.peer_count() < ctx.peers.config.peer_min_preferred_outbound_count() as usize {
		let _ = peer.send(
			Type::GetPeerAddrs,
			&msg::GetPeerAddrs {
				capabilities: ctx.peers.config.capabilities,
			},
		);
	}

	let loop_peer = peer.clone();
	let loop_ctx = ctx;
	thread::spawn(move || run_loop(socket, rx, loop_peer, loop_ctx));

	Ok(peer)
}

/// The cooperative per-connection loop: ping on a timer, drain one inbound
/// frame and one outbound queue entry per tick, and exit on ban, protocol
/// error, queue disconnection or 30s of silence in both directions.
fn run_loop(mut socket: Socket, rx: Receiver<Outgoing>, peer: Arc<Peer>, ctx: Arc<ConnContext>) {
	let mut last_ping = Instant::now();
	let mut last_activity = Instant::now();

	while !ctx.stop.is_stopped() && !peer.is_stopped() {
		let mut did_something = false;

		if last_ping.elapsed() >= PING_INTERVAL {
			let total_difficulty = ctx
				.adapter
				.total_difficulty()
				.unwrap_or_else(|_| Difficulty::zero());
			let height = ctx.adapter.total_height().unwrap_or(0);
			peer.send_ping(total_difficulty, height);
			last_ping = Instant::now();
		}

		match codec::try_read_frame(&mut socket) {
			Ok(Some((msg_type, body))) => {
				did_something = true;
				last_activity = Instant::now();
				if !process_frame(&mut socket, msg_type, &body, &peer, &ctx) {
					break;
				}
				if socket.is_receive_abusive() {
					let _ = ctx.peers.ban_peer(&peer.addr(), ReasonForBan::Abusive);
					break;
				}
			}
			Ok(None) => {}
			Err(e @ Error::Serialization(_)) | Err(e @ Error::BadMessage) => {
				debug!("frame error from {}: {}, banning", peer.addr(), e);
				let _ = ctx.peers.ban_peer(&peer.addr(), ReasonForBan::BadMessage);
				break;
			}
			Err(_) => break,
		}

		match rx.try_recv() {
			Ok(Outgoing::Framed(msg_type, bytes)) => {
				did_something = true;
				last_activity = Instant::now();
				if codec::write_frame(&mut socket, msg_type, &bytes).is_err() {
					break;
				}
			}
			Ok(Outgoing::Raw(bytes)) => {
				did_something = true;
				last_activity = Instant::now();
				if socket.send(&bytes).is_err() {
					break;
				}
			}
			Err(TryRecvError::Empty) => {}
			Err(TryRecvError::Disconnected) => break,
		}

		if last_activity.elapsed() > IDLE_TIMEOUT {
			debug!("connection to {} timed out, closing", peer.addr());
			break;
		}

		if !did_something {
			thread::sleep(IDLE_SLEEP);
		}
	}

	peer.stop();
	let _ = socket.shutdown();
}

/// Dispatches one decoded frame. Returns `false` if the connection should be
/// torn down (the sender was banned or the frame couldn't be handled).
fn process_frame(
	socket: &mut Socket,
	msg_type: Type,
	body: &[u8],
	peer: &Arc<Peer>,
	ctx: &ConnContext,
) -> bool {
	if msg_type == Type::TxHashSetArchive {
		return receive_txhashset(socket, body, peer, ctx).is_ok();
	}

	match ctx.handler.handle(&peer.info, peer, msg_type, body) {
		Ok(MsgResult::Ok) | Ok(MsgResult::Unknown) | Ok(MsgResult::ResourceMissing) => true,
		Ok(MsgResult::BanPeer(reason)) => {
			let _ = ctx.peers.ban_peer(&peer.addr(), reason);
			false
		}
		Err(e) => {
			debug!("error handling message from {}: {}, banning", peer.addr(), e);
			let _ = ctx.peers.ban_peer(&peer.addr(), ReasonForBan::BadMessage);
			false
		}
	}
}

/// `TxHashSetArchive` is intercepted here rather than handed to
/// `MessageHandler`: the framed header only announces a size, the archive
/// bytes that follow are raw and must be streamed straight off the socket.
fn receive_txhashset(
	socket: &mut Socket,
	body: &[u8],
	peer: &Arc<Peer>,
	ctx: &ConnContext,
) -> Result<(), Error> {
	let archive: msg::TxHashSetArchive = msg_processor::read(body)?;

	if !ctx.adapter.txhashset_receive_ready() {
		let _ = ctx.peers.ban_peer(&peer.addr(), ReasonForBan::Abusive);
		return Err(Error::BadMessage);
	}

	let start_time = Utc::now();
	let tmp_path = ctx
		.adapter
		.get_tmpfile_pathname(format!("txhashset-{}.zip", archive.height));
	ctx.adapter.txhashset_download_update(start_time, 0, archive.bytes);
	ctx.sync_state.update(SyncStatus::TxHashsetDownload {
		start_time,
		downloaded_size: 0,
		total_size: archive.bytes,
	});

	let adapter = ctx.adapter.clone();
	let sync_state = ctx.sync_state.clone();
	let bytes = archive.bytes;
	if let Err(e) = pipe::receive_to_tempfile(socket, bytes, &tmp_path, &ctx.stop, |downloaded| {
		adapter.txhashset_download_update(start_time, downloaded, bytes);
		sync_state.update(SyncStatus::TxHashsetDownload {
			start_time,
			downloaded_size: downloaded,
			total_size: bytes,
		});
	}) {
		let _ = std::fs::remove_file(&tmp_path);
		ctx.sync_state.update(SyncStatus::TxHashsetSyncFailed);
		return Err(e);
	}

	ctx.sync_state.update(SyncStatus::TxHashsetValidation {
		kernels: 0,
		kernels_total: 0,
		rproofs: 0,
		rproofs_total: 0,
	});
	let result = ctx
		.txhashset_pipe
		.try_import(ctx.adapter.as_ref(), archive.hash, &tmp_path, &peer.info);
	let _ = std::fs::remove_file(&tmp_path);
	match result {
		Ok(true) => {
			ctx.sync_state.update(SyncStatus::TxHashsetDone);
			Ok(())
		}
		Ok(false) => {
			// Another import was already in flight; this archive is simply
			// discarded (property #6), not a fault of this peer.
			Ok(())
		}
		Err(_) => {
			ctx.sync_state.update(SyncStatus::TxHashsetSyncFailed);
			let _ = ctx.peers.ban_peer(&peer.addr(), ReasonForBan::BadTxHashSet);
			Err(Error::BadMessage)
		}
	}
}
