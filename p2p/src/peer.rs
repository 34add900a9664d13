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

//! `Peer`: the live handle to a connected remote, shared between the
//! connection's own task and every other task that wants to address it
//! (broadcast, sync, dandelion). Exclusively owned state (the socket) stays
//! inside `conn::Connection`; `Peer` only ever reaches it through the
//! bounded send queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;

use braid_core::ser::Writeable;

use crate::conn;
use crate::msg::{self, Type};
use crate::types::{Error, PeerAddr, PeerInfo, ReasonForBan};

/// Depth of the per-peer outbound queue. Past this, `send` drops the
/// message rather than block the caller (broadcast is best-effort).
pub const SEND_QUEUE_SIZE: usize = 512;

/// One entry in a peer's outbound queue. Most traffic is `Framed` — a
/// complete protocol message the writer prefixes with a header and sends in
/// one shot. `Raw` carries a pre-chunked slice of a TxHashSet archive body,
/// written as-is with no header of its own; the writer only ever emits `Raw`
/// chunks right after the `Framed` `TxHashSetArchive` header that announces
/// them, so the reader on the other end knows how many bytes to expect.
pub enum Outgoing {
	Framed(Type, Vec<u8>),
	Raw(Vec<u8>),
}

/// Everything a `Connection`'s background task shares with the handle
/// other tasks hold. Cheap to clone via `Arc`.
pub struct Tracker {
	sender: SyncSender<Outgoing>,
	stopped: AtomicBool,
	banned: AtomicBool,
}

impl Tracker {
	pub fn pair() -> (Arc<Tracker>, mpsc::Receiver<Outgoing>) {
		let (tx, rx) = mpsc::sync_channel(SEND_QUEUE_SIZE);
		(
			Arc::new(Tracker {
				sender: tx,
				stopped: AtomicBool::new(false),
				banned: AtomicBool::new(false),
			}),
			rx,
		)
	}

	pub fn is_stopped(&self) -> bool {
		self.stopped.load(Ordering::SeqCst)
	}

	pub fn stop(&self) {
		self.stopped.store(true, Ordering::SeqCst);
	}

	pub fn is_banned(&self) -> bool {
		self.banned.load(Ordering::SeqCst)
	}

	pub fn mark_banned(&self) {
		self.banned.store(true, Ordering::SeqCst);
	}
}

/// A connected peer: `PeerInfo` plus the machinery needed to address it and
/// tear it down. One `Peer` exists per live `Connection`; the registry in
/// `Peers` holds `Arc<Peer>` clones, never the only reference.
pub struct Peer {
	pub info: PeerInfo,
	tracker: Arc<Tracker>,
}

impl Peer {
	pub fn new(info: PeerInfo, tracker: Arc<Tracker>) -> Peer {
		Peer { info, tracker }
	}

	pub fn addr(&self) -> PeerAddr {
		self.info.addr.clone()
	}

	pub fn is_connected(&self) -> bool {
		!self.tracker.is_stopped()
	}

	pub fn is_banned(&self) -> bool {
		self.tracker.is_banned()
	}

	/// Marks this peer for ban. Idempotent: the reason recorded is always the
	/// first one queued, matching the ban-idempotence property — `PeerBook`
	/// is the system of record for the reason itself, this flag only tells
	/// `Connection`/`Peers::prune` to close the socket.
	pub fn mark_banned(&self) {
		self.tracker.mark_banned();
	}

	/// Requests the connection's task to exit; idempotent, and returns
	/// immediately (it does not itself wait for the task to join — callers
	/// that need that guarantee go through `Peers::prune`, which is the
	/// operation documented as blocking until the task has exited).
	pub fn stop(&self) {
		self.tracker.stop();
	}

	pub fn is_stopped(&self) -> bool {
		self.tracker.is_stopped()
	}

	/// Queues a message for the connection's send loop. Best-effort: a full
	/// queue silently drops the message rather than block the sender, which
	/// is always an arbitrary other task (broadcast, sync, dandelion) that
	/// must not stall on one slow peer.
	pub fn send<T: Writeable>(&self, msg_type: Type, body: &T) -> Result<(), Error> {
		if self.tracker.is_stopped() {
			return Err(Error::ConnectionClose);
		}
		let bytes = braid_core::ser::ser_vec(body)?;
		let _ = self.tracker.sender.try_send(Outgoing::Framed(msg_type, bytes));
		Ok(())
	}

	/// Queues a raw, unframed chunk behind whatever `Framed` message already
	/// announced it (a `TxHashSetArchive` header). Used to stream a snapshot
	/// through the same single-writer queue as ordinary protocol messages
	/// without buffering the whole archive in memory.
	pub fn send_raw(&self, bytes: Vec<u8>) -> Result<(), Error> {
		if self.tracker.is_stopped() {
			return Err(Error::ConnectionClose);
		}
		self.tracker
			.sender
			.send(Outgoing::Raw(bytes))
			.map_err(|e| Error::Send(e.to_string()))
	}

	pub fn send_ping(&self, total_difficulty: braid_core::pow::Difficulty, height: u64) {
		let _ = self.send(Type::Ping, &msg::Ping {
			total_difficulty,
			height,
		});
	}

	pub fn send_pong(&self, total_difficulty: braid_core::pow::Difficulty, height: u64) {
		let _ = self.send(Type::Pong, &msg::Pong {
			total_difficulty,
			height,
		});
	}

	pub fn send_ban_reason(&self, reason: ReasonForBan) {
		let _ = self.send(Type::BanReason, &msg::BanReasonMsg { reason });
	}

	pub(crate) fn tracker(&self) -> Arc<Tracker> {
		self.tracker.clone()
	}
}

impl std::fmt::Debug for Peer {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(
			f,
			"Peer {{ addr: {}, direction: {:?} }}",
			self.info.addr, self.info.direction
		)
	}
}

pub use conn::Connection;
