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

//! Message bodies exchanged between peers once a connection is established.
//! Framing (magic/type/length) lives in `codec`; this module only knows how
//! to read and write the payloads.

use std::net::SocketAddr;

use braid_core::core::{BlockHeader, Segment, SegmentIdentifier, TxKernel};
use braid_core::hash::Hash;
use braid_core::pow::Difficulty;
use braid_core::ser::{self, ProtocolVersion, Readable, Reader, Writeable, Writer};
use braid_core::{ser_multiwrite, try_iter_map_vec};

use crate::types::{Capabilities, PeerAddr, ReasonForBan};

enum_from_primitive! {
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub enum Type {
		Error = 0,
		Hand = 1,
		Shake = 2,
		Ping = 3,
		Pong = 4,
		GetPeerAddrs = 5,
		PeerAddrs = 6,
		GetHeaders = 7,
		Header = 8,
		Headers = 9,
		GetBlock = 10,
		Block = 11,
		GetCompactBlock = 12,
		CompactBlock = 13,
		StemTransaction = 14,
		Transaction = 15,
		TxHashSetRequest = 16,
		TxHashSetArchive = 17,
		BanReason = 18,
		GetTransaction = 19,
		TransactionKernel = 20,
		GetHeaderHashesSegment = 21,
		HeaderHashesSegment = 22,
		GetBitmapSegment = 23,
		BitmapSegment = 24,
		GetOutputSegment = 25,
		OutputSegment = 26,
		GetRangeproofSegment = 27,
		RangeproofSegment = 28,
		GetKernelSegment = 29,
		KernelSegment = 30,
		PibdStatus = 31,
	}
}

/// Header every message frame carries ahead of the payload.
#[derive(Clone, Copy, Debug)]
pub struct MsgHeader {
	pub msg_type: Type,
	pub msg_len: u64,
}

/// A peer's handshake opener: advertises version, capabilities, our view of
/// the network and a nonce used to detect a self-connection.
#[derive(Clone)]
pub struct Hand {
	pub version: ProtocolVersion,
	pub capabilities: Capabilities,
	pub nonce: u64,
	pub genesis: Hash,
	pub total_difficulty: Difficulty,
	pub sender_addr: PeerAddr,
	pub receiver_addr: PeerAddr,
	pub user_agent: String,
}

impl Writeable for Hand {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		ser_multiwrite!(
			writer,
			[write_u32, self.version.0],
			[write_u32, self.capabilities.bits()],
			[write_u64, self.nonce],
			[write_u64, self.total_difficulty.to_num()]
		);
		self.genesis.write(writer)?;
		self.sender_addr.write(writer)?;
		self.receiver_addr.write(writer)?;
		writer.write_bytes(&self.user_agent)
	}
}

impl Readable for Hand {
	fn read<R: Reader>(reader: &mut R) -> Result<Hand, ser::Error> {
		let version = ProtocolVersion(reader.read_u32()?);
		let capabilities =
			Capabilities::from_bits(reader.read_u32()?).ok_or(ser::Error::CorruptedData)?;
		let nonce = reader.read_u64()?;
		let total_difficulty = Difficulty::from_num(reader.read_u64()?);
		let genesis = Hash::read(reader)?;
		let sender_addr = PeerAddr::read(reader)?;
		let receiver_addr = PeerAddr::read(reader)?;
		let user_agent_bytes = reader.read_bytes_len_prefix()?;
		let user_agent = String::from_utf8(user_agent_bytes).unwrap_or_default();
		Ok(Hand {
			version,
			capabilities,
			nonce,
			genesis,
			total_difficulty,
			sender_addr,
			receiver_addr,
			user_agent,
		})
	}
}

/// Reply to `Hand`, echoing the same shape minus the dance of sender and
/// receiver addresses, since those are only meaningful for the initiator.
#[derive(Clone)]
pub struct Shake {
	pub version: ProtocolVersion,
	pub capabilities: Capabilities,
	pub genesis: Hash,
	pub total_difficulty: Difficulty,
	pub user_agent: String,
}

impl Writeable for Shake {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		ser_multiwrite!(
			writer,
			[write_u32, self.version.0],
			[write_u32, self.capabilities.bits()],
			[write_u64, self.total_difficulty.to_num()]
		);
		self.genesis.write(writer)?;
		writer.write_bytes(&self.user_agent)
	}
}

impl Readable for Shake {
	fn read<R: Reader>(reader: &mut R) -> Result<Shake, ser::Error> {
		let version = ProtocolVersion(reader.read_u32()?);
		let capabilities =
			Capabilities::from_bits(reader.read_u32()?).ok_or(ser::Error::CorruptedData)?;
		let total_difficulty = Difficulty::from_num(reader.read_u64()?);
		let genesis = Hash::read(reader)?;
		let user_agent_bytes = reader.read_bytes_len_prefix()?;
		let user_agent = String::from_utf8(user_agent_bytes).unwrap_or_default();
		Ok(Shake {
			version,
			capabilities,
			genesis,
			total_difficulty,
			user_agent,
		})
	}
}

/// Liveness probe; carries the sender's current height and total difficulty
/// so the receiver can update its view of that peer without a separate
/// message.
#[derive(Clone, Copy)]
pub struct Ping {
	pub total_difficulty: Difficulty,
	pub height: u64,
}

impl Writeable for Ping {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.total_difficulty.to_num())?;
		writer.write_u64(self.height)
	}
}

impl Readable for Ping {
	fn read<R: Reader>(reader: &mut R) -> Result<Ping, ser::Error> {
		Ok(Ping {
			total_difficulty: Difficulty::from_num(reader.read_u64()?),
			height: reader.read_u64()?,
		})
	}
}

#[derive(Clone, Copy)]
pub struct Pong {
	pub total_difficulty: Difficulty,
	pub height: u64,
}

impl Writeable for Pong {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.total_difficulty.to_num())?;
		writer.write_u64(self.height)
	}
}

impl Readable for Pong {
	fn read<R: Reader>(reader: &mut R) -> Result<Pong, ser::Error> {
		Ok(Pong {
			total_difficulty: Difficulty::from_num(reader.read_u64()?),
			height: reader.read_u64()?,
		})
	}
}

/// A list of peer addresses, used both as a request payload (empty, just the
/// `GetPeerAddrs` frame carries a capability filter) and as a response.
#[derive(Clone, Debug, Default)]
pub struct PeerAddrs {
	pub peers: Vec<PeerAddr>,
}

impl Writeable for PeerAddrs {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u16(self.peers.len() as u16)?;
		for p in &self.peers {
			p.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for PeerAddrs {
	fn read<R: Reader>(reader: &mut R) -> Result<PeerAddrs, ser::Error> {
		let n = reader.read_u16()?;
		let peers = try_iter_map_vec!(0..n, |_| PeerAddr::read(reader));
		Ok(PeerAddrs { peers })
	}
}

#[derive(Clone, Copy)]
pub struct GetPeerAddrs {
	pub capabilities: Capabilities,
}

impl Writeable for GetPeerAddrs {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.capabilities.bits())
	}
}

impl Readable for GetPeerAddrs {
	fn read<R: Reader>(reader: &mut R) -> Result<GetPeerAddrs, ser::Error> {
		Ok(GetPeerAddrs {
			capabilities: Capabilities::from_bits(reader.read_u32()?)
				.ok_or(ser::Error::CorruptedData)?,
		})
	}
}

/// Locator-driven header request: a sparse list of hashes the sender
/// believes are on its chain, most-recent first, used to find the common
/// ancestor with the receiver.
#[derive(Clone)]
pub struct GetHeaders {
	pub locator: Vec<Hash>,
}

impl Writeable for GetHeaders {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u8(self.locator.len() as u8)?;
		for h in &self.locator {
			h.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for GetHeaders {
	fn read<R: Reader>(reader: &mut R) -> Result<GetHeaders, ser::Error> {
		let n = reader.read_u8()?;
		let locator = try_iter_map_vec!(0..n, |_| Hash::read(reader));
		Ok(GetHeaders { locator })
	}
}

#[derive(Clone)]
pub struct Headers {
	pub headers: Vec<BlockHeader>,
}

impl Writeable for Headers {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u16(self.headers.len() as u16)?;
		for h in &self.headers {
			h.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for Headers {
	fn read<R: Reader>(reader: &mut R) -> Result<Headers, ser::Error> {
		let n = reader.read_u16()?;
		let headers = try_iter_map_vec!(0..n, |_| BlockHeader::read(reader));
		Ok(Headers { headers })
	}
}

pub struct GetBlock {
	pub hash: Hash,
}

impl Writeable for GetBlock {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.hash.write(writer)
	}
}

impl Readable for GetBlock {
	fn read<R: Reader>(reader: &mut R) -> Result<GetBlock, ser::Error> {
		Ok(GetBlock {
			hash: Hash::read(reader)?,
		})
	}
}

pub struct GetCompactBlock {
	pub hash: Hash,
}

impl Writeable for GetCompactBlock {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.hash.write(writer)
	}
}

impl Readable for GetCompactBlock {
	fn read<R: Reader>(reader: &mut R) -> Result<GetCompactBlock, ser::Error> {
		Ok(GetCompactBlock {
			hash: Hash::read(reader)?,
		})
	}
}

pub struct GetTransaction {
	pub kernel_hash: Hash,
}

impl Writeable for GetTransaction {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.kernel_hash.write(writer)
	}
}

impl Readable for GetTransaction {
	fn read<R: Reader>(reader: &mut R) -> Result<GetTransaction, ser::Error> {
		Ok(GetTransaction {
			kernel_hash: Hash::read(reader)?,
		})
	}
}

pub struct TransactionKernelMsg {
	pub kernel_hash: Hash,
}

impl Writeable for TransactionKernelMsg {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.kernel_hash.write(writer)
	}
}

impl Readable for TransactionKernelMsg {
	fn read<R: Reader>(reader: &mut R) -> Result<TransactionKernelMsg, ser::Error> {
		Ok(TransactionKernelMsg {
			kernel_hash: Hash::read(reader)?,
		})
	}
}

pub struct TxHashSetRequest {
	pub hash: Hash,
	pub height: u64,
}

impl Writeable for TxHashSetRequest {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.hash.write(writer)?;
		writer.write_u64(self.height)
	}
}

impl Readable for TxHashSetRequest {
	fn read<R: Reader>(reader: &mut R) -> Result<TxHashSetRequest, ser::Error> {
		Ok(TxHashSetRequest {
			hash: Hash::read(reader)?,
			height: reader.read_u64()?,
		})
	}
}

pub struct TxHashSetArchive {
	pub hash: Hash,
	pub height: u64,
	pub bytes: u64,
}

impl Writeable for TxHashSetArchive {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.hash.write(writer)?;
		writer.write_u64(self.height)?;
		writer.write_u64(self.bytes)
	}
}

impl Readable for TxHashSetArchive {
	fn read<R: Reader>(reader: &mut R) -> Result<TxHashSetArchive, ser::Error> {
		Ok(TxHashSetArchive {
			hash: Hash::read(reader)?,
			height: reader.read_u64()?,
			bytes: reader.read_u64()?,
		})
	}
}

pub struct BanReasonMsg {
	pub reason: ReasonForBan,
}

impl Writeable for BanReasonMsg {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.reason as u32)
	}
}

impl Readable for BanReasonMsg {
	fn read<R: Reader>(reader: &mut R) -> Result<BanReasonMsg, ser::Error> {
		use enum_primitive::FromPrimitive;
		let reason =
			ReasonForBan::from_u32(reader.read_u32()?).ok_or(ser::Error::CorruptedData)?;
		Ok(BanReasonMsg { reason })
	}
}

/// Request for a PIBD segment: which tree, at which archive header, at which
/// coordinates.
#[derive(Clone, Copy)]
pub struct GetSegmentRequest {
	pub archive_hash: Hash,
	pub id: SegmentIdentifier,
}

impl Writeable for GetSegmentRequest {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.archive_hash.write(writer)?;
		self.id.write(writer)
	}
}

impl Readable for GetSegmentRequest {
	fn read<R: Reader>(reader: &mut R) -> Result<GetSegmentRequest, ser::Error> {
		Ok(GetSegmentRequest {
			archive_hash: Hash::read(reader)?,
			id: SegmentIdentifier::read(reader)?,
		})
	}
}

pub use braid_core::core::{BitmapChunk, OutputIdentifier};

/// Named type aliases for the PIBD segment response payloads; each is a
/// bare `Segment<T>` plus the archive hash it's anchored to.
pub struct SegmentResponse<T> {
	pub archive_hash: Hash,
	pub segment: Segment<T>,
}

impl<T: Writeable> Writeable for SegmentResponse<T> {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.archive_hash.write(writer)?;
		self.segment.write(writer)
	}
}

impl<T: Readable> Readable for SegmentResponse<T> {
	fn read<R: Reader>(reader: &mut R) -> Result<SegmentResponse<T>, ser::Error> {
		Ok(SegmentResponse {
			archive_hash: Hash::read(reader)?,
			segment: Segment::read(reader)?,
		})
	}
}

pub type HeaderHashesSegmentResponse = SegmentResponse<Hash>;
pub type BitmapSegmentResponse = SegmentResponse<BitmapChunk>;
pub type OutputSegmentResponse = SegmentResponse<OutputIdentifier>;
pub type RangeproofSegmentResponse = SegmentResponse<u64>;
pub type KernelSegmentResponse = SegmentResponse<TxKernel>;

#[derive(Clone, Copy)]
pub struct PibdStatusMsg {
	pub can_serve: bool,
}

impl Writeable for PibdStatusMsg {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u8(self.can_serve as u8)
	}
}

impl Readable for PibdStatusMsg {
	fn read<R: Reader>(reader: &mut R) -> Result<PibdStatusMsg, ser::Error> {
		Ok(PibdStatusMsg {
			can_serve: reader.read_u8()? != 0,
		})
	}
}

pub use braid_core::core::Block as BlockMsg;
pub use braid_core::core::CompactBlock as CompactBlockMsg;
pub use braid_core::core::Transaction as TransactionMsg;

/// Converts a plain `SocketAddr` to the `PeerAddr::Ip` variant, a convenience
/// used when constructing `Hand`/`Shake` from a live TCP connection.
pub fn to_peer_addr(addr: SocketAddr) -> PeerAddr {
	PeerAddr::Ip(addr)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hand_roundtrips() {
		let hand = Hand {
			version: ProtocolVersion(3),
			capabilities: Capabilities::FULL_NODE,
			nonce: 42,
			genesis: Hash::default(),
			total_difficulty: Difficulty::from_num(100),
			sender_addr: PeerAddr::from_str("127.0.0.1:3414"),
			receiver_addr: PeerAddr::from_str("127.0.0.1:3415"),
			user_agent: "braid/0.1".to_string(),
		};
		let bytes = ser::ser_vec(&hand).unwrap();
		let back: Hand = ser::deserialize(&bytes).unwrap();
		assert_eq!(back.nonce, 42);
		assert_eq!(back.user_agent, "braid/0.1");
	}

	#[test]
	fn peer_addrs_roundtrips() {
		let addrs = PeerAddrs {
			peers: vec![
				PeerAddr::from_str("127.0.0.1:3414"),
				PeerAddr::from_str("192.168.0.1:3414"),
			],
		};
		let bytes = ser::ser_vec(&addrs).unwrap();
		let back: PeerAddrs = ser::deserialize(&bytes).unwrap();
		assert_eq!(back.peers.len(), 2);
	}
}
