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

//! Frame-level codec: `magic(2) || type(1) || length(8, big-endian) ||
//! payload(length)`. Decoding a frame never partially advances past a
//! truncated or oversized read; callers either get a complete frame or an
//! error and the connection is torn down.

use std::io::{Read, Write};

use enum_primitive::FromPrimitive;

use braid_core::global;
use braid_core::ser::{self, ByteSliceReader, Readable, Writeable};

use crate::msg::Type;
use crate::socket::{Mode, Socket};
use crate::types::Error;

/// Per-type maximum payload size, in bytes. A received frame whose declared
/// length exceeds `4 * MAX_SIZE[type]` is a protocol violation regardless of
/// whether the payload can still be parsed.
pub fn max_size(msg_type: Type) -> u64 {
	match msg_type {
		Type::Error => 0,
		Type::Hand => 128,
		Type::Shake => 88,
		Type::Ping => 16,
		Type::Pong => 16,
		Type::GetPeerAddrs => 4,
		Type::PeerAddrs => 2 + (1 + 16 + 2) * (crate::types::MAX_PEER_ADDRS as u64),
		Type::GetHeaders => 1 + 32 * (crate::types::MAX_LOCATORS as u64),
		Type::Header => 365,
		Type::Headers => 2 + 365 * (crate::types::MAX_BLOCK_HEADERS as u64),
		Type::GetBlock => 32,
		Type::Block => MAX_BLOCK_SIZE,
		Type::GetCompactBlock => 32,
		Type::CompactBlock => MAX_BLOCK_SIZE / 10,
		Type::StemTransaction => MAX_BLOCK_SIZE,
		Type::Transaction => MAX_BLOCK_SIZE,
		Type::TxHashSetRequest => 40,
		Type::TxHashSetArchive => 64,
		Type::BanReason => 64,
		Type::GetTransaction => 32,
		Type::TransactionKernel => 32,
		Type::GetHeaderHashesSegment
		| Type::GetBitmapSegment
		| Type::GetOutputSegment
		| Type::GetRangeproofSegment
		| Type::GetKernelSegment => 64,
		Type::HeaderHashesSegment => SEGMENT_SIZE,
		Type::BitmapSegment => SEGMENT_SIZE,
		Type::OutputSegment => SEGMENT_SIZE,
		Type::RangeproofSegment => SEGMENT_SIZE,
		Type::KernelSegment => SEGMENT_SIZE,
		Type::PibdStatus => 8,
	}
}

/// Conservative per-message body limit; the real limit is driven by
/// consensus block-weight rules owned by `BlockChain`, not by this layer.
const MAX_BLOCK_SIZE: u64 = 4_000_000;

/// A single PIBD segment is bounded to a couple thousand leaves by
/// construction; bound the wire size generously above that.
const SEGMENT_SIZE: u64 = 512_000;

const HEADER_LEN: usize = 2 + 1 + 8;

/// Reads one complete frame from `stream`, validating magic and the 4×
/// size bound before attempting to parse the body. Blocks until the full
/// frame has arrived or the stream errors/closes.
pub fn read_message<R: Read, T: Readable>(stream: &mut R) -> Result<T, Error> {
	let (_, body) = read_frame(stream)?;
	let mut reader = ByteSliceReader::new(&body);
	Ok(T::read(&mut reader)?)
}

/// Reads and validates a frame header plus its payload, returning the
/// message type and raw payload bytes for the caller to dispatch and parse.
pub fn read_frame<R: Read>(stream: &mut R) -> Result<(Type, Vec<u8>), Error> {
	let mut header_buf = [0u8; HEADER_LEN];
	stream.read_exact(&mut header_buf)?;

	let magic = global::magic_bytes();
	if header_buf[0] != magic[0] || header_buf[1] != magic[1] {
		return Err(Error::BadMessage);
	}

	let msg_type = Type::from_u8(header_buf[2]).ok_or(Error::BadMessage)?;
	let length = u64::from_be_bytes([
		header_buf[3],
		header_buf[4],
		header_buf[5],
		header_buf[6],
		header_buf[7],
		header_buf[8],
		header_buf[9],
		header_buf[10],
	]);

	if length > max_size(msg_type) * 4 {
		return Err(Error::Serialization(ser::Error::TooLargeWriteErr(format!(
			"frame of type {:?} declared length {} exceeds 4x the per-type maximum",
			msg_type, length
		))));
	}

	let mut body = vec![0u8; length as usize];
	stream.read_exact(&mut body)?;
	Ok((msg_type, body))
}

/// Polls `socket` for one complete frame without blocking the caller when
/// nothing has arrived yet: a non-blocking peek for the header, then a
/// blocking read for the rest once a frame is known to be in flight. This is
/// the read half of `Connection`'s cooperative loop.
pub fn try_read_frame(socket: &mut Socket) -> Result<Option<(Type, Vec<u8>)>, Error> {
	let header_buf = socket.receive(HEADER_LEN, Mode::NonBlocking)?;
	if header_buf.is_empty() {
		return Ok(None);
	}

	let magic = global::magic_bytes();
	if header_buf[0] != magic[0] || header_buf[1] != magic[1] {
		return Err(Error::BadMessage);
	}
	let msg_type = Type::from_u8(header_buf[2]).ok_or(Error::BadMessage)?;
	let length = u64::from_be_bytes([
		header_buf[3],
		header_buf[4],
		header_buf[5],
		header_buf[6],
		header_buf[7],
		header_buf[8],
		header_buf[9],
		header_buf[10],
	]);
	if length > max_size(msg_type) * 4 {
		return Err(Error::Serialization(ser::Error::TooLargeWriteErr(format!(
			"frame of type {:?} declared length {} exceeds 4x the per-type maximum",
			msg_type, length
		))));
	}

	let body = socket.receive(length as usize, Mode::Blocking)?;
	Ok(Some((msg_type, body)))
}

/// Writes a complete frame (header + body) to `stream` in one call.
pub fn write_message<W: Write, T: Writeable>(
	stream: &mut W,
	msg_type: Type,
	msg: &T,
) -> Result<(), Error> {
	let body = ser::ser_vec(msg)?;
	if body.len() as u64 > max_size(msg_type) {
		return Err(Error::Serialization(ser::Error::TooLargeWriteErr(format!(
			"outgoing {:?} body of {} bytes exceeds its own per-type maximum",
			msg_type,
			body.len()
		))));
	}
	write_frame(stream, msg_type, &body)
}

/// Writes a raw frame (header + pre-serialized body) to `stream`.
pub fn write_frame<W: Write>(stream: &mut W, msg_type: Type, body: &[u8]) -> Result<(), Error> {
	let magic = global::magic_bytes();
	let mut header = Vec::with_capacity(HEADER_LEN);
	header.push(magic[0]);
	header.push(magic[1]);
	header.push(msg_type as u8);
	header.extend_from_slice(&(body.len() as u64).to_be_bytes());
	stream.write_all(&header)?;
	stream.write_all(body)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use braid_core::global::{self, ChainTypes};
	use std::io::Cursor;

	fn with_mainnet<F: FnOnce()>(f: F) {
		global::set_local_chain_type(ChainTypes::Mainnet);
		f();
	}

	#[test]
	fn ping_roundtrips_through_frame() {
		with_mainnet(|| {
			let ping = crate::msg::Ping {
				total_difficulty: braid_core::pow::Difficulty::from_num(7),
				height: 9,
			};
			let mut buf = Vec::new();
			write_message(&mut buf, Type::Ping, &ping).unwrap();

			let mut cursor = Cursor::new(buf);
			let (t, body) = read_frame(&mut cursor).unwrap();
			assert_eq!(t, Type::Ping);
			let mut reader = ByteSliceReader::new(&body);
			let back = crate::msg::Ping::read(&mut reader).unwrap();
			assert_eq!(back.height, 9);
		});
	}

	#[test]
	fn wrong_magic_is_rejected() {
		let mut buf = vec![0xFFu8, 0xFF, Type::Ping as u8];
		buf.extend_from_slice(&16u64.to_be_bytes());
		buf.extend_from_slice(&[0u8; 16]);
		let mut cursor = Cursor::new(buf);
		assert!(read_frame(&mut cursor).is_err());
	}

	#[test]
	fn oversized_length_is_rejected() {
		with_mainnet(|| {
			let magic = global::magic_bytes();
			let mut buf = vec![magic[0], magic[1], Type::Ping as u8];
			buf.extend_from_slice(&(max_size(Type::Ping) * 5).to_be_bytes());
			let mut cursor = Cursor::new(buf);
			assert!(read_frame(&mut cursor).is_err());
		});
	}
}
