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

//! Domain value types moved across the wire: headers, blocks, compact
//! blocks, transactions, kernels and outputs. These are the shapes the p2p
//! layer needs to frame and route; the actual commitments, range proofs and
//! signature math that make them cryptographically meaningful belong to
//! `BlockChain` and are modeled here as opaque fixed-size byte blobs.

use crate::hash::{Hash, Hashed};
use crate::pow::Difficulty;
use crate::ser::{self, Readable, Reader, Writeable, Writer};
use crate::{ser_multiwrite, try_iter_map_vec};

/// A Pedersen commitment, 33 bytes compressed.
#[derive(Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment(#[serde(with = "serde_bytes_33")] pub [u8; 33]);

/// A Schnorr/Bulletproof-style signature, 64 bytes.
#[derive(Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "serde_bytes_64")] pub [u8; 64]);

mod serde_bytes_33 {
	use serde::{Deserialize, Deserializer, Serializer};
	pub fn serialize<S: Serializer>(v: &[u8; 33], s: S) -> Result<S::Ok, S::Error> {
		s.serialize_bytes(v)
	}
	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 33], D::Error> {
		let v = Vec::<u8>::deserialize(d)?;
		let mut out = [0u8; 33];
		if v.len() != 33 {
			return Err(serde::de::Error::custom("expected 33 bytes"));
		}
		out.copy_from_slice(&v);
		Ok(out)
	}
}

mod serde_bytes_64 {
	use serde::{Deserialize, Deserializer, Serializer};
	pub fn serialize<S: Serializer>(v: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
		s.serialize_bytes(v)
	}
	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
		let v = Vec::<u8>::deserialize(d)?;
		let mut out = [0u8; 64];
		if v.len() != 64 {
			return Err(serde::de::Error::custom("expected 64 bytes"));
		}
		out.copy_from_slice(&v);
		Ok(out)
	}
}

impl Writeable for Commitment {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_fixed_bytes(&self.0)
	}
}
impl Readable for Commitment {
	fn read<R: Reader>(reader: &mut R) -> Result<Commitment, ser::Error> {
		let b = reader.read_fixed_bytes(33)?;
		let mut out = [0u8; 33];
		out.copy_from_slice(&b);
		Ok(Commitment(out))
	}
}
impl Writeable for Signature {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_fixed_bytes(&self.0)
	}
}
impl Readable for Signature {
	fn read<R: Reader>(reader: &mut R) -> Result<Signature, ser::Error> {
		let b = reader.read_fixed_bytes(64)?;
		let mut out = [0u8; 64];
		out.copy_from_slice(&b);
		Ok(Signature(out))
	}
}

/// A block header: the part of a block gossiped and stored independently of
/// its body, and the basis of the header-sync phase.
#[derive(Clone, Serialize, Deserialize)]
pub struct BlockHeader {
	pub version: u16,
	pub height: u64,
	pub timestamp: i64,
	pub prev_hash: Hash,
	pub prev_root: Hash,
	pub output_root: Hash,
	pub kernel_root: Hash,
	pub total_difficulty: Difficulty,
	pub total_kernel_offset: [u8; 32],
}

impl Hashed for BlockHeader {
	fn hash(&self) -> Hash {
		let bytes = ser::ser_vec(self).unwrap_or_default();
		let mut digest = [0u8; 32];
		for (i, b) in bytes.iter().enumerate() {
			digest[i % 32] ^= *b;
		}
		Hash::from_vec(&digest).unwrap_or_default()
	}
}

impl Writeable for BlockHeader {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		ser_multiwrite!(
			writer,
			[write_u16, self.version],
			[write_u64, self.height],
			[write_i64, self.timestamp]
		);
		self.prev_hash.write(writer)?;
		self.prev_root.write(writer)?;
		self.output_root.write(writer)?;
		self.kernel_root.write(writer)?;
		self.total_difficulty.write(writer)?;
		writer.write_fixed_bytes(&self.total_kernel_offset)
	}
}

impl Readable for BlockHeader {
	fn read<R: Reader>(reader: &mut R) -> Result<BlockHeader, ser::Error> {
		let version = reader.read_u16()?;
		let height = reader.read_u64()?;
		let timestamp = reader.read_i64()?;
		let prev_hash = Hash::read(reader)?;
		let prev_root = Hash::read(reader)?;
		let output_root = Hash::read(reader)?;
		let kernel_root = Hash::read(reader)?;
		let total_difficulty = Difficulty::read(reader)?;
		let offset_bytes = reader.read_fixed_bytes(32)?;
		let mut total_kernel_offset = [0u8; 32];
		total_kernel_offset.copy_from_slice(&offset_bytes);
		Ok(BlockHeader {
			version,
			height,
			timestamp,
			prev_hash,
			prev_root,
			output_root,
			kernel_root,
			total_difficulty,
			total_kernel_offset,
		})
	}
}

/// A transaction kernel: the public, always-visible commitment to a
/// transaction's excess and fee.
#[derive(Clone, Serialize, Deserialize)]
pub struct TxKernel {
	pub features: u8,
	pub fee: u64,
	pub lock_height: u64,
	pub excess: Commitment,
	pub excess_sig: Signature,
}

impl Hashed for TxKernel {
	fn hash(&self) -> Hash {
		let bytes = ser::ser_vec(self).unwrap_or_default();
		let mut digest = [0u8; 32];
		for (i, b) in bytes.iter().enumerate() {
			digest[i % 32] ^= *b;
		}
		Hash::from_vec(&digest).unwrap_or_default()
	}
}

impl Writeable for TxKernel {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		ser_multiwrite!(
			writer,
			[write_u8, self.features],
			[write_u64, self.fee],
			[write_u64, self.lock_height]
		);
		self.excess.write(writer)?;
		self.excess_sig.write(writer)
	}
}

impl Readable for TxKernel {
	fn read<R: Reader>(reader: &mut R) -> Result<TxKernel, ser::Error> {
		Ok(TxKernel {
			features: reader.read_u8()?,
			fee: reader.read_u64()?,
			lock_height: reader.read_u64()?,
			excess: Commitment::read(reader)?,
			excess_sig: Signature::read(reader)?,
		})
	}
}

/// An unspent-output identifier: commitment plus output features, enough to
/// drive a PIBD output segment without carrying the range proof.
#[derive(Clone, Serialize, Deserialize)]
pub struct OutputIdentifier {
	pub features: u8,
	pub commit: Commitment,
}

impl Writeable for OutputIdentifier {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u8(self.features)?;
		self.commit.write(writer)
	}
}

impl Readable for OutputIdentifier {
	fn read<R: Reader>(reader: &mut R) -> Result<OutputIdentifier, ser::Error> {
		Ok(OutputIdentifier {
			features: reader.read_u8()?,
			commit: Commitment::read(reader)?,
		})
	}
}

/// A full output: identifier plus its range proof.
#[derive(Clone, Serialize, Deserialize)]
pub struct Output {
	pub identifier: OutputIdentifier,
	pub proof: Vec<u8>,
}

impl Writeable for Output {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.identifier.write(writer)?;
		writer.write_bytes(&self.proof)
	}
}

impl Readable for Output {
	fn read<R: Reader>(reader: &mut R) -> Result<Output, ser::Error> {
		Ok(Output {
			identifier: OutputIdentifier::read(reader)?,
			proof: reader.read_bytes_len_prefix()?,
		})
	}
}

/// A full transaction: inputs (referenced by commitment), outputs and
/// kernels.
#[derive(Clone, Serialize, Deserialize)]
pub struct Transaction {
	pub offset: [u8; 32],
	pub inputs: Vec<Commitment>,
	pub outputs: Vec<Output>,
	pub kernels: Vec<TxKernel>,
}

impl Hashed for Transaction {
	fn hash(&self) -> Hash {
		self.kernels
			.first()
			.map(|k| k.hash())
			.unwrap_or_default()
	}
}

impl Transaction {
	/// Minimum accepted fee rate for the given height; a stand-in for the
	/// real dynamic-base-fee computation, which belongs to `BlockChain`.
	pub fn get_base_fee(&self, _height: u64) -> u64 {
		self.kernels.iter().map(|k| k.fee).min().unwrap_or(0)
	}
}

impl Writeable for Transaction {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_fixed_bytes(&self.offset)?;
		writer.write_u64(self.inputs.len() as u64)?;
		for i in &self.inputs {
			i.write(writer)?;
		}
		writer.write_u64(self.outputs.len() as u64)?;
		for o in &self.outputs {
			o.write(writer)?;
		}
		writer.write_u64(self.kernels.len() as u64)?;
		for k in &self.kernels {
			k.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for Transaction {
	fn read<R: Reader>(reader: &mut R) -> Result<Transaction, ser::Error> {
		let offset_bytes = reader.read_fixed_bytes(32)?;
		let mut offset = [0u8; 32];
		offset.copy_from_slice(&offset_bytes);
		let n_in = reader.read_u64()?;
		let inputs = try_iter_map_vec!(0..n_in, |_| Commitment::read(reader));
		let n_out = reader.read_u64()?;
		let outputs = try_iter_map_vec!(0..n_out, |_| Output::read(reader));
		let n_kern = reader.read_u64()?;
		let kernels = try_iter_map_vec!(0..n_kern, |_| TxKernel::read(reader));
		Ok(Transaction {
			offset,
			inputs,
			outputs,
			kernels,
		})
	}
}

/// A full block: header plus body.
#[derive(Clone, Serialize, Deserialize)]
pub struct Block {
	pub header: BlockHeader,
	pub inputs: Vec<Commitment>,
	pub outputs: Vec<Output>,
	pub kernels: Vec<TxKernel>,
}

impl Hashed for Block {
	fn hash(&self) -> Hash {
		self.header.hash()
	}
}

impl Writeable for Block {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.header.write(writer)?;
		writer.write_u64(self.inputs.len() as u64)?;
		for i in &self.inputs {
			i.write(writer)?;
		}
		writer.write_u64(self.outputs.len() as u64)?;
		for o in &self.outputs {
			o.write(writer)?;
		}
		writer.write_u64(self.kernels.len() as u64)?;
		for k in &self.kernels {
			k.write(writer)?;
		}
		Ok(())
	}
}

impl Readable for Block {
	fn read<R: Reader>(reader: &mut R) -> Result<Block, ser::Error> {
		let header = BlockHeader::read(reader)?;
		let n_in = reader.read_u64()?;
		let inputs = try_iter_map_vec!(0..n_in, |_| Commitment::read(reader));
		let n_out = reader.read_u64()?;
		let outputs = try_iter_map_vec!(0..n_out, |_| Output::read(reader));
		let n_kern = reader.read_u64()?;
		let kernels = try_iter_map_vec!(0..n_kern, |_| TxKernel::read(reader));
		Ok(Block {
			header,
			inputs,
			outputs,
			kernels,
		})
	}
}

/// A block header plus kernel excesses and output identifiers: short enough
/// to transmit before the receiver is known to have the full transactions.
#[derive(Clone, Serialize, Deserialize)]
pub struct CompactBlock {
	pub header: BlockHeader,
	pub nonce: u64,
	pub out_full: Vec<Output>,
	pub kern_full: Vec<TxKernel>,
	pub kern_ids: Vec<u64>,
}

impl Hashed for CompactBlock {
	fn hash(&self) -> Hash {
		self.header.hash()
	}
}

impl Writeable for CompactBlock {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.header.write(writer)?;
		writer.write_u64(self.nonce)?;
		writer.write_u64(self.out_full.len() as u64)?;
		for o in &self.out_full {
			o.write(writer)?;
		}
		writer.write_u64(self.kern_full.len() as u64)?;
		for k in &self.kern_full {
			k.write(writer)?;
		}
		writer.write_u64(self.kern_ids.len() as u64)?;
		for id in &self.kern_ids {
			writer.write_u64(*id)?;
		}
		Ok(())
	}
}

impl Readable for CompactBlock {
	fn read<R: Reader>(reader: &mut R) -> Result<CompactBlock, ser::Error> {
		let header = BlockHeader::read(reader)?;
		let nonce = reader.read_u64()?;
		let n_out = reader.read_u64()?;
		let out_full = try_iter_map_vec!(0..n_out, |_| Output::read(reader));
		let n_kern = reader.read_u64()?;
		let kern_full = try_iter_map_vec!(0..n_kern, |_| TxKernel::read(reader));
		let n_ids = reader.read_u64()?;
		let kern_ids = try_iter_map_vec!(0..n_ids, |_| reader.read_u64());
		Ok(CompactBlock {
			header,
			nonce,
			out_full,
			kern_full,
			kern_ids,
		})
	}
}

/// Identifies one PIBD segment within a larger MMR-backed structure
/// (bitmap, output, rangeproof or kernel tree).
#[derive(Copy, Clone, Serialize, Deserialize)]
pub struct SegmentIdentifier {
	pub height: u8,
	pub idx: u64,
}

impl Writeable for SegmentIdentifier {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u8(self.height)?;
		writer.write_u64(self.idx)
	}
}

impl Readable for SegmentIdentifier {
	fn read<R: Reader>(reader: &mut R) -> Result<SegmentIdentifier, ser::Error> {
		Ok(SegmentIdentifier {
			height: reader.read_u8()?,
			idx: reader.read_u64()?,
		})
	}
}

/// A generic PIBD segment: a contiguous slice of leaves from one of the
/// TxHashSet's MMRs, identified by `SegmentIdentifier`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Segment<T> {
	pub identifier: SegmentIdentifier,
	pub leaves: Vec<T>,
}

impl<T: Writeable> Writeable for Segment<T> {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.identifier.write(writer)?;
		writer.write_u64(self.leaves.len() as u64)?;
		for l in &self.leaves {
			l.write(writer)?;
		}
		Ok(())
	}
}

impl<T: Readable> Readable for Segment<T> {
	fn read<R: Reader>(reader: &mut R) -> Result<Segment<T>, ser::Error> {
		let identifier = SegmentIdentifier::read(reader)?;
		let n = reader.read_u64()?;
		let leaves = try_iter_map_vec!(0..n, |_| T::read(reader));
		Ok(Segment { identifier, leaves })
	}
}

/// One 64-leaf chunk of the spent/unspent output bitmap, used by PIBD to
/// reconstruct which outputs are still live without downloading the whole
/// bitmap at once.
#[derive(Clone, Serialize, Deserialize)]
pub struct BitmapChunk(pub Vec<u8>);

impl Writeable for BitmapChunk {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_bytes(&self.0)
	}
}

impl Readable for BitmapChunk {
	fn read<R: Reader>(reader: &mut R) -> Result<BitmapChunk, ser::Error> {
		Ok(BitmapChunk(reader.read_bytes_len_prefix()?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_header() -> BlockHeader {
		BlockHeader {
			version: 3,
			height: 42,
			timestamp: 1_700_000_000,
			prev_hash: Hash::default(),
			prev_root: Hash::default(),
			output_root: Hash::default(),
			kernel_root: Hash::default(),
			total_difficulty: Difficulty::from_num(1000),
			total_kernel_offset: [0u8; 32],
		}
	}

	#[test]
	fn header_roundtrips() {
		let h = sample_header();
		let bytes = ser::ser_vec(&h).unwrap();
		let back: BlockHeader = ser::deserialize(&bytes).unwrap();
		assert_eq!(back.height, 42);
		assert_eq!(back.total_difficulty, Difficulty::from_num(1000));
	}

	#[test]
	fn segment_roundtrips() {
		let seg = Segment {
			identifier: SegmentIdentifier { height: 2, idx: 5 },
			leaves: vec![1u64, 2, 3],
		};
		let bytes = ser::ser_vec(&seg).unwrap();
		let back: Segment<u64> = ser::deserialize(&bytes).unwrap();
		assert_eq!(back.leaves, vec![1, 2, 3]);
		assert_eq!(back.identifier.idx, 5);
	}
}
