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

//! 32-byte digests used throughout the wire protocol to identify blocks,
//! headers, kernels and transactions. The actual hash function (blake2b in
//! the real chain) is out of this crate's scope; `Hash` is an opaque,
//! comparable, serializable 32-byte value.

use crate::ser::{self, Readable, Reader, Writeable, Writer};
use std::fmt;

pub const HASH_SIZE: usize = 32;

/// An opaque 32-byte digest.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
	pub const ZERO: Hash = Hash([0u8; HASH_SIZE]);

	pub fn from_vec(v: &[u8]) -> Result<Hash, ser::Error> {
		if v.len() != HASH_SIZE {
			return Err(ser::Error::CorruptedData);
		}
		let mut out = [0u8; HASH_SIZE];
		out.copy_from_slice(v);
		Ok(Hash(out))
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}
}

impl Default for Hash {
	fn default() -> Hash {
		Hash::ZERO
	}
}

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for b in self.0.iter().take(6) {
			write!(f, "{:02x}", b)?;
		}
		Ok(())
	}
}

impl fmt::Display for Hash {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

impl Writeable for Hash {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_fixed_bytes(&self.0)
	}
}

impl Readable for Hash {
	fn read<R: Reader>(reader: &mut R) -> Result<Hash, ser::Error> {
		let bytes = reader.read_fixed_bytes(HASH_SIZE)?;
		Hash::from_vec(&bytes)
	}
}

/// Anything that can be boiled down to a single `Hash`.
pub trait Hashed {
	fn hash(&self) -> Hash;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn zero_hash_roundtrips() {
		let buf = ser::ser_vec(&Hash::ZERO).unwrap();
		let back: Hash = ser::deserialize(&buf).unwrap();
		assert_eq!(back, Hash::ZERO);
	}
}
