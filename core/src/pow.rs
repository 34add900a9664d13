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

//! `Difficulty` is the only piece of the proof-of-work subsystem the p2p
//! core needs: peers advertise it in `Hand`/`Shake`/`Ping`/`Pong` so we can
//! pick the most-work peer. Actual proof-of-work verification belongs to
//! `BlockChain` and is out of scope here.

use crate::ser::{self, Readable, Reader, Writeable, Writer};
use std::fmt;
use std::ops::Add;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Difficulty(u64);

impl Difficulty {
	pub fn zero() -> Difficulty {
		Difficulty(0)
	}

	pub fn min() -> Difficulty {
		Difficulty(1)
	}

	pub fn from_num(n: u64) -> Difficulty {
		Difficulty(n)
	}

	pub fn to_num(&self) -> u64 {
		self.0
	}
}

impl Add for Difficulty {
	type Output = Difficulty;
	fn add(self, other: Difficulty) -> Difficulty {
		Difficulty(self.0.saturating_add(other.0))
	}
}

impl fmt::Display for Difficulty {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl Writeable for Difficulty {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.0)
	}
}

impl Readable for Difficulty {
	fn read<R: Reader>(reader: &mut R) -> Result<Difficulty, ser::Error> {
		Ok(Difficulty(reader.read_u64()?))
	}
}
