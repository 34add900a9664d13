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

//! Narrow boundary crate standing in for the chain engine: header/block/
//! transaction/kernel storage and consensus validation. Only the error
//! taxonomy and processing-options bitset that the p2p layer needs to see
//! are defined here; actual validation logic is out of scope.

use failure::Fail;

bitflags::bitflags! {
	/// Options threaded through to `ChainAdapter::block_received` describing
	/// how a block arrived (e.g. as part of a sync batch vs. unsolicited
	/// gossip) so the chain engine can apply different leniency.
	pub struct Options: u32 {
		const NONE = 0b0000_0000;
		/// Block arrived as part of a syncer-driven batch request.
		const SYNC = 0b0000_0001;
		/// Block arrived unsolicited, broadcast from a peer.
		const BROADCAST = 0b0000_0010;
	}
}

/// Outcome of a mutating `BlockChain` call, matching the boundary contract:
/// `{Success, AlreadyExists, Orphaned, Invalid, TransactionsMissing, Other}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
	Success,
	AlreadyExists,
	Orphaned,
	Invalid,
	TransactionsMissing,
	Other(String),
}

#[derive(Debug, Fail)]
pub enum Error {
	#[fail(display = "chain: block or header not found")]
	NotFound,
	#[fail(display = "chain: invalid block or header: {}", _0)]
	Invalid(String),
	#[fail(display = "chain: orphan block, missing parent")]
	Orphan,
	#[fail(display = "chain: transactions missing for compact block")]
	TransactionsMissing,
	#[fail(display = "chain: io error: {}", _0)]
	Io(String),
	#[fail(display = "chain: {}", _0)]
	Other(String),
}
