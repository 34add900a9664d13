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

//! Networking, handshake, wire codec, message dispatch, validation
//! pipelines, chain syncer, Dandelion relay and peer-address book: the
//! subsystem that drives a full node's participation in the gossip network.

#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate enum_primitive;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod codec;
pub mod conn;
pub mod dandelion;
pub mod handshake;
pub mod msg;
pub mod msg_processor;
pub mod peer;
pub mod peers;
pub mod pipe;
pub mod seed;
pub mod serv;
pub mod socket;
pub mod store;
pub mod sync;
pub mod sync_status;
pub mod types;

pub use crate::peer::Peer;
pub use crate::peers::Peers;
pub use crate::serv::{DummyAdapter, Server};
pub use crate::store::{PeerData, PeerStore, State};
pub use crate::sync_status::{SyncState, SyncStatus};
pub use crate::types::{
	Capabilities, ChainAdapter, Direction, Error, NetAdapter, P2PConfig, PeerAddr, PeerInfo,
	ReasonForBan,
};
