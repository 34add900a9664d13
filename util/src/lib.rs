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

//! Low-level utilities shared across every crate in the workspace: lock
//! wrappers, a write-once cell, and the cooperative stop/pause flag that
//! every long-lived task polls.

pub use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock as StdRwLock;

/// A value that can be set exactly once and read many times afterward.
/// Used for process-wide configuration (chain type, genesis hash) that must
/// be fixed at startup but can't be a `const` because it's provided by the
/// embedding node.
pub struct OneTime<T: Clone> {
	inner: StdRwLock<Option<T>>,
}

impl<T: Clone> OneTime<T> {
	/// Builds a new uninitialized `OneTime`.
	pub fn new() -> OneTime<T> {
		OneTime {
			inner: StdRwLock::new(None),
		}
	}

	/// Initializes the `OneTime`, panicking if it has already been set.
	pub fn init(&self, value: T) {
		let mut inner = self.inner.write().unwrap();
		if inner.is_some() {
			panic!("OneTime already initialized");
		}
		*inner = Some(value);
	}

	/// Whether the value has been initialized yet.
	pub fn is_init(&self) -> bool {
		self.inner.read().unwrap().is_some()
	}

	/// Reads the value, panicking if it hasn't been initialized.
	pub fn borrow(&self) -> T {
		self.inner
			.read()
			.unwrap()
			.clone()
			.expect("OneTime read before init")
	}
}

impl<T: Clone> Default for OneTime<T> {
	fn default() -> Self {
		Self::new()
	}
}

/// Shared, cooperative shutdown/pause signal. Every blocking loop in the
/// crate (connection, syncer, dandelion, seeder, listener) checks this at
/// each suspension point rather than being forcibly killed.
#[derive(Default)]
pub struct StopState {
	stop: AtomicBool,
	paused: AtomicBool,
}

impl StopState {
	pub fn new() -> StopState {
		StopState {
			stop: AtomicBool::new(false),
			paused: AtomicBool::new(false),
		}
	}

	/// Whether a shutdown has been requested.
	pub fn is_stopped(&self) -> bool {
		self.stop.load(Ordering::SeqCst)
	}

	/// Request a cooperative shutdown. Idempotent.
	pub fn stop(&self) {
		self.stop.store(true, Ordering::SeqCst);
	}

	/// Whether ingress/egress connection activity is currently paused.
	/// Used by tests that want deterministic control over peer churn.
	pub fn is_paused(&self) -> bool {
		self.paused.load(Ordering::SeqCst)
	}

	pub fn pause(&self) {
		self.paused.store(true, Ordering::SeqCst);
	}

	pub fn resume(&self) {
		self.paused.store(false, Ordering::SeqCst);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn one_time_init_then_read() {
		let ot: OneTime<u32> = OneTime::new();
		assert!(!ot.is_init());
		ot.init(7);
		assert!(ot.is_init());
		assert_eq!(ot.borrow(), 7);
	}

	#[test]
	#[should_panic]
	fn one_time_double_init_panics() {
		let ot: OneTime<u32> = OneTime::new();
		ot.init(1);
		ot.init(2);
	}

	#[test]
	fn stop_state_defaults_running() {
		let s = StopState::new();
		assert!(!s.is_stopped());
		assert!(!s.is_paused());
		s.pause();
		assert!(s.is_paused());
		s.stop();
		assert!(s.is_stopped());
	}
}
