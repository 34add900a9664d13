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

//! A thin wrapper around `TcpStream` that adds timeouts, a rolling
//! send/receive rate counter and blocking-mode toggling. Connection-level
//! code talks to peers exclusively through `Socket`, never a raw stream.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::types::Error;

/// How `receive` should behave when no data is currently available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	/// Wait up to the configured receive timeout for the first byte.
	Blocking,
	/// Return immediately (an empty buffer) if nothing is available yet.
	NonBlocking,
}

/// Width of the rolling window used to compute message rates.
const RATE_WINDOW_SECS: u64 = 60;

/// Messages per minute, per direction, above which a peer is abusive.
pub const MAX_MESSAGES_PER_MINUTE: u32 = 500;

/// Tracks message counts over a rolling 60-second window so `Connection` can
/// detect an abusive peer without keeping a full timestamped log. Counts are
/// bucketed by whole seconds and old buckets are discarded lazily.
pub struct RateCounter {
	started: Instant,
	buckets: Vec<(u64, u32)>,
}

impl RateCounter {
	pub fn new() -> RateCounter {
		RateCounter {
			started: Instant::now(),
			buckets: Vec::new(),
		}
	}

	fn now_bucket(&self) -> u64 {
		self.started.elapsed().as_secs()
	}

	/// Records one message and evicts buckets older than the rolling window.
	pub fn record(&mut self) {
		let now = self.now_bucket();
		self.buckets.retain(|(t, _)| now.saturating_sub(*t) < RATE_WINDOW_SECS);
		match self.buckets.last_mut() {
			Some((t, count)) if *t == now => *count += 1,
			_ => self.buckets.push((now, 1)),
		}
	}

	/// Count of messages recorded within the current 60 s window.
	pub fn count_per_min(&self) -> u32 {
		let now = self.now_bucket();
		self.buckets
			.iter()
			.filter(|(t, _)| now.saturating_sub(*t) < RATE_WINDOW_SECS)
			.map(|(_, c)| c)
			.sum()
	}

	/// Whether the current rate exceeds the abuse threshold.
	pub fn is_abusive(&self) -> bool {
		self.count_per_min() > MAX_MESSAGES_PER_MINUTE
	}
}

impl Default for RateCounter {
	fn default() -> Self {
		RateCounter::new()
	}
}

/// Wraps a connected `TcpStream` plus independent send/receive rate
/// counters.
pub struct Socket {
	stream: TcpStream,
	blocking: bool,
	sent: RateCounter,
	received: RateCounter,
}

impl Socket {
	pub fn connect(addr: std::net::SocketAddr, timeout: Duration) -> Result<Socket, Error> {
		let stream = TcpStream::connect_timeout(&addr, timeout)?;
		Socket::from_stream(stream)
	}

	pub fn accept(stream: TcpStream) -> Result<Socket, Error> {
		Socket::from_stream(stream)
	}

	fn from_stream(stream: TcpStream) -> Result<Socket, Error> {
		stream.set_nodelay(true)?;
		Ok(Socket {
			stream,
			blocking: true,
			sent: RateCounter::new(),
			received: RateCounter::new(),
		})
	}

	pub fn set_recv_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
		self.stream.set_read_timeout(Some(timeout))?;
		Ok(())
	}

	pub fn set_send_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
		self.stream.set_write_timeout(Some(timeout))?;
		Ok(())
	}

	pub fn set_recv_buffer(&mut self, _size: usize) -> Result<(), Error> {
		// Buffer sizing is a kernel-level socket option; left to the OS
		// default since std's TcpStream has no portable setter for it.
		Ok(())
	}

	pub fn set_blocking(&mut self, blocking: bool) -> Result<(), Error> {
		self.blocking = blocking;
		if !blocking {
			self.stream.set_read_timeout(Some(Duration::from_millis(1)))?;
		}
		Ok(())
	}

	pub fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.stream.write_all(bytes)?;
		self.sent.record();
		Ok(())
	}

	/// Reads exactly `n` bytes. In `Mode::NonBlocking`, a zero-byte initial
	/// read (nothing available yet) returns `Ok(vec![])` instead of an
	/// error; any error past the first byte still propagates.
	pub fn receive(&mut self, n: usize, mode: Mode) -> Result<Vec<u8>, Error> {
		let mut buf = vec![0u8; n];
		if n == 0 {
			return Ok(buf);
		}
		match mode {
			Mode::Blocking => {
				self.stream.read_exact(&mut buf)?;
			}
			Mode::NonBlocking => match self.stream.read(&mut buf[..1]) {
				Ok(0) => return Err(Error::ConnectionClose),
				Ok(_) => {
					if n > 1 {
						self.stream.read_exact(&mut buf[1..])?;
					}
				}
				Err(ref e)
					if e.kind() == io::ErrorKind::WouldBlock
						|| e.kind() == io::ErrorKind::TimedOut =>
				{
					return Ok(Vec::new())
				}
				Err(e) => return Err(e.into()),
			},
		}
		self.received.record();
		Ok(buf)
	}

	pub fn is_send_abusive(&self) -> bool {
		self.sent.is_abusive()
	}

	pub fn is_receive_abusive(&self) -> bool {
		self.received.is_abusive()
	}

	pub fn try_clone(&self) -> Result<Socket, Error> {
		let stream = self.stream.try_clone()?;
		Ok(Socket {
			stream,
			blocking: self.blocking,
			sent: RateCounter::new(),
			received: RateCounter::new(),
		})
	}

	pub fn peer_addr(&self) -> Result<std::net::SocketAddr, Error> {
		Ok(self.stream.peer_addr()?)
	}

	pub fn shutdown(&self) -> Result<(), Error> {
		self.stream.shutdown(std::net::Shutdown::Both)?;
		Ok(())
	}
}

/// Delegates to the underlying stream so a `Socket` can be handed straight
/// to the codec's blocking read/write helpers (used for the handshake and
/// for draining the send queue).
impl Read for Socket {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.stream.read(buf)
	}
}

impl Write for Socket {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		let n = self.stream.write(buf)?;
		self.sent.record();
		Ok(n)
	}
	fn flush(&mut self) -> io::Result<()> {
		self.stream.flush()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rate_counter_accumulates_within_window() {
		let mut rc = RateCounter::new();
		for _ in 0..10 {
			rc.record();
		}
		assert_eq!(rc.count_per_min(), 10);
		assert!(!rc.is_abusive());
	}

	#[test]
	fn rate_counter_flags_abuse() {
		let mut rc = RateCounter::new();
		for _ in 0..(MAX_MESSAGES_PER_MINUTE + 1) {
			rc.record();
		}
		assert!(rc.is_abusive());
	}
}
