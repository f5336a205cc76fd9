/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! A minimal per-waiter parking token.
//!
//! On a real kernel this would hand off to
//! `process::scheduler::schedule()`/`wake()`; here, under the `std` feature,
//! it parks the calling OS thread, and under `no_std` it spins. Both share
//! the exact same [`WaitQueue`](super::wait_queue::WaitQueue) logic, so the
//! concurrency tests exercise the same code path a real scheduler hook would.

use core::sync::atomic::{AtomicBool, Ordering};

pub struct Parker {
	/// Set by `unpark`, consumed by `park`; avoids the missed-wakeup race
	/// between a waiter registering and the waker firing.
	token: AtomicBool,
	#[cfg(feature = "std")]
	thread: std::thread::Thread,
}

impl Parker {
	pub fn new() -> Self {
		Self {
			token: AtomicBool::new(false),
			#[cfg(feature = "std")]
			thread: std::thread::current(),
		}
	}

	pub fn park(&self) {
		#[cfg(feature = "std")]
		{
			while !self.token.swap(false, Ordering::Acquire) {
				std::thread::park();
			}
		}
		#[cfg(not(feature = "std"))]
		{
			while !self.token.swap(false, Ordering::Acquire) {
				core::hint::spin_loop();
			}
		}
	}

	pub fn unpark(&self) {
		self.token.store(true, Ordering::Release);
		#[cfg(feature = "std")]
		self.thread.unpark();
	}
}

impl Default for Parker {
	fn default() -> Self {
		Self::new()
	}
}
