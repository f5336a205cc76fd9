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

//! An edge-triggered completion latch: each `complete` wakes exactly one
//! `wait_for_completion`, while `complete_all` latches the completion
//! permanently open so every past and future waiter proceeds immediately.

use super::spinlock::Spinlock;
use super::wait_queue::WaitQueue;

struct State {
	/// Number of un-consumed `complete()` calls.
	pending: u32,
	/// Once set, every wait returns immediately without consuming `pending`.
	latched: bool,
}

pub struct Completion {
	state: Spinlock<State>,
	waiters: WaitQueue,
}

impl Completion {
	pub const fn new() -> Self {
		Self {
			state: Spinlock::new(State {
				pending: 0,
				latched: false,
			}),
			waiters: WaitQueue::new(),
		}
	}

	/// Completes one waiter.
	pub fn complete(&self) {
		let mut guard = self.state.lock();
		guard.pending += 1;
		drop(guard);
		self.waiters.wake_one();
	}

	/// Permanently opens the completion: every waiter, past and future,
	/// proceeds without blocking.
	pub fn complete_all(&self) {
		let mut guard = self.state.lock();
		guard.latched = true;
		drop(guard);
		self.waiters.wake_all();
	}

	/// Blocks until either a matching `complete()` or a `complete_all()` has
	/// occurred.
	pub fn wait(&self) {
		let mut guard = self.state.lock();
		loop {
			if guard.latched {
				return;
			}
			if guard.pending > 0 {
				guard.pending -= 1;
				return;
			}
			guard = self.waiters.wait(&self.state, guard);
		}
	}
}

impl Default for Completion {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use alloc::sync::Arc;

	#[test]
	fn complete_wakes_single_waiter() {
		let c = Arc::new(Completion::new());
		let c2 = c.clone();
		let handle = std::thread::spawn(move || c2.wait());
		std::thread::sleep(std::time::Duration::from_millis(10));
		c.complete();
		handle.join().unwrap();
	}

	#[test]
	fn complete_all_opens_permanently() {
		let c = Completion::new();
		c.complete_all();
		c.wait();
		c.wait();
	}
}
