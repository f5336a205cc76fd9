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

//! A FIFO wait queue, the building block for every blocking primitive in
//! this crate.
//!
//! `wait` atomically registers the calling thread as a waiter and releases
//! the caller-supplied spinlock, mirroring the classic `sleep(chan, lock)`
//! contract: register-then-release must not race a concurrent `wake_all`, or
//! a wakeup can be missed entirely.

use super::park::Parker;
use super::spinlock::{Spinlock, SpinlockGuard};
use alloc::collections::VecDeque;
use alloc::sync::Arc;

pub struct WaitQueue {
	waiters: Spinlock<VecDeque<Arc<Parker>>>,
}

impl WaitQueue {
	pub const fn new() -> Self {
		Self {
			waiters: Spinlock::new(VecDeque::new()),
		}
	}

	/// Registers the current thread as a waiter, releases `guard`, then
	/// blocks until woken. Returns a freshly reacquired guard on the same
	/// lock, so the caller can re-check its predicate without a separate
	/// `lock()` call.
	pub fn wait<'a, T>(&self, lock: &'a Spinlock<T>, guard: SpinlockGuard<'a, T>) -> SpinlockGuard<'a, T> {
		let parker = Arc::new(Parker::new());
		self.waiters.lock().push_back(parker.clone());
		drop(guard);
		parker.park();
		lock.lock()
	}

	/// Wakes every currently registered waiter.
	pub fn wake_all(&self) {
		let mut waiters = self.waiters.lock();
		for parker in waiters.drain(..) {
			parker.unpark();
		}
	}

	/// Wakes a single waiter, if any, returning whether one was woken.
	pub fn wake_one(&self) -> bool {
		let mut waiters = self.waiters.lock();
		if let Some(parker) = waiters.pop_front() {
			parker.unpark();
			true
		} else {
			false
		}
	}

	/// Returns `true` if no thread is currently registered on this queue.
	pub fn is_empty(&self) -> bool {
		self.waiters.lock().is_empty()
	}
}

impl Default for WaitQueue {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use alloc::sync::Arc as StdArc;
	use core::sync::atomic::{AtomicBool, Ordering};

	#[test]
	fn wakes_waiter_after_release() {
		let lock = StdArc::new(Spinlock::new(false));
		let queue = StdArc::new(WaitQueue::new());
		let ready = StdArc::new(AtomicBool::new(false));

		let lock2 = lock.clone();
		let queue2 = queue.clone();
		let ready2 = ready.clone();
		let waiter = std::thread::spawn(move || {
			let mut guard = lock2.lock();
			while !*guard {
				guard = queue2.wait(&lock2, guard);
			}
		});

		while queue.is_empty() {
			std::thread::yield_now();
		}
		*lock.lock() = true;
		ready.store(true, Ordering::Release);
		queue.wake_all();
		waiter.join().unwrap();
	}
}
