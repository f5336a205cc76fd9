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

//! A counting semaphore bounded by `[-SEM_VALUE_MAX, SEM_VALUE_MAX]`.

use super::spinlock::Spinlock;
use super::wait_queue::WaitQueue;
use crate::config::SEM_VALUE_MAX;
use crate::errno::{EResult, Errno};

pub struct Semaphore {
	value: Spinlock<i32>,
	waiters: WaitQueue,
}

impl Semaphore {
	pub const fn new(initial: i32) -> Self {
		Self {
			value: Spinlock::new(initial),
			waiters: WaitQueue::new(),
		}
	}

	/// Decrements the value, sleeping while it is negative.
	pub fn wait(&self) {
		let mut guard = self.value.lock();
		loop {
			let next = *guard - 1;
			if next >= -SEM_VALUE_MAX {
				*guard = next;
				return;
			}
			guard = self.waiters.wait(&self.value, guard);
		}
	}

	/// Decrements the value without blocking; fails with [`Errno::Again`] if
	/// the value is already zero.
	pub fn try_wait(&self) -> EResult<()> {
		let mut guard = self.value.lock();
		if *guard <= 0 {
			return Err(Errno::Again);
		}
		*guard -= 1;
		Ok(())
	}

	/// Increments the value, waking one waiter if it was non-positive.
	/// Fails with [`Errno::Overflow`] without mutating state if the bound
	/// would be exceeded.
	pub fn post(&self) -> EResult<()> {
		let mut guard = self.value.lock();
		if *guard >= SEM_VALUE_MAX {
			return Err(Errno::Overflow);
		}
		let was_nonpositive = *guard <= 0;
		*guard += 1;
		drop(guard);
		if was_nonpositive {
			self.waiters.wake_one();
		}
		Ok(())
	}

	/// Returns the current raw value; informational only.
	pub fn value(&self) -> i32 {
		*self.value.lock()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use alloc::sync::Arc;

	#[test]
	fn producer_consumer() {
		let sem = Arc::new(Semaphore::new(0));
		let sem2 = sem.clone();
		let producer = std::thread::spawn(move || {
			for _ in 0..100 {
				sem2.post().unwrap();
			}
		});
		for _ in 0..100 {
			sem.wait();
		}
		producer.join().unwrap();
		assert_eq!(sem.value(), 0);
	}

	#[test]
	fn try_wait_fails_when_empty() {
		let sem = Semaphore::new(0);
		assert_eq!(sem.try_wait(), Err(Errno::Again));
	}
}
