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

//! A reader/writer lock, writer-biased by default: once a writer is waiting,
//! new readers queue behind it instead of starving it.

use super::spinlock::Spinlock;
use super::wait_queue::WaitQueue;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

struct State {
	readers: u32,
	writer: bool,
	writers_waiting: u32,
}

pub struct RwLock<T> {
	state: Spinlock<State>,
	waiters: WaitQueue,
	/// Favor pending writers over new readers when both are possible.
	writer_biased: bool,
	value: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for RwLock<T> {}
unsafe impl<T: Send> Send for RwLock<T> {}

impl<T> RwLock<T> {
	pub const fn new(value: T) -> Self {
		Self::with_bias(value, true)
	}

	pub const fn with_bias(value: T, writer_biased: bool) -> Self {
		Self {
			state: Spinlock::new(State {
				readers: 0,
				writer: false,
				writers_waiting: 0,
			}),
			waiters: WaitQueue::new(),
			writer_biased,
			value: UnsafeCell::new(value),
		}
	}

	pub fn read(&self) -> RwLockReadGuard<'_, T> {
		let mut guard = self.state.lock();
		loop {
			let blocked = guard.writer || (self.writer_biased && guard.writers_waiting > 0);
			if !blocked {
				guard.readers += 1;
				return RwLockReadGuard { lock: self };
			}
			guard = self.waiters.wait(&self.state, guard);
		}
	}

	pub fn write(&self) -> RwLockWriteGuard<'_, T> {
		let mut guard = self.state.lock();
		guard.writers_waiting += 1;
		while guard.writer || guard.readers > 0 {
			guard = self.waiters.wait(&self.state, guard);
		}
		guard.writers_waiting -= 1;
		guard.writer = true;
		RwLockWriteGuard { lock: self }
	}
}

pub struct RwLockReadGuard<'a, T> {
	lock: &'a RwLock<T>,
}

impl<T> Deref for RwLockReadGuard<'_, T> {
	type Target = T;
	fn deref(&self) -> &T {
		unsafe { &*self.lock.value.get() }
	}
}

impl<T> Drop for RwLockReadGuard<'_, T> {
	fn drop(&mut self) {
		let mut guard = self.lock.state.lock();
		guard.readers -= 1;
		let last = guard.readers == 0;
		drop(guard);
		if last {
			self.lock.waiters.wake_all();
		}
	}
}

pub struct RwLockWriteGuard<'a, T> {
	lock: &'a RwLock<T>,
}

impl<T> Deref for RwLockWriteGuard<'_, T> {
	type Target = T;
	fn deref(&self) -> &T {
		unsafe { &*self.lock.value.get() }
	}
}

impl<T> DerefMut for RwLockWriteGuard<'_, T> {
	fn deref_mut(&mut self) -> &mut T {
		unsafe { &mut *self.lock.value.get() }
	}
}

impl<T> Drop for RwLockWriteGuard<'_, T> {
	fn drop(&mut self) {
		let mut guard = self.lock.state.lock();
		guard.writer = false;
		drop(guard);
		self.lock.waiters.wake_all();
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use alloc::sync::Arc;

	#[test]
	fn readers_share_writers_exclude() {
		let lock = Arc::new(RwLock::new(0usize));
		{
			let _r1 = lock.read();
			let _r2 = lock.read();
		}
		{
			let mut w = lock.write();
			*w += 1;
		}
		assert_eq!(*lock.read(), 1);
	}
}
