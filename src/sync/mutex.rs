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

//! A blocking mutex that remembers its owner and sleeps contended waiters on
//! a [`WaitQueue`], instead of spinning.

use super::spinlock::Spinlock;
use super::wait_queue::WaitQueue;
use crate::errno::{EResult, Errno};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

#[cfg(feature = "std")]
fn current_owner() -> usize {
	use std::collections::hash_map::DefaultHasher;
	use std::hash::{Hash, Hasher};
	let mut hasher = DefaultHasher::new();
	std::thread::current().id().hash(&mut hasher);
	hasher.finish() as usize
}

#[cfg(not(feature = "std"))]
fn current_owner() -> usize {
	0
}

#[cfg(feature = "std")]
thread_local! {
	static INTERRUPTED: core::cell::Cell<bool> = const { core::cell::Cell::new(false) };
}

/// Marks the current thread as having received a pending interrupt; the next
/// blocking wait on an interruptible primitive will fail with
/// [`Errno::Intr`] instead of sleeping.
pub fn raise_interrupt() {
	#[cfg(feature = "std")]
	INTERRUPTED.with(|i| i.set(true));
}

fn take_interrupt() -> bool {
	#[cfg(feature = "std")]
	return INTERRUPTED.with(|i| i.replace(false));
	#[cfg(not(feature = "std"))]
	false
}

struct State {
	locked: bool,
	owner: usize,
}

/// A sleep-mutex around a `T`.
pub struct SleepMutex<T> {
	state: Spinlock<State>,
	waiters: WaitQueue,
	value: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SleepMutex<T> {}
unsafe impl<T: Send> Send for SleepMutex<T> {}

impl<T> SleepMutex<T> {
	pub const fn new(value: T) -> Self {
		Self {
			state: Spinlock::new(State {
				locked: false,
				owner: usize::MAX,
			}),
			waiters: WaitQueue::new(),
			value: UnsafeCell::new(value),
		}
	}

	/// Acquires the mutex, sleeping while it is held.
	pub fn lock(&self) -> SleepMutexGuard<'_, T> {
		let me = current_owner();
		let mut guard = self.state.lock();
		while guard.locked {
			guard = self.waiters.wait(&self.state, guard);
		}
		guard.locked = true;
		guard.owner = me;
		drop(guard);
		SleepMutexGuard { mutex: self }
	}

	/// Acquires the mutex, failing with [`Errno::Intr`] if the current
	/// thread has a pending interrupt while it waits.
	pub fn lock_interruptible(&self) -> EResult<SleepMutexGuard<'_, T>> {
		let me = current_owner();
		let mut guard = self.state.lock();
		while guard.locked {
			if take_interrupt() {
				return Err(Errno::Intr);
			}
			guard = self.waiters.wait(&self.state, guard);
		}
		guard.locked = true;
		guard.owner = me;
		drop(guard);
		Ok(SleepMutexGuard { mutex: self })
	}

	/// Returns the owner's opaque identity, or `None` if unlocked. Intended
	/// for debugging only.
	pub fn owner(&self) -> Option<usize> {
		let guard = self.state.lock();
		guard.locked.then_some(guard.owner)
	}

	/// Acquires the mutex without producing an RAII guard, pairing with
	/// [`unlock_raw`]. For the rare caller that must hold a lock across a
	/// value handed back from one function and released from another — the
	/// buffer cache's `bread`/`brelse` pair, mirroring xv6's
	/// `acquiresleep`/`releasesleep` — rather than within one lexical scope.
	pub(crate) fn lock_raw(&self) {
		let me = current_owner();
		let mut guard = self.state.lock();
		while guard.locked {
			guard = self.waiters.wait(&self.state, guard);
		}
		guard.locked = true;
		guard.owner = me;
	}

	/// Releases a lock taken by [`lock_raw`].
	pub(crate) fn unlock_raw(&self) {
		let mut guard = self.state.lock();
		guard.locked = false;
		guard.owner = usize::MAX;
		drop(guard);
		self.waiters.wake_one();
	}
}

pub struct SleepMutexGuard<'a, T> {
	mutex: &'a SleepMutex<T>,
}

impl<T> Deref for SleepMutexGuard<'_, T> {
	type Target = T;
	fn deref(&self) -> &T {
		unsafe { &*self.mutex.value.get() }
	}
}

impl<T> DerefMut for SleepMutexGuard<'_, T> {
	fn deref_mut(&mut self) -> &mut T {
		unsafe { &mut *self.mutex.value.get() }
	}
}

impl<T> Drop for SleepMutexGuard<'_, T> {
	fn drop(&mut self) {
		let mut guard = self.mutex.state.lock();
		guard.locked = false;
		guard.owner = usize::MAX;
		drop(guard);
		self.mutex.waiters.wake_one();
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use alloc::sync::Arc;

	#[test]
	fn excludes_concurrent_access() {
		let mutex = Arc::new(SleepMutex::new(0usize));
		let mut handles = alloc::vec::Vec::new();
		for _ in 0..8 {
			let mutex = mutex.clone();
			handles.push(std::thread::spawn(move || {
				for _ in 0..500 {
					*mutex.lock() += 1;
				}
			}));
		}
		for h in handles {
			h.join().unwrap();
		}
		assert_eq!(*mutex.lock(), 4000);
	}
}
