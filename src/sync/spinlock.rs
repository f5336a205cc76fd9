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

//! A simple non-reentrant spinlock.
//!
//! The caller is expected to have preemption disabled for the duration of the
//! critical section (see [`push_off`]/[`pop_off`]); re-acquiring a spinlock
//! already held by the current CPU is a fatal error, not a deadlock that
//! merely hangs forever.

use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[cfg(feature = "std")]
thread_local! {
	static PREEMPT_DEPTH: core::cell::Cell<usize> = const { core::cell::Cell::new(0) };
}

/// Disables preemption for the current CPU/thread. Matching calls to
/// [`pop_off`] must be made in reverse order; nesting is allowed.
pub fn push_off() {
	#[cfg(feature = "std")]
	PREEMPT_DEPTH.with(|d| d.set(d.get() + 1));
}

/// Re-enables preemption disabled by a matching [`push_off`].
pub fn pop_off() {
	#[cfg(feature = "std")]
	PREEMPT_DEPTH.with(|d| {
		let depth = d.get();
		debug_assert!(depth > 0, "pop_off without matching push_off");
		d.set(depth.saturating_sub(1));
	});
}

/// A spinlock guarding a `T`.
pub struct Spinlock<T> {
	locked: AtomicBool,
	/// Owner token, used only to detect same-CPU reentrancy in debug builds;
	/// `usize::MAX` means unlocked.
	owner: AtomicUsize,
	value: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Spinlock<T> {}
unsafe impl<T: Send> Send for Spinlock<T> {}

/// Caller-supplied identity used only for reentrancy detection; on a hosted
/// build this is the current thread id, on a bare-metal build it would be the
/// current CPU id.
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

impl<T> Spinlock<T> {
	/// Creates a new unlocked spinlock around `value`.
	pub const fn new(value: T) -> Self {
		Self {
			locked: AtomicBool::new(false),
			owner: AtomicUsize::new(usize::MAX),
			value: UnsafeCell::new(value),
		}
	}

	/// Acquires the lock, spinning until it is free.
	pub fn lock(&self) -> SpinlockGuard<'_, T> {
		push_off();
		let me = current_owner();
		loop {
			if self
				.locked
				.compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
				.is_ok()
			{
				break;
			}
			if self.owner.load(Ordering::Relaxed) == me && self.locked.load(Ordering::Relaxed) {
				pop_off();
				panic!("spinlock: reentrant acquisition by the same owner");
			}
			hint::spin_loop();
		}
		self.owner.store(me, Ordering::Relaxed);
		SpinlockGuard { lock: self }
	}

	/// Attempts to acquire the lock without spinning.
	pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
		push_off();
		if self
			.locked
			.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
			.is_ok()
		{
			self.owner.store(current_owner(), Ordering::Relaxed);
			Some(SpinlockGuard { lock: self })
		} else {
			pop_off();
			None
		}
	}

	/// Returns `true` if the lock is currently held by someone.
	pub fn is_locked(&self) -> bool {
		self.locked.load(Ordering::Relaxed)
	}
}

/// RAII guard releasing the spinlock on drop.
pub struct SpinlockGuard<'a, T> {
	lock: &'a Spinlock<T>,
}

impl<T> Deref for SpinlockGuard<'_, T> {
	type Target = T;
	fn deref(&self) -> &T {
		unsafe { &*self.lock.value.get() }
	}
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
	fn deref_mut(&mut self) -> &mut T {
		unsafe { &mut *self.lock.value.get() }
	}
}

impl<T> Drop for SpinlockGuard<'_, T> {
	fn drop(&mut self) {
		self.lock.owner.store(usize::MAX, Ordering::Relaxed);
		self.lock.locked.store(false, Ordering::Release);
		pop_off();
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use alloc::sync::Arc;

	#[test]
	fn basic_mutual_exclusion() {
		let lock = Arc::new(Spinlock::new(0usize));
		let mut handles = alloc::vec::Vec::new();
		for _ in 0..8 {
			let lock = lock.clone();
			handles.push(std::thread::spawn(move || {
				for _ in 0..1000 {
					*lock.lock() += 1;
				}
			}));
		}
		for h in handles {
			h.join().unwrap();
		}
		assert_eq!(*lock.lock(), 8000);
	}

	#[test]
	#[should_panic(expected = "reentrant")]
	fn reentrant_lock_panics() {
		let lock = Spinlock::new(0);
		let _g1 = lock.lock();
		let _g2 = lock.lock();
	}
}
