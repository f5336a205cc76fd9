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

//! Concurrency primitives used throughout the allocator and cache core.

pub mod completion;
pub mod mutex;
mod park;
pub mod rwlock;
pub mod semaphore;
pub mod spinlock;
pub mod wait_queue;

pub use completion::Completion;
pub use mutex::SleepMutex;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
pub use spinlock::Spinlock;
pub use wait_queue::WaitQueue;
