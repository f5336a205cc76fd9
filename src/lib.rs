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

//! Buddy and slab physical memory allocators, and a block-device page cache
//! built on top of them.
//!
//! Built without `std` by default semantics: only the `std` feature (on by
//! default, so that `cargo test` works out of the box) pulls in real OS
//! thread parking for the blocking primitives in [`sync`] and a wall-clock
//! source for the page cache's background flusher. Disabling it compiles
//! against `alloc` alone, with the same primitives falling back to spin-wait
//! loops.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod diag;

pub mod cache;
pub mod config;
pub mod errno;
pub mod memory;
pub mod stats;
pub mod sync;

pub use errno::{AllocResult, EResult, Errno};
