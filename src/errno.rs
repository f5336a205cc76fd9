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

//! Error kinds shared across the allocator and cache core, and the result
//! aliases built on top of them.

use core::fmt;

/// An error produced by the core.
///
/// `Device` carries an errno verbatim from a block-device operation, since the
/// core does not know the full range of codes a given device may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
	/// Allocator exhaustion after an OOM shrink retry.
	NoMem,
	/// Invalid argument: bad frame, out-of-range block number, bad flags.
	Inval,
	/// The target has I/O in progress; retry or wait.
	Busy,
	/// The operation could not be queued right now; retry.
	Again,
	/// Generic I/O failure.
	Io,
	/// Broken pipe.
	Pipe,
	/// A counting primitive would exceed its bound.
	Overflow,
	/// No matching entry.
	NoEnt,
	/// Interrupted by a signal while sleeping.
	Intr,
	/// Verbatim errno from a block-device operation.
	Device(i32),
}

impl fmt::Display for Errno {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::NoMem => write!(f, "out of memory"),
			Self::Inval => write!(f, "invalid argument"),
			Self::Busy => write!(f, "resource busy"),
			Self::Again => write!(f, "try again"),
			Self::Io => write!(f, "I/O error"),
			Self::Pipe => write!(f, "broken pipe"),
			Self::Overflow => write!(f, "value overflow"),
			Self::NoEnt => write!(f, "no such entry"),
			Self::Intr => write!(f, "interrupted"),
			Self::Device(code) => write!(f, "device error ({code})"),
		}
	}
}

/// Result type for fallible operations across the core.
pub type EResult<T> = Result<T, Errno>;

/// Result type specialized for allocation paths, kept distinct from
/// [`EResult`] so call sites such as `buddy::alloc` read naturally even though
/// the underlying type is the same.
pub type AllocResult<T> = Result<T, Errno>;
