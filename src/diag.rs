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

//! A small ring-buffer logger, protected by a single spinlock, used by the
//! allocator and cache modules to record state transitions and invariant
//! violations.
//!
//! This is not a general-purpose logging framework: it exists so that a
//! panic triggered by a fatal invariant violation is preceded by a handful of
//! lines of context in the ring buffer.

use crate::sync::spinlock::Spinlock;
use alloc::collections::VecDeque;
use alloc::string::String;
use core::fmt;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
	Trace,
	Debug,
	Warn,
	Error,
}

impl fmt::Display for Level {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Level::Trace => "TRACE",
			Level::Debug => "DEBUG",
			Level::Warn => "WARN",
			Level::Error => "ERROR",
		};
		write!(f, "{s}")
	}
}

/// Maximum number of records kept in the ring buffer before the oldest is
/// dropped.
const RING_CAPACITY: usize = 512;

struct Ring {
	records: VecDeque<(Level, String)>,
}

static RING: Spinlock<Ring> = Spinlock::new(Ring {
	records: VecDeque::new(),
});

/// Lowest level that is actually recorded; records below this are dropped
/// immediately. Defaults to [`Level::Debug`].
static MIN_LEVEL: Spinlock<Level> = Spinlock::new(Level::Debug);

/// Sets the minimum level recorded from this point on.
pub fn set_level(level: Level) {
	*MIN_LEVEL.lock() = level;
}

/// Records one log line. Called by the `trace!`/`debug!`/`warn!`/`error!`
/// macros; not normally called directly.
pub fn record(level: Level, args: fmt::Arguments<'_>) {
	if level < *MIN_LEVEL.lock() {
		return;
	}
	let mut ring = RING.lock();
	if ring.records.len() >= RING_CAPACITY {
		ring.records.pop_front();
	}
	ring.records.push_back((level, alloc::format!("{args}")));
}

/// Copies the current ring buffer contents, oldest first, into `out`.
pub fn snapshot(out: &mut dyn fmt::Write) -> fmt::Result {
	let ring = RING.lock();
	for (level, msg) in ring.records.iter() {
		writeln!(out, "[{level}] {msg}")?;
	}
	Ok(())
}

#[doc(hidden)]
#[macro_export]
macro_rules! log_record {
	($level:expr, $($arg:tt)*) => {
		$crate::diag::record($level, format_args!($($arg)*))
	};
}

/// Logs at [`Level::Trace`].
#[macro_export]
macro_rules! trace {
	($($arg:tt)*) => { $crate::log_record!($crate::diag::Level::Trace, $($arg)*) };
}

/// Logs at [`Level::Debug`].
#[macro_export]
macro_rules! debug_log {
	($($arg:tt)*) => { $crate::log_record!($crate::diag::Level::Debug, $($arg)*) };
}

/// Logs at [`Level::Warn`].
#[macro_export]
macro_rules! warn_log {
	($($arg:tt)*) => { $crate::log_record!($crate::diag::Level::Warn, $($arg)*) };
}

/// Logs at [`Level::Error`].
#[macro_export]
macro_rules! error_log {
	($($arg:tt)*) => { $crate::log_record!($crate::diag::Level::Error, $($arg)*) };
}

#[cfg(test)]
mod test {
	use super::*;
	use alloc::string::String;

	#[test]
	fn records_and_snapshots() {
		set_level(Level::Trace);
		record(Level::Warn, format_args!("hello {}", 42));
		let mut out = String::new();
		snapshot(&mut out).unwrap();
		assert!(out.contains("hello 42"));
		assert!(out.contains("WARN"));
	}
}
