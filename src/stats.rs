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

//! Free-form diagnostic dumps for the buddy and slab allocators.

use crate::memory::buddy::BuddyAllocator;
use crate::memory::slab::SlabCache;
use core::fmt::{self, Write};

/// Writes a per-order free-frame snapshot of `buddy` to `out`.
pub fn print_buddy_system_stat(buddy: &BuddyAllocator, out: &mut dyn Write) -> fmt::Result {
	writeln!(out, "buddy: {} frames total, {} free", buddy.num_frames(), buddy.free_frames())?;
	buddy.for_each_order(|order, free_groups| {
		let _ = writeln!(out, "  order {order:>2}: {free_groups} free group(s)");
	});
	Ok(())
}

/// Writes per-cache object/slab accounting for every cache in `caches` to
/// `out`.
pub fn slab_dump_all(caches: &[SlabCache], out: &mut dyn Write) -> fmt::Result {
	for cache in caches {
		writeln!(
			out,
			"slab[obj_size={}]: slab_total={} obj_active={} obj_total={}",
			cache.obj_size(),
			cache.slab_total(),
			cache.obj_active(),
			cache.obj_total(),
		)?;
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::memory::kmm::Kmm;
	use alloc::string::String;

	#[test]
	fn buddy_dump_mentions_every_order() {
		let buddy = BuddyAllocator::new(64).unwrap();
		let mut out = String::new();
		print_buddy_system_stat(&buddy, &mut out).unwrap();
		assert!(out.contains("order  0"));
		assert!(out.contains(&alloc::format!("order {:>2}", crate::config::MAX_ORDER)));
	}

	#[test]
	fn slab_dump_reports_active_objects() {
		let buddy = BuddyAllocator::new(256).unwrap();
		let kmm = Kmm::new(buddy, 1);
		let (_ptr, class) = kmm.alloc(16).unwrap();
		let mut out = String::new();
		slab_dump_all(kmm.classes(), &mut out).unwrap();
		assert!(out.contains("obj_active=1"));
		let _ = class;
	}
}
