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

//! Compile-time tunables shared by the allocator and cache modules.

/// Size of a physical page frame, in bytes.
pub const PGSIZE: usize = 4096;

/// Size of a logical block-device sector, in bytes.
pub const BLK_SIZE: usize = 512;

/// Number of sectors per page.
pub const BLKS_PER_PAGE: usize = PGSIZE / BLK_SIZE;

/// Highest buddy order managed by the allocator (`2^10` pages = 1 MiB groups).
pub const MAX_ORDER: u8 = 10;

/// Number of buddy orders, `0..=MAX_ORDER`.
pub const ORDERS_COUNT: usize = MAX_ORDER as usize + 1;

/// Minimum object size served by a `kmm` slab cache.
pub const SLAB_OBJ_MIN: usize = 8;

/// Maximum object size served by a `kmm` slab cache before falling back to a
/// direct buddy allocation.
pub const SLAB_OBJ_MAX: usize = 2048;

/// Minimum number of objects a slab cache tries to pack per slab.
pub const SLAB_MIN_OBJS_PER_SLAB: usize = 8;

/// Highest slab order the adaptive table will pick.
pub const SLAB_MAX_ORDER: u8 = 5;

/// Multiplier applied to `slab_obj_num` to get the global-free-list shrink
/// threshold for a cache.
pub const SLAB_SHRINK_FACTOR: usize = 4;

/// Default ratio (percent) of dirty pages that forces a background flush.
pub const DEFAULT_DIRTY_RATE: u8 = 20;

/// Default number of ticks between forced background flush rounds even if the
/// dirty ratio has not been exceeded.
pub const DEFAULT_FLUSH_INTERVAL: u64 = 500;

/// Bound on a counting semaphore's value, in either direction.
pub const SEM_VALUE_MAX: i32 = i32::MAX;
