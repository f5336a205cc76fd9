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

//! The buddy allocator allows allocating runs of `2^order` pages out of one
//! contiguous arena.
//!
//! Each order has its own free set and its own lock; splitting walks orders
//! downward releasing the lock for the order just left before taking the
//! next one, and merging re-validates the buddy's membership under the
//! destination order's lock rather than trusting an unlocked lookup, exactly
//! as the "at most one order lock held at a time" rule requires. The free
//! set itself is a `BTreeSet<FrameId>` rather than an intrusive linked list
//! threaded through the frame descriptors: merging needs to test "is this
//! address currently a free group of this order" and remove it in one step,
//! which a sorted set gives for free without unsafe intrusive pointers.

use super::frame::{Arena, Frame, FrameInner, FrameTag};
use crate::config::{ORDERS_COUNT, PGSIZE};
use crate::errno::{AllocResult, Errno};
use crate::sync::spinlock::Spinlock;
use crate::{debug_log, trace};
use alloc::collections::BTreeSet;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

struct Inner {
	arena: Arena,
	/// `pools[k]` holds the frame ids that are currently free group heads of
	/// order `k`.
	pools: [Spinlock<BTreeSet<usize>>; ORDERS_COUNT],
	free_frames: AtomicUsize,
}

/// One contiguous physical memory pool split into power-of-two runs.
///
/// A cheap-to-clone handle (an [`Arc`] underneath): every [`Frame`] carved
/// from it keeps its own clone so it can hand itself back on drop, which is
/// why this wraps its state in an `Arc` rather than requiring every caller
/// to wrap `BuddyAllocator` in one externally.
#[derive(Clone)]
pub struct BuddyAllocator(Arc<Inner>);

impl BuddyAllocator {
	/// Builds an allocator managing `num_frames` pages. Carves the region
	/// into maximal aligned power-of-two runs, the same greedy strategy
	/// `fill_free_list` uses: take the largest order that both fits in what
	/// remains and keeps the run's base aligned, repeat on the remainder.
	pub fn new(num_frames: usize) -> AllocResult<Self> {
		let arena = Arena::new(num_frames).ok_or(Errno::NoMem)?;
		let pools = core::array::from_fn(|_| Spinlock::new(BTreeSet::new()));
		let inner = Arc::new(Inner {
			arena,
			pools,
			free_frames: AtomicUsize::new(0),
		});
		let mut base = 0usize;
		let mut remaining = num_frames;
		while remaining > 0 {
			let max_order_here = (remaining.ilog2() as u8).min(crate::config::MAX_ORDER);
			let align_order = if base == 0 {
				max_order_here
			} else {
				(base.trailing_zeros() as u8).min(max_order_here)
			};
			let order = align_order.min(max_order_here);
			inner.pools[order as usize].lock().insert(base);
			inner.free_frames.fetch_add(1usize << order, Ordering::Relaxed);
			base += 1usize << order;
			remaining -= 1usize << order;
		}
		Ok(Self(inner))
	}

	pub(crate) fn arena(&self) -> &Arena {
		&self.0.arena
	}

	/// Total number of frames managed by this pool.
	pub fn num_frames(&self) -> usize {
		self.0.arena.num_frames
	}

	/// Number of frames currently free, summed across all orders.
	pub fn free_frames(&self) -> usize {
		self.0.free_frames.load(Ordering::Relaxed)
	}

	/// Allocates a run of `2^order` pages tagged `tag`.
	pub fn alloc(&self, order: u8, tag: FrameTag) -> AllocResult<Frame> {
		if order as usize >= ORDERS_COUNT {
			return Err(Errno::Inval);
		}
		for k in order..ORDERS_COUNT as u8 {
			let mut pool = self.0.pools[k as usize].lock();
			let Some(&id) = pool.iter().next() else {
				continue;
			};
			pool.remove(&id);
			drop(pool);
			self.split_down(id, k, order);
			self.0.free_frames.fetch_sub(1usize << order, Ordering::Relaxed);
			trace!("buddy: alloc order={order} id={id} tag={tag:?}");
			return Ok(FrameInner::new(self.clone(), id, order, tag));
		}
		debug_log!("buddy: exhausted at order={order}");
		Err(Errno::NoMem)
	}

	/// Splits a free run found at order `from` down to order `to`, pushing
	/// each upper half onto the pool one order below.
	fn split_down(&self, id: usize, from: u8, to: u8) {
		let mut cur_order = from;
		while cur_order > to {
			cur_order -= 1;
			let upper = id + (1usize << cur_order);
			self.0.pools[cur_order as usize].lock().insert(upper);
		}
	}

	/// Returns a run to the pool, merging with its buddy repeatedly while
	/// possible. Called by [`FrameInner`]'s `Drop`; not part of the public
	/// API since callers release frames by dropping the last `Frame` handle.
	pub(crate) fn free(&self, id: usize, order: u8) {
		let mut cur_id = id;
		let mut cur_order = order;
		while (cur_order as usize) < ORDERS_COUNT - 1 {
			let buddy = cur_id ^ (1usize << cur_order);
			if buddy + (1usize << cur_order) > self.0.arena.num_frames {
				break;
			}
			let mut pool = self.0.pools[cur_order as usize].lock();
			if pool.remove(&buddy) {
				drop(pool);
				cur_id = cur_id.min(buddy);
				cur_order += 1;
				continue;
			}
			break;
		}
		self.0.pools[cur_order as usize].lock().insert(cur_id);
		self.0.free_frames.fetch_add(1usize << order, Ordering::Relaxed);
		trace!("buddy: free order={order} released_as_order={cur_order} id={cur_id}");
	}

	/// Writes a free-count-per-order snapshot to `out`, used by
	/// `stats::print_buddy_system_stat`.
	pub(crate) fn for_each_order(&self, mut f: impl FnMut(u8, usize)) {
		for (k, pool) in self.0.pools.iter().enumerate() {
			f(k as u8, pool.lock().len());
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn alloc_free_roundtrip_restores_capacity() {
		let buddy = BuddyAllocator::new(64).unwrap();
		assert_eq!(buddy.free_frames(), 64);
		let frame = buddy.alloc(3, FrameTag::Anon).unwrap();
		assert_eq!(buddy.free_frames(), 64 - 8);
		drop(frame);
		assert_eq!(buddy.free_frames(), 64);
	}

	#[test]
	fn allocations_never_overlap() {
		let buddy = BuddyAllocator::new(64).unwrap();
		let mut frames = alloc::vec::Vec::new();
		for _ in 0..8 {
			frames.push(buddy.alloc(3, FrameTag::Anon).unwrap());
		}
		let mut ranges: alloc::vec::Vec<(usize, usize)> =
			frames.iter().map(|f| (f.id(), f.id() + (1 << f.order()))).collect();
		ranges.sort();
		for w in ranges.windows(2) {
			assert!(w[0].1 <= w[1].0, "overlapping frame runs: {w:?}");
		}
		assert!(buddy.alloc(3, FrameTag::Anon).is_err());
	}

	#[test]
	fn exhaustion_then_recovery() {
		let buddy = BuddyAllocator::new(16).unwrap();
		let a = buddy.alloc(4, FrameTag::Anon).unwrap();
		assert!(buddy.alloc(0, FrameTag::Anon).is_err());
		drop(a);
		assert!(buddy.alloc(0, FrameTag::Anon).is_ok());
	}

	#[test]
	fn split_then_coalesce_returns_single_free_group() {
		// Freeing the only allocated fragment out of an otherwise-empty pool
		// must coalesce all the way back up to one order-3 free group,
		// since every buddy at every level is free and gets merged in turn.
		let buddy = BuddyAllocator::new(8).unwrap();
		let small = buddy.alloc(0, FrameTag::Anon).unwrap();
		drop(small);
		assert_eq!(buddy.free_frames(), 8);
		for order in 0..3 {
			assert!(buddy.0.pools[order].lock().is_empty());
		}
		assert!(buddy.0.pools[3].lock().contains(&0));
		let big = buddy.alloc(3, FrameTag::Anon).unwrap();
		assert_eq!(big.id(), 0);
	}
}
