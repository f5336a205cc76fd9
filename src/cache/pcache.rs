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

//! A block-device page cache: an ordered map from aligned block number to a
//! resident, reference-counted frame, an LRU list for clean unreferenced
//! pages, a dirty list for pending writeback, and a background flusher
//! driven by a dirty-ratio and a time policy.

use crate::config::{BLKS_PER_PAGE, DEFAULT_DIRTY_RATE, DEFAULT_FLUSH_INTERVAL};
use crate::errno::{EResult, Errno};
use crate::memory::buddy::BuddyAllocator;
use crate::memory::frame::{Frame, FrameTag};
use crate::sync::spinlock::Spinlock;
use crate::sync::wait_queue::WaitQueue;
use crate::{debug_log, trace, warn_log};
use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

/// The operations a block device exposes to the page cache. All operations
/// may block; the page cache only ever calls them with `io_in_progress`
/// already claimed on the node in question, so implementations do not need
/// to worry about concurrent calls for the same block.
pub trait BlockDeviceOps: Send + Sync {
	/// Fills `buf` (exactly one page) with the contents of the page starting
	/// at `blkno`.
	fn read_page(&self, blkno: u64, buf: &mut [u8]) -> EResult<()>;
	/// Writes `buf` back to the page starting at `blkno`.
	fn write_page(&self, blkno: u64, buf: &[u8]) -> EResult<()>;
	/// Pre-write hook; returning an error aborts the flush round for this
	/// node without calling `write_page`.
	fn write_begin(&self, _blkno: u64) -> EResult<()> {
		Ok(())
	}
	/// Post-write hook; `result` is what `write_page` returned. The
	/// returned error (if any) is what the flush round records.
	fn write_end(&self, _blkno: u64, result: EResult<()>) -> EResult<()> {
		result
	}
	/// Bookkeeping hook called when a page transitions to dirty.
	fn mark_dirty(&self, _blkno: u64) {}
	/// Bookkeeping hook called when a page is invalidated.
	fn invalidate_page(&self, _blkno: u64) {}
	/// Called when a claimed flush is aborted by `write_begin` failing.
	fn abort_io(&self, _blkno: u64) {}
}

/// A source of monotonic ticks for the background flusher's time policy.
/// Abstracted so the no-scheduler hosted core and a real kernel tick counter
/// share the same flush logic.
pub trait Clock: Send + Sync {
	fn now_ticks(&self) -> u64;
}

/// A clock driven entirely by explicit calls to `advance`; used by tests and
/// by any embedder without a wall-clock source.
pub struct ManualClock(AtomicU64);

impl ManualClock {
	pub const fn new() -> Self {
		Self(AtomicU64::new(0))
	}

	pub fn advance(&self, ticks: u64) {
		self.0.fetch_add(ticks, Ordering::Relaxed);
	}
}

impl Clock for ManualClock {
	fn now_ticks(&self) -> u64 {
		self.0.load(Ordering::Relaxed)
	}
}

#[cfg(feature = "std")]
pub struct SystemClock(std::time::Instant);

#[cfg(feature = "std")]
impl SystemClock {
	pub fn new() -> Self {
		Self(std::time::Instant::now())
	}
}

#[cfg(feature = "std")]
impl Clock for SystemClock {
	fn now_ticks(&self) -> u64 {
		self.0.elapsed().as_millis() as u64
	}
}

struct NodeState {
	uptodate: bool,
	dirty: bool,
	io_in_progress: bool,
	on_lru: bool,
	on_dirty: bool,
}

/// One frame resident in a [`Pcache`].
pub struct PcacheNode {
	blkno: u64,
	frame: Frame,
	state: Spinlock<NodeState>,
	io_waiters: WaitQueue,
}

impl PcacheNode {
	pub fn blkno(&self) -> u64 {
		self.blkno
	}

	pub fn frame(&self) -> &Frame {
		&self.frame
	}

	pub fn is_uptodate(&self) -> bool {
		self.state.lock().uptodate
	}

	pub fn is_dirty(&self) -> bool {
		self.state.lock().dirty
	}
}

struct Inner {
	page_map: BTreeMap<u64, Arc<PcacheNode>>,
	lru: VecDeque<u64>,
	dirty: VecDeque<u64>,
	page_count: usize,
	dirty_count: usize,
	flush_requested: bool,
	last_flushed: u64,
}

/// A page cache over one logical block address space.
pub struct Pcache {
	ops: Arc<dyn BlockDeviceOps>,
	buddy: BuddyAllocator,
	blk_count: u64,
	max_pages: usize,
	dirty_rate: AtomicU8,
	flush_interval: AtomicU64,
	inner: Spinlock<Inner>,
	active: AtomicBool,
	flush_error: Spinlock<Option<Errno>>,
}

impl Pcache {
	pub fn new(ops: Arc<dyn BlockDeviceOps>, buddy: BuddyAllocator, blk_count: u64, max_pages: usize) -> Arc<Self> {
		Arc::new(Self {
			ops,
			buddy,
			blk_count,
			max_pages: max_pages.max(1),
			dirty_rate: AtomicU8::new(DEFAULT_DIRTY_RATE),
			flush_interval: AtomicU64::new(DEFAULT_FLUSH_INTERVAL),
			inner: Spinlock::new(Inner {
				page_map: BTreeMap::new(),
				lru: VecDeque::new(),
				dirty: VecDeque::new(),
				page_count: 0,
				dirty_count: 0,
				flush_requested: false,
				last_flushed: 0,
			}),
			active: AtomicBool::new(true),
			flush_error: Spinlock::new(None),
		})
	}

	fn align(&self, blkno: u64) -> u64 {
		let per_page = BLKS_PER_PAGE as u64;
		(blkno / per_page) * per_page
	}

	pub fn page_count(&self) -> usize {
		self.inner.lock().page_count
	}

	pub fn dirty_count(&self) -> usize {
		self.inner.lock().dirty_count
	}

	pub fn is_active(&self) -> bool {
		self.active.load(Ordering::Relaxed)
	}

	pub fn request_flush(&self) {
		self.inner.lock().flush_requested = true;
	}

	pub fn last_error(&self) -> Option<Errno> {
		*self.flush_error.lock()
	}

	/// Looks up (or brings in) the node covering `blkno`, aligned down to
	/// the page the implementation caches as a unit. Does not perform I/O;
	/// the caller must call [`Pcache::read_page`] if the returned node is
	/// not yet up to date.
	pub fn get_page(&self, blkno: u64) -> EResult<Arc<PcacheNode>> {
		if !self.is_active() {
			return Err(Errno::Inval);
		}
		if blkno >= self.blk_count {
			return Err(Errno::Inval);
		}
		let aligned = self.align(blkno);

		let mut inner = self.inner.lock();
		if let Some(node) = inner.page_map.get(&aligned).cloned() {
			detach_lru(&mut inner, &node);
			return Ok(node);
		}
		drop(inner);

		let frame = self.buddy.alloc(0, FrameTag::Pcache)?;
		let candidate = Arc::new(PcacheNode {
			blkno: aligned,
			frame,
			state: Spinlock::new(NodeState {
				uptodate: false,
				dirty: false,
				io_in_progress: false,
				on_lru: false,
				on_dirty: false,
			}),
			io_waiters: WaitQueue::new(),
		});

		let mut inner = self.inner.lock();
		if let Some(node) = inner.page_map.get(&aligned).cloned() {
			// Lost the race: someone else inserted first.
			detach_lru(&mut inner, &node);
			return Ok(node);
		}
		if inner.page_count >= self.max_pages {
			let Some(evicted_blkno) = inner.lru.pop_back() else {
				drop(inner);
				debug_log!("pcache: no evictable victim for blkno={aligned}, page_count={}", self.max_pages);
				return Err(Errno::NoMem);
			};
			inner.page_map.remove(&evicted_blkno);
			inner.page_count -= 1;
			trace!("pcache: evicted blkno={evicted_blkno}");
		}
		inner.page_map.insert(aligned, candidate.clone());
		inner.page_count += 1;
		Ok(candidate)
	}

	/// Brings a node's contents up to date, blocking on any in-flight I/O
	/// already claimed by another caller rather than issuing a second read.
	pub fn read_page(&self, node: &Arc<PcacheNode>) -> EResult<()> {
		loop {
			let mut state = node.state.lock();
			if state.uptodate {
				return Ok(());
			}
			if state.io_in_progress {
				state = node.io_waiters.wait(&node.state, state);
				drop(state);
				continue;
			}
			state.io_in_progress = true;
			break;
		}
		let result = self.ops.read_page(node.blkno, node.frame.as_bytes_mut());
		let mut state = node.state.lock();
		if result.is_ok() {
			state.uptodate = true;
		}
		state.io_in_progress = false;
		drop(state);
		node.io_waiters.wake_all();
		result
	}

	/// Marks a node dirty. Idempotent: re-dirtying an already-dirty node is
	/// a no-op and does not call the device's `mark_dirty` hook again.
	pub fn mark_page_dirty(&self, node: &Arc<PcacheNode>) -> EResult<()> {
		{
			let state = node.state.lock();
			if state.io_in_progress {
				return Err(Errno::Busy);
			}
			if state.dirty {
				return Ok(());
			}
		}
		let mut inner = self.inner.lock();
		let mut state = node.state.lock();
		if state.dirty {
			return Ok(());
		}
		if state.on_lru {
			retain_remove(&mut inner.lru, node.blkno);
			state.on_lru = false;
		}
		if !state.on_dirty {
			inner.dirty.push_front(node.blkno);
			state.on_dirty = true;
			inner.dirty_count += 1;
		}
		state.dirty = true;
		state.uptodate = true;
		drop(state);
		drop(inner);
		self.ops.mark_dirty(node.blkno);
		Ok(())
	}

	/// Invalidates a node, dropping both its dirty and up-to-date status.
	pub fn invalidate_page(&self, node: &Arc<PcacheNode>) -> EResult<()> {
		{
			let state = node.state.lock();
			if state.io_in_progress {
				return Err(Errno::Busy);
			}
		}
		let mut inner = self.inner.lock();
		let mut state = node.state.lock();
		if state.on_lru {
			retain_remove(&mut inner.lru, node.blkno);
			state.on_lru = false;
		}
		if state.on_dirty {
			retain_remove(&mut inner.dirty, node.blkno);
			state.on_dirty = false;
			inner.dirty_count -= 1;
		}
		state.dirty = false;
		state.uptodate = false;
		drop(state);
		drop(inner);
		self.ops.invalidate_page(node.blkno);
		Ok(())
	}

	/// Releases the caller's interest in `node`. Once no other caller holds
	/// a reference (i.e. only `page_map` and this call's own `node` argument
	/// are left, `Arc::strong_count(&node) == 2`), the node is placed back
	/// onto the LRU (if clean) or left reachable via the dirty list (if
	/// dirty) so it can be evicted or flushed later; it is never dropped from
	/// `page_map` here.
	pub fn put_page(&self, node: Arc<PcacheNode>) {
		let mut inner = self.inner.lock();
		let mut state = node.state.lock();
		if !state.on_lru && !state.on_dirty && Arc::strong_count(&node) == 2 {
			if state.dirty {
				inner.dirty.push_front(node.blkno);
				state.on_dirty = true;
			} else {
				inner.lru.push_front(node.blkno);
				state.on_lru = true;
			}
		}
	}

	/// Drains the dirty list synchronously, writing each claimed node back
	/// through the device vtable. Stops at the first `write_begin` failure;
	/// does not retry.
	pub fn flush(&self) -> EResult<()> {
		let claimed: alloc::vec::Vec<Arc<PcacheNode>> = {
			let inner = self.inner.lock();
			inner
				.dirty
				.iter()
				.filter_map(|blkno| inner.page_map.get(blkno).cloned())
				.filter(|node| {
					let mut state = node.state.lock();
					if state.io_in_progress {
						false
					} else {
						state.io_in_progress = true;
						true
					}
				})
				.collect()
		};

		let mut first_error = None;
		for node in &claimed {
			let res = self.write_back_one(node);
			if let Err(err) = res {
				warn_log!("pcache: flush failed blkno={} err={err}", node.blkno);
				first_error.get_or_insert(err);
				break;
			}
		}
		*self.flush_error.lock() = first_error;
		match first_error {
			Some(err) => Err(err),
			None => Ok(()),
		}
	}

	fn write_back_one(&self, node: &Arc<PcacheNode>) -> EResult<()> {
		if let Err(err) = self.ops.write_begin(node.blkno) {
			let mut state = node.state.lock();
			state.io_in_progress = false;
			drop(state);
			node.io_waiters.wake_all();
			self.ops.abort_io(node.blkno);
			return Err(err);
		}
		let write_result = self.ops.write_page(node.blkno, node.frame.as_bytes());
		let result = self.ops.write_end(node.blkno, write_result);

		let mut inner = self.inner.lock();
		let mut state = node.state.lock();
		if result.is_ok() {
			state.dirty = false;
			if state.on_dirty {
				retain_remove(&mut inner.dirty, node.blkno);
				state.on_dirty = false;
				inner.dirty_count -= 1;
			}
			inner.lru.push_front(node.blkno);
			state.on_lru = true;
		}
		state.io_in_progress = false;
		drop(state);
		drop(inner);
		node.io_waiters.wake_all();
		result
	}

	/// Computes the current dirty ratio as a percentage of cached pages.
	pub fn dirty_ratio(&self) -> u8 {
		let inner = self.inner.lock();
		if inner.page_count == 0 {
			0
		} else {
			((inner.dirty_count * 100) / inner.page_count) as u8
		}
	}

	/// Runs one background-flusher decision: forces a round if a flush was
	/// explicitly requested, the flush interval has elapsed, or the dirty
	/// ratio exceeds the configured threshold.
	pub fn maybe_flush(&self, clock: &dyn Clock) -> EResult<bool> {
		let now = clock.now_ticks();
		let should_force = {
			let mut inner = self.inner.lock();
			let timed_out = now.saturating_sub(inner.last_flushed) >= self.flush_interval.load(Ordering::Relaxed);
			let over_dirty_rate = {
				drop(inner);
				let ratio = self.dirty_ratio();
				inner = self.inner.lock();
				ratio >= self.dirty_rate.load(Ordering::Relaxed)
			};
			let force = inner.flush_requested || timed_out || over_dirty_rate;
			if force {
				inner.flush_requested = false;
				inner.last_flushed = now;
			}
			force
		};
		if should_force {
			self.flush()?;
			Ok(true)
		} else {
			Ok(false)
		}
	}

	/// Tears the cache down: marks it inactive (all entry points fail from
	/// this point on), makes a best-effort attempt to flush, then drops
	/// every cached frame, returning them to the buddy pool.
	pub fn unregister(&self) {
		self.active.store(false, Ordering::Relaxed);
		let _ = self.flush();
		let mut inner = self.inner.lock();
		inner.page_map.clear();
		inner.lru.clear();
		inner.dirty.clear();
		inner.page_count = 0;
		inner.dirty_count = 0;
		debug_log!("pcache: unregistered");
	}
}

/// Spawns the background writeback thread: wakes every `period`, and on
/// every wake asks the cache whether a round is due per its dirty-ratio and
/// time policy. Exits once [`Pcache::is_active`] goes false.
#[cfg(feature = "std")]
pub fn spawn_flusher(pcache: Arc<Pcache>, period: std::time::Duration) -> std::thread::JoinHandle<()> {
	std::thread::spawn(move || {
		let clock = SystemClock::new();
		while pcache.is_active() {
			std::thread::sleep(period);
			if let Err(err) = pcache.maybe_flush(&clock) {
				warn_log!("pcache: background flush round failed: {err}");
			}
		}
	})
}

fn detach_lru(inner: &mut Inner, node: &Arc<PcacheNode>) {
	let mut state = node.state.lock();
	if state.on_lru {
		retain_remove(&mut inner.lru, node.blkno);
		state.on_lru = false;
	}
}

fn retain_remove(list: &mut VecDeque<u64>, value: u64) {
	if let Some(pos) = list.iter().position(|&v| v == value) {
		list.remove(pos);
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use alloc::sync::Arc as StdArc;
	use alloc::vec::Vec;

	struct MemDevice {
		backing: Spinlock<Vec<u8>>,
		fail_write_begin: AtomicBool,
	}

	impl MemDevice {
		fn new(size: usize) -> Self {
			Self {
				backing: Spinlock::new(alloc::vec![0u8; size]),
				fail_write_begin: AtomicBool::new(false),
			}
		}
	}

	impl BlockDeviceOps for MemDevice {
		fn read_page(&self, blkno: u64, buf: &mut [u8]) -> EResult<()> {
			let backing = self.backing.lock();
			let off = blkno as usize * crate::config::BLK_SIZE;
			buf.copy_from_slice(&backing[off..off + buf.len()]);
			Ok(())
		}

		fn write_page(&self, blkno: u64, buf: &[u8]) -> EResult<()> {
			let mut backing = self.backing.lock();
			let off = blkno as usize * crate::config::BLK_SIZE;
			backing[off..off + buf.len()].copy_from_slice(buf);
			Ok(())
		}

		fn write_begin(&self, _blkno: u64) -> EResult<()> {
			if self.fail_write_begin.load(Ordering::Relaxed) {
				Err(Errno::Io)
			} else {
				Ok(())
			}
		}
	}

	fn setup(max_pages: usize) -> (StdArc<Pcache>, StdArc<MemDevice>) {
		let dev = StdArc::new(MemDevice::new(64 * crate::config::PGSIZE));
		let buddy = BuddyAllocator::new(256).unwrap();
		let pcache = Pcache::new(dev.clone(), buddy, 4096, max_pages);
		(pcache, dev)
	}

	#[test]
	fn get_page_then_read_is_idempotent() {
		let (pcache, _dev) = setup(64);
		let node = pcache.get_page(0).unwrap();
		assert!(!node.is_uptodate());
		pcache.read_page(&node).unwrap();
		assert!(node.is_uptodate());
		let snapshot = node.frame().as_bytes().to_vec();
		pcache.read_page(&node).unwrap();
		assert_eq!(snapshot, node.frame().as_bytes());
	}

	#[test]
	fn get_page_is_identity_stable() {
		let (pcache, _dev) = setup(64);
		let a = pcache.get_page(0).unwrap();
		let b = pcache.get_page(0).unwrap();
		assert!(Arc::ptr_eq(&a, &b));
	}

	#[test]
	fn dirty_then_flush_clears_dirty_and_writes_back() {
		let (pcache, _dev) = setup(64);
		let node = pcache.get_page(0).unwrap();
		pcache.read_page(&node).unwrap();
		node.frame().as_bytes_mut()[0] = 0xAB;
		pcache.mark_page_dirty(&node).unwrap();
		assert!(node.is_dirty());
		assert_eq!(pcache.dirty_count(), 1);
		pcache.flush().unwrap();
		assert!(!node.is_dirty());
		assert_eq!(pcache.dirty_count(), 0);
	}

	#[test]
	fn mark_dirty_busy_while_io_in_progress() {
		let (pcache, _dev) = setup(64);
		let node = pcache.get_page(0).unwrap();
		node.state.lock().io_in_progress = true;
		assert_eq!(pcache.mark_page_dirty(&node), Err(Errno::Busy));
	}

	#[test]
	fn flush_error_surfaces_and_leaves_node_dirty() {
		let (pcache, dev) = setup(64);
		let node = pcache.get_page(0).unwrap();
		pcache.read_page(&node).unwrap();
		pcache.mark_page_dirty(&node).unwrap();
		dev.fail_write_begin.store(true, Ordering::Relaxed);
		assert!(pcache.flush().is_err());
		assert!(node.is_dirty());
		assert_eq!(pcache.last_error(), Some(Errno::Io));
	}

	#[test]
	fn eviction_respects_max_pages() {
		let (pcache, _dev) = setup(1);
		let first = pcache.get_page(0).unwrap();
		pcache.read_page(&first).unwrap();
		pcache.put_page(first.clone());
		let _second = pcache.get_page(8).unwrap();
		assert_eq!(pcache.page_count(), 1);
	}

	#[test]
	fn background_flush_round_respects_dirty_rate() {
		let (pcache, _dev) = setup(64);
		let node = pcache.get_page(0).unwrap();
		pcache.read_page(&node).unwrap();
		pcache.mark_page_dirty(&node).unwrap();
		let clock = ManualClock::new();
		let flushed = pcache.maybe_flush(&clock).unwrap();
		assert!(flushed, "single dirty page out of one cached page exceeds default dirty rate");
		assert!(!node.is_dirty());
	}
}
