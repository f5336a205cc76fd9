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

//! The classic `bread`/`bwrite`/`brelse`/`bpin`/`bunpin` interface, adapted
//! onto a [`Pcache`] instead of its own private LRU list the way xv6's
//! `bio.c` keeps one.

use super::pcache::{Pcache, PcacheNode};
use crate::config::BLK_SIZE;
use crate::errno::EResult;
use crate::memory::frame::Frame;
use crate::sync::mutex::SleepMutex;
use crate::sync::spinlock::Spinlock;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

/// A locked, in-use view onto one sector's worth of data inside a pcache
/// page. Not a cache in its own right — the pcache is the cache; this is
/// just a session handle.
///
/// `bread` hands one back already locked, the way xv6's `bread` returns an
/// already-`acquiresleep`'d `buf`; callers read/write `data`/`data_mut`
/// directly without locking again, and `brelse` is what releases the lock.
pub struct Buffer {
	blockno: u64,
	node: Arc<PcacheNode>,
	offset: usize,
	lock: SleepMutex<()>,
	refcnt: AtomicUsize,
	/// Extra frame references taken by `bpin`, one per call, popped one at a
	/// time by a matching `bunpin`.
	pins: Spinlock<Vec<Frame>>,
}

impl Buffer {
	pub fn blockno(&self) -> u64 {
		self.blockno
	}

	pub fn is_valid(&self) -> bool {
		self.node.is_uptodate()
	}

	/// The sector's bytes. Only valid to call while holding the buffer
	/// returned by `bread`, i.e. before the matching `brelse`.
	pub fn data(&self) -> &[u8] {
		let bytes = self.node.frame().as_bytes();
		&bytes[self.offset..self.offset + BLK_SIZE]
	}

	/// Mutable access to the sector's bytes, same validity rule as `data`.
	pub fn data_mut(&self) -> &mut [u8] {
		let bytes = self.node.frame().as_bytes_mut();
		&mut bytes[self.offset..self.offset + BLK_SIZE]
	}
}

/// Reads block `blockno`, blocking until its contents are available, and
/// returns a locked, ref-counted buffer. Panics on a failed page lookup or
/// read, the legacy xv6 semantics this interface mirrors.
pub fn bread(pcache: &Arc<Pcache>, blockno: u64) -> Arc<Buffer> {
	let node = pcache.get_page(blockno).expect("bread: get_page failed");
	if !node.is_uptodate() {
		pcache.read_page(&node).expect("bread: read_page failed");
	}
	let offset = ((blockno as usize) % crate::config::BLKS_PER_PAGE) * BLK_SIZE;
	let buffer = Arc::new(Buffer {
		blockno,
		node,
		offset,
		lock: SleepMutex::new(()),
		refcnt: AtomicUsize::new(1),
		pins: Spinlock::new(Vec::new()),
	});
	buffer.lock.lock_raw();
	buffer
}

/// Marks the buffer's backing page dirty and flushes it synchronously, the
/// way xv6's `bwrite` never returns until the sector has been written back.
pub fn bwrite(pcache: &Arc<Pcache>, buffer: &Buffer) -> EResult<()> {
	pcache.mark_page_dirty(&buffer.node)?;
	pcache.flush()
}

/// Releases one reference to `buffer`. Once the last reference is released,
/// the buffer's lock is released and the backing page is returned to the
/// pcache's normal LRU/dirty bookkeeping.
pub fn brelse(pcache: &Arc<Pcache>, buffer: Arc<Buffer>) {
	if buffer.refcnt.fetch_sub(1, Ordering::AcqRel) == 1 {
		buffer.lock.unlock_raw();
		pcache.put_page(buffer.node.clone());
	}
}

/// Takes an extra, long-lived reference on `buffer`'s underlying frame,
/// keeping it resident independent of the normal buffer session lifetime.
pub fn bpin(buffer: &Buffer) {
	buffer.pins.lock().push(buffer.node.frame().clone());
}

/// Releases one reference taken by [`bpin`]. Panics if `buffer` was not
/// currently pinned.
pub fn bunpin(buffer: &Buffer) {
	buffer.pins.lock().pop().expect("bunpin: buffer is not pinned");
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::cache::pcache::BlockDeviceOps;
	use crate::memory::buddy::BuddyAllocator;

	struct MemDevice {
		backing: Spinlock<Vec<u8>>,
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
	}

	fn setup() -> Arc<Pcache> {
		let dev = Arc::new(MemDevice {
			backing: Spinlock::new(alloc::vec![0u8; 64 * crate::config::PGSIZE]),
		});
		let buddy = BuddyAllocator::new(256).unwrap();
		Pcache::new(dev, buddy, 4096, 64)
	}

	#[test]
	fn write_then_reread_round_trips() {
		let pcache = setup();
		let buf = bread(&pcache, 0);
		buf.data_mut()[0] = 0x42;
		bwrite(&pcache, &buf).unwrap();
		brelse(&pcache, buf);

		let buf2 = bread(&pcache, 0);
		assert_eq!(buf2.data()[0], 0x42);
		brelse(&pcache, buf2);
	}

	#[test]
	fn pin_keeps_page_resident_across_brelse() {
		let pcache = setup();
		let buf = bread(&pcache, 0);
		bpin(&buf);
		brelse(&pcache, buf.clone());
		assert_eq!(pcache.page_count(), 1);
		bunpin(&buf);
	}
}
