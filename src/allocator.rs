//! In-memory block-usage bitmap and first-available allocator.

use crate::error::{Error, Result};
use log::trace;

/// Tracks which blocks are in use. Never persisted; rebuilt at mount time.
#[derive(Debug)]
pub struct BlockAllocator {
	/// `used[i]` is `true` when block `i` is currently allocated.
	used: Vec<bool>,
	/// First data block index, i.e. `NIB + 1`.
	first_data_block: u32,
}

impl BlockAllocator {
	/// Builds a bitmap for `num_blocks` blocks with the superblock and the
	/// `num_inode_blocks` inode blocks already marked used.
	pub fn new(num_blocks: u32, num_inode_blocks: u32) -> Self {
		let mut used = vec![false; num_blocks as usize];
		for b in used.iter_mut().take(num_inode_blocks as usize + 1) {
			*b = true;
		}
		Self {
			used,
			first_data_block: num_inode_blocks + 1,
		}
	}

	/// Returns the smallest index `>= NIB + 1` with `bitmap = 0`, flips it
	/// to used, and returns it.
	pub fn allocate(&mut self) -> Result<u32> {
		let idx = self.used[self.first_data_block as usize..]
			.iter()
			.position(|&b| !b)
			.map(|i| i as u32 + self.first_data_block)
			.ok_or(Error::OutOfSpace)?;
		self.used[idx as usize] = true;
		trace!("allocated block {idx}");
		Ok(idx)
	}

	/// Clears `used[index]` when it names an in-range data block. A zero
	/// (sentinel) or out-of-range index is silently ignored.
	pub fn free(&mut self, index: u32) {
		if index == 0 {
			return;
		}
		if index >= self.first_data_block && (index as usize) < self.used.len() {
			self.used[index as usize] = false;
			trace!("freed block {index}");
		}
	}

	/// Marks a block used without searching, for use while reconstructing
	/// the bitmap at mount time.
	pub fn reserve(&mut self, index: u32) {
		if (index as usize) < self.used.len() {
			self.used[index as usize] = true;
		}
	}

	/// The bitmap as a plain boolean slice, for comparison in tests
	/// (property 4: bitmap conservation across unmount/remount).
	pub fn snapshot(&self) -> &[bool] {
		&self.used
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn reserves_superblock_and_inode_blocks() {
		let a = BlockAllocator::new(10, 2);
		assert!(a.snapshot()[0..=2].iter().all(|&b| b));
		assert!(a.snapshot()[3..].iter().all(|&b| !b));
	}

	#[test]
	fn allocation_is_ascending() {
		let mut a = BlockAllocator::new(10, 1);
		assert_eq!(a.allocate().unwrap(), 2);
		assert_eq!(a.allocate().unwrap(), 3);
		a.free(2);
		// first-available, not most-recently-freed
		assert_eq!(a.allocate().unwrap(), 2);
	}

	#[test]
	fn out_of_space() {
		let mut a = BlockAllocator::new(3, 1);
		assert_eq!(a.allocate().unwrap(), 2);
		assert!(matches!(a.allocate(), Err(Error::OutOfSpace)));
	}

	#[test]
	fn free_ignores_sentinel_and_out_of_range() {
		let mut a = BlockAllocator::new(5, 1);
		a.free(0);
		a.free(100);
		assert!(a.snapshot().iter().take(2).all(|&b| b));
	}
}
