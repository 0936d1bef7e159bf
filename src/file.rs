//! stat/read/write/delete over inodes, built on [`crate::offset`] and
//! [`crate::allocator`].

use crate::allocator::BlockAllocator;
use crate::error::{Error, Result};
use crate::inode::{self, Inode};
use crate::offset::{self, PTRS_PER_BLOCK};
use crate::vdisk::BlockIO;
use crate::BLOCK_SIZE;
use log::{debug, warn};

/// Returns the size, in bytes, of inode `i`.
///
/// Fails with [`Error::InvalidInode`] when the inode is free.
pub fn stat(disk: &mut dyn BlockIO, nib: u32, i: u32) -> Result<u32> {
	let inode = inode::read_inode(disk, nib, i)?;
	if !inode.valid {
		return Err(Error::InvalidInode);
	}
	Ok(inode.size)
}

/// Reads up to `len` bytes of inode `i` starting at `offset` into `buf`,
/// returning the number of bytes actually copied.
///
/// `buf` must be at least `len` bytes. Holes read back as zeros without
/// touching the backend.
pub fn read(
	disk: &mut dyn BlockIO,
	nib: u32,
	i: u32,
	buf: &mut [u8],
	len: usize,
	offset: i64,
) -> Result<usize> {
	if offset < 0 {
		return Err(Error::InvalidOffset);
	}
	let inode = inode::read_inode(disk, nib, i)?;
	if !inode.valid {
		return Err(Error::InvalidInode);
	}
	let size = inode.size as i64;
	let effective = (len as i64).min((size - offset).max(0)).max(0) as usize;
	if effective == 0 {
		return Ok(0);
	}

	let mut done = 0usize;
	let mut alloc_unused = unused_allocator();
	let mut inode_scratch = inode;
	while done < effective {
		let cur = offset + done as i64;
		let block_off = (cur % BLOCK_SIZE as i64) as usize;
		let chunk = (BLOCK_SIZE - block_off).min(effective - done);
		let block = match offset::map(disk, &mut alloc_unused, &mut inode_scratch, cur, false) {
			Ok(b) => b,
			Err(e) => {
				return if done > 0 { Ok(done) } else { Err(e) };
			}
		};
		if block == 0 {
			buf[done..done + chunk].fill(0);
		} else {
			let mut block_buf = [0u8; BLOCK_SIZE];
			match disk.read_block(block, &mut block_buf) {
				Ok(()) => {
					buf[done..done + chunk].copy_from_slice(&block_buf[block_off..block_off + chunk]);
				}
				Err(e) => {
					return if done > 0 {
						Ok(done)
					} else {
						Err(Error::BackendError(e))
					};
				}
			}
		}
		done += chunk;
	}
	Ok(done)
}

/// A [`BlockAllocator`] sized to `0`, used by `read` which must never
/// allocate — `offset::map` requires one as an argument but `allocate` is
/// always `false` on this path.
fn unused_allocator() -> BlockAllocator {
	BlockAllocator::new(0, 0)
}

/// Writes `len` bytes from `buf` into inode `i` starting at `offset`,
/// zero-filling any gap between the current size and `offset` first.
///
/// Returns the number of bytes actually persisted. On partial failure the
/// inode's size is updated to reflect what was persisted and a short count
/// is returned instead of propagating the error, unless zero bytes were
/// written at all.
pub fn write(
	disk: &mut dyn BlockIO,
	alloc: &mut BlockAllocator,
	nib: u32,
	i: u32,
	buf: &[u8],
	len: usize,
	offset: i64,
) -> Result<usize> {
	if offset < 0 {
		return Err(Error::InvalidOffset);
	}
	let mut inode = inode::read_inode(disk, nib, i)?;
	if !inode.valid {
		return Err(Error::InvalidInode);
	}

	if offset as u64 > inode.size as u64 {
		let (reached, result) = zero_fill(disk, alloc, &mut inode, offset as u64);
		inode.size = reached as u32;
		if let Err(e) = result {
			inode::write_inode(disk, nib, i, &inode)?;
			return Err(e);
		}
	}

	let mut done = 0usize;
	while done < len {
		let cur = offset + done as i64;
		let block_off = (cur % BLOCK_SIZE as i64) as usize;
		let chunk = (BLOCK_SIZE - block_off).min(len - done);
		let freshly_allocated_before = is_hole(disk, &inode, cur)?;

		let block = match offset::map(disk, alloc, &mut inode, cur, true) {
			Ok(b) => b,
			Err(e) => {
				warn!("write on inode {i} short-circuited at {done} bytes: {e}");
				return finish_short(disk, nib, i, &mut inode, offset, done, e);
			}
		};

		let mut block_buf = [0u8; BLOCK_SIZE];
		let full_block = block_off == 0 && chunk == BLOCK_SIZE;
		if !freshly_allocated_before && !full_block {
			if let Err(e) = disk.read_block(block, &mut block_buf) {
				return finish_short(disk, nib, i, &mut inode, offset, done, Error::BackendError(e));
			}
		}
		block_buf[block_off..block_off + chunk].copy_from_slice(&buf[done..done + chunk]);
		if let Err(e) = disk.write_block(block, &block_buf) {
			return finish_short(disk, nib, i, &mut inode, offset, done, Error::BackendError(e));
		}
		done += chunk;
	}

	let new_size = (offset as u64 + done as u64).max(inode.size as u64);
	inode.size = new_size as u32;
	inode::write_inode(disk, nib, i, &inode)?;
	debug!("wrote {done} bytes to inode {i} at offset {offset}, new size {}", inode.size);
	Ok(done)
}

/// Tells whether the block backing `offset` in `inode` does not exist yet
/// (a hole), without allocating it — used to skip the read-modify-write
/// step for freshly-allocated blocks, whose contents are already known to
/// be zero.
fn is_hole(disk: &mut dyn BlockIO, inode: &Inode, offset: i64) -> Result<bool> {
	let mut probe = BlockAllocator::new(0, 0);
	let mut scratch = *inode;
	Ok(offset::map(disk, &mut probe, &mut scratch, offset, false)? == 0)
}

fn finish_short(
	disk: &mut dyn BlockIO,
	nib: u32,
	i: u32,
	inode: &mut Inode,
	offset: i64,
	done: usize,
	err: Error,
) -> Result<usize> {
	if done == 0 {
		return Err(err);
	}
	inode.size = (offset as u64 + done as u64).max(inode.size as u64) as u32;
	inode::write_inode(disk, nib, i, inode)?;
	Ok(done)
}

/// Zero-fills `[inode.size, target)` by allocating the blocks that fall in
/// that range and writing zeros to the newly-covered suffix of the last
/// pre-existing block and to any newly allocated blocks.
///
/// Returns the offset reached (which becomes the inode's interim size) and
/// the result of the attempt, so a mid-way allocation failure can still
/// report persisted progress instead of losing it.
fn zero_fill(
	disk: &mut dyn BlockIO,
	alloc: &mut BlockAllocator,
	inode: &mut Inode,
	target: u64,
) -> (u64, Result<()>) {
	let mut pos = inode.size as u64;
	while pos < target {
		let block_off = (pos % BLOCK_SIZE as u64) as usize;
		let chunk = (BLOCK_SIZE - block_off).min((target - pos) as usize);
		let was_hole = match is_hole(disk, inode, pos as i64) {
			Ok(h) => h,
			Err(e) => return (pos, Err(e)),
		};
		let block = match offset::map(disk, alloc, inode, pos as i64, true) {
			Ok(b) => b,
			Err(e) => return (pos, Err(e)),
		};
		if !was_hole {
			// Existing block gets its newly-covered suffix zeroed; a
			// freshly allocated block is already zero-filled by `map`.
			let mut block_buf = [0u8; BLOCK_SIZE];
			if let Err(e) = disk.read_block(block, &mut block_buf) {
				return (pos, Err(Error::BackendError(e)));
			}
			block_buf[block_off..block_off + chunk].fill(0);
			if let Err(e) = disk.write_block(block, &block_buf) {
				return (pos, Err(Error::BackendError(e)));
			}
		}
		pos += chunk as u64;
	}
	(pos, Ok(()))
}

/// Deletes inode `i`: releases every block reachable from its pointer tree
/// and marks the slot free.
pub fn delete(disk: &mut dyn BlockIO, alloc: &mut BlockAllocator, nib: u32, i: u32) -> Result<()> {
	let inode = inode::read_inode(disk, nib, i)?;
	if !inode.valid {
		return Err(Error::InvalidInode);
	}

	for &ptr in &inode.direct {
		alloc.free(ptr);
	}
	if inode.indirect != 0 {
		free_indirect(disk, alloc, inode.indirect)?;
	}
	if inode.double_indirect != 0 {
		let mut buf = [0u8; BLOCK_SIZE];
		disk.read_block(inode.double_indirect, &mut buf)?;
		for slot in 0..PTRS_PER_BLOCK {
			let ptr = u32::from_le_bytes(buf[slot * 4..slot * 4 + 4].try_into().unwrap());
			if ptr != 0 {
				free_indirect(disk, alloc, ptr)?;
			}
		}
		alloc.free(inode.double_indirect);
	}

	inode::write_inode(disk, nib, i, &Inode::free())?;
	debug!("deleted inode {i}");
	Ok(())
}

fn free_indirect(disk: &mut dyn BlockIO, alloc: &mut BlockAllocator, indirect: u32) -> Result<()> {
	let mut buf = [0u8; BLOCK_SIZE];
	disk.read_block(indirect, &mut buf)?;
	for slot in 0..PTRS_PER_BLOCK {
		let ptr = u32::from_le_bytes(buf[slot * 4..slot * 4 + 4].try_into().unwrap());
		alloc.free(ptr);
	}
	alloc.free(indirect);
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::vdisk::FileDisk;

	fn setup(blocks: u32, nib: u32) -> (tempfile::TempDir, FileDisk, BlockAllocator) {
		let dir = tempfile::tempdir().unwrap();
		let disk = FileDisk::open(&dir.path().join("img"), blocks).unwrap();
		let alloc = BlockAllocator::new(blocks, nib);
		(dir, disk, alloc)
	}

	fn new_inode(disk: &mut dyn BlockIO, nib: u32, i: u32) {
		inode::write_inode(
			disk,
			nib,
			i,
			&Inode {
				valid: true,
				..Inode::free()
			},
		)
		.unwrap();
	}

	#[test]
	fn round_trip_simple() {
		let (_dir, mut disk, mut alloc) = setup(200, 1);
		new_inode(&mut disk, 1, 0);
		let data = b"Hello, world!";
		let n = write(&mut disk, &mut alloc, 1, 0, data, data.len(), 0).unwrap();
		assert_eq!(n, data.len());
		assert_eq!(stat(&mut disk, 1, 0).unwrap(), data.len() as u32);
		let mut buf = vec![0u8; data.len()];
		let r = read(&mut disk, 1, 0, &mut buf, data.len(), 0).unwrap();
		assert_eq!(r, data.len());
		assert_eq!(&buf, data);
	}

	#[test]
	fn sparse_write_reads_zero_gap() {
		let (_dir, mut disk, mut alloc) = setup(400, 1);
		new_inode(&mut disk, 1, 0);
		write(&mut disk, &mut alloc, 1, 0, b"Start of file", 13, 0).unwrap();
		write(&mut disk, &mut alloc, 1, 0, b"Middle of file", 14, 10000).unwrap();
		write(&mut disk, &mut alloc, 1, 0, b"End of file", 11, 20000).unwrap();
		assert_eq!(stat(&mut disk, 1, 0).unwrap(), 20011);

		let mut buf = [0u8; 13];
		read(&mut disk, 1, 0, &mut buf, 13, 0).unwrap();
		assert_eq!(&buf, b"Start of file");

		let mut buf = [0u8; 14];
		read(&mut disk, 1, 0, &mut buf, 14, 10000).unwrap();
		assert_eq!(&buf, b"Middle of file");

		let mut buf = [0xffu8; 10];
		let r = read(&mut disk, 1, 0, &mut buf, 10, 100).unwrap();
		assert_eq!(r, 10);
		assert_eq!(buf, [0u8; 10]);
	}

	#[test]
	fn overwrite_partial_block() {
		let (_dir, mut disk, mut alloc) = setup(200, 1);
		new_inode(&mut disk, 1, 0);
		let original = b"Initial content that will be partially overwritten";
		write(&mut disk, &mut alloc, 1, 0, original, original.len(), 0).unwrap();
		write(&mut disk, &mut alloc, 1, 0, b"content which overwrites", 24, 8).unwrap();

		let mut buf = vec![0u8; original.len()];
		read(&mut disk, 1, 0, &mut buf, original.len(), 0).unwrap();
		assert_eq!(&buf, b"Initial content which overwritestially overwritten");
	}

	#[test]
	fn delete_frees_blocks_for_reuse() {
		let (_dir, mut disk, mut alloc) = setup(20, 1);
		new_inode(&mut disk, 1, 0);
		write(&mut disk, &mut alloc, 1, 0, b"data", 4, 0).unwrap();
		delete(&mut disk, &mut alloc, 1, 0).unwrap();
		assert!(matches!(stat(&mut disk, 1, 0), Err(Error::InvalidInode)));
		// The freed block is available again.
		let freed_again = alloc.allocate().unwrap();
		assert_eq!(freed_again, 2);
	}

	#[test]
	fn disk_full_returns_short_count() {
		// NIB=1 -> 1 inode block; 10 total blocks -> 8 data blocks (2..=9).
		let (_dir, mut disk, mut alloc) = setup(10, 1);
		new_inode(&mut disk, 1, 0);
		let data = vec![b'x'; 9 * 1024];
		let n = write(&mut disk, &mut alloc, 1, 0, &data, data.len(), 0).unwrap();
		assert_eq!(n, 8 * 1024);
		assert_eq!(stat(&mut disk, 1, 0).unwrap(), 8 * 1024);
	}
}
