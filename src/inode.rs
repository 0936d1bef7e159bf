//! The 32-byte inode record and its codec.

use crate::error::{Error, Result};
use crate::vdisk::BlockIO;
use crate::BLOCK_SIZE;

/// Size in bytes of one on-disk inode record.
pub const INODE_SIZE: usize = 32;
/// Inodes packed per inode block.
pub const INODES_PER_BLOCK: u32 = (BLOCK_SIZE / INODE_SIZE) as u32;

/// Number of direct block pointers held in an inode.
pub const DIRECT_POINTERS: usize = 4;

/// An in-memory view of one inode record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Inode {
	/// `false` for a free slot.
	pub valid: bool,
	/// File length in bytes.
	pub size: u32,
	/// Direct data block pointers; 0 means "none" (a hole).
	pub direct: [u32; DIRECT_POINTERS],
	/// Single-indirect table pointer; 0 means "none".
	pub indirect: u32,
	/// Double-indirect table pointer; 0 means "none".
	pub double_indirect: u32,
}

impl Inode {
	/// Returns a fresh, free (invalid) inode.
	pub fn free() -> Self {
		Self::default()
	}

	fn encode(&self) -> [u8; INODE_SIZE] {
		let mut buf = [0u8; INODE_SIZE];
		buf[0] = self.valid as u8;
		buf[1..5].copy_from_slice(&self.size.to_le_bytes());
		for (i, ptr) in self.direct.iter().enumerate() {
			let off = 5 + i * 4;
			buf[off..off + 4].copy_from_slice(&ptr.to_le_bytes());
		}
		buf[21..25].copy_from_slice(&self.indirect.to_le_bytes());
		buf[25..29].copy_from_slice(&self.double_indirect.to_le_bytes());
		// buf[29..32] stays zero padding.
		buf
	}

	fn decode(buf: &[u8; INODE_SIZE]) -> Self {
		let mut direct = [0u32; DIRECT_POINTERS];
		for (i, ptr) in direct.iter_mut().enumerate() {
			let off = 5 + i * 4;
			*ptr = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
		}
		Self {
			valid: buf[0] != 0,
			size: u32::from_le_bytes(buf[1..5].try_into().unwrap()),
			direct,
			indirect: u32::from_le_bytes(buf[21..25].try_into().unwrap()),
			double_indirect: u32::from_le_bytes(buf[25..29].try_into().unwrap()),
		}
	}
}

/// Returns the inode block and in-block byte offset for inode number `i`.
fn locate(nib: u32, i: u32) -> Result<(u32, usize)> {
	if i >= nib * INODES_PER_BLOCK {
		return Err(Error::InvalidInode);
	}
	let block = 1 + i / INODES_PER_BLOCK;
	let offset = (i % INODES_PER_BLOCK) as usize * INODE_SIZE;
	Ok((block, offset))
}

/// Reads inode `i` out of the inode region.
///
/// Fails with [`Error::InvalidInode`] when `i >= NIB * 32`.
pub fn read_inode(disk: &mut dyn BlockIO, nib: u32, i: u32) -> Result<Inode> {
	let (block, offset) = locate(nib, i)?;
	let mut buf = [0u8; BLOCK_SIZE];
	disk.read_block(block, &mut buf)?;
	let record: [u8; INODE_SIZE] = buf[offset..offset + INODE_SIZE].try_into().unwrap();
	Ok(Inode::decode(&record))
}

/// Writes inode `i`, read-modify-write so the other 31 inodes in the block
/// are preserved.
pub fn write_inode(disk: &mut dyn BlockIO, nib: u32, i: u32, inode: &Inode) -> Result<()> {
	let (block, offset) = locate(nib, i)?;
	let mut buf = [0u8; BLOCK_SIZE];
	disk.read_block(block, &mut buf)?;
	buf[offset..offset + INODE_SIZE].copy_from_slice(&inode.encode());
	disk.write_block(block, &buf)?;
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::vdisk::FileDisk;

	#[test]
	fn round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let mut disk = FileDisk::open(&dir.path().join("img"), 4).unwrap();
		let inode = Inode {
			valid: true,
			size: 1234,
			direct: [5, 6, 0, 0],
			indirect: 7,
			double_indirect: 0,
		};
		write_inode(&mut disk, 1, 3, &inode).unwrap();
		let back = read_inode(&mut disk, 1, 3).unwrap();
		assert_eq!(inode, back);
	}

	#[test]
	fn preserves_siblings_in_block() {
		let dir = tempfile::tempdir().unwrap();
		let mut disk = FileDisk::open(&dir.path().join("img"), 4).unwrap();
		let a = Inode {
			valid: true,
			size: 1,
			..Inode::free()
		};
		let b = Inode {
			valid: true,
			size: 2,
			..Inode::free()
		};
		write_inode(&mut disk, 1, 0, &a).unwrap();
		write_inode(&mut disk, 1, 1, &b).unwrap();
		assert_eq!(read_inode(&mut disk, 1, 0).unwrap(), a);
		assert_eq!(read_inode(&mut disk, 1, 1).unwrap(), b);
	}

	#[test]
	fn out_of_range_is_invalid() {
		let dir = tempfile::tempdir().unwrap();
		let mut disk = FileDisk::open(&dir.path().join("img"), 4).unwrap();
		assert!(matches!(
			read_inode(&mut disk, 1, 32),
			Err(Error::InvalidInode)
		));
	}
}
