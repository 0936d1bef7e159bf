//! Encode/decode of the superblock stored in block 0.

use crate::error::{Error, Result};
use crate::BLOCK_SIZE;

/// Exact 16-byte magic literal expected at the start of block 0.
pub const MAGIC: [u8; 16] = [
	0xF0, 0x55, 0x4C, 0x49, 0x45, 0x47, 0x45, 0x49, 0x4E, 0x46, 0x4F, 0x30, 0x39, 0x34, 0x30, 0x0F,
];

/// The geometry fields persisted in block 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
	/// Total block count `N`.
	pub num_blocks: u32,
	/// Number of inode blocks `NIB`.
	pub num_inode_blocks: u32,
	/// Block size in bytes. Stored but not checked against `BLOCK_SIZE` on
	/// mount.
	pub block_size: u32,
	/// Number of inodes requested at format time, which may be fewer than
	/// `num_inode_blocks * INODES_PER_BLOCK` rounds up to. `create` is
	/// bounded by this count, not by the physical inode region.
	pub num_inodes: u32,
}

impl Superblock {
	/// Encodes the superblock into a zero-padded block-sized buffer.
	pub fn encode(&self) -> [u8; BLOCK_SIZE] {
		let mut buf = [0u8; BLOCK_SIZE];
		buf[0..16].copy_from_slice(&MAGIC);
		buf[16..20].copy_from_slice(&self.num_blocks.to_le_bytes());
		buf[20..24].copy_from_slice(&self.num_inode_blocks.to_le_bytes());
		buf[24..28].copy_from_slice(&self.block_size.to_le_bytes());
		buf[28..32].copy_from_slice(&self.num_inodes.to_le_bytes());
		buf
	}

	/// Decodes a superblock from block 0's contents.
	///
	/// Fails with [`Error::CorruptImage`] when the magic does not compare
	/// exactly.
	pub fn decode(buf: &[u8; BLOCK_SIZE]) -> Result<Self> {
		if buf[0..16] != MAGIC {
			return Err(Error::CorruptImage);
		}
		let num_blocks = u32::from_le_bytes(buf[16..20].try_into().unwrap());
		let num_inode_blocks = u32::from_le_bytes(buf[20..24].try_into().unwrap());
		let block_size = u32::from_le_bytes(buf[24..28].try_into().unwrap());
		let num_inodes = u32::from_le_bytes(buf[28..32].try_into().unwrap());
		Ok(Self {
			num_blocks,
			num_inode_blocks,
			block_size,
			num_inodes,
		})
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn round_trip() {
		let sb = Superblock {
			num_blocks: 100,
			num_inode_blocks: 3,
			block_size: BLOCK_SIZE as u32,
			num_inodes: 64,
		};
		let buf = sb.encode();
		assert_eq!(&buf[0..16], &MAGIC);
		let decoded = Superblock::decode(&buf).unwrap();
		assert_eq!(sb, decoded);
	}

	#[test]
	fn tail_is_zero_padded() {
		let sb = Superblock {
			num_blocks: 1,
			num_inode_blocks: 1,
			block_size: BLOCK_SIZE as u32,
			num_inodes: 1,
		};
		let buf = sb.encode();
		assert!(buf[32..].iter().all(|&b| b == 0));
	}

	#[test]
	fn bad_magic_is_corrupt() {
		let mut buf = [0u8; BLOCK_SIZE];
		buf[0] = 0xff;
		assert!(matches!(Superblock::decode(&buf), Err(Error::CorruptImage)));
	}
}
