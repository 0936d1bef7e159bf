//! Translates a file-relative byte offset to a physical block index,
//! optionally allocating intermediate indirect blocks and the data block
//! itself.

use crate::allocator::BlockAllocator;
use crate::error::{Error, Result};
use crate::inode::{Inode, DIRECT_POINTERS};
use crate::vdisk::BlockIO;
use crate::BLOCK_SIZE;

/// Pointers held in one indirect/double-indirect table.
pub const PTRS_PER_BLOCK: usize = BLOCK_SIZE / 4;

/// Highest block index reachable through direct + single + double
/// indirection (`4 + 256 + 256*256 - 1`).
pub const MAX_BLOCK_INDEX: u64 =
	DIRECT_POINTERS as u64 + PTRS_PER_BLOCK as u64 + (PTRS_PER_BLOCK as u64) * (PTRS_PER_BLOCK as u64) - 1;

type Table = [u32; PTRS_PER_BLOCK];

fn read_table(disk: &mut dyn BlockIO, block: u32) -> Result<Table> {
	let mut buf = [0u8; BLOCK_SIZE];
	disk.read_block(block, &mut buf)?;
	let mut table = [0u32; PTRS_PER_BLOCK];
	for (i, slot) in table.iter_mut().enumerate() {
		*slot = u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
	}
	Ok(table)
}

fn write_table(disk: &mut dyn BlockIO, block: u32, table: &Table) -> Result<()> {
	let mut buf = [0u8; BLOCK_SIZE];
	for (i, slot) in table.iter().enumerate() {
		buf[i * 4..i * 4 + 4].copy_from_slice(&slot.to_le_bytes());
	}
	disk.write_block(block, &buf)?;
	Ok(())
}

/// Resolves one pointer slot: if already non-zero, returns it; if zero and
/// `allocate` is false, returns 0 (a hole); if zero and `allocate` is true,
/// allocates a fresh block, zero-fills it on disk, stores it in `slot`, and
/// records it in `reserved` so a later failure in the same call can roll it
/// back.
fn resolve_slot(
	disk: &mut dyn BlockIO,
	alloc: &mut BlockAllocator,
	slot: &mut u32,
	allocate: bool,
	reserved: &mut Vec<u32>,
) -> Result<u32> {
	if *slot != 0 {
		return Ok(*slot);
	}
	if !allocate {
		return Ok(0);
	}
	let block = alloc.allocate()?;
	disk.write_block(block, &[0u8; BLOCK_SIZE])?;
	reserved.push(block);
	*slot = block;
	Ok(block)
}

#[allow(clippy::too_many_arguments)]
fn map_inner(
	disk: &mut dyn BlockIO,
	alloc: &mut BlockAllocator,
	direct: &mut [u32; DIRECT_POINTERS],
	indirect: &mut u32,
	double_indirect: &mut u32,
	bi: u64,
	allocate: bool,
	reserved: &mut Vec<u32>,
) -> Result<u32> {
	if bi < DIRECT_POINTERS as u64 {
		return resolve_slot(disk, alloc, &mut direct[bi as usize], allocate, reserved);
	}
	let bi = bi - DIRECT_POINTERS as u64;

	if bi < PTRS_PER_BLOCK as u64 {
		let indirect_block = resolve_slot(disk, alloc, indirect, allocate, reserved)?;
		if indirect_block == 0 {
			return Ok(0);
		}
		let mut table = read_table(disk, indirect_block)?;
		let result = resolve_slot(disk, alloc, &mut table[bi as usize], allocate, reserved)?;
		if allocate && result != 0 {
			write_table(disk, indirect_block, &table)?;
		}
		return Ok(result);
	}
	let bi = bi - PTRS_PER_BLOCK as u64;

	let double_block = resolve_slot(disk, alloc, double_indirect, allocate, reserved)?;
	if double_block == 0 {
		return Ok(0);
	}
	let mut dtable = read_table(disk, double_block)?;
	let j = (bi / PTRS_PER_BLOCK as u64) as usize;
	let k = (bi % PTRS_PER_BLOCK as u64) as usize;

	let indirect_block = resolve_slot(disk, alloc, &mut dtable[j], allocate, reserved)?;
	if indirect_block == 0 {
		return Ok(0);
	}
	let mut table = read_table(disk, indirect_block)?;
	let result = resolve_slot(disk, alloc, &mut table[k], allocate, reserved)?;
	if allocate {
		// Child (leaf-holding) table persists before the parent pointer to
		// it is committed.
		if result != 0 {
			write_table(disk, indirect_block, &table)?;
		}
		write_table(disk, double_block, &dtable)?;
	}
	Ok(result)
}

/// Resolves `offset` (bytes, relative to the start of the file described by
/// `inode`) to a physical block index, or `0` for a hole.
///
/// On success, any newly-allocated indirect/double-indirect/data blocks are
/// reflected into `inode`'s pointer fields; the caller is responsible for
/// persisting the inode afterwards. On failure `inode` is left unmodified
/// and any block reserved earlier in the same call is returned to `alloc`.
pub fn map(
	disk: &mut dyn BlockIO,
	alloc: &mut BlockAllocator,
	inode: &mut Inode,
	offset: i64,
	allocate: bool,
) -> Result<u32> {
	if offset < 0 {
		return Err(Error::InvalidOffset);
	}
	let bi = offset as u64 / BLOCK_SIZE as u64;
	if bi > MAX_BLOCK_INDEX {
		return Err(Error::InvalidOffset);
	}

	let mut direct = inode.direct;
	let mut indirect = inode.indirect;
	let mut double_indirect = inode.double_indirect;
	let mut reserved = Vec::new();

	let result = map_inner(
		disk,
		alloc,
		&mut direct,
		&mut indirect,
		&mut double_indirect,
		bi,
		allocate,
		&mut reserved,
	);
	match result {
		Ok(block) => {
			inode.direct = direct;
			inode.indirect = indirect;
			inode.double_indirect = double_indirect;
			Ok(block)
		}
		Err(e) => {
			for block in reserved {
				alloc.free(block);
			}
			Err(e)
		}
	}
}
