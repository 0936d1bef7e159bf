//! Volume lifecycle: format, mount, unmount.

use crate::allocator::BlockAllocator;
use crate::error::{Error, Result};
use crate::inode::{self, Inode, INODES_PER_BLOCK};
use crate::offset::PTRS_PER_BLOCK;
use crate::superblock::Superblock;
use crate::vdisk::{BlockIO, FileDisk};
use crate::BLOCK_SIZE;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

/// A mounted (or not-yet-mounted) filesystem image.
///
/// Bundles the backend handle, the bitmap, and the image path into one
/// value owned by the caller instead of process-wide globals. All file
/// operations require [`Volume::mounted`] to hold `Some`.
pub struct Volume {
	state: Option<Mounted>,
}

struct Mounted {
	disk: Box<dyn BlockIO>,
	alloc: BlockAllocator,
	num_inode_blocks: u32,
	num_inodes: u32,
	path: PathBuf,
}

impl Default for Volume {
	fn default() -> Self {
		Self::new()
	}
}

impl Volume {
	/// Returns a fresh, unmounted volume handle.
	pub fn new() -> Self {
		Self { state: None }
	}

	/// Whether a disk is currently mounted.
	pub fn is_mounted(&self) -> bool {
		self.state.is_some()
	}

	fn mounted(&mut self) -> Result<&mut Mounted> {
		self.state.as_mut().ok_or(Error::DiskNotMounted)
	}

	/// Creates a new filesystem image at `path` with room for `inodes`
	/// inodes (coerced to at least 1).
	///
	/// Requires the volume not be mounted. Writes the superblock and
	/// `NIB` zeroed inode blocks; does not scrub data blocks.
	pub fn format(&mut self, path: &Path, inodes: u32) -> Result<()> {
		if self.is_mounted() {
			return Err(Error::DiskAlreadyMounted);
		}
		let inodes = inodes.max(1);
		let num_inode_blocks = inodes.div_ceil(INODES_PER_BLOCK);

		let mut disk = FileDisk::open(path, num_inode_blocks + 2)?;
		let num_blocks = disk.block_count();
		if num_blocks <= num_inode_blocks + 1 {
			return Err(Error::OutOfSpace);
		}

		let sb = Superblock {
			num_blocks,
			num_inode_blocks,
			block_size: BLOCK_SIZE as u32,
			num_inodes: inodes,
		};
		disk.write_block(0, &sb.encode())?;
		for b in 1..=num_inode_blocks {
			disk.write_block(b, &[0u8; BLOCK_SIZE])?;
		}
		disk.sync()?;
		info!(
			"formatted {} ({num_blocks} blocks, {num_inode_blocks} inode blocks, {inodes} inodes)",
			path.display()
		);
		Ok(())
	}

	/// Mounts the image at `path`: verifies the magic and reconstructs the
	/// block bitmap by scanning every inode's pointer tree.
	pub fn mount(&mut self, path: &Path) -> Result<()> {
		if self.is_mounted() {
			return Err(Error::DiskAlreadyMounted);
		}
		if !path.exists() {
			return Err(Error::BackendError(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("{}: no such image", path.display()),
			)));
		}
		let mut disk = FileDisk::open(path, 1)?;
		let mut buf = [0u8; BLOCK_SIZE];
		disk.read_block(0, &mut buf)?;
		let sb = Superblock::decode(&buf)?;

		let mut alloc = BlockAllocator::new(sb.num_blocks, sb.num_inode_blocks);
		for i in 0..sb.num_inode_blocks * INODES_PER_BLOCK {
			let node = inode::read_inode(&mut disk, sb.num_inode_blocks, i)?;
			if !node.valid {
				continue;
			}
			reserve_tree(&mut disk, &mut alloc, &node)?;
		}

		self.state = Some(Mounted {
			disk: Box::new(disk),
			alloc,
			num_inode_blocks: sb.num_inode_blocks,
			num_inodes: sb.num_inodes,
			path: path.to_path_buf(),
		});
		info!("mounted {}", path.display());
		Ok(())
	}

	/// Unmounts the current volume: syncs the backend, then releases all
	/// in-memory state regardless of whether the sync itself failed.
	pub fn unmount(&mut self) -> Result<()> {
		let mounted = self.mounted()?;
		let path = mounted.path.clone();
		let result = mounted.disk.sync().map_err(Error::BackendError);
		self.state = None;
		if let Err(ref e) = result {
			warn!("sync failed while unmounting {}: {e}", path.display());
		} else {
			info!("unmounted {}", path.display());
		}
		result
	}

	/// Creates a new inode: allocates the first free slot in numerical
	/// order and marks it valid. Fails with [`Error::OutOfInodes`] once
	/// the format-time inode count is exhausted, even if the physical
	/// inode region has unused slots past that count.
	pub fn create(&mut self) -> Result<u32> {
		let m = self.mounted()?;
		for i in 0..m.num_inodes {
			let node = inode::read_inode(m.disk.as_mut(), m.num_inode_blocks, i)?;
			if !node.valid {
				inode::write_inode(
					m.disk.as_mut(),
					m.num_inode_blocks,
					i,
					&Inode {
						valid: true,
						..Inode::free()
					},
				)?;
				debug!("created inode {i}");
				return Ok(i);
			}
		}
		Err(Error::OutOfInodes)
	}

	/// Returns the size, in bytes, of inode `i`.
	pub fn stat(&mut self, i: u32) -> Result<u32> {
		let m = self.mounted()?;
		crate::file::stat(m.disk.as_mut(), m.num_inode_blocks, i)
	}

	/// Reads up to `len` bytes of inode `i` at `offset` into `buf`.
	pub fn read(&mut self, i: u32, buf: &mut [u8], len: usize, offset: i64) -> Result<usize> {
		let m = self.mounted()?;
		crate::file::read(m.disk.as_mut(), m.num_inode_blocks, i, buf, len, offset)
	}

	/// Writes `len` bytes from `buf` into inode `i` at `offset`.
	pub fn write(&mut self, i: u32, buf: &[u8], len: usize, offset: i64) -> Result<usize> {
		let m = self.mounted()?;
		crate::file::write(m.disk.as_mut(), &mut m.alloc, m.num_inode_blocks, i, buf, len, offset)
	}

	/// Deletes inode `i`, releasing every block reachable from its tree.
	pub fn delete(&mut self, i: u32) -> Result<()> {
		let m = self.mounted()?;
		crate::file::delete(m.disk.as_mut(), &mut m.alloc, m.num_inode_blocks, i)
	}

	/// A snapshot of the current block-usage bitmap, for testing bitmap
	/// conservation across unmount/remount.
	#[cfg(test)]
	fn bitmap_snapshot(&mut self) -> Result<Vec<bool>> {
		Ok(self.mounted()?.alloc.snapshot().to_vec())
	}
}

/// Reserves every block reachable from a valid inode's pointer tree, for
/// bitmap reconstruction at mount time.
fn reserve_tree(disk: &mut dyn BlockIO, alloc: &mut BlockAllocator, node: &Inode) -> Result<()> {
	for &ptr in &node.direct {
		if ptr != 0 {
			alloc.reserve(ptr);
		}
	}
	if node.indirect != 0 {
		reserve_indirect(disk, alloc, node.indirect)?;
	}
	if node.double_indirect != 0 {
		alloc.reserve(node.double_indirect);
		let mut buf = [0u8; BLOCK_SIZE];
		disk.read_block(node.double_indirect, &mut buf)?;
		for slot in 0..PTRS_PER_BLOCK {
			let ptr = u32::from_le_bytes(buf[slot * 4..slot * 4 + 4].try_into().unwrap());
			if ptr != 0 {
				reserve_indirect(disk, alloc, ptr)?;
			}
		}
	}
	Ok(())
}

fn reserve_indirect(disk: &mut dyn BlockIO, alloc: &mut BlockAllocator, indirect: u32) -> Result<()> {
	alloc.reserve(indirect);
	let mut buf = [0u8; BLOCK_SIZE];
	disk.read_block(indirect, &mut buf)?;
	for slot in 0..PTRS_PER_BLOCK {
		let ptr = u32::from_le_bytes(buf[slot * 4..slot * 4 + 4].try_into().unwrap());
		if ptr != 0 {
			alloc.reserve(ptr);
		}
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	fn image_path(dir: &tempfile::TempDir) -> PathBuf {
		dir.path().join("image.ssfs")
	}

	#[test]
	fn format_and_inode_exhaustion() {
		let dir = tempfile::tempdir().unwrap();
		let path = image_path(&dir);
		// Pre-size the image to 10 blocks.
		std::fs::write(&path, vec![0u8; 10 * BLOCK_SIZE]).unwrap();
		let mut v = Volume::new();
		v.format(&path, 2).unwrap();

		let raw = std::fs::read(&path).unwrap();
		assert_eq!(raw.len(), 10 * BLOCK_SIZE);
		assert_eq!(&raw[0..16], &crate::superblock::MAGIC);
		assert!(raw[BLOCK_SIZE..2 * BLOCK_SIZE].iter().all(|&b| b == 0));

		v.mount(&path).unwrap();
		assert_eq!(v.create().unwrap(), 0);
		assert_eq!(v.create().unwrap(), 1);
		assert!(matches!(v.create(), Err(Error::OutOfInodes)));
	}

	#[test]
	fn basic_read_write() {
		let dir = tempfile::tempdir().unwrap();
		let path = image_path(&dir);
		let mut v = Volume::new();
		v.format(&path, 10).unwrap();
		v.mount(&path).unwrap();
		let i = v.create().unwrap();
		let n = v.write(i, b"Hello, world!", 13, 0).unwrap();
		assert_eq!(n, 13);
		assert_eq!(v.stat(i).unwrap(), 13);
		let mut buf = [0u8; 13];
		v.read(i, &mut buf, 13, 0).unwrap();
		assert_eq!(&buf, b"Hello, world!");
	}

	#[test]
	fn persistence_across_remount() {
		let dir = tempfile::tempdir().unwrap();
		let path = image_path(&dir);
		let mut v = Volume::new();
		v.format(&path, 10).unwrap();
		v.mount(&path).unwrap();
		let i = v.create().unwrap();
		v.write(i, b"durable bytes", 13, 0).unwrap();
		v.unmount().unwrap();

		v.mount(&path).unwrap();
		assert_eq!(v.stat(i).unwrap(), 13);
		let mut buf = [0u8; 13];
		v.read(i, &mut buf, 13, 0).unwrap();
		assert_eq!(&buf, b"durable bytes");
	}

	#[test]
	fn bitmap_conservation_across_remount() {
		let dir = tempfile::tempdir().unwrap();
		let path = image_path(&dir);
		let mut v = Volume::new();
		v.format(&path, 10).unwrap();
		v.mount(&path).unwrap();
		let i = v.create().unwrap();
		v.write(i, b"some data that spans a couple blocks", 37, 0).unwrap();
		let before = v.bitmap_snapshot().unwrap();
		v.unmount().unwrap();

		v.mount(&path).unwrap();
		let after = v.bitmap_snapshot().unwrap();
		assert_eq!(before, after);
	}

	#[test]
	fn inode_recycle_returns_smallest_free() {
		let dir = tempfile::tempdir().unwrap();
		let path = image_path(&dir);
		let mut v = Volume::new();
		v.format(&path, 10).unwrap();
		v.mount(&path).unwrap();
		let a = v.create().unwrap();
		let _b = v.create().unwrap();
		v.delete(a).unwrap();
		assert_eq!(v.create().unwrap(), a);
	}

	#[test]
	fn state_machine_violations() {
		let dir = tempfile::tempdir().unwrap();
		let path = image_path(&dir);
		let mut v = Volume::new();
		assert!(matches!(v.stat(0), Err(Error::DiskNotMounted)));
		assert!(matches!(v.unmount(), Err(Error::DiskNotMounted)));

		v.format(&path, 2).unwrap();
		v.mount(&path).unwrap();
		assert!(matches!(v.mount(&path), Err(Error::DiskAlreadyMounted)));
		assert!(matches!(v.format(&path, 2), Err(Error::DiskAlreadyMounted)));
	}

	#[test]
	fn corrupt_image_rejected_on_mount() {
		let dir = tempfile::tempdir().unwrap();
		let path = image_path(&dir);
		std::fs::write(&path, vec![0u8; 10 * BLOCK_SIZE]).unwrap();
		let mut v = Volume::new();
		assert!(matches!(v.mount(&path), Err(Error::CorruptImage)));
	}
}
