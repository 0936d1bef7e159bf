//! The storage backend contract and a file-backed implementation of
//! it.
//!
//! The core engine never touches a `File` directly: it only sees a
//! `BlockIO`. This keeps the allocation/addressing logic testable against
//! any backend, with device sizing split out from the code that consumes
//! it.

use crate::BLOCK_SIZE;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Fixed-size block read/write/sync over a backing image.
///
/// Blocks are addressed by a 32-bit index; `close` has no explicit method
/// since Rust's `Drop` already runs it.
pub trait BlockIO {
	/// Reads block `index` into `buf`.
	fn read_block(&mut self, index: u32, buf: &mut [u8; BLOCK_SIZE]) -> io::Result<()>;

	/// Writes `buf` to block `index`.
	fn write_block(&mut self, index: u32, buf: &[u8; BLOCK_SIZE]) -> io::Result<()>;

	/// Flushes buffered writes to durable media.
	fn sync(&mut self) -> io::Result<()>;

	/// The total number of blocks the backend currently holds.
	fn block_count(&self) -> u32;
}

/// A [`BlockIO`] backed by a plain file on the host filesystem.
///
/// `open` creates the file if it is absent. A freshly-created file is
/// extended to `min_blocks` blocks so that a subsequent `format` always has
/// room to write its metadata; an existing file reports its size as-is
/// (rounded down to a whole number of blocks).
pub struct FileDisk {
	file: File,
	block_count: u32,
}

impl FileDisk {
	/// Opens (creating if absent) the image at `path`.
	///
	/// `min_blocks` is only used to size a brand-new file; an existing file
	/// keeps its current size.
	pub fn open(path: &Path, min_blocks: u32) -> io::Result<Self> {
		let existed = path.exists();
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.open(path)?;
		let len = file.metadata()?.len();
		let block_count = if existed {
			(len / BLOCK_SIZE as u64) as u32
		} else {
			file.set_len(min_blocks as u64 * BLOCK_SIZE as u64)?;
			min_blocks
		};
		Ok(Self { file, block_count })
	}
}

impl BlockIO for FileDisk {
	fn read_block(&mut self, index: u32, buf: &mut [u8; BLOCK_SIZE]) -> io::Result<()> {
		self.file.seek(SeekFrom::Start(index as u64 * BLOCK_SIZE as u64))?;
		self.file.read_exact(buf)
	}

	fn write_block(&mut self, index: u32, buf: &[u8; BLOCK_SIZE]) -> io::Result<()> {
		self.file.seek(SeekFrom::Start(index as u64 * BLOCK_SIZE as u64))?;
		self.file.write_all(buf)
	}

	fn sync(&mut self) -> io::Result<()> {
		self.file.sync_all()
	}

	fn block_count(&self) -> u32 {
		self.block_count
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn create_sizes_new_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("image.bin");
		let disk = FileDisk::open(&path, 16).unwrap();
		assert_eq!(disk.block_count(), 16);
		assert_eq!(std::fs::metadata(&path).unwrap().len(), 16 * BLOCK_SIZE as u64);
	}

	#[test]
	fn reopen_keeps_existing_size() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("image.bin");
		{
			FileDisk::open(&path, 16).unwrap();
		}
		let disk = FileDisk::open(&path, 4).unwrap();
		assert_eq!(disk.block_count(), 16);
	}

	#[test]
	fn read_write_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("image.bin");
		let mut disk = FileDisk::open(&path, 4).unwrap();
		let mut block = [0u8; BLOCK_SIZE];
		block[0] = 0xaa;
		block[BLOCK_SIZE - 1] = 0x55;
		disk.write_block(2, &block).unwrap();
		let mut readback = [0u8; BLOCK_SIZE];
		disk.read_block(2, &mut readback).unwrap();
		assert_eq!(block, readback);
	}
}
