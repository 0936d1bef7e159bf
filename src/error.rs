//! Error kinds surfaced by the core engine.
//!
//! Every fallible operation returns [`Error`], whose variants map onto the
//! stable negative codes of the external command surface via [`Error::code`].

use std::io;
use thiserror::Error;

/// An error produced by the filesystem engine.
#[derive(Error, Debug)]
pub enum Error {
	/// `mount`/`format` attempted while a volume is already mounted.
	#[error("a disk is already mounted")]
	DiskAlreadyMounted,
	/// A file operation or `unmount` attempted while no volume is mounted.
	#[error("no disk is mounted")]
	DiskNotMounted,
	/// The superblock magic did not match on mount.
	#[error("corrupt image: bad superblock magic")]
	CorruptImage,
	/// An inode number was out of range, or referred to a free slot.
	#[error("invalid inode")]
	InvalidInode,
	/// A negative offset, or one beyond the addressable range of a file.
	#[error("invalid offset")]
	InvalidOffset,
	/// No free data block (or insufficient blocks at format time).
	#[error("out of space")]
	OutOfSpace,
	/// No free inode slot remains.
	#[error("out of inodes")]
	OutOfInodes,
	/// The storage backend reported a failure.
	#[error("backend error: {0}")]
	BackendError(#[from] io::Error),
}

impl Error {
	/// Returns the stable negative sentinel for this error kind.
	///
	/// Values are part of the external contract and must never be
	/// renumbered once assigned.
	pub fn code(&self) -> i32 {
		match self {
			Error::DiskAlreadyMounted => -1,
			Error::DiskNotMounted => -2,
			Error::CorruptImage => -3,
			Error::InvalidInode => -4,
			Error::InvalidOffset => -5,
			Error::OutOfSpace => -6,
			Error::OutOfInodes => -7,
			Error::BackendError(_) => -8,
		}
	}
}

/// A `Result` defaulting its error to the engine's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
