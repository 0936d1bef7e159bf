//! REPL-style driver: reads one filesystem command per line and applies it
//! to a single in-process volume.

use clap::Parser;
use ssfs::{Error, Volume};
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

/// Either a core engine failure or a malformed command line. The latter
/// sits outside the engine's error contract, so it reports under
/// sentinel `0` rather than stealing one of the assigned codes.
enum CliError {
	Engine(Error),
	Usage(&'static str),
}

impl CliError {
	fn code(&self) -> i32 {
		match self {
			CliError::Engine(e) => e.code(),
			CliError::Usage(_) => 0,
		}
	}
}

impl fmt::Display for CliError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CliError::Engine(e) => write!(f, "{e}"),
			CliError::Usage(msg) => write!(f, "{msg}"),
		}
	}
}

impl From<Error> for CliError {
	fn from(e: Error) -> Self {
		CliError::Engine(e)
	}
}

type Result<T> = std::result::Result<T, CliError>;

#[derive(Parser)]
#[command(name = "ssfs", about = "Single-file-system command interpreter")]
struct Args {
	/// Read commands from this file instead of stdin.
	#[arg(long)]
	script: Option<PathBuf>,
}

fn main() {
	env_logger::init();
	let args = Args::parse();

	let input: Box<dyn BufRead> = match &args.script {
		Some(path) => match std::fs::File::open(path) {
			Ok(f) => Box::new(io::BufReader::new(f)),
			Err(e) => {
				eprintln!("ssfs: cannot open {}: {e}", path.display());
				std::process::exit(1);
			}
		},
		None => Box::new(io::BufReader::new(io::stdin())),
	};

	let mut volume = Volume::new();
	let stdout = io::stdout();
	let mut out = stdout.lock();
	for line in input.lines() {
		let line = match line {
			Ok(l) => l,
			Err(e) => {
				eprintln!("ssfs: read error: {e}");
				break;
			}
		};
		let trimmed = line.trim_start();
		if trimmed.is_empty() || trimmed.starts_with('#') {
			continue;
		}
		match dispatch(&mut volume, &line) {
			Ok(reply) => writeln!(out, "OK {reply}").unwrap(),
			Err(e) => writeln!(out, "ERR {} {e}", e.code()).unwrap(),
		}
	}
}

/// Parses and executes one command line, returning the text that follows
/// `OK ` on success.
fn dispatch(volume: &mut Volume, line: &str) -> Result<String> {
	let mut parts = line.splitn(2, char::is_whitespace);
	let cmd = parts.next().unwrap_or("").trim();
	let rest = parts.next().unwrap_or("").trim_start();

	match cmd {
		"format" => {
			let mut args = rest.split_whitespace();
			let path = args.next().ok_or(CliError::Usage("usage: format <path> <inodes>"))?;
			let inodes: u32 = args
				.next()
				.and_then(|s| s.parse().ok())
				.ok_or(CliError::Usage("usage: format <path> <inodes>"))?;
			volume.format(Path::new(path), inodes)?;
			Ok(String::new())
		}
		"mount" => {
			let path = rest.trim();
			if path.is_empty() {
				return Err(CliError::Usage("usage: mount <path>"));
			}
			volume.mount(Path::new(path))?;
			Ok(String::new())
		}
		"unmount" => {
			volume.unmount()?;
			Ok(String::new())
		}
		"create" => {
			let i = volume.create()?;
			Ok(i.to_string())
		}
		"delete" => {
			let i: u32 = rest
				.trim()
				.parse()
				.map_err(|_| CliError::Usage("usage: delete <inode>"))?;
			volume.delete(i)?;
			Ok(String::new())
		}
		"stat" => {
			let i: u32 = rest
				.trim()
				.parse()
				.map_err(|_| CliError::Usage("usage: stat <inode>"))?;
			let size = volume.stat(i)?;
			Ok(size.to_string())
		}
		"read" => {
			let mut args = rest.splitn(3, char::is_whitespace);
			let usage = || CliError::Usage("usage: read <inode> <offset> <length>");
			let i: u32 = args.next().and_then(|s| s.parse().ok()).ok_or_else(usage)?;
			let offset: i64 = args.next().and_then(|s| s.parse().ok()).ok_or_else(usage)?;
			let len: usize = args
				.next()
				.and_then(|s| s.trim().parse().ok())
				.ok_or_else(usage)?;
			let mut buf = vec![0u8; len];
			let n = volume.read(i, &mut buf, len, offset)?;
			Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
		}
		"write" => {
			let mut args = rest.splitn(3, char::is_whitespace);
			let usage = || CliError::Usage("usage: write <inode> <offset> <data>");
			let i: u32 = args.next().and_then(|s| s.parse().ok()).ok_or_else(usage)?;
			let offset: i64 = args.next().and_then(|s| s.parse().ok()).ok_or_else(usage)?;
			let data = args.next().unwrap_or("");
			let bytes = data.as_bytes();
			let n = volume.write(i, bytes, bytes.len(), offset)?;
			Ok(n.to_string())
		}
		other => {
			log::warn!("unrecognized command {other:?}");
			Err(CliError::Usage("unrecognized command"))
		}
	}
}
