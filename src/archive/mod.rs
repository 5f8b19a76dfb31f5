//! Bundle archives (`.tar.gz`)
//!
//! [`pack_dir`] turns a staging directory into a single gzip-compressed tar
//! stream; [`unpack`] expands one back into a destination directory. Only
//! directories and regular files are ever written or accepted, and every
//! entry name is validated before anything touches the filesystem.

mod error;
mod pack;
mod unpack;

pub use error::{ArchiveError, Result};
pub use pack::{archive_name, pack_dir};
pub use unpack::{unpack, validate_entry_name};

pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Permission applied to every directory created during extraction
pub const DIR_MODE: u32 = 0o755;
