//! Scoped staging directories
//!
//! Both pipelines work inside a fresh directory that is removed when the
//! returned [`TempDir`] is dropped, on success and error paths alike.

use std::io;
use std::path::Path;
use tempfile::TempDir;

pub const DUMP_PREFIX: &str = "modstash_dump";
pub const LOAD_PREFIX: &str = "modstash_load";

/// Create `<parent or system temp>/<prefix><random>`
pub fn create(prefix: &str, parent: Option<&Path>) -> io::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    let dir = match parent {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            builder.tempdir_in(parent)?
        }
        None => builder.tempdir()?,
    };
    tracing::debug!(path = %dir.path().display(), "Created staging directory");
    Ok(dir)
}

/// Remove a staging directory, logging instead of failing
pub fn cleanup(dir: TempDir) {
    let path = dir.path().to_path_buf();
    if let Err(err) = dir.close() {
        tracing::warn!(path = %path.display(), error = %err, "Failed to remove staging directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_dir_is_removed() {
        let parent = TempDir::new().unwrap();
        let dir = create(DUMP_PREFIX, Some(parent.path())).unwrap();
        let path = dir.path().to_path_buf();

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(DUMP_PREFIX));
        assert!(path.is_dir());

        cleanup(dir);
        assert!(!path.exists());
    }
}
