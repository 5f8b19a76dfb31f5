use super::DIR_MODE;
use super::error::{ArchiveError, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader};
use std::path::Path;
use tar::EntryType;
use tracing::{debug, info};

const DEFAULT_FILE_MODE: u32 = 0o644;

/// Reject any entry name that could resolve outside the destination root
pub fn validate_entry_name(name: &str) -> Result<()> {
    let rooted = name.starts_with('/') || has_drive_prefix(name);
    let escapes = name.split('/').any(|segment| segment == "..");

    if name.is_empty() || name.contains('\\') || rooted || escapes {
        return Err(ArchiveError::PathTraversal {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Expand a `.tar.gz` bundle into `dest`, returning the number of entries
///
/// The first invalid name or unsupported entry kind aborts the whole
/// extraction; nothing is created for the offending entry.
pub fn unpack(archive_path: &Path, dest: &Path) -> Result<usize> {
    let read_err = |source| ArchiveError::Read {
        path: archive_path.to_path_buf(),
        source,
    };

    let file = File::open(archive_path).map_err(read_err)?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut count = 0usize;

    for entry in archive.entries().map_err(read_err)? {
        let mut entry = entry.map_err(read_err)?;

        let raw_name = entry.path_bytes().into_owned();
        let name = String::from_utf8(raw_name).map_err(|err| ArchiveError::UnsupportedEntry {
            name: String::from_utf8_lossy(err.as_bytes()).into_owned(),
            kind: "non UTF-8 name".to_string(),
        })?;
        validate_entry_name(&name)?;

        let target = dest.join(&name);
        let target_err = |source| ArchiveError::Read {
            path: target.clone(),
            source,
        };

        match entry.header().entry_type() {
            EntryType::Directory => {
                create_dirs(&target).map_err(target_err)?;
                set_mode(&target, DIR_MODE).map_err(target_err)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                let mode = entry
                    .header()
                    .mode()
                    .map(|mode| mode & 0o777)
                    .unwrap_or(DEFAULT_FILE_MODE);

                if let Some(parent) = target.parent() {
                    create_dirs(parent).map_err(target_err)?;
                }

                let mut out = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&target)
                    .map_err(target_err)?;
                let copied = io::copy(&mut entry, &mut out).map_err(read_err)?;
                drop(out);
                set_mode(&target, mode).map_err(target_err)?;

                debug!(entry = %name, size = copied, "Extracted file");
            }
            other => {
                return Err(ArchiveError::UnsupportedEntry {
                    name,
                    kind: format!("{other:?}"),
                });
            }
        }

        count += 1;
    }

    info!(
        archive = %archive_path.display(),
        dest = %dest.display(),
        entries = count,
        "Unpacked bundle"
    );

    Ok(count)
}

#[cfg(unix)]
fn create_dirs(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(path)
}

#[cfg(not(unix))]
fn create_dirs(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(mode & 0o222 == 0);
    fs::set_permissions(path, permissions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_relative_names() {
        for name in [
            "modstash_dump1",
            "modstash_dump1/",
            "modstash_dump1/example.org/x/v1.0.0/go.mod",
            "a/./b",
            "a/..b/c..",
        ] {
            assert!(validate_entry_name(name).is_ok(), "{name} should be accepted");
        }
    }

    #[test]
    fn test_rejects_unsafe_names() {
        for name in [
            "",
            "../evil",
            "a/../../evil",
            "a/..",
            "/etc/passwd",
            "dir\\file",
            "C:/windows",
        ] {
            assert!(
                matches!(
                    validate_entry_name(name),
                    Err(ArchiveError::PathTraversal { .. })
                ),
                "{name:?} should be rejected"
            );
        }
    }
}
