use super::ARCHIVE_SUFFIX;
use super::error::{ArchiveError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File, FileType, Metadata};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tar::{Builder, EntryType, Header};
use tracing::{debug, info};

/// Bundle file name for a staging directory: `<base name>.tar.gz`
pub fn archive_name(src: &Path) -> Option<String> {
    src.file_name()
        .and_then(|name| name.to_str())
        .map(|name| format!("{name}{ARCHIVE_SUFFIX}"))
}

#[derive(Debug, Default)]
struct PackStats {
    dirs: usize,
    files: usize,
    bytes: u64,
}

/// Pack `src` into `<dst_dir>/<base name of src>.tar.gz`
///
/// Entry names are `<base name>/<relative path>` with forward slashes, so an
/// unpacked bundle always materializes as one top-level directory. File
/// contents are streamed; only `write_buffer` bytes are held in memory on
/// the output side. An existing archive at the destination is overwritten,
/// and a partially written archive is removed on failure.
pub fn pack_dir(src: &Path, dst_dir: &Path, write_buffer: usize) -> Result<PathBuf> {
    let archive = archive_name(src).ok_or_else(|| ArchiveError::Write {
        path: src.to_path_buf(),
        source: io::Error::new(
            io::ErrorKind::InvalidInput,
            "source directory has no UTF-8 base name",
        ),
    })?;
    let base = &archive[..archive.len() - ARCHIVE_SUFFIX.len()];

    let root_meta = fs::symlink_metadata(src).map_err(|source| ArchiveError::Write {
        path: src.to_path_buf(),
        source,
    })?;
    if !root_meta.is_dir() {
        return Err(ArchiveError::UnsupportedEntry {
            name: base.to_string(),
            kind: describe(&root_meta.file_type()).to_string(),
        });
    }

    let out_path = dst_dir.join(&archive);
    let stats = match write_archive(src, base, &out_path, write_buffer) {
        Ok(stats) => stats,
        Err(err) => {
            if let Err(cleanup) = fs::remove_file(&out_path) {
                debug!(archive = %out_path.display(), error = %cleanup, "Could not remove partial archive");
            }
            return Err(err);
        }
    };

    info!(
        archive = %out_path.display(),
        dirs = stats.dirs,
        files = stats.files,
        bytes = stats.bytes,
        "Packed bundle"
    );

    Ok(out_path)
}

fn write_archive(src: &Path, base: &str, out_path: &Path, write_buffer: usize) -> Result<PackStats> {
    let write_err = |source| ArchiveError::Write {
        path: out_path.to_path_buf(),
        source,
    };

    let file = File::create(out_path).map_err(write_err)?;
    let encoder = GzEncoder::new(
        BufWriter::with_capacity(write_buffer.max(1), file),
        Compression::default(),
    );
    let mut builder = Builder::new(encoder);
    let mut stats = PackStats::default();

    append_entry(&mut builder, src, base, &mut stats)?;

    let encoder = builder.into_inner().map_err(write_err)?;
    let mut writer = encoder.finish().map_err(write_err)?;
    writer.flush().map_err(write_err)?;
    Ok(stats)
}

fn append_entry<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    name: &str,
    stats: &mut PackStats,
) -> Result<()> {
    let io_err = |source| ArchiveError::Write {
        path: path.to_path_buf(),
        source,
    };

    let meta = fs::symlink_metadata(path).map_err(io_err)?;
    let file_type = meta.file_type();

    if file_type.is_dir() {
        let mut header = header_for(&meta, EntryType::Directory, 0);
        builder
            .append_data(&mut header, name, io::empty())
            .map_err(io_err)?;
        stats.dirs += 1;

        let mut children = fs::read_dir(path)
            .map_err(io_err)?
            .collect::<io::Result<Vec<_>>>()
            .map_err(io_err)?;
        children.sort_by_key(|entry| entry.file_name());

        for child in children {
            let file_name = child.file_name();
            let child_name = file_name.to_str().ok_or_else(|| ArchiveError::UnsupportedEntry {
                name: format!("{name}/{}", file_name.to_string_lossy()),
                kind: "non UTF-8 name".to_string(),
            })?;
            append_entry(builder, &child.path(), &format!("{name}/{child_name}"), stats)?;
        }
    } else if file_type.is_file() {
        let mut header = header_for(&meta, EntryType::Regular, meta.len());
        let file = File::open(path).map_err(io_err)?;
        builder
            .append_data(&mut header, name, file)
            .map_err(io_err)?;
        stats.files += 1;
        stats.bytes += meta.len();
        debug!(entry = name, size = meta.len(), "Archived file");
    } else {
        return Err(ArchiveError::UnsupportedEntry {
            name: name.to_string(),
            kind: describe(&file_type).to_string(),
        });
    }

    Ok(())
}

fn header_for(meta: &Metadata, kind: EntryType, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_size(size);
    header.set_mode(mode_bits(meta, kind));
    let mtime = meta
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |elapsed| elapsed.as_secs());
    header.set_mtime(mtime);
    header
}

#[cfg(unix)]
fn mode_bits(meta: &Metadata, _kind: EntryType) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn mode_bits(meta: &Metadata, kind: EntryType) -> u32 {
    if kind == EntryType::Directory {
        0o755
    } else if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

fn describe(file_type: &FileType) -> &'static str {
    if file_type.is_symlink() {
        "symlink"
    } else if file_type.is_file() {
        "file"
    } else if file_type.is_dir() {
        "directory"
    } else {
        "special file"
    }
}
