//! Archive formats, extraction and header-declared sizes

use flate2::read::GzDecoder;
use layer_core::{LayerError, Result, Stage};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

const COPY_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Pick the format from the file extension
    pub fn detect(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if name.ends_with(".zip") {
            Ok(ArchiveFormat::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(ArchiveFormat::TarGz)
        } else {
            Err(LayerError::corrupt(
                path,
                "unrecognised archive extension, expected .zip, .tar.gz or .tgz",
            ))
        }
    }
}

/// Archive reader that fails every read once `abort` is set, so a single
/// large entry cannot outlive a timeout or cancellation.
struct AbortableReader<'a, R> {
    inner: R,
    abort: &'a AtomicBool,
}

impl<R: Read> Read for AbortableReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.abort.load(Ordering::Relaxed) {
            return Err(io::Error::other("size check aborted"));
        }
        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for AbortableReader<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

fn open<'a>(path: &Path, abort: &'a AtomicBool) -> Result<AbortableReader<'a, BufReader<File>>> {
    File::open(path)
        .map(|file| AbortableReader {
            inner: BufReader::new(file),
            abort,
        })
        .map_err(|_| LayerError::ArtifactNotFound(path.to_path_buf()))
}

fn check_abort(abort: &AtomicBool) -> Result<()> {
    if abort.load(Ordering::Relaxed) {
        Err(LayerError::Cancelled(Stage::SizeCheck))
    } else {
        Ok(())
    }
}

/// Any failure after `abort` was set is reported as the abort itself.
fn unless_aborted<T>(result: Result<T>, abort: &AtomicBool) -> Result<T> {
    match result {
        Err(_) if abort.load(Ordering::Relaxed) => Err(LayerError::Cancelled(Stage::SizeCheck)),
        other => other,
    }
}

fn zip_error(path: &Path, err: zip::result::ZipError) -> LayerError {
    match err {
        zip::result::ZipError::Io(e) => classify_io(path, e),
        other => LayerError::corrupt(path, other.to_string()),
    }
}

/// Errors that mean the bytes are not a valid archive versus errors of the
/// local filesystem.
fn classify_io(path: &Path, err: io::Error) -> LayerError {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            LayerError::corrupt(path, err.to_string())
        }
        _ => LayerError::io(format!("extracting {}", path.display()), err),
    }
}

/// Copy one entry, telling read (archive) errors apart from write errors.
/// Stops between buffers once `abort` is set.
fn copy_entry(archive: &Path, reader: &mut dyn Read, dest: &Path, abort: &AtomicBool) -> Result<()> {
    let mut out = File::create(dest)
        .map_err(|e| LayerError::io(format!("creating {}", dest.display()), e))?;
    let mut buf = vec![0u8; COPY_BUFFER];
    loop {
        check_abort(abort)?;
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(LayerError::corrupt(archive, e.to_string())),
        };
        out.write_all(&buf[..n])
            .map_err(|e| LayerError::io(format!("writing {}", dest.display()), e))?;
    }
    Ok(())
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| LayerError::io(format!("creating {}", dir.display()), e))
}

/// Unpack every entry of `path` below `dest`. Stops between entries once
/// `abort` is set.
pub fn extract(path: &Path, format: ArchiveFormat, dest: &Path, abort: &AtomicBool) -> Result<()> {
    let result = match format {
        ArchiveFormat::Zip => extract_zip(path, dest, abort),
        ArchiveFormat::TarGz => extract_tar_gz(path, dest, abort),
    };
    unless_aborted(result, abort)
}

fn extract_zip(path: &Path, dest: &Path, abort: &AtomicBool) -> Result<()> {
    let mut archive = zip::ZipArchive::new(open(path, abort)?).map_err(|e| zip_error(path, e))?;

    for i in 0..archive.len() {
        check_abort(abort)?;
        let mut entry = archive.by_index(i).map_err(|e| zip_error(path, e))?;
        let target = match entry.enclosed_name() {
            Some(relative) => dest.join(relative),
            None => {
                return Err(LayerError::corrupt(
                    path,
                    format!("entry '{}' escapes the extraction directory", entry.name()),
                ));
            }
        };

        if entry.is_dir() {
            create_dir(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                create_dir(parent)?;
            }
            copy_entry(path, &mut entry, &target, abort)?;
        }
    }
    Ok(())
}

fn extract_tar_gz(path: &Path, dest: &Path, abort: &AtomicBool) -> Result<()> {
    // unpack_in reads through the abortable reader.
    let mut archive = tar::Archive::new(GzDecoder::new(open(path, abort)?));
    let entries = archive.entries().map_err(|e| classify_io(path, e))?;

    for entry in entries {
        check_abort(abort)?;
        let mut entry = entry.map_err(|e| classify_io(path, e))?;
        let unpacked = entry.unpack_in(dest).map_err(|e| classify_io(path, e))?;
        if !unpacked {
            let name = entry
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            return Err(LayerError::corrupt(
                path,
                format!("entry '{}' escapes the extraction directory", name),
            ));
        }
    }
    Ok(())
}

/// Sum of uncompressed sizes recorded in the archive, without writing
/// anything to disk. Returns `(bytes, files)`.
pub fn declared_size(path: &Path, format: ArchiveFormat, abort: &AtomicBool) -> Result<(u64, u64)> {
    unless_aborted(sum_declared(path, format, abort), abort)
}

fn sum_declared(path: &Path, format: ArchiveFormat, abort: &AtomicBool) -> Result<(u64, u64)> {
    let mut total = 0u64;
    let mut files = 0u64;

    match format {
        ArchiveFormat::Zip => {
            let mut archive =
                zip::ZipArchive::new(open(path, abort)?).map_err(|e| zip_error(path, e))?;
            for i in 0..archive.len() {
                check_abort(abort)?;
                let entry = archive.by_index_raw(i).map_err(|e| zip_error(path, e))?;
                if !entry.is_dir() {
                    total = total.saturating_add(entry.size());
                    files += 1;
                }
            }
        }
        ArchiveFormat::TarGz => {
            let mut archive = tar::Archive::new(GzDecoder::new(open(path, abort)?));
            let entries = archive.entries().map_err(|e| classify_io(path, e))?;
            for entry in entries {
                check_abort(abort)?;
                let entry = entry.map_err(|e| classify_io(path, e))?;
                let header = entry.header();
                if header.entry_type().is_file() {
                    let size = header.size().map_err(|e| classify_io(path, e))?;
                    total = total.saturating_add(size);
                    files += 1;
                }
            }
        }
    }

    Ok((total, files))
}

/// Recursively sum file and symlink sizes below `root`. Returns `(bytes, entries)`.
pub fn sum_tree(root: &Path) -> Result<(u64, u64)> {
    let mut total = 0u64;
    let mut entries = 0u64;

    for entry in walkdir::WalkDir::new(root).min_depth(1) {
        let entry = entry
            .map_err(|e| LayerError::io(format!("scanning {}", root.display()), io::Error::from(e)))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let meta = entry
            .metadata()
            .map_err(|e| LayerError::io(format!("scanning {}", root.display()), io::Error::from(e)))?;
        total = total.saturating_add(meta.len());
        entries += 1;
    }

    Ok((total, entries))
}
