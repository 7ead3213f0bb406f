//! Zip container codec for job bundles and result bundles.

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::TempPath;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ArchiveError;

/// A named byte stream inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArchiveEntry {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Visits every file entry of a zip container in archive order.
///
/// Directory entries are skipped. Fails with [`ArchiveError::Corrupt`] if the
/// stream is not a zip container, if it holds no file entries, or if an entry
/// name would escape the extraction directory.
pub fn for_each_entry<R, F>(reader: R, mut visit: F) -> Result<usize, ArchiveError>
where
    R: Read + Seek,
    F: FnMut(&str, &mut dyn Read) -> Result<(), ArchiveError>,
{
    let mut archive = ZipArchive::new(reader)
        .map_err(|e| ArchiveError::corrupt(format!("not a zip archive: {}", e)))?;

    let mut visited = 0;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ArchiveError::corrupt(format!("unreadable entry #{}: {}", index, e)))?;

        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        if entry.enclosed_name().is_none() {
            return Err(ArchiveError::corrupt(format!(
                "entry '{}' escapes the destination directory",
                name
            )));
        }

        visit(&name, &mut entry)?;
        visited += 1;
    }

    if visited == 0 {
        return Err(ArchiveError::corrupt("archive contains no entries"));
    }

    Ok(visited)
}

/// Reads all file entries of a zip container into memory, in archive order.
pub fn unpack<R: Read + Seek>(reader: R) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut entries = Vec::new();
    for_each_entry(reader, |name, content| {
        let mut data = Vec::new();
        content
            .read_to_end(&mut data)
            .map_err(|e| ArchiveError::corrupt(format!("truncated entry '{}': {}", name, e)))?;
        entries.push(ArchiveEntry::new(name, data));
        Ok(())
    })?;
    Ok(entries)
}

/// Writes `entries` into a new temporary zip file.
///
/// The file is removed when the returned [`TempPath`] is dropped, unless it
/// was persisted or moved away first.
pub fn pack(entries: &[ArchiveEntry]) -> Result<TempPath, ArchiveError> {
    let temp = tempfile::Builder::new()
        .prefix("jobbus-")
        .suffix(".zip")
        .tempfile()
        .map_err(|e| ArchiveError::io(std::env::temp_dir(), e))?;
    let path = temp.path().to_path_buf();
    let (file, temp_path) = temp.into_parts();

    write_entries(
        file,
        &path,
        entries
            .iter()
            .map(|entry| (entry.name.as_str(), &entry.data[..])),
    )?;

    Ok(temp_path)
}

/// Packs files already on disk into a zip at `destination`, in the given order.
pub fn pack_files<'a, I>(destination: &Path, files: I) -> Result<(), ArchiveError>
where
    I: IntoIterator<Item = (&'a str, &'a Path)>,
{
    let out = File::create(destination).map_err(|e| ArchiveError::io(destination, e))?;
    let mut writer = ZipWriter::new(out);

    for (name, path) in files {
        let mut input = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
        writer
            .start_file(name, entry_options())
            .map_err(|e| zip_write_error(destination, e))?;
        std::io::copy(&mut input, &mut writer).map_err(|e| ArchiveError::io(path, e))?;
    }

    writer
        .finish()
        .map_err(|e| zip_write_error(destination, e))?;
    Ok(())
}

fn write_entries<'a, W, I>(out: W, path: &Path, entries: I) -> Result<(), ArchiveError>
where
    W: Write + Seek,
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut writer = ZipWriter::new(out);

    for (name, data) in entries {
        writer
            .start_file(name, entry_options())
            .map_err(|e| zip_write_error(path, e))?;
        writer.write_all(data).map_err(|e| ArchiveError::io(path, e))?;
    }

    writer.finish().map_err(|e| zip_write_error(path, e))?;
    Ok(())
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

fn zip_write_error(path: &Path, error: zip::result::ZipError) -> ArchiveError {
    match error {
        zip::result::ZipError::Io(source) => ArchiveError::io(path, source),
        other => ArchiveError::io(path, std::io::Error::other(other.to_string())),
    }
}

/// Resolves an entry name to a relative path that stays below its root.
///
/// Returns `None` for absolute names and names containing `..`.
pub fn enclosed_path(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    let mut enclosed = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => enclosed.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if enclosed.as_os_str().is_empty() {
        None
    } else {
        Some(enclosed)
    }
}
