//! Tar packaging for file transfer into a container.

use std::io::Read;
use std::path::Path;

use crate::Result;

/// Pack a single local file into an in-memory tar archive under `entry_name`.
pub fn pack_file(local: &Path, entry_name: &str) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.append_path_with_name(local, entry_name)?;
    Ok(builder.into_inner()?)
}

/// List `(path, contents)` for every regular file in an archive.
pub fn unpack_entries(archive: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut reader = tar::Archive::new(archive);
    let mut files = Vec::new();
    for entry in reader.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.to_string_lossy().into_owned();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        files.push((path, contents));
    }
    Ok(files)
}

/// Split a container path into `(parent_dir, file_name)`.
///
/// Container paths are always POSIX, regardless of the host platform.
pub fn split_remote_path(remote: &str) -> (&str, &str) {
    match remote.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => (".", remote),
    }
}
