use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use zip::ZipArchive;

use crate::error::RoundTripError;

/// Unpacks every entry of `archive` into `target_dir` and removes the archive.
/// Records the files written, and the directory entries it created, in
/// archive order. On failure the archive is left
/// in place along with whatever was written before the error; the caller owns
/// cleanup in both cases.
pub fn extract_archive(
    archive: &Utf8Path,
    target_dir: &Utf8Path,
    written: &mut Vec<Utf8PathBuf>,
) -> Result<(), RoundTripError> {
    let file = fs::File::open(archive)
        .map_err(|err| RoundTripError::Archive(format!("open {archive}: {err}")))?;
    let mut zip = ZipArchive::new(file).map_err(|err| RoundTripError::Archive(err.to_string()))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|err| RoundTripError::Archive(err.to_string()))?;
        let relative = entry
            .enclosed_name()
            .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
            .ok_or_else(|| {
                RoundTripError::Archive(format!("unsafe entry path: {}", entry.name()))
            })?;
        let entry_path = target_dir.join(relative);

        if entry.is_dir() {
            if !entry_path.is_dir() {
                fs::create_dir_all(&entry_path)
                    .map_err(|err| RoundTripError::Filesystem(err.to_string()))?;
                written.push(entry_path);
            }
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| RoundTripError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| RoundTripError::Filesystem(err.to_string()))?;
        written.push(entry_path);
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| RoundTripError::Archive(err.to_string()))?;
    }

    fs::remove_file(archive)
        .map_err(|err| RoundTripError::Filesystem(format!("remove {archive}: {err}")))?;
    Ok(())
}
