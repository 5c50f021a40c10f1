use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

/// Every path a job may leave in the working directory.
#[derive(Debug, Clone, Default)]
pub struct JobFiles {
    pub archive: Option<Utf8PathBuf>,
    pub extracted: Vec<Utf8PathBuf>,
    pub source: Option<Utf8PathBuf>,
    pub output: Option<Utf8PathBuf>,
}

impl JobFiles {
    pub fn paths(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.archive
            .iter()
            .chain(self.extracted.iter())
            .chain(self.source.iter())
            .chain(self.output.iter())
    }
}

/// Removes whatever of `files` still exists and returns what was removed.
/// Missing files are skipped and removal errors are only logged, so calling
/// this twice is harmless. Directories the archive introduced under
/// `work_dir`, whether as entries or as parents of files, are pruned once
/// empty.
pub fn cleanup(files: &JobFiles, work_dir: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut removed = Vec::new();
    for path in files.paths() {
        if !path.is_file() || removed.contains(path) {
            continue;
        }
        match fs::remove_file(path) {
            Ok(()) => removed.push(path.clone()),
            Err(err) => tracing::warn!(%path, "failed to remove: {err}"),
        }
    }

    for path in &files.extracted {
        let mut dir = if path.is_dir() {
            Some(path.as_path())
        } else {
            path.parent()
        };
        while let Some(current) = dir {
            if current == work_dir || !current.starts_with(work_dir) {
                break;
            }
            // Fails on non-empty directories, which is the stop condition.
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
    removed
}
