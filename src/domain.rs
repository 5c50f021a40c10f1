use std::collections::BTreeMap;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::Url;
use serde::Serialize;

use crate::error::RoundTripError;

/// Extension shared by every grid data file.
pub const GRID_EXT: &str = "vdb";

/// Maps an archive-derived name to the name of the data file inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasTable(BTreeMap<String, String>);

impl AliasTable {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self(entries)
    }

    pub fn get(&self, derived: &str) -> Option<&str> {
        self.0.get(derived).map(String::as_str)
    }

    /// Alias for `derived`, or `derived` itself.
    pub fn canonical(&self, derived: &str) -> String {
        self.get(derived).unwrap_or(derived).to_string()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AliasTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    source_url: String,
    canonical_name: String,
    archive_file_name: String,
}

impl Job {
    pub fn from_url(url: &str, aliases: &AliasTable) -> Result<Self, RoundTripError> {
        let parsed = Url::parse(url.trim())
            .map_err(|err| RoundTripError::InvalidUrl(format!("{url}: {err}")))?;
        let archive_file_name = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .ok_or_else(|| RoundTripError::MissingArchiveName(url.to_string()))?;
        let canonical_name = aliases.canonical(archive_stem(&archive_file_name));

        Ok(Self {
            source_url: parsed.to_string(),
            canonical_name,
            archive_file_name,
        })
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    pub fn archive_file_name(&self) -> &str {
        &self.archive_file_name
    }

    pub fn archive_path(&self, work_dir: &Utf8Path) -> Utf8PathBuf {
        work_dir.join(&self.archive_file_name)
    }

    pub fn extracted_file(&self, work_dir: &Utf8Path, output_suffix: &str) -> ExtractedFile {
        ExtractedFile::for_name(work_dir, &self.canonical_name, output_suffix)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.archive_file_name)
    }
}

/// Name of an archive up to its first `.vdb`, e.g. `bunny.vdb-1.0.0.zip` -> `bunny`.
pub fn archive_stem(file_name: &str) -> &str {
    let marker = format!(".{GRID_EXT}");
    match file_name.find(&marker) {
        Some(idx) => &file_name[..idx],
        None => file_name,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    Pending,
    Running,
    Done { bytes: u64 },
    Failed { message: String },
}

impl FetchState {
    pub fn is_finished(&self) -> bool {
        matches!(self, FetchState::Done { .. } | FetchState::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct FetchUnit {
    pub id: usize,
    pub job: Job,
    pub state: FetchState,
    pub local_path: Utf8PathBuf,
}

impl FetchUnit {
    pub fn new(id: usize, job: Job, work_dir: &Utf8Path) -> Self {
        let local_path = job.archive_path(work_dir);
        Self {
            id,
            job,
            state: FetchState::Pending,
            local_path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub source_path: Utf8PathBuf,
    pub output_path: Utf8PathBuf,
}

impl ExtractedFile {
    pub fn for_name(work_dir: &Utf8Path, name: &str, output_suffix: &str) -> Self {
        Self {
            source_path: work_dir.join(format!("{name}.{GRID_EXT}")),
            output_path: work_dir.join(format!("{name}{output_suffix}.{GRID_EXT}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub original_size: u64,
    pub transformed_size: u64,
    pub ratio: f64,
    pub mismatched: bool,
}
