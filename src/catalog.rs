use std::collections::HashSet;

use crate::domain::{AliasTable, Job};
use crate::error::RoundTripError;

const BASE_URL: &str = "https://artifacts.aswf.io/io/aswf/openvdb/models";

/// Sample models published with the OpenVDB artifacts. Each entry is expanded
/// to `<BASE_URL>/<model>.vdb/1.0.0/<model>.vdb-1.0.0.zip`.
pub const DEFAULT_MODELS: &[&str] = &[
    "armadillo",
    "buddha",
    "bunny",
    "bunny_cloud",
    "crawler",
    "cube",
    "dragon",
    "emu",
    "explosion",
    "fire",
    "icosahedron",
    "iss",
    "smoke1",
    "smoke2",
    "space",
    "sphere",
    "torus",
    "torus_knot",
    "utahteapot",
    "venusstatue",
    "boat_points",
    "bunny_points",
    "sphere_points",
    "waterfall_points",
];

pub fn model_url(model: &str) -> String {
    format!("{BASE_URL}/{model}.vdb/1.0.0/{model}.vdb-1.0.0.zip")
}

pub fn default_urls() -> Vec<String> {
    DEFAULT_MODELS.iter().map(|model| model_url(model)).collect()
}

/// Archives whose data file is not named after the archive.
pub fn default_aliases() -> AliasTable {
    [("torus_knot", "torus_knot_helix"), ("smoke1", "smoke")]
        .into_iter()
        .collect()
}

#[derive(Debug, Clone)]
pub struct Catalog {
    jobs: Vec<Job>,
}

impl Catalog {
    /// Builds one job per distinct archive file name. Later entries that would
    /// download onto an already claimed archive are dropped.
    pub fn build<S: AsRef<str>>(urls: &[S], aliases: &AliasTable) -> Result<Self, RoundTripError> {
        let mut seen = HashSet::new();
        let mut jobs = Vec::with_capacity(urls.len());
        for url in urls {
            let job = Job::from_url(url.as_ref(), aliases)?;
            if !seen.insert(job.archive_file_name().to_string()) {
                tracing::warn!(archive = job.archive_file_name(), "skipping duplicate catalog entry");
                continue;
            }
            jobs.push(job);
        }
        if jobs.is_empty() {
            return Err(RoundTripError::EmptyCatalog);
        }
        Ok(Self { jobs })
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn into_jobs(self) -> Vec<Job> {
        self.jobs
    }
}
