use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::cleanup::{JobFiles, cleanup};
use crate::config::{DEFAULT_OUTPUT_SUFFIX, DEFAULT_WORKERS, ResolvedConfig};
use crate::differ::{ComparisonTool, DiffVerdict, SemanticDiffer};
use crate::domain::{AliasTable, ExtractedFile, FetchState, FetchUnit, GRID_EXT, Job, ValidationResult, archive_stem};
use crate::error::RoundTripError;
use crate::extract::extract_archive;
use crate::fetch::ArchiveFetcher;
use crate::grid::GridLibrary;
use crate::tracker::CompletionTracker;
use crate::validate::{RoundTripValidator, ValidatorSettings};

const SEPARATOR: &str = "-----------------------------------------";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub work_dir: Utf8PathBuf,
    pub workers: usize,
    pub output_suffix: String,
    pub diff: bool,
    pub validator: ValidatorSettings,
}

impl PipelineOptions {
    pub fn new(work_dir: Utf8PathBuf) -> Self {
        Self {
            work_dir,
            workers: DEFAULT_WORKERS,
            output_suffix: DEFAULT_OUTPUT_SUFFIX.to_string(),
            diff: true,
            validator: ValidatorSettings::default(),
        }
    }

    pub fn from_config(work_dir: Utf8PathBuf, config: &ResolvedConfig) -> Self {
        Self {
            work_dir,
            workers: config.workers,
            output_suffix: config.output_suffix.clone(),
            diff: config.diff,
            validator: ValidatorSettings {
                max_grids: config.max_grids,
                rename_suffix: config.rename_suffix.clone(),
                codec: config.codec,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Fetch,
    Extract,
    Multiplicity,
    RoundTrip,
}

impl FailureStage {
    fn of_validation(err: &RoundTripError) -> Self {
        match err {
            RoundTripError::TooManyGrids { .. } => FailureStage::Multiplicity,
            _ => FailureStage::RoundTrip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobFailure {
    pub stage: FailureStage,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub archive: String,
    pub canonical_name: String,
    pub fetched_bytes: Option<u64>,
    pub validation: Option<ValidationResult>,
    pub diff: Option<DiffVerdict>,
    pub failure: Option<JobFailure>,
    pub removed_files: Vec<String>,
}

impl JobReport {
    fn new(archive: &str, canonical_name: &str) -> Self {
        Self {
            archive: archive.to_string(),
            canonical_name: canonical_name.to_string(),
            fetched_bytes: None,
            validation: None,
            diff: None,
            failure: None,
            removed_files: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub started_at: String,
    pub finished_at: String,
    pub jobs: Vec<JobReport>,
}

impl BatchReport {
    pub fn failures(&self) -> usize {
        self.jobs.iter().filter(|job| !job.succeeded()).count()
    }

    pub fn job(&self, archive: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|job| job.archive == archive)
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn emit(sink: &dyn ProgressSink, message: impl Into<String>) {
    sink.event(ProgressEvent {
        message: message.into(),
    });
}

pub struct App<F: ArchiveFetcher, G: GridLibrary, T: ComparisonTool> {
    fetcher: Arc<F>,
    library: G,
    tool: T,
    options: PipelineOptions,
}

impl<F, G, T> App<F, G, T>
where
    F: ArchiveFetcher + 'static,
    G: GridLibrary,
    T: ComparisonTool,
{
    pub fn new(fetcher: F, library: G, tool: T, options: PipelineOptions) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            library,
            tool,
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Downloads every job, then carries each finished download through
    /// extraction, round trip, comparison and cleanup, one at a time in the
    /// order downloads complete.
    pub fn run(&self, jobs: Vec<Job>, sink: &dyn ProgressSink) -> BatchReport {
        let started_at = iso_timestamp();
        let mut reports = Vec::with_capacity(jobs.len());
        for unit in self.start_fetches(jobs, sink) {
            reports.push(self.process(unit, sink));
        }
        self.finish(started_at, reports)
    }

    /// Downloads and unpacks every job, keeping the extracted files.
    pub fn fetch_only(&self, jobs: Vec<Job>, sink: &dyn ProgressSink) -> BatchReport {
        let started_at = iso_timestamp();
        let work_dir = self.options.work_dir.as_path();
        let mut reports = Vec::with_capacity(jobs.len());

        for unit in self.start_fetches(jobs, sink) {
            let mut report = JobReport::new(unit.job.archive_file_name(), unit.job.canonical_name());
            let mut files = JobFiles {
                archive: Some(unit.local_path.clone()),
                ..JobFiles::default()
            };
            if let Some(bytes) = self.check_fetched(&unit, &mut report, sink) {
                report.fetched_bytes = Some(bytes);
                emit(sink, format!("Extracting {}...", unit.job));
                match extract_archive(&unit.local_path, work_dir, &mut files.extracted) {
                    Ok(()) => files.extracted.clear(),
                    Err(err) => self.fail(&mut report, FailureStage::Extract, &err, sink),
                }
            }
            emit(sink, format!("Cleaning up \"{}\"...", unit.job));
            report.removed_files = removed_strings(cleanup(&files, work_dir));
            reports.push(report);
        }
        self.finish(started_at, reports)
    }

    /// Round-trips every `.vdb` file already present in the working directory.
    /// Inputs are removed afterwards unless `keep_inputs` is set.
    pub fn run_local(
        &self,
        aliases: &AliasTable,
        keep_inputs: bool,
        sink: &dyn ProgressSink,
    ) -> Result<BatchReport, RoundTripError> {
        let started_at = iso_timestamp();
        let work_dir = self.options.work_dir.as_path();
        let inputs = list_grid_files(work_dir)?;
        if inputs.is_empty() {
            return Err(RoundTripError::NoLocalGrids(work_dir.to_string()));
        }

        let mut reports = Vec::with_capacity(inputs.len());
        for source in inputs {
            let file_name = source.file_name().unwrap_or(source.as_str()).to_string();
            let stem = archive_stem(&file_name);
            let name = aliases
                .get(&stem.replace("_blosc", ""))
                .unwrap_or(stem)
                .to_string();
            let file = ExtractedFile {
                source_path: source.clone(),
                output_path: work_dir.join(format!(
                    "{name}{}.{GRID_EXT}",
                    self.options.validator.rename_suffix
                )),
            };

            emit(sink, SEPARATOR);
            emit(sink, format!("Processing \"{file_name}\""));
            let mut report = JobReport::new(&file_name, &name);
            let files = JobFiles {
                source: (!keep_inputs).then(|| source.clone()),
                output: Some(file.output_path.clone()),
                ..JobFiles::default()
            };
            self.check_file(&file_name, &file, &mut report, sink);

            emit(sink, format!("Cleaning up \"{name}\" files..."));
            report.removed_files = removed_strings(cleanup(&files, work_dir));
            reports.push(report);
        }
        Ok(self.finish(started_at, reports))
    }

    fn start_fetches(&self, jobs: Vec<Job>, sink: &dyn ProgressSink) -> CompletionTracker {
        for job in &jobs {
            emit(sink, format!("Initiating download \"{}\"", job.source_url()));
        }
        CompletionTracker::start(
            Arc::clone(&self.fetcher),
            jobs,
            &self.options.work_dir,
            self.options.workers,
        )
    }

    fn process(&self, unit: FetchUnit, sink: &dyn ProgressSink) -> JobReport {
        let work_dir = self.options.work_dir.as_path();
        let job = &unit.job;
        let file = job.extracted_file(work_dir, &self.options.output_suffix);
        let mut report = JobReport::new(job.archive_file_name(), job.canonical_name());
        let mut files = JobFiles {
            archive: Some(unit.local_path.clone()),
            extracted: Vec::new(),
            source: Some(file.source_path.clone()),
            output: Some(file.output_path.clone()),
        };

        emit(sink, SEPARATOR);
        emit(sink, format!("Processing \"{job}\""));
        if let Some(bytes) = self.check_fetched(&unit, &mut report, sink) {
            report.fetched_bytes = Some(bytes);
            emit(sink, format!("Extracting {job}..."));
            match extract_archive(&unit.local_path, work_dir, &mut files.extracted) {
                Ok(()) => self.check_file(job.archive_file_name(), &file, &mut report, sink),
                Err(err) => self.fail(&mut report, FailureStage::Extract, &err, sink),
            }
        }

        emit(sink, format!("Cleaning up \"{}\" files...", job.canonical_name()));
        report.removed_files = removed_strings(cleanup(&files, work_dir));
        report
    }

    /// Bytes downloaded for a finished unit, or `None` after recording why
    /// there is nothing to process.
    fn check_fetched(&self, unit: &FetchUnit, report: &mut JobReport, sink: &dyn ProgressSink) -> Option<u64> {
        match &unit.state {
            FetchState::Done { bytes } => Some(*bytes),
            FetchState::Failed { message } => {
                emit(sink, message.as_str());
                report.failure = Some(JobFailure {
                    stage: FailureStage::Fetch,
                    message: message.clone(),
                });
                None
            }
            FetchState::Pending | FetchState::Running => {
                let message = format!("download of {} never finished", unit.job);
                emit(sink, message.as_str());
                report.failure = Some(JobFailure {
                    stage: FailureStage::Fetch,
                    message,
                });
                None
            }
        }
    }

    fn check_file(&self, label: &str, file: &ExtractedFile, report: &mut JobReport, sink: &dyn ProgressSink) {
        let validator = RoundTripValidator::new(&self.library, &self.options.validator);
        match validator.validate(file) {
            Ok(result) => {
                emit(sink, format!("{label} read/write successful."));
                emit(sink, format!("  input size: [{}]", result.original_size));
                emit(sink, format!("  output size: [{}]", result.transformed_size));
                emit(sink, format!("  comp ratio: [{}]", result.ratio));
                report.validation = Some(result);
            }
            Err(err) => {
                let stage = FailureStage::of_validation(&err);
                self.fail(report, stage, &err, sink);
            }
        }

        if !self.options.diff || !file.source_path.is_file() || !file.output_path.is_file() {
            return;
        }
        emit(sink, "Comparing grids with AX...");
        let differ = SemanticDiffer::new(&self.library, &self.tool);
        let verdict = differ.compare(&file.source_path, &file.output_path);
        if let DiffVerdict::Differ { .. } = verdict {
            emit(
                sink,
                format!(
                    "VDBs from \"{}\" and \"{}\" differ.",
                    file.source_path, file.output_path
                ),
            );
            if let Some(result) = report.validation.as_mut() {
                result.mismatched = true;
            }
        }
        report.diff = Some(verdict);
    }

    fn fail(&self, report: &mut JobReport, stage: FailureStage, err: &RoundTripError, sink: &dyn ProgressSink) {
        tracing::warn!(archive = %report.archive, ?stage, "{err}");
        emit(sink, err.to_string());
        report.failure = Some(JobFailure {
            stage,
            message: err.to_string(),
        });
    }

    fn finish(&self, started_at: String, jobs: Vec<JobReport>) -> BatchReport {
        let report = BatchReport {
            started_at,
            finished_at: iso_timestamp(),
            jobs,
        };
        tracing::info!(
            jobs = report.jobs.len(),
            failures = report.failures(),
            "batch finished"
        );
        report
    }
}

fn list_grid_files(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, RoundTripError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| RoundTripError::Filesystem(format!("read {dir}: {err}")))?;
    let mut files = entries
        .flatten()
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.path()).ok())
        .filter(|path| path.extension() == Some(GRID_EXT))
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

fn removed_strings(paths: Vec<Utf8PathBuf>) -> Vec<String> {
    paths.into_iter().map(|path| path.to_string()).collect()
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
