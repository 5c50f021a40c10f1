//! Fetch worker pool and completion tracking.
//!
//! Jobs are queued up front and drained by a fixed number of worker threads.
//! Each worker reports finished units on a shared channel; the tracker hands
//! them to the caller one at a time in the order they arrive.

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use camino::Utf8Path;

use crate::domain::{FetchState, FetchUnit, Job};
use crate::error::RoundTripError;
use crate::fetch::ArchiveFetcher;

enum WorkerEvent {
    Started(usize),
    Finished(FetchUnit),
}

pub struct CompletionTracker {
    events: Receiver<WorkerEvent>,
    outstanding: BTreeMap<usize, FetchUnit>,
    workers: Vec<JoinHandle<()>>,
    started: usize,
}

impl CompletionTracker {
    /// Queues every job and starts `max_workers` fetch threads (at least one,
    /// never more than there are jobs).
    pub fn start<F>(fetcher: Arc<F>, jobs: Vec<Job>, work_dir: &Utf8Path, max_workers: usize) -> Self
    where
        F: ArchiveFetcher + ?Sized + 'static,
    {
        let units: Vec<FetchUnit> = jobs
            .into_iter()
            .enumerate()
            .map(|(id, job)| FetchUnit::new(id, job, work_dir))
            .collect();
        let outstanding = units
            .iter()
            .map(|unit| (unit.id, unit.clone()))
            .collect::<BTreeMap<_, _>>();

        let worker_count = max_workers.max(1).min(units.len());
        let queue = Arc::new(Mutex::new(units.into_iter().collect::<VecDeque<_>>()));
        let (tx, rx) = mpsc::channel();

        let workers = (0..worker_count)
            .map(|index| {
                let queue = Arc::clone(&queue);
                let fetcher = Arc::clone(&fetcher);
                let tx = tx.clone();
                thread::Builder::new()
                    .name(format!("fetch-{index}"))
                    .spawn(move || fetch_worker(&*fetcher, &queue, &tx))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(err) => {
                    tracing::warn!("failed to spawn fetch worker: {err}");
                    None
                }
            })
            .collect::<Vec<_>>();
        tracing::debug!(workers = workers.len(), jobs = outstanding.len(), "fetch pool started");

        Self {
            events: rx,
            outstanding,
            workers,
            started: 0,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Units a worker has picked up so far.
    pub fn started(&self) -> usize {
        self.started
    }

    /// Blocks until one more unit is done or failed and returns it. `None`
    /// once every unit has been returned.
    pub fn next_completed(&mut self) -> Option<FetchUnit> {
        while !self.outstanding.is_empty() {
            match self.events.recv() {
                Ok(WorkerEvent::Started(id)) => {
                    if let Some(unit) = self.outstanding.get_mut(&id) {
                        unit.state = FetchState::Running;
                        self.started += 1;
                    }
                }
                Ok(WorkerEvent::Finished(unit)) => {
                    if !unit.state.is_finished() {
                        continue;
                    }
                    if self.outstanding.remove(&unit.id).is_some() {
                        return Some(unit);
                    }
                }
                Err(_) => return self.take_lost(),
            }
        }
        None
    }

    /// Every worker is gone (none could be spawned, or one died outside a
    /// fetch); whatever is still outstanding will never report.
    fn take_lost(&mut self) -> Option<FetchUnit> {
        let (_, mut unit) = self.outstanding.pop_first()?;
        let error = RoundTripError::WorkerLost(unit.job.archive_file_name().to_string());
        unit.state = FetchState::Failed {
            message: error.to_string(),
        };
        Some(unit)
    }
}

impl Iterator for CompletionTracker {
    type Item = FetchUnit;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_completed()
    }
}

impl Drop for CompletionTracker {
    fn drop(&mut self) {
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn fetch_worker<F>(fetcher: &F, queue: &Mutex<VecDeque<FetchUnit>>, tx: &Sender<WorkerEvent>)
where
    F: ArchiveFetcher + ?Sized,
{
    loop {
        let next = match queue.lock() {
            Ok(mut guard) => guard.pop_front(),
            Err(_) => None,
        };
        let Some(mut unit) = next else {
            break;
        };
        unit.state = FetchState::Running;
        if tx.send(WorkerEvent::Started(unit.id)).is_err() {
            break;
        }

        let start = Instant::now();
        let fetched = panic::catch_unwind(AssertUnwindSafe(|| {
            fetcher.fetch(unit.job.source_url(), &unit.local_path)
        }))
        .unwrap_or_else(|payload| {
            Err(RoundTripError::FetchPanicked {
                archive: unit.job.archive_file_name().to_string(),
                reason: panic_reason(payload.as_ref()),
            })
        });
        unit.state = match fetched {
            Ok(bytes) => {
                tracing::debug!(
                    archive = unit.job.archive_file_name(),
                    bytes,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "download finished"
                );
                FetchState::Done { bytes }
            }
            Err(err) => {
                tracing::warn!(archive = unit.job.archive_file_name(), "download failed: {err}");
                FetchState::Failed {
                    message: err.to_string(),
                }
            }
        };
        if tx.send(WorkerEvent::Finished(unit)).is_err() {
            break;
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
