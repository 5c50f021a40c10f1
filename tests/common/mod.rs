#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use vdb_roundtrip::app::{ProgressEvent, ProgressSink};
use vdb_roundtrip::differ::ComparisonTool;
use vdb_roundtrip::error::RoundTripError;
use vdb_roundtrip::fetch::ArchiveFetcher;
use vdb_roundtrip::grid::{Codec, Grid, GridLibrary, GridMetadata};

pub const MAGIC: &str = "MOCKGRID";

pub fn work_dir() -> (TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, dir)
}

pub fn dir_entries(dir: &Utf8Path) -> Vec<String> {
    let mut names = std::fs::read_dir(dir)
        .unwrap()
        .flatten()
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    names
}

/// Grid file in the mock format: a header, one `<type> <name>` line per
/// grid, a blank line, then padding up to `total_size` bytes.
pub fn grid_file_bytes(grids: &[(&str, &str)], total_size: usize) -> Vec<u8> {
    let mut bytes = format!("{MAGIC}\n").into_bytes();
    for (value_type, name) in grids {
        bytes.extend_from_slice(format!("{value_type} {name}\n").as_bytes());
    }
    bytes.push(b'\n');
    if bytes.len() < total_size {
        bytes.resize(total_size, b'x');
    }
    bytes
}

fn parse_grid_file(path: &Utf8Path) -> Result<Vec<GridMetadata>, RoundTripError> {
    let bytes = std::fs::read(path)
        .map_err(|err| RoundTripError::GridTool(format!("read {path}: {err}")))?;
    let text = String::from_utf8_lossy(&bytes);
    let mut lines = text.lines();
    if lines.next() != Some(MAGIC) {
        return Err(RoundTripError::GridTool(format!("{path} is not a grid file")));
    }
    let mut grids = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (value_type, name) = line
            .split_once(' ')
            .ok_or_else(|| RoundTripError::GridTool(format!("bad descriptor in {path}")))?;
        grids.push(GridMetadata {
            name: name.to_string(),
            value_type: value_type.to_string(),
        });
    }
    Ok(grids)
}

pub struct MockGridLibrary {
    pub output_size: usize,
    pub corrupt_writes: bool,
    pub ignore_rename: bool,
    pub writes: Mutex<Vec<(Utf8PathBuf, String, Codec)>>,
}

impl MockGridLibrary {
    pub fn new(output_size: usize) -> Self {
        Self {
            output_size,
            corrupt_writes: false,
            ignore_rename: false,
            writes: Mutex::new(Vec::new()),
        }
    }
}

impl GridLibrary for MockGridLibrary {
    fn read_all(&self, path: &Utf8Path) -> Result<Vec<Grid>, RoundTripError> {
        Ok(parse_grid_file(path)?
            .into_iter()
            .enumerate()
            .map(|(index, metadata)| Grid {
                metadata,
                origin: path.to_path_buf(),
                index,
            })
            .collect())
    }

    fn read_metadata(&self, path: &Utf8Path) -> Result<Vec<GridMetadata>, RoundTripError> {
        parse_grid_file(path)
    }

    fn write(&self, path: &Utf8Path, grid: &Grid, codec: Codec) -> Result<(), RoundTripError> {
        let name = if self.ignore_rename {
            parse_grid_file(&grid.origin)?[grid.index].name.clone()
        } else {
            grid.name().to_string()
        };
        let bytes = if self.corrupt_writes {
            vec![0u8; self.output_size]
        } else {
            grid_file_bytes(
                &[(grid.metadata.value_type.as_str(), name.as_str())],
                self.output_size,
            )
        };
        std::fs::write(path, bytes).map_err(|err| RoundTripError::GridTool(err.to_string()))?;
        self.writes
            .lock()
            .unwrap()
            .push((path.to_path_buf(), name, codec));
        Ok(())
    }
}

pub fn zip_bytes(entries: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, bytes) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
            continue;
        }
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[derive(Clone)]
pub enum Served {
    Archive(Vec<u8>),
    Fail(String),
    Panic,
}

#[derive(Default)]
pub struct MockFetcher {
    served: HashMap<String, Served>,
    delays: HashMap<String, Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn serve(mut self, url: &str, served: Served) -> Self {
        self.served.insert(url.to_string(), served);
        self
    }

    pub fn delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }
}

impl ArchiveFetcher for MockFetcher {
    fn fetch(&self, url: &str, destination: &Utf8Path) -> Result<u64, RoundTripError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delays.get(url) {
            thread::sleep(*delay);
        }
        let result = match self.served.get(url).cloned() {
            Some(Served::Archive(bytes)) => {
                let mut file = File::create(destination).unwrap();
                file.write_all(&bytes).unwrap();
                Ok(bytes.len() as u64)
            }
            Some(Served::Fail(message)) => Err(RoundTripError::Http(message)),
            Some(Served::Panic) => panic!("fetcher blew up on {url}"),
            None => Err(RoundTripError::HttpStatus {
                status: 404,
                url: url.to_string(),
            }),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub struct ScriptedTool {
    pub stdout: Vec<u8>,
    pub snippets: Mutex<Vec<String>>,
}

impl ScriptedTool {
    pub fn printing(stdout: &str) -> Self {
        Self {
            stdout: stdout.as_bytes().to_vec(),
            snippets: Mutex::new(Vec::new()),
        }
    }

    pub fn silent() -> Self {
        Self::printing("")
    }
}

impl ComparisonTool for ScriptedTool {
    fn run(&self, _file_a: &Utf8Path, _file_b: &Utf8Path, snippet: &str) -> Vec<u8> {
        self.snippets.lock().unwrap().push(snippet.to_string());
        self.stdout.clone()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

pub fn model_url(model: &str) -> String {
    vdb_roundtrip::catalog::model_url(model)
}

/// Executable `/bin/sh` script in `dir`; `@DIR@` in `body` expands to `dir`.
#[cfg(unix)]
pub fn stub_tool(dir: &Utf8Path, name: &str, body: &str) -> Utf8PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    let script = format!("#!/bin/sh\n{}\n", body.replace("@DIR@", dir.as_str()));
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
