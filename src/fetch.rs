use std::io::{Read, Write};
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tempfile::NamedTempFile;

use crate::error::RoundTripError;

/// Size of the buffer each download streams through.
pub const CHUNK_SIZE: usize = 64 * 1024;

pub trait ArchiveFetcher: Send + Sync {
    /// Downloads `url` to `destination`, returning the number of bytes written.
    fn fetch(&self, url: &str, destination: &Utf8Path) -> Result<u64, RoundTripError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, RoundTripError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("vdb-roundtrip/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RoundTripError::Http(err.to_string()))?,
        );
        // No overall timeout: large archives may legitimately take minutes.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .build()
            .map_err(|err| RoundTripError::Http(err.to_string()))?;
        Ok(Self { client })
    }

    fn handle_status(
        url: &str,
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, RoundTripError> {
        if response.status().is_success() {
            return Ok(response);
        }
        Err(RoundTripError::HttpStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        })
    }
}

impl ArchiveFetcher for HttpFetcher {
    fn fetch(&self, url: &str, destination: &Utf8Path) -> Result<u64, RoundTripError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| RoundTripError::Http(err.to_string()))?;
        let mut response = Self::handle_status(url, response)?;
        stream_to_file(&mut response, destination)
    }
}

/// Copies `reader` into `destination` one chunk at a time. The bytes land in a
/// sibling temporary file first so an interrupted transfer never leaves a
/// partial archive under the final name.
pub fn stream_to_file<R: Read>(reader: &mut R, destination: &Utf8Path) -> Result<u64, RoundTripError> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir.as_std_path())
        .map_err(|err| RoundTripError::Filesystem(format!("create temp file in {dir}: {err}")))?;

    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|err| RoundTripError::Http(err.to_string()))?;
        if read == 0 {
            break;
        }
        temp.write_all(&buffer[..read])
            .map_err(|err| RoundTripError::Filesystem(err.to_string()))?;
        written += read as u64;
    }
    temp.flush()
        .map_err(|err| RoundTripError::Filesystem(err.to_string()))?;
    temp.persist(destination.as_std_path())
        .map_err(|err| RoundTripError::Filesystem(format!("persist {destination}: {}", err.error)))?;
    Ok(written)
}
