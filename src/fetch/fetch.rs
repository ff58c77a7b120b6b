// SPDX-License-Identifier: GPL-2.0-or-later

//! Parallel ranged HTTP downloading with mirror failover. Generalized
//! from the single-shot whole-file `fetch()` the teacher uses to pull
//! a detection model file into a multi-part, resumable, mirror-aware
//! one.

use http_body_util::{BodyExt, Full};
use hyper::{body::Bytes, header, Request, StatusCode};
use hyper_util::client::legacy::Client;
use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncSeekExt, AsyncWriteExt},
};
use tokio_util::sync::CancellationToken;
use url::Url;

/// A single `client.request()` round-trip or a single body frame read
/// must land within this long, or the attempt counts as a failure and
/// the caller's mirror/retry failover takes over.
const SINGLE_OP_TIMEOUT: Duration = Duration::from_secs(15);

/// Hosts matching any of these substrings are never attempted, even
/// as a last resort — PCDN/transparent-cache mirrors are frequently
/// unreachable from outside the ISP that advertised them.
pub const BLACKLISTED_HOST_SUBSTRINGS: &[&str] = [
    "mcdn",
    "szbdyd",
    "cn-gotcha",
    "pcdn",
    "bilivideo.cn",
    "mountaintoys",
]
.as_slice();

pub const MIN_PART_SIZE: u64 = 256 * 1024;
pub const MAX_RETRIES_PER_PART: u32 = 3;
const STREAM_CHUNK_HINT: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("connect: {0}")]
    Connect(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("body: {0}")]
    Body(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("all mirrors exhausted")]
    AllMirrorsExhausted,

    #[error("cancelled")]
    Cancelled,

    #[error("operation timed out")]
    Timeout,
}

#[must_use]
pub fn is_blacklisted_host(host: &str) -> bool {
    BLACKLISTED_HOST_SUBSTRINGS
        .iter()
        .any(|needle| host.contains(needle))
}

/// Drops blacklisted mirrors outright, preserving the relative order
/// of the rest.
#[must_use]
pub fn usable_mirrors(mirrors: &[Url]) -> Vec<Url> {
    mirrors
        .iter()
        .filter(|u| !u.host_str().is_some_and(is_blacklisted_host))
        .cloned()
        .collect()
}

/// Splits `total_len` into at most `thread_count` parts, reducing the
/// count until every part is at least [`MIN_PART_SIZE`] (the last
/// part absorbs the remainder). Returns inclusive byte ranges.
#[must_use]
pub fn partition_ranges(total_len: u64, thread_count: u8) -> Vec<(u64, u64)> {
    if total_len == 0 {
        return vec![(0, 0)];
    }
    let mut n = u64::from(thread_count.max(1));
    while n > 1 && total_len / n < MIN_PART_SIZE {
        n -= 1;
    }
    let part_size = total_len / n;
    let mut ranges = Vec::with_capacity(usize::try_from(n).unwrap_or(usize::MAX));
    let mut start = 0u64;
    for i in 0..n {
        let end = if i == n - 1 {
            total_len - 1
        } else {
            start + part_size - 1
        };
        ranges.push((start, end));
        start = end + 1;
    }
    ranges
}

type HttpsClient = Client<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>, Full<Bytes>>;

#[derive(Clone)]
struct SpawnExecutor(tokio::runtime::Handle);

impl<Fut> hyper::rt::Executor<Fut> for SpawnExecutor
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    fn execute(&self, fut: Fut) {
        self.0.spawn(fut);
    }
}

/// Progress reported per part: `(written_so_far, total)`, guaranteed
/// monotonically non-decreasing within a single part.
pub type ProgressCb = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Clone)]
pub struct ChunkedFetcher {
    client: HttpsClient,
}

impl ChunkedFetcher {
    #[must_use]
    pub fn new(rt_handle: tokio::runtime::Handle) -> Self {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(SpawnExecutor(rt_handle)).build(https);
        Self { client }
    }

    /// Probes mirrors in order with `Range: bytes=0-0`, skipping
    /// blacklisted hosts, and returns the first reachable mirror plus
    /// the resource's total length (from `Content-Range`).
    pub async fn probe_length(&self, mirrors: &[Url]) -> Result<(Url, u64), FetchError> {
        for mirror in usable_mirrors(mirrors) {
            match self.probe_one(&mirror).await {
                Ok(len) => return Ok((mirror, len)),
                Err(_) => continue,
            }
        }
        Err(FetchError::AllMirrorsExhausted)
    }

    async fn probe_one(&self, url: &Url) -> Result<u64, FetchError> {
        let req = build_request(url, 0, 0)?;
        let res = tokio::time::timeout(SINGLE_OP_TIMEOUT, self.client.request(req))
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::Connect(e.to_string()))?;
        if !matches!(
            res.status(),
            StatusCode::PARTIAL_CONTENT | StatusCode::OK
        ) {
            return Err(FetchError::Status(res.status().as_u16()));
        }
        content_range_total(res.headers())
    }

    /// Downloads `[start, end]` (inclusive) of `url` into `dest`,
    /// truncating any existing content first. Used by `fetch_part`
    /// for a single attempt; callers handle retry/failover.
    async fn stream_range(
        &self,
        url: &Url,
        start: u64,
        end: u64,
        dest: &mut File,
        resume_offset: u64,
        total_part_len: u64,
        progress: &ProgressCb,
        cancel: &CancellationToken,
    ) -> Result<(), FetchError> {
        let req = build_request(url, start, end)?;
        let res = tokio::time::timeout(SINGLE_OP_TIMEOUT, self.client.request(req))
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::Connect(e.to_string()))?;
        if !matches!(
            res.status(),
            StatusCode::PARTIAL_CONTENT | StatusCode::OK
        ) {
            return Err(FetchError::Status(res.status().as_u16()));
        }

        let mut written = resume_offset;
        let mut body = res.into_body();
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let Some(frame) = tokio::time::timeout(SINGLE_OP_TIMEOUT, body.frame())
                .await
                .map_err(|_| FetchError::Timeout)?
            else {
                break;
            };
            let frame = frame.map_err(|e| FetchError::Body(e.to_string()))?;
            let Some(data) = frame.data_ref() else {
                continue;
            };
            for chunk in data.chunks(STREAM_CHUNK_HINT) {
                dest.write_all(chunk).await?;
                written += u64::try_from(chunk.len()).unwrap_or(u64::MAX);
                progress(written, total_part_len);
            }
        }
        dest.flush().await?;
        Ok(())
    }

    /// Fetches one part to `dest_path`, retrying the active mirror up
    /// to [`MAX_RETRIES_PER_PART`] times from the last persisted
    /// offset before advancing to the next mirror.
    pub async fn fetch_part(
        &self,
        mirrors: &[Url],
        range: (u64, u64),
        dest_path: &Path,
        progress: ProgressCb,
        cancel: CancellationToken,
    ) -> Result<u64, FetchError> {
        let (range_start, range_end) = range;
        let total_part_len = range_end - range_start + 1;
        let mirrors = usable_mirrors(mirrors);
        if mirrors.is_empty() {
            return Err(FetchError::AllMirrorsExhausted);
        }

        let mut file = File::create(dest_path).await?;
        let mut resume_offset = 0u64;

        for mirror in &mirrors {
            let mut retries = 0;
            loop {
                if cancel.is_cancelled() {
                    return Err(FetchError::Cancelled);
                }
                let attempt_start = range_start + resume_offset;
                if attempt_start > range_end {
                    return Ok(total_part_len);
                }
                file.seek(std::io::SeekFrom::Start(resume_offset)).await?;
                match self
                    .stream_range(
                        mirror,
                        attempt_start,
                        range_end,
                        &mut file,
                        resume_offset,
                        total_part_len,
                        &progress,
                        &cancel,
                    )
                    .await
                {
                    Ok(()) => return Ok(total_part_len),
                    Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
                    Err(_) if retries < MAX_RETRIES_PER_PART => {
                        retries += 1;
                        resume_offset = file.stream_position().await?;
                        continue;
                    }
                    Err(_) => break, // exhausted retries on this mirror, fall over
                }
            }
            resume_offset = file.stream_position().await?;
        }

        Err(FetchError::AllMirrorsExhausted)
    }
}

fn build_request(
    url: &Url,
    start: u64,
    end: u64,
) -> Result<Request<Full<Bytes>>, FetchError> {
    let uri = url
        .as_str()
        .parse()
        .map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::RANGE, format!("bytes={start}-{end}"))
        .body(Full::new(Bytes::new()))
        .map_err(|e| FetchError::InvalidUrl(e.to_string()))
}

fn content_range_total(headers: &http::HeaderMap) -> Result<u64, FetchError> {
    if let Some(range) = headers.get(header::CONTENT_RANGE) {
        let s = range.to_str().map_err(|e| FetchError::Body(e.to_string()))?;
        if let Some((_, total)) = s.rsplit_once('/') {
            if let Ok(total) = total.parse::<u64>() {
                return Ok(total);
            }
        }
    }
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .ok_or_else(|| FetchError::Body("missing content-length/content-range".to_owned()))
}

/// Concatenates part files (in partition order) into `dest`, the
/// final assembly step after every part has completed.
pub async fn concat_parts(parts: &[PathBuf], dest: &mut File) -> Result<u64, FetchError> {
    let mut total = 0u64;
    for part in parts {
        let mut src = File::open(part).await?;
        total += tokio::io::copy(&mut src, dest).await?;
    }
    Ok(total)
}
