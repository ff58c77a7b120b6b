// SPDX-License-Identifier: GPL-2.0-or-later
//
// Preloads the leading bytes of an init segment and confirms
// `ftyp`+`moov` both parse before the pipeline commits to downloading
// the rest of a track. Grounded on `fetch::ChunkedFetcher::probe_one`'s
// range-probe pattern, extended from a single 0-0 byte check to a
// growing prefix read.

use std::path::Path;
use std::sync::Arc;

use fetch::ChunkedFetcher;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::PipelineError;

const INITIAL_PROBE_LEN: u64 = 128 * 1024;
const PROBE_STEP: u64 = 128 * 1024;
const MAX_PROBE_LEN: u64 = 2 * 1024 * 1024;

/// Downloads a growing prefix of `mirrors` into `dest_path`, 128 KiB
/// at a time, until `ftyp`+`moov` both parse out of it, up to
/// [`MAX_PROBE_LEN`]. Returns the bytes read on success.
pub async fn probe_init_segment(
    fetcher: &ChunkedFetcher,
    mirrors: &[Url],
    dest_path: &Path,
    cancel: CancellationToken,
) -> Result<Vec<u8>, PipelineError> {
    let mut probe_len = INITIAL_PROBE_LEN;
    loop {
        fetcher
            .fetch_part(
                mirrors,
                (0, probe_len - 1),
                dest_path,
                Arc::new(|_, _| {}),
                cancel.clone(),
            )
            .await?;

        let buf = tokio::fs::read(dest_path).await?;
        if init_segment_complete(&buf) {
            return Ok(buf);
        }

        if probe_len >= MAX_PROBE_LEN {
            return Err(PipelineError::Fatal(format!(
                "ftyp+moov not found within {MAX_PROBE_LEN} bytes of init segment"
            )));
        }
        probe_len = (probe_len + PROBE_STEP).min(MAX_PROBE_LEN);
    }
}

/// `true` once both `ftyp` and a complete `moov` box parse out of `buf`.
fn init_segment_complete(buf: &[u8]) -> bool {
    mp4::find_box(buf, &[*b"ftyp"]).is_ok() && mp4::find_box(buf, &[*b"moov"]).is_ok()
}
