// SPDX-License-Identifier: GPL-2.0-or-later
//
// The streamed body of a virtual download: an in-memory header prefix
// followed by an ordered queue of on-disk byte ranges, read out one
// at a time. Grounded on `src/vod/vod.rs`'s `VodReader`, which serves
// a recording's `moov` plus its frame files the same way — switching
// between an in-memory prefix and a sequence of on-disk segments
// without ever materializing the whole output in memory. Unlike
// `VodReader` this never holds a `Future` across polls that itself
// needs pinning: `tokio::fs::File` is `Unpin`, and the open+seek step
// is driven by a boxed future stored inline, so the outer struct
// needs no `pin_project` of its own.

use std::collections::VecDeque;
use std::future::Future;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeekExt, ReadBuf};

use crate::error::PipelineError;
use crate::mux::{self, OutputMetadata};
use crate::track::Track;

#[derive(Debug, Clone)]
struct Segment {
    path: PathBuf,
    offset: u64,
    len: u64,
}

type OpenFut = Pin<Box<dyn Future<Output = std::io::Result<File>> + Send>>;

enum SegmentState {
    Idle,
    Opening(OpenFut, u64),
    Reading { file: File, remaining: u64 },
}

/// Raw-mode passthrough of one file, or a mux-mode
/// `ftyp+moov+mdat-header` prefix followed by every chunk's source
/// bytes. `content_length` is `Some` only for raw mode, per the
/// "`Content-Length` iff mode is raw and the size is known" rule.
pub struct PipelineOutput {
    header: Vec<u8>,
    header_pos: usize,
    segments: VecDeque<Segment>,
    state: SegmentState,
    content_length: Option<u64>,
}

impl PipelineOutput {
    /// A single already-fully-downloaded file, served verbatim.
    #[must_use]
    pub fn for_raw(path: PathBuf, len: u64) -> Self {
        Self {
            header: Vec::new(),
            header_pos: 0,
            segments: VecDeque::from([Segment { path, offset: 0, len }]),
            state: SegmentState::Idle,
            content_length: Some(len),
        }
    }

    /// The muxed `ftyp+moov+mdat` stream: an in-memory header built up
    /// front, then each chunk's sample bytes read from its source
    /// fragment file in fragment-arrival order.
    pub fn for_mux(
        video: &Track,
        audio: &Track,
        metadata: &OutputMetadata,
    ) -> Result<Self, PipelineError> {
        let (header, order) = mux::build_header_and_order(video, audio, metadata)?;
        let segments = order
            .into_iter()
            .map(|(is_video, idx)| {
                let chunk = if is_video {
                    &video.chunks[idx]
                } else {
                    &audio.chunks[idx]
                };
                Segment {
                    path: chunk.source_file.clone(),
                    offset: chunk.mdat_offset_in_input,
                    len: chunk.payload_len,
                }
            })
            .collect();
        Ok(Self {
            header,
            header_pos: 0,
            segments,
            state: SegmentState::Idle,
            content_length: None,
        })
    }

    /// `Content-Length`, when known up front (raw mode only).
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    #[cfg(test)]
    #[must_use]
    pub fn empty_for_test() -> Self {
        Self {
            header: Vec::new(),
            header_pos: 0,
            segments: VecDeque::new(),
            state: SegmentState::Idle,
            content_length: Some(0),
        }
    }
}

impl AsyncRead for PipelineOutput {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        if this.header_pos < this.header.len() {
            let remaining = &this.header[this.header_pos..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.header_pos += n;
            return Poll::Ready(Ok(()));
        }

        loop {
            match &mut this.state {
                SegmentState::Idle => {
                    let Some(seg) = this.segments.pop_front() else {
                        return Poll::Ready(Ok(()));
                    };
                    let path = seg.path;
                    let offset = seg.offset;
                    let fut: OpenFut = Box::pin(async move {
                        let mut file = File::open(path).await?;
                        file.seek(SeekFrom::Start(offset)).await?;
                        Ok(file)
                    });
                    this.state = SegmentState::Opening(fut, seg.len);
                }
                SegmentState::Opening(fut, len) => match fut.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Ready(Ok(file)) => {
                        this.state = SegmentState::Reading {
                            file,
                            remaining: *len,
                        };
                    }
                },
                SegmentState::Reading { file, remaining } => {
                    if *remaining == 0 {
                        this.state = SegmentState::Idle;
                        continue;
                    }
                    let want = (*remaining).min(buf.remaining() as u64);
                    let want = usize::try_from(want).unwrap_or(usize::MAX);
                    let mut limited = buf.take(want);
                    match Pin::new(&mut *file).poll_read(cx, &mut limited) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                        Poll::Ready(Ok(())) => {
                            let n = limited.filled().len();
                            buf.advance(n);
                            if n == 0 {
                                return Poll::Ready(Err(std::io::Error::new(
                                    std::io::ErrorKind::UnexpectedEof,
                                    "source fragment truncated before chunk payload was fully read",
                                )));
                            }
                            *remaining -= n as u64;
                            return Poll::Ready(Ok(()));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn raw_mode_streams_file_contents_and_reports_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp4");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let mut output = PipelineOutput::for_raw(path, 11);
        assert_eq!(output.content_length(), Some(11));

        let mut out = Vec::new();
        output.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn mux_mode_has_no_content_length() {
        let output = PipelineOutput::empty_for_test();
        assert_eq!(output.content_length(), None);
    }

    #[tokio::test]
    async fn header_then_segments_stream_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let seg_path = dir.path().join("seg.bin");
        tokio::fs::write(&seg_path, b"CHUNKDATA").await.unwrap();

        let mut output = PipelineOutput {
            header: b"HEADER".to_vec(),
            header_pos: 0,
            segments: VecDeque::from([Segment {
                path: seg_path,
                offset: 2,
                len: 5,
            }]),
            state: SegmentState::Idle,
            content_length: None,
        };

        let mut out = Vec::new();
        output.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"HEADERUNKDA");
    }
}
