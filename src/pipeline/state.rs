// SPDX-License-Identifier: GPL-2.0-or-later
//
// The C5 state machine: `Resolving -> DownloadAudio -> [SaveAudio|-] ->
// DownloadVideo -> [SaveVideo|Processing(Mux)] -> Attachments -> Done`,
// with `Cancelled`/`Error(retryable)` reachable from any state. Audio
// comes before video so peak disk usage is `max(audio, video) + init`
// and an auth failure surfaces before the expensive video pull.
// Grounded on the teacher's `src/monitor/monitor.rs` run-loop shape: a
// single owning task driving an explicit state enum, checking one
// `cancelled` flag between every suspension point, rather than a
// select!-on-everything loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{ArcLogger, EnvConfig, LogEntry, LogLevel};
use fetch::ChunkedFetcher;
use spfs::Spfs;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::mux::OutputMetadata;
use crate::output::PipelineOutput;
use crate::probe;
use crate::registry::{DownloadMode, DownloadRegistry};
use crate::track::{self, Track};

/// A single network/IO op (one mirror probe, one part fetch) beyond
/// this is treated as failed and handed back to C4's retry/failover.
const OP_TIMEOUT: Duration = Duration::from_secs(15);

/// How long a registered virtual download waits for an HTTP client to
/// pop it before the run errors out with `ExportTimeout`.
const EXPORT_TIMEOUT: Duration = Duration::from_secs(60);

/// One extra file pulled alongside the media — a cover image or
/// subtitle track — saved through C2 the same way raw audio/video
/// streams are, never muxed into the output container.
pub struct Attachment {
    pub filename: String,
    pub mirrors: Vec<Url>,
}

/// What a successful `Resolving` step hands the driver.
pub struct ResolvedMedia {
    pub output_filename: String,
    pub video_mirrors: Vec<Url>,
    pub audio_mirrors: Vec<Url>,
    pub attachments: Vec<Attachment>,
}

/// The `Resolving` step itself: turns a request (bvid/cid/quality,
/// whatever the caller holds) into download-ready mirrors. A thin
/// seam so the FSM driver never has to know about nav/view/playurl
/// signing directly — left for the API client to implement.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, cancel: &CancellationToken) -> Result<ResolvedMedia, PipelineError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Resolving,
    DownloadAudio,
    SaveAudio,
    DownloadVideo,
    SaveVideo,
    Processing,
    Attachments,
    Done,
    Cancelled,
}

impl PipelineState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Resolving => "Resolving",
            PipelineState::DownloadAudio => "DownloadAudio",
            PipelineState::SaveAudio => "SaveAudio",
            PipelineState::DownloadVideo => "DownloadVideo",
            PipelineState::SaveVideo => "SaveVideo",
            PipelineState::Processing => "Processing",
            PipelineState::Attachments => "Attachments",
            PipelineState::Done => "Done",
            PipelineState::Cancelled => "Cancelled",
        }
    }
}

/// One registered virtual download left behind by a completed run,
/// ready to be streamed out over HTTP.
#[derive(Clone)]
pub struct RegisteredFile {
    pub registry_id: Uuid,
    pub url_path: String,
    pub filename: String,
}

/// What a completed run leaves behind. Raw mode registers two media
/// files (audio, video); mux mode registers one. Attachments are
/// saved through C2 but, being best-effort, are only registered if
/// they were actually fetched.
pub struct PipelineResult {
    pub media: Vec<RegisteredFile>,
    pub attachments: Vec<RegisteredFile>,
}

/// Drives one pipeline run from `Resolving` to `Done`. Owns no
/// pipeline state itself between runs — every field is a handle to a
/// shared resource (C1's registry, C2's worker, C4's client) injected
/// by the caller, matching the teacher's convention of passing
/// `ArcLogger`/`DynEnvConfig` in rather than reaching for a global.
pub struct Driver {
    fetcher: ChunkedFetcher,
    spfs: Spfs,
    registry: DownloadRegistry,
    env: Arc<dyn EnvConfig + Send + Sync>,
    logger: ArcLogger,
    /// Fed one `RegisteredFile` at the moment it's registered, so a
    /// caller serving the HTTP side can learn a download's URL while
    /// `run` is still blocked in its own `Done`-phase wait rather than
    /// only after every file has already been popped.
    on_registered: Option<mpsc::UnboundedSender<RegisteredFile>>,
}

impl Driver {
    #[must_use]
    pub fn new(
        fetcher: ChunkedFetcher,
        spfs: Spfs,
        registry: DownloadRegistry,
        env: Arc<dyn EnvConfig + Send + Sync>,
        logger: ArcLogger,
    ) -> Self {
        Self {
            fetcher,
            spfs,
            registry,
            env,
            logger,
            on_registered: None,
        }
    }

    /// Attaches a channel that receives a copy of every `RegisteredFile`
    /// as soon as it's registered, ahead of `run`'s return. Without one,
    /// a caller has no way to learn a download's URL before `run`
    /// itself finishes waiting for that same URL to be fetched.
    #[must_use]
    pub fn with_registration_feed(mut self, tx: mpsc::UnboundedSender<RegisteredFile>) -> Self {
        self.on_registered = Some(tx);
        self
    }

    fn announce_registered(&self, reg: &RegisteredFile) {
        if let Some(tx) = &self.on_registered {
            let _ = tx.send(reg.clone());
        }
    }

    fn log(&self, level: LogLevel, message: String) {
        self.logger
            .log(LogEntry::new(level, "pipeline", message));
    }

    fn enter(&self, state: PipelineState) {
        self.log(LogLevel::Info, format!("state={}", state.as_str()));
    }

    /// Runs one download end to end. `work_dir` holds the transient
    /// part/fragment files for the duration of the run; mux-mode
    /// fragment files are left behind for `PipelineOutput` to stream
    /// from afterwards, raw-mode ones are handed off to C2 and
    /// removed locally.
    pub async fn run(
        &self,
        resolver: &dyn Resolver,
        mode: DownloadMode,
        metadata: OutputMetadata,
        work_dir: &Path,
        cancel: CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        match self.run_inner(resolver, mode, metadata, work_dir, &cancel).await {
            Ok(result) => Ok(result),
            Err(PipelineError::Cancelled) => {
                self.enter(PipelineState::Cancelled);
                cleanup(work_dir).await;
                Err(PipelineError::Cancelled)
            }
            Err(e) => {
                self.log(
                    LogLevel::Error,
                    format!("pipeline failed: {e} (retryable={})", e.retryable()),
                );
                cleanup(work_dir).await;
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        resolver: &dyn Resolver,
        mode: DownloadMode,
        metadata: OutputMetadata,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        self.enter(PipelineState::Resolving);
        let resolved = resolver.resolve(cancel).await?;
        check_cancelled(cancel)?;

        let thread_count = self.env.thread_count().clamp(1, 16);

        self.enter(PipelineState::DownloadAudio);
        let audio_stream = download_stream(
            &self.fetcher,
            &resolved.audio_mirrors,
            thread_count,
            work_dir,
            "audio",
            cancel,
        )
        .await?;
        check_cancelled(cancel)?;

        let audio_filename = audio_output_filename(&resolved.output_filename);
        if mode == DownloadMode::Raw {
            self.enter(PipelineState::SaveAudio);
            self.save_raw(&audio_stream.path, &audio_filename).await?;
        }

        self.enter(PipelineState::DownloadVideo);
        let video_stream = download_stream(
            &self.fetcher,
            &resolved.video_mirrors,
            thread_count,
            work_dir,
            "video",
            cancel,
        )
        .await?;
        check_cancelled(cancel)?;

        let mut media = Vec::with_capacity(2);
        let mut waits: Vec<Arc<Notify>> = Vec::with_capacity(2);
        match mode {
            DownloadMode::Raw => {
                self.enter(PipelineState::SaveVideo);
                let video_filename = video_output_filename(&resolved.output_filename);
                self.save_raw(&video_stream.path, &video_filename).await?;
                let (reg, notify) = self.register_raw(&video_filename, mode).await?;
                self.announce_registered(&reg);
                media.push(reg);
                waits.push(notify);

                let (reg, notify) = self.register_raw(&audio_filename, mode).await?;
                self.announce_registered(&reg);
                media.push(reg);
                waits.push(notify);
            }
            DownloadMode::Mux => {
                self.enter(PipelineState::Processing);
                let video = parse_and_demux_track(&video_stream.path, 1, true).await?;
                let audio = parse_and_demux_track(&audio_stream.path, 2, false).await?;
                let output = PipelineOutput::for_mux(&video, &audio, &metadata)?;
                let filename = resolved.output_filename.clone();
                let (id, notify) = self.registry.register_tracked(filename.clone(), mode, output);
                let reg = RegisteredFile {
                    registry_id: id,
                    url_path: crate::registry::url_path(id, &filename),
                    filename,
                };
                self.announce_registered(&reg);
                media.push(reg);
                waits.push(notify);
            }
        };
        check_cancelled(cancel)?;

        self.enter(PipelineState::Attachments);
        let mut attachments = Vec::with_capacity(resolved.attachments.len());
        for attachment in &resolved.attachments {
            check_cancelled(cancel)?;
            match self
                .fetch_and_save_attachment(attachment, thread_count, work_dir, cancel, mode)
                .await
            {
                Ok(reg) => attachments.push(reg),
                Err(e) => {
                    // An attachment is best-effort: its absence never
                    // fails a run that already has its media.
                    self.log(
                        LogLevel::Warning,
                        format!("attachment {} failed: {e}", attachment.filename),
                    );
                }
            }
        }

        self.enter(PipelineState::Done);
        let wait_for_all = async {
            for notify in &waits {
                notify.notified().await;
            }
        };
        match tokio::time::timeout(EXPORT_TIMEOUT, wait_for_all).await {
            Ok(()) => Ok(PipelineResult { media, attachments }),
            Err(_) => Err(PipelineError::ExportTimeout),
        }
    }

    /// Copies `local_path` into C2 in fixed-size chunks rather than
    /// reading the whole (potentially multi-gigabyte) stream into
    /// memory at once.
    async fn save_raw(&self, local_path: &Path, filename: &str) -> Result<(), PipelineError> {
        const COPY_CHUNK: usize = 1024 * 1024;

        let mut src = tokio::fs::File::open(local_path).await?;
        let handle = self.spfs.open(filename).await?;
        let mut buf = vec![0u8; COPY_CHUNK];
        loop {
            let n = tokio::io::AsyncReadExt::read(&mut src, &mut buf).await?;
            if n == 0 {
                break;
            }
            self.spfs.write(handle, buf[..n].to_vec()).await?;
        }
        self.spfs.close(handle).await?;
        Ok(())
    }

    /// Registers an already-spfs-saved file as a virtual download,
    /// returning the handle and its `Notify` so the caller can wait
    /// for it to be consumed.
    async fn register_raw(
        &self,
        filename: &str,
        mode: DownloadMode,
    ) -> Result<(RegisteredFile, Arc<Notify>), PipelineError> {
        let len = self.spfs.check(filename).await?.1;
        let output = PipelineOutput::for_raw(self.spfs_file_path(filename), len);
        let (id, notify) = self
            .registry
            .register_tracked(filename.to_owned(), mode, output);
        Ok((
            RegisteredFile {
                registry_id: id,
                url_path: crate::registry::url_path(id, filename),
                filename: filename.to_owned(),
            },
            notify,
        ))
    }

    fn spfs_file_path(&self, filename: &str) -> PathBuf {
        self.env.spfs_root().join(filename)
    }

    async fn fetch_and_save_attachment(
        &self,
        attachment: &Attachment,
        thread_count: u8,
        work_dir: &Path,
        cancel: &CancellationToken,
        mode: DownloadMode,
    ) -> Result<RegisteredFile, PipelineError> {
        let stream = download_stream(
            &self.fetcher,
            &attachment.mirrors,
            thread_count,
            work_dir,
            &attachment.filename,
            cancel,
        )
        .await?;
        self.save_raw(&stream.path, &attachment.filename).await?;
        let _ = tokio::fs::remove_file(&stream.path).await;
        let (reg, _notify) = self.register_raw(&attachment.filename, mode).await?;
        self.announce_registered(&reg);
        Ok(reg)
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

fn audio_output_filename(base: &str) -> String {
    format!("{base}.audio.m4a")
}

fn video_output_filename(base: &str) -> String {
    format!("{base}.video.m4s")
}

struct DownloadedStream {
    path: PathBuf,
    len: u64,
}

/// Downloads one elementary stream in full: a growing-prefix probe
/// (also the `ftyp`+`moov` check) followed by `thread_count` parallel
/// ranged fetches for the remainder, concatenated in partition order.
/// The probe's bytes are never re-fetched.
async fn download_stream(
    fetcher: &ChunkedFetcher,
    mirrors: &[Url],
    thread_count: u8,
    work_dir: &Path,
    label: &str,
    cancel: &CancellationToken,
) -> Result<DownloadedStream, PipelineError> {
    let (_mirror, total_len) = tokio::time::timeout(OP_TIMEOUT, fetcher.probe_length(mirrors))
        .await
        .map_err(|_| PipelineError::Network(format!("{label}: size probe timed out")))??;

    let probe_path = work_dir.join(format!("{label}.init.probe"));
    let probe_bytes = probe::probe_init_segment(fetcher, mirrors, &probe_path, cancel.clone()).await?;
    let probe_len = u64::try_from(probe_bytes.len()).unwrap_or(total_len);

    let dest_path = work_dir.join(format!("{label}.bin"));
    if probe_len >= total_len {
        tokio::fs::rename(&probe_path, &dest_path).await?;
        return Ok(DownloadedStream {
            path: dest_path,
            len: total_len,
        });
    }

    let remaining = total_len - probe_len;
    let ranges: Vec<(u64, u64)> = fetch::partition_ranges(remaining, thread_count)
        .into_iter()
        .map(|(start, end)| (start + probe_len, end + probe_len))
        .collect();

    let mut part_paths = vec![probe_path];
    let mut handles = Vec::with_capacity(ranges.len());
    for (i, range) in ranges.into_iter().enumerate() {
        let part_path = work_dir.join(format!("{label}.part{i}"));
        part_paths.push(part_path.clone());
        let fetcher = fetcher.clone();
        let mirrors = mirrors.to_vec();
        let cancel = cancel.clone();
        let label = label.to_owned();
        handles.push(tokio::spawn(async move {
            fetcher
                .fetch_part(&mirrors, range, &part_path, Arc::new(|_, _| {}), cancel)
                .await
                .map_err(PipelineError::from)
                .map_err(|e| tag_part_error(&label, i, e))
        }));
    }

    for handle in handles {
        handle
            .await
            .map_err(|e| PipelineError::Fatal(format!("download task panicked: {e}")))??;
    }

    let mut dest = tokio::fs::File::create(&dest_path).await?;
    let written = fetch::concat_parts(&part_paths, &mut dest).await?;
    for part in &part_paths {
        let _ = tokio::fs::remove_file(part).await;
    }

    Ok(DownloadedStream {
        path: dest_path,
        len: written,
    })
}

fn tag_part_error(label: &str, index: usize, e: PipelineError) -> PipelineError {
    match e {
        PipelineError::Network(msg) => PipelineError::Network(format!("{label} part {index}: {msg}")),
        other => other,
    }
}

/// Parses the init segment and every following `moof`/`mdat` fragment
/// out of one downloaded stream file, reading it into memory once and
/// sharing that buffer between both steps rather than re-reading a
/// potentially multi-gigabyte file a second time.
async fn parse_and_demux_track(path: &Path, track_id: u32, is_video: bool) -> Result<Track, PipelineError> {
    let buf = tokio::fs::read(path).await?;
    let mut track = track::parse_init_segment(&buf, track_id, is_video)?;
    track::append_fragment(&mut track, &buf, path.to_path_buf())?;
    Ok(track)
}

/// Best-effort recursive removal of a run's scratch directory; a
/// failure here is logged nowhere on purpose — it never overrides the
/// error that triggered it.
async fn cleanup(work_dir: &Path) {
    let _ = tokio::fs::remove_dir_all(work_dir).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::DummyLogger;
    use pretty_assertions::assert_eq;

    struct FakeEnv;

    impl EnvConfig for FakeEnv {
        fn thread_count(&self) -> u8 {
            1
        }
        fn cooldown_secs(&self) -> u64 {
            0
        }
        fn spfs_root(&self) -> &Path {
            Path::new("/tmp")
        }
        fn log_level(&self) -> LogLevel {
            LogLevel::Debug
        }
        fn port(&self) -> u16 {
            0
        }
        fn raw(&self) -> &str {
            ""
        }
    }

    fn test_driver() -> Driver {
        Driver::new(
            ChunkedFetcher::new(tokio::runtime::Handle::current()),
            Spfs::new(std::env::temp_dir(), DummyLogger::new()),
            DownloadRegistry::new(),
            Arc::new(FakeEnv),
            DummyLogger::new(),
        )
    }

    #[tokio::test]
    async fn announce_registered_is_a_noop_without_a_feed() {
        let driver = test_driver();
        let reg = RegisteredFile {
            registry_id: Uuid::nil(),
            url_path: "/streams/nil/x.mp4".to_owned(),
            filename: "x.mp4".to_owned(),
        };
        // No channel attached: this must not panic.
        driver.announce_registered(&reg);
    }

    #[tokio::test]
    async fn with_registration_feed_surfaces_every_registered_file() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver = test_driver().with_registration_feed(tx);
        let reg = RegisteredFile {
            registry_id: Uuid::nil(),
            url_path: "/streams/nil/x.mp4".to_owned(),
            filename: "x.mp4".to_owned(),
        };

        driver.announce_registered(&reg);

        let received = rx.recv().await.expect("feed should carry the registration");
        assert_eq!(received.filename, "x.mp4");
        assert_eq!(received.url_path, "/streams/nil/x.mp4");
    }

    #[test]
    fn audio_and_video_filenames_are_distinct() {
        assert_eq!(audio_output_filename("clip"), "clip.audio.m4a");
        assert_eq!(video_output_filename("clip"), "clip.video.m4s");
        assert_ne!(audio_output_filename("clip"), video_output_filename("clip"));
    }

    #[test]
    fn cancelled_check_reports_pipeline_error() {
        let cancel = CancellationToken::new();
        assert!(check_cancelled(&cancel).is_ok());
        cancel.cancel();
        assert!(matches!(check_cancelled(&cancel), Err(PipelineError::Cancelled)));
    }

    #[test]
    fn tag_part_error_prefixes_network_errors_only() {
        let tagged = tag_part_error("video", 2, PipelineError::Network("boom".to_owned()));
        assert!(matches!(tagged, PipelineError::Network(msg) if msg == "video part 2: boom"));

        let tagged = tag_part_error("video", 2, PipelineError::Fatal("boom".to_owned()));
        assert!(matches!(tagged, PipelineError::Fatal(msg) if msg == "boom"));
    }
}
