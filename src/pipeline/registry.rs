// SPDX-License-Identifier: GPL-2.0-or-later
//
// "Virtual download" registry: a finished (or in-progress, for mux
// mode) pipeline is registered under a fresh uuid and surfaced at a
// single-use URL. The HTTP layer pops an entry (get-then-delete) to
// start streaming it, so the same uuid can never serve twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use uuid::Uuid;

use crate::output::PipelineOutput;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DownloadMode {
    Raw,
    Mux,
}

pub struct VirtualDownload {
    pub filename: String,
    pub mode: DownloadMode,
    pub output: PipelineOutput,
    consumed: Arc<Notify>,
}

/// Process-wide singleton, injected rather than reached for as an
/// ambient global (see [`crate`] module docs).
#[derive(Clone, Default)]
pub struct DownloadRegistry {
    inner: Arc<Mutex<HashMap<Uuid, VirtualDownload>>>,
}

impl DownloadRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register(&self, filename: String, mode: DownloadMode, output: PipelineOutput) -> Uuid {
        self.register_tracked(filename, mode, output).0
    }

    /// Like [`Self::register`], but also returns a handle the
    /// registering task can `.notified().await` on (with a timeout)
    /// to detect whether an HTTP client ever actually popped the
    /// download — the basis for `ExportTimeout`.
    #[must_use]
    pub fn register_tracked(
        &self,
        filename: String,
        mode: DownloadMode,
        output: PipelineOutput,
    ) -> (Uuid, Arc<Notify>) {
        let id = Uuid::new_v4();
        let consumed = Arc::new(Notify::new());
        self.inner.lock().expect("registry mutex poisoned").insert(
            id,
            VirtualDownload {
                filename,
                mode,
                output,
                consumed: consumed.clone(),
            },
        );
        (id, consumed)
    }

    /// Get-then-delete: `None` if `id` was never registered or has
    /// already been popped once. Wakes any task waiting on the
    /// `Notify` returned from [`Self::register_tracked`].
    #[must_use]
    pub fn pop(&self, id: Uuid) -> Option<VirtualDownload> {
        let entry = self
            .inner
            .lock()
            .expect("registry mutex poisoned")
            .remove(&id);
        if let Some(entry) = &entry {
            entry.consumed.notify_waiters();
        }
        entry
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().expect("registry mutex poisoned").len()
    }
}

/// Path a registered download is surfaced at, relative to the
/// extension origin: `/streams/{uuid}/{urlencoded filename}`.
#[must_use]
pub fn url_path(id: Uuid, filename: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(filename.as_bytes()).collect();
    format!("/streams/{id}/{encoded}")
}

/// `Content-Type` by output filename extension.
#[must_use]
pub fn content_type_for_filename(filename: &str) -> &'static str {
    if filename.ends_with(".mp4") {
        "video/mp4"
    } else if filename.ends_with(".m4a") {
        "audio/mp4"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for_filename("video.mp4"), "video/mp4");
        assert_eq!(content_type_for_filename("audio.m4a"), "audio/mp4");
        assert_eq!(
            content_type_for_filename("segment-1.m4s"),
            "application/octet-stream"
        );
    }

    #[test]
    fn url_path_encodes_spaces_in_filename() {
        let id = Uuid::nil();
        let path = url_path(id, "my video.mp4");
        assert_eq!(
            path,
            format!("/streams/{id}/my+video.mp4")
        );
    }

    #[test]
    fn pop_is_at_most_once() {
        let reg = DownloadRegistry::new();
        let id = reg.register(
            "a.mp4".to_owned(),
            DownloadMode::Raw,
            PipelineOutput::empty_for_test(),
        );
        assert!(reg.pop(id).is_some());
        assert!(reg.pop(id).is_none());
    }
}
