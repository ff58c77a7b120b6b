// SPDX-License-Identifier: GPL-2.0-or-later

use thiserror::Error;

/// Every failure a pipeline run can end in, tagged with whether the
/// caller should retry. `cleanup()` runs regardless of which kind
/// fired; `retryable()` is what the FSM driver consults to decide
/// whether to advance a mirror/token and try again or surface the
/// error to the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("network: {0}")]
    Network(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("output destination busy: {0}")]
    FileBusy(String),

    #[error("api auth: {0}")]
    ApiAuth(String),

    #[error("api error: {0}")]
    ApiOther(String),

    #[error("host invalidated: {0}")]
    HostInvalidated(String),

    #[error("cancelled")]
    Cancelled,

    #[error("export timed out waiting for a consumer")]
    ExportTimeout,

    #[error("fatal: {0}")]
    Fatal(String),
}

impl PipelineError {
    #[must_use]
    pub fn retryable(&self) -> bool {
        match self {
            PipelineError::Network(_)
            | PipelineError::Quota(_)
            | PipelineError::FileBusy(_)
            | PipelineError::ApiAuth(_)
            | PipelineError::ApiOther(_)
            | PipelineError::HostInvalidated(_)
            | PipelineError::ExportTimeout => true,
            PipelineError::Cancelled | PipelineError::Fatal(_) => false,
        }
    }
}

impl From<fetch::FetchError> for PipelineError {
    fn from(e: fetch::FetchError) -> Self {
        match e {
            fetch::FetchError::Cancelled => PipelineError::Cancelled,
            fetch::FetchError::AllMirrorsExhausted
            | fetch::FetchError::Connect(_)
            | fetch::FetchError::Status(_)
            | fetch::FetchError::Timeout
            | fetch::FetchError::Body(_) => PipelineError::Network(e.to_string()),
            fetch::FetchError::InvalidUrl(_) => PipelineError::Fatal(e.to_string()),
            fetch::FetchError::Io(_) => PipelineError::FileBusy(e.to_string()),
        }
    }
}

impl From<spfs::SpfsError> for PipelineError {
    fn from(e: spfs::SpfsError) -> Self {
        match e {
            spfs::SpfsError::AlreadyOpen(_)
            | spfs::SpfsError::FileNotOpen
            | spfs::SpfsError::WriteIncomplete { .. }
            | spfs::SpfsError::Io(_) => PipelineError::FileBusy(e.to_string()),
            spfs::SpfsError::InvalidFilename(_) => PipelineError::Fatal(e.to_string()),
            spfs::SpfsError::WorkerGone => PipelineError::Fatal(e.to_string()),
        }
    }
}

impl From<mp4::Mp4Error> for PipelineError {
    fn from(e: mp4::Mp4Error) -> Self {
        PipelineError::Fatal(e.to_string())
    }
}

impl From<mp4::ParseBoxError> for PipelineError {
    fn from(e: mp4::ParseBoxError) -> Self {
        PipelineError::Fatal(e.to_string())
    }
}

impl From<wbi::WbiError> for PipelineError {
    fn from(e: wbi::WbiError) -> Self {
        PipelineError::ApiAuth(e.to_string())
    }
}
