// SPDX-License-Identifier: GPL-2.0-or-later
//
// Storage & mux pipeline: downloads an audio and a video DASH
// representation, either saves them as-is or remuxes them into one
// fragmented-MP4-free `.mp4`, and surfaces the result as a
// single-use virtual download.

mod error;
mod mux;
mod output;
mod probe;
mod registry;
mod state;
mod track;

pub use error::PipelineError;
pub use mux::{output_len, write_output, OutputMetadata, MOVIE_TIMESCALE};
pub use output::PipelineOutput;
pub use probe::probe_init_segment;
pub use registry::{content_type_for_filename, url_path, DownloadMode, DownloadRegistry, VirtualDownload};
pub use state::{
    Attachment, Driver, PipelineResult, PipelineState, RegisteredFile, ResolvedMedia, Resolver,
};
pub use track::{append_fragment, parse_init_segment, rewrite_hev1, Chunk, Sample, Track};
