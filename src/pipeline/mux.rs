// SPDX-License-Identifier: GPL-2.0-or-later
//
// Builds a single progressive-download `moov` from a video and an
// audio `Track` and streams `ftyp`+`moov`+`mdat` to an `AsyncWrite`,
// copying each chunk's sample bytes verbatim from its source file.
// The `stts`/`ctts`/`stsc` run-length construction mirrors
// `src/recording/mp4_muxer.rs::generate_mp4`; everything else (two
// tracks instead of one, `stco`-vs-`co64`, metadata passthrough) is
// new since the teacher only ever muxed a single locally-recorded
// video track.

use std::io::Write;

use mp4::*;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::PipelineError;
use crate::track::{Chunk, Track};

/// Output `moov` always runs on this timescale; per-track timescales
/// are preserved in each `mdhd`, only `mvhd`/`tkhd` durations convert.
pub const MOVIE_TIMESCALE: u32 = 1000;

/// Source-tool/description strings copied from the video track's
/// `udta/meta/ilst` into the output, if present.
#[derive(Default, Clone)]
pub struct OutputMetadata {
    pub tool: Option<String>,
    /// Source 4CC the tool string was read from, if known. Falls back
    /// to `TAG_TOOL` when absent.
    pub tool_tag: Option<BoxType>,
    pub description: Option<String>,
    /// Source 4CC the description string was read from, if known.
    /// Falls back to `TAG_DESCRIPTION` when absent.
    pub description_tag: Option<BoxType>,
}

/// `ftyp.major_brand`/`compatible_brands` depend on the video codec:
/// `av01` -> `[isom,iso2,av01,mp41]`; `hvc1`/`hev1` -> major `mp42`,
/// `[isom,iso2,mp41,hvc1]`; `avc1` and everything else (the default)
/// -> `[isom,iso2,avc1,mp41]`.
fn ftyp(video_codec: mp4::BoxType) -> Boxes {
    let (major_brand, compatible_brands): (&[u8; 4], [&[u8; 4]; 4]) = match video_codec {
        c if c == *b"av01" => (b"isom", [b"isom", b"iso2", b"av01", b"mp41"]),
        c if c == *b"hvc1" || c == *b"hev1" => (b"mp42", [b"isom", b"iso2", b"mp41", b"hvc1"]),
        _ => (b"isom", [b"isom", b"iso2", b"avc1", b"mp41"]),
    };
    Boxes::new(Ftyp {
        major_brand: *major_brand,
        minor_version: 512,
        compatible_brands: compatible_brands
            .into_iter()
            .map(|b| CompatibleBrandElem(*b))
            .collect(),
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
fn movie_duration_units(video: &Track, audio: &Track) -> u32 {
    let secs = video.duration_secs().max(audio.duration_secs());
    (secs * f64::from(MOVIE_TIMESCALE)).round() as u32
}

/// Audio-then-video per fragment index, mirroring the order fragments
/// actually arrived in (audio is always fully downloaded before
/// video starts, but within each track fragments arrive strictly in
/// order, so pairing by index reconstructs the interleave the output
/// should present for sequential playback).
fn chunk_order(video: &Track, audio: &Track) -> Vec<(bool, usize)> {
    let mut out = Vec::new();
    let n = audio.chunks.len().max(video.chunks.len());
    for i in 0..n {
        if i < audio.chunks.len() {
            out.push((false, i));
        }
        if i < video.chunks.len() {
            out.push((true, i));
        }
    }
    out
}

fn total_mdat_payload(video: &Track, audio: &Track) -> u64 {
    video.chunks.iter().map(|c| c.payload_len).sum::<u64>()
        + audio.chunks.iter().map(|c| c.payload_len).sum::<u64>()
}

fn chunk_offsets_box(chunk_offsets: &[u64], use_co64: bool) -> Boxes {
    if use_co64 {
        Boxes::new(Co64 {
            full_box: FullBox::default(),
            chunk_offsets: chunk_offsets.to_vec(),
        })
    } else {
        Boxes::new(Stco {
            full_box: FullBox::default(),
            #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
            chunk_offsets: chunk_offsets.iter().map(|&o| o as u32).collect(),
        })
    }
}

fn sample_entry_boxes(track: &Track) -> Boxes {
    let config_box_type = match track.codec {
        c if c == *b"avc1" => *b"avcC",
        c if c == *b"hvc1" => *b"hvcC",
        c if c == *b"av01" => *b"av1C",
        c if c == *b"mp4a" => *b"esds",
        c if c == *b"fLaC" => *b"dfLa",
        other => other,
    };
    let config = Boxes::new(OpaqueBox {
        box_type: config_box_type,
        payload: track.codec_private.clone(),
    });

    if track.is_video {
        Boxes::new(VisualSampleEntry {
            box_type: track.codec,
            sample_entry: SampleEntry {
                reserved: [0; 6],
                data_reference_index: 1,
            },
            width: track.width.unwrap_or(0),
            height: track.height.unwrap_or(0),
            horiz_resolution: 0x0048_0000,
            vert_resolution: 0x0048_0000,
            frame_count: 1,
            compressor_name: [0; 32],
            depth: 0x0018,
        })
        .with_child(config)
    } else {
        Boxes::new(AudioSampleEntry {
            box_type: if track.codec == *b"fLaC" { *b"fLaC" } else { TYPE_MP4A },
            sample_entry: SampleEntry {
                reserved: [0; 6],
                data_reference_index: 1,
            },
            channel_count: 2,
            sample_size: 16,
            sample_rate: track.timescale << 16,
        })
        .with_child(config)
    }
}

/// `stbl` in conventional ISO-BMFF child order: `stsd`, `stts`,
/// (`ctts`), `stsc`, `stsz`, `stco`/`co64`, (`stss` for video).
fn build_stbl(track: &Track, chunk_offsets: &[u64], use_co64: bool) -> Boxes {
    let mut stts_entries: Vec<SttsEntry> = Vec::new();
    for s in &track.samples {
        if let Some(last) = stts_entries.last_mut() {
            if last.sample_delta == s.duration {
                last.sample_count += 1;
                continue;
            }
        }
        stts_entries.push(SttsEntry {
            sample_count: 1,
            sample_delta: s.duration,
        });
    }

    let any_negative_cto = track.samples.iter().any(|s| s.cto < 0);
    let any_nonzero_cto = track.samples.iter().any(|s| s.cto != 0);

    let mut stsc_entries: Vec<StscEntry> = Vec::new();
    for (i, chunk) in track.chunks.iter().enumerate() {
        let samples_per_chunk = u32::try_from(chunk.sample_range.len()).unwrap_or(u32::MAX);
        if let Some(last) = stsc_entries.last_mut() {
            if last.samples_per_chunk == samples_per_chunk {
                continue;
            }
        }
        stsc_entries.push(StscEntry {
            first_chunk: u32::try_from(i + 1).unwrap_or(u32::MAX),
            samples_per_chunk,
            sample_description_index: 1,
        });
    }

    let mut stbl = Boxes::new(Stbl).with_child(
        Boxes::new(Stsd {
            full_box: FullBox::default(),
            entry_count: 1,
        })
        .with_child(sample_entry_boxes(track)),
    );

    stbl = stbl.with_child(Boxes::new(Stts {
        full_box: FullBox::default(),
        entries: stts_entries,
    }));

    if any_nonzero_cto {
        let entries = if any_negative_cto {
            CttsEntries::V1(
                track
                    .samples
                    .iter()
                    .map(|s| CttsEntryV1 {
                        sample_count: 1,
                        sample_offset: s.cto,
                    })
                    .collect(),
            )
        } else {
            CttsEntries::V0(
                track
                    .samples
                    .iter()
                    .map(|s| CttsEntryV0 {
                        sample_count: 1,
                        sample_offset: u32::try_from(s.cto).unwrap_or(0),
                    })
                    .collect(),
            )
        };
        stbl = stbl.with_child(Boxes::new(Ctts {
            flags: [0, 0, 0],
            entries,
        }));
    }

    stbl = stbl
        .with_child(Boxes::new(Stsc {
            full_box: FullBox::default(),
            entries: stsc_entries,
        }))
        .with_child(Boxes::new(Stsz {
            full_box: FullBox::default(),
            sample_size: 0,
            sample_count: u32::try_from(track.samples.len()).unwrap_or(u32::MAX),
            entry_sizes: track.samples.iter().map(|s| s.size).collect(),
        }))
        .with_child(chunk_offsets_box(chunk_offsets, use_co64));

    if track.is_video {
        stbl = stbl.with_child(Boxes::new(Stss {
            full_box: FullBox::default(),
            sample_numbers: track.sync_sample_numbers(),
        }));
    }

    stbl
}

fn build_trak(track: &Track, track_id: u32, movie_duration: u32, chunk_offsets: &[u64], use_co64: bool) -> Boxes {
    let tkhd = Tkhd {
        flags: u32_to_flags(0x3), // enabled | in_movie
        version: TkhdVersion::V0(TkhdV0 {
            creation_time: 0,
            modification_time: 0,
            duration: movie_duration,
        }),
        track_id,
        reserved0: 0,
        reserved1: [0; 2],
        layer: 0,
        alternate_group: 0,
        volume: if track.is_video { 0 } else { 0x0100 },
        reserved2: 0,
        matrix: [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000],
        width: u32::from(track.width.unwrap_or(0)) << 16,
        height: u32::from(track.height.unwrap_or(0)) << 16,
    };

    let mdhd = Mdhd {
        flags: [0; 3],
        version: MdhdVersion::V0(MdhdV0 {
            creation_time: 0,
            modification_time: 0,
            duration: u32::try_from(track.duration_in_timescale()).unwrap_or(u32::MAX),
        }),
        timescale: track.timescale,
        pad: false,
        language: [21, 14, 4], // "und"
        pre_defined: 0,
    };

    let hdlr = Hdlr {
        full_box: FullBox::default(),
        pre_defined: 0,
        handler_type: if track.is_video { *b"vide" } else { *b"soun" },
        reserved: [0; 3],
        name: if track.is_video {
            "VideoHandler".to_owned()
        } else {
            "SoundHandler".to_owned()
        },
    };

    let media_header: Boxes = if track.is_video {
        Boxes::new(Vmhd {
            full_box: FullBox {
                version: 0,
                flags: u32_to_flags(1),
            },
            graphics_mode: 0,
            opcolor: [0, 0, 0],
        })
    } else {
        Boxes::new(Smhd {
            full_box: FullBox::default(),
            balance: 0,
            reserved: 0,
        })
    };

    let dinf = Boxes::new(Dinf).with_child(
        Boxes::new(Dref {
            full_box: FullBox::default(),
            entry_count: 1,
        })
        .with_child(Boxes::new(Url {
            full_box: FullBox {
                version: 0,
                flags: u32_to_flags(URL_NOPT),
            },
            location: String::new(),
        })),
    );

    let stbl = build_stbl(track, chunk_offsets, use_co64);
    let minf = Boxes::new(Minf).with_children3(media_header, dinf, stbl);
    let mdia = Boxes::new(Mdia).with_children3(Boxes::new(mdhd), Boxes::new(hdlr), minf);

    let mut trak = Boxes::new(Trak).with_children2(Boxes::new(tkhd), mdia);

    if movie_duration > 0 {
        let edts = Boxes::new(Edts).with_child(Boxes::new(Elst {
            flags: [0, 0, 0],
            entries: ElstEntries::V0(vec![ElstEntryV0 {
                segment_duration: movie_duration,
                media_time: 0,
                ..ElstEntryV0::default()
            }]),
        }));
        trak = trak.with_child(edts);
    }

    trak
}

fn build_udta(meta: &OutputMetadata) -> Option<Boxes> {
    if meta.tool.is_none() && meta.description.is_none() {
        return None;
    }
    let mut ilst = Boxes::new(Ilst);
    if let Some(tool) = &meta.tool {
        ilst = ilst.with_child(IlstTag::boxes(meta.tool_tag.unwrap_or(TAG_TOOL), tool));
    }
    if let Some(desc) = &meta.description {
        ilst = ilst.with_child(IlstTag::boxes(meta.description_tag.unwrap_or(TAG_DESCRIPTION), desc));
    }
    let meta_box = Boxes::new(Meta::default()).with_child(ilst);
    Some(Boxes::new(Udta).with_child(meta_box))
}

fn build_moov(
    video: &Track,
    audio: &Track,
    metadata: &OutputMetadata,
    video_offsets: &[u64],
    audio_offsets: &[u64],
    use_co64: bool,
) -> Boxes {
    let movie_duration = movie_duration_units(video, audio);
    let video_trak = build_trak(video, 1, movie_duration, video_offsets, use_co64);
    let audio_trak = build_trak(audio, 2, movie_duration, audio_offsets, use_co64);

    let mvhd = Mvhd {
        flags: [0; 3],
        version: MvhdVersion::V0(MvhdV0 {
            creation_time: 0,
            modification_time: 0,
            duration: movie_duration,
        }),
        timescale: MOVIE_TIMESCALE,
        rate: 0x0001_0000,
        volume: 0x0100,
        reserved: 0,
        reserved2: [0, 0],
        matrix: [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000],
        pre_defined: [0; 6],
        next_track_id: 3,
    };

    let mvex = Boxes::new(Mvex).with_children2(
        Boxes::new(Trex {
            full_box: FullBox::default(),
            track_id: 1,
            default_sample_description_index: 1,
            default_sample_duration: 0,
            default_sample_size: 0,
            default_sample_flags: 0,
        }),
        Boxes::new(Trex {
            full_box: FullBox::default(),
            track_id: 2,
            default_sample_description_index: 1,
            default_sample_duration: 0,
            default_sample_size: 0,
            default_sample_flags: 0,
        }),
    );

    let mut moov = Boxes::new(Moov).with_children4(Boxes::new(mvhd), video_trak, audio_trak, mvex);
    if let Some(udta) = build_udta(metadata) {
        moov = moov.with_child(udta);
    }
    moov
}

/// Writes `size` as an 8-byte header if it fits, otherwise a 16-byte
/// ISO-BMFF `largesize` header (`size32 == 1` escape). The teacher's
/// `write_box_info` only ever emits the 8-byte form.
fn write_mdat_header<W: Write>(w: &mut W, payload_len: u64) -> Result<u64, PipelineError> {
    if let Some(total) = payload_len.checked_add(8) {
        if let Ok(size32) = u32::try_from(total) {
            write_box_info(w, usize::try_from(size32).expect("u32 fits usize"), TYPE_MDAT)?;
            return Ok(8);
        }
    }
    w.write_all(&1u32.to_be_bytes())?;
    w.write_all(&TYPE_MDAT)?;
    w.write_all(&(payload_len + 16).to_be_bytes())?;
    Ok(16)
}

/// Computes the final `ftyp+moov+mdat`-header bytes (nothing past the
/// `mdat` header — no sample payload) and the chunk arrival order.
/// Shared by the push-based [`write_output`] and the pull-based
/// `PipelineOutput` reader, so the two-pass layout logic only exists
/// once.
///
/// Two-pass: the first pass measures `ftyp.size + moov.size` with
/// placeholder (zero) chunk offsets — `stco`/`co64` size depends only
/// on entry count, never the offset values — then the real `mdat`
/// start position is known and the final offsets are patched in.
pub fn build_header_and_order(
    video: &Track,
    audio: &Track,
    metadata: &OutputMetadata,
) -> Result<(Vec<u8>, Vec<(bool, usize)>), PipelineError> {
    let order = chunk_order(video, audio);
    let total_payload = total_mdat_payload(video, audio);
    let use_co64 = total_payload > u64::from(u32::MAX);

    let placeholder_video = vec![0u64; video.chunks.len()];
    let placeholder_audio = vec![0u64; audio.chunks.len()];
    let measuring_moov = build_moov(
        video,
        audio,
        metadata,
        &placeholder_video,
        &placeholder_audio,
        use_co64,
    );

    let mut measured = Vec::new();
    ftyp(video.codec).marshal(&mut measured)?;
    measuring_moov.marshal(&mut measured)?;

    let mut mdat_header = Vec::new();
    let mdat_header_len = write_mdat_header(&mut mdat_header, total_payload)?;
    let mdat_start = measured.len() as u64 + mdat_header_len;

    let (video_offsets, audio_offsets) = patch_offsets(video, audio, &order, mdat_start);
    let final_moov = build_moov(video, audio, metadata, &video_offsets, &audio_offsets, use_co64);

    let mut header = Vec::new();
    ftyp(video.codec).marshal(&mut header)?;
    final_moov.marshal(&mut header)?;
    debug_assert_eq!(
        header.len(),
        measured.len(),
        "patched moov must keep the same size as the measuring pass"
    );
    header.extend_from_slice(&mdat_header);

    Ok((header, order))
}

/// Streams `ftyp`+`moov`+`mdat` to `out`, copying each chunk's sample
/// bytes verbatim from its source fragment file. Never buffers the
/// `mdat` payload: only one chunk's bytes are in flight at a time.
pub async fn write_output<W: tokio::io::AsyncWrite + Unpin>(
    video: &Track,
    audio: &Track,
    metadata: &OutputMetadata,
    out: &mut W,
) -> Result<(), PipelineError> {
    let (header, order) = build_header_and_order(video, audio, metadata)?;
    out.write_all(&header).await?;

    for &(is_video, idx) in &order {
        let chunk = if is_video {
            &video.chunks[idx]
        } else {
            &audio.chunks[idx]
        };
        copy_chunk(chunk, out).await?;
    }

    Ok(())
}

/// Total output length `write_output` will produce, for `Content-Length`.
pub fn output_len(video: &Track, audio: &Track, metadata: &OutputMetadata) -> Result<u64, PipelineError> {
    let (header, order) = build_header_and_order(video, audio, metadata)?;
    let payload: u64 = order
        .iter()
        .map(|&(is_video, idx)| {
            if is_video {
                video.chunks[idx].payload_len
            } else {
                audio.chunks[idx].payload_len
            }
        })
        .sum();
    Ok(header.len() as u64 + payload)
}

fn patch_offsets(
    video: &Track,
    audio: &Track,
    order: &[(bool, usize)],
    mdat_start: u64,
) -> (Vec<u64>, Vec<u64>) {
    let mut video_offsets = vec![0u64; video.chunks.len()];
    let mut audio_offsets = vec![0u64; audio.chunks.len()];
    let mut pos = mdat_start;
    for &(is_video, idx) in order {
        if is_video {
            video_offsets[idx] = pos;
            pos += video.chunks[idx].payload_len;
        } else {
            audio_offsets[idx] = pos;
            pos += audio.chunks[idx].payload_len;
        }
    }
    (video_offsets, audio_offsets)
}

async fn copy_chunk<W: tokio::io::AsyncWrite + Unpin>(
    chunk: &Chunk,
    out: &mut W,
) -> Result<(), PipelineError> {
    let mut src = tokio::fs::File::open(&chunk.source_file).await?;
    src.seek(std::io::SeekFrom::Start(chunk.mdat_offset_in_input))
        .await?;
    let mut remaining = chunk.payload_len;
    let mut buf = vec![0u8; 64 * 1024];
    while remaining > 0 {
        let want = usize::try_from(remaining.min(buf.len() as u64)).unwrap_or(buf.len());
        let n = src.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(PipelineError::Fatal(
                "source fragment truncated before chunk payload was fully read".to_owned(),
            ));
        }
        out.write_all(&buf[..n]).await?;
        remaining -= n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn track(is_video: bool, chunks: usize, samples_per_chunk: usize) -> Track {
        let mut samples = Vec::new();
        let mut track_chunks = Vec::new();
        for _ in 0..chunks {
            let start = samples.len();
            for _ in 0..samples_per_chunk {
                samples.push(crate::track::Sample {
                    dts: samples.len() as u64 * 1001,
                    cto: 0,
                    duration: 1001,
                    size: 1000,
                    is_sync: samples.len() == start,
                    offset_in_chunk: 0,
                });
            }
            track_chunks.push(Chunk {
                source_file: "seg.m4s".into(),
                mdat_offset_in_input: 0,
                payload_len: (samples_per_chunk * 1000) as u64,
                sample_range: start..samples.len(),
            });
        }
        Track {
            track_id: if is_video { 1 } else { 2 },
            is_video,
            timescale: if is_video { 30000 } else { 48000 },
            codec: if is_video { *b"avc1" } else { *b"mp4a" },
            codec_private: vec![1, 2, 3],
            width: if is_video { Some(1920) } else { None },
            height: if is_video { Some(1080) } else { None },
            samples,
            chunks: track_chunks,
        }
    }

    #[test]
    fn chunk_order_interleaves_audio_then_video() {
        let video = track(true, 2, 3);
        let audio = track(false, 2, 5);
        assert_eq!(
            chunk_order(&video, &audio),
            vec![(false, 0), (true, 0), (false, 1), (true, 1)]
        );
    }

    #[test]
    fn mdat_header_uses_large_size_past_u32_max() {
        let mut buf = Vec::new();
        let header_len = write_mdat_header(&mut buf, u64::from(u32::MAX)).unwrap();
        assert_eq!(header_len, 16);
        assert_eq!(buf.len(), 16);

        let mut buf2 = Vec::new();
        let header_len2 = write_mdat_header(&mut buf2, 100).unwrap();
        assert_eq!(header_len2, 8);
        assert_eq!(buf2.len(), 8);
    }

    #[test]
    fn patch_offsets_are_strictly_increasing_in_arrival_order() {
        let video = track(true, 2, 3);
        let audio = track(false, 2, 5);
        let order = chunk_order(&video, &audio);
        let (video_offsets, audio_offsets) = patch_offsets(&video, &audio, &order, 1000);
        assert_eq!(audio_offsets[0], 1000);
        assert_eq!(video_offsets[0], 1000 + audio.chunks[0].payload_len);
        assert!(audio_offsets[1] > video_offsets[0]);
        assert!(video_offsets[1] > audio_offsets[1]);
    }

    #[test]
    fn measuring_pass_size_matches_patched_pass() {
        let video = track(true, 2, 3);
        let audio = track(false, 2, 5);
        let use_co64 = false;
        let zeros_v = vec![0u64; video.chunks.len()];
        let zeros_a = vec![0u64; audio.chunks.len()];
        let m1 = build_moov(&video, &audio, &OutputMetadata::default(), &zeros_v, &zeros_a, use_co64);
        let ones_v = vec![u64::from(u32::MAX); video.chunks.len()];
        let ones_a = vec![u64::from(u32::MAX); audio.chunks.len()];
        let m2 = build_moov(&video, &audio, &OutputMetadata::default(), &ones_v, &ones_a, use_co64);
        assert_eq!(m1.size(), m2.size());
    }

    fn one_chunk_track(is_video: bool, sample_size: u32, duration: u32, payload: Vec<u8>, source_file: &std::path::Path) -> Track {
        let n = payload.len() / usize::try_from(sample_size).unwrap();
        let samples = (0..n)
            .map(|i| crate::track::Sample {
                dts: u64::from(i as u32) * u64::from(duration),
                cto: 0,
                duration,
                size: sample_size,
                is_sync: true,
                offset_in_chunk: u64::from(i as u32) * u64::from(sample_size),
            })
            .collect();
        let chunk = Chunk {
            source_file: source_file.to_path_buf(),
            mdat_offset_in_input: 0,
            payload_len: payload.len() as u64,
            sample_range: 0..n,
        };
        Track {
            track_id: if is_video { 1 } else { 2 },
            is_video,
            timescale: if is_video { 30000 } else { 48000 },
            codec: if is_video { *b"av01" } else { *b"mp4a" },
            codec_private: vec![0xAB],
            width: if is_video { Some(1920) } else { None },
            height: if is_video { Some(1080) } else { None },
            samples,
            chunks: vec![chunk],
        }
    }

    /// S1 — single UGC, mux mode: one AV1 fragment with one 8192 B
    /// `mdat` of 4 key-frame samples (2048 B each, duration 1001 @
    /// 30000), one AAC fragment with 4 samples (512 B each, duration
    /// 1024 @ 48000). `write_output` must emit the standard brand set,
    /// `mvhd.duration = 136` (4·1001/30000 s, rounded to the 1000
    /// timescale), two `trak`s, video `stss = [1,2,3,4]`, no `ctts`
    /// (every `cto` is zero), and an `mdat` payload of 8192+2048 bytes.
    #[tokio::test]
    async fn s1_single_ugc_mux_mode() {
        let dir = tempfile::tempdir().unwrap();
        let video_payload = vec![0xAAu8; 2048 * 4];
        let audio_payload = vec![0xBBu8; 512 * 4];
        let video_file = dir.path().join("video.bin");
        let audio_file = dir.path().join("audio.bin");
        tokio::fs::write(&video_file, &video_payload).await.unwrap();
        tokio::fs::write(&audio_file, &audio_payload).await.unwrap();

        let video = one_chunk_track(true, 2048, 1001, video_payload, &video_file);
        let audio = one_chunk_track(false, 512, 1024, audio_payload, &audio_file);

        let metadata = OutputMetadata::default();
        let mut out = Vec::new();
        write_output(&video, &audio, &metadata, &mut out).await.unwrap();

        assert_eq!(movie_duration_units(&video, &audio), 136);
        assert_eq!(video.sync_sample_numbers(), vec![1, 2, 3, 4]);
        assert!(video.samples.iter().all(|s| s.cto == 0));

        let total_mdat = total_mdat_payload(&video, &audio);
        assert_eq!(total_mdat, 8192 + 2048);

        let expected_len = output_len(&video, &audio, &metadata).unwrap();
        assert_eq!(out.len() as u64, expected_len);

        let ftyp_box = mp4::find_box(&out, &[*b"ftyp"]).unwrap();
        assert_eq!(&ftyp_box.payload[0..4], b"isom");
        let compatible = &ftyp_box.payload[8..];
        let brands: Vec<&[u8]> = compatible.chunks(4).collect();
        assert!(brands.contains(&b"av01".as_slice()));

        let moov = mp4::find_box(&out, &[*b"moov"]).unwrap();
        let traks = mp4::find_all_boxes(moov.payload, *b"trak").unwrap();
        assert_eq!(traks.len(), 2);

        let mdat = mp4::find_box(&out, &[*b"mdat"]).unwrap();
        assert_eq!(mdat.payload.len() as u64, total_mdat);
    }
}
