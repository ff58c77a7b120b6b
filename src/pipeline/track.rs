// SPDX-License-Identifier: GPL-2.0-or-later
//
// Reads the structural half of a downloaded fMP4 init segment and its
// fragments back out: the thing the teacher's muxer never had to do,
// since it only ever produced fMP4, never consumed it. Grounded on
// `src/recording/mp4_muxer.rs`'s sample/chunk bookkeeping (run-length
// `stts`/`ctts`, `mdat`-offset accumulation) but driven from parsed
// `moof`/`trun` data instead of an in-process `Sample` list.

use std::path::PathBuf;

use mp4::{BoxType, find_all_boxes, find_box, parse_stsd, parse_tfdt_time, parse_tfhd, parse_trun};

use crate::error::PipelineError;

/// One decodable access unit, positioned within its chunk's payload.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub dts: u64,
    pub cto: i32,
    pub duration: u32,
    pub size: u32,
    pub is_sync: bool,
    /// Byte offset of this sample's data within its `Chunk`'s payload.
    pub offset_in_chunk: u64,
}

/// One `mdat` payload copied verbatim from a downloaded fragment file,
/// referenced by absolute byte offset so the output writer can stream
/// it without ever holding the payload in memory.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub source_file: PathBuf,
    pub mdat_offset_in_input: u64,
    pub payload_len: u64,
    /// Half-open range into the owning `Track::samples`.
    pub sample_range: std::ops::Range<usize>,
}

/// A demuxed elementary stream: either the video or the audio leg of
/// a DASH pair, numbered the way the output `moov` will number it
/// (`1` for video, `2` for audio) regardless of what the source
/// fragments themselves called it.
pub struct Track {
    pub track_id: u32,
    pub is_video: bool,
    pub timescale: u32,
    pub codec: BoxType,
    pub codec_private: Vec<u8>,
    pub width: Option<u16>,
    pub height: Option<u16>,
    pub samples: Vec<Sample>,
    pub chunks: Vec<Chunk>,
}

impl Track {
    #[must_use]
    pub fn duration_in_timescale(&self) -> u64 {
        self.samples
            .last()
            .map_or(0, |s| s.dts + u64::from(s.duration))
    }

    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            return 0.0;
        }
        self.duration_in_timescale() as f64 / f64::from(self.timescale)
    }

    /// 1-based `stss` indices: samples whose `flags & 0x1_0000 == 0`.
    #[must_use]
    pub fn sync_sample_numbers(&self) -> Vec<u32> {
        self.samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_sync)
            .map(|(i, _)| u32::try_from(i + 1).unwrap_or(u32::MAX))
            .collect()
    }
}

/// Parses an init segment (`ftyp`+`moov`) into an empty `Track`
/// carrying the codec/timescale/dimensions that every fragment
/// appended afterwards must agree with.
pub fn parse_init_segment(
    buf: &[u8],
    track_id: u32,
    is_video: bool,
) -> Result<Track, PipelineError> {
    let moov = find_box(buf, &[*b"moov"])?;
    let mdhd = find_box(moov.payload, &[*b"trak", *b"mdia", *b"mdhd"])?;
    let timescale = mp4::parse_mdhd_timescale(mdhd.payload)?;
    let stsd = find_box(moov.payload, &[*b"trak", *b"mdia", *b"minf", *b"stbl", *b"stsd"])?;
    let parsed = parse_stsd(stsd.payload)?;

    Ok(Track {
        track_id,
        is_video,
        timescale,
        codec: rewrite_hev1(parsed.codec),
        codec_private: parsed.codec_private,
        width: parsed.width,
        height: parsed.height,
        samples: Vec::new(),
        chunks: Vec::new(),
    })
}

/// `hev1` sources are always re-labeled `hvc1` in the output, per the
/// box-codec rule: the config payload (`hvcC`) is identical either
/// way, only the sample entry and brand name ever said `hev1`.
#[must_use]
pub fn rewrite_hev1(codec: BoxType) -> BoxType {
    if codec == *b"hev1" { *b"hvc1" } else { codec }
}

/// Walks every sibling `moof`/`mdat` pair in a downloaded fragment
/// file and appends the samples/chunk it describes to `track`.
/// `source_file` is recorded on the chunk, never read here — the
/// output writer reopens it later to copy the payload bytes.
pub fn append_fragment(
    track: &mut Track,
    buf: &[u8],
    source_file: PathBuf,
) -> Result<(), PipelineError> {
    let moofs = find_all_boxes(buf, *b"moof")?;
    let mdats = find_all_boxes(buf, *b"mdat")?;
    if moofs.len() != mdats.len() {
        return Err(PipelineError::Fatal(format!(
            "moof/mdat count mismatch: {} moof, {} mdat",
            moofs.len(),
            mdats.len()
        )));
    }

    for (moof, mdat) in moofs.iter().zip(mdats.iter()) {
        let traf = find_box(moof.payload, &[*b"traf"])?;
        let tfhd_box = find_box(traf.payload, &[*b"tfhd"])?;
        let tfhd = parse_tfhd(tfhd_box.payload)?;
        let tfdt_box = find_box(traf.payload, &[*b"tfdt"])?;
        let base_dts = parse_tfdt_time(tfdt_box.payload)?;
        let trun_box = find_box(traf.payload, &[*b"trun"])?;
        let trun = parse_trun(trun_box.payload)?;

        let mdat_offset_in_input =
            u64::try_from(mdat.offset + mdat.header_size).expect("file offset fits u64");

        let chunk_start = track.samples.len();
        let mut dts = base_dts;
        let mut offset_in_chunk = 0u64;
        for entry in &trun.entries {
            let duration = entry
                .sample_duration
                .or(tfhd.default_sample_duration)
                .unwrap_or(0);
            let size = entry.sample_size.or(tfhd.default_sample_size).unwrap_or(0);
            let flags = entry.sample_flags.or(tfhd.default_sample_flags).unwrap_or(0);

            track.samples.push(Sample {
                dts,
                cto: entry.sample_composition_time_offset,
                duration,
                size,
                is_sync: flags & 0x0001_0000 == 0,
                offset_in_chunk,
            });
            dts += u64::from(duration);
            offset_in_chunk += u64::from(size);
        }

        if offset_in_chunk != mdat.payload.len() as u64 {
            return Err(PipelineError::Fatal(format!(
                "sample sizes sum to {offset_in_chunk} but mdat payload is {} bytes",
                mdat.payload.len()
            )));
        }

        track.chunks.push(Chunk {
            source_file: source_file.clone(),
            mdat_offset_in_input,
            payload_len: offset_in_chunk,
            sample_range: chunk_start..track.samples.len(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn hev1_is_rewritten_to_hvc1() {
        assert_eq!(rewrite_hev1(*b"hev1"), *b"hvc1");
        assert_eq!(rewrite_hev1(*b"avc1"), *b"avc1");
    }

    fn make_box(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(u32::try_from(8 + payload.len()).unwrap()).to_be_bytes());
        out.extend_from_slice(box_type);
        out.extend_from_slice(payload);
        out
    }

    fn make_tfhd(track_id: u32) -> Vec<u8> {
        let mut p = vec![0, 0, 0, 0];
        p.extend_from_slice(&track_id.to_be_bytes());
        p
    }

    fn make_tfdt(base: u32) -> Vec<u8> {
        let mut p = vec![0, 0, 0, 0];
        p.extend_from_slice(&base.to_be_bytes());
        p
    }

    fn make_trun(entries: &[(u32, u32, u32, u32)]) -> Vec<u8> {
        // flags: sample_duration|sample_size|sample_flags|cto present
        let mut p = vec![0u8, 0, 0b0000_1111, 0b0000_0000];
        p.extend_from_slice(&u32::try_from(entries.len()).unwrap().to_be_bytes());
        for (dur, size, flags, cto) in entries {
            p.extend_from_slice(&dur.to_be_bytes());
            p.extend_from_slice(&size.to_be_bytes());
            p.extend_from_slice(&flags.to_be_bytes());
            p.extend_from_slice(&cto.to_be_bytes());
        }
        p
    }

    #[test]
    fn append_fragment_builds_samples_and_chunk() {
        let trun = make_trun(&[(1000, 4, 0x0200_0000, 0), (1000, 6, 0x0101_0000, 0)]);
        let tfhd = make_tfhd(1);
        let tfdt = make_tfdt(5000);
        let traf = make_box(
            b"traf",
            &[
                make_box(b"tfhd", &tfhd),
                make_box(b"tfdt", &tfdt),
                make_box(b"trun", &trun),
            ]
            .concat(),
        );
        let moof = make_box(b"moof", &traf);
        let mdat = make_box(b"mdat", &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let mut buf = moof.clone();
        buf.extend_from_slice(&mdat);

        let mut track = Track {
            track_id: 1,
            is_video: true,
            timescale: 1000,
            codec: *b"avc1",
            codec_private: vec![],
            width: Some(1920),
            height: Some(1080),
            samples: Vec::new(),
            chunks: Vec::new(),
        };
        append_fragment(&mut track, &buf, PathBuf::from("seg.m4s")).unwrap();

        assert_eq!(track.samples.len(), 2);
        assert_eq!(track.samples[0].dts, 5000);
        assert_eq!(track.samples[0].is_sync, true);
        assert_eq!(track.samples[1].dts, 6000);
        assert_eq!(track.samples[1].is_sync, false);
        assert_eq!(track.chunks.len(), 1);
        assert_eq!(track.chunks[0].payload_len, 10);
        assert_eq!(track.chunks[0].mdat_offset_in_input, moof.len() as u64 + 8);
        assert_eq!(track.sync_sample_numbers(), vec![1]);
    }
}
