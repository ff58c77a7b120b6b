// SPDX-License-Identifier: GPL-2.0-or-later
//
// The teacher's box codec only ever wrote fMP4; this engine also has
// to read it back out of downloaded fragments. No box parser existed
// to generalize, so this one is written from scratch in the same
// `ImmutableBox`/`BoxType` vocabulary as the builder half of this
// crate.

use thiserror::Error;

use crate::{
    BoxType, TFHD_BASE_DATA_OFFSET_PRESENT, TFHD_DEFAULT_SAMPLE_DURATION_PRESENT,
    TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT, TFHD_DEFAULT_SAMPLE_SIZE_PRESENT,
    TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT, TRUN_DATA_OFFSET_PRESENT,
    TRUN_FIRST_SAMPLE_FLAGS_PRESENT, TRUN_SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT,
    TRUN_SAMPLE_DURATION_PRESENT, TRUN_SAMPLE_FLAGS_PRESENT, TRUN_SAMPLE_SIZE_PRESENT,
    check_fullbox_flag,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseBoxError {
    #[error("buffer truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("box {0:?} not found")]
    NotFound(BoxType),

    #[error("box size {size} smaller than header size {header_size}")]
    BadSize { size: u64, header_size: usize },

    #[error("recursion limit exceeded looking for {0:?}")]
    RecursionLimit(BoxType),

    #[error("stsd has {entry_count} entries and they are not identical")]
    MultiEntryStsdMismatch { entry_count: u32 },

    #[error("unsupported fullbox version {0}")]
    UnsupportedVersion(u8),
}

pub const MAX_BOX_RECURSION: u32 = 32;

/// A located box: payload excludes the 8/16-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoundBox<'a> {
    pub offset: usize,
    pub size: u64,
    pub header_size: usize,
    pub payload: &'a [u8],
}

/// Finds the first box matching `path` (e.g. `&[b"moov", b"trak"]`)
/// at any depth by descending through containers. `path` elements
/// are matched as direct children at each level, i.e. this walks
/// `path[0]`'s children for `path[1]`, and so on.
pub fn find_box<'a>(buf: &'a [u8], path: &[BoxType]) -> Result<FoundBox<'a>, ParseBoxError> {
    let Some((&want, rest)) = path.split_first() else {
        return Err(ParseBoxError::NotFound(*b"????"));
    };
    find_box_rec(buf, want, rest, 0)
}

fn find_box_rec<'a>(
    buf: &'a [u8],
    want: BoxType,
    rest: &[BoxType],
    depth: u32,
) -> Result<FoundBox<'a>, ParseBoxError> {
    if depth > MAX_BOX_RECURSION {
        return Err(ParseBoxError::RecursionLimit(want));
    }

    let mut pos = 0usize;
    while pos + 8 <= buf.len() {
        let header = read_box_header(buf, pos)?;
        if header.box_type == want {
            let found = FoundBox {
                offset: pos,
                size: header.size,
                header_size: header.header_size,
                payload: &buf[pos + header.header_size..pos + usize_from_u64(header.size)?],
            };
            if rest.is_empty() {
                return Ok(found);
            }
            return find_box_rec(found.payload, rest[0], &rest[1..], depth + 1);
        }
        pos += usize_from_u64(header.size)?;
    }
    Err(ParseBoxError::NotFound(want))
}

/// Finds every direct child of `container_payload` matching `want`,
/// in order. Used by sample extraction, which must walk every
/// `moof/mdat` pair in a stream rather than stopping at the first.
pub fn find_all_boxes<'a>(
    container_payload: &'a [u8],
    want: BoxType,
) -> Result<Vec<FoundBox<'a>>, ParseBoxError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos + 8 <= container_payload.len() {
        let header = read_box_header(container_payload, pos)?;
        if header.box_type == want {
            out.push(FoundBox {
                offset: pos,
                size: header.size,
                header_size: header.header_size,
                payload: &container_payload
                    [pos + header.header_size..pos + usize_from_u64(header.size)?],
            });
        }
        pos += usize_from_u64(header.size)?;
    }
    Ok(out)
}

struct BoxHeader {
    box_type: BoxType,
    size: u64,
    header_size: usize,
}

fn read_box_header(buf: &[u8], pos: usize) -> Result<BoxHeader, ParseBoxError> {
    if pos + 8 > buf.len() {
        return Err(ParseBoxError::Truncated {
            need: pos + 8,
            have: buf.len(),
        });
    }
    let size32 = u32::from_be_bytes(buf[pos..pos + 4].try_into().expect("slice is 4 bytes"));
    let box_type: BoxType = buf[pos + 4..pos + 8]
        .try_into()
        .expect("slice is 4 bytes");

    let (size, header_size) = if size32 == 1 {
        if pos + 16 > buf.len() {
            return Err(ParseBoxError::Truncated {
                need: pos + 16,
                have: buf.len(),
            });
        }
        let large = u64::from_be_bytes(buf[pos + 8..pos + 16].try_into().expect("8 bytes"));
        (large, 16)
    } else if size32 == 0 {
        (u64::try_from(buf.len() - pos).expect("fits"), 8)
    } else {
        (u64::from(size32), 8)
    };

    if size < u64::try_from(header_size).expect("fits") {
        return Err(ParseBoxError::BadSize { size, header_size });
    }
    if pos as u64 + size > buf.len() as u64 {
        return Err(ParseBoxError::Truncated {
            need: usize_from_u64(pos as u64 + size)?,
            have: buf.len(),
        });
    }

    Ok(BoxHeader {
        box_type,
        size,
        header_size,
    })
}

fn usize_from_u64(v: u64) -> Result<usize, ParseBoxError> {
    usize::try_from(v).map_err(|_| ParseBoxError::BadSize {
        size: v,
        header_size: 0,
    })
}

/// `mdhd.timescale`, version-aware.
pub fn parse_mdhd_timescale(mdhd_payload: &[u8]) -> Result<u32, ParseBoxError> {
    let version = *mdhd_payload.first().ok_or(ParseBoxError::Truncated {
        need: 1,
        have: 0,
    })?;
    let offset = match version {
        0 => 4 + 4 + 4, // version+flags, creation, modification
        1 => 4 + 8 + 8,
        v => return Err(ParseBoxError::UnsupportedVersion(v)),
    };
    read_u32(mdhd_payload, offset)
}

/// `tfdt.base_media_decode_time`, normalized to u64 regardless of version.
pub fn parse_tfdt_time(tfdt_payload: &[u8]) -> Result<u64, ParseBoxError> {
    let version = *tfdt_payload.first().ok_or(ParseBoxError::Truncated {
        need: 1,
        have: 0,
    })?;
    match version {
        0 => Ok(u64::from(read_u32(tfdt_payload, 4)?)),
        1 => read_u64(tfdt_payload, 4),
        v => Err(ParseBoxError::UnsupportedVersion(v)),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParsedTfhd {
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
}

pub fn parse_tfhd(tfhd_payload: &[u8]) -> Result<ParsedTfhd, ParseBoxError> {
    let flags = fullbox_flags(tfhd_payload)?;
    let mut pos = 4;
    let track_id = read_u32(tfhd_payload, pos)?;
    pos += 4;

    let mut out = ParsedTfhd {
        track_id,
        ..Default::default()
    };
    if check_fullbox_flag(to_flag_bytes(flags), TFHD_BASE_DATA_OFFSET_PRESENT) {
        out.base_data_offset = Some(read_u64(tfhd_payload, pos)?);
        pos += 8;
    }
    if check_fullbox_flag(
        to_flag_bytes(flags),
        TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT,
    ) {
        out.sample_description_index = Some(read_u32(tfhd_payload, pos)?);
        pos += 4;
    }
    if check_fullbox_flag(to_flag_bytes(flags), TFHD_DEFAULT_SAMPLE_DURATION_PRESENT) {
        out.default_sample_duration = Some(read_u32(tfhd_payload, pos)?);
        pos += 4;
    }
    if check_fullbox_flag(to_flag_bytes(flags), TFHD_DEFAULT_SAMPLE_SIZE_PRESENT) {
        out.default_sample_size = Some(read_u32(tfhd_payload, pos)?);
        pos += 4;
    }
    if check_fullbox_flag(to_flag_bytes(flags), TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT) {
        out.default_sample_flags = Some(read_u32(tfhd_payload, pos)?);
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy)]
pub struct ParsedTrunEntry {
    pub sample_duration: Option<u32>,
    pub sample_size: Option<u32>,
    pub sample_flags: Option<u32>,
    /// Always signed: version 0 composition offsets are unsigned in
    /// the bitstream but never negative, so widening them is lossless.
    pub sample_composition_time_offset: i32,
}

#[derive(Debug, Clone)]
pub struct ParsedTrun {
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<u32>,
    pub entries: Vec<ParsedTrunEntry>,
}

/// First-sample-flags, when present, overrides `entries[0].sample_flags` only.
pub fn parse_trun(trun_payload: &[u8]) -> Result<ParsedTrun, ParseBoxError> {
    if trun_payload.is_empty() {
        return Err(ParseBoxError::Truncated { need: 1, have: 0 });
    }
    let flags = fullbox_flags(trun_payload)?;
    let mut pos = 4;
    let sample_count = read_u32(trun_payload, pos)?;
    pos += 4;

    let data_offset = if check_fullbox_flag(to_flag_bytes(flags), TRUN_DATA_OFFSET_PRESENT) {
        let v = read_u32(trun_payload, pos)? as i32;
        pos += 4;
        Some(v)
    } else {
        None
    };

    let first_sample_flags = if check_fullbox_flag(
        to_flag_bytes(flags),
        TRUN_FIRST_SAMPLE_FLAGS_PRESENT,
    ) {
        let v = read_u32(trun_payload, pos)?;
        pos += 4;
        Some(v)
    } else {
        None
    };

    let mut entries = Vec::with_capacity(sample_count as usize);
    for i in 0..sample_count {
        let sample_duration = if check_fullbox_flag(to_flag_bytes(flags), TRUN_SAMPLE_DURATION_PRESENT)
        {
            let v = read_u32(trun_payload, pos)?;
            pos += 4;
            Some(v)
        } else {
            None
        };
        let sample_size = if check_fullbox_flag(to_flag_bytes(flags), TRUN_SAMPLE_SIZE_PRESENT) {
            let v = read_u32(trun_payload, pos)?;
            pos += 4;
            Some(v)
        } else {
            None
        };
        let mut sample_flags =
            if check_fullbox_flag(to_flag_bytes(flags), TRUN_SAMPLE_FLAGS_PRESENT) {
                let v = read_u32(trun_payload, pos)?;
                pos += 4;
                Some(v)
            } else {
                None
            };
        let cto = if check_fullbox_flag(
            to_flag_bytes(flags),
            TRUN_SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT,
        ) {
            let raw = read_u32(trun_payload, pos)?;
            pos += 4;
            // signed regardless of trun version, matching version-1 ctts.
            raw as i32
        } else {
            0
        };

        if i == 0 {
            if let Some(first) = first_sample_flags {
                sample_flags = Some(first);
            }
        }

        entries.push(ParsedTrunEntry {
            sample_duration,
            sample_size,
            sample_flags,
            sample_composition_time_offset: cto,
        });
    }

    Ok(ParsedTrun {
        data_offset,
        first_sample_flags,
        entries,
    })
}

/// `udta/meta/ilst` tag values this engine cares about. `tool_tag` and
/// `description_tag` record which 4CC actually carried the value, so a
/// re-mux can round-trip the source's own tag instead of a fixed one.
#[derive(Debug, Clone, Default)]
pub struct UserMetadata {
    pub tool: Option<String>,
    pub tool_tag: Option<BoxType>,
    pub description: Option<String>,
    pub description_tag: Option<BoxType>,
}

/// Tags recognized for the tool field, tried in this order.
const TOOL_TAGS: &[BoxType] = &[*b"\xa9too", *b"tool"];

/// Tags recognized for the description field, tried in this order.
const DESCRIPTION_TAGS: &[BoxType] = &[
    *b"\xa9des",
    *b"desc",
    *b"sdes",
    *b"\xa9swr",
    *b"\xa9enc",
    *b"\xa9cmt",
];

pub fn parse_user_metadata(moov_payload: &[u8]) -> UserMetadata {
    let mut out = UserMetadata::default();
    let Ok(ilst) = find_box(moov_payload, &[*b"udta", *b"meta", *b"ilst"]) else {
        return out;
    };
    for tag in TOOL_TAGS {
        if let Ok(tool) = find_box(ilst.payload, &[*tag, *b"data"]) {
            if let Some(value) = ilst_data_as_string(tool.payload) {
                out.tool = Some(value);
                out.tool_tag = Some(*tag);
                break;
            }
        }
    }
    for tag in DESCRIPTION_TAGS {
        if let Ok(desc) = find_box(ilst.payload, &[*tag, *b"data"]) {
            if let Some(value) = ilst_data_as_string(desc.payload) {
                out.description = Some(value);
                out.description_tag = Some(*tag);
                break;
            }
        }
    }
    out
}

fn ilst_data_as_string(data_payload: &[u8]) -> Option<String> {
    if data_payload.len() < 8 {
        return None;
    }
    let data_type = u32::from_be_bytes(data_payload[0..4].try_into().expect("4 bytes"));
    if data_type != crate::ILST_DATA_TYPE_UTF8 {
        return None;
    }
    String::from_utf8(data_payload[8..].to_vec()).ok()
}

/// Parsed `stsd` sample entry: codec 4CC and the verbatim payload of
/// its config child box (`avcC`/`hvcC`/`av1C`/`esds`/`dfLa`).
#[derive(Debug, Clone)]
pub struct ParsedStsd {
    pub codec: BoxType,
    pub codec_private: Vec<u8>,
    pub width: Option<u16>,
    pub height: Option<u16>,
}

const CONFIG_BOX_BY_CODEC: &[(BoxType, BoxType)] = &[
    (*b"avc1", *b"avcC"),
    (*b"hvc1", *b"hvcC"),
    (*b"hev1", *b"hvcC"),
    (*b"av01", *b"av1C"),
    (*b"mp4a", *b"esds"),
    (*b"fLaC", *b"dfLa"),
];

/// Rejects (rather than silently using entry 0) when `stsd` carries
/// more than one entry and they are not byte-identical.
pub fn parse_stsd(stsd_payload: &[u8]) -> Result<ParsedStsd, ParseBoxError> {
    let entry_count = read_u32(stsd_payload, 4)?;
    let entries_buf = &stsd_payload[8..];

    let first_entry = read_single_box_slice(entries_buf, 0)?;

    if entry_count > 1 {
        let mut pos = first_entry.1;
        for _ in 1..entry_count {
            let (entry_bytes, next) = read_single_box_slice(entries_buf, pos)?;
            if entry_bytes != first_entry.0 {
                return Err(ParseBoxError::MultiEntryStsdMismatch { entry_count });
            }
            pos = next;
        }
    }

    let entry = first_entry.0;
    let codec: BoxType = entry[4..8].try_into().expect("4 bytes");

    let (mut width, mut height) = (None, None);
    // Visual sample entries place width/height at a fixed offset
    // after the SampleEntry + two u16 + u32x3 preamble (16 bytes in).
    if entry.len() >= 8 + 16 + 4 {
        let base = 8 + 16;
        width = Some(u16::from_be_bytes(
            entry[base..base + 2].try_into().expect("2 bytes"),
        ));
        height = Some(u16::from_be_bytes(
            entry[base + 2..base + 4].try_into().expect("2 bytes"),
        ));
    }

    let codec_private = CONFIG_BOX_BY_CODEC
        .iter()
        .find(|(c, _)| *c == codec)
        .and_then(|(_, cfg)| find_box(entry, &[*cfg]).ok())
        .map_or_else(Vec::new, |b| b.payload.to_vec());

    Ok(ParsedStsd {
        codec,
        codec_private,
        width,
        height,
    })
}

/// Reads one top-level box starting at `pos` within `buf`, returning
/// its full bytes (header included) and the offset just past it.
fn read_single_box_slice(buf: &[u8], pos: usize) -> Result<(&[u8], usize), ParseBoxError> {
    let header = read_box_header(buf, pos)?;
    let end = pos + usize_from_u64(header.size)?;
    Ok((&buf[pos..end], end))
}

fn fullbox_flags(payload: &[u8]) -> Result<u32, ParseBoxError> {
    if payload.len() < 4 {
        return Err(ParseBoxError::Truncated {
            need: 4,
            have: payload.len(),
        });
    }
    Ok(u32::from_be_bytes([0, payload[1], payload[2], payload[3]]))
}

fn to_flag_bytes(flags: u32) -> [u8; 3] {
    crate::u32_to_flags(flags)
}

fn read_u32(buf: &[u8], pos: usize) -> Result<u32, ParseBoxError> {
    let bytes: [u8; 4] = buf
        .get(pos..pos + 4)
        .ok_or(ParseBoxError::Truncated {
            need: pos + 4,
            have: buf.len(),
        })?
        .try_into()
        .expect("4 bytes");
    Ok(u32::from_be_bytes(bytes))
}

fn read_u64(buf: &[u8], pos: usize) -> Result<u64, ParseBoxError> {
    let bytes: [u8; 8] = buf
        .get(pos..pos + 8)
        .ok_or(ParseBoxError::Truncated {
            need: pos + 8,
            have: buf.len(),
        })?
        .try_into()
        .expect("8 bytes");
    Ok(u64::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn make_box(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(u32::try_from(8 + payload.len()).unwrap()).to_be_bytes());
        out.extend_from_slice(box_type);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn find_box_top_level() {
        let moov = make_box(b"moov", b"hello");
        let found = find_box(&moov, &[*b"moov"]).unwrap();
        assert_eq!(found.payload, b"hello");
    }

    #[test]
    fn find_box_nested() {
        let inner = make_box(b"mvhd", b"xy");
        let moov = make_box(b"moov", &inner);
        let found = find_box(&moov, &[*b"moov", *b"mvhd"]).unwrap();
        assert_eq!(found.payload, b"xy");
    }

    #[test]
    fn find_box_missing_is_not_found() {
        let moov = make_box(b"moov", b"hello");
        assert_eq!(
            find_box(&moov, &[*b"trak"]),
            Err(ParseBoxError::NotFound(*b"trak"))
        );
    }

    #[test]
    fn find_box_large_size() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(b"mdat");
        buf.extend_from_slice(&(16u64 + 3).to_be_bytes());
        buf.extend_from_slice(b"abc");
        let found = find_box(&buf, &[*b"mdat"]).unwrap();
        assert_eq!(found.payload, b"abc");
        assert_eq!(found.header_size, 16);
    }

    #[test]
    fn find_box_size_zero_means_to_eof() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(b"mdat");
        buf.extend_from_slice(b"rest-of-file");
        let found = find_box(&buf, &[*b"mdat"]).unwrap();
        assert_eq!(found.payload, b"rest-of-file");
    }

    #[test]
    fn bad_size_is_an_error_not_a_panic() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4u32.to_be_bytes()); // smaller than header size
        buf.extend_from_slice(b"free");
        assert!(matches!(
            find_box(&buf, &[*b"free"]),
            Err(ParseBoxError::BadSize { .. })
        ));
    }

    #[test]
    fn mdhd_timescale_v0() {
        let mut payload = vec![0, 0, 0, 0]; // version 0, flags
        payload.extend_from_slice(&0u32.to_be_bytes()); // creation
        payload.extend_from_slice(&0u32.to_be_bytes()); // modification
        payload.extend_from_slice(&30000u32.to_be_bytes());
        assert_eq!(parse_mdhd_timescale(&payload).unwrap(), 30000);
    }

    #[test]
    fn tfdt_v1_widens_to_u64() {
        let mut payload = vec![1, 0, 0, 0];
        payload.extend_from_slice(&0x1_0000_0001u64.to_be_bytes());
        assert_eq!(parse_tfdt_time(&payload).unwrap(), 0x1_0000_0001);
    }

    #[test]
    fn trun_first_sample_flags_overrides_only_sample_zero() {
        let mut payload = vec![0u8, 0, 0, 0b0000_0111]; // data_offset + first_sample_flags + sample_flags
        payload.extend_from_slice(&2u32.to_be_bytes()); // sample_count
        payload.extend_from_slice(&0i32.to_be_bytes()); // data_offset
        payload.extend_from_slice(&0x0200_0000u32.to_be_bytes()); // first_sample_flags
        payload.extend_from_slice(&0x0101_0000u32.to_be_bytes()); // sample 0 flags (overridden)
        payload.extend_from_slice(&0x0101_0000u32.to_be_bytes()); // sample 1 flags (kept)
        let trun = parse_trun(&payload).unwrap();
        assert_eq!(trun.entries[0].sample_flags, Some(0x0200_0000));
        assert_eq!(trun.entries[1].sample_flags, Some(0x0101_0000));
    }

    fn make_ilst_tag(tag: &[u8; 4], text: &str) -> Vec<u8> {
        let mut data_payload = crate::ILST_DATA_TYPE_UTF8.to_be_bytes().to_vec();
        data_payload.extend_from_slice(&[0, 0, 0, 0]); // locale
        data_payload.extend_from_slice(text.as_bytes());
        make_box(tag, &make_box(b"data", &data_payload))
    }

    #[test]
    fn parse_user_metadata_recognizes_non_itunes_tags() {
        let ilst = [
            make_ilst_tag(b"tool", "bilidown"),
            make_ilst_tag(b"desc", "a clip"),
        ]
        .concat();
        let meta = make_box(b"meta", &make_box(b"ilst", &ilst));
        let moov_payload = make_box(b"udta", &meta);

        let out = parse_user_metadata(&moov_payload);
        assert_eq!(out.tool.as_deref(), Some("bilidown"));
        assert_eq!(out.tool_tag, Some(*b"tool"));
        assert_eq!(out.description.as_deref(), Some("a clip"));
        assert_eq!(out.description_tag, Some(*b"desc"));
    }

    #[test]
    fn trun_v0_cto_is_signed() {
        let mut payload = vec![0u8, 0, 0, 0b0000_1000]; // version 0, cto present
        payload.extend_from_slice(&1u32.to_be_bytes()); // sample_count
        payload.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes()); // cto = -1
        let trun = parse_trun(&payload).unwrap();
        assert_eq!(trun.entries[0].sample_composition_time_offset, -1);
    }

    #[test]
    fn stsd_rejects_mismatched_multi_entry() {
        let entry_a = make_box(b"avc1", b"aaaa");
        let entry_b = make_box(b"avc1", b"bbbb");
        let mut payload = vec![0, 0, 0, 0];
        payload.extend_from_slice(&2u32.to_be_bytes());
        payload.extend_from_slice(&entry_a);
        payload.extend_from_slice(&entry_b);
        assert!(matches!(
            parse_stsd(&payload),
            Err(ParseBoxError::MultiEntryStsdMismatch { entry_count: 2 })
        ));
    }

    #[test]
    fn stsd_accepts_identical_multi_entry() {
        let entry_a = make_box(b"avc1", b"aaaa");
        let mut payload = vec![0, 0, 0, 0];
        payload.extend_from_slice(&2u32.to_be_bytes());
        payload.extend_from_slice(&entry_a);
        payload.extend_from_slice(&entry_a);
        let parsed = parse_stsd(&payload).unwrap();
        assert_eq!(parsed.codec, *b"avc1");
    }
}
