// SPDX-License-Identifier: GPL-2.0-or-later
//
// Boxes the teacher's muxer never needed: 64-bit chunk offsets for
// multi-gigabyte outputs, a sound media header, generic sample
// entries for codecs it never wrote (HEVC/AV1), an opaque wrapper for
// codec-private config boxes copied verbatim from a source init
// segment, and the `udta/meta/ilst` metadata tags.

use crate::{BoxType, Boxes, FullBox, ImmutableBox, Mp4Error, SampleEntry};

/*************************** co64 ****************************/

pub const TYPE_CO64: BoxType = *b"co64";

#[derive(Default)]
pub struct Co64 {
    pub full_box: FullBox,
    pub chunk_offsets: Vec<u64>,
}

impl ImmutableBox for Co64 {
    fn box_type(&self) -> BoxType {
        TYPE_CO64
    }

    fn size(&self) -> usize {
        8 + self.chunk_offsets.len() * 8
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(
            &u32::try_from(self.chunk_offsets.len())
                .map_err(|e| Mp4Error::FromInt("co64".to_owned(), e))?
                .to_be_bytes(),
        )?;
        for offset in &self.chunk_offsets {
            w.write_all(&offset.to_be_bytes())?;
        }
        Ok(())
    }
}

impl From<Co64> for Box<dyn ImmutableBox> {
    fn from(value: Co64) -> Self {
        Box::new(value)
    }
}

/*************************** smhd ****************************/

pub const TYPE_SMHD: BoxType = *b"smhd";

#[derive(Default)]
pub struct Smhd {
    pub full_box: FullBox,
    pub balance: i16,
    pub reserved: u16,
}

impl ImmutableBox for Smhd {
    fn box_type(&self) -> BoxType {
        TYPE_SMHD
    }

    fn size(&self) -> usize {
        8
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(&self.balance.to_be_bytes())?;
        w.write_all(&self.reserved.to_be_bytes())?;
        Ok(())
    }
}

impl From<Smhd> for Box<dyn ImmutableBox> {
    fn from(value: Smhd) -> Self {
        Box::new(value)
    }
}

/********************** generic video sample entry **********************/

/// A `hvc1`/`av01` sample entry. Structurally identical to `avc1` in
/// every field but the 4CC and the name of the child config box, so
/// it is shared rather than duplicated per codec.
#[derive(Default)]
pub struct VisualSampleEntry {
    pub box_type: BoxType,
    pub sample_entry: SampleEntry,
    pub width: u16,
    pub height: u16,
    pub horiz_resolution: u32,
    pub vert_resolution: u32,
    pub frame_count: u16,
    pub compressor_name: [u8; 32],
    pub depth: u16,
}

impl ImmutableBox for VisualSampleEntry {
    fn box_type(&self) -> BoxType {
        self.box_type
    }

    fn size(&self) -> usize {
        78
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.sample_entry.marshal(w)?;
        w.write_all(&0u16.to_be_bytes())?; // pre_defined
        w.write_all(&0u16.to_be_bytes())?; // reserved
        for _ in 0..3 {
            w.write_all(&0u32.to_be_bytes())?; // pre_defined2
        }
        w.write_all(&self.width.to_be_bytes())?;
        w.write_all(&self.height.to_be_bytes())?;
        w.write_all(&self.horiz_resolution.to_be_bytes())?;
        w.write_all(&self.vert_resolution.to_be_bytes())?;
        w.write_all(&0u32.to_be_bytes())?; // reserved2
        w.write_all(&self.frame_count.to_be_bytes())?;
        w.write_all(&self.compressor_name)?;
        w.write_all(&self.depth.to_be_bytes())?;
        w.write_all(&(-1i16).to_be_bytes())?; // pre_defined3
        Ok(())
    }
}

impl From<VisualSampleEntry> for Box<dyn ImmutableBox> {
    fn from(value: VisualSampleEntry) -> Self {
        Box::new(value)
    }
}

/********************** generic audio sample entry **********************/

pub const TYPE_MP4A: BoxType = *b"mp4a";

#[derive(Default)]
pub struct AudioSampleEntry {
    pub box_type: BoxType,
    pub sample_entry: SampleEntry,
    pub channel_count: u16,
    pub sample_size: u16,
    pub sample_rate: u32, // 16.16 fixed-point
}

impl ImmutableBox for AudioSampleEntry {
    fn box_type(&self) -> BoxType {
        self.box_type
    }

    fn size(&self) -> usize {
        20
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.sample_entry.marshal(w)?;
        w.write_all(&0u32.to_be_bytes())?; // reserved[2]
        w.write_all(&0u32.to_be_bytes())?;
        w.write_all(&self.channel_count.to_be_bytes())?;
        w.write_all(&self.sample_size.to_be_bytes())?;
        w.write_all(&0u16.to_be_bytes())?; // pre_defined
        w.write_all(&0u16.to_be_bytes())?; // reserved
        w.write_all(&self.sample_rate.to_be_bytes())?;
        Ok(())
    }
}

impl From<AudioSampleEntry> for Box<dyn ImmutableBox> {
    fn from(value: AudioSampleEntry) -> Self {
        Box::new(value)
    }
}

/********************** opaque codec-private config box **********************/

/// Wraps a codec-private config box (`avcC`/`hvcC`/`av1C`/`esds`/
/// `dfLa`) whose payload was captured verbatim while parsing a source
/// init segment. The container is remuxed, never transcoded, so the
/// exact bytes the source encoder produced are reproduced unchanged.
pub struct OpaqueBox {
    pub box_type: BoxType,
    pub payload: Vec<u8>,
}

impl ImmutableBox for OpaqueBox {
    fn box_type(&self) -> BoxType {
        self.box_type
    }

    fn size(&self) -> usize {
        self.payload.len()
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&self.payload)?;
        Ok(())
    }
}

impl From<OpaqueBox> for Box<dyn ImmutableBox> {
    fn from(value: OpaqueBox) -> Self {
        Box::new(value)
    }
}

/*************************** udta/meta/ilst ****************************/

pub const TYPE_UDTA: BoxType = *b"udta";
pub const TYPE_META: BoxType = *b"meta";
pub const TYPE_ILST: BoxType = *b"ilst";
pub const TYPE_DATA: BoxType = *b"data";

pub const TAG_TOOL: BoxType = *b"\xa9too";
pub const TAG_DESCRIPTION: BoxType = *b"\xa9des";

pub struct Udta;

impl ImmutableBox for Udta {
    fn box_type(&self) -> BoxType {
        TYPE_UDTA
    }
    fn size(&self) -> usize {
        0
    }
    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Udta> for Box<dyn ImmutableBox> {
    fn from(value: Udta) -> Self {
        Box::new(value)
    }
}

#[derive(Default)]
pub struct Meta {
    pub full_box: FullBox,
}

impl ImmutableBox for Meta {
    fn box_type(&self) -> BoxType {
        TYPE_META
    }
    fn size(&self) -> usize {
        4
    }
    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        Ok(())
    }
}

impl From<Meta> for Box<dyn ImmutableBox> {
    fn from(value: Meta) -> Self {
        Box::new(value)
    }
}

pub struct Ilst;

impl ImmutableBox for Ilst {
    fn box_type(&self) -> BoxType {
        TYPE_ILST
    }
    fn size(&self) -> usize {
        0
    }
    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Ilst> for Box<dyn ImmutableBox> {
    fn from(value: Ilst) -> Self {
        Box::new(value)
    }
}

/// One `<tag>` box wrapping a single `data` child; `tag` is a 4CC
/// such as `\xa9too` (tool) or `\xa9des` (description).
pub struct IlstTag;

impl IlstTag {
    #[must_use]
    pub fn boxes(tag: BoxType, text: &str) -> Boxes {
        Boxes::new(RawTagBox(tag)).with_child(Boxes::new(IlstData {
            value: text.as_bytes().to_vec(),
        }))
    }
}

struct RawTagBox(BoxType);

impl ImmutableBox for RawTagBox {
    fn box_type(&self) -> BoxType {
        self.0
    }
    fn size(&self) -> usize {
        0
    }
    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<RawTagBox> for Box<dyn ImmutableBox> {
    fn from(value: RawTagBox) -> Self {
        Box::new(value)
    }
}

pub struct IlstData {
    pub value: Vec<u8>,
}

/// `data.type == 1` is UTF-8 text, the only variant this engine
/// produces or expects to read back.
pub const ILST_DATA_TYPE_UTF8: u32 = 1;

impl ImmutableBox for IlstData {
    fn box_type(&self) -> BoxType {
        TYPE_DATA
    }
    fn size(&self) -> usize {
        8 + self.value.len()
    }
    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&ILST_DATA_TYPE_UTF8.to_be_bytes())?;
        w.write_all(&0u32.to_be_bytes())?; // locale
        w.write_all(&self.value)?;
        Ok(())
    }
}

impl From<IlstData> for Box<dyn ImmutableBox> {
    fn from(value: IlstData) -> Self {
        Box::new(value)
    }
}
