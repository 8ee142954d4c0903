// m4b-merge - Audiobook MP3 to M4B merger
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! MPEG audio frame and ID3v2 tag parsing
//!
//! Just enough of the bitstream to split a file into its compressed frames
//! without decoding them:
//! - ID3v2: "ID3" + version (2 bytes) + flags + 4-byte synchsafe size
//! - Frame header: 11 sync bits, version, layer, bitrate and sample-rate
//!   indices, padding bit. Frame length comes from the standard tables.
//! - VBR info frames (Xing / Info / VBRI) are recognized so callers can
//!   drop them.

/// Length of an ID3v2 tag header (and footer)
pub const ID3V2_HEADER_LEN: usize = 10;

/// Length of an MPEG audio frame header
pub const FRAME_HEADER_LEN: usize = 4;

/// MPEG audio version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

/// MPEG audio layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Layer1,
    Layer2,
    Layer3,
}

const BITRATES_V1_L1: [u32; 15] = [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448];
const BITRATES_V1_L2: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384];
const BITRATES_V1_L3: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATES_V2_L1: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256];
const BITRATES_V2_L23: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

/// Parsed MPEG audio frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: Layer,
    /// Bitrate in kbps
    pub bitrate_kbps: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    pub padding: bool,
    pub has_crc: bool,
    pub mono: bool,
}

impl FrameHeader {
    /// Parse a frame header from the first four bytes of `bytes`
    ///
    /// Returns `None` for anything that is not a valid, fixed-bitrate header
    /// (free-format and reserved indices are rejected).
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < FRAME_HEADER_LEN {
            return None;
        }
        if bytes[0] != 0xFF || (bytes[1] & 0xE0) != 0xE0 {
            return None;
        }

        let version = match (bytes[1] >> 3) & 0x03 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return None,
        };
        let layer = match (bytes[1] >> 1) & 0x03 {
            0b01 => Layer::Layer3,
            0b10 => Layer::Layer2,
            0b11 => Layer::Layer1,
            _ => return None,
        };
        let has_crc = bytes[1] & 0x01 == 0;

        let bitrate_index = (bytes[2] >> 4) as usize;
        if bitrate_index == 0 || bitrate_index == 0x0F {
            return None;
        }
        let table = match (version, layer) {
            (MpegVersion::Mpeg1, Layer::Layer1) => &BITRATES_V1_L1,
            (MpegVersion::Mpeg1, Layer::Layer2) => &BITRATES_V1_L2,
            (MpegVersion::Mpeg1, Layer::Layer3) => &BITRATES_V1_L3,
            (_, Layer::Layer1) => &BITRATES_V2_L1,
            (_, _) => &BITRATES_V2_L23,
        };
        let bitrate_kbps = table[bitrate_index];

        let base_rate = match (bytes[2] >> 2) & 0x03 {
            0 => 44_100,
            1 => 48_000,
            2 => 32_000,
            _ => return None,
        };
        let sample_rate = match version {
            MpegVersion::Mpeg1 => base_rate,
            MpegVersion::Mpeg2 => base_rate / 2,
            MpegVersion::Mpeg25 => base_rate / 4,
        };

        Some(Self {
            version,
            layer,
            bitrate_kbps,
            sample_rate,
            padding: (bytes[2] >> 1) & 0x01 == 1,
            has_crc,
            mono: (bytes[3] >> 6) == 0b11,
        })
    }

    /// Total frame length in bytes, header included
    pub fn frame_len(&self) -> usize {
        let bitrate = self.bitrate_kbps as usize * 1000;
        let rate = self.sample_rate as usize;
        let padding = usize::from(self.padding);
        match (self.layer, self.version) {
            (Layer::Layer1, _) => (12 * bitrate / rate + padding) * 4,
            (Layer::Layer2, _) | (Layer::Layer3, MpegVersion::Mpeg1) => 144 * bitrate / rate + padding,
            (Layer::Layer3, _) => 72 * bitrate / rate + padding,
        }
    }

    /// PCM samples encoded by one frame
    pub fn samples_per_frame(&self) -> u32 {
        match (self.layer, self.version) {
            (Layer::Layer1, _) => 384,
            (Layer::Layer2, _) | (Layer::Layer3, MpegVersion::Mpeg1) => 1152,
            (Layer::Layer3, _) => 576,
        }
    }

    /// Offset of a Xing/Info tag inside a Layer III frame
    fn xing_offset(&self) -> usize {
        let side_info = match (self.version, self.mono) {
            (MpegVersion::Mpeg1, true) => 17,
            (MpegVersion::Mpeg1, false) => 32,
            (_, true) => 9,
            (_, false) => 17,
        };
        FRAME_HEADER_LEN + if self.has_crc { 2 } else { 0 } + side_info
    }
}

/// Size of an ID3v2 tag at the start of `bytes`, header and footer included
pub fn id3v2_tag_len(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < ID3V2_HEADER_LEN || &bytes[0..3] != b"ID3" {
        return None;
    }
    // Version bytes are never 0xFF; size bytes are synchsafe (high bit clear)
    if bytes[3] == 0xFF || bytes[4] == 0xFF || bytes[6..10].iter().any(|b| b & 0x80 != 0) {
        return None;
    }
    let size = bytes[6..10]
        .iter()
        .fold(0usize, |acc, &b| (acc << 7) | (b & 0x7F) as usize);
    let footer = if bytes[5] & 0x10 != 0 { ID3V2_HEADER_LEN } else { 0 };
    Some(ID3V2_HEADER_LEN + size + footer)
}

/// Whether a Layer III frame carries a VBR info tag instead of audio
pub fn is_vbr_info_frame(header: &FrameHeader, frame: &[u8]) -> bool {
    if header.layer != Layer::Layer3 {
        return false;
    }
    let xing = header.xing_offset();
    if frame.len() >= xing + 4 && matches!(&frame[xing..xing + 4], b"Xing" | b"Info") {
        return true;
    }
    // VBRI always sits 32 bytes after the header
    frame.len() >= 40 && &frame[36..40] == b"VBRI"
}

/// One compressed frame borrowed from a source buffer
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub header: FrameHeader,
    /// Offset of the frame in the source buffer
    pub offset: usize,
    /// Raw frame bytes, header included
    pub data: &'a [u8],
}

impl Frame<'_> {
    /// Whether this frame is a Xing/Info/VBRI header frame
    pub fn is_vbr_info(&self) -> bool {
        is_vbr_info_frame(&self.header, self.data)
    }
}

/// Iterator over the frames of an in-memory MPEG audio file
///
/// ID3v2 tags are stepped over wherever they appear; any other byte that
/// does not start a frame (ID3v1, APE tags, junk) is skipped one at a time
/// until the stream resyncs.
pub struct FrameReader<'a> {
    data: &'a [u8],
    pos: usize,
    skipped: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            skipped: 0,
        }
    }

    /// Bytes skipped so far because they were not part of any frame
    pub fn skipped_bytes(&self) -> usize {
        self.skipped
    }

    fn frame_at(&self, pos: usize) -> Option<FrameHeader> {
        let header = FrameHeader::parse(&self.data[pos..])?;
        let len = header.frame_len();
        if len < FRAME_HEADER_LEN || pos + len > self.data.len() {
            return None;
        }
        Some(header)
    }
}

impl<'a> Iterator for FrameReader<'a> {
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut resynced = false;
        while self.pos + FRAME_HEADER_LEN <= self.data.len() {
            if let Some(tag_len) = id3v2_tag_len(&self.data[self.pos..]) {
                let end = (self.pos + tag_len).min(self.data.len());
                self.skipped += end - self.pos;
                self.pos = end;
                continue;
            }

            if let Some(header) = self.frame_at(self.pos) {
                let len = header.frame_len();
                let end = self.pos + len;
                // After junk, require the next frame (or EOF) to line up
                let confirmed = !resynced
                    || end == self.data.len()
                    || (end + FRAME_HEADER_LEN <= self.data.len() && self.frame_at(end).is_some());
                if confirmed {
                    let frame = Frame {
                        header,
                        offset: self.pos,
                        data: &self.data[self.pos..end],
                    };
                    self.pos = end;
                    return Some(frame);
                }
            }

            resynced = true;
            self.pos += 1;
            self.skipped += 1;
        }

        self.skipped += self.data.len() - self.pos.min(self.data.len());
        self.pos = self.data.len();
        None
    }
}
