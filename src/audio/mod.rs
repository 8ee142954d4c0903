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


//! Audio processing: frame concatenation, encoding and tagging
//!
//! # Module Organization
//!
//! ## mpeg
//! MPEG audio frame headers and ID3v2 tag boundaries
//!
//! ## concat
//! Source folder listing and frame-exact MP3 concatenation
//!
//! ## source
//! Reading source tracks (tags, duration, bitrate, pictures) with lofty
//!
//! ## bitrate
//! Pure output bitrate selection against the encoder's supported set
//!
//! ## encoder
//! `Encoder` trait and the FFmpeg AAC implementation
//!
//! ## metadata
//! Tag record, picture aggregation and chapter synthesis
//!
//! ## tagger
//! `TagWriter` trait and the FFmpeg container tag writer
//!
//! # FFmpeg Integration
//!
//! The FFmpeg implementations need `ffmpeg` (and optionally `ffprobe`) in PATH
//! or configured through `MergeConfig`. FFmpeg 4.0 or higher is recommended.

pub mod bitrate;
pub mod concat;
pub mod encoder;
pub mod metadata;
pub mod mpeg;
pub mod source;
pub mod tagger;

// Re-export commonly used types for convenience
pub use bitrate::{select_bitrate, FALLBACK_BITRATES};
pub use concat::{concatenate, list_source_files, ConcatStats};
pub use encoder::{EncodeRequest, Encoder, FfmpegEncoder};
pub use metadata::{BookMetadata, Chapter, ChapterFormat, DestinationTags};
pub use source::{EmbeddedPicture, SourceTrack, TrackTags};
pub use tagger::{FfmpegTagWriter, TagCommit, TagWriter};
