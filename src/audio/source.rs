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


//! Source track reading
//!
//! Each MP3 in the book folder becomes a [`SourceTrack`]: its scalar tags,
//! audio properties and embedded pictures. Tracks are read once per run and
//! never written back.

use crate::error::{MergeError, Result};
use lofty::file::{AudioFile, TaggedFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag, TagType};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Scalar tag fields copied into the destination
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackTags {
    pub album: Option<String>,
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub comment: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub language: Option<String>,
    pub year: Option<String>,
    pub title: Option<String>,
}

impl TrackTags {
    fn from_tag(tag: &Tag) -> Self {
        let get = |key: ItemKey| {
            tag.get_string(key)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            album: get(ItemKey::AlbumTitle),
            artist: get(ItemKey::TrackArtist),
            album_artist: get(ItemKey::AlbumArtist),
            comment: get(ItemKey::Comment),
            date: get(ItemKey::RecordingDate),
            description: get(ItemKey::Description),
            genre: get(ItemKey::Genre),
            language: get(ItemKey::Language),
            year: get(ItemKey::Year),
            title: get(ItemKey::TrackTitle),
        }
    }
}

/// Picture embedded in a source track
///
/// Two pictures are the same when their content hashes match.
#[derive(Debug, Clone)]
pub struct EmbeddedPicture {
    pub data: Vec<u8>,
    pub mime_type: Option<String>,
    /// Hex SHA-256 of `data`
    pub hash: String,
}

impl EmbeddedPicture {
    pub fn new(data: Vec<u8>, mime_type: Option<String>) -> Self {
        let hash = hex::encode(Sha256::digest(&data));
        Self {
            data,
            mime_type,
            hash,
        }
    }

    /// File extension matching the picture's content
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_deref() {
            Some("image/png") => "png",
            Some("image/jpeg") | Some("image/jpg") => "jpg",
            Some("image/gif") => "gif",
            Some("image/bmp") => "bmp",
            _ => Self::sniff_extension(&self.data),
        }
    }

    fn sniff_extension(data: &[u8]) -> &'static str {
        if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            "png"
        } else if data.starts_with(b"GIF8") {
            "gif"
        } else if data.starts_with(b"BM") {
            "bmp"
        } else {
            "jpg"
        }
    }
}

impl PartialEq for EmbeddedPicture {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for EmbeddedPicture {}

/// One source MP3 of the book
#[derive(Debug, Clone)]
pub struct SourceTrack {
    pub path: PathBuf,
    /// Position in case-insensitive filename order, starting at 0
    pub ordinal: usize,
    pub tags: TrackTags,
    pub duration: Duration,
    /// Audio bitrate in kbps
    pub bitrate_kbps: u32,
    pub pictures: Vec<EmbeddedPicture>,
}

impl SourceTrack {
    /// Duration in whole milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Chapter title for this track, falling back to the file stem
    pub fn chapter_title(&self) -> String {
        self.tags.title.clone().unwrap_or_else(|| {
            self.path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default()
        })
    }

    /// Read tags, properties and pictures from a file (blocking)
    pub fn read(path: &Path, ordinal: usize) -> Result<Self> {
        let tagged = Probe::open(path)
            .and_then(|probe| probe.read())
            .map_err(|e| MergeError::source_read(path, e.to_string()))?;

        let properties = tagged.properties();
        let bitrate_kbps = properties
            .audio_bitrate()
            .or_else(|| properties.overall_bitrate())
            .unwrap_or(0);

        let (tags, pictures) = match Self::find_best_tag(&tagged) {
            Some(tag) => (
                TrackTags::from_tag(tag),
                tag.pictures()
                    .iter()
                    .map(|p| {
                        EmbeddedPicture::new(
                            p.data().to_vec(),
                            p.mime_type().map(|m| m.as_str().to_string()),
                        )
                    })
                    .collect(),
            ),
            None => (TrackTags::default(), Vec::new()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            ordinal,
            tags,
            duration: properties.duration(),
            bitrate_kbps,
            pictures,
        })
    }

    /// Read a track off the async runtime
    pub async fn read_async(path: PathBuf, ordinal: usize) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::read(&path, ordinal)).await?
    }

    fn find_best_tag(tagged: &TaggedFile) -> Option<&Tag> {
        tagged
            .primary_tag()
            .or_else(|| tagged.tags().iter().find(|t| t.tag_type() == TagType::Id3v2))
            .or_else(|| tagged.first_tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_picture_equality_is_by_hash() {
        let a = EmbeddedPicture::new(vec![1, 2, 3], Some("image/png".to_string()));
        let b = EmbeddedPicture::new(vec![1, 2, 3], Some("image/jpeg".to_string()));
        let c = EmbeddedPicture::new(vec![1, 2, 4], Some("image/png".to_string()));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.hash.len(), 64);
    }

    #[test]
    fn test_picture_extension() {
        let png = EmbeddedPicture::new(b"\x89PNG\r\n\x1a\nrest".to_vec(), None);
        assert_eq!(png.extension(), "png");
        let jpeg = EmbeddedPicture::new(vec![0xFF, 0xD8, 0xFF], Some("image/jpeg".to_string()));
        assert_eq!(jpeg.extension(), "jpg");
        let unknown = EmbeddedPicture::new(vec![0, 0, 0], None);
        assert_eq!(unknown.extension(), "jpg");
    }

    #[test]
    fn test_chapter_title_falls_back_to_stem() {
        let track = SourceTrack {
            path: PathBuf::from("/book/01 - Opening.mp3"),
            ordinal: 0,
            tags: TrackTags::default(),
            duration: Duration::from_millis(1500),
            bitrate_kbps: 128,
            pictures: Vec::new(),
        };
        assert_eq!(track.chapter_title(), "01 - Opening");
        assert_eq!(track.duration_ms(), 1500);
    }

    #[test]
    fn test_read_missing_file_fails() {
        let result = SourceTrack::read(Path::new("/definitely/not/here.mp3"), 0);
        assert!(matches!(result, Err(MergeError::SourceReadFailure { .. })));
    }
}
