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


//! Destination metadata synthesis
//!
//! # Tag Record
//! - Scalar fields come verbatim from the ordinal-first source track
//! - The container title is the source album (book title, not a chapter title)
//! - Pictures: first track only, or every track deduplicated by content hash
//!
//! # Chapter Markers
//! - One chapter per source track, titled with the track's own title
//! - Contiguous: start = previous end, first start = 0, last end = total
//! - Written in both MP4 conventions: Nero `chpl` atom and QuickTime text track
//! - Format: [(title, start_ms, end_ms)]

use crate::audio::source::{EmbeddedPicture, SourceTrack, TrackTags};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Chapter marker conventions to write
///
/// Passed explicitly to the tag writer for every commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChapterFormat {
    /// Nero `chpl` atom in the movie user data
    pub nero: bool,
    /// QuickTime chapter text track
    pub quicktime: bool,
}

impl Default for ChapterFormat {
    fn default() -> Self {
        Self {
            nero: true,
            quicktime: true,
        }
    }
}

impl ChapterFormat {
    /// Whether any chapter markers are written at all
    pub fn any(&self) -> bool {
        self.nero || self.quicktime
    }
}

/// Chapter marker structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub title: String,
    /// Start time in milliseconds
    pub start_ms: u64,
    /// End time in milliseconds
    pub end_ms: u64,
}

/// Tag fields written to the destination container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationTags {
    /// Container title, taken from the source album
    pub title: Option<String>,
    pub album: Option<String>,
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub comment: Option<String>,
    pub date: Option<String>,
    pub description: Option<String>,
    pub genre: Option<String>,
    pub language: Option<String>,
    pub year: Option<String>,
}

impl From<&TrackTags> for DestinationTags {
    fn from(tags: &TrackTags) -> Self {
        Self {
            title: tags.album.clone(),
            album: tags.album.clone(),
            artist: tags.artist.clone(),
            album_artist: tags.album_artist.clone(),
            comment: tags.comment.clone(),
            date: tags.date.clone(),
            description: tags.description.clone(),
            genre: tags.genre.clone(),
            language: tags.language.clone(),
            year: tags.year.clone(),
        }
    }
}

impl DestinationTags {
    /// FFmpeg global metadata keys, in a stable order
    ///
    /// `date` falls back to the year when the source has no full date.
    /// Language is not a global MP4 tag and is written separately.
    pub fn ffmpeg_pairs(&self) -> Vec<(&'static str, &str)> {
        let date = self.date.as_deref().or(self.year.as_deref());
        [
            ("title", self.title.as_deref()),
            ("album", self.album.as_deref()),
            ("artist", self.artist.as_deref()),
            ("album_artist", self.album_artist.as_deref()),
            ("comment", self.comment.as_deref()),
            ("date", date),
            ("description", self.description.as_deref()),
            ("genre", self.genre.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect()
    }

    /// Language as an ISO 639-2 code, if the tag holds one
    pub fn iso_language(&self) -> Option<String> {
        self.language
            .as_deref()
            .map(str::trim)
            .filter(|l| l.len() == 3 && l.chars().all(|c| c.is_ascii_alphabetic()))
            .map(str::to_ascii_lowercase)
    }
}

/// Complete tag record for the destination container
#[derive(Debug, Clone, Default)]
pub struct BookMetadata {
    pub tags: DestinationTags,
    pub pictures: Vec<EmbeddedPicture>,
    pub chapters: Vec<Chapter>,
}

impl BookMetadata {
    /// Total duration covered by the chapters
    pub fn total_duration_ms(&self) -> u64 {
        self.chapters.last().map(|c| c.end_ms).unwrap_or(0)
    }
}

/// Build the destination tag record from the ordered source tracks
pub fn synthesize(tracks: &[SourceTrack], include_all_images: bool) -> BookMetadata {
    BookMetadata {
        tags: tracks
            .first()
            .map(|t| DestinationTags::from(&t.tags))
            .unwrap_or_default(),
        pictures: aggregate_pictures(tracks, include_all_images),
        chapters: build_chapters(tracks),
    }
}

/// Collect pictures for the destination
///
/// Without `include_all` only the first track's pictures are taken, in their
/// original order and without deduplication. With it every track contributes,
/// skipping pictures whose hash was already added.
pub fn aggregate_pictures(tracks: &[SourceTrack], include_all: bool) -> Vec<EmbeddedPicture> {
    if !include_all {
        return tracks
            .first()
            .map(|t| t.pictures.clone())
            .unwrap_or_default();
    }

    let mut seen = HashSet::new();
    tracks
        .iter()
        .flat_map(|t| t.pictures.iter())
        .filter(|p| seen.insert(p.hash.clone()))
        .cloned()
        .collect()
}

/// One contiguous chapter per track, accumulating track durations
pub fn build_chapters(tracks: &[SourceTrack]) -> Vec<Chapter> {
    let mut elapsed = 0u64;
    tracks
        .iter()
        .map(|track| {
            let start_ms = elapsed;
            elapsed += track.duration_ms();
            Chapter {
                title: track.chapter_title(),
                start_ms,
                end_ms: elapsed,
            }
        })
        .collect()
}

/// Generate FFmetadata content: global tags followed by chapters
pub fn generate_ffmetadata(tags: &DestinationTags, chapters: &[Chapter]) -> String {
    let mut content = String::from(";FFMETADATA1\n");

    for (key, value) in tags.ffmpeg_pairs() {
        content.push_str(&format!("{}={}\n", key, escape_ffmetadata(value)));
    }

    for chapter in chapters {
        content.push_str("\n[CHAPTER]\n");
        content.push_str("TIMEBASE=1/1000\n");
        content.push_str(&format!("START={}\n", chapter.start_ms));
        content.push_str(&format!("END={}\n", chapter.end_ms));
        content.push_str(&format!("title={}\n", escape_ffmetadata(&chapter.title)));
    }

    content
}

/// Escape `=`, `;`, `#`, `\` and newlines for the FFmetadata format
fn escape_ffmetadata(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '=' | ';' | '#' | '\\' | '\n') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn track(name: &str, title: &str, duration_ms: u64, pictures: Vec<EmbeddedPicture>) -> SourceTrack {
        SourceTrack {
            path: PathBuf::from(format!("/book/{}", name)),
            ordinal: 0,
            tags: TrackTags {
                title: Some(title.to_string()),
                ..TrackTags::default()
            },
            duration: Duration::from_millis(duration_ms),
            bitrate_kbps: 128,
            pictures,
        }
    }

    fn picture(bytes: &[u8]) -> EmbeddedPicture {
        EmbeddedPicture::new(bytes.to_vec(), Some("image/jpeg".to_string()))
    }

    #[test]
    fn test_chapters_accumulate_durations() {
        let tracks = vec![
            track("a.mp3", "One", 10_000, vec![]),
            track("b.mp3", "Two", 20_000, vec![]),
            track("c.mp3", "Three", 15_000, vec![]),
        ];
        let chapters = build_chapters(&tracks);
        let spans: Vec<_> = chapters.iter().map(|c| (c.start_ms, c.end_ms)).collect();
        assert_eq!(spans, vec![(0, 10_000), (10_000, 30_000), (30_000, 45_000)]);
        assert_eq!(chapters[1].title, "Two");
        assert_eq!(chapters[2].end_ms - chapters[2].start_ms, 15_000);
    }

    #[test]
    fn test_chapters_are_contiguous() {
        let durations = [1, 999, 0, 123_456, 7];
        let tracks: Vec<_> = durations
            .iter()
            .enumerate()
            .map(|(i, &d)| track(&format!("{}.mp3", i), "t", d, vec![]))
            .collect();
        let chapters = build_chapters(&tracks);

        assert_eq!(chapters.len(), tracks.len());
        assert_eq!(chapters[0].start_ms, 0);
        for pair in chapters.windows(2) {
            assert_eq!(pair[0].end_ms, pair[1].start_ms);
        }
        assert_eq!(chapters.last().unwrap().end_ms, durations.iter().sum::<u64>());
    }

    #[test]
    fn test_title_comes_from_album() {
        let mut first = track("a.mp3", "Chapter One", 1000, vec![]);
        first.tags.album = Some("Book Title".to_string());
        first.tags.artist = Some("Author".to_string());
        let mut second = track("b.mp3", "Chapter Two", 1000, vec![]);
        second.tags.album = Some("Other".to_string());
        second.tags.genre = Some("Ignored".to_string());

        let metadata = synthesize(&[first, second], false);
        assert_eq!(metadata.tags.title.as_deref(), Some("Book Title"));
        assert_eq!(metadata.tags.album.as_deref(), Some("Book Title"));
        assert_eq!(metadata.tags.artist.as_deref(), Some("Author"));
        assert_eq!(metadata.tags.genre, None);
        assert_eq!(metadata.total_duration_ms(), 2000);
    }

    #[test]
    fn test_first_track_pictures_only() {
        let shared = picture(b"cover");
        let tracks = vec![
            track("a.mp3", "a", 1, vec![shared.clone(), picture(b"back"), shared.clone()]),
            track("b.mp3", "b", 1, vec![picture(b"other")]),
        ];
        let pictures = aggregate_pictures(&tracks, false);
        assert_eq!(pictures.len(), 3);
        assert_eq!(pictures[0].data, b"cover");
        assert_eq!(pictures[1].data, b"back");
    }

    #[test]
    fn test_all_pictures_deduplicated_by_content() {
        let tracks = vec![
            track("a.mp3", "a", 1, vec![picture(b"cover"), picture(b"map")]),
            track("b.mp3", "b", 1, vec![picture(b"cover"), picture(b"portrait")]),
        ];
        let pictures = aggregate_pictures(&tracks, true);
        let data: Vec<_> = pictures.iter().map(|p| p.data.clone()).collect();
        assert_eq!(data, vec![b"cover".to_vec(), b"map".to_vec(), b"portrait".to_vec()]);
    }

    #[test]
    fn test_ffmpeg_pairs_date_falls_back_to_year() {
        let tags = DestinationTags {
            title: Some("Book".to_string()),
            year: Some("1999".to_string()),
            ..DestinationTags::default()
        };
        assert_eq!(tags.ffmpeg_pairs(), vec![("title", "Book"), ("date", "1999")]);
    }

    #[test]
    fn test_iso_language() {
        let mut tags = DestinationTags {
            language: Some("ENG".to_string()),
            ..DestinationTags::default()
        };
        assert_eq!(tags.iso_language().as_deref(), Some("eng"));
        tags.language = Some("English".to_string());
        assert_eq!(tags.iso_language(), None);
    }

    #[test]
    fn test_generate_ffmetadata() {
        let tags = DestinationTags {
            title: Some("A=B; #1".to_string()),
            ..DestinationTags::default()
        };
        let chapters = vec![
            Chapter {
                title: "Chapter 1".to_string(),
                start_ms: 0,
                end_ms: 300000,
            },
            Chapter {
                title: "Chapter 2".to_string(),
                start_ms: 300000,
                end_ms: 600000,
            },
        ];

        let metadata = generate_ffmetadata(&tags, &chapters);
        assert!(metadata.starts_with(";FFMETADATA1\n"));
        assert!(metadata.contains("title=A\\=B\\; \\#1\n"));
        assert!(metadata.contains("[CHAPTER]"));
        assert!(metadata.contains("TIMEBASE=1/1000"));
        assert!(metadata.contains("START=0"));
        assert!(metadata.contains("END=300000"));
        assert!(metadata.contains("title=Chapter 1"));
        assert!(metadata.contains("START=300000"));
        assert!(metadata.contains("END=600000"));
        assert!(metadata.contains("title=Chapter 2"));
    }

    #[test]
    fn test_chapter_format_default_is_dual() {
        let format = ChapterFormat::default();
        assert!(format.nero && format.quicktime);
        assert!(format.any());
    }
}
