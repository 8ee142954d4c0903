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


//! Merge configuration
//!
//! Settings can be built in code (`MergeConfig::default()`) or loaded from a
//! TOML file. Every field is optional in the file:
//!
//! ```toml
//! ffmpeg_path = "/usr/local/bin/ffmpeg"
//! supported_bitrates = [64000, 96000, 128000]
//! work_dir = "/var/tmp/m4b"
//!
//! [chapter_format]
//! nero = true
//! quicktime = true
//! ```

use crate::audio::metadata::ChapterFormat;
use crate::error::{MergeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// FFmpeg executable used for transcoding and tag writing
    pub ffmpeg_path: PathBuf,

    /// FFprobe executable used to verify encoder output
    pub ffprobe_path: PathBuf,

    /// Extension of source tracks (without the dot)
    pub source_extension: String,

    /// Output sample rate in Hz
    pub sample_rate: u32,

    /// Output channel count
    pub channels: u32,

    /// Bitrates (bits/sec) the AAC encoder supports at the rate/channels above.
    /// Empty means the encoder advertises nothing and the fallback set applies.
    pub supported_bitrates: Vec<u32>,

    /// Chapter marker conventions written to the destination
    pub chapter_format: ChapterFormat,

    /// Directory for intermediate files (system temp dir when unset)
    pub work_dir: Option<PathBuf>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            source_extension: "mp3".to_string(),
            sample_rate: 44_100,
            channels: 2,
            supported_bitrates: Vec::new(),
            chapter_format: ChapterFormat::default(),
            work_dir: None,
        }
    }
}

impl MergeConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: MergeConfig = toml::from_str(text)
            .map_err(|e| MergeError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(MergeError::InvalidConfiguration(
                "sample_rate must be positive".to_string(),
            ));
        }
        if self.channels == 0 {
            return Err(MergeError::InvalidConfiguration(
                "channels must be positive".to_string(),
            ));
        }
        if self.source_extension.trim_start_matches('.').is_empty() {
            return Err(MergeError::InvalidConfiguration(
                "source_extension must not be empty".to_string(),
            ));
        }
        if self.supported_bitrates.iter().any(|&b| b == 0) {
            return Err(MergeError::InvalidConfiguration(
                "supported_bitrates must not contain zero".to_string(),
            ));
        }
        // The MP4 muxer always emits the QuickTime chapter track when chapters
        // are present, so Nero-only output is not expressible.
        if self.chapter_format.nero && !self.chapter_format.quicktime {
            return Err(MergeError::InvalidConfiguration(
                "Nero chapters require QuickTime chapters to be enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Source extension without a leading dot
    pub fn source_extension(&self) -> &str {
        self.source_extension.trim_start_matches('.')
    }

    /// Directory that receives intermediate files
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MergeConfig::default();
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.channels, 2);
        assert_eq!(config.source_extension(), "mp3");
        assert!(config.supported_bitrates.is_empty());
        assert!(config.chapter_format.nero);
        assert!(config.chapter_format.quicktime);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = MergeConfig::from_toml_str(
            r#"
            ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
            supported_bitrates = [64000, 128000]
            "#,
        )
        .unwrap();
        assert_eq!(config.ffmpeg_path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.supported_bitrates, vec![64000, 128000]);
        assert_eq!(config.ffprobe_path, PathBuf::from("ffprobe"));
        assert_eq!(config.sample_rate, 44_100);
    }

    #[test]
    fn test_chapter_format_from_toml() {
        let config = MergeConfig::from_toml_str(
            r#"
            [chapter_format]
            nero = false
            "#,
        )
        .unwrap();
        assert!(!config.chapter_format.nero);
        assert!(config.chapter_format.quicktime);
    }

    #[test]
    fn test_rejects_nero_only_chapters() {
        let result = MergeConfig::from_toml_str(
            r#"
            [chapter_format]
            quicktime = false
            "#,
        );
        assert!(matches!(result, Err(MergeError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_rejects_zero_sample_rate() {
        let config = MergeConfig {
            sample_rate: 0,
            ..MergeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dotted_extension_is_normalized() {
        let config = MergeConfig {
            source_extension: ".mp3".to_string(),
            ..MergeConfig::default()
        };
        assert_eq!(config.source_extension(), "mp3");
    }
}
