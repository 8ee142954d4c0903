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


//! Writing the tag record onto the destination container
//!
//! # FFmpeg Strategy
//! One remux (`-c copy`) produces the finished container:
//! - input 0: encoded AAC audio
//! - input 1: FFmetadata file with global tags and `[CHAPTER]` blocks
//! - inputs 2..: one image file per picture, mapped as `attached_pic`
//!
//! The `ipod` muxer stores pictures in `covr` and writes chapters as a
//! QuickTime text track plus a Nero `chpl` atom (`+disable_chpl` drops the
//! latter). The output path is a staging file; the caller renames it into
//! place only after this succeeds.

use crate::audio::metadata::{generate_ffmetadata, BookMetadata, ChapterFormat};
use crate::config::MergeConfig;
use crate::error::{MergeError, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempPath;
use tokio::fs;
use tokio::process::Command;

/// One tag commit
#[derive(Debug, Clone, Copy)]
pub struct TagCommit<'a> {
    /// Encoded audio without tags
    pub audio: &'a Path,
    /// Where the tagged container is written
    pub output: &'a Path,
    pub metadata: &'a BookMetadata,
    pub chapter_format: ChapterFormat,
    /// Directory for helper files that live only during the commit
    pub scratch_dir: &'a Path,
}

/// Writes a complete tag record into a container
///
/// Either the output holds the audio plus every tag, picture and chapter,
/// or an error is returned.
pub trait TagWriter: Send + Sync {
    fn write_tags(&self, commit: TagCommit<'_>) -> impl Future<Output = Result<()>> + Send;
}

/// Tag writer backed by the `ffmpeg` binary
#[derive(Debug, Clone)]
pub struct FfmpegTagWriter {
    ffmpeg_path: PathBuf,
}

impl FfmpegTagWriter {
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
        }
    }

    /// Build the FFmpeg argument list for a commit
    fn build_args(
        commit: &TagCommit<'_>,
        ffmetadata: &Path,
        pictures: &[TempPath],
    ) -> Vec<String> {
        let mut cmd = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            commit.audio.to_string_lossy().to_string(),
            "-i".to_string(),
            ffmetadata.to_string_lossy().to_string(),
        ];

        for picture in pictures {
            cmd.push("-i".to_string());
            cmd.push(picture.to_string_lossy().to_string());
        }

        cmd.push("-map".to_string());
        cmd.push("0:a".to_string());
        for index in 0..pictures.len() {
            cmd.push("-map".to_string());
            cmd.push(format!("{}:v", index + 2));
        }

        cmd.push("-map_metadata".to_string());
        cmd.push("1".to_string());
        cmd.push("-map_chapters".to_string());
        cmd.push(if commit.chapter_format.any() { "1" } else { "-1" }.to_string());

        cmd.push("-codec".to_string());
        cmd.push("copy".to_string());
        for index in 0..pictures.len() {
            cmd.push(format!("-disposition:v:{}", index));
            cmd.push("attached_pic".to_string());
        }

        if let Some(language) = commit.metadata.tags.iso_language() {
            cmd.push("-metadata:s:a:0".to_string());
            cmd.push(format!("language={}", language));
        }

        if !commit.chapter_format.nero {
            cmd.push("-movflags".to_string());
            cmd.push("+disable_chpl".to_string());
        }

        cmd.push("-f".to_string());
        cmd.push("ipod".to_string());
        cmd.push(commit.output.to_string_lossy().to_string());

        cmd
    }

    /// Create a scratch file holding `contents`, removed when dropped
    async fn scratch_file(dir: &Path, suffix: &str, contents: &[u8]) -> Result<TempPath> {
        let path = tempfile::Builder::new()
            .prefix("m4b-merge-")
            .suffix(suffix)
            .tempfile_in(dir)
            .map_err(|e| {
                MergeError::TagWriteFailure(format!("create: {} - {}", dir.display(), e))
            })?
            .into_temp_path();

        fs::write(&path, contents).await.map_err(|e| {
            MergeError::TagWriteFailure(format!("write: {} - {}", path.display(), e))
        })?;

        Ok(path)
    }

    /// Execute FFmpeg command and handle errors
    async fn execute_ffmpeg(&self, args: &[String]) -> Result<()> {
        let output = Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    MergeError::FfmpegNotFound
                } else {
                    MergeError::TagWriteFailure(format!("Failed to execute ffmpeg: {}", e))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MergeError::TagWriteFailure(format!(
                "FFmpeg failed: {}",
                stderr
            )));
        }

        Ok(())
    }
}

impl TagWriter for FfmpegTagWriter {
    async fn write_tags(&self, commit: TagCommit<'_>) -> Result<()> {
        let metadata = commit.metadata;
        let chapters = if commit.chapter_format.any() {
            metadata.chapters.as_slice()
        } else {
            &[]
        };

        let ffmetadata = Self::scratch_file(
            commit.scratch_dir,
            ".ffmetadata.txt",
            generate_ffmetadata(&metadata.tags, chapters).as_bytes(),
        )
        .await?;

        let mut pictures = Vec::with_capacity(metadata.pictures.len());
        for picture in &metadata.pictures {
            let suffix = format!(".{}", picture.extension());
            pictures.push(Self::scratch_file(commit.scratch_dir, &suffix, &picture.data).await?);
        }

        let args = Self::build_args(&commit, &ffmetadata, &pictures);
        tracing::debug!(
            output = %commit.output.display(),
            chapters = chapters.len(),
            duration_ms = metadata.total_duration_ms(),
            pictures = pictures.len(),
            "writing tags"
        );
        self.execute_ffmpeg(&args).await?;

        let written = fs::metadata(commit.output).await.map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(MergeError::TagWriteFailure(
                "Tagged container was not created".to_string(),
            ));
        }

        Ok(())
    }
}
