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


//! Merge pipeline orchestration
//!
//! # States
//! `Idle → CollectingMetadata → Concatenating → Transcoding → WritingTags → Done`,
//! with `Failed` reachable from every state after `Idle`.
//!
//! - Idle: validate the request; the folder must hold at least one source file
//!   and the destination directory must accept the staging file
//! - CollectingMetadata: read every source track
//! - Concatenating: frame-exact MP3 concatenation into intermediate file A
//! - Transcoding: pick the bitrate, encode A into intermediate file B
//! - WritingTags: tag B into the staging file, give it the replaced file's
//!   permissions (or a plain new file's), then rename it over the destination
//!
//! Each stage entry is reported once on the progress channel, in order.
//! Intermediate files are `TempPath` guards, so they are deleted on every
//! exit path. No stage is retried.

use crate::audio::bitrate::{kbps_to_bps, select_bitrate};
use crate::audio::concat::{concatenate, list_source_files};
use crate::audio::encoder::{EncodeRequest, Encoder, FfmpegEncoder};
use crate::audio::metadata::synthesize;
use crate::audio::source::SourceTrack;
use crate::audio::tagger::{FfmpegTagWriter, TagCommit, TagWriter};
use crate::config::MergeConfig;
use crate::error::{MergeError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempPath;
use tokio::sync::mpsc;

/// Extension of the destination container
pub const DESTINATION_EXTENSION: &str = "m4b";

/// Caller-supplied merge parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    /// Folder holding the book's MP3 tracks
    pub source_folder: PathBuf,
    /// Path of the M4B to create (replaced if it exists)
    pub destination: PathBuf,
    /// Take pictures from every track instead of the first only
    pub include_all_images: bool,
}

impl MergeRequest {
    pub fn new<S: Into<PathBuf>, D: Into<PathBuf>>(
        source_folder: S,
        destination: D,
        include_all_images: bool,
    ) -> Self {
        Self {
            source_folder: source_folder.into(),
            destination: destination.into(),
            include_all_images,
        }
    }
}

/// Append `.m4b` unless the path already ends with it (any case)
pub fn ensure_m4b_extension(path: &Path) -> PathBuf {
    let has_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(DESTINATION_EXTENSION))
        .unwrap_or(false);

    if has_extension {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_os_string();
        name.push(".");
        name.push(DESTINATION_EXTENSION);
        PathBuf::from(name)
    }
}

/// Working stages reported to the progress sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeStage {
    CollectingMetadata,
    Concatenating,
    Transcoding,
    WritingTags,
}

impl MergeStage {
    /// Human-readable status message for this stage
    pub fn message(&self) -> &'static str {
        match self {
            Self::CollectingMetadata => "collecting data",
            Self::Concatenating => "merging files",
            Self::Transcoding => "transcoding",
            Self::WritingTags => "writing tag",
        }
    }
}

impl fmt::Display for MergeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// State of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Idle,
    CollectingMetadata,
    Concatenating,
    Transcoding,
    WritingTags,
    Done,
    Failed,
}

impl From<MergeStage> for MergeState {
    fn from(stage: MergeStage) -> Self {
        match stage {
            MergeStage::CollectingMetadata => Self::CollectingMetadata,
            MergeStage::Concatenating => Self::Concatenating,
            MergeStage::Transcoding => Self::Transcoding,
            MergeStage::WritingTags => Self::WritingTags,
        }
    }
}

/// Ordered channel of stage messages
pub type ProgressSender = mpsc::UnboundedSender<MergeStage>;

/// Convert an error raised while in `state` into a pipeline outcome
///
/// Errors that already name what went wrong are kept; bare I/O and other
/// errors take the failing stage's taxonomy variant.
fn classify(state: MergeState, err: MergeError) -> MergeError {
    if err.is_pipeline_failure()
        || matches!(
            err,
            MergeError::SourceReadFailure { .. }
                | MergeError::InvalidDestination { .. }
                | MergeError::FfmpegNotFound
                | MergeError::InvalidConfiguration(_)
        )
    {
        return err;
    }

    match state {
        MergeState::Concatenating => MergeError::ConcatenationFailure(err.to_string()),
        MergeState::Transcoding => MergeError::EncodingFailure(err.to_string()),
        MergeState::WritingTags => MergeError::TagWriteFailure(err.to_string()),
        _ => MergeError::Unexpected(err.to_string()),
    }
}

/// The merge pipeline with its encoder and tag writer
pub struct MergePipeline<E, W> {
    config: MergeConfig,
    encoder: E,
    tag_writer: W,
}

impl MergePipeline<FfmpegEncoder, FfmpegTagWriter> {
    /// Pipeline using FFmpeg for transcoding and tag writing
    pub fn with_ffmpeg(config: MergeConfig) -> Self {
        let encoder = FfmpegEncoder::new(&config);
        let tag_writer = FfmpegTagWriter::new(&config);
        Self::new(config, encoder, tag_writer)
    }
}

impl<E: Encoder, W: TagWriter> MergePipeline<E, W> {
    pub fn new(config: MergeConfig, encoder: E, tag_writer: W) -> Self {
        Self {
            config,
            encoder,
            tag_writer,
        }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Run the pipeline to completion
    ///
    /// Returns the destination path on success. Every failure is returned as
    /// a `MergeError` after intermediate files have been removed.
    pub async fn run(&self, request: &MergeRequest, progress: &ProgressSender) -> Result<PathBuf> {
        let mut state = MergeState::Idle;
        match self.run_stages(request, progress, &mut state).await {
            Ok(destination) => {
                tracing::info!(destination = %destination.display(), "merge done");
                Ok(destination)
            }
            Err(err) => {
                let err = classify(state, err);
                tracing::error!(
                    failed_in = ?state,
                    error.kind = err.kind(),
                    error = %err,
                    "merge failed"
                );
                Err(err)
            }
        }
    }

    fn enter(&self, state: &mut MergeState, stage: MergeStage, progress: &ProgressSender) {
        *state = stage.into();
        tracing::info!(stage = %stage, "entering stage");
        // A dropped receiver only means nobody is listening
        let _ = progress.send(stage);
    }

    fn intermediate(&self, suffix: &str) -> Result<TempPath> {
        let file = tempfile::Builder::new()
            .prefix("m4b-merge-")
            .suffix(suffix)
            .tempfile_in(self.config.work_dir())?;
        Ok(file.into_temp_path())
    }

    async fn run_stages(
        &self,
        request: &MergeRequest,
        progress: &ProgressSender,
        state: &mut MergeState,
    ) -> Result<PathBuf> {
        self.config.validate()?;
        let sources =
            list_source_files(&request.source_folder, self.config.source_extension()).await?;
        tracing::info!(
            folder = %request.source_folder.display(),
            files = sources.len(),
            "merge requested"
        );

        // Claim the destination slot before any expensive work
        let staged = staging_file(&request.destination).map_err(|e| {
            MergeError::InvalidDestination {
                path: request.destination.clone(),
                message: e.to_string(),
            }
        })?;
        let permissions = output_permissions(&request.destination, &staged).await?;

        self.enter(state, MergeStage::CollectingMetadata, progress);
        let mut tracks = Vec::with_capacity(sources.len());
        for (ordinal, path) in sources.iter().enumerate() {
            let track = SourceTrack::read_async(path.clone(), ordinal).await?;
            tracing::debug!(
                path = %path.display(),
                duration_ms = track.duration_ms(),
                bitrate_kbps = track.bitrate_kbps,
                pictures = track.pictures.len(),
                "read source track"
            );
            tracks.push(track);
        }

        self.enter(state, MergeStage::Concatenating, progress);
        let merged = self.intermediate(&format!(".{}", self.config.source_extension()))?;
        let stats = concatenate(&sources, &merged).await?;
        tracing::debug!(
            frames = stats.frames,
            bytes = stats.bytes_written,
            stream_ms = stats.duration.as_millis() as u64,
            "concatenated"
        );

        self.enter(state, MergeStage::Transcoding, progress);
        let supported = self
            .encoder
            .supported_bitrates(self.config.sample_rate, self.config.channels);
        let source_bitrate = kbps_to_bps(tracks.iter().map(|t| t.bitrate_kbps).max().unwrap_or(0));
        let bitrate = select_bitrate(&supported, source_bitrate);
        tracing::info!(source_bitrate, bitrate, "selected output bitrate");

        let encoded = self.intermediate(&format!(".{}", self.encoder.output_extension()))?;
        let duration: Duration = tracks.iter().map(|t| t.duration).sum();
        self.encoder
            .encode(EncodeRequest {
                input: &merged,
                output: &encoded,
                bitrate,
                duration,
            })
            .await?;

        self.enter(state, MergeStage::WritingTags, progress);
        let metadata = synthesize(&tracks, request.include_all_images);
        self.tag_writer
            .write_tags(TagCommit {
                audio: &encoded,
                output: &staged,
                metadata: &metadata,
                chapter_format: self.config.chapter_format,
                scratch_dir: &self.config.work_dir(),
            })
            .await?;
        tokio::fs::set_permissions(&*staged, permissions).await?;
        staged.persist(&request.destination)?;

        *state = MergeState::Done;
        Ok(request.destination.clone())
    }
}

/// Staging file in the destination's directory, so the final rename
/// stays on one filesystem
fn staging_file(destination: &Path) -> std::io::Result<TempPath> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let suffix = format!(".{}", DESTINATION_EXTENSION);
    let mut builder = tempfile::Builder::new();
    builder.prefix(".m4b-merge-").suffix(&suffix);
    // Same mode as a plain create; the umask still applies
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    Ok(builder.tempfile_in(&dir)?.into_temp_path())
}

/// Permissions the finished file gets: those of the file it replaces, or
/// those of a freshly created file
async fn output_permissions(destination: &Path, staged: &Path) -> Result<std::fs::Permissions> {
    match tokio::fs::metadata(destination).await {
        Ok(existing) if existing.is_file() => Ok(existing.permissions()),
        _ => Ok(tokio::fs::metadata(staged).await?.permissions()),
    }
}

/// Merge a folder into an M4B with the FFmpeg pipeline
pub async fn merge(
    request: &MergeRequest,
    config: MergeConfig,
    progress: &ProgressSender,
) -> Result<PathBuf> {
    MergePipeline::with_ffmpeg(config).run(request, progress).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_m4b_extension() {
        assert_eq!(ensure_m4b_extension(Path::new("/out/book")), PathBuf::from("/out/book.m4b"));
        assert_eq!(ensure_m4b_extension(Path::new("/out/book.M4B")), PathBuf::from("/out/book.M4B"));
        assert_eq!(
            ensure_m4b_extension(Path::new("/out/book.mp3")),
            PathBuf::from("/out/book.mp3.m4b")
        );
    }

    #[test]
    fn test_stage_messages() {
        assert_eq!(MergeStage::CollectingMetadata.to_string(), "collecting data");
        assert_eq!(MergeStage::Concatenating.to_string(), "merging files");
        assert_eq!(MergeStage::Transcoding.to_string(), "transcoding");
        assert_eq!(MergeStage::WritingTags.to_string(), "writing tag");
        assert_eq!(MergeState::from(MergeStage::Transcoding), MergeState::Transcoding);
    }

    #[test]
    fn test_classify_wraps_io_by_stage() {
        let io = || MergeError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(matches!(
            classify(MergeState::Concatenating, io()),
            MergeError::ConcatenationFailure(_)
        ));
        assert!(matches!(
            classify(MergeState::Transcoding, io()),
            MergeError::EncodingFailure(_)
        ));
        assert!(matches!(
            classify(MergeState::WritingTags, io()),
            MergeError::TagWriteFailure(_)
        ));
        assert!(matches!(
            classify(MergeState::CollectingMetadata, io()),
            MergeError::Unexpected(_)
        ));
    }

    #[test]
    fn test_classify_keeps_specific_errors() {
        let err = classify(
            MergeState::Transcoding,
            MergeError::TagWriteFailure("x".to_string()),
        );
        assert!(matches!(err, MergeError::TagWriteFailure(_)));
        assert!(matches!(
            classify(MergeState::Transcoding, MergeError::FfmpegNotFound),
            MergeError::FfmpegNotFound
        ));
        assert!(matches!(
            classify(MergeState::Idle, MergeError::NoInputFiles { folder: PathBuf::from("x") }),
            MergeError::NoInputFiles { .. }
        ));
    }

    #[test]
    fn test_classify_keeps_invalid_destination() {
        let err = classify(
            MergeState::Idle,
            MergeError::InvalidDestination {
                path: PathBuf::from("/missing/book.m4b"),
                message: "not found".to_string(),
            },
        );
        assert!(matches!(err, MergeError::InvalidDestination { .. }));
    }

    #[test]
    fn test_staging_file_needs_existing_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(staging_file(&dir.path().join("missing").join("book.m4b")).is_err());

        let staged = staging_file(&dir.path().join("book.m4b")).unwrap();
        assert_eq!(staged.parent(), Some(dir.path()));
        assert!(staged.to_string_lossy().ends_with(".m4b"));
    }

    #[cfg(unix)]
    #[test]
    fn test_staging_file_has_plain_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let plain = dir.path().join("plain");
        std::fs::write(&plain, b"x").unwrap();
        let staged = staging_file(&dir.path().join("book.m4b")).unwrap();

        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&*staged), mode(&plain));
    }

    #[tokio::test]
    async fn test_output_permissions_follow_replaced_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let destination = dir.path().join("book.m4b");
        std::fs::write(&destination, b"old").unwrap();
        let mut readonly = std::fs::metadata(&destination).unwrap().permissions();
        readonly.set_readonly(true);
        std::fs::set_permissions(&destination, readonly).unwrap();

        let staged = staging_file(&destination).unwrap();
        let permissions = output_permissions(&destination, &staged).await.unwrap();
        assert!(permissions.readonly());

        let fresh = dir.path().join("other.m4b");
        let permissions = output_permissions(&fresh, &staged).await.unwrap();
        assert!(!permissions.readonly());
    }
}
