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


//! Error types for m4b-merge
//!
//! Every stage of the merge pipeline reports through [`MergeError`]. The
//! orchestrator collapses stage-local failures into one of the taxonomy
//! variants before handing the outcome back to the caller:
//!
//! - `NoInputFiles` - source folder missing or without matching tracks
//! - `ConcatenationFailure` - I/O while building the intermediate MP3 stream
//! - `EncodingFailure` - the encoder rejected the input or produced no output
//! - `TagWriteFailure` - the destination container could not be tagged
//! - `Unexpected` - anything else caught at the pipeline boundary

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our MergeError type
pub type Result<T> = std::result::Result<T, MergeError>;

/// Main error type for m4b-merge
#[derive(Error, Debug)]
pub enum MergeError {
    // ===== Pipeline taxonomy =====

    /// Source folder does not exist or holds no file with the source extension
    #[error("No input files in {}", folder.display())]
    NoInputFiles { folder: PathBuf },

    /// Building the intermediate concatenated stream failed
    #[error("Concatenation failed: {0}")]
    ConcatenationFailure(String),

    /// External encoder rejected the input or produced no output
    #[error("Encoding failed: {0}")]
    EncodingFailure(String),

    /// Destination container could not be tagged
    #[error("Tag writing failed: {0}")]
    TagWriteFailure(String),

    /// Anything else caught at the pipeline boundary
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    // ===== Supporting errors =====

    /// A source track could not be parsed for tags or audio properties
    #[error("Cannot read source track {}: {message}", path.display())]
    SourceReadFailure { path: PathBuf, message: String },

    /// FFmpeg binary not found in PATH
    #[error("FFmpeg not found. Please install FFmpeg and ensure it's in your PATH.")]
    FfmpegNotFound,

    /// Destination directory is missing or not writable
    #[error("Cannot write destination {}: {message}", path.display())]
    InvalidDestination { path: PathBuf, message: String },

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A merge is already running on this runner
    #[error("A merge is already in progress")]
    Busy,

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio::task::JoinError> for MergeError {
    fn from(err: tokio::task::JoinError) -> Self {
        MergeError::Unexpected(format!("worker task failed: {}", err))
    }
}

impl From<tempfile::PathPersistError> for MergeError {
    fn from(err: tempfile::PathPersistError) -> Self {
        MergeError::Io(err.error)
    }
}

// Helper methods for creating common errors
impl MergeError {
    /// Create a SourceReadFailure for a track path
    pub fn source_read<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        MergeError::SourceReadFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Short, stable category name used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            MergeError::NoInputFiles { .. } => "no_input_files",
            MergeError::ConcatenationFailure(_) => "concatenation",
            MergeError::EncodingFailure(_) => "encoding",
            MergeError::TagWriteFailure(_) => "tag_write",
            MergeError::Unexpected(_) => "unexpected",
            MergeError::SourceReadFailure { .. } => "source_read",
            MergeError::InvalidDestination { .. } => "destination",
            MergeError::FfmpegNotFound => "ffmpeg_not_found",
            MergeError::InvalidConfiguration(_) => "configuration",
            MergeError::Busy => "busy",
            MergeError::Io(_) => "io",
        }
    }

    /// Whether this error is one of the terminal pipeline outcomes
    pub fn is_pipeline_failure(&self) -> bool {
        matches!(
            self,
            MergeError::NoInputFiles { .. }
                | MergeError::ConcatenationFailure(_)
                | MergeError::EncodingFailure(_)
                | MergeError::TagWriteFailure(_)
                | MergeError::Unexpected(_)
        )
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            MergeError::NoInputFiles { folder } => {
                format!("The folder '{}' contains no MP3 files to merge.", folder.display())
            }
            MergeError::FfmpegNotFound => {
                "FFmpeg is required but not found. Please install FFmpeg and ensure it's in your PATH.".to_string()
            }
            MergeError::Busy => {
                "A book is already being created. Wait for it to finish.".to_string()
            }
            MergeError::SourceReadFailure { path, .. } => {
                format!("Could not read '{}'. The file may be damaged.", path.display())
            }
            MergeError::InvalidDestination { path, .. } => {
                format!("Cannot save '{}'. Check that the folder exists and is writable.", path.display())
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_input_message_names_folder() {
        let err = MergeError::NoInputFiles {
            folder: PathBuf::from("/books/empty"),
        };
        assert!(err.to_string().contains("/books/empty"));
        assert_eq!(err.kind(), "no_input_files");
        assert!(err.is_pipeline_failure());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: MergeError = io.into();
        assert!(matches!(err, MergeError::Io(_)));
        assert!(!err.is_pipeline_failure());
    }

    #[test]
    fn test_user_message_falls_back_to_display() {
        let err = MergeError::EncodingFailure("exit status 1".to_string());
        assert_eq!(err.user_message(), "Encoding failed: exit status 1");
    }
}
