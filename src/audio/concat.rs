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


//! Frame-level MP3 concatenation
//!
//! Source files are listed in case-insensitive filename order; that order is
//! the only track sequencing (embedded track numbers are ignored). The
//! intermediate stream is built as:
//! 1. the first file's leading ID3v2 tag, byte for byte (if present)
//! 2. every audio frame of every file, in order, byte for byte
//!
//! Nothing is decoded. Tags of later files, ID3v1/APE trailers, junk bytes
//! and VBR info frames are dropped.

use crate::audio::mpeg::{id3v2_tag_len, FrameReader};
use crate::error::{MergeError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Statistics of one concatenation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConcatStats {
    /// Source files consumed
    pub files: usize,
    /// Audio frames written
    pub frames: usize,
    /// Bytes of the leading ID3v2 tag copied from the first file
    pub header_bytes: usize,
    /// Total bytes written to the intermediate stream
    pub bytes_written: u64,
    /// Playing time of the written frames
    pub duration: Duration,
}

/// List files with `extension` in `folder`, ordered case-insensitively by name
///
/// A missing folder or one without matching files is `NoInputFiles`.
pub async fn list_source_files(folder: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let no_input = || MergeError::NoInputFiles {
        folder: folder.to_path_buf(),
    };

    if !fs::metadata(folder).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Err(no_input());
    }

    let mut entries = fs::read_dir(folder).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && has_extension(&path, extension) {
            files.push(path);
        }
    }

    if files.is_empty() {
        return Err(no_input());
    }

    files.sort_by_cached_key(|p| {
        let name = p
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        (name.to_lowercase(), name)
    });
    Ok(files)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension.trim_start_matches('.')))
        .unwrap_or(false)
}

/// Concatenate the frames of `sources` into a new file at `output`
pub async fn concatenate(sources: &[PathBuf], output: &Path) -> Result<ConcatStats> {
    let file = fs::File::create(output).await.map_err(|e| {
        MergeError::ConcatenationFailure(format!("create: {} - {}", output.display(), e))
    })?;
    let mut writer = BufWriter::new(file);
    let mut stats = ConcatStats::default();

    for (index, source) in sources.iter().enumerate() {
        let data = fs::read(source).await.map_err(|e| {
            MergeError::ConcatenationFailure(format!("read: {} - {}", source.display(), e))
        })?;

        if index == 0 {
            if let Some(tag_len) = id3v2_tag_len(&data) {
                let tag_len = tag_len.min(data.len());
                write_chunk(&mut writer, &data[..tag_len], output).await?;
                stats.header_bytes = tag_len;
                stats.bytes_written += tag_len as u64;
            }
        }

        let mut frames = 0usize;
        let mut reader = FrameReader::new(&data);
        for frame in reader.by_ref() {
            if frame.is_vbr_info() {
                continue;
            }
            write_chunk(&mut writer, frame.data, output).await?;
            stats.bytes_written += frame.data.len() as u64;
            stats.duration += Duration::from_nanos(
                u64::from(frame.header.samples_per_frame()) * 1_000_000_000
                    / u64::from(frame.header.sample_rate),
            );
            frames += 1;
        }

        tracing::debug!(
            path = %source.display(),
            frames,
            skipped = reader.skipped_bytes(),
            "appended source frames"
        );
        stats.frames += frames;
        stats.files += 1;
    }

    writer.flush().await.map_err(|e| {
        MergeError::ConcatenationFailure(format!("flush: {} - {}", output.display(), e))
    })?;
    writer.get_ref().sync_all().await.map_err(|e| {
        MergeError::ConcatenationFailure(format!("sync: {} - {}", output.display(), e))
    })?;

    Ok(stats)
}

async fn write_chunk(writer: &mut BufWriter<fs::File>, chunk: &[u8], output: &Path) -> Result<()> {
    writer.write_all(chunk).await.map_err(|e| {
        MergeError::ConcatenationFailure(format!("write: {} - {}", output.display(), e))
    })
}
