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


//! AAC encoding of the concatenated stream
//!
//! The encoder is an external capability: the pipeline hands it the
//! intermediate MP3, an output path and a bitrate, and expects a finished
//! file or an error. [`FfmpegEncoder`] drives the `ffmpeg` binary:
//!
//! `ffmpeg -i merged.mp3 -map 0:a:0 -vn -c:a aac -b:a 128000 -ar 44100 -ac 2 out.m4a`
//!
//! Progress is read from `-progress pipe:1` (`out_time=HH:MM:SS.ffffff`).

use crate::config::MergeConfig;
use crate::error::{MergeError, Result};
use serde::Deserialize;
use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Lines of encoder stderr kept for error reports
const STDERR_TAIL_LINES: usize = 20;

/// One transcode of the intermediate stream
#[derive(Debug, Clone, Copy)]
pub struct EncodeRequest<'a> {
    /// Concatenated MP3 stream
    pub input: &'a Path,
    /// Output path, with the encoder's native extension
    pub output: &'a Path,
    /// Target bitrate in bits/sec
    pub bitrate: u32,
    /// Expected stream duration, used only for progress reporting
    pub duration: Duration,
}

/// Transcoder from the concatenated MP3 stream to AAC
pub trait Encoder: Send + Sync {
    /// Extension of the files this encoder writes (without the dot)
    fn output_extension(&self) -> &'static str {
        "m4a"
    }

    /// Bitrates (bits/sec) supported at the given output format.
    /// An empty list means the encoder does not advertise any.
    fn supported_bitrates(&self, sample_rate: u32, channels: u32) -> Vec<u32>;

    /// Transcode `request.input` into `request.output`
    fn encode(&self, request: EncodeRequest<'_>) -> impl Future<Output = Result<()>> + Send;
}

/// AAC encoder backed by the `ffmpeg` binary
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    sample_rate: u32,
    channels: u32,
    advertised_bitrates: Vec<u32>,
}

impl FfmpegEncoder {
    pub fn new(config: &MergeConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
            advertised_bitrates: config.supported_bitrates.clone(),
        }
    }

    /// Build the FFmpeg argument list for a transcode
    fn build_args(&self, request: &EncodeRequest<'_>) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            request.input.to_string_lossy().to_string(),
            "-map".to_string(),
            "0:a:0".to_string(),
            "-vn".to_string(),
            // Tags and chapters are written in a later step
            "-map_metadata".to_string(),
            "-1".to_string(),
            "-map_chapters".to_string(),
            "-1".to_string(),
            "-codec:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            request.bitrate.to_string(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-ac".to_string(),
            self.channels.to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-nostats".to_string(),
            request.output.to_string_lossy().to_string(),
        ]
    }

    async fn run_ffmpeg(&self, args: &[String], total: Duration) -> Result<()> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    MergeError::FfmpegNotFound
                } else {
                    MergeError::EncodingFailure(format!("Failed to execute ffmpeg: {}", e))
                }
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            MergeError::EncodingFailure("Failed to capture ffmpeg stdout".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            MergeError::EncodingFailure("Failed to capture ffmpeg stderr".to_string())
        })?;

        // Keep the tail of stderr for error reports
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut last_reported = 0.0f32;
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(progress) = parse_progress_line(&line, total) {
                // Log every 10%
                if progress - last_reported >= 0.1 || progress >= 1.0 {
                    last_reported = progress;
                    tracing::trace!(percent = (progress * 100.0) as u32, "transcoding");
                }
            }
        }

        let status = child.wait().await.map_err(|e| {
            MergeError::EncodingFailure(format!("FFmpeg process failed: {}", e))
        })?;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(MergeError::EncodingFailure(format!(
                "FFmpeg exited with status: {}\n{}",
                status, stderr_tail
            )));
        }

        Ok(())
    }

    /// Confirm the encoder produced an audio stream with a positive duration
    async fn verify_output(&self, output: &Path) -> Result<()> {
        let size = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(MergeError::EncodingFailure(
                "Output file was not created".to_string(),
            ));
        }

        let probe = Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(output.as_os_str())
            .output()
            .await;

        let probe = match probe {
            Ok(out) => out,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("ffprobe not found, skipping encoder output verification");
                return Ok(());
            }
            Err(e) => {
                return Err(MergeError::EncodingFailure(format!(
                    "Failed to execute ffprobe: {}",
                    e
                )))
            }
        };

        if !probe.status.success() {
            return Err(MergeError::EncodingFailure(
                "FFprobe rejected encoder output".to_string(),
            ));
        }

        let duration = parse_probe_duration(&String::from_utf8_lossy(&probe.stdout))?;
        if duration <= 0.0 {
            return Err(MergeError::EncodingFailure(
                "Encoder output has no audio".to_string(),
            ));
        }
        Ok(())
    }
}

impl Encoder for FfmpegEncoder {
    fn supported_bitrates(&self, _sample_rate: u32, _channels: u32) -> Vec<u32> {
        // FFmpeg's AAC encoder takes any bitrate; the set comes from configuration
        self.advertised_bitrates.clone()
    }

    async fn encode(&self, request: EncodeRequest<'_>) -> Result<()> {
        let args = self.build_args(&request);
        tracing::debug!(
            input = %request.input.display(),
            output = %request.output.display(),
            bitrate = request.bitrate,
            "starting ffmpeg transcode"
        );
        self.run_ffmpeg(&args, request.duration).await?;
        self.verify_output(request.output).await
    }
}

/// Parse an `-progress` line into a completion fraction
///
/// FFmpeg outputs: "out_time=00:01:23.450000"
pub fn parse_progress_line(line: &str, total: Duration) -> Option<f32> {
    let timestamp = line.strip_prefix("out_time=")?;
    let elapsed = parse_timestamp(timestamp.trim())?;
    let total = total.as_secs_f64();
    if total > 0.0 {
        Some((elapsed / total).clamp(0.0, 1.0) as f32)
    } else {
        None
    }
}

/// Parse timestamp in format HH:MM:SS.ss to seconds
fn parse_timestamp(timestamp: &str) -> Option<f64> {
    let parts: Vec<&str> = timestamp.split(':').collect();
    if parts.len() == 3 {
        let hours: f64 = parts[0].parse().ok()?;
        let minutes: f64 = parts[1].parse().ok()?;
        let seconds: f64 = parts[2].parse().ok()?;
        Some(hours * 3600.0 + minutes * 60.0 + seconds)
    } else {
        None
    }
}

/// FFprobe JSON output structures
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
}

/// Duration in seconds of the audio in an ffprobe JSON report (0 without audio)
fn parse_probe_duration(json: &str) -> Result<f64> {
    let probe: FfprobeOutput = serde_json::from_str(json).map_err(|e| {
        MergeError::EncodingFailure(format!("Failed to parse FFprobe output: {}", e))
    })?;

    if !probe.streams.iter().any(|s| s.codec_type == "audio") {
        return Ok(0.0);
    }

    Ok(probe
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("00:00:30.50"), Some(30.5));
        assert_eq!(parse_timestamp("00:01:23.45"), Some(83.45));
        assert_eq!(parse_timestamp("01:30:00.00"), Some(5400.0));
        assert_eq!(parse_timestamp("N/A"), None);
    }

    #[test]
    fn test_parse_progress_line() {
        let total = Duration::from_secs(600);
        let p = parse_progress_line("out_time=00:01:23.450000", total).unwrap();
        assert!((p - 0.1391).abs() < 0.01); // ~83.45 / 600 = 0.139
        assert_eq!(parse_progress_line("out_time=00:20:00.000000", total), Some(1.0));
        assert_eq!(parse_progress_line("bitrate= 128.0kbits/s", total), None);
        assert_eq!(parse_progress_line("out_time=00:00:01.000000", Duration::ZERO), None);
    }

    #[test]
    fn test_build_args() {
        let config = MergeConfig {
            sample_rate: 22_050,
            channels: 1,
            ..MergeConfig::default()
        };
        let encoder = FfmpegEncoder::new(&config);
        let args = encoder.build_args(&EncodeRequest {
            input: Path::new("/tmp/in.mp3"),
            output: Path::new("/tmp/out.m4a"),
            bitrate: 128_000,
            duration: Duration::from_secs(1),
        });

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-i") + 1], "/tmp/in.mp3");
        assert_eq!(args[pos("-codec:a") + 1], "aac");
        assert_eq!(args[pos("-b:a") + 1], "128000");
        assert_eq!(args[pos("-ar") + 1], "22050");
        assert_eq!(args[pos("-ac") + 1], "1");
        assert_eq!(args.last().unwrap(), "/tmp/out.m4a");
    }

    #[test]
    fn test_supported_bitrates_from_config() {
        let encoder = FfmpegEncoder::new(&MergeConfig::default());
        assert!(encoder.supported_bitrates(44_100, 2).is_empty());
        assert_eq!(encoder.output_extension(), "m4a");

        let config = MergeConfig {
            supported_bitrates: vec![64_000, 96_000],
            ..MergeConfig::default()
        };
        assert_eq!(
            FfmpegEncoder::new(&config).supported_bitrates(44_100, 2),
            vec![64_000, 96_000]
        );
    }

    #[test]
    fn test_parse_probe_duration() {
        let json = r#"{"streams":[{"codec_type":"audio"}],"format":{"duration":"45.000000"}}"#;
        assert_eq!(parse_probe_duration(json).unwrap(), 45.0);

        let silent = r#"{"streams":[{"codec_type":"video"}],"format":{"duration":"45.0"}}"#;
        assert_eq!(parse_probe_duration(silent).unwrap(), 0.0);

        assert!(parse_probe_duration("not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let config = MergeConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg-binary"),
            ..MergeConfig::default()
        };
        let encoder = FfmpegEncoder::new(&config);
        let result = encoder
            .encode(EncodeRequest {
                input: Path::new("/tmp/in.mp3"),
                output: Path::new("/tmp/out.m4a"),
                bitrate: 128_000,
                duration: Duration::from_secs(1),
            })
            .await;
        assert!(matches!(result, Err(MergeError::FfmpegNotFound)));
    }
}
