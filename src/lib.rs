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


//! Merge a folder of MP3 audiobook tracks into one chaptered, tagged M4B
//!
//! The source tracks are concatenated frame by frame, transcoded to AAC once,
//! and written into an MPEG-4 audiobook container with one chapter per track
//! and the first track's tags.
//!
//! ```no_run
//! use m4b_merge::{merge, MergeConfig, MergeRequest};
//!
//! # async fn run() -> m4b_merge::Result<()> {
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! tokio::spawn(async move {
//!     while let Some(stage) = rx.recv().await {
//!         println!("{stage}");
//!     }
//! });
//! let request = MergeRequest::new("/books/dune", "/books/dune.m4b", false);
//! merge(&request, MergeConfig::default(), &tx).await?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod merge;

pub use config::MergeConfig;
pub use error::{MergeError, Result};
pub use merge::{
    ensure_m4b_extension, merge, CloseDecision, MergeHandle, MergePipeline, MergeRequest,
    MergeRunner, MergeStage, MergeState, ProgressSender,
};
