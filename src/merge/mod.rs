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


//! Merge orchestration
//!
//! ## pipeline
//! The stage machine driving one folder to one M4B
//!
//! ## runner
//! One-at-a-time background execution with a close guard

pub mod pipeline;
pub mod runner;

pub use pipeline::{
    ensure_m4b_extension, merge, MergePipeline, MergeRequest, MergeStage, MergeState,
    ProgressSender,
};
pub use runner::{CloseDecision, MergeHandle, MergeRunner};
