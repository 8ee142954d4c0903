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


//! Background execution of the merge pipeline
//!
//! At most one merge runs per runner. The caller gets a `MergeHandle` to
//! receive stage messages and await the outcome, and asks `request_close`
//! before shutting down.

use super::pipeline::{MergePipeline, MergeRequest, MergeStage};
use crate::audio::encoder::Encoder;
use crate::audio::tagger::TagWriter;
use crate::error::{MergeError, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Answer to a shutdown request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    /// Nothing is running
    Granted,
    /// A merge is running; shut down after it finishes
    Deferred,
}

/// Clears the busy flag when the merge task ends, however it ends
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to a running merge
pub struct MergeHandle {
    progress: mpsc::UnboundedReceiver<MergeStage>,
    task: JoinHandle<Result<PathBuf>>,
}

impl MergeHandle {
    /// Next stage message, or `None` once the merge task has finished
    pub async fn next_progress(&mut self) -> Option<MergeStage> {
        self.progress.recv().await
    }

    /// Wait for the outcome
    pub async fn wait(self) -> Result<PathBuf> {
        self.task.await?
    }
}

/// Runs merges on the tokio runtime, one at a time
pub struct MergeRunner<E, W> {
    pipeline: Arc<MergePipeline<E, W>>,
    busy: Arc<AtomicBool>,
}

impl<E, W> MergeRunner<E, W>
where
    E: Encoder + 'static,
    W: TagWriter + 'static,
{
    pub fn new(pipeline: MergePipeline<E, W>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a merge is currently running
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start a merge in the background
    ///
    /// Fails with `MergeError::Busy` while another merge is running.
    pub fn start(&self, request: MergeRequest) -> Result<MergeHandle> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(folder = %request.source_folder.display(), "merge rejected, runner busy");
            return Err(MergeError::Busy);
        }

        let guard = BusyGuard(Arc::clone(&self.busy));
        let pipeline = Arc::clone(&self.pipeline);
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let _guard = guard;
            pipeline.run(&request, &tx).await
        });

        Ok(MergeHandle { progress: rx, task })
    }

    /// Ask whether the host may shut down now
    pub fn request_close(&self) -> CloseDecision {
        if self.is_busy() {
            tracing::info!("close deferred until the running merge finishes");
            CloseDecision::Deferred
        } else {
            CloseDecision::Granted
        }
    }
}
