//! Upload session driver
//!
//! Chooses between a delta and a full upload for one file, then drives a
//! single remote session through its states:
//!
//! 1. With an existing file id, fetch its stored signature, fingerprint the
//!    local file with the same block size and compute a delta.
//! 2. Send the delta if the savings gate accepts it; otherwise (or when no
//!    signature is available) send the whole file as transport chunks.
//! 3. Finalize only after every chunk or the delta payload was acknowledged.
//!
//! The driver never retries. A failed session is terminal; callers restart
//! the whole pipeline if they want another attempt.

pub mod chunk;
pub mod session;

pub use chunk::{plan_chunks, read_chunk, ChunkSpan, TransportChunk};
pub use session::{SessionState, UploadSession};

use crate::delta::{compute_delta_from_path, is_worthwhile, DeltaPlan, DeltaStats};
use crate::error::{Error, Result};
use crate::progress::ProgressReporter;
use crate::remote::{RemoteStore, SessionRequest};
use crate::signature::{generate_signature, FileSignature};
use crate::types::{UploadMode, UploadOptions, UploadOutcome};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Drives uploads against one remote store
pub struct UploadDriver {
    remote: RemoteStore,
    options: UploadOptions,
    last_history: Mutex<Vec<SessionState>>,
}

impl UploadDriver {
    pub fn new(remote: RemoteStore, options: UploadOptions) -> Self {
        Self {
            remote,
            options,
            last_history: Mutex::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    pub fn remote(&self) -> &RemoteStore {
        &self.remote
    }

    /// States visited by the most recent session this driver ran
    pub fn last_session_history(&self) -> Vec<SessionState> {
        self.last_history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Upload `path`, as a delta against `existing_file_id` when possible.
    ///
    /// Signature unavailability and an unprofitable delta both fall back to
    /// a full upload in the same call; every other error fails the upload.
    pub async fn smart_upload(
        &self,
        path: &Path,
        existing_file_id: Option<&str>,
        destination_folder: Option<&str>,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome> {
        let mut session = UploadSession::new(display_name(path)?);

        let result = async {
            let plan = match existing_file_id {
                Some(file_id) => self.plan_delta(path, file_id, cancel).await?,
                None => None,
            };

            match (plan, existing_file_id) {
                (Some(plan), Some(file_id)) => {
                    self.run_delta(&mut session, path, file_id, plan, destination_folder, progress, cancel)
                        .await
                }
                _ => {
                    self.run_full(&mut session, path, destination_folder, progress, cancel)
                        .await
                }
            }
        }
        .await;

        self.settle(session, result)
    }

    /// Id of the stored file with the same name as `path` in `destination_folder`.
    ///
    /// A failed lookup is logged and treated as "no stored version", so the
    /// upload proceeds as a new file.
    pub async fn find_existing(
        &self,
        path: &Path,
        destination_folder: Option<&str>,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let filename = display_name(path).ok()?;

        match guarded(cancel, self.remote.find_file(&filename, destination_folder)).await {
            Ok(Some(file_id)) => {
                tracing::info!(filename = %filename, file_id = %file_id, "Found stored version");
                Some(file_id)
            }
            Ok(None) => {
                tracing::debug!(filename = %filename, "No stored version, uploading as new file");
                None
            }
            Err(e) => {
                tracing::warn!(filename = %filename, error = %e, "Stored version lookup failed");
                None
            }
        }
    }

    /// Upload the whole file as transport chunks
    pub async fn full_upload(
        &self,
        path: &Path,
        destination_folder: Option<&str>,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome> {
        let mut session = UploadSession::new(display_name(path)?);
        let result = self
            .run_full(&mut session, path, destination_folder, progress, cancel)
            .await;
        self.settle(session, result)
    }

    /// Send a previously computed delta against `existing_file_id`
    pub async fn delta_upload(
        &self,
        path: &Path,
        existing_file_id: &str,
        plan: DeltaPlan,
        destination_folder: Option<&str>,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome> {
        let mut session = UploadSession::new(display_name(path)?);
        let result = self
            .run_delta(&mut session, path, existing_file_id, plan, destination_folder, progress, cancel)
            .await;
        self.settle(session, result)
    }

    /// Compute the delta of `path` against the stored `existing_file_id`.
    ///
    /// Returns `None` when a full upload should be used instead: the store
    /// has no usable signature, or the savings gate rejected the delta.
    pub async fn plan_delta(
        &self,
        path: &Path,
        existing_file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<DeltaPlan>> {
        check_cancelled(cancel)?;
        let remote_sig = match guarded(cancel, self.remote.fetch_signature(existing_file_id)).await {
            Ok(Some(sig)) => sig,
            Ok(None) => {
                tracing::warn!(file_id = %existing_file_id, "No stored signature, using full upload");
                return Ok(None);
            }
            Err(Error::SignatureUnavailable { message, .. }) => {
                tracing::warn!(file_id = %existing_file_id, reason = %message, "Signature unavailable, using full upload");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = remote_sig.validate() {
            tracing::warn!(file_id = %existing_file_id, error = %e, "Stored signature unusable, using full upload");
            return Ok(None);
        }

        tracing::debug!(
            file_id = %existing_file_id,
            remote_blocks = remote_sig.block_count(),
            block_size = remote_sig.block_size,
            "Fetched stored signature"
        );

        if remote_sig.block_size != self.options.block_size {
            tracing::debug!(
                configured = self.options.block_size,
                stored = remote_sig.block_size,
                "Using the stored signature's block size"
            );
        }

        let plan = guarded(cancel, compute_local_delta(path.to_path_buf(), remote_sig)).await?;
        let threshold = self.options.savings_threshold_percent;

        if !is_worthwhile(&plan, threshold) {
            tracing::info!(
                savings_percent = format!("{:.1}", plan.stats.savings_percent),
                threshold_percent = threshold,
                "Delta below savings threshold, using full upload"
            );
            return Ok(None);
        }

        tracing::info!(
            savings_percent = format!("{:.1}", plan.stats.savings_percent),
            reused = plan.stats.reused_blocks,
            novel = plan.stats.novel_blocks,
            "Delta accepted"
        );
        Ok(Some(plan))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_delta(
        &self,
        session: &mut UploadSession,
        path: &Path,
        existing_file_id: &str,
        plan: DeltaPlan,
        destination_folder: Option<&str>,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome> {
        let request = SessionRequest::new(display_name(path)?, plan.target_size())
            .with_parent_folder(destination_folder.map(str::to_string))
            .with_base_file(Some(existing_file_id.to_string()));

        let session_id = self.open(session, &request, UploadMode::Delta, cancel).await?;

        let novel_bytes = plan.novel_bytes();
        if novel_bytes > 0 {
            progress.report(0, novel_bytes);
        }

        check_cancelled(cancel)?;
        guarded(
            cancel,
            self.remote
                .transmit_delta(&session_id, &plan.instructions, &plan.novel_blocks),
        )
        .await?;
        progress.report(novel_bytes, novel_bytes);

        tracing::debug!(
            session_id = %session_id,
            instructions = plan.instructions.len(),
            novel_blocks = plan.novel_blocks.len(),
            "Delta acknowledged"
        );

        let file_id = self.finalize(session, &session_id, cancel).await?;

        Ok(UploadOutcome {
            file_id,
            mode: UploadMode::Delta,
            bytes_sent: novel_bytes,
            stats: plan.stats,
        })
    }

    async fn run_full(
        &self,
        session: &mut UploadSession,
        path: &Path,
        destination_folder: Option<&str>,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome> {
        let total_size = std::fs::metadata(path)
            .map_err(|e| Error::read("reading metadata", e))?
            .len();

        let request = SessionRequest::new(display_name(path)?, total_size)
            .with_parent_folder(destination_folder.map(str::to_string));

        let session_id = self.open(session, &request, UploadMode::Full, cancel).await?;

        let spans = plan_chunks(total_size, self.options.chunk_size);
        let chunk_count = spans.len();
        if total_size > 0 {
            progress.report(0, total_size);
        }

        let jobs = self.options.jobs.max(1);
        let mut transfers = stream::iter(spans)
            .map(|span| {
                let remote = self.remote.clone();
                let session_id = session_id.clone();
                let path = path.to_path_buf();
                let cancel = cancel.clone();
                async move {
                    let chunk = chunk::read_chunk_async(&path, span).await?;
                    check_cancelled(&cancel)?;
                    remote
                        .transmit_chunk(&session_id, chunk.index, &chunk.hash, chunk.data)
                        .await?;
                    Ok::<ChunkSpan, Error>(span)
                }
            })
            .buffer_unordered(jobs);

        let mut acknowledged = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = transfers.next() => next,
            };

            match next {
                Some(Ok(span)) => {
                    acknowledged += span.length as u64;
                    progress.report(acknowledged, total_size);
                    tracing::debug!(session_id = %session_id, index = span.index, acknowledged, "Chunk acknowledged");
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        tracing::debug!(session_id = %session_id, chunks = chunk_count, "All chunks acknowledged");

        let file_id = self.finalize(session, &session_id, cancel).await?;
        // An empty file has no chunk acks; the commit is its only acknowledgment
        if total_size == 0 {
            progress.report(0, 0);
        }
        let total_blocks = plan_chunks(total_size, self.options.block_size).len();

        Ok(UploadOutcome {
            file_id,
            mode: UploadMode::Full,
            stats: DeltaStats::full_transfer(total_blocks, total_size),
            bytes_sent: total_size,
        })
    }

    async fn open(
        &self,
        session: &mut UploadSession,
        request: &SessionRequest,
        mode: UploadMode,
        cancel: &CancellationToken,
    ) -> Result<String> {
        check_cancelled(cancel)?;
        let session_id = guarded(cancel, self.remote.open_session(request)).await?;

        tracing::debug!(
            session_id = %session_id,
            backend = self.remote.name(),
            filename = %request.filename,
            total_size = request.total_size,
            "Upload session opened"
        );

        session.opened(session_id.clone(), mode)?;
        Ok(session_id)
    }

    async fn finalize(
        &self,
        session: &mut UploadSession,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        // Cancellation is honored up to this point, never after
        check_cancelled(cancel)?;
        session.finalizing()?;

        let file_id = self.remote.complete_session(session_id).await?;
        session.completed(file_id.clone())?;
        Ok(file_id)
    }

    fn settle(&self, mut session: UploadSession, result: Result<UploadOutcome>) -> Result<UploadOutcome> {
        match &result {
            Ok(outcome) => tracing::info!(
                file_id = %outcome.file_id,
                mode = %outcome.mode,
                bytes_sent = outcome.bytes_sent,
                "Upload complete"
            ),
            Err(e) => {
                session.failed(e);
                tracing::warn!(filename = session.filename(), error = %e, "Upload failed");
            }
        }

        *self.last_history.lock().unwrap_or_else(|p| p.into_inner()) = session.history().to_vec();
        result
    }
}

/// Fingerprint the local file with the stored block size and diff it
async fn compute_local_delta(path: PathBuf, remote_sig: FileSignature) -> Result<DeltaPlan> {
    tokio::task::spawn_blocking(move || {
        let local_sig = generate_signature(&path, remote_sig.block_size)?;
        compute_delta_from_path(&local_sig, &remote_sig, &path)
    })
    .await
    .map_err(|e| Error::read("delta computation task", std::io::Error::other(e)))?
}

fn display_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::config(format!("{} has no file name", path.display())))
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Run `fut` unless `cancel` fires first
async fn guarded<T>(cancel: &CancellationToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}
