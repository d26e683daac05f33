//! The transfer pipeline: the worker's main loop (spec §4.6–§4.8). For
//! each file in a batch: frame, stream, finalize, archive-or-delete, FSA
//! bookkeeping, burst decision. This is the 35% of the worker spec §2
//! budgets for the pipeline; everything else in this crate exists to feed
//! or be driven by it.

use crate::archive;
use crate::counter::CounterFile;
use crate::error::AfdError;
use crate::fifo;
use crate::fsa::{ConnectStatus, HostEntry};
use crate::framing;
use crate::job::{FileRecord, Job};
use crate::http::HttpTransport;
use crate::rate_limiter::RateLimiter;
use crate::signals::CancellationToken;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Instant;

/// The outer loop's decision after a batch completes (spec §4.7), a
/// tagged return rather than a flag per the re-architecture guidance in
/// spec §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstDecision {
    Continue,
    StopClean,
    StopDirty,
}

/// Asks whether another batch for the same host can be appended to this
/// connection. A pure decision function over the inputs spec §4.7 names,
/// so it is unit-testable without a live connection or scheduler.
pub fn check_burst(
    connection_age: std::time::Duration,
    keep_connected: u32,
    disconnect_deadline: u32,
    keep_connected_disconnect: bool,
    another_batch_available: bool,
) -> BurstDecision {
    if !another_batch_available {
        return if keep_connected_disconnect { BurstDecision::StopDirty } else { BurstDecision::StopClean };
    }
    let age = connection_age.as_secs() as u32;
    if keep_connected > 0 && age < keep_connected {
        return BurstDecision::Continue;
    }
    if disconnect_deadline > 0 && age >= disconnect_deadline {
        return BurstDecision::StopClean;
    }
    BurstDecision::StopDirty
}

/// Outcome of sending one file, for the output log record and the
/// batch-level accumulators.
pub struct FileSendOutcome {
    pub bytes_sent: u64,
    pub transfer_ticks: u64,
}

/// Sends one file per spec §4.6 steps 2–11: publish in-use fields to the
/// caller-owned slot (the caller does this before calling, since it's the
/// worker's own uncontested fields), frame, open, stream, finalize,
/// archive-or-delete.
pub struct Pipeline<'a> {
    pub job: &'a Job,
    pub cancel: &'a CancellationToken,
}

impl<'a> Pipeline<'a> {
    pub fn new(job: &'a Job, cancel: &'a CancellationToken) -> Self {
        Pipeline { job, cancel }
    }

    /// Sends a single file. `slot` receives live progress updates
    /// (`file_size_in_use_done`, `bytes_send`) as the loop runs, since
    /// those fields are the worker's own and need no region lock (spec
    /// §5). Returns `STILL_FILES_TO_SEND` if the transfer-timeout deadline
    /// fires mid-file.
    pub fn send_file(
        &self,
        http: &mut dyn HttpTransport,
        slot: &mut crate::fsa::JobStatus,
        file: &FileRecord,
        batch_dir: &Path,
        counter: &mut Option<CounterFile>,
        first_in_burst: bool,
    ) -> Result<FileSendOutcome, AfdError> {
        let source_path = batch_dir.join(&file.name);
        let mut source = File::open(&source_path)
            .map_err(|e| AfdError::OpenLocal(format!("{}: {e}", source_path.display())))?;

        slot.file_size_in_use = file.size as u64;
        slot.file_name_in_use = file.name.clone();

        let seq = if self.job.flags.add_sequence_number {
            match counter.as_mut().map(|c| c.next()) {
                Some(Ok(n)) => Some(n),
                Some(Err(_)) => {
                    *counter = None;
                    None
                }
                None => None,
            }
        } else {
            None
        };

        let envelope = if self.job.flags.file_name_is_header {
            Some(framing::build_envelope(&file.name, file.size as u64, self.job.transfer_mode, seq))
        } else {
            None
        };
        let content_length = envelope.as_ref().map(|e| e.content_length).unwrap_or(file.size as u64);

        http.put_begin(
            &self.job.target_path,
            &file.name,
            content_length,
            first_in_burst,
            &self.job.user,
            self.job.password.as_deref(),
        )?;

        if let Some(env) = &envelope {
            http.write(&env.prefix).map_err(|e| AfdError::WriteRemote(e.to_string()))?;
        }

        let mut limiter = RateLimiter::new(self.job.trl_per_process);

        let start = Instant::now();
        let mut bytes_done: u64 = 0;
        let block_size = limiter.effective_block_size(self.job.block_size);
        let mut buf = vec![0u8; block_size];
        let planned_size = file.size.max(0) as u64;
        while bytes_done < planned_size {
            if let Some(timeout) = self.job.transfer_timeout {
                if start.elapsed().as_secs() as u32 > timeout {
                    http.quit();
                    return Err(AfdError::StillFilesToSend);
                }
            }
            let to_read = (planned_size - bytes_done).min(block_size as u64) as usize;
            let n = source.read(&mut buf[..to_read]).map_err(|e| AfdError::ReadLocal(e.to_string()))?;
            if n == 0 {
                break;
            }
            http.write(&buf[..n]).map_err(|e| AfdError::WriteRemote(e.to_string()))?;
            limiter.limit(n as u64);
            bytes_done += n as u64;
            slot.file_size_in_use_done = bytes_done;
            slot.bytes_send += n as u64;
        }

        // Single re-stat pass (spec step 8): if the source grew since the
        // plan, one more pass covers exactly the delta; repeated growth is
        // ignored.
        if let Ok(meta) = source.metadata() {
            let actual_size = meta.len();
            if actual_size > planned_size {
                let grown = actual_size - planned_size;
                if self.job.flags.silent_not_locked_file {
                    tracing::event!(
                        target: crate::logging::TRANSFER_TARGET,
                        tracing::Level::DEBUG,
                        file = %file.name,
                        grown_bytes = grown,
                        "file grew during send, extending one pass"
                    );
                } else {
                    tracing::event!(
                        target: crate::logging::TRANSFER_TARGET,
                        tracing::Level::WARN,
                        file = %file.name,
                        grown_bytes = grown,
                        "file grew during send, extending one pass"
                    );
                }
                let mut remaining = grown;
                while remaining > 0 {
                    let to_read = remaining.min(block_size as u64) as usize;
                    let n =
                        source.read(&mut buf[..to_read]).map_err(|e| AfdError::ReadLocal(e.to_string()))?;
                    if n == 0 {
                        break;
                    }
                    http.write(&buf[..n]).map_err(|e| AfdError::WriteRemote(e.to_string()))?;
                    limiter.limit(n as u64);
                    bytes_done += n as u64;
                    slot.file_size_in_use_done = bytes_done;
                    slot.bytes_send += n as u64;
                    remaining -= n as u64;
                }
            }
        }

        if let Some(env) = &envelope {
            http.write(&env.suffix).map_err(|e| AfdError::WriteRemote(e.to_string()))?;
        }

        http.put_finalize()?;

        slot.file_size_done += bytes_done;
        slot.file_size_in_use = 0;
        slot.file_size_in_use_done = 0;
        slot.file_name_in_use.clear();

        Ok(FileSendOutcome { bytes_sent: bytes_done, transfer_ticks: start.elapsed().as_millis() as u64 })
    }
}

/// Drives one full batch: steps 1 and 12 of spec §4.6, plus the per-file
/// loop via [`Pipeline::send_file`]. Lives outside `Pipeline` proper so
/// the FSA-locking orchestration (which needs the real [`crate::fsa::FsaView`])
/// stays separate from the pure per-file logic above, which unit tests
/// exercise without a live mmap.
pub struct BatchRunner<'a> {
    pub job: &'a Job,
    pub cancel: &'a CancellationToken,
}

pub struct BatchOutcome {
    pub files_sent: u32,
    pub bytes_sent: u64,
}

impl<'a> BatchRunner<'a> {
    pub fn new(job: &'a Job, cancel: &'a CancellationToken) -> Self {
        BatchRunner { job, cancel }
    }

    /// Runs every file in `files` against `http`, archiving or deleting
    /// each as it completes, waking the scheduler once per batch, and
    /// performing the first-success error-counter reset (step 12) when
    /// `host.error_counter > 0`.
    pub fn run(
        &self,
        http: &mut dyn HttpTransport,
        host: &mut HostEntry,
        slot_index: usize,
        files: &[FileRecord],
        batch_dir: &Path,
        archive_dir: Option<&Path>,
        fifo_dir: Option<&Path>,
        logs_dir: Option<&Path>,
        counter: &mut Option<CounterFile>,
        first_in_burst: bool,
    ) -> Result<BatchOutcome, AfdError> {
        let pipeline = Pipeline::new(self.job, self.cancel);
        let mut files_sent = 0u32;
        let mut bytes_sent = 0u64;

        host.job_status[slot_index].no_of_files = files.len() as u32;
        if host.connections == 0 {
            host.connections += 1;
        }
        host.job_status[slot_index].connect_status = ConnectStatus::HttpActive;

        for (i, file) in files.iter().enumerate() {
            if let Some(sig) = self.cancel.poll() {
                if sig == crate::signals::PendingSignal::Sigint
                    && !host.job_status[slot_index].is_shutdown_marker()
                {
                    return Err(AfdError::GotKilled);
                }
                break;
            }

            let outcome = pipeline.send_file(
                http,
                &mut host.job_status[slot_index],
                file,
                batch_dir,
                counter,
                first_in_burst && i == 0,
            )?;
            bytes_sent += outcome.bytes_sent;
            files_sent += 1;
            host.job_status[slot_index].no_of_files_done += 1;

            let source_path = batch_dir.join(&file.name);
            let archived_to = if self.job.archive_time > 0 && !self.job.flags.disable_archive {
                archive_dir.and_then(|dir| archive::archive_file(&source_path, dir, &self.job.unique_tag).ok())
            } else {
                let _ = archive::unlink_with_retry(&source_path);
                None
            };

            let record = crate::logging::OutputLogRecord {
                file_name: &file.name,
                file_size: file.size,
                job_id: self.job.job_id,
                retries: self.job.retries,
                unique_name: &self.job.unique_tag,
                transfer_time_ticks: outcome.transfer_ticks,
                archive_name: archived_to.as_ref().and_then(|p| p.to_str()),
            };
            if let Some(logs_dir) = logs_dir {
                let _ = crate::logging::append_output_record(logs_dir, &record);
            }
            tracing::event!(target: crate::logging::OUTPUT_TARGET, tracing::Level::INFO, bytes = record.encode().len());
            tracing::event!(
                target: crate::logging::TRANSFER_TARGET,
                tracing::Level::INFO,
                file = %file.name,
                bytes_sent = outcome.bytes_sent,
                "file sent"
            );

            if let Some(fifo_dir) = fifo_dir {
                let _ = fifo::wake_scheduler(fifo_dir);
            }

            if i == 0 && host.error_counter > 0 {
                host.error_counter = 0;
                host.error_history[0] = 0;
                for js in host.job_status.iter_mut() {
                    if js.connect_status == ConnectStatus::NotWorking {
                        js.connect_status = ConnectStatus::Disconnect;
                    }
                }
                host.host_status.remove(crate::fsa::HostStatusFlags::ERROR_QUEUE_SET);
            }
        }

        Ok(BatchOutcome { files_sent, bytes_sent })
    }
}
