//! Entry point: `sf_http <work_dir> <job_no> <FSA_id> <FSA_pos> <msg_name> [flags]`
//! (spec §6). Wires the CLI, the message file, the live FSA entry, signal
//! installation, and the transfer pipeline together; everything it touches
//! lives in its own module so each piece is unit-testable without a real
//! socket or a real mmap.

use anyhow::Result;
use clap::Parser;
use sf_http::config::{AfdConfig, WorkDirLayout};
use sf_http::error::{self, AfdError};
use sf_http::fsa::{self, FraView, FsaView};
use sf_http::http::{HttpTransport, TcpHttpSession};
use sf_http::job::{self, Job, MessageFile};
use sf_http::pipeline::{self, BatchRunner};
use sf_http::region_lock::Region;
use sf_http::{cli, counter, logging, signals};
use std::time::{Duration, Instant};

/// How often the burst-wait loop re-lists the batch directory while the
/// connection is held open for a possible follow-on batch.
const BURST_POLL_INTERVAL: Duration = Duration::from_millis(200);

fn main() {
    let cli = cli::Cli::parse();
    let _guard = logging::init_tracing(&cli.work_dir, cli.debug);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run(cli)))
        .unwrap_or_else(|_| Err(AfdError::Init("worker panicked".into()).into()));

    if let Err(e) = &result {
        tracing::event!(target: logging::SYSTEM_TARGET, tracing::Level::ERROR, error = %e, "worker exiting with error");
    }
    std::process::exit(error::exit_code_for(&result));
}

/// A single-job-slot worker holds exactly one [`fsa::JobStatus`] per host
/// entry; `SLOT_INDEX` names that convention so it isn't a bare `0`
/// scattered through this function.
const SLOT_INDEX: usize = 0;

/// Zeroes the FSA job slot on every exit path, including an unwinding
/// panic — the same slot [`signals::install`] publishes to the fault
/// handler, so a SIGSEGV and an ordinary early return leave the same
/// residue behind.
struct SlotResetGuard {
    ptr: *mut u8,
    len: usize,
}

impl Drop for SlotResetGuard {
    fn drop(&mut self) {
        if !self.ptr.is_null() && self.len > 0 {
            unsafe { std::ptr::write_bytes(self.ptr, 0, self.len) };
        }
    }
}

fn run(cli: cli::Cli) -> Result<()> {
    let layout = WorkDirLayout::new(cli.work_dir.clone());
    let _config = AfdConfig::load(&cli.work_dir).map_err(|e| AfdError::Init(e.to_string()))?;

    let msg = MessageFile::load(&cli.msg_name)?;
    let host_alias = msg.options.get("host_alias").cloned().unwrap_or_else(|| {
        cli.msg_name
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("host{}", cli.fsa_id))
    });
    let job = Job::from_message(
        host_alias,
        cli.job_no,
        cli.fsa_id,
        cli.fsa_pos,
        &msg,
        cli.age_limit,
        cli.disable_archive,
        cli.retries,
    )?;

    std::fs::create_dir_all(layout.counter_dir()).map_err(|e| AfdError::Init(e.to_string()))?;
    std::fs::create_dir_all(layout.archive_dir()).map_err(|e| AfdError::Init(e.to_string()))?;

    let min_len = fsa::ENTRY_STRIDE as u64 * (cli.fsa_pos as u64 + 1);
    let mut fsa_view = FsaView::attach(&layout.fsa_path(), min_len)
        .map_err(|e| AfdError::Alloc(format!("cannot attach FSA: {e}")))?;
    // Read-only per spec §4.1's "maps the FSA and FRA"; this worker never
    // consults a retrieval-job field, so attaching is the whole step.
    let _fra_view = FraView::attach(&layout.fra_path())
        .map_err(|e| AfdError::Alloc(format!("cannot attach FRA: {e}")))?;
    let entry_base = FsaView::entry_offset(cli.fsa_pos);

    // Fixed CON -> EC -> HS acquisition order (spec §5); held for the whole
    // read/mutate/write cycle since a single worker invocation is this
    // host entry's only writer for its own job slot.
    let _con_guard = fsa_view
        .lock(Region::Con, entry_base)
        .map_err(|e| AfdError::Alloc(format!("CON lock failed: {e}")))?;
    let _ec_guard = fsa_view
        .lock(Region::Ec, entry_base)
        .map_err(|e| AfdError::Alloc(format!("EC lock failed: {e}")))?;
    let _hs_guard = fsa_view
        .lock(Region::Hs, entry_base)
        .map_err(|e| AfdError::Alloc(format!("HS lock failed: {e}")))?;

    let mut host = fsa_view.read_entry(cli.fsa_pos, 1);
    if host.real_hostname1.is_empty() {
        host.real_hostname1 = job.real_hostname1.clone();
    }

    let (slot_ptr, slot_len) = fsa_view.slot_raw_range(cli.fsa_pos, SLOT_INDEX);
    let _slot_guard = SlotResetGuard { ptr: slot_ptr, len: slot_len };
    let host_status_ptr = fsa_view.host_status_raw_ptr(cli.fsa_pos);
    let cancel = signals::install(slot_ptr, slot_len, host_status_ptr)
        .map_err(|e| AfdError::Alloc(format!("signal install failed: {e}")))?;

    let toggle_requested = job.flags.toggle_host || cli.temp_toggle;
    let (resolved_host, using_secondary) = host.resolve_host(toggle_requested);
    let resolved_host = resolved_host.to_string();
    if job.trans_rename_suppressed(using_secondary) {
        tracing::event!(
            target: logging::SYSTEM_TARGET,
            tracing::Level::DEBUG,
            "trans-rename suppressed for the resolved host"
        );
    }

    let batch_dir = if cli.resend_from_archive {
        layout.archive_dir()
    } else {
        layout.file_dir(&cli.job_no.to_string())
    };
    let mut files = job::list_batch_files(&batch_dir)?;
    if let Some(age_limit) = job.age_limit {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        files.retain(|f| now - f.mtime <= age_limit as i64);
    }

    let mut seq_counter = if job.flags.add_sequence_number {
        counter::CounterFile::open(&layout.counter_dir(), &job.host_alias, job.port).ok()
    } else {
        None
    };

    let mut http = TcpHttpSession::new();
    let connect_timeout = Duration::from_secs(30);

    let mut total_files_sent = 0u32;
    let mut total_bytes_sent = 0u64;
    let mut burst_count = 0u32;

    let run_result: Result<(), AfdError> = (|| {
        if files.is_empty() {
            // Boundary case: an empty batch still removes `file_path` and
            // exits cleanly, without ever opening a connection for it.
            if !cli.resend_from_archive {
                let _ = std::fs::remove_dir(&batch_dir);
            }
            return Ok(());
        }

        http.connect(
            &resolved_host,
            job.port,
            job.proxy.as_deref(),
            job.tls_mode,
            job.strict_verify,
            connect_timeout,
            host.protocol_options.contains(fsa::ProtocolOptions::TCP_KEEPALIVE),
        )?;

        let batch_runner = BatchRunner::new(&job, &cancel);
        let mut first_in_burst = true;

        loop {
            let batch_start = Instant::now();
            let outcome = batch_runner.run(
                &mut http,
                &mut host,
                SLOT_INDEX,
                &files,
                &batch_dir,
                Some(&layout.archive_dir()),
                Some(&layout.fifo_dir()),
                Some(&layout.logs_dir()),
                &mut seq_counter,
                first_in_burst,
            )?;
            total_files_sent += outcome.files_sent;
            total_bytes_sent += outcome.bytes_sent;
            tracing::event!(
                target: logging::TRANSFER_TARGET,
                tracing::Level::INFO,
                files_sent = outcome.files_sent,
                bytes_sent = outcome.bytes_sent,
                "batch complete"
            );
            files.clear();
            first_in_burst = false;
            if !cli.resend_from_archive {
                let _ = std::fs::remove_dir(&batch_dir);
            }

            // Poll the batch directory for a follow-on batch within the
            // keep-connected window before giving up the connection (spec
            // §4.7); `resend_from_archive` aliases `batch_dir` to the
            // shared archive directory, where polling would not mean the
            // same thing, so it never waits there.
            let mut next_files = Vec::new();
            if job.keep_connected > 0 && !cli.resend_from_archive {
                let deadline = batch_start + Duration::from_secs(job.keep_connected as u64);
                while Instant::now() < deadline {
                    next_files = job::list_batch_files(&batch_dir).unwrap_or_default();
                    if !next_files.is_empty() || cancel.poll().is_some() {
                        break;
                    }
                    std::thread::sleep(BURST_POLL_INTERVAL);
                }
            }
            let another_batch_available = !next_files.is_empty();

            let decision = pipeline::check_burst(
                batch_start.elapsed(),
                job.keep_connected,
                job.disconnect_deadline,
                host.protocol_options.contains(fsa::ProtocolOptions::KEEP_CONNECTED_DISCONNECT),
                another_batch_available,
            );
            match decision {
                pipeline::BurstDecision::Continue => {
                    burst_count += 1;
                    files = next_files;
                    continue;
                }
                pipeline::BurstDecision::StopClean | pipeline::BurstDecision::StopDirty => {
                    http.quit();
                    break;
                }
            }
        }
        Ok(())
    })();

    host.job_status[SLOT_INDEX].reset();
    fsa_view.write_entry(cli.fsa_pos, &host);
    let flush_result = fsa_view.flush().map_err(|e| AfdError::Alloc(format!("FSA flush failed: {e}")));

    let burst_tag = if burst_count > 0 { " [BURST]" } else { "" };
    tracing::event!(
        target: logging::SYSTEM_TARGET,
        tracing::Level::INFO,
        files_sent = total_files_sent,
        bytes_sent = sf_http::util::human_bytes(total_bytes_sent),
        burst_count,
        "session summary{}", burst_tag
    );

    run_result.and(flush_result).map_err(anyhow::Error::from)
}
