//! Tracing initialization and the output-log binary record (spec §6/§7).
//!
//! Three tracing targets model the transfer/output/system log streams spec
//! §7 describes: `sf_http::transfer` (human-readable per-event line),
//! `sf_http::output` (structured per-file record, additionally persisted
//! in its fixed binary layout via [`OutputLogRecord::encode`]), and
//! `sf_http::system` (hard errors only). A single initialization path
//! configures all three, the way the teacher's `init_tracing_if_requested`
//! configures one file-backed layer for everything it logs.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub const TRANSFER_TARGET: &str = "sf_http::transfer";
pub const OUTPUT_TARGET: &str = "sf_http::output";
pub const SYSTEM_TARGET: &str = "sf_http::system";

/// The byte that separates the fixed-layout portion of an output log
/// record from its trailing variable-length file name and archive name.
pub const SEPARATOR_CHAR: u8 = 0x1f;

/// Opens `<work_dir>/logs/sf_http.log` in append mode and installs a
/// non-blocking file-backed tracing subscriber gated by `EnvFilter`
/// (`debug` under `-t`/debug wiring, `warn` otherwise). If the log file
/// cannot be opened, emits one `eprintln!` warning and returns `None` —
/// the process continues without file-backed tracing rather than
/// crashing on a logging failure.
pub fn init_tracing(work_dir: &Path, debug: bool) -> Option<WorkerGuard> {
    let logs_dir = work_dir.join("logs");
    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("warning: could not create log directory {}: {}", logs_dir.display(), e);
        return None;
    }
    let log_path = logs_dir.join("sf_http.log");
    match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            let level = if debug { "debug" } else { "warn" };
            let layer = fmt::layer().with_writer(writer).with_ansi(false).with_filter(EnvFilter::new(level));
            tracing_subscriber::registry().with(layer).init();
            Some(guard)
        }
        Err(e) => {
            eprintln!("warning: could not open log file {}: {}", log_path.display(), e);
            None
        }
    }
}

/// The output log's fixed-layout record (spec §6): file name, size, job
/// id, retries, unique-name length, transfer-time ticks, and archive-name
/// length (zero for deletes) plus the trailing variable-length names.
pub struct OutputLogRecord<'a> {
    pub file_name: &'a str,
    pub file_size: i64,
    pub job_id: u32,
    pub retries: u32,
    pub unique_name: &'a str,
    pub transfer_time_ticks: u64,
    pub archive_name: Option<&'a str>,
}

impl<'a> OutputLogRecord<'a> {
    /// Encodes the fixed fields in network byte order followed by the
    /// separator-delimited variable-length file name and (if present)
    /// archive name.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(self.file_size.to_be_bytes());
        out.extend(self.job_id.to_be_bytes());
        out.extend(self.retries.to_be_bytes());
        out.extend((self.unique_name.len() as u32).to_be_bytes());
        out.extend(self.transfer_time_ticks.to_be_bytes());
        let archive_len = self.archive_name.map(str::len).unwrap_or(0) as u32;
        out.extend(archive_len.to_be_bytes());
        out.push(SEPARATOR_CHAR);
        out.extend(self.file_name.as_bytes());
        out.push(SEPARATOR_CHAR);
        out.extend(self.unique_name.as_bytes());
        if let Some(archive_name) = self.archive_name {
            out.push(SEPARATOR_CHAR);
            out.extend(archive_name.as_bytes());
        }
        out
    }
}

/// Appends one length-prefixed record to `<logs_dir>/output.log`: a 4-byte
/// big-endian length followed by [`OutputLogRecord::encode`]'s bytes. This
/// is the raw-layout sibling of the `sf_http::output` tracing target, for
/// tooling that wants the binary record directly rather than through a
/// tracing subscriber — the same role the teacher's
/// `util::write_failures_structured` plays for its `.jsonl` sibling file.
pub fn append_output_record(logs_dir: &Path, record: &OutputLogRecord) -> std::io::Result<()> {
    std::fs::create_dir_all(logs_dir)?;
    let mut file = OpenOptions::new().create(true).append(true).open(logs_dir.join("output.log"))?;
    let encoded = record.encode();
    file.write_all(&(encoded.len() as u32).to_be_bytes())?;
    file.write_all(&encoded)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_zero_archive_length_for_deletes() {
        let rec = OutputLogRecord {
            file_name: "data.bin",
            file_size: 1024,
            job_id: 7,
            retries: 0,
            unique_name: "u1",
            transfer_time_ticks: 42,
            archive_name: None,
        };
        let bytes = rec.encode();
        let archive_len = u32::from_be_bytes(bytes[28..32].try_into().unwrap());
        assert_eq!(archive_len, 0);
        assert!(bytes.ends_with(b"u1"));
    }

    #[test]
    fn encode_includes_archive_name_when_present() {
        let rec = OutputLogRecord {
            file_name: "data.bin",
            file_size: 1024,
            job_id: 7,
            retries: 2,
            unique_name: "u1",
            transfer_time_ticks: 42,
            archive_name: Some("archive/data.bin"),
        };
        let bytes = rec.encode();
        assert!(bytes.ends_with(b"archive/data.bin"));
        let separators = bytes.iter().filter(|&&b| b == SEPARATOR_CHAR).count();
        assert_eq!(separators, 3);
    }

    #[test]
    fn append_output_record_length_prefixes_each_entry() {
        let dir = tempfile::tempdir().unwrap();
        let rec = OutputLogRecord {
            file_name: "a.bin",
            file_size: 10,
            job_id: 1,
            retries: 0,
            unique_name: "u1",
            transfer_time_ticks: 5,
            archive_name: None,
        };
        append_output_record(dir.path(), &rec).unwrap();
        append_output_record(dir.path(), &rec).unwrap();
        let contents = std::fs::read(dir.path().join("output.log")).unwrap();
        let expected_len = rec.encode().len();
        let first_len = u32::from_be_bytes(contents[0..4].try_into().unwrap()) as usize;
        assert_eq!(first_len, expected_len);
        assert_eq!(contents.len(), 2 * (4 + expected_len));
    }
}
