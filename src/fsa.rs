//! The Filetransfer Status Area: a memory-mapped, multi-writer table of
//! per-host transfer status, shared with sibling workers and the
//! supervising scheduler. The worker attaches on start and detaches on
//! exit; every field this worker touches outside of its own job slot goes
//! through a [`crate::region_lock`] guard.

use crate::region_lock::{self, Region, RegionLockGuard};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

pub const MAX_HOSTNAME_LENGTH: usize = 64;
pub const MAX_FILENAME_LENGTH: usize = 256;
pub const MAX_UNIQUE_NAME_LENGTH: usize = 32;
pub const ERROR_HISTORY_LENGTH: usize = 5;

bitflags::bitflags! {
    /// Protocol-option bits carried per host entry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ProtocolOptions: u32 {
        const TCP_KEEPALIVE           = 0x0001;
        const TIMEOUT_TRANSFER        = 0x0002;
        const TLS_STRICT_VERIFY       = 0x0004;
        const KEEP_CONNECTED_DISCONNECT = 0x0008;
    }

    /// Host-wide event/status bits, mutated under the `Hs` region.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct HostStatusFlags: u32 {
        const EVENT_STATUS_STATIC  = 0x0001;
        const AUTO_PAUSE_QUEUE     = 0x0002;
        const ERROR_OFFLINE        = 0x0004;
        const ERROR_OFFLINE_STATIC = 0x0008;
        const ERROR_QUEUE_SET      = 0x0010;
        const HOST_ACTION_SUCCESS  = 0x0020;
        const STORE_IP             = 0x0040;
        const IS_FAULTY_VAR        = 0x0080;
    }
}

/// Connection status of one job slot. Cross-slot transitions to/from
/// `NotWorking` happen under the `Ec` region; everything else is this
/// worker's own slot and needs no lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectStatus {
    Disconnect,
    Connecting,
    HttpActive,
    NotWorking,
}

/// One job's progress within a host entry's `job_status` array. Fields the
/// worker owns exclusively (its own slot, uncontested) are mutated without
/// a region lock; see spec §5.
#[derive(Clone, Debug)]
pub struct JobStatus {
    pub connect_status: ConnectStatus,
    pub no_of_files: u32,
    pub no_of_files_done: u32,
    pub file_size_done: u64,
    pub file_size_in_use: u64,
    pub file_size_in_use_done: u64,
    pub bytes_send: u64,
    pub file_name_in_use: String,
    pub job_id: u32,
    pub unique_name: [u8; MAX_UNIQUE_NAME_LENGTH],
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus {
            connect_status: ConnectStatus::Disconnect,
            no_of_files: 0,
            no_of_files_done: 0,
            file_size_done: 0,
            file_size_in_use: 0,
            file_size_in_use_done: 0,
            bytes_send: 0,
            file_name_in_use: String::new(),
            job_id: 0,
            unique_name: [0u8; MAX_UNIQUE_NAME_LENGTH],
        }
    }
}

impl JobStatus {
    /// Clears everything an exit handler must zero so a successor worker
    /// starts clean, per spec §3 lifecycle.
    pub fn reset(&mut self) {
        *self = JobStatus::default();
    }

    /// Scheduler shutdown marker: `unique_name[2] == 5` turns a SIGINT into
    /// a clean exit instead of `GOT_KILLED` (spec §5 cancellation semantics).
    pub fn is_shutdown_marker(&self) -> bool {
        self.unique_name.get(2).copied() == Some(5)
    }
}

/// A single host alias's shared entry: real hostnames, host-wide flags,
/// error bookkeeping, and the per-job slots.
pub struct HostEntry {
    pub real_hostname1: String,
    pub real_hostname2: Option<String>,
    pub protocol_options: ProtocolOptions,
    pub host_status: HostStatusFlags,
    pub host_toggle: u8,
    pub allowed_transfers: usize,
    pub error_counter: u32,
    pub error_history: [u32; ERROR_HISTORY_LENGTH],
    pub start_event_handle: i64,
    pub end_event_handle: i64,
    pub connections: u32,
    pub job_status: Vec<JobStatus>,
    pub pinned_ip: Option<std::net::IpAddr>,
}

impl HostEntry {
    pub fn new(
        real_hostname1: String,
        real_hostname2: Option<String>,
        allowed_transfers: usize,
    ) -> Self {
        HostEntry {
            real_hostname1,
            real_hostname2,
            protocol_options: ProtocolOptions::empty(),
            host_status: HostStatusFlags::empty(),
            host_toggle: 0,
            allowed_transfers,
            error_counter: 0,
            error_history: [0; ERROR_HISTORY_LENGTH],
            start_event_handle: 0,
            end_event_handle: 0,
            connections: 0,
            job_status: (0..allowed_transfers).map(|_| JobStatus::default()).collect(),
            pinned_ip: None,
        }
    }

    /// Resolve which real hostname a job should use, per spec §4.1: primary
    /// if no secondary exists; otherwise toggle-host flips the active side,
    /// and absent a toggle request the current `host_toggle` side is used.
    pub fn resolve_host(&self, toggle_requested: bool) -> (&str, bool) {
        let Some(secondary) = self.real_hostname2.as_deref() else {
            return (&self.real_hostname1, false);
        };
        let use_secondary = if toggle_requested { self.host_toggle == 0 } else { self.host_toggle == 1 };
        if use_secondary { (secondary, true) } else { (&self.real_hostname1, false) }
    }
}

/// Maximum `job_status` slots packed per host entry in the on-disk/mmap
/// layout. Real deployments size `allowed_transfers` well under this; a
/// job requesting more is an init-time error, not a silent truncation.
pub const MAX_JOB_STATUS: usize = 16;

const JOB_STATUS_STRIDE: usize = 1 + 4 + 4 + 8 + 8 + 8 + 8 + MAX_FILENAME_LENGTH + 4 + MAX_UNIQUE_NAME_LENGTH;
const ENTRY_HEADER_STRIDE: usize = MAX_HOSTNAME_LENGTH + 1 + MAX_HOSTNAME_LENGTH + 4 + 4 + 1 + 2 + 4 + 4 * ERROR_HISTORY_LENGTH + 8 + 8 + 4;

/// Byte offset of the 4-byte `host_status` field relative to the start of
/// a host entry, matching `encode_into`'s layout. Published to
/// [`crate::signals::install`] so the fault handler can set
/// `IS_FAULTY_VAR` without needing the full decode/encode round trip.
pub const HOST_STATUS_OFFSET: usize = MAX_HOSTNAME_LENGTH + 1 + MAX_HOSTNAME_LENGTH + 4;

/// Byte stride between consecutive host entries in the shared segment.
pub const ENTRY_STRIDE: usize = ENTRY_HEADER_STRIDE + MAX_JOB_STATUS * JOB_STATUS_STRIDE;

fn put_fixed_str(buf: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(buf.len());
    buf[..n].copy_from_slice(&bytes[..n]);
    for b in &mut buf[n..] {
        *b = 0;
    }
}

fn get_fixed_str(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

impl ConnectStatus {
    fn to_byte(self) -> u8 {
        match self {
            ConnectStatus::Disconnect => 0,
            ConnectStatus::Connecting => 1,
            ConnectStatus::HttpActive => 2,
            ConnectStatus::NotWorking => 3,
        }
    }

    fn from_byte(b: u8) -> Self {
        match b {
            1 => ConnectStatus::Connecting,
            2 => ConnectStatus::HttpActive,
            3 => ConnectStatus::NotWorking,
            _ => ConnectStatus::Disconnect,
        }
    }
}

impl JobStatus {
    fn encode_into(&self, buf: &mut [u8]) {
        buf[0] = self.connect_status.to_byte();
        buf[1..5].copy_from_slice(&self.no_of_files.to_be_bytes());
        buf[5..9].copy_from_slice(&self.no_of_files_done.to_be_bytes());
        buf[9..17].copy_from_slice(&self.file_size_done.to_be_bytes());
        buf[17..25].copy_from_slice(&self.file_size_in_use.to_be_bytes());
        buf[25..33].copy_from_slice(&self.file_size_in_use_done.to_be_bytes());
        buf[33..41].copy_from_slice(&self.bytes_send.to_be_bytes());
        let name_end = 41 + MAX_FILENAME_LENGTH;
        put_fixed_str(&mut buf[41..name_end], &self.file_name_in_use);
        buf[name_end..name_end + 4].copy_from_slice(&self.job_id.to_be_bytes());
        let unique_start = name_end + 4;
        buf[unique_start..unique_start + MAX_UNIQUE_NAME_LENGTH].copy_from_slice(&self.unique_name);
    }

    fn decode_from(buf: &[u8]) -> Self {
        let name_end = 41 + MAX_FILENAME_LENGTH;
        let unique_start = name_end + 4;
        let mut unique_name = [0u8; MAX_UNIQUE_NAME_LENGTH];
        unique_name.copy_from_slice(&buf[unique_start..unique_start + MAX_UNIQUE_NAME_LENGTH]);
        JobStatus {
            connect_status: ConnectStatus::from_byte(buf[0]),
            no_of_files: u32::from_be_bytes(buf[1..5].try_into().unwrap()),
            no_of_files_done: u32::from_be_bytes(buf[5..9].try_into().unwrap()),
            file_size_done: u64::from_be_bytes(buf[9..17].try_into().unwrap()),
            file_size_in_use: u64::from_be_bytes(buf[17..25].try_into().unwrap()),
            file_size_in_use_done: u64::from_be_bytes(buf[25..33].try_into().unwrap()),
            bytes_send: u64::from_be_bytes(buf[33..41].try_into().unwrap()),
            file_name_in_use: get_fixed_str(&buf[41..name_end]),
            job_id: u32::from_be_bytes(buf[name_end..name_end + 4].try_into().unwrap()),
            unique_name,
        }
    }
}

impl HostEntry {
    /// Packs this entry into `buf` (must be at least [`ENTRY_STRIDE`]
    /// bytes), the layout a worker and its siblings agree on for the
    /// shared segment.
    pub fn encode_into(&self, buf: &mut [u8]) {
        put_fixed_str(&mut buf[0..MAX_HOSTNAME_LENGTH], &self.real_hostname1);
        let mut off = MAX_HOSTNAME_LENGTH;
        buf[off] = self.real_hostname2.is_some() as u8;
        off += 1;
        put_fixed_str(
            &mut buf[off..off + MAX_HOSTNAME_LENGTH],
            self.real_hostname2.as_deref().unwrap_or(""),
        );
        off += MAX_HOSTNAME_LENGTH;
        buf[off..off + 4].copy_from_slice(&self.protocol_options.bits().to_be_bytes());
        off += 4;
        buf[off..off + 4].copy_from_slice(&self.host_status.bits().to_be_bytes());
        off += 4;
        buf[off] = self.host_toggle;
        off += 1;
        buf[off..off + 2].copy_from_slice(&(self.allowed_transfers as u16).to_be_bytes());
        off += 2;
        buf[off..off + 4].copy_from_slice(&self.error_counter.to_be_bytes());
        off += 4;
        for v in &self.error_history {
            buf[off..off + 4].copy_from_slice(&v.to_be_bytes());
            off += 4;
        }
        buf[off..off + 8].copy_from_slice(&self.start_event_handle.to_be_bytes());
        off += 8;
        buf[off..off + 8].copy_from_slice(&self.end_event_handle.to_be_bytes());
        off += 8;
        buf[off..off + 4].copy_from_slice(&self.connections.to_be_bytes());
        off += 4;
        debug_assert_eq!(off, ENTRY_HEADER_STRIDE);
        for (i, js) in self.job_status.iter().enumerate().take(MAX_JOB_STATUS) {
            let start = ENTRY_HEADER_STRIDE + i * JOB_STATUS_STRIDE;
            js.encode_into(&mut buf[start..start + JOB_STATUS_STRIDE]);
        }
    }

    /// Unpacks an entry from `buf`, reconstructing `allowed_transfers`
    /// job-status slots.
    pub fn decode_from(buf: &[u8], allowed_transfers: usize) -> Self {
        let real_hostname1 = get_fixed_str(&buf[0..MAX_HOSTNAME_LENGTH]);
        let mut off = MAX_HOSTNAME_LENGTH;
        let has_secondary = buf[off] != 0;
        off += 1;
        let secondary_str = get_fixed_str(&buf[off..off + MAX_HOSTNAME_LENGTH]);
        let real_hostname2 = has_secondary.then_some(secondary_str);
        off += MAX_HOSTNAME_LENGTH;
        let protocol_options =
            ProtocolOptions::from_bits_truncate(u32::from_be_bytes(buf[off..off + 4].try_into().unwrap()));
        off += 4;
        let host_status =
            HostStatusFlags::from_bits_truncate(u32::from_be_bytes(buf[off..off + 4].try_into().unwrap()));
        off += 4;
        let host_toggle = buf[off];
        off += 1;
        off += 2; // allowed_transfers is caller-supplied, not trusted from the wire
        let error_counter = u32::from_be_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        let mut error_history = [0u32; ERROR_HISTORY_LENGTH];
        for v in error_history.iter_mut() {
            *v = u32::from_be_bytes(buf[off..off + 4].try_into().unwrap());
            off += 4;
        }
        let start_event_handle = i64::from_be_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let end_event_handle = i64::from_be_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let connections = u32::from_be_bytes(buf[off..off + 4].try_into().unwrap());
        off += 4;
        debug_assert_eq!(off, ENTRY_HEADER_STRIDE);
        let allowed_transfers = allowed_transfers.min(MAX_JOB_STATUS);
        let job_status = (0..allowed_transfers)
            .map(|i| {
                let start = ENTRY_HEADER_STRIDE + i * JOB_STATUS_STRIDE;
                JobStatus::decode_from(&buf[start..start + JOB_STATUS_STRIDE])
            })
            .collect();
        HostEntry {
            real_hostname1,
            real_hostname2,
            protocol_options,
            host_status,
            host_toggle,
            allowed_transfers,
            error_counter,
            error_history,
            start_event_handle,
            end_event_handle,
            connections,
            job_status,
            pinned_ip: None,
        }
    }
}

/// The memory-mapped view a worker attaches to for the lifetime of a run.
/// Backed by a plain file rather than `shm_open`, which is sufficient for
/// the advisory-lock coordination this worker needs (the scheduler and
/// sibling workers map the same path).
pub struct FsaView {
    mmap: MmapMut,
    file: std::fs::File,
}

impl FsaView {
    /// Attach to the FSA file at `path`, growing it to `min_len` bytes if
    /// it is smaller (first attach by any worker creates the file).
    pub fn attach(path: &Path, min_len: u64) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let cur_len = file.metadata()?.len();
        if cur_len < min_len {
            file.set_len(min_len)?;
        }
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(FsaView { mmap, file })
    }

    pub fn raw_fd(&self) -> std::os::unix::io::RawFd {
        self.file.as_raw_fd()
    }

    pub fn lock(&self, region: Region, entry_base: i64) -> io::Result<RegionLockGuard> {
        region_lock::lock_region(self.raw_fd(), region, entry_base)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    pub fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }

    /// Byte offset of the host entry at `pos` within the segment.
    pub fn entry_offset(pos: usize) -> i64 {
        (pos * ENTRY_STRIDE) as i64
    }

    /// Reads and decodes the host entry at `pos`. Callers take the
    /// relevant region lock(s) around the read/mutate/write cycle
    /// themselves (spec §5's fixed CON→EC→HS order).
    pub fn read_entry(&self, pos: usize, allowed_transfers: usize) -> HostEntry {
        let off = pos * ENTRY_STRIDE;
        HostEntry::decode_from(&self.mmap[off..off + ENTRY_STRIDE], allowed_transfers)
    }

    pub fn write_entry(&mut self, pos: usize, entry: &HostEntry) {
        let off = pos * ENTRY_STRIDE;
        entry.encode_into(&mut self.mmap[off..off + ENTRY_STRIDE]);
    }

    /// Raw pointer and length covering one job slot's bytes within the
    /// mapping, for [`crate::signals::install`] to zero on a fault signal.
    pub fn slot_raw_range(&mut self, pos: usize, slot_index: usize) -> (*mut u8, usize) {
        let entry_off = pos * ENTRY_STRIDE;
        let slot_off = entry_off + ENTRY_HEADER_STRIDE + slot_index * JOB_STATUS_STRIDE;
        (self.mmap[slot_off..].as_mut_ptr(), JOB_STATUS_STRIDE)
    }

    /// Raw pointer to the host entry's 4-byte `host_status` field, for
    /// [`crate::signals::install`] to OR `IS_FAULTY_VAR` into from the
    /// fault handler (spec §4.8).
    pub fn host_status_raw_ptr(&mut self, pos: usize) -> *mut u8 {
        let off = pos * ENTRY_STRIDE + HOST_STATUS_OFFSET;
        self.mmap[off..].as_mut_ptr()
    }
}

/// Read-only mapping of the Fileretrieve Status Area (FRA), the retrieval-job
/// analogue of the FSA (see GLOSSARY). The HTTP sender only ever reads it
/// (spec §4.1 "Maps the FSA and FRA"); no field of it currently drives this
/// worker's behavior, so attaching (or tolerating its absence) is the whole
/// of the mapping step.
pub struct FraView {
    mmap: Option<memmap2::Mmap>,
}

impl FraView {
    /// Attaches read-only to the FRA file at `path`. A missing or empty
    /// file is tolerated (hosts with no retrieval jobs configured may have
    /// none) rather than failing init.
    pub fn attach(path: &Path) -> io::Result<Self> {
        match OpenOptions::new().read(true).open(path) {
            Ok(file) => {
                if file.metadata()?.len() == 0 {
                    return Ok(FraView { mmap: None });
                }
                let mmap = unsafe { memmap2::Mmap::map(&file)? };
                Ok(FraView { mmap: Some(mmap) })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FraView { mmap: None }),
            Err(e) => Err(e),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_host_prefers_primary_when_no_secondary() {
        let h = HostEntry::new("primary.example".into(), None, 1);
        assert_eq!(h.resolve_host(true), ("primary.example", false));
        assert_eq!(h.resolve_host(false), ("primary.example", false));
    }

    #[test]
    fn resolve_host_toggles_to_secondary() {
        let mut h = HostEntry::new("primary.example".into(), Some("secondary.example".into()), 1);
        assert_eq!(h.resolve_host(false), ("primary.example", false));
        assert_eq!(h.resolve_host(true), ("secondary.example", true));
        h.host_toggle = 1;
        assert_eq!(h.resolve_host(false), ("secondary.example", true));
        assert_eq!(h.resolve_host(true), ("primary.example", false));
    }

    #[test]
    fn job_status_reset_clears_everything() {
        let mut js = JobStatus::default();
        js.no_of_files = 3;
        js.no_of_files_done = 3;
        js.bytes_send = 4096;
        js.reset();
        assert_eq!(js.no_of_files, 0);
        assert_eq!(js.bytes_send, 0);
    }

    #[test]
    fn shutdown_marker_detected_at_index_two() {
        let mut js = JobStatus::default();
        assert!(!js.is_shutdown_marker());
        js.unique_name[2] = 5;
        assert!(js.is_shutdown_marker());
    }

    #[test]
    fn attach_grows_file_to_minimum_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fsa");
        let view = FsaView::attach(&path, 4096).unwrap();
        assert_eq!(view.as_slice().len(), 4096);
    }

    #[test]
    fn host_entry_roundtrips_through_the_shared_layout() {
        let mut entry = HostEntry::new("primary.example".into(), Some("secondary.example".into()), 2);
        entry.error_counter = 3;
        entry.connections = 1;
        entry.job_status[0].no_of_files = 5;
        entry.job_status[0].file_name_in_use = "data.bin".into();
        entry.job_status[1].connect_status = ConnectStatus::NotWorking;

        let mut buf = vec![0u8; ENTRY_STRIDE];
        entry.encode_into(&mut buf);
        let decoded = HostEntry::decode_from(&buf, 2);

        assert_eq!(decoded.real_hostname1, "primary.example");
        assert_eq!(decoded.real_hostname2.as_deref(), Some("secondary.example"));
        assert_eq!(decoded.error_counter, 3);
        assert_eq!(decoded.job_status[0].no_of_files, 5);
        assert_eq!(decoded.job_status[0].file_name_in_use, "data.bin");
        assert_eq!(decoded.job_status[1].connect_status, ConnectStatus::NotWorking);
    }

    #[test]
    fn host_status_offset_matches_the_encoded_layout() {
        let mut entry = HostEntry::new("host.example".into(), None, 1);
        entry.host_status = HostStatusFlags::ERROR_OFFLINE;
        let mut buf = vec![0u8; ENTRY_STRIDE];
        entry.encode_into(&mut buf);
        let bits = u32::from_be_bytes(buf[HOST_STATUS_OFFSET..HOST_STATUS_OFFSET + 4].try_into().unwrap());
        assert_eq!(bits, HostStatusFlags::ERROR_OFFLINE.bits());
    }

    #[test]
    fn fra_view_tolerates_a_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let view = FraView::attach(&dir.path().join("fra_data")).unwrap();
        assert_eq!(view.as_slice(), &[] as &[u8]);
    }

    #[test]
    fn fra_view_maps_an_existing_file_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fra_data");
        std::fs::write(&path, b"fra-contents").unwrap();
        let view = FraView::attach(&path).unwrap();
        assert_eq!(view.as_slice(), b"fra-contents");
    }

    #[test]
    fn fsa_view_read_write_entry_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut view = FsaView::attach(&dir.path().join("fsa"), ENTRY_STRIDE as u64 * 4).unwrap();
        let mut entry = HostEntry::new("host.example".into(), None, 1);
        entry.job_status[0].bytes_send = 1024;
        view.write_entry(2, &entry);
        let roundtripped = view.read_entry(2, 1);
        assert_eq!(roundtripped.real_hostname1, "host.example");
        assert_eq!(roundtripped.job_status[0].bytes_send, 1024);
    }
}
