//! Advisory byte-range locks on the shared status segment, scoped to a
//! guard value so release happens on every exit path (panics included,
//! since the guard's `Drop` runs during unwinding too).
//!
//! The three regions a worker ever takes are fixed offsets within the FSA
//! file: connection counters (`Con`), the error counter and its history
//! ring (`Ec`), and host status flags (`Hs`). Callers must acquire them in
//! that order — `Con` before `Ec` before `Hs` — to match the fixed global
//! order every sibling worker follows; nothing in this module enforces the
//! order itself, callers just never need to hold more than one at a time.

use std::io;
use std::os::unix::io::RawFd;

/// One of the three lockable regions of an FSA host entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Con,
    Ec,
    Hs,
}

impl Region {
    /// Byte offset and length of this region relative to the start of a
    /// host entry. Layout is a worker-internal convention, not an on-disk
    /// format shared with other tools.
    fn range(self, entry_base: i64) -> (i64, i64) {
        match self {
            Region::Con => (entry_base, 8),
            Region::Ec => (entry_base + 8, 8),
            Region::Hs => (entry_base + 16, 8),
        }
    }
}

/// An acquired advisory lock. Unlocks on drop; the unlock result is not
/// observable (mirrors `close`'s "nothing useful to do with an error here"
/// pattern), but a failed unlock is logged at debug level by the caller if
/// it cares by checking `Drop`'s side effect through the fd directly.
pub struct RegionLockGuard {
    fd: RawFd,
    offset: i64,
    len: i64,
}

impl Drop for RegionLockGuard {
    fn drop(&mut self) {
        let _ = set_lock(self.fd, libc::F_UNLCK, self.offset, self.len);
    }
}

/// Acquire `region` on `fd`, blocking until available (`F_SETLKW`).
pub fn lock_region(fd: RawFd, region: Region, entry_base: i64) -> io::Result<RegionLockGuard> {
    let (offset, len) = region.range(entry_base);
    set_lock(fd, libc::F_WRLCK, offset, len)?;
    Ok(RegionLockGuard { fd, offset, len })
}

fn set_lock(fd: RawFd, lock_type: i32, offset: i64, len: i64) -> io::Result<()> {
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = lock_type as i16;
    fl.l_whence = libc::SEEK_SET as i16;
    fl.l_start = offset;
    fl.l_len = len;
    let rc = unsafe { libc::fcntl(fd, libc::F_SETLKW, &fl) };
    if rc == -1 { Err(io::Error::last_os_error()) } else { Ok(()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;

    fn scratch_file() -> std::fs::File {
        let mut f = tempfile::tempfile().expect("tempfile");
        f.write_all(&[0u8; 64]).unwrap();
        f
    }

    #[test]
    fn con_then_ec_then_hs_do_not_overlap() {
        let f = scratch_file();
        let fd = f.as_raw_fd();
        let con = lock_region(fd, Region::Con, 0).unwrap();
        let ec = lock_region(fd, Region::Ec, 0).unwrap();
        let hs = lock_region(fd, Region::Hs, 0).unwrap();
        drop(hs);
        drop(ec);
        drop(con);
    }

    #[test]
    fn guard_release_allows_reacquire() {
        let f = scratch_file();
        let fd = f.as_raw_fd();
        {
            let _g = lock_region(fd, Region::Con, 0).unwrap();
        }
        let _g2 = lock_region(fd, Region::Con, 0).unwrap();
    }
}
