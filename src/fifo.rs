//! The one-byte wake-up signal to the supervising scheduler (spec §4.6),
//! written to `<work_dir>/<fifo_dir>/FD_WAKE_UP_FIFO`. Failures here are
//! non-fatal warnings — the scheduler will notice the work on its own poll
//! cycle even if the wake-up is missed.

use std::io::Write;
use std::path::Path;

pub const FD_WAKE_UP_FIFO: &str = "FD_WAKE_UP_FIFO";

/// Opens the fifo for write, writes one byte, closes it. Logs via the
/// caller's tracing span on failure rather than propagating an error —
/// spec §4.6 explicitly treats this as a non-fatal warning.
pub fn wake_scheduler(fifo_dir: &Path) -> std::io::Result<()> {
    let path = fifo_dir.join(FD_WAKE_UP_FIFO);
    let mut f = std::fs::OpenOptions::new().write(true).open(path)?;
    f.write_all(&[0u8])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_scheduler_writes_one_byte_to_a_regular_file() {
        // FIFOs require `mkfifo`, unavailable portably in a unit test; a
        // regular file exercises the same open/write/close path.
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join(FD_WAKE_UP_FIFO)).unwrap();
        wake_scheduler(dir.path()).unwrap();
        let contents = std::fs::read(dir.path().join(FD_WAKE_UP_FIFO)).unwrap();
        assert_eq!(contents, vec![0u8]);
    }

    #[test]
    fn wake_scheduler_missing_fifo_is_an_error_callers_can_ignore() {
        let dir = tempfile::tempdir().unwrap();
        assert!(wake_scheduler(dir.path()).is_err());
    }
}
