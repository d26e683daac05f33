//! Post-send disposition of a sent file: archive it, or delete it with
//! retry-on-EBUSY (spec §4.6 step 11). `archive_file` owns its own
//! atomicity, the way spec §5 describes the archive directory's ownership
//! split with the archiver process: create-if-absent, then rename into
//! place so a half-written archive entry never appears as complete.

use std::path::{Path, PathBuf};
use std::time::Duration;

const UNLINK_MAX_RETRIES: u32 = 20;
const UNLINK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Moves `source` into `archive_dir/<unique_subdir>/<filename>`, creating
/// the destination directory if needed. Returns the archive-relative name
/// used in the output log record, or `None` if archiving is disabled for
/// this job (`archive_time == 0`).
pub fn archive_file(
    source: &Path,
    archive_dir: &Path,
    unique_subdir: &str,
) -> std::io::Result<PathBuf> {
    let dest_dir = archive_dir.join(unique_subdir);
    std::fs::create_dir_all(&dest_dir)?;
    let filename = source.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "source has no file name")
    })?;
    let dest = dest_dir.join(filename);
    // rename is atomic within a filesystem; this never leaves a partially
    // written entry visible under `dest`.
    std::fs::rename(source, &dest)?;
    Ok(dest)
}

/// Unlinks `path`, retrying on `EBUSY` up to [`UNLINK_MAX_RETRIES`] times
/// with a 100ms delay between attempts (spec §8 "Unlink-with-retry").
pub fn unlink_with_retry(path: &Path) -> std::io::Result<()> {
    let mut attempts = 0;
    loop {
        match std::fs::remove_file(path) {
            Ok(()) => return Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) && attempts < UNLINK_MAX_RETRIES => {
                attempts += 1;
                std::thread::sleep(UNLINK_RETRY_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn archive_moves_file_into_subdir() {
        let src_dir = tempfile::tempdir().unwrap();
        let archive_dir = tempfile::tempdir().unwrap();
        let src = src_dir.path().join("data.bin");
        std::fs::File::create(&src).unwrap().write_all(b"hello").unwrap();

        let dest = archive_file(&src, archive_dir.path(), "job42").unwrap();
        assert!(!src.exists());
        assert!(dest.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
    }

    #[test]
    fn unlink_removes_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.bin");
        std::fs::File::create(&path).unwrap();
        unlink_with_retry(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn unlink_missing_file_errors_without_retrying_forever() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never_existed.bin");
        let err = unlink_with_retry(&path).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
