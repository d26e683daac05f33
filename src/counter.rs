//! The persistent 3-digit WMO bulletin sequence counter, keyed by
//! `<host_alias>.<port>` and shared with sibling workers via an
//! advisory-locked file (spec §4.3). Unlike the FSA, this file has no
//! concurrent readers of unrelated regions, so a whole-file lock via `fs2`
//! is sufficient — no need for the byte-range machinery in
//! [`crate::region_lock`].

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const MAX_WMO_COUNTER: u32 = 1000;

pub struct CounterFile {
    file: File,
    path: PathBuf,
}

impl CounterFile {
    /// Opens (creating if absent) `<counter_dir>/<host_alias>.<port>`.
    pub fn open(counter_dir: &Path, host_alias: &str, port: u16) -> std::io::Result<Self> {
        let path = counter_dir.join(format!("{host_alias}.{port}"));
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        Ok(CounterFile { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the next sequence value in `[0, MAX_WMO_COUNTER)`, wrapping
    /// on overflow, persisting the new value before releasing the lock.
    pub fn next(&mut self) -> std::io::Result<u32> {
        self.file.lock_exclusive()?;
        let result = (|| {
            self.file.seek(SeekFrom::Start(0))?;
            let mut buf = String::new();
            self.file.read_to_string(&mut buf)?;
            let current: u32 = buf.trim().parse().unwrap_or(0);
            let next = (current + 1) % MAX_WMO_COUNTER;
            self.file.set_len(0)?;
            self.file.seek(SeekFrom::Start(0))?;
            write!(self.file, "{next}")?;
            self.file.flush()?;
            Ok(next)
        })();
        let _ = self.file.unlock();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_one_on_fresh_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = CounterFile::open(dir.path(), "host1", 80).unwrap();
        assert_eq!(c.next().unwrap(), 1);
        assert_eq!(c.next().unwrap(), 2);
    }

    #[test]
    fn wraps_at_max() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = CounterFile::open(dir.path(), "host1", 80).unwrap();
        for _ in 0..(MAX_WMO_COUNTER - 1) {
            c.next().unwrap();
        }
        assert_eq!(c.next().unwrap(), 0);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut c = CounterFile::open(dir.path(), "host1", 80).unwrap();
            c.next().unwrap();
            c.next().unwrap();
        }
        let mut c2 = CounterFile::open(dir.path(), "host1", 80).unwrap();
        assert_eq!(c2.next().unwrap(), 3);
    }
}
