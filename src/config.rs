//! Reads the one directive this binary cares about from the shared
//! `AFD_CONFIG` file, and resolves the fixed set of `work_dir`-relative
//! paths every other module needs (spec §6). `HOST_CONFIG` itself is
//! owned by the admin tool and stays untouched.

use std::path::{Path, PathBuf};

/// The subset of `AFD_CONFIG` this worker reads. Parsed with the same
/// permissive line-oriented key/value scanner used for the message file's
/// `[options]` section (see `crate::job::MessageFile::parse`), not a
/// separate parser.
#[derive(Debug, Clone, Default)]
pub struct AfdConfig {
    pub show_log_priority: Option<String>,
}

impl AfdConfig {
    pub fn parse(contents: &str) -> Self {
        let mut show_log_priority = None;
        for raw_line in contents.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let key = parts.next().unwrap_or("");
            let value = parts.next().unwrap_or("").trim();
            if key == "SHOW_LOG_PRIORITY" {
                show_log_priority = Some(value.to_string());
            }
        }
        AfdConfig { show_log_priority }
    }

    /// Reads `<work_dir>/etc/AFD_CONFIG`. A missing file is not an error —
    /// the directive is optional — but a present, unreadable file is
    /// reported so the caller can decide whether to treat it as fatal.
    pub fn load(work_dir: &Path) -> std::io::Result<Self> {
        let path = work_dir.join("etc").join("AFD_CONFIG");
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AfdConfig::default()),
            Err(e) => Err(e),
        }
    }
}

/// The fixed set of paths this worker touches under `work_dir` (spec §6).
#[derive(Debug, Clone)]
pub struct WorkDirLayout {
    pub work_dir: PathBuf,
}

impl WorkDirLayout {
    pub fn new(work_dir: PathBuf) -> Self {
        WorkDirLayout { work_dir }
    }

    pub fn etc_dir(&self) -> PathBuf {
        self.work_dir.join("etc")
    }

    pub fn fifo_dir(&self) -> PathBuf {
        self.work_dir.join("fifodir")
    }

    pub fn file_dir(&self, job_path: &str) -> PathBuf {
        self.work_dir.join("filedir").join(job_path)
    }

    pub fn counter_dir(&self) -> PathBuf {
        self.work_dir.join("counter")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.work_dir.join("archive")
    }

    pub fn fsa_path(&self) -> PathBuf {
        self.work_dir.join("fsa_data")
    }

    pub fn fra_path(&self) -> PathBuf {
        self.work_dir.join("fra_data")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_show_log_priority_directive() {
        let cfg = AfdConfig::parse("# comment\nSHOW_LOG_PRIORITY yes\nOTHER_DIRECTIVE foo\n");
        assert_eq!(cfg.show_log_priority.as_deref(), Some("yes"));
    }

    #[test]
    fn missing_directive_is_none() {
        let cfg = AfdConfig::parse("OTHER_DIRECTIVE foo\n");
        assert_eq!(cfg.show_log_priority, None);
    }

    #[test]
    fn load_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AfdConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.show_log_priority, None);
    }

    #[test]
    fn load_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("etc")).unwrap();
        std::fs::write(dir.path().join("etc").join("AFD_CONFIG"), "SHOW_LOG_PRIORITY yes\n").unwrap();
        let cfg = AfdConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.show_log_priority.as_deref(), Some("yes"));
    }

    #[test]
    fn layout_paths_are_work_dir_relative() {
        let layout = WorkDirLayout::new(PathBuf::from("/afd"));
        assert_eq!(layout.etc_dir(), PathBuf::from("/afd/etc"));
        assert_eq!(layout.fifo_dir(), PathBuf::from("/afd/fifodir"));
        assert_eq!(layout.file_dir("job42"), PathBuf::from("/afd/filedir/job42"));
        assert_eq!(layout.fra_path(), PathBuf::from("/afd/fra_data"));
    }
}
