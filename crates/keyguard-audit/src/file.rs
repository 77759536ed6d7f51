//! Append-only JSON-lines audit file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::record::AccessRecord;
use crate::sink::AuditSink;

/// Writes one JSON object per line to a file opened in append mode.
///
/// Each line, newline included, is serialized into a buffer first and then
/// handed to the file in a single `write_all` while the sink's lock is held,
/// so concurrent writers never interleave partial records.
pub struct JsonLinesAuditSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesAuditSink {
    /// Opens (or creates) the audit file at `path` for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), "opened audit file");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Returns the path of the audit file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonLinesAuditSink {
    fn append(&self, record: &AccessRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for JsonLinesAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesAuditSink")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DenialReason;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn read_records(path: &Path) -> Vec<AccessRecord> {
        let content = std::fs::read_to_string(path).expect("read audit file");
        content
            .lines()
            .map(|line| serde_json::from_str(line).expect("each line is one record"))
            .collect()
    }

    #[test]
    fn writes_one_line_per_record() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        let sink = JsonLinesAuditSink::open(&path).expect("open");

        sink.append(&AccessRecord::denied("wallet1", "bob", DenialReason::UnauthorizedCaller))
            .expect("append");
        sink.append(&AccessRecord::reset("wallet1", "keyguard"))
            .expect("append");

        let records = read_records(&path);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].caller, "bob");
        assert_eq!(records[1].caller, "keyguard");
    }

    #[test]
    fn reopening_appends_instead_of_truncating() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("audit.jsonl");

        {
            let sink = JsonLinesAuditSink::open(&path).expect("open");
            sink.append(&AccessRecord::reset("first", "keyguard"))
                .expect("append");
        }
        {
            let sink = JsonLinesAuditSink::open(&path).expect("reopen");
            sink.append(&AccessRecord::reset("second", "keyguard"))
                .expect("append");
        }

        let ids: Vec<String> = read_records(&path)
            .into_iter()
            .map(|r| r.identifier)
            .collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn concurrent_writers_never_interleave() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("audit.jsonl");
        let sink = Arc::new(JsonLinesAuditSink::open(&path).expect("open"));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let record = AccessRecord::denied(
                            format!("wallet-{t}-{i}"),
                            format!("caller-{t}"),
                            DenialReason::NotFound,
                        );
                        sink.append(&record).expect("append");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("writer thread");
        }

        assert_eq!(read_records(&path).len(), 400);
    }

    #[test]
    fn open_fails_for_missing_directory() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("missing").join("audit.jsonl");
        assert!(JsonLinesAuditSink::open(path).is_err());
    }
}
