//! JSON-lines visit log.
//!
//! Saves are single appends under an exclusive advisory lock, readers take a
//! shared lock. Purging rewrites the file in place while holding the exclusive
//! lock, so appenders queued on the same file never write to a detached inode.

use super::{BlockedAccess, VisitStore};
use crate::error::{Result, WardenError};
use crate::record::TelemetryRecord;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const BLOCKED_LOG_NAME: &str = "blocked_access.jsonl";

#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    blocked_path: PathBuf,
}

impl FileStore {
    /// Open (and create parent directories for) the visit and blocked-access logs
    pub fn open(path: &Path, blocked_path: Option<&Path>) -> Result<Self> {
        let blocked_path = blocked_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.with_file_name(BLOCKED_LOG_NAME));

        for file in [path, blocked_path.as_path()] {
            if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            blocked_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn blocked_path(&self) -> &Path {
        &self.blocked_path
    }
}

fn lock_error(path: &Path, err: io::Error) -> WardenError {
    WardenError::Lock(format!("{}: {}", path.display(), err))
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    FileExt::lock_exclusive(&file).map_err(|e| lock_error(path, e))?;
    file.write_all(&line)?;
    file.flush()?;
    // lock released when `file` drops
    Ok(())
}

fn parse_lines<T: DeserializeOwned>(reader: impl BufRead, path: &Path) -> Result<Vec<T>> {
    let mut entries = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(
                path = %path.display(),
                line = index + 1,
                error = %e,
                "Skipping malformed log line"
            ),
        }
    }
    Ok(entries)
}

fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    FileExt::lock_shared(&file).map_err(|e| lock_error(path, e))?;
    parse_lines(BufReader::new(&file), path)
}

impl VisitStore for FileStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    fn save(&self, record: &TelemetryRecord) -> Result<()> {
        append_line(&self.path, record)
    }

    fn get_all(&self) -> Result<Vec<TelemetryRecord>> {
        read_lines(&self.path)
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut file = match OpenOptions::new().read(true).write(true).open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        FileExt::lock_exclusive(&file).map_err(|e| lock_error(&self.path, e))?;

        // lines that no longer parse are carried over untouched
        let mut contents = Vec::new();
        let mut kept = 0usize;
        let mut unparsed = 0usize;
        let mut removed = 0;
        for line in BufReader::new(&file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TelemetryRecord>(&line) {
                Ok(record) if record.timestamp < cutoff => {
                    removed += 1;
                    continue;
                }
                Ok(_) => kept += 1,
                Err(_) => unparsed += 1,
            }
            contents.extend_from_slice(line.as_bytes());
            contents.push(b'\n');
        }
        if removed == 0 {
            return Ok(0);
        }
        if unparsed > 0 {
            warn!(path = %self.path.display(), lines = unparsed, "Malformed log lines kept during compaction");
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&contents)?;
        file.sync_all()?;

        debug!(path = %self.path.display(), removed = removed, kept = kept, "Visit log compacted");
        Ok(removed)
    }

    fn log_blocked(&self, entry: &BlockedAccess) -> Result<()> {
        append_line(&self.blocked_path, entry)
    }

    fn blocked(&self) -> Result<Vec<BlockedAccess>> {
        read_lines(&self.blocked_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> FileStore {
        FileStore::open(&dir.join("logs").join("visitors_log.jsonl"), None).unwrap()
    }

    #[test]
    fn test_save_and_query() {
        let dir = tempdir().unwrap();
        testing::save_and_query(&store_in(dir.path()));
    }

    #[test]
    fn test_purge() {
        let dir = tempdir().unwrap();
        testing::purge(&store_in(dir.path()));
    }

    #[test]
    fn test_blocked_stream_defaults_next_to_visits() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        assert_eq!(
            store.blocked_path(),
            dir.path().join("logs").join("blocked_access.jsonl")
        );
        testing::blocked_stream(&store);
    }

    #[test]
    fn test_concurrent_saves_are_not_lost() {
        let dir = tempdir().unwrap();
        testing::concurrent_saves(Arc::new(store_in(dir.path())));
    }

    #[test]
    fn test_missing_log_reads_empty() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.get_all().unwrap().is_empty());
        assert_eq!(store.purge_before(Utc::now()).unwrap(), 0);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.save(&testing::record_at(0, "fp", "1.1.1.1")).unwrap();

        let mut file = OpenOptions::new().append(true).open(store.path()).unwrap();
        writeln!(file, "{{not json").unwrap();
        drop(file);
        store.save(&testing::record_at(0, "fp2", "1.1.1.1")).unwrap();

        let records = store.get_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].fingerprint, "fp2");
    }

    #[test]
    fn test_compaction_keeps_malformed_lines() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.save(&testing::record_at(7200, "old", "1.1.1.1")).unwrap();

        let mut file = OpenOptions::new().append(true).open(store.path()).unwrap();
        writeln!(file, "{{not json").unwrap();
        drop(file);
        store.save(&testing::record_at(0, "recent", "1.1.1.1")).unwrap();

        assert_eq!(store.purge_before(Utc::now() - chrono::Duration::hours(1)).unwrap(), 1);

        let contents = fs::read_to_string(store.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "{not json");
        let records = store.get_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fingerprint, "recent");
    }
}
