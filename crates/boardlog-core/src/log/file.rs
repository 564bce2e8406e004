//! File-backed action log for native platforms.

use super::{ActionLog, LogError, LogResult, slice_range};
use crate::action::{Action, LoggedAction};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Durable action log.
///
/// Stores one JSON object per line in `<dir>/<session>.jsonl`. An append is
/// acknowledged only after the line has been flushed to disk; a failed append
/// is rolled back so the file never holds a line the log did not count.
pub struct FileActionLog {
    path: PathBuf,
    file: File,
    entries: Vec<LoggedAction>,
    /// Set when a failed append could not be rolled back.
    broken: bool,
}

impl FileActionLog {
    /// Open (or create) the log for `session_id` inside `dir`.
    ///
    /// Creates the directory if it doesn't exist.
    pub fn open(dir: &Path, session_id: &str) -> LogResult<Self> {
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| {
                LogError::Unavailable(format!("Failed to create log directory: {}", e))
            })?;
        }
        Self::open_file(Self::path_for(dir, session_id))
    }

    /// Open the log in the default location.
    ///
    /// On Unix: `~/.local/share/boardlog/sessions/`
    pub fn default_location(session_id: &str) -> LogResult<Self> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| LogError::Unavailable("Could not determine home directory".to_string()))?;
        Self::open(&base.join("boardlog").join("sessions"), session_id)
    }

    /// Where the log for `session_id` lives inside `dir`.
    pub fn path_for(dir: &Path, session_id: &str) -> PathBuf {
        dir.join(format!("{}.jsonl", file_stem(session_id)))
    }

    /// Entries stored for `session_id`, without creating anything on disk.
    pub fn read_existing(dir: &Path, session_id: &str) -> LogResult<Vec<LoggedAction>> {
        let path = Self::path_for(dir, session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Self::read_file(&path)
    }

    /// Entries of the log file at `path`, read without modifying it.
    pub fn read_file(path: &Path) -> LogResult<Vec<LoggedAction>> {
        Ok(read_entries(path)?.0)
    }

    /// Open a log file at an explicit path, loading any existing entries.
    ///
    /// An incomplete last line left by an interrupted write is cut off.
    pub fn open_file(path: PathBuf) -> LogResult<Self> {
        let (entries, intact) = if path.exists() {
            read_entries(&path)?
        } else {
            (Vec::new(), 0)
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() > intact {
            log::warn!("Truncating torn write at the end of {}", path.display());
            file.set_len(intact)?;
        }
        log::debug!("Opened action log {} ({} entries)", path.display(), entries.len());
        Ok(Self {
            path,
            file,
            entries,
            broken: false,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Keep `[a-z0-9-]` and escape every other byte as `_xx`.
///
/// The mapping is injective and yields names that differ even on
/// case-insensitive file systems.
fn file_stem(id: &str) -> String {
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("_{:02x}", byte));
        }
    }
    stem
}

/// Parse every complete line. Returns the entries and the byte length they span.
fn read_entries(path: &Path) -> LogResult<(Vec<LoggedAction>, u64)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    let mut intact = 0u64;
    let mut line = String::new();
    let mut number = 0;
    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        number += 1;
        if !line.ends_with('\n') {
            log::warn!("Ignoring incomplete line {} of {}", number, path.display());
            break;
        }
        intact += read as u64;
        if line.trim().is_empty() {
            continue;
        }
        let entry: LoggedAction = serde_json::from_str(&line).map_err(|e| LogError::Corrupt {
            line: number,
            reason: e.to_string(),
        })?;
        let expected = entries.len() as u64 + 1;
        if entry.sequence != expected {
            return Err(LogError::Corrupt {
                line: number,
                reason: format!("expected sequence {}, found {}", expected, entry.sequence),
            });
        }
        entries.push(entry);
    }
    Ok((entries, intact))
}

fn write_durably(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes)?;
    file.sync_data()
}

impl ActionLog for FileActionLog {
    fn append(&mut self, action: Action) -> LogResult<u64> {
        if self.broken {
            return Err(LogError::Unavailable(format!(
                "{} needs to be reopened after a failed write",
                self.path.display()
            )));
        }
        action.validate()?;
        let entry = LoggedAction::new(self.entries.len() as u64 + 1, action);
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let offset = self.file.metadata()?.len();
        if let Err(e) = write_durably(&mut self.file, line.as_bytes()) {
            if let Err(rollback) = self.file.set_len(offset) {
                log::error!("Could not roll back {}: {}", self.path.display(), rollback);
                self.broken = true;
            }
            return Err(LogError::Unavailable(format!(
                "Failed to write {}: {}",
                self.path.display(),
                e
            )));
        }

        let sequence = entry.sequence;
        self.entries.push(entry);
        Ok(sequence)
    }

    fn range(&self, from_seq: u64, to_seq: u64) -> LogResult<Vec<LoggedAction>> {
        Ok(slice_range(&self.entries, from_seq, to_seq))
    }

    fn len(&self) -> u64 {
        self.entries.len() as u64
    }
}
