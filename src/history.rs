//! Local transcription history
//!
//! Past transcriptions are kept as a single JSON array behind a small
//! backend trait: a file in the user data directory in production, an
//! in-memory slot in tests. The store is strictly best-effort; every
//! backend failure is logged and degraded to an empty read or a dropped
//! write so persistence can never take down a transcription run.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use directories::ProjectDirs;
use jiff::{Timestamp, ToSpan, Zoned, civil::Date};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::TranscriptionResult;

/// Most records the store will hold; older entries fall off the tail
pub const MAX_HISTORY: usize = 50;

/// Records older than this are dropped by [`HistoryStore::cleanup`]
pub const RETENTION_DAYS: i64 = 30;

const STORAGE_FILE: &str = "history.json";

/// A stored transcription.
///
/// `id` is the save-time millisecond timestamp and `date` the save date,
/// regardless of what the service reported; the remaining fields carry
/// the [`TranscriptionResult`] through unchanged. Serialized camelCase
/// to match the wire format of the result it wraps.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionRecord {
    pub id: i64,
    pub text: String,
    pub file_name: String,
    pub duration: String,
    pub file_size: String,
    pub date: String,
}

impl TranscriptionRecord {
    /// Short excerpt of the transcript for list output
    pub fn preview(&self) -> String {
        if self.text.chars().count() > 100 {
            let head: String = self.text.chars().take(100).collect();
            format!("{}...", head)
        } else {
            self.text.clone()
        }
    }
}

/// Backing storage for the history list: one opaque string slot
pub trait HistoryBackend {
    /// Read the raw stored payload, `None` when nothing was stored yet
    fn load(&self) -> Result<Option<String>>;
    /// Replace the stored payload
    fn store(&self, data: &str) -> Result<()>;
}

/// Durable backend: a JSON file under the user's data directory
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new() -> Result<Self> {
        let project_dirs = ProjectDirs::from("com", "lumina", "lumina")
            .ok_or_else(|| anyhow!("Failed to get project directories"))?;

        let data_dir = project_dirs.data_dir();
        fs::create_dir_all(data_dir)?;

        Ok(Self {
            path: data_dir.join(STORAGE_FILE),
        })
    }

    /// Backend at an explicit path, for tests and custom setups
    #[allow(dead_code)]
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }
}

impl HistoryBackend for FileBackend {
    fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(&self.path)?))
    }

    fn store(&self, data: &str) -> Result<()> {
        fs::write(&self.path, data)?;
        Ok(())
    }
}

/// Volatile backend used by tests
#[cfg(test)]
#[derive(Default)]
pub struct MemoryBackend {
    data: std::sync::Mutex<Option<String>>,
}

#[cfg(test)]
impl HistoryBackend for MemoryBackend {
    fn load(&self) -> Result<Option<String>> {
        let guard = self
            .data
            .lock()
            .map_err(|_| anyhow!("memory backend poisoned"))?;
        Ok(guard.clone())
    }

    fn store(&self, data: &str) -> Result<()> {
        let mut guard = self
            .data
            .lock()
            .map_err(|_| anyhow!("memory backend poisoned"))?;
        *guard = Some(data.to_string());
        Ok(())
    }
}

/// Capped, most-recent-first transcription history over a backend
pub struct HistoryStore<B: HistoryBackend> {
    backend: B,
}

impl<B: HistoryBackend> HistoryStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Persist a transcription result as a new record.
    ///
    /// Assigns a fresh id, stamps today's date, prepends, and truncates
    /// the list to [`MAX_HISTORY`]. Returns the record even when the
    /// write itself failed; persistence is best-effort.
    pub fn save(&self, result: &TranscriptionResult) -> TranscriptionRecord {
        let mut records = self.list();

        let mut id = Timestamp::now().as_millisecond();
        // Two saves can land in the same millisecond; keep ids unique
        // and descending from the head of the list.
        if let Some(newest) = records.first()
            && id <= newest.id
        {
            id = newest.id + 1;
        }

        let record = TranscriptionRecord {
            id,
            text: result.text.clone(),
            file_name: result.file_name.clone(),
            duration: result.duration.clone(),
            file_size: result.file_size.clone(),
            date: today(),
        };

        records.insert(0, record.clone());
        records.truncate(MAX_HISTORY);
        self.persist(&records);

        record
    }

    /// All stored records, most recent first.
    ///
    /// A missing or unreadable store and corrupt JSON all come back as
    /// an empty list.
    pub fn list(&self) -> Vec<TranscriptionRecord> {
        match self.backend.load() {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "history is corrupt, treating as empty");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "failed to load history");
                Vec::new()
            }
        }
    }

    /// Remove the record with the given id. Returns whether anything was
    /// removed; a missing id is a no-op.
    pub fn delete(&self, id: i64) -> bool {
        let mut records = self.list();
        let before = records.len();
        records.retain(|r| r.id != id);

        if records.len() == before {
            return false;
        }
        self.persist(&records);
        true
    }

    /// Case-insensitive substring search over file name and transcript
    /// text, stored order preserved. An empty query matches everything.
    pub fn search(&self, query: &str) -> Vec<TranscriptionRecord> {
        let needle = query.to_lowercase();
        self.list()
            .into_iter()
            .filter(|r| {
                r.file_name.to_lowercase().contains(&needle)
                    || r.text.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Drop records whose save date is more than [`RETENTION_DAYS`] days
    /// in the past. A record exactly at the boundary is kept, as is any
    /// record whose date no longer parses. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let records = self.list();

        let Some(cutoff) = cutoff_date() else {
            return 0;
        };

        let kept: Vec<TranscriptionRecord> = records
            .iter()
            .filter(|r| match r.date.parse::<Date>() {
                Ok(date) => date >= cutoff,
                Err(_) => true,
            })
            .cloned()
            .collect();

        let removed = records.len() - kept.len();
        if removed > 0 {
            self.persist(&kept);
        }
        removed
    }

    /// Remove every stored record
    pub fn clear(&self) {
        self.persist(&[]);
    }

    /// Write the full history to `transcriptions-<date>.json` in `dir`.
    ///
    /// Unlike background persistence this is an explicit user action, so
    /// I/O failures propagate.
    pub fn export_all(&self, dir: &Path) -> Result<PathBuf> {
        let records = self.list();
        let path = dir.join(format!("transcriptions-{}.json", today()));
        let json = serde_json::to_string_pretty(&records)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    fn persist(&self, records: &[TranscriptionRecord]) {
        match serde_json::to_string(records) {
            Ok(raw) => {
                if let Err(e) = self.backend.store(&raw) {
                    warn!(error = %e, "failed to persist history");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize history"),
        }
    }
}

/// Today's date as `YYYY-MM-DD`
fn today() -> String {
    Zoned::now().strftime("%Y-%m-%d").to_string()
}

/// Oldest save date that survives cleanup
fn cutoff_date() -> Option<Date> {
    Zoned::now().date().checked_sub(RETENTION_DAYS.days()).ok()
}
