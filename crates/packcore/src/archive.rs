//! Archive collaborators. Binary pack parsing lives outside the engine; a
//! store hands back already decoded entries.

use crate::table::Row;
use crate::ArchiveError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Archive {
    #[serde(default)]
    pub path: String,
    pub entries: Vec<ArchiveEntry>,
}

impl Archive {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            entries: Vec::new(),
        }
    }

    pub fn with_entry(mut self, name: impl Into<String>, data: EntryData) -> Self {
        self.upsert(ArchiveEntry {
            name: name.into(),
            data,
        });
        self
    }

    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Replaces an entry with the same name or appends a new one.
    pub fn upsert(&mut self, entry: ArchiveEntry) {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Display name of the archive (file name without directories).
    pub fn display_name(&self) -> &str {
        archive_name(&self.path)
    }
}

pub fn archive_name(path: &str) -> &str {
    path.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(path)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveEntry {
    pub name: String,
    pub data: EntryData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "format", content = "content", rename_all = "snake_case")]
pub enum EntryData {
    Table(DecodedTable),
    Text(String),
    Binary(Vec<u8>),
}

impl EntryData {
    /// Entry contents as text, if it is text or valid UTF-8 bytes.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EntryData::Text(s) => Some(s),
            EntryData::Binary(bytes) => std::str::from_utf8(bytes).ok(),
            EntryData::Table(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DecodedTable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Read/write access to archives. Reads happen from many nodes, writes only
/// from save nodes.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn read_archive(&self, path: &str) -> Result<Archive, ArchiveError>;

    /// Upserts `entries` into the archive at `path`, creating it if needed.
    async fn write_entries(&self, path: &str, entries: Vec<ArchiveEntry>) -> Result<(), ArchiveError>;
}

/// Archive store kept entirely in memory.
#[derive(Default)]
pub struct MemoryArchiveStore {
    archives: RwLock<HashMap<String, Archive>>,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, archive: Archive) {
        self.archives
            .write()
            .await
            .insert(archive.path.clone(), archive);
    }

    pub async fn get(&self, path: &str) -> Option<Archive> {
        self.archives.read().await.get(path).cloned()
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn read_archive(&self, path: &str) -> Result<Archive, ArchiveError> {
        self.get(path)
            .await
            .ok_or_else(|| ArchiveError::NotFound(path.to_string()))
    }

    async fn write_entries(&self, path: &str, entries: Vec<ArchiveEntry>) -> Result<(), ArchiveError> {
        let mut archives = self.archives.write().await;
        let archive = archives
            .entry(path.to_string())
            .or_insert_with(|| Archive::new(path));
        for entry in entries {
            archive.upsert(entry);
        }
        Ok(())
    }
}

/// Archive store over JSON documents on disk, one file per archive.
/// Relative paths resolve against `root`.
pub struct JsonArchiveStore {
    root: PathBuf,
}

impl JsonArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

#[async_trait]
impl ArchiveStore for JsonArchiveStore {
    async fn read_archive(&self, path: &str) -> Result<Archive, ArchiveError> {
        let file = self.resolve(path);
        let text = match tokio::fs::read_to_string(&file).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArchiveError::NotFound(file.display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut archive: Archive = serde_json::from_str(&text)
            .map_err(|e| ArchiveError::Format(format!("{}: {}", file.display(), e)))?;
        archive.path = path.to_string();
        Ok(archive)
    }

    async fn write_entries(&self, path: &str, entries: Vec<ArchiveEntry>) -> Result<(), ArchiveError> {
        let mut archive = match self.read_archive(path).await {
            Ok(archive) => archive,
            Err(ArchiveError::NotFound(_)) => Archive::new(path),
            Err(e) => return Err(e),
        };
        for entry in entries {
            archive.upsert(entry);
        }
        let file = self.resolve(path);
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&archive)
            .map_err(|e| ArchiveError::Format(e.to_string()))?;
        tokio::fs::write(&file, json).await?;
        tracing::debug!("Wrote archive {}", file.display());
        Ok(())
    }
}

/// One async lock per archive path; writers to the same archive take turns.
#[derive(Default)]
pub struct ArchiveLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ArchiveLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, path: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Entries only the map still references are idle.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Number of archives with a live lock handle.
    pub fn len(&self) -> usize {
        match self.locks.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
