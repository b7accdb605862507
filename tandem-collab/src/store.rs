//! Client-local persistence of the participant id granted per room.
//!
//! This is the only state that survives a restart. Keys follow
//! `collab:<roomId>:participantId`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Storage key for a room's participant id.
pub fn participant_key(room_id: &str) -> String {
    format!("collab:{room_id}:participantId")
}

/// Key-value store for remembered participant ids.
pub trait ParticipantStore {
    fn load(&self, room_id: &str) -> Result<Option<String>, StoreError>;
    fn save(&mut self, room_id: &str, participant_id: &str) -> Result<(), StoreError>;
    fn forget(&mut self, room_id: &str) -> Result<(), StoreError>;
}

/// In-process store; forgets everything on drop.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value under a full key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

impl ParticipantStore for MemoryStore {
    fn load(&self, room_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(&participant_key(room_id)).cloned())
    }

    fn save(&mut self, room_id: &str, participant_id: &str) -> Result<(), StoreError> {
        self.entries
            .insert(participant_key(room_id), participant_id.to_string());
        Ok(())
    }

    fn forget(&mut self, room_id: &str) -> Result<(), StoreError> {
        self.entries.remove(&participant_key(room_id));
        Ok(())
    }
}

/// JSON object file mapping keys to participant ids.
///
/// The whole map is rewritten on every save through a sibling temp file
/// and a rename, so a crash mid-write leaves the previous file intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ParticipantStore for FileStore {
    fn load(&self, room_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.remove(&participant_key(room_id)))
    }

    fn save(&mut self, room_id: &str, participant_id: &str) -> Result<(), StoreError> {
        let mut entries = self.read_all()?;
        entries.insert(participant_key(room_id), participant_id.to_string());
        self.write_all(&entries)
    }

    fn forget(&mut self, room_id: &str) -> Result<(), StoreError> {
        let mut entries = self.read_all()?;
        if entries.remove(&participant_key(room_id)).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}

impl<S: ParticipantStore + ?Sized> ParticipantStore for Box<S> {
    fn load(&self, room_id: &str) -> Result<Option<String>, StoreError> {
        (**self).load(room_id)
    }

    fn save(&mut self, room_id: &str, participant_id: &str) -> Result<(), StoreError> {
        (**self).save(room_id, participant_id)
    }

    fn forget(&mut self, room_id: &str) -> Result<(), StoreError> {
        (**self).forget(room_id)
    }
}
