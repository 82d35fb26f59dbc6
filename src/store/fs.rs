//! Filesystem-backed record store
//!
//! Layout: `<root>/users/<id>.json` and `<root>/groups/<id>.json`, one file
//! per record. Writes go through a temporary sibling file and a rename, so
//! a record is either fully present or absent. `discover` re-reads the
//! directory on every call; it deliberately does not cache, because other
//! worker processes may be writing into the same root.

use crate::store::{EntityId, EntityType, Record, RecordStore, StoreError, StoreResult};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// File-per-record store rooted at a data directory
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Opens (and creates, if necessary) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        for entity in [EntityType::User, EntityType::Group] {
            fs::create_dir_all(root.join(entity.dir_name()))?;
        }
        Ok(Self { root })
    }

    /// Removes every persisted record, keeping the directory structure
    pub fn clear(&self) -> StoreResult<()> {
        for entity in [EntityType::User, EntityType::Group] {
            let dir = self.root.join(entity.dir_name());
            fs::remove_dir_all(&dir)?;
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    fn record_path(&self, entity: EntityType, id: EntityId) -> PathBuf {
        self.root.join(entity.dir_name()).join(format!("{}.json", id))
    }
}

impl RecordStore for FsStore {
    fn exists(&self, entity: EntityType, id: EntityId) -> bool {
        self.record_path(entity, id).is_file()
    }

    fn save(&self, entity: EntityType, id: EntityId, record: &Record) -> StoreResult<()> {
        let path = self.record_path(entity, id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(record)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(&self, entity: EntityType, id: EntityId) -> StoreResult<Record> {
        let path = self.record_path(entity, id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::Missing { entity, id });
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(record),
            Err(e) => {
                // Evict the damaged file so the id becomes fetchable again
                tracing::warn!("Evicting damaged record for {} {}: {}", entity, id, e);
                if let Err(rm) = fs::remove_file(&path) {
                    tracing::warn!("Failed to remove damaged record {}: {}", path.display(), rm);
                }
                Err(StoreError::Corrupt { entity, id })
            }
        }
    }

    fn discover(&self, entity: EntityType) -> StoreResult<HashSet<EntityId>> {
        let dir = self.root.join(entity.dir_name());
        let mut ids = HashSet::new();
        for dir_entry in fs::read_dir(&dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<EntityId>().ok())
            {
                ids.insert(id);
            }
        }
        Ok(ids)
    }
}
