//! JSON-file identity store.
//!
//! Layout: `{ "people": [ { name, relation, notes, image, embedding, registered_at } ] }`.
//! Reference images live next to it as `<uuid>.jpg` in the image directory.

use chrono::{DateTime, Utc};
use memora_core::store::{IdentityStore, NewIdentity, StoreError};
use memora_core::{Embedding, KnownIdentity};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    people: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersonRecord {
    name: String,
    #[serde(default)]
    relation: String,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    image: Option<String>,
    embedding: Vec<f32>,
    #[serde(default)]
    registered_at: Option<DateTime<Utc>>,
}

impl PersonRecord {
    fn into_identity(self) -> Option<KnownIdentity> {
        if self.name.trim().is_empty()
            || self.embedding.is_empty()
            || self.embedding.iter().any(|v| !v.is_finite())
        {
            return None;
        }
        Some(KnownIdentity {
            name: self.name,
            relation: self.relation,
            notes: self.notes,
            embedding: Embedding::new(self.embedding),
            reference_path: self.image.filter(|p| !p.is_empty()),
        })
    }
}

pub struct JsonIdentityStore {
    path: PathBuf,
    image_dir: PathBuf,
    /// Serialises read-modify-write cycles on the file.
    write_lock: Mutex<()>,
}

impl JsonIdentityStore {
    /// Open the store at `path`, creating an empty one if it does not exist.
    pub fn open(path: &Path, image_dir: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self {
            path: path.to_path_buf(),
            image_dir: image_dir.to_path_buf(),
            write_lock: Mutex::new(()),
        };
        if !path.exists() {
            store.write_file(&StoreFile::default())?;
            tracing::info!(path = %path.display(), "created empty identity store");
        }
        Ok(store)
    }

    fn read_file(&self) -> Result<StoreFile, StoreError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoreFile::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display())))
    }

    /// Write via a sibling temp file and rename, so readers never see a partial file.
    fn write_file(&self, file: &StoreFile) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(file)
            .map_err(|e| StoreError::Backend(format!("serialize store: {e}")))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Save the reference image; `None` if it could not be written.
    fn save_image(&self, image: &image::RgbImage) -> Option<String> {
        if let Err(e) = std::fs::create_dir_all(&self.image_dir) {
            tracing::warn!(dir = %self.image_dir.display(), error = %e, "cannot create image directory");
            return None;
        }
        let path = self.image_dir.join(format!("{}.jpg", uuid::Uuid::new_v4()));
        match image.save_with_format(&path, image::ImageFormat::Jpeg) {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "reference image write failed");
                None
            }
        }
    }
}

impl IdentityStore for JsonIdentityStore {
    fn load_all(&self) -> Result<Vec<KnownIdentity>, StoreError> {
        let file = self.read_file()?;
        let total = file.people.len();

        let mut identities: Vec<KnownIdentity> = file
            .people
            .into_iter()
            .enumerate()
            .filter_map(|(idx, value)| {
                let identity = serde_json::from_value::<PersonRecord>(value)
                    .ok()
                    .and_then(PersonRecord::into_identity);
                if identity.is_none() {
                    tracing::warn!(index = idx, "skipping invalid identity record");
                }
                identity
            })
            .collect();

        // The first valid record fixes the embedding dimension.
        if let Some(dim) = identities.first().map(|id| id.embedding.dim()) {
            identities.retain(|id| {
                let keep = id.embedding.dim() == dim;
                if !keep {
                    tracing::warn!(
                        name = %id.name,
                        dim = id.embedding.dim(),
                        expected = dim,
                        "skipping identity with mismatched embedding dimension"
                    );
                }
                keep
            });
        }

        tracing::debug!(loaded = identities.len(), total, "identity store read");
        Ok(identities)
    }

    fn append(&self, identity: NewIdentity) -> Result<KnownIdentity, StoreError> {
        let image = identity.image.as_ref().and_then(|img| self.save_image(img));
        let record = PersonRecord {
            name: identity.name,
            relation: identity.relation,
            notes: String::new(),
            image,
            embedding: identity.embedding.values,
            registered_at: Some(Utc::now()),
        };
        let value = serde_json::to_value(&record)
            .map_err(|e| StoreError::Backend(format!("serialize record: {e}")))?;

        let _guard = self.write_lock.lock();
        let mut file = self.read_file()?;
        file.people.push(value);
        self.write_file(&file)?;

        tracing::info!(name = %record.name, path = %self.path.display(), "identity appended");
        record
            .into_identity()
            .ok_or_else(|| StoreError::Backend("appended record is not loadable".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_identity(name: &str, with_image: bool) -> NewIdentity {
        NewIdentity {
            name: name.into(),
            relation: "Friend".into(),
            embedding: Embedding::new(vec![0.1, 0.2, 0.3]),
            image: with_image.then(|| image::RgbImage::from_pixel(8, 8, image::Rgb([50, 60, 70]))),
        }
    }

    #[test]
    fn test_open_creates_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/identities.json");
        let store = JsonIdentityStore::open(&path, &dir.path().join("images")).unwrap();

        assert!(path.exists());
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_append_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            JsonIdentityStore::open(&dir.path().join("db.json"), &dir.path().join("images")).unwrap();

        let alex = store.append(new_identity("Alex", true)).unwrap();
        store.append(new_identity("Alex", false)).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], alex);
        assert_eq!(loaded[0].relation, "Friend");
        assert_eq!(loaded[0].embedding.values, vec![0.1, 0.2, 0.3]);
        let image_path = loaded[0].reference_path.clone().unwrap();
        assert!(Path::new(&image_path).exists());
        assert!(image_path.ends_with(".jpg"));
        assert!(loaded[1].reference_path.is_none());
        assert!(!dir.path().join("db.json.tmp").exists());
    }

    #[test]
    fn test_invalid_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(
            &path,
            r#"{"people": [
                {"name": "Sam", "relation": "Neighbour", "notes": "Tall", "embedding": [1.0, 2.0]},
                {"name": "", "embedding": [1.0]},
                {"name": "NoVector", "embedding": []},
                {"relation": "Missing name"},
                "not even an object"
            ]}"#,
        )
        .unwrap();
        let store = JsonIdentityStore::open(&path, dir.path()).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "Sam");
        assert_eq!(loaded[0].notes, "Tall");

        // Appending keeps the records it could not parse.
        store.append(new_identity("Kim", false)).unwrap();
        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["people"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn test_mismatched_and_non_finite_embeddings_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(
            &path,
            r#"{"people": [
                {"name": "Sam", "embedding": [0.1, 0.2, 0.3]},
                {"name": "Old", "embedding": [0.1, 0.2]},
                {"name": "Broken", "embedding": [0.1, null, 0.3]},
                {"name": "Kim", "embedding": [0.3, 0.2, 0.1]}
            ]}"#,
        )
        .unwrap();
        let store = JsonIdentityStore::open(&path, dir.path()).unwrap();

        let names: Vec<_> = store.load_all().unwrap().into_iter().map(|id| id.name).collect();
        assert_eq!(names, vec!["Sam", "Kim"]);
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonIdentityStore::open(&path, dir.path()).unwrap();

        assert!(matches!(store.load_all(), Err(StoreError::Corrupt(_))));
        assert!(store.append(new_identity("Kim", false)).is_err());
    }

    #[test]
    fn test_image_write_failure_keeps_record() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("images");
        std::fs::write(&blocker, b"a file, not a directory").unwrap();
        let store = JsonIdentityStore::open(&dir.path().join("db.json"), &blocker).unwrap();

        let stored = store.append(new_identity("Alex", true)).unwrap();
        assert!(stored.reference_path.is_none());
        assert_eq!(store.load_all().unwrap().len(), 1);
    }
}
