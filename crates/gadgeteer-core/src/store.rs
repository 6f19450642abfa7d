//! Per-agent append-only stores: spilled gadget output and media payloads

use crate::error::{CoreError, CoreResult};
use crate::types::{MediaHandle, MediaPayload};
use base64::Engine;
use dashmap::DashMap;
use std::path::PathBuf;

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// A gadget output that exceeded the character budget, parked under a short
/// ID the model can pass to `GadgetOutputViewer`.
#[derive(Clone, Debug)]
pub struct StoredOutput {
    pub gadget_name: String,
    pub content: String,
}

/// Append-only spillover store. Keys are freshly minted per insert, so no
/// locking is needed beyond the map's own sharding.
#[derive(Default)]
pub struct OutputStore {
    entries: DashMap<String, StoredOutput>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, gadget_name: impl Into<String>, content: impl Into<String>) -> String {
        let id = short_id();
        self.entries.insert(
            id.clone(),
            StoredOutput {
                gadget_name: gadget_name.into(),
                content: content.into(),
            },
        );
        id
    }

    pub fn get(&self, id: &str) -> Option<StoredOutput> {
        self.entries.get(id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct StoredMedia {
    handle: MediaHandle,
    data: Option<Vec<u8>>,
}

/// Media payload store, in-memory with optional filesystem backing.
///
/// When backed, payload bytes are written under the backing directory and
/// only the handle stays in memory; `cleanup` removes the directory.
pub struct MediaStore {
    entries: DashMap<String, StoredMedia>,
    backing_dir: Option<PathBuf>,
}

impl Default for MediaStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl MediaStore {
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            backing_dir: None,
        }
    }

    pub fn with_backing_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            entries: DashMap::new(),
            backing_dir: Some(dir.into()),
        }
    }

    pub fn backing_dir(&self) -> Option<&PathBuf> {
        self.backing_dir.as_ref()
    }

    pub fn insert(&self, payload: MediaPayload) -> CoreResult<MediaHandle> {
        let id = short_id();
        let size_bytes = payload.data.len() as u64;

        let (path, data) = match &self.backing_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let file = dir.join(format!("{}.{}", id, extension_for(&payload.mime_type)));
                std::fs::write(&file, &payload.data)?;
                (Some(file), None)
            }
            None => (None, Some(payload.data)),
        };

        let handle = MediaHandle {
            id: id.clone(),
            mime_type: payload.mime_type,
            size_bytes,
            path,
        };
        self.entries.insert(
            id,
            StoredMedia {
                handle: handle.clone(),
                data,
            },
        );
        Ok(handle)
    }

    pub fn handle(&self, id: &str) -> Option<MediaHandle> {
        self.entries.get(id).map(|e| e.handle.clone())
    }

    pub fn data(&self, id: &str) -> CoreResult<Vec<u8>> {
        let entry = self
            .entries
            .get(id)
            .ok_or_else(|| CoreError::MediaNotFound(id.to_string()))?;
        match (&entry.data, &entry.handle.path) {
            (Some(bytes), _) => Ok(bytes.clone()),
            (None, Some(path)) => Ok(std::fs::read(path)?),
            (None, None) => Err(CoreError::MediaNotFound(id.to_string())),
        }
    }

    pub fn data_base64(&self, id: &str) -> CoreResult<String> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.data(id)?))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove the backing directory and drop all entries.
    pub fn cleanup(&self) -> CoreResult<()> {
        self.entries.clear();
        if let Some(dir) = &self.backing_dir {
            if dir.exists() {
                std::fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

fn extension_for(mime_type: &str) -> &str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "audio/mpeg" => "mp3",
        "audio/wav" => "wav",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_store_roundtrip() {
        let store = OutputStore::new();
        let id = store.insert("browser", "a very long page");
        assert_eq!(id.len(), 8);
        let entry = store.get(&id).unwrap();
        assert_eq!(entry.gadget_name, "browser");
        assert_eq!(entry.content, "a very long page");
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn media_store_in_memory() {
        let store = MediaStore::in_memory();
        let handle = store
            .insert(MediaPayload::new(vec![1, 2, 3], "image/png"))
            .unwrap();
        assert_eq!(handle.size_bytes, 3);
        assert!(handle.path.is_none());
        assert_eq!(store.data(&handle.id).unwrap(), vec![1, 2, 3]);
        assert_eq!(store.data_base64(&handle.id).unwrap(), "AQID");
    }

    #[test]
    fn media_store_filesystem_backed() {
        let dir = tempfile::tempdir().unwrap();
        let backing = dir.path().join("media");
        let store = MediaStore::with_backing_dir(&backing);

        let handle = store
            .insert(MediaPayload::new(b"payload".to_vec(), "image/jpeg"))
            .unwrap();
        let path = handle.path.clone().unwrap();
        assert!(path.starts_with(&backing));
        assert_eq!(path.extension().unwrap(), "jpg");
        assert_eq!(store.data(&handle.id).unwrap(), b"payload".to_vec());

        store.cleanup().unwrap();
        assert!(!backing.exists());
        assert!(store.data(&handle.id).is_err());
    }
}
