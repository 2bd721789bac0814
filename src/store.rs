//! Persistent embedding collections.
//!
//! A collection maps a [`ContentKey`] to a [`CacheRecord`]: the flattened
//! normalized tensor (the "embedding") plus the caption and the tensor's
//! shape. Records are written once and never updated.
//!
//! [`EmbeddingStore`] keeps one directory per collection under a root, and
//! [`DiskCollection`] keeps one JSON document per key inside it.
//! [`MemoryCollection`] is the in-process equivalent.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::cache::ContentKey;
use crate::error::ScenecapError;

/// Metadata stored alongside an embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Caption produced for the frame.
    pub caption: String,
    /// Shape descriptor of the tensor, e.g. `(1, 3, 224, 224)`.
    pub image_tensor_shape: String,
}

/// One stored entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Key derived from the tensor bytes.
    pub id: ContentKey,
    /// The flattened tensor.
    pub embedding: Vec<f32>,
    /// Caption and shape.
    pub metadata: RecordMetadata,
}

/// Result of adding a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// The key was new and the record was written.
    Inserted,
    /// A record with this key already existed. Nothing was written.
    AlreadyPresent,
}

/// A keyed, insert-only collection of embeddings.
pub trait EmbeddingCollection: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Look up a record.
    fn get(&self, key: &ContentKey) -> Result<Option<CacheRecord>, ScenecapError>;

    /// Insert `record` unless its key is already present.
    ///
    /// Never overwrites. Losing a race with a concurrent insert of the same
    /// key reports [`RecordOutcome::AlreadyPresent`].
    fn add(&self, record: CacheRecord) -> Result<RecordOutcome, ScenecapError>;

    /// Number of stored records.
    fn len(&self) -> Result<usize, ScenecapError>;

    /// Whether the collection is empty.
    fn is_empty(&self) -> Result<bool, ScenecapError> {
        Ok(self.len()? == 0)
    }
}

/// Root directory holding named collections.
///
/// ```no_run
/// use scenecap::{EmbeddingCollection, EmbeddingStore};
///
/// let store = EmbeddingStore::open("scenecap_store")?;
/// let captions = store.collection("image_captions")?;
/// println!("{} records", captions.len()?);
/// # Ok::<(), scenecap::ScenecapError>(())
/// ```
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    root: PathBuf,
}

impl EmbeddingStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, ScenecapError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|error| {
            ScenecapError::Store(format!("cannot create store at {}: {error}", root.display()))
        })?;
        log::debug!("Opened embedding store at {}", root.display());
        Ok(Self { root })
    }

    /// Store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the named collection, creating it if it does not exist.
    pub fn collection(&self, name: &str) -> Result<Arc<DiskCollection>, ScenecapError> {
        validate_collection_name(name)?;
        let directory = self.root.join(name);
        if !directory.is_dir() {
            log::info!("Creating collection {name}");
            fs::create_dir_all(&directory).map_err(|error| {
                ScenecapError::Store(format!("cannot create collection {name}: {error}"))
            })?;
        }
        Ok(Arc::new(DiskCollection {
            name: name.to_string(),
            directory,
            write_lock: Mutex::new(()),
        }))
    }

    /// Names of existing collections, sorted.
    pub fn collection_names(&self) -> Result<Vec<String>, ScenecapError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn validate_collection_name(name: &str) -> Result<(), ScenecapError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ScenecapError::Store(format!("invalid collection name {name:?}")))
    }
}

/// A collection stored as `<key>.json` files in one directory.
#[derive(Debug)]
pub struct DiskCollection {
    name: String,
    directory: PathBuf,
    // Readers must not observe a record that is half written by this process.
    write_lock: Mutex<()>,
}

impl DiskCollection {
    /// Directory the records live in.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Result<Vec<ContentKey>, ScenecapError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                    if let Ok(key) = stem.parse::<ContentKey>() {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn record_path(&self, key: &ContentKey) -> PathBuf {
        self.directory.join(format!("{key}.json"))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, ScenecapError> {
        self.write_lock
            .lock()
            .map_err(|_| ScenecapError::Store(format!("collection {} lock poisoned", self.name)))
    }
}

impl EmbeddingCollection for DiskCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &ContentKey) -> Result<Option<CacheRecord>, ScenecapError> {
        let _guard = self.lock()?;
        let path = self.record_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(ScenecapError::Store(format!(
                    "cannot read {}: {error}",
                    path.display()
                )));
            }
        };
        let record = serde_json::from_slice(&bytes).map_err(|error| {
            ScenecapError::Store(format!("corrupt record {}: {error}", path.display()))
        })?;
        Ok(Some(record))
    }

    fn add(&self, record: CacheRecord) -> Result<RecordOutcome, ScenecapError> {
        let document = serde_json::to_vec(&record)?;
        let path = self.record_path(&record.id);

        let _guard = self.lock()?;
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                return Ok(RecordOutcome::AlreadyPresent);
            }
            Err(error) => {
                return Err(ScenecapError::Store(format!(
                    "cannot create {}: {error}",
                    path.display()
                )));
            }
        };

        if let Err(error) = file.write_all(&document).and_then(|()| file.sync_all()) {
            let _ = fs::remove_file(&path);
            return Err(ScenecapError::Store(format!(
                "cannot write {}: {error}",
                path.display()
            )));
        }
        Ok(RecordOutcome::Inserted)
    }

    fn len(&self) -> Result<usize, ScenecapError> {
        Ok(self.keys()?.len())
    }
}

/// An in-process collection.
#[derive(Debug)]
pub struct MemoryCollection {
    name: String,
    records: Mutex<HashMap<ContentKey, CacheRecord>>,
}

impl MemoryCollection {
    /// Create an empty collection called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(HashMap::new()),
        }
    }

    fn records(&self) -> Result<MutexGuard<'_, HashMap<ContentKey, CacheRecord>>, ScenecapError> {
        self.records
            .lock()
            .map_err(|_| ScenecapError::Store(format!("collection {} lock poisoned", self.name)))
    }
}

impl EmbeddingCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &ContentKey) -> Result<Option<CacheRecord>, ScenecapError> {
        Ok(self.records()?.get(key).cloned())
    }

    fn add(&self, record: CacheRecord) -> Result<RecordOutcome, ScenecapError> {
        let mut records = self.records()?;
        if records.contains_key(&record.id) {
            return Ok(RecordOutcome::AlreadyPresent);
        }
        records.insert(record.id, record);
        Ok(RecordOutcome::Inserted)
    }

    fn len(&self) -> Result<usize, ScenecapError> {
        Ok(self.records()?.len())
    }
}
