//! Content-addressed caption index.
//!
//! Every captioned scene is indexed by a [`ContentKey`] derived from its
//! normalized tensor, so a picture that shows up again (in the same video or
//! a later one) is stored once. The cache is a write-through index: captions
//! are always computed, and the index only records them.
//!
//! Persistence runs off the captioning thread. [`ContentAddressedCache`]
//! feeds a bounded queue served by a fixed set of worker threads; each job
//! derives the key, checks the collection, inserts if absent, and logs the
//! outcome. Jobs may complete in any order. [`ContentAddressedCache::drain`]
//! waits for every queued job and reports what happened.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use image::{Rgb, RgbImage};
//! use scenecap::{
//!     CacheOptions, ContentAddressedCache, EmbeddingCollection, MemoryCollection,
//!     NormalizationConfig, normalize,
//! };
//!
//! let collection = Arc::new(MemoryCollection::new("image_captions"));
//! let mut cache = ContentAddressedCache::new(collection.clone(), CacheOptions::new())?;
//!
//! let frame = RgbImage::from_pixel(320, 240, Rgb([10, 20, 30]));
//! let tensor = normalize(&frame, &NormalizationConfig::default())?;
//! cache.submit(tensor.clone(), "a dark blue wall".to_string())?;
//! cache.submit(tensor, "a dark blue wall".to_string())?;
//!
//! let report = cache.drain();
//! assert_eq!(report.inserted, 1);
//! assert_eq!(report.skipped, 1);
//! assert_eq!(collection.len()?, 1);
//! # Ok::<(), scenecap::ScenecapError>(())
//! ```

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::configuration::CacheOptions;
use crate::error::ScenecapError;
use crate::store::{CacheRecord, EmbeddingCollection, RecordMetadata, RecordOutcome};
use crate::tensor::ImageTensor;

/// 16-byte key derived from a normalized tensor, shown as a hyphenated UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentKey(Uuid);

impl ContentKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Display for ContentKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ContentKey {
    type Err = ScenecapError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(text.trim())
            .map(Self)
            .map_err(|error| ScenecapError::Store(format!("invalid content key {text:?}: {error}")))
    }
}

/// Derive the content key of `tensor`.
///
/// SHA-256 over the little-endian `f32` bytes, truncated to the first 16
/// bytes. Depends on nothing but those bytes.
pub fn derive_key(tensor: &ImageTensor) -> ContentKey {
    let digest = Sha256::digest(tensor.to_le_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    ContentKey::from_bytes(bytes)
}

/// Record `caption` for `tensor` under `key` unless the key already exists.
///
/// # Errors
///
/// Store failures surface as [`ScenecapError::Store`].
pub fn record(
    collection: &dyn EmbeddingCollection,
    key: ContentKey,
    tensor: &ImageTensor,
    caption: &str,
) -> Result<RecordOutcome, ScenecapError> {
    if collection.get(&key)?.is_some() {
        log::warn!("Entry with key {key} already exists in {}, skipping", collection.name());
        return Ok(RecordOutcome::AlreadyPresent);
    }

    let outcome = collection.add(CacheRecord {
        id: key,
        embedding: tensor.flatten(),
        metadata: RecordMetadata {
            caption: caption.to_string(),
            image_tensor_shape: tensor.shape_descriptor(),
        },
    })?;

    match outcome {
        RecordOutcome::Inserted => log::info!("Added entry with key {key} to {}", collection.name()),
        RecordOutcome::AlreadyPresent => log::warn!(
            "Entry with key {key} was added concurrently to {}, skipping",
            collection.name()
        ),
    }
    Ok(outcome)
}

/// Totals of background persistence jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// New records written.
    pub inserted: u64,
    /// Jobs whose key was already stored.
    pub skipped: u64,
    /// Jobs that failed with a store error.
    pub failed: u64,
}

impl DrainReport {
    /// Jobs completed in total.
    pub fn total(&self) -> u64 {
        self.inserted + self.skipped + self.failed
    }
}

#[derive(Debug, Default)]
struct Counters {
    inserted: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DrainReport {
        DrainReport {
            inserted: self.inserted.load(Ordering::Acquire),
            skipped: self.skipped.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
        }
    }
}

struct PersistJob {
    tensor: ImageTensor,
    caption: String,
}

/// Background writer in front of an [`EmbeddingCollection`].
///
/// Dropping the cache drains it first, so queued writes are never lost.
pub struct ContentAddressedCache {
    collection: Arc<dyn EmbeddingCollection>,
    sender: Option<Sender<PersistJob>>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for ContentAddressedCache {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ContentAddressedCache")
            .field("collection", &self.collection.name())
            .field("workers", &self.workers.len())
            .field("open", &self.sender.is_some())
            .field("report", &self.counters.snapshot())
            .finish()
    }
}

impl ContentAddressedCache {
    /// Start the worker threads.
    ///
    /// # Errors
    ///
    /// Returns [`ScenecapError::IoError`] if a thread cannot be spawned.
    pub fn new(
        collection: Arc<dyn EmbeddingCollection>,
        options: CacheOptions,
    ) -> Result<Self, ScenecapError> {
        let (sender, receiver) = channel::bounded::<PersistJob>(options.queue_capacity);
        let counters = Arc::new(Counters::default());

        let mut workers = Vec::with_capacity(options.workers);
        for index in 0..options.workers {
            let receiver = receiver.clone();
            let collection = Arc::clone(&collection);
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("scenecap-persist-{index}"))
                .spawn(move || persist_worker(receiver, collection, counters))?;
            workers.push(handle);
        }

        log::debug!(
            "Started {} persistence workers for {} (queue capacity {})",
            options.workers,
            collection.name(),
            options.queue_capacity
        );

        Ok(Self {
            collection,
            sender: Some(sender),
            workers,
            counters,
        })
    }

    /// Queue `tensor` and its caption for persistence.
    ///
    /// Returns once the job is queued. Blocks while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`ScenecapError::PersistenceClosed`] after [`drain`](Self::drain).
    pub fn submit(&self, tensor: ImageTensor, caption: String) -> Result<(), ScenecapError> {
        let sender = self.sender.as_ref().ok_or(ScenecapError::PersistenceClosed)?;
        sender
            .send(PersistJob { tensor, caption })
            .map_err(|_| ScenecapError::PersistenceClosed)
    }

    /// Totals of the jobs completed so far.
    pub fn report(&self) -> DrainReport {
        self.counters.snapshot()
    }

    /// The collection records are written to.
    pub fn collection(&self) -> &Arc<dyn EmbeddingCollection> {
        &self.collection
    }

    /// Whether the cache still accepts jobs.
    pub fn is_open(&self) -> bool {
        self.sender.is_some()
    }

    /// Close the queue, wait for every queued job, and return the totals.
    ///
    /// Further calls return the same totals.
    pub fn drain(&mut self) -> DrainReport {
        if self.sender.take().is_some() {
            for handle in self.workers.drain(..) {
                if handle.join().is_err() {
                    log::error!("A persistence worker panicked");
                }
            }
            let report = self.counters.snapshot();
            log::info!(
                "Persistence drained: {} inserted, {} skipped, {} failed",
                report.inserted,
                report.skipped,
                report.failed
            );
        }
        self.counters.snapshot()
    }
}

impl Drop for ContentAddressedCache {
    fn drop(&mut self) {
        self.drain();
    }
}

fn persist_worker(
    receiver: Receiver<PersistJob>,
    collection: Arc<dyn EmbeddingCollection>,
    counters: Arc<Counters>,
) {
    for job in receiver.iter() {
        let key = derive_key(&job.tensor);
        match record(collection.as_ref(), key, &job.tensor, &job.caption) {
            Ok(RecordOutcome::Inserted) => {
                counters.inserted.fetch_add(1, Ordering::AcqRel);
            }
            Ok(RecordOutcome::AlreadyPresent) => {
                counters.skipped.fetch_add(1, Ordering::AcqRel);
            }
            Err(error) => {
                log::error!("Failed to persist entry {key}: {error}");
                counters.failed.fetch_add(1, Ordering::AcqRel);
            }
        }
    }
}
