//! Content keys, the record operation, and background persistence.

use std::sync::Arc;
use std::thread;

use sha2::{Digest, Sha256};
use tempfile::TempDir;

use scenecap::{
    CacheOptions, CacheRecord, ContentAddressedCache, ContentKey, EmbeddingCollection,
    EmbeddingStore, ImageTensor, MemoryCollection, RecordOutcome, ScenecapError, derive_key,
    record,
};

fn tensor(seed: f32) -> ImageTensor {
    let values = (0..12).map(|i| seed + i as f32 / 100.0).collect();
    ImageTensor::from_parts(vec![1, 3, 2, 2], values).unwrap()
}

// ── Content keys ────────────────────────────────────────────────────

#[test]
fn key_is_truncated_sha256_of_tensor_bytes() {
    let tensor = tensor(0.5);
    let digest = Sha256::digest(tensor.to_le_bytes());
    assert_eq!(derive_key(&tensor).as_bytes()[..], digest[..16]);
}

#[test]
fn equal_tensors_share_a_key() {
    assert_eq!(derive_key(&tensor(0.25)), derive_key(&tensor(0.25)));
    assert_ne!(derive_key(&tensor(0.25)), derive_key(&tensor(0.26)));
}

#[test]
fn key_depends_on_values_not_shape() {
    let values: Vec<f32> = (0..12).map(|i| i as f32).collect();
    let flat = ImageTensor::from_parts(vec![12], values.clone()).unwrap();
    let square = ImageTensor::from_parts(vec![1, 3, 2, 2], values).unwrap();
    assert_eq!(derive_key(&flat), derive_key(&square));
}

#[test]
fn key_text_round_trips() {
    let key = derive_key(&tensor(1.0));
    let text = key.to_string();
    assert_eq!(text.len(), 36);
    assert_eq!(text.matches('-').count(), 4);
    assert_eq!(text.parse::<ContentKey>().unwrap(), key);
}

#[test]
fn malformed_key_text_is_rejected() {
    assert!(matches!(
        "not-a-key".parse::<ContentKey>(),
        Err(ScenecapError::Store(_))
    ));
}

// ── record ──────────────────────────────────────────────────────────

#[test]
fn record_inserts_once() {
    let collection = MemoryCollection::new("captions");
    let tensor = tensor(0.1);
    let key = derive_key(&tensor);

    assert_eq!(
        record(&collection, key, &tensor, "a cat on a sofa").unwrap(),
        RecordOutcome::Inserted
    );
    assert_eq!(
        record(&collection, key, &tensor, "a different caption").unwrap(),
        RecordOutcome::AlreadyPresent
    );
    assert_eq!(collection.len().unwrap(), 1);

    let stored = collection.get(&key).unwrap().unwrap();
    assert_eq!(stored.metadata.caption, "a cat on a sofa");
    assert_eq!(stored.metadata.image_tensor_shape, "(1, 3, 2, 2)");
    assert_eq!(stored.embedding, tensor.flatten());
}

#[test]
fn disk_collection_persists_records() {
    let temp = TempDir::new().unwrap();
    let tensor = tensor(0.7);
    let key = derive_key(&tensor);

    {
        let store = EmbeddingStore::open(temp.path()).unwrap();
        let collection = store.collection("image_captions").unwrap();
        assert!(collection.is_empty().unwrap());
        record(&*collection, key, &tensor, "a red door").unwrap();
    }

    let store = EmbeddingStore::open(temp.path()).unwrap();
    let collection = store.collection("image_captions").unwrap();
    assert_eq!(collection.keys().unwrap(), vec![key]);
    assert_eq!(store.collection_names().unwrap(), vec!["image_captions"]);

    let stored = collection.get(&key).unwrap().unwrap();
    assert_eq!(stored.id, key);
    assert_eq!(stored.metadata.caption, "a red door");
    assert_eq!(stored.embedding, tensor.flatten());
}

#[test]
fn disk_collection_never_overwrites() {
    let temp = TempDir::new().unwrap();
    let store = EmbeddingStore::open(temp.path()).unwrap();
    let collection = store.collection("captions").unwrap();
    let tensor = tensor(0.3);
    let key = derive_key(&tensor);

    let first = CacheRecord {
        id: key,
        embedding: tensor.flatten(),
        metadata: scenecap::RecordMetadata {
            caption: "first".to_string(),
            image_tensor_shape: tensor.shape_descriptor(),
        },
    };
    let mut second = first.clone();
    second.metadata.caption = "second".to_string();

    assert_eq!(collection.add(first).unwrap(), RecordOutcome::Inserted);
    assert_eq!(collection.add(second).unwrap(), RecordOutcome::AlreadyPresent);
    assert_eq!(
        collection.get(&key).unwrap().unwrap().metadata.caption,
        "first"
    );
}

#[test]
fn invalid_collection_names_are_rejected() {
    let temp = TempDir::new().unwrap();
    let store = EmbeddingStore::open(temp.path()).unwrap();
    for name in ["", "../escape", ".hidden", "with space"] {
        assert!(store.collection(name).is_err(), "accepted {name:?}");
    }
}

#[test]
fn missing_key_reads_as_absent() {
    let temp = TempDir::new().unwrap();
    let store = EmbeddingStore::open(temp.path()).unwrap();
    let collection = store.collection("captions").unwrap();
    assert!(collection.get(&derive_key(&tensor(9.0))).unwrap().is_none());
}

// ── Background persistence ──────────────────────────────────────────

#[test]
fn drain_reports_inserted_and_skipped() {
    let collection = Arc::new(MemoryCollection::new("captions"));
    let mut cache = ContentAddressedCache::new(collection.clone(), CacheOptions::new()).unwrap();

    for seed in [0.1, 0.2, 0.3, 0.1] {
        cache.submit(tensor(seed), format!("caption {seed}")).unwrap();
    }

    let report = cache.drain();
    assert_eq!(report.inserted, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.total(), 4);
    assert_eq!(collection.len().unwrap(), 3);
}

#[test]
fn drain_is_idempotent_and_closes_queue() {
    let collection = Arc::new(MemoryCollection::new("captions"));
    let mut cache = ContentAddressedCache::new(collection, CacheOptions::new()).unwrap();
    cache.submit(tensor(0.5), "one".to_string()).unwrap();

    let first = cache.drain();
    assert!(!cache.is_open());
    assert_eq!(cache.drain(), first);
    assert!(matches!(
        cache.submit(tensor(0.6), "two".to_string()),
        Err(ScenecapError::PersistenceClosed)
    ));
}

#[test]
fn concurrent_duplicates_insert_once() {
    let collection = Arc::new(MemoryCollection::new("captions"));
    let options = CacheOptions::new().with_workers(4).with_queue_capacity(2);
    let mut cache = ContentAddressedCache::new(collection.clone(), options).unwrap();

    for _ in 0..20 {
        cache.submit(tensor(4.2), "same frame".to_string()).unwrap();
    }

    let report = cache.drain();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.skipped, 19);
    assert_eq!(collection.len().unwrap(), 1);
}

#[test]
fn concurrent_disk_writers_insert_once() {
    let temp = TempDir::new().unwrap();
    let store = EmbeddingStore::open(temp.path()).unwrap();
    let collection = store.collection("captions").unwrap();
    let tensor = tensor(2.0);
    let key = derive_key(&tensor);

    let outcomes: Vec<RecordOutcome> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collection = &collection;
                let tensor = &tensor;
                scope.spawn(move || record(&**collection, key, tensor, "shared").unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let inserted = outcomes
        .iter()
        .filter(|&&outcome| outcome == RecordOutcome::Inserted)
        .count();
    assert_eq!(inserted, 1);
    assert_eq!(collection.len().unwrap(), 1);
}

struct BrokenCollection;

impl EmbeddingCollection for BrokenCollection {
    fn name(&self) -> &str {
        "broken"
    }

    fn get(&self, _key: &ContentKey) -> Result<Option<CacheRecord>, ScenecapError> {
        Err(ScenecapError::Store("disk unplugged".to_string()))
    }

    fn add(&self, _record: CacheRecord) -> Result<RecordOutcome, ScenecapError> {
        Err(ScenecapError::Store("disk unplugged".to_string()))
    }

    fn len(&self) -> Result<usize, ScenecapError> {
        Ok(0)
    }
}

#[test]
fn store_failures_are_counted_not_fatal() {
    let mut cache =
        ContentAddressedCache::new(Arc::new(BrokenCollection), CacheOptions::new()).unwrap();
    cache.submit(tensor(0.1), "a".to_string()).unwrap();
    cache.submit(tensor(0.2), "b".to_string()).unwrap();

    let report = cache.drain();
    assert_eq!(report.failed, 2);
    assert_eq!(report.inserted, 0);
}

#[test]
fn dropping_the_cache_flushes_pending_jobs() {
    let collection = Arc::new(MemoryCollection::new("captions"));
    {
        let cache = ContentAddressedCache::new(collection.clone(), CacheOptions::new()).unwrap();
        for seed in 0..10 {
            cache.submit(tensor(seed as f32), "frame".to_string()).unwrap();
        }
    }
    assert_eq!(collection.len().unwrap(), 10);
}

#[test]
fn cache_options_are_clamped() {
    let options = CacheOptions::new().with_workers(0).with_queue_capacity(0);
    assert_eq!(options.workers(), 1);
    assert_eq!(options.queue_capacity(), 1);
}
