//! JSONL-based storage implementation with in-memory caching.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::debug;
use serde::{Serialize, de::DeserializeOwned};

use super::traits::{Filter, HasId, Storage};
use crate::error::{AnvilError, Result};

/// JSONL-based storage with in-memory caching.
///
/// Creates append a single line; updates rewrite the collection through a
/// temporary file and a rename so a crash never leaves a half-written file.
pub struct JsonlStorage {
    base_path: PathBuf,
    cache: RwLock<HashMap<String, Vec<serde_json::Value>>>,
}

impl std::fmt::Debug for JsonlStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlStorage")
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

fn record_id(record: &serde_json::Value) -> Option<&str> {
    record.get("id").and_then(|v| v.as_str())
}

fn lock_err<E: std::fmt::Display>(e: E) -> AnvilError {
    AnvilError::Storage(e.to_string())
}

impl JsonlStorage {
    /// Create a new JsonlStorage at the given path.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the file path for a collection.
    fn collection_path(&self, collection: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", collection))
    }

    /// Load a collection into cache if not already loaded.
    ///
    /// A line that is not a JSON object with a string `id` is corruption.
    fn ensure_loaded(&self, collection: &str) -> Result<()> {
        {
            let cache = self.cache.read().map_err(lock_err)?;
            if cache.contains_key(collection) {
                return Ok(());
            }
        }

        let mut cache = self.cache.write().map_err(lock_err)?;
        if cache.contains_key(collection) {
            return Ok(());
        }

        let path = self.collection_path(collection);
        let records = if path.exists() {
            let file = File::open(&path)?;
            let reader = BufReader::new(file);
            let mut records = Vec::new();
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: serde_json::Value = serde_json::from_str(&line).map_err(|e| {
                    AnvilError::Corruption(format!("{}:{}: {}", path.display(), lineno + 1, e))
                })?;
                if record_id(&record).is_none() {
                    return Err(AnvilError::Corruption(format!(
                        "{}:{}: record has no id",
                        path.display(),
                        lineno + 1
                    )));
                }
                records.push(record);
            }
            debug!("Loaded {} records from {}", records.len(), path.display());
            records
        } else {
            Vec::new()
        };

        cache.insert(collection.to_string(), records);
        Ok(())
    }

    /// Append a record to the JSONL file.
    fn append_to_file(&self, collection: &str, record: &serde_json::Value) -> Result<()> {
        let path = self.collection_path(collection);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        file.sync_data()?;
        Ok(())
    }

    /// Rewrite the entire collection file from the given records.
    fn rewrite_file(&self, collection: &str, records: &[serde_json::Value]) -> Result<()> {
        let path = self.collection_path(collection);
        let tmp = self.base_path.join(format!(".{}.jsonl.tmp", collection));
        {
            let mut file = File::create(&tmp)?;
            for record in records {
                writeln!(file, "{}", serde_json::to_string(record)?)?;
            }
            file.sync_data()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Replace records by ID (optionally inserting missing ones) and rewrite
    /// the collection once. Nothing changes if any ID is missing.
    fn replace(&self, collection: &str, values: Vec<(String, serde_json::Value)>, insert: bool) -> Result<()> {
        self.ensure_loaded(collection)?;

        let mut cache = self.cache.write().map_err(lock_err)?;
        let records = cache
            .get_mut(collection)
            .ok_or_else(|| AnvilError::Storage(format!("Collection not loaded: {}", collection)))?;

        if !insert
            && let Some((missing, _)) = values
                .iter()
                .find(|(id, _)| !records.iter().any(|r| record_id(r) == Some(id.as_str())))
        {
            return Err(AnvilError::Storage(format!(
                "Record not found in {}: {}",
                collection, missing
            )));
        }

        let mut updated = records.clone();
        for (id, value) in values {
            match updated.iter_mut().find(|r| record_id(r) == Some(id.as_str())) {
                Some(r) => *r = value,
                None => updated.push(value),
            }
        }

        // Rewrite while holding the lock so concurrent writers cannot interleave
        self.rewrite_file(collection, &updated)?;
        *records = updated;
        Ok(())
    }
}

impl Storage for JsonlStorage {
    fn create<T: Serialize + HasId>(&self, collection: &str, record: &T) -> Result<()> {
        self.ensure_loaded(collection)?;

        let value = serde_json::to_value(record)?;

        let mut cache = self.cache.write().map_err(lock_err)?;
        let records = cache
            .get_mut(collection)
            .ok_or_else(|| AnvilError::Storage(format!("Collection not loaded: {}", collection)))?;

        if records.iter().any(|r| record_id(r) == Some(record.id())) {
            return Err(AnvilError::Storage(format!(
                "Duplicate id in {}: {}",
                collection,
                record.id()
            )));
        }

        // Append to file first (source of truth)
        self.append_to_file(collection, &value)?;
        records.push(value);

        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>> {
        self.ensure_loaded(collection)?;

        let cache = self.cache.read().map_err(lock_err)?;
        let records = cache
            .get(collection)
            .ok_or_else(|| AnvilError::Storage(format!("Collection not loaded: {}", collection)))?;

        match records.iter().find(|r| record_id(r) == Some(id)) {
            Some(record) => Ok(Some(serde_json::from_value(record.clone())?)),
            None => Ok(None),
        }
    }

    fn update<T: Serialize + HasId>(&self, collection: &str, record: &T) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.replace(collection, vec![(record.id().to_string(), value)], false)
    }

    fn update_all<T: Serialize + HasId>(&self, collection: &str, records: &[T]) -> Result<()> {
        let values = records
            .iter()
            .map(|r| Ok((r.id().to_string(), serde_json::to_value(r)?)))
            .collect::<Result<Vec<_>>>()?;
        self.replace(collection, values, false)
    }

    fn upsert<T: Serialize + HasId>(&self, collection: &str, record: &T) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.replace(collection, vec![(record.id().to_string(), value)], true)
    }

    fn query<T: DeserializeOwned>(&self, collection: &str, filters: &[Filter]) -> Result<Vec<T>> {
        self.ensure_loaded(collection)?;

        let cache = self.cache.read().map_err(lock_err)?;
        let records = cache
            .get(collection)
            .ok_or_else(|| AnvilError::Storage(format!("Collection not loaded: {}", collection)))?;

        records
            .iter()
            .filter(|record| filters.iter().all(|f| f.matches(record)))
            .map(|record| serde_json::from_value(record.clone()).map_err(AnvilError::from))
            .collect()
    }

    fn list<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        self.query(collection, &[])
    }
}
