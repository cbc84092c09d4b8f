use crate::error::{Result, SiftError};
use crate::filter::Filter;
use crate::index::Index;
use crate::query::QueryClient;
use crate::value::{get_value_at_path, set_value_at_path, IndexKey, PrimaryKey};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct StoreParams {
    pub primary_key: String,
    pub indexed_fields: Vec<String>,
}

impl Default for StoreParams {
    fn default() -> Self {
        Self {
            primary_key: "id".to_string(),
            indexed_fields: Vec::new(),
        }
    }
}

struct StoreData {
    records: BTreeMap<PrimaryKey, Value>,
    index: Index,
    indexed_fields: Vec<String>,
}

/// A collection of records of one entity type plus its secondary index.
///
/// Every mutation goes through the store, which keeps the index in step
/// by calling [`Index::update`] for each indexed field it changes.
pub struct EntityStore {
    data: RwLock<StoreData>,
}

impl EntityStore {
    pub fn new(params: StoreParams) -> Self {
        let mut indexed_fields = Vec::new();
        for f in params.indexed_fields {
            if !indexed_fields.contains(&f) {
                indexed_fields.push(f);
            }
        }
        Self {
            data: RwLock::new(StoreData {
                records: BTreeMap::new(),
                index: Index::new(params.primary_key),
                indexed_fields,
            }),
        }
    }

    pub fn primary_key(&self) -> String {
        self.data.read().index.primary_key().to_string()
    }

    pub fn indexed_fields(&self) -> Vec<String> {
        self.data.read().indexed_fields.clone()
    }

    pub fn len(&self) -> usize {
        self.data.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().records.is_empty()
    }

    pub fn get(&self, pk: &PrimaryKey) -> Option<Value> {
        self.data.read().records.get(pk).cloned()
    }

    /// Key of the stored record named by `raw`. Numeric input matches an
    /// integer key first, then a string key with the same text.
    pub fn resolve_key(&self, raw: &str) -> Option<PrimaryKey> {
        let guard = self.data.read();
        let parsed = PrimaryKey::parse(raw);
        if guard.records.contains_key(&parsed) {
            return Some(parsed);
        }
        let text = PrimaryKey::from(raw);
        guard.records.contains_key(&text).then_some(text)
    }

    /// Bulk ingest. Records without a primary key are skipped.
    pub fn load(&self, records: impl IntoIterator<Item = Value>) -> usize {
        let mut guard = self.data.write();
        let mut loaded = 0usize;
        for record in records {
            match guard.index.key_of(&record) {
                Some(pk) => {
                    guard.put(pk, record);
                    loaded += 1;
                }
                None => {
                    tracing::warn!(primary_key = %guard.index.primary_key(), "record without primary key skipped");
                }
            }
        }
        tracing::debug!(loaded, total = guard.records.len(), "records loaded");
        loaded
    }

    /// Insert a record or replace the stored one with the same key.
    pub fn upsert(&self, record: Value) -> Result<PrimaryKey> {
        let mut guard = self.data.write();
        let pk = guard
            .index
            .key_of(&record)
            .ok_or_else(|| SiftError::MissingPrimaryKey(guard.index.primary_key().to_string()))?;
        guard.put(pk.clone(), record);
        Ok(pk)
    }

    /// Write `value` at `path` on the record `pk`.
    pub fn set_field(&self, pk: &PrimaryKey, path: &str, value: Value) -> Result<()> {
        let mut guard = self.data.write();
        let key_path = guard.index.primary_key().to_string();
        if overlaps(path, &key_path) {
            return Err(SiftError::Validation(format!(
                "'{path}' overlaps the primary key '{key_path}'"
            )));
        }
        let before = guard.records.get(pk).cloned().ok_or(SiftError::NotFound)?;
        let mut after = before.clone();
        set_value_at_path(&mut after, path, value)?;
        guard.sync_index(pk, &before, &after)?;
        guard.records.insert(pk.clone(), after);
        Ok(())
    }

    pub fn remove(&self, pk: &PrimaryKey) -> Option<Value> {
        let mut guard = self.data.write();
        let old = guard.records.remove(pk)?;
        let key = pk.clone();
        guard.index.remove_keyed(&old, |_| Some(key.clone()));
        Some(old)
    }

    /// Start indexing `field` over every stored record.
    pub fn index_field(&self, field: &str) {
        let mut guard = self.data.write();
        if guard.indexed_fields.iter().any(|f| f == field) {
            return;
        }
        guard.indexed_fields.push(field.to_string());
        let StoreData { records, index, .. } = &mut *guard;
        for (pk, record) in records.iter() {
            index.set_keyed(record, &[field], |_| Some(pk.clone()));
        }
        tracing::debug!(field, buckets = index.bucket_count(field), "field indexed");
    }

    pub fn query(&self, filter: &Filter) -> Result<Vec<PrimaryKey>> {
        let guard = self.data.read();
        QueryClient::new(&guard.index).query(filter)
    }

    /// Matching records, paged in result order.
    pub fn query_rows(
        &self,
        filter: &Filter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<(PrimaryKey, Value)>> {
        let guard = self.data.read();
        let keys = QueryClient::new(&guard.index).query(filter)?;
        Ok(keys
            .into_iter()
            .filter_map(|pk| guard.records.get(&pk).cloned().map(|v| (pk, v)))
            .skip(offset)
            .take(limit)
            .collect())
    }

    /// field -> number of distinct value buckets.
    pub fn bucket_counts(&self) -> BTreeMap<String, usize> {
        let guard = self.data.read();
        guard
            .indexed_fields
            .iter()
            .map(|f| (f.clone(), guard.index.bucket_count(f)))
            .collect()
    }

    /// Copy of the index as it stands now; later writes do not reach it.
    pub fn index_snapshot(&self) -> Index {
        self.data.read().index.clone()
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new(StoreParams::default())
    }
}

impl StoreData {
    fn put(&mut self, pk: PrimaryKey, record: Value) {
        match self.records.get(&pk) {
            Some(before) => {
                let before = before.clone();
                // every indexed field was set when the record went in
                if let Err(e) = self.sync_index(&pk, &before, &record) {
                    tracing::warn!(%pk, "index resync failed: {e}");
                }
            }
            None => {
                let key = pk.clone();
                self.index
                    .set_keyed(&record, self.indexed_fields.as_slice(), |_| Some(key.clone()));
            }
        }
        self.records.insert(pk, record);
    }

    fn sync_index(&mut self, pk: &PrimaryKey, before: &Value, after: &Value) -> Result<()> {
        for field in &self.indexed_fields {
            let old = get_value_at_path(before, field);
            let new = get_value_at_path(after, field);
            if IndexKey::from_resolved(old) != IndexKey::from_resolved(new) {
                self.index.update(pk, field, old, new)?;
            }
        }
        Ok(())
    }
}

fn overlaps(path: &str, key_path: &str) -> bool {
    let nested = |outer: &str, inner: &str| {
        inner == outer || inner.strip_prefix(outer).is_some_and(|rest| rest.starts_with('.'))
    };
    nested(path, key_path) || nested(key_path, path)
}
