//! Secondary index over a collection of JSON records.
//!
//! field path -> bucket key -> primary keys holding that value, in
//! insertion order.

use crate::error::{Result, SiftError};
use crate::value::{get_value_at_path, IndexKey, PrimaryKey};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

pub type IndexedFieldRecord = BTreeMap<IndexKey, Vec<PrimaryKey>>;
pub type IndexRecord = BTreeMap<String, IndexedFieldRecord>;

#[derive(Debug, Clone)]
pub struct Index {
    record: IndexRecord,
    primary_key: String,
    // field -> pk -> bucket currently holding it
    placements: HashMap<String, HashMap<PrimaryKey, IndexKey>>,
}

impl Index {
    pub fn new(primary_key: impl Into<String>) -> Self {
        Self {
            record: IndexRecord::new(),
            primary_key: primary_key.into(),
            placements: HashMap::new(),
        }
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn record(&self) -> &IndexRecord {
        &self.record
    }

    pub fn field(&self, field: &str) -> Option<&IndexedFieldRecord> {
        self.record.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.record.keys().map(String::as_str)
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        self.record.contains_key(field)
    }

    pub fn bucket_count(&self, field: &str) -> usize {
        self.record.get(field).map(|f| f.len()).unwrap_or(0)
    }

    /// Primary key of `record` under the configured key path.
    pub fn key_of(&self, record: &Value) -> Option<PrimaryKey> {
        get_value_at_path(record, &self.primary_key).and_then(PrimaryKey::from_value)
    }

    /// Index `record` under each of `fields`.
    pub fn set(&mut self, record: &Value, fields: &[impl AsRef<str>]) {
        let pk = self.key_of(record);
        self.set_with(record, fields, pk);
    }

    /// Like [`Index::set`], with the primary key taken from `key_fn`.
    pub fn set_keyed<F>(&mut self, record: &Value, fields: &[impl AsRef<str>], key_fn: F)
    where
        F: Fn(&Value) -> Option<PrimaryKey>,
    {
        let pk = key_fn(record);
        self.set_with(record, fields, pk);
    }

    fn set_with(&mut self, record: &Value, fields: &[impl AsRef<str>], pk: Option<PrimaryKey>) {
        let Some(pk) = pk else {
            tracing::warn!(primary_key = %self.primary_key, "record without primary key skipped");
            return;
        };
        for field in fields {
            let field = field.as_ref();
            let key = IndexKey::from_resolved(get_value_at_path(record, field));
            self.record.entry(field.to_string()).or_default();
            if let Some(current) = self.placement(field, &pk).cloned() {
                if current == key {
                    continue;
                }
                tracing::debug!(%pk, field, from = %current, to = %key, "index entry moved");
                self.strike(field, &current, &pk);
            }
            self.place(field, key, pk.clone());
        }
    }

    /// Move `pk` from the `old_value` bucket of `field` to the `new_value`
    /// bucket. The field must have been indexed with [`Index::set`].
    pub fn update(
        &mut self,
        pk: &PrimaryKey,
        field: &str,
        old_value: Option<&Value>,
        new_value: Option<&Value>,
    ) -> Result<()> {
        if !self.record.contains_key(field) {
            return Err(SiftError::FieldNotIndexed(field.to_string()));
        }
        let old = IndexKey::from_resolved(old_value);
        let new = IndexKey::from_resolved(new_value);

        let from = match self.placement(field, pk).cloned() {
            Some(current) if current != old => {
                tracing::warn!(%pk, field, expected = %old, actual = %current, "stale old value on index update");
                current
            }
            Some(current) => current,
            None => old,
        };
        self.strike(field, &from, pk);
        self.place(field, new, pk.clone());
        Ok(())
    }

    /// Drop `record` from every indexed field.
    pub fn remove(&mut self, record: &Value) {
        if let Some(pk) = self.key_of(record) {
            self.remove_pk(record, &pk);
        }
    }

    /// Like [`Index::remove`], with the primary key taken from `key_fn`.
    pub fn remove_keyed<F>(&mut self, record: &Value, key_fn: F)
    where
        F: Fn(&Value) -> Option<PrimaryKey>,
    {
        if let Some(pk) = key_fn(record) {
            self.remove_pk(record, &pk);
        }
    }

    fn remove_pk(&mut self, record: &Value, pk: &PrimaryKey) {
        let fields: Vec<String> = self.record.keys().cloned().collect();
        for field in fields {
            let key = match self.placement(&field, pk).cloned() {
                Some(current) => current,
                None => IndexKey::from_resolved(get_value_at_path(record, &field)),
            };
            self.strike(&field, &key, pk);
        }
    }

    /// Every key held by any bucket of any field, first occurrence order.
    pub fn all_keys(&self) -> Vec<PrimaryKey> {
        let mut seen = HashSet::new();
        self.record
            .values()
            .flat_map(|buckets| buckets.values())
            .flatten()
            .filter(|pk| seen.insert(*pk))
            .cloned()
            .collect()
    }

    /// Number of distinct keys held by the index.
    pub fn len(&self) -> usize {
        self.all_keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.values().all(|buckets| buckets.is_empty())
    }

    fn placement(&self, field: &str, pk: &PrimaryKey) -> Option<&IndexKey> {
        self.placements.get(field).and_then(|m| m.get(pk))
    }

    fn place(&mut self, field: &str, key: IndexKey, pk: PrimaryKey) {
        let bucket = self
            .record
            .entry(field.to_string())
            .or_default()
            .entry(key.clone())
            .or_default();
        if !bucket.contains(&pk) {
            bucket.push(pk.clone());
        }
        self.placements
            .entry(field.to_string())
            .or_default()
            .insert(pk, key);
    }

    fn strike(&mut self, field: &str, key: &IndexKey, pk: &PrimaryKey) {
        if let Some(buckets) = self.record.get_mut(field) {
            if let Some(ids) = buckets.get_mut(key) {
                ids.retain(|x| x != pk);
                if ids.is_empty() {
                    buckets.remove(key);
                }
            }
        }
        if let Some(m) = self.placements.get_mut(field) {
            if m.get(pk) == Some(key) {
                m.remove(pk);
            }
        }
    }
}
