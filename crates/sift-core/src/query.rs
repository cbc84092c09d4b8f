//! Resolves a [`Filter`] into primary keys using only the index.

use crate::error::{Result, SiftError};
use crate::filter::{ComparisonOperator, Filter, FilterItem};
use crate::index::{Index, IndexedFieldRecord};
use crate::value::{js_string, value_to_number, IndexKey, PrimaryKey};
use serde_json::Value;
use std::collections::HashSet;

const SENTINELS: [IndexKey; 3] = [IndexKey::Null, IndexKey::Undefined, IndexKey::Empty];

/// Read-only evaluator over one [`Index`]. Holds no state of its own, so
/// any number of clients may share an index.
#[derive(Debug, Clone, Copy)]
pub struct QueryClient<'a> {
    index: &'a Index,
}

impl<'a> QueryClient<'a> {
    pub fn new(index: &'a Index) -> Self {
        Self { index }
    }

    pub fn query(&self, filter: &Filter) -> Result<Vec<PrimaryKey>> {
        if let Some(item) = &filter.filter {
            return self.query_item(item);
        }
        if let Some(and) = filter.and.as_deref().filter(|f| !f.is_empty()) {
            let mut acc = self.query(&and[0])?;
            for sub in &and[1..] {
                acc = intersect(&acc, &self.query(sub)?);
            }
            return Ok(acc);
        }
        if let Some(or) = filter.or.as_deref().filter(|f| !f.is_empty()) {
            let mut seen = HashSet::new();
            let mut acc = Vec::new();
            for sub in or {
                for pk in self.query(sub)? {
                    if seen.insert(pk.clone()) {
                        acc.push(pk);
                    }
                }
            }
            return Ok(acc);
        }
        if let Some(not) = &filter.not {
            let positive: HashSet<PrimaryKey> = self.query(not)?.into_iter().collect();
            return Ok(self
                .index
                .all_keys()
                .into_iter()
                .filter(|pk| !positive.contains(pk))
                .collect());
        }
        Ok(Vec::new())
    }

    fn query_item(&self, item: &FilterItem) -> Result<Vec<PrimaryKey>> {
        let hits = self.query_index(
            &item.property,
            &item.operation,
            &item.value,
            item.is_case_sensitive(),
        )?;
        if item.include_empty != Some(true) {
            return Ok(hits);
        }
        let empties = match self.index.field(&item.property) {
            Some(buckets) => collect(buckets, |k| k.is_sentinel()),
            None => Vec::new(),
        };
        Ok(union(&hits, &empties))
    }

    /// Evaluate one comparison against the buckets of `field`.
    pub fn query_index(
        &self,
        field: &str,
        op: &ComparisonOperator,
        value: &Value,
        case_sensitive: bool,
    ) -> Result<Vec<PrimaryKey>> {
        let Some(buckets) = self.index.field(field) else {
            return Ok(Vec::new());
        };

        let keys = match op {
            ComparisonOperator::Eq => buckets
                .get(&IndexKey::from_resolved(Some(value)))
                .cloned()
                .unwrap_or_default(),
            ComparisonOperator::Gt => numeric(buckets, value, |k, v| k > v),
            ComparisonOperator::Gte => numeric(buckets, value, |k, v| k >= v),
            ComparisonOperator::Lt => numeric(buckets, value, |k, v| k < v),
            ComparisonOperator::Lte => numeric(buckets, value, |k, v| k <= v),
            ComparisonOperator::Contains => {
                let needle = Needle::new(value, case_sensitive);
                collect(buckets, |k| k.as_value().is_some_and(|s| needle.found_in(s)))
            }
            ComparisonOperator::NotContains => {
                let needle = Needle::new(value, case_sensitive);
                collect(buckets, |k| !k.as_value().is_some_and(|s| needle.found_in(s)))
            }
            ComparisonOperator::StartsWith => {
                let needle = Needle::new(value, case_sensitive);
                collect(buckets, |k| k.as_value().is_some_and(|s| needle.prefix_of(s)))
            }
            ComparisonOperator::In => {
                let mut acc = KeyCollector::default();
                for key in operand_keys(value) {
                    if let Some(ids) = buckets.get(&key) {
                        acc.extend(ids);
                    }
                }
                acc.finish()
            }
            ComparisonOperator::Between => match value.as_array().map(Vec::as_slice) {
                Some([min, max]) => {
                    let (min, max) = (value_to_number(min), value_to_number(max));
                    collect(buckets, |k| {
                        let n = k.as_number();
                        n >= min && n <= max
                    })
                }
                _ => Vec::new(),
            },
            ComparisonOperator::IsNull => buckets.get(&IndexKey::Null).cloned().unwrap_or_default(),
            ComparisonOperator::IsNotEmpty => collect(buckets, |k| !k.is_sentinel()),
            ComparisonOperator::IsEmpty => collect(buckets, |k| SENTINELS.contains(k)),
            ComparisonOperator::IsNoneOf => {
                let excluded: HashSet<IndexKey> = operand_keys(value).into_iter().collect();
                collect(buckets, |k| !excluded.contains(k))
            }
            ComparisonOperator::Unsupported(name) => {
                return Err(SiftError::UnsupportedOperator(name.clone()));
            }
        };
        Ok(keys)
    }
}

/// Elements of `a` that are also in `b`, in `a`'s order.
pub fn intersect(a: &[PrimaryKey], b: &[PrimaryKey]) -> Vec<PrimaryKey> {
    let b: HashSet<&PrimaryKey> = b.iter().collect();
    a.iter().filter(|pk| b.contains(pk)).cloned().collect()
}

/// `a` followed by `b`, duplicates dropped.
pub fn union(a: &[PrimaryKey], b: &[PrimaryKey]) -> Vec<PrimaryKey> {
    let mut seen = HashSet::new();
    a.iter()
        .chain(b)
        .filter(|pk| seen.insert(*pk))
        .cloned()
        .collect()
}

fn collect(buckets: &IndexedFieldRecord, keep: impl Fn(&IndexKey) -> bool) -> Vec<PrimaryKey> {
    let mut acc = KeyCollector::default();
    for (key, ids) in buckets {
        if keep(key) {
            acc.extend(ids);
        }
    }
    acc.finish()
}

/// Deduplicating accumulator over bucket contents, first occurrence wins.
#[derive(Default)]
struct KeyCollector<'a> {
    seen: HashSet<&'a PrimaryKey>,
    out: Vec<PrimaryKey>,
}

impl<'a> KeyCollector<'a> {
    fn extend(&mut self, ids: &'a [PrimaryKey]) {
        for pk in ids {
            if self.seen.insert(pk) {
                self.out.push(pk.clone());
            }
        }
    }

    fn finish(self) -> Vec<PrimaryKey> {
        self.out
    }
}

// NaN on either side fails every comparison, so non-numeric buckets drop out.
fn numeric(buckets: &IndexedFieldRecord, value: &Value, cmp: impl Fn(f64, f64) -> bool) -> Vec<PrimaryKey> {
    let v = value_to_number(value);
    collect(buckets, |k| cmp(k.as_number(), v))
}

fn operand_keys(value: &Value) -> Vec<IndexKey> {
    match value {
        Value::Array(items) => items.iter().map(|v| IndexKey::from_resolved(Some(v))).collect(),
        other => vec![IndexKey::from_resolved(Some(other))],
    }
}

struct Needle {
    text: String,
    case_sensitive: bool,
}

impl Needle {
    fn new(value: &Value, case_sensitive: bool) -> Self {
        let text = js_string(value);
        let text = if case_sensitive { text } else { text.to_lowercase() };
        Self { text, case_sensitive }
    }

    fn found_in(&self, hay: &str) -> bool {
        if self.case_sensitive {
            hay.contains(&self.text)
        } else {
            hay.to_lowercase().contains(&self.text)
        }
    }

    fn prefix_of(&self, hay: &str) -> bool {
        if self.case_sensitive {
            hay.starts_with(&self.text)
        } else {
            hay.to_lowercase().starts_with(&self.text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pk(s: &str) -> PrimaryKey {
        PrimaryKey::from(s)
    }

    fn leaf(property: &str, op: ComparisonOperator, value: Value) -> Filter {
        Filter::leaf(FilterItem::new(property, op, value))
    }

    fn sorted(mut keys: Vec<PrimaryKey>) -> Vec<PrimaryKey> {
        keys.sort();
        keys
    }

    fn status_index() -> Index {
        let mut index = Index::new("id");
        for rec in [
            json!({"id": "a", "status": "ok"}),
            json!({"id": "b", "status": null}),
            json!({"id": "c", "status": "ok"}),
        ] {
            index.set(&rec, &["status"]);
        }
        index
    }

    #[test]
    fn eq_and_is_null_follow_updates() -> Result<()> {
        let mut index = status_index();
        let ok = leaf("status", ComparisonOperator::Eq, json!("ok"));
        assert_eq!(QueryClient::new(&index).query(&ok)?, vec![pk("a"), pk("c")]);
        assert_eq!(
            QueryClient::new(&index).query(&leaf("status", ComparisonOperator::IsNull, Value::Null))?,
            vec![pk("b")]
        );
        assert!(QueryClient::new(&index)
            .query(&leaf("status", ComparisonOperator::Eq, json!("nope")))?
            .is_empty());

        index.update(&pk("a"), "status", Some(&json!("ok")), Some(&json!("bad")))?;
        assert_eq!(QueryClient::new(&index).query(&ok)?, vec![pk("c")]);
        Ok(())
    }

    #[test]
    fn sentinel_buckets_answer_empty_queries() -> Result<()> {
        let mut index = Index::new("id");
        index.set(&json!({"id": "n", "v": null}), &["v"]);
        index.set(&json!({"id": "u"}), &["v"]);
        index.set(&json!({"id": "e", "v": ""}), &["v"]);
        index.set(&json!({"id": "x", "v": "__NULL__"}), &["v"]);
        let client = QueryClient::new(&index);

        assert_eq!(
            sorted(client.query(&leaf("v", ComparisonOperator::IsEmpty, Value::Null))?),
            vec![pk("e"), pk("n"), pk("u")]
        );
        assert_eq!(client.query(&leaf("v", ComparisonOperator::IsNull, Value::Null))?, vec![pk("n")]);
        assert_eq!(client.query(&leaf("v", ComparisonOperator::IsNotEmpty, Value::Null))?, vec![pk("x")]);
        assert_eq!(client.query(&leaf("v", ComparisonOperator::Eq, Value::Null))?, vec![pk("n")]);
        Ok(())
    }

    #[test]
    fn numeric_ranges_skip_non_numbers() -> Result<()> {
        let mut index = Index::new("id");
        for (id, n) in [("one", json!("1")), ("five", json!(5)), ("ten", json!("10")), ("fifteen", json!(15))] {
            index.set(&json!({"id": id, "n": n}), &["n"]);
        }
        index.set(&json!({"id": "word", "n": "many"}), &["n"]);
        index.set(&json!({"id": "none", "n": null}), &["n"]);
        let client = QueryClient::new(&index);

        assert_eq!(
            sorted(client.query(&leaf("n", ComparisonOperator::Gte, json!(5)))?),
            sorted(vec![pk("five"), pk("ten"), pk("fifteen")])
        );
        assert_eq!(
            sorted(client.query(&leaf("n", ComparisonOperator::Between, json!([5, 10])))?),
            sorted(vec![pk("five"), pk("ten")])
        );
        assert_eq!(client.query(&leaf("n", ComparisonOperator::Lt, json!("5")))?, vec![pk("one")]);
        assert_eq!(
            sorted(client.query(&leaf("n", ComparisonOperator::Gt, json!(9)))?),
            sorted(vec![pk("ten"), pk("fifteen")])
        );
        assert!(client.query(&leaf("n", ComparisonOperator::Lte, json!("abc")))?.is_empty());
        assert!(client.query(&leaf("n", ComparisonOperator::Between, json!([5])))?.is_empty());
        Ok(())
    }

    #[test]
    fn text_operators_respect_case_flag() -> Result<()> {
        let mut index = Index::new("id");
        index.set(&json!({"id": 1, "name": "Acme Corp"}), &["name"]);
        index.set(&json!({"id": 2, "name": "acme inc"}), &["name"]);
        index.set(&json!({"id": 3, "name": "Other"}), &["name"]);
        index.set(&json!({"id": 4, "name": null}), &["name"]);
        let client = QueryClient::new(&index);

        let insensitive = Filter::leaf(
            FilterItem::new("name", ComparisonOperator::Contains, json!("acme")).case_sensitive(false),
        );
        assert_eq!(
            sorted(client.query(&insensitive)?),
            vec![PrimaryKey::Int(1), PrimaryKey::Int(2)]
        );
        assert_eq!(
            client.query(&leaf("name", ComparisonOperator::Contains, json!("acme")))?,
            vec![PrimaryKey::Int(2)]
        );
        assert_eq!(
            sorted(client.query(&leaf("name", ComparisonOperator::NotContains, json!("acme")))?),
            vec![PrimaryKey::Int(1), PrimaryKey::Int(3), PrimaryKey::Int(4)]
        );
        let prefix = Filter::leaf(
            FilterItem::new("name", ComparisonOperator::StartsWith, json!("ACME")).case_sensitive(false),
        );
        assert_eq!(sorted(client.query(&prefix)?), vec![PrimaryKey::Int(1), PrimaryKey::Int(2)]);
        Ok(())
    }

    #[test]
    fn list_operators() -> Result<()> {
        let mut index = Index::new("id");
        for (id, stage) in [("a", "LEAD"), ("b", "TARGET"), ("c", "LEAD"), ("d", "CUSTOMER")] {
            index.set(&json!({"id": id, "stage": stage}), &["stage"]);
        }
        index.set(&json!({"id": "e"}), &["stage"]);
        let client = QueryClient::new(&index);

        assert_eq!(
            client.query(&leaf("stage", ComparisonOperator::In, json!(["LEAD", "CUSTOMER", "NONE"])))?,
            vec![pk("a"), pk("c"), pk("d")]
        );
        assert_eq!(
            client.query(&leaf("stage", ComparisonOperator::In, json!("TARGET")))?,
            vec![pk("b")]
        );
        assert_eq!(
            sorted(client.query(&leaf("stage", ComparisonOperator::IsNoneOf, json!(["LEAD", "TARGET"])))?),
            vec![pk("d"), pk("e")]
        );
        assert!(client.query(&leaf("stage", ComparisonOperator::In, json!([])))?.is_empty());
        Ok(())
    }

    #[test]
    fn boolean_combinators() -> Result<()> {
        let mut index = Index::new("id");
        for rec in [
            json!({"id": "a", "status": "ok", "owner": "u1"}),
            json!({"id": "b", "status": "bad", "owner": "u1"}),
            json!({"id": "c", "status": "ok", "owner": "u2"}),
            json!({"id": "d", "status": "ok", "owner": "u1"}),
        ] {
            index.set(&rec, &["status", "owner"]);
        }
        let client = QueryClient::new(&index);
        let ok = leaf("status", ComparisonOperator::Eq, json!("ok"));
        let u1 = leaf("owner", ComparisonOperator::Eq, json!("u1"));

        assert_eq!(client.query(&Filter::and(vec![ok.clone(), u1.clone()]))?, vec![pk("a"), pk("d")]);
        assert_eq!(
            sorted(client.query(&Filter::or(vec![ok.clone(), u1.clone()]))?),
            vec![pk("a"), pk("b"), pk("c"), pk("d")]
        );
        assert_eq!(client.query(&Filter::not(ok))?, vec![pk("b")]);
        assert!(client.query(&Filter::and(Vec::new()))?.is_empty());
        assert!(client.query(&Filter::default())?.is_empty());
        Ok(())
    }

    #[test]
    fn include_empty_adds_absent_values() -> Result<()> {
        let mut index = Index::new("id");
        index.set(&json!({"id": "a", "score": 7}), &["score"]);
        index.set(&json!({"id": "b", "score": 2}), &["score"]);
        index.set(&json!({"id": "c"}), &["score"]);
        let client = QueryClient::new(&index);
        let f = Filter::leaf(FilterItem::new("score", ComparisonOperator::Gt, json!(5)).include_empty(true));
        assert_eq!(client.query(&f)?, vec![pk("a"), pk("c")]);
        Ok(())
    }

    #[test]
    fn unindexed_field_is_empty_and_bad_operator_fails() {
        let index = status_index();
        let client = QueryClient::new(&index);
        let missing = client.query(&leaf("owner", ComparisonOperator::Eq, json!("u1")));
        assert!(matches!(missing, Ok(ref v) if v.is_empty()));
        let missing = client.query(&leaf("owner", ComparisonOperator::from("ENDS_WITH"), json!("k")));
        assert!(matches!(missing, Ok(ref v) if v.is_empty()));

        let bad = client.query(&leaf("status", ComparisonOperator::from("ENDS_WITH"), json!("k")));
        assert!(matches!(bad, Err(SiftError::UnsupportedOperator(op)) if op == "ENDS_WITH"));
    }

    #[test]
    fn wide_fields_collect_every_bucket_once() -> Result<()> {
        let mut index = Index::new("id");
        let n = 20_000i64;
        for i in 0..n {
            index.set(&json!({"id": i, "code": format!("c{i}")}), &["code"]);
        }
        index.set(&json!({"id": n, "code": null}), &["code"]);
        let client = QueryClient::new(&index);

        let present = client.query(&leaf("code", ComparisonOperator::IsNotEmpty, Value::Null))?;
        assert_eq!(present.len(), n as usize);
        let unique: HashSet<&PrimaryKey> = present.iter().collect();
        assert_eq!(unique.len(), present.len());

        let listed: Vec<Value> = (0..n).map(|i| json!(format!("c{i}"))).collect();
        let hits = client.query(&leaf("code", ComparisonOperator::In, Value::Array(listed)))?;
        assert_eq!(hits.len(), n as usize);
        assert_eq!(hits[0], PrimaryKey::Int(0));
        assert_eq!(hits[hits.len() - 1], PrimaryKey::Int(n - 1));
        Ok(())
    }

    #[test]
    fn set_helpers_keep_order_and_drop_duplicates() {
        let a = vec![pk("x"), pk("y"), pk("z")];
        let b = vec![pk("z"), pk("x"), pk("w")];
        assert_eq!(intersect(&a, &b), vec![pk("x"), pk("z")]);
        assert_eq!(union(&a, &b), vec![pk("x"), pk("y"), pk("z"), pk("w")]);
    }
}
