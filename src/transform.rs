//! Transformations and aggregates. All of them work on the current selection
//! (every record when no query is active), leave the collection untouched and,
//! for transformations, hand back a bred collection.

use indexmap::IndexMap;
use tracing::debug;

use crate::collection::{Collection, SortBy};
use crate::construct::Record;
use crate::datatype::{Fields, Value};

fn owned(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

impl Collection {
    fn selected(&self) -> Vec<Record> {
        self.selection().into_iter().cloned().collect()
    }

    pub fn filter(&self, predicate: impl Fn(&Value) -> bool) -> Collection {
        let kept = self
            .selection()
            .into_iter()
            .filter(|r| predicate(r.value()))
            .cloned()
            .collect();
        self.spawn(kept)
    }

    /// The first `n` records, or the last `-n` when `n` is negative.
    pub fn limit(&self, n: i64) -> Collection {
        let selected = self.selected();
        let count = n.unsigned_abs() as usize;
        let kept = if n >= 0 {
            selected.into_iter().take(count).collect()
        } else {
            let skip = selected.len().saturating_sub(count);
            selected.into_iter().skip(skip).collect()
        };
        self.spawn(kept)
    }

    pub fn sorted(&self, by: SortBy) -> Collection {
        let mut bred = self.spawn(self.selected());
        bred.sort(by);
        bred
    }

    /// Drops records whose value equals an earlier one.
    pub fn distinct(&self) -> Collection {
        let mut kept: Vec<Record> = Vec::new();
        for record in self.selection() {
            if !kept.iter().any(|k| k.value() == record.value()) {
                kept.push(record.clone());
            }
        }
        self.spawn(kept)
    }

    /// Records not equal to any value in `list`.
    pub fn diff(&self, list: &[Value]) -> Collection {
        let kept = self
            .selection()
            .into_iter()
            .filter(|r| !list.contains(r.value()))
            .cloned()
            .collect();
        self.spawn(kept)
    }

    /// Records equal to some value in `list`.
    pub fn intersect(&self, list: &[Value]) -> Collection {
        let kept = self
            .selection()
            .into_iter()
            .filter(|r| list.contains(r.value()))
            .cloned()
            .collect();
        self.spawn(kept)
    }

    /// Pairs every record with each later record whose `key_b` equals its
    /// `key_a`. Each pair yields a copy of the first record with the second
    /// (restricted to `fields`, if given) nested under `target`, or under the
    /// configured join field.
    pub fn join(
        &self,
        key_a: &str,
        key_b: &str,
        target: Option<&str>,
        fields: Option<&[&str]>,
    ) -> Collection {
        self.pair_up(key_a, key_b, target, fields, |a, b| a == b)
    }

    /// Like [`Collection::join`], pairing regardless of the key values.
    pub fn concat(
        &self,
        key_a: &str,
        key_b: &str,
        target: Option<&str>,
        fields: Option<&[&str]>,
    ) -> Collection {
        self.pair_up(key_a, key_b, target, fields, |_, _| true)
    }

    fn pair_up(
        &self,
        key_a: &str,
        key_b: &str,
        target: Option<&str>,
        fields: Option<&[&str]>,
        matches: impl Fn(&Value, &Value) -> bool,
    ) -> Collection {
        let target = target.unwrap_or(self.settings.join_field.as_str()).to_string();
        let fields = fields.map(owned);
        let selected = self.selection();
        let mut out = Vec::new();
        for (i, left) in selected.iter().enumerate() {
            let Some(foreign) = left.lookup(key_a) else {
                continue;
            };
            for right in &selected[i + 1..] {
                let Some(key) = right.lookup(key_b) else {
                    continue;
                };
                if !matches(foreign, key) {
                    continue;
                }
                let nested = match &fields {
                    Some(fields) => right.subobj(fields),
                    None => right.value().clone(),
                };
                let mut joined = left.value().clone();
                joined.insert(target.clone(), nested);
                out.push(joined);
            }
        }
        debug!(pairs = out.len(), key_a, key_b, "paired records");
        self.spawn_values(out)
    }

    /// Records holding an object under `field` are split into one record
    /// per member of that object. Other records pass through unchanged.
    pub fn split(&self, field: &str) -> Collection {
        let mut out = Vec::new();
        for record in self.selection() {
            match record.lookup(field) {
                Some(Value::Object(members)) if !members.is_empty() => {
                    for (name, member) in members {
                        let mut part = Fields::new();
                        part.insert(name.clone(), member.clone());
                        let mut piece = record.value().clone();
                        piece.set_path(field, Value::Object(part));
                        out.push(piece);
                    }
                }
                _ => out.push(record.value().clone()),
            }
        }
        self.spawn_values(out)
    }

    /// Copies without the given fields.
    pub fn skim(&self, fields: &[&str]) -> Collection {
        let kept = self
            .selection()
            .into_iter()
            .map(|r| {
                let mut value = r.value().clone();
                for field in fields {
                    value.remove(field);
                }
                Record::new(r.id(), value)
            })
            .collect();
        self.spawn(kept)
    }

    /// Copies restricted to the given fields.
    pub fn keep(&self, fields: &[&str]) -> Collection {
        let fields = owned(fields);
        let kept = self
            .selection()
            .into_iter()
            .map(|r| Record::new(r.id(), r.subobj(&fields)))
            .collect();
        self.spawn(kept)
    }

    /// One collection per distinct value of `field`, in order of first
    /// appearance. Records without the field belong to no group.
    pub fn group_by(&self, field: &str) -> Vec<Collection> {
        let mut groups: Vec<(Value, Vec<Record>)> = Vec::new();
        for record in self.selection() {
            let Some(key) = record.lookup(field) else {
                continue;
            };
            match groups.iter_mut().find(|(k, _)| k == key) {
                Some((_, members)) => members.push(record.clone()),
                None => groups.push((key.clone(), vec![record.clone()])),
            }
        }
        groups
            .into_iter()
            .map(|(_, members)| self.spawn(members))
            .collect()
    }

    pub fn each(&self, mut f: impl FnMut(&Record)) {
        for record in self.selection() {
            f(record);
        }
    }
    pub fn map<T>(&self, f: impl FnMut(&Record) -> T) -> Vec<T> {
        self.selection().into_iter().map(f).collect()
    }

    /// Per field, the values found across the selection.
    pub fn fetch_values(&self, fields: &[&str]) -> IndexMap<String, Vec<Value>> {
        let mut out: IndexMap<String, Vec<Value>> = fields
            .iter()
            .map(|f| (f.to_string(), Vec::new()))
            .collect();
        for record in self.selection() {
            for field in fields {
                if let (Some(value), Some(values)) = (record.lookup(field), out.get_mut(*field)) {
                    values.push(value.clone());
                }
            }
        }
        out
    }
    /// Each record flattened to an array of the given fields' values, or of
    /// all its own values when no fields are given.
    pub fn fetch_array(&self, fields: &[&str]) -> Vec<Vec<Value>> {
        self.map(|record| {
            if fields.is_empty() {
                record
                    .as_object()
                    .map(|o| o.values().cloned().collect())
                    .unwrap_or_else(|| record.as_array().cloned().unwrap_or_default())
            } else {
                fields
                    .iter()
                    .filter_map(|f| record.lookup(f).cloned())
                    .collect()
            }
        })
    }
    pub fn fetch_sub_obj(&self, fields: &[&str]) -> Vec<Value> {
        let fields = owned(fields);
        self.map(|record| record.subobj(&fields))
    }

    // ------------- aggregates -------------
    fn numbers(&self, field: &str) -> Vec<f64> {
        self.selection()
            .into_iter()
            .filter_map(|r| r.lookup(field).and_then(Value::as_f64))
            .collect()
    }

    /// Records in the selection where `field` is present.
    pub fn count(&self, field: &str) -> usize {
        self.selection()
            .into_iter()
            .filter(|r| r.lookup(field).is_some())
            .count()
    }
    pub fn sum(&self, field: &str) -> Option<f64> {
        let numbers = self.numbers(field);
        if numbers.is_empty() {
            return None;
        }
        Some(numbers.iter().sum())
    }
    pub fn mean(&self, field: &str) -> Option<f64> {
        let numbers = self.numbers(field);
        if numbers.is_empty() {
            return None;
        }
        Some(numbers.iter().sum::<f64>() / numbers.len() as f64)
    }
    /// Sample standard deviation. A single value deviates by zero.
    pub fn stddev(&self, field: &str) -> Option<f64> {
        let numbers = self.numbers(field);
        let mean = self.mean(field)?;
        if numbers.len() < 2 {
            return Some(0.0);
        }
        let variance = numbers.iter().map(|n| (n - mean).powi(2)).sum::<f64>()
            / (numbers.len() - 1) as f64;
        Some(variance.sqrt())
    }
    pub fn min(&self, field: &str) -> Option<f64> {
        self.numbers(field).into_iter().reduce(f64::min)
    }
    pub fn max(&self, field: &str) -> Option<f64> {
        self.numbers(field).into_iter().reduce(f64::max)
    }
}
