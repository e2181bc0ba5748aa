//! Ordering functions shared by sorting and by the ordering filters.
//!
//! A comparator receives two whole records and answers with an [`Ordering`].
//! Fields without a registered comparator get the default structural one,
//! which looks the field up directly, falls back to a nested path, and orders
//! absent values after present ones.
//!
//! Sorts on fields without a registered comparator use [`sort_field`]
//! instead: same lookup and absent-last rule, but a total order over values,
//! since the loose comparison can answer inconsistently for mixed kinds
//! (NaN, numeric and plain strings) and the sort must never see that.
//!
//! Filters over a set of fields, or over any field, reuse the very same
//! comparators through [`TriggeredComparator`]: the caller names the outcomes
//! it is looking for (the "triggers") and the first field producing one of
//! them decides. If no field fires, an outcome outside the trigger set is
//! returned, so a caller testing `== trigger` never gets a false positive.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::construct::OtherHasher;
use crate::datatype::{Fields, Value};
use crate::filter::Field;

pub type Comparator = Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>;

/// The structural comparison used for fields without a registered comparator.
pub fn compare_field(field: &str, a: &Value, b: &Value) -> Ordering {
    match (a.is_defined(), b.is_defined()) {
        (false, false) => return Ordering::Equal,
        (false, true) => return Ordering::Greater,
        (true, false) => return Ordering::Less,
        _ => (),
    }
    match (a.lookup(field), b.lookup(field)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(v1), Some(v2)) => v1.loose_cmp(v2),
    }
}

/// Like [`compare_field`], ranking present values with [`Value::total_cmp`].
pub fn sort_field(field: &str, a: &Value, b: &Value) -> Ordering {
    match (a.is_defined(), b.is_defined()) {
        (false, false) => return Ordering::Equal,
        (false, true) => return Ordering::Greater,
        (true, false) => return Ordering::Less,
        _ => (),
    }
    match (a.lookup(field), b.lookup(field)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(v1), Some(v2)) => v1.total_cmp(v2),
    }
}

pub fn default_comparator(field: &str) -> Comparator {
    let field = field.to_string();
    Arc::new(move |a: &Value, b: &Value| compare_field(&field, a, b))
}

/// Wraps a raw value under `field`, so it can be handed to a comparator as if
/// it were a record.
pub fn probe(field: &str, value: &Value) -> Value {
    let mut fields = Fields::new();
    fields.insert(field.to_string(), value.clone());
    Value::Object(fields)
}

#[derive(Clone, Default)]
pub struct ComparatorRegistry {
    kept: HashMap<String, Comparator, OtherHasher>,
}

impl ComparatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(&mut self, field: &str, comparator: Comparator) {
        self.kept.insert(field.to_string(), comparator);
    }
    pub fn remove(&mut self, field: &str) -> bool {
        self.kept.remove(field).is_some()
    }
    pub fn contains(&self, field: &str) -> bool {
        self.kept.contains_key(field)
    }
    /// The registered comparator for `field`, or the default one.
    pub fn get(&self, field: &str) -> Comparator {
        match self.kept.get(field) {
            Some(comparator) => Arc::clone(comparator),
            None => default_comparator(field),
        }
    }
    /// The registered comparator for `field`, or the total default order.
    pub fn sorter(&self, field: &str) -> Comparator {
        match self.kept.get(field) {
            Some(comparator) => Arc::clone(comparator),
            None => {
                let field = field.to_string();
                Arc::new(move |a: &Value, b: &Value| sort_field(&field, a, b))
            }
        }
    }
    /// Lexicographic chain of [`ComparatorRegistry::sorter`]s, as used by
    /// multi-field sorts.
    pub fn chain(&self, fields: &[String]) -> Comparator {
        let comparators: Vec<Comparator> = fields.iter().map(|f| self.sorter(f)).collect();
        Arc::new(move |a: &Value, b: &Value| {
            comparators
                .iter()
                .map(|c| c(a, b))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        })
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}
impl fmt::Debug for ComparatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names: Vec<&String> = self.kept.keys().collect();
        names.sort();
        f.debug_struct("ComparatorRegistry").field("fields", &names).finish()
    }
}

fn untriggered(triggers: &[Ordering]) -> Ordering {
    [Ordering::Equal, Ordering::Greater, Ordering::Less]
        .into_iter()
        .find(|o| !triggers.contains(o))
        .unwrap_or(Ordering::Equal)
}

#[derive(Clone)]
enum Target {
    One(String, Comparator),
    Set(Vec<(String, Comparator)>),
    // resolved per record, since the fields are only known then
    Any(Arc<ComparatorRegistry>),
}

/// Compares a record against a raw value through a field selector.
#[derive(Clone)]
pub struct TriggeredComparator {
    target: Target,
}

impl TriggeredComparator {
    pub fn new(registry: &ComparatorRegistry, field: &Field) -> Self {
        let target = match field {
            Field::Name(name) => Target::One(name.clone(), registry.get(name)),
            Field::Set(names) => Target::Set(
                names
                    .iter()
                    .map(|name| (name.clone(), registry.get(name)))
                    .collect(),
            ),
            Field::Any => Target::Any(Arc::new(registry.clone())),
        };
        Self { target }
    }

    /// For a single field the comparison result is returned as is. For a set
    /// of fields, or for any field of the record, the first result found in
    /// `triggers` is returned. Fields the record lacks are skipped.
    pub fn compare(&self, record: &Value, value: &Value, triggers: &[Ordering]) -> Ordering {
        match &self.target {
            Target::One(name, comparator) => comparator(record, &probe(name, value)),
            Target::Set(comparators) => {
                for (name, comparator) in comparators {
                    if record.lookup(name).is_none() {
                        continue;
                    }
                    let result = comparator(record, &probe(name, value));
                    if triggers.contains(&result) {
                        return result;
                    }
                }
                untriggered(triggers)
            }
            Target::Any(registry) => {
                for (name, _) in record.defined_fields() {
                    let result = registry.get(name)(record, &probe(name, value));
                    if triggers.contains(&result) {
                        return result;
                    }
                }
                untriggered(triggers)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn absent_values_sort_last() {
        let a = record(json!({"x": 1}));
        let b = record(json!({"y": 1}));
        assert_eq!(compare_field("x", &a, &b), Ordering::Less);
        assert_eq!(compare_field("x", &b, &a), Ordering::Greater);
        assert_eq!(compare_field("z", &a, &b), Ordering::Equal);
        assert_eq!(compare_field("x", &Value::Undefined, &a), Ordering::Greater);
    }

    #[test]
    fn nested_fallback() {
        let a = record(json!({"p": {"q": 1}}));
        let b = record(json!({"p": {"q": 2}}));
        assert_eq!(compare_field("p.q", &a, &b), Ordering::Less);
    }

    #[test]
    fn registered_comparator_wins() {
        let mut registry = ComparatorRegistry::new();
        registry.add("x", Arc::new(|a: &Value, b: &Value| compare_field("x", b, a)));
        let a = record(json!({"x": 1}));
        let b = record(json!({"x": 2}));
        assert_eq!(registry.get("x")(&a, &b), Ordering::Greater);
        assert_eq!(registry.sorter("x")(&a, &b), Ordering::Greater);
        assert_eq!(registry.get("y")(&a, &b), Ordering::Equal);
        assert!(registry.contains("x"));
        assert!(registry.remove("x"));
        assert!(!registry.remove("x"));
        assert_eq!(registry.get("x")(&a, &b), Ordering::Less);
    }

    #[test]
    fn sorting_order_ranks_incomparable_values() {
        let registry = ComparatorRegistry::new();
        let sorter = registry.sorter("n");
        let mut nan = Value::object();
        nan.insert("n", f64::NAN);
        let word = record(json!({"n": "s42"}));
        let number = record(json!({"n": 7}));
        assert_eq!(sorter(&nan, &number), Ordering::Greater);
        assert_eq!(sorter(&number, &nan), Ordering::Less);
        assert_eq!(sorter(&word, &nan), Ordering::Greater);
        assert_eq!(sorter(&nan, &word), Ordering::Less);
        assert_eq!(sorter(&record(json!({})), &word), Ordering::Greater);
        // the filter comparison stays loose
        assert_eq!(compare_field("n", &word, &number), Ordering::Greater);
        assert_eq!(compare_field("n", &number, &word), Ordering::Greater);
    }

    #[test]
    fn chain_breaks_ties() {
        let registry = ComparatorRegistry::new();
        let chained = registry.chain(&["a".to_string(), "b".to_string()]);
        let a = record(json!({"a": 1, "b": 2}));
        let b = record(json!({"a": 1, "b": 1}));
        assert_eq!(chained(&a, &b), Ordering::Greater);
    }

    #[test]
    fn triggers_over_field_sets() {
        let registry = ComparatorRegistry::new();
        let selector = Field::Set(vec!["a".to_string(), "b".to_string()]);
        let triggered = TriggeredComparator::new(&registry, &selector);
        let r = record(json!({"a": 1, "b": 5}));
        assert_eq!(triggered.compare(&r, &Value::from(5), &[Ordering::Equal]), Ordering::Equal);
        assert_eq!(triggered.compare(&r, &Value::from(7), &[Ordering::Equal]), Ordering::Greater);
        assert_eq!(triggered.compare(&r, &Value::from(3), &[Ordering::Greater]), Ordering::Greater);
        assert_eq!(triggered.compare(&r, &Value::from(9), &[Ordering::Greater]), Ordering::Equal);
        assert_eq!(
            triggered.compare(&r, &Value::from(0), &[Ordering::Equal, Ordering::Less]),
            Ordering::Greater
        );
    }

    #[test]
    fn wildcard_iterates_own_fields() {
        let registry = ComparatorRegistry::new();
        let triggered = TriggeredComparator::new(&registry, &Field::Any);
        let r = record(json!({"a": "x", "b": 3}));
        assert_eq!(triggered.compare(&r, &Value::from(3), &[Ordering::Equal]), Ordering::Equal);
        assert_eq!(triggered.compare(&r, &Value::from(4), &[Ordering::Less]), Ordering::Less);
    }
}
