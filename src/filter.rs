// the LIKE operators are compiled down to anchored regular expressions
use regex::{Regex, RegexBuilder};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::comparator::{probe, Comparator, ComparatorRegistry, TriggeredComparator};
use crate::construct::OtherHasher;
use crate::datatype::Value;
use crate::error::{NestError, Result};

pub type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub type FilterFactory =
    Arc<dyn Fn(&Field, &Value, &ComparatorRegistry) -> Result<Predicate> + Send + Sync>;

// ------------- Field -------------
/// What a condition looks at: one field, any field of the record, or a set
/// of fields of which at least one has to satisfy the condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Name(String),
    Any,
    Set(Vec<String>),
}
impl From<&str> for Field {
    fn from(s: &str) -> Self {
        match s {
            "*" => Field::Any,
            _ => Field::Name(s.to_string()),
        }
    }
}
impl From<String> for Field {
    fn from(s: String) -> Self {
        Field::from(s.as_str())
    }
}
impl From<Vec<&str>> for Field {
    fn from(v: Vec<&str>) -> Self {
        Field::Set(v.into_iter().map(String::from).collect())
    }
}
impl From<Vec<String>> for Field {
    fn from(v: Vec<String>) -> Self {
        Field::Set(v)
    }
}
impl<const N: usize> From<[&str; N]> for Field {
    fn from(v: [&str; N]) -> Self {
        Field::Set(v.iter().map(|s| s.to_string()).collect())
    }
}
impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Field::Name(name) => write!(f, "{}", name),
            Field::Any => write!(f, "*"),
            Field::Set(names) => write!(f, "[{}]", names.join(", ")),
        }
    }
}

// ------------- Operator -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    Exists,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Between,
    NotBetween,
    In,
    NotIn,
    Like,
    ILike,
    Custom(String),
}
impl From<&str> for Operator {
    fn from(symbol: &str) -> Self {
        match symbol {
            "E" => Operator::Exists,
            "=" | "==" => Operator::Eq,
            "!=" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            "><" => Operator::Between,
            "<>" => Operator::NotBetween,
            "in" => Operator::In,
            "!in" => Operator::NotIn,
            "LIKE" => Operator::Like,
            "iLIKE" => Operator::ILike,
            other => Operator::Custom(other.to_string()),
        }
    }
}
impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let symbol = match self {
            Operator::Exists => "E",
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Between => "><",
            Operator::NotBetween => "<>",
            Operator::In => "in",
            Operator::NotIn => "!in",
            Operator::Like => "LIKE",
            Operator::ILike => "iLIKE",
            Operator::Custom(name) => name,
        };
        write!(f, "{}", symbol)
    }
}

// ------------- FilterRegistry -------------
/// User supplied operators, looked up by name when a condition uses
/// [`Operator::Custom`].
#[derive(Clone, Default)]
pub struct FilterRegistry {
    kept: HashMap<String, FilterFactory, OtherHasher>,
}
impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(&mut self, name: &str, factory: FilterFactory) {
        self.kept.insert(name.to_string(), factory);
    }
    pub fn get(&self, name: &str) -> Option<FilterFactory> {
        self.kept.get(name).cloned()
    }
    pub fn contains(&self, name: &str) -> bool {
        self.kept.contains_key(name)
    }
}
impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names: Vec<&String> = self.kept.keys().collect();
        names.sort();
        f.debug_struct("FilterRegistry").field("operators", &names).finish()
    }
}

// Resolves the fields a per-field test runs over.
#[derive(Clone)]
enum Resolver {
    Listed(Vec<(String, Comparator)>),
    Any(Arc<ComparatorRegistry>),
}
impl Resolver {
    fn new(registry: &ComparatorRegistry, field: &Field) -> Self {
        match field {
            Field::Name(name) => Resolver::Listed(vec![(name.clone(), registry.get(name))]),
            Field::Set(names) => Resolver::Listed(
                names.iter().map(|n| (n.clone(), registry.get(n))).collect(),
            ),
            Field::Any => Resolver::Any(Arc::new(registry.clone())),
        }
    }
    // true if some defined field passes the test
    fn any_field(&self, record: &Value, test: impl Fn(&str, &Comparator) -> bool) -> bool {
        match self {
            Resolver::Listed(listed) => listed
                .iter()
                .any(|(name, comparator)| record.lookup(name).is_some() && test(name.as_str(), comparator)),
            Resolver::Any(registry) => record
                .defined_fields()
                .iter()
                .any(|&(name, _)| test(name, &registry.get(name))),
        }
    }
}

fn within(comparator: &Comparator, field: &str, record: &Value, low: &Value, high: &Value) -> bool {
    comparator(record, &probe(field, low)) != Ordering::Less
        && comparator(record, &probe(field, high)) != Ordering::Greater
}

fn like_regex(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    let mut expression = String::from("^");
    for c in pattern.chars() {
        match c {
            '%' => expression.push_str(".*"),
            '_' => expression.push('.'),
            c => expression.push_str(&regex::escape(&c.to_string())),
        }
    }
    expression.push('$');
    RegexBuilder::new(&expression)
        .case_insensitive(case_insensitive)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| NestError::Query(format!("invalid pattern '{}': {}", pattern, e)))
}

fn validate(field: &Field, op: &Operator, value: &Value) -> Result<()> {
    match field {
        Field::Name(name) if name.is_empty() => {
            return Err(NestError::Query("empty field name".to_string()));
        }
        Field::Set(names) if names.is_empty() => {
            return Err(NestError::Query("empty field set".to_string()));
        }
        _ => (),
    }
    if *op != Operator::Exists && !value.is_defined() {
        return Err(NestError::Query(format!("operator '{}' on {} requires a value", op, field)));
    }
    match op {
        Operator::Between | Operator::NotBetween => match value {
            Value::Array(bounds) if bounds.len() == 2 => Ok(()),
            _ => Err(NestError::Query(format!(
                "operator '{}' expects an array of two bounds, got {}",
                op,
                value.type_name()
            ))),
        },
        Operator::In | Operator::NotIn => match value {
            Value::Array(_) => Ok(()),
            _ => Err(NestError::Query(format!(
                "operator '{}' expects an array, got {}",
                op,
                value.type_name()
            ))),
        },
        Operator::Like | Operator::ILike => match value {
            Value::String(_) => Ok(()),
            _ => Err(NestError::Query(format!(
                "operator '{}' expects a string pattern, got {}",
                op,
                value.type_name()
            ))),
        },
        _ => Ok(()),
    }
}

/// Compiles a `(field, operator, value)` condition into a predicate.
pub fn generate(
    field: &Field,
    op: &Operator,
    value: &Value,
    comparators: &ComparatorRegistry,
    filters: &FilterRegistry,
) -> Result<Predicate> {
    validate(field, op, value)?;
    let value = value.clone();
    let guarded = match field {
        Field::Name(name) => Some(name.clone()),
        _ => None,
    };
    // single fields must be present for ordering tests, since absent values
    // compare greater than anything
    let present = move |record: &Value| guarded.as_ref().is_none_or(|n| record.lookup(n).is_some());

    let predicate: Predicate = match op {
        Operator::Exists => {
            let field = field.clone();
            Arc::new(move |record: &Value| match &field {
                Field::Name(name) => record.lookup(name).is_some(),
                Field::Set(names) => names.iter().any(|n| record.lookup(n).is_some()),
                Field::Any => !record.defined_fields().is_empty(),
            })
        }
        Operator::Eq | Operator::Ne => {
            let comparator = TriggeredComparator::new(comparators, field);
            let wanted = *op == Operator::Eq;
            Arc::new(move |record: &Value| {
                (comparator.compare(record, &value, &[Ordering::Equal]) == Ordering::Equal) == wanted
            })
        }
        Operator::Gt | Operator::Lt => {
            let comparator = TriggeredComparator::new(comparators, field);
            let trigger = if *op == Operator::Gt { Ordering::Greater } else { Ordering::Less };
            Arc::new(move |record: &Value| {
                present(record) && comparator.compare(record, &value, &[trigger]) == trigger
            })
        }
        Operator::Ge | Operator::Le => {
            let comparator = TriggeredComparator::new(comparators, field);
            let triggers = if *op == Operator::Ge {
                [Ordering::Equal, Ordering::Greater]
            } else {
                [Ordering::Equal, Ordering::Less]
            };
            Arc::new(move |record: &Value| {
                present(record) && triggers.contains(&comparator.compare(record, &value, &triggers))
            })
        }
        Operator::Between | Operator::NotBetween => {
            let resolver = Resolver::new(comparators, field);
            let (low, high) = match value.as_array().map(Vec::as_slice) {
                Some([low, high]) => (low.clone(), high.clone()),
                _ => return Err(NestError::Query(format!("operator '{}' expects two bounds", op))),
            };
            let inside = *op == Operator::Between;
            Arc::new(move |record: &Value| {
                resolver.any_field(record, |name, comparator| {
                    within(comparator, name, record, &low, &high) == inside
                })
            })
        }
        Operator::In | Operator::NotIn => {
            let resolver = Resolver::new(comparators, field);
            let candidates = value.as_array().cloned().unwrap_or_default();
            let wanted = *op == Operator::In;
            Arc::new(move |record: &Value| {
                let found = resolver.any_field(record, |name, comparator| {
                    candidates
                        .iter()
                        .any(|c| comparator(record, &probe(name, c)) == Ordering::Equal)
                });
                found == wanted
            })
        }
        Operator::Like | Operator::ILike => {
            let resolver = Resolver::new(comparators, field);
            let regex = like_regex(value.as_str().unwrap_or_default(), *op == Operator::ILike)?;
            Arc::new(move |record: &Value| {
                resolver.any_field(record, |name, _| {
                    record
                        .lookup(name)
                        .is_some_and(|v| regex.is_match(&v.to_string()))
                })
            })
        }
        Operator::Custom(name) => {
            let factory = filters
                .get(name)
                .ok_or_else(|| NestError::Query(format!("unknown operator '{}'", name)))?;
            factory(field, &value, comparators)?
        }
    };
    Ok(predicate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(field: impl Into<Field>, op: &str, value: serde_json::Value, record: serde_json::Value) -> bool {
        let predicate = generate(
            &field.into(),
            &Operator::from(op),
            &Value::from(value),
            &ComparatorRegistry::new(),
            &FilterRegistry::new(),
        )
        .expect("valid condition");
        predicate(&Value::from(record))
    }

    #[test]
    fn equality_and_ordering() {
        assert!(check("a", "=", json!(1), json!({"a": 1})));
        assert!(!check("a", "!=", json!(1), json!({"a": 1})));
        assert!(check("a", ">", json!(1), json!({"a": 2})));
        assert!(!check("a", ">", json!(1), json!({"b": 2})));
        assert!(check("a", ">=", json!(2), json!({"a": 2})));
        assert!(check("a", "<", json!(3), json!({"a": 2})));
        assert!(!check("a", "<", json!(3), json!({"b": 2})));
        assert!(check("a", "<=", json!(2), json!({"a": 2})));
    }

    #[test]
    fn ranges_are_inclusive() {
        assert!(check("a", "><", json!([1, 3]), json!({"a": 1})));
        assert!(check("a", "><", json!([1, 3]), json!({"a": 3})));
        assert!(!check("a", "><", json!([1, 3]), json!({"a": 4})));
        assert!(check("a", "<>", json!([1, 3]), json!({"a": 4})));
        assert!(!check("a", "<>", json!([1, 3]), json!({"a": 2})));
        assert!(!check("a", "<>", json!([1, 3]), json!({"b": 9})));
    }

    #[test]
    fn range_over_any_field() {
        assert!(check("*", "><", json!([10, 20]), json!({"x": 1, "y": 15})));
        assert!(!check("*", "><", json!([10, 20]), json!({"x": 1, "y": 25})));
    }

    #[test]
    fn membership() {
        assert!(check("a", "in", json!([1, 2]), json!({"a": 2})));
        assert!(!check("a", "in", json!([1, 2]), json!({"a": 3})));
        assert!(check("a", "!in", json!([1, 2]), json!({"a": 3})));
        assert!(check("a", "!in", json!([1, 2]), json!({"b": 1})));
        assert!(check(["a", "b"], "in", json!([7]), json!({"a": 1, "b": 7})));
    }

    #[test]
    fn field_sets_and_wildcards() {
        assert!(check(["a", "b"], "=", json!(2), json!({"a": 1, "b": 2})));
        assert!(!check(["a", "b"], "=", json!(3), json!({"a": 1, "b": 2})));
        assert!(check("*", "=", json!("x"), json!({"a": 1, "b": "x"})));
        assert!(check("*", "E", json!(null), json!({"a": 1})));
        assert!(check(["z", "a"], "E", json!(null), json!({"a": 1})));
        assert!(!check("z", "E", json!(null), json!({"a": 1})));
    }

    #[test]
    fn like_patterns() {
        assert!(check("name", "LIKE", json!("Al%"), json!({"name": "Alice"})));
        assert!(!check("name", "LIKE", json!("al%"), json!({"name": "Alice"})));
        assert!(check("name", "iLIKE", json!("al%"), json!({"name": "Alice"})));
        assert!(check("name", "LIKE", json!("B_b"), json!({"name": "Bob"})));
        assert!(!check("name", "LIKE", json!("B_b"), json!({"name": "Bobb"})));
        // regex metacharacters are taken literally
        assert!(check("name", "LIKE", json!("a.c"), json!({"name": "a.c"})));
        assert!(!check("name", "LIKE", json!("a.c"), json!({"name": "abc"})));
        assert!(check("*", "LIKE", json!("4%"), json!({"n": 42})));
    }

    #[test]
    fn malformed_conditions_are_rejected() {
        let registry = ComparatorRegistry::new();
        let filters = FilterRegistry::new();
        let attempt = |op: &str, value: Value| {
            generate(&Field::from("a"), &Operator::from(op), &value, &registry, &filters)
        };
        assert!(matches!(attempt("=", Value::Undefined), Err(NestError::Query(_))));
        assert!(matches!(attempt("><", Value::from(1)), Err(NestError::Query(_))));
        assert!(matches!(attempt("in", Value::from("x")), Err(NestError::Query(_))));
        assert!(matches!(attempt("~~", Value::from(1)), Err(NestError::Query(_))));
        assert!(attempt("E", Value::Undefined).is_ok());
    }

    #[test]
    fn custom_operators() {
        let mut filters = FilterRegistry::new();
        filters.add(
            "even",
            Arc::new(|field: &Field, _: &Value, _: &ComparatorRegistry| -> Result<Predicate> {
                let name = field.to_string();
                let predicate: Predicate = Arc::new(move |r: &Value| {
                    r.lookup(&name).and_then(Value::as_f64).is_some_and(|n| n % 2.0 == 0.0)
                });
                Ok(predicate)
            }),
        );
        let predicate = generate(
            &Field::from("n"),
            &Operator::from("even"),
            &Value::Null,
            &ComparatorRegistry::new(),
            &filters,
        )
        .expect("registered operator");
        assert!(predicate(&Value::from(json!({"n": 4}))));
        assert!(!predicate(&Value::from(json!({"n": 5}))));
    }
}
