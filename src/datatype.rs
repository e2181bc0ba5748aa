// records keep the order in which their fields were first assigned
use indexmap::IndexMap;

// used to order values the same loose way everywhere (sorting and filtering)
use std::cmp::Ordering;
// used to print out readable forms of a value
use std::fmt;

pub type Fields = IndexMap<String, Value>;

/// A schema-less value. Records are `Value::Object`s, but any non-scalar value
/// can be stored in a collection.
///
/// `Undefined` stands in for "absent": a field holding it is treated exactly
/// like a missing field by lookups, comparators and filters.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(Fields),
}

impl Value {
    pub fn object() -> Self {
        Value::Object(Fields::new())
    }
    pub fn is_defined(&self) -> bool {
        !matches!(self, Value::Undefined)
    }
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Object(_))
    }
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }
    pub fn as_object(&self) -> Option<&Fields> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }
    pub fn as_object_mut(&mut self) -> Option<&mut Fields> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Direct member access. Arrays are addressed by their numeric positions.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Object(o) => o.get(field),
            Value::Array(a) => field.parse::<usize>().ok().and_then(|i| a.get(i)),
            _ => None,
        }
    }

    /// Nested lookup along a dot separated path.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// Assigns `value` at a dot separated path, creating intermediate objects
    /// as needed. Returns false when the path runs into a scalar.
    pub fn set_path(&mut self, path: &str, value: Value) -> bool {
        let mut segments: Vec<&str> = path.split('.').collect();
        let last = match segments.pop() {
            Some(last) => last,
            None => return false,
        };
        let mut current = self;
        for segment in segments {
            let fields = match current {
                Value::Object(o) => o,
                _ => return false,
            };
            let next = fields
                .entry(segment.to_string())
                .or_insert_with(Value::object);
            if !next.is_defined() {
                *next = Value::object();
            }
            current = next;
        }
        match current {
            Value::Object(o) => {
                o.insert(last.to_string(), value);
                true
            }
            Value::Array(a) => match last.parse::<usize>() {
                Ok(i) if i < a.len() => {
                    a[i] = value;
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// The lookup rule shared by comparators and filters: direct access first,
    /// then the nested path when the name contains a dot. Undefined values are
    /// reported as absent.
    pub fn lookup(&self, field: &str) -> Option<&Value> {
        match self.get(field) {
            Some(v) if v.is_defined() => Some(v),
            _ if field.contains('.') => self.get_path(field).filter(|v| v.is_defined()),
            _ => None,
        }
    }
    /// Own fields of an object that hold a defined value, in insertion order.
    pub fn defined_fields(&self) -> Vec<(&str, &Value)> {
        match self {
            Value::Object(o) => o
                .iter()
                .filter(|(_, v)| v.is_defined())
                .map(|(k, v)| (k.as_str(), v))
                .collect(),
            _ => Vec::new(),
        }
    }
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.as_object_mut()
            .and_then(|o| o.insert(field.into(), value.into()))
    }
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.as_object_mut().and_then(|o| o.shift_remove(field))
    }

    /// Shallow mixin of the patch's own fields into this object.
    pub fn merge(&mut self, patch: &Fields) {
        if let Value::Object(o) = self {
            for (k, v) in patch {
                o.insert(k.clone(), v.clone());
            }
        }
    }

    /// A copy restricted to the given (possibly nested) fields.
    pub fn subobj(&self, fields: &[String]) -> Value {
        let mut out = Value::object();
        for field in fields {
            if let Some(v) = self.lookup(field) {
                out.set_path(field, v.clone());
            }
        }
        out
    }

    /// Numeric coercion following the loose rules of the comparisons.
    fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Null => Some(0.0),
            Value::String(s) if s.trim().is_empty() => Some(0.0),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }
    fn loose_gt(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a > b,
            (Value::Array(_) | Value::Object(_) | Value::Undefined, _) => false,
            (_, Value::Array(_) | Value::Object(_) | Value::Undefined) => false,
            _ => match (self.to_number(), other.to_number()) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
        }
    }

    /// Ternary comparison with loose semantics: strings lexicographically,
    /// everything else numerically where a number can be derived. When no
    /// ordering holds and the values differ, the left one is reported greater.
    pub fn loose_cmp(&self, other: &Value) -> Ordering {
        if self.loose_gt(other) {
            Ordering::Greater
        } else if other.loose_gt(self) {
            Ordering::Less
        } else if self == other {
            Ordering::Equal
        } else {
            Ordering::Greater
        }
    }

    // numbers (with null and booleans as 0/1), NaN, strings, arrays,
    // objects, undefined
    fn rank(&self) -> u8 {
        match self {
            Value::Null | Value::Bool(_) => 0,
            Value::Number(n) if n.is_nan() => 1,
            Value::Number(_) => 0,
            Value::String(_) => 2,
            Value::Array(_) => 3,
            Value::Object(_) => 4,
            Value::Undefined => 5,
        }
    }

    /// A total order for sorting. Values are ranked by kind first (numbers,
    /// then NaN, strings, arrays, objects and undefined last) and compared
    /// within their kind, so `a.total_cmp(b) == b.total_cmp(a).reverse()`
    /// holds for every pair. Unlike [`Value::loose_cmp`], strings are never
    /// coerced into numbers.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => a
                .iter()
                .zip(b)
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => match (self.rank(), other.rank()) {
                (0, 0) => match (self.to_number(), other.to_number()) {
                    (Some(a), Some(b)) => a.total_cmp(&b),
                    _ => Ordering::Equal,
                },
                (r1, r2) => r1.cmp(&r2),
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            // NaN is equal to itself here, otherwise no record holding one could
            // ever be found again
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) if n.is_nan() => write!(f, "NaN"),
            Value::Number(n) if n.is_infinite() => {
                write!(f, "{}", if *n > 0.0 { "Infinity" } else { "-Infinity" })
            }
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(a) => {
                let parts: Vec<String> = a.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
            Value::Object(_) => write!(f, "[object Object]"),
        }
    }
}

// ------------- Conversions --------------
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}
macro_rules! from_number {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(n: $t) -> Self {
                    Value::Number(n as f64)
                }
            }
        )*
    };
}
from_number!(f64, f32, i32, i64, u32, u64, usize);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}
impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(a: [T; N]) -> Self {
        Value::Array(a.into_iter().map(Into::into).collect())
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(o: Option<T>) -> Self {
        o.map_or(Value::Undefined, Into::into)
    }
}
impl From<Fields> for Value {
    fn from(o: Fields) -> Self {
        Value::Object(o)
    }
}
impl From<&Value> for Value {
    fn from(v: &Value) -> Self {
        v.clone()
    }
}
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}
