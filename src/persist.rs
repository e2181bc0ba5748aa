//! Saving and loading collections.
//!
//! Records are written as an ordered list of JSON documents. Values JSON
//! cannot express (undefined, NaN and the infinities) are written as strings
//! carrying the reserved [`ESCAPE`] prefix, and genuine strings starting with
//! that prefix get it doubled, so every value survives the round trip.
//!
//! Formats are looked up by name: explicitly, by the extension of the file
//! name, or through the configured default format, in that order.

// used for the sqlite format
use rusqlite::{params, Connection};
// the async adapters hand back boxed futures
use futures_util::future::{self, BoxFuture, FutureExt};
use tracing::{debug, info};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::collection::Collection;
use crate::construct::OtherHasher;
use crate::datatype::{Fields, Value};
use crate::error::{NestError, Result};

pub const ESCAPE: &str = "!?_";

// ------------- serialized form -------------
fn escape(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Undefined => Json::String(format!("{}undefined", ESCAPE)),
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) if n.is_nan() => Json::String(format!("{}NaN", ESCAPE)),
        Value::Number(n) if n.is_infinite() => {
            let sign = if *n > 0.0 { "" } else { "-" };
            Json::String(format!("{}{}Infinity", ESCAPE, sign))
        }
        // whole numbers are written without a fraction
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
            Json::from(*n as i64)
        }
        Value::Number(n) => Json::from(*n),
        Value::String(s) if s.starts_with(ESCAPE) => Json::String(format!("{}{}", ESCAPE, s)),
        Value::String(s) => Json::String(s.clone()),
        Value::Array(a) => Json::Array(a.iter().map(escape).collect()),
        Value::Object(o) => Json::Object(o.iter().map(|(k, v)| (k.clone(), escape(v))).collect()),
    }
}

fn unescape(json: serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match json {
        Json::String(s) => {
            let escaped = match s.strip_prefix(ESCAPE) {
                Some("undefined") => Some(Value::Undefined),
                Some("NaN") => Some(Value::Number(f64::NAN)),
                Some("Infinity") => Some(Value::Number(f64::INFINITY)),
                Some("-Infinity") => Some(Value::Number(f64::NEG_INFINITY)),
                Some(rest) if rest.starts_with(ESCAPE) => Some(Value::String(rest.to_string())),
                // unknown markers stay plain strings
                _ => None,
            };
            escaped.unwrap_or(Value::String(s))
        }
        Json::Array(a) => Value::Array(a.into_iter().map(unescape).collect()),
        Json::Object(o) => {
            Value::Object(o.into_iter().map(|(k, v)| (k, unescape(v))).collect::<Fields>())
        }
        other => Value::from(other),
    }
}

pub fn stringify(values: &[Value]) -> Result<String> {
    let documents: Vec<serde_json::Value> = values.iter().map(escape).collect();
    Ok(serde_json::to_string(&documents)?)
}

pub fn parse(text: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<serde_json::Value>(text)? {
        serde_json::Value::Array(documents) => Ok(documents.into_iter().map(unescape).collect()),
        other => Err(NestError::Persistence(format!(
            "expected a list of records, found {}",
            unescape(other).type_name()
        ))),
    }
}

// ------------- formats -------------
fn not_implemented(format: &str, method: &str) -> NestError {
    NestError::Persistence(format!("{} is not implemented for format '{}'", method, format))
}

/// A storage format. Every method a format does not provide fails with a
/// persistence error.
pub trait Format: Send + Sync {
    fn name(&self) -> &str;
    fn save(&self, _path: &Path, _values: &[Value]) -> Result<()> {
        Err(not_implemented(self.name(), "save"))
    }
    fn load(&self, _path: &Path) -> Result<Vec<Value>> {
        Err(not_implemented(self.name(), "load"))
    }
    fn save_async(self: Arc<Self>, _path: PathBuf, _values: Vec<Value>) -> BoxFuture<'static, Result<()>> {
        future::ready(Err(not_implemented(self.name(), "save_async"))).boxed()
    }
    fn load_async(self: Arc<Self>, _path: PathBuf) -> BoxFuture<'static, Result<Vec<Value>>> {
        future::ready(Err(not_implemented(self.name(), "load_async"))).boxed()
    }
}

/// A JSON document holding the list of records.
#[derive(Debug, Default)]
pub struct JsonFormat;

impl Format for JsonFormat {
    fn name(&self) -> &str {
        "json"
    }
    fn save(&self, path: &Path, values: &[Value]) -> Result<()> {
        std::fs::write(path, stringify(values)?)?;
        Ok(())
    }
    fn load(&self, path: &Path) -> Result<Vec<Value>> {
        parse(&std::fs::read_to_string(path)?)
    }
    fn save_async(self: Arc<Self>, path: PathBuf, values: Vec<Value>) -> BoxFuture<'static, Result<()>> {
        async move {
            let text = stringify(&values)?;
            tokio::fs::write(&path, text).await?;
            Ok(())
        }
        .boxed()
    }
    fn load_async(self: Arc<Self>, path: PathBuf) -> BoxFuture<'static, Result<Vec<Value>>> {
        async move {
            let text = tokio::fs::read_to_string(&path).await?;
            parse(&text)
        }
        .boxed()
    }
}

/// One row per record in a SQLite database, ordered by position. Saving
/// replaces whatever the file held before.
#[derive(Debug, Default)]
pub struct SqliteFormat;

impl SqliteFormat {
    fn prepare(connection: &Connection) -> Result<()> {
        connection.execute_batch(
            "
            create table if not exists Record (
                Position integer not null,
                Content text not null,
                constraint unique_Position primary key (
                    Position
                )
            );
            ",
        )?;
        Ok(())
    }
}

impl Format for SqliteFormat {
    fn name(&self) -> &str {
        "sqlite"
    }
    fn save(&self, path: &Path, values: &[Value]) -> Result<()> {
        let mut connection = Connection::open(path)?;
        SqliteFormat::prepare(&connection)?;
        let transaction = connection.transaction()?;
        transaction.execute("delete from Record", [])?;
        {
            let mut add_record =
                transaction.prepare("insert into Record (Position, Content) values (?1, ?2)")?;
            for (position, value) in values.iter().enumerate() {
                let content = serde_json::to_string(&escape(value))?;
                add_record.execute(params![position as i64, content])?;
            }
        }
        transaction.commit()?;
        Ok(())
    }
    fn load(&self, path: &Path) -> Result<Vec<Value>> {
        let connection = Connection::open(path)?;
        SqliteFormat::prepare(&connection)?;
        let mut all_records = connection.prepare("select Content from Record order by Position")?;
        let rows = all_records.query_map([], |row| row.get::<_, String>(0))?;
        let mut values = Vec::new();
        for content in rows {
            values.push(unescape(serde_json::from_str(&content?)?));
        }
        Ok(values)
    }
}

// ------------- FormatRegistry -------------
#[derive(Clone)]
pub struct FormatRegistry {
    kept: HashMap<String, Arc<dyn Format>, OtherHasher>,
}

impl Default for FormatRegistry {
    /// Knows `json`, and `sqlite` under the extensions `sqlite` and `db`.
    fn default() -> Self {
        let mut registry = Self {
            kept: HashMap::default(),
        };
        let sqlite: Arc<dyn Format> = Arc::new(SqliteFormat);
        registry.add("json", Arc::new(JsonFormat));
        registry.add("sqlite", Arc::clone(&sqlite));
        registry.add("db", sqlite);
        registry
    }
}

impl FormatRegistry {
    pub fn add(&mut self, name: &str, format: Arc<dyn Format>) {
        self.kept.insert(name.to_string(), format);
    }
    pub fn get(&self, name: &str) -> Option<Arc<dyn Format>> {
        self.kept.get(name).cloned()
    }
    /// An explicitly named format must exist. Otherwise the extension of
    /// `path` is tried, then `default`.
    pub fn resolve(
        &self,
        path: &Path,
        explicit: Option<&str>,
        default: Option<&str>,
    ) -> Result<Arc<dyn Format>> {
        if let Some(name) = explicit {
            return self
                .get(name)
                .ok_or_else(|| NestError::Persistence(format!("unknown format '{}'", name)));
        }
        let by_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.get(e));
        by_extension
            .or_else(|| default.and_then(|d| self.get(d)))
            .ok_or_else(|| {
                NestError::Persistence(format!(
                    "no format found for '{}' and no usable default format",
                    path.display()
                ))
            })
    }
}
impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut names: Vec<&String> = self.kept.keys().collect();
        names.sort();
        f.debug_struct("FormatRegistry").field("formats", &names).finish()
    }
}

// ------------- Collection -------------
impl Collection {
    pub fn add_format(&mut self, name: &str, format: Arc<dyn Format>) {
        self.formats.add(name, format);
    }
    fn format_for(&self, path: &Path, format: Option<&str>) -> Result<Arc<dyn Format>> {
        self.formats
            .resolve(path, format, self.settings.default_format.as_deref())
    }

    /// Writes every record, in order.
    pub fn save(&self, path: impl AsRef<Path>, format: Option<&str>) -> Result<()> {
        let path = path.as_ref();
        let chosen = self.format_for(path, format)?;
        chosen.save(path, &self.values())?;
        info!(path = %path.display(), format = chosen.name(), records = self.len(), "saved collection");
        Ok(())
    }

    /// Imports the records stored at `path`, returning how many were added.
    pub fn load(&mut self, path: impl AsRef<Path>, format: Option<&str>) -> Result<usize> {
        let path = path.as_ref();
        let chosen = self.format_for(path, format)?;
        let values = chosen.load(path)?;
        debug!(path = %path.display(), found = values.len(), "read records");
        let inserted = self.import(values)?;
        info!(path = %path.display(), format = chosen.name(), inserted, "loaded collection");
        Ok(inserted)
    }

    /// Takes a snapshot of the records now and writes it in the background
    /// of the returned future.
    pub fn save_async(
        &self,
        path: impl AsRef<Path>,
        format: Option<&str>,
    ) -> BoxFuture<'static, Result<()>> {
        let path = path.as_ref().to_path_buf();
        match self.format_for(&path, format) {
            Ok(chosen) => {
                let records = self.len();
                let saving = chosen.save_async(path.clone(), self.values());
                async move {
                    saving.await?;
                    info!(path = %path.display(), records, "saved collection");
                    Ok(())
                }
                .boxed()
            }
            Err(e) => future::ready(Err(e)).boxed(),
        }
    }

    pub async fn load_async(&mut self, path: impl AsRef<Path>, format: Option<&str>) -> Result<usize> {
        let path = path.as_ref().to_path_buf();
        let chosen = self.format_for(&path, format)?;
        let values = chosen.load_async(path.clone()).await?;
        let inserted = self.import(values)?;
        info!(path = %path.display(), inserted, "loaded collection");
        Ok(inserted)
    }
}
