//! The collection: an ordered sequence of records with its identity map,
//! registries, hooks and derived structures.
//!
//! Three kinds of derived structures are kept in step with the records:
//! - indexes, mapping a unique key to a position,
//! - hashes, grouping records into sub-collections by a computed key,
//! - views, a single sub-collection of the records a function admits.
//!
//! Sub-collections are collections themselves. They are created lazily, get a
//! copy of the parent's registries minus the function that created them, and
//! hold copies of the parent's records under the same identities.

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, trace, warn};

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::comparator::{Comparator, ComparatorRegistry};
use crate::construct::{Hashtray, IdGenerator, Index, OtherHasher, Record, RecordId};
use crate::datatype::{Fields, Value};
use crate::error::{NestError, Result};
use crate::filter::{self, Field, FilterFactory, FilterRegistry, Operator};
use crate::persist::FormatRegistry;
use crate::query::{Connective, QueryBuilder};
use crate::settings::Settings;

pub type IndexFn = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;
pub type HashFn = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;
pub type ViewFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub type Shared = Arc<dyn Any + Send + Sync>;

/// Answer of a hook. A veto cancels the single operation the hook guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Proceed,
    Veto,
}
pub type InsertHook = Arc<dyn Fn(&mut Value) -> HookOutcome + Send + Sync>;
pub type UpdateHook = Arc<dyn Fn(&Value, &mut Fields) -> HookOutcome + Send + Sync>;
pub type RemoveHook = Arc<dyn Fn(&Value) -> HookOutcome + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    Insert,
    Update,
    Remove,
}

#[derive(Default)]
struct Hooks {
    insert: Vec<InsertHook>,
    update: Vec<UpdateHook>,
    remove: Vec<RemoveHook>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Index,
    Hash,
    View,
}

// the functions behind the derived structures
#[derive(Clone, Default)]
struct Functions {
    index: IndexMap<String, IndexFn, OtherHasher>,
    hash: IndexMap<String, HashFn, OtherHasher>,
    view: IndexMap<String, ViewFn, OtherHasher>,
}
impl Functions {
    fn contains(&self, name: &str) -> Option<Kind> {
        if self.index.contains_key(name) {
            Some(Kind::Index)
        } else if self.hash.contains_key(name) {
            Some(Kind::Hash)
        } else if self.view.contains_key(name) {
            Some(Kind::View)
        } else {
            None
        }
    }
    // always strictly smaller than self, so derived collections cannot nest
    // without end
    fn without(&self, kind: Kind, name: &str) -> Self {
        let mut pruned = self.clone();
        match kind {
            Kind::Index => {
                pruned.index.shift_remove(name);
            }
            Kind::Hash => {
                pruned.hash.shift_remove(name);
            }
            Kind::View => {
                pruned.view.shift_remove(name);
            }
        }
        pruned
    }
}

/// How to order a collection.
#[derive(Clone)]
pub enum SortBy {
    Field(String),
    Fields(Vec<String>),
    With(Comparator),
    Id,
}
impl SortBy {
    pub fn field(name: &str) -> Self {
        SortBy::Field(name.to_string())
    }
}
impl fmt::Debug for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SortBy::Field(name) => write!(f, "Field({})", name),
            SortBy::Fields(names) => write!(f, "Fields({:?})", names),
            SortBy::With(_) => write!(f, "With(<comparator>)"),
            SortBy::Id => write!(f, "Id"),
        }
    }
}

/// The record a tag should point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagTarget {
    Current,
    Position(usize),
    Id(RecordId),
}

// names that would shadow members of the collection itself
const RESERVED: &[&str] = &[
    "records",
    "nddbid",
    "tags",
    "hooks",
    "settings",
    "query",
    "selection",
    "last_selection",
    "hashtray",
    "comparators",
    "filters",
    "indexes",
    "hashes",
    "views",
    "pointer",
    "shared",
    "formats",
];

lazy_static! {
    static ref TAG_NAME: Regex = Regex::new(r"^[A-Za-z0-9_]+$").expect("valid tag pattern");
}

// ------------- Collection -------------
pub struct Collection {
    // owns the records in their current order
    records: Vec<Record>,
    // identity to current position
    nddbid: Index<RecordId>,
    generator: IdGenerator,
    last_selection: Vec<Record>,
    tags: HashMap<String, RecordId, OtherHasher>,
    hooks: Hooks,
    pub(crate) settings: Settings,
    comparators: ComparatorRegistry,
    filters: FilterRegistry,
    functions: Functions,
    // owns the derived structures
    indexes: HashMap<String, Index, OtherHasher>,
    hashes: HashMap<String, IndexMap<String, Collection>, OtherHasher>,
    views: HashMap<String, Collection, OtherHasher>,
    hashtray: Hashtray,
    query: QueryBuilder,
    pointer: usize,
    sort_by: Option<SortBy>,
    shared: Option<Shared>,
    pub(crate) formats: FormatRegistry,
}

impl Default for Collection {
    fn default() -> Self {
        Self::new()
    }
}

impl Collection {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }
    pub fn with_settings(settings: Settings) -> Self {
        Self {
            records: Vec::new(),
            nddbid: Index::new("nddbid"),
            generator: IdGenerator::new(),
            last_selection: Vec::new(),
            tags: HashMap::default(),
            hooks: Hooks::default(),
            settings,
            comparators: ComparatorRegistry::new(),
            filters: FilterRegistry::new(),
            functions: Functions::default(),
            indexes: HashMap::default(),
            hashes: HashMap::default(),
            views: HashMap::default(),
            hashtray: Hashtray::new(),
            query: QueryBuilder::new(),
            pointer: 0,
            sort_by: None,
            shared: None,
            formats: FormatRegistry::default(),
        }
    }
    pub fn from_values<I, V>(values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut collection = Self::new();
        collection.import(values)?;
        Ok(collection)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
    /// Derived collections see changed settings after the next
    /// [`Collection::rebuild_indexes`].
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
    pub fn comparators(&self) -> &ComparatorRegistry {
        &self.comparators
    }
    /// Handed by reference to every bred and derived collection.
    pub fn set_shared(&mut self, shared: Shared) {
        self.shared = Some(shared);
    }
    pub fn shared(&self) -> Option<&Shared> {
        self.shared.as_ref()
    }

    // ------------- insertion -------------
    /// Inserts a record, returning its identity, or `None` when a hook vetoed.
    pub fn insert(&mut self, value: impl Into<Value>) -> Result<Option<RecordId>> {
        let id = match self.admit(value.into())? {
            Some(pos) => {
                if self.settings.update.indexes {
                    self.maintain(pos);
                }
                self.records[pos].id()
            }
            None => return Ok(None),
        };
        self.after_insert(id);
        Ok(Some(id))
    }

    /// Inserts every value, with a single maintenance pass at the end.
    /// Nothing is inserted when one of the values is a scalar.
    pub fn import<I, V>(&mut self, values: I) -> Result<usize>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if let Some(scalar) = values.iter().find(|v| v.is_scalar()) {
            return Err(NestError::InvalidArgument(format!(
                "cannot import a {} as a record",
                scalar.type_name()
            )));
        }
        let mut inserted = 0;
        let mut last = None;
        for value in values {
            if let Some(pos) = self.admit(value)? {
                last = Some(self.records[pos].id());
                inserted += 1;
            }
        }
        if self.settings.update.indexes {
            self.rebuild_indexes();
        }
        if let Some(id) = last {
            self.after_insert(id);
        }
        debug!(inserted, total = self.records.len(), "imported records");
        Ok(inserted)
    }

    // validates, assigns an identity, runs the hooks and appends
    fn admit(&mut self, mut value: Value) -> Result<Option<usize>> {
        if value.is_scalar() {
            return Err(NestError::InvalidArgument(format!(
                "cannot insert a {} as a record",
                value.type_name()
            )));
        }
        let id = self.generator.generate();
        for hook in &self.hooks.insert {
            if hook(&mut value) == HookOutcome::Veto {
                warn!(%id, "insert vetoed by hook");
                return Ok(None);
            }
        }
        trace!(%id, "inserting record");
        Ok(Some(self.append(Record::new(id, value))))
    }

    // keeps the identity a record arrives with, unless it is taken here
    pub(crate) fn append(&mut self, record: Record) -> usize {
        let record = if self.nddbid.contains(&record.id()) {
            Record::new(self.generator.generate(), record.into_value())
        } else {
            self.generator.retain(record.id());
            record
        };
        let position = self.records.len();
        self.nddbid.add(record.id(), position);
        self.records.push(record);
        position
    }

    fn after_insert(&mut self, id: RecordId) {
        if self.settings.update.sort {
            if let Some(by) = self.sort_by.clone() {
                self.sort(by);
            }
        }
        if self.settings.update.pointer {
            if let Some(position) = self.nddbid.get(&id) {
                self.pointer = position;
            }
        }
    }

    /// Drops all records and everything derived from them. Registries,
    /// hooks and settings stay.
    pub fn clear(&mut self) {
        for record in &self.records {
            self.generator.release(record.id());
        }
        self.records.clear();
        self.nddbid.clear();
        self.tags.clear();
        self.last_selection.clear();
        self.query.reset();
        self.pointer = 0;
        self.reset_derived();
    }

    // ------------- access -------------
    pub fn len(&self) -> usize {
        self.records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
    pub fn get(&self, position: usize) -> Option<&Record> {
        self.records.get(position)
    }
    pub fn get_by_id(&self, id: RecordId) -> Option<&Record> {
        self.nddbid.get(&id).and_then(|p| self.records.get(p))
    }
    pub fn position_of(&self, id: RecordId) -> Option<usize> {
        self.nddbid.get(&id)
    }
    pub fn ids(&self) -> Vec<RecordId> {
        self.records.iter().map(Record::id).collect()
    }
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }
    pub fn records(&self) -> &[Record] {
        &self.records
    }
    pub fn values(&self) -> Vec<Value> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    // ------------- pointer -------------
    pub fn pointer(&self) -> usize {
        self.pointer
    }
    pub fn set_pointer(&mut self, position: usize) -> Result<()> {
        if position >= self.records.len() {
            return Err(NestError::NotFound(format!("no record at position {}", position)));
        }
        self.pointer = position;
        Ok(())
    }
    pub fn current(&self) -> Option<&Record> {
        self.records.get(self.pointer)
    }
    pub fn next(&mut self) -> Option<&Record> {
        if self.pointer + 1 >= self.records.len() {
            return None;
        }
        self.pointer += 1;
        self.current()
    }
    pub fn previous(&mut self) -> Option<&Record> {
        if self.pointer == 0 || self.records.is_empty() {
            return None;
        }
        self.pointer -= 1;
        self.current()
    }
    pub fn first(&mut self) -> Option<&Record> {
        self.pointer = 0;
        self.current()
    }
    pub fn last(&mut self) -> Option<&Record> {
        self.pointer = self.records.len().saturating_sub(1);
        self.current()
    }

    // ------------- registries -------------
    pub fn add_comparator(&mut self, field: &str, comparator: Comparator) {
        self.comparators.add(field, comparator);
        self.refresh_after_registration();
    }
    pub fn add_filter(&mut self, name: &str, factory: FilterFactory) -> Result<()> {
        if !matches!(Operator::from(name), Operator::Custom(_)) {
            return Err(NestError::ReservedName(format!(
                "'{}' is a built-in operator",
                name
            )));
        }
        self.filters.add(name, factory);
        self.refresh_after_registration();
        Ok(())
    }

    fn check_name(&self, name: &str, kind: Kind) -> Result<()> {
        if name.is_empty() {
            return Err(NestError::InvalidArgument("empty name".to_string()));
        }
        if RESERVED.contains(&name) {
            return Err(NestError::ReservedName(format!("'{}' is reserved", name)));
        }
        match self.functions.contains(name) {
            Some(existing) if existing != kind => Err(NestError::ReservedName(format!(
                "'{}' is already registered as {:?}",
                name, existing
            ))),
            _ => Ok(()),
        }
    }
    pub fn add_index(&mut self, name: &str, function: IndexFn) -> Result<()> {
        self.check_name(name, Kind::Index)?;
        self.functions.index.insert(name.to_string(), function);
        self.indexes.insert(name.to_string(), Index::new(name));
        self.refresh_after_registration();
        Ok(())
    }
    pub fn add_hash(&mut self, name: &str, function: HashFn) -> Result<()> {
        self.check_name(name, Kind::Hash)?;
        self.functions.hash.insert(name.to_string(), function);
        self.hashes.insert(name.to_string(), IndexMap::new());
        self.refresh_after_registration();
        Ok(())
    }
    pub fn add_view(&mut self, name: &str, function: ViewFn) -> Result<()> {
        self.check_name(name, Kind::View)?;
        self.functions.view.insert(name.to_string(), function);
        let view = self.derive(Kind::View, name);
        self.views.insert(name.to_string(), view);
        self.refresh_after_registration();
        Ok(())
    }
    // derived collections are rebuilt so they share the new registration
    fn refresh_after_registration(&mut self) {
        if self.settings.update.indexes {
            self.rebuild_indexes();
        }
    }

    pub fn on_insert(&mut self, hook: InsertHook) {
        self.hooks.insert.push(hook);
    }
    pub fn on_update(&mut self, hook: UpdateHook) {
        self.hooks.update.push(hook);
    }
    pub fn on_remove(&mut self, hook: RemoveHook) {
        self.hooks.remove.push(hook);
    }
    /// Removes every hook listening to `event`.
    pub fn off(&mut self, event: HookEvent) {
        match event {
            HookEvent::Insert => self.hooks.insert.clear(),
            HookEvent::Update => self.hooks.update.clear(),
            HookEvent::Remove => self.hooks.remove.clear(),
        }
    }

    // ------------- derived access -------------
    pub fn index(&self, name: &str) -> Result<IndexRef<'_>> {
        let index = self
            .indexes
            .get(name)
            .ok_or_else(|| NestError::NotFound(format!("no index named '{}'", name)))?;
        Ok(IndexRef {
            index,
            records: &self.records,
        })
    }
    pub fn index_mut(&mut self, name: &str) -> Result<IndexMut<'_>> {
        if !self.indexes.contains_key(name) {
            return Err(NestError::NotFound(format!("no index named '{}'", name)));
        }
        Ok(IndexMut {
            collection: self,
            name: name.to_string(),
        })
    }
    /// All groups of a hash, keyed by hash value.
    pub fn hash(&self, name: &str) -> Result<&IndexMap<String, Collection>> {
        self.hashes
            .get(name)
            .ok_or_else(|| NestError::NotFound(format!("no hash named '{}'", name)))
    }
    pub fn hash_group(&self, name: &str, key: &str) -> Result<&Collection> {
        self.hash(name)?
            .get(key)
            .ok_or_else(|| NestError::NotFound(format!("no group '{}' in hash '{}'", key, name)))
    }
    pub fn view(&self, name: &str) -> Result<&Collection> {
        self.views
            .get(name)
            .ok_or_else(|| NestError::NotFound(format!("no view named '{}'", name)))
    }

    // ------------- maintenance -------------
    fn reset_derived(&mut self) {
        for index in self.indexes.values_mut() {
            index.clear();
        }
        for groups in self.hashes.values_mut() {
            groups.clear();
        }
        // fresh views pick up registrations made since they were derived
        let names: Vec<String> = self.views.keys().cloned().collect();
        for name in names {
            let view = self.derive(Kind::View, &name);
            self.views.insert(name, view);
        }
        self.hashtray.clear();
    }

    /// Recomputes every index, hash and view from scratch in one pass.
    pub fn rebuild_indexes(&mut self) {
        self.reset_derived();
        let shape: &[fn(&mut Self, usize)] = match (
            !self.functions.index.is_empty(),
            !self.functions.hash.is_empty(),
            !self.functions.view.is_empty(),
        ) {
            (false, false, false) => &[],
            (true, false, false) => &[Self::index_record],
            (false, true, false) => &[Self::hash_record],
            (false, false, true) => &[Self::view_record],
            (true, true, false) => &[Self::index_record, Self::hash_record],
            (true, false, true) => &[Self::index_record, Self::view_record],
            (false, true, true) => &[Self::hash_record, Self::view_record],
            (true, true, true) => &[Self::index_record, Self::hash_record, Self::view_record],
        };
        if shape.is_empty() {
            return;
        }
        for position in 0..self.records.len() {
            for step in shape {
                step(self, position);
            }
        }
        debug!(
            records = self.records.len(),
            steps = shape.len(),
            "rebuilt derived structures"
        );
    }

    // incremental maintenance for the record at `position`
    fn maintain(&mut self, position: usize) {
        self.index_record(position);
        self.hash_record(position);
        self.view_record(position);
    }

    fn index_record(&mut self, position: usize) {
        let Some(record) = self.records.get(position) else {
            return;
        };
        for (name, function) in self.functions.index.iter() {
            let index = self
                .indexes
                .entry(name.clone())
                .or_insert_with(|| Index::new(name));
            match function(record.value()) {
                Some(key) => index.add(key, position),
                None => {
                    if let Some(key) = index.key_at(position).cloned() {
                        index.remove(&key);
                    }
                }
            }
        }
    }

    fn hash_record(&mut self, position: usize) {
        let Some(record) = self.records.get(position).cloned() else {
            return;
        };
        let id = record.id();
        let functions: Vec<(String, HashFn)> = self
            .functions
            .hash
            .iter()
            .map(|(n, f)| (n.clone(), Arc::clone(f)))
            .collect();
        for (name, function) in functions {
            let fresh = function(record.value());
            let former = self.hashtray.get(&name, id).map(str::to_string);
            if let Some(old) = former.filter(|old| Some(old) != fresh.as_ref()) {
                if let Some(group) = self.hashes.get_mut(&name).and_then(|g| g.get_mut(&old)) {
                    group.discard(id);
                }
                self.hashtray.remove(&name, id);
                trace!(%id, hash = %name, group = %old, "left hash group");
            }
            let Some(key) = fresh else {
                continue;
            };
            let missing = !self.hashes.get(&name).is_some_and(|g| g.contains_key(&key));
            let created = if missing {
                Some(self.derive(Kind::Hash, &name))
            } else {
                None
            };
            let groups = self.hashes.entry(name.clone()).or_default();
            if let Some(group) = created {
                groups.insert(key.clone(), group);
            }
            if let Some(group) = groups.get_mut(&key) {
                group.upsert(record.clone());
            }
            self.hashtray.set(&name, id, key);
        }
    }

    fn view_record(&mut self, position: usize) {
        let Some(record) = self.records.get(position).cloned() else {
            return;
        };
        let functions: Vec<(String, ViewFn)> = self
            .functions
            .view
            .iter()
            .map(|(n, f)| (n.clone(), Arc::clone(f)))
            .collect();
        for (name, function) in functions {
            let admitted = function(record.value());
            if admitted && !self.views.contains_key(&name) {
                let view = self.derive(Kind::View, &name);
                self.views.insert(name.clone(), view);
            }
            if let Some(view) = self.views.get_mut(&name) {
                if admitted {
                    view.upsert(record.clone());
                } else {
                    view.discard(record.id());
                }
            }
        }
    }

    // takes a removed record out of every derived structure
    fn unindex(&mut self, position: usize, id: RecordId) {
        for index in self.indexes.values_mut() {
            if let Some(key) = index.key_at(position).cloned() {
                index.remove(&key);
            }
            index.shift_after(position);
        }
        let names: Vec<String> = self.functions.hash.keys().cloned().collect();
        for name in names {
            if let Some(old) = self.hashtray.remove(&name, id) {
                if let Some(group) = self.hashes.get_mut(&name).and_then(|g| g.get_mut(&old)) {
                    group.discard(id);
                }
            }
        }
        for view in self.views.values_mut() {
            view.discard(id);
        }
    }

    // refreshes a copy held by a derived collection, or adds it
    fn upsert(&mut self, record: Record) {
        let position = match self.nddbid.get(&record.id()) {
            Some(position) => {
                self.records[position] = record;
                position
            }
            None => self.append(record),
        };
        if self.settings.update.indexes {
            self.maintain(position);
        }
    }

    fn discard(&mut self, id: RecordId) {
        if let Some(position) = self.nddbid.get(&id) {
            self.remove_at(position);
        }
    }

    fn remove_at(&mut self, position: usize) -> Record {
        let record = self.records.remove(position);
        self.nddbid.remove(&record.id());
        self.nddbid.shift_after(position);
        self.generator.release(record.id());
        if self.settings.update.indexes {
            self.unindex(position, record.id());
        }
        if self.pointer > position || self.pointer >= self.records.len() {
            self.pointer = self.pointer.saturating_sub(1);
        }
        trace!(id = %record.id(), position, "removed record");
        record
    }

    // hooks gate the removal
    fn try_remove_at(&mut self, position: usize) -> Option<Record> {
        let value = self.records.get(position)?.value();
        if self
            .hooks
            .remove
            .iter()
            .any(|hook| hook(value) == HookOutcome::Veto)
        {
            warn!(position, "remove vetoed by hook");
            return None;
        }
        Some(self.remove_at(position))
    }

    fn update_at(&mut self, position: usize, patch: &Fields) -> bool {
        let Some(record) = self.records.get(position) else {
            return false;
        };
        let mut patch = patch.clone();
        for hook in &self.hooks.update {
            if hook(record.value(), &mut patch) == HookOutcome::Veto {
                warn!(id = %record.id(), "update vetoed by hook");
                return false;
            }
        }
        self.records[position].value_mut().merge(&patch);
        if self.settings.update.indexes {
            self.maintain(position);
        }
        true
    }

    // ------------- breeding -------------
    fn configured(&self, functions: Functions) -> Self {
        let mut collection = Self::with_settings(self.settings.clone());
        collection.comparators = self.comparators.clone();
        collection.filters = self.filters.clone();
        collection.functions = functions;
        for name in collection.functions.index.keys() {
            collection.indexes.insert(name.clone(), Index::new(name));
        }
        for name in collection.functions.hash.keys() {
            collection.hashes.insert(name.clone(), IndexMap::new());
        }
        collection.sort_by = self.sort_by.clone();
        collection.shared = self.shared.clone();
        collection.formats = self.formats.clone();
        collection
    }

    // views of derived collections appear with their first member
    fn derive(&self, kind: Kind, name: &str) -> Self {
        self.configured(self.functions.without(kind, name))
    }

    // a new collection with this one's configuration, holding `records`
    pub(crate) fn spawn(&self, records: Vec<Record>) -> Self {
        let mut bred = self.configured(self.functions.clone());
        let names: Vec<String> = bred.functions.view.keys().cloned().collect();
        for name in names {
            let view = bred.derive(Kind::View, &name);
            bred.views.insert(name, view);
        }
        for record in records {
            bred.append(record);
        }
        if bred.settings.update.indexes {
            bred.rebuild_indexes();
        }
        bred
    }

    // like `spawn`, for values that need fresh identities
    pub(crate) fn spawn_values(&self, values: Vec<Value>) -> Self {
        let mut bred = self.spawn(Vec::new());
        for value in values {
            let id = bred.generator.generate();
            bred.append(Record::new(id, value));
        }
        if bred.settings.update.indexes {
            bred.rebuild_indexes();
        }
        bred
    }

    /// A new collection with the same settings and registries, holding the
    /// given records, or the current selection when none are given. Hooks are
    /// not carried over.
    pub fn breed(&mut self, records: Option<Vec<Record>>) -> Collection {
        let records = match records {
            Some(records) => records,
            None => self.take_selection(),
        };
        self.spawn(records)
    }

    // ------------- querying -------------
    /// Starts a new query with its first condition.
    pub fn select(
        &mut self,
        field: impl Into<Field>,
        op: impl Into<Operator>,
        value: impl Into<Value>,
    ) -> Result<&mut Self> {
        self.query.reset();
        self.condition(Connective::And, field.into(), op.into(), value.into())
    }
    pub fn and(
        &mut self,
        field: impl Into<Field>,
        op: impl Into<Operator>,
        value: impl Into<Value>,
    ) -> Result<&mut Self> {
        self.condition(Connective::And, field.into(), op.into(), value.into())
    }
    pub fn or(
        &mut self,
        field: impl Into<Field>,
        op: impl Into<Operator>,
        value: impl Into<Value>,
    ) -> Result<&mut Self> {
        self.condition(Connective::Or, field.into(), op.into(), value.into())
    }
    fn condition(
        &mut self,
        connective: Connective,
        field: Field,
        op: Operator,
        value: Value,
    ) -> Result<&mut Self> {
        let predicate = filter::generate(&field, &op, &value, &self.comparators, &self.filters)?;
        trace!(%connective, %field, %op, "query condition");
        self.query.add(connective, predicate);
        Ok(self)
    }
    pub fn reset_query(&mut self) -> &mut Self {
        self.query.reset();
        self
    }

    // positions matching the active query, everything without one
    fn matching(&self) -> Vec<usize> {
        match self.query.compile() {
            None => (0..self.records.len()).collect(),
            Some(predicate) => self
                .records
                .iter()
                .enumerate()
                .filter(|(_, r)| predicate(r.value()))
                .map(|(p, _)| p)
                .collect(),
        }
    }
    fn finish_query(&mut self) {
        if !self.settings.retain_query {
            self.query.reset();
        }
    }
    fn take_selection(&mut self) -> Vec<Record> {
        let selected: Vec<Record> = self
            .matching()
            .into_iter()
            .map(|p| self.records[p].clone())
            .collect();
        self.last_selection = selected.clone();
        self.finish_query();
        selected
    }

    /// The records matching the active query, without consuming it.
    pub fn selection(&self) -> Vec<&Record> {
        self.matching()
            .into_iter()
            .map(|p| &self.records[p])
            .collect()
    }
    /// The matching records as a new collection.
    pub fn execute(&mut self) -> Collection {
        let selected = self.take_selection();
        self.spawn(selected)
    }
    /// The matching values, in collection order.
    pub fn fetch(&mut self) -> Vec<Value> {
        self.take_selection()
            .into_iter()
            .map(Record::into_value)
            .collect()
    }
    pub fn last_selection(&self) -> &[Record] {
        &self.last_selection
    }

    // ------------- mutation -------------
    /// Merges `patch` into every selected record, returning how many were
    /// updated.
    pub fn update(&mut self, patch: impl Into<Value>) -> Result<usize> {
        let patch = match patch.into() {
            Value::Object(fields) => fields,
            other => {
                return Err(NestError::InvalidArgument(format!(
                    "an update patch must be an object, got {}",
                    other.type_name()
                )));
            }
        };
        let positions = self.matching();
        self.finish_query();
        let mut updated = Vec::new();
        for position in positions {
            if self.update_at(position, &patch) {
                updated.push(self.records[position].clone());
            }
        }
        let count = updated.len();
        self.last_selection = updated;
        if self.settings.update.sort && count > 0 {
            if let Some(by) = self.sort_by.clone() {
                self.sort(by);
            }
        }
        debug!(count, "updated records");
        Ok(count)
    }

    /// Removes every selected record a remove hook does not veto.
    pub fn remove(&mut self) -> Result<usize> {
        let positions = self.matching();
        self.finish_query();
        let mut removed = Vec::new();
        for position in positions.into_iter().rev() {
            if let Some(record) = self.try_remove_at(position) {
                removed.push(record);
            }
        }
        removed.reverse();
        let count = removed.len();
        self.last_selection = removed;
        debug!(count, "removed records");
        Ok(count)
    }

    // ------------- ordering -------------
    /// Sorts in place and remembers the criterion for later re-sorts.
    pub fn sort(&mut self, by: SortBy) -> &mut Self {
        let comparator: Option<Comparator> = match &by {
            SortBy::Field(name) => Some(self.comparators.sorter(name)),
            SortBy::Fields(names) => Some(self.comparators.chain(names)),
            SortBy::With(comparator) => Some(Arc::clone(comparator)),
            SortBy::Id => None,
        };
        match comparator {
            Some(comparator) => self.records.sort_by(|a, b| comparator(a.value(), b.value())),
            None => self.records.sort_by_key(Record::id),
        }
        self.sort_by = Some(by);
        self.reorganize();
        self
    }
    pub fn reverse(&mut self) -> &mut Self {
        self.records.reverse();
        self.reorganize();
        self
    }
    // positions changed, so the identity map and indexes follow
    fn reorganize(&mut self) {
        self.nddbid.clear();
        for (position, record) in self.records.iter().enumerate() {
            self.nddbid.add(record.id(), position);
        }
        self.rebuild_indexes();
    }

    // ------------- tags -------------
    pub fn tag(&mut self, name: &str, target: TagTarget) -> Result<RecordId> {
        if !TAG_NAME.is_match(name) {
            return Err(NestError::InvalidArgument(format!(
                "tag names are alphanumeric, got '{}'",
                name
            )));
        }
        let id = match target {
            TagTarget::Current => self
                .current()
                .map(Record::id)
                .ok_or_else(|| NestError::NotFound("no current record".to_string()))?,
            TagTarget::Position(position) => self
                .get(position)
                .map(Record::id)
                .ok_or_else(|| NestError::NotFound(format!("no record at position {}", position)))?,
            TagTarget::Id(id) => {
                if !self.nddbid.contains(&id) {
                    return Err(NestError::NotFound(format!("no record with identity {}", id)));
                }
                id
            }
        };
        self.tags.insert(name.to_string(), id);
        Ok(id)
    }
    pub fn resolve_tag(&self, name: &str) -> Result<&Record> {
        let id = self
            .tags
            .get(name)
            .ok_or_else(|| NestError::NotFound(format!("no tag named '{}'", name)))?;
        self.get_by_id(*id).ok_or_else(|| {
            warn!(tag = name, %id, "tag points at a removed record");
            NestError::NotFound(format!("tag '{}' points at a removed record", name))
        })
    }
    pub fn untag(&mut self, name: &str) -> Option<RecordId> {
        self.tags.remove(name)
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Collection")
            .field("records", &self.records.len())
            .field("indexes", &self.functions.index.keys().collect::<Vec<_>>())
            .field("hashes", &self.functions.hash.keys().collect::<Vec<_>>())
            .field("views", &self.functions.view.keys().collect::<Vec<_>>())
            .field("query", &self.query)
            .field("pointer", &self.pointer)
            .finish()
    }
}

// ------------- IndexRef -------------
/// Read access to a named index.
pub struct IndexRef<'a> {
    index: &'a Index,
    records: &'a [Record],
}
impl<'a> IndexRef<'a> {
    pub fn get(&self, key: &str) -> Option<&'a Record> {
        self.index
            .get(&key.to_string())
            .and_then(|p| self.records.get(p))
    }
    pub fn position(&self, key: &str) -> Option<usize> {
        self.index.get(&key.to_string())
    }
    pub fn keys(&self) -> Vec<&'a str> {
        self.index.keys().map(String::as_str).collect()
    }
    /// The indexed records, in key order.
    pub fn values(&self) -> Vec<&'a Record> {
        self.index
            .positions()
            .filter_map(|(_, p)| self.records.get(p))
            .collect()
    }
    pub fn len(&self) -> usize {
        self.index.len()
    }
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

// ------------- IndexMut -------------
/// Mutation of records addressed through a named index.
pub struct IndexMut<'a> {
    collection: &'a mut Collection,
    name: String,
}
impl IndexMut<'_> {
    fn resolve(&self, key: &str) -> Result<usize> {
        self.collection
            .indexes
            .get(&self.name)
            .and_then(|index| index.get(&key.to_string()))
            .ok_or_else(|| {
                NestError::NotFound(format!("no key '{}' in index '{}'", key, self.name))
            })
    }
    /// Removes the record under `key`. `None` when a hook vetoed.
    pub fn remove(&mut self, key: &str) -> Result<Option<Record>> {
        let position = self.resolve(key)?;
        let removed = self.collection.try_remove_at(position);
        if removed.is_some() {
            // the key may outlive the record when maintenance is off
            if let Some(index) = self.collection.indexes.get_mut(&self.name) {
                index.remove(&key.to_string());
            }
        }
        Ok(removed)
    }
    /// Merges `patch` into the record under `key`. False when a hook vetoed.
    pub fn update(&mut self, key: &str, patch: impl Into<Value>) -> Result<bool> {
        let position = self.resolve(key)?;
        let patch = match patch.into() {
            Value::Object(fields) => fields,
            other => {
                return Err(NestError::InvalidArgument(format!(
                    "an update patch must be an object, got {}",
                    other.type_name()
                )));
            }
        };
        let updated = self.collection.update_at(position, &patch);
        if updated && self.collection.settings.update.sort {
            if let Some(by) = self.collection.sort_by.clone() {
                self.collection.sort(by);
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn people() -> Collection {
        Collection::from_values(vec![
            json!({"name": "ann", "age": 31, "team": "red"}),
            json!({"name": "bob", "age": 25, "team": "blue"}),
            json!({"name": "cid", "age": 47, "team": "red"}),
        ])
        .expect("import")
    }

    fn by_name() -> IndexFn {
        Arc::new(|v: &Value| v.get("name").map(|n| n.to_string()))
    }

    #[test]
    fn scalars_are_rejected() {
        let mut c = Collection::new();
        assert!(matches!(c.insert(3), Err(NestError::InvalidArgument(_))));
        assert!(matches!(
            c.import(vec![json!({"a": 1}), json!("x")]),
            Err(NestError::InvalidArgument(_))
        ));
        assert!(c.is_empty());
        assert!(c.insert(vec![1, 2]).expect("arrays are records").is_some());
    }

    #[test]
    fn identities_follow_positions() {
        let mut c = people();
        let ids = c.ids();
        c.sort(SortBy::field("age"));
        for id in &ids {
            let position = c.position_of(*id).expect("present");
            assert_eq!(c.get(position).map(Record::id), Some(*id));
        }
        c.reverse();
        assert_eq!(c.get(0).and_then(|r| r.get("name")), Some(&Value::from("cid")));
        assert_eq!(c.position_of(ids[2]), Some(0));
    }

    #[test]
    fn index_follows_removal() {
        let mut c = people();
        c.add_index("by_name", by_name()).expect("index");
        assert_eq!(c.index("by_name").expect("index").len(), 3);
        let removed = c
            .index_mut("by_name")
            .expect("index")
            .remove("ann")
            .expect("key present");
        assert!(removed.is_some());
        let index = c.index("by_name").expect("index");
        assert!(index.get("ann").is_none());
        assert_eq!(index.position("cid"), Some(1));
        assert_eq!(index.get("bob").and_then(|r| r.get("age")), Some(&Value::from(25)));
        assert!(matches!(
            c.index_mut("by_name").expect("index").remove("zed"),
            Err(NestError::NotFound(_))
        ));
    }

    #[test]
    fn index_update_rekeys() {
        let mut c = people();
        c.add_index("by_name", by_name()).expect("index");
        assert!(c
            .index_mut("by_name")
            .expect("index")
            .update("bob", json!({"name": "bo"}))
            .expect("key present"));
        let index = c.index("by_name").expect("index");
        assert!(index.get("bob").is_none());
        assert_eq!(index.position("bo"), Some(1));
    }

    #[test]
    fn names_are_checked() {
        let mut c = people();
        c.add_index("by_name", by_name()).expect("index");
        assert!(matches!(
            c.add_hash("by_name", Arc::new(|_: &Value| -> Option<String> { None })),
            Err(NestError::ReservedName(_))
        ));
        assert!(matches!(
            c.add_view("records", Arc::new(|_: &Value| true)),
            Err(NestError::ReservedName(_))
        ));
        assert!(matches!(
            c.add_filter(
                ">=",
                Arc::new(|_: &Field, _: &Value, _: &ComparatorRegistry| -> Result<filter::Predicate> {
                    Ok(Arc::new(|_: &Value| true))
                })
            ),
            Err(NestError::ReservedName(_))
        ));
        assert!(matches!(c.view("nothing"), Err(NestError::NotFound(_))));
    }

    #[test]
    fn views_track_membership() {
        let mut c = people();
        c.add_view("seniors", Arc::new(|v: &Value| {
            v.get("age").and_then(Value::as_f64).is_some_and(|a| a > 30.0)
        }))
        .expect("view");
        assert_eq!(c.view("seniors").expect("view").len(), 2);
        c.select("name", "=", "ann").expect("query").update(json!({"age": 20})).expect("update");
        assert_eq!(c.view("seniors").expect("view").len(), 1);
        c.insert(json!({"name": "dee", "age": 60})).expect("insert");
        let seniors = c.view("seniors").expect("view");
        assert_eq!(seniors.len(), 2);
        // the view cannot hold a view of itself
        assert!(seniors.view("seniors").is_err());
    }

    #[test]
    fn hash_groups_hold_current_values() {
        let mut c = people();
        c.add_hash("team", Arc::new(|v: &Value| v.get("team").map(|t| t.to_string())))
            .expect("hash");
        assert_eq!(c.hash_group("team", "red").expect("group").len(), 2);
        c.select("name", "=", "cid").expect("query").update(json!({"age": 48})).expect("update");
        let red = c.hash_group("team", "red").expect("group");
        let cid = red
            .iter()
            .find(|r| r.get("name") == Some(&Value::from("cid")))
            .expect("cid in red");
        assert_eq!(cid.get("age"), Some(&Value::from(48)));
        c.select("team", "=", "red").expect("query").remove().expect("remove");
        assert!(c.hash_group("team", "red").expect("group").is_empty());
        assert_eq!(c.hash_group("team", "blue").expect("group").len(), 1);
    }

    #[test]
    fn hooks_veto_and_mutate() {
        let mut c = Collection::new();
        c.on_insert(Arc::new(|v: &mut Value| {
            if v.get("blocked").is_some() {
                return HookOutcome::Veto;
            }
            v.insert("stamped", true);
            HookOutcome::Proceed
        }));
        let first = c.insert(json!({"a": 1})).expect("insert").expect("admitted");
        assert_eq!(c.insert(json!({"blocked": 1})).expect("insert"), None);
        let third = c.insert(json!({"a": 3})).expect("insert").expect("admitted");
        // the vetoed insert used up an identity
        assert_eq!(third.get(), first.get() + 2);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(0).and_then(|r| r.get("stamped")), Some(&Value::Bool(true)));

        c.on_remove(Arc::new(|v: &Value| {
            if v.get("a") == Some(&Value::from(1)) {
                HookOutcome::Veto
            } else {
                HookOutcome::Proceed
            }
        }));
        assert_eq!(c.remove().expect("remove"), 1);
        assert_eq!(c.len(), 1);
        c.off(HookEvent::Remove);
        assert_eq!(c.remove().expect("remove"), 1);
        assert!(c.is_empty());
    }

    #[test]
    fn update_hooks_can_rewrite_patches() {
        let mut c = people();
        c.on_update(Arc::new(|_: &Value, patch: &mut Fields| {
            patch.insert("touched".to_string(), Value::Bool(true));
            HookOutcome::Proceed
        }));
        assert_eq!(c.select("team", "=", "red").expect("query").update(json!({"age": 1})).expect("update"), 2);
        assert_eq!(c.last_selection().len(), 2);
        assert!(c.last_selection().iter().all(|r| r.get("touched").is_some()));
        assert!(matches!(c.update(5), Err(NestError::InvalidArgument(_))));
    }

    #[test]
    fn tags_hold_identities() {
        let mut c = people();
        assert!(matches!(c.tag("no way", TagTarget::Current), Err(NestError::InvalidArgument(_))));
        c.tag("oldest", TagTarget::Position(2)).expect("tag");
        c.sort(SortBy::field("age"));
        assert_eq!(
            c.resolve_tag("oldest").expect("tag").get("name"),
            Some(&Value::from("cid"))
        );
        c.select("name", "=", "cid").expect("query").update(json!({"age": 50})).expect("update");
        assert_eq!(c.resolve_tag("oldest").expect("tag").get("age"), Some(&Value::from(50)));
        c.select("name", "=", "cid").expect("query").remove().expect("remove");
        assert!(matches!(c.resolve_tag("oldest"), Err(NestError::NotFound(_))));
        assert!(c.untag("oldest").is_some());
        assert!(matches!(c.resolve_tag("oldest"), Err(NestError::NotFound(_))));
    }

    #[test]
    fn pointer_walks_records() {
        let mut c = people();
        assert_eq!(c.current().and_then(|r| r.get("name")), Some(&Value::from("ann")));
        assert!(c.next().is_some());
        assert!(c.next().is_some());
        assert!(c.next().is_none());
        assert_eq!(c.pointer(), 2);
        assert!(c.previous().is_some());
        assert_eq!(c.last().and_then(|r| r.get("name")), Some(&Value::from("cid")));
        assert!(c.set_pointer(7).is_err());

        c.settings_mut().update.pointer = true;
        c.first();
        c.insert(json!({"name": "dee"})).expect("insert");
        assert_eq!(c.pointer(), 3);
    }

    #[test]
    fn sort_policy_keeps_order() {
        let mut c = people();
        c.sort(SortBy::field("age"));
        c.settings_mut().update.sort = true;
        c.insert(json!({"name": "eve", "age": 30})).expect("insert");
        let ages: Vec<Value> = c.iter().filter_map(|r| r.get("age").cloned()).collect();
        assert_eq!(ages, vec![Value::from(25), Value::from(30), Value::from(31), Value::from(47)]);
    }

    #[test]
    fn queries_reset_unless_retained() {
        let mut c = people();
        assert_eq!(c.select("team", "=", "red").expect("query").fetch().len(), 2);
        assert_eq!(c.fetch().len(), 3);
        c.settings_mut().retain_query = true;
        c.select("team", "=", "red").expect("query");
        assert_eq!(c.fetch().len(), 2);
        assert_eq!(c.fetch().len(), 2);
        c.reset_query();
        assert_eq!(c.selection().len(), 3);
    }

    #[test]
    fn clear_keeps_registries() {
        let mut c = people();
        c.add_index("by_name", by_name()).expect("index");
        let before = c.ids();
        c.clear();
        assert!(c.is_empty());
        assert!(c.index("by_name").expect("index").is_empty());
        let id = c.insert(json!({"name": "new"})).expect("insert").expect("admitted");
        assert!(before.iter().all(|old| *old < id));
        assert_eq!(c.index("by_name").expect("index").position("new"), Some(0));
    }

    #[test]
    fn shared_object_is_handed_down() {
        let mut c = people();
        c.set_shared(Arc::new(String::from("context")));
        let bred = c.breed(None);
        let shared = bred.shared().expect("shared");
        assert!(Arc::ptr_eq(shared, c.shared().expect("shared")));
        assert_eq!(shared.downcast_ref::<String>().map(String::as_str), Some("context"));
    }
}
