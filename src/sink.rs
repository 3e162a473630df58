//! Document-store abstraction and its two backends.
//!
//! The pipeline only needs four primitives from a store. `MemorySink` keeps
//! collections in process; `JsonFileSink` keeps one pretty-printed JSON array
//! per collection under a directory and replaces it atomically on every write.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::Collection;
use crate::error::EpiError;

pub type Document = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldMatch {
    Eq(Value),
    AnyOf(Vec<Value>),
}

impl FieldMatch {
    fn matches(&self, value: Option<&Value>) -> bool {
        let value = value.unwrap_or(&Value::Null);
        match self {
            FieldMatch::Eq(expected) => expected == value,
            FieldMatch::AnyOf(candidates) => candidates.iter().any(|candidate| candidate == value),
        }
    }
}

/// Conjunction of per-field matches. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, FieldMatch)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.clauses
            .push((field.to_string(), FieldMatch::Eq(value.into())));
        self
    }

    pub fn any_of<V: Into<Value>>(mut self, field: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.clauses.push((
            field.to_string(),
            FieldMatch::AnyOf(values.into_iter().map(Into::into).collect()),
        ));
        self
    }

    pub fn clauses(&self) -> &[(String, FieldMatch)] {
        &self.clauses
    }

    /// Names of the equality clauses and the key a matching document has
    /// on them.
    fn equality_key(&self) -> (Vec<String>, String) {
        let mut fields = Vec::new();
        let mut values = Vec::new();
        for (field, expected) in &self.clauses {
            if let FieldMatch::Eq(value) = expected {
                fields.push(field.clone());
                values.push(value.to_string());
            }
        }
        (fields, values.join("\u{1f}"))
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, expected)| expected.matches(document.get(field)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOp {
    pub filter: Filter,
    pub replacement: Document,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertResult {
    pub matched: u64,
    pub modified: u64,
    pub inserted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct IndexSpec {
    pub fields: Vec<String>,
}

impl IndexSpec {
    pub fn on(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|field| field.to_string()).collect(),
        }
    }
}

pub trait DocumentSink: Send + Sync {
    fn delete_many(&self, collection: Collection, filter: &Filter) -> Result<u64, EpiError>;
    fn insert_many(&self, collection: Collection, documents: Vec<Document>)
    -> Result<u64, EpiError>;
    fn bulk_upsert(
        &self,
        collection: Collection,
        operations: Vec<UpsertOp>,
    ) -> Result<UpsertResult, EpiError>;
    fn create_index(&self, collection: Collection, index: &IndexSpec) -> Result<(), EpiError>;
}

/// Document positions grouped by their values on a fixed list of fields.
struct PositionIndex {
    fields: Vec<String>,
    positions: HashMap<String, BTreeSet<usize>>,
}

impl PositionIndex {
    fn build(fields: Vec<String>, documents: &[Document]) -> Self {
        let mut index = Self {
            fields,
            positions: HashMap::new(),
        };
        for (position, document) in documents.iter().enumerate() {
            index.add(document, position);
        }
        index
    }

    fn add(&mut self, document: &Document, position: usize) {
        let key = document_key(&self.fields, document);
        self.positions.entry(key).or_default().insert(position);
    }

    fn remove(&mut self, document: &Document, position: usize) {
        let key = document_key(&self.fields, document);
        if let Some(positions) = self.positions.get_mut(&key) {
            positions.remove(&position);
        }
    }

    fn candidates(&self, key: &str) -> impl Iterator<Item = usize> + '_ {
        self.positions.get(key).into_iter().flatten().copied()
    }
}

fn document_key(fields: &[String], document: &Document) -> String {
    fields
        .iter()
        .map(|field| document.get(field).unwrap_or(&Value::Null).to_string())
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Replace-or-insert, last writer wins. A matched document only counts as
/// modified when the replacement differs from what is stored.
///
/// Candidates are looked up by the filter's equality clauses, so a batch
/// costs one pass per distinct clause layout plus the size of each bucket.
pub fn apply_upserts(documents: &mut Vec<Document>, operations: Vec<UpsertOp>) -> UpsertResult {
    let mut result = UpsertResult::default();
    let mut indexes: Vec<PositionIndex> = Vec::new();
    for operation in operations {
        let (fields, key) = operation.filter.equality_key();
        let slot = match indexes.iter().position(|index| index.fields == fields) {
            Some(slot) => slot,
            None => {
                indexes.push(PositionIndex::build(fields, documents));
                indexes.len() - 1
            }
        };
        let found = indexes[slot]
            .candidates(&key)
            .find(|position| operation.filter.matches(&documents[*position]));
        match found {
            Some(position) => {
                result.matched += 1;
                if documents[position] != operation.replacement {
                    for index in &mut indexes {
                        index.remove(&documents[position], position);
                        index.add(&operation.replacement, position);
                    }
                    documents[position] = operation.replacement;
                    result.modified += 1;
                }
            }
            None => {
                let position = documents.len();
                for index in &mut indexes {
                    index.add(&operation.replacement, position);
                }
                documents.push(operation.replacement);
                result.inserted += 1;
            }
        }
    }
    result
}

fn delete_matching(documents: &mut Vec<Document>, filter: &Filter) -> u64 {
    let before = documents.len();
    documents.retain(|document| !filter.matches(document));
    (before - documents.len()) as u64
}

#[derive(Debug, Default)]
struct MemoryCollection {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

#[derive(Debug, Default)]
pub struct MemorySink {
    collections: Mutex<HashMap<Collection, MemoryCollection>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self, collection: Collection) -> Vec<Document> {
        self.with(collection, |stored| stored.documents.clone())
            .unwrap_or_default()
    }

    pub fn indexes(&self, collection: Collection) -> Vec<IndexSpec> {
        self.with(collection, |stored| stored.indexes.clone())
            .unwrap_or_default()
    }

    fn with<T>(
        &self,
        collection: Collection,
        f: impl FnOnce(&mut MemoryCollection) -> T,
    ) -> Result<T, EpiError> {
        let mut guard = self
            .collections
            .lock()
            .map_err(|_| EpiError::Sink("memory sink lock poisoned".to_string()))?;
        Ok(f(guard.entry(collection).or_default()))
    }
}

impl DocumentSink for MemorySink {
    fn delete_many(&self, collection: Collection, filter: &Filter) -> Result<u64, EpiError> {
        self.with(collection, |stored| delete_matching(&mut stored.documents, filter))
    }

    fn insert_many(
        &self,
        collection: Collection,
        documents: Vec<Document>,
    ) -> Result<u64, EpiError> {
        let count = documents.len() as u64;
        self.with(collection, |stored| stored.documents.extend(documents))?;
        Ok(count)
    }

    fn bulk_upsert(
        &self,
        collection: Collection,
        operations: Vec<UpsertOp>,
    ) -> Result<UpsertResult, EpiError> {
        self.with(collection, |stored| apply_upserts(&mut stored.documents, operations))
    }

    fn create_index(&self, collection: Collection, index: &IndexSpec) -> Result<(), EpiError> {
        self.with(collection, |stored| {
            if !stored.indexes.contains(index) {
                stored.indexes.push(index.clone());
            }
        })
    }
}

/// File-backed sink: `<root>/<collection>.json` holds the documents and
/// `<root>/<collection>.indexes.json` the declared indexes.
#[derive(Debug)]
pub struct JsonFileSink {
    root: Utf8PathBuf,
    lock: Mutex<()>,
}

impl JsonFileSink {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn collection_path(&self, collection: Collection) -> Utf8PathBuf {
        self.root.join(format!("{}.json", collection.name()))
    }

    fn index_path(&self, collection: Collection) -> Utf8PathBuf {
        self.root.join(format!("{}.indexes.json", collection.name()))
    }

    pub fn load(&self, collection: Collection) -> Result<Vec<Document>, EpiError> {
        read_json_or_default(&self.collection_path(collection))
    }

    fn update<T>(
        &self,
        collection: Collection,
        f: impl FnOnce(&mut Vec<Document>) -> T,
    ) -> Result<T, EpiError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| EpiError::Sink("file sink lock poisoned".to_string()))?;
        let path = self.collection_path(collection);
        let mut documents: Vec<Document> = read_json_or_default(&path)?;
        let result = f(&mut documents);
        write_json_atomic(&path, &documents)?;
        Ok(result)
    }
}

impl DocumentSink for JsonFileSink {
    fn delete_many(&self, collection: Collection, filter: &Filter) -> Result<u64, EpiError> {
        self.update(collection, |documents| delete_matching(documents, filter))
    }

    fn insert_many(
        &self,
        collection: Collection,
        documents: Vec<Document>,
    ) -> Result<u64, EpiError> {
        let count = documents.len() as u64;
        self.update(collection, |stored| stored.extend(documents))?;
        Ok(count)
    }

    fn bulk_upsert(
        &self,
        collection: Collection,
        operations: Vec<UpsertOp>,
    ) -> Result<UpsertResult, EpiError> {
        self.update(collection, |stored| apply_upserts(stored, operations))
    }

    fn create_index(&self, collection: Collection, index: &IndexSpec) -> Result<(), EpiError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| EpiError::Sink("file sink lock poisoned".to_string()))?;
        let path = self.index_path(collection);
        let mut indexes: Vec<IndexSpec> = read_json_or_default(&path)?;
        if !indexes.contains(index) {
            indexes.push(index.clone());
            write_json_atomic(&path, &indexes)?;
        }
        Ok(())
    }
}

fn read_json_or_default<T>(path: &Utf8Path) -> Result<Vec<T>, EpiError>
where
    T: serde::de::DeserializeOwned,
{
    if !path.as_std_path().exists() {
        return Ok(Vec::new());
    }
    let content =
        fs::read_to_string(path.as_std_path()).map_err(|err| EpiError::Sink(err.to_string()))?;
    serde_json::from_str(&content)
        .map_err(|err| EpiError::Sink(format!("{path}: {err}")))
}

fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), EpiError> {
    let content =
        serde_json::to_vec_pretty(value).map_err(|err| EpiError::Sink(err.to_string()))?;
    write_atomic(path.as_std_path(), &content)
}

/// Writes `content` to a temporary file next to `path` and renames it into
/// place, so readers never see a partial file.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), EpiError> {
    let parent = path
        .parent()
        .ok_or_else(|| EpiError::Filesystem(format!("invalid path {}", path.display())))?;
    fs::create_dir_all(parent).map_err(|err| EpiError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".epiflow")
        .tempfile_in(parent)
        .map_err(|err| EpiError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| EpiError::Filesystem(err.to_string()))?;
    temp.persist(path)
        .map_err(|err| EpiError::Filesystem(err.to_string()))?;
    Ok(())
}
