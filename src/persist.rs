//! Two-mode persistence of source documents.
//!
//! A rebuild replaces everything a source owns in a collection. An
//! incremental write touches only documents dated inside the trailing window
//! and upserts them one by one on a compound key, so replaying the same
//! window converges to the same stored state.

use std::time::Instant;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::domain::{Collection, SourceTag, WriteMode};
use crate::error::EpiError;
use crate::sink::{Document, DocumentSink, Filter, IndexSpec, UpsertOp};

#[derive(Debug, Clone, PartialEq)]
pub enum KeyField {
    /// Match the document's own value for the field.
    Exact(String),
    /// Match any stored document whose value is one of these.
    AnyOf(String, Vec<Value>),
}

impl KeyField {
    pub fn exact(field: &str) -> Self {
        KeyField::Exact(field.to_string())
    }
}

/// Where and how a set of documents is written.
#[derive(Debug, Clone, PartialEq)]
pub struct WritePlan {
    pub collection: Collection,
    /// Documents removed before a rebuild.
    pub replace: Filter,
    /// Compound key of incremental upserts.
    pub key: Vec<KeyField>,
}

impl WritePlan {
    /// The usual plan: rebuild replaces `{source}`; the key is the given
    /// fields plus `source`.
    pub fn for_source(collection: Collection, source: SourceTag, key: &[&str]) -> Self {
        let mut fields: Vec<KeyField> = key.iter().map(|field| KeyField::exact(field)).collect();
        fields.push(KeyField::exact("source"));
        Self {
            collection,
            replace: Filter::new().equals("source", source.as_str()),
            key: fields,
        }
    }

    pub fn upsert_filter(&self, document: &Document) -> Filter {
        self.key.iter().fold(Filter::new(), |filter, field| match field {
            KeyField::Exact(name) => {
                filter.equals(name, document.get(name).cloned().unwrap_or(Value::Null))
            }
            KeyField::AnyOf(name, values) => filter.any_of(name, values.iter().cloned()),
        })
    }
}

/// The trailing `days` dates ending on and including `as_of`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub as_of: NaiveDate,
    pub days: u32,
}

impl Window {
    pub fn new(as_of: NaiveDate, days: u32) -> Self {
        Self {
            as_of,
            days: days.max(1),
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.as_of - Duration::days(i64::from(self.days) - 1)
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        (0..self.days)
            .map(|offset| self.start() + Duration::days(i64::from(offset)))
            .collect()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start() <= date && date <= self.as_of
    }

    fn contains_document(&self, document: &Document) -> bool {
        document
            .get("date")
            .and_then(Value::as_str)
            .and_then(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").ok())
            .map(|date| self.contains(date))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteReport {
    pub collection: Collection,
    pub mode: WriteMode,
    pub deleted: u64,
    pub inserted: u64,
    pub modified: u64,
    pub elapsed_seconds: f64,
}

pub fn write(
    documents: Vec<Document>,
    mode: WriteMode,
    plan: &WritePlan,
    sink: &dyn DocumentSink,
    window: Window,
) -> Result<WriteReport, EpiError> {
    let started = Instant::now();
    let collection = plan.collection;
    let (deleted, inserted, modified) = match mode {
        WriteMode::Rebuild => {
            let deleted = sink.delete_many(collection, &plan.replace)?;
            let inserted = if documents.is_empty() {
                0
            } else {
                sink.insert_many(collection, documents)?
            };
            (deleted, inserted, 0)
        }
        WriteMode::Incremental => {
            let operations: Vec<UpsertOp> = documents
                .into_iter()
                .filter(|document| window.contains_document(document))
                .map(|document| UpsertOp {
                    filter: plan.upsert_filter(&document),
                    replacement: document,
                })
                .collect();
            if operations.is_empty() {
                (0, 0, 0)
            } else {
                let result = sink.bulk_upsert(collection, operations)?;
                (0, result.inserted, result.modified)
            }
        }
    };
    let elapsed_seconds = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;

    info!(
        collection = collection.name(),
        mode = %mode,
        deleted,
        inserted,
        modified,
        elapsed_seconds,
        "write complete"
    );
    Ok(WriteReport {
        collection,
        mode,
        deleted,
        inserted,
        modified,
        elapsed_seconds,
    })
}

/// Indexes every collection is expected to carry.
pub fn expected_indexes(collection: Collection) -> Vec<IndexSpec> {
    let mut indexes = vec![IndexSpec::on(&["date"]), IndexSpec::on(&["uid", "date"])];
    if collection.is_sub_national() {
        indexes.push(IndexSpec::on(&["region", "date"]));
        indexes.push(IndexSpec::on(&["state", "date"]));
    } else {
        indexes.push(IndexSpec::on(&["iso3", "date"]));
        indexes.push(IndexSpec::on(&["country", "date"]));
    }
    indexes
}

pub fn ensure_indexes(sink: &dyn DocumentSink, collection: Collection) -> Result<usize, EpiError> {
    let indexes = expected_indexes(collection);
    for index in &indexes {
        sink.create_index(collection, index)?;
    }
    Ok(indexes.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_includes_as_of() {
        let window = Window::new(NaiveDate::from_ymd_opt(2021, 3, 10).unwrap(), 5);
        assert_eq!(window.start(), NaiveDate::from_ymd_opt(2021, 3, 6).unwrap());
        assert_eq!(window.dates().len(), 5);
        assert!(window.contains(NaiveDate::from_ymd_opt(2021, 3, 10).unwrap()));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2021, 3, 5).unwrap()));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2021, 3, 11).unwrap()));
    }

    #[test]
    fn plan_key_ends_with_source() {
        let plan = WritePlan::for_source(Collection::Greece, SourceTag::Imedd, &["date", "uid", "region"]);
        assert_eq!(plan.key.last(), Some(&KeyField::exact("source")));
        assert_eq!(plan.key.len(), 4);
    }

    #[test]
    fn sub_national_indexes() {
        let names: Vec<Vec<String>> = expected_indexes(Collection::Greece)
            .into_iter()
            .map(|index| index.fields)
            .collect();
        assert!(names.contains(&vec!["region".to_string(), "date".to_string()]));
        assert!(!names.contains(&vec!["iso3".to_string(), "date".to_string()]));
    }
}
