//! Tabular values flowing between pipeline stages.
//!
//! Every stage takes a table by value and returns a new one; nothing is
//! shared or mutated behind another stage's back.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;

use camino::Utf8Path;
use chrono::NaiveDate;
use tracing::debug;

use crate::delta::Delta;
use crate::domain::{Entity, EntityKey, Metric, SourceTag};
use crate::error::EpiError;
use crate::resolver::EntityIndex;
use crate::text::parse_number;

/// A wide extract: a few label columns followed by one column per date.
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable {
    pub origin: String,
    pub id_columns: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<WideRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub labels: Vec<String>,
    pub values: Vec<Option<f64>>,
}

impl WideTable {
    pub fn from_path(
        path: &Utf8Path,
        id_columns: &[&str],
        date_format: &str,
    ) -> Result<Self, EpiError> {
        let file = File::open(path.as_std_path()).map_err(|err| EpiError::ExtractRead {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        Self::from_reader(file, path.as_str(), id_columns, date_format)
    }

    /// Reads a wide CSV. Id columns are located by name; every other header
    /// that parses as a date in `date_format` becomes a value column, the
    /// rest are skipped.
    pub fn from_reader<R: Read>(
        reader: R,
        origin: &str,
        id_columns: &[&str],
        date_format: &str,
    ) -> Result<Self, EpiError> {
        let malformed = |message: String| EpiError::MalformedExtract {
            path: origin.to_string(),
            message,
        };
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|err| EpiError::ExtractRead {
                path: origin.to_string(),
                message: err.to_string(),
            })?
            .clone();

        let mut id_positions = Vec::with_capacity(id_columns.len());
        for column in id_columns {
            let position = headers
                .iter()
                .position(|header| header.trim() == *column)
                .ok_or_else(|| malformed(format!("missing column {column}")))?;
            id_positions.push(position);
        }

        let mut date_positions = Vec::new();
        let mut dates = Vec::new();
        for (position, header) in headers.iter().enumerate() {
            if id_positions.contains(&position) {
                continue;
            }
            let Ok(date) = NaiveDate::parse_from_str(header.trim(), date_format) else {
                debug!(origin, column = header, "non-date column skipped");
                continue;
            };
            date_positions.push(position);
            dates.push(date);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| malformed(err.to_string()))?;
            let cell = |position: usize| record.get(position).unwrap_or("").trim();
            rows.push(WideRow {
                labels: id_positions
                    .iter()
                    .map(|position| cell(*position).to_string())
                    .collect(),
                values: date_positions
                    .iter()
                    .map(|position| parse_number(cell(*position)))
                    .collect(),
            });
        }

        Ok(Self {
            origin: origin.to_string(),
            id_columns: id_columns.iter().map(|column| column.to_string()).collect(),
            dates,
            rows,
        })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.id_columns.iter().position(|column| column == name)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.iter().max().copied()
    }

    /// Extends the table to `date` by repeating its latest column, when the
    /// table stops short of it.
    pub fn pad_to(mut self, date: NaiveDate) -> Self {
        let Some(last) = self.last_date() else {
            return self;
        };
        if date <= last {
            return self;
        }
        let Some(last_position) = self.dates.iter().position(|value| *value == last) else {
            return self;
        };
        self.dates.push(date);
        for row in &mut self.rows {
            let value = row.values.get(last_position).copied().flatten();
            row.values.push(value);
        }
        self
    }

    /// Attaches the canonical entity for each row's label in `label_column`.
    pub fn resolve(
        self,
        label_column: &str,
        index: &EntityIndex,
    ) -> Result<ResolvedTable, EpiError> {
        let position = self
            .column(label_column)
            .ok_or_else(|| EpiError::MalformedExtract {
                path: self.origin.clone(),
                message: format!("missing column {label_column}"),
            })?;
        let rows = self
            .rows
            .into_iter()
            .map(|row| {
                let label = row.labels.get(position).cloned().unwrap_or_default();
                let resolution = index.resolve(&label);
                ResolvedRow {
                    label,
                    entity: resolution.entity,
                    matched: resolution.matched,
                    values: row.values,
                }
            })
            .collect();
        Ok(ResolvedTable {
            origin: self.origin,
            dates: self.dates,
            rows,
        })
    }
}

/// A wide table whose rows carry a canonical entity instead of raw labels.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTable {
    pub origin: String,
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<ResolvedRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRow {
    pub label: String,
    pub entity: Entity,
    pub matched: bool,
    pub values: Vec<Option<f64>>,
}

impl ResolvedTable {
    pub fn retain_matched(mut self) -> Self {
        self.rows.retain(|row| row.matched);
        self
    }
}

/// One row of a long table: an entity's figures on one date.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub date: NaiveDate,
    pub entity: Entity,
    pub source: SourceTag,
    pub counters: BTreeMap<Metric, Option<i64>>,
    pub deltas: BTreeMap<Metric, Delta>,
    pub case_fatality_ratio: Option<f64>,
    pub incidence_rate: Option<f64>,
    /// Source-specific pass-through labels (e.g. the raw area name).
    pub attributes: BTreeMap<String, String>,
    /// Source-specific integer figures written as-is.
    pub figures: BTreeMap<String, i64>,
}

impl Observation {
    pub fn new(date: NaiveDate, entity: Entity, source: SourceTag) -> Self {
        Self {
            date,
            entity,
            source,
            counters: BTreeMap::new(),
            deltas: BTreeMap::new(),
            case_fatality_ratio: None,
            incidence_rate: None,
            attributes: BTreeMap::new(),
            figures: BTreeMap::new(),
        }
    }

    pub fn with_counter(mut self, metric: Metric, value: Option<i64>) -> Self {
        self.counters.insert(metric, value);
        self
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn counter(&self, metric: Metric) -> Option<i64> {
        self.counters.get(&metric).copied().flatten()
    }

    /// Counter with absent values filled as zero.
    pub fn count(&self, metric: Metric) -> i64 {
        self.counter(metric).unwrap_or(0)
    }

    pub fn delta(&self, metric: Metric) -> Option<Delta> {
        self.deltas.get(&metric).copied()
    }

    pub fn entity_key(&self) -> EntityKey {
        self.entity.key()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LongTable {
    rows: Vec<Observation>,
}

impl LongTable {
    pub fn new(rows: Vec<Observation>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Observation> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.rows.iter().map(|row| row.date).collect()
    }

    pub fn map<F>(self, f: F) -> Self
    where
        F: FnMut(Observation) -> Observation,
    {
        Self {
            rows: self.rows.into_iter().map(f).collect(),
        }
    }

    pub fn find(&self, key: &EntityKey, date: NaiveDate) -> Option<&Observation> {
        self.rows
            .iter()
            .find(|row| row.date == date && &row.entity_key() == key)
    }
}

impl FromIterator<Observation> for LongTable {
    fn from_iter<I: IntoIterator<Item = Observation>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for LongTable {
    type Item = Observation;
    type IntoIter = std::vec::IntoIter<Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIRMED: &str = "\
Province/State,Country/Region,Lat,Long,1/22/20,1/23/20
,Greece,39.07,21.82,0,1
Ontario,Canada,51.25,-85.32,2,
";

    #[test]
    fn reads_wide_extract() {
        let table = WideTable::from_reader(
            CONFIRMED.as_bytes(),
            "mem",
            &["Province/State", "Country/Region", "Lat", "Long"],
            "%m/%d/%y",
        )
        .unwrap();
        assert_eq!(table.dates.len(), 2);
        assert_eq!(table.dates[0], NaiveDate::from_ymd_opt(2020, 1, 22).unwrap());
        assert_eq!(table.rows[1].labels[0], "Ontario");
        assert_eq!(table.rows[1].values, vec![Some(2.0), None]);
    }

    #[test]
    fn skips_non_date_header() {
        let table = WideTable::from_reader(
            "Country/Region,Total,1/22/20\nGreece,4,2\n".as_bytes(),
            "mem",
            &["Country/Region"],
            "%m/%d/%y",
        )
        .unwrap();
        assert_eq!(table.dates, vec![NaiveDate::from_ymd_opt(2020, 1, 22).unwrap()]);
        assert_eq!(table.rows[0].values, vec![Some(2.0)]);
    }

    #[test]
    fn missing_id_column_is_malformed() {
        let err = WideTable::from_reader(
            "Total,1/22/20\n4,2\n".as_bytes(),
            "mem",
            &["Country/Region"],
            "%m/%d/%y",
        )
        .unwrap_err();
        assert!(matches!(err, EpiError::MalformedExtract { .. }));
    }

    #[test]
    fn pad_repeats_latest_column() {
        let table = WideTable::from_reader(
            CONFIRMED.as_bytes(),
            "mem",
            &["Province/State", "Country/Region", "Lat", "Long"],
            "%m/%d/%y",
        )
        .unwrap();
        let padded = table.pad_to(NaiveDate::from_ymd_opt(2020, 1, 24).unwrap());
        assert_eq!(padded.dates.len(), 3);
        assert_eq!(padded.rows[0].values[2], Some(1.0));
        assert_eq!(padded.rows[1].values[2], None);
    }
}
