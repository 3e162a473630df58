//! Conversion of observations into stored documents and CSV snapshots.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{Value, json};

use crate::domain::{GeoPoint, Metric};
use crate::error::EpiError;
use crate::sink::Document;
use crate::table::{LongTable, Observation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Date,
    Uid,
    Iso2,
    Iso3,
    Country,
    GeoUnit,
    State,
    Region,
    Latitude,
    Longitude,
    Population,
    Counter(Metric),
    Delta(Metric),
    CaseFatalityRatio,
    IncidenceRate,
    /// Pass-through label stored on the observation under this name.
    Attribute(&'static str),
    /// Integer figure stored on the observation under this name.
    Figure(&'static str),
    Source,
    LastUpdatedAt,
}

impl Field {
    pub fn name(&self) -> String {
        match self {
            Field::Date => "date".to_string(),
            Field::Uid => "uid".to_string(),
            Field::Iso2 => "iso2".to_string(),
            Field::Iso3 => "iso3".to_string(),
            Field::Country => "country".to_string(),
            Field::GeoUnit => "geo_unit".to_string(),
            Field::State => "state".to_string(),
            Field::Region => "region".to_string(),
            Field::Latitude => "lat".to_string(),
            Field::Longitude => "long".to_string(),
            Field::Population => "population".to_string(),
            Field::Counter(metric) => metric.name().to_string(),
            Field::Delta(metric) => metric.delta_name(),
            Field::CaseFatalityRatio => "case_fatality_ratio".to_string(),
            Field::IncidenceRate => "incidence_rate".to_string(),
            Field::Attribute(name) | Field::Figure(name) => name.to_string(),
            Field::Source => "source".to_string(),
            Field::LastUpdatedAt => "last_updated_at".to_string(),
        }
    }

    fn value(&self, row: &Observation, stamp: &str) -> Value {
        let entity = &row.entity;
        match self {
            Field::Date => json!(format_date(row.date)),
            Field::Uid => json!(entity.id),
            Field::Iso2 => json!(entity.iso2),
            Field::Iso3 => json!(entity.iso3),
            Field::Country | Field::Region => json!(entity.name),
            Field::GeoUnit => json!(entity.division.clone().unwrap_or_default()),
            Field::State => json!(entity.parent.clone().unwrap_or_default()),
            Field::Latitude => json!(entity.latitude),
            Field::Longitude => json!(entity.longitude),
            Field::Population => json!(entity.population),
            Field::Counter(metric) => json!(row.count(*metric)),
            Field::Delta(metric) => json!(row.delta(*metric).map(|delta| delta.value()).unwrap_or(0)),
            Field::CaseFatalityRatio => json!(row.case_fatality_ratio.unwrap_or(0.0)),
            Field::IncidenceRate => json!(row.incidence_rate.unwrap_or(0.0)),
            Field::Attribute(name) => json!(row.attributes.get(*name).cloned().unwrap_or_default()),
            Field::Figure(name) => json!(row.figures.get(*name).copied().unwrap_or(0)),
            Field::Source => json!(row.source.as_str()),
            Field::LastUpdatedAt => json!(stamp),
        }
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn format_stamp(stamp: DateTime<Utc>) -> String {
    stamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Ordered field list of a source's records.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLayout {
    fields: Vec<Field>,
}

impl RecordLayout {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn header(&self) -> Vec<String> {
        self.fields.iter().map(Field::name).collect()
    }

    /// Flat record, `lat`/`long` included, as written to the CSV snapshot.
    pub fn record(&self, row: &Observation, stamp: &str) -> Document {
        self.fields
            .iter()
            .map(|field| (field.name(), field.value(row, stamp)))
            .collect()
    }

    pub fn records(&self, table: &LongTable, stamp: DateTime<Utc>) -> Vec<Document> {
        let stamp = format_stamp(stamp);
        table
            .rows()
            .iter()
            .map(|row| self.record(row, &stamp))
            .collect()
    }
}

/// Replaces raw `lat`/`long` by a GeoJSON `loc` point when both are
/// non-zero; the raw coordinates are dropped either way.
pub fn with_location(record: Document) -> Document {
    let coordinate = |name: &str| record.get(name).and_then(Value::as_f64).unwrap_or(0.0);
    let point = GeoPoint::from_lat_long(coordinate("lat"), coordinate("long"));
    let mut document: Document = record
        .into_iter()
        .filter(|(name, _)| name != "lat" && name != "long")
        .collect();
    if let Some(point) = point {
        document.insert("loc".to_string(), json!(point));
    }
    document
}

pub fn snapshot_path(output: &Utf8Path, date: NaiveDate, label: &str) -> Utf8PathBuf {
    output.join(format!("{}-{label}.csv", format_date(date)))
}

/// Writes the flat records as CSV with the layout's header.
pub fn write_snapshot(
    path: &Utf8Path,
    layout: &RecordLayout,
    records: &[Document],
) -> Result<(), EpiError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| EpiError::Filesystem(err.to_string()))?;
    }
    let mut writer = csv::Writer::from_path(path.as_std_path())
        .map_err(|err| EpiError::Filesystem(err.to_string()))?;
    let header = layout.header();
    writer
        .write_record(&header)
        .map_err(|err| EpiError::Filesystem(err.to_string()))?;
    for record in records {
        let cells = header
            .iter()
            .map(|name| cell(record.get(name)))
            .collect::<Vec<_>>();
        writer
            .write_record(&cells)
            .map_err(|err| EpiError::Filesystem(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| EpiError::Filesystem(err.to_string()))?;
    Ok(())
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
