//! Worldometer national snapshot, read from a pre-captured copy of the
//! site's main table.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;

use chrono::NaiveDate;
use tracing::debug;

use crate::delta::Delta;
use crate::derived::with_ratios;
use crate::domain::{Collection, Metric, SourceTag};
use crate::error::EpiError;
use crate::normalize::excluded_country_labels;
use crate::persist::WritePlan;
use crate::record::RecordLayout;
use crate::resolver::{EntityIndex, LookupSchema};
use crate::table::{LongTable, Observation};
use crate::text::{normalize_keyword, parse_number, to_count};

use super::jhu::national_layout;
use super::{COUNTRIES_LOOKUP, Source, SourceContext};

pub const SNAPSHOT_PATH: &str = "worldometer/main_table.csv";

/// Site header (after keyword normalization) to field name.
pub fn column_mappings() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("Country,Other", "country"),
        ("TotalCases", "cases"),
        ("NewCases", "new_cases"),
        ("TotalDeaths", "deaths"),
        ("NewDeaths", "new_deaths"),
        ("TotalRecovered", "recovered"),
        ("NewRecovered", "new_recovered"),
        ("ActiveCases", "active"),
        ("Serious,Critical", "critical"),
        ("TotalTests", "tests"),
        ("Population", "population"),
        ("Continent", "continent"),
    ])
}

const COUNTERS: [(&str, Metric); 6] = [
    ("cases", Metric::Cases),
    ("deaths", Metric::Deaths),
    ("recovered", Metric::Recovered),
    ("active", Metric::Active),
    ("critical", Metric::Critical),
    ("tests", Metric::Tests),
];

const REPORTED: [(&str, Metric); 3] = [
    ("new_cases", Metric::Cases),
    ("new_deaths", Metric::Deaths),
    ("new_recovered", Metric::Recovered),
];

pub struct Worldometer;

/// Parses the snapshot into one observation per country, dated `date`.
pub fn read_snapshot<R: Read>(
    reader: R,
    origin: &str,
    date: NaiveDate,
    index: &EntityIndex,
) -> Result<LongTable, EpiError> {
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
    let mappings = column_mappings();
    let columns: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .filter_map(|(position, header)| {
            let header = normalize_keyword(header);
            mappings
                .get(header.as_str())
                .map(|name| (*name, position))
        })
        .collect();
    let country = *columns
        .get("country")
        .ok_or_else(|| EpiError::MalformedExtract {
            path: origin.to_string(),
            message: "missing country column".to_string(),
        })?;

    let excluded = excluded_country_labels();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| EpiError::MalformedExtract {
            path: origin.to_string(),
            message: err.to_string(),
        })?;
        let cell = |name: &str| {
            columns
                .get(name)
                .and_then(|position| record.get(*position))
                .map(normalize_keyword)
                .unwrap_or_default()
        };
        let label = normalize_keyword(record.get(country).unwrap_or(""));
        if excluded.contains(&label) {
            continue;
        }
        let entity = index.resolve(&label).entity;
        let mut row = Observation::new(date, entity, SourceTag::Worldometer);
        for (name, metric) in COUNTERS {
            row.counters.insert(metric, to_count(parse_number(&cell(name))));
        }
        for (name, metric) in REPORTED {
            let value = to_count(parse_number(&cell(name)));
            row.deltas.insert(metric, Delta::reported(value));
        }
        rows.push(row);
    }
    debug!(origin, rows = rows.len(), "worldometer snapshot read");
    Ok(LongTable::new(rows))
}

impl Source for Worldometer {
    fn tag(&self) -> SourceTag {
        SourceTag::Worldometer
    }

    fn fetch_raw(&self, _ctx: &SourceContext<'_>) -> Result<(), EpiError> {
        Ok(())
    }

    fn unavailable(&self, ctx: &SourceContext<'_>) -> Option<String> {
        let path = ctx.tmp_path(SNAPSHOT_PATH);
        (!path.exists()).then(|| format!("no captured table at {path}"))
    }

    fn normalize(&self, ctx: &SourceContext<'_>) -> Result<LongTable, EpiError> {
        let index = ctx.lookup(COUNTRIES_LOOKUP, LookupSchema::countries())?;
        let path = ctx.tmp_path(SNAPSHOT_PATH);
        let file = File::open(path.as_std_path()).map_err(|err| EpiError::ExtractRead {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        read_snapshot(file, path.as_str(), ctx.as_of, &index)
    }

    fn compute_deltas(&self, table: LongTable) -> LongTable {
        with_ratios(table)
    }

    fn layout(&self) -> RecordLayout {
        national_layout(&[Metric::Critical, Metric::Tests])
    }

    fn plan(&self) -> WritePlan {
        WritePlan::for_source(
            Collection::Global,
            SourceTag::Worldometer,
            &["date", "uid", "iso3", "country"],
        )
    }
}
