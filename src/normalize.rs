//! Shape normalization: hierarchy cleanup on wide extracts, wide-to-long
//! melting, per-key aggregation and the multi-metric merge.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use tracing::debug;

use crate::domain::{EntityKey, Metric, SourceTag};
use crate::error::EpiError;
use crate::table::{LongTable, Observation, ResolvedTable, WideRow, WideTable};
use crate::text::to_count;

/// Names of the label columns the cleanup rules operate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelColumns {
    pub province: String,
    pub country: String,
    pub latitude: String,
    pub longitude: String,
}

/// A country whose sub-national rows are summed into one national row.
#[derive(Debug, Clone, PartialEq)]
pub struct Collapse {
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Cleanup rules applied to a wide extract before melting, in field order.
#[derive(Debug, Clone, PartialEq)]
pub struct Cleanup {
    pub columns: LabelColumns,
    pub excluded_substrings: Vec<String>,
    pub excluded_labels: Vec<String>,
    pub relabel_provinces: Vec<String>,
    pub promote_territories_of: Vec<String>,
    pub collapse: Vec<Collapse>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

impl Cleanup {
    /// Rules for the JHU CSSE global time series.
    pub fn jhu() -> Self {
        Self {
            columns: LabelColumns {
                province: "Province/State".to_string(),
                country: "Country/Region".to_string(),
                latitude: "Lat".to_string(),
                longitude: "Long".to_string(),
            },
            excluded_substrings: strings(&[
                "Grand Princess",
                "Diamond Princess",
                "MS Zaandam",
                "Summer Olympics 2020",
            ]),
            excluded_labels: Vec::new(),
            relabel_provinces: strings(&["Hong Kong", "Macau"]),
            promote_territories_of: strings(&[
                "Denmark",
                "France",
                "Netherlands",
                "United Kingdom",
            ]),
            collapse: vec![
                Collapse {
                    country: "Canada".to_string(),
                    latitude: 56.1304,
                    longitude: -106.3468,
                },
                Collapse {
                    country: "China".to_string(),
                    latitude: 35.8617,
                    longitude: 104.1954,
                },
                Collapse {
                    country: "Australia".to_string(),
                    latitude: -25.2744,
                    longitude: 133.7751,
                },
            ],
        }
    }

    pub fn apply(&self, table: WideTable) -> Result<WideTable, EpiError> {
        let column = |name: &str| {
            table.column(name).ok_or_else(|| EpiError::MalformedExtract {
                path: table.origin.clone(),
                message: format!("missing column {name}"),
            })
        };
        let province = column(&self.columns.province)?;
        let country = column(&self.columns.country)?;
        let latitude = column(&self.columns.latitude)?;
        let longitude = column(&self.columns.longitude)?;

        let WideTable {
            origin,
            id_columns,
            dates,
            rows,
        } = table;

        let before = rows.len();
        let mut kept: Vec<WideRow> = Vec::with_capacity(rows.len());
        for mut row in rows {
            if self.is_excluded(&row.labels[province], &row.labels[country]) {
                continue;
            }
            if self.relabel_provinces.contains(&row.labels[province]) {
                row.labels[country] = row.labels[province].clone();
            }
            if self.promote_territories_of.contains(&row.labels[country])
                && !row.labels[province].is_empty()
            {
                row.labels[country] = std::mem::take(&mut row.labels[province]);
            }
            kept.push(row);
        }

        for rule in &self.collapse {
            let (members, rest): (Vec<WideRow>, Vec<WideRow>) = kept
                .into_iter()
                .partition(|row| row.labels[country] == rule.country);
            kept = rest;
            if members.is_empty() {
                continue;
            }
            let mut labels = members[0].labels.clone();
            labels[province] = String::new();
            labels[latitude] = rule.latitude.to_string();
            labels[longitude] = rule.longitude.to_string();
            let values = (0..dates.len())
                .map(|position| sum_present(members.iter().map(|row| row.values[position])))
                .collect();
            debug!(
                country = rule.country.as_str(),
                rows = members.len(),
                "collapsed sub-national rows"
            );
            kept.push(WideRow { labels, values });
        }

        debug!(origin = origin.as_str(), before, after = kept.len(), "cleanup");
        Ok(WideTable {
            origin,
            id_columns,
            dates,
            rows: kept,
        })
    }

    fn is_excluded(&self, province: &str, country: &str) -> bool {
        let contains_excluded = |label: &str| {
            self.excluded_substrings
                .iter()
                .any(|excluded| label.contains(excluded.as_str()))
        };
        contains_excluded(province)
            || contains_excluded(country)
            || self.excluded_labels.iter().any(|label| label == country)
    }
}

/// Aggregate or non-country labels found in scraped national tables.
pub fn excluded_country_labels() -> Vec<String> {
    strings(&[
        "",
        "North America",
        "Asia",
        "South America",
        "Europe",
        "Africa",
        "Oceania",
        "World",
        "Total:",
        "MS Zaandam",
        "Diamond Princess",
        "Wallis and Futuna",
    ])
}

fn sum_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.fold(None, |total, value| match (total, value) {
        (None, value) => value,
        (total, None) => total,
        (Some(total), Some(value)) => Some(total + value),
    })
}

fn add_counts(left: Option<i64>, right: Option<i64>) -> Option<i64> {
    match (left, right) {
        (None, value) | (value, None) => value,
        (Some(left), Some(right)) => Some(left + right),
    }
}

/// One observation per (row, date) carrying the single `metric`.
pub fn to_long(table: ResolvedTable, metric: Metric, source: SourceTag) -> LongTable {
    let dates = table.dates;
    table
        .rows
        .into_iter()
        .flat_map(|row| {
            let entity = row.entity;
            dates
                .iter()
                .zip(row.values)
                .map(|(date, value)| {
                    Observation::new(*date, entity.clone(), source)
                        .with_counter(metric, to_count(value))
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Sums counters of rows sharing an (entity, date) key. The first row of a
/// key keeps its position and its non-counter fields.
pub fn aggregate(table: LongTable) -> LongTable {
    let mut positions: HashMap<(EntityKey, NaiveDate), usize> = HashMap::new();
    let mut rows: Vec<Observation> = Vec::with_capacity(table.len());
    for row in table {
        let key = (row.entity_key(), row.date);
        match positions.get(&key) {
            Some(position) => {
                let target = &mut rows[*position];
                for (metric, value) in row.counters {
                    let current = target.counters.get(&metric).copied().flatten();
                    target.counters.insert(metric, add_counts(current, value));
                }
            }
            None => {
                positions.insert(key, rows.len());
                rows.push(row);
            }
        }
    }
    LongTable::new(rows)
}

/// Left join of every table in `others` onto `anchor` by (entity, date).
///
/// The anchor decides coverage: keys present only in a later table are
/// dropped, and anchor rows without a partner get the partner's metrics as
/// absent counters.
pub fn merge_metrics(anchor: LongTable, others: Vec<LongTable>) -> LongTable {
    let mut merged = anchor.into_rows();
    for other in others {
        let metrics: BTreeSet<Metric> = other
            .rows()
            .iter()
            .flat_map(|row| row.counters.keys().copied())
            .collect();
        let mut by_key: HashMap<(EntityKey, NaiveDate), BTreeMap<Metric, Option<i64>>> =
            HashMap::new();
        for row in aggregate(other) {
            by_key.insert((row.entity_key(), row.date), row.counters);
        }

        for row in &mut merged {
            let partner = by_key.remove(&(row.entity_key(), row.date));
            for metric in &metrics {
                let value = partner
                    .as_ref()
                    .and_then(|counters| counters.get(metric).copied().flatten());
                row.counters.insert(*metric, value);
            }
        }

        if !by_key.is_empty() {
            debug!(
                dropped = by_key.len(),
                "rows without an anchor partner dropped by merge"
            );
        }
    }
    LongTable::new(merged)
}
