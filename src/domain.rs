use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::EpiError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Jhu,
    Worldometer,
    Imedd,
    Govgr,
    Who,
    Eody,
    Sch,
}

impl SourceTag {
    pub const ALL: [SourceTag; 7] = [
        SourceTag::Jhu,
        SourceTag::Worldometer,
        SourceTag::Imedd,
        SourceTag::Govgr,
        SourceTag::Who,
        SourceTag::Eody,
        SourceTag::Sch,
    ];

    /// Selection used when no source is named, or `all` is. `govgr` needs an
    /// API token and only runs when named explicitly.
    pub const DEFAULT: [SourceTag; 5] = [
        SourceTag::Jhu,
        SourceTag::Worldometer,
        SourceTag::Imedd,
        SourceTag::Who,
        SourceTag::Sch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Jhu => "jhu",
            SourceTag::Worldometer => "worldometer",
            SourceTag::Imedd => "imedd",
            SourceTag::Govgr => "govgr",
            SourceTag::Who => "who",
            SourceTag::Eody => "eody",
            SourceTag::Sch => "sch",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceTag {
    type Err = EpiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        SourceTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == normalized)
            .ok_or_else(|| EpiError::UnknownSource(value.to_string()))
    }
}

/// Destination collections, partitioned by scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Global,
    Greece,
    GrVaccines,
}

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Global => "global",
            Collection::Greece => "greece",
            Collection::GrVaccines => "gr_vaccines",
        }
    }

    pub fn is_sub_national(&self) -> bool {
        !matches!(self, Collection::Global)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Delete everything tagged with the source, then insert the full set.
    Rebuild,
    /// Upsert only the trailing window of recent dates.
    Incremental,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Rebuild => write!(f, "rebuild"),
            WriteMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Cumulative counters carried by observations. Each one has an incremental
/// `new_<name>` companion produced by the delta engine or reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cases,
    Deaths,
    Recovered,
    Active,
    Critical,
    IntensiveCare,
    Hospitalized,
    Tests,
    TotalVaccinations,
    TotalDistinctPersons,
    DayTotal,
    DayDiff,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Cases => "cases",
            Metric::Deaths => "deaths",
            Metric::Recovered => "recovered",
            Metric::Active => "active",
            Metric::Critical => "critical",
            Metric::IntensiveCare => "intensive_care",
            Metric::Hospitalized => "hospitalized",
            Metric::Tests => "tests",
            Metric::TotalVaccinations => "total_vaccinations",
            Metric::TotalDistinctPersons => "total_distinct_persons",
            Metric::DayTotal => "day_total",
            Metric::DayDiff => "day_diff",
        }
    }

    pub fn delta_name(&self) -> String {
        format!("new_{}", self.name())
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A canonical geographic or administrative unit.
///
/// Entities come from static lookup tables and are never created by the
/// pipeline itself, apart from the zero-valued sentinel returned for labels
/// that resolve to nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub parent: Option<String>,
    pub division: Option<String>,
    pub iso2: String,
    pub iso3: String,
    pub population: u64,
    pub latitude: f64,
    pub longitude: f64,
}

impl Entity {
    /// Sentinel for an unresolved label. The label is kept as the name so
    /// that distinct unresolved labels never share a delta group.
    pub fn unknown(label: &str) -> Self {
        Self {
            id: String::new(),
            name: label.to_string(),
            parent: None,
            division: None,
            iso2: String::new(),
            iso3: String::new(),
            population: 0,
            latitude: 0.0,
            longitude: 0.0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.id.is_empty()
    }

    /// Identity used for grouping and joins.
    pub fn key(&self) -> EntityKey {
        EntityKey {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }

    pub fn point(&self) -> Option<GeoPoint> {
        GeoPoint::from_lat_long(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    pub id: String,
    pub name: String,
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id.is_empty() {
            write!(f, "?{}", self.name)
        } else {
            write!(f, "{}", self.id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    /// Only emitted when both coordinates are known (non-zero).
    pub fn from_lat_long(latitude: f64, longitude: f64) -> Option<Self> {
        if latitude != 0.0 && longitude != 0.0 {
            Some(Self {
                kind: "Point".to_string(),
                coordinates: [longitude, latitude],
            })
        } else {
            None
        }
    }
}
