//! Identity resolution of raw source labels to canonical entities.
//!
//! Lookup tables are small static CSV resources. They are loaded once per run
//! and turned into an [`EntityIndex`], a hash map from every alias to the row
//! that first declared it, so that resolution is a single lookup per label.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;

use camino::Utf8Path;
use serde::Serialize;
use tracing::warn;

use crate::domain::Entity;
use crate::error::EpiError;
use crate::text::parse_number;

/// Column layout of a lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupSchema {
    pub name: String,
    pub id: String,
    pub display_name: String,
    pub parent: Option<String>,
    pub division: Option<String>,
    pub iso2: Option<String>,
    pub iso3: Option<String>,
    pub population: String,
    pub latitude: String,
    pub longitude: String,
    /// Candidate columns, in match priority order within a row.
    pub aliases: Vec<String>,
    /// Alias cells hold integer ids that may be written as `104.0`.
    pub integer_aliases: bool,
}

impl LookupSchema {
    /// `countries-mapping-jhu-wom.csv`: English name, JHU country label and
    /// worldometer label all resolve to the same country.
    pub fn countries() -> Self {
        Self {
            name: "countries".to_string(),
            id: "uid".to_string(),
            display_name: "name_en".to_string(),
            parent: None,
            division: None,
            iso2: Some("iso2".to_string()),
            iso3: Some("iso3".to_string()),
            population: "population".to_string(),
            latitude: "lat".to_string(),
            longitude: "long".to_string(),
            aliases: vec![
                "name_en".to_string(),
                "country".to_string(),
                "wom_map".to_string(),
            ],
            integer_aliases: false,
        }
    }

    /// `region-mapping-imedd.csv` keyed by Greek county label.
    pub fn region_labels() -> Self {
        Self {
            aliases: vec!["region_el".to_string(), "map_value".to_string()],
            ..Self::regions("regions")
        }
    }

    /// `region-mapping-imedd.csv` keyed by vaccination area id.
    pub fn region_area_ids() -> Self {
        Self {
            aliases: vec!["areaid".to_string()],
            integer_aliases: true,
            ..Self::regions("vaccination-areas")
        }
    }

    fn regions(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: "uid".to_string(),
            display_name: "region".to_string(),
            parent: Some("state".to_string()),
            division: Some("geo_unit".to_string()),
            iso2: None,
            iso3: None,
            population: "population".to_string(),
            latitude: "lat".to_string(),
            longitude: "long".to_string(),
            aliases: Vec::new(),
            integer_aliases: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LookupRow {
    pub entity: Entity,
    pub aliases: Vec<String>,
}

/// A lookup table in file order.
#[derive(Debug, Clone)]
pub struct LookupTable {
    name: String,
    rows: Vec<LookupRow>,
}

impl LookupTable {
    pub fn new(name: impl Into<String>, rows: Vec<LookupRow>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    pub fn from_path(path: &Utf8Path, schema: &LookupSchema) -> Result<Self, EpiError> {
        let file = File::open(path.as_std_path()).map_err(|err| EpiError::Lookup {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        Self::from_reader(file, schema, path.as_str())
    }

    pub fn from_reader<R: Read>(
        reader: R,
        schema: &LookupSchema,
        origin: &str,
    ) -> Result<Self, EpiError> {
        let lookup_err = |message: String| EpiError::Lookup {
            path: origin.to_string(),
            message,
        };
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|err| lookup_err(err.to_string()))?
            .clone();
        let position = |column: &str| headers.iter().position(|header| header.trim() == column);
        let require = |column: &str| {
            position(column).ok_or_else(|| lookup_err(format!("missing column {column}")))
        };

        let id_col = require(schema.id.as_str())?;
        let name_col = require(schema.display_name.as_str())?;
        let population_col = require(schema.population.as_str())?;
        let lat_col = require(schema.latitude.as_str())?;
        let long_col = require(schema.longitude.as_str())?;
        let parent_col = schema.parent.as_deref().map(require).transpose()?;
        let division_col = schema.division.as_deref().map(require).transpose()?;
        let iso2_col = schema.iso2.as_deref().map(require).transpose()?;
        let iso3_col = schema.iso3.as_deref().map(require).transpose()?;
        let alias_cols = schema
            .aliases
            .iter()
            .map(|column| require(column.as_str()))
            .collect::<Result<Vec<_>, EpiError>>()?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| lookup_err(err.to_string()))?;
            let cell = |index: usize| record.get(index).unwrap_or("").trim().to_string();
            let optional = |index: Option<usize>| index.map(cell).filter(|value| !value.is_empty());
            let entity = Entity {
                id: cell(id_col),
                name: cell(name_col),
                parent: optional(parent_col),
                division: optional(division_col),
                iso2: iso2_col.map(cell).unwrap_or_default().to_uppercase(),
                iso3: iso3_col.map(cell).unwrap_or_default().to_uppercase(),
                population: parse_number(&cell(population_col))
                    .filter(|value| *value > 0.0)
                    .map(|value| value as u64)
                    .unwrap_or(0),
                latitude: parse_number(&cell(lat_col)).unwrap_or(0.0),
                longitude: parse_number(&cell(long_col)).unwrap_or(0.0),
            };
            let aliases = alias_cols
                .iter()
                .map(|index| {
                    let alias = cell(*index);
                    if schema.integer_aliases {
                        integer_label(&alias).unwrap_or(alias)
                    } else {
                        alias
                    }
                })
                .collect();
            rows.push(LookupRow { entity, aliases });
        }

        Ok(Self {
            name: schema.name.clone(),
            rows,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rows(&self) -> &[LookupRow] {
        &self.rows
    }

    /// Reference linear scan: first row with an alias equal to the label.
    pub fn resolve(&self, raw_label: &str) -> Resolution {
        let label = raw_label.trim();
        let found = self
            .rows
            .iter()
            .find(|row| row.aliases.iter().any(|alias| !alias.is_empty() && alias == label));
        match found {
            Some(row) => Resolution::matched(row.entity.clone()),
            None => Resolution::unmatched(&self.name, label),
        }
    }
}

fn integer_label(value: &str) -> Option<String> {
    parse_number(value)
        .filter(|number| number.fract() == 0.0)
        .map(|number| format!("{}", number as i64))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub entity: Entity,
    pub matched: bool,
}

impl Resolution {
    fn matched(entity: Entity) -> Self {
        Self {
            entity,
            matched: true,
        }
    }

    fn unmatched(table: &str, label: &str) -> Self {
        warn!(table, label, "unknown entity");
        Self {
            entity: Entity::unknown(label),
            matched: false,
        }
    }
}

/// Alias index built once per run.
#[derive(Debug, Clone)]
pub struct EntityIndex {
    name: String,
    entities: Vec<Entity>,
    by_alias: HashMap<String, usize>,
}

impl EntityIndex {
    /// Aliases are inserted in table order and never overwritten, so the
    /// first row declaring an alias wins.
    pub fn build(table: &LookupTable) -> Self {
        let mut entities = Vec::with_capacity(table.rows.len());
        let mut by_alias = HashMap::new();
        for (position, row) in table.rows.iter().enumerate() {
            entities.push(row.entity.clone());
            for alias in &row.aliases {
                if alias.is_empty() {
                    continue;
                }
                by_alias.entry(alias.clone()).or_insert(position);
            }
        }
        Self {
            name: table.name.clone(),
            entities,
            by_alias,
        }
    }

    pub fn resolve(&self, raw_label: &str) -> Resolution {
        let label = raw_label.trim();
        match self.by_alias.get(label) {
            Some(position) => Resolution::matched(self.entities[*position].clone()),
            None => Resolution::unmatched(&self.name, label),
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
