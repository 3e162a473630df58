//! iMEdD regional series for Greece and the national timeline used to
//! enrich the global collection.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde_json::json;
use tracing::{debug, warn};

use crate::delta::{Delta, compute_deltas, cumulative_sum, forward_fill};
use crate::derived::{with_active, with_ratios};
use crate::domain::{Collection, Entity, Metric, SourceTag};
use crate::error::EpiError;
use crate::fetch::{IMEDD_DIR, fetch_all, imedd_extracts};
use crate::normalize::{aggregate, merge_metrics, to_long};
use crate::persist::{KeyField, WritePlan};
use crate::record::{Field, RecordLayout};
use crate::resolver::{EntityIndex, LookupSchema};
use crate::sink::Filter;
use crate::table::{LongTable, Observation, WideTable};

use super::{COUNTRIES_LOOKUP, REGIONS_LOOKUP, Source, SourceContext, Staged};

pub const ID_COLUMNS: [&str; 5] = [
    "Γεωγραφικό Διαμέρισμα",
    "Περιφέρεια",
    "county_normalized",
    "county",
    "pop_11",
];
const LABEL_COLUMN: &str = "county";
const NORMALIZED_COLUMN: &str = "county_normalized";
const DATE_FORMAT: &str = "%Y-%m-%d";
pub const LATEST_FILE: &str = "greece_latest.csv";

pub const RTPCR_TESTS: &str = "cumulative_rtpcr_tests_raw";
pub const NEW_RTPCR_TESTS: &str = "estimated_new_rtpcr_tests";
pub const RAPID_TESTS: &str = "cumulative_rapid_tests_raw";
// Field name as published upstream.
pub const NEW_RAPID_TESTS: &str = "esitmated_new_rapid_tests";

pub const TIMELINE_ID_COLUMNS: [&str; 3] = ["Status", "Province/State", "Country/Region"];
const TIMELINE_DATE_FORMAT: &str = "%m/%d/%y";

/// How one status row of the timeline feeds an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTarget {
    Counter(Metric),
    Reported(Metric),
    /// Raw test figure passed through under its status name.
    Figure(&'static str),
}

pub fn status_mappings() -> Vec<(&'static str, StatusTarget)> {
    vec![
        ("total cases", StatusTarget::Counter(Metric::Cases)),
        ("cases", StatusTarget::Reported(Metric::Cases)),
        ("deaths", StatusTarget::Reported(Metric::Deaths)),
        ("recovered", StatusTarget::Counter(Metric::Recovered)),
        ("hospitalized", StatusTarget::Reported(Metric::Hospitalized)),
        ("intubated", StatusTarget::Counter(Metric::Critical)),
        ("intensive_care", StatusTarget::Counter(Metric::IntensiveCare)),
        ("estimated_new_total_tests", StatusTarget::Reported(Metric::Tests)),
        (RTPCR_TESTS, StatusTarget::Figure(RTPCR_TESTS)),
        (NEW_RTPCR_TESTS, StatusTarget::Figure(NEW_RTPCR_TESTS)),
        (RAPID_TESTS, StatusTarget::Figure(RAPID_TESTS)),
        (NEW_RAPID_TESTS, StatusTarget::Figure(NEW_RAPID_TESTS)),
    ]
}

pub struct Imedd;

impl Imedd {
    fn regional_table(&self, ctx: &SourceContext<'_>, name: &str) -> Result<WideTable, EpiError> {
        let path = ctx.tmp_path(&format!("{IMEDD_DIR}/{name}"));
        WideTable::from_path(&path, &ID_COLUMNS, DATE_FORMAT)
    }
}

/// Melts the cases and deaths tables and joins deaths onto cases. The
/// deaths table is padded up to the last date of the cases table first.
pub fn regional_series(
    cases: WideTable,
    deaths: WideTable,
    index: &EntityIndex,
) -> Result<LongTable, EpiError> {
    let deaths = match cases.last_date() {
        Some(date) => deaths.pad_to(date),
        None => deaths,
    };
    let cases = cases.resolve(LABEL_COLUMN, index)?.retain_matched();
    let deaths = deaths.resolve(LABEL_COLUMN, index)?.retain_matched();
    let cases = aggregate(to_long(cases, Metric::Cases, SourceTag::Imedd));
    let deaths = aggregate(to_long(deaths, Metric::Deaths, SourceTag::Imedd));
    Ok(merge_metrics(cases, vec![deaths]))
}

/// Adds a row dated `as_of` for every region listed in the latest extract
/// when the series has no row on that date yet. The new rows carry the
/// previous day's counters of their region, or nothing when it has none.
pub fn append_latest(
    series: LongTable,
    mut latest: WideTable,
    index: &EntityIndex,
    as_of: NaiveDate,
) -> Result<LongTable, EpiError> {
    if series.rows().iter().any(|row| row.date == as_of) {
        return Ok(series);
    }
    let Some(previous) = as_of.pred_opt() else {
        return Ok(series);
    };
    let normalized = latest
        .column(NORMALIZED_COLUMN)
        .ok_or_else(|| EpiError::MalformedExtract {
            path: latest.origin.clone(),
            message: format!("missing column {NORMALIZED_COLUMN}"),
        })?;
    latest.rows.retain(|row| !row.labels[normalized].is_empty());
    let latest = latest.resolve(LABEL_COLUMN, index)?.retain_matched();

    let mut seen = BTreeSet::new();
    let appended: Vec<Observation> = latest
        .rows
        .into_iter()
        .filter(|row| seen.insert(row.entity.key()))
        .map(|row| {
            let yesterday = series.find(&row.entity.key(), previous);
            let counter = |metric| yesterday.and_then(|found| found.counter(metric));
            let cases = counter(Metric::Cases);
            let deaths = counter(Metric::Deaths);
            Observation::new(as_of, row.entity, SourceTag::Imedd)
                .with_counter(Metric::Cases, cases)
                .with_counter(Metric::Deaths, deaths)
        })
        .collect();
    debug!(rows = appended.len(), date = %as_of, "latest regional rows appended");
    Ok(series.into_iter().chain(appended).collect())
}

/// Pivots the national timeline into one observation per date for `entity`.
pub fn timeline_series(timeline: WideTable, entity: &Entity) -> Result<LongTable, EpiError> {
    let status_column = timeline
        .column("Status")
        .ok_or_else(|| EpiError::MalformedExtract {
            path: timeline.origin.clone(),
            message: "missing column Status".to_string(),
        })?;
    let mappings = status_mappings();

    let mut rows: BTreeMap<NaiveDate, Observation> = timeline
        .dates
        .iter()
        .map(|date| (*date, Observation::new(*date, entity.clone(), SourceTag::Imedd)))
        .collect();
    for status_row in &timeline.rows {
        let status = status_row.labels[status_column].trim();
        let Some((_, target)) = mappings.iter().find(|(name, _)| *name == status) else {
            debug!(status, "timeline status ignored");
            continue;
        };
        for (date, value) in timeline.dates.iter().zip(&status_row.values) {
            let Some(row) = rows.get_mut(date) else {
                continue;
            };
            let value = value.map(|value| value.trunc() as i64);
            match target {
                StatusTarget::Counter(metric) => {
                    row.counters.insert(*metric, value);
                }
                StatusTarget::Reported(metric) => {
                    row.deltas.insert(*metric, Delta::reported(value));
                }
                StatusTarget::Figure(name) => {
                    row.figures.insert(name.to_string(), value.unwrap_or(0));
                }
            }
        }
    }

    let table = LongTable::new(rows.into_values().collect());
    let table = cumulative_sum(table, Observation::entity_key, Metric::Deaths, Metric::Deaths);
    let table = forward_fill(table, Observation::entity_key, Metric::Deaths);
    let table = cumulative_sum(table, Observation::entity_key, Metric::Tests, Metric::Tests);
    let table = forward_fill(table, Observation::entity_key, Metric::Recovered);
    let table = compute_deltas(table, Observation::entity_key, &[Metric::Recovered]);
    Ok(with_ratios(with_active(table)))
}

/// Global-collection plan for the timeline: a rebuild only clears Greek
/// documents on the covered dates, and upserts replace either source.
pub fn timeline_plan(dates: &[NaiveDate]) -> WritePlan {
    let dates = dates
        .iter()
        .map(|date| json!(date.format("%Y-%m-%d").to_string()));
    WritePlan {
        collection: Collection::Global,
        replace: Filter::new().equals("iso3", "GRC").any_of("date", dates),
        key: vec![
            KeyField::exact("date"),
            KeyField::exact("uid"),
            KeyField::exact("country"),
            KeyField::exact("iso3"),
            KeyField::AnyOf(
                "source".to_string(),
                vec![json!(SourceTag::Imedd.as_str()), json!(SourceTag::Jhu.as_str())],
            ),
        ],
    }
}

pub fn timeline_layout() -> RecordLayout {
    RecordLayout::new(vec![
        Field::Date,
        Field::Uid,
        Field::Iso2,
        Field::Iso3,
        Field::Country,
        Field::Latitude,
        Field::Longitude,
        Field::Population,
        Field::Counter(Metric::Cases),
        Field::Counter(Metric::Deaths),
        Field::Counter(Metric::Recovered),
        Field::Counter(Metric::Active),
        Field::Delta(Metric::Cases),
        Field::Delta(Metric::Deaths),
        Field::Delta(Metric::Recovered),
        Field::Delta(Metric::Hospitalized),
        Field::Counter(Metric::IntensiveCare),
        Field::Counter(Metric::Critical),
        Field::IncidenceRate,
        Field::CaseFatalityRatio,
        Field::Figure(RTPCR_TESTS),
        Field::Figure(NEW_RTPCR_TESTS),
        Field::Figure(RAPID_TESTS),
        Field::Figure(NEW_RAPID_TESTS),
        Field::Counter(Metric::Tests),
        Field::Delta(Metric::Tests),
        Field::Source,
        Field::LastUpdatedAt,
    ])
}

impl Source for Imedd {
    fn tag(&self) -> SourceTag {
        SourceTag::Imedd
    }

    fn fetch_raw(&self, ctx: &SourceContext<'_>) -> Result<(), EpiError> {
        if ctx.config.fetch {
            fetch_all(ctx.fetcher, &imedd_extracts(), &ctx.config.tmp_dir)?;
        }
        Ok(())
    }

    fn normalize(&self, ctx: &SourceContext<'_>) -> Result<LongTable, EpiError> {
        let index = ctx.lookup(REGIONS_LOOKUP, LookupSchema::region_labels())?;
        let cases = self.regional_table(ctx, "greece_cases_v2.csv")?;
        let deaths = self.regional_table(ctx, "greece_deaths_v2.csv")?;
        let latest = self.regional_table(ctx, LATEST_FILE)?;
        let series = regional_series(cases, deaths, &index)?;
        append_latest(series, latest, &index, ctx.as_of)
    }

    fn compute_deltas(&self, table: LongTable) -> LongTable {
        with_ratios(compute_deltas(
            table,
            Observation::entity_key,
            &[Metric::Cases, Metric::Deaths],
        ))
    }

    fn layout(&self) -> RecordLayout {
        RecordLayout::new(vec![
            Field::Date,
            Field::Uid,
            Field::GeoUnit,
            Field::State,
            Field::Region,
            Field::Population,
            Field::Counter(Metric::Cases),
            Field::Counter(Metric::Deaths),
            Field::Delta(Metric::Cases),
            Field::Delta(Metric::Deaths),
            Field::CaseFatalityRatio,
            Field::IncidenceRate,
            Field::Source,
            Field::Latitude,
            Field::Longitude,
            Field::LastUpdatedAt,
        ])
    }

    fn plan(&self) -> WritePlan {
        WritePlan::for_source(
            Collection::Greece,
            SourceTag::Imedd,
            &["date", "uid", "region"],
        )
    }

    fn enrichment(&self, ctx: &SourceContext<'_>) -> Result<Option<Staged>, EpiError> {
        let index = ctx.lookup(COUNTRIES_LOOKUP, LookupSchema::countries())?;
        let greece = index.resolve("Greece");
        if !greece.matched {
            warn!("timeline enrichment without a Greece lookup entry");
        }
        let path = ctx.tmp_path(&format!("{IMEDD_DIR}/greeceTimeline.csv"));
        let timeline = WideTable::from_path(&path, &TIMELINE_ID_COLUMNS, TIMELINE_DATE_FORMAT)?;
        let table = timeline_series(timeline, &greece.entity)?;
        let dates: Vec<NaiveDate> = table.dates().into_iter().collect();
        Ok(Some(Staged {
            label: "imedd-timeline".to_string(),
            table,
            layout: timeline_layout(),
            plan: timeline_plan(&dates),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greece() -> Entity {
        Entity {
            id: "300".to_string(),
            name: "Greece".to_string(),
            parent: None,
            division: None,
            iso2: "GR".to_string(),
            iso3: "GRC".to_string(),
            population: 10_000_000,
            latitude: 39.0742,
            longitude: 21.8243,
        }
    }

    const TIMELINE: &str = "\
Status,Province/State,Country/Region,3/1/20,3/2/20,3/3/20
total cases,,Greece,10,15,22
cases,,Greece,3,5,7
deaths,,Greece,1,,2
recovered,,Greece,1,,4
intubated,,Greece,,2,3
estimated_new_total_tests,,Greece,100,200,300
";

    #[test]
    fn timeline_pivot() {
        let timeline = WideTable::from_reader(
            TIMELINE.as_bytes(),
            "mem",
            &TIMELINE_ID_COLUMNS,
            TIMELINE_DATE_FORMAT,
        )
        .unwrap();
        let table = timeline_series(timeline, &greece()).unwrap();
        assert_eq!(table.len(), 3);
        let rows = table.rows();

        let deaths: Vec<_> = rows.iter().map(|row| row.count(Metric::Deaths)).collect();
        assert_eq!(deaths, vec![1, 1, 3]);
        let recovered: Vec<_> = rows.iter().map(|row| row.count(Metric::Recovered)).collect();
        assert_eq!(recovered, vec![1, 1, 4]);
        let tests: Vec<_> = rows.iter().map(|row| row.count(Metric::Tests)).collect();
        assert_eq!(tests, vec![100, 300, 600]);

        assert_eq!(rows[0].delta(Metric::Recovered), Some(Delta::Boundary));
        assert_eq!(rows[2].delta(Metric::Recovered), Some(Delta::Change(3)));
        assert_eq!(rows[1].delta(Metric::Cases), Some(Delta::Reported(5)));
        assert_eq!(rows[2].count(Metric::Active), 22 - 3 - 4);
        assert_eq!(rows[0].count(Metric::Critical), 0);
    }

    const REGIONS: &str = "\
uid,region,state,geo_unit,population,lat,long,region_el,map_value,areaid
GR-AIT,Aitoloakarnania,Western Greece,Peloponnese,210802,38.6,21.4,ΑΙΤΩΛΟΑΚΑΡΝΑΝΙΑΣ,Αιτωλοακαρνανία,104
";

    fn regional(content: &str) -> WideTable {
        WideTable::from_reader(content.as_bytes(), "mem", &ID_COLUMNS, DATE_FORMAT).unwrap()
    }

    #[test]
    fn latest_rows_carry_previous_day() {
        let index = EntityIndex::build(
            &crate::resolver::LookupTable::from_reader(
                REGIONS.as_bytes(),
                &LookupSchema::region_labels(),
                "mem",
            )
            .unwrap(),
        );
        let header = "Γεωγραφικό Διαμέρισμα,Περιφέρεια,county_normalized,county,pop_11";
        let cases = regional(&format!("{header},2021-03-07\n,,AIT,ΑΙΤΩΛΟΑΚΑΡΝΑΝΙΑΣ,1,40\n"));
        let deaths = regional(&format!("{header},2021-03-07\n,,AIT,ΑΙΤΩΛΟΑΚΑΡΝΑΝΙΑΣ,1,2\n"));
        let latest = regional(&format!(
            "{header},cases\n,,AIT,ΑΙΤΩΛΟΑΚΑΡΝΑΝΙΑΣ,1,41\n,,AIT,ΑΙΤΩΛΟΑΚΑΡΝΑΝΙΑΣ,1,41\n,,,ΑΓΙΟ ΟΡΟΣ,,0\n"
        ));
        let series = regional_series(cases, deaths, &index).unwrap();

        let next = NaiveDate::from_ymd_opt(2021, 3, 8).unwrap();
        let appended = append_latest(series.clone(), latest.clone(), &index, next).unwrap();
        assert_eq!(appended.len(), 2);
        let row = &appended.rows()[1];
        assert_eq!(row.date, next);
        assert_eq!((row.counter(Metric::Cases), row.counter(Metric::Deaths)), (Some(40), Some(2)));

        let gap = NaiveDate::from_ymd_opt(2021, 3, 10).unwrap();
        let appended = append_latest(series.clone(), latest.clone(), &index, gap).unwrap();
        assert_eq!(appended.rows()[1].counter(Metric::Cases), None);

        let present = NaiveDate::from_ymd_opt(2021, 3, 7).unwrap();
        assert_eq!(append_latest(series.clone(), latest, &index, present).unwrap(), series);
    }

    #[test]
    fn test_statuses_pass_through() {
        let timeline = WideTable::from_reader(
            "Status,Province/State,Country/Region,3/1/20,3/2/20\n\
             cumulative_rtpcr_tests_raw,,Greece,10,\n\
             esitmated_new_rapid_tests,,Greece,3,4\n"
                .as_bytes(),
            "mem",
            &TIMELINE_ID_COLUMNS,
            TIMELINE_DATE_FORMAT,
        )
        .unwrap();
        let table = timeline_series(timeline, &greece()).unwrap();
        let record = timeline_layout().record(&table.rows()[1], "");
        assert_eq!(record[RTPCR_TESTS], json!(0));
        assert_eq!(record[NEW_RAPID_TESTS], json!(4));
        assert_eq!(record[RAPID_TESTS], json!(0));
        assert_eq!(table.rows()[0].figures[RTPCR_TESTS], 10);
    }

    #[test]
    fn timeline_plan_spans_both_sources() {
        let plan = timeline_plan(&[NaiveDate::from_ymd_opt(2020, 3, 1).unwrap()]);
        assert_eq!(plan.collection, Collection::Global);
        assert_eq!(plan.key.len(), 5);
        assert!(matches!(plan.key[4], KeyField::AnyOf(ref name, ref values) if name == "source" && values.len() == 2));
    }
}
