//! Regional vaccination figures from data.gov.gr.

use std::fs;

use chrono::NaiveDate;
use tracing::debug;

use crate::delta::compute_deltas;
use crate::domain::{Collection, Metric, SourceTag};
use crate::error::EpiError;
use crate::govgr_api::{VaccinationRecord, campaign_start, fetch_range};
use crate::normalize::aggregate;
use crate::persist::WritePlan;
use crate::record::{Field, RecordLayout};
use crate::resolver::{EntityIndex, LookupSchema};
use crate::sink::write_atomic;
use crate::table::{LongTable, Observation};

use super::{REGIONS_LOOKUP, Source, SourceContext};

pub const RAW_PATH: &str = "govgr/mdg_emvolio.json";

pub struct GovGr;

/// One observation per record, keyed by the `PE<areaid>` uid. Records with
/// an unreadable reference date are skipped.
pub fn vaccination_series(records: Vec<VaccinationRecord>, index: &EntityIndex) -> LongTable {
    let rows = records
        .into_iter()
        .filter_map(|record| {
            let Some(date) = record.date() else {
                debug!(referencedate = record.referencedate.as_str(), "unreadable date");
                return None;
            };
            let areaid = record.areaid.to_string();
            let mut entity = index.resolve(&areaid).entity;
            entity.id = format!("PE{areaid}");
            Some(
                Observation::new(date, entity, SourceTag::Govgr)
                    .with_attribute("area", record.area)
                    .with_attribute("areaid", areaid)
                    .with_counter(Metric::TotalDistinctPersons, record.totaldistinctpersons)
                    .with_counter(Metric::TotalVaccinations, record.totalvaccinations)
                    .with_counter(Metric::DayTotal, record.daytotal)
                    .with_counter(Metric::DayDiff, record.daydiff),
            )
        })
        .collect();
    aggregate(rows)
}

impl GovGr {
    fn raw_records(&self, ctx: &SourceContext<'_>) -> Result<Vec<VaccinationRecord>, EpiError> {
        let path = ctx.tmp_path(RAW_PATH);
        let content =
            fs::read_to_string(path.as_std_path()).map_err(|err| EpiError::ExtractRead {
                path: path.to_string(),
                message: err.to_string(),
            })?;
        serde_json::from_str(&content).map_err(|err| EpiError::MalformedExtract {
            path: path.to_string(),
            message: err.to_string(),
        })
    }
}

impl Source for GovGr {
    fn tag(&self) -> SourceTag {
        SourceTag::Govgr
    }

    /// The API is the only way to obtain the data, so this always fetches.
    fn fetch_raw(&self, ctx: &SourceContext<'_>) -> Result<(), EpiError> {
        if ctx.config.govgr_token.is_none() {
            return Err(EpiError::MissingToken(SourceTag::Govgr.to_string()));
        }
        let from: NaiveDate = campaign_start();
        let records = fetch_range(ctx.govgr, from, ctx.as_of)?;
        let content =
            serde_json::to_vec(&records).map_err(|err| EpiError::Filesystem(err.to_string()))?;
        write_atomic(ctx.tmp_path(RAW_PATH).as_std_path(), &content)?;
        debug!(records = records.len(), "govgr records fetched");
        Ok(())
    }

    fn normalize(&self, ctx: &SourceContext<'_>) -> Result<LongTable, EpiError> {
        let index = ctx.lookup(REGIONS_LOOKUP, LookupSchema::region_area_ids())?;
        Ok(vaccination_series(self.raw_records(ctx)?, &index))
    }

    fn compute_deltas(&self, table: LongTable) -> LongTable {
        compute_deltas(
            table,
            Observation::entity_key,
            &[Metric::TotalDistinctPersons, Metric::TotalVaccinations],
        )
    }

    fn layout(&self) -> RecordLayout {
        RecordLayout::new(vec![
            Field::Date,
            Field::Attribute("area"),
            Field::Attribute("areaid"),
            Field::Uid,
            Field::Counter(Metric::TotalDistinctPersons),
            Field::Counter(Metric::TotalVaccinations),
            Field::Counter(Metric::DayTotal),
            Field::Counter(Metric::DayDiff),
            Field::Delta(Metric::TotalDistinctPersons),
            Field::Delta(Metric::TotalVaccinations),
            Field::GeoUnit,
            Field::State,
            Field::Region,
            Field::Population,
            Field::Latitude,
            Field::Longitude,
            Field::LastUpdatedAt,
            Field::Source,
        ])
    }

    fn plan(&self) -> WritePlan {
        WritePlan::for_source(
            Collection::GrVaccines,
            SourceTag::Govgr,
            &["date", "uid", "region"],
        )
    }
}
