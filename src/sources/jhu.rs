//! JHU CSSE global time series.

use tracing::debug;

use crate::delta::compute_deltas;
use crate::derived::{with_active, with_ratios};
use crate::domain::{Collection, Metric, SourceTag};
use crate::error::EpiError;
use crate::fetch::{JHU_TIME_SERIES_DIR, fetch_all, jhu_extracts};
use crate::normalize::{Cleanup, aggregate, merge_metrics, to_long};
use crate::persist::WritePlan;
use crate::record::{Field, RecordLayout};
use crate::resolver::{EntityIndex, LookupSchema};
use crate::table::{LongTable, Observation, WideTable};

use super::{COUNTRIES_LOOKUP, Source, SourceContext};

pub const ID_COLUMNS: [&str; 4] = ["Province/State", "Country/Region", "Lat", "Long"];
pub const DATE_FORMAT: &str = "%m/%d/%y";
const DELTA_METRICS: [Metric; 3] = [Metric::Cases, Metric::Deaths, Metric::Recovered];

pub struct Jhu;

impl Jhu {
    fn metric_table(
        &self,
        ctx: &SourceContext<'_>,
        kind: &str,
        metric: Metric,
        cleanup: &Cleanup,
        index: &EntityIndex,
    ) -> Result<LongTable, EpiError> {
        let path = ctx.tmp_path(&format!(
            "{JHU_TIME_SERIES_DIR}/time_series_covid19_{kind}_global.csv"
        ));
        let wide = WideTable::from_path(&path, &ID_COLUMNS, DATE_FORMAT)?;
        let cleaned = cleanup.apply(wide)?;
        let resolved = cleaned.resolve(&cleanup.columns.country, index)?;
        Ok(aggregate(to_long(resolved, metric, SourceTag::Jhu)))
    }
}

impl Source for Jhu {
    fn tag(&self) -> SourceTag {
        SourceTag::Jhu
    }

    fn fetch_raw(&self, ctx: &SourceContext<'_>) -> Result<(), EpiError> {
        if ctx.config.fetch {
            fetch_all(ctx.fetcher, &jhu_extracts(), &ctx.config.tmp_dir)?;
        }
        Ok(())
    }

    fn normalize(&self, ctx: &SourceContext<'_>) -> Result<LongTable, EpiError> {
        let index = ctx.lookup(COUNTRIES_LOOKUP, LookupSchema::countries())?;
        let cleanup = Cleanup::jhu();
        let confirmed = self.metric_table(ctx, "confirmed", Metric::Cases, &cleanup, &index)?;
        let deaths = self.metric_table(ctx, "deaths", Metric::Deaths, &cleanup, &index)?;
        let recovered = self.metric_table(ctx, "recovered", Metric::Recovered, &cleanup, &index)?;
        debug!(
            confirmed = confirmed.len(),
            deaths = deaths.len(),
            recovered = recovered.len(),
            "jhu tables melted"
        );
        let merged = merge_metrics(confirmed, vec![deaths, recovered]);
        Ok(with_active(merged))
    }

    fn compute_deltas(&self, table: LongTable) -> LongTable {
        with_ratios(compute_deltas(table, Observation::entity_key, &DELTA_METRICS))
    }

    fn layout(&self) -> RecordLayout {
        national_layout(&[])
    }

    fn plan(&self) -> WritePlan {
        WritePlan::for_source(
            Collection::Global,
            SourceTag::Jhu,
            &["date", "uid", "iso3", "country"],
        )
    }
}

/// Record layout of the global collection; `extra` counters follow `active`.
pub fn national_layout(extra: &[Metric]) -> RecordLayout {
    let mut fields = vec![
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
    ];
    fields.extend(extra.iter().map(|metric| Field::Counter(*metric)));
    fields.extend([
        Field::Delta(Metric::Cases),
        Field::Delta(Metric::Deaths),
        Field::Delta(Metric::Recovered),
        Field::CaseFatalityRatio,
        Field::IncidenceRate,
        Field::Source,
        Field::LastUpdatedAt,
    ]);
    RecordLayout::new(fields)
}
