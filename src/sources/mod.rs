//! Per-source strategies and the dispatch table from tag to strategy.

pub mod govgr;
pub mod imedd;
pub mod jhu;
pub mod worldometer;

use camino::Utf8PathBuf;
use chrono::NaiveDate;

use crate::config::ResolvedConfig;
use crate::domain::SourceTag;
use crate::error::EpiError;
use crate::fetch::ExtractFetcher;
use crate::govgr_api::GovGrClient;
use crate::persist::WritePlan;
use crate::record::RecordLayout;
use crate::resolver::{EntityIndex, LookupSchema, LookupTable};
use crate::table::LongTable;

pub const COUNTRIES_LOOKUP: &str = "countries-mapping-jhu-wom.csv";
pub const REGIONS_LOOKUP: &str = "region-mapping-imedd.csv";

/// Everything a strategy may read during a run.
pub struct SourceContext<'a> {
    pub config: &'a ResolvedConfig,
    pub as_of: NaiveDate,
    pub fetcher: &'a dyn ExtractFetcher,
    pub govgr: &'a dyn GovGrClient,
}

impl SourceContext<'_> {
    pub fn lookup(&self, file: &str, schema: LookupSchema) -> Result<EntityIndex, EpiError> {
        let table = LookupTable::from_path(&self.config.data_dir.join(file), &schema)?;
        Ok(EntityIndex::build(&table))
    }

    pub fn tmp_path(&self, relative: &str) -> Utf8PathBuf {
        self.config.tmp_dir.join(relative)
    }
}

/// A table ready for persistence, with the layout of its records and the
/// plan describing where they go.
#[derive(Debug, Clone)]
pub struct Staged {
    pub label: String,
    pub table: LongTable,
    pub layout: RecordLayout,
    pub plan: WritePlan,
}

pub trait Source {
    fn tag(&self) -> SourceTag;

    /// Brings the raw extract into the tmp tree. A no-op unless fetching
    /// was requested or the source has no other way to obtain its data.
    fn fetch_raw(&self, ctx: &SourceContext<'_>) -> Result<(), EpiError>;

    /// Reason the source cannot run with the inputs at hand, if any.
    fn unavailable(&self, _ctx: &SourceContext<'_>) -> Option<String> {
        None
    }

    /// Reads the raw extract into a long table of cumulative counters.
    fn normalize(&self, ctx: &SourceContext<'_>) -> Result<LongTable, EpiError>;

    /// Adds incremental values and derived metrics.
    fn compute_deltas(&self, table: LongTable) -> LongTable;

    fn layout(&self) -> RecordLayout;

    fn plan(&self) -> WritePlan;

    /// Cross-source enrichment, run once every source has completed.
    fn enrichment(&self, _ctx: &SourceContext<'_>) -> Result<Option<Staged>, EpiError> {
        Ok(None)
    }
}

/// Strategy for a tag, or `None` when the tag has no strategy.
pub fn dispatch(tag: SourceTag) -> Option<Box<dyn Source>> {
    match tag {
        SourceTag::Jhu => Some(Box::new(jhu::Jhu)),
        SourceTag::Worldometer => Some(Box::new(worldometer::Worldometer)),
        SourceTag::Imedd => Some(Box::new(imedd::Imedd)),
        SourceTag::Govgr => Some(Box::new(govgr::GovGr)),
        SourceTag::Who | SourceTag::Eody | SourceTag::Sch => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_table() {
        for tag in SourceTag::ALL {
            let strategy = dispatch(tag);
            match tag {
                SourceTag::Who | SourceTag::Eody | SourceTag::Sch => assert!(strategy.is_none()),
                _ => assert_eq!(strategy.map(|source| source.tag()), Some(tag)),
            }
        }
    }
}
