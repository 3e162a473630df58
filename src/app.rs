use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ResolvedConfig;
use crate::domain::{Collection, SourceTag, WriteMode};
use crate::error::EpiError;
use crate::fetch::ExtractFetcher;
use crate::govgr_api::GovGrClient;
use crate::persist::{self, WriteReport, Window};
use crate::record::{snapshot_path, with_location, write_snapshot};
use crate::sink::DocumentSink;
use crate::sources::{Source, SourceContext, Staged, dispatch};

pub const COLLECTIONS: [Collection; 3] =
    [Collection::Global, Collection::Greece, Collection::GrVaccines];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Source,
    Enrichment,
}

/// What happened to one source (or one enrichment) during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    Completed {
        rows: usize,
        snapshot: String,
        write: WriteReport,
    },
    Inapplicable {
        reason: String,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunItem {
    pub source: SourceTag,
    pub stage: Stage,
    pub outcome: SourceOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub as_of: NaiveDate,
    pub mode: WriteMode,
    pub items: Vec<RunItem>,
}

impl RunResult {
    pub fn has_failures(&self) -> bool {
        self.items
            .iter()
            .any(|item| matches!(item.outcome, SourceOutcome::Failed { .. }))
    }

    pub fn failed_sources(&self) -> Vec<SourceTag> {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, SourceOutcome::Failed { .. }))
            .map(|item| item.source)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexResult {
    pub collections: Vec<IndexEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexEntry {
    pub collection: Collection,
    pub indexes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourcesResult {
    pub sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceEntry {
    pub source: SourceTag,
    pub applicable: bool,
    pub collection: Option<Collection>,
    pub selected: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<F: ExtractFetcher, G: GovGrClient, S: DocumentSink> {
    config: ResolvedConfig,
    fetcher: F,
    govgr: G,
    sink: S,
}

impl<F: ExtractFetcher, G: GovGrClient, S: DocumentSink> App<F, G, S> {
    pub fn new(config: ResolvedConfig, fetcher: F, govgr: G, sink: S) -> Self {
        Self {
            config,
            fetcher,
            govgr,
            sink,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Runs every configured source in turn, then the enrichments of the
    /// sources that completed. A failing source is recorded and the run
    /// moves on to the next one.
    pub fn run(
        &self,
        as_of: NaiveDate,
        stamp: DateTime<Utc>,
        progress: &dyn ProgressSink,
    ) -> RunResult {
        let ctx = SourceContext {
            config: &self.config,
            as_of,
            fetcher: &self.fetcher,
            govgr: &self.govgr,
        };
        let window = Window::new(as_of, self.config.window_days);
        let mut indexed = HashSet::new();
        let mut items = Vec::new();
        let mut completed: Vec<Box<dyn Source>> = Vec::new();

        for tag in &self.config.sources {
            let Some(source) = dispatch(*tag) else {
                info!(source = %tag, "source inapplicable");
                items.push(RunItem {
                    source: *tag,
                    stage: Stage::Source,
                    outcome: SourceOutcome::Inapplicable {
                        reason: "no strategy for this source".to_string(),
                    },
                });
                continue;
            };
            if let Some(reason) = source.unavailable(&ctx) {
                info!(source = %tag, reason = reason.as_str(), "source inapplicable");
                items.push(RunItem {
                    source: *tag,
                    stage: Stage::Source,
                    outcome: SourceOutcome::Inapplicable { reason },
                });
                continue;
            }
            let result = self.run_source(
                source.as_ref(),
                &ctx,
                window,
                stamp,
                &mut indexed,
                progress,
            );
            let outcome = match result {
                Ok(outcome) => {
                    completed.push(source);
                    outcome
                }
                Err(err) => {
                    warn!(source = %tag, error = %err, "source failed");
                    SourceOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
            items.push(RunItem {
                source: *tag,
                stage: Stage::Source,
                outcome,
            });
        }

        for source in &completed {
            let tag = source.tag();
            let outcome = match source.enrichment(&ctx) {
                Ok(None) => continue,
                Ok(Some(staged)) => {
                    progress.event(ProgressEvent {
                        message: format!("phase=Persist; enrichment {}", staged.label),
                        elapsed: None,
                    });
                    self.persist(&staged, &ctx, window, stamp, &mut indexed)
                        .unwrap_or_else(|err| SourceOutcome::Failed {
                            error: err.to_string(),
                        })
                }
                Err(err) => SourceOutcome::Failed {
                    error: err.to_string(),
                },
            };
            if let SourceOutcome::Failed { error } = &outcome {
                warn!(source = %tag, error = error.as_str(), "enrichment failed");
            }
            items.push(RunItem {
                source: tag,
                stage: Stage::Enrichment,
                outcome,
            });
        }

        RunResult {
            as_of,
            mode: self.config.mode,
            items,
        }
    }

    /// Creates the expected indexes of every collection.
    pub fn ensure_indexes(&self, progress: &dyn ProgressSink) -> Result<IndexResult, EpiError> {
        let mut collections = Vec::new();
        for collection in COLLECTIONS {
            progress.event(ProgressEvent {
                message: format!("phase=Persist; indexing {collection}"),
                elapsed: None,
            });
            let indexes = persist::ensure_indexes(&self.sink, collection)?;
            collections.push(IndexEntry {
                collection,
                indexes,
            });
        }
        Ok(IndexResult { collections })
    }

    pub fn sources(&self) -> SourcesResult {
        let sources = SourceTag::ALL
            .into_iter()
            .map(|tag| {
                let strategy = dispatch(tag);
                SourceEntry {
                    source: tag,
                    applicable: strategy.is_some(),
                    collection: strategy.map(|source| source.plan().collection),
                    selected: self.config.sources.contains(&tag),
                }
            })
            .collect();
        SourcesResult { sources }
    }

    fn run_source(
        &self,
        source: &dyn Source,
        ctx: &SourceContext<'_>,
        window: Window,
        stamp: DateTime<Utc>,
        indexed: &mut HashSet<Collection>,
        progress: &dyn ProgressSink,
    ) -> Result<SourceOutcome, EpiError> {
        let tag = source.tag();
        let started = Instant::now();

        progress.event(ProgressEvent {
            message: format!("phase=Fetch; {tag}"),
            elapsed: None,
        });
        source.fetch_raw(ctx)?;

        progress.event(ProgressEvent {
            message: format!("phase=Normalize; {tag}"),
            elapsed: Some(started.elapsed()),
        });
        let table = source.normalize(ctx)?;
        let table = source.compute_deltas(table);

        progress.event(ProgressEvent {
            message: format!("phase=Persist; {tag} rows={}", table.len()),
            elapsed: Some(started.elapsed()),
        });
        let staged = Staged {
            label: tag.to_string(),
            table,
            layout: source.layout(),
            plan: source.plan(),
        };
        self.persist(&staged, ctx, window, stamp, indexed)
    }

    fn persist(
        &self,
        staged: &Staged,
        ctx: &SourceContext<'_>,
        window: Window,
        stamp: DateTime<Utc>,
        indexed: &mut HashSet<Collection>,
    ) -> Result<SourceOutcome, EpiError> {
        let records = staged.layout.records(&staged.table, stamp);
        let snapshot = snapshot_path(&self.config.output_dir, ctx.as_of, &staged.label);
        write_snapshot(&snapshot, &staged.layout, &records)?;

        let collection = staged.plan.collection;
        if indexed.insert(collection) {
            persist::ensure_indexes(&self.sink, collection)?;
        }
        let documents = records.into_iter().map(with_location).collect();
        let write = persist::write(documents, self.config.mode, &staged.plan, &self.sink, window)?;
        info!(
            label = staged.label.as_str(),
            rows = staged.table.len(),
            snapshot = snapshot.as_str(),
            "source completed"
        );
        Ok(SourceOutcome::Completed {
            rows: staged.table.len(),
            snapshot: snapshot.to_string(),
            write,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::govgr_api::VaccinationRecord;
    use crate::output::JsonOutput;
    use crate::sink::MemorySink;
    use camino::Utf8PathBuf;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockFetcher {
        calls: Mutex<usize>,
    }

    impl ExtractFetcher for MockFetcher {
        fn download(&self, _url: &str, _destination: &Path) -> Result<(), EpiError> {
            *self.calls.lock().unwrap() += 1;
            Err(EpiError::FetchStatus {
                status: 404,
                message: "not found".to_string(),
            })
        }
    }

    struct NoGovGr;

    impl GovGrClient for NoGovGr {
        fn fetch_vaccinations(
            &self,
            _from: NaiveDate,
            _to: NaiveDate,
        ) -> Result<Vec<VaccinationRecord>, EpiError> {
            Ok(Vec::new())
        }
    }

    fn config(root: &Utf8PathBuf, sources: Vec<SourceTag>, fetch: bool) -> ResolvedConfig {
        ResolvedConfig {
            output_dir: root.join("out"),
            tmp_dir: root.join("tmp"),
            data_dir: root.join("data"),
            store_dir: root.join("store"),
            mode: WriteMode::Incremental,
            window_days: 5,
            sources,
            govgr_token: None,
            fetch,
        }
    }

    #[test]
    fn failures_do_not_stop_other_sources() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let app = App::new(
            config(&root, vec![SourceTag::Jhu, SourceTag::Who, SourceTag::Govgr], true),
            MockFetcher::default(),
            NoGovGr,
            MemorySink::new(),
        );
        let as_of = NaiveDate::from_ymd_opt(2021, 3, 10).unwrap();
        let result = app.run(as_of, Utc::now(), &JsonOutput);

        assert_eq!(result.items.len(), 3);
        assert!(matches!(result.items[0].outcome, SourceOutcome::Failed { .. }));
        assert!(matches!(result.items[1].outcome, SourceOutcome::Inapplicable { .. }));
        assert!(matches!(result.items[2].outcome, SourceOutcome::Failed { ref error } if error.contains("token")));
        assert_eq!(*app.fetcher.calls.lock().unwrap(), 1);
        assert!(result.has_failures());
        assert_eq!(result.failed_sources(), vec![SourceTag::Jhu, SourceTag::Govgr]);
    }

    #[test]
    fn indexes_cover_every_collection() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let app = App::new(
            config(&root, SourceTag::ALL.to_vec(), false),
            MockFetcher::default(),
            NoGovGr,
            MemorySink::new(),
        );
        let result = app.ensure_indexes(&JsonOutput).unwrap();
        assert_eq!(result.collections.len(), 3);
        assert_eq!(app.sink().indexes(Collection::Greece).len(), 4);
    }
}
