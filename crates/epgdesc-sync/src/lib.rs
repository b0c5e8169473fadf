//! Extraction run orchestration: config, fetch fan-out, sequential ingest,
//! snapshot persistence, run log, optional cron scheduling.

pub mod ingest;
pub mod report;
pub mod resolver;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use epgdesc_core::{DescriptionStore, Feed};
use epgdesc_feeds::{FeedError, FeedSource, FeedSpec, XmltvFeedSource};
use epgdesc_storage::{FeedFetcher, FetchConfig, Locator, SnapshotStore, DEFAULT_USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::task::JoinSet;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use ingest::{ingest_feed, FeedOutcome, IngestStats};
pub use report::{channel_coverage, log_path_for, render_coverage, ChannelCoverage};
pub use resolver::ChannelResolver;

pub const CRATE_NAME: &str = "epgdesc-sync";

fn default_accumulate() -> bool {
    true
}

/// Contents of the `--config` file. YAML, which also accepts the JSON form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub reference_epg: Option<FeedSpec>,
    #[serde(default)]
    pub desc_sources: Vec<FeedSpec>,
    #[serde(default)]
    pub existing_db: Option<String>,
    #[serde(default = "default_accumulate")]
    pub accumulate: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("config has no reference_epg; the target channel set is undefined")]
    MissingReference,
}

impl RunConfig {
    pub fn from_yaml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_yaml_str(&text, path)
    }

    pub fn reference(&self) -> Result<&FeedSpec, ConfigError> {
        self.reference_epg.as_ref().ok_or(ConfigError::MissingReference)
    }

    pub fn existing_db_locator(&self) -> Option<Locator> {
        self.existing_db
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Locator::parse)
    }
}

/// Process-level settings, read from the environment.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub config_path: PathBuf,
    pub output_path: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub fetch_concurrency: usize,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false)
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            config_path: std::env::var("EPGDESC_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("config.json")),
            output_path: std::env::var("EPGDESC_OUTPUT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("EPG/desc.json")),
            user_agent: std::env::var("EPGDESC_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: env_parsed("EPGDESC_HTTP_TIMEOUT_SECS", 120),
            fetch_concurrency: env_parsed("EPGDESC_FETCH_CONCURRENCY", 4usize).max(1),
            scheduler_enabled: env_flag("EPGDESC_SCHEDULER_ENABLED"),
            sync_cron: std::env::var("EPGDESC_SYNC_CRON")
                .unwrap_or_else(|_| "0 0 6 * * *".to_string()),
        }
    }

    fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: self.user_agent.clone(),
            concurrency: self.fetch_concurrency,
            ..FetchConfig::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub outcome: FeedOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotInfo {
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub target_channels: usize,
    pub aliases: usize,
    pub prior_descriptions: usize,
    pub sources: Vec<SourceReport>,
    pub totals: IngestStats,
    pub total_descriptions: usize,
    pub channels_with_desc: usize,
    pub snapshot: SnapshotInfo,
    pub log_path: Option<String>,
}

impl RunSummary {
    pub fn sources_processed(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, FeedOutcome::Absorbed(_)))
            .count()
    }

    pub fn sources_failed(&self) -> usize {
        self.sources.len() - self.sources_processed()
    }
}

pub struct SyncPipeline {
    config: SyncConfig,
    fetcher: FeedFetcher,
    source: Arc<dyn FeedSource>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let fetcher = FeedFetcher::new(config.fetch_config())?;
        let source = Arc::new(XmltvFeedSource::new(fetcher.clone()));
        Ok(Self {
            config,
            fetcher,
            source,
        })
    }

    /// Swap the feed retrieval seam, e.g. for an in-memory source in tests.
    pub fn with_feed_source(mut self, source: Arc<dyn FeedSource>) -> Self {
        self.source = source;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn run_once(&self) -> Result<RunSummary> {
        let run_config = RunConfig::load(&self.config.config_path).await?;
        self.run_with_config(&run_config).await
    }

    pub async fn run_with_config(&self, run_config: &RunConfig) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("extraction_run", %run_id);

        async move {
            let reference_spec = run_config.reference()?;
            let reference = self
                .source
                .load(reference_spec)
                .await
                .with_context(|| format!("loading reference feed {}", reference_spec.display_name()))?;
            let resolver = ChannelResolver::build(&reference);
            let target_channels = resolver.canonical_names().len();
            info!(
                target_channels,
                aliases = resolver.alias_count(),
                "built channel resolver from reference feed"
            );

            let snapshots = SnapshotStore::new(&self.config.output_path);
            let mut store = if run_config.accumulate {
                let remote = run_config.existing_db_locator();
                snapshots.load_or_empty(&self.fetcher, remote.as_ref()).await
            } else {
                info!("accumulation disabled, starting from an empty store");
                DescriptionStore::new()
            };
            let prior_descriptions = store.record_count();

            let fetched = self.fetch_sources(&run_config.desc_sources).await;

            let mut sources = Vec::with_capacity(fetched.len());
            let mut totals = IngestStats::default();
            for (spec, result) in run_config.desc_sources.iter().zip(fetched) {
                let name = spec.display_name().to_string();
                let outcome = match result {
                    Ok(feed) => {
                        let stats = info_span!("ingest_source", source = %name)
                            .in_scope(|| ingest_feed(&mut store, &resolver, &feed));
                        info!(
                            source = %name,
                            inserted = stats.inserted,
                            extended = stats.extended,
                            skipped = stats.skipped(),
                            out_of_scope = stats.out_of_scope,
                            "absorbed source feed"
                        );
                        totals.merge(&stats);
                        FeedOutcome::Absorbed(stats)
                    }
                    Err(err) => {
                        warn!(source = %name, error = %err, "source feed failed, continuing");
                        FeedOutcome::FeedFailed {
                            reason: err.to_string(),
                        }
                    }
                };
                sources.push(SourceReport { name, outcome });
            }

            let written = snapshots
                .persist(&store)
                .await
                .with_context(|| format!("persisting snapshot {}", self.config.output_path.display()))?;
            info!(
                path = %written.path.display(),
                bytes = written.bytes,
                sha256 = %written.sha256,
                records = store.record_count(),
                "persisted snapshot"
            );

            let mut summary = RunSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                target_channels,
                aliases: resolver.alias_count(),
                prior_descriptions,
                sources,
                totals,
                total_descriptions: store.record_count(),
                channels_with_desc: store.channel_count(),
                snapshot: SnapshotInfo {
                    path: written.path.display().to_string(),
                    bytes: written.bytes,
                    sha256: written.sha256,
                },
                log_path: None,
            };

            let log_path = log_path_for(&self.config.output_path);
            let log_text = report::render_run_log(&summary, &store);
            match report::write_run_log(&log_path, &log_text).await {
                Ok(()) => summary.log_path = Some(log_path.display().to_string()),
                Err(err) => warn!(error = %err, "run log not written"),
            }

            Ok::<_, anyhow::Error>(summary)
        }
        .instrument(span)
        .await
    }

    /// Fetch and parse all sources concurrently; results come back in config order.
    async fn fetch_sources(&self, specs: &[FeedSpec]) -> Vec<Result<Feed, FeedError>> {
        let mut tasks = JoinSet::new();
        for (index, spec) in specs.iter().cloned().enumerate() {
            let source = Arc::clone(&self.source);
            tasks.spawn(async move { (index, source.load(&spec).await) });
        }

        let mut slots: Vec<Option<Result<Feed, FeedError>>> = specs.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(err) => error!(error = %err, "feed task aborted"),
            }
        }

        slots
            .into_iter()
            .zip(specs)
            .map(|(slot, spec)| {
                slot.unwrap_or_else(|| {
                    Err(FeedError::Aborted {
                        feed: spec.display_name().to_string(),
                    })
                })
            })
            .collect()
    }

    pub async fn maybe_build_scheduler(self: Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }
        self.build_scheduler().await.map(Some)
    }

    /// One cron job running [`SyncPipeline::run_once`]; failed runs are logged
    /// and retried on the next tick.
    pub async fn build_scheduler(self: Arc<Self>) -> Result<JobScheduler> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let cron = self.config.sync_cron.clone();
        let pipeline = Arc::clone(&self);
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                match pipeline.run_once().await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        total = summary.total_descriptions,
                        "scheduled extraction finished"
                    ),
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled extraction failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
        Ok(sched)
    }
}

pub async fn run_extraction_from_env() -> Result<RunSummary> {
    SyncPipeline::new(SyncConfig::from_env())?.run_once().await
}

/// Per-channel projection of an existing snapshot, without running extraction.
pub async fn report_snapshot(path: &Path) -> Result<String> {
    let store = SnapshotStore::new(path)
        .read_local()
        .await?
        .with_context(|| format!("no snapshot at {}", path.display()))?;
    Ok(render_coverage(&store))
}
