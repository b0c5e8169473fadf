use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use epgdesc_core::{Feed, FeedChannel, RawProgram};
use epgdesc_feeds::{FeedError, FeedSource, FeedSpec};
use epgdesc_storage::DEFAULT_USER_AGENT;
use epgdesc_sync::{FeedOutcome, RunConfig, SyncConfig, SyncPipeline};
use tempfile::tempdir;

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(name)
        .display()
        .to_string()
}

fn pipeline_config(output: PathBuf) -> SyncConfig {
    SyncConfig {
        config_path: PathBuf::from(fixture("config.example.yaml")),
        output_path: output,
        user_agent: DEFAULT_USER_AGENT.to_string(),
        http_timeout_secs: 5,
        fetch_concurrency: 2,
        scheduler_enabled: false,
        sync_cron: "0 0 6 * * *".to_string(),
    }
}

fn run_config(sources: &[&str]) -> RunConfig {
    RunConfig {
        reference_epg: Some(FeedSpec::new("reference", fixture("reference.xml"), false)),
        desc_sources: sources
            .iter()
            .map(|name| FeedSpec::new(*name, fixture(name), false))
            .collect(),
        existing_db: None,
        accumulate: true,
    }
}

#[tokio::test]
async fn alias_and_title_variants_extend_one_record() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("EPG/desc.json");
    let pipeline = SyncPipeline::new(pipeline_config(output.clone())).expect("pipeline");

    let summary = pipeline
        .run_with_config(&run_config(&["source_a.xml", "source_b.xml"]))
        .await
        .expect("run");

    assert_eq!(summary.target_channels, 4);
    assert_eq!(summary.aliases, 8);
    assert_eq!(summary.sources_processed(), 2);
    assert_eq!(summary.totals.inserted, 4);
    assert_eq!(summary.totals.extended, 1);
    assert_eq!(summary.totals.placeholder, 1);
    assert_eq!(summary.totals.too_short, 1);
    assert_eq!(summary.totals.not_longer, 1);
    assert_eq!(summary.totals.malformed, 1);
    assert_eq!(summary.totals.out_of_scope, 2);
    assert_eq!(summary.totals.markup_repaired, 1);
    assert_eq!(summary.total_descriptions, 4);
    assert_eq!(summary.channels_with_desc, 4);

    let text = std::fs::read_to_string(&output).expect("snapshot");
    let snapshot: serde_json::Value = serde_json::from_str(&text).expect("json");
    let record = &snapshot["cctv1"]["新闻联播"];
    assert_eq!(record["channel"], "CCTV-1");
    assert_eq!(record["title"], "新闻联播");
    assert_eq!(record["desc"].as_str().unwrap().chars().count(), 60);

    assert_eq!(snapshot["cctv5"]["体育新闻"]["channel"], "CCTV-5");
    assert_eq!(
        snapshot["湖南卫视"]["快乐大本营"]["desc"].as_str().unwrap().chars().count(),
        24
    );
    assert_eq!(
        snapshot["凤凰卫视中文台"]["鲁豫有约"]["desc"],
        "访谈节目《鲁豫有约》由陈鲁豫主持"
    );
    assert!(snapshot.get("某地方台").is_none());
    assert!(
        !text.contains("超高清频道"),
        "programme on an unknown channel name must not merge through its id"
    );

    let log = std::fs::read_to_string(dir.path().join("EPG/desc_log.txt")).expect("log");
    assert!(log.contains("Target channels: 4"));
    assert!(log.contains("Extended descriptions: 1"));
    assert!(log.contains("CCTV-1: 1"));
    assert_eq!(summary.log_path.as_deref(), Some(dir.path().join("EPG/desc_log.txt").to_str().unwrap()));
}

#[tokio::test]
async fn broken_and_missing_feeds_do_not_stop_the_run() {
    let dir = tempdir().expect("tempdir");
    let pipeline = SyncPipeline::new(pipeline_config(dir.path().join("desc.json"))).expect("pipeline");

    let summary = pipeline
        .run_with_config(&run_config(&["source_broken.xml", "missing.xml", "source_a.xml"]))
        .await
        .expect("run");

    assert_eq!(summary.sources.len(), 3);
    assert!(matches!(summary.sources[0].outcome, FeedOutcome::FeedFailed { .. }));
    assert!(matches!(summary.sources[1].outcome, FeedOutcome::FeedFailed { .. }));
    assert_eq!(summary.sources[2].outcome.absorbed(), 3);
    assert_eq!(summary.sources_failed(), 2);
    assert_eq!(summary.total_descriptions, 3);
}

#[tokio::test]
async fn reference_problems_abort_the_run() {
    let dir = tempdir().expect("tempdir");
    let output = dir.path().join("desc.json");
    let pipeline = SyncPipeline::new(pipeline_config(output.clone())).expect("pipeline");

    let mut no_reference = run_config(&["source_a.xml"]);
    no_reference.reference_epg = None;
    assert!(pipeline.run_with_config(&no_reference).await.is_err());

    let mut broken_reference = run_config(&["source_a.xml"]);
    broken_reference.reference_epg = Some(FeedSpec::new("ref", fixture("source_broken.xml"), false));
    let err = pipeline.run_with_config(&broken_reference).await.unwrap_err();
    assert!(format!("{err:#}").contains("reference feed"));

    assert!(!output.exists(), "no snapshot written on fatal errors");
}

#[tokio::test]
async fn rerunning_the_same_sources_changes_nothing() {
    let dir = tempdir().expect("tempdir");
    let pipeline = SyncPipeline::new(pipeline_config(dir.path().join("desc.json"))).expect("pipeline");
    let config = run_config(&["source_a.xml", "source_b.xml"]);

    let first = pipeline.run_with_config(&config).await.expect("first run");
    let second = pipeline.run_with_config(&config).await.expect("second run");

    assert_eq!(second.prior_descriptions, 4);
    assert_eq!(second.totals.absorbed(), 0);
    assert_eq!(second.total_descriptions, first.total_descriptions);
    assert_eq!(second.snapshot.sha256, first.snapshot.sha256);
}

#[tokio::test]
async fn disabling_accumulation_starts_fresh() {
    let dir = tempdir().expect("tempdir");
    let pipeline = SyncPipeline::new(pipeline_config(dir.path().join("desc.json"))).expect("pipeline");

    pipeline
        .run_with_config(&run_config(&["source_a.xml", "source_b.xml"]))
        .await
        .expect("seed run");

    let mut fresh = run_config(&["source_b.xml"]);
    fresh.accumulate = false;
    let summary = pipeline.run_with_config(&fresh).await.expect("fresh run");
    assert_eq!(summary.prior_descriptions, 0);
    assert_eq!(summary.total_descriptions, 3);
}

#[tokio::test]
async fn feed_order_does_not_change_the_final_snapshot() {
    let forward = tempdir().expect("tempdir");
    let backward = tempdir().expect("tempdir");

    let a_then_b = SyncPipeline::new(pipeline_config(forward.path().join("desc.json")))
        .expect("pipeline")
        .run_with_config(&run_config(&["source_a.xml", "source_b.xml"]))
        .await
        .expect("run");
    let b_then_a = SyncPipeline::new(pipeline_config(backward.path().join("desc.json")))
        .expect("pipeline")
        .run_with_config(&run_config(&["source_b.xml", "source_a.xml"]))
        .await
        .expect("run");

    assert_eq!(a_then_b.snapshot.sha256, b_then_a.snapshot.sha256);
}

/// Serves canned feeds, finishing earlier entries last.
struct StaggeredSource {
    feeds: HashMap<String, (Feed, Duration)>,
}

#[async_trait]
impl FeedSource for StaggeredSource {
    async fn load(&self, spec: &FeedSpec) -> Result<Feed, FeedError> {
        let (feed, delay) = self.feeds.get(&spec.url).cloned().ok_or_else(|| FeedError::Aborted {
            feed: spec.url.clone(),
        })?;
        tokio::time::sleep(delay).await;
        Ok(feed)
    }
}

fn single_program_feed(desc: &str) -> Feed {
    Feed {
        channels: vec![FeedChannel {
            id: "1".into(),
            display_names: vec!["CCTV-1".into()],
        }],
        programs: vec![RawProgram {
            channel_id: "1".into(),
            channel_name: "CCTV-1".into(),
            title: Some("新闻联播".into()),
            desc: Some(desc.into()),
        }],
    }
}

#[tokio::test]
async fn equal_length_ties_go_to_the_first_configured_feed() {
    let dir = tempdir().expect("tempdir");
    let mut feeds = HashMap::new();
    feeds.insert("ref".to_string(), (single_program_feed("参考频道"), Duration::ZERO));
    feeds.insert(
        "slow".to_string(),
        (single_program_feed("慢速来源的节目简介"), Duration::from_millis(150)),
    );
    feeds.insert(
        "fast".to_string(),
        (single_program_feed("快速来源的节目简介"), Duration::ZERO),
    );

    let pipeline = SyncPipeline::new(pipeline_config(dir.path().join("desc.json")))
        .expect("pipeline")
        .with_feed_source(Arc::new(StaggeredSource { feeds }));
    let config = RunConfig {
        reference_epg: Some(FeedSpec::new("ref", "ref", false)),
        desc_sources: vec![
            FeedSpec::new("slow", "slow", false),
            FeedSpec::new("fast", "fast", false),
        ],
        existing_db: None,
        accumulate: false,
    };

    let summary = pipeline.run_with_config(&config).await.expect("run");
    assert_eq!(summary.sources[0].name, "slow");
    assert_eq!(summary.sources[0].outcome.absorbed(), 1);
    assert_eq!(summary.sources[1].outcome.absorbed(), 0);

    let text = std::fs::read_to_string(dir.path().join("desc.json")).expect("snapshot");
    assert!(text.contains("慢速来源的节目简介"));
    assert!(!text.contains("快速来源"));
}
