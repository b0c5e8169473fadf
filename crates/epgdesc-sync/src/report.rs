//! Plain-text run log and per-channel coverage projection of the store.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use epgdesc_core::DescriptionStore;
use serde::Serialize;
use tokio::fs;

use crate::ingest::FeedOutcome;
use crate::RunSummary;

/// Feed schedules are published in China Standard Time.
const REPORT_UTC_OFFSET_SECS: i32 = 8 * 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelCoverage {
    pub channel: String,
    pub records: usize,
}

/// Channels by record count, descending; ties by channel name.
pub fn channel_coverage(store: &DescriptionStore) -> Vec<ChannelCoverage> {
    let mut rows = store
        .channel_sizes()
        .map(|(key, records)| ChannelCoverage {
            channel: store.channel_display(key).unwrap_or(key).to_string(),
            records,
        })
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| b.records.cmp(&a.records).then_with(|| a.channel.cmp(&b.channel)));
    rows
}

pub fn render_coverage(store: &DescriptionStore) -> String {
    channel_coverage(store)
        .iter()
        .map(|row| format!("{}: {}\n", row.channel, row.records))
        .collect()
}

/// `EPG/desc.json` -> `EPG/desc_log.txt`.
pub fn log_path_for(snapshot: &Path) -> PathBuf {
    let stem = snapshot
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "desc".to_string());
    snapshot.with_file_name(format!("{stem}_log.txt"))
}

fn local_time(at: DateTime<Utc>) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(REPORT_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix());
    at.with_timezone(&offset)
}

pub fn render_run_log(summary: &RunSummary, store: &DescriptionStore) -> String {
    let rule = "-".repeat(30);
    let mut out = format!(
        "EPG description extraction log - {}\n{}\n\n",
        local_time(summary.finished_at).format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(50)
    );

    out.push_str(&format!("Statistics\n{rule}\n"));
    out.push_str(&format!("Run id: {}\n", summary.run_id));
    out.push_str(&format!("Target channels: {}\n", summary.target_channels));
    out.push_str(&format!("Sources processed: {}\n", summary.sources_processed()));
    out.push_str(&format!("Sources failed: {}\n", summary.sources_failed()));
    out.push_str(&format!("New descriptions: {}\n", summary.totals.inserted));
    out.push_str(&format!("Extended descriptions: {}\n", summary.totals.extended));
    out.push_str(&format!("Total descriptions: {}\n", summary.total_descriptions));
    out.push_str(&format!("Channels covered: {}\n\n", summary.channels_with_desc));

    out.push_str(&format!("Sources\n{rule}\n"));
    for source in &summary.sources {
        match &source.outcome {
            FeedOutcome::Absorbed(stats) => out.push_str(&format!(
                "{}: +{} new, {} extended, {} skipped, {} out of scope\n",
                source.name,
                stats.inserted,
                stats.extended,
                stats.skipped(),
                stats.out_of_scope
            )),
            FeedOutcome::FeedFailed { reason } => {
                out.push_str(&format!("{}: FAILED ({reason})\n", source.name))
            }
        }
    }
    out.push('\n');

    out.push_str(&format!("Descriptions per channel\n{rule}\n"));
    out.push_str(&render_coverage(store));
    out
}

pub async fn write_run_log(path: &Path, text: &str) -> Result<()> {
    fs::write(path, text)
        .await
        .with_context(|| format!("writing {}", path.display()))
}
