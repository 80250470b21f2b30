use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use streamrelay_server::RelayStats;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct StatsOutput<'a> {
    endpoint: String,
    #[serde(flatten)]
    stats: &'a RelayStats,
    dropped_bytes: u64,
}

pub fn print_stats(endpoint: &std::path::Path, stats: &RelayStats, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = StatsOutput {
                endpoint: endpoint.display().to_string(),
                stats,
                dropped_bytes: stats.dropped_bytes(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METRIC", "CHUNKS", "BYTES"]);
            for (metric, chunks, bytes) in stat_rows(stats) {
                table.add_row(vec![metric.to_string(), chunks, bytes]);
            }
            println!("{table}");
            println!(
                "endpoint={} state={} connections={}",
                endpoint.display(),
                state_name(stats),
                stats.connections
            );
        }
        OutputFormat::Pretty => {
            println!(
                "endpoint={} state={} connections={}",
                endpoint.display(),
                state_name(stats),
                stats.connections
            );
            for (metric, chunks, bytes) in stat_rows(stats) {
                println!("{metric}: chunks={chunks} bytes={bytes}");
            }
        }
    }
}

fn stat_rows(stats: &RelayStats) -> Vec<(&'static str, String, String)> {
    let queue = &stats.queue;
    vec![
        (
            "accepted",
            queue.accepted_chunks.to_string(),
            queue.accepted_bytes.to_string(),
        ),
        (
            "delivered",
            stats.delivered_chunks.to_string(),
            stats.delivered_bytes.to_string(),
        ),
        (
            "buffered",
            queue.buffered_chunks.to_string(),
            format!("{} / {}", queue.buffered_bytes, queue.capacity),
        ),
        (
            "evicted",
            queue.evicted_chunks.to_string(),
            queue.evicted_bytes.to_string(),
        ),
        (
            "rejected",
            queue.rejected_chunks.to_string(),
            queue.rejected_bytes.to_string(),
        ),
        (
            "lost in flight",
            stats.lost_in_flight_chunks.to_string(),
            stats.lost_in_flight_bytes.to_string(),
        ),
    ]
}

fn state_name(stats: &RelayStats) -> String {
    serde_json::to_value(stats.state)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", stats.state).to_lowercase())
}
