use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use coremux_frame::{endpoint_label, EndpointId};
use coremux_mux::StatsSnapshot;
use serde::Serialize;

const FRAME_SCHEMA_ID: &str =
    "https://schemas.3leaps.dev/coremux/cli/v1/frame-received.schema.json";
const SELFTEST_SCHEMA_ID: &str = "https://schemas.3leaps.dev/coremux/cli/v1/selftest.schema.json";

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
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

/// One frame received on a named endpoint.
pub struct ReceivedFrame {
    pub endpoint: String,
    pub id: EndpointId,
    pub payload: Vec<u8>,
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    schema_id: &'a str,
    endpoint: &'a str,
    endpoint_id: EndpointId,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_frame(frame: &ReceivedFrame, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                schema_id: FRAME_SCHEMA_ID,
                endpoint: &frame.endpoint,
                endpoint_id: frame.id,
                payload_size: frame.payload.len(),
                payload: payload_preview(&frame.payload),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = new_table();
            table
                .set_header(vec!["ENDPOINT", "ID", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    frame.endpoint.clone(),
                    endpoint_label(frame.id),
                    frame.payload.len().to_string(),
                    payload_preview(&frame.payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "endpoint={} ({}) size={} payload={}",
                frame.endpoint,
                endpoint_label(frame.id),
                frame.payload.len(),
                payload_preview(&frame.payload)
            );
        }
        OutputFormat::Raw => print_raw(&frame.payload),
    }
}

/// Traffic of one endpoint during a self-test.
#[derive(Debug, Serialize)]
pub struct EndpointReport {
    pub name: String,
    pub id: EndpointId,
    pub sent: u64,
    pub initiator_received: u64,
    pub follower_received: u64,
}

#[derive(Debug, Serialize)]
pub struct SideStats {
    pub frames_sent: u64,
    pub frames_delivered: u64,
    pub control_frames: u64,
    pub dropped: u64,
}

impl From<StatsSnapshot> for SideStats {
    fn from(stats: StatsSnapshot) -> Self {
        Self {
            frames_sent: stats.frames_sent,
            frames_delivered: stats.frames_delivered,
            control_frames: stats.control_frames,
            dropped: stats.dropped_total(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SelftestReport {
    pub passed: bool,
    pub messages_per_endpoint: u64,
    pub endpoints: Vec<EndpointReport>,
    pub initiator: SideStats,
    pub follower: SideStats,
}

pub fn print_selftest(report: &SelftestReport, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => {
            #[derive(Serialize)]
            struct Envelope<'a> {
                schema_id: &'a str,
                #[serde(flatten)]
                report: &'a SelftestReport,
            }
            print_json(&Envelope {
                schema_id: SELFTEST_SCHEMA_ID,
                report,
            });
        }
        OutputFormat::Table => {
            let mut table = new_table();
            table.set_header(vec!["ENDPOINT", "ID", "SENT", "INITIATOR RX", "FOLLOWER RX"]);
            for endpoint in &report.endpoints {
                table.add_row(vec![
                    endpoint.name.clone(),
                    endpoint.id.to_string(),
                    endpoint.sent.to_string(),
                    endpoint.initiator_received.to_string(),
                    endpoint.follower_received.to_string(),
                ]);
            }
            println!("{table}");

            let mut stats = new_table();
            stats
                .set_header(vec!["SIDE", "SENT", "DELIVERED", "CONTROL", "DROPPED"])
                .add_row(stats_row("initiator", &report.initiator))
                .add_row(stats_row("follower", &report.follower));
            println!("{stats}");
            println!("result: {}", verdict(report.passed));
        }
        OutputFormat::Pretty => {
            for endpoint in &report.endpoints {
                println!(
                    "{} (ep{}): sent={} initiator_rx={} follower_rx={}",
                    endpoint.name,
                    endpoint.id,
                    endpoint.sent,
                    endpoint.initiator_received,
                    endpoint.follower_received
                );
            }
            println!(
                "dropped: initiator={} follower={}",
                report.initiator.dropped, report.follower.dropped
            );
            println!("result: {}", verdict(report.passed));
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json(value: &impl Serialize) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn stats_row(side: &str, stats: &SideStats) -> Vec<String> {
    vec![
        side.to_string(),
        stats.frames_sent.to_string(),
        stats.frames_delivered.to_string(),
        stats.control_frames.to_string(),
        stats.dropped.to_string(),
    ]
}

fn verdict(passed: bool) -> &'static str {
    if passed {
        "pass"
    } else {
        "FAIL"
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_marks_binary_payloads() {
        assert_eq!(payload_preview(b"hello"), "hello");
        assert_eq!(payload_preview(&[0xff, 0xfe]), "<binary 2 bytes>");
    }

    #[test]
    fn side_stats_sum_drops() {
        let stats = StatsSnapshot {
            frames_sent: 4,
            dropped_empty: 1,
            dropped_unoccupied: 2,
            ..StatsSnapshot::default()
        };
        let side = SideStats::from(stats);
        assert_eq!(side.frames_sent, 4);
        assert_eq!(side.dropped, 3);
    }
}
