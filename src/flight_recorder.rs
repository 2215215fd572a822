//! Flight recorder (C14) — a per-id ring buffer of diagnostic entries,
//! merged by timestamp into a single dump on SIGUSR1 or before a
//! power-off.
//!
//! One independently-capped ring buffer per id, rather than a single
//! fixed-size buffer, so a noisy fan doesn't crowd out another fan's
//! history.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

const MAX_ENTRIES_PER_ID: usize = 40;

#[derive(Debug, Clone)]
struct Entry {
    timestamp: DateTime<Utc>,
    message: String,
}

/// Ring-buffered diagnostic log, one buffer per id (typically a rotor
/// or fan name), capped at 40 entries each.
#[derive(Debug, Default)]
pub struct FlightRecorder {
    buffers: BTreeMap<String, VecDeque<Entry>>,
}

impl FlightRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, id: impl Into<String>, message: impl Into<String>, timestamp: DateTime<Utc>) {
        let buffer = self.buffers.entry(id.into()).or_default();
        if buffer.len() == MAX_ENTRIES_PER_ID {
            buffer.pop_front();
        }
        buffer.push_back(Entry { timestamp, message: message.into() });
    }

    /// Merge every id's buffer into one chronological text dump,
    /// formatted `MMM DD HH:MM:SS.uuuuuu: <id>: <message>`.
    pub fn dump_text(&self) -> String {
        let mut all: Vec<(&str, &Entry)> = self
            .buffers
            .iter()
            .flat_map(|(id, entries)| entries.iter().map(move |e| (id.as_str(), e)))
            .collect();
        all.sort_by_key(|(_, e)| e.timestamp);

        all.into_iter()
            .map(|(id, e)| format!("{}: {}: {}", e.timestamp.format("%b %d %H:%M:%S%.6f"), id, e.message))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// JSON capture of every id's buffer, used as one of the debug-dump
    /// sections written on SIGUSR1.
    pub fn dump_json(&self) -> DumpJson {
        DumpJson {
            entries: self
                .buffers
                .iter()
                .map(|(id, entries)| {
                    (
                        id.clone(),
                        entries
                            .iter()
                            .map(|e| DumpEntry { timestamp: e.timestamp.to_rfc3339(), message: e.message.clone() })
                            .collect(),
                    )
                })
                .collect(),
        }
    }

    /// Capture first-failure data: the merged ring-buffer dump plus
    /// `reason`, written to a standalone temp file so a power-off path
    /// has something to attach to the event log before the box goes
    /// down. Returns the file's path; the file outlives this call
    /// (`keep()`), since nothing in this process reads it back.
    pub fn capture_ffdc(&self, reason: &str) -> std::io::Result<PathBuf> {
        let mut file = tempfile::Builder::new().prefix("fan-ffdc-").suffix(".log").tempfile()?;
        writeln!(file, "FFDC: {reason}")?;
        writeln!(file, "{}", self.dump_text())?;
        file.flush()?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        Ok(path)
    }
}

#[derive(Debug, Serialize)]
pub struct DumpEntry {
    pub timestamp: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DumpJson {
    pub entries: BTreeMap<String, Vec<DumpEntry>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ring_buffer_caps_per_id() {
        let mut fr = FlightRecorder::new();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for i in 0..50 {
            fr.log("fan0", format!("entry {i}"), base + chrono::Duration::seconds(i));
        }
        assert_eq!(fr.buffers.get("fan0").unwrap().len(), MAX_ENTRIES_PER_ID);
        assert_eq!(fr.buffers.get("fan0").unwrap().front().unwrap().message, "entry 10");
    }

    #[test]
    fn dump_merges_across_ids_in_timestamp_order() {
        let mut fr = FlightRecorder::new();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        fr.log("fan1", "second", base + chrono::Duration::seconds(5));
        fr.log("fan0", "first", base);
        let text = fr.dump_text();
        let first_line = text.lines().next().unwrap();
        assert!(first_line.contains("fan0"));
        assert!(first_line.contains("first"));
    }

    #[test]
    fn capture_ffdc_writes_reason_and_buffer_contents() {
        let mut fr = FlightRecorder::new();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        fr.log("fan0-r0", "out of range", base);
        let path = fr.capture_ffdc("power-off rule missing-fans fired").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("power-off rule missing-fans fired"));
        assert!(contents.contains("fan0-r0"));
        std::fs::remove_file(&path).ok();
    }
}
