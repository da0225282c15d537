//! The live-path half of §4.7: a [`crate::land::keeper::OpRecorder`] that
//! appends one JSON-lines record per committed op. File format is
//! deliberately simple — header line, then one record per line — since
//! the runner only needs to read what this writes.

use crate::ids::LandId;
use crate::land::keeper::{OpRecorder, RecordedOpKind};
use crate::land::op::ServerEventEnvelope;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Bumped whenever the on-disk record shape changes incompatibly. The
/// runner's `RECORD_VERSION_MISMATCH` check compares against this.
pub const RECORD_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordHeader {
    pub land_type: String,
    pub land_definition_id: String,
    pub record_format_version: u32,
    pub land_id: String,
    pub created_at_millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEmittedEvent {
    pub type_identifier: String,
    pub payload_bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordedKind {
    Action,
    Event,
    Tick,
}

impl From<RecordedOpKind> for RecordedKind {
    fn from(kind: RecordedOpKind) -> Self {
        match kind {
            RecordedOpKind::Action => RecordedKind::Action,
            RecordedOpKind::Event => RecordedKind::Event,
            RecordedOpKind::Tick => RecordedKind::Tick,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedTick {
    pub tick_id: u64,
    pub kind: RecordedKind,
    pub payload_bytes: Vec<u8>,
    pub state_hash: String,
    pub emitted_server_events: Vec<RecordedEmittedEvent>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Appends JSON-lines records to a file: a header line first, then one
/// [`RecordedTick`] per committed op.
pub struct FileRecorder {
    writer: BufWriter<File>,
}

impl FileRecorder {
    pub fn create(
        path: impl AsRef<Path>,
        land_id: &LandId,
        land_type: &str,
        land_definition_id: &str,
    ) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        let header = RecordHeader {
            land_type: land_type.to_string(),
            land_definition_id: land_definition_id.to_string(),
            record_format_version: RECORD_FORMAT_VERSION,
            land_id: land_id.canonical(),
            created_at_millis: now_millis(),
        };
        serde_json::to_writer(&mut writer, &header)?;
        writer.write_all(b"\n")?;
        Ok(Self { writer })
    }
}

impl OpRecorder for FileRecorder {
    fn append(
        &mut self,
        tick_id: u64,
        kind: RecordedOpKind,
        payload: &serde_json::Value,
        state_hash: &str,
        emitted: &[ServerEventEnvelope],
    ) {
        let record = RecordedTick {
            tick_id,
            kind: kind.into(),
            payload_bytes: serde_json::to_vec(payload).unwrap_or_default(),
            state_hash: state_hash.to_string(),
            emitted_server_events: emitted
                .iter()
                .map(|event| RecordedEmittedEvent {
                    type_identifier: event.type_identifier.clone(),
                    payload_bytes: serde_json::to_vec(&event.payload).unwrap_or_default(),
                })
                .collect(),
        };
        match serde_json::to_writer(&mut self.writer, &record) {
            Ok(()) => {
                if self.writer.write_all(b"\n").is_ok() {
                    let _ = self.writer.flush();
                }
            }
            Err(err) => {
                log::warn!("failed to append reevaluation record for tick {tick_id}: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    #[test]
    fn header_then_records_round_trip_as_json_lines() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("statetree-recorder-test-{}.jsonl", std::process::id()));
        let land_id = LandId::single_room("lobby");

        {
            let mut recorder = FileRecorder::create(&path, &land_id, "lobby", "def-1").unwrap();
            recorder.append(
                1,
                RecordedOpKind::Tick,
                &serde_json::Value::Null,
                "abc123",
                &[],
            );
        }

        let file = File::open(&path).unwrap();
        let mut lines = BufReader::new(file).lines();
        let header: RecordHeader = serde_json::from_str(&lines.next().unwrap().unwrap()).unwrap();
        assert_eq!(header.land_type, "lobby");
        assert_eq!(header.record_format_version, RECORD_FORMAT_VERSION);

        let record: RecordedTick = serde_json::from_str(&lines.next().unwrap().unwrap()).unwrap();
        assert_eq!(record.tick_id, 1);
        assert_eq!(record.state_hash, "abc123");

        let _ = std::fs::remove_file(&path);
    }
}
