//! The offline half of §4.7: reads a recorded op log, replays it against a
//! fresh [`ReevaluationStepper`], and reports whether the computed state
//! hash matches what was recorded at each step.

use crate::ids::LandId;
use crate::land::keeper::ReevaluationStepper;
use crate::land::LandDefinition;
use crate::replay::recorder::{RecordHeader, RecordedKind, RecordedTick};
use crate::state::StateSchema;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerPhase {
    Idle,
    Loading,
    Verifying,
    Paused,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerStatus {
    pub phase: RunnerPhase,
    pub current_tick: u64,
    pub total_ticks: u64,
    pub correct_ticks: u64,
    pub mismatched_ticks: u64,
    pub last_computed_hash: Option<String>,
    pub last_recorded_hash: Option<String>,
    pub error_message: Option<String>,
}

impl Default for RunnerStatus {
    fn default() -> Self {
        Self {
            phase: RunnerPhase::Idle,
            current_tick: 0,
            total_ticks: 0,
            correct_ticks: 0,
            mismatched_ticks: 0,
            last_computed_hash: None,
            last_recorded_hash: None,
            error_message: None,
        }
    }
}

/// Fail-fast compatibility checks run before a single op is replayed
/// (`spec.md` §4.7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    LandTypeMismatch,
    SchemaMismatch,
    RecordVersionMismatch,
    Io(String),
    Malformed(String),
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerError::LandTypeMismatch => write!(f, "LAND_TYPE_MISMATCH"),
            RunnerError::SchemaMismatch => write!(f, "SCHEMA_MISMATCH"),
            RunnerError::RecordVersionMismatch => write!(f, "RECORD_VERSION_MISMATCH"),
            RunnerError::Io(err) => write!(f, "io error reading reevaluation log: {err}"),
            RunnerError::Malformed(err) => write!(f, "malformed reevaluation log: {err}"),
        }
    }
}

impl std::error::Error for RunnerError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunnerControl {
    Run,
    Pause,
    Stop,
}

/// A running (or finished) reevaluation pass. `status()` is cheap and safe
/// to poll from an admin surface; `pause`/`resume`/`stop` drive the
/// step loop from outside (`spec.md` §4.7: "driven by admin ops against
/// the runner service").
pub struct ReevaluationRunner {
    status: Arc<Mutex<RunnerStatus>>,
    control: Arc<Mutex<RunnerControl>>,
}

impl ReevaluationRunner {
    pub fn status(&self) -> RunnerStatus {
        self.status.lock().unwrap().clone()
    }

    pub fn pause(&self) {
        *self.control.lock().unwrap() = RunnerControl::Pause;
    }

    pub fn resume(&self) {
        *self.control.lock().unwrap() = RunnerControl::Run;
    }

    pub fn stop(&self) {
        *self.control.lock().unwrap() = RunnerControl::Stop;
    }

    /// Load the record file, run the fail-fast compatibility checks, and —
    /// if they pass — spawn the step loop on its own thread.
    pub fn start<S>(
        path: impl AsRef<Path>,
        expected_land_type: &'static str,
        definition: Arc<LandDefinition<S>>,
        required_record_format_version: Option<u32>,
    ) -> Result<Arc<Self>, RunnerError>
    where
        S: StateSchema + Clone + Default + Send + 'static,
    {
        let status = Arc::new(Mutex::new(RunnerStatus {
            phase: RunnerPhase::Loading,
            ..Default::default()
        }));
        let control = Arc::new(Mutex::new(RunnerControl::Run));
        let runner = Arc::new(Self {
            status: Arc::clone(&status),
            control: Arc::clone(&control),
        });

        let (header, records) = load_records(path.as_ref())?;

        if header.land_type != expected_land_type {
            fail(&status, RunnerError::LandTypeMismatch.to_string());
            return Err(RunnerError::LandTypeMismatch);
        }
        if header.land_definition_id != definition.definition_id() {
            fail(&status, RunnerError::SchemaMismatch.to_string());
            return Err(RunnerError::SchemaMismatch);
        }
        if let Some(required) = required_record_format_version {
            if header.record_format_version != required {
                fail(&status, RunnerError::RecordVersionMismatch.to_string());
                return Err(RunnerError::RecordVersionMismatch);
            }
        }

        let land_id = land_id_from_header(&header);
        {
            let mut s = status.lock().unwrap();
            s.total_ticks = records.len() as u64;
            s.phase = RunnerPhase::Verifying;
        }

        let thread_status = Arc::clone(&status);
        let thread_control = Arc::clone(&control);
        thread::spawn(move || run_loop(land_id, definition, records, thread_status, thread_control));

        Ok(runner)
    }
}

fn fail(status: &Arc<Mutex<RunnerStatus>>, message: String) {
    let mut s = status.lock().unwrap();
    s.phase = RunnerPhase::Failed;
    s.error_message = Some(message);
}

fn land_id_from_header(header: &RecordHeader) -> LandId {
    match header.land_id.strip_prefix(&format!("{}:", header.land_type)) {
        Some(instance_id) => LandId::new(header.land_type.clone(), instance_id.to_string()),
        None => LandId::single_room(header.land_type.clone()),
    }
}

fn load_records(path: &Path) -> Result<(RecordHeader, Vec<RecordedTick>), RunnerError> {
    let file = File::open(path).map_err(|err| RunnerError::Io(err.to_string()))?;
    let mut lines = BufReader::new(file).lines();

    let header_line = lines
        .next()
        .ok_or_else(|| RunnerError::Malformed("empty record file".to_string()))?
        .map_err(|err| RunnerError::Io(err.to_string()))?;
    let header: RecordHeader = serde_json::from_str(&header_line)
        .map_err(|err| RunnerError::Malformed(format!("bad header: {err}")))?;

    let mut records = Vec::new();
    for line in lines {
        let line = line.map_err(|err| RunnerError::Io(err.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: RecordedTick = serde_json::from_str(&line)
            .map_err(|err| RunnerError::Malformed(format!("bad record: {err}")))?;
        records.push(record);
    }

    Ok((header, records))
}

fn run_loop<S>(
    land_id: LandId,
    definition: Arc<LandDefinition<S>>,
    records: Vec<RecordedTick>,
    status: Arc<Mutex<RunnerStatus>>,
    control: Arc<Mutex<RunnerControl>>,
) where
    S: StateSchema + Clone + Default,
{
    let mut stepper = ReevaluationStepper::new(land_id, definition, S::default());
    let mut correct = 0u64;
    let mut mismatched = 0u64;

    for record in records {
        loop {
            let current = *control.lock().unwrap();
            match current {
                RunnerControl::Stop => {
                    status.lock().unwrap().phase = RunnerPhase::Completed;
                    return;
                }
                RunnerControl::Pause => {
                    status.lock().unwrap().phase = RunnerPhase::Paused;
                    thread::sleep(Duration::from_millis(50));
                    continue;
                }
                RunnerControl::Run => break,
            }
        }
        status.lock().unwrap().phase = RunnerPhase::Verifying;

        replay_one(&mut stepper, &record);

        let computed = stepper.state_hash();
        let is_match = computed == record.state_hash;
        if is_match {
            correct += 1;
        } else {
            mismatched += 1;
            log::warn!(
                "reevaluation mismatch at tick {}: computed {computed} != recorded {}",
                record.tick_id,
                record.state_hash
            );
        }

        let mut s = status.lock().unwrap();
        s.current_tick = record.tick_id;
        s.correct_ticks = correct;
        s.mismatched_ticks = mismatched;
        s.last_computed_hash = Some(computed);
        s.last_recorded_hash = Some(record.state_hash.clone());
    }

    status.lock().unwrap().phase = RunnerPhase::Completed;
}

/// Dispatch one recorded entry to the stepper. Join/leave bookkeeping
/// markers (`{"join":true}`/`{"leave":true}`, written by the keeper's
/// admit/leave paths) carry no handler to invoke — they exist purely as
/// hash checkpoints in the log and are skipped here rather than replayed.
fn replay_one<S: StateSchema + Clone>(stepper: &mut ReevaluationStepper<S>, record: &RecordedTick) {
    match record.kind {
        RecordedKind::Tick => stepper.replay_tick(),
        RecordedKind::Action => {
            if let Ok(action_record) = serde_json::from_slice::<Value>(&record.payload_bytes) {
                let type_identifier = action_record
                    .get("typeIdentifier")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let payload = action_record.get("payload").cloned().unwrap_or(Value::Null);
                stepper.replay_action(&type_identifier, payload);
            }
        }
        RecordedKind::Event => {
            if let Ok(event_record) = serde_json::from_slice::<Value>(&record.payload_bytes) {
                if let Some(type_identifier) =
                    event_record.get("typeIdentifier").and_then(Value::as_str)
                {
                    let payload = event_record.get("payload").cloned().unwrap_or(Value::Null);
                    stepper.replay_event(type_identifier, payload);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::land::LandDefinitionBuilder;
    use crate::replay::recorder::FileRecorder;
    use crate::state::{
        FieldDescriptor, FieldKind, FromSnapshotValue, StateSchema, Synced, SyncPolicy,
        ToSnapshotValue,
    };
    use std::time::Duration as StdDuration;

    #[derive(Clone, Default)]
    struct Counter {
        value: Synced<i64>,
    }

    impl StateSchema for Counter {
        fn field_descriptors() -> Vec<FieldDescriptor<Self>> {
            vec![FieldDescriptor {
                name: "value",
                policy: SyncPolicy::Broadcast,
                kind: FieldKind::Leaf,
                read: Box::new(|s: &Counter, _| Some(s.value.get().to_snapshot_value())),
                write: Box::new(|s: &mut Counter, v| {
                    if let Some(parsed) = i64::from_snapshot_value(&v) {
                        s.value.set(parsed);
                    }
                }),
                is_dirty: Box::new(|s: &Counter| s.value.is_dirty()),
                clear_dirty: Box::new(|s: &mut Counter| s.value.clear_dirty()),
            }]
        }
    }

    fn build_definition() -> Arc<LandDefinition<Counter>> {
        Arc::new(
            LandDefinitionBuilder::<Counter>::new("counter")
                .action(
                    "increment",
                    Box::new(|s: &mut Counter, _payload, _ctx| {
                        s.value.set(s.value.get() + 1);
                        Ok((serde_json::Value::Null, crate::land::op::Effects::default()))
                    }),
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn land_type_mismatch_fails_fast() {
        let definition = build_definition();
        let dir = std::env::temp_dir();
        let path = dir.join(format!("statetree-runner-test-{}.jsonl", std::process::id()));
        let land_id = LandId::single_room("counter");
        FileRecorder::create(&path, &land_id, "counter", &definition.definition_id()).unwrap();

        let err = ReevaluationRunner::start(&path, "not-counter", definition, None).unwrap_err();
        assert_eq!(err, RunnerError::LandTypeMismatch);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn schema_mismatch_fails_fast() {
        let definition = build_definition();
        let dir = std::env::temp_dir();
        let path = dir.join(format!("statetree-runner-test-schema-{}.jsonl", std::process::id()));
        let land_id = LandId::single_room("counter");
        FileRecorder::create(&path, &land_id, "counter", "stale-definition-id").unwrap();

        let err = ReevaluationRunner::start(&path, "counter", definition, None).unwrap_err();
        assert_eq!(err, RunnerError::SchemaMismatch);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn matching_log_replays_to_completion() {
        let definition = build_definition();
        let dir = std::env::temp_dir();
        let path = dir.join(format!("statetree-runner-test-match-{}.jsonl", std::process::id()));
        let land_id = LandId::single_room("counter");

        {
            let mut recorder =
                FileRecorder::create(&path, &land_id, "counter", &definition.definition_id()).unwrap();
            let mut stepper =
                crate::land::keeper::ReevaluationStepper::new(land_id.clone(), definition.clone(), Counter::default());
            stepper.replay_action(
                "increment",
                serde_json::json!(null),
            );
            let hash = stepper.state_hash();
            recorder.append(
                1,
                crate::land::keeper::RecordedOpKind::Action,
                &serde_json::json!({"typeIdentifier": "increment", "payload": null}),
                &hash,
                &[],
            );
        }

        let runner = ReevaluationRunner::start(&path, "counter", definition, None).unwrap();
        let mut waited = StdDuration::ZERO;
        while runner.status().phase == RunnerPhase::Verifying && waited < StdDuration::from_secs(2) {
            thread::sleep(StdDuration::from_millis(10));
            waited += StdDuration::from_millis(10);
        }
        let status = runner.status();
        assert_eq!(status.phase, RunnerPhase::Completed);
        assert_eq!(status.correct_ticks, 1);
        assert_eq!(status.mismatched_ticks, 0);

        let _ = std::fs::remove_file(&path);
    }
}
