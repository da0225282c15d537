//! Minimal host process wiring `HostConfig`, a `StateTreeServer`, the
//! WebSocket transport, and a periodic idle-Land reap sweep together.
//! Registers one small example `landType` ("lobby") since no application
//! land definition ships in this crate.

use statetree::config::HostConfig;
use statetree::land::op::Effects;
use statetree::land::LandDefinitionBuilder;
use statetree::state::{
    FieldDescriptor, FieldKind, FromSnapshotValue, StateSchema, Synced, SyncPolicy,
    ToSnapshotValue,
};
use statetree::replay::recorder::FileRecorder;
use statetree::StateTreeServer;
use std::time::Duration;

#[derive(Clone, Default)]
struct LobbyState {
    occupants: Synced<i64>,
}

impl StateSchema for LobbyState {
    fn field_descriptors() -> Vec<FieldDescriptor<Self>> {
        vec![FieldDescriptor {
            name: "occupants",
            policy: SyncPolicy::Broadcast,
            kind: FieldKind::Leaf,
            read: Box::new(|s: &LobbyState, _| Some(s.occupants.get().to_snapshot_value())),
            write: Box::new(|s: &mut LobbyState, v| {
                if let Some(parsed) = i64::from_snapshot_value(&v) {
                    s.occupants.set(parsed);
                }
            }),
            is_dirty: Box::new(|s: &LobbyState| s.occupants.is_dirty()),
            clear_dirty: Box::new(|s: &mut LobbyState| s.occupants.clear_dirty()),
        }]
    }
}

fn lobby_definition() -> statetree::land::LandDefinition<LobbyState> {
    LandDefinitionBuilder::<LobbyState>::new("lobby")
        .on_join(Box::new(|s: &mut LobbyState, _ctx| {
            s.occupants.set(s.occupants.get() + 1);
        }))
        .on_leave(Box::new(|s: &mut LobbyState, _ctx| {
            s.occupants.set(s.occupants.get() - 1);
        }))
        .action(
            "ping",
            Box::new(|_s, _payload, _ctx| {
                Ok((serde_json::json!({ "pong": true }), Effects::default()))
            }),
        )
        .build()
        .expect("lobby land definition is well-formed")
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let config = HostConfig::from_env();

    let records_dir = config.reevaluation_records_dir.clone();
    let server = StateTreeServer::<LobbyState>::new()
        .land(lobby_definition())
        .recorder_factory(move |land_id| {
            let dir = records_dir.as_ref()?;
            let path = std::path::Path::new(dir).join(format!("{}.jsonl", land_id.canonical()));
            match FileRecorder::create(&path, land_id, land_id.land_type.as_str(), "lobby") {
                Ok(recorder) => {
                    Some(Box::new(recorder) as Box<dyn statetree::land::keeper::OpRecorder>)
                }
                Err(err) => {
                    log::warn!("failed to open reevaluation log at {}: {err}", path.display());
                    None
                }
            }
        });

    let realm = server.realm();
    let session_manager = server.session_manager();

    let reap_realm = realm;
    let reap_sessions = std::sync::Arc::clone(&session_manager);
    let idle_after = config.idle_land_timeout;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);
            let reaped = reap_realm.reap_idle(idle_after.as_millis() as u64, now, |land_id| {
                reap_sessions.session_count_for_land(land_id)
            });
            if !reaped.is_empty() {
                log::info!("reaped {} idle land(s)", reaped.len());
            }
        }
    });

    let bind_addr: &'static str = Box::leak(config.bind_addr.into_boxed_str());
    statetree::transport::WebSocketProtocol { addr: bind_addr }
        .run(session_manager)
        .await;
}
