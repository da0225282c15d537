//! WebSocket protocol binding (`spec.md` §4.5). Grounded on the teacher's
//! `WebSocketProtocol::run` (`protocol/ws.rs`): bind a `TcpListener`,
//! `accept_async` each connection, split it into a draining outbound task
//! and an inbound read loop. The encoding a session uses is negotiated once
//! at handshake time via the connection URI's `encoding` query parameter
//! (`?encoding=jsonObject|opcodeJsonArray|messagepack`), defaulting to
//! `jsonObject` for clients that don't ask.

use crate::codec::Encoding;
use crate::land::op::LeaveReason;
use crate::state::StateSchema;
use crate::transport::session::SessionManager;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

pub struct WebSocketProtocol {
    pub addr: &'static str,
}

impl WebSocketProtocol {
    pub async fn run<S>(self, session_manager: Arc<SessionManager<S>>)
    where
        S: StateSchema + Clone + Default + Send + Sync + 'static,
    {
        let listener = match TcpListener::bind(self.addr).await {
            Ok(listener) => listener,
            Err(err) => {
                log::error!("failed to bind {}: {err}", self.addr);
                return;
            }
        };
        log::info!("statetree websocket transport listening on {}", self.addr);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    log::warn!("failed to accept a connection: {err}");
                    continue;
                }
            };
            let session_manager = Arc::clone(&session_manager);
            tokio::spawn(async move {
                handle_connection(stream, session_manager).await;
                log::debug!("connection from {peer} closed");
            });
        }
    }
}

async fn handle_connection<S>(stream: tokio::net::TcpStream, session_manager: Arc<SessionManager<S>>)
where
    S: StateSchema + Clone + Default + Send + Sync + 'static,
{
    let mut negotiated = Encoding::JsonObject;
    let callback = |request: &Request, response: Response| {
        if let Some(encoding) = request
            .uri()
            .query()
            .and_then(|q| parse_query_param(q, "encoding"))
            .and_then(Encoding::from_wire_name)
        {
            negotiated = encoding;
        }
        Ok(response)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(stream) => stream,
        Err(err) => {
            log::debug!("websocket handshake failed: {err}");
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let session = session_manager.connect(negotiated);
    let session_id = session.session_id;
    let mut outbound_rx = session.outbound_rx;

    let drain_task = tokio::spawn(async move {
        while let Some(bytes) = outbound_rx.recv().await {
            let message = match negotiated.schema_type() {
                crate::codec::SchemaType::Text => match String::from_utf8(bytes) {
                    Ok(text) => Message::Text(text.into()),
                    Err(_) => continue,
                },
                crate::codec::SchemaType::Binary => Message::Binary(bytes.into()),
            };
            if write.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = read.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(_) => break,
        };
        let bytes: Vec<u8> = match message {
            Message::Binary(bytes) => bytes.into(),
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        match crate::codec::decode_envelope(negotiated, &bytes) {
            Ok(envelope) => session_manager.dispatch_inbound(session_id, envelope),
            Err(err) => {
                log::debug!("session {session_id} sent an unparseable frame: {err}");
            }
        }
    }

    session_manager.disconnect(session_id, LeaveReason::Disconnected);
    drain_task.abort();
}

fn parse_query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let name = parts.next()?;
        let value = parts.next()?;
        (name == key).then_some(value)
    })
}
