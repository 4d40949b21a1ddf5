// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Per-connection WebSocket plumbing: a read task under a rolling deadline,
//! a single writer task draining a bounded outbound queue, and the
//! player-id to session lookup used for routing.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use connect_common::{ClientMessage, GameId, Player, PlayerId, ServerMessage};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    sync::mpsc,
    time::{MissedTickBehavior, interval, timeout},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::coordinator;

/// Outbound frames buffered per client; overflow drops the frame so a slow
/// client never stalls its opponent.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
pub const READ_DEADLINE: Duration = Duration::from_secs(60);
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(54);

/// One live connection plus its player/game binding. The session outlives
/// neither the connection nor the game; the registry holds its own state.
pub struct ClientSession {
    pub session_id: String,
    outbound: mpsc::Sender<String>,
    binding: Mutex<SessionBinding>,
}

#[derive(Default)]
struct SessionBinding {
    player: Option<Player>,
    game_id: Option<GameId>,
}

impl ClientSession {
    pub(crate) fn new(outbound: mpsc::Sender<String>) -> Arc<Self> {
        Arc::new(Self {
            session_id: Uuid::new_v4().to_string(),
            outbound,
            binding: Mutex::new(SessionBinding::default()),
        })
    }

    pub fn player(&self) -> Option<Player> {
        self.binding.lock().unwrap().player.clone()
    }

    pub fn game_id(&self) -> Option<GameId> {
        self.binding.lock().unwrap().game_id.clone()
    }

    pub fn bind_player(&self, player: Player) {
        self.binding.lock().unwrap().player = Some(player);
    }

    pub fn bind_game(&self, game_id: GameId) {
        self.binding.lock().unwrap().game_id = Some(game_id);
    }

    /// Enqueues a frame for the writer task. Never blocks: a full queue
    /// drops the frame with a warning.
    pub fn send(&self, message: &ServerMessage) {
        let frame = match serde_json::to_string(message) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(session_id = %self.session_id, error = %error, "failed to encode server message");
                return;
            }
        };
        match self.outbound.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session_id = %self.session_id, "outbound queue full; dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session_id = %self.session_id, "session closed; dropping frame");
            }
        }
    }
}

/// player-id → live session lookup, used to route frames to opponents.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    inner: Arc<Mutex<HashMap<PlayerId, Arc<ClientSession>>>>,
}

impl ClientRegistry {
    pub fn bind(&self, player_id: PlayerId, session: Arc<ClientSession>) {
        self.inner.lock().unwrap().insert(player_id, session);
    }

    pub fn get(&self, player_id: &str) -> Option<Arc<ClientSession>> {
        self.inner.lock().unwrap().get(player_id).cloned()
    }

    /// Drops the lookup entry only while it still points at this session;
    /// after a reconnect the fresh session stays bound when the stale
    /// connection finally tears down.
    pub fn unbind_session(&self, player_id: &str, session_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.get(player_id)
            && existing.session_id == session_id
        {
            inner.remove(player_id);
        }
    }
}

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (ws_tx, ws_rx) = socket.split();
    let (out_tx, out_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let session = ClientSession::new(out_tx);
    info!(session_id = %session.session_id, "client connected");

    let mut writer = tokio::spawn(run_write_loop(ws_tx, out_rx));
    let mut reader = tokio::spawn(run_read_loop(ws_rx, state.clone(), session.clone()));

    // Either task failing tears the whole connection down.
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    coordinator::handle_disconnect(&state, &session).await;
    info!(session_id = %session.session_id, "client disconnected");
}

async fn run_read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    state: AppState,
    session: Arc<ClientSession>,
) {
    loop {
        let frame = match timeout(READ_DEADLINE, ws_rx.next()).await {
            Err(_) => {
                warn!(session_id = %session.session_id, "read deadline expired");
                return;
            }
            Ok(None) => return,
            Ok(Some(Err(error))) => {
                debug!(session_id = %session.session_id, error = %error, "websocket read failed");
                return;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => dispatch_frame(&state, &session, text.as_str()).await,
            Message::Close(_) => return,
            // Pongs (and any stray ping/binary) only reset the read deadline.
            _ => {}
        }
    }
}

async fn dispatch_frame(state: &AppState, session: &Arc<ClientSession>, raw: &str) {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(error) => {
            warn!(session_id = %session.session_id, error = %error, "malformed frame; ignoring");
            return;
        }
    };
    let message: ClientMessage = match serde_json::from_value(value) {
        Ok(message) => message,
        Err(error) => {
            session.send(&ServerMessage::error(format!("Invalid message: {error}")));
            return;
        }
    };

    match message {
        ClientMessage::JoinQueue(payload) => {
            coordinator::handle_join_queue(state, session, payload).await;
        }
        ClientMessage::Move(payload) => {
            coordinator::handle_move(state, session, payload).await;
        }
        ClientMessage::Reconnect(payload) => {
            coordinator::handle_reconnect(state, session, payload).await;
        }
    }
}

async fn run_write_loop(mut ws_tx: SplitSink<WebSocket, Message>, mut out_rx: mpsc::Receiver<String>) {
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // An interval's first tick completes immediately; consume it so pings
    // start one period after connect.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            frame = out_rx.recv() => {
                let Some(frame) = frame else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return;
                };
                if !send_with_deadline(&mut ws_tx, Message::Text(frame.into())).await {
                    return;
                }
            }
            _ = heartbeat.tick() => {
                if !send_with_deadline(&mut ws_tx, Message::Ping(Vec::new().into())).await {
                    return;
                }
            }
        }
    }
}

async fn send_with_deadline(ws_tx: &mut SplitSink<WebSocket, Message>, message: Message) -> bool {
    match timeout(WRITE_DEADLINE, ws_tx.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(error)) => {
            debug!(error = %error, "websocket send failed");
            false
        }
        Err(_) => {
            warn!("websocket write deadline expired");
            false
        }
    }
}
