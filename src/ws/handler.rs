//! WebSocket upgrade handler

use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::runtime::Handle;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::config::Config;
use crate::game::{Admission, CloseReason, ConnId, LobbyHandle};
use crate::http::AppError;
use crate::util::rate_limit::InputRateLimiter;
use crate::ws::protocol::{decode_action, ClientType};

/// Longest display name kept; longer names are cut
pub const MAX_USERNAME_CHARS: usize = 32;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct LobbyQuery {
    #[serde(rename = "clientType")]
    pub client_type: Option<String>,
    pub username: Option<String>,
}

/// Per-session timing and limits
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub keepalive: Duration,
    pub input_rate_limit: u32,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            idle_timeout: config.idle_timeout,
            // A few pings per idle window keep quiet-but-healthy clients open.
            keepalive: (config.idle_timeout / 3).max(Duration::from_secs(1)),
            input_rate_limit: config.input_rate_limit,
        }
    }
}

/// WebSocket upgrade handler for `/lobby/:lobby_id`.
///
/// Admission happens before the upgrade so refusals are plain HTTP
/// responses: unknown lobby 404, bad `clientType` or missing player name
/// 400, full or already running lobby 409, closed lobby 410.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(lobby_id): Path<String>,
    Query(query): Query<LobbyQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let lobby = Uuid::parse_str(&lobby_id)
        .ok()
        .and_then(|id| state.lobbies.get(&id))
        .ok_or_else(|| AppError::NotFound("lobby not found".to_string()))?;

    let role = query
        .client_type
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("clientType is required".to_string()))?
        .parse::<ClientType>()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let name = clean_username(query.username.as_deref());
    if role == ClientType::Player && name.is_empty() {
        return Err(AppError::BadRequest("username is required".to_string()));
    }

    let admission = lobby.admit(role, name).await?;
    let conn_id = admission.conn_id;
    info!(
        lobby_id = %lobby.id(),
        conn_id,
        ?role,
        player_id = admission.player_id.as_deref().unwrap_or("-"),
        "WebSocket upgrade for admitted client"
    );

    let settings = SessionSettings::from_config(&state.config);
    let released = lobby.clone();
    Ok(ws
        .on_failed_upgrade(move |e| {
            warn!(conn_id, error = %e, "WebSocket upgrade failed");
            tokio::spawn(async move { released.disconnect(conn_id).await });
        })
        .on_upgrade(move |socket| run_session(socket, lobby, admission, settings)))
}

/// Trim and cap a display name
fn clean_username(raw: Option<&str>) -> String {
    raw.unwrap_or_default()
        .trim()
        .chars()
        .take(MAX_USERNAME_CHARS)
        .collect()
}

fn close_frame(code: u16, reason: &'static str) -> CloseFrame<'static> {
    CloseFrame {
        code,
        reason: reason.into(),
    }
}

fn close_for(reason: CloseReason) -> CloseFrame<'static> {
    let code = match reason {
        CloseReason::TooSlow => close_code::POLICY,
        CloseReason::InternalError => close_code::ERROR,
        CloseReason::ServerShutdown => close_code::NORMAL,
    };
    close_frame(code, reason.as_str())
}

/// Reports the connection gone when dropped, including when the session unwinds
struct DisconnectOnDrop {
    lobby: LobbyHandle,
    conn_id: ConnId,
}

impl Drop for DisconnectOnDrop {
    fn drop(&mut self) {
        let lobby = self.lobby.clone();
        let conn_id = self.conn_id;
        // No runtime means it is shutting down and the lobby goes with it.
        if let Ok(runtime) = Handle::try_current() {
            runtime.spawn(async move { lobby.disconnect(conn_id).await });
        }
    }
}

/// Pump frames between the socket and the lobby until either side ends
async fn run_session(
    socket: WebSocket,
    lobby: LobbyHandle,
    admission: Admission,
    settings: SessionSettings,
) {
    let Admission {
        conn_id,
        role,
        player_id,
        mut frames,
        mut kicked,
    } = admission;
    let lobby_id = lobby.id();
    let player_id = player_id.unwrap_or_default();
    let _disconnect = DisconnectOnDrop {
        lobby: lobby.clone(),
        conn_id,
    };

    let (mut ws_sink, mut ws_stream) = socket.split();
    let mut limiter = InputRateLimiter::new(settings.input_rate_limit);
    let mut keepalive = interval_at(Instant::now() + settings.keepalive, settings.keepalive);
    let idle = sleep(settings.idle_timeout);
    tokio::pin!(idle);
    let mut kick_pending = true;

    let close = loop {
        tokio::select! {
            biased;

            reason = &mut kicked, if kick_pending => {
                kick_pending = false;
                // Err: the lobby let go of us without a reason; frames end next.
                if let Ok(reason) = reason {
                    info!(%lobby_id, conn_id, reason = reason.as_str(), "connection dropped by lobby");
                    break Some(close_for(reason));
                }
            }

            frame = frames.recv() => match frame {
                Some(text) => {
                    if let Err(e) = ws_sink.send(Message::Text(text.to_string())).await {
                        debug!(%lobby_id, conn_id, error = %e, "WebSocket send failed");
                        break None;
                    }
                }
                None => break Some(close_frame(close_code::NORMAL, "game finished")),
            },

            inbound = ws_stream.next() => match inbound {
                Some(Ok(message)) => {
                    idle.as_mut().reset(Instant::now() + settings.idle_timeout);
                    match message {
                        Message::Text(text) => {
                            if !limiter.check() {
                                debug!(%lobby_id, conn_id, "Rate limited input message");
                                continue;
                            }
                            handle_text(&lobby, conn_id, role, &player_id, &text).await;
                        }
                        Message::Binary(_) => {
                            debug!(%lobby_id, conn_id, "Received binary message, ignoring");
                        }
                        Message::Ping(_) | Message::Pong(_) => {}
                        Message::Close(_) => {
                            info!(%lobby_id, conn_id, "Client initiated close");
                            break None;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(%lobby_id, conn_id, error = %e, "WebSocket error");
                    break None;
                }
                None => break None,
            },

            _ = keepalive.tick() => {
                if ws_sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break None;
                }
            }

            _ = &mut idle => {
                info!(%lobby_id, conn_id, "closing idle connection");
                break Some(close_frame(close_code::AWAY, "idle timeout"));
            }
        }
    };

    if let Some(frame) = close {
        let _ = ws_sink.send(Message::Close(Some(frame))).await;
    }
    let _ = ws_sink.close().await;

    info!(
        %lobby_id,
        conn_id,
        dropped_frames = limiter.dropped(),
        "WebSocket connection closed"
    );
}

/// Forward one text frame from a player; everything else is ignored
async fn handle_text(
    lobby: &LobbyHandle,
    conn_id: ConnId,
    role: ClientType,
    player_id: &str,
    text: &str,
) {
    if role == ClientType::Spectator {
        debug!(conn_id, "spectator frame ignored");
        return;
    }

    match decode_action(text) {
        Ok(message) => {
            let outcome = lobby.submit(conn_id, message.tick, message.action).await;
            debug!(
                player_id,
                tick = message.tick,
                action = ?message.action,
                ?outcome,
                "action submitted"
            );
        }
        Err(e) => debug!(player_id, error = %e, "dropped malformed action"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::{spawn_lobby, LobbySettings};

    #[test]
    fn usernames_are_trimmed_and_capped() {
        assert_eq!(clean_username(Some("  ann  ")), "ann");
        assert_eq!(clean_username(None), "");
        let long = "x".repeat(100);
        assert_eq!(clean_username(Some(&long)).len(), MAX_USERNAME_CHARS);
    }

    #[test]
    fn lobby_close_reasons_map_to_codes() {
        assert_eq!(close_for(CloseReason::TooSlow).code, close_code::POLICY);
        assert_eq!(close_for(CloseReason::InternalError).code, close_code::ERROR);
        assert_eq!(close_for(CloseReason::ServerShutdown).code, close_code::NORMAL);
    }

    #[tokio::test]
    async fn panicking_session_still_removes_its_player() {
        let lobby = spawn_lobby(Uuid::new_v4(), "test".into(), LobbySettings::default());
        let admission = lobby
            .admit(ClientType::Player, "ann".into())
            .await
            .unwrap();
        assert_eq!(lobby.summary().clients.len(), 1);

        let guard_lobby = lobby.clone();
        let conn_id = admission.conn_id;
        let session = tokio::spawn(async move {
            let _disconnect = DisconnectOnDrop {
                lobby: guard_lobby,
                conn_id,
            };
            let _admission = admission;
            panic!("session blew up");
        });
        assert!(session.await.unwrap_err().is_panic());

        let mut summary = lobby.watch();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !summary.borrow_and_update().clients.is_empty() {
                summary.changed().await.unwrap();
            }
        })
        .await
        .expect("player removed after the session panicked");
    }

    #[test]
    fn keepalive_fits_inside_idle_window() {
        let settings = SessionSettings::from_config(&Config::default());
        assert!(settings.keepalive < settings.idle_timeout);
        assert_eq!(settings.input_rate_limit, 20);
    }
}
