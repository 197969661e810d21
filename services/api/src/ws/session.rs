//! Manages the WebSocket connection lifecycle for a game session.

use super::{
    game::Game,
    protocol::{ClientMessage, ServerMessage},
};
use crate::state::AppState;
use anyhow::{Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tracing::{Instrument, error, info, instrument, warn};
use uuid::Uuid;
use wordweaver_core::DifficultyLevel;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// Performs the `init` handshake, then runs the game loop until the client
/// disconnects.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let temp_id: u32 = rand::random();
    tracing::Span::current().record("session_id", &temp_id.to_string());
    info!("New WebSocket connection. Awaiting initialization...");

    let (mut socket_tx, mut socket_rx) = socket.split();

    // The first message from the client must be an `init` message.
    let init = match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => parse_init(&text),
        Some(Ok(_)) => Err(anyhow!("First message was not a text `init` message.")),
        _ => {
            info!("Client disconnected before sending init message.");
            return;
        }
    };
    let (topic, level) = match init {
        Ok(init) => init,
        Err(e) => {
            error!("Session initialization failed: {:?}", e);
            let _ = send_msg(
                &mut socket_tx,
                ServerMessage::Error {
                    message: e.to_string(),
                    recoverable: false,
                },
            )
            .await;
            return;
        }
    };

    let session_id = Uuid::new_v4();
    tracing::Span::current().record("session_id", &session_id.to_string());
    if send_msg(&mut socket_tx, ServerMessage::Initialized { session_id })
        .await
        .is_err()
    {
        error!("Failed to send Initialized message to client.");
        return;
    }

    let game = Game::new(&state, topic.clone(), level);
    let game_span = tracing::info_span!("game_runtime", %session_id, %topic, %level);
    async move {
        if let Err(e) = run_game_session(game, socket_tx, socket_rx).await {
            error!(error = ?e, "Game session terminated with error.");
        }
        info!("Game session finished.");
    }
    .instrument(game_span)
    .await;
}

fn parse_init(text: &str) -> Result<(String, DifficultyLevel)> {
    match serde_json::from_str::<ClientMessage>(text)? {
        ClientMessage::Init { topic, level } if !topic.trim().is_empty() => Ok((topic, level)),
        ClientMessage::Init { .. } => Err(anyhow!("`init` requires a non-empty topic")),
        _ => Err(anyhow!("First message must be `init`")),
    }
}

/// The main event loop for an initialized connection.
///
/// Multiplexes client messages, the pending round's delivery and pipeline
/// counter updates.
async fn run_game_session(
    mut game: Game,
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut socket_rx: SplitStream<WebSocket>,
) -> Result<()> {
    let mut counters = game.counters();
    send_all(&mut socket_tx, game.warm_up().await).await?;

    loop {
        tokio::select! {
            msg_result = socket_rx.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(msg) => {
                            let replies = game.handle(msg).await;
                            send_all(&mut socket_tx, replies).await?;
                        }
                        Err(e) => {
                            warn!(error = %e, "Ignoring malformed client message.");
                            send_msg(&mut socket_tx, ServerMessage::Error {
                                message: format!("Malformed message: {}", e),
                                recoverable: true,
                            }).await?;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client closed the connection.");
                        break;
                    }
                    Some(Ok(_)) => warn!("Ignoring non-text message."),
                    Some(Err(e)) => {
                        error!("Error receiving from client WebSocket: {:?}", e);
                        break;
                    }
                }
            },
            result = game.delivered() => {
                let replies = game.deliver(result);
                send_all(&mut socket_tx, replies).await?;
            },
            changed = counters.changed() => {
                if changed.is_err() {
                    warn!("Prefetch pipeline stopped.");
                    break;
                }
                let snapshot = counters.borrow_and_update().clone();
                send_msg(&mut socket_tx, ServerMessage::Counters { counters: snapshot }).await?;
            },
        }
    }

    game.close().await;
    info!("WebSocket connection closed and game session terminated.");
    Ok(())
}

async fn send_all(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    messages: Vec<ServerMessage>,
) -> Result<()> {
    for msg in messages {
        send_msg(socket_tx, msg).await?;
    }
    Ok(())
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_init_accepts_topic_and_level() {
        let (topic, level) =
            parse_init(r#"{"type":"init","topic":"Travel","level":"Senior High"}"#).unwrap();
        assert_eq!(topic, "Travel");
        assert_eq!(level, DifficultyLevel::SeniorHigh);
    }

    #[test]
    fn test_parse_init_rejects_other_messages() {
        assert!(parse_init(r#"{"type":"start_round"}"#).is_err());
        assert!(parse_init(r#"{"type":"init","topic":"  "}"#).is_err());
        assert!(parse_init("not json").is_err());
    }
}
