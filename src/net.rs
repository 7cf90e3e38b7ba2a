use std::sync::Arc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::accept_async;
use tungstenite::Message;
use tracing::{debug, info, warn};

use crate::drivetrain::{DriverCommand, InputSurface};
use crate::physics::PhysicsWorld;
use crate::state::SharedGameState;

/// Everything a client may send. Lock order is always game state, then physics.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Input(InputSurface),
    Override(InputSurface),
    ReleaseOverride,
    Command { command: DriverCommand },
    Ping,
}

pub async fn start_websocket_server(
    addr: String,
    state: Arc<Mutex<SharedGameState>>,
    physics: Arc<Mutex<PhysicsWorld>>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "websocket listening");

    loop {
        let (raw, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let state = Arc::clone(&state);
        let physics = Arc::clone(&physics);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(raw, state, physics).await {
                warn!(%peer, error = %e, "connection closed with error");
            }
        });
    }
}

async fn handle_connection(
    raw: TcpStream,
    state: Arc<Mutex<SharedGameState>>,
    physics: Arc<Mutex<PhysicsWorld>>,
) -> anyhow::Result<()> {
    let ws = accept_async(raw).await?;
    let (mut write, mut read) = ws.split();

    // -------------------------------
    // 1) Entity + vehicle body
    // -------------------------------
    let player_id = {
        let mut game = state.lock().await;
        let mut phys = physics.lock().await;
        game.add_entity(&mut phys)?
    };

    // -------------------------------
    // 2) Outgoing channel + send loop
    // -------------------------------
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.lock().await.register_client(&player_id, tx.clone());

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if write.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    info!(player = %player_id, "player connected");
    let welcome = serde_json::json!({ "type": "welcome", "player_id": player_id });
    let _ = tx.send(welcome.to_string());

    // -------------------------------
    // 3) Receive loop
    // -------------------------------
    while let Some(msg) = read.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(_) => break,
        };
        if !msg.is_text() {
            continue;
        }
        let Ok(text) = msg.to_text() else { continue };

        let parsed = match serde_json::from_str::<ClientMessage>(text) {
            Ok(m) => m,
            Err(e) => {
                debug!(player = %player_id, error = %e, "ignored client message");
                continue;
            }
        };

        match parsed {
            ClientMessage::Ping => {
                let _ = tx.send(r#"{"type":"pong"}"#.to_string());
            }
            ClientMessage::Input(input) => state.lock().await.update_input(&player_id, input),
            ClientMessage::Override(input) => state.lock().await.set_override(&player_id, Some(input)),
            ClientMessage::ReleaseOverride => state.lock().await.set_override(&player_id, None),
            ClientMessage::Command { command } => state.lock().await.push_command(&player_id, command),
        }
    }

    info!(player = %player_id, "player disconnected");
    let mut game = state.lock().await;
    let mut phys = physics.lock().await;
    game.remove_entity(&player_id, &mut phys);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse() {
        let m: ClientMessage = serde_json::from_str(r#"{ "type": "input", "throttle": 0.5, "steer": -1.0 }"#).unwrap();
        let ClientMessage::Input(i) = m else { panic!("expected input") };
        assert_eq!(i.throttle, 0.5);
        assert_eq!(i.steer, -1.0);
        assert_eq!(i.brake, 0.0);

        let m: ClientMessage =
            serde_json::from_str(r#"{ "type": "command", "command": { "cmd": "shift_to_gear", "value": 2 } }"#).unwrap();
        assert!(matches!(m, ClientMessage::Command { command: DriverCommand::ShiftToGear(2) }));

        let m: ClientMessage = serde_json::from_str(r#"{ "type": "release_override" }"#).unwrap();
        assert!(matches!(m, ClientMessage::ReleaseOverride));
        assert!(serde_json::from_str::<ClientMessage>(r#"{ "type": "fly" }"#).is_err());
    }
}
