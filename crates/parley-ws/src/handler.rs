use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use parley_core::error::GatewayError;
use parley_core::AppState;
use parley_models::gateway::{HandshakeFrame, ServerEvent, CLOSE_AUTHENTICATION_FAILED};
use tokio::time::{Duration, MissedTickBehavior};

const PING_INTERVAL: Duration = Duration::from_secs(20);
const CLOSE_GOING_AWAY: u16 = 1001;

async fn send_event(
    sender: &mut (impl SinkExt<Message> + Unpin),
    event: &ServerEvent,
) -> Result<(), ()> {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(event = event.name(), error = %e, "failed to encode event");
            return Ok(());
        }
    };
    sender
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}

async fn send_close(
    sender: &mut (impl SinkExt<Message> + Unpin),
    code: u16,
    reason: &str,
) -> Result<(), ()> {
    sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await
        .map_err(|_| ())
}

/// Tells the client why the handshake failed, then closes.
async fn reject(sender: &mut (impl SinkExt<Message> + Unpin), err: &GatewayError) {
    let code = err.close_code().unwrap_or(CLOSE_AUTHENTICATION_FAILED);
    let reason = err.client_message();
    let _ = send_event(sender, &ServerEvent::error(reason.clone())).await;
    let _ = send_close(sender, code, &reason).await;
}

/// Token from the first text frame, for clients that could not put it on
/// the upgrade request. Anything other than a handshake frame yields `None`.
async fn wait_for_token(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                return serde_json::from_str::<HandshakeFrame>(text.as_str())
                    .ok()
                    .map(|frame| frame.token);
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

pub async fn handle_connection(socket: WebSocket, state: AppState, token: Option<String>) {
    let gateway = state.gateway.clone();
    let (mut sender, mut receiver) = socket.split();
    let (mut session, mut outbox_rx) = gateway.open_session();

    // Registered before the handshake so a shutdown that fires while this
    // connection is authenticating or inside handle_frame is not lost.
    let shutdown = state.shutdown.clone();
    let shutdown_signal = shutdown.notified();
    tokio::pin!(shutdown_signal);
    shutdown_signal.as_mut().enable();

    let handshake = tokio::select! {
        result = tokio::time::timeout(gateway.config().handshake_timeout, async {
            let token = match token {
                Some(token) => Some(token),
                None => wait_for_token(&mut receiver).await,
            };
            gateway.authenticate(&mut session, token.as_deref()).await
        }) => Some(result),
        () = &mut shutdown_signal => None,
    };

    let user_id = match handshake {
        Some(Ok(Ok(user_id))) => user_id,
        Some(Ok(Err(err))) => {
            reject(&mut sender, &err).await;
            gateway.disconnect(&mut session);
            return;
        }
        Some(Err(_)) => {
            tracing::warn!(connection_id = %session.id(), "handshake timed out");
            let reason = "Authentication timed out";
            let _ = send_event(&mut sender, &ServerEvent::error(reason)).await;
            let _ = send_close(&mut sender, CLOSE_AUTHENTICATION_FAILED, reason).await;
            gateway.disconnect(&mut session);
            return;
        }
        None => {
            tracing::debug!(connection_id = %session.id(), "shutdown during handshake");
            let _ = send_close(&mut sender, CLOSE_GOING_AWAY, "Server shutting down").await;
            gateway.disconnect(&mut session);
            return;
        }
    };

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let disconnect_reason = loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        gateway.handle_frame(&mut session, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break "client closed",
                    // Binary frames carry nothing we understand; pings are answered by axum.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %session.id(), error = %e, "websocket read failed");
                        break "websocket read error";
                    }
                }
            }
            event = outbox_rx.recv() => {
                let Some(event) = event else {
                    break "outbox closed";
                };
                if send_event(&mut sender, &event).await.is_err() {
                    break "websocket write error";
                }
            }
            _ = ping_interval.tick() => {
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break "websocket ping send error";
                }
            }
            () = &mut shutdown_signal => {
                let _ = send_close(&mut sender, CLOSE_GOING_AWAY, "Server shutting down").await;
                break "server shutdown";
            }
        }
    };

    tracing::info!(
        connection_id = %session.id(),
        user_id = %user_id,
        reason = disconnect_reason,
        "client disconnected"
    );
    gateway.disconnect(&mut session);
}
