//! WebSocket channel: clients send [`DashboardEvent`]s and receive replies
//! plus everything broadcast on the context's event channel.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use super::events::{self, DashboardEvent};
use crate::context::AppContext;

pub async fn upgrade(State(ctx): State<Arc<AppContext>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session(ctx, socket))
}

async fn session(ctx: Arc<AppContext>, mut socket: WebSocket) {
    let mut broadcasts = ctx.events.subscribe();
    tracing::info!("dashboard client connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "websocket receive failed");
                        break;
                    }
                };
                let reply = reply_to(&ctx, text.as_str()).await;
                if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
                    break;
                }
            }
            outgoing = broadcasts.recv() => {
                match outgoing {
                    Ok(event) => {
                        if socket.send(Message::Text(event.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "websocket client lagging, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
    tracing::info!("dashboard client disconnected");
}

/// `{"event", "ok": true, "data"}` or `{"event", "ok": false, "error", "kind"}`.
async fn reply_to(ctx: &AppContext, text: &str) -> Value {
    let event: DashboardEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            return json!({
                "event": null,
                "ok": false,
                "error": format!("invalid event: {e}"),
                "kind": "bad_request",
            })
        }
    };
    let name = event.name();
    match events::handle_event(ctx, event).await {
        Ok(data) => json!({"event": name, "ok": true, "data": data}),
        Err(e) => json!({"event": name, "ok": false, "error": e.message, "kind": e.kind}),
    }
}
