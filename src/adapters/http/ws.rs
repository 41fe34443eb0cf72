//! `/ws` observer protocol (spec §6): one duplex socket per observer,
//! broadcasting every `ServerEvent` and accepting a small set of
//! `ClientEvent` commands that mirror the REST mutating endpoints.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::models::approval::ApprovalDecision;
use crate::services::event_bus::ClientEvent;
use crate::services::workers::WorkerContext;

use super::actions;

pub async fn ws_handler(ws: WebSocketUpgrade, State(ctx): State<Arc<WorkerContext>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(mut socket: WebSocket, ctx: Arc<WorkerContext>) {
    let mut receiver = ctx.events.subscribe();

    loop {
        tokio::select! {
            result = receiver.recv() => {
                match result {
                    Ok(event) => {
                        let json = serde_json::to_string(&event).unwrap_or_default();
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        let warning = format!("{{\"type\":\"lagged\",\"missed_events\":{n}}}");
                        if socket.send(Message::Text(warning.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        dispatch_client_event(&ctx, &text).await;
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn dispatch_client_event(ctx: &Arc<WorkerContext>, raw: &str) {
    let event: ClientEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, raw, "ignoring malformed /ws client event");
            return;
        }
    };

    let result = match event {
        ClientEvent::ApprovalResponse { id, approved, comment, data } => {
            let decision = if approved { ApprovalDecision::Approved } else { ApprovalDecision::Rejected };
            ctx.approvals.resolve(id, decision, comment).await;
            let _ = data;
            Ok(())
        }
        ClientEvent::TaskRetry { sprint_id, task_id } => actions::retry_task(ctx, &sprint_id, task_id).await,
        ClientEvent::SprintApprove { sprint_id } => actions::approve_plan(ctx, &sprint_id).await.map(|_| ()),
        ClientEvent::SprintCancel { sprint_id } => actions::cancel_sprint(ctx, &sprint_id).await.map(|_| ()),
    };

    if let Err(e) = result {
        warn!(error = %e, "client event handling failed");
    }
}
