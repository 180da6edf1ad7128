use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use server_api::{connect, disconnect, dispatch};
use shared::{
    domain::SessionId,
    error::{ApiError, ErrorCode},
    protocol::{ClientRequest, ServerEvent},
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::{app_state::AppState, require_session, SessionQuery};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Response {
    let session = match require_session(&state, q) {
        Ok(session) => session,
        Err(rejection) => return rejection.into_response(),
    };
    ws.on_upgrade(move |socket| ws_connection(state, socket, session))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket, session: SessionId) {
    let (mut sender, mut receiver) = socket.split();
    let (handle, events_rx) = state.api.rooms.open_connection();
    let joined_owner = connect(&state.api, &session, &handle).await;

    let mut events = UnboundedReceiverStream::new(events_rx);
    let send_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(error) => {
                    warn!(%error, event_type = event.event_type(), "failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientRequest>(&text) {
                Ok(request) => dispatch(&state.api, &session, &handle, request).await,
                Err(error) => {
                    debug!(session_id = %session, %error, "rejected malformed frame");
                    state.api.rooms.unicast(
                        &handle,
                        ServerEvent::ActionError(ApiError::new(
                            ErrorCode::Validation,
                            format!("invalid request: {error}"),
                        )),
                    );
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    disconnect(&state.api, &session, joined_owner, handle.id()).await;
    drop(handle);
    send_task.abort();
}
