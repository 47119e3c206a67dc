use axum_tws::WebSocket;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{session::SocketHandler, state::AppState};

#[instrument(skip_all, fields(client = %client))]
async fn run_connection(socket: WebSocket, state: Arc<AppState>, client: Uuid) {
    let connections = state.connection_opened();
    info!("New WebSocket connection established ({} open)", connections);

    let (sink, stream) = socket.split();
    SocketHandler::new(state.clone(), client).run(stream, sink).await;

    // The cooldown record outlives the connection; the sweep reclaims it.
    let connections = state.connection_closed();
    info!("WebSocket connection terminated ({} open)", connections);
}

pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    run_connection(socket, state, Uuid::new_v4()).await
}
