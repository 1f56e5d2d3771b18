mod handler;

use std::net::SocketAddr;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use parley_core::AppState;
use serde::Deserialize;

pub fn gateway_router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

#[derive(Debug, Default, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
) -> Response {
    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok());
    let ip = state.access.client_ip(peer, forwarded_for);
    if !state.access.is_allowed(ip).await {
        tracing::warn!(%ip, "gateway upgrade refused for blocked address");
        return (StatusCode::FORBIDDEN, "Access denied").into_response();
    }

    let token = bearer_token(&headers).or(query.token);
    ws.on_upgrade(move |socket| handler::handle_connection(socket, state, token))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}
