use std::time::Instant;

use tracing::debug;

use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    let started = Instant::now();
    let resp = route(state, &req);
    debug!(
        request_id = %req.id,
        method = %req.method,
        ok = resp.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request complete"
    );
    resp
}

fn route(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::attendance::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::reports::try_handle(state, req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
