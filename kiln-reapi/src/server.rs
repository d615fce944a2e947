//! REAPI-compatible HTTP server: `POST /v2/actions/execute`,
//! `GET /v2/operations/{name}`, `GET/PUT /v2/actionResults/{hash}/{size}`.
//!
//! Execution is dispatched to a blocking thread so a slow action does not
//! stall the async runtime; `execute` returns immediately with an
//! in-flight operation that the caller polls to completion, mirroring the
//! long-running-operation shape REAPI clients expect.

use crate::capabilities::Capabilities;
use crate::digest::ReapiDigest;
use crate::executor::ActionExecutor;
use crate::wire::{ActionRequest, ActionResult, Operation};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

struct AppState {
    executor: Arc<dyn ActionExecutor>,
    operations: Mutex<HashMap<String, Operation>>,
    action_results: Mutex<HashMap<kiln_hash::Digest, ActionResult>>,
    next_operation_id: AtomicU64,
}

pub fn build_router(executor: Arc<dyn ActionExecutor>) -> Router {
    let state = Arc::new(AppState {
        executor,
        operations: Mutex::new(HashMap::new()),
        action_results: Mutex::new(HashMap::new()),
        next_operation_id: AtomicU64::new(1),
    });
    Router::new()
        .route("/v2/actions/execute", post(execute))
        .route("/v2/operations/{name}", get(get_operation))
        .route("/v2/actionResults/{hash}/{size}", get(get_action_result).put(put_action_result))
        .with_state(state)
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, message.into()).into_response()
}

async fn execute(State(state): State<Arc<AppState>>, body: axum::body::Bytes) -> Response {
    let request = match ActionRequest::decode(&body) {
        Ok(r) => r,
        Err(e) => return bad_request(e.to_string()),
    };
    let action = request.to_action(None);
    if action.fingerprint() != request.action_id {
        return bad_request("action id does not match the fingerprint of the enclosed action");
    }

    let id = state.next_operation_id.fetch_add(1, Ordering::SeqCst);
    let name = format!("operations/{id}");
    let operation = Operation { name: name.clone(), action_id: request.action_id, done: false, result: None, error: None };
    state.operations.lock().unwrap().insert(name.clone(), operation.clone());

    let executor = Arc::clone(&state.executor);
    let state_for_task = Arc::clone(&state);
    let name_for_task = name.clone();
    tokio::task::spawn_blocking(move || {
        let outcome = executor.execute(&action);
        let mut operations = state_for_task.operations.lock().unwrap();
        let slot = operations.get_mut(&name_for_task).expect("operation inserted before the task was spawned");
        match outcome {
            Ok(result) => {
                slot.result = Some(result);
                slot.done = true;
            }
            Err(e) => {
                slot.error = Some(e.to_string());
                slot.done = true;
            }
        }
    });

    (StatusCode::OK, operation.encode()).into_response()
}

async fn get_operation(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    let full_name = format!("operations/{name}");
    match state.operations.lock().unwrap().get(&full_name) {
        Some(operation) => (StatusCode::OK, operation.encode()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_action_result(State(state): State<Arc<AppState>>, Path((hash, size)): Path<(String, String)>) -> Response {
    let digest = match ReapiDigest::from_path_segments(&hash, &size) {
        Ok(d) => d,
        Err(e) => return bad_request(e.to_string()),
    };
    match state.action_results.lock().unwrap().get(&digest.hash) {
        Some(result) => (StatusCode::OK, result.encode()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_action_result(
    State(state): State<Arc<AppState>>,
    Path((hash, size)): Path<(String, String)>,
    body: axum::body::Bytes,
) -> Response {
    let digest = match ReapiDigest::from_path_segments(&hash, &size) {
        Ok(d) => d,
        Err(e) => return bad_request(e.to_string()),
    };
    let result = match ActionResult::decode(&body) {
        Ok(r) => r,
        Err(e) => return bad_request(e.to_string()),
    };
    state.action_results.lock().unwrap().insert(digest.hash, result);
    StatusCode::OK.into_response()
}

/// Capabilities this server advertises, shared by anything serving
/// `/v2/capabilities` in front of this router (kept out of `build_router`
/// itself since the advertised platform varies per deployment).
pub fn server_capabilities(platform: &kiln_hash::Platform) -> Capabilities {
    Capabilities::from_platform(platform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FixedExecutor;
    use crate::wire::WireInput;
    use kiln_hash::hash_bytes;

    fn sample_request() -> ActionRequest {
        let action = kiln_hash::Action {
            command: vec!["true".into()],
            env: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            platform: kiln_hash::Platform::empty(),
            timeout_ms: 1000,
            salt: None,
        };
        ActionRequest::from_action(&action, Capabilities::default(), 0)
    }

    #[test]
    fn action_id_mismatch_is_caught_before_dispatch() {
        let mut request = sample_request();
        request.inputs.push(WireInput { artifact_id: hash_bytes(b"x"), declared_path: "x".into(), executable: false });
        // action_id was computed before the mutation above, so it no longer
        // matches to_action()'s fingerprint.
        assert_ne!(request.to_action(None).fingerprint(), request.action_id);
    }

    #[tokio::test]
    async fn execute_then_poll_reaches_done() {
        let executor = Arc::new(FixedExecutor(ActionResult { exit_code: 0, stdout: Vec::new(), stderr: Vec::new(), output_files: Vec::new() }));
        let state = Arc::new(AppState {
            executor,
            operations: Mutex::new(HashMap::new()),
            action_results: Mutex::new(HashMap::new()),
            next_operation_id: AtomicU64::new(1),
        });
        let request = sample_request();
        let response = execute(State(Arc::clone(&state)), axum::body::Bytes::from(request.encode())).await;
        assert_eq!(response.status(), StatusCode::OK);

        // Give the spawned blocking task a chance to run.
        tokio::task::yield_now().await;
        for _ in 0..100 {
            if state.operations.lock().unwrap().values().all(|op| op.done) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        let operations = state.operations.lock().unwrap();
        let operation = operations.values().next().unwrap();
        assert!(operation.done);
        assert_eq!(operation.result.as_ref().unwrap().exit_code, 0);
    }
}
