//! In-process mock of the backend: REST surface plus the real-time hub.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use docbase::{Client, ClientConfig, Values, RECORD_SEPARATOR};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const TOKEN: &str = "test-key";
pub const DATABASE_ID: &str = "mock-db";

/// Shorthand for building a field mapping from a JSON object literal.
pub fn values(v: Value) -> Values {
    v.as_object().cloned().unwrap_or_default()
}

#[derive(Default)]
struct Store {
    collections: HashMap<String, Vec<Values>>,
    next_id: u64,
}

#[derive(Clone)]
struct Backend {
    store: Arc<Mutex<Store>>,
    events: broadcast::Sender<String>,
    revoked: Arc<AtomicBool>,
    soft_failure: Arc<AtomicBool>,
}

pub struct MockServer {
    pub addr: SocketAddr,
    backend: Backend,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "docbase=debug".into()),
            )
            .with_test_writer()
            .try_init();

        let (events, _) = broadcast::channel(64);
        let backend = Backend {
            store: Arc::new(Mutex::new(Store::default())),
            events,
            revoked: Arc::new(AtomicBool::new(false)),
            soft_failure: Arc::new(AtomicBool::new(false)),
        };

        let app = Router::new()
            .route(
                "/v0/collection/{name}",
                get(probe_collection)
                    .post(create_collection)
                    .put(rename_collection)
                    .delete(drop_collection),
            )
            .route(
                "/v1/entries/{name}",
                post(insert)
                    .patch(find)
                    .put(update)
                    .delete(remove),
            )
            .route("/hub", get(hub))
            .with_state(backend.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            backend,
            handle,
        }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_api_url(format!("http://{}", self.addr))
            .with_hub_url(format!("ws://{}/hub", self.addr))
            .with_handshake_timeout(Duration::from_secs(5))
    }

    pub fn client(&self) -> Client {
        Client::with_config(TOKEN, self.config())
    }

    /// Seeds a collection directly, bypassing the API.
    pub fn seed(&self, collection: &str) {
        self.backend
            .store
            .lock()
            .collections
            .entry(collection.to_string())
            .or_default();
    }

    /// Overwrites a record behind the client's back.
    pub fn overwrite(&self, collection: &str, id: &str, field: &str, value: Value) {
        let mut store = self.backend.store.lock();
        if let Some(records) = store.collections.get_mut(collection) {
            for record in records.iter_mut().filter(|r| r["_id"] == json!(id)) {
                record.insert(field.to_string(), value.clone());
            }
        }
    }

    /// Rejects the test credential on every REST call from now on.
    pub fn revoke_token(&self) {
        self.backend.revoked.store(true, Ordering::SeqCst);
    }

    /// Answers every authorized REST call with `200 {"success": false}`.
    pub fn fail_with_ok_status(&self, enabled: bool) {
        self.backend.soft_failure.store(enabled, Ordering::SeqCst);
    }

    /// Pushes an invocation record to every connected hub session.
    pub fn push(&self, target: &str, envelope: Value) {
        let record = json!({
            "type": 1,
            "target": target,
            "arguments": [envelope.to_string()],
        });
        self.push_raw(format!("{}{}", record, RECORD_SEPARATOR));
    }

    /// Pushes a raw text frame to every connected hub session.
    pub fn push_raw(&self, frame: String) {
        let _ = self.backend.events.send(frame);
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Builds an event envelope the way the backend does.
pub fn envelope(kind: &str, data: Value) -> Value {
    json!({
        "databaseId": DATABASE_ID,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "type": kind,
        "data": data,
    })
}

// ============================================================================
// REST handlers
// ============================================================================

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn ok(data: Value) -> Response {
    reply(StatusCode::OK, json!({ "success": true, "data": data }))
}

fn fail(status: StatusCode, message: &str) -> Response {
    reply(status, json!({ "success": false, "message": message }))
}

/// A 401 whose body claims success, so clients must trust the status first.
fn unauthorized() -> Response {
    reply(StatusCode::UNAUTHORIZED, json!({ "success": true }))
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        == Some(TOKEN)
}

impl Backend {
    /// Short-circuits a request that must not reach the store.
    fn gate(&self, headers: &HeaderMap) -> Option<Response> {
        if !authorized(headers) || self.revoked.load(Ordering::SeqCst) {
            return Some(unauthorized());
        }
        if self.soft_failure.load(Ordering::SeqCst) {
            return Some(reply(
                StatusCode::OK,
                json!({ "success": false, "message": "refused" }),
            ));
        }
        None
    }
}

fn matches(record: &Values, filters: &Values) -> bool {
    filters.iter().all(|(k, v)| record.get(k) == Some(v))
}

async fn probe_collection(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if let Some(response) = backend.gate(&headers) {
        return response;
    }
    if backend.store.lock().collections.contains_key(&name) {
        ok(Value::Null)
    } else {
        fail(StatusCode::NOT_FOUND, "collection not found")
    }
}

async fn create_collection(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if let Some(response) = backend.gate(&headers) {
        return response;
    }
    let mut store = backend.store.lock();
    if store.collections.contains_key(&name) {
        return fail(StatusCode::CONFLICT, "collection already exists");
    }
    store.collections.insert(name, Vec::new());
    ok(Value::Null)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameBody {
    collection_name: String,
}

async fn rename_collection(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(body): Json<RenameBody>,
) -> Response {
    if let Some(response) = backend.gate(&headers) {
        return response;
    }
    let mut store = backend.store.lock();
    if store.collections.contains_key(&body.collection_name) {
        return fail(StatusCode::CONFLICT, "target name taken");
    }
    match store.collections.remove(&name) {
        Some(records) => {
            store.collections.insert(body.collection_name, records);
            ok(Value::Null)
        }
        None => fail(StatusCode::NOT_FOUND, "collection not found"),
    }
}

async fn drop_collection(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Response {
    if let Some(response) = backend.gate(&headers) {
        return response;
    }
    match backend.store.lock().collections.remove(&name) {
        Some(_) => ok(Value::Null),
        None => fail(StatusCode::NOT_FOUND, "collection not found"),
    }
}

#[derive(Deserialize)]
struct InsertBody {
    data: Values,
}

#[derive(Deserialize)]
struct FilterBody {
    #[serde(default)]
    filters: Values,
}

#[derive(Deserialize)]
struct UpdateBody {
    #[serde(default)]
    filters: Values,
    data: Values,
}

impl Backend {
    fn broadcast(&self, kind: &str, data: Value) {
        let record = json!({
            "type": 1,
            "target": kind,
            "arguments": [envelope(kind, data).to_string()],
        });
        let _ = self.events.send(format!("{}{}", record, RECORD_SEPARATOR));
    }
}

async fn insert(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(body): Json<InsertBody>,
) -> Response {
    if let Some(response) = backend.gate(&headers) {
        return response;
    }
    let record = {
        let mut store = backend.store.lock();
        store.next_id += 1;
        let id = format!("e{}", store.next_id);
        let Some(records) = store.collections.get_mut(&name) else {
            return fail(StatusCode::NOT_FOUND, "collection not found");
        };
        let mut record = body.data;
        record.insert("_id".to_string(), json!(id));
        records.push(record.clone());
        record
    };

    let id = record["_id"].clone();
    backend.broadcast(
        "entryCreated",
        json!({ "collectionName": name, "values": record }),
    );
    ok(json!({ "insertedId": id }))
}

async fn find(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<FilterBody>,
) -> Response {
    if let Some(response) = backend.gate(&headers) {
        return response;
    }
    if query.get("methodOverwrite").map(String::as_str) != Some("GET") {
        return fail(StatusCode::BAD_REQUEST, "reads must set methodOverwrite=GET");
    }
    let store = backend.store.lock();
    let Some(records) = store.collections.get(&name) else {
        return fail(StatusCode::NOT_FOUND, "collection not found");
    };
    let found: Vec<Value> = records
        .iter()
        .filter(|r| matches(r, &body.filters))
        .map(|r| Value::Object(r.clone()))
        .collect();
    ok(Value::Array(found))
}

async fn update(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(body): Json<UpdateBody>,
) -> Response {
    if let Some(response) = backend.gate(&headers) {
        return response;
    }
    let mut changes = Vec::new();
    let matched = {
        let mut store = backend.store.lock();
        let Some(records) = store.collections.get_mut(&name) else {
            return fail(StatusCode::NOT_FOUND, "collection not found");
        };
        let mut matched = 0;
        for record in records.iter_mut().filter(|r| matches(r, &body.filters)) {
            matched += 1;
            let old = record.clone();
            for (k, v) in &body.data {
                record.insert(k.clone(), v.clone());
            }
            if *record != old {
                changes.push((old, record.clone()));
            }
        }
        matched
    };

    let modified = changes.len();
    for (old, new) in changes {
        backend.broadcast(
            "entryUpdated",
            json!({ "collectionName": name, "oldValues": old, "newValues": new }),
        );
    }
    ok(json!({ "matchedCount": matched, "modifiedCount": modified }))
}

async fn remove(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Path(name): Path<String>,
    Json(body): Json<FilterBody>,
) -> Response {
    if let Some(response) = backend.gate(&headers) {
        return response;
    }
    let removed: Vec<Values> = {
        let mut store = backend.store.lock();
        let Some(records) = store.collections.get_mut(&name) else {
            return fail(StatusCode::NOT_FOUND, "collection not found");
        };
        let (gone, kept): (Vec<Values>, Vec<Values>) = records
            .drain(..)
            .partition(|r| matches(r, &body.filters));
        *records = kept;
        gone
    };

    for record in &removed {
        backend.broadcast(
            "entryDeleted",
            json!({ "collectionName": name, "values": record }),
        );
    }
    ok(json!({ "deletedCount": removed.len() }))
}

// ============================================================================
// Hub
// ============================================================================

async fn hub(
    ws: WebSocketUpgrade,
    State(backend): State<Backend>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let authorized = query.get("access_token").map(String::as_str) == Some(TOKEN);
    ws.on_upgrade(move |socket| hub_session(socket, backend, authorized))
}

async fn hub_session(mut socket: WebSocket, backend: Backend, authorized: bool) {
    // First record is the client's handshake
    match socket.recv().await {
        Some(Ok(Message::Text(_))) => {}
        _ => return,
    }

    if !authorized {
        let answer = format!("{{\"error\":\"Unauthorized\"}}{}", RECORD_SEPARATOR);
        let _ = socket.send(Message::Text(answer.into())).await;
        return;
    }

    // Subscribe before accepting so no event pushed after the handshake is lost.
    let mut events = backend.events.subscribe();
    let answer = format!("{{}}{}", RECORD_SEPARATOR);
    if socket.send(Message::Text(answer.into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(frame) => {
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
