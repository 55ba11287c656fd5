//! In-process CouchDB stand-in for integration tests.
//!
//! Implements the subset of the HTTP API the crate uses, with basic auth and
//! per-user write grants. Each document keeps its open leaf revisions, and
//! replicated writes (`new_edits:false`) are placed by their `_revisions`
//! ancestry the way CouchDB does, so a write without ancestry opens a
//! conflict branch.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::Engine;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::task::JoinHandle;

use wiki_sync::config::Config;
use wiki_sync::login::Credentials;

pub const WRITER: (&str, &str) = ("alice", "wonderland");
pub const READER: (&str, &str) = ("bob", "builder");
pub const DB: &str = "wiki";

struct User {
    grants: Vec<String>,
    password: String,
}

#[derive(Default)]
struct Db {
    docs: BTreeMap<String, StoredDoc>,
    update_seq: u64,
}

#[derive(Clone, Default)]
struct StoredDoc {
    /// Open leaf revisions
    leaves: Vec<Value>,
    /// Every revision seen for this document
    known: HashSet<String>,
    seq: u64,
}

impl StoredDoc {
    /// Live leaves beat deleted ones, then the highest revision wins
    fn winner(&self) -> Option<&Value> {
        self.leaves
            .iter()
            .max_by_key(|leaf| (!is_deleted(leaf), parse_rev(rev_of(leaf))))
    }

    fn live(&self) -> Option<&Value> {
        self.winner().filter(|doc| !is_deleted(doc))
    }
}

#[derive(Default)]
struct ServerState {
    available: bool,
    dbs: HashMap<String, Db>,
    rev_counter: u64,
    users: HashMap<String, User>,
    write_attempts: usize,
}

type Shared = Arc<Mutex<ServerState>>;

pub struct FakeCouch {
    pub url: String,
    handle: JoinHandle<()>,
    state: Shared,
}

impl FakeCouch {
    /// Start with `alice` (may write `wiki` and `wiki_alice`), `bob` (read
    /// only) and the databases `wiki` and `wiki_alice`.
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(ServerState {
            available: true,
            ..Default::default()
        }));

        let app = Router::new()
            .route("/", get(welcome))
            .route("/:db", get(db_info))
            .route(
                "/:db/:id",
                get(get_doc).put(put_doc).delete(delete_doc).post(post_db),
            )
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let server = Self {
            url: format!("http://{addr}"),
            handle,
            state,
        };
        server.add_user(WRITER.0, WRITER.1, &[DB, "wiki_alice"]);
        server.add_user(READER.0, READER.1, &[]);
        server.create_db(DB);
        server.create_db("wiki_alice");
        server
    }

    pub fn add_user(&self, name: &str, password: &str, grants: &[&str]) {
        self.state.lock().unwrap().users.insert(
            name.to_string(),
            User {
                grants: grants.iter().map(|g| g.to_string()).collect(),
                password: password.to_string(),
            },
        );
    }

    pub fn create_db(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .dbs
            .entry(name.to_string())
            .or_default();
    }

    /// When unavailable every request answers 503
    pub fn set_available(&self, available: bool) {
        self.state.lock().unwrap().available = available;
    }

    pub fn credentials(&self, user: (&str, &str)) -> Credentials {
        Credentials::new(user.0, user.1, &self.url, DB)
    }

    /// Number of documents whose winning revision is live
    pub fn doc_count(&self, db: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .dbs
            .get(db)
            .map_or(0, |db| db.docs.values().filter(|d| d.live().is_some()).count())
    }

    /// The winning revision of a document, unless it is deleted
    pub fn doc(&self, db: &str, id: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state
            .dbs
            .get(db)
            .and_then(|db| db.docs.get(id))
            .and_then(StoredDoc::live)
            .cloned()
    }

    /// Number of open revisions of a document, more than one means conflict
    pub fn leaf_count(&self, db: &str, id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .dbs
            .get(db)
            .and_then(|db| db.docs.get(id))
            .map_or(0, |d| d.leaves.len())
    }

    /// Write a document as another client would, returning its revision
    pub fn put(&self, db: &str, id: &str, fields: Value) -> String {
        let mut state = self.state.lock().unwrap();
        let previous = previous_generation(&state, db, id);
        let rev = next_rev(&mut state, previous);
        let mut body = fields;
        body["_id"] = json!(id);
        body["_rev"] = json!(rev);
        store(&mut state, db, id, body);
        rev
    }

    pub fn write_attempts(&self) -> usize {
        self.state.lock().unwrap().write_attempts
    }
}

impl Drop for FakeCouch {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A config rooted in `dir` with short timings for tests
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config {
        data_dir: dir.path().to_string_lossy().into_owned(),
        ..Default::default()
    };
    config.network.probe_timeout_ms = 500;
    config.network.request_timeout_ms = 2_000;
    config.sync.interval_ms = 50;
    config.sync.max_backoff_ms = 200;
    config
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn eventually<F: FnMut() -> bool>(timeout: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn welcome(State(state): State<Shared>) -> Response {
    if let Err(response) = ensure_available(&state) {
        return response;
    }
    Json(json!({"couchdb": "Welcome", "version": "3.3.3"})).into_response()
}

async fn db_info(
    State(state): State<Shared>,
    Path(db): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut guard = state.lock().unwrap();
    let state = &mut *guard;
    if let Err(response) = read_access(state, &headers, &db) {
        return response;
    }
    let info = &state.dbs[&db];
    Json(json!({
        "db_name": db,
        "doc_count": info.docs.values().filter(|d| d.live().is_some()).count(),
        "update_seq": info.update_seq,
    }))
    .into_response()
}

async fn get_doc(
    State(state): State<Shared>,
    Path((db, id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut guard = state.lock().unwrap();
    let state = &mut *guard;
    if let Err(response) = read_access(state, &headers, &db) {
        return response;
    }

    match id.as_str() {
        "_all_docs" => all_docs(&state.dbs[&db]),
        "_changes" => changes(&state.dbs[&db], &query),
        _ => match state.dbs[&db].docs.get(&id) {
            Some(doc) => match doc.live() {
                Some(body) => Json(body.clone()).into_response(),
                None => error(StatusCode::NOT_FOUND, "not_found", "deleted"),
            },
            None => error(StatusCode::NOT_FOUND, "not_found", "missing"),
        },
    }
}

async fn put_doc(
    State(state): State<Shared>,
    Path((db, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Response {
    let mut guard = state.lock().unwrap();
    let state = &mut *guard;
    if let Err(response) = write_access(state, &headers, &db) {
        return response;
    }

    let given = body.get("_rev").and_then(Value::as_str).map(str::to_string);
    if let Err(response) = check_rev(state, &db, &id, given.as_deref()) {
        return response;
    }

    let previous = previous_generation(state, &db, &id);
    let rev = next_rev(state, previous);
    body["_id"] = json!(id);
    body["_rev"] = json!(rev);
    store(state, &db, &id, body);
    (
        StatusCode::CREATED,
        Json(json!({"ok": true, "id": id, "rev": rev})),
    )
        .into_response()
}

async fn delete_doc(
    State(state): State<Shared>,
    Path((db, id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let mut guard = state.lock().unwrap();
    let state = &mut *guard;
    if let Err(response) = write_access(state, &headers, &db) {
        return response;
    }

    let exists = state.dbs[&db]
        .docs
        .get(&id)
        .is_some_and(|d| d.live().is_some());
    if !exists {
        return error(StatusCode::NOT_FOUND, "not_found", "missing");
    }
    if let Err(response) = check_rev(state, &db, &id, query.get("rev").map(String::as_str)) {
        return response;
    }

    let previous = previous_generation(state, &db, &id);
    let rev = next_rev(state, previous);
    store(
        state,
        &db,
        &id,
        json!({"_id": id, "_rev": rev, "_deleted": true}),
    );
    Json(json!({"ok": true, "id": id, "rev": rev})).into_response()
}

async fn post_db(
    State(state): State<Shared>,
    Path((db, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if id != "_bulk_docs" {
        return error(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "Only _bulk_docs");
    }

    let mut guard = state.lock().unwrap();
    let state = &mut *guard;
    if let Err(response) = write_access(state, &headers, &db) {
        return response;
    }

    let docs = body["docs"].as_array().cloned().unwrap_or_default();
    for doc in docs {
        store_replicated(state, &db, doc);
    }
    // new_edits=false reports only failures
    (StatusCode::CREATED, Json(json!([]))).into_response()
}

fn all_docs(db: &Db) -> Response {
    let rows: Vec<Value> = db
        .docs
        .iter()
        .filter_map(|(id, d)| d.live().map(|doc| (id, doc)))
        .map(|(id, doc)| {
            json!({
                "id": id,
                "key": id,
                "value": {"rev": doc["_rev"]},
                "doc": doc,
            })
        })
        .collect();
    Json(json!({"total_rows": rows.len(), "offset": 0, "rows": rows})).into_response()
}

fn changes(db: &Db, query: &HashMap<String, String>) -> Response {
    let since: u64 = query.get("since").and_then(|s| s.parse().ok()).unwrap_or(0);
    let limit: usize = query
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(usize::MAX);

    let mut docs: Vec<(&String, &StoredDoc)> =
        db.docs.iter().filter(|(_, d)| d.seq > since).collect();
    docs.sort_by_key(|(_, d)| d.seq);
    docs.truncate(limit);

    let last_seq = docs.last().map_or(db.update_seq.max(since), |(_, d)| d.seq);
    let results: Vec<Value> = docs
        .into_iter()
        .filter_map(|(id, d)| d.winner().map(|doc| (id, d.seq, doc)))
        .map(|(id, seq, doc)| {
            json!({
                "id": id,
                "seq": seq,
                "deleted": is_deleted(doc),
                "changes": [{"rev": doc["_rev"]}],
                "doc": doc,
            })
        })
        .collect();
    Json(json!({"results": results, "last_seq": last_seq})).into_response()
}

// ============================================================================
// Helpers
// ============================================================================

fn error(status: StatusCode, error: &str, reason: &str) -> Response {
    (status, Json(json!({"error": error, "reason": reason}))).into_response()
}

fn ensure_available(state: &Shared) -> Result<(), Response> {
    if state.lock().unwrap().available {
        Ok(())
    } else {
        Err(error(
            StatusCode::SERVICE_UNAVAILABLE,
            "service_unavailable",
            "Server is down for maintenance",
        ))
    }
}

fn authenticate(state: &ServerState, headers: &HeaderMap) -> Result<String, Response> {
    let unauthorized = |reason: &str| error(StatusCode::UNAUTHORIZED, "unauthorized", reason);

    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
    else {
        return Err(unauthorized("You are not authorized to access this db."));
    };

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(value)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default();
    let (name, password) = decoded.split_once(':').unwrap_or((decoded.as_str(), ""));

    match state.users.get(name) {
        Some(user) if user.password == password => Ok(name.to_string()),
        _ => Err(unauthorized("Name or password is incorrect.")),
    }
}

fn read_access(state: &ServerState, headers: &HeaderMap, db: &str) -> Result<String, Response> {
    if !state.available {
        return Err(error(
            StatusCode::SERVICE_UNAVAILABLE,
            "service_unavailable",
            "Server is down for maintenance",
        ));
    }
    let user = authenticate(state, headers)?;
    if !state.dbs.contains_key(db) {
        return Err(error(
            StatusCode::NOT_FOUND,
            "not_found",
            "Database does not exist.",
        ));
    }
    Ok(user)
}

fn write_access(
    state: &mut ServerState,
    headers: &HeaderMap,
    db: &str,
) -> Result<String, Response> {
    let user = read_access(state, headers, db)?;
    state.write_attempts += 1;
    if state.users[&user].grants.iter().any(|g| g == db) {
        Ok(user)
    } else {
        Err(error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "You are not allowed to write to this database.",
        ))
    }
}

fn check_rev(state: &ServerState, db: &str, id: &str, given: Option<&str>) -> Result<(), Response> {
    let current = state.dbs[db]
        .docs
        .get(id)
        .and_then(StoredDoc::live)
        .and_then(|doc| doc["_rev"].as_str());
    if current == given {
        Ok(())
    } else {
        Err(error(StatusCode::CONFLICT, "conflict", "Document update conflict."))
    }
}

fn is_deleted(body: &Value) -> bool {
    body.get("_deleted").and_then(Value::as_bool).unwrap_or(false)
}

fn rev_of(doc: &Value) -> &str {
    doc["_rev"].as_str().unwrap_or_default()
}

fn parse_rev(rev: &str) -> (u64, String) {
    let (generation, hash) = rev.split_once('-').unwrap_or(("0", rev));
    (generation.parse().unwrap_or(0), hash.to_string())
}

fn previous_generation(state: &ServerState, db: &str, id: &str) -> u64 {
    state
        .dbs
        .get(db)
        .and_then(|db| db.docs.get(id))
        .and_then(StoredDoc::winner)
        .map_or(0, |doc| parse_rev(rev_of(doc)).0)
}

fn next_rev(state: &mut ServerState, previous: u64) -> String {
    state.rev_counter += 1;
    format!("{}-{:032x}", previous + 1, state.rev_counter)
}

/// Store `body` as a child of the current winner
fn store(state: &mut ServerState, db: &str, id: &str, body: Value) {
    let db = state.dbs.entry(db.to_string()).or_default();
    db.update_seq += 1;
    let seq = db.update_seq;
    let doc = db.docs.entry(id.to_string()).or_default();
    if let Some(parent) = doc.winner().map(|w| rev_of(w).to_string()) {
        doc.leaves.retain(|leaf| rev_of(leaf) != parent);
    }
    doc.known.insert(rev_of(&body).to_string());
    doc.leaves.push(body);
    doc.seq = seq;
}

/// Store a `new_edits:false` write, replacing the leaves on its ancestry path
fn store_replicated(state: &mut ServerState, db: &str, mut body: Value) {
    let Some(id) = body["_id"].as_str().map(str::to_string) else {
        return;
    };
    let rev = rev_of(&body).to_string();
    if rev.is_empty() {
        return;
    }

    let path: Vec<String> = match body.get("_revisions") {
        Some(revisions) => {
            let start = revisions["start"].as_u64().unwrap_or(0);
            revisions["ids"]
                .as_array()
                .map(|ids| {
                    ids.iter()
                        .enumerate()
                        .filter_map(|(i, hash)| {
                            Some(format!("{}-{}", start.checked_sub(i as u64)?, hash.as_str()?))
                        })
                        .collect()
                })
                .unwrap_or_default()
        }
        None => vec![rev.clone()],
    };
    if let Some(fields) = body.as_object_mut() {
        fields.remove("_revisions");
    }

    let db = state.dbs.entry(db.to_string()).or_default();
    let doc = db.docs.entry(id).or_default();
    if doc.known.contains(&rev) {
        return;
    }
    doc.leaves.retain(|leaf| !path.iter().any(|ancestor| ancestor == rev_of(leaf)));
    doc.leaves.push(body);
    doc.known.insert(rev);
    doc.known.extend(path);
    db.update_seq += 1;
    doc.seq = db.update_seq;
}
