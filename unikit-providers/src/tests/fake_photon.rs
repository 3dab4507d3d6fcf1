//! A small in-process stand-in for the Photon REST API.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub const PROJECT: &str = "proj-1";

type Shared = Arc<Mutex<FakeState>>;
type Reply = (StatusCode, Json<Value>);

#[derive(Default)]
pub struct FakeState {
    pub images: Vec<String>,
    pub vms: BTreeMap<String, Value>,
    pub disks: BTreeMap<String, Value>,
    tasks: BTreeMap<String, Value>,
    next_id: u32,
    /// Operations (e.g. "start") whose tasks end in ERROR.
    pub failing: Vec<String>,
    pub requests: Vec<String>,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    /// Queues a task that reports `QUEUED` now and settles on the first poll.
    fn task(&mut self, operation: &str, entity: Option<&str>) -> Reply {
        let id = self.next_id("task");
        let state = if self.failing.iter().any(|f| f == operation) {
            "ERROR"
        } else {
            "COMPLETED"
        };
        let settled = json!({
            "id": id,
            "state": state,
            "entity": entity.map(|e| json!({ "id": e })),
            "errors": if state == "ERROR" {
                json!([{ "code": "InternalError", "message": format!("{operation} failed") }])
            } else {
                json!([])
            },
        });
        self.tasks.insert(id.clone(), settled);
        (StatusCode::OK, Json(json!({ "id": id, "state": "QUEUED" })))
    }
}

pub struct FakePhoton {
    pub endpoint: String,
    pub state: Shared,
}

impl FakePhoton {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let state = Arc::new(Mutex::new(FakeState::default()));

        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { endpoint, state }
    }

    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }
}

fn router(state: Shared) -> Router {
    Router::new()
        .route("/images", get(list_images).post(upload_image))
        .route("/images/{id}", delete(delete_image))
        .route("/projects/{project}/vms", get(list_vms).post(create_vm))
        .route("/vms/{id}", get(get_vm).delete(delete_vm))
        .route("/vms/{id}/{operation}", post(vm_operation))
        .route("/projects/{project}/disks", get(list_disks).post(create_disk))
        .route("/disks/{id}", delete(delete_disk))
        .route("/tasks/{id}", get(get_task))
        .fallback(|| async { not_found() })
        .layer(middleware::from_fn_with_state(state.clone(), record_request))
        .with_state(state)
}

async fn record_request(State(state): State<Shared>, request: Request, next: Next) -> Response {
    let line = format!("{} {}", request.method(), request.uri().path());
    state.lock().unwrap().requests.push(line);
    next.run(request).await
}

fn not_found() -> Reply {
    (StatusCode::NOT_FOUND, Json(json!({ "code": "NotFound" })))
}

/// Bodies are optional: lifecycle operations post nothing.
fn json_body(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

async fn list_images(State(state): State<Shared>) -> Reply {
    let state = state.lock().unwrap();
    let items: Vec<Value> = state.images.iter().map(|id| json!({ "id": id })).collect();
    (StatusCode::OK, Json(json!({ "items": items })))
}

async fn upload_image(State(state): State<Shared>, _upload: Bytes) -> Reply {
    let mut state = state.lock().unwrap();
    let id = state.next_id("img");
    state.images.push(id.clone());
    state.task("upload", Some(&id))
}

async fn delete_image(State(state): State<Shared>, Path(id): Path<String>) -> Reply {
    let mut state = state.lock().unwrap();
    if !state.images.contains(&id) {
        return not_found();
    }
    state.images.retain(|i| i != &id);
    state.task("delete_image", Some(&id))
}

async fn list_vms(State(state): State<Shared>, Path(project): Path<String>) -> Reply {
    if project != PROJECT {
        return not_found();
    }
    let state = state.lock().unwrap();
    let items: Vec<Value> = state.vms.values().cloned().collect();
    (StatusCode::OK, Json(json!({ "items": items })))
}

async fn create_vm(
    State(state): State<Shared>,
    Path(project): Path<String>,
    body: Bytes,
) -> Reply {
    if project != PROJECT {
        return not_found();
    }
    let body = json_body(&body);
    let mut state = state.lock().unwrap();
    let id = state.next_id("vm");
    state.vms.insert(
        id.clone(),
        json!({
            "id": id,
            "name": body["name"],
            "state": "STOPPED",
            "metadata": body["metadata"],
        }),
    );
    state.task("create_vm", Some(&id))
}

async fn get_vm(State(state): State<Shared>, Path(id): Path<String>) -> Reply {
    match state.lock().unwrap().vms.get(&id) {
        Some(vm) => (StatusCode::OK, Json(vm.clone())),
        None => not_found(),
    }
}

async fn delete_vm(State(state): State<Shared>, Path(id): Path<String>) -> Reply {
    let mut state = state.lock().unwrap();
    if state.vms.remove(&id).is_none() {
        return not_found();
    }
    state.task("delete_vm", Some(&id))
}

async fn vm_operation(
    State(state): State<Shared>,
    Path((id, operation)): Path<(String, String)>,
    body: Bytes,
) -> Reply {
    let body = json_body(&body);
    let mut state = state.lock().unwrap();
    if !state.vms.contains_key(&id) {
        return not_found();
    }
    if !state.failing.contains(&operation) {
        apply_vm_operation(&mut state, &id, &operation, &body);
    }
    state.task(&operation, Some(&id))
}

async fn list_disks(State(state): State<Shared>, Path(project): Path<String>) -> Reply {
    if project != PROJECT {
        return not_found();
    }
    let state = state.lock().unwrap();
    let items: Vec<Value> = state.disks.values().cloned().collect();
    (StatusCode::OK, Json(json!({ "items": items })))
}

async fn create_disk(
    State(state): State<Shared>,
    Path(project): Path<String>,
    body: Bytes,
) -> Reply {
    if project != PROJECT {
        return not_found();
    }
    let body = json_body(&body);
    let mut state = state.lock().unwrap();
    let id = state.next_id("disk");
    state.disks.insert(
        id.clone(),
        json!({
            "id": id,
            "name": body["name"],
            "kind": body["kind"],
            "capacityGb": body["capacityGb"],
            "vms": [],
        }),
    );
    state.task("create_disk", Some(&id))
}

async fn delete_disk(State(state): State<Shared>, Path(id): Path<String>) -> Reply {
    let mut state = state.lock().unwrap();
    if state.disks.remove(&id).is_none() {
        return not_found();
    }
    state.task("delete_disk", Some(&id))
}

async fn get_task(State(state): State<Shared>, Path(id): Path<String>) -> Reply {
    match state.lock().unwrap().tasks.get(&id) {
        Some(task) => (StatusCode::OK, Json(task.clone())),
        None => not_found(),
    }
}

fn apply_vm_operation(state: &mut FakeState, vm_id: &str, operation: &str, body: &Value) {
    let Some(vm) = state.vms.get_mut(vm_id) else {
        return;
    };
    match operation {
        "start" => vm["state"] = json!("STARTED"),
        "stop" => vm["state"] = json!("STOPPED"),
        "set_metadata" => vm["metadata"] = body["metadata"].clone(),
        "attach_disk" => {
            if let Some(disk) = body["diskId"].as_str().and_then(|d| state.disks.get_mut(d)) {
                disk["vms"] = json!([vm_id]);
            }
        }
        "detach_disk" => {
            if let Some(disk) = body["diskId"].as_str().and_then(|d| state.disks.get_mut(d)) {
                disk["vms"] = json!([]);
            }
        }
        _ => {}
    }
}
