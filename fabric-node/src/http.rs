use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fabric::kv::Record;
use fabric::task::Task;
use fabric::Message;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::node::Node;
use crate::orchestrator;

pub fn router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/estado", get(estado))
        .route("/metrics", get(metrics))
        .route("/tareas", post(submit_task))
        .route("/tareas/ejecutar", post(execute_task))
        .route("/resultados", post(recibir_resultado))
        .route("/mensajes", post(recibir_mensaje))
        .route("/kv/sync", post(kv_sync))
        .route("/kv/estado_completo", get(kv_estado_completo))
        .with_state(node)
}

async fn estado(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(json!({
        "name": node.name,
        "url": node.url,
        "load": node.current_load(),
    }))
}

async fn metrics(State(node): State<Arc<Node>>) -> Response {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        node.metrics.export_text(),
    )
        .into_response()
}

async fn submit_task(State(node): State<Arc<Node>>, Json(task): Json<Task>) -> impl IntoResponse {
    let version = orchestrator::submit_task(&node, task);
    Json(json!({ "ok": true, "version": version }))
}

async fn execute_task(State(node): State<Arc<Node>>, Json(task): Json<Task>) -> impl IntoResponse {
    Json(orchestrator::execute_task(&node, task).await)
}

#[derive(Debug, Deserialize)]
struct Resultado {
    task_id: String,
    status: String,
    #[serde(default)]
    detail: Value,
}

async fn recibir_resultado(State(node): State<Arc<Node>>, Json(res): Json<Resultado>) -> impl IntoResponse {
    node.metrics.inc_one("resultados_recibidos");
    info!(task_id = %res.task_id, status = %res.status, "result received for task");
    Json(json!({ "ok": true }))
}

async fn recibir_mensaje(State(node): State<Arc<Node>>, Json(message): Json<Message>) -> impl IntoResponse {
    if message.destination != node.name {
        return Json(json!({ "ok": false, "reason": "wrong destination" }));
    }
    match message.message_type.as_str() {
        "ping" => Json(json!({ "ok": true, "response": "pong" })),
        "gradient" => {
            node.kv.put(&format!("gradiente_{}", message.id), json!(message.payload), None);
            Json(json!({ "ok": true }))
        }
        other => {
            let _ = other;
            Json(json!({ "ok": false, "reason": "unsupported type" }))
        }
    }
}

async fn kv_sync(State(node): State<Arc<Node>>, Json(remote): Json<std::collections::HashMap<String, Record>>) -> impl IntoResponse {
    node.kv.merge(remote);
    (StatusCode::OK, Json(json!({ "ok": true })))
}

async fn kv_estado_completo(State(node): State<Arc<Node>>) -> impl IntoResponse {
    Json(node.kv.snapshot())
}
