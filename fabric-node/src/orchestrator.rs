use std::time::Duration;

use fabric::scheduler::{choose_executor, Candidate, Decision};
use fabric::task::{Task, TaskStatus, TASKS_KEY};
use rand::seq::IndexedRandom;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::node::Node;
use crate::workload;

/// Bound on forwarding hops before a task is terminally failed, per
/// spec.md §4.4.
pub const MAX_RETRIES: u32 = fabric::task::DEFAULT_MAX_RETRIES;

/// Appends a freshly-submitted task to the `"tareas"` KV list with status
/// `Submitted`, then gossips. This is the `/tareas` edge, distinct from
/// the `/tareas/ejecutar` orchestrator edge below.
pub fn submit_task(node: &Node, mut task: Task) -> u64 {
    node.metrics.inc_one("tareas_recibidas");
    task.status = TaskStatus::Submitted;
    // First-hop stamp: resolves spec's "origin extraction" open question
    // by making the first node to see a task via /tareas the origin,
    // rather than inferring it later from a peer socket address.
    task.set_origin(&node.url);

    let mut list = read_task_list(node);
    list.push(task.to_kv_record());
    let version = node.kv.put(TASKS_KEY, json!(list), None);
    node.gossip_kv();
    version
}

fn read_task_list(node: &Node) -> Vec<Value> {
    node.kv
        .get(TASKS_KEY)
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

fn update_task_status(node: &Node, task_id: &str, status: TaskStatus) {
    let mut list = read_task_list(node);
    for entry in list.iter_mut() {
        if entry.get("id").and_then(Value::as_str) == Some(task_id) {
            if let Some(obj) = entry.as_object_mut() {
                obj.insert("status".to_string(), json!(status));
            }
        }
    }
    node.kv.put(TASKS_KEY, json!(list), None);
    node.gossip_kv();
}

async fn notify_origin(node: &Node, origin: &str, task_id: &str, status: &str, detail: Value) {
    if origin == node.url {
        return;
    }
    node.metrics.inc_one("resultados_enviados");
    let body = json!({ "task_id": task_id, "status": status, "detail": detail });
    let result = node
        .http
        .post(format!("{origin}/resultados"))
        .timeout(Duration::from_secs(2))
        .json(&body)
        .send()
        .await;
    if let Err(err) = result {
        warn!(%origin, error = %err, "failed to notify origin, swallowing");
        node.metrics.inc_one("notificaciones_fallidas");
    }
}

fn random_peer_except(neighbors: &[Candidate], exclude_url: &str) -> Option<String> {
    let candidates: Vec<&Candidate> = neighbors.iter().filter(|c| c.url != exclude_url).collect();
    candidates.choose(&mut rand::rng()).map(|c| c.url.clone())
}

fn neighbor_candidates(node: &Node) -> Vec<Candidate> {
    node.discovery
        .neighbors_with_metrics()
        .into_iter()
        .map(|n| Candidate {
            name: n.name,
            url: n.url,
            load: n.metrics.get("carga").and_then(Value::as_f64).unwrap_or(0.0),
        })
        .collect()
}

async fn forward(node: &Node, target: &str, task: &Task) -> Result<Value, String> {
    let response = node
        .http
        .post(format!("{target}/tareas/ejecutar"))
        .timeout(Duration::from_secs(10))
        .json(task)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if response.status().is_success() {
        response.json::<Value>().await.map_err(|e| e.to_string())
    } else {
        Err(format!("peer rejected task with status {}", response.status()))
    }
}

/// The `/tareas/ejecutar` orchestrator edge: the task execution state
/// machine from spec.md §4.4. Executes exactly one hop of the diagram —
/// a retry step forwards into another hop on a different node — and
/// returns the JSON body to send back to the caller (a successful
/// forward's response is passed through verbatim; every other branch
/// constructs its own terminal/retry body).
pub async fn execute_task(node: &Node, mut task: Task) -> Value {
    let retry = task.retry_count();
    let origin = task.origin().unwrap_or_else(|| node.url.clone());
    task.set_origin(&origin);

    if retry > MAX_RETRIES {
        node.metrics.inc_one("tareas_fallidas");
        notify_origin(node, &origin, &task.id, "FAILED", json!({ "error": "retry limit" })).await;
        return json!({ "status": "FAILED", "error": "retry limit" });
    }

    let neighbors = neighbor_candidates(node);
    let self_candidate = Candidate {
        name: node.name.clone(),
        url: node.url.clone(),
        load: node.current_load(),
    };
    let decision = choose_executor(self_candidate, &neighbors);

    match decision {
        Decision::SelfNode => execute_locally(node, task, retry, &origin, &neighbors).await,
        Decision::Peer(peer_url) => forward_to_peer(node, task, retry, &origin, &peer_url, &neighbors).await,
        Decision::None => {
            node.metrics.inc_one("tareas_fallidas");
            json!({ "status": "FAILED", "error": "no executor available" })
        }
    }
}

async fn execute_locally(node: &Node, mut task: Task, retry: u32, origin: &str, neighbors: &[Candidate]) -> Value {
    update_task_status(node, &task.id, TaskStatus::InExecution);
    let guard = node.enter_execution();
    let start = std::time::Instant::now();
    let result = workload::execute(&task.task_type, &task.payload);
    node.metrics.observe("duracion_ms", start.elapsed().as_millis() as f64);
    drop(guard);

    match result {
        Ok(value) => {
            update_task_status(node, &task.id, TaskStatus::Completed);
            info!(task_id = %task.id, "task completed locally");
            notify_origin(node, origin, &task.id, "COMPLETED", value.clone()).await;
            json!({ "status": "COMPLETED", "result": value })
        }
        Err(err) => {
            warn!(task_id = %task.id, error = %err, "local execution failed, attempting failover");
            node.metrics.inc_one("tareas_fallidas");
            task.set_retry_count(retry + 1);
            match random_peer_except(neighbors, &node.url) {
                Some(fallback) => {
                    let http = node.http.clone();
                    let fallback_url = fallback.clone();
                    let retried = task.clone();
                    // Fire-and-forget: the response to the *current* caller
                    // is this node's own REFORWARDED_ON_ERROR ack, not the
                    // fallback's eventual result (that goes to `origin` via
                    // notify_origin once the fallback finishes).
                    tokio::spawn(async move {
                        let _ = http
                            .post(format!("{fallback_url}/tareas/ejecutar"))
                            .timeout(Duration::from_secs(10))
                            .json(&retried)
                            .send()
                            .await;
                    });
                    update_task_status(node, &task.id, TaskStatus::Submitted);
                    json!({ "status": "REFORWARDED_ON_ERROR", "to": fallback })
                }
                None => {
                    update_task_status(node, &task.id, TaskStatus::Failed);
                    notify_origin(
                        node,
                        origin,
                        &task.id,
                        "FAILED",
                        json!({ "error": "no alternative nodes" }),
                    )
                    .await;
                    json!({ "status": "FAILED", "error": "no alternative nodes" })
                }
            }
        }
    }
}

async fn forward_to_peer(
    node: &Node,
    mut task: Task,
    retry: u32,
    origin: &str,
    peer_url: &str,
    neighbors: &[Candidate],
) -> Value {
    update_task_status(node, &task.id, TaskStatus::InExecution);
    match forward(node, peer_url, &task).await {
        Ok(response) => response,
        Err(err) => {
            warn!(%peer_url, error = %err, "forward failed, attempting fallback");
            node.metrics.inc_one("tareas_fallidas");
            task.set_retry_count(retry + 1);
            match random_peer_except(neighbors, peer_url) {
                Some(fallback) => match forward(node, &fallback, &task).await {
                    Ok(_) => json!({ "status": "REFORWARDED_ON_FAILURE", "to": fallback }),
                    Err(_) => {
                        notify_origin(
                            node,
                            origin,
                            &task.id,
                            "FAILED",
                            json!({ "error": "all nodes failed" }),
                        )
                        .await;
                        json!({ "status": "FAILED", "error": "fallback forward also failed" })
                    }
                },
                None => {
                    notify_origin(
                        node,
                        origin,
                        &task.id,
                        "FAILED",
                        json!({ "error": "no nodes available" }),
                    )
                    .await;
                    json!({ "status": "FAILED", "error": "no alternative nodes" })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric::discovery::Neighbor;
    use serde_json::Map;
    use std::net::Ipv4Addr;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn now_secs() -> f64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs_f64()
    }

    fn test_node(name: &str, port: u16) -> std::sync::Arc<Node> {
        Node::new(name, format!("http://{name}:{port}"), Ipv4Addr::new(239, 10, 10, 10), 0)
    }

    fn task(id: &str, task_type: &str) -> Task {
        Task {
            id: id.to_string(),
            task_type: task_type.to_string(),
            payload: Map::new(),
            status: TaskStatus::Submitted,
        }
    }

    #[tokio::test]
    async fn retry_exhaustion_returns_failed() {
        let node = test_node("solo", 8100);
        let mut t = task("t1", "echo");
        t.set_retry_count(MAX_RETRIES + 1);

        let response = execute_task(&node, t).await;
        assert_eq!(response["status"], json!("FAILED"));
        assert_eq!(response["error"], json!("retry limit"));
    }

    #[tokio::test]
    async fn self_node_executes_and_completes() {
        let node = test_node("solo", 8101);
        let response = execute_task(&node, task("t2", "echo")).await;
        assert_eq!(response["status"], json!("COMPLETED"));
    }

    #[tokio::test]
    async fn local_crash_reforwards_with_incremented_retry() {
        let node = test_node("local", 8102);
        node.discovery.upsert_neighbor(Neighbor {
            name: "peer1".to_string(),
            url: "http://peer1:9101".to_string(),
            last_heartbeat: now_secs(),
            metrics: Default::default(),
        });
        node.discovery.upsert_neighbor(Neighbor {
            name: "peer2".to_string(),
            url: "http://peer2:9102".to_string(),
            last_heartbeat: now_secs(),
            metrics: Default::default(),
        });

        let response = execute_task(&node, task("t3", "crash")).await;
        assert_eq!(response["status"], json!("REFORWARDED_ON_ERROR"));
        let to = response["to"].as_str().unwrap();
        assert!(to == "http://peer1:9101" || to == "http://peer2:9102");
    }

    #[tokio::test]
    async fn crash_with_no_alternative_nodes_fails_terminally() {
        let node = test_node("alone", 8103);
        let response = execute_task(&node, task("t4", "crash")).await;
        assert_eq!(response["status"], json!("FAILED"));
    }
}
