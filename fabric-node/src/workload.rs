use serde_json::{json, Map, Value};

/// Opaque task workloads, keyed by task `type`. Per spec.md §1 the actual
/// numeric workloads (e.g. linear regression) are explicitly out of
/// scope — these stand in for that pluggable interface and exist for
/// demonstrability and testing, not as the workload the spec describes.
/// Unrecognized types fall back to a descriptive message rather than an
/// error, mirroring the original's `_ejecutar_tarea_local` fallback
/// branch. `"crash"` deliberately returns `Err` so the orchestrator's
/// local-failure/failover path (spec.md §8 scenario 6) is exercisable
/// without relying on a real workload misbehaving.
pub fn execute(task_type: &str, payload: &Map<String, Value>) -> Result<Value, String> {
    match task_type {
        "echo" => Ok(json!({ "echo": payload.get("message").cloned().unwrap_or(Value::Null) })),
        "sleep" => Ok(json!({ "slept_ms": payload.get("ms").and_then(Value::as_u64).unwrap_or(0) })),
        "crash" => Err("simulated workload crash".to_string()),
        other => Ok(json!({ "mensaje": format!("unrecognized task type: {other}") })),
    }
}
