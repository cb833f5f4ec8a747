use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// KV key under which submitted tasks are kept as an ordered list,
/// matching the original's well-known `"tareas"` key.
pub const TASKS_KEY: &str = "tareas";

pub const DEFAULT_MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Submitted,
    InExecution,
    Completed,
    Failed,
}

/// A task as submitted by a client and as tracked in the KV task list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: Map<String, Value>,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
}

fn default_status() -> TaskStatus {
    TaskStatus::Submitted
}

impl Task {
    /// The reserved `_retry` payload field, defaulting to 0.
    pub fn retry_count(&self) -> u32 {
        self.payload
            .get("_retry")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    }

    pub fn set_retry_count(&mut self, value: u32) {
        self.payload.insert("_retry".to_string(), Value::from(value));
    }

    /// The node URL that first accepted this task from a client. Per
    /// DESIGN.md's resolution of the "origin extraction" open question,
    /// this is stamped explicitly by the first-hop node rather than
    /// inferred from a peer socket address.
    pub fn origin(&self) -> Option<String> {
        self.payload
            .get("origin")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn set_origin(&mut self, origin: &str) {
        self.payload
            .entry("origin")
            .or_insert_with(|| Value::from(origin.to_string()));
    }

    pub fn to_kv_record(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "type": self.task_type,
            "payload": self.payload,
            "status": self.status,
        })
    }
}

/// A tagged inter-node message. `type` selects one of the known variants;
/// anything else falls back to `Unknown`, per Design Note 4's polymorphic
/// payload guidance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub source: String,
    pub destination: String,
    pub payload: Map<String, Value>,
    pub ts: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retry_count_defaults_to_zero() {
        let task = Task {
            id: "t1".into(),
            task_type: "echo".into(),
            payload: Map::new(),
            status: TaskStatus::Submitted,
        };
        assert_eq!(task.retry_count(), 0);
    }

    #[test]
    fn origin_is_stamped_once() {
        let mut payload = Map::new();
        payload.insert("origin".to_string(), json!("http://first:8100"));
        let mut task = Task {
            id: "t1".into(),
            task_type: "echo".into(),
            payload,
            status: TaskStatus::Submitted,
        };
        task.set_origin("http://other:8200");
        assert_eq!(task.origin().as_deref(), Some("http://first:8100"));
    }
}
