use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::metrics::Metrics;

/// A single versioned KV entry, grounded on `Libs/kv.py`'s `Registro` and
/// the richer `KVReplicado` ported per the "duplicated source files"
/// design note (`KVLocal` is the non-authoritative simpler duplicate and
/// is not ported).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub value: Value,
    pub version: u64,
}

/// Replicated, versioned key-value store with push-gossip merge.
///
/// A single lock guards the map. `snapshot` copies under the lock and
/// releases it before any I/O; `gossip` fires one outbound request per
/// neighbor without awaiting completion, so writers are never blocked on
/// network I/O.
pub struct Kv {
    data: Mutex<HashMap<String, Record>>,
}

impl Default for Kv {
    fn default() -> Self {
        Self::new()
    }
}

impl Kv {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let data = self.data.lock().expect("kv lock poisoned");
        data.get(key).map(|r| r.value.clone())
    }

    /// Local put. With no explicit version: `old_version + 1` (or 1 if
    /// absent). With an explicit version `v`: `max(old_version + 1, v)`.
    pub fn put(&self, key: &str, value: Value, version: Option<u64>) -> u64 {
        let mut data = self.data.lock().expect("kv lock poisoned");
        let new_version = match data.get(key) {
            None => version.unwrap_or(1),
            Some(existing) => match version {
                None => existing.version + 1,
                Some(v) => std::cmp::max(existing.version + 1, v),
            },
        };
        data.insert(
            key.to_string(),
            Record {
                value,
                version: new_version,
            },
        );
        new_version
    }

    /// Atomic, independent copy suitable for transmission.
    pub fn snapshot(&self) -> HashMap<String, Record> {
        let data = self.data.lock().expect("kv lock poisoned");
        data.clone()
    }

    /// Grow-only dominance merge: overwrite iff absent locally or
    /// `local_version < remote_version`. Equal versions keep the local
    /// value (no tie-break by value — see DESIGN.md's open question).
    pub fn merge(&self, remote: HashMap<String, Record>) {
        let mut data = self.data.lock().expect("kv lock poisoned");
        for (key, record) in remote {
            match data.get(&key) {
                None => {
                    data.insert(key, record);
                }
                Some(local) if local.version < record.version => {
                    data.insert(key, record);
                }
                _ => {}
            }
        }
    }

    /// Fire-and-forget push of a snapshot to every neighbor URL other than
    /// `self_url`. Each transmission runs as its own task; the caller does
    /// not await completion. Failures are logged and counted, never
    /// propagated.
    pub fn gossip(
        &self,
        self_url: &str,
        peer_urls: impl IntoIterator<Item = String>,
        http: reqwest::Client,
        metrics: Arc<Metrics>,
    ) {
        let snapshot = self.snapshot();
        for url in peer_urls {
            if url == self_url {
                continue;
            }
            let http = http.clone();
            let snapshot = snapshot.clone();
            let metrics = Arc::clone(&metrics);
            tokio::spawn(async move {
                let target = format!("{url}/kv/sync");
                let result = http
                    .post(&target)
                    .timeout(Duration::from_secs(2))
                    .json(&snapshot)
                    .send()
                    .await;
                match result {
                    Ok(resp) if resp.status().is_success() => {
                        debug!(%target, "kv gossip delivered");
                    }
                    Ok(resp) => {
                        warn!(%target, status = %resp.status(), "kv gossip rejected");
                        metrics.inc_one("kv_gossip_fallido");
                    }
                    Err(err) => {
                        warn!(%target, error = %err, "kv gossip failed");
                        metrics.inc_one("kv_gossip_fallido");
                    }
                }
            });
        }
    }
}
