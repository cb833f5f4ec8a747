use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fabric::discovery::LoadProvider;
use fabric::{Discovery, Kv, Metrics};
use serde_json::{Map, Value};

/// Reads the in-flight load counter without owning it, satisfying
/// `fabric::discovery::LoadProvider` (Design Note 2's capability
/// interface) so Discovery can embed live load in its announcements.
struct NodeLoadProvider {
    load: Arc<AtomicU64>,
}

impl LoadProvider for NodeLoadProvider {
    fn load(&self) -> f64 {
        self.load.load(Ordering::SeqCst) as f64
    }

    fn metrics(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("carga".to_string(), Value::from(self.load()));
        map
    }
}

/// Everything owned by a running node: identity, the in-flight load
/// counter, and the four `fabric` components. Constructed once in `main`
/// and shared across Axum handlers via `State`. Supersedes the Python
/// original's process-global `kv`/`desc`/`metricas`/`_carga` module
/// variables (Design Note 1).
pub struct Node {
    pub name: String,
    pub url: String,
    pub kv: Kv,
    pub discovery: Arc<Discovery>,
    pub metrics: Arc<Metrics>,
    pub http: reqwest::Client,
    load: Arc<AtomicU64>,
}

/// RAII guard decrementing the in-flight load counter on every exit path,
/// including unwinding panics, mirroring the original's `try/finally`
/// around `_ejecutar_tarea_local`.
pub struct LoadGuard {
    load: Arc<AtomicU64>,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.load.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        discovery_group: Ipv4Addr,
        discovery_port: u16,
    ) -> Arc<Self> {
        let name = name.into();
        let url = url.into();
        let load = Arc::new(AtomicU64::new(0));
        let metrics = Arc::new(Metrics::new());
        let http = reqwest::Client::new();

        let announce_interval = Duration::from_millis(1500);
        let discovery = Discovery::new(
            discovery_group,
            discovery_port,
            name.clone(),
            url.clone(),
            Arc::new(NodeLoadProvider {
                load: Arc::clone(&load),
            }),
            announce_interval,
            announce_interval * 3, // default timeout ~3x interval, see spec §4.1
        );

        Arc::new(Self {
            name,
            url,
            kv: Kv::new(),
            discovery,
            metrics,
            http,
            load,
        })
    }

    /// Current in-flight task count, used as the scheduler's load signal.
    pub fn current_load(&self) -> f64 {
        self.load.load(Ordering::SeqCst) as f64
    }

    /// Marks entry into local task execution; load is decremented when
    /// the returned guard drops.
    pub fn enter_execution(&self) -> LoadGuard {
        self.load.fetch_add(1, Ordering::SeqCst);
        LoadGuard {
            load: Arc::clone(&self.load),
        }
    }

    pub fn start_discovery(&self) {
        self.discovery.start();
    }

    /// Push the current KV snapshot to every known neighbor.
    pub fn gossip_kv(&self) {
        let peer_urls: Vec<String> = self
            .discovery
            .neighbors_with_metrics()
            .into_iter()
            .map(|n| n.url)
            .collect();
        self.kv
            .gossip(&self.url, peer_urls, self.http.clone(), Arc::clone(&self.metrics));
    }
}
