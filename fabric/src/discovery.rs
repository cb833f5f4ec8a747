use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Injected at construction in place of the Python original's
/// `obtener_metricas_fn` closure (Design Note 2).
pub trait LoadProvider: Send + Sync {
    fn load(&self) -> f64;
    fn metrics(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// A neighbor as observed via a recent multicast announcement.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub name: String,
    pub url: String,
    pub last_heartbeat: f64,
    pub metrics: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Announcement {
    name: String,
    url: String,
    ts: f64,
    #[serde(flatten)]
    metrics: Map<String, Value>,
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Multicast-based peer discovery: an announcer that periodically
/// broadcasts self-announcements, and a listener that maintains a
/// timeout-purged neighbor table. Grounded on `Libs/descubrimiento.py`'s
/// `Descubridor` (the richer, metrics-carrying variant).
pub struct Discovery {
    group: Ipv4Addr,
    port: u16,
    name: String,
    url: String,
    interval: Duration,
    timeout: Duration,
    load_provider: Arc<dyn LoadProvider>,
    neighbors: Mutex<HashMap<String, Neighbor>>,
    stop: Arc<AtomicBool>,
}

impl Discovery {
    pub fn new(
        group: Ipv4Addr,
        port: u16,
        name: impl Into<String>,
        url: impl Into<String>,
        load_provider: Arc<dyn LoadProvider>,
        interval: Duration,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            group,
            port,
            name: name.into(),
            url: url.into(),
            interval,
            timeout,
            load_provider,
            neighbors: Mutex::new(HashMap::new()),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Atomic snapshot of the neighbor table.
    pub fn neighbors_with_metrics(&self) -> Vec<Neighbor> {
        let neighbors = self.neighbors.lock().expect("neighbor lock poisoned");
        neighbors.values().cloned().collect()
    }

    /// Test/recovery hook: directly insert or refresh a neighbor entry,
    /// bypassing the socket (used by discovery-injection tests and by a
    /// future active-probe loop that learns a peer out of band).
    pub fn upsert_neighbor(&self, neighbor: Neighbor) {
        let mut neighbors = self.neighbors.lock().expect("neighbor lock poisoned");
        neighbors.insert(neighbor.name.clone(), neighbor);
    }

    fn purge_expired(&self) {
        let now = now_secs();
        let timeout = self.timeout.as_secs_f64();
        let mut neighbors = self.neighbors.lock().expect("neighbor lock poisoned");
        neighbors.retain(|_, n| now - n.last_heartbeat <= timeout);
    }

    /// Starts the announcer and listener loops. Returns their join handles
    /// so callers can await graceful shutdown after calling `stop`.
    pub fn start(self: &Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let announcer = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_announcer().await })
        };
        let listener = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.run_listener().await })
        };
        (announcer, listener)
    }

    async fn run_announcer(&self) {
        let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
            Ok(s) => s,
            Err(err) => {
                warn!(error = %err, "discovery announcer failed to bind socket");
                return;
            }
        };
        if let Err(err) = socket.set_multicast_ttl_v4(1) {
            warn!(error = %err, "failed to set multicast ttl, continuing best-effort");
        }
        let target: SocketAddr = (self.group, self.port).into();

        while !self.stop.load(Ordering::SeqCst) {
            let announcement = Announcement {
                name: self.name.clone(),
                url: self.url.clone(),
                ts: now_secs(),
                metrics: self.load_provider.metrics(),
            };
            match serde_json::to_vec(&announcement) {
                Ok(bytes) => {
                    if let Err(err) = socket.send_to(&bytes, target).await {
                        debug!(error = %err, "discovery announcement send failed, ignoring");
                    }
                }
                Err(err) => debug!(error = %err, "failed to serialize announcement"),
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    async fn run_listener(&self) {
        let socket = match self.bind_listener().await {
            Ok(s) => s,
            Err(err) => {
                warn!(error = %err, "discovery listener failed to bind, retrying in 1s");
                tokio::time::sleep(Duration::from_secs(1)).await;
                return;
            }
        };
        let mut buf = [0u8; 4096];

        while !self.stop.load(Ordering::SeqCst) {
            let recv = tokio::time::timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await;
            match recv {
                Ok(Ok((len, _src))) => self.handle_datagram(&buf[..len]),
                Ok(Err(err)) => {
                    warn!(error = %err, "discovery listener recv error, backing off 1s");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(_timeout) => {}
            }
            self.purge_expired();
        }
    }

    async fn bind_listener(&self) -> std::io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, None)?;
        socket.set_reuse_address(true)?;
        let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, self.port).into();
        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;
        let std_socket: std::net::UdpSocket = socket.into();
        std_socket.join_multicast_v4(&self.group, &Ipv4Addr::UNSPECIFIED)?;
        UdpSocket::from_std(std_socket)
    }

    fn handle_datagram(&self, data: &[u8]) {
        let parsed: Result<Announcement, _> = serde_json::from_slice(data);
        let announcement = match parsed {
            Ok(a) => a,
            Err(err) => {
                debug!(error = %err, "dropping malformed discovery datagram");
                return;
            }
        };
        if announcement.name.is_empty() || announcement.name == self.name || announcement.url.is_empty() {
            return;
        }
        self.upsert_neighbor(Neighbor {
            name: announcement.name,
            url: announcement.url,
            last_heartbeat: announcement.ts,
            metrics: announcement.metrics,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLoad(f64);
    impl LoadProvider for FixedLoad {
        fn load(&self) -> f64 {
            self.0
        }
    }

    fn discovery() -> Arc<Discovery> {
        Discovery::new(
            Ipv4Addr::new(239, 10, 10, 10),
            50000,
            "yo",
            "http://yo:8000",
            Arc::new(FixedLoad(0.0)),
            Duration::from_millis(1500),
            Duration::from_secs(6),
        )
    }

    #[test]
    fn upsert_and_snapshot_round_trip() {
        let d = discovery();
        let mut metrics = Map::new();
        metrics.insert("carga".to_string(), Value::from(0.4));
        d.upsert_neighbor(Neighbor {
            name: "otro".to_string(),
            url: "http://otro:8000".to_string(),
            last_heartbeat: now_secs(),
            metrics,
        });
        let neighbors = d.neighbors_with_metrics();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].metrics.get("carga"), Some(&Value::from(0.4)));
    }

    #[test]
    fn ignores_self_announcement() {
        let d = discovery();
        let announcement = Announcement {
            name: "yo".to_string(),
            url: "http://yo:8000".to_string(),
            ts: now_secs(),
            metrics: Map::new(),
        };
        d.handle_datagram(&serde_json::to_vec(&announcement).unwrap());
        assert!(d.neighbors_with_metrics().is_empty());
    }

    #[test]
    fn rejects_missing_or_empty_fields() {
        let d = discovery();
        d.handle_datagram(br#"{"name": "", "url": "http://x:1", "ts": 1.0}"#);
        assert!(d.neighbors_with_metrics().is_empty());

        d.handle_datagram(br#"{"name": "x", "url": "", "ts": 1.0}"#);
        assert!(d.neighbors_with_metrics().is_empty());

        d.handle_datagram(br#"not json at all"#);
        assert!(d.neighbors_with_metrics().is_empty());
    }

    #[test]
    fn purges_entries_older_than_timeout() {
        let d = discovery();
        d.upsert_neighbor(Neighbor {
            name: "stale".to_string(),
            url: "http://stale:1".to_string(),
            last_heartbeat: now_secs() - 100.0,
            metrics: Map::new(),
        });
        d.purge_expired();
        assert!(d.neighbors_with_metrics().is_empty());
    }
}
