use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::node::Node;

/// Optional active neighbor probing (spec.md §5: "neighbor-monitor loop
/// (optional active probing)"), grounded on the original's
/// `monitorear_vecinos`. Every 2s, GETs each neighbor's `/estado` with a
/// 1s timeout purely to track a failure counter; a failing probe never
/// removes the neighbor from the table — only Discovery's heartbeat
/// timeout does that — so this loop cannot affect scheduling decisions
/// directly, only metrics.
pub async fn run(node: Arc<Node>) {
    let mut interval = tokio::time::interval(Duration::from_secs(2));
    loop {
        interval.tick().await;
        for neighbor in node.discovery.neighbors_with_metrics() {
            if neighbor.url == node.url {
                continue;
            }
            let http = node.http.clone();
            let metrics = node.metrics.clone();
            let target = format!("{}/estado", neighbor.url);
            tokio::spawn(async move {
                let result = http.get(&target).timeout(Duration::from_secs(1)).send().await;
                match result {
                    Ok(resp) if resp.status().is_success() => {
                        debug!(%target, "neighbor probe ok");
                    }
                    _ => {
                        metrics.inc_one("sondeos_fallidos");
                    }
                }
            });
        }
    }
}
