mod http;
mod node;
mod orchestrator;
mod probe;
mod workload;

use std::net::Ipv4Addr;

use node::Node;
use tracing::{error, info};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Config is read straight from the environment — per spec.md's
    // "CLI bootstrap and environment parsing" non-goal, there is no
    // clap/figment layer here, just the four documented variables with
    // defaults.
    let name = env_or("NOMBRE", "nodo");
    let port: u16 = env_or("PUERTO", "8100").parse().unwrap_or(8100);
    let group: Ipv4Addr = env_or("DESCUBRIMIENTO_GRUPO", "239.10.10.10")
        .parse()
        .unwrap_or(Ipv4Addr::new(239, 10, 10, 10));
    let discovery_port: u16 = env_or("DESCUBRIMIENTO_PUERTO", "50000").parse().unwrap_or(50000);
    let url = format!("http://{name}:{port}");

    let node = Node::new(name.clone(), url.clone(), group, discovery_port);
    node.start_discovery();
    tokio::spawn(probe::run(node.clone()));

    info!(%name, %url, "node starting");

    let app = http::router(node.clone());
    let addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(%addr, error = %err, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };

    let shutdown_node = node.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            shutdown_node.discovery.stop();
        })
        .await?;

    Ok(())
}
