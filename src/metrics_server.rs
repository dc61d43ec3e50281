//! Prometheus scrape endpoint: a small `hyper` server spawned alongside the
//! pipelines.

use std::{convert::Infallible, net::SocketAddr};

use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server,
};
use prometheus::{Encoder, TextEncoder};
use tracing::info;

async fn serve(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).expect("prometheus encoding cannot fail");
    Ok(Response::new(Body::from(buffer)))
}

/// Runs the metrics server until the process exits. Intended to be spawned
/// as its own task; a bind failure is the only error path.
pub async fn run(address: SocketAddr) -> anyhow::Result<()> {
    let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(serve)) });
    info!(%address, "prometheus metrics endpoint listening");
    Server::bind(&address).serve(make_svc).await?;
    Ok(())
}
