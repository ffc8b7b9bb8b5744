use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use http_body_util::Full;
use hyper::{
    body::{Bytes, Incoming},
    header::CONTENT_TYPE,
    server::conn::http1,
    service::service_fn,
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;

/// What the metrics server exposes.
pub(crate) struct ServerState {
    pub registry: Registry,
    /// Set once the controllers are running.
    pub ready: Arc<AtomicBool>,
}

fn status(code: StatusCode) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    Response::builder().status(code).body(Full::default())
}

fn serve_req(path: &str, state: &ServerState) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    match path {
        "/metrics" => {
            let encoder = TextEncoder::new();
            let metric_families = state.registry.gather();
            let mut result = Vec::new();
            match encoder.encode(&metric_families, &mut result) {
                Ok(_) => Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, encoder.format_type())
                    .body(Full::new(Bytes::from(result))),
                Err(e) => {
                    error!("failed to encode metrics: {}", e);
                    status(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        }
        "/healthz" => status(StatusCode::OK),
        "/readyz" if state.ready.load(Ordering::Relaxed) => status(StatusCode::OK),
        "/readyz" => status(StatusCode::SERVICE_UNAVAILABLE),
        _ => status(StatusCode::NOT_FOUND),
    }
}

/// Serve `/metrics`, `/healthz` and `/readyz` on `addr` until an accept fails.
pub(crate) async fn start_prometheus_metrics_server(
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("listening on http://{}", addr);
    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { serve_req(req.uri().path(), &state) }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("metrics connection failed: {}", e);
            }
        });
    }
}
