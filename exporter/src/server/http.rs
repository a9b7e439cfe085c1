//! Admin HTTP server for health checks and metrics

use crate::metrics;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use igpu_gatherer::GathererState;
use prometheus::Registry;
use std::net::{SocketAddr, TcpListener};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Bind `addr` and serve /healthz, /readyz and /metrics until `cancel` fires.
pub async fn serve_admin(
    addr: SocketAddr,
    registry: Registry,
    state: watch::Receiver<GathererState>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)?;
    serve_admin_on(listener, registry, state, cancel).await
}

/// Serve on an already bound listener
pub async fn serve_admin_on(
    listener: TcpListener,
    registry: Registry,
    state: watch::Receiver<GathererState>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;

    let make_svc = make_service_fn(move |_| {
        let registry = registry.clone();
        let state = state.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                let state = state.clone();
                async move { Ok::<_, hyper::Error>(handle(&req, &registry, &state)) }
            }))
        }
    });

    tracing::info!("Admin HTTP server listening on {}", addr);
    Server::from_tcp(listener)?
        .serve(make_svc)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    tracing::info!("Admin HTTP server stopped");
    Ok(())
}

fn text(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub fn handle(
    req: &Request<Body>,
    registry: &Registry,
    state: &watch::Receiver<GathererState>,
) -> Response<Body> {
    let path = req.uri().path();
    let response = match path {
        "/healthz" => text(StatusCode::OK, "ok\n"),

        "/readyz" => {
            let current = *state.borrow();
            if current == GathererState::Running {
                text(StatusCode::OK, "ready\n")
            } else {
                text(
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!("not ready: gatherer {}\n", current),
                )
            }
        }

        "/metrics" => match metrics::encode_metrics(registry) {
            Ok(body) => {
                let mut response = text(StatusCode::OK, body);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static(prometheus::TEXT_FORMAT),
                );
                response
            }
            Err(e) => {
                tracing::error!("Failed to encode metrics: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics\n")
            }
        },

        _ => text(StatusCode::NOT_FOUND, "not found\n"),
    };

    tracing::debug!(
        path = %path,
        status = %response.status().as_u16(),
        "admin http request"
    );
    response
}
