use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener};

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::*;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;
use crate::metrics;

pub const METRICS_PATH: &str = "/metrics";

/// Serves the registry for scraping.
#[derive(Debug)]
pub struct MetricsServer {
    listener: TcpListener,
    registry: Registry,
}

impl MetricsServer {
    pub fn bind(addr: SocketAddr, registry: Registry) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .and_then(|l| l.set_nonblocking(true).map(|_| l))
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` is cancelled, then drains open connections.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let registry = self.registry;
        let make_svc = make_service_fn(move |_| {
            let registry = registry.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle(req, registry.clone())))
            }
        });

        if let Ok(addr) = self.listener.local_addr() {
            info!("Beginning to serve on {addr}");
        }

        Server::from_tcp(self.listener)?
            .serve(make_svc)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        Ok(())
    }
}

async fn handle(req: Request<Body>, registry: Registry) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET || req.uri().path() != METRICS_PATH {
        return Ok(status(StatusCode::NOT_FOUND));
    }

    match metrics::encode(&registry) {
        Ok(body) => {
            let mut resp = Response::new(Body::from(body));
            resp.headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT));
            Ok(resp)
        }
        Err(err) => {
            error!("Encoding metrics: {err}");
            Ok(status(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

fn status(code: StatusCode) -> Response<Body> {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = code;
    resp
}
