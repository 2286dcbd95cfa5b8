//! HTTP admin endpoint exposing `/ready`. Not part of the gRPC front end:
//! a separate plaintext `hyper` listener, the way the teacher keeps its
//! admission/health surface off the main RPC port.

use futures::future;
use hyper::{Body, Request, Response};
use parking_lot::Mutex;
use prometheus_client::registry::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

pub async fn serve(
    addr: SocketAddr,
    ready: watch::Receiver<bool>,
    registry: Arc<Mutex<Registry>>,
) -> Result<(), hyper::Error> {
    let server =
        hyper::server::Server::bind(&addr).serve(hyper::service::make_service_fn(move |_conn| {
            let ready = ready.clone();
            let registry = registry.clone();
            future::ok::<_, hyper::Error>(hyper::service::service_fn(
                move |req: Request<Body>| match req.uri().path() {
                    "/ready" => future::ok(handle_ready(&ready, req)),
                    "/metrics" => future::ok(handle_metrics(&registry)),
                    _ => future::ok::<_, hyper::Error>(
                        Response::builder()
                            .status(hyper::StatusCode::NOT_FOUND)
                            .body(Body::default())
                            .unwrap(),
                    ),
                },
            ))
        }));
    let addr = server.local_addr();
    info!(%addr, "admin server listening");
    server.await
}

fn handle_metrics(registry: &Mutex<Registry>) -> Response<Body> {
    let mut buf = String::new();
    match prometheus_client::encoding::text::encode(&mut buf, &registry.lock()) {
        Ok(()) => Response::builder()
            .status(hyper::StatusCode::OK)
            .header(
                hyper::header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )
            .body(buf.into())
            .unwrap(),
        Err(e) => Response::builder()
            .status(hyper::StatusCode::INTERNAL_SERVER_ERROR)
            .body(e.to_string().into())
            .unwrap(),
    }
}

fn handle_ready(ready: &watch::Receiver<bool>, req: Request<Body>) -> Response<Body> {
    match *req.method() {
        hyper::Method::GET | hyper::Method::HEAD => {
            if *ready.borrow() {
                Response::builder()
                    .status(hyper::StatusCode::OK)
                    .header(hyper::header::CONTENT_TYPE, "text/plain")
                    .body("ready\n".into())
                    .unwrap()
            } else {
                Response::builder()
                    .status(hyper::StatusCode::INTERNAL_SERVER_ERROR)
                    .header(hyper::header::CONTENT_TYPE, "text/plain")
                    .body("not ready\n".into())
                    .unwrap()
            }
        }
        _ => Response::builder()
            .status(hyper::StatusCode::METHOD_NOT_ALLOWED)
            .body(Body::default())
            .unwrap(),
    }
}
