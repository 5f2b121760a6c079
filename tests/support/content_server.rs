//! Local HTTP server serving canned content payloads for client tests.

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const OK_BODY: &[u8] = b"payload-bytes";
pub const FLAKY_BODY: &[u8] = b"flaky-ok";
/// 500s served before `/flaky` starts succeeding.
pub const FLAKY_FAILURES: usize = 2;

#[derive(Default)]
struct ServerState {
    flaky_hits: AtomicUsize,
}

pub struct ContentServer {
    url: String,
    state: Arc<ServerState>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ContentServer {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind content server listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = Arc::new(ServerState::default());
        let service_state = Arc::clone(&state);

        let make_service = make_service_fn(move |_| {
            let state = Arc::clone(&service_state);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    serve_request(Arc::clone(&state), req)
                }))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build content server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("content server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            state,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn flaky_hits(&self) -> usize {
        self.state.flaky_hits.load(Ordering::SeqCst)
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(
    state: Arc<ServerState>,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let path = req.uri().path().to_string();
    let response = match path.as_str() {
        "/ok" => Response::new(Body::from(OK_BODY)),
        "/missing" => {
            let mut response = Response::new(Body::from("no such content"));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
        "/flaky" => {
            let hit = state.flaky_hits.fetch_add(1, Ordering::SeqCst);
            if hit < FLAKY_FAILURES {
                let mut response = Response::new(Body::from("transient"));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            } else {
                Response::new(Body::from(FLAKY_BODY))
            }
        }
        "/slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Response::new(Body::from(OK_BODY))
        }
        path if path.starts_with("/set/") => Response::new(Body::from(path.to_string())),
        _ => {
            let mut response = Response::new(Body::from("unknown path"));
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    };

    Ok(response)
}
