use std::fmt::Debug;
use std::io;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinHandle;

use prometheus::{Encoder, TextEncoder};
use tracing::{debug, info, trace};

/// Binds the metrics listener and serves `GET /metrics` from the default
/// prometheus registry until the returned task is aborted.
pub async fn start_server<T: ToSocketAddrs + Debug>(server_addr: T) -> io::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(&server_addr).await?;

    info!(addr = ?server_addr, "Starting metrics server");

    Ok(tokio::spawn(async move {
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(s) => s,
                Err(e) => {
                    debug!(error = %e, "Failed to accept metrics connection");
                    continue;
                }
            };

            trace!(%peer, "Accepted metrics connection");
            let io = TokioIo::new(socket);

            tokio::spawn(async move {
                if let Err(e) = http1::Builder::new()
                    .timer(TokioTimer::new())
                    .serve_connection(io, service_fn(handle))
                    .await
                {
                    debug!(error = %e, "Failed to serve metrics connection");
                }
            });
        }
    }))
}

async fn handle(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, prometheus::Error> {
    if req.method() != Method::GET || req.uri().path() != "/metrics" {
        let mut res = Response::new(Full::new(Bytes::from_static(b"not found")));
        *res.status_mut() = StatusCode::NOT_FOUND;
        return Ok(res);
    }

    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;

    let mut res = Response::new(Full::new(buffer.into()));
    if let Ok(content_type) = encoder.format_type().parse() {
        res.headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }

    Ok(res)
}
