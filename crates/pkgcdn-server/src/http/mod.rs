//! HTTP surface.
//!
//! Requests under the configured prefix are package requests and go through
//! the [`RequestCoordinator`]; everything else is served from the document
//! root. Connections are served with hyper's HTTP/1 server and drained on
//! shutdown.

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use hyper::header::{self, HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use pkgcdn_config::ServeConfig;
use pkgcdn_core::error::{CdnError, CdnResult};
use pkgcdn_core::utils::safe_join;

use crate::coordinator::{content_type, Reply, RequestCoordinator};

/// Response body type of every reply
pub type Body = BoxBody<Bytes, io::Error>;

/// Characters escaped when a redirect location is written into a header
const LOCATION: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const ALLOW_PRIVATE_NETWORK: HeaderName = HeaderName::from_static("access-control-allow-private-network");

/// Routes requests to the package coordinator or the document root
pub struct HttpService {
    coordinator: RequestCoordinator,
    prefix: String,
    document_root: PathBuf,
    cors: bool,
    cors_origin: Option<String>,
}

impl HttpService {
    pub fn new(coordinator: RequestCoordinator, config: &ServeConfig) -> Self {
        Self {
            coordinator,
            prefix: config.prefix.clone(),
            document_root: config.document_root.clone().into_std_path_buf(),
            cors: config.cors,
            cors_origin: config.cors_origin.clone(),
        }
    }

    pub fn from_config(config: &ServeConfig) -> CdnResult<Self> {
        Ok(Self::new(RequestCoordinator::from_config(config)?, config))
    }

    /// Answer one request. Never fails; errors become status codes.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Body> {
        let (parts, _) = request.into_parts();
        let (method, headers) = (parts.method, parts.headers);
        if !matches!(method, Method::GET | Method::HEAD | Method::OPTIONS) {
            let mut response = text(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD, OPTIONS"));
            return response;
        }

        let path = percent_decode_str(parts.uri.path()).decode_utf8_lossy().into_owned();
        debug!("{} {}", method, path);

        let coordinates = path
            .strip_prefix(self.prefix.as_str())
            .or_else(|| (path == self.prefix.trim_end_matches('/')).then_some(""));

        let mut response = match coordinates {
            Some(coordinates) => {
                let mut response = self.package(&method, &headers, coordinates).await;
                if self.cors {
                    self.add_cors_headers(&headers, &mut response);
                }
                response
            },
            None => self.static_file(&method, &path).await,
        };

        if method == Method::HEAD {
            *response.body_mut() = empty();
        }
        response
    }

    async fn package(&self, method: &Method, headers: &HeaderMap, coordinates: &str) -> Response<Body> {
        if *method == Method::OPTIONS {
            let mut response = Response::new(empty());
            *response.status_mut() = StatusCode::NO_CONTENT;
            return response;
        }

        let if_none_match = headers
            .get(header::IF_NONE_MATCH)
            .and_then(|value| value.to_str().ok());

        match self.coordinator.handle(coordinates, if_none_match).await {
            Ok(Reply::Redirect { location }) => {
                let mut response = Response::new(empty());
                *response.status_mut() = StatusCode::FOUND;
                let location = utf8_percent_encode(&location, LOCATION).to_string();
                set_header(&mut response, header::LOCATION, &location);
                response
            },
            Ok(Reply::NotModified { etag, max_age }) => {
                let mut response = Response::new(empty());
                *response.status_mut() = StatusCode::NOT_MODIFIED;
                set_header(&mut response, header::ETAG, &format!("\"{}\"", etag));
                set_header(&mut response, header::CACHE_CONTROL, &format!("max-age={}", max_age));
                response
            },
            Ok(Reply::File {
                content_type,
                etag,
                max_age,
                body,
            }) => {
                let mut response = Response::new(StreamBody::new(body.map_ok(Frame::data)).boxed());
                set_header(&mut response, header::CONTENT_TYPE, &content_type);
                set_header(&mut response, header::ETAG, &format!("\"{}\"", etag));
                set_header(&mut response, header::CACHE_CONTROL, &format!("max-age={}", max_age));
                response
            },
            Err(e) => error_response(coordinates, e),
        }
    }

    fn add_cors_headers(&self, headers: &HeaderMap, response: &mut Response<Body>) {
        let origin = self.cors_origin.clone().or_else(|| {
            headers
                .get(header::ORIGIN)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        });
        if let Some(origin) = origin {
            set_header(response, header::ACCESS_CONTROL_ALLOW_ORIGIN, &origin);
        }

        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Origin, Content-Type"),
        );
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, OPTIONS"));
        headers.insert(ALLOW_PRIVATE_NETWORK, HeaderValue::from_static("true"));
    }

    /// Serve a file from the document root; directories serve their `index.html`
    async fn static_file(&self, method: &Method, path: &str) -> Response<Body> {
        if *method == Method::OPTIONS {
            let mut response = Response::new(empty());
            *response.status_mut() = StatusCode::NO_CONTENT;
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD, OPTIONS"));
            return response;
        }

        let Some(mut file) = safe_join(&self.document_root, path) else {
            return text(StatusCode::NOT_FOUND, "Not found");
        };
        if tokio::fs::metadata(&file).await.map_or(false, |meta| meta.is_dir()) {
            file.push("index.html");
        }

        match tokio::fs::read(&file).await {
            Ok(content) => {
                let mut response = Response::new(full(content));
                set_header(
                    &mut response,
                    header::CONTENT_TYPE,
                    &content_type(&file.to_string_lossy()),
                );
                response
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => text(StatusCode::NOT_FOUND, "Not found"),
            Err(e) => {
                error!("Failed to read {}: {}", file.display(), e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            },
        }
    }
}

fn error_response(coordinates: &str, e: CdnError) -> Response<Body> {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("Failed to serve {}: {}", coordinates, e);
    } else {
        info!("{}", e);
    }
    text(status, &e.to_string())
}

fn set_header(response: &mut Response<Body>, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            response.headers_mut().insert(name, value);
        },
        Err(_) => warn!("Dropping invalid {} header value {:?}", name, value),
    }
}

fn text(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(full(message.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn empty() -> Body {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

fn full(content: impl Into<Bytes>) -> Body {
    Full::new(content.into()).map_err(|never| match never {}).boxed()
}

/// Accept connections on `listener` until `shutdown` resolves, then wait
/// for open connections to finish their in-flight requests.
pub async fn serve<F>(listener: TcpListener, service: Arc<HttpService>, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()>,
{
    let (signal_tx, signal_rx) = watch::channel(false);
    tokio::pin!(shutdown);

    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                },
            },
            _ = &mut shutdown => break,
        };

        let service = service.clone();
        let mut signal = signal_rx.clone();
        tokio::spawn(async move {
            let handler = service_fn(move |request| {
                let service = service.clone();
                async move { Ok::<_, Infallible>(service.handle(request).await) }
            });

            let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), handler);
            tokio::pin!(connection);

            loop {
                tokio::select! {
                    result = connection.as_mut() => {
                        if let Err(e) = result {
                            debug!("Connection from {} closed: {}", remote, e);
                        }
                        break;
                    },
                    _ = signal.changed() => connection.as_mut().graceful_shutdown(),
                }
            }
        });
    }

    info!("Shutting down, waiting for open connections");
    // Receivers live in the connection tasks
    let _ = signal_tx.send(true);
    drop(signal_rx);
    signal_tx.closed().await;

    Ok(())
}
