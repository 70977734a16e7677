//! Forwarding strategies
//!
//! Each proxy lifecycle picks one strategy from its resolved origin and uses
//! it for every inbound request:
//! - `Direct` rewrites scheme/host/path to the network origin and sends the
//!   request through a pooled client.
//! - `Socket` rewrites the request with synthetic framing values and dials a
//!   fixed unix socket path, ignoring whatever host the request names.

use crate::error::GatewayErrorCode;
use crate::origin::Origin;
use http_body_util::{combinators::BoxBody, BodyExt};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::{Request, Response, Uri, Version};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;
use tracing::debug;
use url::Url;

/// Header name for the inbound caller's remote address
const X_REAL_IP: &str = "x-real-ip";
/// Header name for the original request target
const X_ORIGINAL_URI: &str = "x-original-uri";
/// Header name for the port the origin is assumed to serve
const X_FORWARDED_PORT: &str = "x-forwarded-port";

/// Placeholder authority for socket-relayed requests; the dialer ignores it
/// and always connects to the bound socket path.
const SOCKET_HOST_SENTINEL: &str = "unix";

/// Hop-by-hop headers (RFC 7230 section 6.1), stripped before forwarding.
/// They describe the inbound connection, not the request, and passing
/// `Connection: close` through would also defeat upstream connection reuse.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Error type for forwarding operations
#[derive(Debug)]
pub enum ForwardError {
    /// Failed to dial the origin
    Connect(std::io::Error),
    /// Error from the pooled HTTP client
    Client(hyper_util::client::legacy::Error),
    /// HTTP-level error on the origin connection
    Upstream(hyper::Error),
    /// Error rewriting the inbound request
    RequestBuild(hyper::http::Error),
}

impl std::fmt::Display for ForwardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardError::Connect(e) => write!(f, "Connect error: {}", e),
            ForwardError::Client(e) => write!(f, "Client error: {}", e),
            ForwardError::Upstream(e) => write!(f, "Upstream error: {}", e),
            ForwardError::RequestBuild(e) => write!(f, "Request build error: {}", e),
        }
    }
}

impl std::error::Error for ForwardError {}

impl ForwardError {
    /// Map to the error code surfaced to the inbound caller
    pub fn gateway_code(&self) -> GatewayErrorCode {
        match self {
            ForwardError::Connect(_) => GatewayErrorCode::ConnectionFailed,
            ForwardError::Client(_) => GatewayErrorCode::ConnectionFailed,
            ForwardError::Upstream(_) => GatewayErrorCode::UpstreamError,
            ForwardError::RequestBuild(_) => GatewayErrorCode::RequestRewrite,
        }
    }
}

/// The request-transform + dial pairing for one lifecycle
pub enum ForwardingStrategy {
    /// Rewrite to the network origin and dial it directly
    Direct {
        client: Client<HttpsConnector<HttpConnector>, Incoming>,
        origin: Url,
    },
    /// Rewrite with synthetic framing and dial a fixed unix socket path
    Socket { path: PathBuf },
}

impl ForwardingStrategy {
    /// Select the strategy for a resolved origin
    pub fn for_origin(origin: &Origin) -> Self {
        match origin {
            Origin::Network(url) => {
                let mut http = HttpConnector::new();
                http.set_nodelay(true);
                // The TLS layer decides whether to encrypt, so the inner
                // connector must accept https URIs.
                http.enforce_http(false);

                let connector = hyper_rustls::HttpsConnectorBuilder::new()
                    .with_webpki_roots()
                    .https_or_http()
                    .enable_http1()
                    .wrap_connector(http);

                let client = Client::builder(TokioExecutor::new()).build(connector);
                ForwardingStrategy::Direct {
                    client,
                    origin: url.clone(),
                }
            }
            Origin::UnixSocket(path) => ForwardingStrategy::Socket { path: path.clone() },
        }
    }

    /// Forward one inbound request to the origin
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        remote: SocketAddr,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, ForwardError> {
        match self {
            ForwardingStrategy::Direct { client, origin } => {
                forward_direct(client, origin, req).await
            }
            ForwardingStrategy::Socket { path } => forward_socket(path, req, remote).await,
        }
    }
}

async fn forward_direct(
    client: &Client<HttpsConnector<HttpConnector>, Incoming>,
    origin: &Url,
    req: Request<Incoming>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, ForwardError> {
    let req = rewrite_direct(req, origin)?;
    debug!(uri = %req.uri(), "forwarding to network origin");

    let response = client.request(req).await.map_err(ForwardError::Client)?;

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, body.boxed()))
}

async fn forward_socket(
    path: &Path,
    req: Request<Incoming>,
    remote: SocketAddr,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, ForwardError> {
    let req = rewrite_for_socket(req, remote)?;
    debug!(socket = %path.display(), uri = %req.uri(), "forwarding to unix socket");

    let stream = UnixStream::connect(path)
        .await
        .map_err(ForwardError::Connect)?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(ForwardError::Upstream)?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "socket connection closed with error");
        }
    });

    // hyper serializes the request target verbatim, so the sentinel
    // authority is dropped here and the request goes out in origin-form.
    let req = to_origin_form(req)?;
    let response = sender
        .send_request(req)
        .await
        .map_err(ForwardError::Upstream)?;

    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, body.boxed()))
}

/// Rewrite an inbound request against a network origin: the origin's scheme
/// and host replace the request's, and the origin's base path is prepended
/// to the inbound path. The query string is preserved.
fn rewrite_direct<B>(req: Request<B>, origin: &Url) -> Result<Request<B>, ForwardError> {
    let (mut parts, body) = req.into_parts();

    strip_hop_by_hop_headers(&mut parts.headers);

    let path = join_paths(origin.path(), parts.uri.path());
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    };

    let host = origin.host_str().unwrap_or_default();
    let authority = match origin.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    parts.uri = Uri::builder()
        .scheme(origin.scheme())
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(ForwardError::RequestBuild)?;

    Ok(Request::from_parts(parts, body))
}

/// Remove hop-by-hop headers, including any the Connection header names
fn strip_hop_by_hop_headers(headers: &mut HeaderMap) {
    let connection_named: Vec<HeaderName> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in connection_named {
        headers.remove(name);
    }

    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Join an origin base path and an inbound path with exactly one slash
fn join_paths(base: &str, inbound: &str) -> String {
    match (base.ends_with('/'), inbound.starts_with('/')) {
        (true, true) => format!("{}{}", base, &inbound[1..]),
        (false, false) => format!("{}/{}", base, inbound),
        _ => format!("{}{}", base, inbound),
    }
}

/// Rewrite an inbound request for delivery over a unix socket.
///
/// The hop to the socket is local and unencrypted, so an empty scheme
/// defaults to `http`, never `https`. The host becomes a fixed sentinel the
/// dialer ignores, framing is forced to HTTP/1.1, and the socket-side server
/// learns the original caller and target through explicit headers.
fn rewrite_for_socket<B>(req: Request<B>, remote: SocketAddr) -> Result<Request<B>, ForwardError> {
    let (mut parts, body) = req.into_parts();

    strip_hop_by_hop_headers(&mut parts.headers);

    let original_target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    // Truncated at the first ':' to match the legacy relay contract. This
    // also clips targets whose path or query contains a literal colon.
    let original_uri = original_target
        .split(':')
        .next()
        .unwrap_or(&original_target)
        .to_string();

    let scheme = parts.uri.scheme_str().unwrap_or("http").to_string();
    parts.uri = Uri::builder()
        .scheme(scheme.as_str())
        .authority(SOCKET_HOST_SENTINEL)
        .path_and_query(original_target)
        .build()
        .map_err(ForwardError::RequestBuild)?;

    // The socket-side server is assumed to speak HTTP/1.1 only.
    parts.version = Version::HTTP_11;

    let real_ip = HeaderValue::from_str(&remote.to_string())
        .map_err(|e| ForwardError::RequestBuild(e.into()))?;
    parts.headers.insert(X_REAL_IP, real_ip);
    let original_uri = HeaderValue::from_str(&original_uri)
        .map_err(|e| ForwardError::RequestBuild(e.into()))?;
    parts.headers.insert(X_ORIGINAL_URI, original_uri);
    // The origin side is assumed to listen on port 80 when socket relaying
    // is in use.
    parts
        .headers
        .insert(X_FORWARDED_PORT, HeaderValue::from_static("80"));

    Ok(Request::from_parts(parts, body))
}

/// Reduce a request's URI to its path and query
fn to_origin_form<B>(req: Request<B>) -> Result<Request<B>, ForwardError> {
    let (mut parts, body) = req.into_parts();
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    parts.uri = target
        .parse::<Uri>()
        .map_err(|e| ForwardError::RequestBuild(e.into()))?;
    Ok(Request::from_parts(parts, body))
}
