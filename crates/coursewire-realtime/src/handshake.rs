// WebSocket upgrade negotiation
//
// Turns an initial raw byte stream into an authenticated, subscribed
// connection, or produces the plain HTTP response that rejects it. The
// negotiator never writes frames to a rejected connection.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use tracing::warn;
use url::form_urlencoded;

use coursewire_core::{AuthenticatedUser, SessionStore, Subscription};

/// Fixed GUID every WebSocket accept value is derived from (RFC 6455 §1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Liveness probe path answered without an upgrade.
pub const HEALTH_PATH: &str = "/healthz";

/// Handshake-relevant configuration, carved out of the server config.
#[derive(Debug, Clone, Default)]
pub struct HandshakeConfig {
    /// Name of the HTTP tier's session cookie.
    pub session_cookie: String,
    /// Origins allowed to connect; empty disables the check.
    /// Normalized with trailing slashes stripped.
    pub allowed_origins: Vec<String>,
}

/// Outcome of negotiating one upgrade request.
pub enum Negotiation {
    /// Write the 101 response and enter framed mode.
    Upgrade(Box<Accepted>),
    /// Write this plain HTTP response and tear the connection down.
    Respond(Vec<u8>),
}

/// Everything a successfully negotiated connection starts with.
#[derive(Debug)]
pub struct Accepted {
    /// The `101 Switching Protocols` response bytes.
    pub response: Vec<u8>,
    pub user: AuthenticatedUser,
    pub subscription: Subscription,
    pub change_cursor: i64,
    pub ta_cursor: i64,
}

/// Index of the first byte past the header block's double-CRLF terminator.
pub fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|i| i + 4)
}

/// Negotiate a connection from a complete header block.
///
/// `head` must include the double-CRLF terminator; `client_count` feeds the
/// health probe.
pub async fn negotiate(
    head: &[u8],
    config: &HandshakeConfig,
    sessions: &dyn SessionStore,
    client_count: usize,
) -> Negotiation {
    let request = match parse_head(head) {
        Ok(request) => request,
        Err(rejection) => return Negotiation::Respond(rejection.into_response()),
    };

    if request.path == HEALTH_PATH {
        let body = format!("{{\"ok\":true,\"clients\":{client_count}}}");
        return Negotiation::Respond(json_response(200, "OK", &body));
    }

    if !config.allowed_origins.is_empty() {
        let origin = request
            .header("origin")
            .unwrap_or("")
            .trim_end_matches('/');
        if !config.allowed_origins.iter().any(|allowed| allowed == origin) {
            warn!(origin, "rejected origin");
            return Negotiation::Respond(Rejection::forbidden().into_response());
        }
    }

    let Some(sec_key) = request.header("sec-websocket-key").filter(|k| !k.is_empty()) else {
        return Negotiation::Respond(
            Rejection::bad_request("Missing Sec-WebSocket-Key header.").into_response(),
        );
    };

    let user = match authenticate(&request, config, sessions).await {
        Some(user) => user,
        None => return Negotiation::Respond(Rejection::unauthorized().into_response()),
    };

    let channels = Subscription::resolve_channels(&request.param_values("channels"));
    let subscription = Subscription::new(channels)
        .with_course(Subscription::scope_filter(request.param("course_id")))
        .with_room(Subscription::scope_filter(request.param("room_id")))
        .with_queues(Subscription::resolve_queue_ids(&request.param_values("queue_id")));

    // since seeds the change-log cursor; ta_since falls back to since when
    // not separately given; 0 means "deliver everything from now on"
    let since_raw = request.param("since").map(parse_i64_or_zero).unwrap_or(0);
    let change_cursor = since_raw.max(0);
    let ta_raw = request
        .param("ta_since")
        .map(parse_i64_or_zero)
        .unwrap_or(since_raw);
    let ta_cursor = ta_raw.max(0);

    let response = switching_protocols(&accept_key(sec_key));
    Negotiation::Upgrade(Box::new(Accepted {
        response,
        user,
        subscription,
        change_cursor,
        ta_cursor,
    }))
}

async fn authenticate(
    request: &UpgradeRequest,
    config: &HandshakeConfig,
    sessions: &dyn SessionStore,
) -> Option<AuthenticatedUser> {
    let cookie_header = request.header("cookie")?;
    let session_id = extract_cookie(cookie_header, &config.session_cookie)?;
    match sessions.lookup(&session_id).await {
        Ok(user) => user,
        Err(e) => {
            warn!(error = %e, "session lookup failed");
            None
        }
    }
}

// ============================================================================
// Request parsing
// ============================================================================

/// A parsed upgrade request head: path, decoded query parameters, and a
/// lower-cased header map.
#[derive(Debug)]
pub struct UpgradeRequest {
    pub path: String,
    params: Vec<(String, String)>,
    headers: HashMap<String, String>,
}

impl UpgradeRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// First value for a query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Every value for a repeated query parameter.
    pub fn param_values(&self, name: &str) -> Vec<String> {
        self.params
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
            .collect()
    }
}

fn parse_head(head: &[u8]) -> Result<UpgradeRequest, Rejection> {
    let mut header_storage = [httparse::EMPTY_HEADER; 48];
    let mut request = httparse::Request::new(&mut header_storage);
    let status = request
        .parse(head)
        .map_err(|_| Rejection::bad_request("Invalid request."))?;
    if status.is_partial() {
        return Err(Rejection::bad_request("Invalid request."));
    }
    if request.method != Some("GET") {
        return Err(Rejection::bad_request("Invalid request."));
    }

    let target = request.path.unwrap_or("/");
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    let params = form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let headers = request
        .headers
        .iter()
        .map(|header| {
            (
                header.name.to_ascii_lowercase(),
                String::from_utf8_lossy(header.value).trim().to_string(),
            )
        })
        .collect();

    Ok(UpgradeRequest {
        path: path.to_string(),
        params,
        headers,
    })
}

/// Pull one cookie's value out of a Cookie header. Name matching is
/// case-insensitive; the value is percent-decoded.
pub fn extract_cookie(cookie_header: &str, name: &str) -> Option<String> {
    for segment in cookie_header.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        for (key, value) in form_urlencoded::parse(segment.as_bytes()) {
            if key.eq_ignore_ascii_case(name) && !value.is_empty() {
                return Some(value.into_owned());
            }
        }
    }
    None
}

fn parse_i64_or_zero(value: &str) -> i64 {
    value.trim().parse::<i64>().unwrap_or(0)
}

// ============================================================================
// Responses
// ============================================================================

/// A handshake rejection: status line plus a short plain-text body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: u16,
    pub title: &'static str,
    pub body: &'static str,
}

impl Rejection {
    pub fn bad_request(body: &'static str) -> Self {
        Self {
            status: 400,
            title: "Bad Request",
            body,
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status: 401,
            title: "Unauthorized",
            body: "Authentication required.",
        }
    }

    pub fn forbidden() -> Self {
        Self {
            status: 403,
            title: "Forbidden",
            body: "Origin not allowed.",
        }
    }

    pub fn into_response(self) -> Vec<u8> {
        http_response(self.status, self.title, "text/plain; charset=utf-8", self.body)
    }
}

fn http_response(status: u16, title: &str, content_type: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status} {title}\r\n\
         Content-Type: {content_type}\r\n\
         Connection: close\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {body}",
        body.len()
    )
    .into_bytes()
}

fn json_response(status: u16, title: &str, body: &str) -> Vec<u8> {
    http_response(status, title, "application/json; charset=utf-8", body)
}

fn switching_protocols(accept: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    )
    .into_bytes()
}

/// base64(SHA-1(client key + fixed GUID)), per RFC 6455 §4.2.2.
pub fn accept_key(client_key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(client_key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64.encode(sha1.finalize())
}
