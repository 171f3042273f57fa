//! Best-effort InfluxDB v2 writer
//!
//! Each write is attempted exactly once. A failed write is logged and
//! reported to the caller; nothing is queued or retried, so a point that
//! cannot be delivered is dropped.
//!
//! Without the `connection-reuse` feature every request opens a fresh
//! connection and closes it afterwards. With it the connection is kept for
//! the next request unless the server or a transport error ends it.
//!
//! Requests are framed and responses parsed by `reqwless`, running on the
//! connection the `Transport` opened.

use core::fmt::Write;

use embedded_io_async::{Read, Write as IoWrite};
use hal_abstractions::{TlsMode, Transport, TransportError};
use heapless::{String, Vec};
use reqwless::client::HttpConnection;
use reqwless::headers::ContentType;
use reqwless::request::{Request, RequestBody, RequestBuilder};

use crate::config::{
    truncated, DeviceConfig, BUCKET_MAX, CONNECTION_REUSE, ORG_MAX, TLS_MODE, TOKEN_MAX, URL_MAX,
};
use crate::http::{self, ServerUrl, TransportIo, UrlError, HEALTH_PATH, WRITE_PATH};
use crate::point::TelemetryPoint;

/// Line protocol body buffer size
const BODY_MAX: usize = 640;

/// Request target buffer size (prefix, path and query)
const TARGET_MAX: usize = 256;

/// `Host` header buffer size: bracketed host plus port
const HOST_MAX: usize = URL_MAX + 8;

/// `Authorization` header buffer size
const AUTHORIZATION_MAX: usize = TOKEN_MAX + 6;

/// Response buffer size for the head and an error body
const RESPONSE_MAX: usize = 1024;

const USER_AGENT: &str = "airgradient-telemetry";

/// Longest server error message kept in a `PublishError`
pub const MESSAGE_MAX: usize = 128;

/// Client behaviour fixed at build time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClientOptions {
    /// Server certificate handling for `https` URLs
    pub tls_mode: TlsMode,
    /// Keep the connection open between requests
    pub connection_reuse: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            tls_mode: TLS_MODE,
            connection_reuse: CONNECTION_REUSE,
        }
    }
}

/// Publish errors
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishError {
    /// The configured server URL is unusable
    InvalidUrl(UrlError),
    /// The point carries no fields
    EmptyPoint,
    /// The request did not fit its buffer
    Encoding,
    Transport(TransportError),
    /// The server's response could not be parsed
    MalformedResponse,
    /// The server answered with a non-2xx status
    Rejected {
        status: u16,
        message: String<MESSAGE_MAX>,
    },
}

impl core::fmt::Display for PublishError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidUrl(e) => write!(f, "invalid server URL: {}", e),
            Self::EmptyPoint => write!(f, "point has no fields"),
            Self::Encoding => write!(f, "request too large"),
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::MalformedResponse => write!(f, "malformed response"),
            Self::Rejected { status, message } => {
                write!(f, "rejected with status {}: {}", status, message)
            }
        }
    }
}

impl core::error::Error for PublishError {}

impl From<TransportError> for PublishError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// What the client keeps from one response
struct Reply {
    status: u16,
    message: String<MESSAGE_MAX>,
    /// The response was read completely and the server did not ask to close
    reusable: bool,
}

impl Reply {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Body framing announced by the response headers
#[derive(Default)]
struct Framing {
    content_length: Option<usize>,
    chunked: bool,
    close: bool,
}

impl Framing {
    fn observe(&mut self, name: &str, value: &[u8]) {
        let value = core::str::from_utf8(value).unwrap_or_default().trim();
        if name.eq_ignore_ascii_case("content-length") {
            self.content_length = value.parse().ok();
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            self.chunked |= value
                .split(',')
                .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
        } else if name.eq_ignore_ascii_case("connection") {
            self.close |= value.eq_ignore_ascii_case("close");
        }
    }
}

/// Writes points to one InfluxDB bucket over a single connection handle
pub struct TelemetryClient<T> {
    transport: T,
    url: Result<ServerUrl, UrlError>,
    org: String<ORG_MAX>,
    bucket: String<BUCKET_MAX>,
    token: String<TOKEN_MAX>,
    options: ClientOptions,
}

impl<T: Transport> TelemetryClient<T> {
    /// Client with the build-time connection reuse setting
    pub fn new(transport: T, config: &DeviceConfig) -> Self {
        Self::with_options(
            transport,
            config,
            ClientOptions {
                tls_mode: config.tls_mode,
                connection_reuse: CONNECTION_REUSE,
            },
        )
    }

    /// An unusable URL is not an error here; every later request fails
    /// with `PublishError::InvalidUrl`.
    pub fn with_options(transport: T, config: &DeviceConfig, options: ClientOptions) -> Self {
        let url = ServerUrl::parse(&config.influx_url);
        match &url {
            Ok(url) => info!(
                "InfluxDB server {}:{} (tls: {})",
                url.host(),
                url.port(),
                url.is_tls()
            ),
            Err(e) => warn!("InfluxDB URL unusable: {}", e),
        }

        Self {
            transport,
            url,
            org: config.influx_org.clone(),
            bucket: config.influx_bucket.clone(),
            token: config.influx_token.clone(),
            options,
        }
    }

    pub fn server_url(&self) -> Option<&ServerUrl> {
        self.url.as_ref().ok()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Check that the server answers its health endpoint
    pub async fn validate_connection(&mut self) -> bool {
        match self.request(HEALTH_PATH, &[], None).await {
            Ok(()) => {
                info!("InfluxDB connection validated");
                true
            }
            Err(e) => {
                error!("InfluxDB connection failed: {}", e);
                false
            }
        }
    }

    /// Send one point
    pub async fn write_point(&mut self, point: &TelemetryPoint) -> Result<(), PublishError> {
        if !point.has_fields() {
            return Err(PublishError::EmptyPoint);
        }

        let mut body: String<BODY_MAX> = String::new();
        point.write_line_protocol(&mut body).map_err(|_| {
            error!("Line protocol exceeds {} bytes", BODY_MAX);
            PublishError::Encoding
        })?;
        debug!("Writing: {}", body.as_str());

        let org = self.org.clone();
        let bucket = self.bucket.clone();
        let query = [("org", org.as_str()), ("bucket", bucket.as_str())];

        self.request(WRITE_PATH, &query, Some(body.as_bytes()))
            .await
            .inspect_err(|e| error!("InfluxDB write failed: {}", e))
    }

    /// GET `path` without a body, POST it as `text/plain` with one
    async fn request(
        &mut self,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<(), PublishError> {
        let url = self.url.clone().map_err(PublishError::InvalidUrl)?;

        let mut target: String<TARGET_MAX> = String::new();
        url.write_target(&mut target, path, query)
            .map_err(|_| PublishError::Encoding)?;
        let mut host: String<HOST_MAX> = String::new();
        url.write_host(&mut host)
            .map_err(|_| PublishError::Encoding)?;
        let mut authorization: String<AUTHORIZATION_MAX> = String::new();
        write!(authorization, "Token {}", self.token).map_err(|_| PublishError::Encoding)?;

        let connection = if self.options.connection_reuse {
            "keep-alive"
        } else {
            "close"
        };
        let mut headers: Vec<(&str, &str), 4> = Vec::new();
        // Cannot fail: at most four headers
        let _ = headers.push(("User-Agent", USER_AGENT));
        let _ = headers.push(("Accept", "application/json"));
        if !self.token.is_empty() {
            let _ = headers.push(("Authorization", authorization.as_str()));
        }
        let _ = headers.push(("Connection", connection));

        let result = match body {
            Some(body) => {
                let request = Request::post(&target)
                    .host(&host)
                    .headers(&headers)
                    .content_type(ContentType::TextPlain)
                    .body(body)
                    .build();
                self.exchange(&url, request).await
            }
            None => {
                let request = Request::get(&target).host(&host).headers(&headers).build();
                self.exchange(&url, request).await
            }
        };

        if !matches!(&result, Ok(reply) if reply.reusable) {
            self.transport.close().await;
        }

        let reply = result?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(PublishError::Rejected {
                status: reply.status,
                message: reply.message,
            })
        }
    }

    async fn exchange<B: RequestBody>(
        &mut self,
        url: &ServerUrl,
        request: Request<'_, B>,
    ) -> Result<Reply, PublishError> {
        if !self.transport.is_connected() {
            self.transport
                .connect(&url.endpoint(self.options.tls_mode))
                .await?;
        }

        let mut rx = [0u8; RESPONSE_MAX];
        let mut io = TransportIo::new(&mut self.transport);
        let result = send(&mut io, request, &mut rx).await;

        let mut reply = result.map_err(|_| match io.error() {
            Some(e) => PublishError::Transport(e),
            None if io.peer_closed() => {
                warn!("Connection closed before response");
                PublishError::Transport(TransportError::Io)
            }
            None => PublishError::MalformedResponse,
        })?;
        reply.reusable &= self.options.connection_reuse;
        Ok(reply)
    }
}

/// Send one request and read its response
///
/// A successful response's body is read only to keep the connection usable.
/// An error body is read for its message. An unframed body is read to the
/// end only when the server announced it will close.
async fn send<C, B>(
    io: C,
    request: Request<'_, B>,
    rx: &mut [u8],
) -> Result<Reply, reqwless::Error>
where
    C: Read + IoWrite,
    B: RequestBody,
{
    let mut connection = HttpConnection::Plain(io);
    let response = connection.send(request, rx).await?;

    let status = response.status.0;
    let mut framing = Framing::default();
    for (name, value) in response.headers() {
        framing.observe(name, value);
    }

    let empty = (100..200).contains(&status)
        || status == 204
        || status == 304
        || framing.content_length == Some(0);
    let framed = framing.content_length.is_some() || framing.chunked;

    let mut message = String::new();
    let mut complete = empty;
    if !empty && (framed || framing.close) {
        match response.body().read_to_end().await {
            Ok(body) => {
                complete = framed;
                if !(200..300).contains(&status) {
                    message = truncated(http::error_message(body));
                }
            }
            Err(_) => warn!("Response body unreadable"),
        }
    }
    if message.is_empty() && !(200..300).contains(&status) {
        let _ = write!(message, "HTTP {}", status);
    }

    Ok(Reply {
        status,
        message,
        reusable: complete && !framing.close,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::FieldValue;
    use crate::test_support::FakeTransport;
    use embassy_futures::block_on;
    use hal_abstractions::Security;

    const NO_CONTENT: &[u8] = b"HTTP/1.1 204 No Content\r\n\r\n";

    fn config(url: &str) -> DeviceConfig {
        DeviceConfig {
            influx_url: truncated(url),
            influx_org: truncated("home org"),
            influx_bucket: truncated("air"),
            influx_token: truncated("tok"),
            ..DeviceConfig::default()
        }
    }

    fn options(connection_reuse: bool) -> ClientOptions {
        ClientOptions {
            tls_mode: TlsMode::Validated,
            connection_reuse,
        }
    }

    fn point() -> TelemetryPoint {
        let mut point = TelemetryPoint::new("airgradient");
        point.add_tag("id", "abc").unwrap();
        point.add_field("co2", FieldValue::Integer(612)).unwrap();
        point.add_field("rssi", FieldValue::Integer(-55)).unwrap();
        point
    }

    #[test]
    fn test_write_point_request() {
        let transport = FakeTransport::new().respond(NO_CONTENT);
        let mut client =
            TelemetryClient::with_options(transport, &config("https://db.example.com"), options(false));

        assert_eq!(block_on(client.write_point(&point())), Ok(()));

        let transport = client.transport();
        assert_eq!(
            transport.connects,
            [("db.example.com".to_owned(), 443, Security::Tls(TlsMode::Validated))]
        );
        let sent = transport.sent.as_str();
        assert!(sent.starts_with("POST /api/v2/write?org=home%20org&bucket=air HTTP/1.1\r\n"));
        assert!(sent.contains("Host: db.example.com\r\n"));
        assert!(sent.contains("User-Agent: airgradient-telemetry\r\n"));
        assert!(sent.contains("Authorization: Token tok\r\n"));
        assert!(sent.contains("Content-Type: text/plain"));
        assert!(sent.contains("Content-Length: 37\r\n"));
        assert!(sent.contains("Connection: close\r\n"));
        assert!(sent.ends_with("\r\n\r\nairgradient,id=abc co2=612i,rssi=-55i"));
        assert_eq!(transport.writes, 1);
        assert_eq!(transport.closes, 1);
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_request_without_token() {
        let mut config = config("http://influx.lan:8086");
        config.influx_token = String::new();
        let transport = FakeTransport::new().respond(NO_CONTENT);
        let mut client = TelemetryClient::with_options(transport, &config, options(false));

        assert_eq!(block_on(client.write_point(&point())), Ok(()));
        let sent = client.transport().sent.as_str();
        assert!(sent.contains("Host: influx.lan:8086\r\n"));
        assert!(!sent.contains("Authorization"));
    }

    #[test]
    fn test_rejected_write_carries_message() {
        let transport = FakeTransport::new().respond(
            b"HTTP/1.1 401 Unauthorized\r\nContent-Type: application/json\r\nContent-Length: 55\r\n\r\n\
              {\"code\":\"unauthorized\",\"message\":\"unauthorized access\"}",
        );
        let mut client =
            TelemetryClient::with_options(transport, &config("http://influx.lan:8086"), options(false));

        assert_eq!(
            block_on(client.write_point(&point())),
            Err(PublishError::Rejected {
                status: 401,
                message: truncated("unauthorized access"),
            })
        );
        assert_eq!(client.transport().closes, 1);
    }

    #[test]
    fn test_rejected_without_body() {
        let transport =
            FakeTransport::new().respond(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n");
        let mut client =
            TelemetryClient::with_options(transport, &config("http://influx.lan"), options(false));

        assert_eq!(
            block_on(client.write_point(&point())),
            Err(PublishError::Rejected {
                status: 503,
                message: truncated("HTTP 503"),
            })
        );
    }

    #[test]
    fn test_chunked_rejection_carries_message() {
        let transport = FakeTransport::new().respond(
            b"HTTP/1.1 400 Bad Request\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n\
              12\r\n{\"code\":\"invalid\",\r\n\
              2f\r\n\"message\":\"partial write: field type conflict\"}\r\n\
              0\r\n\r\n",
        );
        let mut client =
            TelemetryClient::with_options(transport, &config("http://influx.lan"), options(true));

        assert_eq!(
            block_on(client.write_point(&point())),
            Err(PublishError::Rejected {
                status: 400,
                message: truncated("partial write: field type conflict"),
            })
        );
        // Fully read, so the connection stays open
        assert_eq!(client.transport().closes, 0);
    }

    #[test]
    fn test_rejection_read_until_close() {
        let transport = FakeTransport::new()
            .respond(b"HTTP/1.1 500 Internal Server Error\r\nConnection: close\r\n\r\nengine down");
        let mut client =
            TelemetryClient::with_options(transport, &config("http://influx.lan"), options(true));

        assert_eq!(
            block_on(client.write_point(&point())),
            Err(PublishError::Rejected {
                status: 500,
                message: truncated("engine down"),
            })
        );
        assert_eq!(client.transport().closes, 1);
    }

    #[test]
    fn test_invalid_url_never_connects() {
        let mut client = TelemetryClient::with_options(FakeTransport::new(), &config(""), options(false));
        assert!(client.server_url().is_none());
        assert_eq!(
            block_on(client.write_point(&point())),
            Err(PublishError::InvalidUrl(UrlError::Empty))
        );
        assert!(client.transport().connects.is_empty());
        assert!(!block_on(client.validate_connection()));
    }

    #[test]
    fn test_empty_point_rejected_locally() {
        let mut client =
            TelemetryClient::with_options(FakeTransport::new(), &config("http://h"), options(false));
        let empty = TelemetryPoint::new("airgradient");
        assert_eq!(block_on(client.write_point(&empty)), Err(PublishError::EmptyPoint));
        assert!(client.transport().connects.is_empty());
    }

    #[test]
    fn test_connect_failure() {
        let transport = FakeTransport::new().fail_connect(TransportError::Dns);
        let mut client =
            TelemetryClient::with_options(transport, &config("https://db"), options(true));

        assert_eq!(
            block_on(client.write_point(&point())),
            Err(PublishError::Transport(TransportError::Dns))
        );
        assert!(client.transport().sent.is_empty());
    }

    #[test]
    fn test_connection_reused_between_writes() {
        let transport = FakeTransport::new().respond(NO_CONTENT).respond(NO_CONTENT);
        let mut client =
            TelemetryClient::with_options(transport, &config("https://db"), options(true));

        assert_eq!(block_on(client.write_point(&point())), Ok(()));
        assert_eq!(block_on(client.write_point(&point())), Ok(()));

        let transport = client.transport();
        assert_eq!(transport.connects.len(), 1);
        assert_eq!(transport.closes, 0);
        assert!(transport.sent.contains("Connection: keep-alive\r\n"));
    }

    #[test]
    fn test_server_close_forces_reconnect() {
        let transport = FakeTransport::new()
            .respond(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
            .respond(NO_CONTENT);
        let mut client =
            TelemetryClient::with_options(transport, &config("https://db"), options(true));

        assert_eq!(block_on(client.write_point(&point())), Ok(()));
        assert_eq!(block_on(client.write_point(&point())), Ok(()));
        assert_eq!(client.transport().connects.len(), 2);
        assert_eq!(client.transport().closes, 1);
    }

    #[test]
    fn test_peer_hang_up_forces_reconnect() {
        let transport = FakeTransport::new()
            .respond(NO_CONTENT)
            .respond(NO_CONTENT)
            .hang_up_after_response();
        let mut client =
            TelemetryClient::with_options(transport, &config("https://db"), options(true));

        assert_eq!(block_on(client.write_point(&point())), Ok(()));
        assert!(!client.transport().is_connected());
        assert_eq!(block_on(client.write_point(&point())), Ok(()));

        let transport = client.transport();
        assert_eq!(transport.connects.len(), 2);
        assert_eq!(transport.closes, 0);
        assert_eq!(transport.writes, 2);
    }

    #[test]
    fn test_peer_close_before_response() {
        let mut client =
            TelemetryClient::with_options(FakeTransport::new(), &config("http://h"), options(true));
        assert_eq!(
            block_on(client.write_point(&point())),
            Err(PublishError::Transport(TransportError::Io))
        );
        assert_eq!(client.transport().closes, 1);
    }

    #[test]
    fn test_malformed_response() {
        let transport = FakeTransport::new().respond(b"SSH-2.0-OpenSSH\r\n\r\n");
        let mut client =
            TelemetryClient::with_options(transport, &config("http://h"), options(false));
        assert_eq!(
            block_on(client.write_point(&point())),
            Err(PublishError::MalformedResponse)
        );
    }

    #[test]
    fn test_validate_connection() {
        let healthy = FakeTransport::new().respond(
            b"HTTP/1.1 200 OK\r\nContent-Length: 17\r\n\r\n{\"status\":\"pass\"}",
        );
        let mut client =
            TelemetryClient::with_options(healthy, &config("https://db/base"), options(false));
        assert!(block_on(client.validate_connection()));
        assert!(client
            .transport()
            .sent
            .starts_with("GET /base/health HTTP/1.1\r\n"));
        assert!(!client.transport().sent.contains("Content-Length"));

        let failing = FakeTransport::new().respond(b"HTTP/1.1 503 Unavailable\r\n\r\n");
        let mut client = TelemetryClient::with_options(failing, &config("https://db"), options(false));
        assert!(!block_on(client.validate_connection()));
    }

    #[test]
    fn test_new_uses_config_tls_mode() {
        let mut config = config("https://db");
        config.tls_mode = TlsMode::Insecure;
        let client = TelemetryClient::new(FakeTransport::new(), &config);
        assert_eq!(client.options().tls_mode, TlsMode::Insecure);
        assert_eq!(client.options().connection_reuse, CONNECTION_REUSE);
    }
}
