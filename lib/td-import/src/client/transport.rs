//! HTTP transport for the bulk-import API.

use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{
    header::{InvalidHeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT},
    uri::Scheme,
    HeaderValue, Method, Request, StatusCode, Uri,
};
use http_body_util::{BodyExt as _, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::{TokioExecutor, TokioTimer},
};
use rustls::{ClientConfig, RootCertStore};
use serde::Deserialize;
use snafu::{ResultExt as _, Snafu};

static CONTENT_TYPE_OCTET_STREAM: HeaderValue = HeaderValue::from_static("application/octet-stream");
static USER_AGENT_VALUE: HeaderValue = HeaderValue::from_static(concat!("td-import/", env!("CARGO_PKG_VERSION")));

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(45);
const DEFAULT_MAX_IDLE_CONNS_PER_HOST: usize = 5;

/// Category of an error response from the import API, derived from its status code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApiErrorKind {
    /// The database or table does not exist. (404)
    NotFound,

    /// The resource already exists. (409)
    AlreadyExists,

    /// The API key was missing or invalid. (401)
    Unauthorized,

    /// The API key does not grant access to the resource. (403)
    Forbidden,

    /// The service failed to handle the request. (5xx)
    Server,

    /// Any other client error.
    Client,
}

impl ApiErrorKind {
    /// Categorizes the given status code.
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::CONFLICT => Self::AlreadyExists,
            StatusCode::UNAUTHORIZED => Self::Unauthorized,
            StatusCode::FORBIDDEN => Self::Forbidden,
            status if status.is_server_error() => Self::Server,
            _ => Self::Client,
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Server => "server error",
            Self::Client => "client error",
        };
        f.write_str(name)
    }
}

/// Error type for import requests.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ImportError {
    /// The platform's root certificates could not be loaded.
    #[snafu(display("Failed to load platform root certificates."))]
    NativeRoots {
        /// Error source.
        source: std::io::Error,
    },

    /// The TLS configuration could not be built.
    #[snafu(display("Failed to build TLS configuration."))]
    Tls {
        /// Error source.
        source: rustls::Error,
    },

    /// The API key cannot be sent as a header value.
    #[snafu(display("API key contains characters that are not valid in an HTTP header."))]
    InvalidApiKey {
        /// Error source.
        source: InvalidHeaderValue,
    },

    /// The import request could not be built.
    #[snafu(display("Failed to build import request."))]
    BuildRequest {
        /// Error source.
        source: http::Error,
    },

    /// The import request could not be sent, or no response was received.
    #[snafu(display("Failed to send import request."))]
    Transport {
        /// Error source.
        source: hyper_util::client::legacy::Error,
    },

    /// The response body could not be read.
    #[snafu(display("Failed to read import response body."))]
    ReadBody {
        /// Error source.
        source: hyper::Error,
    },

    /// The response body of a successful import was not the expected JSON object.
    #[snafu(display("Failed to parse import response."))]
    InvalidResponse {
        /// Error source.
        source: serde_json::Error,
    },

    /// The import API returned an error response.
    #[snafu(display("Import API returned {} ({}): {}", status, kind, message))]
    Api {
        /// Response status code.
        status: StatusCode,

        /// Error category.
        kind: ApiErrorKind,

        /// Error message reported by the API, or the raw response body.
        message: String,
    },
}

impl ImportError {
    fn from_response(status: StatusCode, body: &[u8]) -> Self {
        Self::Api {
            status,
            kind: ApiErrorKind::from_status(status),
            message: error_message(body),
        }
    }

    /// Returns the API error category, if this error is an error response from the import API.
    pub fn api_error_kind(&self) -> Option<ApiErrorKind> {
        match self {
            Self::Api { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` if resubmitting the same payload, with the same unique ID, may succeed.
    ///
    /// Failures to reach the service, server errors, request timeouts, and rate limiting are considered retryable.
    /// Errors that stem from the request itself, such as authentication failures or a missing table, are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::ReadBody { .. } => true,
            Self::Api { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// Acknowledgement of a successful import.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ImportResult {
    /// Unique ID the payload was imported under.
    #[serde(default)]
    pub unique_id: String,

    /// Database the payload was imported into.
    #[serde(default)]
    pub database: String,

    /// Table the payload was imported into.
    #[serde(default)]
    pub table: String,

    /// MD5 digest of the payload, as received by the service.
    #[serde(default)]
    pub md5_hex: String,

    /// Time the service spent handling the import, in seconds.
    #[serde(default)]
    pub elapsed_time: f64,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

fn error_message(body: &[u8]) -> String {
    if let Ok(parsed) = serde_json::from_slice::<ApiErrorBody>(body) {
        if let Some(message) = parsed.message.or(parsed.error).or(parsed.text) {
            return message;
        }
    }

    String::from_utf8_lossy(body).trim().to_string()
}

fn import_path(database: &str, table: &str, unique_id: &str, format: &str) -> String {
    let mut path = String::from("v3/table/import_with_id");
    for segment in [database, table, unique_id, format] {
        path.push('/');
        push_path_segment(&mut path, segment);
    }
    path
}

/// Appends `segment` to `path`, percent-encoding every byte that is not an unreserved URI character.
///
/// A segment made up only of dots is encoded in full, so it cannot be read as `.` or `..`.
fn push_path_segment(path: &mut String, segment: &str) {
    let dot_segment = segment.bytes().all(|b| b == b'.');
    for byte in segment.bytes() {
        let unreserved = byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~');
        if unreserved && !dot_segment {
            path.push(char::from(byte));
        } else {
            path.push_str(&format!("%{:02X}", byte));
        }
    }
}

/// A client for the bulk-import API.
///
/// Connections are pooled and shared between clones, so a single client can serve concurrent imports. Requests are sent
/// exactly once: the client never retries.
#[derive(Clone)]
pub struct ImportClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    base_uri: Uri,
    authorization: HeaderValue,
}

impl ImportClient {
    /// Creates a new `ImportClient` that sends requests to `base_uri`, authenticated with the given API key.
    ///
    /// The platform's root certificates are only loaded when `base_uri` uses HTTPS.
    ///
    /// # Errors
    ///
    /// If the TLS configuration could not be built, or the API key is not a valid header value, an error is returned.
    pub fn new(base_uri: Uri, api_key: &str) -> Result<Self, ImportError> {
        let mut authorization = HeaderValue::from_str(&format!("TD1 {}", api_key)).context(InvalidApiKey)?;
        authorization.set_sensitive(true);

        let use_tls = base_uri.scheme() == Some(&Scheme::HTTPS);
        let connector = build_connector(use_tls)?;
        let inner = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(DEFAULT_MAX_IDLE_CONNS_PER_HOST)
            .pool_idle_timeout(DEFAULT_IDLE_CONN_TIMEOUT)
            .build(connector);

        Ok(Self {
            inner,
            base_uri,
            authorization,
        })
    }

    /// Returns the base URI that requests are sent to.
    pub fn base_uri(&self) -> &Uri {
        &self.base_uri
    }

    /// Imports a payload into the given table.
    ///
    /// `unique_id` identifies the payload: the service ignores a payload whose unique ID it has already imported into
    /// the same table.
    ///
    /// # Errors
    ///
    /// If the request could not be sent, or the service responds with an error, an error is returned.
    pub async fn import(
        &self, database: &str, table: &str, format: &str, payload: Bytes, unique_id: &str,
    ) -> Result<ImportResult, ImportError> {
        let uri = format!("{}{}", self.base_uri, import_path(database, table, unique_id, format));
        let request = Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header(AUTHORIZATION, self.authorization.clone())
            .header(CONTENT_TYPE, CONTENT_TYPE_OCTET_STREAM.clone())
            .header(CONTENT_LENGTH, payload.len())
            .header(USER_AGENT, USER_AGENT_VALUE.clone())
            .body(Full::new(payload))
            .context(BuildRequest)?;

        let response = self.inner.request(request).await.context(Transport)?;
        let status = response.status();
        let body = response.into_body().collect().await.context(ReadBody)?.to_bytes();

        if !status.is_success() {
            return Err(ImportError::from_response(status, &body));
        }

        serde_json::from_slice(&body).context(InvalidResponse)
    }
}

fn build_connector(use_tls: bool) -> Result<HttpsConnector<HttpConnector>, ImportError> {
    let mut http_connector = HttpConnector::new();
    http_connector.enforce_http(false);
    http_connector.set_connect_timeout(Some(DEFAULT_CONNECT_TIMEOUT));

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let builder = if use_tls {
        HttpsConnectorBuilder::new()
            .with_provider_and_native_roots(provider)
            .context(NativeRoots)?
    } else {
        // Plain HTTP never performs a handshake, so no trust roots are needed.
        let tls_config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .context(Tls)?
            .with_root_certificates(RootCertStore::empty())
            .with_no_client_auth();
        HttpsConnectorBuilder::new().with_tls_config(tls_config)
    };

    Ok(builder.https_or_http().enable_http1().wrap_connector(http_connector))
}
