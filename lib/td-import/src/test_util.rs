use std::{
    collections::VecDeque,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode, Uri},
    routing::put,
    Router,
};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{Dispatch, Level};

use crate::{compression::decompress, TreasureDataConfiguration};

pub const TEST_DATABASE: &str = "testdb";
pub const TEST_TABLE: &str = "testtable";

/// A request received by `MockImportServer`.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub path: String,
    pub database: String,
    pub table: String,
    pub unique_id: String,
    pub format: String,
    pub authorization: Option<String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Decompresses and decodes the rows carried by this request.
    pub async fn rows(&self) -> Vec<rmpv::Value> {
        let decompressed = decompress(&self.body).await.expect("body should be valid gzip");
        decode_rows(&decompressed)
    }
}

#[derive(Clone, Default)]
struct IntakeState {
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    responses: Arc<Mutex<VecDeque<(StatusCode, String)>>>,
}

async fn handle_import(
    State(state): State<IntakeState>,
    Path((database, table, unique_id, format)): Path<(String, String, String, String)>, uri: Uri, headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    let authorization = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()).map(str::to_string);

    let response = state.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
        let ack = format!(
            r#"{{"unique_id":"{}","database":"{}","table":"{}","md5_hex":"","elapsed_time":1.0}}"#,
            unique_id, database, table
        );
        (StatusCode::OK, ack)
    });

    state.requests.lock().unwrap().push(RecordedRequest {
        path: uri.path().to_string(),
        database,
        table,
        unique_id,
        format,
        authorization,
        body: body.to_vec(),
    });

    response
}

/// A local stand-in for the import API.
///
/// Every import request is recorded. Responses are taken from a queue of canned responses, falling back to a successful
/// acknowledgement when the queue is empty.
pub struct MockImportServer {
    addr: SocketAddr,
    state: IntakeState,
    handle: JoinHandle<()>,
}

impl MockImportServer {
    pub async fn start() -> Self {
        let state = IntakeState::default();
        let app = Router::new()
            .route("/v3/table/import_with_id/{database}/{table}/{unique_id}/{format}", put(handle_import))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, handle }
    }

    /// Returns a configuration pointing at this server, for the test database and table.
    pub fn config(&self, api_key: &str) -> TreasureDataConfiguration {
        self.config_for(api_key, TEST_DATABASE, TEST_TABLE)
    }

    /// Returns a configuration pointing at this server, for the given database and table.
    pub fn config_for(&self, api_key: &str, database: &str, table: &str) -> TreasureDataConfiguration {
        TreasureDataConfiguration::new(api_key, database, table)
            .with_endpoint(self.addr.ip().to_string())
            .with_port(self.addr.port())
            .with_ssl(false)
    }

    /// Queues a response for the next request.
    pub fn enqueue_response(&self, status: StatusCode, body: &str) {
        self.state.responses.lock().unwrap().push_back((status, body.to_string()));
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for MockImportServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Decodes a stream of concatenated MessagePack values.
pub fn decode_rows(mut buf: &[u8]) -> Vec<rmpv::Value> {
    let mut rows = Vec::new();
    while !buf.is_empty() {
        rows.push(rmpv::decode::read_value(&mut buf).expect("row should be valid MessagePack"));
    }
    rows
}

/// Looks up a column in a decoded row.
pub fn column<'a>(row: &'a rmpv::Value, name: &str) -> Option<&'a rmpv::Value> {
    row.as_map()?
        .iter()
        .find(|(key, _)| key.as_str() == Some(name))
        .map(|(_, value)| value)
}

/// Log output captured from a `Dispatch`.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Creates a dispatcher that writes debug-level (and above) logs into this buffer.
    pub fn dispatch(&self) -> Dispatch {
        let logs = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || logs.clone())
            .finish();
        Dispatch::new(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
