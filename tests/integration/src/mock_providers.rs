//! Mock upstream providers for integration testing
//!
//! Provides wiremock-based mock servers that simulate the Azure OpenAI
//! Responses API and the AWS Bedrock Converse API, plus a raw TCP upstream
//! that paces or cuts off a streamed body.

use crate::fixtures::{azure_error, azure_response, azure_sse_stream, bedrock_event_stream, bedrock_response};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Deployment served by [`MockAzure`]
pub const AZURE_DEPLOYMENT: &str = "gpt-4o";
/// Model served by [`MockBedrock`]
pub const BEDROCK_MODEL: &str = "anthropic.claude-v2";

const AZURE_PATH: &str = "/openai/deployments/gpt-4o/responses";
const BEDROCK_CONVERSE_PATH: &str = "/model/anthropic.claude-v2/converse";
const BEDROCK_STREAM_PATH: &str = "/model/anthropic.claude-v2/converse-stream";

/// Mock Azure OpenAI server
pub struct MockAzure {
    pub server: MockServer,
}

impl MockAzure {
    /// Create a new mock Azure server
    pub async fn new() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to configure the client with
    pub fn base_url(&self) -> String {
        format!("{}/openai", self.server.uri())
    }

    /// Requests received so far
    pub async fn requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// JSON bodies of the requests received so far
    pub async fn request_bodies(&self) -> Vec<Value> {
        self.requests()
            .await
            .iter()
            .map(|r| r.body_json().expect("request body is JSON"))
            .collect()
    }

    /// Setup a successful response
    pub async fn mock_response(&self, id: &str, text: &str) {
        Mock::given(method("POST"))
            .and(path(AZURE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(azure_response(id, AZURE_DEPLOYMENT, text)))
            .mount(&self.server)
            .await;
    }

    /// Setup an error response, optionally with a `Retry-After` header
    pub async fn mock_error(&self, status: u16, code: &str, message: &str, retry_after: Option<u64>) {
        let mut template = ResponseTemplate::new(status).set_body_json(azure_error(code, message));
        if let Some(seconds) = retry_after {
            template = template.append_header("Retry-After", seconds.to_string().as_str());
        }
        Mock::given(method("POST"))
            .and(path(AZURE_PATH))
            .respond_with(template)
            .mount(&self.server)
            .await;
    }

    /// Fail the first `failures` calls with `status`, then succeed
    pub async fn mock_flaky(&self, failures: u64, status: u16, id: &str, text: &str) {
        Mock::given(method("POST"))
            .and(path(AZURE_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_json(azure_error("server_error", "transient")))
            .up_to_n_times(failures)
            .mount(&self.server)
            .await;
        self.mock_response(id, text).await;
    }

    /// Setup a streamed response
    pub async fn mock_stream(&self, id: &str, deltas: &[&str]) {
        self.mock_raw_stream(azure_sse_stream(id, AZURE_DEPLOYMENT, deltas)).await;
    }

    /// Setup a stream with an arbitrary SSE body
    pub async fn mock_raw_stream(&self, body: String) {
        Mock::given(method("POST"))
            .and(path(AZURE_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&self.server)
            .await;
    }
}

/// Mock AWS Bedrock runtime server
pub struct MockBedrock {
    pub server: MockServer,
}

impl MockBedrock {
    /// Create a new mock Bedrock server
    pub async fn new() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to configure the client with
    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    /// Requests received so far
    pub async fn requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// JSON bodies of the requests received so far
    pub async fn request_bodies(&self) -> Vec<Value> {
        self.requests()
            .await
            .iter()
            .map(|r| r.body_json().expect("request body is JSON"))
            .collect()
    }

    /// Setup a successful Converse response
    pub async fn mock_converse(&self, text: &str) {
        Mock::given(method("POST"))
            .and(path(BEDROCK_CONVERSE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(bedrock_response(text)))
            .mount(&self.server)
            .await;
    }

    /// Setup an error response
    pub async fn mock_error(&self, status: u16, kind: &str, message: &str) {
        Mock::given(method("POST"))
            .and(path(BEDROCK_CONVERSE_PATH))
            .respond_with(
                ResponseTemplate::new(status)
                    .insert_header("x-amzn-ErrorType", kind)
                    .set_body_json(serde_json::json!({"message": message})),
            )
            .mount(&self.server)
            .await;
    }

    /// Setup a ConverseStream response
    pub async fn mock_stream(&self, deltas: &[&str]) {
        Mock::given(method("POST"))
            .and(path(BEDROCK_STREAM_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/vnd.amazon.eventstream")
                    .set_body_bytes(bedrock_event_stream(deltas)),
            )
            .mount(&self.server)
            .await;
    }
}

/// One step of a [`ScriptedUpstream`] response body
#[derive(Debug, Clone)]
pub enum BodyStep {
    /// Write bytes as one HTTP chunk
    Send(String),
    /// Pause before the next step
    Wait(Duration),
    /// Announce a chunk, then close the connection before sending it
    Abort,
}

/// Upstream that answers requests with a chunked `text/event-stream` body
/// written step by step
pub struct ScriptedUpstream {
    addr: SocketAddr,
}

impl ScriptedUpstream {
    /// Start serving `steps` to every connection
    pub async fn start(steps: Vec<BodyStep>) -> Self {
        Self::start_sequence(vec![steps]).await
    }

    /// Serve the n-th script to the n-th connection, repeating the last one
    pub async fn start_sequence(scripts: Vec<Vec<BodyStep>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let scripts: Vec<Arc<Vec<BodyStep>>> = scripts.into_iter().map(Arc::new).collect();
        tokio::spawn(async move {
            let mut served = 0;
            while let Ok((socket, _)) = listener.accept().await {
                let Some(steps) = scripts.get(served).or_else(|| scripts.last()) else {
                    return;
                };
                tokio::spawn(serve(socket, Arc::clone(steps)));
                served += 1;
            }
        });
        Self { addr }
    }

    /// Base URL for an Azure client
    pub fn azure_base_url(&self) -> String {
        format!("http://{}/openai", self.addr)
    }
}

async fn serve(mut socket: TcpStream, steps: Arc<Vec<BodyStep>>) {
    if read_request(&mut socket).await.is_err() {
        return;
    }
    let head = "HTTP/1.1 200 OK\r\n\
                Content-Type: text/event-stream\r\n\
                Transfer-Encoding: chunked\r\n\
                Connection: close\r\n\r\n";
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for step in steps.iter() {
        let written = match step {
            BodyStep::Send(data) => {
                let chunk = format!("{:x}\r\n{data}\r\n", data.len());
                socket.write_all(chunk.as_bytes()).await
            }
            BodyStep::Wait(pause) => {
                tokio::time::sleep(*pause).await;
                Ok(())
            }
            BodyStep::Abort => {
                let _ = socket.write_all(b"400\r\nevent: respon").await;
                let _ = socket.flush().await;
                return;
            }
        };
        if written.is_err() || socket.flush().await.is_err() {
            return;
        }
    }
    let _ = socket.write_all(b"0\r\n\r\n").await;
    let _ = socket.shutdown().await;
}

/// Read one request: headers, then a `Content-Length` body
async fn read_request(socket: &mut TcpStream) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(())
}
