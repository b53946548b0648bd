//! ==============================================================================
//! remote.rs - the origin's endpoints
//! ==============================================================================
//!
//! purpose:
//!     everything the reconciler needs from the server side, behind one
//!     trait so views can run against the real origin or a scripted one.
//!
//! endpoints (HttpBackend):
//!     GET  /data?email=                          dashboard snapshot
//!     GET  /data/?email=&container_id=&rack_id=  rack snapshot (oldest first)
//!     GET  /subscribe                            push feed: websocket, one json
//!                                                per text message (or, in stream
//!                                                mode, one json per line)
//!     GET  /containers_managed?email=            managed-set snapshot
//!     POST /containers_managed                   managed-set write-back
//!
//! relationships:
//!     - used by: reconciler.rs
//!     - decodes with: domain.rs, store/managed.rs
//!
//! ==============================================================================

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::domain::{SensorReading, ViewScope};
use crate::error::{Result, SyncError};
use crate::store::managed::{ContainerRacks, ManagedSet, ManagedSetUpload};

const FEED_BUFFER: usize = 256;

/// longest feed line held while waiting for its newline
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// how the origin delivers `/subscribe`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedTransport {
    /// websocket, one json reading per text message
    #[default]
    WebSocket,
    /// long-lived http response split by `FrameSplitter`
    Stream,
}

#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    /// one-shot bulk read used to seed a view
    async fn fetch_snapshot(&self, scope: &ViewScope) -> Result<Vec<SensorReading>>;

    /// open the push feed; frames are raw text, parsed by the caller
    async fn subscribe(&self) -> Result<PushFeed>;

    async fn fetch_managed(&self, email: &str) -> Result<ManagedSet>;

    async fn push_managed(&self, email: &str, set: &ManagedSet) -> Result<()>;
}

// ==============================================================================
// push feed
// ==============================================================================

/// receiving end of a push subscription
///
/// owns the task pumping frames off the connection; dropping the feed
/// aborts it, which closes the connection.
#[derive(Debug)]
pub struct PushFeed {
    frames: mpsc::Receiver<String>,
    pump: Option<JoinHandle<()>>,
}

impl PushFeed {
    /// a feed driven by hand; the feed ends when `tx` is dropped
    pub fn channel() -> (mpsc::Sender<String>, PushFeed) {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        (
            tx,
            PushFeed {
                frames: rx,
                pump: None,
            },
        )
    }

    fn with_pump(frames: mpsc::Receiver<String>, pump: JoinHandle<()>) -> Self {
        Self {
            frames,
            pump: Some(pump),
        }
    }

    /// next frame, or `None` once the channel has dropped
    pub async fn recv(&mut self) -> Option<String> {
        self.frames.recv().await
    }
}

impl Drop for PushFeed {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// splits a byte stream into feed frames
///
/// frames are newline-delimited json. lines carrying an SSE `data:` field
/// are unwrapped; other SSE fields and comments are skipped. a line longer
/// than the limit is dropped whole, up to and including its newline.
#[derive(Debug)]
pub struct FrameSplitter {
    pending: Vec<u8>,
    limit: usize,
    /// inside an oversized line, discarding until the next newline
    skipping: bool,
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }
}

impl FrameSplitter {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            limit,
            skipping: false,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut frames = Vec::new();
        for piece in chunk.split_inclusive(|b| *b == b'\n') {
            let complete = piece.ends_with(b"\n");
            if self.skipping {
                self.skipping = !complete;
                continue;
            }
            let body = if complete { &piece[..piece.len() - 1] } else { piece };
            if self.pending.len() + body.len() > self.limit {
                tracing::warn!("[FEED] dropped a frame longer than {} bytes", self.limit);
                self.pending.clear();
                self.skipping = !complete;
                continue;
            }
            self.pending.extend_from_slice(body);
            if complete {
                let line = std::mem::take(&mut self.pending);
                if let Some(frame) = Self::frame(&line) {
                    frames.push(frame);
                }
            }
        }
        frames
    }

    /// whatever is left when the stream ends without a trailing newline
    pub fn finish(&mut self) -> Option<String> {
        self.skipping = false;
        let rest = std::mem::take(&mut self.pending);
        Self::frame(&rest)
    }

    fn frame(line: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() || text.starts_with(':') {
            return None;
        }
        if let Some(data) = text.strip_prefix("data:") {
            let data = data.trim();
            return (!data.is_empty()).then(|| data.to_string());
        }
        if ["event:", "id:", "retry:"].iter().any(|f| text.starts_with(f)) {
            return None;
        }
        Some(text.to_string())
    }
}

// ==============================================================================
// http backend
// ==============================================================================

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    feed: FeedTransport,
}

impl HttpBackend {
    /// `request_timeout` bounds request/response calls; the push feed has
    /// no overall timeout, only the connect timeout
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout,
            feed: FeedTransport::default(),
        })
    }

    pub fn with_feed_transport(mut self, feed: FeedTransport) -> Self {
        self.feed = feed;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// the http base with its scheme swapped for ws/wss
    fn socket_url(&self, path: &str) -> String {
        let url = self.url(path);
        if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            url
        }
    }

    fn checked(endpoint: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(SyncError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            })
        }
    }

    async fn subscribe_socket(&self) -> Result<PushFeed> {
        let url = self.socket_url("/subscribe");
        let connecting = tokio_tungstenite::connect_async(url.as_str());
        let (mut socket, _) = match tokio::time::timeout(self.request_timeout, connecting).await {
            Ok(Ok(connected)) => connected,
            // the origin refused the upgrade with a plain http answer
            Ok(Err(tungstenite::Error::Http(response))) => {
                return Err(SyncError::Status {
                    endpoint: "/subscribe".to_string(),
                    status: response.status().as_u16(),
                })
            }
            Ok(Err(e)) => return Err(SyncError::Feed(Box::new(e))),
            Err(_) => {
                let timed_out = std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "websocket handshake timed out",
                );
                return Err(SyncError::Feed(Box::new(tungstenite::Error::Io(timed_out))));
            }
        };

        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let pump = tokio::spawn(async move {
            while let Some(message) = socket.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::debug!("[FEED] discarded a non-utf8 binary message");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    // pings are answered by the socket itself
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!("[FEED] socket error: {}", e);
                        return;
                    }
                };
                let frame = text.trim();
                if frame.is_empty() {
                    continue;
                }
                if tx.send(frame.to_string()).await.is_err() {
                    return;
                }
            }
            tracing::info!("[FEED] origin closed the socket");
        });

        Ok(PushFeed::with_pump(rx, pump))
    }

    async fn subscribe_stream(&self) -> Result<PushFeed> {
        let response = self.client.get(self.url("/subscribe")).send().await?;
        let response = Self::checked("/subscribe", response)?;

        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let pump = tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut splitter = FrameSplitter::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!("[FEED] stream error: {}", e);
                        return;
                    }
                };
                for frame in splitter.push(&chunk) {
                    if tx.send(frame).await.is_err() {
                        return;
                    }
                }
            }
            if let Some(frame) = splitter.finish() {
                let _ = tx.send(frame).await;
            }
            tracing::info!("[FEED] origin closed the stream");
        });

        Ok(PushFeed::with_pump(rx, pump))
    }
}

#[async_trait]
impl TelemetryBackend for HttpBackend {
    async fn fetch_snapshot(&self, scope: &ViewScope) -> Result<Vec<SensorReading>> {
        let (endpoint, request) = match scope {
            ViewScope::Dashboard { email } => (
                "/data",
                self.client
                    .get(self.url("/data"))
                    .query(&[("email", email.as_str())]),
            ),
            ViewScope::Rack {
                email,
                container_id,
                rack_id,
            } => (
                "/data/",
                self.client.get(self.url("/data/")).query(&[
                    ("email", email.as_str()),
                    ("container_id", container_id.as_str()),
                    ("rack_id", rack_id.as_str()),
                ]),
            ),
        };

        let response = request.timeout(self.request_timeout).send().await?;
        let body = Self::checked(endpoint, response)?.bytes().await?;

        let records: Vec<Value> =
            serde_json::from_slice(&body).map_err(|source| SyncError::Decode {
                what: "snapshot",
                source,
            })?;
        let total = records.len();
        let readings: Vec<SensorReading> =
            records.iter().filter_map(SensorReading::from_wire).collect();
        if readings.len() < total {
            tracing::debug!(
                "[SNAPSHOT] skipped {} malformed records out of {}",
                total - readings.len(),
                total
            );
        }
        Ok(readings)
    }

    async fn subscribe(&self) -> Result<PushFeed> {
        match self.feed {
            FeedTransport::WebSocket => self.subscribe_socket().await,
            FeedTransport::Stream => self.subscribe_stream().await,
        }
    }

    async fn fetch_managed(&self, email: &str) -> Result<ManagedSet> {
        let response = self
            .client
            .get(self.url("/containers_managed"))
            .query(&[("email", email)])
            .timeout(self.request_timeout)
            .send()
            .await?;

        // the origin answers 404 for an identity it has never stored
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!("[MANAGED] no remote record for {}", email);
            return Ok(ManagedSet::new());
        }

        let body = Self::checked("/containers_managed", response)?.bytes().await?;
        let entries: Vec<ContainerRacks> =
            serde_json::from_slice(&body).map_err(|source| SyncError::Decode {
                what: "managed set",
                source,
            })?;
        Ok(ManagedSet::from_wire(entries))
    }

    async fn push_managed(&self, email: &str, set: &ManagedSet) -> Result<()> {
        let upload = ManagedSetUpload {
            email: email.to_string(),
            containers: set.to_wire(),
        };
        let response = self
            .client
            .post(self.url("/containers_managed"))
            .json(&upload)
            .timeout(self.request_timeout)
            .send()
            .await?;
        Self::checked("/containers_managed", response)?;
        Ok(())
    }
}
