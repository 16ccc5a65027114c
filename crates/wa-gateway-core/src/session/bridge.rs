// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bridge session backend.
//!
//! Each session drives a child process (the "bridge") that runs the WhatsApp
//! Web automation. The gateway and the bridge exchange one JSON object per
//! line over the child's stdin/stdout:
//!
//! ```text
//! gateway -> bridge   {"id": 1, "method": "initialize", "params": {...}}
//! bridge  -> gateway  {"id": 1, "result": null}
//! bridge  -> gateway  {"id": 2, "error": {"message": "..."}}
//! bridge  -> gateway  {"event": "qr", "qr": "2@..."}
//! ```
//!
//! Messages with an `id` are responses and complete the pending request with
//! the same id; messages without one are events and go to the instance's
//! event queue unchanged in order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use super::traits::*;

/// How to launch the bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Executable to run.
    pub command: PathBuf,
    /// Arguments placed before the per-session arguments.
    pub args: Vec<String>,
    /// Upper bound for any single request to the bridge.
    pub request_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("node"),
            args: vec!["bridge/index.js".to_string()],
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Factory for bridge-backed sessions.
pub struct BridgeSessionFactory {
    config: BridgeConfig,
}

impl BridgeSessionFactory {
    /// Create a factory launching bridges with `config`.
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

impl SessionFactory for BridgeSessionFactory {
    fn backend(&self) -> &'static str {
        "bridge"
    }

    fn create(
        &self,
        options: SessionOptions,
        events: EventSink,
    ) -> Result<Arc<dyn MessagingSession>> {
        Ok(Arc::new(BridgeSession::new(
            self.config.clone(),
            options,
            events,
        )))
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// A session backed by one bridge process.
pub struct BridgeSession {
    config: BridgeConfig,
    options: SessionOptions,
    events: EventSink,
    last_id: AtomicU64,
    pending: PendingMap,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    child: Mutex<Option<Child>>,
    closing: Arc<AtomicBool>,
}

impl BridgeSession {
    fn new(config: BridgeConfig, options: SessionOptions, events: EventSink) -> Self {
        Self {
            config,
            options,
            events,
            last_id: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
            stdin: Arc::new(Mutex::new(None)),
            child: Mutex::new(None),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn spawn(&self) -> Result<()> {
        let mut child_slot = self.child.lock().await;
        if child_slot.is_some() {
            return Err(SessionError::StartFailed(
                "bridge already started".to_string(),
            ));
        }

        tokio::fs::create_dir_all(&self.options.session_dir).await?;

        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .arg("--session-dir")
            .arg(&self.options.session_dir)
            .arg("--client-id")
            .arg(&self.options.client_id)
            .env("WA_INSTANCE_ID", self.options.instance_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SessionError::StartFailed(format!(
                    "failed to spawn {}: {}",
                    self.config.command.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| {
            SessionError::StartFailed("bridge stdout not captured".to_string())
        })?;

        info!(
            instance_id = self.options.instance_id,
            pid = ?child.id(),
            command = %self.config.command.display(),
            "Spawned session bridge"
        );

        *self.stdin.lock().await = stdin;
        *child_slot = Some(child);

        tokio::spawn(read_loop(
            self.options.instance_id,
            stdout,
            self.pending.clone(),
            self.stdin.clone(),
            self.events.clone(),
            self.closing.clone(),
        ));

        Ok(())
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let mut line = serde_json::to_string(&BridgeRequest { id, method, params })?;
        line.push('\n');

        if let Err(e) = self.write_line(&line).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(SessionError::Timeout(method.to_string()))
            }
        }
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin.as_mut().ok_or(SessionError::Closed)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn kill(&self) {
        self.stdin.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                debug!(
                    instance_id = self.options.instance_id,
                    error = %e,
                    "Bridge kill failed (already exited?)"
                );
            }
        }
    }
}

#[async_trait]
impl MessagingSession for BridgeSession {
    fn instance_id(&self) -> i64 {
        self.options.instance_id
    }

    async fn initialize(&self) -> Result<()> {
        self.spawn().await?;

        let params = json!({
            "sessionDir": self.options.session_dir,
            "clientId": self.options.client_id,
        });
        if let Err(e) = self.request("initialize", params).await {
            self.closing.store(true, Ordering::SeqCst);
            self.kill().await;
            return Err(SessionError::StartFailed(e.to_string()));
        }

        Ok(())
    }

    async fn connection_state(&self) -> Result<String> {
        let state = self.request("getState", json!({})).await?;
        Ok(state.as_str().unwrap_or("UNKNOWN").to_string())
    }

    async fn send_message(&self, chat_id: &str, message: &OutboundMessage) -> Result<SentMessage> {
        let result = self
            .request(
                "sendMessage",
                json!({ "chatId": chat_id, "message": message }),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn destroy(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);

        if self.stdin.lock().await.is_some()
            && let Err(e) = self.request("destroy", json!({})).await
        {
            warn!(
                instance_id = self.options.instance_id,
                error = %e,
                "Bridge did not acknowledge destroy, killing it"
            );
        }

        self.kill().await;
        Ok(())
    }
}

async fn read_loop(
    instance_id: i64,
    stdout: ChildStdout,
    pending: PendingMap,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    events: EventSink,
    closing: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(instance_id, error = %e, "Failed to read from session bridge");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match decode_line(&line) {
            Ok(BridgeMessage::Response(response)) => {
                let Some(tx) = pending.lock().await.remove(&response.id) else {
                    warn!(instance_id, id = response.id, "Response for unknown request");
                    continue;
                };
                let _ = tx.send(response.into_result());
            }
            Ok(BridgeMessage::Event(event)) => {
                let _ = events.send(event.into());
            }
            Err(e) => {
                warn!(instance_id, error = %e, line = %line, "Unparsable bridge message");
            }
        }
    }

    // Pending requests fail with Closed once their senders drop.
    stdin.lock().await.take();
    pending.lock().await.clear();

    if closing.load(Ordering::SeqCst) {
        debug!(instance_id, "Session bridge exited");
    } else {
        warn!(instance_id, "Session bridge exited unexpectedly");
        let _ = events.send(SessionEvent::Disconnected("bridge exited".to_string()));
    }
}

#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BridgeMessage {
    Response(BridgeResponse),
    Event(BridgeEvent),
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    id: u64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<BridgeErrorPayload>,
}

impl BridgeResponse {
    fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(SessionError::Remote(error.message)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BridgeErrorPayload {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum BridgeEvent {
    Qr {
        qr: String,
    },
    Ready,
    Authenticated,
    AuthFailure {
        #[serde(default)]
        message: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    LoadingScreen {
        #[serde(default)]
        percent: f64,
        #[serde(default)]
        message: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

impl From<BridgeEvent> for SessionEvent {
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::Qr { qr } => SessionEvent::QrIssued(qr),
            BridgeEvent::Ready => SessionEvent::Ready,
            BridgeEvent::Authenticated => SessionEvent::Authenticated,
            BridgeEvent::AuthFailure { message } => SessionEvent::AuthFailed(message),
            BridgeEvent::Disconnected { reason } => SessionEvent::Disconnected(reason),
            BridgeEvent::LoadingScreen { percent, message } => SessionEvent::LoadingProgress {
                percent: percent.clamp(0.0, 100.0) as u8,
                message,
            },
            BridgeEvent::Error { message } => SessionEvent::Error(message),
        }
    }
}

fn decode_line(line: &str) -> Result<BridgeMessage> {
    serde_json::from_str(line).map_err(|e| SessionError::Protocol(e.to_string()))
}
