//! The LSP client state machine (`spec.md` §4.3): request correlation,
//! document lifecycle, diagnostics aggregation, and graceful shutdown
//! over a framed JSON transport to a child process.
//!
//! Request correlation is a `DashMap<i64, oneshot::Sender<...>>` keyed by
//! a monotonically increasing `AtomicI64`, matching `SPEC_FULL.md`
//! §4.3's generalization of the teacher's callback-keyed-by-id emitter
//! into an owned actor with awaitable handles. Outbound writes are
//! serialized through a single writer task so only one task ever holds
//! the child's stdin.

use std::num::NonZeroUsize;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::timeout;
use url::Url;

use crate::error::LsmcpError;
use crate::lsp::message::{IncomingMessage, OutgoingNotification, OutgoingRequest, OutgoingResponse};
use crate::lsp::transport::{read_frame, write_frame};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(500);
/// Bound on the number of URIs with cached `publishDiagnostics` sets; a
/// long-lived client revisiting thousands of files must not grow this
/// map without limit.
const DIAGNOSTICS_CACHE_CAPACITY: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unstarted,
    Starting,
    Ready,
    Stopping,
    Stopped,
}

impl ClientState {
    pub fn label(&self) -> &'static str {
        match self {
            ClientState::Unstarted => "Unstarted",
            ClientState::Starting => "Starting",
            ClientState::Ready => "Ready",
            ClientState::Stopping => "Stopping",
            ClientState::Stopped => "Stopped",
        }
    }
}

struct PendingRequest {
    sender: oneshot::Sender<Result<Value, LsmcpError>>,
}

struct OpenDocument {
    #[allow(dead_code)]
    version: i32,
}

pub struct LspClient {
    state: RwLock<ClientState>,
    next_id: AtomicI64,
    pending: DashMap<i64, PendingRequest>,
    outbound_tx: mpsc::UnboundedSender<String>,
    open_documents: DashMap<Url, OpenDocument>,
    diagnostics: Mutex<LruCache<Url, Arc<Value>>>,
    diagnostics_notify: DashMap<Url, Arc<Notify>>,
    capabilities: RwLock<Option<Value>>,
    child: Mutex<Option<Child>>,
    request_timeout: Duration,
    config_sections: DashMap<String, Value>,
}

impl LspClient {
    /// Spawns `command` as a child process and wires up the reader,
    /// writer and stderr-drain tasks. The client starts in `Unstarted`;
    /// call [`LspClient::start`] to run the initialize handshake.
    pub fn spawn(command: &str, args: &[String], request_timeout: Duration) -> Result<Arc<Self>, LsmcpError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(LsmcpError::Io)?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let client = Arc::new(Self {
            state: RwLock::new(ClientState::Unstarted),
            next_id: AtomicI64::new(1),
            pending: DashMap::new(),
            outbound_tx,
            open_documents: DashMap::new(),
            diagnostics: Mutex::new(LruCache::new(NonZeroUsize::new(DIAGNOSTICS_CACHE_CAPACITY).unwrap())),
            diagnostics_notify: DashMap::new(),
            capabilities: RwLock::new(None),
            child: Mutex::new(Some(child)),
            request_timeout,
            config_sections: DashMap::new(),
        });

        tokio::spawn(writer_task(outbound_rx, stdin));
        tokio::spawn({
            let client = client.clone();
            async move { reader_task(client, stdout).await }
        });
        tokio::spawn(stderr_drain_task(stderr));

        Ok(client)
    }

    #[cfg(test)]
    fn new_for_test() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let client = Arc::new(Self {
            state: RwLock::new(ClientState::Unstarted),
            next_id: AtomicI64::new(1),
            pending: DashMap::new(),
            outbound_tx,
            open_documents: DashMap::new(),
            diagnostics: Mutex::new(LruCache::new(NonZeroUsize::new(DIAGNOSTICS_CACHE_CAPACITY).unwrap())),
            diagnostics_notify: DashMap::new(),
            capabilities: RwLock::new(None),
            child: Mutex::new(None),
            request_timeout: Duration::from_millis(200),
            config_sections: DashMap::new(),
        });
        (client, outbound_rx)
    }

    pub fn state(&self) -> ClientState {
        *self.state.read()
    }

    pub fn capabilities(&self) -> Option<Value> {
        self.capabilities.read().clone()
    }

    pub fn set_config_section(&self, section: impl Into<String>, value: Value) {
        self.config_sections.insert(section.into(), value);
    }

    /// Runs the initialize/initialized handshake. The client is `Ready`
    /// only after this completes and server capabilities are cached.
    pub async fn start(&self, workspace_folders: &[Url]) -> Result<(), LsmcpError> {
        *self.state.write() = ClientState::Starting;

        let params = json!({
            "processId": std::process::id(),
            "rootUri": workspace_folders.first().map(Url::as_str),
            "capabilities": {
                "textDocument": {
                    "documentSymbol": { "hierarchicalDocumentSymbolSupport": true }
                },
                "workspace": {
                    "workspaceFolders": true,
                    "configuration": true,
                }
            },
            "workspaceFolders": workspace_folders.iter()
                .map(|u| json!({ "uri": u.as_str(), "name": u.as_str() }))
                .collect::<Vec<_>>(),
        });

        let result = self.request_raw("initialize", params).await?;
        *self.capabilities.write() = result.get("capabilities").cloned();
        self.notify_raw("initialized", json!({}))?;
        *self.state.write() = ClientState::Ready;
        Ok(())
    }

    /// Sends `shutdown`, then `exit`, then terminates the child process
    /// after a short grace period. Shutdown errors are swallowed; all
    /// pending requests are cancelled.
    pub async fn stop(&self) -> Result<(), LsmcpError> {
        *self.state.write() = ClientState::Stopping;
        let _ = self.request_raw("shutdown", Value::Null).await;
        let _ = self.notify_raw("exit", Value::Null);

        #[cfg(unix)]
        self.send_sigterm();

        tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        self.cancel_all_pending();

        if let Some(child) = self.child.lock().as_mut() {
            if !matches!(child.try_wait(), Ok(Some(_))) {
                let _ = child.start_kill();
            }
        }
        *self.state.write() = ClientState::Stopped;
        Ok(())
    }

    /// Gives the child a chance to exit on its own terms before the
    /// grace-period `SIGKILL` fallback in [`LspClient::stop`].
    #[cfg(unix)]
    fn send_sigterm(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(child) = self.child.lock().as_ref() {
            if let Some(pid) = child.id() {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, LsmcpError> {
        if self.state() != ClientState::Ready {
            return Err(LsmcpError::NotReady { state: self.state().label() });
        }
        self.request_raw(method, params).await
    }

    async fn request_raw(&self, method: &str, params: Value) -> Result<Value, LsmcpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, PendingRequest { sender: tx });

        let body = serde_json::to_string(&OutgoingRequest::new(id, method, params))
            .map_err(|e| LsmcpError::Other(e.to_string()))?;
        if self.outbound_tx.send(body).is_err() {
            self.pending.remove(&id);
            return Err(LsmcpError::Other("LSP client transport is closed".to_string()));
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LsmcpError::Other("pending request was dropped".to_string())),
            Err(_) => {
                self.pending.remove(&id);
                Err(LsmcpError::Timeout { after: self.request_timeout })
            }
        }
    }

    fn notify_raw(&self, method: &str, params: Value) -> Result<(), LsmcpError> {
        let body = serde_json::to_string(&OutgoingNotification::new(method, params))
            .map_err(|e| LsmcpError::Other(e.to_string()))?;
        self.outbound_tx
            .send(body)
            .map_err(|_| LsmcpError::Other("LSP client transport is closed".to_string()))
    }

    /// Sends `didOpen`. Re-opening an already-open URI is a documented
    /// no-op rather than a refresh, since [`LspClient::update`] already
    /// covers the refresh case.
    pub fn open(&self, uri: Url, text: String, language_id: &str) -> Result<(), LsmcpError> {
        if self.open_documents.contains_key(&uri) {
            return Ok(());
        }
        self.open_documents.insert(uri.clone(), OpenDocument { version: 1 });
        let params = json!({
            "textDocument": {
                "uri": uri.as_str(),
                "languageId": language_id,
                "version": 1,
                "text": text,
            }
        });
        self.notify_raw("textDocument/didOpen", params)
    }

    /// Sends `didChange` with a full-text replacement.
    pub fn update(&self, uri: Url, text: String, version: i32) -> Result<(), LsmcpError> {
        self.open_documents.insert(uri.clone(), OpenDocument { version });
        let params = json!({
            "textDocument": { "uri": uri.as_str(), "version": version },
            "contentChanges": [{ "text": text }],
        });
        self.notify_raw("textDocument/didChange", params)
    }

    /// Sends `didClose` and purges any diagnostics cached for `uri`.
    pub fn close(&self, uri: &Url) -> Result<(), LsmcpError> {
        self.open_documents.remove(uri);
        self.diagnostics.lock().pop(uri);
        self.diagnostics_notify.remove(uri);
        let params = json!({ "textDocument": { "uri": uri.as_str() } });
        self.notify_raw("textDocument/didClose", params)
    }

    pub fn is_open(&self, uri: &Url) -> bool {
        self.open_documents.contains_key(uri)
    }

    /// Resolves with the latest published diagnostics set for `uri`,
    /// waiting for the next `publishDiagnostics` push if none has
    /// arrived yet. Implementation choice (documented, per `spec.md`
    /// §4.3's allowance): a set already cached from an earlier push is
    /// returned immediately rather than forcing callers to wait for a
    /// fresh push that may never come.
    pub async fn wait_for_diagnostics(&self, uri: &Url, wait_timeout: Duration) -> Result<Value, LsmcpError> {
        if let Some(existing) = self.diagnostics.lock().get(uri) {
            return Ok((**existing).clone());
        }
        let notify = self.diagnostics_notify.entry(uri.clone()).or_insert_with(|| Arc::new(Notify::new())).clone();
        match timeout(wait_timeout, notify.notified()).await {
            Ok(()) => self
                .diagnostics
                .lock()
                .get(uri)
                .map(|v| (**v).clone())
                .ok_or_else(|| LsmcpError::Other("diagnostics notified but none cached".to_string())),
            Err(_) => Err(LsmcpError::Timeout { after: wait_timeout }),
        }
    }

    /// Issues `textDocument/diagnostic` and normalizes the "full" vs
    /// "unchanged" report kinds against the previously cached set.
    pub async fn pull_diagnostics(&self, uri: &Url) -> Result<Value, LsmcpError> {
        let params = json!({ "textDocument": { "uri": uri.as_str() } });
        let result = self.request("textDocument/diagnostic", params).await?;
        let kind = result.get("kind").and_then(Value::as_str).unwrap_or("full");
        if kind == "unchanged" {
            return self
                .diagnostics
                .lock()
                .get(uri)
                .map(|v| (**v).clone())
                .ok_or_else(|| LsmcpError::Other("unchanged diagnostic report with no prior set".to_string()));
        }
        let items = result.get("items").cloned().unwrap_or_else(|| Value::Array(Vec::new()));
        self.diagnostics.lock().put(uri.clone(), Arc::new(items.clone()));
        Ok(items)
    }

    fn cancel_all_pending(&self) {
        let ids: Vec<i64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending
                    .sender
                    .send(Err(LsmcpError::Other("request cancelled: client is shutting down".to_string())));
            }
        }
    }

    fn handle_incoming(self: &Arc<Self>, raw: &str) {
        let message = match IncomingMessage::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse incoming LSP message");
                return;
            }
        };

        match message {
            IncomingMessage::Response { id, result, error } => {
                if let Some(id) = id.as_i64() {
                    if let Some((_, pending)) = self.pending.remove(&id) {
                        let resolved = match error {
                            Some(err) => Err(LsmcpError::Other(format!("{} (code {})", err.message, err.code))),
                            None => Ok(result.unwrap_or(Value::Null)),
                        };
                        let _ = pending.sender.send(resolved);
                    }
                }
            }
            IncomingMessage::Notification { method, params } => {
                if method == "textDocument/publishDiagnostics" {
                    self.handle_publish_diagnostics(params);
                } else {
                    tracing::trace!(method, "ignoring unhandled LSP notification");
                }
            }
            IncomingMessage::Request { id, method, params } => {
                let result = self.handle_server_request(&method, &params);
                let response = OutgoingResponse { jsonrpc: "2.0", id, result: Some(result), error: None };
                if let Ok(body) = serde_json::to_string(&response) {
                    let _ = self.outbound_tx.send(body);
                }
            }
        }
    }

    fn handle_publish_diagnostics(&self, params: Value) {
        let Some(uri_str) = params.get("uri").and_then(Value::as_str) else { return };
        let Ok(uri) = Url::parse(uri_str) else { return };
        self.diagnostics.lock().put(uri.clone(), Arc::new(params));
        if let Some(notify) = self.diagnostics_notify.get(&uri) {
            notify.notify_waiters();
        }
    }

    /// Answers server-initiated requests. Unknown methods get a
    /// generic `null` result rather than an error, so a misbehaving or
    /// unfamiliar server never wedges waiting for a reply.
    fn handle_server_request(&self, method: &str, params: &Value) -> Value {
        match method {
            "workspace/configuration" => {
                let items = params.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
                let values: Vec<Value> = items
                    .iter()
                    .map(|item| {
                        item.get("section")
                            .and_then(Value::as_str)
                            .and_then(|section| self.config_sections.get(section).map(|v| v.clone()))
                            .unwrap_or_else(|| json!({}))
                    })
                    .collect();
                Value::Array(values)
            }
            "window/workDoneProgress/create" => Value::Null,
            _ => Value::Null,
        }
    }
}

async fn writer_task(mut rx: mpsc::UnboundedReceiver<String>, mut stdin: ChildStdin) {
    while let Some(body) = rx.recv().await {
        if let Err(e) = write_frame(&mut stdin, &body).await {
            tracing::error!(error = %e, "failed to write LSP frame; stopping writer task");
            break;
        }
    }
}

async fn reader_task(client: Arc<LspClient>, stdout: ChildStdout) {
    let mut reader = BufReader::new(stdout);
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(raw)) => client.handle_incoming(&raw),
            Ok(None) => {
                tracing::debug!("LSP server stdout closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to read LSP frame; stopping reader task");
                break;
            }
        }
    }
    client.cancel_all_pending();
}

async fn stderr_drain_task(stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => tracing::debug!(target: "lsp_server_stderr", "{}", line.trim_end()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requests_fail_before_ready() {
        let (client, _rx) = LspClient::new_for_test();
        let result = client.request("textDocument/documentSymbol", json!({})).await;
        assert!(matches!(result, Err(LsmcpError::NotReady { .. })));
    }

    #[tokio::test]
    async fn request_round_trips_through_handle_incoming() {
        let (client, mut rx) = LspClient::new_for_test();
        *client.state.write() = ClientState::Ready;

        let client_clone = client.clone();
        let task = tokio::spawn(async move { client_clone.request("foo/bar", json!({"x": 1})).await });

        let sent = rx.recv().await.expect("request body sent");
        let value: Value = serde_json::from_str(&sent).unwrap();
        let id = value["id"].as_i64().unwrap();

        let response = json!({ "jsonrpc": "2.0", "id": id, "result": { "ok": true } });
        client.handle_incoming(&response.to_string());

        let result = task.await.unwrap().unwrap();
        assert_eq!(result, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn request_times_out_without_a_response() {
        let (client, _rx) = LspClient::new_for_test();
        *client.state.write() = ClientState::Ready;
        let result = client.request("foo/bar", json!({})).await;
        assert!(matches!(result, Err(LsmcpError::Timeout { .. })));
    }

    #[tokio::test]
    async fn open_is_a_no_op_when_already_open() {
        let (client, mut rx) = LspClient::new_for_test();
        let uri = Url::parse("file:///a.ts").unwrap();
        client.open(uri.clone(), "a".to_string(), "typescript").unwrap();
        client.open(uri.clone(), "b".to_string(), "typescript").unwrap();

        let first = rx.recv().await.unwrap();
        assert!(first.contains("didOpen"));
        // Only one didOpen should have been queued.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_purges_cached_diagnostics() {
        let (client, _rx) = LspClient::new_for_test();
        let uri = Url::parse("file:///a.ts").unwrap();
        client.handle_publish_diagnostics(json!({ "uri": uri.as_str(), "diagnostics": [] }));
        assert!(client.diagnostics.lock().contains(&uri));
        client.close(&uri).unwrap();
        assert!(!client.diagnostics.lock().contains(&uri));
    }

    #[tokio::test]
    async fn wait_for_diagnostics_returns_already_cached_set() {
        let (client, _rx) = LspClient::new_for_test();
        let uri = Url::parse("file:///a.ts").unwrap();
        client.handle_publish_diagnostics(json!({ "uri": uri.as_str(), "diagnostics": [1] }));
        let result = client.wait_for_diagnostics(&uri, Duration::from_millis(50)).await.unwrap();
        assert_eq!(result["diagnostics"], json!([1]));
    }

    #[tokio::test]
    async fn unknown_server_request_gets_generic_null_response() {
        let (client, mut rx) = LspClient::new_for_test();
        client.handle_incoming(&json!({"jsonrpc": "2.0", "id": 7, "method": "weird/method", "params": {}}).to_string());
        let sent = rx.recv().await.unwrap();
        let value: Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(value["id"], json!(7));
        assert_eq!(value["result"], Value::Null);
    }

    #[tokio::test]
    async fn workspace_configuration_unknown_section_is_empty_object() {
        let (client, mut rx) = LspClient::new_for_test();
        client.set_config_section("known", json!({ "enabled": true }));
        let request = json!({
            "jsonrpc": "2.0",
            "id": 9,
            "method": "workspace/configuration",
            "params": { "items": [{ "section": "known" }, { "section": "unknown" }] },
        });
        client.handle_incoming(&request.to_string());
        let sent = rx.recv().await.unwrap();
        let value: Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(value["result"], json!([{ "enabled": true }, {}]));
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_requests() {
        let (client, _rx) = LspClient::new_for_test();
        *client.state.write() = ClientState::Ready;
        let client_clone = client.clone();
        let task = tokio::spawn(async move { client_clone.request("slow/op", json!({})).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.stop().await.unwrap();
        let result = task.await.unwrap();
        assert!(result.is_err());
        assert_eq!(client.state(), ClientState::Stopped);
    }
}
