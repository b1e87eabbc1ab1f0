//! JSON-RPC client over a language server's stdio.
//!
//! Frames use the `Content-Length` header. One reader task dispatches
//! responses to waiting requests by id, so replies may arrive in any order.

use super::protocol::{Incoming, Notification, Reply, Request, RequestId, Response};
use crate::error::{LspError, LspResult};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

type Writer = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;
type Pending = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Response>>>>;
type Diagnostics = Arc<StdMutex<HashMap<String, Value>>>;

pub struct LspClient {
    writer: Writer,
    pending: Pending,
    diagnostics: Diagnostics,
    next_id: AtomicI64,
    closed: Arc<AtomicBool>,
    timeout: Duration,
    reader: JoinHandle<()>,
}

impl LspClient {
    pub fn new<R, W>(reader: R, writer: W, timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: Writer = Arc::new(Mutex::new(Box::new(writer)));
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let diagnostics: Diagnostics = Arc::new(StdMutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(reader_loop(
            BufReader::new(reader),
            Arc::clone(&writer),
            Arc::clone(&pending),
            Arc::clone(&diagnostics),
            Arc::clone(&closed),
        ));

        Self {
            writer,
            pending,
            diagnostics,
            next_id: AtomicI64::new(1),
            closed,
            timeout,
            reader,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> LspResult<Value> {
        self.request_with_timeout(method, params, self.timeout).await
    }

    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> LspResult<Value> {
        if self.is_closed() {
            return Err(LspError::ConnectionClosed);
        }
        let id = RequestId::Int(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        if let Err(err) = write_frame(&self.writer, &Request::new(id.clone(), method, params)).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response.into_result().map_err(|err| LspError::Rpc {
                code: err.code,
                message: err.message,
            }),
            Ok(Err(_)) => Err(LspError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                debug!(method, "language server request timed out");
                Err(LspError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> LspResult<()> {
        if self.is_closed() {
            return Err(LspError::ConnectionClosed);
        }
        write_frame(&self.writer, &Notification::new(method, params)).await
    }

    /// Last `publishDiagnostics` payload for `uri`.
    pub fn diagnostics(&self, uri: &str) -> Option<Value> {
        self.diagnostics
            .lock()
            .ok()
            .and_then(|cache| cache.get(uri).cloned())
    }
}

impl Drop for LspClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn write_frame<T: Serialize>(writer: &Writer, message: &T) -> LspResult<()> {
    let body = serde_json::to_string(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut writer = writer.lock().await;
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(body.as_bytes()).await?;
    writer.flush().await?;
    trace!("sent: {body}");
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean end of stream.
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> LspResult<Option<Value>> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let line = line.trim();
        if line.is_empty() {
            if content_length.is_some() {
                break;
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let parsed = value
                    .trim()
                    .parse()
                    .map_err(|_| LspError::Protocol(format!("invalid Content-Length: {value}")))?;
                content_length = Some(parsed);
            }
        }
    }
    let mut body = vec![0u8; content_length.unwrap_or(0)];
    reader.read_exact(&mut body).await?;
    trace!("received: {}", String::from_utf8_lossy(&body));
    Ok(Some(serde_json::from_slice(&body)?))
}

async fn reader_loop<R: AsyncRead + Unpin>(
    mut reader: BufReader<R>,
    writer: Writer,
    pending: Pending,
    diagnostics: Diagnostics,
    closed: Arc<AtomicBool>,
) {
    loop {
        let value = match read_frame(&mut reader).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                debug!("language server closed its output");
                break;
            }
            Err(LspError::Json(err)) => {
                warn!("discard malformed message: {err}");
                continue;
            }
            Err(err) => {
                warn!("language server read failed: {err}");
                break;
            }
        };
        match Incoming::from_value(value) {
            Some(Incoming::Response(response)) => {
                match pending.lock().await.remove(&response.id) {
                    Some(sender) => {
                        let _ = sender.send(response);
                    }
                    None => debug!(id = ?response.id, "response for unknown request"),
                }
            }
            Some(Incoming::Request { id, method, .. }) => {
                trace!(method = %method, "answer server request with null");
                if let Err(err) = write_frame(&writer, &Reply::null(id)).await {
                    warn!("failed to answer {method}: {err}");
                }
            }
            Some(Incoming::Notification { method, params }) => {
                handle_notification(&method, params, &diagnostics)
            }
            None => debug!("ignore non JSON-RPC message"),
        }
    }
    closed.store(true, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with ConnectionClosed.
    pending.lock().await.clear();
}

fn handle_notification(method: &str, params: Value, diagnostics: &Diagnostics) {
    match method {
        "textDocument/publishDiagnostics" => {
            let Some(uri) = params.get("uri").and_then(Value::as_str) else {
                return;
            };
            let entries = params.get("diagnostics").cloned().unwrap_or(Value::Null);
            if let Ok(mut cache) = diagnostics.lock() {
                cache.insert(uri.to_string(), entries);
            }
        }
        "window/logMessage" | "window/showMessage" => {
            let message = params.get("message").and_then(Value::as_str).unwrap_or("");
            match params.get("type").and_then(Value::as_u64) {
                Some(1) => error!(target: "routelens::lsp", "{message}"),
                Some(2) => warn!(target: "routelens::lsp", "{message}"),
                Some(3) => info!(target: "routelens::lsp", "{message}"),
                _ => debug!(target: "routelens::lsp", "{message}"),
            }
        }
        other => trace!(method = other, "ignored notification"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_frames_with_extra_headers() {
        let raw = b"Content-Type: application/vscode-jsonrpc\r\nContent-Length: 17\r\n\r\n{\"id\":1,\"x\":true}";
        let mut reader = BufReader::new(&raw[..]);
        let value = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(value["id"], 1);
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bad_content_length_is_a_protocol_error() {
        let raw = b"Content-Length: nope\r\n\r\n{}";
        let mut reader = BufReader::new(&raw[..]);
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(LspError::Protocol(_))
        ));
    }
}
