//! Language server bridge.
//!
//! A [`Session`] owns one language server process for one project root.
//! [`LspRegistry`] keeps at most one live session per root and replaces a
//! session whose process has exited.

pub mod client;
pub mod protocol;

use crate::config::Config;
use crate::error::{LspError, LspResult};
use crate::model::Position;
use crate::util::file_uri;
use client::LspClient;
use protocol::{Location, parse_locations, text_document_position};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct LspSettings {
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl LspSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            command: config.lsp_command.clone(),
            args: config.lsp_args.clone(),
            timeout: Duration::from_millis(config.lsp_timeout_ms),
        }
    }
}

pub struct Session {
    root: PathBuf,
    client: LspClient,
    child: StdMutex<Option<Child>>,
    opened: Mutex<HashSet<String>>,
    disposed: AtomicBool,
}

impl Session {
    /// Spawn the server and complete the `initialize` handshake. The child is
    /// killed when any step fails.
    pub async fn start(root: &Path, settings: &LspSettings) -> LspResult<Session> {
        info!(command = %settings.command, root = %root.display(), "starting language server");
        let mut child = Command::new(&settings.command)
            .args(&settings.args)
            .current_dir(root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                LspError::ServerStartFailed(format!("{}: {err}", settings.command))
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            return Err(LspError::ServerStartFailed("stdio not captured".to_string()));
        };
        let session = Session {
            root: root.to_path_buf(),
            client: LspClient::new(stdout, stdin, settings.timeout),
            child: StdMutex::new(Some(child)),
            opened: Mutex::new(HashSet::new()),
            disposed: AtomicBool::new(false),
        };
        if let Err(err) = session.initialize().await {
            session.kill();
            return Err(LspError::ServerStartFailed(err.to_string()));
        }
        Ok(session)
    }

    /// Handshake over an existing connection, without a child process.
    pub async fn connect<R, W>(root: &Path, reader: R, writer: W, timeout: Duration) -> LspResult<Session>
    where
        R: tokio::io::AsyncRead + Send + Unpin + 'static,
        W: tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let session = Session {
            root: root.to_path_buf(),
            client: LspClient::new(reader, writer, timeout),
            child: StdMutex::new(None),
            opened: Mutex::new(HashSet::new()),
            disposed: AtomicBool::new(false),
        };
        session.initialize().await?;
        Ok(session)
    }

    async fn initialize(&self) -> LspResult<Value> {
        let root_uri = file_uri(&self.root);
        let name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".to_string());
        let params = json!({
            "processId": std::process::id(),
            "rootPath": self.root.to_string_lossy(),
            "rootUri": root_uri,
            "capabilities": {
                "textDocument": {
                    "definition": { "linkSupport": true },
                    "references": {},
                    "publishDiagnostics": {},
                    "synchronization": { "didSave": false }
                },
                "workspace": { "configuration": true, "workspaceFolders": true }
            },
            "workspaceFolders": [{ "uri": root_uri, "name": name }],
        });
        let result = self.client.request("initialize", Some(params)).await?;
        if !result.is_object() {
            return Err(LspError::Protocol("initialize returned no capabilities".to_string()));
        }
        self.client.notify("initialized", Some(json!({}))).await?;
        debug!(root = %self.root.display(), "language server initialized");
        Ok(result)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_alive(&self) -> bool {
        if self.disposed.load(Ordering::SeqCst) || self.client.is_closed() {
            return false;
        }
        match self.child.lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(child) => matches!(child.try_wait(), Ok(None)),
                None => true,
            },
            Err(_) => false,
        }
    }

    pub async fn request(&self, method: &str, params: Value) -> LspResult<Value> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(LspError::ServerNotAvailable("session disposed".to_string()));
        }
        self.client.request(method, Some(params)).await
    }

    /// Send `didOpen` once per file for this session.
    pub async fn did_open(&self, path: &Path) -> LspResult<String> {
        let uri = file_uri(path);
        let mut opened = self.opened.lock().await;
        if opened.contains(&uri) {
            return Ok(uri);
        }
        let text = tokio::fs::read_to_string(path).await?;
        let params = json!({
            "textDocument": {
                "uri": uri,
                "languageId": language_id(path),
                "version": 1,
                "text": text,
            }
        });
        self.client.notify("textDocument/didOpen", Some(params)).await?;
        opened.insert(uri.clone());
        Ok(uri)
    }

    pub async fn definition(&self, path: &Path, position: Position) -> LspResult<Vec<Location>> {
        let uri = self.did_open(path).await?;
        let result = self
            .request("textDocument/definition", text_document_position(&uri, position))
            .await?;
        Ok(parse_locations(&result))
    }

    pub async fn references(&self, path: &Path, position: Position) -> LspResult<Vec<Location>> {
        let uri = self.did_open(path).await?;
        let mut params = text_document_position(&uri, position);
        params["context"] = json!({ "includeDeclaration": false });
        let result = self.request("textDocument/references", params).await?;
        Ok(parse_locations(&result))
    }

    pub async fn execute_command(&self, command: &str, arguments: Vec<Value>) -> LspResult<Value> {
        self.request(
            "workspace/executeCommand",
            json!({ "command": command, "arguments": arguments }),
        )
        .await
    }

    pub fn diagnostics(&self, uri: &str) -> Option<Value> {
        self.client.diagnostics(uri)
    }

    /// `shutdown`, then `exit`, then kill. Safe to call more than once.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.client.is_closed() {
            if let Err(err) = self
                .client
                .request_with_timeout("shutdown", None, SHUTDOWN_TIMEOUT)
                .await
            {
                debug!("shutdown request failed: {err}");
            }
            let _ = self.client.notify("exit", None).await;
        }
        let child = self.child.lock().ok().and_then(|mut guard| guard.take());
        if let Some(mut child) = child {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await.is_err() {
                let _ = child.start_kill();
            }
        }
        debug!(root = %self.root.display(), "language server disposed");
    }

    fn kill(&self) {
        if let Ok(mut guard) = self.child.lock() {
            if let Some(child) = guard.as_mut() {
                let _ = child.start_kill();
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.kill();
    }
}

fn language_id(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("tsx") => "typescriptreact",
        Some("jsx") => "javascriptreact",
        Some("js" | "mjs" | "cjs") => "javascript",
        _ => "typescript",
    }
}

/// One session per canonical project root.
pub struct LspRegistry {
    settings: LspSettings,
    sessions: Mutex<HashMap<PathBuf, Arc<Session>>>,
}

impl LspRegistry {
    pub fn new(settings: LspSettings) -> Self {
        Self {
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Reuse the live session for `root`, replacing one whose process exited.
    pub async fn start(&self, root: &Path) -> LspResult<Arc<Session>> {
        let key = crate::util::canonical_or_clean(root);
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(&key) {
            if existing.is_alive() {
                return Ok(Arc::clone(existing));
            }
            warn!(root = %key.display(), "language server exited; replacing session");
            if let Some(stale) = sessions.remove(&key) {
                stale.dispose().await;
            }
        }
        let session = Arc::new(Session::start(&key, &self.settings).await?);
        sessions.insert(key, Arc::clone(&session));
        Ok(session)
    }

    /// Register an already connected session, disposing any previous one.
    pub async fn insert(&self, session: Session) -> Arc<Session> {
        let key = crate::util::canonical_or_clean(session.root());
        let session = Arc::new(session);
        let previous = self.sessions.lock().await.insert(key, Arc::clone(&session));
        if let Some(previous) = previous {
            previous.dispose().await;
        }
        session
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn dispose_all(&self) {
        let drained: Vec<Arc<Session>> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in drained {
            session.dispose().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_fails_to_start() {
        let settings = LspSettings {
            command: "routelens-no-such-language-server".to_string(),
            args: Vec::new(),
            timeout: Duration::from_millis(200),
        };
        let dir = tempfile::tempdir().unwrap();
        let err = Session::start(dir.path(), &settings).await.err().unwrap();
        assert!(matches!(err, LspError::ServerStartFailed(_)));

        let registry = LspRegistry::new(settings);
        assert!(registry.start(dir.path()).await.is_err());
        assert_eq!(registry.len().await, 0);
    }

    #[test]
    fn language_ids_follow_extension() {
        assert_eq!(language_id(Path::new("a.tsx")), "typescriptreact");
        assert_eq!(language_id(Path::new("a.mjs")), "javascript");
        assert_eq!(language_id(Path::new("a.ts")), "typescript");
    }
}
