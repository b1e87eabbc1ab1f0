use routelens::LspError;
use routelens::expand::{Expander, THIRD_PARTY_PLACEHOLDER};
use routelens::locate::LocateOptions;
use routelens::lsp::client::read_frame;
use routelens::lsp::{LspRegistry, LspSettings, Session};
use routelens::model::{DefinitionType, Position};
use routelens::resolver::ModuleResolver;
use routelens::util::file_uri;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, value: Value) {
    let body = value.to_string();
    let frame = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
    writer.write_all(frame.as_bytes()).await.unwrap();
    writer.flush().await.unwrap();
}

fn reply(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Identifier under an LSP position, counting columns in UTF-16 units.
fn word_at(text: &str, line: u64, character: u64) -> Option<String> {
    let row = text.lines().nth(line as usize)?;
    let units: Vec<u16> = row.encode_utf16().collect();
    let prefix = String::from_utf16_lossy(units.get(..character as usize)?);
    let word: String = row[prefix.len()..]
        .chars()
        .take_while(|ch| ch.is_alphanumeric() || *ch == '_' || *ch == '$')
        .collect();
    (!word.is_empty()).then_some(word)
}

/// Minimal language server speaking framed JSON-RPC over a duplex pipe.
/// With `definitions`, a definition request answers by the identifier under
/// the cursor; otherwise it returns one fixed link.
async fn fake_server(
    read: DuplexStream,
    mut write: DuplexStream,
    seen: UnboundedSender<String>,
    definitions: Option<HashMap<String, Value>>,
) {
    let mut reader = BufReader::new(read);
    let mut held: Option<(Value, String)> = None;
    let mut documents: HashMap<String, String> = HashMap::new();
    while let Ok(Some(message)) = read_frame(&mut reader).await {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let Some(method) = message.get("method").and_then(Value::as_str).map(str::to_string) else {
            let _ = seen.send(format!("reply:{}", id.as_str().unwrap_or("?")));
            continue;
        };
        let _ = seen.send(method.clone());
        match method.as_str() {
            "initialize" => send(&mut write, reply(&id, json!({ "capabilities": {} }))).await,
            "initialized" => {
                send(
                    &mut write,
                    json!({ "jsonrpc": "2.0", "id": "cfg-1", "method": "workspace/configuration", "params": {} }),
                )
                .await;
                send(
                    &mut write,
                    json!({
                        "jsonrpc": "2.0",
                        "method": "textDocument/publishDiagnostics",
                        "params": { "uri": "file:///project/src/a.ts", "diagnostics": [{ "message": "boom" }] }
                    }),
                )
                .await;
                send(
                    &mut write,
                    json!({ "jsonrpc": "2.0", "method": "window/logMessage", "params": { "type": 3, "message": "ready" } }),
                )
                .await;
            }
            "textDocument/didOpen" => {
                let doc = &message["params"]["textDocument"];
                if let (Some(uri), Some(text)) = (doc["uri"].as_str(), doc["text"].as_str()) {
                    documents.insert(uri.to_string(), text.to_string());
                }
            }
            "textDocument/definition" if definitions.is_some() => {
                let params = &message["params"];
                let word = params["textDocument"]["uri"]
                    .as_str()
                    .and_then(|uri| documents.get(uri))
                    .and_then(|text| {
                        word_at(
                            text,
                            params["position"]["line"].as_u64().unwrap_or(0),
                            params["position"]["character"].as_u64().unwrap_or(0),
                        )
                    });
                let result = word
                    .and_then(|w| definitions.as_ref().and_then(|d| d.get(&w)).cloned())
                    .unwrap_or(Value::Null);
                send(&mut write, reply(&id, result)).await;
            }
            "textDocument/definition" => {
                let range = json!({ "start": { "line": 6, "character": 16 }, "end": { "line": 6, "character": 23 } });
                let full = json!({ "start": { "line": 6, "character": 0 }, "end": { "line": 9, "character": 1 } });
                send(
                    &mut write,
                    reply(
                        &id,
                        json!([{ "targetUri": "file:///project/src/db.ts", "targetRange": full, "targetSelectionRange": range }]),
                    ),
                )
                .await;
            }
            "textDocument/references" => send(&mut write, reply(&id, json!({ "bogus": true }))).await,
            "custom/slow" | "custom/fast" => match held.take() {
                None => held = Some((id, method)),
                Some((first_id, first_method)) => {
                    send(&mut write, reply(&id, json!({ "which": method }))).await;
                    send(&mut write, reply(&first_id, json!({ "which": first_method }))).await;
                }
            },
            "custom/fail" => {
                send(
                    &mut write,
                    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": -32601, "message": "nope" } }),
                )
                .await
            }
            "shutdown" => send(&mut write, reply(&id, Value::Null)).await,
            "exit" => break,
            _ => {}
        }
    }
}

async fn connect(timeout: Duration) -> (Session, UnboundedReceiver<String>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/a.ts"), "export const a = getUser();\n").unwrap();
    let (session, seen) = connect_in(dir.path(), timeout, None).await;
    (session, seen, dir)
}

async fn connect_in(
    root: &Path,
    timeout: Duration,
    definitions: Option<HashMap<String, Value>>,
) -> (Session, UnboundedReceiver<String>) {
    let (client_read, server_write) = tokio::io::duplex(64 * 1024);
    let (server_read, client_write) = tokio::io::duplex(64 * 1024);
    let (seen_tx, seen_rx) = unbounded_channel();
    tokio::spawn(fake_server(server_read, server_write, seen_tx, definitions));
    let session = Session::connect(root, client_read, client_write, timeout)
        .await
        .unwrap();
    (session, seen_rx)
}

async fn wait_for(seen: &mut UnboundedReceiver<String>, wanted: &str) {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(method) = seen.recv().await {
            if method == wanted {
                return true;
            }
        }
        false
    })
    .await;
    assert_eq!(found, Ok(true), "server never saw {wanted}");
}

#[tokio::test]
async fn handshake_answers_server_requests_and_caches_diagnostics() {
    let (session, mut seen, _dir) = connect(Duration::from_secs(2)).await;
    wait_for(&mut seen, "initialize").await;
    wait_for(&mut seen, "initialized").await;
    wait_for(&mut seen, "reply:cfg-1").await;

    let mut diagnostics = None;
    for _ in 0..50 {
        diagnostics = session.diagnostics("file:///project/src/a.ts");
        if diagnostics.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(diagnostics.unwrap()[0]["message"], "boom");
    assert!(session.is_alive());
}

#[tokio::test]
async fn definition_opens_the_document_once_and_accepts_links() {
    let (session, mut seen, dir) = connect(Duration::from_secs(2)).await;
    let file = dir.path().join("src/a.ts");
    let position = Position { line: 0, character: 17 };

    let first = session.definition(&file, position).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].uri, "file:///project/src/db.ts");
    assert_eq!(first[0].range.start.line, 6);
    assert_eq!(first[0].range.start.character, 16);
    session.definition(&file, position).await.unwrap();

    // Malformed results degrade to nothing
    assert!(session.references(&file, position).await.unwrap().is_empty());

    let mut opened = 0;
    while let Ok(method) = seen.try_recv() {
        if method == "textDocument/didOpen" {
            opened += 1;
        }
    }
    assert_eq!(opened, 1);
}

#[tokio::test]
async fn replies_are_paired_by_id_out_of_order() {
    let (session, _seen, _dir) = connect(Duration::from_secs(2)).await;
    let (slow, fast) = tokio::join!(
        session.request("custom/slow", json!({})),
        session.request("custom/fast", json!({}))
    );
    assert_eq!(slow.unwrap()["which"], "custom/slow");
    assert_eq!(fast.unwrap()["which"], "custom/fast");

    let err = session.request("custom/fail", json!({})).await.unwrap_err();
    assert!(matches!(err, LspError::Rpc { code: -32601, .. }));
}

#[tokio::test]
async fn unanswered_requests_time_out() {
    let (session, _seen, _dir) = connect(Duration::from_millis(150)).await;
    let err = session.request("custom/never", json!({})).await.unwrap_err();
    assert!(matches!(err, LspError::Timeout(150)));
}

#[tokio::test]
async fn registry_disposes_sessions_with_shutdown_and_exit() {
    let (session, mut seen, dir) = connect(Duration::from_secs(2)).await;
    let settings = LspSettings {
        command: "routelens-no-such-language-server".to_string(),
        args: Vec::new(),
        timeout: Duration::from_millis(200),
    };
    let registry = LspRegistry::new(settings);
    let session = registry.insert(session).await;
    assert_eq!(registry.len().await, 1);

    // A live session for the root is reused instead of spawning a process
    let again = registry.start(dir.path()).await.unwrap();
    assert!(std::sync::Arc::ptr_eq(&session, &again));

    registry.dispose_all().await;
    assert_eq!(registry.len().await, 0);
    wait_for(&mut seen, "shutdown").await;
    wait_for(&mut seen, "exit").await;

    assert!(!session.is_alive());
    assert!(matches!(
        session.request("custom/fast", json!({})).await,
        Err(LspError::ServerNotAvailable(_))
    ));
}

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

fn location(root: &Path, rel: &str, line: u32, character: u32) -> Value {
    let at = json!({ "line": line, "character": character });
    json!([{ "uri": file_uri(&root.join(rel)), "range": { "start": at, "end": at } }])
}

#[tokio::test]
async fn expander_falls_back_to_definitions_from_the_server() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "src/helpers.ts",
        "export function mystery(label: string) {\n  return label.length;\n}\n",
    );
    write(root, "node_modules/vendor-lib/index.d.ts", "export declare function vendor(): void;\n");
    write(
        root,
        "src/index.ts",
        "export const handler = (c) => {\n  const label = \"h\u{e9}llo \u{2192} w\u{f6}rld\"; const n = mystery(label);\n  vendor();\n  return c.json({ n, b: broken() });\n};\n",
    );

    let definitions = HashMap::from([
        ("mystery".to_string(), location(root, "src/helpers.ts", 0, 16)),
        ("vendor".to_string(), location(root, "node_modules/vendor-lib/index.d.ts", 0, 24)),
        ("broken".to_string(), json!({ "bogus": true })),
    ]);
    let (session, _seen) = connect_in(root, Duration::from_secs(2), Some(definitions)).await;
    let registry = LspRegistry::new(LspSettings {
        command: "routelens-no-such-language-server".to_string(),
        args: Vec::new(),
        timeout: Duration::from_millis(200),
    });
    registry.insert(session).await;

    let options = LocateOptions {
        skip_source_map: true,
        ..LocateOptions::default()
    };
    let resolver = Arc::new(ModuleResolver::new(root));
    let expanded = {
        let mut expander = Expander::new(root, resolver, Some(&registry), 3).unwrap();
        expander
            .expand(
                "(c) => {\n  const label = \"h\u{e9}llo \u{2192} w\u{f6}rld\"; const n = mystery(label);\n  vendor();\n  return c.json({ n, b: broken() });\n}",
                &options,
            )
            .await
            .unwrap()
            .unwrap()
    };
    registry.dispose_all().await;

    // The call site sits after multi-byte text, so the column must be sent
    // in UTF-16 units for the server to see `mystery`.
    let mystery = expanded.find("mystery").unwrap();
    assert_eq!(mystery.kind, DefinitionType::Function);
    let definition = mystery.definition.as_ref().unwrap();
    assert_eq!(definition.file, "src/helpers.ts");
    assert!(definition.text.as_deref().unwrap().starts_with("export function mystery("));

    let vendor = expanded.find("vendor").unwrap();
    assert_eq!(vendor.package.as_deref(), Some("vendor-lib"));
    assert_eq!(
        vendor.definition.as_ref().unwrap().text.as_deref(),
        Some(THIRD_PARTY_PLACEHOLDER)
    );

    assert_eq!(expanded.unresolved_names(), vec!["broken"]);
}
