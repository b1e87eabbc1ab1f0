use routelens::{MonitorOptions, Resource, setup_monitoring_with};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn options() -> MonitorOptions {
    MonitorOptions {
        lsp_enabled: false,
        debounce_ms: 50,
        ..MonitorOptions::default()
    }
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "src/index.ts",
        r#"import { Hono } from "hono";
import admin from "./admin";

const app = new Hono();
app.get("/", (c) => c.text("home"));
app.route("/admin", admin);
"#,
    );
    write(
        dir.path(),
        "src/admin.ts",
        r#"import { Hono } from "hono";
const admin = new Hono();
admin.get("/stats", (c) => c.json({}));
export default admin;
"#,
    );
    dir
}

fn from_file<'a>(resources: &'a [Resource], rel: &str) -> Vec<(&'a str, &'a str, &'a str)> {
    let marker = format!("{rel}@");
    resources
        .iter()
        .filter(|r| r.id.contains(&marker))
        .map(|r| (r.id.as_str(), r.method.as_str(), r.path.as_str()))
        .collect()
}

#[test]
fn editing_one_file_leaves_other_resources_untouched() {
    let dir = project();
    let monitor = setup_monitoring_with(dir.path(), options()).unwrap();
    let before = monitor.find_routes();
    let index_before: Vec<_> = from_file(&before.resources, "src/index.ts")
        .into_iter()
        .map(|(id, m, p)| (id.to_string(), m.to_string(), p.to_string()))
        .collect();

    write(
        dir.path(),
        "src/admin.ts",
        r#"import { Hono } from "hono";
const admin = new Hono();
admin.get("/stats", (c) => c.json({}));
admin.delete("/cache", (c) => c.body(null, 204));
export default admin;
"#,
    );
    let stats = monitor.refresh_paths(&[PathBuf::from("src/admin.ts")]);
    assert_eq!(stats.updated, 1);
    assert!(!stats.config_changed);

    let after = monitor.find_routes();
    let index_after: Vec<_> = from_file(&after.resources, "src/index.ts")
        .into_iter()
        .map(|(id, m, p)| (id.to_string(), m.to_string(), p.to_string()))
        .collect();
    assert_eq!(index_before, index_after);
    assert!(
        after
            .resources
            .iter()
            .any(|r| r.method == "DELETE" && r.path == "/admin/cache")
    );
}

#[test]
fn deleted_files_drop_their_routes() {
    let dir = project();
    let monitor = setup_monitoring_with(dir.path(), options()).unwrap();
    assert!(monitor.find_routes().resources.iter().any(|r| r.path == "/admin/stats"));

    fs::remove_file(dir.path().join("src/admin.ts")).unwrap();
    let stats = monitor.refresh_paths(&[dir.path().join("src/admin.ts")]);
    assert_eq!(stats.removed, 1);

    let result = monitor.find_routes();
    assert!(result.resources.iter().all(|r| r.path != "/admin/stats"));
    assert!(result.resources.iter().any(|r| r.path == "/"));
    assert!(!monitor.files().iter().any(|f| f.ends_with("admin.ts")));
}

#[test]
fn config_edits_are_reported() {
    let dir = project();
    let monitor = setup_monitoring_with(dir.path(), options()).unwrap();
    write(dir.path(), "tsconfig.json", r#"{ "compilerOptions": {} }"#);
    let stats = monitor.refresh_paths(&[PathBuf::from("tsconfig.json")]);
    assert!(stats.config_changed);
    assert_eq!(stats.updated, 0);
}

#[tokio::test]
async fn start_and_teardown_are_idempotent() {
    let dir = project();
    let monitor = setup_monitoring_with(dir.path(), options()).unwrap();
    if monitor.start().is_err() {
        // No file notification backend in this environment
        return;
    }
    assert!(monitor.start().is_ok());
    assert!(monitor.is_watching());

    monitor.teardown().await;
    monitor.teardown().await;
    assert!(!monitor.is_watching());
    assert!(monitor.start().is_err());
}

#[tokio::test]
async fn watcher_picks_up_new_routes() {
    let dir = project();
    let monitor = setup_monitoring_with(dir.path(), options()).unwrap();
    if monitor.start().is_err() {
        return;
    }
    let mut updates = monitor.subscribe();

    write(
        dir.path(),
        "src/health.ts",
        r#"import { Hono } from "hono";
const health = new Hono();
health.get("/healthz", (c) => c.text("ok"));
"#,
    );

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = false;
    while Instant::now() < deadline {
        if monitor.find_routes().resources.iter().any(|r| r.path == "/healthz") {
            seen = true;
            break;
        }
        let _ = tokio::time::timeout(Duration::from_millis(200), updates.recv()).await;
    }
    monitor.teardown().await;
    assert!(seen, "watcher never reported the new route");
}
