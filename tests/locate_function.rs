use routelens::locate::{Hints, LocateOptions, locate, locate_direct};
use routelens::locate_function;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "src/handlers.ts",
        r#"import { getUser } from "./db";

export async function showUser(c) {
  const user = await getUser(c.req.param("id"));
  return c.json(user);
}

export const listUsers = async (c) => {
  return c.json([]);
};
"#,
    );
    write(dir.path(), "src/notes.md", "export const listUsers = async (c) => {\n  return c.json([]);\n};\n");
    write(dir.path(), "node_modules/pkg/index.js", "function shadow(c) { return c.json(1); }\n");
    dir
}

#[tokio::test]
async fn finds_async_function_without_async_keyword() {
    let dir = fixture();
    let captured = "function showUser(c) {\n    const user = await getUser(c.req.param(\"id\"));\n    return c.json(user);\n}";
    let location = locate_function(dir.path(), captured).await.unwrap();
    assert_eq!(location.file, dir.path().join("src/handlers.ts"));
    assert_eq!(location.start_line, 3);
    assert_eq!(location.start_column, 8);
    assert_eq!(location.end_line, 6);
}

#[tokio::test]
async fn finds_arrow_functions_with_different_whitespace() {
    let dir = fixture();
    let location = locate_function(dir.path(), "async (c) => { return c.json([]); }")
        .await
        .unwrap();
    assert_eq!(location.file, dir.path().join("src/handlers.ts"));
    assert_eq!(location.start_line, 8);
}

#[tokio::test]
async fn skipped_directories_and_missing_text_yield_none() {
    let dir = fixture();
    assert!(locate_function(dir.path(), "function shadow(c) { return c.json(1); }").await.is_none());
    assert!(locate_function(dir.path(), "() => neverWritten()").await.is_none());
    assert!(locate_direct(dir.path(), "").unwrap().is_none());
}

#[tokio::test]
async fn hinted_source_is_searched_first() {
    let dir = fixture();
    let options = LocateOptions {
        skip_source_map: true,
        hints: Hints {
            source_function: Some("async (c) => {\n  return c.json([]);\n}".to_string()),
            source_file: Some("src/handlers.ts".to_string()),
        },
    };
    let found = locate(dir.path(), "compiled text that matches nothing", &options)
        .await
        .unwrap();
    assert_eq!(found.text, "async (c) => {\n  return c.json([]);\n}");
}

#[tokio::test]
async fn compiled_output_maps_back_to_typed_source() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(
        root,
        "src/handler.ts",
        "import type { Context } from \"hono\";\n\nexport const handler = (c: Context) => c.text(\"hi\");\n",
    );
    write(root, "dist/handler.js", "export const handler = (c) => c.text(\"hi\");\n");
    write(
        root,
        "dist/handler.js.map",
        r#"{"version":3,"sources":["../src/handler.ts"],"names":[],"mappings":"AAEA,uBAAuB"}"#,
    );
    let found = locate(root, "(c) => c.text(\"hi\")", &LocateOptions::default())
        .await
        .unwrap();
    assert_eq!(found.file, root.join("src/handler.ts"));
    assert_eq!(found.location.start_line, 3);
}
