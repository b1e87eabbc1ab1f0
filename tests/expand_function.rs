use routelens::expand::{ExpandOptions, THIRD_PARTY_PLACEHOLDER, expand_function_with};
use routelens::locate::LocateOptions;
use routelens::model::DefinitionType;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn options(max_depth: usize) -> ExpandOptions {
    ExpandOptions {
        locate: LocateOptions {
            skip_source_map: true,
            ..LocateOptions::default()
        },
        max_depth: Some(max_depth),
    }
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(
        root,
        "src/db.ts",
        r#"import { Pool } from "pg";

export type User = { id: string; name: string };

const pool = new Pool();

export async function getUser(id: string): Promise<User> {
  const rows = await pool.query("select * from users where id = $1", [id]);
  return rows[0];
}
"#,
    );
    write(
        root,
        "src/lib/format.ts",
        r#"export const shout = (s: string) => s.toUpperCase() + bang();
export function bang() {
  return shout.length > 0 ? "!" : "";
}
"#,
    );
    write(root, "src/lib/index.ts", "export * from \"./format\";\n");
    write(root, "src/lib/math.ts", "export const double = (n: number) => n * 2;\n");
    write(
        root,
        "node_modules/zod/package.json",
        r#"{ "types": "./index.d.ts" }"#,
    );
    write(root, "node_modules/zod/index.d.ts", "export declare const z: any;\n");
    write(
        root,
        "src/index.ts",
        r#"import { Hono } from "hono";
import { z } from "zod";
import { getUser, type User } from "./db";
import { shout } from "./lib";
import * as math from "./lib/math";

const app = new Hono();
const GREETING = "hello";

app.get("/users/:id", async (c) => {
  const user: User = await getUser(c.req.param("id"));
  const schema = z.object({});
  return c.json({ name: shout(user.name), n: math.double(2), greeting: GREETING, schema });
});
"#,
    );
    dir
}

const HANDLER: &str = r#"async (c) => {
  const user: User = await getUser(c.req.param("id"));
  const schema = z.object({});
  return c.json({ name: shout(user.name), n: math.double(2), greeting: GREETING, schema });
}"#;

#[tokio::test]
async fn imported_helper_carries_full_source_and_provenance() {
    let dir = project();
    let expanded = expand_function_with(dir.path(), HANDLER, &options(5), false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(expanded.file, dir.path().join("src/index.ts"));
    assert_eq!(expanded.start_line, 10);

    let get_user = expanded.find("getUser").unwrap();
    assert_eq!(get_user.kind, DefinitionType::Function);
    let definition = get_user.definition.as_ref().unwrap();
    assert_eq!(definition.file, "src/db.ts");
    assert!(definition.uri.starts_with("file://"));
    let text = definition.text.as_deref().unwrap();
    assert!(text.starts_with("export async function getUser(id: string): Promise<User> {"));
    assert!(text.ends_with("return rows[0];\n}"));

    // Nested context of the helper
    let pool = get_user.context.iter().find(|e| e.name == "pool").unwrap();
    assert_eq!(pool.kind, DefinitionType::Unknown);
    assert_eq!(
        pool.definition.as_ref().unwrap().text.as_deref(),
        Some("const pool = new Pool();")
    );
}

#[tokio::test]
async fn types_constants_barrels_and_namespaces_resolve() {
    let dir = project();
    let expanded = expand_function_with(dir.path(), HANDLER, &options(5), false)
        .await
        .unwrap()
        .unwrap();

    let names: Vec<&str> = expanded.context.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["User", "getUser", "z", "shout", "math", "GREETING"]);

    let user = &expanded.context[0];
    assert_eq!(user.kind, DefinitionType::Type);

    let zod = &expanded.context[2];
    assert_eq!(zod.package.as_deref(), Some("zod"));
    assert_eq!(
        zod.definition.as_ref().unwrap().text.as_deref(),
        Some(THIRD_PARTY_PLACEHOLDER)
    );
    assert!(zod.context.is_empty());

    let shout = &expanded.context[3];
    assert_eq!(shout.definition.as_ref().unwrap().file, "src/lib/format.ts");

    let math = &expanded.context[4];
    assert_eq!(
        math.definition.as_ref().unwrap().text.as_deref(),
        Some("export const double = (n: number) => n * 2;\n")
    );

    let greeting = &expanded.context[5];
    assert_eq!(
        greeting.definition.as_ref().unwrap().text.as_deref(),
        Some("const GREETING = \"hello\";")
    );
    assert!(expanded.unresolved_names().is_empty());
}

#[tokio::test]
async fn mutual_recursion_terminates_and_depth_is_bounded() {
    let dir = project();
    let expanded = expand_function_with(dir.path(), HANDLER, &options(5), false)
        .await
        .unwrap()
        .unwrap();
    let shout = expanded.find("shout").unwrap();
    let bang = &shout.context[0];
    assert_eq!(bang.name, "bang");
    // `bang` refers back to `shout`, which is already expanded
    assert_eq!(bang.context.len(), 1);
    assert_eq!(bang.context[0].name, "shout");
    assert!(bang.context[0].context.is_empty());

    let shallow = expand_function_with(dir.path(), HANDLER, &options(1), false)
        .await
        .unwrap()
        .unwrap();
    assert!(shallow.context.iter().all(|entry| entry.context.is_empty()));
}

#[tokio::test]
async fn unknown_text_expands_to_none() {
    let dir = project();
    let expanded = expand_function_with(dir.path(), "() => notInTheProject()", &options(5), false)
        .await
        .unwrap();
    assert!(expanded.is_none());
}
