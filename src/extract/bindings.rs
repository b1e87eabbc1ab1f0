use super::syntax::{call_arguments, call_target_node, import_source, node_text, string_value};
use crate::model::{BindingKind, ImportBinding};
use std::path::Path;
use tree_sitter::Node;

/// Collect every import, re-export and top-level `require` binding in a file,
/// in source order.
pub fn collect_bindings(root: Node<'_>, source: &str, file: &Path) -> Vec<ImportBinding> {
    let mut out = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        match child.kind() {
            "import_statement" => import_bindings(child, source, file, &mut out),
            "export_statement" => reexport_bindings(child, source, file, &mut out),
            "lexical_declaration" | "variable_declaration" => {
                require_bindings(child, source, file, &mut out)
            }
            _ => {}
        }
    }
    out
}

fn push(
    out: &mut Vec<ImportBinding>,
    file: &Path,
    specifier: &str,
    local: String,
    imported: String,
    kind: BindingKind,
) {
    out.push(ImportBinding {
        local,
        imported,
        specifier: specifier.to_string(),
        kind,
        file: file.to_path_buf(),
    });
}

fn import_bindings(node: Node<'_>, source: &str, file: &Path, out: &mut Vec<ImportBinding>) {
    let Some(specifier) = import_source(node, source) else {
        return;
    };
    let mut cursor = node.walk();
    for clause in node.named_children(&mut cursor) {
        if clause.kind() != "import_clause" {
            continue;
        }
        let mut inner = clause.walk();
        for part in clause.named_children(&mut inner) {
            match part.kind() {
                "identifier" => push(
                    out,
                    file,
                    &specifier,
                    node_text(part, source),
                    "default".to_string(),
                    BindingKind::Default,
                ),
                "namespace_import" => {
                    let mut ns_cursor = part.walk();
                    let name = part
                        .named_children(&mut ns_cursor)
                        .find(|n| n.kind() == "identifier")
                        .map(|n| node_text(n, source));
                    if let Some(name) = name {
                        push(out, file, &specifier, name, "*".to_string(), BindingKind::Namespace);
                    }
                }
                "named_imports" => {
                    let mut spec_cursor = part.walk();
                    for spec in part.named_children(&mut spec_cursor) {
                        if spec.kind() != "import_specifier" {
                            continue;
                        }
                        let Some((imported, local)) = specifier_names(spec, source) else {
                            continue;
                        };
                        let kind = if imported == "default" {
                            BindingKind::Default
                        } else {
                            BindingKind::Named
                        };
                        push(out, file, &specifier, local, imported, kind);
                    }
                }
                _ => {}
            }
        }
    }
}

fn reexport_bindings(node: Node<'_>, source: &str, file: &Path, out: &mut Vec<ImportBinding>) {
    let Some(specifier) = import_source(node, source) else {
        return;
    };
    let mut cursor = node.walk();
    let mut saw_clause = false;
    for part in node.named_children(&mut cursor) {
        match part.kind() {
            "export_clause" => {
                saw_clause = true;
                let mut spec_cursor = part.walk();
                for spec in part.named_children(&mut spec_cursor) {
                    if spec.kind() != "export_specifier" {
                        continue;
                    }
                    if let Some((imported, local)) = specifier_names(spec, source) {
                        push(out, file, &specifier, local, imported, BindingKind::ReExport);
                    }
                }
            }
            "namespace_export" => {
                saw_clause = true;
                let mut ns_cursor = part.walk();
                let name = part
                    .named_children(&mut ns_cursor)
                    .last()
                    .map(|n| node_text(n, source).trim_matches(|c| c == '"' || c == '\'').to_string());
                if let Some(name) = name {
                    push(out, file, &specifier, name, "*".to_string(), BindingKind::Namespace);
                }
            }
            _ => {}
        }
    }
    if !saw_clause {
        // export * from "./x"
        push(
            out,
            file,
            &specifier,
            "*".to_string(),
            "*".to_string(),
            BindingKind::ReExport,
        );
    }
}

/// `const x = require("y")` and `const { a, b: c } = require("y")`.
fn require_bindings(node: Node<'_>, source: &str, file: &Path, out: &mut Vec<ImportBinding>) {
    let mut cursor = node.walk();
    for declarator in node.named_children(&mut cursor) {
        if declarator.kind() != "variable_declarator" {
            continue;
        }
        let (Some(name), Some(value)) = (
            declarator.child_by_field_name("name"),
            declarator.child_by_field_name("value"),
        ) else {
            continue;
        };
        let Some(specifier) = require_specifier(value, source) else {
            continue;
        };
        match name.kind() {
            "identifier" => push(
                out,
                file,
                &specifier,
                node_text(name, source),
                "default".to_string(),
                BindingKind::Default,
            ),
            "object_pattern" => {
                let mut pattern_cursor = name.walk();
                for prop in name.named_children(&mut pattern_cursor) {
                    match prop.kind() {
                        "shorthand_property_identifier_pattern" => {
                            let local = node_text(prop, source);
                            push(out, file, &specifier, local.clone(), local, BindingKind::Named);
                        }
                        "pair_pattern" => {
                            let key = prop.child_by_field_name("key").map(|k| node_text(k, source));
                            let value = prop.child_by_field_name("value");
                            if let (Some(key), Some(value)) = (key, value) {
                                if value.kind() == "identifier" {
                                    push(
                                        out,
                                        file,
                                        &specifier,
                                        node_text(value, source),
                                        key,
                                        BindingKind::Named,
                                    );
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
}

fn require_specifier(value: Node<'_>, source: &str) -> Option<String> {
    if value.kind() != "call_expression" {
        return None;
    }
    let target = call_target_node(value)?;
    if target.kind() != "identifier" || node_text(target, source) != "require" {
        return None;
    }
    let first = call_arguments(value).into_iter().next()?;
    string_value(first, source)
}

/// (imported, local) for an import or export specifier.
fn specifier_names(spec: Node<'_>, source: &str) -> Option<(String, String)> {
    let name = spec.child_by_field_name("name")?;
    let imported = node_text(name, source)
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string();
    let local = spec
        .child_by_field_name("alias")
        .map(|alias| node_text(alias, source))
        .unwrap_or_else(|| imported.clone());
    Some((imported, local))
}

pub fn find_binding<'a>(bindings: &'a [ImportBinding], local: &str) -> Option<&'a ImportBinding> {
    bindings
        .iter()
        .filter(|b| b.kind != BindingKind::ReExport)
        .find(|b| b.local == local)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::Language;
    use crate::workspace::SourceParser;
    use std::path::PathBuf;

    fn bindings_of(source: &str) -> Vec<ImportBinding> {
        let mut parser = SourceParser::new().unwrap();
        let tree = parser.parse(Language::TypeScript, source).unwrap();
        collect_bindings(tree.root_node(), source, &PathBuf::from("/p/src/index.ts"))
    }

    #[test]
    fn collects_import_forms() {
        let source = r#"
import app from "./app";
import { Hono as App, type Context } from "hono";
import * as db from "./db";
const { readFile: rf } = require("node:fs");
"#;
        let bindings = bindings_of(source);
        let summary: Vec<(&str, &str, &str, BindingKind)> = bindings
            .iter()
            .map(|b| (b.local.as_str(), b.imported.as_str(), b.specifier.as_str(), b.kind))
            .collect();
        assert!(summary.contains(&("app", "default", "./app", BindingKind::Default)));
        assert!(summary.contains(&("App", "Hono", "hono", BindingKind::Named)));
        assert!(summary.contains(&("db", "*", "./db", BindingKind::Namespace)));
        assert!(summary.contains(&("rf", "readFile", "node:fs", BindingKind::Named)));
    }

    #[test]
    fn collects_reexports() {
        let source = r#"
export { getUser, listUsers as list } from "./users";
export * from "./posts";
"#;
        let bindings = bindings_of(source);
        assert!(bindings.iter().any(|b| b.local == "list"
            && b.imported == "listUsers"
            && b.kind == BindingKind::ReExport));
        assert!(bindings
            .iter()
            .any(|b| b.local == "*" && b.specifier == "./posts"));
        assert!(find_binding(&bindings, "getUser").is_none());
    }
}
