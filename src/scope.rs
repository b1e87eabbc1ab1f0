//! Free identifier analysis for a single function node.

use crate::extract::syntax::{is_function_declaration, is_function_node, node_text, position};
use crate::model::Position;
use std::collections::HashSet;
use tree_sitter::Node;

/// Runtime globals that never need expansion.
pub const GLOBALS: &[&str] = &[
    "AbortController", "Array", "ArrayBuffer", "Awaited", "BigInt", "Blob", "Boolean", "Buffer",
    "Date", "Error", "Exclude", "Extract", "FormData", "Headers", "Infinity", "JSON", "Map",
    "Math", "NaN", "NonNullable", "Number", "Object", "Omit", "Parameters", "Partial", "Pick",
    "Promise", "RangeError", "ReadableStream", "Readonly", "Record", "Reflect", "RegExp",
    "Request", "Required", "Response", "ReturnType", "Set", "String", "Symbol", "SyntaxError",
    "TextDecoder", "TextEncoder", "TypeError", "URL", "URLSearchParams", "Uint8Array", "WeakMap",
    "WeakSet", "arguments", "atob", "btoa", "clearInterval", "clearTimeout", "console", "crypto",
    "decodeURIComponent", "encodeURIComponent", "exports", "fetch", "globalThis", "module",
    "parseFloat", "parseInt", "process", "queueMicrotask", "require", "setInterval",
    "setTimeout", "structuredClone", "undefined",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeIdentifier {
    pub name: String,
    /// First use, 0-based
    pub position: Position,
    pub byte: usize,
}

/// Identifiers referenced inside `function` but not bound by it, in order
/// of first use. Member properties are never reported; the member base is.
/// Bindings are block scoped (`var` is function scoped), so a name bound in
/// one block or closure does not hide a free use elsewhere.
pub fn free_identifiers(function: Node<'_>, source: &str) -> Vec<FreeIdentifier> {
    let mut outer = HashSet::new();
    if let Some(name) = function.child_by_field_name("name") {
        outer.insert(node_text(name, source));
    }
    let mut walker = ScopeWalker {
        source,
        scopes: vec![outer],
        seen: HashSet::new(),
        out: Vec::new(),
    };
    walker.walk(function);
    walker.out
}

struct ScopeWalker<'s> {
    source: &'s str,
    scopes: Vec<HashSet<String>>,
    seen: HashSet<String>,
    out: Vec<FreeIdentifier>,
}

impl ScopeWalker<'_> {
    fn walk(&mut self, node: Node<'_>) {
        match node.kind() {
            "identifier" | "shorthand_property_identifier" | "type_identifier" => {
                self.reference(node);
                return;
            }
            // Parameter defaults may still reference outer names; everything
            // else in a pattern is a binding.
            "shorthand_property_identifier_pattern" => return,
            _ => {}
        }
        let scope = scope_bindings(node, self.source);
        let pushed = scope.is_some();
        if let Some(scope) = scope {
            self.scopes.push(scope);
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk(child);
        }
        if pushed {
            self.scopes.pop();
        }
    }

    fn reference(&mut self, node: Node<'_>) {
        let name = node_text(node, self.source);
        let bound = self.scopes.iter().rev().any(|scope| scope.contains(&name));
        if bound || GLOBALS.contains(&name.as_str()) || is_label(node) {
            return;
        }
        if self.seen.insert(name.clone()) {
            self.out.push(FreeIdentifier {
                name,
                position: position(node),
                byte: node.start_byte(),
            });
        }
    }
}

/// Names a scope-opening node binds for its subtree, or `None` when the node
/// opens no scope.
fn scope_bindings(node: Node<'_>, source: &str) -> Option<HashSet<String>> {
    let kind = node.kind();
    let mut names = HashSet::new();
    if is_function_node(kind) || is_function_declaration(kind) || kind == "method_definition" {
        if let Some(name) = node.child_by_field_name("name").filter(|n| n.kind() == "identifier") {
            names.insert(node_text(name, source));
        }
        if let Some(params) = node.child_by_field_name("parameters") {
            let mut cursor = params.walk();
            for param in params.named_children(&mut cursor) {
                bind_pattern(param, source, &mut names);
            }
        }
        if let Some(param) = node.child_by_field_name("parameter") {
            bind_pattern(param, source, &mut names);
        }
        if let Some(type_params) = node.child_by_field_name("type_parameters") {
            let mut cursor = type_params.walk();
            for param in type_params.named_children(&mut cursor) {
                if let Some(name) = param.child_by_field_name("name") {
                    names.insert(node_text(name, source));
                }
            }
        }
        if let Some(body) = node.child_by_field_name("body") {
            hoist_vars(body, source, &mut names);
        }
        return Some(names);
    }
    match kind {
        "statement_block" | "switch_body" => {
            let mut cursor = node.walk();
            for stmt in node.named_children(&mut cursor) {
                declare_statement(stmt, source, &mut names);
            }
        }
        "for_statement" => {
            if let Some(init) = node.child_by_field_name("initializer") {
                declare_statement(init, source, &mut names);
            }
        }
        "for_in_statement" => {
            // `for (x of xs)` assigns an outer name
            if node.child_by_field_name("kind").is_some() {
                if let Some(left) = node.child_by_field_name("left") {
                    bind_pattern(left, source, &mut names);
                }
            }
        }
        "catch_clause" => {
            if let Some(param) = node.child_by_field_name("parameter") {
                bind_pattern(param, source, &mut names);
            }
        }
        _ => return None,
    }
    Some(names)
}

fn declare_statement(stmt: Node<'_>, source: &str, names: &mut HashSet<String>) {
    match stmt.kind() {
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = stmt.walk();
            for declarator in stmt.named_children(&mut cursor) {
                if let Some(name) = declarator.child_by_field_name("name") {
                    bind_pattern(name, source, names);
                }
            }
        }
        "function_declaration" | "generator_function_declaration" | "class_declaration"
        | "abstract_class_declaration" | "interface_declaration" | "type_alias_declaration"
        | "enum_declaration" => {
            if let Some(name) = stmt.child_by_field_name("name") {
                names.insert(node_text(name, source));
            }
        }
        _ => {}
    }
}

/// `var` declarations anywhere in a function body, outside nested functions.
fn hoist_vars(node: Node<'_>, source: &str, names: &mut HashSet<String>) {
    if node.kind() == "variable_declaration" {
        declare_statement(node, source, names);
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        let kind = child.kind();
        if is_function_node(kind) || is_function_declaration(kind) || kind == "method_definition" {
            continue;
        }
        hoist_vars(child, source, names);
    }
}

fn bind_pattern(node: Node<'_>, source: &str, locals: &mut HashSet<String>) {
    match node.kind() {
        "identifier" | "shorthand_property_identifier_pattern" => {
            locals.insert(node_text(node, source));
        }
        "required_parameter" | "optional_parameter" => {
            if let Some(pattern) = node.child_by_field_name("pattern") {
                bind_pattern(pattern, source, locals);
            }
        }
        "assignment_pattern" | "object_assignment_pattern" => {
            if let Some(left) = node.child_by_field_name("left") {
                bind_pattern(left, source, locals);
            }
        }
        "pair_pattern" => {
            if let Some(value) = node.child_by_field_name("value") {
                bind_pattern(value, source, locals);
            }
        }
        "object_pattern" | "array_pattern" | "rest_pattern" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                bind_pattern(child, source, locals);
            }
        }
        _ => {}
    }
}

fn is_label(node: Node<'_>) -> bool {
    node.parent()
        .map(|parent| {
            matches!(
                parent.kind(),
                "labeled_statement" | "break_statement" | "continue_statement"
            )
        })
        .unwrap_or(false)
}
