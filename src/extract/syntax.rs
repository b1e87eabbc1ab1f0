//! Small tree-sitter helpers shared by the extractor, locator and expander.

use crate::model::{Position, Range, Span};
use tree_sitter::Node;

pub fn node_text(node: Node<'_>, source: &str) -> String {
    source
        .get(node.start_byte()..node.end_byte())
        .unwrap_or("")
        .trim()
        .to_string()
}

pub fn node_str<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or("")
}

pub fn span(node: Node<'_>) -> Span {
    let start = node.start_position();
    let end = node.end_position();
    Span {
        start_line: start.row + 1,
        start_column: start.column + 1,
        end_line: end.row + 1,
        end_column: end.column + 1,
    }
}

pub fn position(node: Node<'_>) -> Position {
    let start = node.start_position();
    Position {
        line: start.row as u32,
        character: start.column as u32,
    }
}

pub fn range(node: Node<'_>) -> Range {
    let end = node.end_position();
    Range {
        start: position(node),
        end: Position {
            line: end.row as u32,
            character: end.column as u32,
        },
    }
}

pub fn call_target_node(node: Node<'_>) -> Option<Node<'_>> {
    node.child_by_field_name("function")
        .or_else(|| node.child_by_field_name("constructor"))
}

pub fn call_arguments(node: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    let Some(args) = node.child_by_field_name("arguments") else {
        return out;
    };
    let mut cursor = args.walk();
    for child in args.named_children(&mut cursor) {
        if child.kind() == "comment" {
            continue;
        }
        out.push(child);
    }
    out
}

pub fn member_object_and_property<'a>(node: Node<'a>, source: &str) -> Option<(Node<'a>, String)> {
    if node.kind() != "member_expression" && node.kind() != "optional_member_expression" {
        return None;
    }
    let object = node.child_by_field_name("object")?;
    let property = node
        .child_by_field_name("property")
        .map(|prop| node_text(prop, source))?;
    Some((object, property))
}

/// Strip wrappers that do not change the value: parentheses, `await`,
/// type assertions and non-null assertions.
pub fn unwrap_expression(mut node: Node<'_>) -> Node<'_> {
    loop {
        let next = match node.kind() {
            "parenthesized_expression" | "await_expression" | "non_null_expression" => {
                node.named_child(0)
            }
            "as_expression" | "satisfies_expression" | "type_assertion" => {
                first_expression_child(node)
            }
            _ => None,
        };
        match next {
            Some(inner) => node = inner,
            None => return node,
        }
    }
}

fn first_expression_child(node: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .find(|child| !child.kind().contains("type"))
}

pub fn is_string_node(node: Node<'_>) -> bool {
    node.kind() == "string"
}

pub fn string_value(node: Node<'_>, source: &str) -> Option<String> {
    if !is_string_node(node) {
        return None;
    }
    unquote_string_literal(&node_text(node, source))
}

pub fn unquote_string_literal(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() < 2 {
        return None;
    }
    let first = trimmed.chars().next()?;
    if first == '"' || first == '\'' || first == '`' {
        let last = trimmed.chars().last()?;
        if last == first {
            return Some(trimmed[1..trimmed.len() - 1].to_string());
        }
    }
    None
}

pub fn is_function_node(kind: &str) -> bool {
    matches!(
        kind,
        "function" | "function_expression" | "arrow_function" | "generator_function"
    )
}

pub fn is_function_declaration(kind: &str) -> bool {
    matches!(
        kind,
        "function_declaration" | "generator_function_declaration"
    )
}

pub fn object_property_node<'a>(node: Node<'a>, key: &str, source: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() != "pair" {
            continue;
        }
        let Some(key_node) = child.child_by_field_name("key") else {
            continue;
        };
        let key_text = node_text(key_node, source);
        if key_text.trim_matches('"').trim_matches('\'') != key {
            continue;
        }
        return child.child_by_field_name("value");
    }
    None
}

pub fn object_property_string(node: Node<'_>, key: &str, source: &str) -> Option<String> {
    object_property_node(node, key, source).and_then(|value| string_value(value, source))
}

/// Source specifier of an import or re-export statement.
pub fn import_source(node: Node<'_>, source: &str) -> Option<String> {
    let source_node = node.child_by_field_name("source")?;
    string_value(source_node, source)
}

/// Walk up to the closest ancestor of one of `kinds`.
pub fn ancestor_of_kind<'a>(node: Node<'a>, kinds: &[&str]) -> Option<Node<'a>> {
    let mut current = node.parent();
    while let Some(parent) = current {
        if kinds.contains(&parent.kind()) {
            return Some(parent);
        }
        current = parent.parent();
    }
    None
}

pub fn has_anonymous_child(node: Node<'_>, token: &str) -> bool {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .any(|child| !child.is_named() && child.kind() == token)
}

/// Byte range of the innermost function body (or the whole program)
/// enclosing `node`.
pub fn enclosing_scope(node: Node<'_>) -> (usize, usize) {
    let mut current = node.parent();
    while let Some(parent) = current {
        if is_function_node(parent.kind())
            || is_function_declaration(parent.kind())
            || parent.kind() == "method_definition"
        {
            return (parent.start_byte(), parent.end_byte());
        }
        if parent.parent().is_none() {
            return (parent.start_byte(), parent.end_byte());
        }
        current = parent.parent();
    }
    (node.start_byte(), node.end_byte())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unquote_handles_all_quote_styles() {
        assert_eq!(unquote_string_literal("'/users'").as_deref(), Some("/users"));
        assert_eq!(unquote_string_literal("\"/a\"").as_deref(), Some("/a"));
        assert_eq!(unquote_string_literal("`/b`").as_deref(), Some("/b"));
        assert_eq!(unquote_string_literal("path"), None);
    }
}
