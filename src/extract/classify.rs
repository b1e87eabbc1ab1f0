use super::syntax::{call_target_node, member_object_and_property, node_text};
use crate::http;
use crate::model::{BindingKind, ImportBinding};
use std::collections::HashSet;
use tree_sitter::Node;

const ROUTER_CLASSES: &[&str] = &["Hono", "OpenAPIHono"];

/// Role of a syntax node in router tracing. Computed once per node.
#[derive(Debug, Clone, Copy)]
pub enum NodeClass<'t> {
    /// `new Hono()` (or an aliased import of it)
    RouterConstruction,
    /// `<recv>.get|post|...|all|use|on|openapi(...)`
    RouteCall { receiver: Node<'t>, method: &'static str },
    /// `<recv>.route(prefix, sub)`
    MountCall { receiver: Node<'t> },
    /// `<recv>.basePath(prefix)`
    BasePathCall { receiver: Node<'t> },
    /// `<recv>[expr](...)`
    DynamicDispatch { receiver: Node<'t> },
    Other,
}

const REGISTRATION_METHODS: &[&str] = &[
    "get", "post", "put", "delete", "patch", "options", "all", "use", "on", "openapi",
];

fn registration_method(name: &str) -> Option<&'static str> {
    REGISTRATION_METHODS.iter().copied().find(|m| *m == name)
}

pub struct Classifier<'s> {
    source: &'s str,
    router_classes: HashSet<String>,
    namespaces: HashSet<String>,
}

impl<'s> Classifier<'s> {
    pub fn new(bindings: &[ImportBinding], source: &'s str) -> Self {
        let mut router_classes = HashSet::new();
        let mut namespaces = HashSet::new();
        let mut saw_framework = false;
        for binding in bindings {
            if !is_framework_module(&binding.specifier) {
                continue;
            }
            saw_framework = true;
            match binding.kind {
                BindingKind::Named if ROUTER_CLASSES.contains(&binding.imported.as_str()) => {
                    router_classes.insert(binding.local.clone());
                }
                BindingKind::Namespace => {
                    namespaces.insert(binding.local.clone());
                }
                _ => {}
            }
        }
        if !saw_framework {
            router_classes.extend(ROUTER_CLASSES.iter().map(|s| s.to_string()));
        }
        Self {
            source,
            router_classes,
            namespaces,
        }
    }

    pub fn classify<'t>(&self, node: Node<'t>) -> NodeClass<'t> {
        match node.kind() {
            "new_expression" => {
                if self.is_router_constructor(node) {
                    NodeClass::RouterConstruction
                } else {
                    NodeClass::Other
                }
            }
            "call_expression" => self.classify_call(node),
            _ => NodeClass::Other,
        }
    }

    fn classify_call<'t>(&self, node: Node<'t>) -> NodeClass<'t> {
        let Some(target) = call_target_node(node) else {
            return NodeClass::Other;
        };
        if target.kind() == "subscript_expression" {
            return match target.child_by_field_name("object") {
                Some(receiver) => NodeClass::DynamicDispatch { receiver },
                None => NodeClass::Other,
            };
        }
        let Some((receiver, property)) = member_object_and_property(target, self.source) else {
            return NodeClass::Other;
        };
        match property.as_str() {
            "route" => NodeClass::MountCall { receiver },
            "basePath" => NodeClass::BasePathCall { receiver },
            name => match registration_method(name) {
                Some(method) => NodeClass::RouteCall { receiver, method },
                None => NodeClass::Other,
            },
        }
    }

    fn is_router_constructor(&self, node: Node<'_>) -> bool {
        let Some(target) = call_target_node(node) else {
            return false;
        };
        match target.kind() {
            "identifier" => self.router_classes.contains(&node_text(target, self.source)),
            "member_expression" => member_object_and_property(target, self.source)
                .map(|(object, property)| {
                    object.kind() == "identifier"
                        && self.namespaces.contains(&node_text(object, self.source))
                        && ROUTER_CLASSES.contains(&property.as_str())
                })
                .unwrap_or(false),
            _ => false,
        }
    }
}

pub fn is_framework_module(specifier: &str) -> bool {
    specifier == "hono" || specifier.starts_with("hono/") || specifier == "@hono/zod-openapi"
}

/// HTTP method for a registration method name; `use` and `all` map to the
/// wildcard sentinel.
pub fn method_for(name: &str) -> Option<String> {
    match name {
        "use" | "all" => Some(http::METHOD_ALL.to_string()),
        verb if http::is_verb_method(verb) => http::normalize_method(verb),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::bindings::collect_bindings;
    use crate::scan::Language;
    use crate::workspace::SourceParser;
    use std::path::Path;

    fn first_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
        if node.kind() == kind {
            return Some(node);
        }
        let mut cursor = node.walk();
        let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
        children.into_iter().find_map(|child| first_of_kind(child, kind))
    }

    #[test]
    fn aliased_import_is_a_router_class() {
        let source = "import { Hono as App } from 'hono';\nconst app = new App();\nconst m = new Map();";
        let mut parser = SourceParser::new().unwrap();
        let tree = parser.parse(Language::TypeScript, source).unwrap();
        let bindings = collect_bindings(tree.root_node(), source, Path::new("/p/a.ts"));
        let classifier = Classifier::new(&bindings, source);
        let first = first_of_kind(tree.root_node(), "new_expression").unwrap();
        assert!(matches!(classifier.classify(first), NodeClass::RouterConstruction));
    }

    #[test]
    fn calls_are_classified_by_property() {
        let source = "app.get('/x', h); app.route('/a', sub); app[verb]('/y', h);";
        let mut parser = SourceParser::new().unwrap();
        let tree = parser.parse(Language::JavaScript, source).unwrap();
        let classifier = Classifier::new(&[], source);
        let root = tree.root_node();
        let mut cursor = root.walk();
        let calls: Vec<Node<'_>> = root
            .named_children(&mut cursor)
            .filter_map(|stmt| stmt.named_child(0))
            .collect();
        assert!(matches!(
            classifier.classify(calls[0]),
            NodeClass::RouteCall { method: "get", .. }
        ));
        assert!(matches!(classifier.classify(calls[1]), NodeClass::MountCall { .. }));
        assert!(matches!(
            classifier.classify(calls[2]),
            NodeClass::DynamicDispatch { .. }
        ));
    }

    #[test]
    fn method_for_maps_wildcards() {
        assert_eq!(method_for("use").as_deref(), Some("ALL"));
        assert_eq!(method_for("patch").as_deref(), Some("PATCH"));
        assert_eq!(method_for("on"), None);
    }
}
